//! Streaming q-gram filter over diagonal tubes.
//!
//! One pass over the query: every query word is looked up in the
//! target index, each match lands in the tube holding its diagonal
//! d = i - j, and a tube keeps the query span and count of its
//! current run. Runs reaching the words-per-hit bound are emitted as
//! filter hits; everything else is discarded without touching the
//! aligner. Tube slots are recycled modulo the active-tube bound, so
//! filter memory depends on the target length, not the diagonal
//! range.

use crate::error::PalsError;
use crate::index::{KmerIndex, KmerScan};
use crate::sequence::Sequence;
use crate::sorter::HitSorter;

use super::{min_words_per_filter_hit, FilterHit, FilterParams};

#[derive(Clone, Copy)]
struct TubeState {
    /// True tube index, so a recycled slot can tell a new tube from a
    /// continuation. `i64::MIN` marks a slot that has never been hit.
    tube: i64,
    q_lo: usize,
    q_hi: usize,
    count: usize,
}

const EMPTY: TubeState = TubeState {
    tube: i64::MIN,
    q_lo: 0,
    q_hi: 0,
    count: 0,
};

/// Per-tube bookkeeping cost, for the selector's memory estimate.
pub(crate) fn tube_state_bytes() -> usize {
    std::mem::size_of::<TubeState>()
}

pub struct Filter<'a> {
    index: &'a KmerIndex,
    params: FilterParams,
    min_words: usize,
}

impl<'a> Filter<'a> {
    pub fn new(index: &'a KmerIndex, params: FilterParams) -> Result<Filter<'a>, PalsError> {
        if params.tube_offset == 0 {
            return Err(PalsError::bad_parameter("tube_offset", params.tube_offset));
        }
        if params.word_size != index.word_size() {
            return Err(PalsError::bad_parameter("word_size", params.word_size));
        }
        let min_words = min_words_per_filter_hit(
            params.min_match,
            params.word_size,
            params.max_error,
        )
        .max(1) as usize;
        Ok(Filter {
            index,
            params,
            min_words,
        })
    }

    /// Run the filter for one strand of the query, pushing every
    /// emitted hit into the sorter. In self-comparison on the same
    /// strand, hits at or below the main diagonal are skipped; their
    /// mirror images above it carry the same information.
    pub fn filter(
        &self,
        query: &Sequence,
        self_compare: bool,
        complement: bool,
        sink: &mut HitSorter,
    ) -> Result<(), PalsError> {
        let k = self.params.word_size;
        let delta = self.params.tube_offset as i64;
        let target_len = self.index.target_len();
        let n_tubes = self.params.max_active_tubes(target_len) as i64;
        let mut tubes = vec![EMPTY; n_tubes as usize];
        let skip_self = self_compare && !complement;

        for (j, code) in KmerScan::new(&query.seq, k) {
            for &i in self.index.positions(code) {
                if skip_self && i <= j {
                    continue;
                }
                let d = i as i64 - j as i64;
                let tube = d.div_euclid(delta);
                let slot = tube.rem_euclid(n_tubes) as usize;
                let state = &mut tubes[slot];

                if state.count == 0 {
                    *state = TubeState {
                        tube,
                        q_lo: j,
                        q_hi: j,
                        count: 1,
                    };
                } else if state.tube != tube || j > state.q_hi + self.params.min_match {
                    let retired = *state;
                    self.retire(&retired, sink)?;
                    *state = TubeState {
                        tube,
                        q_lo: j,
                        q_hi: j,
                        count: 1,
                    };
                } else {
                    state.q_hi = j;
                    state.count += 1;
                }
            }
        }

        for state in &tubes {
            if state.count > 0 {
                self.retire(state, sink)?;
            }
        }
        Ok(())
    }

    /// Close out a run: emit it when it holds enough words. The
    /// reported diagonal is the tube centre, pulled inside the range
    /// consistent with the run's query span so the implied target
    /// interval stays within bounds.
    fn retire(&self, state: &TubeState, sink: &mut HitSorter) -> Result<(), PalsError> {
        if state.count < self.min_words {
            return Ok(());
        }
        let delta = self.params.tube_offset as i64;
        let k = self.params.word_size;
        let centre = state.tube * delta + delta / 2;

        let lo = -(state.q_lo as i64);
        let hi = self.index.target_len() as i64 - k as i64 - state.q_hi as i64;
        if lo > hi {
            // The run cannot be described by any single diagonal; it
            // straddled a target edge while drifting across its tube.
            return Ok(());
        }
        sink.push(FilterHit {
            q_from: state.q_lo,
            q_to: state.q_hi,
            diagonal: centre.clamp(lo, hi),
        })
    }
}
