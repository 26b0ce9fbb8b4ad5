//! Pipeline orchestrator: parameter selection, index construction
//! and the per-strand filter, merge and align passes.
//!
//! Based on the methods of:
//!   PILER: identification and classification of genomic repeats.
//!   Edgar and Myers, Bioinformatics Suppl. 1:i152-i158 (2005).
//!   Efficient q-gram filters for finding all epsilon-matches over a
//!   given length. Rasmussen, Stoye and Myers, J. Comput. Biol.
//!   13:296-308 (2006).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dp::{self, Aligner, CostConfig, DpHit, DpParams};
use crate::error::PalsError;
use crate::filter::{self, Filter, FilterParams, Merger};
use crate::index::{KmerIndex, MAX_KMER_LEN, MIN_KMER_LEN};
use crate::sequence::Sequence;
use crate::sorter::HitSorter;

/// Default minimum hit length.
pub const DEFAULT_LENGTH: usize = 400;
/// Default minimum identity.
pub const DEFAULT_MIN_IDENTITY: f64 = 0.94;
/// Largest tolerated mean index-list length; bounds the word size
/// from below.
pub const MAX_AVG_INDEX_LIST_LEN: f64 = 15.0;
/// Added to the error budget when no tube offset is given.
pub const TUBE_OFFSET_DELTA: usize = 32;
/// Hit lengths at or below this cannot be seeded.
pub const MIN_WORD_LENGTH: usize = 4;

/// Optional progress sink. Absence silences the messages and changes
/// nothing else. Sinks must be shareable between concurrent strand
/// passes.
pub trait Log: Sync {
    fn message(&self, msg: &str);
}

pub struct Pals<'a> {
    target: &'a Sequence,
    query: &'a Sequence,
    self_compare: bool,
    costs: CostConfig,

    pub filter_params: Option<FilterParams>,
    pub dp_params: Option<DpParams>,

    index: Option<Arc<KmerIndex>>,
    sorter: HitSorter,
    tube_offset: usize,
    max_mem: Option<u64>,
    log: Option<&'a dyn Log>,
    cancel: Option<&'a AtomicBool>,
    failed: Option<PalsError>,
}

impl<'a> Pals<'a> {
    /// A new aligner over target and query. In self-comparison the
    /// query should be the target sequence itself.
    pub fn new(target: &'a Sequence, query: &'a Sequence, self_compare: bool) -> Pals<'a> {
        Pals {
            target,
            query,
            self_compare,
            costs: CostConfig::default(),
            filter_params: None,
            dp_params: None,
            index: None,
            sorter: HitSorter::new(),
            tube_offset: 0,
            max_mem: None,
            log: None,
            cancel: None,
            failed: None,
        }
    }

    pub fn with_costs(mut self, costs: CostConfig) -> Pals<'a> {
        self.costs = costs;
        self
    }

    /// Advisory ceiling on filter memory; `optimise` rejects
    /// parameter sets estimated to exceed it.
    pub fn with_max_mem(mut self, bytes: u64) -> Pals<'a> {
        self.max_mem = Some(bytes);
        self
    }

    /// Fixed tube offset instead of the derived default.
    pub fn with_tube_offset(mut self, tube_offset: usize) -> Pals<'a> {
        self.tube_offset = tube_offset;
        self
    }

    pub fn with_logger(mut self, log: &'a dyn Log) -> Pals<'a> {
        self.log = Some(log);
        self
    }

    /// Cooperative cancel hook, checked between merged records and
    /// between trapezoids.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Pals<'a> {
        self.cancel = Some(cancel);
        self
    }

    /// Select filter parameters for the requested hit length and
    /// identity. Deterministic: depends on the target length and the
    /// memory ceiling, never on sequence content.
    ///
    /// Starts from filter criteria equal to the alignment criteria
    /// and relaxes - first halving the seed length, then shedding
    /// error budget - until some word size admits a usable filter.
    pub fn optimise(&mut self, min_hit_len: usize, min_id: f64) -> Result<(), PalsError> {
        if !(0.0..=1.0).contains(&min_id) {
            return Err(PalsError::bad_parameter("min_id", min_id));
        }
        if min_hit_len <= MIN_WORD_LENGTH {
            return Err(PalsError::bad_parameter("min_hit_length", min_hit_len));
        }

        self.notify("optimising filter parameters");

        // A word occurs about once every 4^k positions, so the mean
        // index-list length for a target of length N is N/4^k;
        // keeping it at or below the cap bounds k from below.
        let n = self.target.len() as f64;
        let min_word_size =
            ((n.log2() - MAX_AVG_INDEX_LIST_LEN.log2()) / 2.0 + 0.5) as isize;
        if min_word_size > MAX_KMER_LEN as isize {
            self.notify(&format!(
                "word size too small: {MAX_KMER_LEN} < {min_word_size}"
            ));
            return Err(PalsError::ParameterSearchFailed);
        }
        let floor = (min_word_size.max(MIN_KMER_LEN as isize)) as usize;

        let mut seed_length = min_hit_len;
        let mut seed_diffs = (min_hit_len as f64 * (1.0 - min_id)) as usize;

        loop {
            let mut found: Option<FilterParams> = None;
            for word_size in (floor..=MAX_KMER_LEN).rev() {
                let params = FilterParams {
                    word_size,
                    min_match: seed_length,
                    max_error: seed_diffs,
                    tube_offset: if self.tube_offset > 0 {
                        self.tube_offset
                    } else {
                        seed_diffs + TUBE_OFFSET_DELTA
                    },
                };

                let mem = self.mem_required(&params);
                if let Some(max_mem) = self.max_mem {
                    if mem > max_mem {
                        self.notify(&format!(
                            "parameters n={} k={} e={}, mem={} MB > maxmem={} MB",
                            params.min_match,
                            params.word_size,
                            params.max_error,
                            mem / 1_000_000,
                            max_mem / 1_000_000
                        ));
                        continue;
                    }
                }

                let min_words =
                    filter::min_words_per_filter_hit(seed_length, word_size, seed_diffs);
                if min_words <= 0 {
                    self.notify(&format!(
                        "parameters n={} k={} e={}, B={}",
                        params.min_match, params.word_size, params.max_error, min_words
                    ));
                    continue;
                }

                let list_len = self.avg_index_list_len(&params);
                if list_len > MAX_AVG_INDEX_LIST_LEN {
                    self.notify(&format!(
                        "parameters n={} k={} e={}, B={} avgixlen={:.2} > max={:.2}",
                        params.min_match,
                        params.word_size,
                        params.max_error,
                        min_words,
                        list_len,
                        MAX_AVG_INDEX_LIST_LEN
                    ));
                    continue;
                }

                found = Some(params);
                break;
            }

            if let Some(params) = found {
                self.filter_params = Some(params);
                self.dp_params = Some(DpParams {
                    min_hit_length: min_hit_len,
                    min_id,
                });
                return Ok(());
            }

            // No word size works: ask for fewer errors and a shorter
            // seed.
            if seed_length >= min_hit_len / 4 {
                seed_length /= 2;
                continue;
            }
            if seed_diffs > 0 {
                seed_diffs -= 1;
                continue;
            }

            return Err(PalsError::ParameterSearchFailed);
        }
    }

    /// Expected hits for any given word.
    pub fn avg_index_list_len(&self, params: &FilterParams) -> f64 {
        self.target.len() as f64 / (1u64 << (2 * params.word_size)) as f64
    }

    fn filter_mem_required(&self, params: &FilterParams) -> u64 {
        let finger = KmerIndex::finger_bytes(params.word_size);
        let pos = self.target.len() as u64 * std::mem::size_of::<usize>() as u64;
        let tubes = params.max_active_tubes(self.target.len()) as u64
            * filter::tube_state_bytes() as u64;
        finger + pos + tubes
    }

    /// Estimated peak memory for a filter pass with these parameters.
    /// Advisory: byte costs follow the platform pointer width, not an
    /// allocator contract.
    pub fn mem_required(&self, params: &FilterParams) -> u64 {
        let mut sequence = self.target.len() as u64;
        if !std::ptr::eq(self.target, self.query) {
            sequence += self.query.len() as u64;
        }
        self.filter_mem_required(params) + sequence
    }

    /// Build the k-mer index for the selected word size. Fails before
    /// allocating when the finger array alone would break the memory
    /// ceiling.
    pub fn build_index(&mut self) -> Result<(), PalsError> {
        let params = self.require_params()?.0;
        if let Some(max_mem) = self.max_mem {
            let required = KmerIndex::finger_bytes(params.word_size);
            if required > max_mem {
                return Err(PalsError::IndexTooLarge {
                    required,
                    limit: max_mem,
                });
            }
        }
        self.notify("indexing");
        let index = KmerIndex::build(params.word_size, self.target)?;
        self.notify("indexed");
        self.index = Some(Arc::new(index));
        Ok(())
    }

    /// Reuse the index and parameters of another aligner over the
    /// same target, e.g. for a concurrent reverse-strand pass.
    pub fn share(&mut self, other: &Pals<'_>) {
        self.index = other.index.clone();
        self.filter_params = other.filter_params;
        self.dp_params = other.dp_params;
    }

    /// Filter, merge and align one strand of the query. The first
    /// error is recorded and repeated for subsequent calls until
    /// `reset`; the spill sorter is cleared on both paths.
    pub fn align(&mut self, complement: bool) -> Result<Vec<DpHit>, PalsError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        match self.align_pass(complement) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                let _ = self.sorter.clear();
                self.failed = Some(e.clone());
                Err(e)
            }
        }
    }

    fn align_pass(&mut self, complement: bool) -> Result<Vec<DpHit>, PalsError> {
        let (params, dp_params) = self.require_params()?;
        let index = self
            .index
            .clone()
            .ok_or(PalsError::BadParameter {
                name: "index",
                value: "not built; call build_index first".to_string(),
            })?;
        let same_strand_self = self.self_compare && !complement;

        let rc;
        let working: &Sequence = if complement {
            self.notify("complementing query");
            rc = self.query.rev_comp();
            &rc
        } else {
            self.query
        };

        self.notify("filtering");
        let hit_filter = Filter::new(&*index, params)?;
        hit_filter.filter(working, self.self_compare, complement, &mut self.sorter)?;
        self.notify(&format!("identified {} filter hits", self.sorter.len()));

        self.notify("merging");
        let mut merger = Merger::new(&params, self.costs.max_igap as usize, same_strand_self);
        for record in self.sorter.drain()? {
            if let Some(c) = self.cancel {
                if c.load(Ordering::Relaxed) {
                    return Err(PalsError::Cancelled);
                }
            }
            merger.merge_filter_hit(&record?);
        }
        self.sorter.clear()?;
        let traps = merger.finalise();
        let (lt, lq) = filter::coverage(&traps);
        self.notify(&format!(
            "merged {} trapezoids covering {} x {}",
            traps.len(),
            lt,
            lq
        ));

        self.notify("aligning");
        let mut aligner = Aligner::new(self.target, working, dp_params, self.costs, same_strand_self);
        if let Some(c) = self.cancel {
            aligner = aligner.with_cancel(c);
        }
        if let Some(l) = self.log {
            aligner = aligner.with_logger(l);
        }
        let hits = aligner.align_traps(&traps)?;
        let (ca, cb) = dp::coverage(&hits);
        self.notify(&format!(
            "aligned {} hits covering {} x {}",
            hits.len(),
            ca,
            cb
        ));

        Ok(hits)
    }

    /// Drop any recorded failure so `align` may be called again.
    pub fn reset(&mut self) {
        self.failed = None;
    }

    /// Remove the sorter's on-disk state. Call after the last pass.
    pub fn cleanup(&mut self) -> Result<(), PalsError> {
        self.sorter.clear()
    }

    fn require_params(&self) -> Result<(FilterParams, DpParams), PalsError> {
        match (self.filter_params, self.dp_params) {
            (Some(f), Some(d)) => Ok((f, d)),
            _ => Err(PalsError::BadParameter {
                name: "filter_params",
                value: "not selected; call optimise first".to_string(),
            }),
        }
    }

    fn notify(&self, msg: &str) {
        if let Some(log) = self.log {
            log.message(msg);
        }
    }
}
