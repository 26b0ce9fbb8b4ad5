//! Banded dynamic-programming alignment inside trapezoid regions.
//!
//! The aligner walks the merger's trapezoids in bottom order, skips
//! the ones an earlier alignment already covers, and drives the
//! recursive kernel over each. Hits stream through a bounded channel
//! so the caller can consume them while the kernel recurses; the
//! producer and consumer are joined before `align_traps` returns, so
//! the API stays synchronous.

mod kernel;

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::bounded;

use crate::error::PalsError;
use crate::filter::Trapezoid;
use crate::pals::Log;
use crate::sequence::Sequence;

use kernel::Kernel;

/// Hits buffered between the kernel and the consumer.
const RESULT_BUFFER: usize = 64;

/// Alignment cost model. One immutable record threaded through the
/// pipeline instead of package-level globals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostConfig {
    /// Longest indel run bridged without splitting a region.
    pub max_igap: isize,
    /// Per-step extension cost.
    pub diff_cost: isize,
    /// Residual cost of a matching step.
    pub same_cost: isize,
    /// Bonus for a matching base pair, `diff_cost + same_cost`.
    pub match_cost: isize,
    /// Band prune cutoff, `diff_cost * max_igap`.
    pub block_cost: isize,
    /// Denominator of the identity computation, `diff_cost + 1`.
    pub r_match_cost: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        let max_igap = 5;
        let diff_cost = 3;
        let same_cost = 1;
        CostConfig {
            max_igap,
            diff_cost,
            same_cost,
            match_cost: diff_cost + same_cost,
            block_cost: diff_cost * max_igap,
            r_match_cost: diff_cost as f64 + 1.0,
        }
    }
}

/// Acceptance thresholds for the aligner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpParams {
    pub min_hit_length: usize,
    pub min_id: f64,
}

/// A maximal local alignment. Target bounds `abpos..aepos` and query
/// bounds `bbpos..bepos` are half-open; `low_diagonal` and
/// `high_diagonal` are the tightest target - query diagonal band the
/// extension stayed inside; `error` is one minus identity under the
/// band-score metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpHit {
    pub abpos: usize,
    pub aepos: usize,
    pub bbpos: usize,
    pub bepos: usize,
    pub low_diagonal: isize,
    pub high_diagonal: isize,
    pub score: isize,
    pub error: f64,
}

/// Summed target and query projections of a hit list.
pub fn coverage(hits: &[DpHit]) -> (usize, usize) {
    let mut a = 0;
    let mut b = 0;
    for h in hits {
        a += h.aepos - h.abpos;
        b += h.bepos - h.bbpos;
    }
    (a, b)
}

pub struct Aligner<'a> {
    target: &'a Sequence,
    query: &'a Sequence,
    params: DpParams,
    costs: CostConfig,
    self_comp: bool,
    cancel: Option<&'a AtomicBool>,
    log: Option<&'a dyn Log>,
}

impl<'a> Aligner<'a> {
    pub fn new(
        target: &'a Sequence,
        query: &'a Sequence,
        params: DpParams,
        costs: CostConfig,
        self_comp: bool,
    ) -> Aligner<'a> {
        Aligner {
            target,
            query,
            params,
            costs,
            self_comp,
            cancel: None,
            log: None,
        }
    }

    /// Cooperative cancel hook, checked between trapezoids.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Aligner<'a> {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_logger(mut self, log: &'a dyn Log) -> Aligner<'a> {
        self.log = Some(log);
        self
    }

    /// Align every uncovered trapezoid and collect the emitted hits.
    /// The hit order is fully determined by the trapezoid order and
    /// the kernel's low-before-high recursion.
    pub fn align_traps(&self, traps: &[Trapezoid]) -> Result<Vec<DpHit>, PalsError> {
        let (tx, rx) = bounded(RESULT_BUFFER);
        let cancel = self.cancel;
        let target = &self.target.seq;
        let query = &self.query.seq;
        let params = self.params;
        let costs = self.costs;
        let self_comp = self.self_comp;

        let (hits, clamped) = std::thread::scope(|scope| {
            let producer = scope.spawn(move || -> Result<usize, PalsError> {
                let mut kernel = Kernel::new(
                    target,
                    query,
                    params.min_hit_length,
                    params.min_id,
                    costs,
                    self_comp,
                    traps,
                    tx,
                );
                for slot in 0..traps.len() {
                    if let Some(c) = cancel {
                        if c.load(Ordering::Relaxed) {
                            return Err(PalsError::Cancelled);
                        }
                    }
                    if kernel.is_covered(slot) {
                        continue;
                    }
                    kernel.set_slot(slot);
                    kernel.align_recursion(&traps[slot])?;
                }
                Ok(kernel.clamped)
            });

            let mut hits = Vec::new();
            for hit in rx {
                hits.push(hit);
            }
            let clamped = producer.join().expect("alignment kernel panicked")?;
            Ok::<_, PalsError>((hits, clamped))
        })?;

        if clamped > 0 {
            if let Some(log) = self.log {
                log.message(&format!(
                    "clamped {clamped} alignment end points to sequence bounds"
                ));
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_trap(target: &Sequence, query: &Sequence) -> Trapezoid {
        Trapezoid {
            bottom: 0,
            top: query.len() as isize,
            left: -(target.len() as isize),
            right: query.len() as isize,
        }
    }

    #[test]
    fn aligns_near_identical_short_sequences() {
        // One substitution and one indel between the two; a permissive
        // identity floor accepts the full-length alignment.
        let target = Sequence::new("t", b"ACACACTA".to_vec());
        let query = Sequence::new("q", b"AGCACACA".to_vec());
        let costs = CostConfig {
            max_igap: 5,
            diff_cost: 1,
            same_cost: 1,
            match_cost: 2,
            block_cost: 5,
            r_match_cost: 2.0,
        };
        let params = DpParams {
            min_hit_length: 5,
            min_id: 0.6,
        };

        let aligner = Aligner::new(&target, &query, params, costs, false);
        let hits = aligner.align_traps(&[full_trap(&target, &query)]).unwrap();

        assert_eq!(hits.len(), 1);
        let h = hits[0];
        assert!(h.aepos - h.abpos >= 5);
        assert!(h.bepos - h.bbpos >= 5);
        assert!(h.error <= 0.4, "error {} above threshold", h.error);
        // Full-length alignment up to the boundary columns.
        assert!(h.abpos <= 1 && h.bbpos <= 1);
        assert!(h.aepos >= target.len() - 1 && h.bepos >= query.len() - 1);
    }

    #[test]
    fn identical_sequences_align_perfectly() {
        let target = Sequence::new("t", b"GATTACAGATTACAGATTACA".to_vec());
        let query = target.clone();
        let params = DpParams {
            min_hit_length: 10,
            min_id: 0.9,
        };

        let aligner = Aligner::new(&target, &query, params, CostConfig::default(), false);
        let hits = aligner.align_traps(&[full_trap(&target, &query)]).unwrap();

        assert!(!hits.is_empty());
        let h = hits[0];
        assert_eq!((h.abpos, h.aepos), (0, target.len()));
        assert_eq!((h.bbpos, h.bepos), (0, query.len()));
        assert_eq!(h.error, 0.0);
        assert_eq!(h.score, target.len() as isize);
    }

    #[test]
    fn self_comparison_skips_identity_hit() {
        let target = Sequence::new("t", b"GATTACAGATTACAGATTACA".to_vec());
        let query = target.clone();
        let params = DpParams {
            min_hit_length: 10,
            min_id: 0.9,
        };

        let aligner = Aligner::new(&target, &query, params, CostConfig::default(), true);
        let hits = aligner.align_traps(&[full_trap(&target, &query)]).unwrap();
        assert!(hits
            .iter()
            .all(|h| !(h.abpos == h.bbpos && h.aepos == h.bepos)));
    }

    #[test]
    fn cancellation_stops_the_pass() {
        let target = Sequence::new("t", b"ACGTACGTACGTACGT".to_vec());
        let query = target.clone();
        let params = DpParams {
            min_hit_length: 4,
            min_id: 0.9,
        };
        let cancel = AtomicBool::new(true);

        let aligner = Aligner::new(&target, &query, params, CostConfig::default(), false)
            .with_cancel(&cancel);
        let err = aligner
            .align_traps(&[full_trap(&target, &query)])
            .unwrap_err();
        assert!(matches!(err, PalsError::Cancelled));
    }
}
