//! Q-gram filter: seeds candidate regions before dynamic programming.
//!
//! The filter scans the query against the k-mer index, accumulating
//! hit counts per diagonal tube, and emits the runs dense enough to
//! possibly contain an epsilon-match (Rasmussen, Stoye and Myers,
//! J. Comput. Biol. 13:296-308, 2006). The merger then coalesces the
//! surviving runs into trapezoidal search regions for the aligner.

mod merge;
mod tube;

pub use merge::{coverage, Merger, Trapezoid};
pub use tube::Filter;
pub(crate) use tube::tube_state_bytes;

/// Parameters the selector picks for one filter pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    /// K-mer length used by the index.
    pub word_size: usize,
    /// Minimum length of a seeded match.
    pub min_match: usize,
    /// Number of differences a seeded match may contain.
    pub max_error: usize,
    /// Width of a diagonal tube.
    pub tube_offset: usize,
}

impl FilterParams {
    /// Diagonal span a single tube has to account for: its own width
    /// plus the drift an alignment with `max_error` differences can
    /// accumulate.
    pub fn tube_width(&self) -> usize {
        self.tube_offset + self.max_error
    }

    /// Upper bound on simultaneously live tubes for a target of the
    /// given length. The filter recycles tube slots modulo this count.
    pub fn max_active_tubes(&self, target_len: usize) -> usize {
        (target_len + self.tube_width() - 1) / self.tube_offset + 1
    }
}

/// A seeded region emitted by the filter: a run of word matches in
/// one tube. `q_from`/`q_to` are the first and last word start in the
/// query; `diagonal` is the centre of the tube, in target - query
/// orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterHit {
    pub q_from: usize,
    pub q_to: usize,
    pub diagonal: i64,
}

impl FilterHit {
    /// Global merge order: diagonal, then query start, then query end.
    #[inline]
    pub fn sort_key(&self) -> (i64, usize, usize) {
        (self.diagonal, self.q_from, self.q_to)
    }
}

/// Lower bound on the k-mers an n-long match with e differences must
/// share with the target: each difference invalidates at most k
/// words, so B = n - k(e + 1) + 1. Non-positive means the parameters
/// cannot filter at all.
pub fn min_words_per_filter_hit(min_match: usize, word_size: usize, max_error: usize) -> isize {
    min_match as isize - word_size as isize * (max_error as isize + 1) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_per_hit_bound() {
        // An exact 50-mer shares 50 - 8 + 1 = 43 words of size 8.
        assert_eq!(min_words_per_filter_hit(50, 8, 0), 43);
        // Each error can wipe out a full window of 8 words.
        assert_eq!(min_words_per_filter_hit(50, 8, 2), 27);
        // Degenerate: too many errors for the word size.
        assert!(min_words_per_filter_hit(20, 8, 2) <= 0);
    }

    #[test]
    fn active_tube_bound_covers_target() {
        let p = FilterParams {
            word_size: 8,
            min_match: 50,
            max_error: 2,
            tube_offset: 34,
        };
        assert_eq!(p.tube_width(), 36);
        // Enough slots that two tubes a full target apart never share
        // a slot while both are live.
        assert!(p.max_active_tubes(1000) >= 1000 / 34 + 1);
    }
}
