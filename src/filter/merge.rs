//! Coalesces ordered filter hits into trapezoidal search regions.
//!
//! A trapezoid bounds the aligner's search in both axes: query rows
//! between `bottom` and `top`, diagonals between `left` and `right`.
//! Within this module and everything downstream, diagonals are in
//! query - target orientation (the negation of the filter's
//! target - query diagonals); the aligner flips the sign back exactly
//! once when it emits a hit.
//!
//! The hit stream arrives sorted by diagonal then query start, so a
//! single forward sweep keeps only a small working set of open
//! trapezoids: anything the stream has moved past is closed and
//! final.

use super::{FilterHit, FilterParams};

/// A diagonal-bounded, query-bounded search region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trapezoid {
    /// Lowest query row.
    pub bottom: isize,
    /// Highest query row, exclusive of the last matched word's end.
    pub top: isize,
    /// Lowest diagonal (query - target).
    pub left: isize,
    /// Highest diagonal (query - target).
    pub right: isize,
}

impl Trapezoid {
    pub fn query_span(&self) -> isize {
        self.top - self.bottom
    }
}

/// Summed target and query projections of a trapezoid list, for
/// progress reporting.
pub fn coverage(traps: &[Trapezoid]) -> (isize, isize) {
    let mut lt = 0;
    let mut lq = 0;
    for t in traps {
        lt += t.right - t.left + 1;
        lq += t.top - t.bottom + 1;
    }
    (lt, lq)
}

struct OpenTrap {
    trap: Trapezoid,
    centre: isize,
}

pub struct Merger {
    max_igap: isize,
    word_size: isize,
    /// Diagonal padding around a tube centre: half the tube width
    /// plus the drift allowance.
    half_pad: isize,
    self_comp: bool,
    open: Vec<OpenTrap>,
    done: Vec<Trapezoid>,
}

impl Merger {
    pub fn new(params: &FilterParams, max_igap: usize, self_comp: bool) -> Merger {
        Merger {
            max_igap: max_igap as isize,
            word_size: params.word_size as isize,
            half_pad: (params.tube_offset / 2 + params.max_error) as isize,
            self_comp,
            open: Vec::new(),
            done: Vec::new(),
        }
    }

    /// Fold one filter hit into the working set. Hits must arrive in
    /// (diagonal, q_from) order.
    pub fn merge_filter_hit(&mut self, hit: &FilterHit) {
        // Hit diagonals are target - query; negate into the aligner's
        // orientation. The stream's ascending diagonals therefore
        // sweep dq downwards.
        let dq = -(hit.diagonal as isize);
        let bottom = hit.q_from as isize;
        let top = hit.q_to as isize + self.word_size;

        self.sweep(dq, bottom);

        for open in &mut self.open {
            let diag_near = (dq - open.centre).abs() <= self.max_igap;
            let span_near =
                bottom <= open.trap.top + self.max_igap && top >= open.trap.bottom - self.max_igap;
            if diag_near && span_near {
                open.trap.bottom = open.trap.bottom.min(bottom);
                open.trap.top = open.trap.top.max(top);
                open.trap.left = open.trap.left.min(dq - self.half_pad);
                open.trap.right = open.trap.right.max(dq + self.half_pad);
                open.centre = (open.trap.left + open.trap.right) / 2;
                return;
            }
        }

        self.open.push(OpenTrap {
            trap: Trapezoid {
                bottom,
                top,
                left: dq - self.half_pad,
                right: dq + self.half_pad,
            },
            centre: dq,
        });
    }

    /// Close every open trapezoid the sweep has left behind: its
    /// diagonal is already above the incoming one, or it shares the
    /// incoming diagonal neighbourhood but its query span ended more
    /// than an allowed gap ago.
    fn sweep(&mut self, dq: isize, bottom: isize) {
        let max_igap = self.max_igap;
        let mut i = 0;
        while i < self.open.len() {
            let open = &self.open[i];
            let diag_passed = open.centre - dq > max_igap;
            let span_passed =
                (open.centre - dq).abs() <= max_igap && open.trap.top + max_igap < bottom;
            if diag_passed || span_passed {
                let closed = self.open.swap_remove(i);
                self.close(closed.trap);
            } else {
                i += 1;
            }
        }
    }

    fn close(&mut self, mut trap: Trapezoid) {
        if self.self_comp {
            // Everything at or below the main diagonal is the mirror
            // image of a region we also saw above it.
            trap.right = trap.right.min(0);
            if trap.left > trap.right {
                return;
            }
        }
        self.done.push(trap);
    }

    /// Flush the working set and hand back the finished regions,
    /// ordered by bottom for the aligner's enumeration.
    pub fn finalise(mut self) -> Vec<Trapezoid> {
        while let Some(open) = self.open.pop() {
            self.close(open.trap);
        }
        self.done
            .sort_unstable_by_key(|t| (t.bottom, t.left, t.top, t.right));
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FilterParams {
        FilterParams {
            word_size: 8,
            min_match: 50,
            max_error: 2,
            tube_offset: 34,
        }
    }

    fn hit(diagonal: i64, q_from: usize, q_to: usize) -> FilterHit {
        FilterHit {
            q_from,
            q_to,
            diagonal,
        }
    }

    #[test]
    fn single_hit_becomes_padded_trapezoid() {
        let mut m = Merger::new(&params(), 5, false);
        m.merge_filter_hit(&hit(100, 10, 60));
        let traps = m.finalise();
        assert_eq!(traps.len(), 1);
        let t = traps[0];
        assert_eq!(t.bottom, 10);
        assert_eq!(t.top, 68); // q_to + word_size
        assert_eq!(t.left, -100 - 19);
        assert_eq!(t.right, -100 + 19);
    }

    #[test]
    fn same_tube_runs_merge_when_close() {
        let mut m = Merger::new(&params(), 5, false);
        m.merge_filter_hit(&hit(100, 10, 40));
        m.merge_filter_hit(&hit(100, 50, 90));
        let traps = m.finalise();
        assert_eq!(traps.len(), 1);
        assert_eq!(traps[0].bottom, 10);
        assert_eq!(traps[0].top, 98);
    }

    #[test]
    fn distant_query_spans_stay_apart() {
        let mut m = Merger::new(&params(), 5, false);
        m.merge_filter_hit(&hit(100, 0, 40));
        m.merge_filter_hit(&hit(100, 500, 540));
        let traps = m.finalise();
        assert_eq!(traps.len(), 2);
        assert!(traps[0].top < traps[1].bottom);
    }

    #[test]
    fn different_tubes_stay_apart() {
        let mut m = Merger::new(&params(), 5, false);
        m.merge_filter_hit(&hit(100, 0, 40));
        m.merge_filter_hit(&hit(134, 0, 40));
        assert_eq!(m.finalise().len(), 2);
    }

    #[test]
    fn merging_merged_output_is_a_no_op() {
        let p = params();
        let mut m = Merger::new(&p, 5, false);
        for h in [hit(32, 0, 50), hit(32, 55, 100), hit(320, 400, 480)] {
            m.merge_filter_hit(&h);
        }
        let first = m.finalise();

        // Re-feed each trapezoid as a singleton hit on its centre
        // diagonal; the second merge must reproduce the first.
        let mut m = Merger::new(&p, 5, false);
        let mut again: Vec<_> = first
            .iter()
            .map(|t| {
                hit(
                    -((t.left + t.right) / 2) as i64,
                    t.bottom as usize,
                    (t.top - p.word_size as isize) as usize,
                )
            })
            .collect();
        again.sort_by_key(|h| h.sort_key());
        for h in &again {
            m.merge_filter_hit(h);
        }
        assert_eq!(m.finalise(), first);
    }

    #[test]
    fn self_comparison_suppresses_mirror_side() {
        let mut m = Merger::new(&params(), 5, true);
        // Tube centre just above the main diagonal: its padding pokes
        // across, the trapezoid is clipped at diagonal zero.
        m.merge_filter_hit(&hit(17, 0, 60));
        let traps = m.finalise();
        assert_eq!(traps.len(), 1);
        assert_eq!(traps[0].right, 0);
        assert_eq!(traps[0].left, -17 - 19);
    }
}
