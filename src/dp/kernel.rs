//! Banded extension kernels and the recursive trapezoid search.
//!
//! From the midpoint of a trapezoid the forward kernel sweeps query
//! rows upward, the reverse kernel sweeps back down from the forward
//! endpoint, and the pair of extremes is combined into one candidate
//! hit. The band at each row is an offset window of target columns
//! around the live diagonals; columns falling more than a cutoff
//! below the running maximum are pruned from both edges.
//!
//! Diagonal convention: trapezoids and the band bookkeeping in here
//! are query - target. A hit's low/high diagonals have their sign
//! swapped exactly once on emission, so published diagonals are
//! target - query and line up with the reported coordinates.

use crossbeam_channel::Sender;

use crate::error::PalsError;
use crate::filter::Trapezoid;
use crate::sequence::base_code;

use super::{CostConfig, DpHit};

/// Slack appended on row-buffer growth to amortise reallocation.
const VEC_BUFFERING: isize = 100_000;

/// Offset view over a row buffer: `at(i)` is `buf[i - offset]`.
/// Lets the kernels index by absolute target position while the
/// buffer only spans the live band.
struct OffsetVec {
    offset: isize,
    buf: Vec<isize>,
}

impl OffsetVec {
    fn new() -> OffsetVec {
        OffsetVec {
            offset: 0,
            buf: Vec::new(),
        }
    }

    #[inline(always)]
    fn at(&self, i: isize) -> isize {
        self.buf[(i - self.offset) as usize]
    }

    #[inline(always)]
    fn set(&mut self, i: isize, v: isize) {
        self.buf[(i - self.offset) as usize] = v;
    }

    #[inline(always)]
    fn len(&self) -> isize {
        self.buf.len() as isize
    }
}

/// One end of an alignment under construction.
#[derive(Debug, Clone, Copy, Default)]
struct RawEnd {
    abpos: isize,
    aepos: isize,
    bbpos: isize,
    bepos: isize,
    low_diag: isize,
    high_diag: isize,
    score: isize,
}

pub(super) struct Kernel<'a> {
    target: &'a [u8],
    query: &'a [u8],

    min_len: isize,
    max_diff: f64,
    cfg: CostConfig,
    self_comp: bool,

    low_end: RawEnd,
    high_end: RawEnd,
    this_vec: OffsetVec,
    that_vec: OffsetVec,

    traps: &'a [Trapezoid],
    covered: Vec<bool>,
    slot: usize,
    pub(super) clamped: usize,

    sink: Sender<DpHit>,
}

impl<'a> Kernel<'a> {
    pub(super) fn new(
        target: &'a [u8],
        query: &'a [u8],
        min_len: usize,
        min_id: f64,
        cfg: CostConfig,
        self_comp: bool,
        traps: &'a [Trapezoid],
        sink: Sender<DpHit>,
    ) -> Kernel<'a> {
        Kernel {
            target,
            query,
            min_len: min_len as isize,
            max_diff: 1.0 - min_id,
            cfg,
            self_comp,
            low_end: RawEnd::default(),
            high_end: RawEnd::default(),
            this_vec: OffsetVec::new(),
            that_vec: OffsetVec::new(),
            traps,
            covered: vec![false; traps.len()],
            slot: 0,
            clamped: 0,
            sink,
        }
    }

    pub(super) fn is_covered(&self, slot: usize) -> bool {
        self.covered[slot]
    }

    pub(super) fn set_slot(&mut self, slot: usize) {
        self.slot = slot;
    }

    fn allocate_vectors(&mut self, required: isize) {
        let vec_max = (required + required / 4 + VEC_BUFFERING) as usize;
        self.this_vec.buf.resize(vec_max, 0);
        self.that_vec.buf.resize(vec_max, 0);
    }

    /// Search one trapezoid for maximal local alignments, splitting
    /// off the residual regions above and below every extension and
    /// recursing into them.
    pub(super) fn align_recursion(&mut self, working: &Trapezoid) -> Result<(), PalsError> {
        let max_igap = self.cfg.max_igap;
        let mid = (working.bottom + working.top) / 2;

        self.trace_forward(mid, mid - working.right, mid - working.left);

        // The reverse trace must reach back past the midpoint with at
        // least the forward score. While it falls short, retry with a
        // widened prune cutoff; each retry buys the band more room to
        // find the complementary high-scoring start.
        let mut x: isize = 1;
        while x == 1
            || (self.high_end.bbpos > mid + x * max_igap && self.high_end.score < self.low_end.score)
        {
            self.trace_reverse(
                self.low_end.bepos,
                self.low_end.aepos,
                self.low_end.aepos,
                mid + max_igap,
                self.cfg.block_cost + 2 * x * self.cfg.diff_cost,
            );
            x += 1;
        }

        self.high_end.aepos = self.low_end.aepos;
        self.high_end.bepos = self.low_end.bepos;

        let mut low_trap = *working;
        let mut high_trap = *working;
        low_trap.top = self.high_end.bbpos - max_igap;
        high_trap.bottom = self.high_end.bepos + max_igap;

        if self.high_end.bepos - self.high_end.bbpos >= self.min_len
            && self.high_end.aepos - self.high_end.abpos >= self.min_len
        {
            let indel = ((self.high_end.abpos - self.high_end.bbpos)
                - (self.high_end.aepos - self.high_end.bepos))
                .abs();
            let identity_gap = (1.0 / self.cfg.r_match_cost)
                - (self.high_end.score - indel) as f64
                    / (self.cfg.r_match_cost * (self.high_end.bepos - self.high_end.bbpos) as f64);

            if identity_gap <= self.max_diff {
                self.mark_covered();
                self.emit(identity_gap)?;
            }
        }

        if low_trap.top - low_trap.bottom > self.min_len
            && low_trap.top < working.top - max_igap
        {
            self.align_recursion(&low_trap)?;
        }
        if high_trap.top - high_trap.bottom > self.min_len {
            self.align_recursion(&high_trap)?;
        }
        Ok(())
    }

    /// Flag later trapezoids almost entirely inside the accepted
    /// alignment's band and span; the driver skips them.
    fn mark_covered(&mut self) {
        let traps = self.traps;
        for (off, trap) in traps[self.slot + 1..].iter().enumerate() {
            if trap.bottom >= self.high_end.bepos {
                break;
            }

            let b_projection = trap.top - trap.bottom + 1;
            let a_projection = trap.right - trap.left + 1;
            let overlap_lo = trap.left.max(self.high_end.low_diag);
            let overlap_hi = trap.right.min(self.high_end.high_diag);
            if overlap_lo > overlap_hi {
                continue;
            }

            let a_overlap = overlap_hi - overlap_lo + 1;
            let b_overlap = if trap.top > self.high_end.bepos {
                self.high_end.bepos - trap.bottom + 1
            } else {
                b_projection
            };

            if (a_overlap as f64 / a_projection as f64) * (b_overlap as f64 / b_projection as f64)
                > 0.99
            {
                self.covered[self.slot + 1 + off] = true;
            }
        }
    }

    fn emit(&mut self, identity_gap: f64) -> Result<(), PalsError> {
        if self.self_comp
            && self.high_end.abpos == self.high_end.bbpos
            && self.high_end.aepos == self.high_end.bepos
        {
            return Ok(());
        }

        let alen = self.target.len() as isize;
        let blen = self.query.len() as isize;
        let clamp = |v: isize, len: isize, n: &mut usize| -> usize {
            if v < 0 || v > len {
                *n += 1;
                debug_assert!(false, "alignment end point {v} outside 0..={len}");
            }
            v.clamp(0, len) as usize
        };

        let mut n = 0;
        let hit = DpHit {
            abpos: clamp(self.high_end.abpos, alen, &mut n),
            aepos: clamp(self.high_end.aepos, alen, &mut n),
            bbpos: clamp(self.high_end.bbpos, blen, &mut n),
            bepos: clamp(self.high_end.bepos, blen, &mut n),
            // Band bookkeeping above is query - target; published
            // diagonals are target - query.
            low_diagonal: -self.high_end.high_diag,
            high_diagonal: -self.high_end.low_diag,
            score: self.high_end.score,
            error: identity_gap,
        };
        self.clamped += n;

        self.sink.send(hit).map_err(|_| PalsError::Cancelled)
    }

    /// Extend from query row `mid` towards the end of the query,
    /// starting the band on target columns `low..=high`. Leaves the
    /// best end point in `low_end`.
    fn trace_forward(&mut self, mid: isize, mut low: isize, mut high: isize) {
        let tlen = self.target.len() as isize;
        let qlen = self.query.len() as isize;
        let diff_cost = self.cfg.diff_cost;
        let match_cost = self.cfg.match_cost;
        let block_cost = self.cfg.block_cost;

        if low < 0 {
            low = 0;
        }
        if high > tlen {
            high = tlen;
        }

        let required = (high - low) + self.cfg.max_igap;
        if required >= self.this_vec.len() {
            self.allocate_vectors(required);
        }
        self.this_vec.offset = low;

        let mut j = low;
        while j <= high {
            self.this_vec.set(j, 0);
            j += 1;
        }

        high += self.cfg.max_igap;
        if high > tlen {
            high = tlen;
        }
        while j <= high {
            let v = self.this_vec.at(j - 1) - diff_cost;
            self.this_vec.set(j, v);
            j += 1;
        }

        let mut max_score: isize = 0;
        let mut max_right = mid - low;
        let mut max_left = mid - high;
        let mut max_i = mid;
        let mut max_j = low;

        let mut i = mid;
        while low <= high && i < qlen {
            std::mem::swap(&mut self.this_vec, &mut self.that_vec);
            self.this_vec.offset = low;

            let qi = self.query[i as usize];
            let qi_valid = base_code(qi) >= 0;

            let mut score = self.that_vec.at(low);
            self.this_vec.set(low, score - diff_cost);
            let mut cost = self.this_vec.at(low);

            let mut j = low + 1;
            while j <= high {
                let temp = cost;
                cost = score;
                score = self.that_vec.at(j);
                if qi_valid && qi == self.target[(j - 1) as usize] {
                    cost += match_cost;
                }

                let mut ratchet = cost;
                if score > ratchet {
                    ratchet = score;
                }
                if temp > ratchet {
                    ratchet = temp;
                }

                cost = ratchet - diff_cost;
                self.this_vec.set(j, cost);
                if cost >= max_score {
                    max_score = cost;
                    max_i = i + 1;
                    max_j = j;
                }
                j += 1;
            }

            if j <= tlen {
                if qi_valid && qi == self.target[(j - 1) as usize] {
                    score += match_cost;
                }

                let mut ratchet = score;
                if cost > ratchet {
                    ratchet = cost;
                }

                score = ratchet - diff_cost;
                self.this_vec.set(j, score);
                if score > max_score {
                    max_score = score;
                    max_i = i + 1;
                    max_j = j;
                }

                j += 1;
                while j <= tlen {
                    score -= diff_cost;
                    if score < max_score - block_cost {
                        break;
                    }
                    self.this_vec.set(j, score);
                    j += 1;
                }
            }

            high = j - 1;

            while low <= high && self.this_vec.at(low) < max_score - block_cost {
                low += 1;
            }
            while low <= high && self.this_vec.at(high) < max_score - block_cost {
                high -= 1;
            }

            let required = (high - low) + 2;
            if required > self.this_vec.len() {
                self.allocate_vectors(required);
            }

            if (i + 1) - low > max_right {
                max_right = (i + 1) - low;
            }
            if (i + 1) - high < max_left {
                max_left = (i + 1) - high;
            }
            i += 1;
        }

        self.low_end.aepos = max_j;
        self.low_end.bepos = max_i;
        self.low_end.low_diag = max_left;
        self.low_end.high_diag = max_right;
        self.low_end.score = max_score;
    }

    /// Extend from query row `top` back towards the start of the
    /// query. `xfactor` is the widened prune cutoff used while the
    /// trace is still above `bottom`; once it passes `bottom` the
    /// regular block cutoff applies. Leaves the best start point in
    /// `high_end`.
    fn trace_reverse(&mut self, top: isize, mut low: isize, mut high: isize, bottom: isize, mut xfactor: isize) {
        let tlen = self.target.len() as isize;
        let diff_cost = self.cfg.diff_cost;
        let match_cost = self.cfg.match_cost;
        let block_cost = self.cfg.block_cost;

        if low < 0 {
            low = 0;
        }
        if high > tlen {
            high = tlen;
        }

        let required = (high - low) + self.cfg.max_igap;
        if required >= self.this_vec.len() {
            self.allocate_vectors(required);
        }
        self.this_vec.offset = high - (self.this_vec.len() - 1);

        let mut j = high;
        while j >= low {
            self.this_vec.set(j, 0);
            j -= 1;
        }

        low -= self.cfg.max_igap;
        if low < 0 {
            low = 0;
        }
        while j >= low {
            let v = self.this_vec.at(j + 1) - diff_cost;
            self.this_vec.set(j, v);
            j -= 1;
        }

        let mut max_score: isize = 0;
        let mut max_right = top - low;
        let mut max_left = top - high;
        let mut max_i = top;
        let mut max_j = low;

        if top - 1 <= bottom {
            xfactor = block_cost;
        }

        let mut i = top - 1;
        while low <= high && i >= 0 {
            std::mem::swap(&mut self.this_vec, &mut self.that_vec);
            self.this_vec.offset = high - (self.this_vec.len() - 1);

            let qi = self.query[i as usize];
            let qi_valid = base_code(qi) >= 0;

            let mut score = self.that_vec.at(high);
            self.this_vec.set(high, score - diff_cost);
            let mut cost = self.this_vec.at(high);

            let mut j = high - 1;
            while j >= low {
                let temp = cost;
                cost = score;
                score = self.that_vec.at(j);
                if qi_valid && qi == self.target[j as usize] {
                    cost += match_cost;
                }

                let mut ratchet = cost;
                if score > ratchet {
                    ratchet = score;
                }
                if temp > ratchet {
                    ratchet = temp;
                }

                cost = ratchet - diff_cost;
                self.this_vec.set(j, cost);
                if cost >= max_score {
                    max_score = cost;
                    max_i = i;
                    max_j = j;
                }
                j -= 1;
            }

            if j >= 0 {
                if qi_valid && qi == self.target[j as usize] {
                    score += match_cost;
                }

                let mut ratchet = score;
                if cost > ratchet {
                    ratchet = cost;
                }

                score = ratchet - diff_cost;
                self.this_vec.set(j, score);
                if score > max_score {
                    max_score = score;
                    max_i = i;
                    max_j = j;
                }

                j -= 1;
                while j >= 0 {
                    score -= diff_cost;
                    if score < max_score - xfactor {
                        break;
                    }
                    self.this_vec.set(j, score);
                    j -= 1;
                }
            }

            low = j + 1;

            while low <= high && self.this_vec.at(low) < max_score - xfactor {
                low += 1;
            }
            while low <= high && self.this_vec.at(high) < max_score - xfactor {
                high -= 1;
            }

            if i == bottom {
                xfactor = block_cost;
            }

            let required = (high - low) + 2;
            if required > self.this_vec.len() {
                self.allocate_vectors(required);
            }

            if i - low > max_right {
                max_right = i - low;
            }
            if i - high < max_left {
                max_left = i - high;
            }
            i -= 1;
        }

        self.high_end.abpos = max_j;
        self.high_end.bbpos = max_i;
        self.high_end.low_diag = max_left;
        self.high_end.high_diag = max_right;
        self.high_end.score = max_score;
    }
}
