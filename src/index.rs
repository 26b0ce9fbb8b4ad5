//! Packed inverted k-mer index over the target sequence.
//!
//! For a word size k the index keeps a finger array of length 4^k + 1
//! and a position array grouped by k-mer value: positions of word w
//! are `pos[finger[w]..finger[w + 1]]`, in ascending order, and every
//! listed window is free of ambiguous bases. Built once, then shared
//! read-only by any number of filter passes.

use crate::error::PalsError;
use crate::sequence::{base_code, Sequence};

/// Smallest word length the index accepts.
pub const MIN_KMER_LEN: usize = 2;
/// Word lengths above this would overflow the u32 finger entries on
/// common target sizes.
pub const MAX_KMER_LEN: usize = 15;

/// Rolling 2-bit k-mer scan over a byte sequence.
///
/// Yields `(start, code)` for every window of k unambiguous bases;
/// an invalid base resets the window, matching the way the index is
/// built so lookups and scans agree on which windows exist.
pub struct KmerScan<'a> {
    seq: &'a [u8],
    k: usize,
    mask: usize,
    code: usize,
    valid: usize,
    next: usize,
}

impl<'a> KmerScan<'a> {
    pub fn new(seq: &'a [u8], k: usize) -> Self {
        KmerScan {
            seq,
            k,
            mask: (1usize << (2 * k)) - 1,
            code: 0,
            valid: 0,
            next: 0,
        }
    }
}

impl<'a> Iterator for KmerScan<'a> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        while self.next < self.seq.len() {
            let pos = self.next;
            self.next += 1;
            let c = base_code(self.seq[pos]);
            if c < 0 {
                self.valid = 0;
                self.code = 0;
                continue;
            }
            self.code = ((self.code << 2) | c as usize) & self.mask;
            self.valid += 1;
            if self.valid >= self.k {
                return Some((pos + 1 - self.k, self.code));
            }
        }
        None
    }
}

/// The finger/pos inverted index.
pub struct KmerIndex {
    k: usize,
    finger: Vec<u32>,
    pos: Vec<usize>,
    target_len: usize,
}

impl KmerIndex {
    /// Number of bytes the finger array for word size k will occupy.
    pub fn finger_bytes(k: usize) -> u64 {
        ((1u64 << (2 * k as u64)) + 1) * std::mem::size_of::<u32>() as u64
    }

    /// Build the index with two scans of the target: count words into
    /// the finger array, prefix-sum it, then place each window start
    /// through a shifted copy of the offsets.
    pub fn build(k: usize, target: &Sequence) -> Result<KmerIndex, PalsError> {
        if !(MIN_KMER_LEN..=MAX_KMER_LEN).contains(&k) {
            return Err(PalsError::bad_parameter("word_size", k));
        }

        let words = 1usize << (2 * k);
        let mut finger = vec![0u32; words + 1];

        for (_, code) in KmerScan::new(&target.seq, k) {
            finger[code + 1] += 1;
        }
        for w in 0..words {
            finger[w + 1] += finger[w];
        }

        let total = finger[words] as usize;
        let mut next: Vec<u32> = finger.clone();
        let mut pos = vec![0usize; total];
        for (start, code) in KmerScan::new(&target.seq, k) {
            pos[next[code] as usize] = start;
            next[code] += 1;
        }

        Ok(KmerIndex {
            k,
            finger,
            pos,
            target_len: target.len(),
        })
    }

    /// Ordered, read-only view of the target positions holding word w.
    #[inline]
    pub fn positions(&self, w: usize) -> &[usize] {
        &self.pos[self.finger[w] as usize..self.finger[w + 1] as usize]
    }

    #[inline]
    pub fn word_size(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Number of indexed windows.
    pub fn entries(&self) -> usize {
        self.pos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(code: usize, k: usize) -> Vec<u8> {
        let mut out = vec![0u8; k];
        let mut c = code;
        for i in (0..k).rev() {
            out[i] = b"ACGT"[c & 3];
            c >>= 2;
        }
        out
    }

    #[test]
    fn scan_resets_on_ambiguity() {
        let hits: Vec<_> = KmerScan::new(b"ACNGTA", 2).collect();
        // AC before the N, then GT and TA after it.
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 3);
        assert_eq!(hits[2].0, 4);
    }

    #[test]
    fn scan_short_sequence_is_empty() {
        assert_eq!(KmerScan::new(b"ACG", 4).count(), 0);
    }

    #[test]
    fn rejects_out_of_range_word_size() {
        let t = Sequence::new("t", b"ACGTACGT".to_vec());
        assert!(KmerIndex::build(1, &t).is_err());
        assert!(KmerIndex::build(16, &t).is_err());
    }

    #[test]
    fn positions_list_every_window_of_its_word() {
        let t = Sequence::new("t", b"ACGTACGTNACGT".to_vec());
        let k = 4;
        let index = KmerIndex::build(k, &t).unwrap();

        let mut seen = 0;
        for w in 0..(1usize << (2 * k)) {
            let ps = index.positions(w);
            assert!(ps.windows(2).all(|p| p[0] < p[1]), "positions unsorted");
            for &p in ps {
                let window = &t.seq[p..p + k];
                assert!(window.iter().all(|&b| base_code(b) >= 0));
                assert_eq!(window, &decode(w, k)[..]);
                seen += 1;
            }
        }
        // ACGT windows: 5 before the N (0..=4), 1 after (9).
        assert_eq!(seen, 6);
        assert_eq!(index.entries(), 6);
    }

    #[test]
    fn finger_bytes_matches_table_size() {
        assert_eq!(KmerIndex::finger_bytes(2), (16 + 1) * 4);
    }
}
