//! Packing multi-contig inputs into a single alignment sequence.
//!
//! The pipeline aligns one target byte array against one query byte
//! array. Multi-contig FASTA input is packed: contigs concatenated
//! with N padding up to a bin boundary, so a packed coordinate can
//! be projected back onto its contig with one bin-map lookup. The
//! padding is ambiguous, so no k-mer or match bonus ever crosses a
//! contig boundary.

use rustc_hash::FxHashMap;

use crate::error::PalsError;
use crate::sequence::Sequence;

/// Bin granularity of the packed coordinate map.
pub const BIN_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct Contig {
    pub id: String,
    /// Offset of the contig in the packed sequence.
    pub from: usize,
    pub len: usize,
}

/// A contig feature projected out of packed coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub id: String,
    pub start: usize,
    pub end: usize,
}

/// Accumulates contigs into a packed sequence.
pub struct Packer {
    id: String,
    seq: Vec<u8>,
    contigs: Vec<Contig>,
    bin_map: Vec<usize>,
    by_id: FxHashMap<String, usize>,
}

impl Packer {
    pub fn new(id: impl Into<String>) -> Packer {
        Packer {
            id: id.into(),
            seq: Vec::new(),
            contigs: Vec::new(),
            bin_map: Vec::new(),
            by_id: FxHashMap::default(),
        }
    }

    /// Append one contig, padding the packed sequence to the next
    /// bin boundary first so the contig starts bin-aligned.
    pub fn add(&mut self, id: &str, seq: &[u8]) -> Result<(), PalsError> {
        if self.by_id.contains_key(id) {
            return Err(PalsError::bad_parameter("contig", id));
        }

        let from = (self.seq.len() + BIN_SIZE - 1) / BIN_SIZE * BIN_SIZE;
        self.seq.resize(from, b'N');
        self.seq.extend_from_slice(seq);

        let index = self.contigs.len();
        self.by_id.insert(id.to_string(), index);
        self.contigs.push(Contig {
            id: id.to_string(),
            from,
            len: seq.len(),
        });
        let bins = (self.seq.len() + BIN_SIZE - 1) / BIN_SIZE;
        self.bin_map.resize(bins, index);
        Ok(())
    }

    pub fn finish(self) -> Packed {
        Packed {
            seq: Sequence::new(self.id, self.seq),
            contigs: self.contigs,
            bin_map: self.bin_map,
        }
    }
}

/// A packed sequence plus the map back to its contigs.
pub struct Packed {
    pub seq: Sequence,
    contigs: Vec<Contig>,
    bin_map: Vec<usize>,
}

impl Packed {
    /// Wrap a single sequence as its own packed representation.
    pub fn from_sequence(seq: Sequence) -> Packed {
        let mut packer = Packer::new(seq.id.clone());
        packer
            .add(&seq.id, &seq.seq)
            .expect("single contig cannot collide");
        packer.finish()
    }

    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    /// Project packed coordinates onto the contig under them. For a
    /// reverse-complement hit the coordinates are inverted through
    /// the packed length first.
    ///
    /// End points are clamped to the sequence and contig bounds; the
    /// kernel reports any clamping it had to do, and debug builds
    /// assert here so an out-of-range projection cannot pass
    /// unnoticed.
    pub fn feature_of(&self, from: isize, to: isize, comp: bool) -> Result<Feature, PalsError> {
        let len = self.seq.len() as isize;
        let (mut from, mut to) = if comp {
            (len - to, len - from)
        } else {
            (from, to)
        };
        if from >= to {
            return Err(PalsError::CoordinateOverflow {
                from,
                to,
                len: self.seq.len(),
            });
        }

        debug_assert!(
            from >= 0 && to <= len,
            "projection {from}..{to} outside packed sequence of length {len}"
        );
        if from < 0 {
            from = 0;
        }
        if to > len {
            to = len;
        }

        // The midpoint picks the contig: end points may sit in the
        // padding on either side of it.
        let bin = ((from + to) / (2 * BIN_SIZE as isize)) as usize;
        let index = match self.bin_map.get(bin) {
            Some(&i) => i,
            None => {
                return Err(PalsError::CoordinateOverflow {
                    from,
                    to,
                    len: self.seq.len(),
                })
            }
        };
        let contig = &self.contigs[index];

        let length = (to - from) as usize;
        let contig_from = from - contig.from as isize;
        let contig_to = contig_from + length as isize;
        let start = contig_from.max(0) as usize;
        let end = (contig_to.min(contig.len as isize)).max(0) as usize;

        Ok(Feature {
            id: contig.id.clone(),
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_contigs() -> Packed {
        let mut p = Packer::new("pack");
        p.add("chr1", &[b'A'; 1500]).unwrap();
        p.add("chr2", &[b'C'; 700]).unwrap();
        p.finish()
    }

    #[test]
    fn contigs_start_on_bin_boundaries() {
        let packed = two_contigs();
        assert_eq!(packed.contigs()[0].from, 0);
        assert_eq!(packed.contigs()[1].from, 2048);
        assert_eq!(packed.seq.len(), 2048 + 700);
        // Padding is ambiguous.
        assert_eq!(packed.seq.seq[1500], b'N');
        assert_eq!(packed.seq.seq[2047], b'N');
    }

    #[test]
    fn duplicate_contig_ids_are_rejected() {
        let mut p = Packer::new("pack");
        p.add("chr1", b"ACGT").unwrap();
        assert!(p.add("chr1", b"ACGT").is_err());
    }

    #[test]
    fn features_project_onto_the_right_contig() {
        let packed = two_contigs();

        let f = packed.feature_of(100, 300, false).unwrap();
        assert_eq!(f, Feature { id: "chr1".to_string(), start: 100, end: 300 });

        let f = packed.feature_of(2100, 2300, false).unwrap();
        assert_eq!(f, Feature { id: "chr2".to_string(), start: 52, end: 252 });
    }

    #[test]
    fn complement_features_invert_through_the_packed_length() {
        let packed = two_contigs();
        let len = packed.seq.len() as isize;
        let f = packed.feature_of(len - 300, len - 100, true).unwrap();
        assert_eq!(f.id, "chr1");
        assert_eq!((f.start, f.end), (100, 300));
    }

    #[test]
    fn inverted_range_is_an_error() {
        let packed = two_contigs();
        assert!(matches!(
            packed.feature_of(300, 100, false),
            Err(PalsError::CoordinateOverflow { .. })
        ));
    }

    #[test]
    fn end_points_clamp_to_the_contig() {
        let packed = two_contigs();
        // Reaches into chr1's tail padding; midpoint stays in chr1.
        let f = packed.feature_of(1400, 1600, false).unwrap();
        assert_eq!(f.id, "chr1");
        assert_eq!((f.start, f.end), (1400, 1500));
    }
}
