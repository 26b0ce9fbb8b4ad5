//! Feature pairs: alignment hits projected back onto their contigs.

use crate::dp::DpHit;
use crate::error::PalsError;
use crate::pack::{Feature, Packed};

/// A pair of features related by an alignment. `strand` is positive
/// when the features lie on the same strand, negative when the query
/// feature was found on the reverse complement.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePair {
    pub a: Feature,
    pub b: Feature,
    pub score: isize,
    /// Identity difference between the feature sequences.
    pub error: f64,
    pub strand: i8,
}

/// Project a hit against packed target and query into a feature
/// pair. `comp` marks a hit from a reverse-complement pass; its query
/// coordinates are inverted back onto the forward strand.
pub fn new_feature_pair(
    target: &Packed,
    query: &Packed,
    hit: &DpHit,
    comp: bool,
) -> Result<FeaturePair, PalsError> {
    let a = target.feature_of(hit.abpos as isize, hit.aepos as isize, false)?;
    let b = query.feature_of(hit.bbpos as isize, hit.bepos as isize, comp)?;
    Ok(FeaturePair {
        a,
        b,
        score: hit.score,
        error: hit.error,
        strand: if comp { -1 } else { 1 },
    })
}

impl FeaturePair {
    /// A reversed copy of the pair such that a', b' = b, a.
    pub fn invert(&self) -> FeaturePair {
        FeaturePair {
            a: self.b.clone(),
            b: self.a.clone(),
            score: self.score,
            error: self.error,
            strand: self.strand,
        }
    }
}
