//! Pairwise alignment of large sequences.
//!
//! A three-stage pipeline: a q-gram filter over a packed k-mer index
//! seeds diagonal tubes, overlapping runs merge into trapezoidal
//! search regions, and a banded dynamic-programming kernel extends
//! maximal local alignments inside each region.

pub mod dp;
pub mod error;
pub mod filter;
pub mod index;
pub mod pack;
pub mod pair;
pub mod pals;
pub mod report;
pub mod sequence;
pub mod sorter;

pub use dp::{CostConfig, DpHit, DpParams};
pub use error::PalsError;
pub use filter::{FilterParams, Trapezoid};
pub use pals::{Log, Pals, DEFAULT_LENGTH, DEFAULT_MIN_IDENTITY};
pub use sequence::Sequence;
