//! Error kinds shared across the alignment pipeline.
//!
//! The selector and index build fail fast; filter and merge errors
//! abort the current pass and leave the spill sorter in a cleanable
//! state. Errors are cloneable so the orchestrator can record the
//! first failure and report it again on later calls.

use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PalsError {
    #[error("bad parameter {name}: {value}")]
    BadParameter { name: &'static str, value: String },

    #[error("failed to find filter parameters")]
    ParameterSearchFailed,

    #[error("k-mer index of {required} bytes exceeds memory limit of {limit} bytes")]
    IndexTooLarge { required: u64, limit: u64 },

    #[error("filter hit sort failed: {0}")]
    Sort(Arc<io::Error>),

    #[error("alignment endpoints {from}..{to} outside sequence of length {len}")]
    CoordinateOverflow { from: isize, to: isize, len: usize },

    #[error("alignment cancelled")]
    Cancelled,
}

impl PalsError {
    pub fn bad_parameter(name: &'static str, value: impl ToString) -> Self {
        PalsError::BadParameter {
            name,
            value: value.to_string(),
        }
    }
}

impl From<io::Error> for PalsError {
    fn from(e: io::Error) -> Self {
        PalsError::Sort(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_errors_are_cloneable() {
        let e: PalsError = io::Error::new(io::ErrorKind::Other, "disk full").into();
        let c = e.clone();
        assert_eq!(e.to_string(), c.to_string());
        assert!(c.to_string().contains("disk full"));
    }

    #[test]
    fn bad_parameter_formats_value() {
        let e = PalsError::bad_parameter("min_id", 1.5);
        assert_eq!(e.to_string(), "bad parameter min_id: 1.5");
    }
}
