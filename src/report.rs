//! GFF-style output for feature pairs.
//!
//! One record per pair: the query feature carries the location
//! columns and the target feature lands in the attributes as
//! `Target <id> <start> <end>; maxe <identity-gap>`, both 1-based
//! inclusive. The layout is kept stable for downstream PILER-style
//! consumers.

use std::io::{self, BufWriter, Write};

use crate::pair::FeaturePair;

pub struct GffWriter<W: Write> {
    w: BufWriter<W>,
}

impl<W: Write> GffWriter<W> {
    pub fn new(inner: W) -> GffWriter<W> {
        GffWriter {
            w: BufWriter::new(inner),
        }
    }

    /// Write a single feature pair.
    pub fn write(&mut self, pair: &FeaturePair) -> io::Result<()> {
        let strand = if pair.strand < 0 { '-' } else { '+' };
        writeln!(
            self.w,
            "{}\tpals\thit\t{}\t{}\t{}\t{}\t.\tTarget {} {} {}; maxe {}",
            pair.b.id,
            pair.b.start + 1,
            pair.b.end,
            pair.score,
            strand,
            pair.a.id,
            pair.a.start + 1,
            pair.a.end,
            sig2(pair.error),
        )
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.w.flush()
    }
}

/// Two significant digits, fixed notation in the identity-gap range.
fn sig2(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return "0".to_string();
    }
    let exponent = v.abs().log10().floor() as i32;
    if !(-5..2).contains(&exponent) {
        return format!("{v:.1e}");
    }
    let decimals = (1 - exponent).max(0) as usize;
    let s = format!("{v:.decimals$}");
    // Drop a trailing zero fraction: 0.50 stays, 1.0 becomes 1.
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::Feature;

    fn pair() -> FeaturePair {
        FeaturePair {
            a: Feature {
                id: "chrT".to_string(),
                start: 99,
                end: 199,
            },
            b: Feature {
                id: "chrQ".to_string(),
                start: 0,
                end: 100,
            },
            score: 85,
            error: 0.062,
            strand: -1,
        }
    }

    #[test]
    fn record_layout_is_stable() {
        let mut out = Vec::new();
        {
            let mut w = GffWriter::new(&mut out);
            w.write(&pair()).unwrap();
            w.finish().unwrap();
        }
        let line = String::from_utf8(out).unwrap();
        assert_eq!(
            line,
            "chrQ\tpals\thit\t1\t100\t85\t-\t.\tTarget chrT 100 199; maxe 0.062\n"
        );
    }

    #[test]
    fn two_significant_digits() {
        assert_eq!(sig2(0.0), "0");
        assert_eq!(sig2(0.25), "0.25");
        assert_eq!(sig2(0.062), "0.062");
        assert_eq!(sig2(1.0), "1");
        assert_eq!(sig2(0.1), "0.1");
    }
}
