//! Factory specifications
//!
//! A factory spec is a compact string describing a quantizer's structure,
//! in the style of the `index_factory` strings used by vector search
//! libraries. Supported forms:
//!
//! | spec        | sub-quantizers | bits |
//! |-------------|----------------|------|
//! | `PQ8`       | 8              | 8    |
//! | `PQ16x4`    | 16             | 4    |
//! | `PQ32fs`    | 32             | 4    |
//! | `PQ32x4fs`  | 32             | 4    |
//!
//! `fs` selects the fast-scan variant, which only exists with 4-bit codes.

use crate::pq::quantizer::PQLayout;
use crate::{Distance, Error, Result};

const DEFAULT_BITS: usize = 8;
const FAST_SCAN_BITS: usize = 4;

/// Parsed factory specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorySpec {
    /// Number of sub-quantizers
    pub num_subspaces: usize,
    /// Bits per code
    pub bits_per_code: usize,
    /// Fast-scan (4-bit, SIMD-friendly layout) variant
    pub fast_scan: bool,
}

impl FactorySpec {
    /// Parse a spec string
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidConfig(format!("Unsupported factory spec '{}': {}", spec, why));

        let trimmed = spec.trim();
        let body = trimmed
            .strip_prefix("PQ")
            .ok_or_else(|| invalid("expected a PQ<M>[x<nbits>][fs] structure"))?;

        let (body, fast_scan) = match body.strip_suffix("fs") {
            Some(rest) => (rest, true),
            None => (body, false),
        };

        let (m, bits) = match body.split_once('x') {
            Some((m, bits)) => (m, Some(bits)),
            None => (body, None),
        };

        let num_subspaces = parse_number(m).ok_or_else(|| invalid("missing sub-quantizer count"))?;
        if num_subspaces == 0 {
            return Err(invalid("sub-quantizer count must be positive"));
        }

        let bits_per_code = match bits {
            Some(b) => parse_number(b).ok_or_else(|| invalid("malformed bit width"))?,
            None if fast_scan => FAST_SCAN_BITS,
            None => DEFAULT_BITS,
        };

        if fast_scan && bits_per_code != FAST_SCAN_BITS {
            return Err(invalid("fast-scan requires 4-bit codes"));
        }

        Ok(Self {
            num_subspaces,
            bits_per_code,
            fast_scan,
        })
    }

    /// Resolve against a dimension and metric
    pub fn layout(&self, dimension: usize, metric: Distance) -> Result<PQLayout> {
        PQLayout::new(dimension, self.num_subspaces, self.bits_per_code, metric)
    }
}

fn parse_number(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            FactorySpec::parse("PQ8").unwrap(),
            FactorySpec { num_subspaces: 8, bits_per_code: 8, fast_scan: false }
        );
        assert_eq!(
            FactorySpec::parse("PQ16x4").unwrap(),
            FactorySpec { num_subspaces: 16, bits_per_code: 4, fast_scan: false }
        );
        assert_eq!(
            FactorySpec::parse("PQ32fs").unwrap(),
            FactorySpec { num_subspaces: 32, bits_per_code: 4, fast_scan: true }
        );
        assert_eq!(
            FactorySpec::parse(" PQ32x4fs ").unwrap(),
            FactorySpec { num_subspaces: 32, bits_per_code: 4, fast_scan: true }
        );
    }

    #[test]
    fn test_parse_rejects() {
        for bad in ["", "IVF256,PQ8", "PQ", "PQx4", "PQ0", "PQ8x", "PQ8x8fs", "PQ-1", "Flat"] {
            assert!(
                matches!(FactorySpec::parse(bad), Err(Error::InvalidConfig(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_layout_checks_dimension() {
        let spec = FactorySpec::parse("PQ8").unwrap();
        let layout = spec.layout(128, Distance::InnerProduct).unwrap();
        assert_eq!(layout.subspace_dimension(), 16);
        assert_eq!(layout.num_centroids(), 256);

        assert!(spec.layout(100, Distance::InnerProduct).is_err());
    }
}
