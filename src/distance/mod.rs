//! Distance metrics
//!
//! A codebook records the similarity metric it was trained for. Sub-quantizer
//! centroids are always learned with L2 k-means; the metric decides how a
//! trained codebook scores queries against codes.

use std::fmt;
use std::str::FromStr;

/// Scalar implementations
pub mod scalar;

/// Distance metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Inner product similarity (scored as negative dot product)
    #[default]
    InnerProduct,
    /// L2 (Euclidean) distance, squared
    L2,
}

impl Distance {
    /// Distance between two vectors, lower is closer
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::L2 => scalar::l2_squared(a, b),
            Distance::InnerProduct => -scalar::dot_product(a, b),
        }
    }

    /// Human-readable name, also accepted by `FromStr`
    pub fn name(self) -> &'static str {
        match self {
            Distance::InnerProduct => "inner_product",
            Distance::L2 => "l2",
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Distance {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "inner_product" | "ip" | "dot" => Ok(Distance::InnerProduct),
            "l2" | "euclidean" => Ok(Distance::L2),
            other => Err(crate::Error::InvalidConfig(format!(
                "Invalid distance metric: {}",
                other
            ))),
        }
    }
}
