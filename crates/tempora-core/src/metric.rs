//! Distance metrics supported by the forest
//!
//! The metric is fixed per deployment: it is chosen at build time, persisted in
//! every index file and checked again when the index is loaded.
//!
//! Each metric has two distance forms:
//!
//! - the *raw* distance used for ranking (cheap, monotone in the real one)
//! - the *reported* distance handed back to callers
//!
//! | Metric    | Raw                 | Reported          |
//! |-----------|---------------------|-------------------|
//! | angular   | 2 - 2·cos(a, b)     | sqrt(raw)         |
//! | euclidean | ‖a - b‖²            | sqrt(raw)         |
//! | manhattan | Σ abs(a - b)        | raw               |
//!
//! Reported angular distance lies in [0, 2]. Distances are not comparable across
//! metrics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simd::{dot_product, l2_distance_squared, l2_norm, manhattan_distance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Angular,
    Euclidean,
    Manhattan,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Angular, Metric::Euclidean, Metric::Manhattan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Angular => "angular",
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
        }
    }

    /// Ranking distance between two vectors (smaller = closer).
    #[inline]
    pub fn raw_distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Angular => {
                let denom = l2_norm(a) * l2_norm(b);
                if denom > 0.0 {
                    2.0 - 2.0 * dot_product(a, b) / denom
                } else {
                    2.0
                }
            }
            Metric::Euclidean => l2_distance_squared(a, b),
            Metric::Manhattan => manhattan_distance(a, b),
        }
    }

    /// Convert a raw distance to the value reported to callers.
    #[inline]
    pub fn reported_distance(&self, raw: f32) -> f32 {
        match self {
            Metric::Angular | Metric::Euclidean => raw.max(0.0).sqrt(),
            Metric::Manhattan => raw.max(0.0),
        }
    }

    /// Whether split planes pass through the origin. Angular splits only care
    /// about direction, so their hyperplanes carry no offset.
    #[inline]
    pub(crate) fn centered_splits(&self) -> bool {
        matches!(self, Metric::Angular)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown metric '{0}' (expected angular, euclidean or manhattan)")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "angular" | "cosine" => Ok(Metric::Angular),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "manhattan" | "l1" => Ok(Metric::Manhattan),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angular_identical_and_opposite() {
        let a = [1.0, 2.0, 3.0];
        let neg = [-1.0, -2.0, -3.0];
        let m = Metric::Angular;

        assert!(m.reported_distance(m.raw_distance(&a, &a)) < 1e-3);
        assert!((m.reported_distance(m.raw_distance(&a, &neg)) - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_angular_ignores_magnitude() {
        let m = Metric::Angular;
        let d = m.raw_distance(&[1.0, 0.0], &[10.0, 0.0]);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn test_angular_zero_vector_is_maximally_far() {
        assert_eq!(Metric::Angular.raw_distance(&[0.0, 0.0], &[1.0, 0.0]), 2.0);
    }

    #[test]
    fn test_euclidean_reported_is_sqrt() {
        let m = Metric::Euclidean;
        let raw = m.raw_distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((raw - 25.0).abs() < 1e-5);
        assert!((m.reported_distance(raw) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_manhattan_reported_is_raw() {
        let m = Metric::Manhattan;
        let raw = m.raw_distance(&[0.0, 0.0], &[3.0, -4.0]);
        assert!((m.reported_distance(raw) - 7.0).abs() < 1e-5);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("angular".parse::<Metric>().unwrap(), Metric::Angular);
        assert_eq!("Euclidean".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert_eq!("l1".parse::<Metric>().unwrap(), Metric::Manhattan);
        let err = "hamming".parse::<Metric>().unwrap_err();
        assert_eq!(err, UnknownMetric("hamming".into()));
        assert!(err.to_string().starts_with("unknown metric 'hamming'"));
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for m in Metric::ALL {
            assert_eq!(m.to_string().parse::<Metric>().unwrap(), m);
        }
    }
}
