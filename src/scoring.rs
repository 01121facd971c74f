//! Scoring rules for the consensus loop.
//!
//! Every rule maps the residual vector of one candidate to a [`Score`] whose
//! `value` is "greater is better":
//! - [`InlierCountScoring`] (RANSAC, PROSAC) counts residuals under a fixed
//!   threshold,
//! - [`TruncatedQuadraticScoring`] (MSAC) sums truncated squared residuals,
//! - [`MedianScoring`] (LMedS, PROMedS) minimizes the median residual and
//!   derives the inlier threshold from it.

use std::cmp::Ordering;

use crate::core::Scoring;
use crate::utils::median_in_place;

/// Consistency factor turning a median absolute residual into a standard
/// deviation for Gaussian noise.
pub const MEDIAN_SIGMA_FACTOR: f64 = 1.4826;

/// Quality of one candidate.
///
/// Ordering only looks at `value`; two scores with the same value compare
/// equal even if their inlier counts differ.
#[derive(Debug, Clone, Copy)]
pub struct Score {
    pub inlier_count: usize,
    /// Greater is better.
    pub value: f64,
    /// Inlier threshold the count was taken against.
    pub threshold: f64,
}

impl Score {
    pub fn new(inlier_count: usize, value: f64, threshold: f64) -> Self {
        Self {
            inlier_count,
            value,
            threshold,
        }
    }

    /// Lowest possible score.
    pub fn worst() -> Self {
        Self::new(0, f64::NEG_INFINITY, 0.0)
    }

    /// Whether the score can be compared at all.
    pub fn is_valid(&self) -> bool {
        !self.value.is_nan() && self.value > f64::NEG_INFINITY && !self.threshold.is_nan()
    }

    /// Median residual for median-based scores (stored negated in `value`).
    pub fn median_residual(&self) -> f64 {
        -self.value
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::worst()
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

/// RANSAC / PROSAC: number of residuals at or below `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct InlierCountScoring {
    pub threshold: f64,
}

impl InlierCountScoring {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Scoring for InlierCountScoring {
    fn score(&self, residuals: &[f64], _sample_size: usize) -> Score {
        let inlier_count = residuals.iter().filter(|&&r| r <= self.threshold).count();
        Score::new(inlier_count, inlier_count as f64, self.threshold)
    }
}

/// MSAC: residuals are charged `min(r², t²)` and the total is minimized.
#[derive(Debug, Clone, Copy)]
pub struct TruncatedQuadraticScoring {
    pub threshold: f64,
}

impl TruncatedQuadraticScoring {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Scoring for TruncatedQuadraticScoring {
    fn score(&self, residuals: &[f64], _sample_size: usize) -> Score {
        let t2 = self.threshold * self.threshold;
        let mut inlier_count = 0usize;
        let mut cost = 0.0;
        for &r in residuals {
            if r <= self.threshold {
                inlier_count += 1;
                cost += r * r;
            } else {
                cost += t2;
            }
        }
        Score::new(inlier_count, -cost, self.threshold)
    }
}

/// LMedS / PROMedS: minimizes the median residual.
///
/// The inlier threshold is not fixed; it is estimated from the median as
/// `inlier_factor * 1.4826 * (1 + 5 / (n - s)) * median`, and never drops
/// below `min_threshold` so that noise-free fits keep their rounding-level
/// residuals as inliers.
#[derive(Debug, Clone, Copy)]
pub struct MedianScoring {
    pub inlier_factor: f64,
    pub min_threshold: f64,
}

impl MedianScoring {
    pub fn new(inlier_factor: f64, min_threshold: f64) -> Self {
        Self {
            inlier_factor,
            min_threshold,
        }
    }

    /// Robust standard deviation estimate for `median` over `n` residuals of
    /// a model fitted on `sample_size` of them.
    pub fn robust_sigma(median: f64, n: usize, sample_size: usize) -> f64 {
        let correction = if n > sample_size {
            1.0 + 5.0 / (n - sample_size) as f64
        } else {
            1.0
        };
        MEDIAN_SIGMA_FACTOR * correction * median
    }
}

impl Scoring for MedianScoring {
    fn score(&self, residuals: &[f64], sample_size: usize) -> Score {
        let mut sorted = residuals.to_vec();
        let median = match median_in_place(&mut sorted) {
            Some(m) if m.is_finite() => m,
            _ => return Score::worst(),
        };

        let threshold = (self.inlier_factor
            * Self::robust_sigma(median, residuals.len(), sample_size))
        .max(self.min_threshold);
        let inlier_count = residuals.iter().filter(|&&r| r <= threshold).count();
        Score::new(inlier_count, -median, threshold)
    }
}
