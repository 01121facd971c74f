//! Inlier / residual bookkeeping kept after a robust run.

use serde::{Deserialize, Serialize};

/// Inlier membership and residuals of the final consensus set.
///
/// Membership and residuals are only stored when the corresponding "keep"
/// flag was enabled for the run; the threshold and inlier count always are.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InliersData {
    inliers: Option<Vec<bool>>,
    residuals: Option<Vec<f64>>,
    threshold: f64,
    num_inliers: usize,
}

impl InliersData {
    pub fn new(
        inliers: Option<Vec<bool>>,
        residuals: Option<Vec<f64>>,
        threshold: f64,
        num_inliers: usize,
    ) -> Self {
        Self {
            inliers,
            residuals,
            threshold,
            num_inliers,
        }
    }

    /// Per-measurement inlier flags.
    pub fn inliers(&self) -> Option<&[bool]> {
        self.inliers.as_deref()
    }

    /// Per-measurement residuals under the best candidate.
    pub fn residuals(&self) -> Option<&[f64]> {
        self.residuals.as_deref()
    }

    /// Threshold used to classify inliers (configured or estimated).
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_inliers(&self) -> usize {
        self.num_inliers
    }

    /// Indices of inlier measurements, when membership was kept.
    pub fn inlier_indices(&self) -> Option<Vec<usize>> {
        self.inliers.as_ref().map(|flags| {
            flags
                .iter()
                .enumerate()
                .filter_map(|(i, &b)| b.then_some(i))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::InliersData;

    #[test]
    fn accessors_reflect_kept_data() {
        let data = InliersData::new(Some(vec![true, false, true]), None, 0.5, 2);
        assert_eq!(data.inliers(), Some(&[true, false, true][..]));
        assert_eq!(data.inlier_indices(), Some(vec![0, 2]));
        assert!(data.residuals().is_none());
        assert_eq!(data.threshold(), 0.5);
        assert_eq!(data.num_inliers(), 2);
    }
}
