//! Configuration types for robust estimation runs.
//!
//! [`RobustMethod`] picks one of the five consensus variants and
//! [`RobustSettings`] carries every per-run knob. Setters validate before
//! mutating, so a rejected value always leaves the previous one in place.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Robust estimation variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobustMethod {
    /// Uniform sampling, inlier-count scoring against a fixed threshold.
    #[default]
    Ransac,
    /// Uniform sampling, least-median-of-residuals scoring.
    Lmeds,
    /// Uniform sampling, truncated quadratic cost against a fixed threshold.
    Msac,
    /// Quality-ordered progressive sampling, inlier-count scoring.
    Prosac,
    /// Quality-ordered progressive sampling, least-median scoring.
    Promeds,
}

impl RobustMethod {
    pub const ALL: [RobustMethod; 5] = [
        RobustMethod::Ransac,
        RobustMethod::Lmeds,
        RobustMethod::Msac,
        RobustMethod::Prosac,
        RobustMethod::Promeds,
    ];

    /// Whether the method orders its samples by per-sample quality scores.
    pub fn requires_quality_scores(self) -> bool {
        matches!(self, RobustMethod::Prosac | RobustMethod::Promeds)
    }

    /// Whether candidates are scored by their median residual.
    pub fn uses_median(self) -> bool {
        matches!(self, RobustMethod::Lmeds | RobustMethod::Promeds)
    }
}

impl std::fmt::Display for RobustMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RobustMethod::Ransac => "RANSAC",
            RobustMethod::Lmeds => "LMedS",
            RobustMethod::Msac => "MSAC",
            RobustMethod::Prosac => "PROSAC",
            RobustMethod::Promeds => "PROMedS",
        };
        f.write_str(name)
    }
}

/// Options for the Levenberg-Marquardt refinement pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    /// Iteration cap; the solver interprets it MINPACK-style as
    /// `max_iterations * (n + 1)` function evaluations.
    pub max_iterations: usize,
    /// Relative tolerance on the cost reduction.
    pub ftol: f64,
    /// Relative tolerance on parameter updates.
    pub xtol: f64,
    /// Orthogonality tolerance between residuals and jacobian columns.
    pub gtol: f64,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

impl RefineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::invalid("refine.max_iterations", "must be at least 1"));
        }
        for (name, value) in [
            ("refine.ftol", self.ftol),
            ("refine.xtol", self.xtol),
            ("refine.gtol", self.gtol),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(Error::invalid(name, format!("must be finite and >= 0, got {value}")));
            }
        }
        Ok(())
    }
}

/// Per-run configuration shared by every robust calibrator and solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustSettings {
    confidence: f64,
    max_iterations: usize,
    progress_delta: f32,
    threshold: f64,
    stop_threshold: f64,
    inlier_factor: f64,
    compute_and_keep_inliers: bool,
    compute_and_keep_residuals: bool,
    refine_result: bool,
    keep_covariance: bool,
    seed: Option<u64>,
    refine: RefineOptions,
}

impl RobustSettings {
    pub const DEFAULT_CONFIDENCE: f64 = 0.99;
    pub const DEFAULT_MAX_ITERATIONS: usize = 5000;
    pub const DEFAULT_PROGRESS_DELTA: f32 = 0.01;
    pub const DEFAULT_THRESHOLD: f64 = 1e-2;
    pub const DEFAULT_STOP_THRESHOLD: f64 = 1e-3;
    pub const DEFAULT_INLIER_FACTOR: f64 = 1.5;
}

impl Default for RobustSettings {
    fn default() -> Self {
        Self {
            confidence: Self::DEFAULT_CONFIDENCE,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            progress_delta: Self::DEFAULT_PROGRESS_DELTA,
            threshold: Self::DEFAULT_THRESHOLD,
            stop_threshold: Self::DEFAULT_STOP_THRESHOLD,
            inlier_factor: Self::DEFAULT_INLIER_FACTOR,
            compute_and_keep_inliers: false,
            compute_and_keep_residuals: false,
            refine_result: true,
            keep_covariance: true,
            seed: None,
            refine: RefineOptions::default(),
        }
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(Error::invalid(name, format!("must be finite and > 0, got {value}")))
    }
}

fn check_confidence(value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(Error::invalid(
            "confidence",
            format!("must be within (0, 1), got {value}"),
        ))
    }
}

fn check_max_iterations(value: usize) -> Result<()> {
    if value >= 1 {
        Ok(())
    } else {
        Err(Error::invalid("max_iterations", "must be at least 1"))
    }
}

fn check_progress_delta(value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid(
            "progress_delta",
            format!("must be within [0, 1], got {value}"),
        ))
    }
}

impl RobustSettings {
    /// Amount of confidence that the returned candidate is outlier-free.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn set_confidence(&mut self, confidence: f64) -> Result<()> {
        check_confidence(confidence)?;
        self.confidence = confidence;
        Ok(())
    }

    /// Upper bound on the number of trials.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        check_max_iterations(max_iterations)?;
        self.max_iterations = max_iterations;
        Ok(())
    }

    /// Minimum progress change between two progress notifications.
    pub fn progress_delta(&self) -> f32 {
        self.progress_delta
    }

    pub fn set_progress_delta(&mut self, progress_delta: f32) -> Result<()> {
        check_progress_delta(progress_delta)?;
        self.progress_delta = progress_delta;
        Ok(())
    }

    /// Fixed inlier threshold used by RANSAC, MSAC and PROSAC.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) -> Result<()> {
        check_positive("threshold", threshold)?;
        self.threshold = threshold;
        Ok(())
    }

    /// Median residual below which LMedS and PROMedS stop early.
    pub fn stop_threshold(&self) -> f64 {
        self.stop_threshold
    }

    pub fn set_stop_threshold(&mut self, stop_threshold: f64) -> Result<()> {
        check_positive("stop_threshold", stop_threshold)?;
        self.stop_threshold = stop_threshold;
        Ok(())
    }

    /// Multiplier applied to the robust scale estimate to obtain the LMedS
    /// and PROMedS inlier threshold.
    pub fn inlier_factor(&self) -> f64 {
        self.inlier_factor
    }

    pub fn set_inlier_factor(&mut self, inlier_factor: f64) -> Result<()> {
        check_positive("inlier_factor", inlier_factor)?;
        self.inlier_factor = inlier_factor;
        Ok(())
    }

    pub fn compute_and_keep_inliers(&self) -> bool {
        self.compute_and_keep_inliers
    }

    pub fn set_compute_and_keep_inliers(&mut self, keep: bool) {
        self.compute_and_keep_inliers = keep;
    }

    pub fn compute_and_keep_residuals(&self) -> bool {
        self.compute_and_keep_residuals
    }

    pub fn set_compute_and_keep_residuals(&mut self, keep: bool) {
        self.compute_and_keep_residuals = keep;
    }

    /// Whether the best candidate is polished with Levenberg-Marquardt.
    pub fn refine_result(&self) -> bool {
        self.refine_result
    }

    pub fn set_refine_result(&mut self, refine: bool) {
        self.refine_result = refine;
    }

    /// Whether the refined parameter covariance is retained.
    pub fn keep_covariance(&self) -> bool {
        self.keep_covariance
    }

    pub fn set_keep_covariance(&mut self, keep: bool) {
        self.keep_covariance = keep;
    }

    /// Seed for the subset samplers; `None` draws from OS entropy.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }

    pub fn refine_options(&self) -> &RefineOptions {
        &self.refine
    }

    pub fn set_refine_options(&mut self, options: RefineOptions) -> Result<()> {
        options.validate()?;
        self.refine = options;
        Ok(())
    }

    /// Re-check every field, e.g. after deserialization.
    pub fn validate(&self) -> Result<()> {
        check_confidence(self.confidence)?;
        check_max_iterations(self.max_iterations)?;
        check_progress_delta(self.progress_delta)?;
        check_positive("threshold", self.threshold)?;
        check_positive("stop_threshold", self.stop_threshold)?;
        check_positive("inlier_factor", self.inlier_factor)?;
        self.refine.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RobustSettings::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.confidence() - 0.99).abs() < 1e-12);
        assert_eq!(cfg.max_iterations(), 5000);
        assert!((cfg.progress_delta() - 0.01).abs() < 1e-7);
        assert!(!cfg.compute_and_keep_inliers());
        assert!(!cfg.compute_and_keep_residuals());
        assert!(cfg.refine_result());
        assert!(cfg.seed().is_none());
    }

    #[test]
    fn setters_round_trip_valid_values() {
        let mut cfg = RobustSettings::default();
        cfg.set_confidence(0.5).unwrap();
        cfg.set_max_iterations(1).unwrap();
        cfg.set_progress_delta(1.0).unwrap();
        cfg.set_threshold(3.5).unwrap();
        cfg.set_stop_threshold(1e-6).unwrap();
        cfg.set_inlier_factor(2.0).unwrap();

        assert_eq!(cfg.confidence(), 0.5);
        assert_eq!(cfg.max_iterations(), 1);
        assert_eq!(cfg.progress_delta(), 1.0);
        assert_eq!(cfg.threshold(), 3.5);
        assert_eq!(cfg.stop_threshold(), 1e-6);
        assert_eq!(cfg.inlier_factor(), 2.0);
    }

    #[test]
    fn rejected_values_leave_previous_value() {
        let mut cfg = RobustSettings::default();

        for bad in [0.0, 1.0, -0.1, 1.1, f64::NAN] {
            assert!(cfg.set_confidence(bad).is_err());
        }
        assert_eq!(cfg.confidence(), RobustSettings::DEFAULT_CONFIDENCE);

        assert!(cfg.set_max_iterations(0).is_err());
        assert_eq!(cfg.max_iterations(), RobustSettings::DEFAULT_MAX_ITERATIONS);

        assert!(cfg.set_progress_delta(-0.01).is_err());
        assert!(cfg.set_progress_delta(1.5).is_err());
        assert_eq!(cfg.progress_delta(), RobustSettings::DEFAULT_PROGRESS_DELTA);

        for bad in [0.0, -1.0, f64::INFINITY] {
            assert!(cfg.set_threshold(bad).is_err());
            assert!(cfg.set_stop_threshold(bad).is_err());
        }
        assert_eq!(cfg.threshold(), RobustSettings::DEFAULT_THRESHOLD);
        assert_eq!(cfg.stop_threshold(), RobustSettings::DEFAULT_STOP_THRESHOLD);

        let bad_refine = RefineOptions {
            max_iterations: 0,
            ..RefineOptions::default()
        };
        assert!(cfg.set_refine_options(bad_refine).is_err());
        assert_eq!(*cfg.refine_options(), RefineOptions::default());
    }

    #[test]
    fn method_traits() {
        assert!(RobustMethod::Prosac.requires_quality_scores());
        assert!(RobustMethod::Promeds.requires_quality_scores());
        assert!(!RobustMethod::Ransac.requires_quality_scores());
        assert!(RobustMethod::Lmeds.uses_median());
        assert!(!RobustMethod::Msac.uses_median());
        assert_eq!(RobustMethod::Promeds.to_string(), "PROMedS");
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let cfg: RobustSettings =
            serde_json::from_str(r#"{ "threshold": 0.5, "seed": 7 }"#).unwrap();
        assert_eq!(cfg.threshold(), 0.5);
        assert_eq!(cfg.seed(), Some(7));
        assert_eq!(cfg.max_iterations(), RobustSettings::DEFAULT_MAX_ITERATIONS);
        assert!(cfg.validate().is_ok());

        let method: RobustMethod = serde_json::from_str(r#""promeds""#).unwrap();
        assert_eq!(method, RobustMethod::Promeds);
    }

    #[test]
    fn deserialized_out_of_range_values_fail_validation() {
        let cfg: RobustSettings = serde_json::from_str(r#"{ "confidence": 2.0 }"#).unwrap();
        assert!(cfg.validate().is_err());
    }
}
