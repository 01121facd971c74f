//! One-shot convenience functions over [`RobustCalibrator`].
//!
//! Each helper builds a calibrator, runs it once and returns the result
//! together with its inlier bookkeeping. Inlier membership is always kept so
//! that [`EstimationResult::inliers`] is populated.

use crate::calibrator::RobustCalibrator;
use crate::error::{Error, Result};
use crate::estimators::{
    AccelerometerMeasurement, GyroscopeMeasurement, KnownFrameGyroscope,
    KnownGravityNormAccelerometer, RangingReading, Trilateration,
};
use crate::estimators::trilateration::Point;
use crate::inliers::InliersData;
use crate::models::{AccelerometerCalibration, GyroscopeCalibration};
use crate::refinement::Refinable;
use crate::settings::{RobustMethod, RobustSettings};
use crate::types::{DenseMatrix, Vec3};

/// Result of a one-shot robust estimation.
#[derive(Debug, Clone)]
pub struct EstimationResult<M> {
    /// The estimated (and, if enabled, refined) model.
    pub model: M,
    /// Indices of inlier measurements.
    pub inliers: Vec<usize>,
    pub inliers_data: InliersData,
    /// Parameter covariance when refinement ran with `keep_covariance`.
    pub covariance: Option<DenseMatrix>,
}

/// Run `estimator` over `measurements` with the given robust `method`.
///
/// `quality_scores` is required for PROSAC and PROMedS and ignored otherwise.
pub fn estimate<P: Refinable>(
    estimator: P,
    measurements: Vec<P::Datum>,
    method: RobustMethod,
    quality_scores: Option<Vec<f64>>,
    settings: Option<RobustSettings>,
) -> Result<EstimationResult<P::Model>> {
    let mut settings = settings.unwrap_or_default();
    settings.set_compute_and_keep_inliers(true);

    let mut builder = RobustCalibrator::builder(estimator)
        .method(method)
        .measurements(measurements)
        .settings(settings);
    if let Some(q) = quality_scores.filter(|_| method.requires_quality_scores()) {
        builder = builder.quality_scores(q);
    }
    let calibrator = builder.build()?;

    let model = calibrator.calibrate()?;
    let inliers_data = calibrator
        .inliers_data()
        .ok_or_else(|| Error::NotReady("inlier data missing after a successful run".into()))?;

    Ok(EstimationResult {
        model,
        inliers: inliers_data.inlier_indices().unwrap_or_default(),
        inliers_data,
        covariance: calibrator.estimated_covariance(),
    })
}

/// Calibrate an accelerometer from static readings and the local gravity norm.
///
/// # Arguments
/// * `measurements` - Static specific-force readings
/// * `gravity_norm` - Norm of local gravity (m/s²)
/// * `known_bias` - Fix the bias instead of estimating it
/// * `common_axis` - Keep the cross-coupling matrix upper triangular
pub fn calibrate_accelerometer(
    measurements: Vec<AccelerometerMeasurement>,
    gravity_norm: f64,
    known_bias: Option<Vec3>,
    common_axis: bool,
    method: RobustMethod,
    quality_scores: Option<Vec<f64>>,
    settings: Option<RobustSettings>,
) -> Result<EstimationResult<AccelerometerCalibration>> {
    let mut estimator =
        KnownGravityNormAccelerometer::new(gravity_norm)?.with_common_axis(common_axis);
    if let Some(bias) = known_bias {
        estimator = estimator.with_known_bias(bias);
    }
    estimate(estimator, measurements, method, quality_scores, settings)
}

/// Calibrate a gyroscope from readings with known true kinematics.
pub fn calibrate_gyroscope(
    measurements: Vec<GyroscopeMeasurement>,
    common_axis: bool,
    method: RobustMethod,
    quality_scores: Option<Vec<f64>>,
    settings: Option<RobustSettings>,
) -> Result<EstimationResult<GyroscopeCalibration>> {
    let estimator = KnownFrameGyroscope::new().with_common_axis(common_axis);
    estimate(estimator, measurements, method, quality_scores, settings)
}

/// Estimate a 2D position from ranging readings.
pub fn solve_position_2d(
    readings: Vec<RangingReading<2>>,
    method: RobustMethod,
    quality_scores: Option<Vec<f64>>,
    settings: Option<RobustSettings>,
) -> Result<EstimationResult<Point<2>>> {
    estimate(Trilateration::<2>::new(), readings, method, quality_scores, settings)
}

/// Estimate a 3D position from ranging readings.
pub fn solve_position_3d(
    readings: Vec<RangingReading<3>>,
    method: RobustMethod,
    quality_scores: Option<Vec<f64>>,
    settings: Option<RobustSettings>,
) -> Result<EstimationResult<Point<3>>> {
    estimate(Trilateration::<3>::new(), readings, method, quality_scores, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn seeded() -> Option<RobustSettings> {
        let mut settings = RobustSettings::default();
        settings.set_seed(Some(3));
        Some(settings)
    }

    #[test]
    fn solve_position_2d_flags_outlier() {
        let truth = Vector2::new(2.0, 3.0);
        let centers = [
            Vector2::new(0.0, 0.0),
            Vector2::new(8.0, 0.0),
            Vector2::new(0.0, 8.0),
            Vector2::new(8.0, 8.0),
            Vector2::new(4.0, -3.0),
            Vector2::new(-2.0, 5.0),
        ];
        let mut readings: Vec<_> = centers
            .iter()
            .map(|c| RangingReading::new(*c, (truth - c).norm()).unwrap())
            .collect();
        readings[5] = RangingReading::new(centers[5], 30.0).unwrap();

        let result = solve_position_2d(readings, RobustMethod::Ransac, None, seeded()).unwrap();
        assert_relative_eq!(result.model, truth, epsilon = 1e-8);
        assert_eq!(result.inliers, vec![0, 1, 2, 3, 4]);
        assert!(result.covariance.is_some());
    }

    #[test]
    fn progressive_methods_require_scores() {
        let readings = vec![RangingReading::new(Vector2::new(0.0, 0.0), 1.0).unwrap(); 3];
        let err = solve_position_2d(readings, RobustMethod::Prosac, None, seeded()).unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }

    #[test]
    fn invalid_gravity_norm_is_rejected() {
        let err = calibrate_accelerometer(
            Vec::new(),
            -1.0,
            None,
            false,
            RobustMethod::Ransac,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { name: "gravity_norm", .. }));
    }
}
