//! # Robust Calibration - outlier-resistant sensor calibration
//!
//! `robust_calibration` fits sensor and geometry models to noisy, partially
//! corrupted measurement sets with five consensus estimators (RANSAC, LMedS,
//! MSAC, PROSAC, PROMedS), then polishes the best candidate with a
//! Levenberg-Marquardt pass that can also report the parameter covariance.
//!
//! Built-in plugins cover accelerometer calibration against a known gravity
//! norm, gyroscope calibration in a known frame and 2D / 3D trilateration.
//!
//! ## Quick Start
//!
//! ```rust
//! use nalgebra::Vector3;
//! use robust_calibration::{solve_position_3d, RangingReading, RobustMethod, RobustSettings};
//!
//! let position = Vector3::new(1.0, 2.0, 3.0);
//! let centers = [
//!     Vector3::new(0.0, 0.0, 0.0),
//!     Vector3::new(10.0, 0.0, 0.0),
//!     Vector3::new(0.0, 10.0, 0.0),
//!     Vector3::new(0.0, 0.0, 10.0),
//!     Vector3::new(10.0, 10.0, 10.0),
//! ];
//! let readings = centers
//!     .iter()
//!     .map(|c| RangingReading::new(*c, (position - c).norm()))
//!     .collect::<Result<Vec<_>, _>>()
//!     .unwrap();
//!
//! let mut settings = RobustSettings::default();
//! settings.set_seed(Some(42));
//! let result = solve_position_3d(readings, RobustMethod::Ransac, None, Some(settings)).unwrap();
//! assert!((result.model - position).norm() < 1e-6);
//! ```
//!
//! ## Extending the Library
//!
//! A new model only needs an [`Estimator`](core::Estimator) (minimal solver
//! plus residual) and, to benefit from refinement, a
//! [`Refinable`](refinement::Refinable) implementation:
//!
//! ```rust
//! use nalgebra::DVector;
//! use robust_calibration::core::Estimator;
//! use robust_calibration::refinement::Refinable;
//! use robust_calibration::{RobustCalibrator, RobustMethod};
//!
//! /// Constant offset observed through scalar readings.
//! struct Offset;
//!
//! impl Estimator for Offset {
//!     type Datum = f64;
//!     type Model = f64;
//!
//!     fn sample_size(&self) -> usize {
//!         1
//!     }
//!
//!     fn estimate_model(&self, data: &[f64], sample: &[usize]) -> Vec<f64> {
//!         vec![data[sample[0]]]
//!     }
//!
//!     fn residual(&self, model: &f64, datum: &f64) -> f64 {
//!         (model - datum).abs()
//!     }
//! }
//!
//! impl Refinable for Offset {
//!     fn parameter_count(&self) -> usize {
//!         1
//!     }
//!
//!     fn model_to_parameters(&self, model: &f64) -> DVector<f64> {
//!         DVector::from_element(1, *model)
//!     }
//!
//!     fn parameters_to_model(&self, params: &DVector<f64>) -> Option<f64> {
//!         Some(params[0])
//!     }
//!
//!     fn residual_terms(&self, params: &DVector<f64>, datum: &f64) -> DVector<f64> {
//!         DVector::from_element(1, params[0] - datum)
//!     }
//! }
//!
//! let calibrator = RobustCalibrator::new(Offset, RobustMethod::Lmeds);
//! calibrator.set_measurements(vec![2.0, 2.0, 2.0, 2.0, 40.0]).unwrap();
//! assert_eq!(calibrator.calibrate().unwrap(), 2.0);
//! ```
//!
//! ## Modules
//!
//! - **[`api`](api)**: one-shot calibration and positioning functions
//! - **[`calibrator`](calibrator)**: the stateful facade with locking and listeners
//! - **[`core`](core)**: plugin traits and the consensus pipeline
//! - **[`choices`](choices)**: runtime selection of samplers, scoring and termination
//! - **[`estimators`](estimators)**: built-in minimal-solution plugins
//! - **[`refinement`](refinement)**: Levenberg-Marquardt polishing and covariance
//! - **[`samplers`](samplers)** / **[`scoring`](scoring)**: building blocks of the robust methods
//! - **[`settings`](settings)**: per-run configuration

pub mod api;
pub mod calibrator;
pub mod choices;
pub mod core;
pub mod error;
pub mod estimators;
pub mod inliers;
pub mod models;
pub mod refinement;
pub mod samplers;
pub mod scoring;
pub mod settings;
pub mod types;
pub mod utils;

// Re-export high-level API
pub use api::{
    calibrate_accelerometer, calibrate_gyroscope, estimate, solve_position_2d, solve_position_3d,
    EstimationResult,
};

pub use calibrator::{CalibratorListener, RobustCalibrator, RobustCalibratorBuilder};

// Re-export core traits for easy access
pub use crate::core::{Estimator, EstimatorListener, Sampler, Scoring, TerminationCriterion};

pub use error::{Error, Result};
pub use estimators::{
    AccelerometerMeasurement, GyroscopeMeasurement, KnownFrameGyroscope,
    KnownGravityNormAccelerometer, RangingReading, Trilateration, Trilateration2, Trilateration3,
};
pub use inliers::InliersData;
pub use models::{AccelerometerCalibration, GyroscopeCalibration};
pub use refinement::{LmRefiner, Refinable};
pub use settings::{RefineOptions, RobustMethod, RobustSettings};
