//! Shared numeric aliases.
//!
//! The estimator core is generic over the measurement type, so there is no
//! single data matrix here. These aliases keep the sensor plugins and the
//! refinement pass speaking the same `nalgebra` types.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

/// Scalar type used throughout the crate.
pub type Real = f64;

/// 3-component column vector (bias, specific force, angular rate, ...).
pub type Vec3 = Vector3<Real>;

/// 3x3 matrix (scale factor / cross-coupling, G-dependent cross biases).
pub type Mat3 = Matrix3<Real>;

/// Dense parameter vector handed to the non-linear refinement.
pub type ParamVector = DVector<Real>;

/// Dense matrix used for jacobians and covariances.
pub type DenseMatrix = DMatrix<Real>;
