//! Minimal-solution plugins for the robust estimator.
//!
//! - Known-gravity-norm accelerometer calibration
//! - Known-frame gyroscope calibration with G-dependent cross biases
//! - 2D / 3D trilateration from ranging readings

pub mod accelerometer;
pub mod gyroscope;
pub mod trilateration;

pub use accelerometer::{AccelerometerMeasurement, KnownGravityNormAccelerometer};
pub use gyroscope::{GyroscopeMeasurement, KnownFrameGyroscope};
pub use trilateration::{RangingReading, Trilateration, Trilateration2, Trilateration3};

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::types::{Mat3, Real, Vec3};

/// Relative singular-value floor below which a linear system is treated as
/// rank deficient.
const RANK_TOLERANCE: Real = 1e-10;

/// Residual returned for parameters that cannot be evaluated.
pub(crate) const PENALTY_RESIDUAL: Real = 1e10;

/// Least-squares solution of `a x = b`, or `None` when `a` is rank deficient.
pub(crate) fn solve_least_squares(a: DMatrix<Real>, b: &DVector<Real>) -> Option<DVector<Real>> {
    if a.ncols() == 0 || a.nrows() < a.ncols() || a.nrows() != b.len() {
        return None;
    }

    let svd = a.svd(true, true);
    let max = svd.singular_values.max();
    if !max.is_finite() || max <= 0.0 || svd.singular_values.min() <= RANK_TOLERANCE * max {
        return None;
    }

    let x = svd.solve(b, 0.0).ok()?;
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Unit vector spanning the one-dimensional null space of `a`.
///
/// Returns `None` when the null space has a larger dimension.
pub(crate) fn null_vector(a: DMatrix<Real>) -> Option<DVector<Real>> {
    let cols = a.ncols();
    if cols < 2 {
        return None;
    }
    let a = if a.nrows() < cols {
        a.resize_vertically(cols, 0.0)
    } else {
        a
    };

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let sv = &svd.singular_values;

    let mut order: Vec<usize> = (0..sv.len()).collect();
    order.sort_by(|&i, &j| sv[i].total_cmp(&sv[j]));
    let (smallest, second) = (order[0], order[1]);
    let max = sv[order[sv.len() - 1]];
    if !max.is_finite() || max <= 0.0 || sv[second] <= RANK_TOLERANCE * max {
        return None;
    }

    Some(v_t.row(smallest).transpose())
}

/// Flatten a scale-factor / cross-coupling matrix as
/// `[sx, sy, sz, mxy, mxz, myx, myz, mzx, mzy]`, skipping the lower-triangle
/// entries when `upper_triangular`.
pub(crate) fn push_coupling_params(m: &Mat3, upper_triangular: bool, out: &mut Vec<Real>) {
    out.extend([m[(0, 0)], m[(1, 1)], m[(2, 2)], m[(0, 1)], m[(0, 2)]]);
    if upper_triangular {
        out.push(m[(1, 2)]);
    } else {
        out.extend([m[(1, 0)], m[(1, 2)], m[(2, 0)], m[(2, 1)]]);
    }
}

/// Number of entries [`push_coupling_params`] writes.
pub(crate) fn coupling_param_count(upper_triangular: bool) -> usize {
    if upper_triangular {
        6
    } else {
        9
    }
}

/// Inverse of [`push_coupling_params`].
pub(crate) fn coupling_from_params(p: &[Real], upper_triangular: bool) -> Mat3 {
    let mut m = Mat3::zeros();
    m[(0, 0)] = p[0];
    m[(1, 1)] = p[1];
    m[(2, 2)] = p[2];
    m[(0, 1)] = p[3];
    m[(0, 2)] = p[4];
    if upper_triangular {
        m[(1, 2)] = p[5];
    } else {
        m[(1, 0)] = p[5];
        m[(1, 2)] = p[6];
        m[(2, 0)] = p[7];
        m[(2, 1)] = p[8];
    }
    m
}

/// Every component of `v` must be finite.
pub(crate) fn validate_finite(name: &'static str, v: &Vec3) -> Result<()> {
    if v.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(Error::invalid(name, format!("components must be finite, got {v:?}")))
    }
}

/// Standard deviations must be positive and finite when given.
pub(crate) fn validate_std_dev(std_dev: Option<Real>) -> Result<()> {
    match std_dev {
        Some(sd) if !sd.is_finite() || sd <= 0.0 => Err(Error::invalid(
            "std_dev",
            format!("must be positive and finite, got {sd}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn least_squares_rejects_rank_deficient_systems() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(solve_least_squares(a, &b).is_none());

        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let x = solve_least_squares(a, &b).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn null_vector_of_rank_one_deficient_matrix() {
        // Rows orthogonal to (1, 1, -1).
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
        let v = null_vector(a).unwrap();
        let expected = DVector::from_vec(vec![1.0, 1.0, -1.0]).normalize();
        assert_relative_eq!(v.dot(&expected).abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn coupling_params_round_trip() {
        let m = Mat3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        let mut p = Vec::new();
        push_coupling_params(&m, false, &mut p);
        assert_eq!(p, vec![1.0, 5.0, 9.0, 2.0, 3.0, 4.0, 6.0, 7.0, 8.0]);
        assert_eq!(coupling_from_params(&p, false), m);

        let mut p = Vec::new();
        push_coupling_params(&m, true, &mut p);
        assert_eq!(p.len(), coupling_param_count(true));
        let upper = coupling_from_params(&p, true);
        assert_eq!(upper, Mat3::new(1.0, 2.0, 3.0, 0.0, 5.0, 6.0, 0.0, 0.0, 9.0));
    }

    #[test]
    fn std_dev_validation() {
        assert!(validate_std_dev(None).is_ok());
        assert!(validate_std_dev(Some(0.1)).is_ok());
        assert!(validate_std_dev(Some(-1.0)).is_err());
        assert!(validate_std_dev(Some(f64::NAN)).is_err());
    }
}
