//! Accelerometer calibration against a known gravity norm.
//!
//! A static accelerometer measures `f = b + (I + Ma) · f_true` where only the
//! norm of `f_true` (local gravity) is known. Every measurement therefore lies
//! on the ellipsoid `(f - b)ᵀ A (f - b) = g²` with `A = T⁻ᵀ T⁻¹`,
//! `T = I + Ma`. The minimal solver fits that quadric linearly and recovers an
//! upper-triangular `T` through a Cholesky factorization of `A`.

use nalgebra::{Cholesky, DMatrix, DVector, Matrix3};

use crate::core::Estimator;
use crate::error::{Error, Result};
use crate::estimators::{
    coupling_from_params, coupling_param_count, null_vector, push_coupling_params,
    solve_least_squares, validate_finite, validate_std_dev, PENALTY_RESIDUAL,
};
use crate::models::AccelerometerCalibration;
use crate::refinement::Refinable;
use crate::types::{Mat3, ParamVector, Real, Vec3};

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: Real = 9.806_65;

/// Static specific-force reading.
#[derive(Debug, Clone, PartialEq)]
pub struct AccelerometerMeasurement {
    pub specific_force: Vec3,
    pub std_dev: Option<Real>,
}

impl AccelerometerMeasurement {
    pub fn new(specific_force: Vec3) -> Self {
        Self {
            specific_force,
            std_dev: None,
        }
    }

    pub fn with_std_dev(specific_force: Vec3, std_dev: Real) -> Result<Self> {
        validate_std_dev(Some(std_dev))?;
        Ok(Self {
            specific_force,
            std_dev: Some(std_dev),
        })
    }
}

/// Minimal solver for accelerometer calibration with a known gravity norm.
#[derive(Debug, Clone)]
pub struct KnownGravityNormAccelerometer {
    gravity_norm: Real,
    common_axis: bool,
    known_bias: Option<Vec3>,
}

impl KnownGravityNormAccelerometer {
    /// Unknown bias, general cross-coupling.
    pub fn new(gravity_norm: Real) -> Result<Self> {
        if !gravity_norm.is_finite() || gravity_norm <= 0.0 {
            return Err(Error::invalid(
                "gravity_norm",
                format!("must be positive, got {gravity_norm}"),
            ));
        }
        Ok(Self {
            gravity_norm,
            common_axis: false,
            known_bias: None,
        })
    }

    /// Keep `Ma` upper triangular (common x axis for sensor and body frames).
    pub fn with_common_axis(mut self, common_axis: bool) -> Self {
        self.common_axis = common_axis;
        self
    }

    /// Fix the bias instead of estimating it.
    pub fn with_known_bias(mut self, bias: Vec3) -> Self {
        self.known_bias = Some(bias);
        self
    }

    pub fn gravity_norm(&self) -> Real {
        self.gravity_norm
    }

    pub fn is_common_axis(&self) -> bool {
        self.common_axis
    }

    pub fn known_bias(&self) -> Option<&Vec3> {
        self.known_bias.as_ref()
    }

    /// Scaled ellipsoid matrix `A` (in units of `g`) to calibration.
    fn calibration_from_quadric(
        &self,
        a: Matrix3<Real>,
        bias: Vec3,
    ) -> Option<AccelerometerCalibration> {
        let a = 0.5 * (a + a.transpose());
        let l = Cholesky::new(a)?.l();
        let t = l.transpose().try_inverse()?;
        let ma = t - Mat3::identity();
        ma.iter()
            .chain(bias.iter())
            .all(|v| v.is_finite())
            .then(|| AccelerometerCalibration::new(bias, ma))
    }

    fn estimate_with_unknown_bias(
        &self,
        data: &[AccelerometerMeasurement],
        sample: &[usize],
    ) -> Option<AccelerometerCalibration> {
        let g = self.gravity_norm;
        let mut design = DMatrix::zeros(sample.len(), 10);
        for (row, &i) in sample.iter().enumerate() {
            let u = data[i].specific_force / g;
            let values = [
                u.x * u.x,
                u.y * u.y,
                u.z * u.z,
                2.0 * u.x * u.y,
                2.0 * u.x * u.z,
                2.0 * u.y * u.z,
                -2.0 * u.x,
                -2.0 * u.y,
                -2.0 * u.z,
                1.0,
            ];
            for (col, v) in values.into_iter().enumerate() {
                design[(row, col)] = v;
            }
        }

        let x = null_vector(design)?;
        let a_scaled = symmetric_from(&x.as_slice()[..6]);
        let v = Vec3::new(x[6], x[7], x[8]);
        let k = x[9];

        let beta = a_scaled.try_inverse()? * v;
        let scale = beta.dot(&(a_scaled * beta)) - k;
        if !scale.is_finite() || scale.abs() < Real::EPSILON {
            return None;
        }

        self.calibration_from_quadric(a_scaled / scale, beta * g)
    }

    fn estimate_with_known_bias(
        &self,
        data: &[AccelerometerMeasurement],
        sample: &[usize],
        bias: &Vec3,
    ) -> Option<AccelerometerCalibration> {
        let g = self.gravity_norm;
        let mut design = DMatrix::zeros(sample.len(), 6);
        for (row, &i) in sample.iter().enumerate() {
            let d = (data[i].specific_force - bias) / g;
            let values = [
                d.x * d.x,
                d.y * d.y,
                d.z * d.z,
                2.0 * d.x * d.y,
                2.0 * d.x * d.z,
                2.0 * d.y * d.z,
            ];
            for (col, v) in values.into_iter().enumerate() {
                design[(row, col)] = v;
            }
        }
        let rhs = DVector::from_element(sample.len(), 1.0);
        let x = solve_least_squares(design, &rhs)?;

        self.calibration_from_quadric(symmetric_from(x.as_slice()), *bias)
    }

    fn signed_residual(
        &self,
        model: &AccelerometerCalibration,
        datum: &AccelerometerMeasurement,
    ) -> Real {
        match model.correct(&datum.specific_force) {
            Some(f_true) => f_true.norm() - self.gravity_norm,
            None => PENALTY_RESIDUAL,
        }
    }
}

/// Symmetric 3x3 matrix from `[a11, a22, a33, a12, a13, a23]`.
fn symmetric_from(p: &[Real]) -> Matrix3<Real> {
    Matrix3::new(p[0], p[3], p[4], p[3], p[1], p[5], p[4], p[5], p[2])
}

impl Estimator for KnownGravityNormAccelerometer {
    type Datum = AccelerometerMeasurement;
    type Model = AccelerometerCalibration;

    fn sample_size(&self) -> usize {
        match (self.known_bias.is_some(), self.common_axis) {
            (false, false) => 13,
            (false, true) => 10,
            (true, false) => 10,
            (true, true) => 7,
        }
    }

    fn estimate_model(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model> {
        let solution = match &self.known_bias {
            Some(bias) => self.estimate_with_known_bias(data, sample, bias),
            None => self.estimate_with_unknown_bias(data, sample),
        };
        solution.into_iter().collect()
    }

    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64 {
        self.signed_residual(model, datum).abs()
    }

    fn validate_datum(&self, datum: &Self::Datum) -> Result<()> {
        validate_finite("specific_force", &datum.specific_force)?;
        validate_std_dev(datum.std_dev)
    }
}

impl Refinable for KnownGravityNormAccelerometer {
    fn parameter_count(&self) -> usize {
        let bias = if self.known_bias.is_some() { 0 } else { 3 };
        bias + coupling_param_count(self.common_axis)
    }

    fn model_to_parameters(&self, model: &Self::Model) -> ParamVector {
        let mut p = Vec::with_capacity(self.parameter_count());
        if self.known_bias.is_none() {
            p.extend(model.bias.iter());
        }
        push_coupling_params(&model.ma, self.common_axis, &mut p);
        ParamVector::from_vec(p)
    }

    fn parameters_to_model(&self, params: &ParamVector) -> Option<Self::Model> {
        if params.len() != self.parameter_count() {
            return None;
        }
        let (bias, rest) = match &self.known_bias {
            Some(b) => (*b, params.as_slice()),
            None => (
                Vec3::new(params[0], params[1], params[2]),
                &params.as_slice()[3..],
            ),
        };
        Some(AccelerometerCalibration::new(
            bias,
            coupling_from_params(rest, self.common_axis),
        ))
    }

    fn residual_terms(&self, params: &ParamVector, datum: &Self::Datum) -> DVector<Real> {
        let r = match self.parameters_to_model(params) {
            Some(model) => self.signed_residual(&model, datum),
            None => PENALTY_RESIDUAL,
        };
        DVector::from_element(1, r)
    }

    fn standard_deviation(&self, datum: &Self::Datum) -> Option<Real> {
        datum.std_dev
    }
}
