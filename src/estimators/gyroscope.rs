//! Gyroscope calibration in a known frame, including G-dependent cross biases.
//!
//! Model: `ω_meas = b + (I + Mg) · ω_true + Gg · f_true`. With the true
//! kinematics known the model is linear in its parameters and separates per
//! sensor axis, so the minimal solver is three small least-squares systems.

use nalgebra::{DMatrix, DVector};

use crate::core::Estimator;
use crate::error::Result;
use crate::estimators::{
    coupling_from_params, coupling_param_count, push_coupling_params, solve_least_squares,
    validate_finite, validate_std_dev,
};
use crate::models::GyroscopeCalibration;
use crate::refinement::Refinable;
use crate::types::{DenseMatrix, Mat3, ParamVector, Real, Vec3};

/// One body-kinematics reading with its ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct GyroscopeMeasurement {
    pub true_angular_rate: Vec3,
    pub true_specific_force: Vec3,
    pub measured_angular_rate: Vec3,
    pub std_dev: Option<Real>,
}

impl GyroscopeMeasurement {
    pub fn new(
        true_angular_rate: Vec3,
        true_specific_force: Vec3,
        measured_angular_rate: Vec3,
    ) -> Self {
        Self {
            true_angular_rate,
            true_specific_force,
            measured_angular_rate,
            std_dev: None,
        }
    }

    pub fn with_std_dev(mut self, std_dev: Real) -> Result<Self> {
        validate_std_dev(Some(std_dev))?;
        self.std_dev = Some(std_dev);
        Ok(self)
    }
}

/// Minimal solver for gyroscope calibration with known true kinematics.
#[derive(Debug, Clone, Default)]
pub struct KnownFrameGyroscope {
    common_axis: bool,
}

impl KnownFrameGyroscope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `Mg` upper triangular.
    pub fn with_common_axis(mut self, common_axis: bool) -> Self {
        self.common_axis = common_axis;
        self
    }

    pub fn is_common_axis(&self) -> bool {
        self.common_axis
    }

    /// Columns of `Mg` that enter the equation of `axis`.
    fn coupling_columns(&self, axis: usize) -> std::ops::Range<usize> {
        if self.common_axis {
            axis..3
        } else {
            0..3
        }
    }

    fn error_vector(&self, model: &GyroscopeCalibration, datum: &GyroscopeMeasurement) -> Vec3 {
        model.predict(&datum.true_angular_rate, &datum.true_specific_force)
            - datum.measured_angular_rate
    }
}

impl Estimator for KnownFrameGyroscope {
    type Datum = GyroscopeMeasurement;
    type Model = GyroscopeCalibration;

    fn sample_size(&self) -> usize {
        7
    }

    fn estimate_model(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model> {
        let mut model = GyroscopeCalibration::default();

        for axis in 0..3 {
            let columns = self.coupling_columns(axis);
            let unknowns = 1 + columns.len() + 3;
            let mut design = DMatrix::zeros(sample.len(), unknowns);
            let mut rhs = DVector::zeros(sample.len());

            for (row, &i) in sample.iter().enumerate() {
                let m = &data[i];
                design[(row, 0)] = 1.0;
                for (k, j) in columns.clone().enumerate() {
                    design[(row, 1 + k)] = m.true_angular_rate[j];
                }
                for j in 0..3 {
                    design[(row, 1 + columns.len() + j)] = m.true_specific_force[j];
                }
                rhs[row] = m.measured_angular_rate[axis] - m.true_angular_rate[axis];
            }

            let Some(x) = solve_least_squares(design, &rhs) else {
                return Vec::new();
            };

            model.bias[axis] = x[0];
            for (k, j) in columns.clone().enumerate() {
                model.mg[(axis, j)] = x[1 + k];
            }
            for j in 0..3 {
                model.gg[(axis, j)] = x[1 + columns.len() + j];
            }
        }

        vec![model]
    }

    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64 {
        self.error_vector(model, datum).norm()
    }

    fn validate_datum(&self, datum: &Self::Datum) -> Result<()> {
        validate_finite("true_angular_rate", &datum.true_angular_rate)?;
        validate_finite("true_specific_force", &datum.true_specific_force)?;
        validate_finite("measured_angular_rate", &datum.measured_angular_rate)?;
        validate_std_dev(datum.std_dev)
    }
}

impl Refinable for KnownFrameGyroscope {
    fn parameter_count(&self) -> usize {
        3 + coupling_param_count(self.common_axis) + 9
    }

    fn residual_dimension(&self) -> usize {
        3
    }

    fn model_to_parameters(&self, model: &Self::Model) -> ParamVector {
        let mut p = Vec::with_capacity(self.parameter_count());
        p.extend(model.bias.iter());
        push_coupling_params(&model.mg, self.common_axis, &mut p);
        // Gg row by row.
        p.extend(model.gg.transpose().iter());
        ParamVector::from_vec(p)
    }

    fn parameters_to_model(&self, params: &ParamVector) -> Option<Self::Model> {
        if params.len() != self.parameter_count() {
            return None;
        }
        let p = params.as_slice();
        let coupling = coupling_param_count(self.common_axis);
        let bias = Vec3::new(p[0], p[1], p[2]);
        let mg = coupling_from_params(&p[3..3 + coupling], self.common_axis);
        let gg = Mat3::from_row_slice(&p[3 + coupling..]);
        Some(GyroscopeCalibration::new(bias, mg, gg))
    }

    fn residual_terms(&self, params: &ParamVector, datum: &Self::Datum) -> DVector<Real> {
        match self.parameters_to_model(params) {
            Some(model) => {
                let e = self.error_vector(&model, datum);
                DVector::from_column_slice(e.as_slice())
            }
            None => DVector::from_element(3, super::PENALTY_RESIDUAL),
        }
    }

    fn jacobian_terms(&self, _params: &ParamVector, datum: &Self::Datum) -> DenseMatrix {
        let w = &datum.true_angular_rate;
        let f = &datum.true_specific_force;
        let mut jac = DenseMatrix::zeros(3, self.parameter_count());

        for axis in 0..3 {
            jac[(axis, axis)] = 1.0;
        }

        // Coupling columns follow the [sx, sy, sz, mxy, mxz, (myx), myz, (mzx), (mzy)] layout.
        let entries: &[(usize, usize)] = if self.common_axis {
            &[(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)]
        } else {
            &[(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1)]
        };
        for (k, &(row, col)) in entries.iter().enumerate() {
            jac[(row, 3 + k)] = w[col];
        }

        let g_offset = 3 + entries.len();
        for row in 0..3 {
            for col in 0..3 {
                jac[(row, g_offset + 3 * row + col)] = f[col];
            }
        }
        jac
    }

    fn standard_deviation(&self, datum: &Self::Datum) -> Option<Real> {
        datum.std_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinement::numeric_jacobian;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn truth() -> GyroscopeCalibration {
        GyroscopeCalibration::new(
            Vec3::new(1e-3, -2e-3, 5e-4),
            Mat3::new(0.01, 0.002, -0.001, 0.0, -0.02, 0.003, 0.0, 0.0, 0.015),
            Mat3::new(1e-4, -2e-4, 3e-4, 2e-4, 1e-4, -1e-4, -3e-4, 2e-4, 1e-4),
        )
    }

    fn measurements(
        model: &GyroscopeCalibration,
        count: usize,
        seed: u64,
    ) -> Vec<GyroscopeMeasurement> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let w = Vec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                let f = Vec3::new(
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                );
                GyroscopeMeasurement::new(w, f, model.predict(&w, &f))
            })
            .collect()
    }

    #[test]
    fn recovers_general_calibration_from_seven_readings() {
        let truth = truth();
        let data = measurements(&truth, 7, 4);
        let estimator = KnownFrameGyroscope::new();
        let sample: Vec<usize> = (0..7).collect();

        let models = estimator.estimate_model(&data, &sample);
        assert_eq!(models.len(), 1);
        assert_relative_eq!(models[0].bias, truth.bias, epsilon = 1e-10);
        assert_relative_eq!(models[0].mg, truth.mg, epsilon = 1e-10);
        assert_relative_eq!(models[0].gg, truth.gg, epsilon = 1e-10);
    }

    #[test]
    fn common_axis_keeps_lower_triangle_zero() {
        let truth = truth();
        let data = measurements(&truth, 7, 5);
        let estimator = KnownFrameGyroscope::new().with_common_axis(true);
        let models = estimator.estimate_model(&data, &(0..7).collect::<Vec<_>>());

        assert_eq!(models[0].mg[(1, 0)], 0.0);
        assert_eq!(models[0].mg[(2, 0)], 0.0);
        assert_eq!(models[0].mg[(2, 1)], 0.0);
        assert_relative_eq!(models[0].mg, truth.mg, epsilon = 1e-10);
        assert_eq!(estimator.parameter_count(), 18);
    }

    #[test]
    fn degenerate_kinematics_yield_no_candidate() {
        let m = GyroscopeMeasurement::new(Vec3::x(), Vec3::z(), Vec3::x());
        let data = vec![m; 7];
        let estimator = KnownFrameGyroscope::new();
        assert!(estimator
            .estimate_model(&data, &(0..7).collect::<Vec<_>>())
            .is_empty());
    }

    #[test]
    fn analytic_jacobian_matches_numeric() {
        let truth = truth();
        let datum = &measurements(&truth, 1, 6)[0];
        for common_axis in [false, true] {
            let estimator = KnownFrameGyroscope::new().with_common_axis(common_axis);
            let params = estimator.model_to_parameters(&truth);
            let analytic = estimator.jacobian_terms(&params, datum);
            let numeric = numeric_jacobian(&params, 3, |p| estimator.residual_terms(p, datum));
            assert_relative_eq!(analytic, numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn parameters_round_trip() {
        let estimator = KnownFrameGyroscope::new();
        let model = truth();
        let p = estimator.model_to_parameters(&model);
        assert_eq!(p.len(), 21);
        assert_eq!(estimator.parameters_to_model(&p).unwrap(), model);
    }
}
