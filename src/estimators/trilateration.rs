//! Position estimation from ranging readings (trilateration).
//!
//! Each reading gives the distance `r_i` from an unknown position `x` to a
//! known center `c_i`. Subtracting the sphere equation of the first reading
//! from the others yields the linear system
//! `2 (c_i - c_0)ᵀ x = r_0² - r_i² + ‖c_i‖² - ‖c_0‖²`,
//! which `D + 1` readings in general position determine uniquely.

use nalgebra::{DMatrix, DVector, SVector};
use serde::{Deserialize, Serialize};

use crate::core::Estimator;
use crate::error::{Error, Result};
use crate::estimators::{solve_least_squares, validate_std_dev};
use crate::refinement::Refinable;
use crate::types::{DenseMatrix, ParamVector, Real};

/// Position in `D` dimensions.
pub type Point<const D: usize> = SVector<Real, D>;

/// Distance to a known center, e.g. from RSSI or time of flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingReading<const D: usize> {
    center: Point<D>,
    distance: Real,
    std_dev: Option<Real>,
}

impl<const D: usize> RangingReading<D> {
    pub fn new(center: Point<D>, distance: Real) -> Result<Self> {
        let reading = Self {
            center,
            distance,
            std_dev: None,
        };
        reading.validate()?;
        Ok(reading)
    }

    /// Checks a reading however it was built, including deserialized ones.
    pub fn validate(&self) -> Result<()> {
        if self.center.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid("center", "coordinates must be finite"));
        }
        if !self.distance.is_finite() || self.distance < 0.0 {
            return Err(Error::invalid(
                "distance",
                format!("must be non-negative, got {}", self.distance),
            ));
        }
        validate_std_dev(self.std_dev)
    }

    /// Attach the standard deviation of the distance.
    pub fn with_std_dev(mut self, std_dev: Real) -> Result<Self> {
        validate_std_dev(Some(std_dev))?;
        self.std_dev = Some(std_dev);
        Ok(self)
    }

    pub fn center(&self) -> &Point<D> {
        &self.center
    }

    pub fn distance(&self) -> Real {
        self.distance
    }

    pub fn std_dev(&self) -> Option<Real> {
        self.std_dev
    }
}

/// Linear trilateration solver in `D` dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Trilateration<const D: usize>;

pub type Trilateration2 = Trilateration<2>;
pub type Trilateration3 = Trilateration<3>;

impl<const D: usize> Trilateration<D> {
    pub fn new() -> Self {
        Self
    }

    fn signed_residual(position: &Point<D>, reading: &RangingReading<D>) -> Real {
        (position - reading.center).norm() - reading.distance
    }
}

impl<const D: usize> Estimator for Trilateration<D> {
    type Datum = RangingReading<D>;
    type Model = Point<D>;

    fn sample_size(&self) -> usize {
        D + 1
    }

    fn estimate_model(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model> {
        let Some((&first, rest)) = sample.split_first() else {
            return Vec::new();
        };
        let c0 = &data[first].center;
        let r0 = data[first].distance;

        let mut design = DMatrix::zeros(rest.len(), D);
        let mut rhs = DVector::zeros(rest.len());
        for (row, &i) in rest.iter().enumerate() {
            let ci = &data[i].center;
            let ri = data[i].distance;
            for k in 0..D {
                design[(row, k)] = 2.0 * (ci[k] - c0[k]);
            }
            rhs[row] = r0 * r0 - ri * ri + ci.norm_squared() - c0.norm_squared();
        }

        match solve_least_squares(design, &rhs) {
            Some(x) => vec![Point::<D>::from_iterator(x.iter().copied())],
            None => Vec::new(),
        }
    }

    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64 {
        Self::signed_residual(model, datum).abs()
    }

    fn validate_datum(&self, datum: &Self::Datum) -> Result<()> {
        datum.validate()
    }
}

impl<const D: usize> Refinable for Trilateration<D> {
    fn parameter_count(&self) -> usize {
        D
    }

    fn model_to_parameters(&self, model: &Self::Model) -> ParamVector {
        ParamVector::from_column_slice(model.as_slice())
    }

    fn parameters_to_model(&self, params: &ParamVector) -> Option<Self::Model> {
        (params.len() == D && params.iter().all(|v| v.is_finite()))
            .then(|| Point::<D>::from_iterator(params.iter().copied()))
    }

    fn residual_terms(&self, params: &ParamVector, datum: &Self::Datum) -> DVector<Real> {
        let mut diff_sq = 0.0;
        for k in 0..D {
            let d = params[k] - datum.center[k];
            diff_sq += d * d;
        }
        DVector::from_element(1, diff_sq.sqrt() - datum.distance)
    }

    fn jacobian_terms(&self, params: &ParamVector, datum: &Self::Datum) -> DenseMatrix {
        let mut jac = DenseMatrix::zeros(1, D);
        let diff: Vec<Real> = (0..D).map(|k| params[k] - datum.center[k]).collect();
        let norm = diff.iter().map(|d| d * d).sum::<Real>().sqrt();
        if norm > Real::EPSILON {
            for (k, d) in diff.into_iter().enumerate() {
                jac[(0, k)] = d / norm;
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
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    fn readings_3d(position: &Point<3>) -> Vec<RangingReading<3>> {
        [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(10.0, 10.0, 5.0),
        ]
        .into_iter()
        .map(|c| RangingReading::new(c, (position - c).norm()).unwrap())
        .collect()
    }

    #[test]
    fn solves_3d_position_from_four_readings() {
        let truth = Vector3::new(3.0, -2.0, 4.5);
        let data = readings_3d(&truth);
        let estimator = Trilateration3::new();
        assert_eq!(estimator.sample_size(), 4);

        let models = estimator.estimate_model(&data, &[0, 1, 2, 3]);
        assert_relative_eq!(models[0], truth, epsilon = 1e-10);
        assert!(estimator.residual(&models[0], &data[4]) < 1e-10);
    }

    #[test]
    fn solves_2d_position_from_three_readings() {
        let truth = Vector2::new(1.5, 2.5);
        let data: Vec<RangingReading<2>> = [
            Vector2::new(0.0, 0.0),
            Vector2::new(5.0, 0.0),
            Vector2::new(0.0, 5.0),
        ]
        .into_iter()
        .map(|c| RangingReading::new(c, (truth - c).norm()).unwrap())
        .collect();

        let models = Trilateration2::new().estimate_model(&data, &[0, 1, 2]);
        assert_relative_eq!(models[0], truth, epsilon = 1e-10);
    }

    #[test]
    fn collinear_centers_are_degenerate() {
        let data: Vec<RangingReading<2>> = [0.0, 1.0, 2.0]
            .into_iter()
            .map(|x| RangingReading::new(Vector2::new(x, 0.0), 1.0).unwrap())
            .collect();
        assert!(Trilateration2::new()
            .estimate_model(&data, &[0, 1, 2])
            .is_empty());
    }

    #[test]
    fn analytic_jacobian_matches_numeric() {
        let reading = RangingReading::new(Vector3::new(1.0, 2.0, 3.0), 4.0).unwrap();
        let params = ParamVector::from_vec(vec![-1.0, 0.5, 2.0]);
        let estimator = Trilateration3::new();
        let analytic = estimator.jacobian_terms(&params, &reading);
        let numeric = crate::refinement::numeric_jacobian(&params, 1, |p| {
            estimator.residual_terms(p, &reading)
        });
        assert_relative_eq!(analytic, numeric, epsilon = 1e-6);
    }

    #[test]
    fn rejects_invalid_readings() {
        assert!(RangingReading::new(Vector2::new(0.0, 0.0), -1.0).is_err());
        assert!(RangingReading::new(Vector2::new(f64::NAN, 0.0), 1.0).is_err());
        let reading = RangingReading::new(Vector2::new(0.0, 0.0), 1.0).unwrap();
        assert!(reading.clone().with_std_dev(0.0).is_err());
        assert_eq!(reading.with_std_dev(0.5).unwrap().std_dev(), Some(0.5));
    }
}
