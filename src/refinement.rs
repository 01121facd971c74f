//! Non-linear refinement of the best consensus candidate.
//!
//! The refinement pass polishes a candidate over its inlier set with
//! Levenberg-Marquardt (`levenberg-marquardt` crate) and optionally derives the
//! parameter covariance from the final jacobian. Measurement standard
//! deviations, when a plugin reports them, weight the residual rows by `1/σ`.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};

use crate::core::Estimator;
use crate::error::{Error, Result};
use crate::settings::RefineOptions;
use crate::types::{DenseMatrix, ParamVector, Real};

/// Relative step used by the central-difference jacobian.
const NUMERIC_JACOBIAN_STEP: Real = 1e-6;

/// Singular values below this fraction of the largest are dropped by the
/// covariance pseudo-inverse.
const COVARIANCE_RCOND: Real = 1e-12;

/// An [`Estimator`] whose models can be flattened into a parameter vector and
/// polished by non-linear least squares.
pub trait Refinable: Estimator {
    /// Length of the parameter vector.
    fn parameter_count(&self) -> usize;

    /// Number of residual terms one measurement contributes.
    fn residual_dimension(&self) -> usize {
        1
    }

    fn model_to_parameters(&self, model: &Self::Model) -> ParamVector;

    /// Model for `params`, or `None` if the parameters are degenerate.
    fn parameters_to_model(&self, params: &ParamVector) -> Option<Self::Model>;

    /// Signed residual terms of `datum` (length [`residual_dimension`]).
    ///
    /// [`residual_dimension`]: Refinable::residual_dimension
    fn residual_terms(&self, params: &ParamVector, datum: &Self::Datum) -> DVector<Real>;

    /// Jacobian of [`residual_terms`](Refinable::residual_terms) with respect to
    /// the parameters. Defaults to central differences.
    fn jacobian_terms(&self, params: &ParamVector, datum: &Self::Datum) -> DenseMatrix {
        numeric_jacobian(params, self.residual_dimension(), |p| {
            self.residual_terms(p, datum)
        })
    }

    /// Standard deviation of `datum`, if known.
    fn standard_deviation(&self, _datum: &Self::Datum) -> Option<Real> {
        None
    }
}

/// Central-difference jacobian of `f` at `params`.
pub fn numeric_jacobian<F>(params: &ParamVector, rows: usize, f: F) -> DenseMatrix
where
    F: Fn(&ParamVector) -> DVector<Real>,
{
    let mut jac = DMatrix::zeros(rows, params.len());
    let mut p = params.clone();
    for j in 0..params.len() {
        let h = NUMERIC_JACOBIAN_STEP * params[j].abs().max(1.0);
        p[j] = params[j] + h;
        let plus = f(&p);
        p[j] = params[j] - h;
        let minus = f(&p);
        p[j] = params[j];
        jac.set_column(j, &((plus - minus) / (2.0 * h)));
    }
    jac
}

/// Outcome of a refinement pass.
#[derive(Debug, Clone)]
pub struct Refined<M> {
    pub model: M,
    /// Parameter covariance, when requested.
    pub covariance: Option<DenseMatrix>,
    /// Half the weighted sum of squared residuals at the solution.
    pub cost: Real,
    pub evaluations: usize,
}

struct LmWrapper<'a, P: Refinable> {
    problem: &'a P,
    data: &'a [P::Datum],
    indices: &'a [usize],
    weights: Vec<Real>,
    params: DVector<Real>,
}

impl<'a, P: Refinable> LmWrapper<'a, P> {
    fn cost(&self) -> Option<Real> {
        let r = self.residuals()?;
        let cost = 0.5 * r.norm_squared();
        cost.is_finite().then_some(cost)
    }
}

impl<'a, P: Refinable> LeastSquaresProblem<Real, Dyn, Dyn> for LmWrapper<'a, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        let dim = self.problem.residual_dimension();
        let mut out = DVector::zeros(self.indices.len() * dim);
        for (row, (&i, &w)) in self.indices.iter().zip(&self.weights).enumerate() {
            let terms = self.problem.residual_terms(&self.params, &self.data[i]);
            if terms.len() != dim || terms.iter().any(|v| !v.is_finite()) {
                return None;
            }
            out.rows_mut(row * dim, dim).copy_from(&(terms * w));
        }
        Some(out)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        let dim = self.problem.residual_dimension();
        let n_params = self.params.len();
        let mut out = DMatrix::zeros(self.indices.len() * dim, n_params);
        for (row, (&i, &w)) in self.indices.iter().zip(&self.weights).enumerate() {
            let jac = self.problem.jacobian_terms(&self.params, &self.data[i]);
            if jac.shape() != (dim, n_params) || jac.iter().any(|v| !v.is_finite()) {
                return None;
            }
            out.view_mut((row * dim, 0), (dim, n_params))
                .copy_from(&(jac * w));
        }
        Some(out)
    }
}

/// Levenberg-Marquardt refinement pass.
#[derive(Debug, Clone, Default)]
pub struct LmRefiner {
    pub options: RefineOptions,
}

impl LmRefiner {
    pub fn new(options: RefineOptions) -> Self {
        Self { options }
    }

    /// Refine `initial` over the measurements at `indices`.
    pub fn refine<P: Refinable>(
        &self,
        problem: &P,
        data: &[P::Datum],
        indices: &[usize],
        initial: &P::Model,
        keep_covariance: bool,
    ) -> Result<Refined<P::Model>> {
        let n_params = problem.parameter_count();
        let n_rows = indices.len() * problem.residual_dimension();
        if n_rows < n_params {
            return Err(Error::Refinement(format!(
                "{n_rows} residuals cannot constrain {n_params} parameters"
            )));
        }
        if indices.iter().any(|&i| i >= data.len()) {
            return Err(Error::Refinement("inlier index out of range".into()));
        }

        let weights = indices
            .iter()
            .map(|&i| match problem.standard_deviation(&data[i]) {
                Some(sd) if sd > 0.0 && sd.is_finite() => 1.0 / sd,
                _ => 1.0,
            })
            .collect();

        let wrapper = LmWrapper {
            problem,
            data,
            indices,
            weights,
            params: problem.model_to_parameters(initial),
        };
        let initial_cost = wrapper
            .cost()
            .ok_or_else(|| Error::Refinement("initial residuals are not finite".into()))?;

        let lm = LevenbergMarquardt::new()
            .with_ftol(self.options.ftol)
            .with_xtol(self.options.xtol)
            .with_gtol(self.options.gtol)
            .with_patience(self.options.max_iterations.max(1));
        let (wrapper, report) = lm.minimize(wrapper);

        if !report.termination.was_successful()
            && !matches!(report.termination, TerminationReason::NoImprovementPossible(_))
        {
            return Err(Error::Refinement(format!(
                "solver stopped with {:?}",
                report.termination
            )));
        }

        let cost = wrapper
            .cost()
            .ok_or_else(|| Error::Refinement("refined residuals are not finite".into()))?;
        if cost > initial_cost {
            return Err(Error::Refinement(format!(
                "cost increased from {initial_cost} to {cost}"
            )));
        }

        let params = wrapper.params();
        let model = problem
            .parameters_to_model(&params)
            .ok_or_else(|| Error::Refinement("refined parameters are degenerate".into()))?;

        let covariance = if keep_covariance {
            let jac = wrapper
                .jacobian()
                .ok_or_else(|| Error::Refinement("jacobian is not finite".into()))?;
            Some(covariance_from_jacobian(&jac)?)
        } else {
            None
        };

        debug!(
            "refinement over {} measurements: cost {} -> {} in {} evaluations",
            indices.len(),
            initial_cost,
            cost,
            report.number_of_evaluations
        );

        Ok(Refined {
            model,
            covariance,
            cost,
            evaluations: report.number_of_evaluations,
        })
    }
}

/// Pseudo-inverse of the normal matrix `JᵀJ`.
pub fn covariance_from_jacobian(jacobian: &DenseMatrix) -> Result<DenseMatrix> {
    let normal = jacobian.transpose() * jacobian;
    let scale = normal.amax().max(Real::MIN_POSITIVE);
    normal
        .pseudo_inverse(COVARIANCE_RCOND * scale)
        .map_err(|e| Error::Refinement(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Line `y = a x + b` through (x, y) points; minimal sample of two.
    struct LineFit;

    impl Estimator for LineFit {
        type Datum = (f64, f64, Option<f64>);
        type Model = (f64, f64);

        fn sample_size(&self) -> usize {
            2
        }

        fn estimate_model(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<(f64, f64)> {
            let (x0, y0, _) = data[sample[0]];
            let (x1, y1, _) = data[sample[1]];
            if (x1 - x0).abs() < 1e-12 {
                return Vec::new();
            }
            let a = (y1 - y0) / (x1 - x0);
            vec![(a, y0 - a * x0)]
        }

        fn residual(&self, model: &(f64, f64), datum: &Self::Datum) -> f64 {
            (model.0 * datum.0 + model.1 - datum.1).abs()
        }
    }

    impl Refinable for LineFit {
        fn parameter_count(&self) -> usize {
            2
        }

        fn model_to_parameters(&self, model: &(f64, f64)) -> ParamVector {
            DVector::from_vec(vec![model.0, model.1])
        }

        fn parameters_to_model(&self, params: &ParamVector) -> Option<(f64, f64)> {
            Some((params[0], params[1]))
        }

        fn residual_terms(&self, params: &ParamVector, datum: &Self::Datum) -> DVector<Real> {
            DVector::from_element(1, params[0] * datum.0 + params[1] - datum.1)
        }

        fn standard_deviation(&self, datum: &Self::Datum) -> Option<Real> {
            datum.2
        }
    }

    fn noisy_line() -> Vec<(f64, f64, Option<f64>)> {
        let noise = [0.01, -0.02, 0.015, -0.005, 0.0, 0.01, -0.01];
        noise
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let x = i as f64;
                (x, 2.0 * x + 1.0 + e, None)
            })
            .collect()
    }

    #[test]
    fn refinement_reduces_cost_towards_least_squares() {
        let data = noisy_line();
        let indices: Vec<usize> = (0..data.len()).collect();
        let refined = LmRefiner::default()
            .refine(&LineFit, &data, &indices, &(1.9, 1.2), true)
            .unwrap();

        assert_relative_eq!(refined.model.0, 2.0, epsilon = 1e-2);
        assert_relative_eq!(refined.model.1, 1.0, epsilon = 3e-2);

        let cov = refined.covariance.unwrap();
        assert_eq!(cov.shape(), (2, 2));
        assert!(cov[(0, 0)] > 0.0 && cov[(1, 1)] > 0.0);
        assert_relative_eq!(cov[(0, 1)], cov[(1, 0)], epsilon = 1e-12);
    }

    #[test]
    fn weights_scale_the_covariance() {
        let mut data = noisy_line();
        let indices: Vec<usize> = (0..data.len()).collect();
        let unit = LmRefiner::default()
            .refine(&LineFit, &data, &indices, &(2.0, 1.0), true)
            .unwrap();

        for d in &mut data {
            d.2 = Some(0.1);
        }
        let weighted = LmRefiner::default()
            .refine(&LineFit, &data, &indices, &(2.0, 1.0), true)
            .unwrap();

        let ratio = weighted.covariance.unwrap()[(0, 0)] / unit.covariance.unwrap()[(0, 0)];
        assert_relative_eq!(ratio, 0.01, epsilon = 1e-6);
    }

    #[test]
    fn underdetermined_problem_is_rejected() {
        let data = noisy_line();
        let err = LmRefiner::default()
            .refine(&LineFit, &data, &[0], &(2.0, 1.0), false)
            .unwrap_err();
        assert!(matches!(err, Error::Refinement(_)));
    }

    #[test]
    fn numeric_jacobian_matches_analytic() {
        let params = DVector::from_vec(vec![1.5, -0.5]);
        let jac = LineFit.jacobian_terms(&params, &(3.0, 0.0, None));
        assert_relative_eq!(jac[(0, 0)], 3.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(0, 1)], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn covariance_of_rank_deficient_jacobian_stays_finite() {
        let jac = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let cov = covariance_from_jacobian(&jac).unwrap();
        assert!(cov.iter().all(|v| v.is_finite()));
    }
}
