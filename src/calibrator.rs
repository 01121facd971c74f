//! Calibrator / solver facade.
//!
//! [`RobustCalibrator`] owns the measurements, quality scores, settings and
//! results of one calibration problem and runs the robust estimator followed
//! by the refinement pass. Every mutator takes `&self` and fails with
//! [`Error::Locked`] while a run is in progress, which is what makes the
//! facade safe to hand to its own listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::choices::MethodComponents;
use crate::core::{Estimator, EstimatorListener, RobustEstimator};
use crate::error::{Error, Result};
use crate::inliers::InliersData;
use crate::refinement::{LmRefiner, Refinable};
use crate::settings::{RefineOptions, RobustMethod, RobustSettings};
use crate::types::DenseMatrix;

/// Observer of a calibration run.
///
/// Callbacks fire synchronously on the thread calling
/// [`RobustCalibrator::calibrate`]. The calibrator is passed back so that
/// results and settings can be inspected; mutating it from a callback fails
/// with [`Error::Locked`].
pub trait CalibratorListener<P: Refinable>: Send + Sync {
    fn on_calibrate_start(&self, _calibrator: &RobustCalibrator<P>) {}
    fn on_calibrate_end(&self, _calibrator: &RobustCalibrator<P>) {}
    fn on_calibrate_next_iteration(&self, _calibrator: &RobustCalibrator<P>, _iteration: usize) {}
    fn on_calibrate_progress_change(&self, _calibrator: &RobustCalibrator<P>, _progress: f32) {}
}

struct State<P: Refinable> {
    estimator: Arc<P>,
    measurements: Arc<Vec<P::Datum>>,
    quality_scores: Option<Arc<Vec<f64>>>,
    settings: RobustSettings,
    listener: Option<Arc<dyn CalibratorListener<P>>>,
    estimated: Option<P::Model>,
    covariance: Option<DenseMatrix>,
    inliers_data: Option<InliersData>,
}

impl<P: Refinable> State<P> {
    fn readiness(&self, method: RobustMethod) -> std::result::Result<(), String> {
        let count = self.measurements.len();
        let minimum = self.estimator.sample_size();
        if count < minimum {
            return Err(format!("{count} measurements, at least {minimum} required"));
        }
        if method.requires_quality_scores() {
            match &self.quality_scores {
                None => return Err(format!("{method} requires quality scores")),
                Some(q) if q.len() != count => {
                    return Err(format!(
                        "{} quality scores for {count} measurements",
                        q.len()
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn clear_results(&mut self) {
        self.estimated = None;
        self.covariance = None;
        self.inliers_data = None;
    }
}

/// Clears the running flag when the run ends, including on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Forwards estimator events to the calibrator listener.
struct ListenerBridge<'a, P: Refinable> {
    calibrator: &'a RobustCalibrator<P>,
    listener: Option<Arc<dyn CalibratorListener<P>>>,
}

impl<P: Refinable> EstimatorListener for ListenerBridge<'_, P> {
    fn on_estimate_start(&mut self) {
        if let Some(l) = &self.listener {
            l.on_calibrate_start(self.calibrator);
        }
    }

    fn on_estimate_next_iteration(&mut self, iteration: usize) {
        if let Some(l) = &self.listener {
            l.on_calibrate_next_iteration(self.calibrator, iteration);
        }
    }

    fn on_estimate_progress_change(&mut self, progress: f32) {
        if let Some(l) = &self.listener {
            l.on_calibrate_progress_change(self.calibrator, progress);
        }
    }
}

/// Robust calibrator (or position solver) for one minimal-solution plugin.
pub struct RobustCalibrator<P: Refinable> {
    method: RobustMethod,
    running: AtomicBool,
    state: Mutex<State<P>>,
}

impl<P: Refinable> RobustCalibrator<P> {
    /// Calibrator with default settings and no measurements.
    pub fn new(estimator: P, method: RobustMethod) -> Self {
        Self {
            method,
            running: AtomicBool::new(false),
            state: Mutex::new(State {
                estimator: Arc::new(estimator),
                measurements: Arc::new(Vec::new()),
                quality_scores: None,
                settings: RobustSettings::default(),
                listener: None,
                estimated: None,
                covariance: None,
                inliers_data: None,
            }),
        }
    }

    pub fn builder(estimator: P) -> RobustCalibratorBuilder<P> {
        RobustCalibratorBuilder::new(estimator)
    }

    fn lock(&self) -> MutexGuard<'_, State<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the state unless a run is in progress.
    fn mutate<R>(&self, f: impl FnOnce(&mut State<P>) -> Result<R>) -> Result<R> {
        if self.is_running() {
            return Err(Error::Locked);
        }
        f(&mut self.lock())
    }

    fn update_settings(&self, f: impl FnOnce(&mut RobustSettings) -> Result<()>) -> Result<()> {
        self.mutate(|state| f(&mut state.settings))
    }

    /// Robust method this instance runs.
    pub fn method(&self) -> RobustMethod {
        self.method
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether enough measurements (and, for PROSAC / PROMedS, matching
    /// quality scores) are available.
    pub fn is_ready(&self) -> bool {
        self.lock().readiness(self.method).is_ok()
    }

    /// Subset size of the plugin, i.e. the minimum number of measurements.
    pub fn minimum_required_measurements(&self) -> usize {
        self.lock().estimator.sample_size()
    }

    pub fn estimator(&self) -> Arc<P> {
        Arc::clone(&self.lock().estimator)
    }

    pub fn set_estimator(&self, estimator: P) -> Result<()> {
        self.mutate(|state| {
            state.estimator = Arc::new(estimator);
            Ok(())
        })
    }

    pub fn measurements(&self) -> Arc<Vec<P::Datum>> {
        Arc::clone(&self.lock().measurements)
    }

    /// Replace the measurements after checking each one with
    /// [`Estimator::validate_datum`].
    ///
    /// The count is not checked here; too few measurements only make the
    /// calibrator not ready.
    pub fn set_measurements(&self, measurements: Vec<P::Datum>) -> Result<()> {
        self.mutate(|state| {
            validate_measurements(&*state.estimator, &measurements)?;
            state.measurements = Arc::new(measurements);
            Ok(())
        })
    }

    pub fn quality_scores(&self) -> Option<Arc<Vec<f64>>> {
        self.lock().quality_scores.clone()
    }

    /// Set per-measurement quality scores (greater is more trustworthy).
    ///
    /// At least [`minimum_required_measurements`](Self::minimum_required_measurements)
    /// non-negative finite scores are required.
    pub fn set_quality_scores(&self, quality_scores: Vec<f64>) -> Result<()> {
        self.mutate(|state| {
            validate_quality_scores(&quality_scores, state.estimator.sample_size())?;
            state.quality_scores = Some(Arc::new(quality_scores));
            Ok(())
        })
    }

    pub fn clear_quality_scores(&self) -> Result<()> {
        self.mutate(|state| {
            state.quality_scores = None;
            Ok(())
        })
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn CalibratorListener<P>>>) -> Result<()> {
        self.mutate(|state| {
            state.listener = listener;
            Ok(())
        })
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> RobustSettings {
        self.lock().settings.clone()
    }

    /// Replace every setting at once after validating them.
    pub fn set_settings(&self, settings: RobustSettings) -> Result<()> {
        self.mutate(|state| {
            settings.validate()?;
            state.settings = settings;
            Ok(())
        })
    }

    pub fn confidence(&self) -> f64 {
        self.lock().settings.confidence()
    }

    pub fn set_confidence(&self, confidence: f64) -> Result<()> {
        self.update_settings(|s| s.set_confidence(confidence))
    }

    pub fn max_iterations(&self) -> usize {
        self.lock().settings.max_iterations()
    }

    pub fn set_max_iterations(&self, max_iterations: usize) -> Result<()> {
        self.update_settings(|s| s.set_max_iterations(max_iterations))
    }

    pub fn progress_delta(&self) -> f32 {
        self.lock().settings.progress_delta()
    }

    pub fn set_progress_delta(&self, progress_delta: f32) -> Result<()> {
        self.update_settings(|s| s.set_progress_delta(progress_delta))
    }

    pub fn threshold(&self) -> f64 {
        self.lock().settings.threshold()
    }

    pub fn set_threshold(&self, threshold: f64) -> Result<()> {
        self.update_settings(|s| s.set_threshold(threshold))
    }

    pub fn stop_threshold(&self) -> f64 {
        self.lock().settings.stop_threshold()
    }

    pub fn set_stop_threshold(&self, stop_threshold: f64) -> Result<()> {
        self.update_settings(|s| s.set_stop_threshold(stop_threshold))
    }

    pub fn inlier_factor(&self) -> f64 {
        self.lock().settings.inlier_factor()
    }

    pub fn set_inlier_factor(&self, inlier_factor: f64) -> Result<()> {
        self.update_settings(|s| s.set_inlier_factor(inlier_factor))
    }

    pub fn compute_and_keep_inliers(&self) -> bool {
        self.lock().settings.compute_and_keep_inliers()
    }

    pub fn set_compute_and_keep_inliers(&self, keep: bool) -> Result<()> {
        self.update_settings(|s| {
            s.set_compute_and_keep_inliers(keep);
            Ok(())
        })
    }

    pub fn compute_and_keep_residuals(&self) -> bool {
        self.lock().settings.compute_and_keep_residuals()
    }

    pub fn set_compute_and_keep_residuals(&self, keep: bool) -> Result<()> {
        self.update_settings(|s| {
            s.set_compute_and_keep_residuals(keep);
            Ok(())
        })
    }

    pub fn refine_result(&self) -> bool {
        self.lock().settings.refine_result()
    }

    pub fn set_refine_result(&self, refine: bool) -> Result<()> {
        self.update_settings(|s| {
            s.set_refine_result(refine);
            Ok(())
        })
    }

    pub fn keep_covariance(&self) -> bool {
        self.lock().settings.keep_covariance()
    }

    pub fn set_keep_covariance(&self, keep: bool) -> Result<()> {
        self.update_settings(|s| {
            s.set_keep_covariance(keep);
            Ok(())
        })
    }

    pub fn set_seed(&self, seed: Option<u64>) -> Result<()> {
        self.update_settings(|s| {
            s.set_seed(seed);
            Ok(())
        })
    }

    pub fn set_refine_options(&self, options: RefineOptions) -> Result<()> {
        self.update_settings(|s| s.set_refine_options(options))
    }

    /// Model of the last successful run.
    pub fn estimated_model(&self) -> Option<P::Model> {
        self.lock().estimated.clone()
    }

    /// Parameter covariance of the last successful run, when refinement ran
    /// with `keep_covariance` and converged.
    pub fn estimated_covariance(&self) -> Option<DenseMatrix> {
        self.lock().covariance.clone()
    }

    pub fn inliers_data(&self) -> Option<InliersData> {
        self.lock().inliers_data.clone()
    }

    /// Alias of [`calibrate`](Self::calibrate) for position solvers.
    pub fn solve(&self) -> Result<P::Model> {
        self.calibrate()
    }

    /// Run the robust estimator and the refinement pass.
    ///
    /// Fails with [`Error::Locked`] if a run is already in progress and with
    /// [`Error::NotReady`] if the readiness preconditions are not met; in both
    /// cases the previous results are left untouched.
    pub fn calibrate(&self) -> Result<P::Model> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Locked);
        }
        let _guard = RunningGuard(&self.running);

        let (estimator, measurements, quality_scores, settings, listener) = {
            let mut state = self.lock();
            state.readiness(self.method).map_err(Error::NotReady)?;
            state.clear_results();
            (
                Arc::clone(&state.estimator),
                Arc::clone(&state.measurements),
                state.quality_scores.clone(),
                state.settings.clone(),
                state.listener.clone(),
            )
        };

        debug!(
            "{} calibration over {} measurements",
            self.method,
            measurements.len()
        );

        let components = MethodComponents::for_method(
            self.method,
            &settings,
            quality_scores.as_deref().map(Vec::as_slice),
        )?;
        let mut robust = RobustEstimator::new(
            &settings,
            &*estimator,
            components.sampler,
            components.scoring,
            components.termination,
        );
        let mut bridge = ListenerBridge {
            calibrator: self,
            listener: listener.clone(),
        };
        let consensus = robust.run_with_listener(&measurements, &mut bridge)?;

        let (model, covariance) = if settings.refine_result() {
            let refiner = LmRefiner::new(*settings.refine_options());
            match refiner.refine(
                &*estimator,
                &measurements,
                &consensus.inlier_indices(),
                &consensus.model,
                settings.keep_covariance(),
            ) {
                Ok(refined) => (refined.model, refined.covariance),
                Err(e) => {
                    warn!("keeping unrefined estimate: {e}");
                    (consensus.model.clone(), None)
                }
            }
        } else {
            (consensus.model.clone(), None)
        };

        let median_keep = self.method.uses_median() && settings.refine_result();
        let keep_inliers = settings.compute_and_keep_inliers() || median_keep;
        let keep_residuals = settings.compute_and_keep_residuals() || median_keep;
        let inliers_data = InliersData::new(
            keep_inliers.then(|| consensus.inliers.clone()),
            keep_residuals.then(|| consensus.residuals.clone()),
            consensus.threshold(),
            consensus.inlier_count(),
        );

        {
            let mut state = self.lock();
            state.estimated = Some(model.clone());
            state.covariance = covariance;
            state.inliers_data = Some(inliers_data);
        }

        if let Some(l) = &listener {
            l.on_calibrate_end(self);
        }
        Ok(model)
    }
}

fn validate_measurements<P: Refinable>(estimator: &P, measurements: &[P::Datum]) -> Result<()> {
    measurements
        .iter()
        .try_for_each(|datum| estimator.validate_datum(datum))
}

fn validate_quality_scores(scores: &[f64], minimum: usize) -> Result<()> {
    if scores.len() < minimum {
        return Err(Error::DimensionMismatch {
            what: "quality scores",
            expected: minimum,
            actual: scores.len(),
        });
    }
    if let Some(bad) = scores.iter().find(|q| !q.is_finite() || **q < 0.0) {
        return Err(Error::invalid(
            "quality_scores",
            format!("scores must be non-negative and finite, got {bad}"),
        ));
    }
    Ok(())
}

/// Builder collapsing the many optional inputs of a calibrator.
pub struct RobustCalibratorBuilder<P: Refinable> {
    estimator: P,
    method: RobustMethod,
    measurements: Vec<P::Datum>,
    quality_scores: Option<Vec<f64>>,
    settings: RobustSettings,
    listener: Option<Arc<dyn CalibratorListener<P>>>,
}

impl<P: Refinable> RobustCalibratorBuilder<P> {
    pub fn new(estimator: P) -> Self {
        Self {
            estimator,
            method: RobustMethod::default(),
            measurements: Vec::new(),
            quality_scores: None,
            settings: RobustSettings::default(),
            listener: None,
        }
    }

    pub fn method(mut self, method: RobustMethod) -> Self {
        self.method = method;
        self
    }

    pub fn measurements(mut self, measurements: Vec<P::Datum>) -> Self {
        self.measurements = measurements;
        self
    }

    pub fn quality_scores(mut self, quality_scores: Vec<f64>) -> Self {
        self.quality_scores = Some(quality_scores);
        self
    }

    pub fn settings(mut self, settings: RobustSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn CalibratorListener<P>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validate the collected inputs and build the calibrator.
    ///
    /// Each measurement and quality score is checked eagerly. The measurement
    /// count is left to [`RobustCalibrator::is_ready`], so an empty or short
    /// list can still be completed later with
    /// [`set_measurements`](RobustCalibrator::set_measurements).
    pub fn build(self) -> Result<RobustCalibrator<P>> {
        self.settings.validate()?;
        validate_measurements(&self.estimator, &self.measurements)?;
        if let Some(q) = &self.quality_scores {
            validate_quality_scores(q, self.estimator.sample_size())?;
        }

        let calibrator = RobustCalibrator::new(self.estimator, self.method);
        {
            let mut state = calibrator.lock();
            state.measurements = Arc::new(self.measurements);
            state.quality_scores = self.quality_scores.map(Arc::new);
            state.settings = self.settings;
            state.listener = self.listener;
        }
        Ok(calibrator)
    }
}
