//! Core robust-estimation traits and pipeline.
//!
//! The five consensus variants (RANSAC, LMedS, MSAC, PROSAC, PROMedS) share a
//! single loop: draw a minimal subset, ask the [`Estimator`] for candidate
//! models, score each candidate against every sample, keep the best one and
//! shrink the iteration budget as the consensus improves. What differs between
//! the variants is only
//! - the [`Sampler`] (uniform or quality-ordered),
//! - the [`Scoring`] rule (inlier count, truncated quadratic or median),
//! - the [`TerminationCriterion`] (adaptive bound, plus a median stop rule).
//!
//! [`RobustEstimator`] orchestrates these components; `crate::choices`
//! selects them at runtime from a [`RobustMethod`](crate::settings::RobustMethod).

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::scoring::Score;
use crate::settings::RobustSettings;

/// Minimal-solution plugin: produces candidate models from small subsets and
/// scores single measurements against a candidate.
pub trait Estimator {
    /// Measurement type the estimator consumes.
    type Datum;
    /// Candidate parameter estimate.
    type Model: Clone;

    /// Number of measurements needed to produce a candidate.
    fn sample_size(&self) -> usize;

    /// Cheap pre-check on a drawn subset before solving.
    fn is_valid_sample(&self, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        true
    }

    /// Candidate models for the measurements at `sample`.
    ///
    /// Degenerate subsets yield an empty vector; this must never panic.
    /// Models with several algebraic solutions may return more than one.
    fn estimate_model(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model>;

    /// Non-negative residual of `datum` under `model`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Rejects measurements the estimator cannot use, e.g. negative
    /// distances or standard deviations.
    fn validate_datum(&self, _datum: &Self::Datum) -> Result<()> {
        Ok(())
    }
}

impl<E: Estimator + ?Sized> Estimator for &E {
    type Datum = E::Datum;
    type Model = E::Model;

    fn sample_size(&self) -> usize {
        (**self).sample_size()
    }

    fn is_valid_sample(&self, data: &[Self::Datum], sample: &[usize]) -> bool {
        (**self).is_valid_sample(data, sample)
    }

    fn estimate_model(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model> {
        (**self).estimate_model(data, sample)
    }

    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64 {
        (**self).residual(model, datum)
    }

    fn validate_datum(&self, datum: &Self::Datum) -> Result<()> {
        (**self).validate_datum(datum)
    }
}

/// Sampler responsible for drawing minimal subsets.
pub trait Sampler {
    /// Whether the sampler can serve a population of `point_count` samples.
    fn is_ready(&self, point_count: usize) -> bool {
        point_count > 0
    }

    /// Draw `sample_size` distinct indices in `[0, point_count)` into
    /// `out_indices`.
    ///
    /// Returns `false` if no valid subset could be drawn.
    fn sample(
        &mut self,
        point_count: usize,
        sample_size: usize,
        out_indices: &mut [usize],
    ) -> bool;
}

/// Scoring rule turning the residuals of one candidate into a comparable
/// [`Score`] (greater is better).
pub trait Scoring {
    fn score(&self, residuals: &[f64], sample_size: usize) -> Score;
}

/// Decides when the consensus loop can stop.
pub trait TerminationCriterion {
    /// Called every time the best score improves.
    ///
    /// May lower `max_iterations`; returns `true` to stop immediately.
    fn check(
        &mut self,
        point_count: usize,
        best_score: &Score,
        sample_size: usize,
        max_iterations: &mut usize,
    ) -> bool;
}

/// Number of trials needed to draw at least one all-inlier subset with the
/// given `confidence`: `log(1 - confidence) / log(1 - w^s)`.
///
/// Returns `None` when the ratio carries no information (`w <= 0`).
pub fn required_iterations(
    confidence: f64,
    inlier_ratio: f64,
    sample_size: usize,
) -> Option<usize> {
    if inlier_ratio.is_nan() || inlier_ratio <= 0.0 {
        return None;
    }
    if inlier_ratio >= 1.0 {
        return Some(1);
    }

    let p_good_sample = inlier_ratio.powi(sample_size as i32);
    if p_good_sample <= 0.0 {
        return None;
    }
    if p_good_sample >= 1.0 {
        return Some(1);
    }

    let log_one_minus_conf = (1.0 - confidence).ln();
    let log_one_minus_p = (-p_good_sample).ln_1p();
    if !log_one_minus_conf.is_finite() || !log_one_minus_p.is_finite() || log_one_minus_p >= 0.0 {
        return None;
    }

    let required = (log_one_minus_conf / log_one_minus_p).ceil().max(1.0);
    if required >= usize::MAX as f64 {
        None
    } else {
        Some(required as usize)
    }
}

/// Standard RANSAC adaptive bound driven by the current best inlier ratio.
#[derive(Debug, Clone, Copy)]
pub struct RansacTerminationCriterion {
    /// Desired confidence in (0, 1).
    pub confidence: f64,
}

impl TerminationCriterion for RansacTerminationCriterion {
    fn check(
        &mut self,
        point_count: usize,
        best_score: &Score,
        sample_size: usize,
        max_iterations: &mut usize,
    ) -> bool {
        if point_count == 0 {
            return false;
        }

        let inlier_ratio = best_score.inlier_count as f64 / point_count as f64;
        if let Some(required) = required_iterations(self.confidence, inlier_ratio, sample_size) {
            if required < *max_iterations {
                trace!("iteration budget shrinks from {} to {}", max_iterations, required);
                *max_iterations = required;
            }
        }

        // The outer loop stops once the (possibly lowered) budget is spent.
        false
    }
}

/// Adaptive bound plus an immediate stop once the best median residual drops
/// below `stop_threshold`.
#[derive(Debug, Clone, Copy)]
pub struct MedianTerminationCriterion {
    pub confidence: f64,
    pub stop_threshold: f64,
}

impl TerminationCriterion for MedianTerminationCriterion {
    fn check(
        &mut self,
        point_count: usize,
        best_score: &Score,
        sample_size: usize,
        max_iterations: &mut usize,
    ) -> bool {
        if best_score.median_residual() <= self.stop_threshold {
            trace!(
                "median residual {} below stop threshold {}",
                best_score.median_residual(),
                self.stop_threshold
            );
            return true;
        }
        RansacTerminationCriterion {
            confidence: self.confidence,
        }
        .check(point_count, best_score, sample_size, max_iterations)
    }
}

/// Observer notified synchronously from the estimation loop.
pub trait EstimatorListener {
    fn on_estimate_start(&mut self) {}
    fn on_estimate_end(&mut self) {}
    fn on_estimate_next_iteration(&mut self, _iteration: usize) {}
    fn on_estimate_progress_change(&mut self, _progress: f32) {}
}

/// Listener that ignores every event.
pub struct NoopListener;

impl EstimatorListener for NoopListener {}

/// Best candidate of a run together with its consensus set.
#[derive(Debug, Clone)]
pub struct Consensus<M> {
    pub model: M,
    pub score: Score,
    /// Residual of every sample under `model`.
    pub residuals: Vec<f64>,
    /// Inlier membership of every sample under `score.threshold`.
    pub inliers: Vec<bool>,
    /// Number of trials performed.
    pub iterations: usize,
}

impl<M> Consensus<M> {
    /// Threshold used to classify inliers (fixed or estimated).
    pub fn threshold(&self) -> f64 {
        self.score.threshold
    }

    pub fn inlier_count(&self) -> usize {
        self.score.inlier_count
    }

    pub fn inlier_indices(&self) -> Vec<usize> {
        self.inliers
            .iter()
            .enumerate()
            .filter_map(|(i, &inlier)| inlier.then_some(i))
            .collect()
    }
}

/// Generic consensus pipeline.
///
/// One instance serves one run; it holds no state worth keeping once
/// [`run`](Self::run) returns besides the iteration counter.
pub struct RobustEstimator<E, Sa, Sc, T>
where
    E: Estimator,
    Sa: Sampler,
    Sc: Scoring,
    T: TerminationCriterion,
{
    pub estimator: E,
    pub sampler: Sa,
    pub scoring: Sc,
    pub termination: T,
    pub max_iterations: usize,
    pub progress_delta: f32,
    pub iteration: usize,
}

impl<E, Sa, Sc, T> RobustEstimator<E, Sa, Sc, T>
where
    E: Estimator,
    Sa: Sampler,
    Sc: Scoring,
    T: TerminationCriterion,
{
    pub fn new(
        settings: &RobustSettings,
        estimator: E,
        sampler: Sa,
        scoring: Sc,
        termination: T,
    ) -> Self {
        Self {
            estimator,
            sampler,
            scoring,
            termination,
            max_iterations: settings.max_iterations(),
            progress_delta: settings.progress_delta(),
            iteration: 0,
        }
    }

    /// Whether `point_count` samples are enough to start a run.
    pub fn is_ready(&self, point_count: usize) -> bool {
        let sample_size = self.estimator.sample_size();
        sample_size > 0 && point_count >= sample_size && self.sampler.is_ready(point_count)
    }

    pub fn run(&mut self, data: &[E::Datum]) -> Result<Consensus<E::Model>> {
        self.run_with_listener(data, &mut NoopListener)
    }

    /// Run the consensus loop over `data`, reporting to `listener`.
    pub fn run_with_listener(
        &mut self,
        data: &[E::Datum],
        listener: &mut dyn EstimatorListener,
    ) -> Result<Consensus<E::Model>> {
        let point_count = data.len();
        let sample_size = self.estimator.sample_size();
        if !self.is_ready(point_count) {
            return Err(Error::NotReady(format!(
                "{point_count} samples cannot feed subsets of {sample_size}"
            )));
        }

        listener.on_estimate_start();
        debug!(
            "robust estimation over {} samples, subset size {}, at most {} iterations",
            point_count, sample_size, self.max_iterations
        );

        let mut sample = vec![0usize; sample_size];
        let mut residuals = vec![0.0; point_count];
        let mut best_residuals = vec![0.0; point_count];
        let mut best: Option<(E::Model, Score)> = None;

        let mut max_iterations = self.max_iterations;
        let mut previous_progress = 0.0f32;
        self.iteration = 0;

        while self.iteration < max_iterations {
            let mut stop = false;

            if self.sampler.sample(point_count, sample_size, &mut sample)
                && self.estimator.is_valid_sample(data, &sample)
            {
                let mut improved = false;

                for model in self.estimator.estimate_model(data, &sample) {
                    for (r, datum) in residuals.iter_mut().zip(data) {
                        *r = self.estimator.residual(&model, datum);
                    }

                    let score = self.scoring.score(&residuals, sample_size);
                    if !score.is_valid() {
                        continue;
                    }

                    let better = match &best {
                        None => true,
                        Some((_, best_score)) => score > *best_score,
                    };
                    if better {
                        trace!(
                            "iteration {}: new best with {} inliers (value {})",
                            self.iteration,
                            score.inlier_count,
                            score.value
                        );
                        std::mem::swap(&mut residuals, &mut best_residuals);
                        best = Some((model, score));
                        improved = true;
                    }
                }

                if improved {
                    if let Some((_, best_score)) = &best {
                        stop = self.termination.check(
                            point_count,
                            best_score,
                            sample_size,
                            &mut max_iterations,
                        );
                    }
                }
            }

            self.iteration += 1;
            listener.on_estimate_next_iteration(self.iteration);

            let progress = (self.iteration as f32 / max_iterations.max(1) as f32).min(1.0);
            if progress - previous_progress >= self.progress_delta {
                previous_progress = progress;
                listener.on_estimate_progress_change(progress);
            }

            if stop {
                break;
            }
        }

        let (model, score) = match best {
            Some((model, score)) if score.inlier_count > 0 => (model, score),
            _ => {
                debug!("no usable candidate after {} iterations", self.iteration);
                return Err(Error::EstimationFailed {
                    iterations: self.iteration,
                });
            }
        };

        let inliers = best_residuals
            .iter()
            .map(|&r| r <= score.threshold)
            .collect();

        debug!(
            "robust estimation finished after {} iterations: {} / {} inliers, threshold {}",
            self.iteration, score.inlier_count, point_count, score.threshold
        );
        listener.on_estimate_end();

        Ok(Consensus {
            model,
            score,
            residuals: best_residuals,
            inliers,
            iterations: self.iteration,
        })
    }
}
