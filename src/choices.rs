//! Runtime wrappers exposing the built-in components through enums while
//! [`RobustEstimator`](crate::core::RobustEstimator) stays fully generic.
//!
//! [`MethodComponents::for_method`] maps a [`RobustMethod`] to the sampler,
//! scoring and termination triple it uses. Custom components plug into
//! [`RobustEstimator`](crate::core::RobustEstimator) directly.

use crate::core::{
    MedianTerminationCriterion, RansacTerminationCriterion, Sampler, Scoring,
    TerminationCriterion,
};
use crate::error::{Error, Result};
use crate::samplers::{ProsacSampler, UniformRandomSampler};
use crate::scoring::{InlierCountScoring, MedianScoring, Score, TruncatedQuadraticScoring};
use crate::settings::{RobustMethod, RobustSettings};

/// Runtime sampler selection.
pub enum SamplerChoice {
    Uniform(UniformRandomSampler),
    Prosac(ProsacSampler),
}

impl Sampler for SamplerChoice {
    fn is_ready(&self, point_count: usize) -> bool {
        match self {
            SamplerChoice::Uniform(s) => s.is_ready(point_count),
            SamplerChoice::Prosac(s) => s.is_ready(point_count),
        }
    }

    fn sample(
        &mut self,
        point_count: usize,
        sample_size: usize,
        out_indices: &mut [usize],
    ) -> bool {
        match self {
            SamplerChoice::Uniform(s) => s.sample(point_count, sample_size, out_indices),
            SamplerChoice::Prosac(s) => s.sample(point_count, sample_size, out_indices),
        }
    }
}

/// Runtime scoring selection.
pub enum ScoringChoice {
    InlierCount(InlierCountScoring),
    TruncatedQuadratic(TruncatedQuadraticScoring),
    Median(MedianScoring),
}

impl Scoring for ScoringChoice {
    fn score(&self, residuals: &[f64], sample_size: usize) -> Score {
        match self {
            ScoringChoice::InlierCount(s) => s.score(residuals, sample_size),
            ScoringChoice::TruncatedQuadratic(s) => s.score(residuals, sample_size),
            ScoringChoice::Median(s) => s.score(residuals, sample_size),
        }
    }
}

/// Runtime termination selection.
pub enum TerminationChoice {
    Ransac(RansacTerminationCriterion),
    Median(MedianTerminationCriterion),
}

impl TerminationCriterion for TerminationChoice {
    fn check(
        &mut self,
        point_count: usize,
        best_score: &Score,
        sample_size: usize,
        max_iterations: &mut usize,
    ) -> bool {
        match self {
            TerminationChoice::Ransac(t) => {
                t.check(point_count, best_score, sample_size, max_iterations)
            }
            TerminationChoice::Median(t) => {
                t.check(point_count, best_score, sample_size, max_iterations)
            }
        }
    }
}

/// Sampler, scoring and termination used by one robust method.
pub struct MethodComponents {
    pub sampler: SamplerChoice,
    pub scoring: ScoringChoice,
    pub termination: TerminationChoice,
}

impl MethodComponents {
    /// Components for `method` configured from `settings`.
    ///
    /// PROSAC and PROMedS need one quality score per measurement.
    pub fn for_method(
        method: RobustMethod,
        settings: &RobustSettings,
        quality_scores: Option<&[f64]>,
    ) -> Result<Self> {
        let sampler = if method.requires_quality_scores() {
            let scores = quality_scores.ok_or_else(|| {
                Error::NotReady(format!("{method} requires quality scores"))
            })?;
            SamplerChoice::Prosac(ProsacSampler::new(
                scores,
                settings.seed(),
                settings.max_iterations(),
            ))
        } else {
            SamplerChoice::Uniform(UniformRandomSampler::from_optional_seed(settings.seed()))
        };

        let scoring = match method {
            RobustMethod::Ransac | RobustMethod::Prosac => {
                ScoringChoice::InlierCount(InlierCountScoring::new(settings.threshold()))
            }
            RobustMethod::Msac => ScoringChoice::TruncatedQuadratic(
                TruncatedQuadraticScoring::new(settings.threshold()),
            ),
            RobustMethod::Lmeds | RobustMethod::Promeds => ScoringChoice::Median(
                MedianScoring::new(settings.inlier_factor(), settings.stop_threshold()),
            ),
        };

        let termination = if method.uses_median() {
            TerminationChoice::Median(MedianTerminationCriterion {
                confidence: settings.confidence(),
                stop_threshold: settings.stop_threshold(),
            })
        } else {
            TerminationChoice::Ransac(RansacTerminationCriterion {
                confidence: settings.confidence(),
            })
        };

        Ok(Self {
            sampler,
            scoring,
            termination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_map_to_expected_components() {
        let settings = RobustSettings::default();
        let quality = [1.0, 2.0, 3.0];

        for method in RobustMethod::ALL {
            let c = MethodComponents::for_method(method, &settings, Some(&quality)).unwrap();
            let prosac = matches!(c.sampler, SamplerChoice::Prosac(_));
            assert_eq!(prosac, method.requires_quality_scores(), "{method}");

            let median_scoring = matches!(c.scoring, ScoringChoice::Median(_));
            let median_stop = matches!(c.termination, TerminationChoice::Median(_));
            assert_eq!(median_scoring, method.uses_median(), "{method}");
            assert_eq!(median_stop, method.uses_median(), "{method}");
        }

        let msac = MethodComponents::for_method(RobustMethod::Msac, &settings, None).unwrap();
        assert!(matches!(msac.scoring, ScoringChoice::TruncatedQuadratic(_)));
    }

    #[test]
    fn progressive_methods_need_quality_scores() {
        let settings = RobustSettings::default();
        for method in [RobustMethod::Prosac, RobustMethod::Promeds] {
            let err = MethodComponents::for_method(method, &settings, None)
                .err()
                .unwrap();
            assert!(matches!(err, Error::NotReady(_)));
        }
    }
}
