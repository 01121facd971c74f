//! PROSAC sampler: progressively grows the subset of high-quality samples.

use crate::core::Sampler;
use crate::utils::UniformRandomGenerator;

/// PROSAC sampler.
///
/// Samples are ranked by quality score (highest first). Early draws come from
/// the top-ranked prefix, which grows following the PROSAC growth function;
/// once `ransac_convergence_iterations` draws have been made the sampler falls
/// back to uniform sampling over every measurement.
pub struct ProsacSampler {
    rng: UniformRandomGenerator<usize>,
    /// Measurement indices sorted by decreasing quality.
    ordering: Vec<usize>,
    growth_function: Vec<usize>,
    sample_size: Option<usize>,
    ransac_convergence_iterations: usize,
    kth_sample_number: usize,
    subset_size: usize,
}

impl ProsacSampler {
    /// Build from per-measurement quality scores (greater is better).
    pub fn new(
        quality_scores: &[f64],
        seed: Option<u64>,
        ransac_convergence_iterations: usize,
    ) -> Self {
        let mut ordering: Vec<usize> = (0..quality_scores.len()).collect();
        // Stable sort keeps the input order among equal scores.
        ordering.sort_by(|&a, &b| quality_scores[b].total_cmp(&quality_scores[a]));

        Self {
            rng: UniformRandomGenerator::from_optional_seed(seed),
            ordering,
            growth_function: Vec::new(),
            sample_size: None,
            ransac_convergence_iterations: ransac_convergence_iterations.max(1),
            kth_sample_number: 0,
            subset_size: 0,
        }
    }

    /// Measurement indices ordered from best to worst quality.
    pub fn ordering(&self) -> &[usize] {
        &self.ordering
    }

    fn point_number(&self) -> usize {
        self.ordering.len()
    }

    fn initialize(&mut self, sample_size: usize) {
        let point_number = self.point_number();
        self.sample_size = Some(sample_size);
        self.growth_function = vec![0; point_number];

        let mut t_n = self.ransac_convergence_iterations as f64;
        for i in 0..sample_size {
            t_n *= (sample_size - i) as f64 / (point_number - i) as f64;
        }

        let mut t_n_prime: usize = 1;
        for i in 0..point_number {
            if i < sample_size {
                self.growth_function[i] = t_n_prime;
                continue;
            }
            let t_n_plus1 = (i + 1) as f64 * t_n / (i + 1 - sample_size) as f64;
            self.growth_function[i] = t_n_prime + ((t_n_plus1 - t_n).ceil() as usize);
            t_n = t_n_plus1;
            t_n_prime = self.growth_function[i];
        }

        self.subset_size = sample_size;
        self.kth_sample_number = 0;
    }

    fn increment_iteration_number(&mut self) {
        self.kth_sample_number += 1;

        if self.kth_sample_number <= self.ransac_convergence_iterations
            && self.subset_size < self.point_number()
            && self.kth_sample_number > self.growth_function[self.subset_size - 1]
        {
            self.subset_size += 1;
        }
    }

}

impl Sampler for ProsacSampler {
    fn is_ready(&self, point_count: usize) -> bool {
        point_count > 0 && self.point_number() == point_count
    }

    fn sample(
        &mut self,
        point_count: usize,
        sample_size: usize,
        out_indices: &mut [usize],
    ) -> bool {
        if sample_size == 0
            || point_count == 0
            || sample_size > point_count
            || out_indices.len() < sample_size
            || !self.is_ready(point_count)
        {
            return false;
        }

        if self.sample_size != Some(sample_size) {
            self.initialize(sample_size);
        }

        self.increment_iteration_number();
        let out = &mut out_indices[..sample_size];

        if self.kth_sample_number > self.ransac_convergence_iterations {
            self.rng.gen_unique(out, 0, point_count - 1);
        } else if self.subset_size == sample_size {
            for (slot, rank) in out.iter_mut().zip(0..sample_size) {
                *slot = rank;
            }
        } else {
            // The newest member of the prefix is always drawn, the rest come
            // from the ranks before it.
            let newest = self.subset_size - 1;
            let (head, last) = out.split_at_mut(sample_size - 1);
            if !head.is_empty() {
                self.rng.gen_unique(head, 0, newest - 1);
            }
            last[0] = newest;
        }

        for slot in out.iter_mut() {
            *slot = self.ordering[*slot];
        }
        true
    }
}
