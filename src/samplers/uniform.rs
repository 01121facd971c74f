//! Uniform random sampler drawing minimal samples without replacement.

use crate::core::Sampler;
use crate::utils::UniformRandomGenerator;

/// Uniform random sampler used by RANSAC, LMedS and MSAC.
pub struct UniformRandomSampler {
    rng: UniformRandomGenerator<usize>,
}

impl Default for UniformRandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformRandomSampler {
    /// Construct a new sampler with a random seed.
    pub fn new() -> Self {
        Self {
            rng: UniformRandomGenerator::new(),
        }
    }

    /// Construct a sampler from a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: UniformRandomGenerator::from_seed(seed),
        }
    }

    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        Self {
            rng: UniformRandomGenerator::from_optional_seed(seed),
        }
    }
}

impl Sampler for UniformRandomSampler {
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
        {
            return false;
        }

        self.rng
            .gen_unique(&mut out_indices[..sample_size], 0, point_count - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::UniformRandomSampler;
    use crate::core::Sampler;

    #[test]
    fn draws_distinct_indices_in_range() {
        let mut sampler = UniformRandomSampler::from_seed(5);
        let mut out = [0usize; 4];
        for _ in 0..50 {
            assert!(sampler.sample(10, 4, &mut out));
            assert!(out.iter().all(|&i| i < 10));
            let mut sorted = out;
            sorted.sort_unstable();
            assert!(sorted.windows(2).all(|w| w[0] != w[1]));
        }
    }

    #[test]
    fn rejects_oversized_subsets() {
        let mut sampler = UniformRandomSampler::from_seed(5);
        let mut out = [0usize; 4];
        assert!(!sampler.sample(3, 4, &mut out));
        assert!(!sampler.sample(10, 0, &mut out));
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = UniformRandomSampler::from_seed(9);
        let mut b = UniformRandomSampler::from_seed(9);
        let (mut x, mut y) = ([0usize; 3], [0usize; 3]);
        for _ in 0..10 {
            a.sample(20, 3, &mut x);
            b.sample(20, 3, &mut y);
            assert_eq!(x, y);
        }
    }
}
