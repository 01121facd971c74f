//! Miscellaneous utilities shared by samplers and scoring.

use rand::distributions::Uniform;
use rand::prelude::*;

/// Uniform integer random-number generator used by the subset samplers.
///
/// By default this uses an entropy-seeded RNG, but it can be constructed from
/// a fixed seed for reproducible runs.
pub struct UniformRandomGenerator<T>
where
    T: Copy + rand::distributions::uniform::SampleUniform + PartialOrd,
{
    rng: StdRng,
    _value: std::marker::PhantomData<T>,
}

impl<T> Default for UniformRandomGenerator<T>
where
    T: Copy + rand::distributions::uniform::SampleUniform + PartialOrd,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UniformRandomGenerator<T>
where
    T: Copy + rand::distributions::uniform::SampleUniform + PartialOrd,
{
    /// Construct with an entropy seed.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            _value: std::marker::PhantomData,
        }
    }

    /// Construct with a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            _value: std::marker::PhantomData,
        }
    }

    /// Seeded when `seed` is given, entropy-seeded otherwise.
    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::new, Self::from_seed)
    }

    /// Fill `out` with distinct values drawn from `[min, max]`.
    ///
    /// The range must hold at least `out.len()` distinct values; this is
    /// meant for the small minimal subsets the estimators ask for.
    pub fn gen_unique(&mut self, out: &mut [T], min: T, max: T)
    where
        T: Eq,
    {
        let dist = Uniform::new_inclusive(min, max);
        for i in 0..out.len() {
            loop {
                let candidate = self.rng.sample(&dist);
                if out[..i].iter().all(|&v| v != candidate) {
                    out[i] = candidate;
                    break;
                }
            }
        }
    }
}

/// Median of `values`, reordering the slice in place.
///
/// Even-length inputs average the two middle elements. Returns `None` for an
/// empty slice.
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        return Some(upper);
    }
    let lower_max = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(0.5 * (lower_max + upper))
}

#[cfg(test)]
mod tests {
    use super::{median_in_place, UniformRandomGenerator};

    #[test]
    fn unique_samples_within_bounds() {
        let mut rng = UniformRandomGenerator::<u32>::from_seed(1234);
        let mut buf = [0u32; 5];
        rng.gen_unique(&mut buf, 0, 10);

        assert!(buf.iter().all(|&v| v <= 10));
        for i in 0..buf.len() {
            for j in (i + 1)..buf.len() {
                assert_ne!(buf[i], buf[j]);
            }
        }
    }

    #[test]
    fn unique_samples_cover_a_tight_range() {
        let mut rng = UniformRandomGenerator::<usize>::from_seed(3);
        let mut buf = [0usize; 4];
        rng.gen_unique(&mut buf, 0, 3);
        buf.sort_unstable();
        assert_eq!(buf, [0, 1, 2, 3]);
    }

    #[test]
    fn deterministic_with_same_seed() {
        let mut rng1 = UniformRandomGenerator::<u32>::from_optional_seed(Some(42));
        let mut rng2 = UniformRandomGenerator::<u32>::from_seed(42);

        let mut a1 = [0u32; 10];
        let mut a2 = [0u32; 10];
        rng1.gen_unique(&mut a1, 0, 100);
        rng2.gen_unique(&mut a2, 0, 100);

        assert_eq!(a1, a2);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median_in_place(&mut []), None);
        assert_eq!(median_in_place(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_in_place(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median_in_place(&mut [5.0]), Some(5.0));
    }
}
