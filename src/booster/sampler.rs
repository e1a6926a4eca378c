//! Sampler
//!
//! Row sampling strategies, used before fitting each tree and when drawing
//! bootstrap resamples of a training partition.
use rand::rngs::StdRng;
use rand::Rng;

// A sampler can be used to subset the data prior to fitting a new tree.
pub trait Sampler {
    /// Sample the data, returning a tuple, where the first item is the samples
    /// chosen for training, and the second are the samples excluded.
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>);
}

/// Keep each row independently with probability `subsample`.
pub struct RandomSampler {
    subsample: f64,
}

impl RandomSampler {
    pub fn new(subsample: f64) -> Self {
        RandomSampler { subsample }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let subsample = self.subsample;
        let mut chosen = Vec::new();
        let mut excluded = Vec::new();
        for i in index {
            if rng.gen::<f64>() < subsample {
                chosen.push(*i);
            } else {
                excluded.push(*i)
            }
        }
        (chosen, excluded)
    }
}

/// Draw `index.len()` rows with replacement. The excluded rows are the ones
/// never drawn (out of bag).
pub struct BootstrapSampler;

impl Sampler for BootstrapSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        if index.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let mut drawn = vec![false; index.len()];
        let chosen = (0..index.len())
            .map(|_| {
                let j = rng.gen_range(0..index.len());
                drawn[j] = true;
                index[j]
            })
            .collect();
        let excluded = index
            .iter()
            .zip(drawn.iter())
            .filter(|(_, d)| !**d)
            .map(|(i, _)| *i)
            .collect();
        (chosen, excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_random_sampler() {
        let mut rng = StdRng::seed_from_u64(42);
        let index = vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut sampler = RandomSampler::new(0.5);
        let (chosen, excluded) = sampler.sample(&mut rng, &index);
        assert_eq!(chosen.len() + excluded.len(), index.len());

        let mut sampler_all = RandomSampler::new(1.0);
        let (chosen_all, excluded_all) = sampler_all.sample(&mut rng, &index);
        assert_eq!(chosen_all.len(), index.len());
        assert!(excluded_all.is_empty());
    }

    #[test]
    fn test_bootstrap_sampler() {
        let index: Vec<usize> = (10..60).collect();
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let (chosen, excluded) = BootstrapSampler.sample(&mut a, &index);
        assert_eq!(chosen.len(), index.len());
        assert!(chosen.iter().all(|i| (10..60).contains(i)));
        assert!(excluded.iter().all(|i| !chosen.contains(i)));
        // Seeded draws repeat exactly.
        assert_eq!(BootstrapSampler.sample(&mut b, &index).0, chosen);
    }
}
