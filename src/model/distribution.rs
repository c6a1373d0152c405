//! Exponential-bucket distributions and their merge rule.
//!
//! Spec §4.5 / §8 scenario 5: two distributions sharing bucketing parameters
//! merge by summing counts and bucket counts, tracking min/max, and combining
//! `mean`/`sum_of_squared_deviation` with the standard parallel-variance
//! recurrence (Chan et al.). The original (`google/scc/distribution.py`,
//! referenced but not retrieved in full) is not in the supplied corpus; the
//! bucketing scheme and moment recurrence below follow the
//! `servicecontrol.v1.Distribution` proto shape named in spec.md §3.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub num_buckets: usize,
    pub growth_factor: f64,
    pub scale: f64,
    pub bucket_counts: Vec<u64>,
    pub count: u64,
    pub mean: f64,
    pub sum_of_squared_deviation: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("distributions have mismatched bucketing parameters")]
    IncompatibleBuckets,
}

impl Distribution {
    /// Constructs a new distribution from bucketing parameters and an
    /// initial sample.
    pub fn from_sample(num_buckets: usize, growth_factor: f64, scale: f64, sample: f64) -> Self {
        let mut bucket_counts = vec![0u64; num_buckets];
        let idx = bucket_index(sample, num_buckets, growth_factor, scale);
        bucket_counts[idx] += 1;
        Self {
            num_buckets,
            growth_factor,
            scale,
            bucket_counts,
            count: 1,
            mean: sample,
            sum_of_squared_deviation: 0.0,
            min: sample,
            max: sample,
        }
    }

    /// Records one more sample into this distribution in place.
    pub fn add_sample(&mut self, sample: f64) {
        let idx = bucket_index(sample, self.num_buckets, self.growth_factor, self.scale);
        self.bucket_counts[idx] += 1;

        let new_count = self.count + 1;
        let delta = sample - self.mean;
        let new_mean = self.mean + delta / new_count as f64;
        let delta2 = sample - new_mean;
        self.sum_of_squared_deviation += delta * delta2;
        self.mean = new_mean;
        self.count = new_count;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }
}

/// Which exponential bucket a sample falls into. Bucket 0 holds underflow
/// (samples below `scale`); the last bucket holds overflow.
fn bucket_index(sample: f64, num_buckets: usize, growth_factor: f64, scale: f64) -> usize {
    if num_buckets <= 1 || sample < scale {
        return 0;
    }
    let idx = 1.0 + ((sample / scale).ln() / growth_factor.ln());
    let idx = idx.floor().max(0.0) as usize;
    idx.min(num_buckets - 1)
}

/// Merges `b` into `a` using the parallel-variance recurrence, summing
/// counts and bucket counts, and widening `min`/`max`.
pub fn merge(a: &Distribution, b: &Distribution) -> Result<Distribution, DistributionError> {
    if a.num_buckets != b.num_buckets || a.growth_factor != b.growth_factor || a.scale != b.scale {
        return Err(DistributionError::IncompatibleBuckets);
    }

    let bucket_counts = a
        .bucket_counts
        .iter()
        .zip(b.bucket_counts.iter())
        .map(|(x, y)| x + y)
        .collect();

    let count = a.count + b.count;
    let mean = if count == 0 {
        0.0
    } else {
        (a.mean * a.count as f64 + b.mean * b.count as f64) / count as f64
    };

    // Chan et al. parallel combination of sum-of-squared-deviations.
    let delta = b.mean - a.mean;
    let sum_of_squared_deviation = a.sum_of_squared_deviation
        + b.sum_of_squared_deviation
        + delta * delta * (a.count as f64 * b.count as f64) / count.max(1) as f64;

    Ok(Distribution {
        num_buckets: a.num_buckets,
        growth_factor: a.growth_factor,
        scale: a.scale,
        bucket_counts,
        count,
        mean,
        sum_of_squared_deviation,
        min: a.min.min(b.min),
        max: a.max.max(b.max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_combines_counts_and_extremes() {
        let a = Distribution::from_sample(8, 10.0, 1.0, 1.5);
        let b = Distribution::from_sample(8, 10.0, 1.0, 150.0);
        let merged = merge(&a, &b).unwrap();

        assert_eq!(merged.count, 2);
        assert_eq!(merged.min, 1.5);
        assert_eq!(merged.max, 150.0);
        assert_eq!(merged.bucket_counts.iter().sum::<u64>(), 2);
        // 1.5 and 150.0 land in distinct buckets (1 and 3 for these bucketing
        // params), each incremented exactly once by its own sample.
        assert_eq!(merged.bucket_counts[1], 1);
        assert_eq!(merged.bucket_counts[3], 1);
    }

    #[test]
    fn merge_rejects_mismatched_params() {
        let a = Distribution::from_sample(8, 10.0, 1.0, 1.0);
        let b = Distribution::from_sample(4, 10.0, 1.0, 1.0);
        assert!(matches!(merge(&a, &b), Err(DistributionError::IncompatibleBuckets)));
    }

    #[test]
    fn add_sample_matches_running_moments() {
        let mut d = Distribution::from_sample(8, 10.0, 1.0, 2.0);
        d.add_sample(4.0);
        d.add_sample(6.0);
        assert_eq!(d.count, 3);
        assert!((d.mean - 4.0).abs() < 1e-9);
    }
}
