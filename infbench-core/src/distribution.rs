use rand::Rng;
use rand_distr::{Distribution as _, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parameters for a bounded integer length distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionSpec {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub total_count: usize,
}

impl DistributionSpec {
    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(Error::InvalidDistributionBounds);
        }
        if !self.mean.is_finite() || self.mean < self.min as f64 || self.mean > self.max as f64 {
            return Err(Error::InvalidDistributionMean);
        }
        if !self.std_dev.is_finite() || self.std_dev < 0.0 {
            return Err(Error::InvalidDistributionStdDev);
        }
        if self.total_count == 0 {
            return Err(Error::InvalidTotalCount);
        }
        Ok(())
    }
}

/// Draws exactly `total_count` integers from a normal distribution with the
/// spec's mean/std_dev, each clipped to `[min, max]`. With `std_dev == 0`
/// every value equals the (bounded) mean. Values are never outside the bounds.
pub fn sample_lengths(spec: &DistributionSpec, rng: &mut impl Rng) -> Result<Vec<u64>> {
    spec.validate()?;

    let bounded_mean = (spec.mean.round() as u64).clamp(spec.min, spec.max);
    if spec.std_dev == 0.0 {
        return Ok(vec![bounded_mean; spec.total_count]);
    }

    let normal =
        Normal::new(spec.mean, spec.std_dev).map_err(|_| Error::InvalidDistributionStdDev)?;

    let mut out = Vec::with_capacity(spec.total_count);
    for _ in 0..spec.total_count {
        let raw = normal.sample(rng);
        let value = if raw.is_finite() {
            (raw.round().max(0.0) as u64).clamp(spec.min, spec.max)
        } else {
            bounded_mean
        };
        out.push(value);
    }
    Ok(out)
}
