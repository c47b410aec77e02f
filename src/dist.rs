//! Discrete distributions loaded from the parameter files and the
//! pure scaling operators the scenarios and the auto-tuner apply to
//! them.
//!
//! # Design decisions
//! Operators return new distributions and leave the original intact;
//! the parameter store hands out clones, so a tuned run never mutates
//! the profiles loaded from disk. Sampling draws through the caller's
//! RNG handle, never through ambient state.

use rand::Rng;

use crate::err::{ConfigError, MsgError};

/// How far the probability sum of a loaded distribution may deviate
/// from 1 before the record is rejected.
const NORMALIZATION_TOLERANCE: f64 = 1e-3;

/// A finite mapping from values to probabilities.
///
/// Values are non-negative reals: seconds for the timing
/// distributions, integer counts for burst lengths. Entries are kept
/// sorted by value and probabilities always sum to exactly 1 after
/// construction.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteDistribution {
    entries: Vec<(f64, f64)>,
}

impl DiscreteDistribution {
    /// Build a distribution from `(value, probability)` pairs,
    /// enforcing the load-time invariants: at least one entry, no
    /// negative values or probabilities, and a probability sum within
    /// tolerance of 1. The sum is then normalized to exactly 1.
    pub fn from_entries(entries: Vec<(f64, f64)>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyDistribution(MsgError::new(
                "a distribution requires at least one value:probability pair",
            )));
        }
        for (value, prob) in &entries {
            if !value.is_finite() || *value < 0.0 {
                return Err(ConfigError::BadProbability(MsgError::new(format!(
                    "value {value} is not a non-negative real"
                ))));
            }
            if !prob.is_finite() || *prob < 0.0 {
                return Err(ConfigError::BadProbability(MsgError::new(format!(
                    "probability {prob} is not a non-negative real"
                ))));
            }
        }
        let sum: f64 = entries.iter().map(|(_, p)| p).sum();
        if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
            return Err(ConfigError::BadProbability(MsgError::new(format!(
                "probabilities sum to {sum}, outside of 1 +/- {NORMALIZATION_TOLERANCE}"
            ))));
        }
        Ok(Self::renormalized(entries))
    }

    /// Parse a `value:prob/value:prob/...` field from a parameter
    /// file.
    pub fn parse(field: &str) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        for pair in field.split('/') {
            let (value, prob) = pair.split_once(':').ok_or_else(|| {
                ConfigError::BadProbability(MsgError::new(format!(
                    "{pair} is not a value:probability pair"
                )))
            })?;
            let value = value.trim().parse::<f64>().map_err(|_| {
                ConfigError::BadProbability(MsgError::new(format!("{value} is not a number")))
            })?;
            let prob = prob.trim().parse::<f64>().map_err(|_| {
                ConfigError::BadProbability(MsgError::new(format!("{prob} is not a number")))
            })?;
            entries.push((value, prob));
        }
        Self::from_entries(entries)
    }

    /// Internal constructor: merge duplicate values, sort, and divide
    /// by the probability sum. The caller guarantees the sum is
    /// positive.
    fn renormalized(mut entries: Vec<(f64, f64)>) -> Self {
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(entries.len());
        for (value, prob) in entries {
            match merged.last_mut() {
                Some((last_value, last_prob)) if *last_value == value => *last_prob += prob,
                _ => merged.push((value, prob)),
            }
        }
        let sum: f64 = merged.iter().map(|(_, p)| p).sum();
        for (_, prob) in merged.iter_mut() {
            *prob /= sum;
        }
        DiscreteDistribution { entries: merged }
    }

    /// The `(value, probability)` pairs, sorted by value.
    pub fn entries(&self) -> &[(f64, f64)] {
        &self.entries
    }

    /// Probability-weighted mean of the values.
    pub fn mean(&self) -> f64 {
        self.entries.iter().map(|(v, p)| v * p).sum()
    }

    /// Draw one value by cumulative weight.
    pub fn sample<R>(&self, rng: &mut R) -> f64
    where
        R: Rng,
    {
        let draw: f64 = rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0;
        for (value, prob) in &self.entries {
            cumulative += prob;
            if draw < cumulative {
                return *value;
            }
        }
        // Floating point residue can leave the last step fractionally
        // short of 1.
        self.entries[self.entries.len() - 1].0
    }

    /// Draw one value and round it to a positive count, for burst
    /// length distributions.
    pub fn sample_count<R>(&self, rng: &mut R) -> usize
    where
        R: Rng,
    {
        (self.sample(rng).round() as usize).max(1)
    }

    /// True when every entry sits at value 0: the parameter file's
    /// encoding for "this model never probes in this phase".
    pub fn is_silent(&self) -> bool {
        self.entries.iter().all(|(v, _)| *v == 0.0)
    }

    /// Multiply every value by `factor`, leaving probabilities
    /// untouched.
    pub fn scale(&self, factor: f64) -> Self {
        Self::renormalized(
            self.entries
                .iter()
                .map(|(v, p)| (v * factor, *p))
                .collect(),
        )
    }

    /// Widen (`factor > 1`) or narrow (`factor < 1`) the distribution
    /// around its mean, preserving the mean up to the clamp of values
    /// at zero.
    pub fn spread(&self, factor: f64) -> Self {
        let mean = self.mean();
        Self::renormalized(
            self.entries
                .iter()
                .map(|(v, p)| ((mean + factor * (v - mean)).max(0.0), *p))
                .collect(),
        )
    }

    /// Reshape the probability mass by exponentiation
    /// (`p' = p^gamma`) followed by renormalization. A gamma below 1
    /// flattens the distribution; above 1 sharpens it. If the
    /// exponentiation numerically starves every entry but the
    /// heaviest, the result degenerates to that single entry.
    pub fn gamma(&self, gamma: f64) -> Self {
        let reshaped: Vec<(f64, f64)> = self
            .entries
            .iter()
            .map(|(v, p)| (*v, p.powf(gamma)))
            .collect();
        let sum: f64 = reshaped.iter().map(|(_, p)| p).sum();
        if sum <= 0.0 || !sum.is_finite() {
            let (value, _) = self
                .entries
                .iter()
                .cloned()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .expect("constructors reject empty distributions");
            return DiscreteDistribution {
                entries: vec![(value, 1.0)],
            };
        }
        Self::renormalized(reshaped)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::{rngs::StdRng, SeedableRng};

    fn fixture() -> DiscreteDistribution {
        DiscreteDistribution::parse("1.0:0.5/2.0:0.3/4.0:0.2").unwrap()
    }

    #[test]
    fn test_parse_and_normalize() {
        let dist = fixture();
        assert_eq!(dist.entries().len(), 3);
        let sum: f64 = dist.entries().iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((dist.mean() - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DiscreteDistribution::parse("").is_err());
        assert!(DiscreteDistribution::parse("1.0").is_err());
        assert!(DiscreteDistribution::parse("a:0.5/2.0:0.5").is_err());
        assert!(DiscreteDistribution::parse("1.0:0.5/2.0:0.2").is_err());
        assert!(DiscreteDistribution::parse("1.0:-0.2/2.0:1.2").is_err());
    }

    #[test]
    fn test_tolerated_sum_is_renormalized() {
        let dist = DiscreteDistribution::parse("1.0:0.5004/2.0:0.5").unwrap();
        let sum: f64 = dist.entries().iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sampling_respects_support() {
        let dist = fixture();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let v = dist.sample(&mut rng);
            assert!(v == 1.0 || v == 2.0 || v == 4.0);
        }
    }

    #[test]
    fn test_degenerate_sampling() {
        let dist = DiscreteDistribution::parse("3.0:1.0").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(dist.sample(&mut rng), 3.0);
        }
    }

    #[test]
    fn test_scale_round_trip() {
        let dist = fixture();
        let round_tripped = dist.scale(3.7).scale(1.0 / 3.7);
        for ((v1, p1), (v2, p2)) in dist.entries().iter().zip(round_tripped.entries()) {
            assert!((v1 - v2).abs() < 1e-9);
            assert!((p1 - p2).abs() < 1e-9);
        }
    }

    #[test]
    fn test_spread_preserves_mean() {
        let dist = fixture();
        let wide = dist.spread(1.4);
        let narrow = dist.spread(0.5);
        assert!((wide.mean() - dist.mean()).abs() < 1e-9);
        assert!((narrow.mean() - dist.mean()).abs() < 1e-9);
    }

    #[test]
    fn test_spread_clamps_at_zero() {
        let dist = DiscreteDistribution::parse("0.1:0.5/10.0:0.5").unwrap();
        let wide = dist.spread(3.0);
        assert!(wide.entries().iter().all(|(v, _)| *v >= 0.0));
    }

    #[test]
    fn test_gamma_flattens_and_sharpens() {
        let dist = DiscreteDistribution::parse("1.0:0.9/2.0:0.1").unwrap();
        let flat = dist.gamma(0.1);
        assert!(flat.entries()[0].1 < 0.9);
        let sharp = dist.gamma(3.0);
        assert!(sharp.entries()[0].1 > 0.9);
    }

    #[test]
    fn test_gamma_collapse_degenerates() {
        let dist = DiscreteDistribution::parse("1.0:1.0/5.0:0.0").unwrap();
        let collapsed = dist.gamma(0.5);
        let sum: f64 = collapsed.entries().iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_silent_marker() {
        assert!(DiscreteDistribution::parse("0:1.0").unwrap().is_silent());
        assert!(!fixture().is_silent());
    }
}
