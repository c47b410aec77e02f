//! The physical channel filter: free-space path loss, Rayleigh fast
//! fade, and log-normal shadowing deciding per frame whether the
//! notional sniffer would have heard it.

use derive_builder::Builder;
use getset::Getters;
use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{consts::sim::EnvClass, err::SimError};

/// The SNR margin in dB a frame needs above the noise floor to
/// survive.
const SNR_MARGIN_DB: f64 = 10.0;

/// Scale of the Rayleigh fast-fade draw.
const RAYLEIGH_SCALE: f64 = 2.0;

/// Parameters of the channel model.
#[derive(Builder, Clone, Debug, Getters)]
#[builder(pattern = "owned")]
pub struct ChannelParams {
    /// Default transmit power in dBm when a device does not override
    /// it.
    #[builder(default = "20.0")]
    #[getset(get = "pub")]
    tx_power_dbm: f64,
    /// Operating frequency in MHz.
    #[builder(default = "2400.0")]
    #[getset(get = "pub")]
    frequency_mhz: f64,
    /// Environment class selecting shadowing spread and noise floor.
    #[builder(default)]
    #[getset(get = "pub")]
    env: EnvClass,
    /// External multiplier applied to the received power.
    #[builder(default = "1.0")]
    #[getset(get = "pub")]
    env_factor: f64,
    /// Independent probability that interference destroys an
    /// otherwise receivable frame.
    #[builder(default = "0.0")]
    #[getset(get = "pub")]
    interference_prob: f64,
    /// Position of the notional sniffer in arena coordinates.
    #[builder(default = "(0.0, 0.0)")]
    #[getset(get = "pub")]
    sniffer: (f64, f64),
}

impl Default for ChannelParams {
    fn default() -> Self {
        ChannelParams {
            tx_power_dbm: 20.0,
            frequency_mhz: 2400.0,
            env: EnvClass::Indoor,
            env_factor: 1.0,
            interference_prob: 0.0,
            sniffer: (0.0, 0.0),
        }
    }
}

/// Free-space path loss in dB at distance `d` meters and frequency
/// `f` MHz.
pub fn free_space_path_loss(d: f64, f_mhz: f64) -> f64 {
    20.0 * d.log10() + 20.0 * f_mhz.log10() - 27.55
}

/// The stochastic per-frame survival decision.
#[derive(Clone, Debug)]
pub struct ChannelFilter {
    params: ChannelParams,
    shadow: Normal<f64>,
}

impl ChannelFilter {
    /// Build the filter for the given parameters.
    pub fn new(params: ChannelParams) -> Result<Self, SimError> {
        let shadow = Normal::new(0.0, params.env().shadowing_sigma())
            .map_err(|e| SimError::invariant(format!("shadowing sigma: {e}")))?;
        Ok(ChannelFilter { params, shadow })
    }

    /// The parameters the filter was built with.
    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Decide whether a frame transmitted at `tx_power_dbm` from
    /// `position` reaches the sniffer. Returns the RSSI recorded for
    /// the capture on success and [`None`] on a drop.
    ///
    /// A distance of zero would put a zero into the path loss
    /// logarithm, so distances clamp at one meter.
    pub fn evaluate<R>(&self, position: (f64, f64), tx_power_dbm: f64, rng: &mut R) -> Option<i8>
    where
        R: Rng,
    {
        let (sx, sy) = *self.params.sniffer();
        let distance = ((position.0 - sx).powi(2) + (position.1 - sy).powi(2))
            .sqrt()
            .max(1.0);

        let path_loss = free_space_path_loss(distance, *self.params.frequency_mhz());
        let fade = rayleigh(RAYLEIGH_SCALE, rng);
        let shadow = self.shadow.sample(rng);
        let rx_power = (tx_power_dbm - path_loss - fade + shadow) * self.params.env_factor();

        let floor = self.params.env().noise_floor();
        if rx_power <= floor + SNR_MARGIN_DB {
            debug!("frame dropped: rx {rx_power:.1} dBm at {distance:.1} m");
            return None;
        }
        if *self.params.interference_prob() > 0.0
            && rng.gen_range(0.0..1.0) < *self.params.interference_prob()
        {
            debug!("frame dropped by interference");
            return None;
        }
        Some(rng.gen_range(-90..=-40) as i8)
    }
}

/// Draw from a Rayleigh distribution with the given scale by inverse
/// transform sampling.
fn rayleigh<R>(scale: f64, rng: &mut R) -> f64
where
    R: Rng,
{
    let u: f64 = rng.gen_range(0.0..1.0);
    scale * (-2.0 * (1.0 - u).ln()).sqrt()
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_fspl_reference_points() {
        // 1 m at 2400 MHz: 20*log10(2400) - 27.55 = 40.05 dB.
        assert!((free_space_path_loss(1.0, 2400.0) - 40.05).abs() < 0.1);
        // Each doubling of distance adds about 6 dB.
        let d1 = free_space_path_loss(10.0, 2400.0);
        let d2 = free_space_path_loss(20.0, 2400.0);
        assert!((d2 - d1 - 6.02).abs() < 0.1);
    }

    #[test]
    fn test_nearby_device_is_heard() {
        let filter = ChannelFilter::new(ChannelParams::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let heard = (0..200)
            .filter(|_| filter.evaluate((1.0, 1.0), 20.0, &mut rng).is_some())
            .count();
        assert!(heard > 150, "only {heard} of 200 nearby frames survived");
    }

    #[test]
    fn test_distant_device_is_lost() {
        let filter = ChannelFilter::new(ChannelParams::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let heard = (0..200)
            .filter(|_| filter.evaluate((40_000.0, 0.0), 20.0, &mut rng).is_some())
            .count();
        assert_eq!(heard, 0);
    }

    #[test]
    fn test_zero_distance_is_clamped() {
        let filter = ChannelFilter::new(ChannelParams::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        // Must not panic or produce NaN at the sniffer's own
        // position.
        for _ in 0..50 {
            let _ = filter.evaluate((0.0, 0.0), 20.0, &mut rng);
        }
    }

    #[test]
    fn test_interference_drops_everything_at_one() {
        let params = ChannelParamsBuilder::default()
            .interference_prob(1.0)
            .build()
            .unwrap();
        let filter = ChannelFilter::new(params).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            assert!(filter.evaluate((1.0, 1.0), 20.0, &mut rng).is_none());
        }
    }

    #[test]
    fn test_rssi_range() {
        let filter = ChannelFilter::new(ChannelParams::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            if let Some(rssi) = filter.evaluate((2.0, 2.0), 20.0, &mut rng) {
                assert!((-90..=-40).contains(&(rssi as i32)));
            }
        }
    }
}
