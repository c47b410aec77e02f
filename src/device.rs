//! Per-device runtime state: identity, MAC rotation, phase, mobility,
//! and the bookkeeping a burst needs.
//!
//! # Design decisions
//!
//! Devices live in an arena keyed by id and are only ever referenced
//! by id from the event queue, so the queue holds no device
//! lifetimes. Profiles are resolved at creation time and the relevant
//! pieces copied in; the store stays immutable and shared.

use rand::{distributions::Alphanumeric, Rng};

use crate::{
    consts::{
        sim::{MacPolicy, Phase, RotationMode},
        MICROS_PER_SEC,
    },
    err::{ConfigError, SimError},
    store::HardwareProfile,
    types::MacAddr,
};

/// Side length in meters of the square arena devices move in.
pub const ARENA_METERS: f64 = 100.0;

/// Number of pre-generated private addresses a Dedicated-policy
/// device cycles through.
const DEDICATED_POOL_SIZE: usize = 8;

/// Maximum heading perturbation per mobility step, in degrees.
const HEADING_JITTER_DEG: f64 = 15.0;

fn random_tail<R>(oui: [u8; 3], rng: &mut R) -> MacAddr
where
    R: Rng,
{
    MacAddr::new([oui[0], oui[1], oui[2], rng.gen(), rng.gen(), rng.gen()])
}

fn random_local_unicast<R>(rng: &mut R) -> MacAddr
where
    R: Rng,
{
    MacAddr::new([
        rng.gen(),
        rng.gen(),
        rng.gen(),
        rng.gen(),
        rng.gen(),
        rng.gen(),
    ])
    .as_local_unicast()
}

/// Scenario-level knobs applied to every device at creation.
#[derive(Clone, Copy, Debug)]
pub struct DeviceOptions {
    /// When devices rotate their source address.
    pub rotation_mode: RotationMode,
    /// Interval in seconds for [`RotationMode::Interval`].
    pub rotation_interval_secs: f64,
    /// Multiplier applied to the sampled walking speed.
    pub speed_multiplier: f64,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions {
            rotation_mode: RotationMode::PerBurst,
            rotation_interval_secs: 60.0,
            speed_multiplier: 1.0,
        }
    }
}

/// One simulated device.
#[derive(Clone, Debug)]
pub struct Device {
    id: u32,
    vendor: String,
    model: String,
    vendor_oui: [u8; 3],
    policy: MacPolicy,
    phase: Phase,
    current_mac: MacAddr,
    mac_history: Vec<MacAddr>,
    rotation_mode: RotationMode,
    force_mac_change: bool,
    last_mac_change: u64,
    last_phase_change: u64,
    rotation_interval: u64,
    dedicated_pool: Vec<MacAddr>,
    pool_index: usize,
    position: (f64, f64),
    speed: f64,
    heading_deg: f64,
    last_move: u64,
    queue_len: u8,
    processing_delay: u64,
    tx_power_dbm: f64,
    ssids: Vec<String>,
    wps_uuid: Option<[u8; 16]>,
    channel: u8,
    next_seq: Option<u16>,
}

impl Device {
    /// Create a device for the given hardware profile at time `now`.
    ///
    /// `vendor_oui` is the registry lookup result for the profile's
    /// vendor; it is mandatory for the PreserveOui policy and
    /// otherwise only feeds the vendor specific element and the
    /// permanent address prefix.
    pub fn create<R>(
        id: u32,
        profile: &HardwareProfile,
        vendor_oui: Option<[u8; 3]>,
        options: &DeviceOptions,
        now: u64,
        rng: &mut R,
    ) -> Result<Self, SimError>
    where
        R: Rng,
    {
        let policy = *profile.mac_policy();
        let oui = match (policy, vendor_oui) {
            (MacPolicy::PreserveOui, None) => {
                return Err(ConfigError::UnknownVendor(profile.vendor().clone()).into())
            }
            (_, Some(oui)) => oui,
            // Without a registry entry the device still advertises
            // something stable in its vendor element.
            (_, None) => [rng.gen::<u8>() & 0xfc, rng.gen(), rng.gen()],
        };

        let mut dedicated_pool = Vec::new();
        let current_mac = match policy {
            MacPolicy::Permanent => random_tail(oui, rng),
            MacPolicy::PreserveOui => random_tail(oui, rng),
            MacPolicy::FullyRandom => random_local_unicast(rng),
            MacPolicy::Dedicated => {
                dedicated_pool = (0..DEDICATED_POOL_SIZE)
                    .map(|_| random_local_unicast(rng))
                    .collect();
                dedicated_pool[0]
            }
            MacPolicy::UnrecognizedVariant(bad) => {
                return Err(ConfigError::BadMacPolicy(bad).into())
            }
        };

        let ssid_count = rng.gen_range(1..=10);
        let ssids = (0..ssid_count)
            .map(|_| {
                (&mut *rng)
                    .sample_iter(&Alphanumeric)
                    .take(32)
                    .map(char::from)
                    .collect()
            })
            .collect();
        let wps_uuid = if rng.gen_range(0.0..1.0) < 0.3 {
            let mut uuid = [0u8; 16];
            rng.fill(&mut uuid);
            Some(uuid)
        } else {
            None
        };

        Ok(Device {
            id,
            vendor: profile.vendor().clone(),
            model: profile.model().clone(),
            vendor_oui: oui,
            policy,
            phase: Phase::Locked,
            current_mac,
            mac_history: vec![current_mac],
            rotation_mode: options.rotation_mode,
            force_mac_change: false,
            last_mac_change: now,
            last_phase_change: now,
            rotation_interval: (options.rotation_interval_secs * MICROS_PER_SEC as f64) as u64,
            dedicated_pool,
            pool_index: 0,
            position: (
                rng.gen_range(0.0..ARENA_METERS),
                rng.gen_range(0.0..ARENA_METERS),
            ),
            speed: rng.gen_range(0.3..2.0) * options.speed_multiplier,
            heading_deg: rng.gen_range(0.0..360.0),
            last_move: now,
            queue_len: rng.gen_range(1..=10),
            processing_delay: rng.gen_range(1_000..=5_000),
            tx_power_dbm: rng.gen_range(12.0..=20.0),
            ssids,
            wps_uuid,
            channel: [1u8, 6, 11][rng.gen_range(0..3)],
            next_seq: None,
        })
    }

    /// Device id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Vendor name.
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The vendor OUI advertised in composed frames.
    pub fn vendor_oui(&self) -> [u8; 3] {
        self.vendor_oui
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current source address.
    pub fn current_mac(&self) -> MacAddr {
        self.current_mac
    }

    /// Every address the device has used, in first-use order.
    pub fn mac_history(&self) -> &[MacAddr] {
        &self.mac_history
    }

    /// Current position in arena coordinates.
    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    /// Transmit power in dBm.
    pub fn tx_power_dbm(&self) -> f64 {
        self.tx_power_dbm
    }

    /// Per-burst processing delay in microseconds.
    pub fn processing_delay(&self) -> u64 {
        self.processing_delay
    }

    /// The channel the device scans on.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Transmit queue depth of the device's radio.
    pub fn queue_len(&self) -> u8 {
        self.queue_len
    }

    /// UUID-E advertised in the WPS element, if the device carries
    /// one.
    pub fn wps_uuid(&self) -> Option<[u8; 16]> {
        self.wps_uuid
    }

    /// Pick the burst's target SSID: wildcard half the time,
    /// otherwise one of the device's configured networks.
    pub fn pick_ssid<R>(&self, rng: &mut R) -> Option<&str>
    where
        R: Rng,
    {
        if rng.gen_range(0.0..1.0) < 0.5 {
            None
        } else {
            let index = rng.gen_range(0..self.ssids.len());
            Some(self.ssids[index].as_str())
        }
    }

    /// Enter a new phase at time `now`, recording the transition
    /// time; the per-phase rotation mode arms a MAC change for the
    /// next burst.
    pub fn set_phase(&mut self, phase: Phase, now: u64) {
        self.phase = phase;
        self.last_phase_change = now;
        if self.rotation_mode == RotationMode::PerPhase {
            self.force_mac_change = true;
        }
    }

    /// Time of the most recent phase transition.
    pub fn last_phase_change(&self) -> u64 {
        self.last_phase_change
    }

    /// Decide whether this burst rotates the source address, and
    /// rotate if so. Permanent devices never rotate regardless of the
    /// mode.
    ///
    /// Returns `true` when the address changed.
    pub fn maybe_rotate<R>(&mut self, now: u64, rng: &mut R) -> Result<bool, SimError>
    where
        R: Rng,
    {
        if self.policy == MacPolicy::Permanent {
            return Ok(false);
        }
        let due = match self.rotation_mode {
            RotationMode::PerBurst => true,
            RotationMode::PerPhase => {
                let armed = self.force_mac_change;
                self.force_mac_change = false;
                armed
            }
            RotationMode::Interval => now.saturating_sub(self.last_mac_change) >= self.rotation_interval,
        };
        if !due {
            return Ok(false);
        }

        let fresh = match self.policy {
            MacPolicy::FullyRandom => random_local_unicast(rng),
            MacPolicy::PreserveOui => random_tail(self.vendor_oui, rng),
            MacPolicy::Dedicated => {
                self.pool_index = (self.pool_index + 1) % self.dedicated_pool.len();
                self.dedicated_pool[self.pool_index]
            }
            MacPolicy::Permanent | MacPolicy::UnrecognizedVariant(_) => {
                return Err(SimError::invariant("rotation reached a non-rotating policy"))
            }
        };
        if self.policy == MacPolicy::FullyRandom
            && (!fresh.is_locally_administered() || fresh.is_multicast())
        {
            return Err(SimError::invariant(format!(
                "randomized address {fresh} is not locally administered unicast"
            )));
        }
        if self.policy == MacPolicy::PreserveOui && fresh.oui() != self.vendor_oui {
            return Err(SimError::invariant(format!(
                "rotated address {fresh} lost the vendor prefix"
            )));
        }

        self.current_mac = fresh;
        self.last_mac_change = now;
        if !self.mac_history.contains(&fresh) {
            self.mac_history.push(fresh);
        }
        Ok(true)
    }

    /// Rotate if due, then hand out the sequence window for a burst
    /// of `burst_len` frames. The first burst of a device picks a
    /// random starting sequence low enough that the burst does not
    /// wrap.
    pub fn begin_burst<R>(
        &mut self,
        burst_len: usize,
        now: u64,
        rng: &mut R,
    ) -> Result<(MacAddr, u16), SimError>
    where
        R: Rng,
    {
        self.maybe_rotate(now, rng)?;
        let start_seq = match self.next_seq {
            Some(seq) => seq,
            None => rng.gen_range(0..(4096 - burst_len as u16)),
        };
        Ok((self.current_mac, start_seq))
    }

    /// Record the sequence number the next burst continues from.
    pub fn finish_burst(&mut self, next_seq: u16) {
        self.next_seq = Some(next_seq);
    }

    /// Integrate the position forward to time `now` with a small
    /// random heading perturbation, reflecting at the arena bounds.
    pub fn update_position<R>(&mut self, now: u64, rng: &mut R)
    where
        R: Rng,
    {
        let dt = now.saturating_sub(self.last_move) as f64 / MICROS_PER_SEC as f64;
        self.last_move = now;
        if dt <= 0.0 || self.speed <= 0.0 {
            return;
        }
        self.heading_deg = (self.heading_deg
            + rng.gen_range(-HEADING_JITTER_DEG..HEADING_JITTER_DEG))
            .rem_euclid(360.0);
        let heading = self.heading_deg.to_radians();
        let (mut x, mut y) = self.position;
        x += self.speed * heading.cos() * dt;
        y += self.speed * heading.sin() * dt;

        if x < 0.0 {
            x = -x;
            self.heading_deg = (180.0 - self.heading_deg).rem_euclid(360.0);
        } else if x > ARENA_METERS {
            x = 2.0 * ARENA_METERS - x;
            self.heading_deg = (180.0 - self.heading_deg).rem_euclid(360.0);
        }
        if y < 0.0 {
            y = -y;
            self.heading_deg = (-self.heading_deg).rem_euclid(360.0);
        } else if y > ARENA_METERS {
            y = 2.0 * ARENA_METERS - y;
            self.heading_deg = (-self.heading_deg).rem_euclid(360.0);
        }
        self.position = (x.clamp(0.0, ARENA_METERS), y.clamp(0.0, ARENA_METERS));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::{rngs::StdRng, SeedableRng};

    use crate::{dist::DiscreteDistribution, store::HardwareProfileBuilder, types::Buffer};

    fn profile(policy: MacPolicy) -> HardwareProfile {
        HardwareProfileBuilder::default()
            .vendor("Apple".to_string())
            .model("iphone_11".to_string())
            .burst_lengths(DiscreteDistribution::parse("3:1.0").unwrap())
            .mac_policy(policy)
            .vht_cap(None)
            .ext_cap(Buffer::new())
            .ht_cap(Buffer::new())
            .rates(vec![2, 4, 11])
            .ext_rates(Vec::new())
            .build()
            .unwrap()
    }

    fn device(policy: MacPolicy, mode: RotationMode, rng: &mut StdRng) -> Device {
        let options = DeviceOptions {
            rotation_mode: mode,
            rotation_interval_secs: 5.0,
            speed_multiplier: 1.0,
        };
        Device::create(
            1,
            &profile(policy),
            Some([0xa4, 0x83, 0xe7]),
            &options,
            0,
            rng,
        )
        .unwrap()
    }

    #[test]
    fn test_permanent_never_rotates() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::Permanent, RotationMode::PerBurst, &mut rng);
        let original = dev.current_mac();
        for now in 0..20u64 {
            assert!(!dev.maybe_rotate(now * 1_000_000, &mut rng).unwrap());
        }
        assert_eq!(dev.current_mac(), original);
        assert_eq!(dev.mac_history().len(), 1);
    }

    #[test]
    fn test_fully_random_rotates_per_burst() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::PerBurst, &mut rng);
        for now in 1..10u64 {
            assert!(dev.maybe_rotate(now, &mut rng).unwrap());
            let mac = dev.current_mac();
            assert!(mac.is_locally_administered());
            assert!(!mac.is_multicast());
        }
        assert!(dev.mac_history().len() > 1);
    }

    #[test]
    fn test_preserve_oui_keeps_prefix() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::PreserveOui, RotationMode::PerBurst, &mut rng);
        assert_eq!(dev.current_mac().oui(), [0xa4, 0x83, 0xe7]);
        for now in 1..10u64 {
            dev.maybe_rotate(now, &mut rng).unwrap();
            assert_eq!(dev.current_mac().oui(), [0xa4, 0x83, 0xe7]);
        }
    }

    #[test]
    fn test_preserve_oui_requires_registry_entry() {
        let mut rng = StdRng::seed_from_u64(5);
        let result = Device::create(
            1,
            &profile(MacPolicy::PreserveOui),
            None,
            &DeviceOptions::default(),
            0,
            &mut rng,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_interval_rotation_respects_the_clock() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::Interval, &mut rng);
        // 5 s interval: nothing before 5 s, one change at 5 s.
        assert!(!dev.maybe_rotate(2_000_000, &mut rng).unwrap());
        assert!(!dev.maybe_rotate(4_999_999, &mut rng).unwrap());
        assert!(dev.maybe_rotate(5_000_000, &mut rng).unwrap());
        assert!(!dev.maybe_rotate(6_000_000, &mut rng).unwrap());
        assert!(dev.maybe_rotate(10_000_000, &mut rng).unwrap());
    }

    #[test]
    fn test_per_phase_rotation_is_armed_by_phase_change() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::FullyRandom, RotationMode::PerPhase, &mut rng);
        assert!(!dev.maybe_rotate(1, &mut rng).unwrap());
        dev.set_phase(Phase::Active, 1);
        assert_eq!(dev.last_phase_change(), 1);
        assert!(dev.maybe_rotate(2, &mut rng).unwrap());
        // The flag clears after one use.
        assert!(!dev.maybe_rotate(3, &mut rng).unwrap());
    }

    #[test]
    fn test_dedicated_cycles_its_pool() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::Dedicated, RotationMode::PerBurst, &mut rng);
        let mut seen = std::collections::HashSet::new();
        seen.insert(dev.current_mac());
        for now in 1..100u64 {
            dev.maybe_rotate(now, &mut rng).unwrap();
            seen.insert(dev.current_mac());
        }
        assert!(seen.len() <= DEDICATED_POOL_SIZE);
        assert!(seen.iter().all(|m| m.is_locally_administered()));
    }

    #[test]
    fn test_first_burst_sequence_window() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::Permanent, RotationMode::PerBurst, &mut rng);
        let (_, seq) = dev.begin_burst(5, 0, &mut rng).unwrap();
        assert!(seq < 4091);
        dev.finish_burst((seq + 5) % 4096);
        let (_, continued) = dev.begin_burst(5, 1, &mut rng).unwrap();
        assert_eq!(continued, (seq + 5) % 4096);
    }

    #[test]
    fn test_mobility_stays_in_arena() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dev = device(MacPolicy::Permanent, RotationMode::PerBurst, &mut rng);
        for step in 1..2000u64 {
            dev.update_position(step * 5_000_000, &mut rng);
            let (x, y) = dev.position();
            assert!((0.0..=ARENA_METERS).contains(&x));
            assert!((0.0..=ARENA_METERS).contains(&y));
        }
    }

    #[test]
    fn test_ssids_are_32_alphanumeric() {
        let mut rng = StdRng::seed_from_u64(5);
        let dev = device(MacPolicy::Permanent, RotationMode::PerBurst, &mut rng);
        for _ in 0..20 {
            if let Some(ssid) = dev.pick_ssid(&mut rng) {
                assert_eq!(ssid.len(), 32);
                assert!(ssid.chars().all(|c| c.is_ascii_alphanumeric()));
            }
        }
    }
}
