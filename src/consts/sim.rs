//! Constants for the simulation layer: device phases, MAC
//! randomization policies, rotation modes, and environment classes.

use std::str::FromStr;

use crate::err::{ConfigError, MsgError};

impl_var!(
    /// Coarse behavioral state of a device, selecting which timing
    /// profile applies. The numeric values match the behavior
    /// parameter file.
    Phase, u8,
    Locked => 0,
    Awake => 1,
    Active => 2
);

impl Phase {
    /// All phases, in file order.
    pub const ALL: [Phase; 3] = [Phase::Locked, Phase::Awake, Phase::Active];

    /// The phase a cycling single-device scenario switches to next.
    pub fn next(self) -> Phase {
        match self {
            Phase::Locked => Phase::Awake,
            Phase::Awake => Phase::Active,
            Phase::Active => Phase::Locked,
            Phase::UnrecognizedVariant(_) => Phase::Locked,
        }
    }
}

impl_var!(
    /// MAC randomization policy of a device model. The numeric values
    /// match the hardware parameter file.
    MacPolicy, u8,
    Permanent => 0,
    FullyRandom => 1,
    PreserveOui => 2,
    Dedicated => 3
);

impl MacPolicy {
    /// Parse the policy field of a hardware record, rejecting values
    /// outside of 0..=3.
    pub fn from_config(v: u8) -> Result<Self, ConfigError> {
        match MacPolicy::from(v) {
            MacPolicy::UnrecognizedVariant(bad) => Err(ConfigError::BadMacPolicy(bad)),
            policy => Ok(policy),
        }
    }
}

/// When a device decides to rotate its MAC address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationMode {
    /// Rotate on every burst.
    PerBurst,
    /// Rotate on the first burst after a phase change.
    PerPhase,
    /// Rotate once the rotation interval has elapsed.
    Interval,
}

impl FromStr for RotationMode {
    type Err = MsgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_burst" => Ok(RotationMode::PerBurst),
            "per_phase" => Ok(RotationMode::PerPhase),
            "interval" => Ok(RotationMode::Interval),
            other => Err(MsgError::new(format!(
                "{other} is not one of per_burst, per_phase, interval"
            ))),
        }
    }
}

/// Radio environment class selecting the shadowing spread and the
/// noise floor of the channel model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnvClass {
    /// Indoor propagation.
    #[default]
    Indoor,
    /// Urban outdoor propagation.
    Urban,
    /// Rural outdoor propagation.
    Rural,
}

impl EnvClass {
    /// Standard deviation in dB of the log-normal shadowing term.
    pub fn shadowing_sigma(self) -> f64 {
        match self {
            EnvClass::Indoor => 3.0,
            EnvClass::Urban => 5.0,
            EnvClass::Rural => 2.0,
        }
    }

    /// Noise floor in dBm below which no frame is receivable.
    pub fn noise_floor(self) -> f64 {
        match self {
            EnvClass::Indoor => -90.0,
            EnvClass::Urban => -92.0,
            EnvClass::Rural => -95.0,
        }
    }
}

impl FromStr for EnvClass {
    type Err = MsgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indoor" => Ok(EnvClass::Indoor),
            "urban" => Ok(EnvClass::Urban),
            "rural" => Ok(EnvClass::Rural),
            other => Err(MsgError::new(format!(
                "{other} is not one of indoor, urban, rural"
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_phase_cycle() {
        assert_eq!(Phase::Locked.next(), Phase::Awake);
        assert_eq!(Phase::Awake.next(), Phase::Active);
        assert_eq!(Phase::Active.next(), Phase::Locked);
    }

    #[test]
    fn test_mac_policy_range() {
        assert_eq!(MacPolicy::from_config(2).unwrap(), MacPolicy::PreserveOui);
        assert!(MacPolicy::from_config(4).is_err());
    }

    #[test]
    fn test_rotation_mode_parse() {
        assert_eq!(
            RotationMode::from_str("per_burst").unwrap(),
            RotationMode::PerBurst
        );
        assert!(RotationMode::from_str("sometimes").is_err());
    }
}
