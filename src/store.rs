//! The device parameter store: per-model hardware profiles and
//! per-(model, phase) behavior profiles loaded from the two tabular
//! configuration files.
//!
//! # Design decisions
//! Profiles are immutable after load. The scenario-level and
//! tuner-level adjustments are expressed through the pure operators
//! on [`DiscreteDistribution`], producing fresh distributions at
//! device creation time and leaving the store untouched for the next
//! run.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use derive_builder::Builder;
use getset::Getters;
use log::{debug, info};
use rand::Rng;

use crate::{
    consts::sim::{MacPolicy, Phase},
    dist::DiscreteDistribution,
    err::{ConfigError, SimError},
    types::Buffer,
};

/// Per-model hardware parameters from the primary configuration
/// file.
#[derive(Builder, Clone, Debug, Getters)]
#[builder(pattern = "owned")]
pub struct HardwareProfile {
    /// Vendor name as spelled in the configuration.
    #[getset(get = "pub")]
    vendor: String,
    /// Model name, the lookup key.
    #[getset(get = "pub")]
    model: String,
    /// Burst length distribution; values are positive frame counts.
    #[getset(get = "pub")]
    burst_lengths: DiscreteDistribution,
    /// MAC randomization policy of the model.
    #[getset(get = "pub")]
    mac_policy: MacPolicy,
    /// VHT capability bytes; [`None`] when the model declines to
    /// advertise VHT (`?` in the file).
    #[getset(get = "pub")]
    vht_cap: Option<Buffer>,
    /// Extended capability bytes.
    #[getset(get = "pub")]
    ext_cap: Buffer,
    /// HT capability bytes.
    #[getset(get = "pub")]
    ht_cap: Buffer,
    /// Supported rates in 500 kbps units.
    #[getset(get = "pub")]
    rates: Vec<u8>,
    /// Extended supported rates in 500 kbps units.
    #[getset(get = "pub")]
    ext_rates: Vec<u8>,
}

/// Per-(model, phase) behavioral parameters.
#[derive(Builder, Clone, Debug, Getters)]
#[builder(pattern = "owned")]
pub struct BehaviorProfile {
    /// Model the record belongs to.
    #[getset(get = "pub")]
    model: String,
    /// Phase the record belongs to.
    #[getset(get = "pub")]
    phase: Phase,
    /// Interval between frames inside one burst, in seconds.
    #[getset(get = "pub")]
    intra_burst: DiscreteDistribution,
    /// Interval between consecutive bursts, in seconds.
    #[getset(get = "pub")]
    inter_burst: DiscreteDistribution,
    /// Dwell time in the phase before a state switch, in seconds.
    #[getset(get = "pub")]
    dwell: DiscreteDistribution,
    /// Per-packet timestamp jitter, in seconds.
    #[getset(get = "pub")]
    jitter: DiscreteDistribution,
}

/// The loaded parameter tables, with lookups by model and
/// (model, phase).
#[derive(Clone, Debug, Default)]
pub struct ParamStore {
    hardware: HashMap<String, HardwareProfile>,
    models: Vec<String>,
    behavior: HashMap<(String, u8), BehaviorProfile>,
}

fn parse_hex_field(field: &str) -> Result<Buffer, String> {
    let field = field.trim();
    if field.len() % 2 != 0 {
        return Err(format!("hex field {field} has an odd number of digits"));
    }
    let mut bytes = Vec::with_capacity(field.len() / 2);
    for i in (0..field.len()).step_by(2) {
        let byte = u8::from_str_radix(&field[i..i + 2], 16)
            .map_err(|_| format!("{field} is not a hex string"))?;
        bytes.push(byte);
    }
    Ok(Buffer::from(bytes))
}

/// Parse a `rate:prob/rate:prob/...` field into the integer rate
/// sequence, in 500 kbps units. The probabilities are analysis-side
/// metadata and are ignored at composition time.
fn parse_rates(field: &str) -> Result<Vec<u8>, String> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(Vec::new());
    }
    let mut rates = Vec::new();
    for pair in field.split('/') {
        let rate = pair.split(':').next().unwrap_or(pair).trim();
        let rate = rate
            .parse::<u8>()
            .map_err(|_| format!("{rate} is not a rate in 500 kbps units"))?;
        rates.push(rate);
    }
    Ok(rates)
}

fn split_record(line: &str, fields: usize) -> Vec<&str> {
    let mut record: Vec<&str> = line.split(',').map(str::trim).collect();
    // Missing trailing fields default to empty.
    while record.len() < fields {
        record.push("");
    }
    record
}

impl ParamStore {
    /// Load both parameter tables from the given paths.
    pub fn load<P>(hardware_path: P, behavior_path: P) -> Result<Self, SimError>
    where
        P: AsRef<Path>,
    {
        let hardware_path = hardware_path.as_ref();
        let behavior_path = behavior_path.as_ref();
        let hardware = File::open(hardware_path)
            .map_err(|e| SimError::missing_resource(format!("{}: {e}", hardware_path.display())))?;
        let behavior = File::open(behavior_path)
            .map_err(|e| SimError::missing_resource(format!("{}: {e}", behavior_path.display())))?;
        let store = Self::from_readers(BufReader::new(hardware), BufReader::new(behavior))?;
        info!(
            "loaded {} hardware profiles and {} behavior records",
            store.models.len(),
            store.behavior.len()
        );
        Ok(store)
    }

    /// Parse both parameter tables from readers.
    pub fn from_readers<H, B>(hardware: H, behavior: B) -> Result<Self, SimError>
    where
        H: BufRead,
        B: BufRead,
    {
        let mut store = ParamStore::default();
        for (index, line) in hardware.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            store.push_hardware_record(line, index + 1)?;
        }
        for (index, line) in behavior.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            store.push_behavior_record(line, index + 1)?;
        }
        store.check_coverage()?;
        Ok(store)
    }

    fn push_hardware_record(&mut self, line: &str, line_no: usize) -> Result<(), ConfigError> {
        let record = split_record(line, 9);
        if record[0].is_empty() || record[1].is_empty() {
            return Err(ConfigError::record(
                "hardware",
                line_no,
                "vendor and model must be non-empty",
            ));
        }
        let burst_lengths = DiscreteDistribution::parse(record[2])
            .map_err(|e| ConfigError::record("hardware", line_no, e))?;
        if burst_lengths
            .entries()
            .iter()
            .any(|(v, _)| *v < 1.0 || v.fract() != 0.0)
        {
            return Err(ConfigError::record(
                "hardware",
                line_no,
                "burst lengths must be positive integers",
            ));
        }
        let policy_value = record[3]
            .parse::<u8>()
            .map_err(|_| ConfigError::record("hardware", line_no, "MAC policy is not a number"))?;
        let mac_policy = MacPolicy::from_config(policy_value)
            .map_err(|e| ConfigError::record("hardware", line_no, e))?;
        let vht_cap = match record[4] {
            "?" => None,
            field => Some(
                parse_hex_field(field).map_err(|e| ConfigError::record("hardware", line_no, e))?,
            ),
        };
        let ext_cap =
            parse_hex_field(record[5]).map_err(|e| ConfigError::record("hardware", line_no, e))?;
        let ht_cap =
            parse_hex_field(record[6]).map_err(|e| ConfigError::record("hardware", line_no, e))?;
        let rates =
            parse_rates(record[7]).map_err(|e| ConfigError::record("hardware", line_no, e))?;
        let ext_rates =
            parse_rates(record[8]).map_err(|e| ConfigError::record("hardware", line_no, e))?;
        let profile = HardwareProfileBuilder::default()
            .vendor(record[0].to_string())
            .model(record[1].to_string())
            .burst_lengths(burst_lengths)
            .mac_policy(mac_policy)
            .vht_cap(vht_cap)
            .ext_cap(ext_cap)
            .ht_cap(ht_cap)
            .rates(rates)
            .ext_rates(ext_rates)
            .build()
            .map_err(|e| ConfigError::record("hardware", line_no, e))?;
        debug!("hardware profile {} loaded", profile.model());
        if !self.hardware.contains_key(profile.model()) {
            self.models.push(profile.model().clone());
        }
        self.hardware.insert(profile.model().clone(), profile);
        Ok(())
    }

    fn push_behavior_record(&mut self, line: &str, line_no: usize) -> Result<(), ConfigError> {
        let record = split_record(line, 6);
        if record[0].is_empty() {
            return Err(ConfigError::record(
                "behavior",
                line_no,
                "model must be non-empty",
            ));
        }
        let phase_value = record[1]
            .parse::<u8>()
            .map_err(|_| ConfigError::record("behavior", line_no, "phase is not a number"))?;
        let phase = match Phase::from(phase_value) {
            Phase::UnrecognizedVariant(bad) => {
                return Err(ConfigError::record(
                    "behavior",
                    line_no,
                    format!("phase {bad} is outside of 0..=2"),
                ))
            }
            phase => phase,
        };
        let mut dists = Vec::with_capacity(4);
        for field in &record[2..6] {
            dists.push(
                DiscreteDistribution::parse(field)
                    .map_err(|e| ConfigError::record("behavior", line_no, e))?,
            );
        }
        let jitter = dists.pop().expect("four distribution fields were parsed");
        let dwell = dists.pop().expect("four distribution fields were parsed");
        let inter_burst = dists.pop().expect("four distribution fields were parsed");
        let intra_burst = dists.pop().expect("four distribution fields were parsed");
        let profile = BehaviorProfileBuilder::default()
            .model(record[0].to_string())
            .phase(phase)
            .intra_burst(intra_burst)
            .inter_burst(inter_burst)
            .dwell(dwell)
            .jitter(jitter)
            .build()
            .map_err(|e| ConfigError::record("behavior", line_no, e))?;
        self.behavior
            .insert((record[0].to_string(), phase_value), profile);
        Ok(())
    }

    /// Verify that every hardware model has a behavior row for each
    /// of the three phases.
    fn check_coverage(&self) -> Result<(), ConfigError> {
        for model in &self.models {
            for phase in Phase::ALL {
                let key = (model.clone(), u8::from(phase));
                if !self.behavior.contains_key(&key) {
                    return Err(ConfigError::MissingBehavior {
                        model: model.clone(),
                        phase: u8::from(phase),
                    });
                }
            }
        }
        Ok(())
    }

    /// The hardware profile for `model`.
    pub fn hardware(&self, model: &str) -> Result<&HardwareProfile, ConfigError> {
        self.hardware
            .get(model)
            .ok_or_else(|| ConfigError::UnknownModel(model.to_string()))
    }

    /// The behavior profile for `(model, phase)`.
    pub fn behavior(&self, model: &str, phase: Phase) -> Result<&BehaviorProfile, ConfigError> {
        self.behavior
            .get(&(model.to_string(), u8::from(phase)))
            .ok_or_else(|| ConfigError::MissingBehavior {
                model: model.to_string(),
                phase: u8::from(phase),
            })
    }

    /// All model names, in file order.
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Pick one model uniformly for a multi-device scenario.
    pub fn sample_model<R>(&self, rng: &mut R) -> Result<&HardwareProfile, ConfigError>
    where
        R: Rng,
    {
        if self.models.is_empty() {
            return Err(ConfigError::UnknownModel(
                "no hardware profiles loaded".to_string(),
            ));
        }
        let index = rng.gen_range(0..self.models.len());
        self.hardware(&self.models[index])
    }

    /// Whether the model emits probe requests at all in the given
    /// phase. The behavior file encodes silence as an inter-burst
    /// distribution with all mass at zero.
    pub fn is_sending_probe(&self, model: &str, phase: Phase) -> Result<bool, ConfigError> {
        Ok(!self.behavior(model, phase)?.inter_burst().is_silent())
    }
}
