//! Run one simulation scenario and leave the capture plus companion
//! artifacts in the output directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use probesim::{
    consts::sim::{EnvClass, Phase, RotationMode},
    engine::{Engine, RunSinks, Scenario, ScenarioParamsBuilder},
    oui::OuiRegistry,
    store::ParamStore,
};

#[derive(Debug, Parser)]
#[command(name = "probesim", about = "Synthesize 802.11 probe request captures")]
struct Cli {
    /// Hardware parameter file.
    #[arg(long)]
    hardware: PathBuf,

    /// Behavior parameter file.
    #[arg(long)]
    behavior: PathBuf,

    /// IEEE OUI text database.
    #[arg(long)]
    oui: PathBuf,

    /// Output directory for the run artifacts.
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Scenario: multi_device, single_switch, or single_static.
    #[arg(long, default_value = "multi_device")]
    scenario: Scenario,

    /// Simulated duration in seconds.
    #[arg(long, default_value_t = 300.0)]
    duration_secs: f64,

    /// RNG seed; equal seeds give byte-identical captures.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Sleep real wall-clock time between events.
    #[arg(long)]
    realtime: bool,

    /// Devices a multi-device scenario creates.
    #[arg(long, default_value_t = 10)]
    creation_count: usize,

    /// Mean inter-arrival time in seconds.
    #[arg(long, default_value_t = 10.0)]
    creation_interval_mean: f64,

    /// Multiplier on the inter-arrival mean.
    #[arg(long, default_value_t = 1.0)]
    creation_interval_multiplier: f64,

    /// Mean device permanence in seconds.
    #[arg(long, default_value_t = 60.0)]
    permanence_mean: f64,

    /// Multiplier on every inter-burst draw.
    #[arg(long, default_value_t = 1.0)]
    burst_interval_multiplier: f64,

    /// Multiplier on every dwell draw.
    #[arg(long, default_value_t = 1.0)]
    dwell_multiplier: f64,

    /// Environment class: indoor, urban, or rural.
    #[arg(long, default_value = "indoor")]
    env: EnvClass,

    /// External factor multiplied into the received power.
    #[arg(long, default_value_t = 1.0)]
    env_factor: f64,

    /// Independent interference drop probability.
    #[arg(long, default_value_t = 0.0)]
    interference_prob: f64,

    /// Probability of reparsing an emitted frame as a self check.
    #[arg(long, default_value_t = 0.0)]
    qa_sample_rate: f64,

    /// MAC rotation mode: per_burst, per_phase, or interval.
    #[arg(long, default_value = "per_burst")]
    mac_rotation_mode: RotationMode,

    /// Rotation interval in seconds for interval mode.
    #[arg(long, default_value_t = 60.0)]
    rotation_interval_secs: f64,

    /// Multiplier on device walking speed.
    #[arg(long, default_value_t = 1.0)]
    mobility_speed_multiplier: f64,

    /// Vendor filter for single-device scenarios.
    #[arg(long)]
    single_vendor: Option<String>,

    /// Model for single-device scenarios.
    #[arg(long)]
    single_model: Option<String>,

    /// Starting (or pinned) phase for single-device scenarios
    /// (0=Locked, 1=Awake, 2=Active).
    #[arg(long, default_value_t = 0)]
    single_phase: u8,

    /// Whether a single_switch run may change phase.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    allow_state_switch: bool,

    /// Tunable: multiplier on inter-burst values.
    #[arg(long, default_value_t = 1.0)]
    scale_between: f64,

    /// Tunable: mean-preserving spread of the inter-burst
    /// distribution.
    #[arg(long, default_value_t = 1.0)]
    spread_between: f64,

    /// Tunable: exponent reshaping the burst-length distribution.
    #[arg(long, default_value_t = 1.0)]
    burst_gamma: f64,

    /// Segment length in seconds for the reported metrics.
    #[arg(long, default_value_t = 30.0)]
    segment_secs: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let phase = match Phase::from(cli.single_phase) {
        Phase::UnrecognizedVariant(bad) => {
            anyhow::bail!("--single-phase {bad} is outside of 0..=2")
        }
        phase => phase,
    };

    let store = ParamStore::load(&cli.hardware, &cli.behavior)
        .context("loading parameter tables")?;
    let registry = OuiRegistry::load(&cli.oui).context("loading OUI database")?;

    let params = ScenarioParamsBuilder::default()
        .scenario(cli.scenario)
        .duration_secs(cli.duration_secs)
        .seed(cli.seed)
        .realtime(cli.realtime)
        .creation_count(cli.creation_count)
        .creation_interval_mean(cli.creation_interval_mean)
        .creation_interval_multiplier(cli.creation_interval_multiplier)
        .permanence_mean(cli.permanence_mean)
        .burst_interval_multiplier(cli.burst_interval_multiplier)
        .dwell_multiplier(cli.dwell_multiplier)
        .env(cli.env)
        .env_factor(cli.env_factor)
        .interference_prob(cli.interference_prob)
        .qa_sample_rate(cli.qa_sample_rate)
        .mac_rotation_mode(cli.mac_rotation_mode)
        .rotation_interval_secs(cli.rotation_interval_secs)
        .mobility_speed_multiplier(cli.mobility_speed_multiplier)
        .single_vendor(cli.single_vendor)
        .single_model(cli.single_model)
        .single_phase(phase)
        .allow_state_switch(cli.allow_state_switch)
        .scale_between(cli.scale_between)
        .spread_between(cli.spread_between)
        .burst_gamma(cli.burst_gamma)
        .segment_secs(cli.segment_secs)
        .build()
        .context("assembling scenario parameters")?;

    let sinks = RunSinks::in_dir(&cli.out)
        .with_context(|| format!("creating artifacts under {}", cli.out.display()))?;
    let engine = Engine::new(&store, &registry, params, sinks).context("building the engine")?;
    let stats = engine.run().context("running the simulation")?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
