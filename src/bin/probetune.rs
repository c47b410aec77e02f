//! Search the tunable parameter space until the simulated capture's
//! metrics match a target record.
//!
//! Exits zero on normal completion whether or not the acceptance
//! thresholds were reached; nonzero only on unrecoverable I/O or
//! configuration errors.

use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;

use probesim::{
    oui::OuiRegistry,
    store::ParamStore,
    tune::{AutoTuner, DatasetKind, TuneOptions, TunePoint, TuneTarget},
};

#[derive(Debug, Parser)]
#[command(name = "probetune", about = "Auto-tune the synthesizer against target metrics")]
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

    /// JSON file with the target record `{"mcr": .., "numr": ..,
    /// "mciv": ..}`.
    #[arg(long)]
    target_json: PathBuf,

    /// Dataset shape: multi, single_switch, single_locked,
    /// single_awake, or single_active.
    #[arg(long, default_value = "multi")]
    dataset_type: DatasetKind,

    /// Simulated minutes per iteration.
    #[arg(long, default_value_t = 3)]
    duration_min: u64,

    /// Vendor filter for single-device iterations.
    #[arg(long)]
    brand: Option<String>,

    /// Model for single-device iterations.
    #[arg(long)]
    model: Option<String>,

    /// Maximum number of iterations.
    #[arg(long, default_value_t = 12)]
    max_iters: usize,

    /// Consecutive non-improvements before giving up.
    #[arg(long, default_value_t = 4)]
    patience: usize,

    /// Wall-clock budget in seconds.
    #[arg(long, default_value_t = 600)]
    walltime_sec: u64,

    /// Initial scale_between.
    #[arg(long, default_value_t = 1.0)]
    init_scale: f64,

    /// Initial spread_between.
    #[arg(long, default_value_t = 1.0)]
    init_spread: f64,

    /// Initial burst_gamma.
    #[arg(long, default_value_t = 0.30)]
    init_gamma: f64,

    /// Seed of the search and of the per-iteration simulations.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let target_text = fs::read_to_string(&cli.target_json)
        .with_context(|| format!("reading {}", cli.target_json.display()))?;
    let target: TuneTarget =
        serde_json::from_str(&target_text).context("parsing the target record")?;

    let store =
        ParamStore::load(&cli.hardware, &cli.behavior).context("loading parameter tables")?;
    let registry = OuiRegistry::load(&cli.oui).context("loading OUI database")?;

    let options = TuneOptions {
        dataset: cli.dataset_type,
        duration_secs: cli.duration_min as f64 * 60.0,
        brand: cli.brand,
        model: cli.model,
        max_iters: cli.max_iters,
        patience: cli.patience,
        walltime: Duration::from_secs(cli.walltime_sec),
        init: TunePoint {
            scale_between: cli.init_scale,
            spread_between: cli.init_spread,
            burst_gamma: cli.init_gamma,
        },
        seed: cli.seed,
    };

    let tuner = AutoTuner::new(&store, &registry, target, options);
    let outcome = tuner.run().context("running the search")?;

    if outcome.thresholds_met {
        log::info!("thresholds met with score {:.4}", outcome.best_score);
    } else {
        log::info!(
            "search stopped without meeting thresholds; best score {:.4}",
            outcome.best_score
        );
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
