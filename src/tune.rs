//! The auto-tune loop: treat the simulator as a black box, run short
//! simulations, score the extracted metrics against a target, and
//! search the three-parameter space with bounded random jitter around
//! the best point seen.
//!
//! # Design decisions
//!
//! The interesting engineering is in the evaluation pipeline's
//! robustness, not the search: metrics are read preferentially from
//! the structured stats JSON the engine writes, then from the summary
//! line in the text log, then estimated from the raw probe-id
//! mapping, and finally default to zero. Parsing never fails the
//! loop; only an invalid configuration does.

use std::{
    str::FromStr,
    time::{Duration, Instant},
};

use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    consts::sim::Phase,
    engine::{Engine, MemoryArtifacts, RunSinks, RunStats, Scenario, ScenarioParamsBuilder},
    err::{MsgError, SimError},
    metrics::{self, Metrics},
    oui::OuiRegistry,
    store::ParamStore,
};

const EPSILON: f64 = 1e-9;

/// Relative-error weights of the three target metrics.
const WEIGHT_MCR: f64 = 0.5;
const WEIGHT_NUMR: f64 = 0.3;
const WEIGHT_MCIV: f64 = 0.2;

/// Acceptance thresholds on the relative errors.
const THRESHOLD_MCR: f64 = 0.10;
const THRESHOLD_NUMR: f64 = 0.20;
const THRESHOLD_MCIV: f64 = 0.35;

/// Clamped search ranges of the three tunables.
const SCALE_RANGE: (f64, f64) = (0.30, 2.50);
const SPREAD_RANGE: (f64, f64) = (0.05, 1.50);
const GAMMA_RANGE: (f64, f64) = (0.01, 0.60);

/// The fraction of each range used as the jitter window.
const JITTER_FRACTION: f64 = 0.25;

/// The metric targets the loop drives toward.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TuneTarget {
    /// Target MAC change rate, in changes per second.
    #[serde(alias = "MCR")]
    pub mcr: f64,
    /// Target unique MAC ratio.
    #[serde(alias = "NUMR")]
    pub numr: f64,
    /// Target MAC change interval variance.
    #[serde(alias = "MCIV")]
    pub mciv: f64,
}

/// One point in the searched parameter space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TunePoint {
    /// Multiplier on inter-burst values.
    pub scale_between: f64,
    /// Mean-preserving spread of the inter-burst distribution.
    pub spread_between: f64,
    /// Exponent reshaping the burst-length distribution.
    pub burst_gamma: f64,
}

impl Default for TunePoint {
    fn default() -> Self {
        TunePoint {
            scale_between: 1.0,
            spread_between: 1.0,
            burst_gamma: 0.30,
        }
    }
}

fn clamp(v: f64, range: (f64, f64)) -> f64 {
    v.clamp(range.0, range.1)
}

impl TunePoint {
    /// Clamp every parameter into its search range.
    pub fn clamped(self) -> Self {
        TunePoint {
            scale_between: clamp(self.scale_between, SCALE_RANGE),
            spread_between: clamp(self.spread_between, SPREAD_RANGE),
            burst_gamma: clamp(self.burst_gamma, GAMMA_RANGE),
        }
    }

    /// Jitter every parameter uniformly inside a window of a quarter
    /// of its range, clamped to bounds.
    pub fn jittered<R>(self, rng: &mut R) -> Self
    where
        R: Rng,
    {
        let window = |range: (f64, f64)| JITTER_FRACTION * (range.1 - range.0);
        let w = window(SCALE_RANGE);
        let scale = self.scale_between + rng.gen_range(-w..w);
        let w = window(SPREAD_RANGE);
        let spread = self.spread_between + rng.gen_range(-w..w);
        let w = window(GAMMA_RANGE);
        let gamma = self.burst_gamma + rng.gen_range(-w..w);
        TunePoint {
            scale_between: scale,
            spread_between: spread,
            burst_gamma: gamma,
        }
        .clamped()
    }
}

/// The dataset shape an iteration simulates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetKind {
    /// Multi-device population.
    Multi,
    /// One device cycling phases.
    SingleSwitch,
    /// One device pinned to Locked.
    SingleLocked,
    /// One device pinned to Awake.
    SingleAwake,
    /// One device pinned to Active.
    SingleActive,
}

impl DatasetKind {
    fn scenario(self) -> Scenario {
        match self {
            DatasetKind::Multi => Scenario::MultiDevice,
            DatasetKind::SingleSwitch => Scenario::SingleSwitch,
            _ => Scenario::SingleStatic,
        }
    }

    fn phase(self) -> Phase {
        match self {
            DatasetKind::SingleAwake => Phase::Awake,
            DatasetKind::SingleActive => Phase::Active,
            _ => Phase::Locked,
        }
    }
}

impl FromStr for DatasetKind {
    type Err = MsgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi" => Ok(DatasetKind::Multi),
            "single_switch" => Ok(DatasetKind::SingleSwitch),
            "single_locked" => Ok(DatasetKind::SingleLocked),
            "single_awake" => Ok(DatasetKind::SingleAwake),
            "single_active" => Ok(DatasetKind::SingleActive),
            other => Err(MsgError::new(format!(
                "{other} is not one of multi, single_switch, single_locked, single_awake, single_active"
            ))),
        }
    }
}

/// Knobs of the search loop.
#[derive(Clone, Debug)]
pub struct TuneOptions {
    /// Dataset shape of every iteration.
    pub dataset: DatasetKind,
    /// Simulated duration per iteration, in seconds.
    pub duration_secs: f64,
    /// Vendor filter for single-device iterations.
    pub brand: Option<String>,
    /// Model for single-device iterations.
    pub model: Option<String>,
    /// Maximum number of iterations.
    pub max_iters: usize,
    /// Consecutive non-improvements before giving up.
    pub patience: usize,
    /// Wall-clock budget for the whole loop.
    pub walltime: Duration,
    /// Starting point of the search.
    pub init: TunePoint,
    /// Seed of the search (and of the per-iteration simulations).
    pub seed: u64,
}

impl Default for TuneOptions {
    fn default() -> Self {
        TuneOptions {
            dataset: DatasetKind::Multi,
            duration_secs: 180.0,
            brand: None,
            model: None,
            max_iters: 12,
            patience: 4,
            walltime: Duration::from_secs(600),
            init: TunePoint::default(),
            seed: 0,
        }
    }
}

/// The outcome of one iteration, kept in the returned history.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TuneIteration {
    /// Iteration index, starting at zero.
    pub iter: usize,
    /// The evaluated point.
    pub point: TunePoint,
    /// The metrics the evaluation extracted.
    pub metrics: Metrics,
    /// Weighted relative-error score; lower is better.
    pub score: f64,
    /// Whether this point became the new best.
    pub accepted: bool,
    /// Best score after this iteration; non-increasing over the
    /// history.
    pub best_score: f64,
}

/// The result of a search.
#[derive(Clone, Debug, Serialize)]
pub struct TuneOutcome {
    /// Best point found.
    pub best: TunePoint,
    /// Metrics of the best point.
    pub best_metrics: Metrics,
    /// Score of the best point.
    pub best_score: f64,
    /// Whether all three acceptance thresholds were met.
    pub thresholds_met: bool,
    /// Every iteration, in order.
    pub history: Vec<TuneIteration>,
}

/// Weighted relative-error score of `metrics` against `target`.
pub fn score(metrics: &Metrics, target: &TuneTarget) -> f64 {
    let e = |sim: f64, tgt: f64| (sim - tgt).abs() / (tgt.abs() + EPSILON);
    WEIGHT_MCR * e(metrics.mcr, target.mcr)
        + WEIGHT_NUMR * e(metrics.numr, target.numr)
        + WEIGHT_MCIV * e(metrics.mciv, target.mciv)
}

/// Whether every per-metric relative error is inside its acceptance
/// threshold.
pub fn thresholds_met(metrics: &Metrics, target: &TuneTarget) -> bool {
    let e = |sim: f64, tgt: f64| (sim - tgt).abs() / (tgt.abs() + EPSILON);
    e(metrics.mcr, target.mcr) <= THRESHOLD_MCR
        && e(metrics.numr, target.numr) <= THRESHOLD_NUMR
        && e(metrics.mciv, target.mciv) <= THRESHOLD_MCIV
}

/// Extract metrics from run artifacts through the parsing cascade:
/// stats JSON, then the log summary line, then the raw mapping, then
/// zeros. Never fails.
pub fn metrics_from_artifacts(artifacts: &MemoryArtifacts, segment_secs: f64) -> Metrics {
    if let Ok(stats) = serde_json::from_str::<RunStats>(&artifacts.stats.text()) {
        return stats.metrics;
    }
    for line in artifacts.log.text().lines() {
        if let Some(json) = line.strip_prefix("SUMMARY ") {
            if let Ok(stats) = serde_json::from_str::<RunStats>(json) {
                return stats.metrics;
            }
        }
    }
    let observations = metrics::observations_from_mapping(&artifacts.mapping.text());
    if !observations.is_empty() {
        return metrics::compute(&observations, segment_secs);
    }
    warn!("no artifact yielded metrics; scoring zeros");
    Metrics::default()
}

/// The search loop over a loaded store and registry.
pub struct AutoTuner<'a> {
    store: &'a ParamStore,
    registry: &'a OuiRegistry,
    target: TuneTarget,
    options: TuneOptions,
}

impl<'a> AutoTuner<'a> {
    /// Create a tuner for the given target.
    pub fn new(
        store: &'a ParamStore,
        registry: &'a OuiRegistry,
        target: TuneTarget,
        options: TuneOptions,
    ) -> Self {
        AutoTuner {
            store,
            registry,
            target,
            options,
        }
    }

    fn evaluate(&self, point: TunePoint, iteration: usize) -> Result<Metrics, SimError> {
        let dataset = self.options.dataset;
        let params = ScenarioParamsBuilder::default()
            .scenario(dataset.scenario())
            .single_phase(dataset.phase())
            .allow_state_switch(dataset == DatasetKind::SingleSwitch)
            .single_vendor(self.options.brand.clone())
            .single_model(self.options.model.clone())
            .duration_secs(self.options.duration_secs)
            .seed(self.options.seed.wrapping_add(iteration as u64))
            .scale_between(point.scale_between)
            .spread_between(point.spread_between)
            .burst_gamma(point.burst_gamma)
            .build()
            .map_err(|e| SimError::invariant(e.to_string()))?;
        let segment_secs = *params.segment_secs();

        let (sinks, artifacts) = RunSinks::in_memory();
        let engine = Engine::new(self.store, self.registry, params, sinks)?;
        engine.run()?;
        Ok(metrics_from_artifacts(&artifacts, segment_secs))
    }

    /// Run the search and return the best point, its metrics, and the
    /// full history.
    ///
    /// Engine failures other than invalid configuration count toward
    /// the patience counter; an invalid configuration aborts the
    /// search.
    pub fn run(&self) -> Result<TuneOutcome, SimError> {
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut history = Vec::new();
        let mut best = self.options.init.clamped();
        let mut best_metrics = Metrics::default();
        let mut best_score = f64::INFINITY;
        let mut met = false;
        let mut misses = 0usize;

        for iter in 0..self.options.max_iters {
            if started.elapsed() >= self.options.walltime {
                info!("wall-clock budget exhausted after {iter} iterations");
                break;
            }
            let point = if iter == 0 {
                best
            } else {
                best.jittered(&mut rng)
            };

            let metrics = match self.evaluate(point, iter) {
                Ok(metrics) => metrics,
                Err(SimError::Config(e)) => return Err(SimError::Config(e)),
                Err(e) => {
                    warn!("iteration {iter} failed: {e}");
                    misses += 1;
                    if misses >= self.options.patience {
                        break;
                    }
                    continue;
                }
            };
            let iteration_score = score(&metrics, &self.target);
            let accepted = iteration_score < best_score;
            if accepted {
                best = point;
                best_metrics = metrics;
                best_score = iteration_score;
                met = thresholds_met(&metrics, &self.target);
                misses = 0;
            } else {
                misses += 1;
            }
            info!(
                "iter {iter}: score {iteration_score:.4} (best {best_score:.4}){}",
                if accepted { " *" } else { "" }
            );
            history.push(TuneIteration {
                iter,
                point,
                metrics,
                score: iteration_score,
                accepted,
                best_score,
            });

            if met {
                info!("all acceptance thresholds met after {} iterations", iter + 1);
                break;
            }
            if misses >= self.options.patience {
                info!("no improvement in {misses} iterations; stopping");
                break;
            }
        }

        Ok(TuneOutcome {
            best,
            best_metrics,
            best_score,
            thresholds_met: met,
            history,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::{rngs::StdRng, SeedableRng};

    use crate::engine::MemSink;

    #[test]
    fn test_score_is_zero_at_target() {
        let target = TuneTarget {
            mcr: 0.464,
            numr: 0.033,
            mciv: 1.32e6,
        };
        let metrics = Metrics {
            mcr: 0.464,
            numr: 0.033,
            mciv: 1.32e6,
            mae: 0.0,
            mean_gap: 0.0,
        };
        assert!(score(&metrics, &target) < 1e-9);
        assert!(thresholds_met(&metrics, &target));
    }

    #[test]
    fn test_score_weights() {
        let target = TuneTarget {
            mcr: 1.0,
            numr: 1.0,
            mciv: 1.0,
        };
        let metrics = Metrics {
            mcr: 2.0,
            numr: 1.0,
            mciv: 1.0,
            mae: 0.0,
            mean_gap: 0.0,
        };
        // Only MCR is off, by a relative error of 1.
        assert!((score(&metrics, &target) - 0.5).abs() < 1e-9);
        assert!(!thresholds_met(&metrics, &target));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut point = TunePoint::default();
        for _ in 0..500 {
            point = point.jittered(&mut rng);
            assert!((SCALE_RANGE.0..=SCALE_RANGE.1).contains(&point.scale_between));
            assert!((SPREAD_RANGE.0..=SPREAD_RANGE.1).contains(&point.spread_between));
            assert!((GAMMA_RANGE.0..=GAMMA_RANGE.1).contains(&point.burst_gamma));
        }
    }

    fn artifacts_with(stats: &str, log: &str, mapping: &str) -> MemoryArtifacts {
        use std::io::Write;

        let artifacts = MemoryArtifacts {
            capture: MemSink::new(),
            log: MemSink::new(),
            mapping: MemSink::new(),
            devices: MemSink::new(),
            stats: MemSink::new(),
        };
        write!(artifacts.stats.clone(), "{stats}").unwrap();
        write!(artifacts.log.clone(), "{log}").unwrap();
        write!(artifacts.mapping.clone(), "{mapping}").unwrap();
        artifacts
    }

    #[test]
    fn test_cascade_prefers_stats_json() {
        let stats = r#"{"frames":10,"devices":1,"distinct_macs":1,"duration_secs":60.0,
            "metrics":{"mcr":0.5,"numr":0.1,"mciv":2.0,"mae":0.0,"mean_gap":1.0}}"#;
        let metrics = metrics_from_artifacts(&artifacts_with(stats, "", ""), 30.0);
        assert!((metrics.mcr - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_cascade_falls_back_to_log_summary() {
        let log = concat!(
            "[1.000000] dev=0 mac=02:00:00:00:00:01 ch=6 rssi=-60\n",
            "SUMMARY {\"frames\":10,\"devices\":1,\"distinct_macs\":1,\"duration_secs\":60.0,",
            "\"metrics\":{\"mcr\":0.25,\"numr\":0.1,\"mciv\":2.0,\"mae\":0.0,\"mean_gap\":1.0}}\n",
        );
        let metrics = metrics_from_artifacts(&artifacts_with("not json", log, ""), 30.0);
        assert!((metrics.mcr - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_cascade_falls_back_to_mapping() {
        let mapping = "0.000000\t0\t02:00:00:00:00:01\n30.000000\t0\t02:00:00:00:00:02\n";
        let metrics = metrics_from_artifacts(&artifacts_with("", "", mapping), 30.0);
        assert!(metrics.numr > 0.0);
    }

    #[test]
    fn test_cascade_defaults_to_zeros() {
        let metrics = metrics_from_artifacts(&artifacts_with("", "", ""), 30.0);
        assert_eq!(metrics, Metrics::default());
    }

    const HARDWARE: &str = "Apple,xiaomi_auto,3:1.0,1,?,00,2d00,2:1.0,\n";
    const BEHAVIOR: &str = "\
xiaomi_auto,0,0.02:1.0,2.0:1.0,600.0:1.0,0:1.0
xiaomi_auto,1,0.02:1.0,2.0:1.0,600.0:1.0,0:1.0
xiaomi_auto,2,0.02:1.0,2.0:1.0,600.0:1.0,0:1.0
";

    #[test]
    fn test_search_history_best_score_is_non_increasing() {
        let store = ParamStore::from_readers(HARDWARE.as_bytes(), BEHAVIOR.as_bytes()).unwrap();
        let registry = OuiRegistry::from_reader("".as_bytes()).unwrap();
        let target = TuneTarget {
            mcr: 0.5,
            numr: 0.33,
            mciv: 0.0,
        };
        let options = TuneOptions {
            dataset: DatasetKind::SingleActive,
            duration_secs: 30.0,
            model: Some("xiaomi_auto".to_string()),
            max_iters: 5,
            patience: 5,
            walltime: Duration::from_secs(60),
            ..TuneOptions::default()
        };
        let tuner = AutoTuner::new(&store, &registry, target, options);
        let outcome = tuner.run().unwrap();

        assert!(!outcome.history.is_empty());
        for pair in outcome.history.windows(2) {
            assert!(pair[1].best_score <= pair[0].best_score);
        }
        assert!(outcome.best_score.is_finite());
    }

    #[test]
    fn test_unknown_model_aborts_the_search() {
        let store = ParamStore::from_readers(HARDWARE.as_bytes(), BEHAVIOR.as_bytes()).unwrap();
        let registry = OuiRegistry::from_reader("".as_bytes()).unwrap();
        let options = TuneOptions {
            dataset: DatasetKind::SingleActive,
            duration_secs: 10.0,
            model: Some("missing_model".to_string()),
            max_iters: 3,
            ..TuneOptions::default()
        };
        let tuner = AutoTuner::new(&store, &registry, TuneTarget::default(), options);
        assert!(tuner.run().is_err());
    }
}
