//! The metrics extractor: MAC change rate, unique MAC ratio, change
//! interval variance, address entropy, and the mean inter-frame gap,
//! computed over fixed-length segments and aggregated by median for
//! robustness against bursty edges.

use std::{collections::HashMap, io::Read, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{err::SimError, frame::ProbeFrame, pcap::PcapReader, types::MacAddr};

/// The quality metrics of one capture (or one segment of it).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// MAC change rate in changes per second.
    pub mcr: f64,
    /// Distinct MACs divided by total frames.
    pub numr: f64,
    /// Variance of the gaps between consecutive MAC change events,
    /// in seconds squared.
    pub mciv: f64,
    /// Shannon entropy of the MAC frequency distribution, normalized
    /// to [0, 1].
    pub mae: f64,
    /// Mean inter-frame gap in seconds.
    pub mean_gap: f64,
}

/// One observation: a timestamp in seconds and the source address.
pub type Observation = (f64, MacAddr);

/// Compute the metrics of one segment of observations, ordered by
/// timestamp. `segment_secs` is the nominal segment length used as
/// the MCR denominator.
fn segment_metrics(observations: &[Observation], segment_secs: f64) -> Metrics {
    let frames = observations.len();
    if frames == 0 {
        return Metrics::default();
    }

    let mut changes = 0usize;
    let mut change_times = Vec::new();
    for pair in observations.windows(2) {
        if pair[0].1 != pair[1].1 {
            changes += 1;
            change_times.push(pair[1].0);
        }
    }

    let mut frequency: HashMap<MacAddr, usize> = HashMap::new();
    for (_, mac) in observations {
        *frequency.entry(*mac).or_insert(0) += 1;
    }
    let distinct = frequency.len();

    let mcr = changes as f64 / segment_secs;
    let numr = distinct as f64 / frames as f64;
    let mciv = if change_times.len() < 2 {
        0.0
    } else {
        let gaps: Vec<f64> = change_times.windows(2).map(|w| w[1] - w[0]).collect();
        variance(&gaps)
    };
    let mae = if distinct <= 1 {
        0.0
    } else {
        let entropy: f64 = frequency
            .values()
            .map(|&count| {
                let p = count as f64 / frames as f64;
                -p * p.ln()
            })
            .sum();
        entropy / (distinct as f64).ln()
    };
    let mean_gap = if frames < 2 {
        0.0
    } else {
        let first = observations[0].0;
        let last = observations[frames - 1].0;
        (last - first) / (frames - 1) as f64
    };

    Metrics {
        mcr,
        numr,
        mciv,
        mae,
        mean_gap,
    }
}

fn variance(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Partition the observations into `floor(T / segment_secs)`
/// segments and aggregate the per-segment metrics by median. A trace
/// shorter than one segment is treated as a single segment; segments
/// that caught no frames are skipped.
pub fn compute(observations: &[Observation], segment_secs: f64) -> Metrics {
    if observations.is_empty() || segment_secs <= 0.0 {
        return Metrics::default();
    }
    let start = observations[0].0;
    let end = observations[observations.len() - 1].0;
    let segments = (((end - start) / segment_secs).floor() as usize).max(1);

    let mut per_segment = Vec::with_capacity(segments);
    for i in 0..segments {
        let lo = start + i as f64 * segment_secs;
        // The last segment absorbs the partial tail.
        let hi = if i == segments - 1 {
            f64::INFINITY
        } else {
            lo + segment_secs
        };
        let slice: Vec<Observation> = observations
            .iter()
            .filter(|(ts, _)| *ts >= lo && *ts < hi)
            .cloned()
            .collect();
        if !slice.is_empty() {
            per_segment.push(segment_metrics(&slice, segment_secs));
        }
    }

    Metrics {
        mcr: median(per_segment.iter().map(|m| m.mcr).collect()),
        numr: median(per_segment.iter().map(|m| m.numr).collect()),
        mciv: median(per_segment.iter().map(|m| m.mciv).collect()),
        mae: median(per_segment.iter().map(|m| m.mae).collect()),
        mean_gap: median(per_segment.iter().map(|m| m.mean_gap).collect()),
    }
}

/// Read `(timestamp, source MAC)` observations back out of a capture
/// stream.
pub fn observations_from_capture<R>(reader: R) -> Result<Vec<Observation>, SimError>
where
    R: Read,
{
    let mut reader = PcapReader::new(reader)?;
    let mut observations = Vec::new();
    while let Some((micros, bytes)) = reader.next_frame()? {
        let frame = crate::deserialize::<ProbeFrame>(&bytes)?;
        observations.push((crate::consts::micros_to_secs(micros), frame.source()));
    }
    Ok(observations)
}

/// Parse observations from the probe-id mapping text: one
/// tab-separated `timestamp device_id mac` line per emitted frame.
/// Unparseable lines are skipped rather than fatal, matching how the
/// tuner treats partially written artifacts.
pub fn observations_from_mapping(text: &str) -> Vec<Observation> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let ts = fields.next()?.trim().parse::<f64>().ok()?;
            let _device_id = fields.next()?;
            let mac = MacAddr::from_str(fields.next()?.trim()).ok()?;
            Some((ts, mac))
        })
        .collect()
}
