use crate::detectors::apnea::{Episode, EpisodeKind};
use serde::{Deserialize, Serialize};

/// Episode converted to seconds, numbered from 1 in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub number: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    #[serde(rename = "type")]
    pub kind: EpisodeKind,
}

pub fn aggregate(episodes: &[Episode], fs: f64) -> Vec<EpisodeRecord> {
    episodes
        .iter()
        .enumerate()
        .map(|(i, episode)| {
            let start_time = episode.start as f64 / fs;
            let end_time = episode.end as f64 / fs;
            EpisodeRecord {
                number: i + 1,
                start_time,
                end_time,
                duration: end_time - start_time,
                kind: episode.kind,
            }
        })
        .collect()
}

/// Report-level statistics over a list of episode records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub count: usize,
    pub apnea_count: usize,
    pub hypopnea_count: usize,
    pub recording_duration_s: f64,
    pub mean_duration: Option<f64>,
    pub median_duration: Option<f64>,
    pub q25_duration: Option<f64>,
    pub q75_duration: Option<f64>,
    /// Episodes starting in the first, second and last third of the recording.
    pub thirds: [usize; 3],
}

pub fn summarize(records: &[EpisodeRecord], recording_duration_s: f64) -> EpisodeSummary {
    let count_kind = |kind| records.iter().filter(|r| r.kind == kind).count();
    let mut durations: Vec<f64> = records.iter().map(|r| r.duration).collect();
    durations.sort_by(|a, b| a.total_cmp(b));
    let mean_duration = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    };

    let mut thirds = [0usize; 3];
    let third = recording_duration_s / 3.0;
    for record in records {
        let slot = if record.start_time < third {
            0
        } else if record.start_time < 2.0 * third {
            1
        } else {
            2
        };
        thirds[slot] += 1;
    }

    EpisodeSummary {
        count: records.len(),
        apnea_count: count_kind(EpisodeKind::Apnea),
        hypopnea_count: count_kind(EpisodeKind::Hypopnea),
        recording_duration_s,
        mean_duration,
        median_duration: quantile(&durations, 0.5),
        q25_duration: quantile(&durations, 0.25),
        q75_duration: quantile(&durations, 0.75),
        thirds,
    }
}

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}
