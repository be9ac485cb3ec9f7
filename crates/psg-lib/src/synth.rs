//! Seeded synthetic polysomnography recordings.
//!
//! Airflow is a breathing cosine; apnea events flatten it, hypopnea events
//! scale it down. Every event is followed by a saturation dip. Thoracic and
//! abdominal effort keep breathing throughout (obstructive pattern).

use crate::detectors::apnea::EpisodeKind;
use crate::signal::{Polysomnogram, StageSeries};
use anyhow::{ensure, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticEvent {
    pub kind: EpisodeKind,
    pub start_s: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticSpec {
    pub fs: f64,
    pub duration_s: f64,
    pub breath_hz: f64,
    pub amplitude: f64,
    /// Uniform noise half-width added to airflow and effort channels.
    pub noise: f64,
    /// Airflow scale inside hypopnea events.
    pub hypopnea_scale: f64,
    pub baseline_spo2: f64,
    pub desaturation: f64,
    pub desaturation_s: f64,
    pub epoch_s: f64,
    /// Wake at the start and end of the hypnogram (seconds).
    pub wake_lead_s: f64,
    pub wake_tail_s: f64,
    pub events: Vec<SyntheticEvent>,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            fs: 200.0,
            duration_s: 600.0,
            breath_hz: 0.25,
            amplitude: 1.0,
            noise: 0.0,
            hypopnea_scale: 0.3,
            baseline_spo2: 96.0,
            desaturation: 6.0,
            desaturation_s: 10.0,
            epoch_s: 30.0,
            wake_lead_s: 0.0,
            wake_tail_s: 0.0,
            events: Vec::new(),
            seed: 0,
        }
    }
}

pub struct SyntheticRecording {
    pub psg: Polysomnogram,
    pub stages: StageSeries,
}

/// Build a recording from `spec`.
///
/// Fails on non-positive rates or lengths and on negative event, desaturation
/// or noise durations.
pub fn synthesize(spec: &SyntheticSpec) -> Result<SyntheticRecording> {
    ensure!(
        spec.fs > 0.0 && spec.duration_s > 0.0 && spec.epoch_s > 0.0,
        "sample rate, duration and epoch length must be positive"
    );
    ensure!(
        spec.noise >= 0.0 && spec.desaturation_s >= 0.0,
        "noise and desaturation length must not be negative"
    );
    for event in &spec.events {
        ensure!(
            event.start_s >= 0.0 && event.duration_s >= 0.0,
            "{} event at {} s lasting {} s: start and duration must not be negative",
            event.kind.as_str(),
            event.start_s,
            event.duration_s
        );
    }

    let len = (spec.duration_s * spec.fs).round() as usize;
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let noise = |rng: &mut StdRng| -> f64 {
        if spec.noise > 0.0 {
            rng.gen_range(-spec.noise..=spec.noise)
        } else {
            0.0
        }
    };

    let to_index = |seconds: f64| ((seconds * spec.fs).round() as usize).min(len);
    let mut scale = vec![1.0; len];
    let mut spo2 = vec![spec.baseline_spo2; len];
    for event in &spec.events {
        let start = to_index(event.start_s);
        let end = to_index(event.start_s + event.duration_s);
        let factor = match event.kind {
            EpisodeKind::Apnea => 0.0,
            EpisodeKind::Hypopnea => spec.hypopnea_scale,
        };
        for value in &mut scale[start..end] {
            *value = factor;
        }
        let dip_end = to_index(event.start_s + event.duration_s + spec.desaturation_s);
        for value in &mut spo2[end..dip_end] {
            *value = spec.baseline_spo2 - spec.desaturation;
        }
    }

    let mut airflow = Vec::with_capacity(len);
    let mut chest = Vec::with_capacity(len);
    let mut abdomen = Vec::with_capacity(len);
    for (n, &factor) in scale.iter().enumerate() {
        let phase = 2.0 * PI * spec.breath_hz * n as f64 / spec.fs;
        airflow.push(factor * (spec.amplitude * phase.cos() + noise(&mut rng)));
        chest.push(0.8 * spec.amplitude * (phase - 0.3).cos() + noise(&mut rng));
        abdomen.push(0.6 * spec.amplitude * (phase - 0.6).cos() + noise(&mut rng));
    }

    let mut psg = Polysomnogram::new(spec.fs);
    psg.insert("Airflow", airflow);
    psg.insert("Chest", chest);
    psg.insert("Abdomen", abdomen);
    psg.insert("SaO2", spo2);

    let epochs = (spec.duration_s / spec.epoch_s).ceil() as usize;
    let stages = (0..epochs)
        .map(|e| {
            let t = e as f64 * spec.epoch_s;
            if t < spec.wake_lead_s || t >= spec.duration_s - spec.wake_tail_s {
                0
            } else {
                2
            }
        })
        .collect();

    Ok(SyntheticRecording {
        psg,
        stages: StageSeries::new(spec.epoch_s, stages),
    })
}
