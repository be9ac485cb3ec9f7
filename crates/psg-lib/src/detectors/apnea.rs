use crate::{
    config::{DetectorConfig, TypeSwitch, WindowGeometry},
    detectors::{
        amplitude::{amplitudes, peak_to_peak, AmplitudePair},
        sleep_period::{trim_wake, SleepPeriod},
    },
    error::{DetectError, Result},
    metrics::episodes::{aggregate, summarize, EpisodeRecord, EpisodeSummary},
    signal::{Polysomnogram, StageSeries},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeKind {
    Apnea,
    Hypopnea,
}

impl EpisodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeKind::Apnea => "apnea",
            EpisodeKind::Hypopnea => "hypopnea",
        }
    }
}

/// Closed run of disordered breathing, inclusive sample indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub kind: EpisodeKind,
    pub start: usize,
    pub end: usize,
}

/// Per-step verdict of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepClass {
    Apnea,
    Hypopnea,
    Normal,
}

/// Classify one scan step from its amplitude pair and saturation drop.
///
/// A zero (or non-finite) reference amplitude never qualifies: there is no
/// breathing baseline to compare against.
pub fn classify_step(
    amp: AmplitudePair,
    saturation_drop: f64,
    cfg: &DetectorConfig,
) -> StepClass {
    if !(amp.big.is_finite() && amp.big > 0.0) {
        return StepClass::Normal;
    }
    if amp.small < cfg.apnea_ratio * amp.big {
        StepClass::Apnea
    } else if amp.small < cfg.hypopnea_ratio * amp.big
        && saturation_drop >= cfg.desaturation_threshold
    {
        StepClass::Hypopnea
    } else {
        StepClass::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    first: usize,
    last: usize,
}

impl Span {
    fn covering(from: usize, to: usize) -> Self {
        Self {
            first: from,
            last: to.saturating_sub(1),
        }
    }

    fn extend(self, from: usize, to: usize) -> Self {
        Self {
            first: self.first.min(from),
            last: self.last.max(to.saturating_sub(1)),
        }
    }

    fn close(self, kind: EpisodeKind) -> Episode {
        Episode {
            kind,
            start: self.first,
            end: self.last,
        }
    }
}

/// Observable state of a [`RunTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Under [`TypeSwitch::Legacy`] a hypopnea run may also be open while in
    /// this state; it is dropped when the apnea run closes.
    InApneaRun,
    InHypopneaRun,
}

/// Accumulates contiguous qualifying steps into episodes.
#[derive(Debug, Clone)]
pub struct RunTracker {
    policy: TypeSwitch,
    apnea: Option<Span>,
    hypopnea: Option<Span>,
}

impl RunTracker {
    pub fn new(policy: TypeSwitch) -> Self {
        Self {
            policy,
            apnea: None,
            hypopnea: None,
        }
    }

    pub fn state(&self) -> RunState {
        match (self.apnea, self.hypopnea) {
            (Some(_), _) => RunState::InApneaRun,
            (None, Some(_)) => RunState::InHypopneaRun,
            (None, None) => RunState::Idle,
        }
    }

    /// Feed one step covering samples `[from, to)`. Returns the episode closed
    /// by this step, if any.
    pub fn push(&mut self, class: StepClass, from: usize, to: usize) -> Option<Episode> {
        match class {
            StepClass::Apnea => {
                let closed = match self.policy {
                    TypeSwitch::ClosePrevious => self
                        .hypopnea
                        .take()
                        .map(|span| span.close(EpisodeKind::Hypopnea)),
                    TypeSwitch::Legacy => None,
                };
                self.apnea = Some(grow(self.apnea, from, to));
                closed
            }
            StepClass::Hypopnea => {
                let closed = match self.policy {
                    TypeSwitch::ClosePrevious => {
                        self.apnea.take().map(|span| span.close(EpisodeKind::Apnea))
                    }
                    TypeSwitch::Legacy => None,
                };
                self.hypopnea = Some(grow(self.hypopnea, from, to));
                closed
            }
            StepClass::Normal => self.close(),
        }
    }

    /// Close whatever is open; apnea wins when both runs are open.
    pub fn close(&mut self) -> Option<Episode> {
        let apnea = self.apnea.take();
        let hypopnea = self.hypopnea.take();
        match (apnea, hypopnea) {
            (Some(span), dropped) => {
                if let Some(lost) = dropped {
                    debug!(
                        "dropping overlapping hypopnea run [{}, {}]",
                        lost.first, lost.last
                    );
                }
                Some(span.close(EpisodeKind::Apnea))
            }
            (None, Some(span)) => Some(span.close(EpisodeKind::Hypopnea)),
            (None, None) => None,
        }
    }
}

fn grow(span: Option<Span>, from: usize, to: usize) -> Span {
    match span {
        Some(span) => span.extend(from, to),
        None => Span::covering(from, to),
    }
}

/// Peak-to-peak saturation over the reference window shifted forward by one
/// small window. The end is clamped to the channel length.
// NOTE: the forward shift (desaturation lagging the airflow drop) is kept as
// published and awaits clinical review.
pub fn saturation_drop(center: usize, saturation: &[f64], geometry: &WindowGeometry) -> f64 {
    let len = saturation.len();
    let start = (center + geometry.window_small)
        .saturating_sub(geometry.half_big())
        .min(len);
    let end = (center + geometry.half_big() + geometry.window_small).min(len);
    if end <= start {
        return 0.0;
    }
    peak_to_peak(&saturation[start..end])
}

/// Scan an already trimmed sleep period.
pub fn scan_episodes(
    airflow: &[f64],
    saturation: &[f64],
    period: SleepPeriod,
    geometry: &WindowGeometry,
    cfg: &DetectorConfig,
) -> Result<Vec<Episode>> {
    let half_big = geometry.half_big();
    let half_small = geometry.half_small();
    let first = period.start + half_big;
    let stop = period.end.saturating_sub(half_big);
    let mut episodes = Vec::new();
    if stop <= first {
        warn!(
            "sleep period [{}, {}) is shorter than one reference window ({} samples); nothing to scan",
            period.start, period.end, geometry.window_big
        );
        return Ok(episodes);
    }

    let mut tracker = RunTracker::new(cfg.type_switch);
    for center in (first..stop).step_by(geometry.stride()) {
        let amp = amplitudes(center, airflow, geometry)?;
        let drop = saturation_drop(center, saturation, geometry);
        let class = classify_step(amp, drop, cfg);
        if let Some(episode) = tracker.push(class, center - half_small, center + half_small) {
            debug!(
                "{} episode [{}, {}]",
                episode.kind.as_str(),
                episode.start,
                episode.end
            );
            episodes.push(episode);
        }
    }
    if cfg.flush_trailing_run {
        if let Some(episode) = tracker.close() {
            debug!(
                "flushing trailing {} run [{}, {}]",
                episode.kind.as_str(),
                episode.start,
                episode.end
            );
            episodes.push(episode);
        }
    } else if tracker.state() != RunState::Idle {
        debug!("run still open at end of sleep period is not reported");
    }
    Ok(episodes)
}

/// Detect apnea/hypopnea episodes on aligned channels.
///
/// `stages` must already be aligned to the channel index space. Fails on an
/// invalid configuration, mismatched channel lengths, or a hypnogram with no
/// sleep in it.
pub fn detect_episodes(
    airflow: &[f64],
    saturation: &[f64],
    stages: &[i32],
    cfg: &DetectorConfig,
) -> Result<Vec<Episode>> {
    let geometry = cfg.validate()?;
    check_length(&cfg.saturation_channel, airflow.len(), saturation.len())?;
    check_length("stage", airflow.len(), stages.len())?;
    let period = trim_wake(stages).validate()?;
    let episodes = scan_episodes(airflow, saturation, period, &geometry, cfg)?;
    info!(
        "scanned sleep period [{}, {}): {} episodes",
        period.start,
        period.end,
        episodes.len()
    );
    Ok(episodes)
}

fn check_length(channel: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(DetectError::ChannelLength {
            channel: channel.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Combined result of the episode detection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApneaPipelineResult {
    pub fs: f64,
    pub sample_count: usize,
    pub sleep_period: SleepPeriod,
    pub episodes: Vec<EpisodeRecord>,
    pub summary: EpisodeSummary,
}

/// Align the hypnogram, detect episodes, and aggregate them into records.
///
/// The recording's own sample rate overrides `cfg.sample_rate`.
pub fn run_apnea_pipeline(
    psg: &Polysomnogram,
    stages: &StageSeries,
    cfg: &DetectorConfig,
) -> Result<ApneaPipelineResult> {
    let mut cfg = cfg.clone();
    if cfg.sample_rate != psg.fs {
        debug!(
            "using recording sample rate {} Hz instead of configured {} Hz",
            psg.fs, cfg.sample_rate
        );
        cfg.sample_rate = psg.fs;
    }
    cfg.epoch_s = stages.epoch_s;
    let airflow = psg.channel(&cfg.airflow_channel)?;
    let saturation = psg.channel(&cfg.saturation_channel)?;
    let aligned = stages.align_to(psg.fs, airflow.len());
    let episodes = detect_episodes(&airflow.data, &saturation.data, &aligned, &cfg)?;
    let sleep_period = trim_wake(&aligned);
    let records = aggregate(&episodes, psg.fs);
    let summary = summarize(&records, airflow.duration());
    Ok(ApneaPipelineResult {
        fs: psg.fs,
        sample_count: airflow.len(),
        sleep_period,
        episodes: records,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{synthesize, SyntheticEvent, SyntheticSpec};

    const FS: f64 = 200.0;

    fn breathing(len: usize) -> Vec<f64> {
        use std::f64::consts::PI;
        (0..len)
            .map(|n| (2.0 * PI * 0.25 * n as f64 / FS).cos())
            .collect()
    }

    fn recording(
        segments: &[(usize, usize, f64)],
        dip: Option<(usize, usize)>,
    ) -> (Vec<f64>, Vec<f64>, Vec<i32>) {
        let len = 60_000;
        let mut airflow = breathing(len);
        for &(start, end, scale) in segments {
            for sample in &mut airflow[start..end] {
                *sample *= scale;
            }
        }
        let mut saturation = vec![96.0; len];
        if let Some((start, end)) = dip {
            for value in &mut saturation[start..end] {
                *value = 90.0;
            }
        }
        (airflow, saturation, vec![2; len])
    }

    #[test]
    fn flat_segment_yields_single_apnea() {
        let (airflow, saturation, stages) = recording(&[(29_000, 31_000, 0.0)], None);
        let episodes =
            detect_episodes(&airflow, &saturation, &stages, &DetectorConfig::default()).unwrap();
        assert_eq!(
            episodes,
            vec![Episode {
                kind: EpisodeKind::Apnea,
                start: 29_200,
                end: 30_799
            }]
        );
    }

    #[test]
    fn reduced_flow_with_desaturation_is_hypopnea() {
        let (airflow, saturation, stages) =
            recording(&[(29_200, 31_200, 0.3)], Some((31_200, 33_200)));
        let episodes =
            detect_episodes(&airflow, &saturation, &stages, &DetectorConfig::default()).unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].kind, EpisodeKind::Hypopnea);
        assert_eq!((episodes[0].start, episodes[0].end), (29_200, 31_199));
    }

    #[test]
    fn reduced_flow_without_desaturation_is_ignored() {
        let (airflow, saturation, stages) = recording(&[(29_200, 31_200, 0.3)], None);
        let episodes =
            detect_episodes(&airflow, &saturation, &stages, &DetectorConfig::default()).unwrap();
        assert!(episodes.is_empty());
    }

    #[test]
    fn constant_airflow_never_qualifies() {
        let len = 30_000;
        let airflow = vec![0.0; len];
        let mut saturation = vec![96.0; len];
        for value in &mut saturation[10_000..20_000] {
            *value = 85.0;
        }
        let stages = vec![1; len];
        let episodes =
            detect_episodes(&airflow, &saturation, &stages, &DetectorConfig::default()).unwrap();
        assert!(episodes.is_empty());

        let amp = AmplitudePair {
            small: 0.0,
            big: 0.0,
        };
        assert_eq!(
            classify_step(amp, 20.0, &DetectorConfig::default()),
            StepClass::Normal
        );
    }

    #[test]
    fn all_wake_is_degenerate() {
        let (airflow, saturation, _) = recording(&[], None);
        let stages = vec![0; airflow.len()];
        let err = detect_episodes(&airflow, &saturation, &stages, &DetectorConfig::default())
            .unwrap_err();
        assert!(matches!(err, DetectError::DegenerateInput(_)));
    }

    #[test]
    fn mismatched_channels_are_rejected() {
        let (airflow, saturation, stages) = recording(&[], None);
        let err = detect_episodes(
            &airflow,
            &saturation[..1_000],
            &stages,
            &DetectorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DetectError::ChannelLength { actual: 1_000, .. }));
    }

    #[test]
    fn invalid_config_fails_before_scanning() {
        let (airflow, saturation, stages) = recording(&[], None);
        let cfg = DetectorConfig {
            num_parts: 0,
            ..DetectorConfig::default()
        };
        assert!(matches!(
            detect_episodes(&airflow, &saturation, &stages, &cfg),
            Err(DetectError::Configuration(_))
        ));
    }

    #[test]
    fn repeated_runs_are_identical() {
        let (airflow, saturation, stages) = recording(
            &[(20_000, 22_000, 0.0), (40_000, 42_000, 0.3)],
            Some((42_000, 44_000)),
        );
        let cfg = DetectorConfig::default();
        let first = detect_episodes(&airflow, &saturation, &stages, &cfg).unwrap();
        let second = detect_episodes(&airflow, &saturation, &stages, &cfg).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn type_switch_closes_previous_run() {
        let (airflow, saturation, stages) = recording(
            &[(29_200, 31_200, 0.0), (31_200, 33_200, 0.3)],
            Some((33_200, 35_200)),
        );
        let episodes =
            detect_episodes(&airflow, &saturation, &stages, &DetectorConfig::default()).unwrap();
        assert_eq!(
            episodes,
            vec![
                Episode {
                    kind: EpisodeKind::Apnea,
                    start: 29_200,
                    end: 31_199
                },
                Episode {
                    kind: EpisodeKind::Hypopnea,
                    start: 30_800,
                    end: 33_199
                },
            ]
        );
    }

    #[test]
    fn legacy_type_switch_drops_hypopnea() {
        let (airflow, saturation, stages) = recording(
            &[(29_200, 31_200, 0.0), (31_200, 33_200, 0.3)],
            Some((33_200, 35_200)),
        );
        let cfg = DetectorConfig {
            type_switch: TypeSwitch::Legacy,
            ..DetectorConfig::default()
        };
        let episodes = detect_episodes(&airflow, &saturation, &stages, &cfg).unwrap();
        assert_eq!(
            episodes,
            vec![Episode {
                kind: EpisodeKind::Apnea,
                start: 29_200,
                end: 31_199
            }]
        );
    }

    #[test]
    fn trailing_run_is_dropped_unless_flushed() {
        let (airflow, saturation, stages) = recording(&[(52_000, 60_000, 0.0)], None);
        let cfg = DetectorConfig::default();
        assert!(detect_episodes(&airflow, &saturation, &stages, &cfg)
            .unwrap()
            .is_empty());

        let cfg = DetectorConfig {
            flush_trailing_run: true,
            ..cfg
        };
        let episodes = detect_episodes(&airflow, &saturation, &stages, &cfg).unwrap();
        assert_eq!(
            episodes,
            vec![Episode {
                kind: EpisodeKind::Apnea,
                start: 52_000,
                end: 53_999
            }]
        );
    }

    #[test]
    fn tracker_transitions() {
        let mut tracker = RunTracker::new(TypeSwitch::ClosePrevious);
        assert_eq!(tracker.state(), RunState::Idle);
        assert_eq!(tracker.push(StepClass::Apnea, 0, 10), None);
        assert_eq!(tracker.push(StepClass::Apnea, 5, 15), None);
        assert_eq!(tracker.state(), RunState::InApneaRun);
        let closed = tracker.push(StepClass::Hypopnea, 10, 20);
        assert_eq!(
            closed,
            Some(Episode {
                kind: EpisodeKind::Apnea,
                start: 0,
                end: 14
            })
        );
        assert_eq!(tracker.state(), RunState::InHypopneaRun);
        let closed = tracker.push(StepClass::Normal, 15, 25);
        assert_eq!(
            closed,
            Some(Episode {
                kind: EpisodeKind::Hypopnea,
                start: 10,
                end: 19
            })
        );
        assert_eq!(tracker.state(), RunState::Idle);
        assert_eq!(tracker.push(StepClass::Normal, 20, 30), None);
    }

    #[test]
    fn legacy_tracker_spans_interleaved_apnea() {
        let mut tracker = RunTracker::new(TypeSwitch::Legacy);
        tracker.push(StepClass::Apnea, 0, 10);
        tracker.push(StepClass::Hypopnea, 5, 15);
        tracker.push(StepClass::Apnea, 10, 20);
        assert_eq!(
            tracker.push(StepClass::Normal, 15, 25),
            Some(Episode {
                kind: EpisodeKind::Apnea,
                start: 0,
                end: 19
            })
        );
        assert_eq!(tracker.state(), RunState::Idle);
    }

    #[test]
    fn saturation_window_is_shifted_and_clamped() {
        let cfg = DetectorConfig {
            big_window_s: 20.0,
            small_window_s: 4.0,
            num_parts: 4,
            sample_rate: 1.0,
            ..DetectorConfig::default()
        };
        let geometry = cfg.validate().unwrap();
        let mut saturation = vec![95.0; 40];
        // window for center 20 is [14, 34)
        saturation[13] = 80.0;
        assert_eq!(saturation_drop(20, &saturation, &geometry), 0.0);
        saturation[33] = 91.0;
        assert_eq!(saturation_drop(20, &saturation, &geometry), 4.0);
        // center 30 would read up to 44; clamped to 40
        assert_eq!(saturation_drop(30, &saturation, &geometry), 4.0);
    }

    #[test]
    fn pipeline_reports_records_in_seconds() {
        let spec = SyntheticSpec {
            duration_s: 300.0,
            events: vec![SyntheticEvent {
                kind: EpisodeKind::Apnea,
                start_s: 146.0,
                duration_s: 10.0,
            }],
            ..SyntheticSpec::default()
        };
        let rec = synthesize(&spec).unwrap();
        let result =
            run_apnea_pipeline(&rec.psg, &rec.stages, &DetectorConfig::default()).unwrap();
        assert_eq!(result.fs, FS);
        assert_eq!(result.sample_count, 60_000);
        assert_eq!(result.episodes.len(), 1);
        let record = &result.episodes[0];
        assert_eq!(record.number, 1);
        assert_eq!(record.kind, EpisodeKind::Apnea);
        assert_eq!(record.start_time, 146.0);
        assert!((record.end_time - 155.995).abs() < 1e-9, "{:?}", record);
        assert!((record.duration - 9.995).abs() < 1e-9);
        assert_eq!(result.summary.count, 1);
    }

    #[test]
    fn mixed_events_stay_ordered_and_disjoint() {
        let events: Vec<SyntheticEvent> = (0..24)
            .map(|k| SyntheticEvent {
                kind: if k % 2 == 0 {
                    EpisodeKind::Apnea
                } else {
                    EpisodeKind::Hypopnea
                },
                start_s: 100.0 + 42.5 * k as f64,
                duration_s: if k % 3 == 0 { 12.0 } else { 10.0 },
            })
            .collect();
        let spec = SyntheticSpec {
            duration_s: 1_200.0,
            noise: 0.05,
            seed: 11,
            events,
            ..SyntheticSpec::default()
        };
        let rec = synthesize(&spec).unwrap();

        for policy in [TypeSwitch::ClosePrevious, TypeSwitch::Legacy] {
            let cfg = DetectorConfig {
                type_switch: policy,
                ..DetectorConfig::default()
            };
            let records = run_apnea_pipeline(&rec.psg, &rec.stages, &cfg)
                .unwrap()
                .episodes;
            let apneas = records
                .iter()
                .filter(|r| r.kind == EpisodeKind::Apnea)
                .count();
            assert_eq!(apneas, 12, "{:?}: {:?}", policy, records);
            for (i, record) in records.iter().enumerate() {
                assert_eq!(record.number, i + 1);
                assert!(record.end_time >= record.start_time, "{:?}", record);
            }
            for pair in records.windows(2) {
                assert!(pair[0].start_time <= pair[1].start_time, "{:?}", pair);
            }
            for kind in [EpisodeKind::Apnea, EpisodeKind::Hypopnea] {
                let same: Vec<_> = records.iter().filter(|r| r.kind == kind).collect();
                for pair in same.windows(2) {
                    assert!(pair[0].end_time < pair[1].start_time, "{:?}", pair);
                }
            }
        }
    }

    #[test]
    fn pipeline_requires_named_channels() {
        let mut psg = Polysomnogram::new(FS);
        psg.insert("Airflow", breathing(30_000));
        let stages = StageSeries::new(30.0, vec![2; 5]);
        let err = run_apnea_pipeline(&psg, &stages, &DetectorConfig::default()).unwrap_err();
        assert_eq!(err, DetectError::MissingChannel("SaO2".into()));
    }
}
