use crate::error::{DetectError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What happens to an open run when a step qualifies as the other episode type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeSwitch {
    /// Close and emit the open run, then start a run of the new type.
    #[default]
    ClosePrevious,
    /// Keep both runs open; on the next non-qualifying step only one of them
    /// is emitted (apnea first) and the other is discarded.
    Legacy,
}

/// Tunable parameters of the apnea/hypopnea episode detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Long reference window (seconds).
    pub big_window_s: f64,
    /// Short amplitude window (seconds); the scan stride is half of it.
    pub small_window_s: f64,
    /// Number of sub-partitions of the reference window (even, >= 2).
    pub num_parts: usize,
    /// Channel sample rate after alignment (Hz).
    pub sample_rate: f64,
    /// Hypnogram epoch length (seconds).
    pub epoch_s: f64,
    /// Apnea when small amplitude < `apnea_ratio` * reference amplitude.
    pub apnea_ratio: f64,
    /// Hypopnea when small amplitude < `hypopnea_ratio` * reference amplitude.
    pub hypopnea_ratio: f64,
    /// Minimum saturation drop (percentage points) required for a hypopnea.
    pub desaturation_threshold: f64,
    pub type_switch: TypeSwitch,
    /// Emit the run still open when the scan reaches the end of the sleep period.
    pub flush_trailing_run: bool,
    pub airflow_channel: String,
    pub saturation_channel: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            big_window_s: 60.0,
            small_window_s: 4.0,
            num_parts: 8,
            sample_rate: 200.0,
            epoch_s: 30.0,
            apnea_ratio: 0.1,
            hypopnea_ratio: 0.5,
            desaturation_threshold: 4.0,
            type_switch: TypeSwitch::default(),
            flush_trailing_run: false,
            airflow_channel: "Airflow".into(),
            saturation_channel: "SaO2".into(),
        }
    }
}

/// Window sizes in samples, derived from a validated [`DetectorConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub window_big: usize,
    pub window_small: usize,
    pub num_parts: usize,
    pub part_size: usize,
}

impl WindowGeometry {
    pub fn half_big(&self) -> usize {
        self.window_big / 2
    }

    pub fn half_small(&self) -> usize {
        self.window_small / 2
    }

    /// Distance between consecutive scan centers.
    pub fn stride(&self) -> usize {
        self.window_small / 2
    }
}

impl DetectorConfig {
    /// Check the parameters and derive the window geometry.
    pub fn validate(&self) -> Result<WindowGeometry> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(DetectError::Configuration(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.epoch_s.is_finite() && self.epoch_s > 0.0) {
            return Err(DetectError::Configuration(format!(
                "epoch length must be positive, got {}",
                self.epoch_s
            )));
        }
        if self.num_parts < 2 || self.num_parts % 2 != 0 {
            return Err(DetectError::Configuration(format!(
                "num_parts must be an even integer >= 2, got {}",
                self.num_parts
            )));
        }
        let window_big = to_samples(self.big_window_s, self.sample_rate, "big window")?;
        let window_small = to_samples(self.small_window_s, self.sample_rate, "small window")?;
        if window_small < 2 {
            return Err(DetectError::Configuration(format!(
                "small window must span at least 2 samples, got {}",
                window_small
            )));
        }
        if window_big <= window_small {
            return Err(DetectError::Configuration(format!(
                "big window ({} samples) must be longer than small window ({} samples)",
                window_big, window_small
            )));
        }
        let part_size = (window_big - window_small) / self.num_parts;
        if part_size == 0 {
            return Err(DetectError::Configuration(format!(
                "{} parts do not fit between windows of {} and {} samples",
                self.num_parts, window_big, window_small
            )));
        }
        Ok(WindowGeometry {
            window_big,
            window_small,
            num_parts: self.num_parts,
            part_size,
        })
    }
}

fn to_samples(seconds: f64, fs: f64, what: &str) -> Result<usize> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(DetectError::Configuration(format!(
            "{} must be positive, got {} s",
            what, seconds
        )));
    }
    Ok((seconds * fs).round() as usize)
}

/// On-disk configuration file (TOML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub detector: DetectorConfig,
}

pub fn parse_config(text: &str) -> anyhow::Result<DetectorConfig> {
    let file: ConfigFile = toml::from_str(text).context("parsing detector config")?;
    Ok(file.detector)
}

pub fn read_config(path: &Path) -> anyhow::Result<DetectorConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("in {}", path.display()))
}
