use crate::error::DetectError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }
}

/// Sleep-stage labels (hypnogram), one code per epoch. Stage `0` is wake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSeries {
    /// Epoch length in seconds (usually 30).
    pub epoch_s: f64,
    pub stages: Vec<i32>,
}

impl StageSeries {
    pub fn new(epoch_s: f64, stages: Vec<i32>) -> Self {
        Self { epoch_s, stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Resample onto a channel index space of `len` samples at `fs` Hz.
    ///
    /// Sample `n` takes the stage of epoch `floor(n / (fs * epoch_s))`; samples
    /// past the last epoch keep the last stage. An empty hypnogram aligns to an
    /// empty vector.
    pub fn align_to(&self, fs: f64, len: usize) -> Vec<i32> {
        if self.stages.is_empty() {
            return Vec::new();
        }
        let samples_per_epoch = fs * self.epoch_s;
        let last = self.stages.len() - 1;
        (0..len)
            .map(|n| {
                let epoch = (n as f64 / samples_per_epoch).floor() as usize;
                self.stages[epoch.min(last)]
            })
            .collect()
    }
}

/// Multi-channel polysomnography recording sharing one sample index space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polysomnogram {
    pub fs: f64,
    pub channels: BTreeMap<String, TimeSeries>,
}

impl Polysomnogram {
    pub fn new(fs: f64) -> Self {
        Self {
            fs,
            channels: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<f64>) {
        let fs = self.fs;
        self.channels.insert(name.into(), TimeSeries { fs, data });
    }

    /// Look up a channel by name (case-insensitive fallback).
    pub fn channel(&self, name: &str) -> Result<&TimeSeries, DetectError> {
        self.channels
            .get(name)
            .or_else(|| {
                self.channels
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, ts)| ts)
            })
            .ok_or_else(|| DetectError::MissingChannel(name.to_string()))
    }

    /// Length of the longest channel.
    pub fn sample_count(&self) -> usize {
        self.channels.values().map(TimeSeries::len).max().unwrap_or(0)
    }

    pub fn duration(&self) -> f64 {
        self.sample_count() as f64 / self.fs
    }
}
