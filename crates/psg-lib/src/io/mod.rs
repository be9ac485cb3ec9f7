pub mod csv;
pub mod edf;
pub mod text;

use crate::signal::{Polysomnogram, StageSeries};
use anyhow::Result;
use std::path::Path;

/// Read a hypnogram from a `.csv` file (`stage` column) or newline-delimited text.
pub fn read_hypnogram(path: &Path, epoch_s: f64) -> Result<StageSeries> {
    let is_csv = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    let stages = if is_csv {
        csv::read_stage_csv(path)?
    } else {
        text::read_stage_codes(path)?
    };
    Ok(StageSeries::new(epoch_s, stages))
}

/// Read polysomnography channels from an `.edf` file or a CSV with one column
/// per channel.
///
/// Only `.edf` goes to the EDF reader. REC exports carry non-standard header
/// characters and must be rewritten to EDF before loading; any other extension
/// is read as CSV.
pub fn read_polysomnogram(path: &Path, fs: Option<f64>) -> Result<Polysomnogram> {
    if is_edf_path(path) {
        edf::load_edf_channels(path, &[])
    } else {
        csv::read_psg_csv(path, fs)
    }
}

fn is_edf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("edf"))
        .unwrap_or(false)
}
