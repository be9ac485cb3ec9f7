use crate::signal::Polysomnogram;
use anyhow::{anyhow, Result};
use edf_reader::file_reader::SyncFileReader;
use edf_reader::sync_reader::SyncEDFReader;
use log::debug;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Helper implementing the EDF reader trait for on-disk files.
struct DiskFileReader {
    path: PathBuf,
}

impl DiskFileReader {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl SyncFileReader for DiskFileReader {
    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, std::io::Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Sample rate of one EDF channel given the record duration in milliseconds.
pub fn channel_rate(samples_per_record: u64, block_duration_ms: u64) -> f64 {
    samples_per_record as f64 * 1000.0 / block_duration_ms as f64
}

/// Pick the channels to load: the requested labels (all must exist), or every
/// channel when `labels` is empty. Returns their indices and the highest rate
/// among them, which the loaded recording is brought to.
pub fn select_channels(
    available: &[(String, f64)],
    labels: &[&str],
) -> Result<(Vec<usize>, f64)> {
    if available.is_empty() {
        anyhow::bail!("EDF file has no channels");
    }
    let picked: Vec<usize> = if labels.is_empty() {
        (0..available.len()).collect()
    } else {
        labels
            .iter()
            .map(|label| {
                available
                    .iter()
                    .position(|(name, _)| name.eq_ignore_ascii_case(label))
                    .ok_or_else(|| anyhow!("EDF file has no channel labelled '{}'", label))
            })
            .collect::<Result<_>>()?
    };
    let fs = picked
        .iter()
        .map(|&idx| available[idx].1)
        .fold(f64::NEG_INFINITY, f64::max);
    if !(fs.is_finite() && fs > 0.0) {
        anyhow::bail!("EDF channels have no usable sample rate");
    }
    Ok((picked, fs))
}

/// Sample-and-hold `data` (at `from_fs`) onto `len` samples at `to_fs`.
///
/// Output sample `n` takes input sample `floor(n * from_fs / to_fs)`, clamped
/// to the last one, the same mapping the hypnogram alignment uses.
pub fn resample_hold(data: &[f64], from_fs: f64, to_fs: f64, len: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    if from_fs == to_fs && data.len() == len {
        return data.to_vec();
    }
    let last = data.len() - 1;
    let ratio = from_fs / to_fs;
    (0..len)
        .map(|n| data[((n as f64 * ratio).floor() as usize).min(last)])
        .collect()
}

/// Load EDF channels (by label, or all of them) into a `Polysomnogram`.
///
/// Channels recorded below the highest selected rate are resampled to it.
pub fn load_edf_channels(path: &Path, labels: &[&str]) -> Result<Polysomnogram> {
    let reader = SyncEDFReader::init_with_file_reader(DiskFileReader::new(path))?;
    let header = &reader.edf_header;
    let available: Vec<(String, f64)> = header
        .channels
        .iter()
        .map(|chan| {
            (
                chan.label.trim().to_string(),
                channel_rate(
                    chan.number_of_samples_in_data_record as u64,
                    header.block_duration as u64,
                ),
            )
        })
        .collect();
    let (picked, fs) = select_channels(&available, labels)?;
    let total_duration = header.block_duration * header.number_of_blocks;
    let len = (total_duration as f64 / 1000.0 * fs).round() as usize;
    let data_matrix = reader.read_data_window(0, total_duration)?;
    let mut psg = Polysomnogram::new(fs);
    for idx in picked {
        let (label, rate) = &available[idx];
        let channel_data = data_matrix
            .get(idx)
            .ok_or_else(|| anyhow!("missing data for channel {}", label))?;
        let samples: Vec<f64> = channel_data.iter().map(|value| *value as f64).collect();
        if *rate != fs {
            debug!("resampling EDF channel '{}' from {} Hz to {} Hz", label, rate, fs);
        }
        psg.insert(label.clone(), resample_hold(&samples, *rate, fs, len));
    }
    Ok(psg)
}
