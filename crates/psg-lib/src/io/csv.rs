use crate::io::text::parse_stage_code;
use crate::metrics::episodes::EpisodeRecord;
use crate::signal::Polysomnogram;
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::io::Write;
use std::path::Path;

const TIME_COLUMNS: [&str; 3] = ["time", "timestamp", "t"];

fn is_time_column(header: &str) -> bool {
    TIME_COLUMNS
        .iter()
        .any(|name| header.eq_ignore_ascii_case(name))
}

/// Load a polysomnography CSV: a header row of channel names, one row per sample.
///
/// A `time`/`timestamp` column is not loaded as a channel; when `fs` is `None`
/// the sample rate is inferred from its first two rows.
pub fn read_psg_csv(path: &Path, fs: Option<f64>) -> Result<Polysomnogram> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let time_idx = headers.iter().position(is_time_column);
    let channel_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != time_idx)
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();
    if channel_cols.is_empty() {
        anyhow::bail!("{} has no channel columns", path.display());
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); channel_cols.len()];
    let mut timestamps = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", row + 1))?;
        for (slot, (idx, name)) in channel_cols.iter().enumerate() {
            let raw = record
                .get(*idx)
                .ok_or_else(|| anyhow!("row {} is missing column '{}'", row + 1, name))?;
            let value: f64 = raw
                .parse()
                .with_context(|| format!("row {} column '{}' is not f64: {}", row + 1, name, raw))?;
            columns[slot].push(value);
        }
        if fs.is_none() && timestamps.len() < 2 {
            if let Some(raw) = time_idx.and_then(|idx| record.get(idx)) {
                timestamps.push(
                    raw.parse::<f64>()
                        .with_context(|| format!("parsing timestamp {}", raw))?,
                );
            }
        }
    }

    let fs = match fs {
        Some(fs) => fs,
        None => match timestamps.as_slice() {
            [first, second, ..] if second > first => {
                // timestamps are usually printed with limited precision
                (1e6 / (second - first)).round() / 1e6
            }
            _ => anyhow::bail!(
                "{}: sample rate not given and no usable time column",
                path.display()
            ),
        },
    };
    let mut psg = Polysomnogram::new(fs);
    for ((_, name), data) in channel_cols.into_iter().zip(columns) {
        psg.insert(name, data);
    }
    Ok(psg)
}

/// Write every channel of `psg` with a leading `Time` column in seconds.
///
/// Channels are written in name order; shorter channels leave their trailing
/// cells empty.
pub fn write_psg_csv(path: &Path, psg: &Polysomnogram) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut header = vec!["Time".to_string()];
    header.extend(psg.channels.keys().cloned());
    writer.write_record(&header)?;
    for n in 0..psg.sample_count() {
        let mut row = Vec::with_capacity(header.len());
        row.push(format!("{}", n as f64 / psg.fs));
        for series in psg.channels.values() {
            row.push(series.data.get(n).map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the `stage` column of a hypnogram CSV.
pub fn read_stage_csv(path: &Path) -> Result<Vec<i32>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let stage_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("stage"))
        .context("hypnogram CSV must include a stage column")?;
    let mut out = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", row + 1))?;
        let raw = record
            .get(stage_idx)
            .ok_or_else(|| anyhow!("row {} is missing the stage column", row + 1))?;
        out.push(parse_stage_code(raw).with_context(|| format!("row {}", row + 1))?);
    }
    if out.is_empty() {
        anyhow::bail!("{} contains no stages", path.display());
    }
    Ok(out)
}

/// Write episode records as `number,start_time,end_time,duration,type`.
pub fn write_episodes<W: Write>(writer: W, records: &[EpisodeRecord]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
    for record in records {
        writer.serialize(record)?;
    }
    if records.is_empty() {
        writer.write_record(["number", "start_time", "end_time", "duration", "type"])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_episodes_csv(path: &Path, records: &[EpisodeRecord]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_episodes(file, records)
}

pub fn read_episodes_csv(path: &Path) -> Result<Vec<EpisodeRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening episodes {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize::<EpisodeRecord>() {
        records.push(row.with_context(|| format!("parsing episodes in {}", path.display()))?);
    }
    Ok(records)
}

#[cfg(feature = "polars")]
pub mod polars_io {
    use crate::signal::Polysomnogram;
    use anyhow::Result;
    use polars::prelude::*;

    /// Load every numeric column of a PSG CSV through a polars DataFrame.
    pub fn load_psg(path: &str, fs: f64) -> Result<Polysomnogram> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.into()))?
            .finish()?;
        let mut psg = Polysomnogram::new(fs);
        for column in df.get_columns() {
            let name = column.name().to_string();
            if super::is_time_column(&name) || !column.dtype().is_numeric() {
                continue;
            }
            let values = column.cast(&DataType::Float64)?;
            psg.insert(name, values.f64()?.into_no_null_iter().collect());
        }
        Ok(psg)
    }
}
