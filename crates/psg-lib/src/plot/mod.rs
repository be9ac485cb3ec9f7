use crate::detectors::amplitude::peak_to_peak;
use crate::detectors::apnea::EpisodeKind;
use crate::metrics::episodes::EpisodeRecord;
use crate::signal::{Polysomnogram, StageSeries};
use serde::{Deserialize, Serialize};

/// Respiratory channels drawn in the overview, top to bottom.
pub const RESPIRATORY_CHANNELS: [&str; 3] = ["Airflow", "Chest", "Abdomen"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

/// Shaded time intervals `[start, end]` on the x axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanSeries {
    pub name: String,
    pub spans: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Span(SpanSeries),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// `(x_min, x_max, y_min, y_max)` over all line points and spans.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for series in &self.series {
            match series {
                Series::Line(line) => {
                    xs.extend(line.points.iter().map(|p| p[0]));
                    ys.extend(line.points.iter().map(|p| p[1]));
                }
                Series::Span(span) => xs.extend(span.spans.iter().flatten().copied()),
            }
        }
        if xs.is_empty() || ys.is_empty() {
            return None;
        }
        let min = |v: &[f64]| v.iter().copied().fold(f64::INFINITY, f64::min);
        let max = |v: &[f64]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min(&xs), max(&xs), min(&ys), max(&ys)))
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        let sample = points[start];
        result.push(sample);
    }
    result
}

/// Mean over consecutive blocks of `factor` samples; a trailing partial block
/// is averaged over what it has.
pub fn block_mean(data: &[f64], factor: usize) -> Vec<f64> {
    if factor <= 1 {
        return data.to_vec();
    }
    data.chunks(factor)
        .map(|chunk| chunk.iter().sum::<f64>() / chunk.len() as f64)
        .collect()
}

fn kind_color(kind: EpisodeKind) -> Color {
    match kind {
        EpisodeKind::Apnea => Color(0xD62728),
        EpisodeKind::Hypopnea => Color(0xFF7F0E),
    }
}

/// Overview figure: respiratory channels at 1 Hz, stacked and normalised, the
/// hypnogram below them, and one shaded span per episode.
pub fn figure_from_recording(
    psg: &Polysomnogram,
    stages: Option<&StageSeries>,
    records: &[EpisodeRecord],
    max_points: usize,
) -> Figure {
    let palette = [0x1F77B4, 0x2CA02C, 0x9467BD];
    let mut fig = Figure::new(Some("Respiratory channels".into()));
    fig.x.label = Some("time, s".into());
    let factor = (psg.fs.round() as usize).max(1);
    let mut offset = 0.0;
    for (i, name) in RESPIRATORY_CHANNELS.iter().enumerate() {
        let Ok(channel) = psg.channel(name) else {
            continue;
        };
        let slow = block_mean(&channel.data, factor);
        let span = peak_to_peak(&slow);
        let scale = if span > 0.0 { 1.0 / span } else { 1.0 };
        let dt = factor as f64 / psg.fs;
        let points: Vec<[f64; 2]> = slow
            .iter()
            .enumerate()
            .map(|(j, value)| [j as f64 * dt, value * scale - offset])
            .collect();
        fig.add_series(Series::Line(LineSeries {
            name: name.to_string(),
            points: decimate_points(&points, max_points),
            style: Style {
                width: 1.4,
                dash: None,
                color: Color(palette[i % palette.len()]),
            },
        }));
        offset += 1.5;
    }

    if let Some(stages) = stages {
        let mut points = Vec::with_capacity(stages.len() * 2);
        for (e, &stage) in stages.stages.iter().enumerate() {
            let y = -offset - 0.2 * stage as f64;
            points.push([e as f64 * stages.epoch_s, y]);
            points.push([(e + 1) as f64 * stages.epoch_s, y]);
        }
        fig.add_series(Series::Line(LineSeries {
            name: "hypnogram".into(),
            points: decimate_points(&points, max_points),
            style: Style {
                width: 1.0,
                dash: None,
                color: Color(0x333333),
            },
        }));
    }

    for kind in [EpisodeKind::Apnea, EpisodeKind::Hypopnea] {
        let spans: Vec<[f64; 2]> = records
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| [r.start_time, r.end_time])
            .collect();
        if spans.is_empty() {
            continue;
        }
        fig.add_series(Series::Span(SpanSeries {
            name: kind.as_str().into(),
            spans,
            style: Style {
                width: 0.0,
                dash: None,
                color: kind_color(kind),
            },
        }));
    }
    fig
}
