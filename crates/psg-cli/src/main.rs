use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use plotters::prelude::*;
use psg_lib::{
    config::{read_config, DetectorConfig, TypeSwitch},
    detectors::{apnea::run_apnea_pipeline, apnea::EpisodeKind, sleep_period::trim_wake},
    io::{self as psg_io, csv as csv_io, text as text_io},
    metrics::episodes::{summarize, EpisodeRecord},
    plot::{figure_from_recording, Figure, PlotBackend, Series},
    synth::{synthesize, SyntheticEvent, SyntheticSpec},
};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "psg",
    version,
    about = "Apnea and hypopnea detection on polysomnography recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TypeSwitchArg {
    ClosePrevious,
    Legacy,
}

impl From<TypeSwitchArg> for TypeSwitch {
    fn from(arg: TypeSwitchArg) -> Self {
        match arg {
            TypeSwitchArg::ClosePrevious => TypeSwitch::ClosePrevious,
            TypeSwitchArg::Legacy => TypeSwitch::Legacy,
        }
    }
}

/// Detector settings that override the config file.
#[derive(Args, Debug, Default)]
struct DetectorArgs {
    /// Detector config file (TOML, `[detector]` table)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    big_window_s: Option<f64>,
    #[arg(long)]
    small_window_s: Option<f64>,
    #[arg(long)]
    num_parts: Option<usize>,
    #[arg(long)]
    epoch_s: Option<f64>,
    #[arg(long)]
    apnea_ratio: Option<f64>,
    #[arg(long)]
    hypopnea_ratio: Option<f64>,
    #[arg(long)]
    desaturation_threshold: Option<f64>,
    #[arg(long, value_enum)]
    type_switch: Option<TypeSwitchArg>,
    /// Emit a run still open when the scan ends
    #[arg(long)]
    flush_trailing_run: bool,
    #[arg(long)]
    airflow_channel: Option<String>,
    #[arg(long)]
    saturation_channel: Option<String>,
}

impl DetectorArgs {
    fn resolve(&self) -> Result<DetectorConfig> {
        let mut cfg = match &self.config {
            Some(path) => read_config(path)?,
            None => DetectorConfig::default(),
        };
        if let Some(v) = self.big_window_s {
            cfg.big_window_s = v;
        }
        if let Some(v) = self.small_window_s {
            cfg.small_window_s = v;
        }
        if let Some(v) = self.num_parts {
            cfg.num_parts = v;
        }
        if let Some(v) = self.epoch_s {
            cfg.epoch_s = v;
        }
        if let Some(v) = self.apnea_ratio {
            cfg.apnea_ratio = v;
        }
        if let Some(v) = self.hypopnea_ratio {
            cfg.hypopnea_ratio = v;
        }
        if let Some(v) = self.desaturation_threshold {
            cfg.desaturation_threshold = v;
        }
        if let Some(v) = self.type_switch {
            cfg.type_switch = v.into();
        }
        if self.flush_trailing_run {
            cfg.flush_trailing_run = true;
        }
        if let Some(v) = &self.airflow_channel {
            cfg.airflow_channel = v.clone();
        }
        if let Some(v) = &self.saturation_channel {
            cfg.saturation_channel = v.clone();
        }
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect apnea and hypopnea episodes in a recording
    Detect {
        /// Polysomnogram: CSV with one column per channel, or EDF
        #[arg(long)]
        poly: PathBuf,
        /// Hypnogram: one stage code per line, or CSV with a `stage` column
        #[arg(long)]
        hypno: PathBuf,
        /// Sample rate for CSV input without a time column
        #[arg(long)]
        fs: Option<f64>,
        #[command(flatten)]
        detector: DetectorArgs,
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Trim leading and trailing wake from a hypnogram
    SleepPeriod {
        #[arg(long)]
        hypno: PathBuf,
        #[arg(long, default_value_t = 200.0)]
        fs: f64,
        #[arg(long, default_value_t = 30.0)]
        epoch_s: f64,
        /// Channel length in samples; defaults to the hypnogram length
        #[arg(long)]
        samples: Option<usize>,
    },
    /// Summary statistics over an episodes CSV
    Summary {
        #[arg(long)]
        episodes: PathBuf,
        #[arg(long)]
        duration_s: f64,
    },
    /// Render respiratory channels, hypnogram and episodes to a PNG via plotters
    Plot {
        #[arg(long)]
        poly: PathBuf,
        #[arg(long)]
        hypno: Option<PathBuf>,
        #[arg(long)]
        fs: Option<f64>,
        /// Episodes CSV; detection is run when omitted and a hypnogram is given
        #[arg(long)]
        episodes: Option<PathBuf>,
        #[command(flatten)]
        detector: DetectorArgs,
        #[arg(long, default_value_t = 4_000)]
        max_points: usize,
        #[arg(long)]
        out: PathBuf,
    },
    /// Write a synthetic recording (poly.csv, hypno.txt) with injected events
    Simulate {
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 600.0)]
        duration_s: f64,
        #[arg(long, default_value_t = 200.0)]
        fs: f64,
        #[arg(long, default_value_t = 0.02)]
        noise: f64,
        /// Apnea onsets in seconds
        #[arg(long, value_delimiter = ',')]
        apnea_at: Vec<f64>,
        /// Hypopnea onsets in seconds
        #[arg(long, value_delimiter = ',')]
        hypopnea_at: Vec<f64>,
        #[arg(long, default_value_t = 10.0)]
        event_s: f64,
        #[arg(long, default_value_t = 0.0)]
        wake_lead_s: f64,
        #[arg(long, default_value_t = 0.0)]
        wake_tail_s: f64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect {
            poly,
            hypno,
            fs,
            detector,
            format,
            out,
        } => cmd_detect(&poly, &hypno, fs, &detector, format, out.as_deref())?,
        Commands::SleepPeriod {
            hypno,
            fs,
            epoch_s,
            samples,
        } => cmd_sleep_period(&hypno, fs, epoch_s, samples)?,
        Commands::Summary {
            episodes,
            duration_s,
        } => cmd_summary(&episodes, duration_s)?,
        Commands::Plot {
            poly,
            hypno,
            fs,
            episodes,
            detector,
            max_points,
            out,
        } => cmd_plot(
            &poly,
            hypno.as_deref(),
            fs,
            episodes.as_deref(),
            &detector,
            max_points,
            &out,
        )?,
        Commands::Simulate {
            out_dir,
            seed,
            duration_s,
            fs,
            noise,
            apnea_at,
            hypopnea_at,
            event_s,
            wake_lead_s,
            wake_tail_s,
        } => {
            let mut events: Vec<SyntheticEvent> = apnea_at
                .iter()
                .map(|&start_s| SyntheticEvent {
                    kind: EpisodeKind::Apnea,
                    start_s,
                    duration_s: event_s,
                })
                .chain(hypopnea_at.iter().map(|&start_s| SyntheticEvent {
                    kind: EpisodeKind::Hypopnea,
                    start_s,
                    duration_s: event_s,
                }))
                .collect();
            events.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));
            let spec = SyntheticSpec {
                fs,
                duration_s,
                noise,
                wake_lead_s,
                wake_tail_s,
                events,
                seed,
                ..SyntheticSpec::default()
            };
            cmd_simulate(&out_dir, &spec)?
        }
    }
    Ok(())
}

fn cmd_detect(
    poly: &Path,
    hypno: &Path,
    fs: Option<f64>,
    detector: &DetectorArgs,
    format: OutputFormat,
    out: Option<&Path>,
) -> Result<()> {
    let cfg = detector.resolve()?;
    let psg = psg_io::read_polysomnogram(poly, fs)?;
    let stages = psg_io::read_hypnogram(hypno, cfg.epoch_s)?;
    info!(
        "loaded {} channels at {} Hz, {} epochs",
        psg.channels.len(),
        psg.fs,
        stages.len()
    );
    let result = run_apnea_pipeline(&psg, &stages, &cfg)
        .with_context(|| format!("detecting episodes in {}", poly.display()))?;

    match (format, out) {
        (OutputFormat::Json, None) => println!("{}", serde_json::to_string(&result)?),
        (OutputFormat::Json, Some(path)) => {
            std::fs::write(path, serde_json::to_string_pretty(&result)?)
                .with_context(|| format!("writing {}", path.display()))?
        }
        (OutputFormat::Csv, None) => csv_io::write_episodes(std::io::stdout(), &result.episodes)?,
        (OutputFormat::Csv, Some(path)) => csv_io::write_episodes_csv(path, &result.episodes)?,
    }
    Ok(())
}

fn cmd_sleep_period(hypno: &Path, fs: f64, epoch_s: f64, samples: Option<usize>) -> Result<()> {
    let stages = psg_io::read_hypnogram(hypno, epoch_s)?;
    let len = samples.unwrap_or_else(|| (stages.len() as f64 * epoch_s * fs).round() as usize);
    let period = trim_wake(&stages.align_to(fs, len)).validate()?;
    let out = json!({
        "start": period.start,
        "end": period.end,
        "start_s": period.start as f64 / fs,
        "end_s": period.end as f64 / fs,
    });
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn cmd_summary(episodes: &Path, duration_s: f64) -> Result<()> {
    let records = csv_io::read_episodes_csv(episodes)?;
    let summary = summarize(&records, duration_s);
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_plot(
    poly: &Path,
    hypno: Option<&Path>,
    fs: Option<f64>,
    episodes: Option<&Path>,
    detector: &DetectorArgs,
    max_points: usize,
    out: &Path,
) -> Result<()> {
    let cfg = detector.resolve()?;
    let psg = psg_io::read_polysomnogram(poly, fs)?;
    let stages = hypno
        .map(|path| psg_io::read_hypnogram(path, cfg.epoch_s))
        .transpose()?;
    let records: Vec<EpisodeRecord> = match (episodes, &stages) {
        (Some(path), _) => csv_io::read_episodes_csv(path)?,
        (None, Some(stages)) => run_apnea_pipeline(&psg, stages, &cfg)?.episodes,
        (None, None) => Vec::new(),
    };
    let fig = figure_from_recording(&psg, stages.as_ref(), &records, max_points);
    let mut backend = PngBackend {
        path: out.to_path_buf(),
        size: (1200, 600),
    };
    backend.draw(&fig)?;
    info!("wrote {}", out.display());
    Ok(())
}

fn cmd_simulate(out_dir: &Path, spec: &SyntheticSpec) -> Result<()> {
    let rec = synthesize(spec)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let poly = out_dir.join("poly.csv");
    let hypno = out_dir.join("hypno.txt");
    csv_io::write_psg_csv(&poly, &rec.psg)?;
    text_io::write_stage_codes(&hypno, &rec.stages.stages)?;
    let out = json!({
        "poly": poly,
        "hypno": hypno,
        "samples": rec.psg.sample_count(),
        "epochs": rec.stages.len(),
        "events": spec.events,
    });
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

/// PNG output through plotters' bitmap backend.
struct PngBackend {
    path: PathBuf,
    size: (u32, u32),
}

impl PlotBackend for PngBackend {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        draw_plotters_figure(&self.path, self.size, fig)
    }
}

fn draw_plotters_figure(path: &Path, size: (u32, u32), fig: &Figure) -> Result<()> {
    let (x_min, x_max, y_min, y_max) = fig
        .bounds()
        .ok_or_else(|| anyhow!("nothing to plot: no respiratory channel or hypnogram"))?;
    let x_max = if x_max > x_min { x_max } else { x_min + 1.0 };
    let (y_min, y_max) = (y_min - 0.1, y_max + 0.1);

    let backend = BitMapBackend::new(path, size);
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .draw()?;

    // spans first so traces stay visible on top
    for series in &fig.series {
        if let Series::Span(span) = series {
            let (r, g, b) = span.style.color.rgb();
            let fill = RGBColor(r, g, b).mix(0.25);
            chart.draw_series(
                span.spans
                    .iter()
                    .map(|s| Rectangle::new([(s[0], y_min), (s[1], y_max)], fill.filled())),
            )?;
        }
    }
    for series in &fig.series {
        if let Series::Line(line) = series {
            let (r, g, b) = line.style.color.rgb();
            let width = line.style.width.round().max(1.0) as u32;
            chart.draw_series(LineSeries::new(
                line.points.iter().map(|p| (p[0], p[1])),
                RGBColor(r, g, b).stroke_width(width),
            ))?;
        }
    }
    root.present()?;
    Ok(())
}
