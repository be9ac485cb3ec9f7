use assert_cmd::cargo::cargo_bin_cmd;
use psg_lib::detectors::apnea::{ApneaPipelineResult, EpisodeKind};
use std::{error::Error, fs, path::Path};
use tempfile::tempdir;

fn simulate(dir: &Path) -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("psg");
    cmd.args([
        "simulate",
        "--out-dir",
        dir.to_str().expect("utf8 path"),
        "--seed",
        "7",
        "--apnea-at",
        "200",
        "--hypopnea-at",
        "400",
    ]);
    cmd.assert().success();
    Ok(())
}

fn detect_args(dir: &Path, hypno: &str) -> Vec<String> {
    vec![
        "detect".into(),
        "--poly".into(),
        dir.join("poly.csv").to_string_lossy().into_owned(),
        "--hypno".into(),
        dir.join(hypno).to_string_lossy().into_owned(),
    ]
}

#[test]
fn simulated_events_are_detected() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    simulate(dir.path())?;

    let mut cmd = cargo_bin_cmd!("psg");
    cmd.args(detect_args(dir.path(), "hypno.txt"));
    let output = cmd.assert().success().get_output().stdout.clone();
    let result: ApneaPipelineResult = serde_json::from_slice(&output)?;

    assert_eq!(result.fs, 200.0);
    assert_eq!(result.sample_count, 120_000);
    assert_eq!(result.episodes.len(), 2);
    let apnea = &result.episodes[0];
    assert_eq!(apnea.number, 1);
    assert_eq!(apnea.kind, EpisodeKind::Apnea);
    assert_close(apnea.start_time, 200.0, 1e-9);
    assert_close(apnea.end_time, 209.995, 1e-9);
    let hypopnea = &result.episodes[1];
    assert_eq!(hypopnea.number, 2);
    assert_eq!(hypopnea.kind, EpisodeKind::Hypopnea);
    assert_close(hypopnea.start_time, 400.0, 1e-9);
    assert_close(hypopnea.end_time, 409.995, 1e-9);

    assert_eq!(result.summary.apnea_count, 1);
    assert_eq!(result.summary.hypopnea_count, 1);
    assert_eq!(result.summary.thirds, [0, 1, 1]);
    Ok(())
}

#[test]
fn episodes_as_csv() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    simulate(dir.path())?;
    let out = dir.path().join("episodes.csv");

    let mut cmd = cargo_bin_cmd!("psg");
    cmd.args(detect_args(dir.path(), "hypno.txt"))
        .args(["--format", "csv", "--out", out.to_str().expect("utf8 path")]);
    cmd.assert().success();

    let text = fs::read_to_string(&out)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "number,start_time,end_time,duration,type");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("1,200"));
    assert!(lines[1].ends_with(",apnea"));
    assert!(lines[2].ends_with(",hypopnea"));
    Ok(())
}

#[test]
fn legacy_switch_and_config_file_are_accepted() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    simulate(dir.path())?;
    let config = dir.path().join("detector.toml");
    fs::write(&config, "[detector]\ntype_switch = \"legacy\"\n")?;

    let mut cmd = cargo_bin_cmd!("psg");
    cmd.args(detect_args(dir.path(), "hypno.txt"))
        .args(["--config", config.to_str().expect("utf8 path")]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let result: ApneaPipelineResult = serde_json::from_slice(&output)?;
    // events are far apart: the policy does not change the outcome
    assert_eq!(result.episodes.len(), 2);
    Ok(())
}

#[test]
fn all_wake_hypnogram_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    simulate(dir.path())?;
    fs::write(dir.path().join("wake.txt"), "0\n".repeat(20))?;

    let mut cmd = cargo_bin_cmd!("psg");
    cmd.args(detect_args(dir.path(), "wake.txt"));
    let output = cmd.assert().failure().get_output().stderr.clone();
    let stderr = String::from_utf8(output)?;
    assert!(stderr.contains("degenerate input"), "{}", stderr);
    Ok(())
}

#[test]
fn invalid_partition_is_rejected() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    simulate(dir.path())?;

    let mut cmd = cargo_bin_cmd!("psg");
    cmd.args(detect_args(dir.path(), "hypno.txt"))
        .args(["--num-parts", "3"]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    let stderr = String::from_utf8(output)?;
    assert!(stderr.contains("invalid detector configuration"), "{}", stderr);
    Ok(())
}

#[test]
fn negative_event_length_fails_cleanly() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let mut cmd = cargo_bin_cmd!("psg");
    cmd.args([
        "simulate",
        "--out-dir",
        dir.path().to_str().expect("utf8 path"),
        "--apnea-at",
        "50",
        "--event-s=-5",
    ]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    let stderr = String::from_utf8(output)?;
    assert!(stderr.contains("must not be negative"), "{}", stderr);
    assert!(!stderr.contains("panicked"), "{}", stderr);
    assert!(!dir.path().join("poly.csv").exists());
    Ok(())
}

fn assert_close(a: f64, b: f64, tol: f64) {
    let diff = (a - b).abs();
    assert!(
        diff <= tol,
        "diff {} exceeded tol {} ({} vs {})",
        diff,
        tol,
        a,
        b
    );
}
