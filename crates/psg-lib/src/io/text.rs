use anyhow::{Context, Result};
use std::path::Path;

/// Parse a newline-delimited hypnogram, one stage code per epoch, ignoring
/// blank/comment lines. Codes written as floats (`2.0`) are accepted.
pub fn parse_stage_codes(text: &str) -> Result<Vec<i32>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        out.push(
            parse_stage_code(trimmed)
                .with_context(|| format!("line {} is not a stage code: {}", idx + 1, trimmed))?,
        );
    }
    if out.is_empty() {
        anyhow::bail!("no stage codes found");
    }
    Ok(out)
}

/// Read a newline-delimited hypnogram from disk.
pub fn read_stage_codes(path: &Path) -> Result<Vec<i32>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_stage_codes(&text)
}

/// Write one stage code per line.
pub fn write_stage_codes(path: &Path, stages: &[i32]) -> Result<()> {
    let mut text = String::with_capacity(stages.len() * 2);
    for stage in stages {
        text.push_str(&stage.to_string());
        text.push('\n');
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

pub(crate) fn parse_stage_code(value: &str) -> Result<i32> {
    if let Ok(code) = value.parse::<i32>() {
        return Ok(code);
    }
    let float: f64 = value.parse()?;
    if !float.is_finite() || float.fract() != 0.0 {
        anyhow::bail!("stage code must be an integer, got {}", value);
    }
    Ok(float as i32)
}
