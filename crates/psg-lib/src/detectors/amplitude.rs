//! Windowed peak-to-peak amplitude estimates on the airflow channel.
//!
//! For a scan center `c` the short window is `[c - small/2, c + small/2)`.
//! The reference window `[c - big/2, c + big/2)` minus the short window is cut
//! into `num_parts` segments of `part_size` samples, half on each side of the
//! center. The reference amplitude is `median(segment maxima) -
//! median(segment minima)`, so a single artifact cannot inflate it.

use crate::config::WindowGeometry;
use crate::error::{DetectError, Result};

/// Short-window and reference-window amplitude around one scan center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudePair {
    pub small: f64,
    pub big: f64,
}

/// Estimate both amplitudes around `center`.
///
/// Fails with [`DetectError::Range`] when the reference window does not fit
/// inside `airflow`; windows are never clamped.
pub fn amplitudes(
    center: usize,
    airflow: &[f64],
    geometry: &WindowGeometry,
) -> Result<AmplitudePair> {
    let half_big = geometry.half_big();
    let half_small = geometry.half_small();
    if center < half_big || center + half_big > airflow.len() {
        return Err(DetectError::Range {
            center,
            start: center as i64 - half_big as i64,
            end: (center + half_big) as i64,
            len: airflow.len(),
        });
    }

    let small = peak_to_peak(&airflow[center - half_small..center + half_small]);

    let per_side = geometry.num_parts / 2;
    let mut maxima = Vec::with_capacity(geometry.num_parts);
    let mut minima = Vec::with_capacity(geometry.num_parts);
    for k in 0..per_side {
        let left_end = center - half_small - k * geometry.part_size;
        let left = &airflow[left_end - geometry.part_size..left_end];
        let right_start = center + half_small + k * geometry.part_size;
        let right = &airflow[right_start..right_start + geometry.part_size];
        for segment in [left, right] {
            let (lo, hi) = extrema(segment);
            minima.push(lo);
            maxima.push(hi);
        }
    }
    let big = median(&mut maxima) - median(&mut minima);

    Ok(AmplitudePair { small, big })
}

/// `max - min` of a slice, `0.0` when empty.
pub fn peak_to_peak(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let (lo, hi) = extrema(data);
    hi - lo
}

fn extrema(data: &[f64]) -> (f64, f64) {
    data.iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        })
}

/// Median with midpoint interpolation for even lengths. Reorders `values`.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}
