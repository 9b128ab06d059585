// src/analysis/features/pattern.rs
//
// Temporal rhythm of the window. Hooking and wrapping stitches produce a
// periodic rise and fall of frame-to-frame change; random hand movement
// and camera noise do not.
//
//   motion energy  e[i] = mean |luma(i+1) - luma(i)| / 255
//   repetition     peak normalized autocorrelation of e over lags 2..n/2
//   rhythm         1 - coefficient of variation of the spacing between peaks

use image::GrayImage;
use serde::Serialize;

const MIN_SERIES: usize = 4;
const MIN_LAG: usize = 2;
const MIN_VARIANCE: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PatternFeatures {
    /// 0-1
    pub repetition_score: f32,
    /// 0-1
    pub rhythm_score: f32,
    /// Lag (in frames) of the strongest repetition
    pub dominant_period: Option<usize>,
}

impl PatternFeatures {
    pub fn from_energy_series(energy: &[f32]) -> Self {
        let n = energy.len();
        if n < MIN_SERIES {
            return Self::default();
        }

        let mean = energy.iter().sum::<f32>() / n as f32;
        let centered: Vec<f32> = energy.iter().map(|e| e - mean).collect();
        let variance = centered.iter().map(|c| c * c).sum::<f32>() / n as f32;
        if variance < MIN_VARIANCE {
            return Self::default();
        }

        let mut best: Option<(usize, f32)> = None;
        for lag in MIN_LAG..=n / 2 {
            let r = centered
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum::<f32>()
                / (n - lag) as f32
                / variance;
            if best.map_or(true, |(_, b)| r > b) {
                best = Some((lag, r));
            }
        }

        let (repetition_score, dominant_period) = match best {
            Some((lag, r)) if r > 0.0 => (r.min(1.0), Some(lag)),
            _ => (0.0, None),
        };

        Self {
            repetition_score,
            rhythm_score: rhythm(energy, mean),
            dominant_period,
        }
    }
}

/// Regularity of the spacing between above-average local maxima.
fn rhythm(energy: &[f32], mean: f32) -> f32 {
    let peaks: Vec<usize> = (1..energy.len() - 1)
        .filter(|&i| energy[i] > energy[i - 1] && energy[i] >= energy[i + 1] && energy[i] > mean)
        .collect();
    if peaks.len() < 3 {
        return 0.0;
    }

    let intervals: Vec<f32> = peaks.windows(2).map(|w| (w[1] - w[0]) as f32).collect();
    let n = intervals.len() as f32;
    let mean_interval = intervals.iter().sum::<f32>() / n;
    let std = (intervals.iter().map(|i| (i - mean_interval).powi(2)).sum::<f32>() / n).sqrt();
    (1.0 - std / mean_interval).clamp(0.0, 1.0)
}

fn motion_energy(a: &GrayImage, b: &GrayImage) -> Option<f32> {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return None;
    }
    let sum: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs() as u64)
        .sum();
    Some(sum as f32 / a.as_raw().len() as f32 / 255.0)
}

/// Pattern features of timestamped thumbnails (oldest first).
pub fn analyze(thumbnails: &[(GrayImage, f64)]) -> PatternFeatures {
    let energy: Vec<f32> = thumbnails
        .windows(2)
        .filter_map(|pair| motion_energy(&pair[0].0, &pair[1].0))
        .collect();
    PatternFeatures::from_energy_series(&energy)
}
