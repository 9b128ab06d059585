// src/analysis/features/color.rs
//
// Color features of the working area. Yarn and hooks are usually saturated
// and stable in color; a bare hand crossing the frame is mostly skin tone.
//
// HSV analysis over `color_roi` of the newest frame, plus how stable the
// region's mean color stays across the whole window.

use crate::frame_buffer::FrameWindow;
use crate::types::{Frame, NormalizedRect};
use serde::Serialize;

/// Roughly this many pixels are sampled per region
const TARGET_SAMPLES: u32 = 2048;
/// Darker pixels have unreliable hue/saturation
const MIN_VALUE: f32 = 0.15;
const TARGET_MIN_SATURATION: f32 = 0.25;
const TARGET_MAX_SKIN_RATIO: f32 = 0.5;
/// Mean-color std-dev (0-255 scale) at which consistency reaches 0
const CONSISTENCY_SPREAD: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ColorFeatures {
    /// 0-1
    pub average_saturation: f32,
    pub color_consistency: f32,
    /// Share of sampled pixels in the skin-tone band
    pub skin_ratio: f32,
    pub has_target_color: bool,
}

/// RGB (0-255) to HSV with H 0-360, S 0-1, V 0-1.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let s = if max < 1e-6 { 0.0 } else { delta / max };
    (h, s, max)
}

fn is_skin(h: f32, s: f32, v: f32) -> bool {
    h <= 50.0 && (0.23..=0.68).contains(&s) && v > 0.35
}

/// Sampling stride giving about TARGET_SAMPLES pixels over the region.
fn sample_step(x0: u32, y0: u32, x1: u32, y1: u32) -> usize {
    let area = ((x1 - x0) * (y1 - y0)) as f32;
    ((area / TARGET_SAMPLES as f32).sqrt().floor() as usize).max(1)
}

/// Mean RGB of the region, or None when it covers no pixel.
fn mean_color(frame: &Frame, roi: &NormalizedRect) -> Option<[f32; 3]> {
    let (x0, y0, x1, y1) = roi.pixel_bounds(frame.width(), frame.height())?;
    let step = sample_step(x0, y0, x1, y1);
    let image = frame.image();

    let mut sum = [0.0f32; 3];
    let mut n = 0.0f32;
    for y in (y0..y1).step_by(step) {
        for x in (x0..x1).step_by(step) {
            let p = image.get_pixel(x, y).0;
            sum[0] += p[0] as f32;
            sum[1] += p[1] as f32;
            sum[2] += p[2] as f32;
            n += 1.0;
        }
    }
    Some([sum[0] / n, sum[1] / n, sum[2] / n])
}

/// 1 when the region's mean color never changes, falling to 0 as the
/// per-channel spread across the window reaches CONSISTENCY_SPREAD.
fn consistency(means: &[[f32; 3]]) -> f32 {
    if means.len() < 2 {
        return 1.0;
    }
    let n = means.len() as f32;
    let mut spread = 0.0;
    for c in 0..3 {
        let mean = means.iter().map(|m| m[c]).sum::<f32>() / n;
        let var = means.iter().map(|m| (m[c] - mean).powi(2)).sum::<f32>() / n;
        spread += var.sqrt();
    }
    (1.0 - (spread / 3.0) / CONSISTENCY_SPREAD).clamp(0.0, 1.0)
}

pub fn analyze(window: &FrameWindow, roi: &NormalizedRect) -> ColorFeatures {
    let latest = match window.latest() {
        Some(b) => &b.frame,
        None => return ColorFeatures::default(),
    };
    let (x0, y0, x1, y1) = match roi.pixel_bounds(latest.width(), latest.height()) {
        Some(bounds) => bounds,
        None => return ColorFeatures::default(),
    };

    let step = sample_step(x0, y0, x1, y1);
    let image = latest.image();
    let mut saturation_sum = 0.0f32;
    let mut skin = 0u32;
    let mut samples = 0u32;
    for y in (y0..y1).step_by(step) {
        for x in (x0..x1).step_by(step) {
            let [r, g, b] = image.get_pixel(x, y).0;
            let (h, s, v) = rgb_to_hsv(r, g, b);
            if v < MIN_VALUE {
                continue;
            }
            saturation_sum += s;
            if is_skin(h, s, v) {
                skin += 1;
            }
            samples += 1;
        }
    }

    if samples == 0 {
        return ColorFeatures::default();
    }

    let average_saturation = saturation_sum / samples as f32;
    let skin_ratio = skin as f32 / samples as f32;
    let means: Vec<[f32; 3]> = window.contents().filter_map(|f| mean_color(f, roi)).collect();

    ColorFeatures {
        average_saturation,
        color_consistency: consistency(&means),
        skin_ratio,
        has_target_color: average_saturation >= TARGET_MIN_SATURATION
            && skin_ratio < TARGET_MAX_SKIN_RATIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn window_of(colors: &[[u8; 3]]) -> FrameWindow {
        let mut window = FrameWindow::new(colors.len());
        for (i, c) in colors.iter().enumerate() {
            window.append(Frame::new(RgbImage::from_pixel(40, 30, Rgb(*c))), i as f64 * 33.0);
        }
        window
    }

    #[test]
    fn test_hsv_primaries() {
        let (h, s, v) = rgb_to_hsv(255, 0, 0);
        assert_eq!((h, s, v), (0.0, 1.0, 1.0));
        let (h, _, _) = rgb_to_hsv(0, 0, 255);
        assert!((h - 240.0).abs() < 1e-3);
        let (_, s, _) = rgb_to_hsv(128, 128, 128);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_saturated_yarn_is_target_color() {
        let window = window_of(&[[40, 90, 220]; 4]);
        let f = analyze(&window, &NormalizedRect::full());
        assert!(f.average_saturation > 0.7);
        assert_eq!(f.skin_ratio, 0.0);
        assert!(f.has_target_color);
        assert!((f.color_consistency - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_skin_tone_is_not_target_color() {
        let window = window_of(&[[224, 172, 140]; 3]);
        let f = analyze(&window, &NormalizedRect::full());
        assert!(f.skin_ratio > 0.9);
        assert!(!f.has_target_color);
    }

    #[test]
    fn test_gray_scene_is_not_target_color() {
        let window = window_of(&[[120, 120, 120]; 3]);
        let f = analyze(&window, &NormalizedRect::full());
        assert_eq!(f.average_saturation, 0.0);
        assert!(!f.has_target_color);
    }

    #[test]
    fn test_flicker_lowers_consistency() {
        let window = window_of(&[[200, 30, 30], [30, 30, 200], [200, 30, 30], [30, 30, 200]]);
        let f = analyze(&window, &NormalizedRect::full());
        assert!(f.color_consistency < 0.2);
    }

    #[test]
    fn test_dark_frame_is_neutral() {
        let window = window_of(&[[5, 5, 5]; 2]);
        assert_eq!(analyze(&window, &NormalizedRect::full()), ColorFeatures::default());
    }
}
