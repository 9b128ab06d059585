// src/analysis/features/motion.rs
//
// Motion features over the whole window. Each consecutive pair of thumbnails
// gives one global shift (coarse block matching over the whole thumbnail),
// converted to frame-widths per second with the buffered timestamps.
//
// Completion signal: the hand moved during the window and has now stopped,
// i.e. the trailing samples are near-still while the leading ones were not.

use crate::analysis::flow::parabolic_offset;
use image::GrayImage;
use serde::Serialize;

const MAX_SHIFT: i32 = 4;
const COMPLETION_TAIL: usize = 3;
/// frame-widths/s
const COMPLETION_STILL_SPEED: f32 = 0.05;
const COMPLETION_MOVING_SPEED: f32 = 0.1;
/// Pairs closer than this in time are skipped
const MIN_PAIR_INTERVAL_MS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MotionFeatures {
    pub average_horizontal_velocity: f32,
    pub average_vertical_velocity: f32,
    pub average_speed: f32,
    /// Share of samples agreeing on the dominant horizontal direction
    pub direction_consistency: f32,
    pub has_completion_signal: bool,
}

impl MotionFeatures {
    /// Aggregate per-pair velocities (vx, vy) in frame-widths per second.
    pub fn from_velocities(velocities: &[(f32, f32)]) -> Self {
        if velocities.is_empty() {
            return Self::default();
        }
        let n = velocities.len() as f32;

        let avg_vx = velocities.iter().map(|v| v.0).sum::<f32>() / n;
        let avg_vy = velocities.iter().map(|v| v.1).sum::<f32>() / n;
        let speeds: Vec<f32> = velocities.iter().map(|(x, y)| (x * x + y * y).sqrt()).collect();
        let average_speed = speeds.iter().sum::<f32>() / n;

        let positive = velocities.iter().filter(|v| v.0 > 0.0).count();
        let negative = velocities.iter().filter(|v| v.0 < 0.0).count();
        let direction_consistency = positive.max(negative) as f32 / n;

        let has_completion_signal = if speeds.len() > COMPLETION_TAIL {
            let split = speeds.len() - COMPLETION_TAIL;
            let lead = mean(&speeds[..split]);
            let tail = mean(&speeds[split..]);
            tail < COMPLETION_STILL_SPEED && lead > COMPLETION_MOVING_SPEED
        } else {
            false
        };

        Self {
            average_horizontal_velocity: avg_vx,
            average_vertical_velocity: avg_vy,
            average_speed,
            direction_consistency,
            has_completion_signal,
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Motion features of timestamped thumbnails (oldest first).
pub fn analyze(thumbnails: &[(GrayImage, f64)]) -> MotionFeatures {
    if thumbnails.len() < 2 {
        return MotionFeatures::default();
    }
    let velocities: Vec<(f32, f32)> = thumbnails
        .windows(2)
        .filter_map(|pair| pair_velocity(&pair[0], &pair[1]))
        .collect();
    MotionFeatures::from_velocities(&velocities)
}

fn pair_velocity(a: &(GrayImage, f64), b: &(GrayImage, f64)) -> Option<(f32, f32)> {
    let dt_ms = b.1 - a.1;
    if dt_ms < MIN_PAIR_INTERVAL_MS || a.0.dimensions() != b.0.dimensions() {
        return None;
    }
    let (sx, sy) = global_shift(&a.0, &b.0, MAX_SHIFT)?;
    let width = a.0.width() as f32;
    let dt_s = (dt_ms / 1000.0) as f32;
    Some((sx / width / dt_s, sy / width / dt_s))
}

/// Mean absolute difference between `prev` and `curr` displaced by (dx, dy),
/// over the overlapping area.
fn shifted_difference(prev: &GrayImage, curr: &GrayImage, dx: i32, dy: i32) -> Option<f32> {
    let (w, h) = (prev.width() as i32, prev.height() as i32);
    let x0 = 0.max(-dx);
    let x1 = w.min(w - dx);
    let y0 = 0.max(-dy);
    let y1 = h.min(h - dy);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let p = prev.as_raw();
    let c = curr.as_raw();
    let stride = w as usize;
    let mut sum: u64 = 0;
    for y in y0..y1 {
        let p_row = y as usize * stride;
        let c_row = (y + dy) as usize * stride;
        for x in x0..x1 {
            let a = p[p_row + x as usize] as i32;
            let b = c[c_row + (x + dx) as usize] as i32;
            sum += (a - b).unsigned_abs() as u64;
        }
    }
    Some(sum as f32 / ((x1 - x0) * (y1 - y0)) as f32)
}

/// Displacement of the whole image content from `prev` to `curr`, in pixels.
fn global_shift(prev: &GrayImage, curr: &GrayImage, max_shift: i32) -> Option<(f32, f32)> {
    let max_shift = max_shift
        .min(prev.width() as i32 / 2)
        .min(prev.height() as i32 / 2);
    let span = (2 * max_shift + 1) as usize;
    let mut table = vec![None; span * span];

    let mut best = (0i32, 0i32);
    let mut best_cost = shifted_difference(prev, curr, 0, 0)?;

    for dy in -max_shift..=max_shift {
        for dx in -max_shift..=max_shift {
            let cost = shifted_difference(prev, curr, dx, dy);
            table[(dy + max_shift) as usize * span + (dx + max_shift) as usize] = cost;
            if let Some(c) = cost {
                if c < best_cost {
                    best_cost = c;
                    best = (dx, dy);
                }
            }
        }
    }

    let lookup = |dx: i32, dy: i32| -> Option<f32> {
        if dx.abs() > max_shift || dy.abs() > max_shift {
            return None;
        }
        table[(dy + max_shift) as usize * span + (dx + max_shift) as usize]
    };

    let (bx, by) = best;
    let mut fx = bx as f32;
    let mut fy = by as f32;
    if best_cost > 0.0 {
        if let (Some(l), Some(r)) = (lookup(bx - 1, by), lookup(bx + 1, by)) {
            fx += parabolic_offset(l, best_cost, r);
        }
        if let (Some(u), Some(d)) = (lookup(bx, by - 1), lookup(bx, by + 1)) {
            fy += parabolic_offset(u, best_cost, d);
        }
    }
    Some((fx, fy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn texture(shift_x: i32) -> GrayImage {
        GrayImage::from_fn(64, 48, |x, y| {
            let sx = (x as i32 - shift_x).rem_euclid(64) as u32;
            Luma([((sx.wrapping_mul(7919) ^ y.wrapping_mul(104_729)) % 251) as u8])
        })
    }

    #[test]
    fn test_too_few_frames_is_neutral() {
        assert_eq!(analyze(&[]), MotionFeatures::default());
        assert_eq!(analyze(&[(texture(0), 0.0)]), MotionFeatures::default());
    }

    #[test]
    fn test_steady_rightward_motion() {
        let thumbs: Vec<(GrayImage, f64)> = (0..5)
            .map(|i| (texture(2 * i), i as f64 * 100.0))
            .collect();
        let f = analyze(&thumbs);
        // 2 px per 100 ms on a 64 px thumbnail = 0.3125 widths/s
        assert!((f.average_horizontal_velocity - 0.3125).abs() < 0.02, "{:?}", f);
        assert!(f.average_vertical_velocity.abs() < 0.02);
        assert_eq!(f.direction_consistency, 1.0);
        assert!(!f.has_completion_signal);
    }

    #[test]
    fn test_static_window_has_no_motion() {
        let thumbs: Vec<(GrayImage, f64)> = (0..4).map(|i| (texture(0), i as f64 * 33.0)).collect();
        let f = analyze(&thumbs);
        assert_eq!(f.average_speed, 0.0);
        assert_eq!(f.direction_consistency, 0.0);
    }

    #[test]
    fn test_completion_signal_after_stop() {
        let velocities = [(0.3, 0.0), (0.4, 0.0), (0.3, 0.0), (0.01, 0.0), (0.0, 0.0), (0.0, 0.01)];
        let f = MotionFeatures::from_velocities(&velocities);
        assert!(f.has_completion_signal);
    }

    #[test]
    fn test_no_completion_while_moving() {
        let velocities = [(0.3, 0.0); 6];
        assert!(!MotionFeatures::from_velocities(&velocities).has_completion_signal);
        // Never moved
        assert!(!MotionFeatures::from_velocities(&[(0.0, 0.0); 6]).has_completion_signal);
    }

    #[test]
    fn test_direction_consistency_mixed() {
        let velocities = [(0.2, 0.0), (0.2, 0.0), (0.2, 0.0), (-0.2, 0.0)];
        let f = MotionFeatures::from_velocities(&velocities);
        assert!((f.direction_consistency - 0.75).abs() < 1e-6);
        assert!((f.average_speed - 0.2).abs() < 1e-6);
    }
}
