// src/analysis/flow.rs
//
// Dense optical-flow capability consumed by the motion vector estimator.
//
// The engine does not care how flow is computed. It only needs a per-pixel
// displacement field between two frames, which it then restricts to the
// region of interest. Two providers ship with the crate:
//
//   - BlockMatchFlow: SAD block matching on a downscaled grayscale copy,
//     with parabolic sub-pixel refinement. No native dependencies.
//   - FarnebackFlow (feature "opencv"): OpenCV's dense Farneback flow.
//
// Displacements are expressed in pixels of the analysis grid per frame, so
// thresholds stay comparable across camera resolutions.

use crate::types::Frame;
use anyhow::{bail, Result};
use image::imageops::FilterType;
use image::GrayImage;
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowOptions {
    /// Frames wider than this are downscaled (aspect preserved) before matching
    pub analysis_width: u32,
    /// Block size in analysis-grid pixels (square blocks)
    pub block_size: u32,
    /// Maximum search displacement in each direction (±)
    pub search_range: u32,
}

/// Largest accepted search range. Matching cost grows with its square.
pub const MAX_SEARCH_RANGE: u32 = 32;
pub const MAX_BLOCK_SIZE: u32 = 64;

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            analysis_width: 160,
            block_size: 8,
            search_range: 6,
        }
    }
}

// ============================================================================
// FLOW FIELD
// ============================================================================

/// Row-major displacement field: vector at (x, y) = vectors[y * width + x].
#[derive(Debug, Clone, PartialEq)]
pub struct DenseFlowField {
    width: u32,
    height: u32,
    vectors: Vec<[f32; 2]>,
}

impl DenseFlowField {
    /// Returns None when `vectors` does not hold exactly width * height entries.
    pub fn new(width: u32, height: u32, vectors: Vec<[f32; 2]>) -> Option<Self> {
        if vectors.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            vectors,
        })
    }

    /// Field where every pixel carries the same displacement.
    pub fn uniform(width: u32, height: u32, dx: f32, dy: f32) -> Self {
        Self {
            width,
            height,
            vectors: vec![[dx, dy]; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [f32; 2] {
        self.vectors[(y * self.width + x) as usize]
    }

    /// One row of the field.
    pub fn row(&self, y: u32) -> &[[f32; 2]] {
        let start = (y * self.width) as usize;
        &self.vectors[start..start + self.width as usize]
    }
}

/// Optical-flow provider. Implementations may fail (unsupported frame,
/// backend error); callers treat a failure as "no motion data this frame".
pub trait OpticalFlow: Send {
    fn compute_flow(
        &mut self,
        previous: &Frame,
        current: &Frame,
        options: &FlowOptions,
    ) -> Result<DenseFlowField>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Grayscale copy of `frame`, downscaled to at most `max_width` pixels wide.
pub(crate) fn analysis_luma(frame: &Frame, max_width: u32) -> GrayImage {
    let gray = frame.to_luma();
    let (w, h) = gray.dimensions();
    if max_width == 0 || w <= max_width {
        return gray;
    }
    let target_h = ((h as u64 * max_width as u64) / w as u64).max(1) as u32;
    image::imageops::resize(&gray, max_width, target_h, FilterType::Triangle)
}

/// Vertex offset of the parabola through (-1, left), (0, center), (1, right),
/// clamped to ±0.5. Zero when the three points are not convex.
#[inline]
pub(crate) fn parabolic_offset(left: f32, center: f32, right: f32) -> f32 {
    let denom = left - 2.0 * center + right;
    if denom <= f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

// ============================================================================
// BLOCK MATCHING PROVIDER
// ============================================================================

/// SAD block matcher producing a dense field by replicating each block's
/// displacement over the block's pixels.
#[derive(Debug, Default, Clone)]
pub struct BlockMatchFlow;

impl BlockMatchFlow {
    pub fn new() -> Self {
        Self
    }
}

/// SAD between the block at (x, y) in `prev` and the block at (x + dx, y + dy)
/// in `curr`. None when the displaced block leaves the frame.
#[inline]
fn sad_block(
    prev: &GrayImage,
    curr: &GrayImage,
    x: u32,
    y: u32,
    dx: i32,
    dy: i32,
    size: u32,
) -> Option<u32> {
    let cx = x as i32 + dx;
    let cy = y as i32 + dy;
    if cx < 0 || cy < 0 || cx as u32 + size > curr.width() || cy as u32 + size > curr.height() {
        return None;
    }
    let (cx, cy) = (cx as u32, cy as u32);
    let pw = prev.width() as usize;
    let cw = curr.width() as usize;
    let p = prev.as_raw();
    let c = curr.as_raw();

    let mut sum: u32 = 0;
    for row in 0..size as usize {
        let p_row = (y as usize + row) * pw + x as usize;
        let c_row = (cy as usize + row) * cw + cx as usize;
        for col in 0..size as usize {
            sum += (p[p_row + col] as i32 - c[c_row + col] as i32).unsigned_abs();
        }
    }
    Some(sum)
}

/// Best displacement of one block, with sub-pixel refinement.
/// Ties keep the zero displacement so textureless regions report no motion.
fn match_block(prev: &GrayImage, curr: &GrayImage, x: u32, y: u32, bs: u32, sr: i32) -> [f32; 2] {
    let span = (2 * sr + 1) as usize;
    let mut table: Vec<Option<u32>> = vec![None; span * span];

    let mut best = (0i32, 0i32);
    let mut best_sad = u32::MAX;
    if let Some(s) = sad_block(prev, curr, x, y, 0, 0, bs) {
        best_sad = s;
    }

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            let sad = sad_block(prev, curr, x, y, dx, dy, bs);
            table[(dy + sr) as usize * span + (dx + sr) as usize] = sad;
            if let Some(s) = sad {
                if s < best_sad {
                    best_sad = s;
                    best = (dx, dy);
                }
            }
        }
    }

    if best_sad == u32::MAX {
        return [0.0, 0.0];
    }

    let lookup = |dx: i32, dy: i32| -> Option<f32> {
        if dx.abs() > sr || dy.abs() > sr {
            return None;
        }
        table[(dy + sr) as usize * span + (dx + sr) as usize].map(|s| s as f32)
    };

    let (bx, by) = best;
    let mut fx = bx as f32;
    let mut fy = by as f32;

    // Exact matches need no refinement
    if best_sad > 0 {
        let center = best_sad as f32;
        if let (Some(l), Some(r)) = (lookup(bx - 1, by), lookup(bx + 1, by)) {
            fx += parabolic_offset(l, center, r);
        }
        if let (Some(u), Some(d)) = (lookup(bx, by - 1), lookup(bx, by + 1)) {
            fy += parabolic_offset(u, center, d);
        }
    }

    [fx, fy]
}

impl OpticalFlow for BlockMatchFlow {
    fn compute_flow(
        &mut self,
        previous: &Frame,
        current: &Frame,
        options: &FlowOptions,
    ) -> Result<DenseFlowField> {
        if previous.is_empty() || current.is_empty() {
            bail!("empty frame");
        }
        if previous.width() != current.width() || previous.height() != current.height() {
            bail!(
                "frame size changed: {}x{} -> {}x{}",
                previous.width(),
                previous.height(),
                current.width(),
                current.height()
            );
        }

        let prev = analysis_luma(previous, options.analysis_width);
        let curr = analysis_luma(current, options.analysis_width);
        let (w, h) = prev.dimensions();

        if options.search_range > MAX_SEARCH_RANGE {
            bail!(
                "search range {} exceeds {}",
                options.search_range,
                MAX_SEARCH_RANGE
            );
        }
        let bs = options.block_size.clamp(2, MAX_BLOCK_SIZE);
        let sr = options.search_range as i32;
        let blocks_x = w / bs;
        let blocks_y = h / bs;
        if blocks_x == 0 || blocks_y == 0 {
            bail!("frame {}x{} smaller than one {}px block", w, h, bs);
        }

        let mut block_vectors = Vec::with_capacity((blocks_x * blocks_y) as usize);
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                block_vectors.push(match_block(&prev, &curr, bx * bs, by * bs, bs, sr));
            }
        }

        // Pixels past the last full block take the nearest block's vector
        let mut vectors = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            let by = (y / bs).min(blocks_y - 1);
            for x in 0..w {
                let bx = (x / bs).min(blocks_x - 1);
                vectors.push(block_vectors[(by * blocks_x + bx) as usize]);
            }
        }

        Ok(DenseFlowField {
            width: w,
            height: h,
            vectors,
        })
    }

    fn name(&self) -> &str {
        "block-match"
    }
}

// ============================================================================
// OPENCV PROVIDER
// ============================================================================

#[cfg(feature = "opencv")]
pub use farneback::FarnebackFlow;

#[cfg(feature = "opencv")]
mod farneback {
    use super::{analysis_luma, DenseFlowField, FlowOptions, OpticalFlow};
    use crate::types::Frame;
    use anyhow::{Context, Result};
    use image::GrayImage;
    use opencv::{
        core::{Mat, Vec2f},
        prelude::*,
        video,
    };

    /// OpenCV dense Farneback optical flow.
    #[derive(Debug, Clone)]
    pub struct FarnebackFlow {
        pub pyr_scale: f64,
        pub levels: i32,
        pub win_size: i32,
        pub iterations: i32,
        pub poly_n: i32,
        pub poly_sigma: f64,
    }

    impl Default for FarnebackFlow {
        fn default() -> Self {
            Self {
                pyr_scale: 0.5,
                levels: 3,
                win_size: 15,
                iterations: 3,
                poly_n: 5,
                poly_sigma: 1.2,
            }
        }
    }

    fn gray_to_mat(gray: &GrayImage) -> Result<Mat> {
        let mat = Mat::from_slice(gray.as_raw())?;
        let mat = mat.reshape(1, gray.height() as i32)?;
        Ok(mat.try_clone()?)
    }

    impl OpticalFlow for FarnebackFlow {
        fn compute_flow(
            &mut self,
            previous: &Frame,
            current: &Frame,
            options: &FlowOptions,
        ) -> Result<DenseFlowField> {
            let prev = analysis_luma(previous, options.analysis_width);
            let curr = analysis_luma(current, options.analysis_width);
            let prev_mat = gray_to_mat(&prev)?;
            let curr_mat = gray_to_mat(&curr)?;

            let mut flow = Mat::default();
            video::calc_optical_flow_farneback(
                &prev_mat,
                &curr_mat,
                &mut flow,
                self.pyr_scale,
                self.levels,
                self.win_size,
                self.iterations,
                self.poly_n,
                self.poly_sigma,
                0,
            )?;

            let (w, h) = prev.dimensions();
            let mut vectors = Vec::with_capacity((w * h) as usize);
            for y in 0..h as i32 {
                for x in 0..w as i32 {
                    let v = flow.at_2d::<Vec2f>(y, x)?;
                    vectors.push([v[0], v[1]]);
                }
            }
            DenseFlowField::new(w, h, vectors).context("Farneback flow size mismatch")
        }

        fn name(&self) -> &str {
            "farneback"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Deterministic high-frequency texture, shifted by (shift_x, shift_y).
    fn textured(width: u32, height: u32, shift_x: i32, shift_y: i32) -> Frame {
        Frame::new(RgbImage::from_fn(width, height, |x, y| {
            let sx = (x as i32 - shift_x).rem_euclid(width as i32) as u32;
            let sy = (y as i32 - shift_y).rem_euclid(height as i32) as u32;
            let v = ((sx.wrapping_mul(7919) ^ sy.wrapping_mul(104_729)) % 251) as u8;
            Rgb([v, v, v])
        }))
    }

    fn mean_in(field: &DenseFlowField, x0: u32, y0: u32, x1: u32, y1: u32) -> (f32, f32) {
        let mut sx = 0.0;
        let mut sy = 0.0;
        let mut n = 0.0;
        for y in y0..y1 {
            for x in x0..x1 {
                let v = field.get(x, y);
                sx += v[0];
                sy += v[1];
                n += 1.0;
            }
        }
        (sx / n, sy / n)
    }

    #[test]
    fn test_identical_frames_have_zero_flow() {
        let frame = textured(96, 64, 0, 0);
        let field = BlockMatchFlow::new()
            .compute_flow(&frame, &frame, &FlowOptions::default())
            .unwrap();
        assert_eq!((field.width(), field.height()), (96, 64));
        let (dx, dy) = mean_in(&field, 0, 0, 96, 64);
        assert_eq!((dx, dy), (0.0, 0.0));
    }

    #[test]
    fn test_detects_rightward_shift() {
        let prev = textured(160, 96, 0, 0);
        let curr = textured(160, 96, 3, 0);
        let field = BlockMatchFlow::new()
            .compute_flow(&prev, &curr, &FlowOptions::default())
            .unwrap();
        // Interior blocks only: wrapped content at the borders cannot match
        let (dx, dy) = mean_in(&field, 16, 16, 144, 80);
        assert!((dx - 3.0).abs() < 0.25, "dx = {}", dx);
        assert!(dy.abs() < 0.25, "dy = {}", dy);
    }

    #[test]
    fn test_detects_upward_shift() {
        let prev = textured(160, 96, 0, 0);
        let curr = textured(160, 96, 0, -2);
        let field = BlockMatchFlow::new()
            .compute_flow(&prev, &curr, &FlowOptions::default())
            .unwrap();
        let (dx, dy) = mean_in(&field, 16, 16, 144, 80);
        assert!(dx.abs() < 0.25, "dx = {}", dx);
        assert!((dy + 2.0).abs() < 0.25, "dy = {}", dy);
    }

    #[test]
    fn test_rejects_mismatched_sizes() {
        let a = textured(64, 64, 0, 0);
        let b = textured(32, 64, 0, 0);
        assert!(BlockMatchFlow::new()
            .compute_flow(&a, &b, &FlowOptions::default())
            .is_err());
    }

    #[test]
    fn test_oversized_search_range_is_an_error() {
        let frame = textured(64, 64, 0, 0);
        let options = FlowOptions {
            search_range: u32::MAX,
            ..FlowOptions::default()
        };
        assert!(BlockMatchFlow::new()
            .compute_flow(&frame, &frame, &options)
            .is_err());
    }

    #[test]
    fn test_downscales_wide_frames() {
        let frame = textured(640, 480, 0, 0);
        let field = BlockMatchFlow::new()
            .compute_flow(&frame, &frame, &FlowOptions::default())
            .unwrap();
        assert_eq!((field.width(), field.height()), (160, 120));
    }

    #[test]
    fn test_parabolic_offset() {
        assert_eq!(parabolic_offset(4.0, 1.0, 4.0), 0.0);
        assert!(parabolic_offset(2.0, 1.0, 4.0) < 0.0);
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_field_length_checked() {
        assert!(DenseFlowField::new(2, 2, vec![[0.0, 0.0]; 3]).is_none());
        let f = DenseFlowField::uniform(3, 2, 1.0, -1.0);
        assert_eq!(f.row(1), &[[1.0, -1.0]; 3]);
    }
}
