// src/analysis/features/mod.rs
//
// Window-level feature extraction feeding the classifier. Every extractor is
// a pure function of the FrameWindow contents and never fails: a window too
// short or too uniform to say anything yields neutral (zeroed) features.

pub mod color;
pub mod motion;
pub mod pattern;

pub use color::ColorFeatures;
pub use motion::MotionFeatures;
pub use pattern::PatternFeatures;

use crate::frame_buffer::FrameWindow;
use crate::types::{Frame, NormalizedRect};
use image::imageops::FilterType;
use image::GrayImage;
use serde::Serialize;

/// Width of the grayscale thumbnails the motion and pattern extractors use.
pub(crate) const THUMBNAIL_WIDTH: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FeatureSet {
    pub motion: MotionFeatures,
    pub color: ColorFeatures,
    pub pattern: PatternFeatures,
}

/// Run all three extractors over the window.
pub fn extract_features(window: &FrameWindow, color_roi: &NormalizedRect) -> FeatureSet {
    let thumbnails: Vec<(GrayImage, f64)> = window
        .entries()
        .iter()
        .map(|b| (thumbnail(&b.frame, THUMBNAIL_WIDTH), b.timestamp_ms))
        .collect();

    FeatureSet {
        motion: motion::analyze(&thumbnails),
        color: color::analyze(window, color_roi),
        pattern: pattern::analyze(&thumbnails),
    }
}

/// Small grayscale copy used for whole-frame comparisons.
pub(crate) fn thumbnail(frame: &Frame, width: u32) -> GrayImage {
    let gray = frame.to_luma();
    let (w, h) = gray.dimensions();
    if w <= width || w == 0 {
        return gray;
    }
    let target_h = ((h as u64 * width as u64) / w as u64).max(1) as u32;
    image::imageops::resize(&gray, width, target_h, FilterType::Triangle)
}
