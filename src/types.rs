// src/types.rs

use crate::analysis::flow::FlowOptions;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub counter: CounterConfig,
    pub engine: EngineConfig,
    pub replay: ReplayConfig,
    pub logging: LoggingConfig,
}

/// Thresholds for one counting session. Swapped atomically through
/// `HybridCounter::update_config`, never mutated field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Minimum averaged ROI displacement (flow-field px/frame) to propose a row
    pub motion_threshold: f32,
    /// Minimum motion confidence [0, 1] to propose a row
    pub confidence_threshold: f32,
    /// Cool-down after a confirmed row
    pub debounce_interval_ms: u64,
    pub region_of_interest: NormalizedRect,
    pub handedness: Handedness,
    /// Linear scale mapping magnitude to confidence: min(1, magnitude / c).
    /// A per-device fudge factor, not a calibrated probability.
    pub calibration_constant: f32,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 0.15,
            confidence_threshold: 0.7,
            debounce_interval_ms: 5000,
            region_of_interest: NormalizedRect::new(0.2, 0.3, 0.6, 0.5),
            handedness: Handedness::Right,
            calibration_constant: 0.5,
        }
    }
}

impl CounterConfig {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }
}

/// Settings fixed when the engine is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// FrameWindow length (15 frames ~ 0.5s at 30fps)
    pub window_capacity: usize,
    pub flow: FlowOptions,
    /// Region sampled by the color extractor
    pub color_roi: NormalizedRect,
    pub event_bus_capacity: usize,
    /// Frames queued between capture and the vision worker
    pub inbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: 15,
            flow: FlowOptions::default(),
            color_roi: NormalizedRect::new(0.35, 0.35, 0.3, 0.3),
            event_bus_capacity: 256,
            inbox_capacity: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub fps: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input_dir: "frames".to_string(),
            output_dir: "output".to_string(),
            fps: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "stitch_counter=info".to_string(),
        }
    }
}

// ============================================================================
// FRAMES & GEOMETRY
// ============================================================================

/// One decoded RGB video frame.
///
/// Pixel storage is shared, so cloning a frame into the window is cheap and
/// the engine never copies pixel data it was lent.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Wrap packed RGB bytes. Returns None if the buffer is too small.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// ITU-R BT.601 luma conversion.
    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(self.image.as_ref())
    }
}

/// Rectangle in normalized [0, 1] frame coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Finite, positive size, and inside the unit square.
    pub fn is_valid(&self) -> bool {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.0 + 1e-6
            && self.y + self.height <= 1.0 + 1e-6
    }

    /// Pixel bounds `(x0, y0, x1, y1)` (end-exclusive) for a `width` x `height`
    /// grid. None when the rectangle covers no pixel.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if width == 0 || height == 0 {
            return None;
        }
        let w = width as f32;
        let h = height as f32;
        let x0 = (self.x * w).floor().clamp(0.0, w) as u32;
        let y0 = (self.y * h).floor().clamp(0.0, h) as u32;
        let x1 = ((self.x + self.width) * w).ceil().clamp(0.0, w) as u32;
        let y1 = ((self.y + self.height) * h).ceil().clamp(0.0, h) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self::full()
    }
}

/// Which way the working hand sweeps when a row completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    /// Expects a left-to-right sweep (positive dx)
    #[default]
    Right,
    /// Expects a right-to-left sweep (negative dx)
    Left,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Right => "right",
            Handedness::Left => "left",
        }
    }
}

// ============================================================================
// SIGNALS
// ============================================================================

/// Averaged displacement over the ROI between two consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionVector {
    pub dx: f32,
    pub dy: f32,
    pub magnitude: f32,
}

impl MotionVector {
    pub fn new(dx: f32, dy: f32) -> Self {
        Self {
            dx,
            dy,
            magnitude: (dx * dx + dy * dy).sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionType {
    RowComplete,
    InProgress,
    Idle,
    HandMovement,
    BackgroundNoise,
}

impl MotionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionType::RowComplete => "ROW_COMPLETE",
            MotionType::InProgress => "IN_PROGRESS",
            MotionType::Idle => "IDLE",
            MotionType::HandMovement => "HAND_MOVEMENT",
            MotionType::BackgroundNoise => "BACKGROUND_NOISE",
        }
    }

    /// Row-complete and in-progress are the craft motion; the rest is not.
    pub fn is_target(&self) -> bool {
        matches!(self, MotionType::RowComplete | MotionType::InProgress)
    }
}

/// Classifier verdict for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_target_motion: bool,
    /// Always within [0, 1]
    pub confidence: f32,
    pub motion_type: MotionType,
}

impl Classification {
    /// Builds a verdict, deriving `is_target_motion` from the type and
    /// clamping the confidence (NaN becomes 0).
    pub fn new(motion_type: MotionType, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            is_target_motion: motion_type.is_target(),
            confidence,
            motion_type,
        }
    }
}

// ============================================================================
// COUNTER STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CounterState {
    pub current_count: u32,
    pub is_suspended: bool,
    /// Session timestamp (ms) of the last confirmed row
    pub last_increment_at: Option<f64>,
    pub pending_confirmation: bool,
}

/// Consistent, read-only view published for display.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CounterSnapshot {
    pub state: CounterState,
    pub confidence: f32,
    pub last_vector: Option<MotionVector>,
    pub frames_processed: u64,
}
