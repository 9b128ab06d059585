//! Error types for the counting engine

use crate::types::NormalizedRect;
use thiserror::Error;

/// Rejected configuration values. The engine keeps its previous config
/// whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("motion threshold must be finite and within [0, {max}], got {value}")]
    MotionThreshold { value: f32, max: f32 },

    #[error("confidence threshold must be within [0, 1], got {0}")]
    ConfidenceThreshold(f32),

    #[error("debounce interval must be within (0, {max_ms}] ms, got {value_ms} ms")]
    DebounceInterval { value_ms: u64, max_ms: u64 },

    #[error("region of interest must have positive size and lie inside the frame: {0:?}")]
    RegionOfInterest(NormalizedRect),

    #[error("calibration constant must be finite and positive, got {0}")]
    CalibrationConstant(f32),

    #[error("frame window needs room for at least 2 frames, got {0}")]
    WindowCapacity(usize),

    #[error("flow search range must be within [1, {max}], got {value}")]
    SearchRange { value: u32, max: u32 },

    #[error("flow block size must be within [2, {max}], got {value}")]
    BlockSize { value: u32, max: u32 },

    #[error("flow analysis width must be at least the block size ({block_size}), got {value}")]
    AnalysisWidth { value: u32, block_size: u32 },
}
