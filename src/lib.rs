//! Hybrid row counter for knitting and crochet video.
//!
//! A fast optical-flow path proposes a row when the working hand sweeps
//! across the region of interest; a slower window classifier confirms or
//! filters the proposal; a debounce controller keeps one physical row from
//! being counted twice.

pub mod analysis;
mod config;
pub mod counting;
pub mod error;
pub mod frame_buffer;
pub mod pipeline;
pub mod replay;
pub mod types;

pub use counting::{HybridCounter, IncrementEvent};
pub use error::ConfigError;
pub use pipeline::{CounterEvent, CounterHandle, CounterService};
pub use types::{
    Classification, Config, CounterConfig, CounterSnapshot, CounterState, EngineConfig, Frame,
    Handedness, MotionType, MotionVector, NormalizedRect,
};
