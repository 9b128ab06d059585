// src/pipeline/mod.rs

pub mod event_bus;
pub mod metrics;
pub mod service;

pub use event_bus::{CounterEvent, CounterUpdate, EventBus};
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use service::{CounterHandle, CounterService};
