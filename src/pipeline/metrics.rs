// src/pipeline/metrics.rs
//
// Counters for every stage of the counter. Cloning shares the underlying
// atomics, so the service handle can read them while the worker writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_processed: Arc<AtomicU64>,
    pub frames_suspended: Arc<AtomicU64>,
    pub frames_coalesced: Arc<AtomicU64>,
    pub flow_failures: Arc<AtomicU64>,
    pub proposals: Arc<AtomicU64>,
    pub superseded_proposals: Arc<AtomicU64>,
    pub confirmed_increments: Arc<AtomicU64>,
    pub filtered_proposals: Arc<AtomicU64>,
    pub classifier_fallbacks: Arc<AtomicU64>,
    pub manual_adjustments: Arc<AtomicU64>,
    pub inbox_overflows: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_processed: Arc::new(AtomicU64::new(0)),
            frames_suspended: Arc::new(AtomicU64::new(0)),
            frames_coalesced: Arc::new(AtomicU64::new(0)),
            flow_failures: Arc::new(AtomicU64::new(0)),
            proposals: Arc::new(AtomicU64::new(0)),
            superseded_proposals: Arc::new(AtomicU64::new(0)),
            confirmed_increments: Arc::new(AtomicU64::new(0)),
            filtered_proposals: Arc::new(AtomicU64::new(0)),
            classifier_fallbacks: Arc::new(AtomicU64::new(0)),
            manual_adjustments: Arc::new(AtomicU64::new(0)),
            inbox_overflows: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_suspended: self.frames_suspended.load(Ordering::Relaxed),
            frames_coalesced: self.frames_coalesced.load(Ordering::Relaxed),
            fps: self.fps(),
            flow_failures: self.flow_failures.load(Ordering::Relaxed),
            proposals: self.proposals.load(Ordering::Relaxed),
            superseded_proposals: self.superseded_proposals.load(Ordering::Relaxed),
            confirmed_increments: self.confirmed_increments.load(Ordering::Relaxed),
            filtered_proposals: self.filtered_proposals.load(Ordering::Relaxed),
            classifier_fallbacks: self.classifier_fallbacks.load(Ordering::Relaxed),
            manual_adjustments: self.manual_adjustments.load(Ordering::Relaxed),
            inbox_overflows: self.inbox_overflows.load(Ordering::Relaxed),
            last_frame_us: self.frame_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_processed: u64,
    pub frames_suspended: u64,
    pub frames_coalesced: u64,
    pub fps: f64,
    pub flow_failures: u64,
    pub proposals: u64,
    pub superseded_proposals: u64,
    pub confirmed_increments: u64,
    pub filtered_proposals: u64,
    pub classifier_fallbacks: u64,
    pub manual_adjustments: u64,
    pub inbox_overflows: u64,
    pub last_frame_us: u64,
    pub elapsed_secs: f64,
}
