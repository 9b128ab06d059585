// src/pipeline/event_bus.rs
//
// Decoupled event system. The counter publishes what happened on each
// step instead of callers reaching into its state; the service drains the
// bus after every step and fans the events out to subscribers.

use crate::counting::IncrementEvent;
use crate::types::{Classification, CounterConfig, MotionType, MotionVector};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

/// Per-frame display update.
#[derive(Debug, Clone, Serialize)]
pub struct CounterUpdate {
    pub timestamp_ms: f64,
    pub count: u32,
    /// Classifier confidence when a verdict was produced this frame,
    /// otherwise the motion confidence
    pub confidence: f32,
    pub motion_confidence: f32,
    pub motion_vector: Option<MotionVector>,
    pub classification: Option<Classification>,
    pub is_suspended: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CounterEvent {
    FrameProcessed(CounterUpdate),

    RowCounted(IncrementEvent),

    ProposalFiltered {
        timestamp_ms: f64,
        motion_type: MotionType,
        confidence: f32,
    },

    CooldownEnded {
        timestamp_ms: f64,
    },

    CountAdjusted {
        count: u32,
        delta: i32,
    },

    CountReset,

    ConfigUpdated(CounterConfig),
}

impl CounterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CounterEvent::FrameProcessed(_) => "frame_processed",
            CounterEvent::RowCounted(_) => "row_counted",
            CounterEvent::ProposalFiltered { .. } => "proposal_filtered",
            CounterEvent::CooldownEnded { .. } => "cooldown_ended",
            CounterEvent::CountAdjusted { .. } => "count_adjusted",
            CounterEvent::CountReset => "count_reset",
            CounterEvent::ConfigUpdated(_) => "config_updated",
        }
    }
}

pub struct EventBus {
    events: VecDeque<CounterEvent>,
    max_pending: usize,
    dropped: u64,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
            dropped: 0,
        }
    }

    pub fn publish(&mut self, event: CounterEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<CounterEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
