// src/counting/debounce.rs
//
// Fusion of motion proposals with classifier verdicts, plus the cool-down
// that keeps one physical row from being counted twice.
//
//   Idle ──propose──▶ Idle(pending) ──RowComplete verdict──▶ Suspended
//     ▲                    │                                     │
//     │              non-target verdict                  timer expiry
//     │                    ▼                                     │
//     └──────────── Idle(no pending) ◀───────────────────────────┘
//
// All times are session milliseconds supplied by the caller, so the
// controller is deterministic and testable without a clock.

use crate::types::{Classification, CounterState, MotionType};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterPhase {
    Idle,
    Suspended,
}

impl CounterPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterPhase::Idle => "idle",
            CounterPhase::Suspended => "suspended",
        }
    }
}

// ============================================================================
// TIMER
// ============================================================================

/// Single countdown deadline: start, cancel, poll.
#[derive(Debug, Default, Clone)]
pub struct DebounceTimer {
    deadline_ms: Option<f64>,
}

impl DebounceTimer {
    pub fn start(&mut self, now_ms: f64, interval_ms: f64) {
        self.deadline_ms = Some(now_ms + interval_ms);
    }

    pub fn cancel(&mut self) {
        self.deadline_ms = None;
    }

    pub fn deadline_ms(&self) -> Option<f64> {
        self.deadline_ms
    }

    /// True exactly once, on the first poll at or past the deadline.
    pub fn poll(&mut self, now_ms: f64) -> bool {
        match self.deadline_ms {
            Some(deadline) if now_ms >= deadline => {
                self.deadline_ms = None;
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IncrementEvent {
    pub count: u32,
    pub timestamp_ms: f64,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// A new proposal is now awaiting confirmation
    Pending,
    /// Replaced an earlier unconfirmed proposal
    Superseded,
    /// Dropped because the counter is suspended
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionOutcome {
    Confirmed(IncrementEvent),
    /// The classifier judged the motion as not craft motion
    Filtered { motion_type: MotionType, confidence: f32 },
    /// Craft motion still in progress; the proposal stays pending
    Awaiting,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct DebounceController {
    state: CounterState,
    timer: DebounceTimer,
    debounce_interval_ms: f64,
}

impl DebounceController {
    pub fn new(debounce_interval: Duration) -> Self {
        Self {
            state: CounterState::default(),
            timer: DebounceTimer::default(),
            debounce_interval_ms: debounce_interval.as_secs_f64() * 1000.0,
        }
    }

    /// Applies from the next confirmed row; a running cool-down keeps its deadline.
    pub fn set_debounce_interval(&mut self, interval: Duration) {
        self.debounce_interval_ms = interval.as_secs_f64() * 1000.0;
    }

    pub fn state(&self) -> CounterState {
        self.state
    }

    pub fn count(&self) -> u32 {
        self.state.current_count
    }

    pub fn is_suspended(&self) -> bool {
        self.state.is_suspended
    }

    pub fn phase(&self) -> CounterPhase {
        if self.state.is_suspended {
            CounterPhase::Suspended
        } else {
            CounterPhase::Idle
        }
    }

    pub fn deadline_ms(&self) -> Option<f64> {
        self.timer.deadline_ms()
    }

    /// Ends the cool-down if its deadline has passed. Returns true when the
    /// counter moved from Suspended back to Idle.
    pub fn poll_timer(&mut self, now_ms: f64) -> bool {
        if !self.timer.poll(now_ms) {
            return false;
        }
        self.state.is_suspended = false;
        debug!("Cool-down over at {:.0}ms, counter re-armed", now_ms);
        true
    }

    /// Record a motion proposal. The latest proposal wins.
    pub fn propose(&mut self, now_ms: f64) -> ProposalOutcome {
        self.poll_timer(now_ms);
        if self.state.is_suspended {
            return ProposalOutcome::Ignored;
        }
        if self.state.pending_confirmation {
            debug!("Proposal at {:.0}ms supersedes unconfirmed one", now_ms);
            return ProposalOutcome::Superseded;
        }
        self.state.pending_confirmation = true;
        ProposalOutcome::Pending
    }

    /// Fuse a classifier verdict with the pending proposal.
    /// None when there was nothing to confirm.
    pub fn resolve(&mut self, verdict: &Classification, now_ms: f64) -> Option<FusionOutcome> {
        self.poll_timer(now_ms);
        if self.state.is_suspended || !self.state.pending_confirmation {
            return None;
        }

        if !verdict.is_target_motion {
            self.state.pending_confirmation = false;
            return Some(FusionOutcome::Filtered {
                motion_type: verdict.motion_type,
                confidence: verdict.confidence,
            });
        }

        if verdict.motion_type != MotionType::RowComplete {
            return Some(FusionOutcome::Awaiting);
        }

        self.state.current_count = self.state.current_count.saturating_add(1);
        self.state.last_increment_at = Some(now_ms);
        self.state.pending_confirmation = false;
        self.state.is_suspended = true;
        self.timer.start(now_ms, self.debounce_interval_ms);

        info!(
            "Row {} confirmed at {:.0}ms (confidence {:.2}), suspended for {:.0}ms",
            self.state.current_count, now_ms, verdict.confidence, self.debounce_interval_ms
        );

        Some(FusionOutcome::Confirmed(IncrementEvent {
            count: self.state.current_count,
            timestamp_ms: now_ms,
            confidence: verdict.confidence,
        }))
    }

    /// User correction. Bypasses thresholds, fusion and the cool-down.
    pub fn manual_increment(&mut self) -> u32 {
        self.state.current_count = self.state.current_count.saturating_add(1);
        self.state.current_count
    }

    /// User correction. None when the count is already zero.
    pub fn manual_decrement(&mut self) -> Option<u32> {
        if self.state.current_count == 0 {
            return None;
        }
        self.state.current_count -= 1;
        Some(self.state.current_count)
    }

    /// Back to {count 0, idle, no pending, no last increment}; cancels the timer.
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.state = CounterState::default();
    }
}
