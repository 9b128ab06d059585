// src/counting/hybrid_counter.rs
//
// The hybrid counting engine. One instance per counting session.
//
// Per frame:
//   1. poll the cool-down timer
//   2. while suspended, drop the frame
//   3. fast path: flow over the ROI → motion vector → maybe propose a row
//   4. slow path: append to the window; once full, classify it and fuse the
//      verdict with the pending proposal
//   5. publish a per-frame update
//
// Every entry point takes `&mut self`, so all state transitions are
// serialized by construction. The async service owns the counter and moves
// it onto a blocking thread for vision work.

use crate::analysis::classifier::{ClassifierInput, MotionClassifier, RuleBasedClassifier};
use crate::analysis::features::extract_features;
use crate::analysis::flow::OpticalFlow;
use crate::analysis::motion_estimator::{
    evaluate_proposal, motion_confidence, MotionVectorEstimator, ProposalDecision,
};
use crate::counting::debounce::{DebounceController, FusionOutcome, ProposalOutcome};
use crate::error::ConfigError;
use crate::frame_buffer::FrameWindow;
use crate::pipeline::event_bus::{CounterEvent, CounterUpdate, EventBus};
use crate::pipeline::metrics::PipelineMetrics;
use crate::types::{
    Classification, CounterConfig, CounterSnapshot, CounterState, EngineConfig, Frame,
    MotionVector,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Diagnostics cadence (~5s at 30fps)
const DIAGNOSTIC_INTERVAL_FRAMES: u64 = 150;

pub struct HybridCounter {
    config: CounterConfig,
    engine: EngineConfig,
    estimator: MotionVectorEstimator,
    window: FrameWindow,
    classifier: Box<dyn MotionClassifier>,
    controller: DebounceController,
    previous_frame: Option<Frame>,
    events: EventBus,
    metrics: PipelineMetrics,
    last_vector: Option<MotionVector>,
    last_confidence: f32,
    frames_processed: u64,
}

impl HybridCounter {
    /// Builds a counter with the rule-based classifier.
    pub fn new(
        config: CounterConfig,
        engine: EngineConfig,
        flow: Box<dyn OpticalFlow>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        engine.validate()?;

        info!(
            "HybridCounter ready: flow={}, window={} frames, debounce={}ms, handedness={}",
            flow.name(),
            engine.window_capacity,
            config.debounce_interval_ms,
            config.handedness.as_str()
        );

        Ok(Self {
            estimator: MotionVectorEstimator::new(flow, engine.flow.clone()),
            window: FrameWindow::new(engine.window_capacity),
            classifier: Box::new(RuleBasedClassifier::new()),
            controller: DebounceController::new(config.debounce_interval()),
            previous_frame: None,
            events: EventBus::new(engine.event_bus_capacity),
            metrics: PipelineMetrics::new(),
            last_vector: None,
            last_confidence: 0.0,
            frames_processed: 0,
            config,
            engine,
        })
    }

    /// Swap the window classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn MotionClassifier>) -> Self {
        info!("Classifier: {}", classifier.name());
        self.classifier = classifier;
        self
    }

    // ========================================================================
    // FRAME INGESTION
    // ========================================================================

    /// Full processing of one frame captured at `timestamp_ms` (session time).
    pub fn process_frame(&mut self, frame: Frame, timestamp_ms: f64) {
        let started = Instant::now();
        self.tick(timestamp_ms);

        if self.controller.is_suspended() {
            // No flow across the gap once the cool-down ends
            self.previous_frame = None;
            self.metrics.inc(&self.metrics.frames_suspended);
            return;
        }
        if frame.is_empty() {
            debug!("Skipping empty frame at {:.0}ms", timestamp_ms);
            return;
        }

        self.frames_processed += 1;
        self.metrics.inc(&self.metrics.frames_processed);

        // Fast path
        let mut motion_conf = 0.0;
        if let Some(previous) = self.previous_frame.take() {
            let vector = self
                .estimator
                .estimate(&previous, &frame, &self.config.region_of_interest);
            self.metrics
                .set(&self.metrics.flow_failures, self.estimator.failures());
            if let Some(vector) = vector {
                motion_conf = motion_confidence(vector.magnitude, self.config.calibration_constant);
                self.propose_if_strong(&vector, motion_conf, timestamp_ms);
            }
            self.last_vector = vector;
        }

        // Slow path
        self.window.append(frame.clone(), timestamp_ms);
        let classification = if self.window.is_full() {
            Some(self.classify_and_fuse(timestamp_ms))
        } else {
            None
        };

        self.previous_frame = Some(frame);
        self.last_confidence = classification.map_or(motion_conf, |c| c.confidence);

        self.events.publish(CounterEvent::FrameProcessed(CounterUpdate {
            timestamp_ms,
            count: self.controller.count(),
            confidence: self.last_confidence,
            motion_confidence: motion_conf,
            motion_vector: self.last_vector,
            classification,
            is_suspended: self.controller.is_suspended(),
        }));

        self.metrics.set(
            &self.metrics.frame_time_us,
            started.elapsed().as_micros() as u64,
        );

        if self.frames_processed % DIAGNOSTIC_INTERVAL_FRAMES == 0 {
            let m = self.metrics.summary();
            info!(
                "[{:.1}s] count={} | proposals={} confirmed={} filtered={} | flow_failures={} | {:.1} fps",
                timestamp_ms / 1000.0,
                self.controller.count(),
                m.proposals,
                m.confirmed_increments,
                m.filtered_proposals,
                m.flow_failures,
                m.fps
            );
        }
    }

    /// Accept a frame into the window without flow or classification.
    /// Used for frames that arrived while an earlier one was being processed.
    pub fn absorb_frame(&mut self, frame: Frame, timestamp_ms: f64) {
        self.tick(timestamp_ms);
        if self.controller.is_suspended() {
            self.previous_frame = None;
            self.metrics.inc(&self.metrics.frames_suspended);
            return;
        }
        if frame.is_empty() {
            return;
        }
        self.window.append(frame.clone(), timestamp_ms);
        self.previous_frame = Some(frame);
        self.metrics.inc(&self.metrics.frames_coalesced);
    }

    /// Process a backlog in capture order: every frame but the newest is
    /// absorbed, the newest gets full processing.
    pub fn process_batch(&mut self, batch: Vec<(Frame, f64)>) {
        let last = batch.len().saturating_sub(1);
        for (i, (frame, timestamp_ms)) in batch.into_iter().enumerate() {
            if i < last {
                self.absorb_frame(frame, timestamp_ms);
            } else {
                self.process_frame(frame, timestamp_ms);
            }
        }
    }

    fn propose_if_strong(&mut self, vector: &MotionVector, confidence: f32, timestamp_ms: f64) {
        let decision = evaluate_proposal(
            vector,
            confidence,
            &self.config,
            self.controller.is_suspended(),
        );
        match decision {
            ProposalDecision::Propose => {}
            ProposalDecision::LowConfidence | ProposalDecision::WrongDirection => {
                debug!(
                    "No proposal at {:.0}ms ({}): dx={:.3} |v|={:.3} conf={:.2}",
                    timestamp_ms,
                    decision.as_str(),
                    vector.dx,
                    vector.magnitude,
                    confidence
                );
                return;
            }
            ProposalDecision::BelowThreshold | ProposalDecision::Suspended => return,
        }

        match self.controller.propose(timestamp_ms) {
            ProposalOutcome::Pending => {
                self.metrics.inc(&self.metrics.proposals);
                debug!(
                    "Row proposed at {:.0}ms: dx={:.3} dy={:.3} |v|={:.3} conf={:.2}",
                    timestamp_ms, vector.dx, vector.dy, vector.magnitude, confidence
                );
            }
            ProposalOutcome::Superseded => {
                self.metrics.inc(&self.metrics.proposals);
                self.metrics.inc(&self.metrics.superseded_proposals);
            }
            ProposalOutcome::Ignored => {}
        }
    }

    fn classify_and_fuse(&mut self, timestamp_ms: f64) -> Classification {
        let features = extract_features(&self.window, &self.engine.color_roi);
        let verdict = self.classifier.classify(&ClassifierInput {
            window: &self.window,
            features: &features,
        });
        self.metrics
            .set(&self.metrics.classifier_fallbacks, self.classifier.fallbacks());

        match self.controller.resolve(&verdict, timestamp_ms) {
            Some(FusionOutcome::Confirmed(event)) => {
                self.metrics.inc(&self.metrics.confirmed_increments);
                self.events.publish(CounterEvent::RowCounted(event));
            }
            Some(FusionOutcome::Filtered {
                motion_type,
                confidence,
            }) => {
                self.metrics.inc(&self.metrics.filtered_proposals);
                warn!(
                    "Proposal at {:.0}ms filtered: classified as {} ({:.2})",
                    timestamp_ms,
                    motion_type.as_str(),
                    confidence
                );
                self.events.publish(CounterEvent::ProposalFiltered {
                    timestamp_ms,
                    motion_type,
                    confidence,
                });
            }
            Some(FusionOutcome::Awaiting) | None => {}
        }
        verdict
    }

    // ========================================================================
    // CONTROL
    // ========================================================================

    /// Advance the cool-down timer to `now_ms`. When the cool-down ends the
    /// window starts over, so no verdict mixes frames from both sides of it.
    pub fn tick(&mut self, now_ms: f64) {
        if self.controller.poll_timer(now_ms) {
            self.window.clear();
            self.previous_frame = None;
            info!("Cool-down ended at {:.0}ms, counting resumed", now_ms);
            self.events.publish(CounterEvent::CooldownEnded {
                timestamp_ms: now_ms,
            });
        }
    }

    /// Replace the session thresholds. Rejected configs leave the current
    /// one in place. A new debounce interval applies from the next row.
    pub fn update_config(&mut self, config: CounterConfig) -> Result<(), ConfigError> {
        if let Err(e) = config.validate() {
            warn!("Rejected counter config: {}", e);
            return Err(e);
        }
        self.controller.set_debounce_interval(config.debounce_interval());
        info!(
            "Counter config updated: motion>{:.3} conf>{:.2} debounce={}ms handedness={}",
            config.motion_threshold,
            config.confidence_threshold,
            config.debounce_interval_ms,
            config.handedness.as_str()
        );
        self.events.publish(CounterEvent::ConfigUpdated(config.clone()));
        self.config = config;
        Ok(())
    }

    pub fn reset_count(&mut self) {
        self.controller.reset();
        self.window.clear();
        self.previous_frame = None;
        self.last_vector = None;
        self.last_confidence = 0.0;
        info!("Count reset");
        self.events.publish(CounterEvent::CountReset);
    }

    pub fn manual_increment(&mut self) {
        let count = self.controller.manual_increment();
        self.metrics.inc(&self.metrics.manual_adjustments);
        info!("Manual increment → {}", count);
        self.events
            .publish(CounterEvent::CountAdjusted { count, delta: 1 });
    }

    pub fn manual_decrement(&mut self) {
        match self.controller.manual_decrement() {
            Some(count) => {
                self.metrics.inc(&self.metrics.manual_adjustments);
                info!("Manual decrement → {}", count);
                self.events
                    .publish(CounterEvent::CountAdjusted { count, delta: -1 });
            }
            None => debug!("Manual decrement ignored, count already 0"),
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn state(&self) -> CounterState {
        self.controller.state()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            state: self.controller.state(),
            confidence: self.last_confidence,
            last_vector: self.last_vector,
            frames_processed: self.frames_processed,
        }
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Session time (ms) at which the running cool-down ends
    pub fn timer_deadline_ms(&self) -> Option<f64> {
        self.controller.deadline_ms()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn drain_events(&mut self) -> Vec<CounterEvent> {
        self.events.drain()
    }
}
