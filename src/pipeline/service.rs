// src/pipeline/service.rs
//
// Async shell around a HybridCounter.
//
// One worker task owns the counter and serializes everything that touches
// it: frame batches, control commands and cool-down expiry. Vision work runs
// on the blocking pool so the async side stays responsive.
//
//   capture ──submit_frame──▶ FrameInbox (bounded, drop-oldest) ─┐
//   UI ──commands──▶ mpsc ───────────────────────────────────────┼─▶ worker ─▶ broadcast<CounterEvent>
//   cool-down deadline ──────────────────────────────────────────┘         └─▶ watch<CounterSnapshot>
//
// While a frame is in flight, newer frames accumulate in the inbox; the
// next batch absorbs all but the newest, so at most one frame per batch
// goes through flow and classification.

use crate::counting::HybridCounter;
use crate::error::ConfigError;
use crate::pipeline::event_bus::CounterEvent;
use crate::pipeline::metrics::PipelineMetrics;
use crate::types::{CounterConfig, CounterSnapshot, Frame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum Command {
    UpdateConfig(CounterConfig),
    Reset,
    ManualIncrement,
    ManualDecrement,
    Shutdown,
}

// ============================================================================
// FRAME INBOX
// ============================================================================

struct FrameInbox {
    queue: Mutex<VecDeque<(Frame, f64)>>,
    capacity: usize,
    notify: Notify,
}

impl FrameInbox {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(Frame, f64)>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame. Returns false when the oldest queued frame was evicted.
    fn push(&self, frame: Frame, timestamp_ms: f64) -> bool {
        let evicted = {
            let mut queue = self.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back((frame, timestamp_ms));
            evicted
        };
        self.notify.notify_one();
        !evicted
    }

    fn take(&self) -> Vec<(Frame, f64)> {
        self.lock().drain(..).collect()
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Cloneable control surface of a running counter.
#[derive(Clone)]
pub struct CounterHandle {
    inbox: Arc<FrameInbox>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<CounterEvent>,
    snapshot: watch::Receiver<CounterSnapshot>,
    metrics: PipelineMetrics,
    started_at: Instant,
}

impl CounterHandle {
    /// Session time in ms.
    pub fn elapsed_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }

    /// Submit a frame stamped with the current session time.
    /// Returns false when the inbox was full and an older frame was dropped.
    pub fn submit_frame(&self, frame: Frame) -> bool {
        self.submit_frame_at(frame, self.elapsed_ms())
    }

    /// Submit a frame with an explicit session timestamp.
    pub fn submit_frame_at(&self, frame: Frame, timestamp_ms: f64) -> bool {
        let accepted = self.inbox.push(frame, timestamp_ms);
        if !accepted {
            self.metrics.inc(&self.metrics.inbox_overflows);
            warn!("Frame inbox full, dropped oldest frame");
        }
        accepted
    }

    /// Validated here so callers get the rejection synchronously.
    pub fn update_config(&self, config: CounterConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.send(Command::UpdateConfig(config));
        Ok(())
    }

    pub fn reset_count(&self) {
        self.send(Command::Reset);
    }

    pub fn manual_increment(&self) {
        self.send(Command::ManualIncrement);
    }

    pub fn manual_decrement(&self) {
        self.send(Command::ManualDecrement);
    }

    /// Ask the worker to stop after the current step.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CounterEvent> {
        self.events.subscribe()
    }

    /// Latest published state.
    pub fn snapshot(&self) -> CounterSnapshot {
        *self.snapshot.borrow()
    }

    /// Receiver that can await state changes.
    pub fn watch_snapshot(&self) -> watch::Receiver<CounterSnapshot> {
        self.snapshot.clone()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Counter worker stopped, command dropped");
        }
    }
}

// ============================================================================
// WORKER
// ============================================================================

pub struct CounterService;

impl CounterService {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(counter: HybridCounter, inbox_capacity: usize) -> (CounterHandle, JoinHandle<()>) {
        let inbox = Arc::new(FrameInbox::new(inbox_capacity));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(counter.snapshot());
        let started_at = Instant::now();

        let handle = CounterHandle {
            inbox: inbox.clone(),
            commands: command_tx,
            events: event_tx.clone(),
            snapshot: snapshot_rx,
            metrics: counter.metrics().clone(),
            started_at,
        };

        let worker = tokio::spawn(run_worker(
            counter,
            command_rx,
            inbox,
            event_tx,
            snapshot_tx,
            started_at,
        ));

        (handle, worker)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn apply_command(counter: &mut HybridCounter, command: Command) {
    match command {
        Command::UpdateConfig(config) => {
            // Already validated by the handle
            let _ = counter.update_config(config);
        }
        Command::Reset => counter.reset_count(),
        Command::ManualIncrement => counter.manual_increment(),
        Command::ManualDecrement => counter.manual_decrement(),
        Command::Shutdown => {}
    }
}

fn publish(
    counter: &mut HybridCounter,
    events: &broadcast::Sender<CounterEvent>,
    snapshot: &watch::Sender<CounterSnapshot>,
) {
    for event in counter.drain_events() {
        // Err only means nobody is subscribed
        events.send(event).ok();
    }
    snapshot.send_replace(counter.snapshot());
}

async fn run_worker(
    mut counter: HybridCounter,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbox: Arc<FrameInbox>,
    events: broadcast::Sender<CounterEvent>,
    snapshot: watch::Sender<CounterSnapshot>,
    started_at: Instant,
) {
    info!("Counter worker started");

    loop {
        let deadline_ms = counter.timer_deadline_ms();
        let deadline = deadline_ms
            .map(|ms| started_at + Duration::from_secs_f64(ms.max(0.0) / 1000.0));

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => apply_command(&mut counter, command),
            },

            _ = wait_until(deadline) => {
                let now_ms = started_at.elapsed().as_secs_f64() * 1000.0;
                counter.tick(now_ms.max(deadline_ms.unwrap_or(now_ms)));
            }

            _ = inbox.notify.notified() => {
                let batch = inbox.take();
                if batch.is_empty() {
                    continue;
                }
                let result = tokio::task::spawn_blocking(move || {
                    counter.process_batch(batch);
                    counter
                })
                .await;
                counter = match result {
                    Ok(counter) => counter,
                    Err(e) => {
                        error!("Vision task failed, counter lost: {}", e);
                        return;
                    }
                };
            }
        }

        publish(&mut counter, &events, &snapshot);
    }

    publish(&mut counter, &events, &snapshot);
    info!(
        "Counter worker stopped: {} rows",
        counter.state().current_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::{ClassifierInput, MotionClassifier};
    use crate::analysis::flow::{DenseFlowField, FlowOptions, OpticalFlow};
    use crate::types::{Classification, EngineConfig, MotionType};
    use image::RgbImage;
    use tokio::time::timeout;

    struct ConstantFlow(f32);

    impl OpticalFlow for ConstantFlow {
        fn compute_flow(
            &mut self,
            _: &Frame,
            current: &Frame,
            _: &FlowOptions,
        ) -> anyhow::Result<DenseFlowField> {
            Ok(DenseFlowField::uniform(current.width(), current.height(), self.0, 0.0))
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    struct AlwaysComplete;

    impl MotionClassifier for AlwaysComplete {
        fn classify(&mut self, _: &ClassifierInput<'_>) -> Classification {
            Classification::new(MotionType::RowComplete, 0.9)
        }

        fn name(&self) -> &str {
            "always-complete"
        }
    }

    fn counter(debounce_ms: u64) -> HybridCounter {
        let config = CounterConfig {
            debounce_interval_ms: debounce_ms,
            ..CounterConfig::default()
        };
        let engine = EngineConfig {
            window_capacity: 2,
            ..EngineConfig::default()
        };
        HybridCounter::new(config, engine, Box::new(ConstantFlow(0.45)))
            .unwrap()
            .with_classifier(Box::new(AlwaysComplete))
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(16, 16))
    }

    async fn next_matching<F>(rx: &mut broadcast::Receiver<CounterEvent>, pred: F) -> CounterEvent
    where
        F: Fn(&CounterEvent) -> bool,
    {
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_inbox_drops_oldest() {
        let inbox = FrameInbox::new(2);
        assert!(inbox.push(frame(), 1.0));
        assert!(inbox.push(frame(), 2.0));
        assert!(!inbox.push(frame(), 3.0));
        let stamps: Vec<f64> = inbox.take().into_iter().map(|(_, t)| t).collect();
        assert_eq!(stamps, vec![2.0, 3.0]);
        assert!(inbox.take().is_empty());
    }

    #[tokio::test]
    async fn test_manual_commands_update_snapshot() {
        let (handle, worker) = CounterService::spawn(counter(5000), 4);
        let mut events = handle.subscribe();

        handle.manual_increment();
        handle.manual_increment();
        handle.manual_decrement();
        next_matching(&mut events, |e| {
            matches!(e, CounterEvent::CountAdjusted { delta: -1, .. })
        })
        .await;
        assert_eq!(handle.snapshot().state.current_count, 1);

        handle.reset_count();
        next_matching(&mut events, |e| matches!(e, CounterEvent::CountReset)).await;
        assert_eq!(handle.snapshot().state.current_count, 0);

        handle.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_synchronously() {
        let (handle, worker) = CounterService::spawn(counter(5000), 4);
        let bad = CounterConfig {
            calibration_constant: -1.0,
            ..CounterConfig::default()
        };
        assert_eq!(
            handle.update_config(bad),
            Err(ConfigError::CalibrationConstant(-1.0))
        );
        handle.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_count_row_and_cooldown_expires() {
        let (handle, worker) = CounterService::spawn(counter(400), 4);
        let mut events = handle.subscribe();
        let mut snapshots = handle.watch_snapshot();

        handle.submit_frame(frame());
        handle.submit_frame(frame());

        let row = next_matching(&mut events, |e| matches!(e, CounterEvent::RowCounted(_))).await;
        match row {
            CounterEvent::RowCounted(ev) => assert_eq!(ev.count, 1),
            _ => unreachable!(),
        }
        assert!(handle.snapshot().state.is_suspended);

        next_matching(&mut events, |e| matches!(e, CounterEvent::CooldownEnded { .. })).await;
        assert!(!handle.snapshot().state.is_suspended);
        assert_eq!(handle.snapshot().state.current_count, 1);

        // Watchers see the same published state
        timeout(Duration::from_secs(5), async {
            while snapshots.borrow_and_update().state.is_suspended {
                snapshots.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshots.borrow().state.current_count, 1);

        handle.shutdown();
        worker.await.unwrap();
    }
}
