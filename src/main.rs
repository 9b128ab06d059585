// src/main.rs
//
// Replays a directory of frames through the counter at the configured rate
// and writes row events to <output_dir>/<sequence>_rows.jsonl.
//
//   stitch-counter [config.yaml]

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use stitch_counter::analysis::BlockMatchFlow;
use stitch_counter::replay::{FrameSequence, JsonlWriter};
use stitch_counter::{Config, CounterEvent, CounterService, HybridCounter};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PROGRESS_INTERVAL_FRAMES: usize = 150;
/// Time given to the worker to finish the last batch
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Events written to the JSONL log
fn is_recorded(event: &CounterEvent) -> bool {
    matches!(
        event,
        CounterEvent::RowCounted(_)
            | CounterEvent::ProposalFiltered { .. }
            | CounterEvent::CountAdjusted { .. }
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config_found = Path::new(&config_path).exists();
    let config = if config_found {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🧶 Stitch counter starting");
    if config_found {
        info!("✓ Configuration loaded from {}", config_path);
    } else {
        warn!("{} not found, using defaults", config_path);
    }

    let mut sequence = FrameSequence::open(&config.replay)?;
    if sequence.is_empty() {
        warn!("No frames in {}", config.replay.input_dir);
        return Ok(());
    }

    let counter = HybridCounter::new(
        config.counter.clone(),
        config.engine.clone(),
        Box::new(BlockMatchFlow::new()),
    )?;
    let (handle, worker) = CounterService::spawn(counter, config.engine.inbox_capacity);

    let mut writer = JsonlWriter::create(&config.replay.output_dir, sequence.name())?;
    let mut events = handle.subscribe();
    let recorder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if is_recorded(&event) => {
                    if let CounterEvent::RowCounted(row) = &event {
                        info!("✅ Row {} at {:.1}s", row.count, row.timestamp_ms / 1000.0);
                    }
                    if let Err(e) = writer.write(&event) {
                        error!("Failed to record event: {:#}", e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Event recorder lagged, {} events lost", n),
                Err(RecvError::Closed) => break,
            }
        }
        writer.finish()
    });

    let fps = if config.replay.fps > 0.0 {
        config.replay.fps
    } else {
        30.0
    };
    info!(
        "Replaying {} frames from {} at {:.1} fps",
        sequence.len(),
        config.replay.input_dir,
        fps
    );

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
    while let Some(frame) = sequence.next_frame()? {
        ticker.tick().await;
        handle.submit_frame(frame);

        if sequence.position() % PROGRESS_INTERVAL_FRAMES == 0 {
            let snapshot = handle.snapshot();
            info!(
                "Progress: {}/{} frames | rows={} | suspended={}",
                sequence.position(),
                sequence.len(),
                snapshot.state.current_count,
                snapshot.state.is_suspended
            );
        }
    }

    tokio::time::sleep(DRAIN_GRACE).await;
    let snapshot = handle.snapshot();
    let metrics = handle.metrics().summary();
    handle.shutdown();
    worker.await?;
    drop(handle);

    let (output_path, lines) = recorder.await??;

    info!("\n========================================");
    info!("✓ Replay finished: {} rows counted", snapshot.state.current_count);
    info!(
        "  Frames: {} processed, {} coalesced, {} during cool-down",
        metrics.frames_processed, metrics.frames_coalesced, metrics.frames_suspended
    );
    info!(
        "  Proposals: {} ({} superseded) | confirmed: {} | filtered: {}",
        metrics.proposals,
        metrics.superseded_proposals,
        metrics.confirmed_increments,
        metrics.filtered_proposals
    );
    if metrics.flow_failures > 0 || metrics.inbox_overflows > 0 {
        warn!(
            "  Flow failures: {} | inbox overflows: {}",
            metrics.flow_failures, metrics.inbox_overflows
        );
    }
    info!("  {} events written to {}", lines, output_path.display());
    info!("========================================");

    Ok(())
}
