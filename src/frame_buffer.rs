// src/frame_buffer.rs
//
// Sliding window of the most recent frames, the input of the feature
// extractors. Fixed capacity; appending past capacity silently evicts
// the oldest frame. Only `clear()` shrinks it below the fill threshold.
//
// Every frame carries its session timestamp so extractors can turn
// per-pair displacement into velocity without assuming a frame rate.

use crate::types::Frame;
use std::collections::VecDeque;
use tracing::debug;

/// A frame plus the session time (ms) it was captured at.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub frame: Frame,
    pub timestamp_ms: f64,
}

pub struct FrameWindow {
    frames: VecDeque<BufferedFrame>,
    capacity: usize,
}

impl FrameWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest one when the window is full.
    pub fn append(&mut self, frame: Frame, timestamp_ms: f64) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(BufferedFrame {
            frame,
            timestamp_ms,
        });
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// Frames in capture order, most recent last.
    pub fn contents(&self) -> impl DoubleEndedIterator<Item = &Frame> + ExactSizeIterator {
        self.frames.iter().map(|b| &b.frame)
    }

    /// Frames with timestamps, most recent last.
    pub fn entries(&self) -> &VecDeque<BufferedFrame> {
        &self.frames
    }

    pub fn latest(&self) -> Option<&BufferedFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        if !self.frames.is_empty() {
            debug!("FrameWindow cleared ({} frames dropped)", self.frames.len());
        }
        self.frames.clear();
    }
}
