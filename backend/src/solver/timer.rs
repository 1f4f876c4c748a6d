//! Checkpoint timer for solve diagnostics.

use std::time::Instant;

use crate::api::{DebugCheckpoint, DebugTiming};

/// Tracks the duration of each solve step. Every checkpoint records the time
/// since the previous one; the sum plus any trailing time is the total.
pub struct SolveTimer {
    start: Instant,
    last_checkpoint: Instant,
    checkpoints: Vec<(String, f64)>,
}

impl SolveTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        SolveTimer {
            start: now,
            last_checkpoint: now,
            checkpoints: Vec::new(),
        }
    }

    /// Record a checkpoint and return its duration in milliseconds.
    pub fn checkpoint(&mut self, name: &str) -> f64 {
        let now = Instant::now();
        let duration_ms = now.duration_since(self.last_checkpoint).as_secs_f64() * 1000.0;
        self.checkpoints.push((name.to_string(), duration_ms));
        self.last_checkpoint = now;
        duration_ms
    }

    pub fn total_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn timing(&self) -> DebugTiming {
        DebugTiming {
            total_ms: self.total_ms(),
            checkpoints: self
                .checkpoints
                .iter()
                .map(|(name, duration_ms)| DebugCheckpoint {
                    name: name.clone(),
                    duration_ms: (duration_ms * 100.0).round() / 100.0,
                })
                .collect(),
        }
    }
}

impl Default for SolveTimer {
    fn default() -> Self {
        Self::new()
    }
}
