use crate::Millis;
use thiserror::Error;

pub const DEFAULT_STALL_CEILING_MS: u64 = 10_000;

/// One loop stage blocked past the hard ceiling. Fatal: the node restarts.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("control loop stage '{stage}' blocked for {elapsed_ms} ms (ceiling {ceiling_ms} ms)")]
pub struct ControlLoopStall {
    pub stage: &'static str,
    pub elapsed_ms: u64,
    pub ceiling_ms: u64,
}

/// Measures control-loop stages against a fixed ceiling.
#[derive(Debug, Clone)]
pub struct LoopStallWatchdog {
    ceiling_ms: u64,
    stage: Option<(&'static str, Millis)>,
    iterations: u64,
    last_iteration_ms: u64,
    iteration_started_at: Option<Millis>,
}

impl Default for LoopStallWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_CEILING_MS)
    }
}

impl LoopStallWatchdog {
    pub fn new(ceiling_ms: u64) -> Self {
        Self {
            ceiling_ms,
            stage: None,
            iterations: 0,
            last_iteration_ms: 0,
            iteration_started_at: None,
        }
    }

    pub fn ceiling_ms(&self) -> u64 {
        self.ceiling_ms
    }

    pub fn begin_iteration(&mut self, now: Millis) {
        self.iteration_started_at = Some(now);
    }

    /// Close the iteration and remember how long it took.
    pub fn end_iteration(&mut self, now: Millis) {
        if let Some(start) = self.iteration_started_at.take() {
            self.last_iteration_ms = now.saturating_sub(start);
            self.iterations += 1;
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn last_iteration_ms(&self) -> u64 {
        self.last_iteration_ms
    }

    pub fn begin_stage(&mut self, stage: &'static str, now: Millis) {
        self.stage = Some((stage, now));
    }

    pub fn end_stage(&mut self, now: Millis) -> Result<(), ControlLoopStall> {
        let Some((stage, started)) = self.stage.take() else {
            return Ok(());
        };
        let elapsed_ms = now.saturating_sub(started);
        if elapsed_ms > self.ceiling_ms {
            tracing::error!(stage, elapsed_ms, ceiling_ms = self.ceiling_ms, "control loop stalled");
            return Err(ControlLoopStall {
                stage,
                elapsed_ms,
                ceiling_ms: self.ceiling_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_within_ceiling_passes() {
        let mut wd = LoopStallWatchdog::default();
        wd.begin_stage("transport", 1_000);
        assert!(wd.end_stage(11_000).is_ok());
    }

    #[test]
    fn stage_over_ceiling_is_a_stall() {
        let mut wd = LoopStallWatchdog::default();
        wd.begin_stage("transport", 1_000);
        let stall = wd.end_stage(11_001).unwrap_err();
        assert_eq!(stall.stage, "transport");
        assert_eq!(stall.elapsed_ms, 10_001);
        assert!(stall.to_string().contains("transport"));
    }

    #[test]
    fn end_without_begin_is_noop() {
        let mut wd = LoopStallWatchdog::new(5);
        assert!(wd.end_stage(1_000_000).is_ok());
    }

    #[test]
    fn iteration_statistics() {
        let mut wd = LoopStallWatchdog::default();
        wd.begin_iteration(100);
        wd.end_iteration(142);
        wd.begin_iteration(200);
        wd.end_iteration(207);
        assert_eq!(wd.iterations(), 2);
        assert_eq!(wd.last_iteration_ms(), 7);
    }
}
