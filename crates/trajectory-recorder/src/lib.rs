//! Trajectory Recorder
//!
//! Captures one continuous decision session per agent and persists it as a
//! single durable write when the session ends. Steps accumulate in memory
//! until then; the process-crash loss window that buys the bounded write
//! amplification is deliberate and covered by tests.

mod recorder;

pub use recorder::{RecorderConfig, TrajectoryRecorder};
