use std::ops::Range;

use thiserror::Error;

use crate::constants::FrameIndex;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid clustering parameter: {0}")]
    InvalidClusterParameter(String),

    #[error("No frames to cluster: the active frame set is empty")]
    NoFrames,

    #[error("Invalid distance metric ({parameter}): {reason}")]
    InvalidMetric { parameter: String, reason: String },

    #[error("Distance between frames {i} and {j} has not been computed")]
    NotComputed { i: FrameIndex, j: FrameIndex },

    #[error("Frame {0} is not part of the distance cache")]
    FrameNotInCache(FrameIndex),

    #[error(
        "Distance cache for {n_frames} frames needs {required_bytes} bytes (budget {budget_bytes}); use a sieve"
    )]
    CacheTooLarge {
        n_frames: usize,
        required_bytes: usize,
        budget_bytes: usize,
    },

    #[error("Clustering engine is in state {found}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Clustering run was aborted")]
    Aborted,

    #[error("Missing distance fragment from worker {worker} (rows {rows:?})")]
    MissingFragment { worker: usize, rows: Range<usize> },

    #[error("Inconsistent distance fragment: {0}")]
    FragmentMismatch(String),

    #[error("Worker {worker} failed: {reason}")]
    WorkerFailed { worker: usize, reason: String },

    #[error(
        "Distributed cluster merging is not supported; enable coordinator-only merging to cluster on the coordinator"
    )]
    DistributedMergeUnsupported,
}
