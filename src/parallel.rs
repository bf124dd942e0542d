//! # Distributed cache build
//!
//! The [`ParallelCoordinator`] splits the rows of the distance cache into
//! contiguous ranges of roughly equal pair count, hands one range to each worker,
//! and waits at a barrier for every worker's [`CacheFragment`]. Workers run as
//! blocking tokio tasks and talk to the coordinator only through an mpsc channel
//! of [`WorkerMessage`]s.
//!
//! Once the fragments are in, the cache is assembled and the rest of the run
//! (partition, sieve resolution, finalization) happens on the coordinator alone.
//! Merging partitions computed by different workers is not supported: a run
//! requires [`CoordinatorOptions::coordinator_only_merge`] and otherwise fails with
//! [`ClusterError::DistributedMergeUnsupported`].
//!
//! Failure handling
//! -----------------
//! * a worker reporting an error fails the run with [`ClusterError::WorkerFailed`],
//! * a worker whose fragment never arrives fails it with [`ClusterError::MissingFragment`],
//! * an abort raised while workers compute is reported as [`ClusterError::Aborted`].
use std::{collections::HashMap, ops::Range, sync::Arc};

use ahash::RandomState;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    abort::AbortSignal,
    cluster_errors::ClusterError,
    constants::FrameIndex,
    distance_cache::{
        compute_rows, pair_count, required_bytes, row_offset, CacheFragment, DistanceCache,
    },
    engine::{ClusterParams, ClusteringEngine, FinalizedClustering},
    metric::DistanceMetric,
};

/// Message sent by a worker at the post-build barrier.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Fragment(CacheFragment),
    Failed { worker: usize, reason: String },
}

/// Coordinator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Number of workers, at least 1.
    pub workers: usize,
    /// Run partition and finalization on the coordinator only.
    pub coordinator_only_merge: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            workers: 4,
            coordinator_only_merge: true,
        }
    }
}

/// Contiguous row ranges, one per worker, balanced by pair count.
///
/// Row `r` of an `n`-frame cache holds `n − r − 1` pairs, so early ranges are
/// shorter. Ranges may be empty when there are more workers than rows.
pub fn partition_rows(n: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let total = pair_count(n);
    let mut ranges = Vec::with_capacity(workers);
    let mut start = 0;
    for w in 0..workers {
        let end = if w + 1 == workers {
            n
        } else {
            let target = total * (w + 1) / workers;
            let mut end = start;
            while end < n && row_offset(n, end) < target {
                end += 1;
            }
            end
        };
        ranges.push(start..end);
        start = end;
    }
    ranges
}

#[derive(Debug, Clone)]
pub struct ParallelCoordinator {
    metric: Arc<DistanceMetric>,
    params: ClusterParams,
    options: CoordinatorOptions,
    abort: AbortSignal,
}

impl ParallelCoordinator {
    /// Return
    /// ----------
    /// * The coordinator, or [`ClusterError::InvalidClusterParameter`] for zero workers.
    pub fn new(
        metric: Arc<DistanceMetric>,
        params: ClusterParams,
        options: CoordinatorOptions,
    ) -> Result<Self, ClusterError> {
        if options.workers == 0 {
            return Err(ClusterError::InvalidClusterParameter(
                "a coordinator needs at least one worker".into(),
            ));
        }
        Ok(ParallelCoordinator {
            metric,
            params,
            options,
            abort: AbortSignal::new(),
        })
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn options(&self) -> CoordinatorOptions {
        self.options
    }

    /// Active frames of the run and their row assignment.
    fn plan(&self) -> Result<(Vec<FrameIndex>, Vec<Range<usize>>), ClusterError> {
        let n_frames = self.metric.n_frames();
        self.params.sieve.validate(n_frames)?;
        let (active, _) = self.params.sieve.split(n_frames);
        if active.is_empty() {
            return Err(ClusterError::NoFrames);
        }
        let rows = partition_rows(active.len(), self.options.workers);
        Ok((active, rows))
    }

    /// Build the cache with every worker and assemble it at the barrier.
    pub async fn build_cache(&self) -> Result<DistanceCache, ClusterError> {
        let (active, rows) = self.plan()?;
        let budget = self.params.cache_budget_bytes;
        // fail before spawning anything
        let required = required_bytes(active.len());
        if required > budget {
            return Err(ClusterError::CacheTooLarge {
                n_frames: active.len(),
                required_bytes: required,
                budget_bytes: budget,
            });
        }

        info!(
            frames = active.len(),
            workers = rows.len(),
            "distributing distance cache build"
        );
        let frames: Arc<[FrameIndex]> = Arc::from(active.clone());
        let (tx, rx) = mpsc::channel(rows.len().max(1));

        for (worker, range) in rows.iter().cloned().enumerate() {
            let tx = tx.clone();
            let metric = Arc::clone(&self.metric);
            let frames = Arc::clone(&frames);
            let abort = self.abort.clone();
            tokio::task::spawn_blocking(move || {
                let message = match compute_rows(&frames, range.clone(), &metric, &abort) {
                    Ok(values) => WorkerMessage::Fragment(CacheFragment {
                        worker,
                        rows: range,
                        values,
                    }),
                    Err(e) => WorkerMessage::Failed {
                        worker,
                        reason: e.to_string(),
                    },
                };
                // the coordinator may already have given up
                let _ = tx.blocking_send(message);
            });
        }
        drop(tx);

        let expected: Vec<(usize, Range<usize>)> = rows.into_iter().enumerate().collect();
        let fragments = gather_fragments(&expected, rx, &self.abort).await?;
        DistanceCache::from_fragments(active, fragments, budget)
    }

    /// Build the cache with the workers, then cluster on the coordinator.
    pub async fn run(&self) -> Result<FinalizedClustering, ClusterError> {
        if !self.options.coordinator_only_merge {
            return Err(ClusterError::DistributedMergeUnsupported);
        }
        let cache = self.build_cache().await?;
        let mut engine = ClusteringEngine::with_metric(Arc::clone(&self.metric), self.params.clone())
            .with_abort_signal(self.abort.clone());
        let metric = Arc::clone(&self.metric);
        // partitioning is CPU bound
        tokio::task::spawn_blocking(move || {
            debug!(metric = %metric.kind(), "coordinator clustering");
            engine.run_from_cache(cache)
        })
        .await
        .map_err(|e| ClusterError::WorkerFailed {
            worker: 0,
            reason: format!("coordinator task failed: {e}"),
        })?
    }
}

/// Barrier: receive one message per expected worker until every sender is gone.
///
/// Arguments
/// -----------------
/// * `expected`: `(worker, rows)` assignment of the run.
/// * `rx`: receiving end of the workers' channel.
/// * `abort`: raised signal turns worker failures into [`ClusterError::Aborted`].
///
/// Return
/// ----------
/// * The fragments in worker order, or the first failure:
///   [`ClusterError::WorkerFailed`], [`ClusterError::FragmentMismatch`] for a fragment
///   that does not match its assignment, [`ClusterError::MissingFragment`] for a
///   worker that never delivered.
pub async fn gather_fragments(
    expected: &[(usize, Range<usize>)],
    mut rx: mpsc::Receiver<WorkerMessage>,
    abort: &AbortSignal,
) -> Result<Vec<CacheFragment>, ClusterError> {
    let mut received: HashMap<usize, CacheFragment, RandomState> = HashMap::default();

    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Fragment(fragment) => {
                let assigned = expected
                    .iter()
                    .find(|(w, _)| *w == fragment.worker)
                    .map(|(_, r)| r.clone());
                if assigned.as_ref() != Some(&fragment.rows) {
                    return Err(ClusterError::FragmentMismatch(format!(
                        "worker {} sent rows {:?}, assigned {:?}",
                        fragment.worker, fragment.rows, assigned
                    )));
                }
                debug!(worker = fragment.worker, rows = ?fragment.rows, "fragment received");
                if received.insert(fragment.worker, fragment).is_some() {
                    warn!("duplicate fragment ignored");
                }
            }
            WorkerMessage::Failed { worker, reason } => {
                if abort.is_raised() {
                    return Err(ClusterError::Aborted);
                }
                return Err(ClusterError::WorkerFailed { worker, reason });
            }
        }
    }

    let mut fragments = Vec::with_capacity(expected.len());
    for (worker, rows) in expected {
        match received.remove(worker) {
            Some(fragment) => fragments.push(fragment),
            None => {
                return Err(ClusterError::MissingFragment {
                    worker: *worker,
                    rows: rows.clone(),
                })
            }
        }
    }
    Ok(fragments)
}
