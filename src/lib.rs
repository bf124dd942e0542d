//! # trajclust
//!
//! Conformational clustering of molecular dynamics trajectories.
//!
//! A run goes through four stages:
//!
//! 1. a [`DistanceMetric`](metric::DistanceMetric) is set up from the frames
//!    (RMSD with or without fitting, symmetry-corrected RMSD, DME, dihedral or
//!    scalar data series),
//! 2. the pairwise [`DistanceCache`](distance_cache::DistanceCache) of the active
//!    frames is built, optionally after sieving every `n`-th frame,
//! 3. a [`MergeStrategy`](engine::MergeStrategy) (hierarchical agglomeration or
//!    k-means) partitions the cached frames, sieved-out frames join the nearest
//!    centroid,
//! 4. the [`FinalizedClustering`](engine::FinalizedClustering) is scored by the
//!    [`statistics`] and rendered by the [`report`] module.
//!
//! [`ClusteringEngine`] drives the stages on one machine; [`ParallelCoordinator`]
//! spreads the cache build over several workers.
//!
//! Enable the `progress` feature for an `indicatif` progress bar on cache builds.
pub mod abort;
pub mod assignment;
pub mod cluster;
pub mod cluster_errors;
pub mod constants;
pub mod distance_cache;
pub mod engine;
pub mod frames;
pub mod metric;
pub mod parallel;
#[cfg(feature = "progress")]
pub mod progress_bar;
pub mod report;
pub mod sieve;
pub mod statistics;
pub mod superposition;

pub use abort::AbortSignal;
pub use cluster::{Cluster, ClusterStats};
pub use cluster_errors::ClusterError;
pub use distance_cache::DistanceCache;
pub use engine::{ClusterParams, ClusteringEngine, EngineState, FinalizedClustering};
pub use metric::{DistanceMetric, MetricConfig, MetricInput, MetricKind};
pub use parallel::{CoordinatorOptions, ParallelCoordinator};
