//! # Clustering engine
//!
//! [`ClusteringEngine`] drives one clustering run through a fixed sequence of
//! states:
//!
//! ```text
//! Empty ──build_distances / install_cache──▶ DistancesBuilt
//!       ──partition──▶ Partitioned
//!       ──resolve_sieve──▶ SieveResolved
//!       ──finalize──▶ Finalized
//! ```
//!
//! Any transition attempted with the [`AbortSignal`] raised, or interrupted by it,
//! moves the engine to the terminal `Aborted` state. Calling a transition from the
//! wrong state returns [`ClusterError::InvalidState`] and leaves the engine as is.
//!
//! ## Transitions
//! -----------------
//! * **build_distances** – split the frames with the configured [`Sieve`](crate::sieve::Sieve)
//!   and fill the [`DistanceCache`] over the active ones. An empty active set is
//!   [`ClusterError::NoFrames`].
//! * **partition** – run the [`MergeStrategy`] (hierarchical or k-means from the
//!   parameters, or an injected one), check that it produced a disjoint cover of the
//!   cached frames, compute every centroid.
//! * **resolve_sieve** – assign each sieved-out frame to the cluster with the nearest
//!   centroid. Centroids are taken from the partition as is during the whole pass
//!   (ties go to the lowest cluster id) and recomputed once afterwards. No cluster is
//!   created.
//! * **finalize** – drop empty clusters, optionally renumber by decreasing size
//!   (ties by increasing original id), fill per-cluster statistics and recompute the
//!   [`ClusterDistanceMatrix`]. Produces the [`FinalizedClustering`] read by the
//!   statistics and reports.
//!
//! ## Example
//!
//! ```rust,no_run
//! use trajclust::engine::{ClusterParams, ClusteringEngine};
//! use trajclust::frames::DataSeries;
//! use trajclust::metric::{MetricConfig, MetricInput, MetricKind};
//!
//! # fn demo(phi: Vec<f64>, psi: Vec<f64>) -> Result<(), trajclust::ClusterError> {
//! let params = ClusterParams::builder().target_clusters(4).build()?;
//! let input = MetricInput::Series(vec![
//!     DataSeries::dihedral("phi", phi),
//!     DataSeries::dihedral("psi", psi),
//! ]);
//! let mut engine = ClusteringEngine::new(&MetricConfig::new(MetricKind::Dihedral), input, params)?;
//! let result = engine.run()?;
//! println!("{} clusters", result.n_clusters());
//! # Ok(()) }
//! ```
use std::{fmt, sync::Arc};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    abort::AbortSignal,
    cluster::Cluster,
    cluster_errors::ClusterError,
    constants::{ClusterId, FrameIndex},
    distance_cache::DistanceCache,
    metric::{DistanceMetric, MetricConfig, MetricInput},
};

pub mod finalized;
pub mod params;
pub mod strategy;

pub use finalized::{ClusterDistanceMatrix, FinalizedClustering};
pub use params::{Algorithm, ClusterParams, ClusterParamsBuilder, KMeansSeeding, Linkage};
pub use strategy::{strategy_from_params, Hierarchical, KMeans, MergeStrategy, PartitionInput};

use strategy::nearest_cluster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Empty,
    DistancesBuilt,
    Partitioned,
    SieveResolved,
    Finalized,
    Aborted,
}

impl EngineState {
    pub fn name(self) -> &'static str {
        match self {
            EngineState::Empty => "EMPTY",
            EngineState::DistancesBuilt => "DISTANCES_BUILT",
            EngineState::Partitioned => "PARTITIONED",
            EngineState::SieveResolved => "SIEVE_RESOLVED",
            EngineState::Finalized => "FINALIZED",
            EngineState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct ClusteringEngine {
    metric: Arc<DistanceMetric>,
    params: ClusterParams,
    strategy: Box<dyn MergeStrategy>,
    abort: AbortSignal,
    state: EngineState,
    active: Vec<FrameIndex>,
    sieved_out: Vec<FrameIndex>,
    cache: Option<DistanceCache>,
    clusters: Vec<Cluster>,
}

impl fmt::Debug for ClusteringEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusteringEngine")
            .field("metric", &self.metric.kind())
            .field("strategy", &self.strategy.name())
            .field("state", &self.state)
            .field("active", &self.active.len())
            .field("sieved_out", &self.sieved_out.len())
            .field("clusters", &self.clusters.len())
            .finish()
    }
}

impl ClusteringEngine {
    /// Set up the metric and an engine in the `Empty` state.
    ///
    /// Arguments
    /// -----------------
    /// * `config`: metric variant, mask and options.
    /// * `input`: coordinates or data series matching the variant.
    /// * `params`: validated run parameters.
    ///
    /// Return
    /// ----------
    /// * The engine, or [`ClusterError::InvalidMetric`] when the metric cannot be set
    ///   up on this data (the reason carries the configuration error).
    pub fn new(
        config: &MetricConfig,
        input: MetricInput,
        params: ClusterParams,
    ) -> Result<Self, ClusterError> {
        let metric = DistanceMetric::setup(config, input).map_err(|e| {
            let reason = match e {
                ClusterError::Configuration(reason) => reason,
                other => other.to_string(),
            };
            ClusterError::InvalidMetric {
                parameter: config.kind.to_string(),
                reason,
            }
        })?;
        Ok(Self::with_metric(Arc::new(metric), params))
    }

    /// Engine over an already configured metric.
    pub fn with_metric(metric: Arc<DistanceMetric>, params: ClusterParams) -> Self {
        let strategy = strategy_from_params(&params);
        ClusteringEngine {
            metric,
            params,
            strategy,
            abort: AbortSignal::new(),
            state: EngineState::Empty,
            active: Vec::new(),
            sieved_out: Vec::new(),
            cache: None,
            clusters: Vec::new(),
        }
    }

    /// Replace the merge strategy built from the parameters.
    pub fn with_strategy(mut self, strategy: Box<dyn MergeStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Share an abort signal with other components (e.g. a coordinator).
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    pub fn metric(&self) -> &Arc<DistanceMetric> {
        &self.metric
    }

    pub fn cache(&self) -> Option<&DistanceCache> {
        self.cache.as_ref()
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn active_frames(&self) -> &[FrameIndex] {
        &self.active
    }

    pub fn sieved_frames(&self) -> &[FrameIndex] {
        &self.sieved_out
    }

    /// Check the current state and the abort signal before a transition.
    fn enter(&mut self, expected: EngineState) -> Result<(), ClusterError> {
        if self.state == EngineState::Aborted {
            return Err(ClusterError::Aborted);
        }
        if self.state != expected {
            return Err(ClusterError::InvalidState {
                expected: expected.name(),
                found: self.state.name(),
            });
        }
        if self.abort.is_raised() {
            return Err(self.fail(ClusterError::Aborted));
        }
        Ok(())
    }

    /// Move to `Aborted` when `err` is an abort, and hand the error back.
    fn fail(&mut self, err: ClusterError) -> ClusterError {
        if err == ClusterError::Aborted {
            info!(from = %self.state, "clustering aborted");
            self.state = EngineState::Aborted;
            self.cache = None;
            self.clusters.clear();
        }
        err
    }

    fn transition(&mut self, to: EngineState) {
        info!(from = %self.state, to = %to, "clustering state change");
        self.state = to;
    }

    /// Split frames with the sieve; `NoFrames` if nothing is left to cluster.
    fn split_frames(&mut self) -> Result<(), ClusterError> {
        let n_frames = self.metric.n_frames();
        self.params.sieve.validate(n_frames)?;
        let (active, sieved_out) = self.params.sieve.split(n_frames);
        if active.is_empty() {
            return Err(ClusterError::NoFrames);
        }
        self.active = active;
        self.sieved_out = sieved_out;
        Ok(())
    }

    /// `Empty → DistancesBuilt`: build the cache over the active frames.
    pub fn build_distances(&mut self) -> Result<(), ClusterError> {
        self.enter(EngineState::Empty)?;
        self.split_frames()?;
        info!(
            active = self.active.len(),
            sieved_out = self.sieved_out.len(),
            "frames split by sieve"
        );
        let cache = DistanceCache::build(
            self.active.clone(),
            &self.metric,
            self.params.cache_budget_bytes,
            &self.abort,
        )
        .map_err(|e| self.fail(e))?;
        if let Some(stats) = cache.stats() {
            debug!(%stats, "distance cache ready");
        }
        self.cache = Some(cache);
        self.transition(EngineState::DistancesBuilt);
        Ok(())
    }

    /// `Empty → DistancesBuilt` with a cache assembled elsewhere (e.g. by a coordinator).
    ///
    /// Return
    /// ----------
    /// * [`ClusterError::FragmentMismatch`] if the cache does not hold exactly the
    ///   active frames of this engine's sieve, [`ClusterError::NotComputed`] if it is incomplete.
    pub fn install_cache(&mut self, cache: DistanceCache) -> Result<(), ClusterError> {
        self.enter(EngineState::Empty)?;
        self.split_frames()?;
        if cache.frames() != self.active.as_slice() {
            return Err(ClusterError::FragmentMismatch(format!(
                "cache holds {} frames, the sieve keeps {}",
                cache.len(),
                self.active.len()
            )));
        }
        if let Some((i, j)) = cache.first_missing() {
            return Err(ClusterError::NotComputed { i, j });
        }
        self.cache = Some(cache);
        self.transition(EngineState::DistancesBuilt);
        Ok(())
    }

    /// `DistancesBuilt → Partitioned`: run the merge strategy.
    pub fn partition(&mut self) -> Result<(), ClusterError> {
        self.enter(EngineState::DistancesBuilt)?;
        let Some(cache) = self.cache.as_ref() else {
            return Err(ClusterError::InvalidState {
                expected: EngineState::DistancesBuilt.name(),
                found: self.state.name(),
            });
        };
        info!(strategy = %self.strategy.name(), frames = cache.len(), "partitioning");

        let input = PartitionInput {
            cache,
            metric: &self.metric,
            abort: &self.abort,
        };
        let result = self.strategy.partition(&input);
        let mut clusters = result.map_err(|e| self.fail(e))?;
        clusters.retain(|c| !c.is_empty());
        self.check_cover(&clusters)?;
        clusters.sort_by_key(Cluster::id);

        let metric = &self.metric;
        clusters
            .par_iter_mut()
            .for_each(|c| c.recompute_centroid(metric));
        info!(clusters = clusters.len(), "partition complete");
        self.clusters = clusters;
        self.transition(EngineState::Partitioned);
        Ok(())
    }

    /// The strategy output must cover the active frames exactly once, with unique ids.
    fn check_cover(&self, clusters: &[Cluster]) -> Result<(), ClusterError> {
        let mut seen: Vec<FrameIndex> = clusters
            .iter()
            .flat_map(|c| c.members().iter().copied())
            .collect();
        seen.sort_unstable();
        let mut ids: Vec<ClusterId> = clusters.iter().map(Cluster::id).collect();
        ids.sort_unstable();
        ids.dedup();
        if seen != self.active || ids.len() != clusters.len() {
            return Err(ClusterError::InvalidClusterParameter(format!(
                "strategy '{}' did not produce a disjoint cover of the {} cached frames",
                self.strategy.name(),
                self.active.len()
            )));
        }
        Ok(())
    }

    /// `Partitioned → SieveResolved`: assign sieved-out frames to the nearest centroid.
    pub fn resolve_sieve(&mut self) -> Result<(), ClusterError> {
        self.enter(EngineState::Partitioned)?;
        if self.sieved_out.is_empty() {
            self.transition(EngineState::SieveResolved);
            return Ok(());
        }

        let metric = &self.metric;
        let clusters = &self.clusters;
        let abort = &self.abort;
        let targets: Option<Vec<usize>> = self
            .sieved_out
            .par_iter()
            .map(|&f| (!abort.is_raised()).then(|| nearest_cluster(clusters, metric, f)))
            .collect();
        let Some(targets) = targets else {
            return Err(self.fail(ClusterError::Aborted));
        };

        let mut touched = vec![false; self.clusters.len()];
        for (&frame, &target) in self.sieved_out.iter().zip(&targets) {
            self.clusters[target].add_frame(frame);
            touched[target] = true;
        }
        let metric = &self.metric;
        self.clusters
            .par_iter_mut()
            .zip(touched.par_iter())
            .filter(|(_, touched)| **touched)
            .for_each(|(c, _)| c.recompute_centroid(metric));

        info!(
            assigned = self.sieved_out.len(),
            clusters = self.clusters.len(),
            "sieved frames assigned"
        );
        self.transition(EngineState::SieveResolved);
        Ok(())
    }

    /// `SieveResolved → Finalized`: clean up, renumber and compute the final statistics.
    ///
    /// The cache and clusters move into the returned [`FinalizedClustering`]; the
    /// engine refuses every further transition. On error the engine stays in
    /// `SieveResolved` with its cache and clusters, so the call can be retried.
    pub fn finalize(&mut self) -> Result<FinalizedClustering, ClusterError> {
        self.enter(EngineState::SieveResolved)?;
        let missing_cache = ClusterError::InvalidState {
            expected: EngineState::SieveResolved.name(),
            found: self.state.name(),
        };
        let Some(cache) = self.cache.as_ref() else {
            return Err(missing_cache);
        };
        // the engine keeps its clusters and cache until every fallible step succeeded
        let mut clusters = self.clusters.clone();

        let before = clusters.len();
        clusters.retain(|c| !c.is_empty());
        if clusters.len() < before {
            debug!(removed = before - clusters.len(), "empty clusters removed");
        }
        if self.params.renumber {
            renumber(&mut clusters);
        }

        let metric = &self.metric;
        clusters
            .par_iter_mut()
            .try_for_each(|c| c.compute_stats(cache, metric))?;
        let cluster_distances = ClusterDistanceMatrix::compute(&clusters, metric);

        let n_frames = self.active.len() + self.sieved_out.len();
        let mut assignments = vec![0; n_frames];
        for c in &clusters {
            for &f in c.members() {
                assignments[f] = c.id();
            }
        }

        let cache = self.cache.take().ok_or(missing_cache)?;
        self.clusters.clear();
        self.transition(EngineState::Finalized);
        Ok(FinalizedClustering {
            metric: Arc::clone(&self.metric),
            cache,
            clusters,
            cluster_distances,
            assignments,
            sieved_frames: self.sieved_out.clone(),
        })
    }

    /// Run every transition from `Empty` to `Finalized`.
    pub fn run(&mut self) -> Result<FinalizedClustering, ClusterError> {
        self.build_distances()?;
        self.partition()?;
        self.resolve_sieve()?;
        self.finalize()
    }

    /// Run from `DistancesBuilt` (cache already installed) to `Finalized`.
    pub fn run_from_cache(&mut self, cache: DistanceCache) -> Result<FinalizedClustering, ClusterError> {
        self.install_cache(cache)?;
        self.partition()?;
        self.resolve_sieve()?;
        self.finalize()
    }
}

/// Order clusters by decreasing size (ties by increasing id) and renumber them `0..k`.
pub fn renumber(clusters: &mut [Cluster]) {
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a.id().cmp(&b.id())));
    for (new_id, c) in clusters.iter_mut().enumerate() {
        c.set_id(new_id);
    }
}
