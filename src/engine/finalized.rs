//! The result of a finalized clustering run.
use std::sync::Arc;

use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    cluster::Cluster,
    constants::{ClusterId, FrameIndex},
    distance_cache::DistanceCache,
    frames::Frame,
    metric::DistanceMetric,
};

/// Pairwise distances between cluster centroids, indexed by cluster id.
///
/// Always rebuilt from scratch from the final centroids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterDistanceMatrix {
    ids: Vec<ClusterId>,
    /// Condensed upper triangle in `ids` order.
    values: Vec<f64>,
}

impl ClusterDistanceMatrix {
    pub fn compute(clusters: &[Cluster], metric: &DistanceMetric) -> Self {
        let ids: Vec<ClusterId> = clusters.iter().map(Cluster::id).collect();
        let pairs: Vec<(usize, usize)> = (0..clusters.len()).tuple_combinations().collect();
        let values = pairs
            .par_iter()
            .map(|&(a, b)| match (clusters[a].centroid(), clusters[b].centroid()) {
                (Some(ca), Some(cb)) => metric.centroid_distance(ca, cb),
                _ => f64::INFINITY,
            })
            .collect();
        ClusterDistanceMatrix { ids, values }
    }

    pub fn ids(&self) -> &[ClusterId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Distance between the centroids of clusters `a` and `b`, `None` for unknown ids.
    pub fn get(&self, a: ClusterId, b: ClusterId) -> Option<f64> {
        let p = self.ids.iter().position(|&id| id == a)?;
        let q = self.ids.iter().position(|&id| id == b)?;
        Some(self.at(p, q))
    }

    /// Distance between the clusters at positions `p` and `q` of [`ids`](Self::ids).
    /// Both positions must be below [`len`](Self::len).
    pub(crate) fn at(&self, p: usize, q: usize) -> f64 {
        if p == q {
            return 0.0;
        }
        let (p, q) = if p < q { (p, q) } else { (q, p) };
        let n = self.ids.len();
        self.values[p * n - p * (p + 1) / 2 + (q - p - 1)]
    }

    /// Mean distance from cluster at position `p` to every other cluster,
    /// `None` with fewer than two clusters or for a position past the end.
    pub fn mean_from(&self, p: usize) -> Option<f64> {
        let n = self.ids.len();
        (n > 1 && p < n).then(|| (0..n).filter(|&q| q != p).map(|q| self.at(p, q)).sum::<f64>() / (n - 1) as f64)
    }
}

/// Clusters of a finished run, the only input accepted by the statistics.
///
/// Guarantees
/// -----------------
/// * every frame of the run belongs to exactly one cluster,
/// * no cluster is empty, every cluster has a centroid and cached statistics,
/// * the cluster distance matrix matches the final centroids.
#[derive(Debug, Clone)]
pub struct FinalizedClustering {
    pub(crate) metric: Arc<DistanceMetric>,
    pub(crate) cache: DistanceCache,
    pub(crate) clusters: Vec<Cluster>,
    pub(crate) cluster_distances: ClusterDistanceMatrix,
    pub(crate) assignments: Vec<ClusterId>,
    pub(crate) sieved_frames: Vec<FrameIndex>,
}

impl FinalizedClustering {
    pub fn metric(&self) -> &DistanceMetric {
        &self.metric
    }

    pub fn cache(&self) -> &DistanceCache {
        &self.cache
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id() == id)
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Frames of the run (cached and sieved-out).
    pub fn n_frames(&self) -> usize {
        self.assignments.len()
    }

    pub fn cluster_distances(&self) -> &ClusterDistanceMatrix {
        &self.cluster_distances
    }

    /// Frames that were not in the cache and were assigned to the nearest centroid.
    pub fn sieved_frames(&self) -> &[FrameIndex] {
        &self.sieved_frames
    }

    /// Cluster of every frame, indexed by frame.
    pub fn assignments(&self) -> &[ClusterId] {
        &self.assignments
    }

    pub fn cluster_of(&self, frame: FrameIndex) -> Option<ClusterId> {
        self.assignments.get(frame).copied()
    }

    /// Representative frame of a cluster, relabelled to best match the cluster centroid.
    ///
    /// Only symmetry-corrected RMSD relabels atoms; other coordinate metrics return the
    /// frame unchanged and series metrics return `None`.
    pub fn remapped_representative(&self, id: ClusterId) -> Option<Frame> {
        let cluster = self.cluster(id)?;
        let representative = cluster.stats()?.representative;
        self.metric
            .remap_frame(representative, cluster.centroid()?)
    }
}

#[cfg(test)]
mod finalized_tests {
    use super::*;
    use crate::{
        frames::DataSeries,
        metric::{MetricConfig, MetricInput, MetricKind},
    };

    #[test]
    fn cluster_distance_matrix_lookup() {
        let metric = DistanceMetric::setup(
            &MetricConfig::new(MetricKind::Scalar),
            MetricInput::Series(vec![DataSeries::new("x", vec![0.0, 2.0, 10.0, 12.0, 30.0])]),
        )
        .unwrap();
        let mut clusters = vec![
            Cluster::new(4, [0, 1]),
            Cluster::new(1, [2, 3]),
            Cluster::new(7, [4]),
        ];
        clusters.iter_mut().for_each(|c| c.recompute_centroid(&metric));
        let m = ClusterDistanceMatrix::compute(&clusters, &metric);

        assert_eq!(m.ids(), &[4, 1, 7]);
        assert_eq!(m.get(4, 1), Some(10.0));
        assert_eq!(m.get(1, 4), Some(10.0));
        assert_eq!(m.get(7, 4), Some(29.0));
        assert_eq!(m.get(7, 7), Some(0.0));
        assert_eq!(m.get(2, 7), None);
        assert_eq!(m.mean_from(0), Some((10.0 + 29.0) / 2.0));
        assert_eq!(m.mean_from(3), None);
    }
}
