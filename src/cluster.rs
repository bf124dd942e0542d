//! Clusters: member sets, centroids and cached intra-cluster statistics.
use std::fmt;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::{
    cluster_errors::ClusterError,
    constants::{ClusterId, FrameIndex},
    distance_cache::DistanceCache,
    metric::{Centroid, DistanceMetric},
};

/// A group of mutually similar frames.
///
/// Members are kept ascending and unique. The centroid is owned by the cluster and
/// recomputed through [`recompute_centroid`](Cluster::recompute_centroid) after
/// every membership change; [`stats`](Cluster::stats) is filled at finalization.
#[derive(Debug, Clone)]
pub struct Cluster {
    id: ClusterId,
    members: Vec<FrameIndex>,
    centroid: Option<Centroid>,
    stats: Option<ClusterStats>,
}

/// Cached intra-cluster statistics.
///
/// Pairwise quantities only use members present in the distance cache.
///
/// Fields
/// -----------------
/// * `representative` – cached member with the smallest summed distance to the
///   other cached members (lowest frame on ties).
/// * `best_distance` / `worst_distance` – smallest / largest internal pair distance.
/// * `mean_distance`, `sd_distance` – mean and standard deviation of internal pair distances.
/// * `mean_to_centroid` – mean distance of every member to the centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterStats {
    pub representative: FrameIndex,
    pub best_distance: f64,
    pub worst_distance: f64,
    pub mean_distance: f64,
    pub sd_distance: f64,
    pub mean_to_centroid: f64,
}

impl Cluster {
    pub fn new(id: ClusterId, members: impl IntoIterator<Item = FrameIndex>) -> Self {
        let mut members: Vec<FrameIndex> = members.into_iter().collect();
        members.sort_unstable();
        members.dedup();
        Cluster {
            id,
            members,
            centroid: None,
            stats: None,
        }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ClusterId) {
        self.id = id;
    }

    pub fn members(&self) -> &[FrameIndex] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, frame: FrameIndex) -> bool {
        self.members.binary_search(&frame).is_ok()
    }

    pub fn centroid(&self) -> Option<&Centroid> {
        self.centroid.as_ref()
    }

    pub fn stats(&self) -> Option<&ClusterStats> {
        self.stats.as_ref()
    }

    /// Insert a frame; returns `false` if it was already a member.
    pub fn add_frame(&mut self, frame: FrameIndex) -> bool {
        match self.members.binary_search(&frame) {
            Ok(_) => false,
            Err(pos) => {
                self.members.insert(pos, frame);
                self.stats = None;
                true
            }
        }
    }

    /// Recompute the centroid from the current members (cleared when empty).
    pub fn recompute_centroid(&mut self, metric: &DistanceMetric) {
        self.centroid = metric.compute_centroid(&self.members);
    }

    /// Distance of a frame to this cluster's centroid, infinite without a centroid.
    pub fn distance_to(&self, metric: &DistanceMetric, frame: FrameIndex) -> f64 {
        self.centroid
            .as_ref()
            .map_or(f64::INFINITY, |c| metric.distance_to_centroid(frame, c))
    }

    /// Fill the cached statistics from the distance cache and the metric.
    ///
    /// Return
    /// ----------
    /// * [`ClusterError::NotComputed`] if a pair of cached members is missing from the cache.
    pub fn compute_stats(
        &mut self,
        cache: &DistanceCache,
        metric: &DistanceMetric,
    ) -> Result<(), ClusterError> {
        let cached: Vec<FrameIndex> = self
            .members
            .iter()
            .copied()
            .filter(|&f| cache.contains(f))
            .collect();

        let mut sums = vec![0.0; cached.len()];
        let mut pair_distances = Vec::with_capacity(cached.len() * cached.len().saturating_sub(1) / 2);
        for (a, b) in (0..cached.len()).tuple_combinations() {
            let d = cache.get(cached[a], cached[b])?;
            sums[a] += d;
            sums[b] += d;
            pair_distances.push(d);
        }

        let representative = cached
            .iter()
            .zip(&sums)
            .min_by_key(|&(&f, &s)| (OrderedFloat(s), f))
            .map(|(&f, _)| f)
            .or_else(|| self.members.first().copied());
        let Some(representative) = representative else {
            self.stats = None;
            return Ok(());
        };

        let (best, worst, mean, sd) = if pair_distances.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let n = pair_distances.len() as f64;
            let mean = pair_distances.iter().sum::<f64>() / n;
            let var = pair_distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
            let best = pair_distances.iter().copied().fold(f64::INFINITY, f64::min);
            let worst = pair_distances.iter().copied().fold(0.0, f64::max);
            (best, worst, mean, var.sqrt())
        };

        let mean_to_centroid = match &self.centroid {
            Some(c) => {
                self.members
                    .iter()
                    .map(|&f| metric.distance_to_centroid(f, c))
                    .sum::<f64>()
                    / self.members.len() as f64
            }
            None => 0.0,
        };

        self.stats = Some(ClusterStats {
            representative,
            best_distance: best,
            worst_distance: worst,
            mean_distance: mean,
            sd_distance: sd,
            mean_to_centroid,
        });
        Ok(())
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster {} ({} frames)", self.id, self.members.len())?;
        if let Some(stats) = &self.stats {
            write!(
                f,
                ", representative {}, mean internal {:.4}",
                stats.representative, stats.mean_distance
            )?;
        }
        Ok(())
    }
}
