//! # Merge strategies
//!
//! A [`MergeStrategy`] turns a complete [`DistanceCache`] into a disjoint cover
//! of its active frames. The engine does not care how: it verifies the cover,
//! recomputes centroids and carries on. Two strategies ship with the crate.
//!
//! ## Hierarchical agglomerative ([`Hierarchical`])
//! -----------------
//! Every cached frame starts as its own cluster, identified by its position in
//! the cache. The closest pair is merged repeatedly, the surviving cluster
//! keeping the lower id, and distances to the merged cluster follow the
//! Lance–Williams update of the chosen [`Linkage`]:
//!
//! ```text
//! single   : d(k, i∪j) = min(d(k,i), d(k,j))
//! complete : d(k, i∪j) = max(d(k,i), d(k,j))
//! average  : d(k, i∪j) = (|i|·d(k,i) + |j|·d(k,j)) / (|i| + |j|)
//! ```
//!
//! Merging stops once `target_clusters` remain or the closest pair is farther
//! than `epsilon`, whichever comes first. Equal distances resolve to the pair
//! with the lowest `(lower id, higher id)`.
//!
//! ## K-means ([`KMeans`])
//! -----------------
//! `k` seeds are picked among cached frames, then frames are repeatedly assigned
//! to their nearest centroid (lowest id on ties) and centroids recomputed, until
//! the assignment no longer changes or `max_iterations` is reached.
use std::fmt;

use ordered_float::OrderedFloat;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    abort::AbortSignal,
    cluster::Cluster,
    cluster_errors::ClusterError,
    constants::ClusterId,
    distance_cache::{row_offset, DistanceCache},
    metric::DistanceMetric,
};

use super::params::{Algorithm, ClusterParams, KMeansSeeding, Linkage};

/// Inputs shared with a strategy during the partition step.
pub struct PartitionInput<'a> {
    pub cache: &'a DistanceCache,
    pub metric: &'a DistanceMetric,
    pub abort: &'a AbortSignal,
}

/// Produces a disjoint cover of the cached frames.
///
/// Implementations must return clusters whose members are exactly the frames of
/// `input.cache`, each frame in one cluster, with unique ids. They should poll
/// `input.abort` between steps and return [`ClusterError::Aborted`] when raised.
pub trait MergeStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> String;

    fn partition(&self, input: &PartitionInput<'_>) -> Result<Vec<Cluster>, ClusterError>;
}

/// Strategy described by the parameters.
pub fn strategy_from_params(params: &ClusterParams) -> Box<dyn MergeStrategy> {
    match params.algorithm {
        Algorithm::Hierarchical(linkage) => Box::new(Hierarchical {
            linkage,
            target_clusters: params.target_clusters,
            epsilon: params.epsilon,
        }),
        Algorithm::KMeans(seeding) => Box::new(KMeans {
            k: params.target_clusters.unwrap_or(1),
            seeding,
            max_iterations: params.max_iterations,
        }),
    }
}

fn require_complete(cache: &DistanceCache) -> Result<(), ClusterError> {
    match cache.first_missing() {
        Some((i, j)) => Err(ClusterError::NotComputed { i, j }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchical {
    pub linkage: Linkage,
    pub target_clusters: Option<usize>,
    pub epsilon: Option<f64>,
}

/// Working state of the agglomeration: a condensed copy of the cache updated in place.
struct Agglomeration {
    n: usize,
    dist: Vec<f32>,
    active: Vec<bool>,
    size: Vec<usize>,
    nearest: Vec<(f64, usize)>,
}

impl Agglomeration {
    #[inline]
    fn idx(&self, a: usize, b: usize) -> usize {
        let (p, q) = if a < b { (a, b) } else { (b, a) };
        row_offset(self.n, p) + (q - p - 1)
    }

    #[inline]
    fn d(&self, a: usize, b: usize) -> f64 {
        self.dist[self.idx(a, b)] as f64
    }

    /// Nearest active neighbour of `a`, lowest id on ties.
    fn scan_nearest(&self, a: usize) -> (f64, usize) {
        let mut best = (f64::INFINITY, usize::MAX);
        for b in (0..self.n).filter(|&b| b != a && self.active[b]) {
            let d = self.d(a, b);
            if d < best.0 || best.1 == usize::MAX {
                best = (d, b);
            }
        }
        best
    }

    /// Closest active pair, `(distance, low id, high id)`.
    fn closest_pair(&self) -> Option<(f64, usize, usize)> {
        (0..self.n)
            .filter(|&a| self.active[a] && self.nearest[a].1 != usize::MAX)
            .map(|a| {
                let (d, b) = self.nearest[a];
                (d, a.min(b), a.max(b))
            })
            .min_by_key(|&(d, lo, hi)| (OrderedFloat(d), lo, hi))
    }

    fn merge(&mut self, i: usize, j: usize, linkage: Linkage) {
        let (ni, nj) = (self.size[i] as f64, self.size[j] as f64);
        for k in 0..self.n {
            if k == i || k == j || !self.active[k] {
                continue;
            }
            let (dki, dkj) = (self.d(k, i), self.d(k, j));
            let updated = match linkage {
                Linkage::Single => dki.min(dkj),
                Linkage::Complete => dki.max(dkj),
                Linkage::Average => (ni * dki + nj * dkj) / (ni + nj),
            };
            let idx = self.idx(k, i);
            self.dist[idx] = updated as f32;
        }
        self.active[j] = false;
        self.size[i] += self.size[j];
        self.size[j] = 0;

        self.nearest[i] = self.scan_nearest(i);
        for k in 0..self.n {
            if k == i || !self.active[k] {
                continue;
            }
            let (best_d, best) = self.nearest[k];
            if best == i || best == j {
                self.nearest[k] = self.scan_nearest(k);
            } else {
                let d = self.d(k, i);
                if d < best_d || (d == best_d && i < best) {
                    self.nearest[k] = (d, i);
                }
            }
        }
    }
}

impl MergeStrategy for Hierarchical {
    fn name(&self) -> String {
        format!("hierarchical ({} linkage)", self.linkage)
    }

    fn partition(&self, input: &PartitionInput<'_>) -> Result<Vec<Cluster>, ClusterError> {
        let cache = input.cache;
        require_complete(cache)?;
        let n = cache.len();

        let mut state = Agglomeration {
            n,
            dist: cache.values().to_vec(),
            active: vec![true; n],
            size: vec![1; n],
            nearest: Vec::new(),
        };
        let nearest = (0..n).map(|a| state.scan_nearest(a)).collect();
        state.nearest = nearest;
        let mut members: Vec<Vec<usize>> = (0..n).map(|p| vec![p]).collect();
        let mut remaining = n;

        while remaining > 1 {
            if input.abort.is_raised() {
                return Err(ClusterError::Aborted);
            }
            if self.target_clusters.is_some_and(|k| remaining <= k) {
                break;
            }
            let Some((d, i, j)) = state.closest_pair() else {
                break;
            };
            if self.epsilon.is_some_and(|eps| d > eps) {
                debug!(distance = d, remaining, "closest pair beyond epsilon");
                break;
            }

            state.merge(i, j, self.linkage);
            let absorbed = std::mem::take(&mut members[j]);
            members[i].extend(absorbed);
            remaining -= 1;
            debug!(kept = i, absorbed = j, distance = d, remaining, "merged clusters");
        }

        let frames = cache.frames();
        Ok(members
            .into_iter()
            .enumerate()
            .filter(|(_, m)| !m.is_empty())
            .map(|(id, m)| Cluster::new(id, m.into_iter().map(|p| frames[p])))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    pub k: usize,
    pub seeding: KMeansSeeding,
    pub max_iterations: usize,
}

impl KMeans {
    /// Seed positions in the cache, ascending.
    fn seeds(&self, cache: &DistanceCache, k: usize) -> Vec<usize> {
        let n = cache.len();
        let mut seeds = match self.seeding {
            KMeansSeeding::Random(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                rand::seq::index::sample(&mut rng, n, k).into_vec()
            }
            KMeansSeeding::FarthestPoint => {
                let mut seeds = vec![0usize];
                let mut min_d: Vec<f64> = (0..n).map(|q| cache.at(0, q).unwrap_or(0.0)).collect();
                while seeds.len() < k {
                    let next = (0..n)
                        .filter(|q| !seeds.contains(q))
                        .max_by_key(|&q| (OrderedFloat(min_d[q]), std::cmp::Reverse(q)));
                    let Some(next) = next else { break };
                    seeds.push(next);
                    for (q, m) in min_d.iter_mut().enumerate() {
                        *m = m.min(cache.at(next, q).unwrap_or(0.0));
                    }
                }
                seeds
            }
        };
        seeds.sort_unstable();
        seeds
    }
}

impl MergeStrategy for KMeans {
    fn name(&self) -> String {
        match self.seeding {
            KMeansSeeding::FarthestPoint => format!("k-means (k={}, farthest-point)", self.k),
            KMeansSeeding::Random(seed) => format!("k-means (k={}, seed={seed})", self.k),
        }
    }

    fn partition(&self, input: &PartitionInput<'_>) -> Result<Vec<Cluster>, ClusterError> {
        let cache = input.cache;
        require_complete(cache)?;
        let frames = cache.frames();
        let n = frames.len();
        let k = if self.k > n {
            warn!(k = self.k, frames = n, "fewer cached frames than clusters, using one cluster per frame");
            n
        } else {
            self.k
        };

        let mut clusters: Vec<Cluster> = self
            .seeds(cache, k)
            .into_iter()
            .enumerate()
            .map(|(id, p)| {
                let mut c = Cluster::new(id, [frames[p]]);
                c.recompute_centroid(input.metric);
                c
            })
            .collect();

        let mut assignment: Vec<ClusterId> = Vec::new();
        for iteration in 0..self.max_iterations {
            if input.abort.is_raised() {
                return Err(ClusterError::Aborted);
            }
            let next: Vec<ClusterId> = frames
                .par_iter()
                .map(|&f| nearest_cluster(&clusters, input.metric, f))
                .collect();
            if next == assignment {
                debug!(iteration, "k-means assignment stable");
                break;
            }
            assignment = next;

            let mut members: Vec<Vec<usize>> = vec![Vec::new(); clusters.len()];
            for (&f, &c) in frames.iter().zip(&assignment) {
                members[c].push(f);
            }
            clusters = members
                .into_par_iter()
                .enumerate()
                .map(|(id, m)| {
                    let mut c = Cluster::new(id, m);
                    c.recompute_centroid(input.metric);
                    c
                })
                .collect();
            debug!(iteration, "k-means centroids updated");
        }
        Ok(clusters)
    }
}

/// Index of the cluster whose centroid is nearest to `frame`; ties go to the lowest cluster id.
pub(crate) fn nearest_cluster(clusters: &[Cluster], metric: &DistanceMetric, frame: usize) -> usize {
    clusters
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| (OrderedFloat(c.distance_to(metric, frame)), c.id()))
        .map_or(0, |(idx, _)| idx)
}

#[cfg(test)]
mod strategy_tests {
    use super::*;
    use crate::{
        frames::DataSeries,
        metric::{MetricConfig, MetricInput, MetricKind},
    };

    fn setup(values: Vec<f64>) -> (DistanceMetric, DistanceCache) {
        let metric = DistanceMetric::setup(
            &MetricConfig::new(MetricKind::Scalar),
            MetricInput::Series(vec![DataSeries::new("x", values)]),
        )
        .unwrap();
        let n = metric.n_frames();
        let cache =
            DistanceCache::build((0..n).collect(), &metric, usize::MAX, &AbortSignal::new())
                .unwrap();
        (metric, cache)
    }

    fn members(clusters: &[Cluster]) -> Vec<Vec<usize>> {
        let mut m: Vec<Vec<usize>> = clusters.iter().map(|c| c.members().to_vec()).collect();
        m.sort();
        m
    }

    #[test]
    fn hierarchical_stops_at_target() {
        let (metric, cache) = setup(vec![0.0, 0.1, 0.3, 5.0, 5.2, 9.9, 10.0]);
        let abort = AbortSignal::new();
        let input = PartitionInput {
            cache: &cache,
            metric: &metric,
            abort: &abort,
        };
        for linkage in [Linkage::Single, Linkage::Complete, Linkage::Average] {
            let strategy = Hierarchical {
                linkage,
                target_clusters: Some(3),
                epsilon: None,
            };
            let clusters = strategy.partition(&input).unwrap();
            assert_eq!(
                members(&clusters),
                vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]],
                "{linkage}"
            );
        }
    }

    #[test]
    fn hierarchical_epsilon_cutoff() {
        let (metric, cache) = setup(vec![0.0, 1.0, 2.0, 10.0]);
        let abort = AbortSignal::new();
        let input = PartitionInput {
            cache: &cache,
            metric: &metric,
            abort: &abort,
        };
        let single = Hierarchical {
            linkage: Linkage::Single,
            target_clusters: None,
            epsilon: Some(1.5),
        };
        assert_eq!(
            members(&single.partition(&input).unwrap()),
            vec![vec![0, 1, 2], vec![3]]
        );
        // complete linkage: {0,1} to 2 is 2.0 > 1.5
        let complete = Hierarchical {
            linkage: Linkage::Complete,
            ..single
        };
        assert_eq!(
            members(&complete.partition(&input).unwrap()),
            vec![vec![0, 1], vec![2], vec![3]]
        );
    }

    #[test]
    fn equal_distances_merge_lowest_pair_first() {
        let (metric, cache) = setup(vec![0.0, 1.0, 2.0, 3.0]);
        let abort = AbortSignal::new();
        let input = PartitionInput {
            cache: &cache,
            metric: &metric,
            abort: &abort,
        };
        let strategy = Hierarchical {
            linkage: Linkage::Single,
            target_clusters: Some(3),
            epsilon: None,
        };
        let clusters = strategy.partition(&input).unwrap();
        assert_eq!(members(&clusters), vec![vec![0, 1], vec![2], vec![3]]);
        assert_eq!(clusters[0].id(), 0);
    }

    #[test]
    fn kmeans_separates_groups() {
        let (metric, cache) = setup(vec![0.0, 0.5, 1.0, 20.0, 20.5, 21.0]);
        let abort = AbortSignal::new();
        let input = PartitionInput {
            cache: &cache,
            metric: &metric,
            abort: &abort,
        };
        for seeding in [KMeansSeeding::FarthestPoint, KMeansSeeding::Random(7)] {
            let strategy = KMeans {
                k: 2,
                seeding,
                max_iterations: 20,
            };
            let clusters: Vec<_> = strategy
                .partition(&input)
                .unwrap()
                .into_iter()
                .filter(|c| !c.is_empty())
                .collect();
            assert_eq!(members(&clusters), vec![vec![0, 1, 2], vec![3, 4, 5]]);
        }
    }

    #[test]
    fn raised_abort_stops_merging() {
        let (metric, cache) = setup(vec![0.0, 1.0, 2.0]);
        let abort = AbortSignal::new();
        abort.raise();
        let input = PartitionInput {
            cache: &cache,
            metric: &metric,
            abort: &abort,
        };
        let strategy = Hierarchical {
            linkage: Linkage::Average,
            target_clusters: Some(1),
            epsilon: None,
        };
        assert_eq!(strategy.partition(&input).unwrap_err(), ClusterError::Aborted);
    }

    #[test]
    fn incomplete_cache_is_refused() {
        let (metric, mut cache) = setup(vec![0.0, 1.0, 2.0]);
        cache.invalidate_rows(1..2).unwrap();
        let abort = AbortSignal::new();
        let input = PartitionInput {
            cache: &cache,
            metric: &metric,
            abort: &abort,
        };
        let strategy = Hierarchical {
            linkage: Linkage::Average,
            target_clusters: Some(1),
            epsilon: None,
        };
        assert_eq!(
            strategy.partition(&input).unwrap_err(),
            ClusterError::NotComputed { i: 1, j: 2 }
        );
    }
}
