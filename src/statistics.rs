//! # Cluster quality statistics
//!
//! Pure readers of a [`FinalizedClustering`]; calling them twice on the same value
//! gives bit-identical results (parallel sections only map, every sum is sequential).
//!
//! | Statistic | Better | Defined when |
//! |---|---|---|
//! | [`davies_bouldin`] | lower | ≥ 2 clusters |
//! | [`pseudo_f`] | higher | ≥ 2 clusters, ≥ 3 frames, frames > clusters |
//! | [`silhouette`] | closer to 1 | always (0 for singletons) |
//!
//! Davies–Bouldin
//! -----------------
//! ```text
//! DBI = 1/k · Σᵢ maxⱼ≠ᵢ (sᵢ + sⱼ) / d(cᵢ, cⱼ)
//! ```
//! with `sᵢ` the mean distance of the members of cluster `i` to its centroid.
//! Coincident centroids give an infinite ratio.
//!
//! Pseudo-F (Calinski–Harabasz)
//! -----------------
//! ```text
//! F = (SSB / (k − 1)) / (SSW / (N − k))
//! SSB = Σᵢ nᵢ · d(cᵢ, c)²        SSW = Σᵢ Σ_{f∈i} d(f, cᵢ)²
//! ```
//! with `c` the centroid of all frames. `SSW = 0` gives `+∞`.
//!
//! Silhouette
//! -----------------
//! For each cached frame `f` of cluster `A`: `a` is the mean distance to the other
//! cached members of `A`, `b` the smallest mean distance to the cached members of
//! another cluster, `s = (b − a) / max(a, b)`. A frame alone (among cached frames)
//! in its cluster scores 0. Only cached frames take part, distances come from the cache.
use std::fmt;

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    cluster_errors::ClusterError,
    constants::{ClusterId, FrameIndex},
    engine::FinalizedClustering,
};

/// Davies–Bouldin index, `None` with fewer than two clusters.
pub fn davies_bouldin(result: &FinalizedClustering) -> Option<f64> {
    let clusters = result.clusters();
    let k = clusters.len();
    if k < 2 {
        return None;
    }
    let matrix = result.cluster_distances();
    let scatter: Vec<f64> = clusters
        .iter()
        .map(|c| c.stats().map_or(0.0, |s| s.mean_to_centroid))
        .collect();

    let total: f64 = (0..k)
        .map(|i| {
            (0..k)
                .filter(|&j| j != i)
                .map(|j| {
                    let d = matrix.at(i, j);
                    let spread = scatter[i] + scatter[j];
                    if d > 0.0 {
                        spread / d
                    } else if spread > 0.0 {
                        f64::INFINITY
                    } else {
                        0.0
                    }
                })
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .sum();
    Some(total / k as f64)
}

/// Pseudo-F statistic, `None` with fewer than two clusters, three frames, or `N ≤ k`.
pub fn pseudo_f(result: &FinalizedClustering) -> Option<f64> {
    let clusters = result.clusters();
    let k = clusters.len();
    let n = result.n_frames();
    if k < 2 || n < 3 || n <= k {
        return None;
    }
    let metric = result.metric();
    let all: Vec<FrameIndex> = (0..n).collect();
    let overall = metric.compute_centroid(&all)?;

    let per_cluster: Vec<(f64, f64)> = clusters
        .par_iter()
        .map(|c| {
            let Some(centroid) = c.centroid() else {
                return (0.0, 0.0);
            };
            let between = metric.centroid_distance(centroid, &overall).powi(2) * c.len() as f64;
            let within = c
                .members()
                .iter()
                .map(|&f| metric.distance_to_centroid(f, centroid).powi(2))
                .sum::<f64>();
            (between, within)
        })
        .collect();
    let ssb: f64 = per_cluster.iter().map(|(b, _)| b).sum();
    let ssw: f64 = per_cluster.iter().map(|(_, w)| w).sum();

    let num = ssb / (k - 1) as f64;
    let den = ssw / (n - k) as f64;
    Some(if den > 0.0 { num / den } else { f64::INFINITY })
}

/// Silhouette values of a finalized clustering.
///
/// Fields
/// -----------------
/// * `frames` – `(frame, cluster, s)` for every cached frame, ascending frame.
/// * `clusters` – `(cluster, mean s)` over the cluster's cached frames, in cluster order.
/// * `overall` – mean `s` over every cached frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Silhouette {
    pub frames: Vec<(FrameIndex, ClusterId, f64)>,
    pub clusters: Vec<(ClusterId, f64)>,
    pub overall: f64,
}

/// Silhouette over the cached frames.
///
/// Return
/// ----------
/// * [`ClusterError::NotComputed`] if the cache misses a pair (cannot happen for a
///   clustering produced by the engine).
pub fn silhouette(result: &FinalizedClustering) -> Result<Silhouette, ClusterError> {
    let cache = result.cache();
    let groups: Vec<(ClusterId, Vec<FrameIndex>)> = result
        .clusters()
        .iter()
        .map(|c| {
            let cached = c
                .members()
                .iter()
                .copied()
                .filter(|&f| cache.contains(f))
                .collect();
            (c.id(), cached)
        })
        .collect();

    let mean_to = |f: FrameIndex, members: &[FrameIndex]| -> Result<Option<f64>, ClusterError> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &m in members.iter().filter(|&&m| m != f) {
            sum += cache.get(f, m)?;
            count += 1;
        }
        Ok((count > 0).then(|| sum / count as f64))
    };

    let jobs: Vec<(usize, FrameIndex)> = groups
        .iter()
        .enumerate()
        .flat_map(|(g, (_, members))| members.iter().map(move |&f| (g, f)))
        .collect();

    let scores: Vec<(FrameIndex, ClusterId, f64)> = jobs
        .par_iter()
        .map(|&(g, f)| {
            let (id, own) = &groups[g];
            let Some(a) = mean_to(f, own)? else {
                return Ok((f, *id, 0.0));
            };
            let mut b = f64::INFINITY;
            for (h, (_, other)) in groups.iter().enumerate() {
                if h == g {
                    continue;
                }
                if let Some(d) = mean_to(f, other)? {
                    b = b.min(d);
                }
            }
            let s = if b.is_finite() && a.max(b) > 0.0 {
                (b - a) / a.max(b)
            } else {
                0.0
            };
            Ok((f, *id, s))
        })
        .collect::<Result<_, ClusterError>>()?;

    let clusters: Vec<(ClusterId, f64)> = groups
        .iter()
        .map(|(id, _)| {
            let mine: Vec<f64> = scores
                .iter()
                .filter(|(_, c, _)| c == id)
                .map(|&(_, _, s)| s)
                .collect();
            let mean = if mine.is_empty() {
                0.0
            } else {
                mine.iter().sum::<f64>() / mine.len() as f64
            };
            (*id, mean)
        })
        .collect();

    let overall = if scores.is_empty() {
        0.0
    } else {
        scores.iter().map(|&(_, _, s)| s).sum::<f64>() / scores.len() as f64
    };

    let mut frames = scores;
    frames.sort_by_key(|&(f, _, _)| f);
    Ok(Silhouette {
        frames,
        clusters,
        overall,
    })
}

/// The three quality statistics of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterQuality {
    pub davies_bouldin: Option<f64>,
    pub pseudo_f: Option<f64>,
    pub silhouette: Silhouette,
}

impl ClusterQuality {
    pub fn compute(result: &FinalizedClustering) -> Result<Self, ClusterError> {
        Ok(ClusterQuality {
            davies_bouldin: davies_bouldin(result),
            pseudo_f: pseudo_f(result),
            silhouette: silhouette(result)?,
        })
    }
}

impl fmt::Display for ClusterQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |x| format!("{x:.4}"));
        if f.alternate() {
            writeln!(f, "Cluster quality")?;
            writeln!(f, "---------------")?;
            writeln!(f, "DBI        : {}", opt(self.davies_bouldin))?;
            writeln!(f, "pSF        : {}", opt(self.pseudo_f))?;
            write!(f, "silhouette : {:.4}", self.silhouette.overall)
        } else {
            write!(
                f,
                "DBI={}, pSF={}, silhouette={:.4}",
                opt(self.davies_bouldin),
                opt(self.pseudo_f),
                self.silhouette.overall
            )
        }
    }
}

#[cfg(test)]
mod statistics_tests {
    use super::*;
    use crate::{
        engine::{ClusterParams, ClusteringEngine},
        frames::DataSeries,
        metric::{MetricConfig, MetricInput, MetricKind},
    };
    use approx::assert_relative_eq;

    fn run(values: Vec<f64>, k: usize) -> FinalizedClustering {
        let params = ClusterParams::builder().target_clusters(k).build().unwrap();
        ClusteringEngine::new(
            &MetricConfig::new(MetricKind::Scalar),
            MetricInput::Series(vec![DataSeries::new("x", values)]),
            params,
        )
        .unwrap()
        .run()
        .unwrap()
    }

    #[test]
    fn hand_computed_values() {
        // clusters {0, 2} (centroid 1) and {10, 12} (centroid 11)
        let result = run(vec![0.0, 2.0, 10.0, 12.0], 2);
        assert_eq!(result.n_clusters(), 2);

        // s = 1 for both, d(c1, c2) = 10
        assert_relative_eq!(davies_bouldin(&result).unwrap(), 0.2, epsilon = 1e-9);

        // overall centroid 6: SSB = 2·25 + 2·25 = 100, SSW = 4
        // F = (100 / 1) / (4 / 2) = 50
        assert_relative_eq!(pseudo_f(&result).unwrap(), 50.0, epsilon = 1e-9);

        // frame 0: a = 2, b = (10 + 12) / 2 = 11, s = 9 / 11
        let sil = silhouette(&result).unwrap();
        assert_relative_eq!(sil.frames[0].2, 9.0 / 11.0, epsilon = 1e-6);
        assert!(sil.frames.iter().all(|&(_, _, s)| (-1.0..=1.0).contains(&s)));
        assert_eq!(sil.clusters.len(), 2);
    }

    #[test]
    fn undefined_statistics() {
        let single = run(vec![0.0, 1.0, 2.0], 1);
        assert!(davies_bouldin(&single).is_none());
        assert!(pseudo_f(&single).is_none());
        assert_eq!(silhouette(&single).unwrap().overall, 0.0);

        let two = run(vec![0.0, 5.0], 2);
        assert!(pseudo_f(&two).is_none());
        // both frames are singletons
        assert_eq!(silhouette(&two).unwrap().overall, 0.0);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let values: Vec<f64> = (0..40).map(|i| ((i * 37) % 23) as f64 * 0.7).collect();
        let result = run(values, 4);
        let q1 = ClusterQuality::compute(&result).unwrap();
        let q2 = ClusterQuality::compute(&result).unwrap();
        assert_eq!(q1, q2);
        assert_eq!(format!("{q1}"), format!("{q2}"));
    }
}
