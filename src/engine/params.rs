//! # Clustering parameters
//!
//! [`ClusterParams`] gathers every tunable of a clustering run: which merge
//! strategy partitions the cached frames and when it stops, how frames are
//! sieved before the cache build, the cache memory budget, and whether
//! clusters are renumbered at finalization.
//!
//! Parameters are immutable once built. Use [`ClusterParams::builder`] and
//! [`ClusterParamsBuilder::build`], which validates the combination.
//!
//! ## Example
//!
//! ```rust
//! use trajclust::engine::{Algorithm, ClusterParams, Linkage};
//! use trajclust::sieve::Sieve;
//!
//! let params = ClusterParams::builder()
//!     .algorithm(Algorithm::Hierarchical(Linkage::Average))
//!     .target_clusters(5)
//!     .epsilon(2.5)
//!     .sieve(Sieve::regular(10))
//!     .build()
//!     .unwrap();
//! println!("{params:#}");
//! ```
use std::cmp::Ordering::Greater;
use std::fmt;

use crate::{cluster_errors::ClusterError, constants::DEFAULT_CACHE_BUDGET_BYTES, sieve::Sieve};

/// Cluster-to-cluster distance update of the hierarchical strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Closest pair of members.
    Single,
    /// Farthest pair of members.
    Complete,
    /// Mean over member pairs.
    Average,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
        })
    }
}

/// Seeding of the k-means strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KMeansSeeding {
    /// Lowest cached frame first, then repeatedly the frame farthest from every seed.
    #[default]
    FarthestPoint,
    /// `k` distinct cached frames drawn from a generator seeded with the value.
    Random(u64),
}

/// Built-in merge strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Hierarchical(Linkage),
    KMeans(KMeansSeeding),
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Hierarchical(Linkage::Average)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Hierarchical(linkage) => write!(f, "hierarchical ({linkage} linkage)"),
            Algorithm::KMeans(KMeansSeeding::FarthestPoint) => {
                write!(f, "k-means (farthest-point seeds)")
            }
            Algorithm::KMeans(KMeansSeeding::Random(seed)) => {
                write!(f, "k-means (random seeds, seed={seed})")
            }
        }
    }
}

/// Configuration of a clustering run.
///
/// Fields
/// -----------------
/// * `algorithm` – merge strategy built by the engine when none is injected.
/// * `target_clusters` – hierarchical: stop once this many clusters remain;
///   k-means: number of clusters.
/// * `epsilon` – hierarchical: stop once the closest pair of clusters is farther apart.
/// * `max_iterations` – k-means: cap on assignment/update rounds.
/// * `sieve` – subsampling of the frames entering the cache.
/// * `cache_budget_bytes` – memory cap of the condensed distance cache.
/// * `renumber` – renumber clusters by decreasing size at finalization.
///
/// Defaults
/// -----------------
/// * `algorithm`: average-linkage hierarchical
/// * `target_clusters`: 10
/// * `epsilon`: none
/// * `max_iterations`: 100
/// * `sieve`: none
/// * `cache_budget_bytes`: 4 GiB
/// * `renumber`: true
///
/// See also
/// ------------
/// * [`ClusterParamsBuilder::build`] – validation rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    pub algorithm: Algorithm,
    pub target_clusters: Option<usize>,
    pub epsilon: Option<f64>,
    pub max_iterations: usize,
    pub sieve: Sieve,
    pub cache_budget_bytes: usize,
    pub renumber: bool,
}

impl ClusterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ClusterParamsBuilder {
        ClusterParamsBuilder::new()
    }
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            algorithm: Algorithm::default(),
            target_clusters: Some(10),
            epsilon: None,
            max_iterations: 100,
            sieve: Sieve::None,
            cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
            renumber: true,
        }
    }
}

/// Builder for [`ClusterParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct ClusterParamsBuilder {
    params: ClusterParams,
}

impl ClusterParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: ClusterParams::default(),
        }
    }

    pub fn algorithm(mut self, v: Algorithm) -> Self {
        self.params.algorithm = v;
        self
    }
    pub fn target_clusters(mut self, v: usize) -> Self {
        self.params.target_clusters = Some(v);
        self
    }
    /// Remove the cluster-count criterion (hierarchical runs then stop on `epsilon` only).
    pub fn no_target_clusters(mut self) -> Self {
        self.params.target_clusters = None;
        self
    }
    pub fn epsilon(mut self, v: f64) -> Self {
        self.params.epsilon = Some(v);
        self
    }
    pub fn max_iterations(mut self, v: usize) -> Self {
        self.params.max_iterations = v;
        self
    }
    pub fn sieve(mut self, v: Sieve) -> Self {
        self.params.sieve = v;
        self
    }
    pub fn cache_budget_bytes(mut self, v: usize) -> Self {
        self.params.cache_budget_bytes = v;
        self
    }
    pub fn renumber(mut self, v: bool) -> Self {
        self.params.renumber = v;
        self
    }

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Validate and produce the parameters.
    ///
    /// Validation rules
    /// -----------------
    /// * hierarchical: at least one of `target_clusters` / `epsilon` is set.
    /// * `target_clusters ≥ 1` when set; k-means requires it.
    /// * `epsilon > 0` and finite when set.
    /// * `max_iterations ≥ 1`.
    /// * `cache_budget_bytes > 0`.
    /// * sieve: `step ≥ 1`, regular `offset < step`.
    ///
    /// Return
    /// ----------
    /// * `Ok(ClusterParams)`, or [`ClusterError::InvalidClusterParameter`] naming the rule.
    pub fn build(self) -> Result<ClusterParams, ClusterError> {
        let p = &self.params;

        if let Some(k) = p.target_clusters {
            if k == 0 {
                return Err(ClusterError::InvalidClusterParameter(
                    "target_clusters must be >= 1".into(),
                ));
            }
        }
        if let Some(eps) = p.epsilon {
            if !Self::gt0(eps) || !eps.is_finite() {
                return Err(ClusterError::InvalidClusterParameter(
                    "epsilon must be finite and > 0".into(),
                ));
            }
        }
        match p.algorithm {
            Algorithm::Hierarchical(_) => {
                if p.target_clusters.is_none() && p.epsilon.is_none() {
                    return Err(ClusterError::InvalidClusterParameter(
                        "hierarchical clustering needs target_clusters and/or epsilon".into(),
                    ));
                }
            }
            Algorithm::KMeans(_) => {
                if p.target_clusters.is_none() {
                    return Err(ClusterError::InvalidClusterParameter(
                        "k-means needs target_clusters".into(),
                    ));
                }
            }
        }
        if p.max_iterations == 0 {
            return Err(ClusterError::InvalidClusterParameter(
                "max_iterations must be >= 1".into(),
            ));
        }
        if p.cache_budget_bytes == 0 {
            return Err(ClusterError::InvalidClusterParameter(
                "cache_budget_bytes must be > 0".into(),
            ));
        }
        p.sieve.validate(0)?;

        Ok(self.params)
    }
}

impl fmt::Display for ClusterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<String>| v.unwrap_or_else(|| "none".into());
        let target = opt(self.target_clusters.map(|k| k.to_string()));
        let epsilon = opt(self.epsilon.map(|e| format!("{e:.4}")));
        let sieve = match self.sieve {
            Sieve::None => "none".to_string(),
            Sieve::Regular { step, offset } => format!("every {step} from {offset}"),
            Sieve::Random { step, seed } => format!("random 1/{step} (seed={seed})"),
        };

        if f.alternate() {
            const PARAM_COL: usize = 44;
            writeln!(f, "Clustering Parameters")?;
            writeln!(f, "---------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Merge strategy]")?;
            line!("algorithm          = {}", self.algorithm, "Partition of cached frames")?;
            line!("target_clusters    = {}", target, "Cluster count to reach")?;
            line!("epsilon            = {}", epsilon, "Merge distance cutoff")?;
            line!("max_iterations     = {}", self.max_iterations, "k-means rounds")?;

            writeln!(f, "\n[Distance cache]")?;
            line!("sieve              = {}", sieve, "Frames entering the cache")?;
            line!(
                "cache_budget_bytes = {}",
                self.cache_budget_bytes,
                "Memory cap of the condensed matrix"
            )?;

            writeln!(f, "\n[Finalization]")?;
            line!("renumber           = {}", self.renumber, "Order clusters by size")?;
            Ok(())
        } else {
            write!(
                f,
                "ClusterParams(algorithm={}, target_clusters={}, epsilon={}, sieve={}, renumber={})",
                self.algorithm, target, epsilon, sieve, self.renumber
            )
        }
    }
}

#[cfg(test)]
mod params_tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let p = ClusterParams::builder().build().unwrap();
        assert_eq!(p, ClusterParams::default());
        assert_eq!(p.target_clusters, Some(10));
        assert!(p.renumber);
    }

    #[test]
    fn hierarchical_needs_a_stop_criterion() {
        let err = ClusterParams::builder().no_target_clusters().build().unwrap_err();
        assert!(matches!(err, ClusterError::InvalidClusterParameter(_)));
        assert!(ClusterParams::builder()
            .no_target_clusters()
            .epsilon(1.0)
            .build()
            .is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(ClusterParams::builder().target_clusters(0).build().is_err());
        assert!(ClusterParams::builder().epsilon(0.0).build().is_err());
        assert!(ClusterParams::builder().epsilon(f64::NAN).build().is_err());
        assert!(ClusterParams::builder().max_iterations(0).build().is_err());
        assert!(ClusterParams::builder().cache_budget_bytes(0).build().is_err());
        assert!(ClusterParams::builder().sieve(Sieve::regular(0)).build().is_err());
        assert!(ClusterParams::builder()
            .algorithm(Algorithm::KMeans(KMeansSeeding::FarthestPoint))
            .no_target_clusters()
            .epsilon(1.0)
            .build()
            .is_err());
    }

    #[test]
    fn display_compact_and_pretty() {
        let p = ClusterParams::builder()
            .target_clusters(3)
            .sieve(Sieve::regular(5))
            .build()
            .unwrap();
        let compact = format!("{p}");
        assert!(compact.starts_with("ClusterParams(algorithm=hierarchical (average linkage)"));
        assert!(compact.contains("sieve=every 5 from 0"));
        let pretty = format!("{p:#}");
        assert!(pretty.contains("[Merge strategy]"));
        assert!(pretty.contains("target_clusters    = 3"));
    }
}
