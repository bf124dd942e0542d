//! # Pairwise distance cache
//!
//! Condensed, symmetric storage of every pairwise distance among the *active*
//! frames of a run (all frames, or the frames kept by a sieve).
//!
//! ## Layout
//! -----------------
//! Active frames are addressed by their **position** `p ∈ [0, n)` in the ascending
//! active list. The pair `(p, q)` with `p < q` lives at
//!
//! ```text
//! p·n − p·(p+1)/2 + (q − p − 1)
//! ```
//!
//! so row `p` is the contiguous slice of its `n − p − 1` pairs with later frames.
//! Values are stored as `f32`, halving memory; readers get `f64` back.
//!
//! ## Population
//! -----------------
//! A row is either populated or not. [`DistanceCache::get`] refuses pairs whose row
//! is not populated with [`ClusterError::NotComputed`], and frames outside the
//! active set with [`ClusterError::FrameNotInCache`]. Rows can be invalidated and
//! re-filled ([`invalidate_rows`](DistanceCache::invalidate_rows),
//! [`fill_rows`](DistanceCache::fill_rows)) or assembled from worker fragments
//! ([`from_fragments`](DistanceCache::from_fragments)).
//!
//! ## Parallelism
//! -----------------
//! Rows are filled in batches; within a batch every row is an independent
//! `&mut [f32]` handed to a rayon task, so no locking is involved. The
//! [`AbortSignal`] is polled between pair computations and between batches.
use std::{collections::HashMap, fmt, ops::Range};

use ahash::RandomState;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    abort::AbortSignal,
    cluster_errors::ClusterError,
    constants::{FrameIndex, BYTES_PER_DISTANCE},
    metric::DistanceMetric,
};

#[cfg(feature = "progress")]
use crate::progress_bar::{fmt_dur, rows_progress_bar, IterTimer};

/// Rows handed to rayon per batch, per worker thread.
const ROWS_PER_THREAD_BATCH: usize = 8;

/// Distances computed by one worker for a contiguous range of cache rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheFragment {
    pub worker: usize,
    pub rows: Range<usize>,
    pub values: Vec<f32>,
}

/// Number of stored pairs for `n` active frames.
#[inline]
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Offset of the first pair of row `row` in a cache of `n` frames.
#[inline]
pub fn row_offset(n: usize, row: usize) -> usize {
    row * n - row * (row + 1) / 2
}

/// Condensed offsets spanned by a range of rows.
#[inline]
pub fn row_span(n: usize, rows: &Range<usize>) -> Range<usize> {
    row_offset(n, rows.start)..row_offset(n, rows.end)
}

/// Memory needed by a cache over `n` frames, saturating on overflow.
pub fn required_bytes(n: usize) -> usize {
    (n as u128 * n.saturating_sub(1) as u128 / 2 * BYTES_PER_DISTANCE as u128)
        .try_into()
        .unwrap_or(usize::MAX)
}

/// Split `out` (the condensed span of `rows`) into one slice per row and fill them in parallel.
fn fill_condensed_rows(
    frames: &[FrameIndex],
    rows: Range<usize>,
    out: &mut [f32],
    metric: &DistanceMetric,
    abort: &AbortSignal,
) -> Vec<bool> {
    let n = frames.len();
    let mut slices: Vec<(usize, &mut [f32])> = Vec::with_capacity(rows.len());
    let mut rest = out;
    for row in rows {
        let (head, tail) = rest.split_at_mut(n - row - 1);
        slices.push((row, head));
        rest = tail;
    }

    slices
        .into_par_iter()
        .map(|(row, out)| {
            let a = frames[row];
            for (slot, &b) in out.iter_mut().zip(&frames[row + 1..]) {
                if abort.is_raised() {
                    return false;
                }
                *slot = metric.distance(a, b) as f32;
            }
            true
        })
        .collect()
}

/// Compute the condensed values of `rows` for a cache over `frames`, without a cache.
///
/// Used by workers that own a row range; the result is the `values` of a [`CacheFragment`].
///
/// Return
/// ----------
/// * [`ClusterError::Configuration`] for rows outside `0..frames.len()`,
///   [`ClusterError::Aborted`] if the signal is raised during the computation.
pub fn compute_rows(
    frames: &[FrameIndex],
    rows: Range<usize>,
    metric: &DistanceMetric,
    abort: &AbortSignal,
) -> Result<Vec<f32>, ClusterError> {
    let n = frames.len();
    if rows.start > rows.end || rows.end > n {
        return Err(ClusterError::Configuration(format!(
            "row range {rows:?} outside a cache of {n} rows"
        )));
    }
    let mut values = vec![0.0; row_span(n, &rows).len()];
    let done = fill_condensed_rows(frames, rows, &mut values, metric, abort);
    if done.iter().all(|&ok| ok) {
        Ok(values)
    } else {
        Err(ClusterError::Aborted)
    }
}

#[derive(Debug, Clone)]
pub struct DistanceCache {
    frames: Vec<FrameIndex>,
    position: HashMap<FrameIndex, usize, RandomState>,
    values: Vec<f32>,
    rows_filled: Vec<bool>,
}

impl DistanceCache {
    /// Allocate an empty (nothing populated) cache over `frames`.
    ///
    /// Arguments
    /// -----------------
    /// * `frames`: active frames, in any order; duplicates are dropped.
    /// * `budget_bytes`: maximum memory the condensed matrix may take.
    ///
    /// Return
    /// ----------
    /// * The cache, [`ClusterError::NoFrames`] for an empty frame list, or
    ///   [`ClusterError::CacheTooLarge`] when the matrix does not fit the budget.
    pub fn allocate(
        mut frames: Vec<FrameIndex>,
        budget_bytes: usize,
    ) -> Result<Self, ClusterError> {
        frames.sort_unstable();
        frames.dedup();
        if frames.is_empty() {
            return Err(ClusterError::NoFrames);
        }
        let n = frames.len();
        let required = required_bytes(n);
        if required > budget_bytes {
            return Err(ClusterError::CacheTooLarge {
                n_frames: n,
                required_bytes: required,
                budget_bytes,
            });
        }

        let position = frames.iter().enumerate().map(|(p, &f)| (f, p)).collect();
        let mut rows_filled = vec![false; n];
        // the last row holds no pair
        rows_filled[n - 1] = true;

        Ok(DistanceCache {
            frames,
            position,
            values: vec![0.0; pair_count(n)],
            rows_filled,
        })
    }

    /// Allocate and populate every pair of `frames` with `metric`.
    ///
    /// See also
    /// ------------
    /// * [`fill_rows`](Self::fill_rows) – the parallel filling loop.
    pub fn build(
        frames: Vec<FrameIndex>,
        metric: &DistanceMetric,
        budget_bytes: usize,
        abort: &AbortSignal,
    ) -> Result<Self, ClusterError> {
        let mut cache = Self::allocate(frames, budget_bytes)?;
        let n = cache.len();
        info!(
            frames = n,
            pairs = pair_count(n),
            bytes = cache.memory_bytes(),
            metric = %metric.kind(),
            "building distance cache"
        );
        cache.fill_rows(0..n, metric, abort)?;
        Ok(cache)
    }

    /// Compute and store every pair of the given rows.
    ///
    /// Rows are positions in the active list. Rows outside `0..len()` are rejected
    /// with [`ClusterError::Configuration`]. When the abort signal is raised the rows
    /// already complete stay populated and [`ClusterError::Aborted`] is returned.
    pub fn fill_rows(
        &mut self,
        rows: Range<usize>,
        metric: &DistanceMetric,
        abort: &AbortSignal,
    ) -> Result<(), ClusterError> {
        self.check_rows(&rows)?;
        let n = self.len();
        let batch = ROWS_PER_THREAD_BATCH * rayon::current_num_threads().max(1);

        #[cfg(feature = "progress")]
        let pb = rows_progress_bar(rows.len() as u64);
        #[cfg(feature = "progress")]
        let mut timer = IterTimer::new(0.2);

        let mut start = rows.start;
        while start < rows.end {
            if abort.is_raised() {
                #[cfg(feature = "progress")]
                pb.finish_and_clear();
                return Err(ClusterError::Aborted);
            }
            let end = (start + batch).min(rows.end);
            let done = self.fill_batch(start..end, metric, abort);
            for (row, ok) in (start..end).zip(&done) {
                self.rows_filled[row] = *ok;
            }
            if done.iter().any(|ok| !ok) {
                #[cfg(feature = "progress")]
                pb.finish_and_clear();
                return Err(ClusterError::Aborted);
            }

            #[cfg(feature = "progress")]
            {
                let last = timer.tick();
                pb.set_message(format!(
                    "last batch: {}, avg: {}",
                    fmt_dur(last),
                    fmt_dur(timer.avg())
                ));
                pb.inc((end - start) as u64);
            }
            start = end;
        }

        #[cfg(feature = "progress")]
        pb.finish_and_clear();
        debug!(rows = ?rows, n, "cache rows filled");
        Ok(())
    }

    /// Fill one batch of rows in parallel; returns, per row, whether it completed.
    fn fill_batch(
        &mut self,
        rows: Range<usize>,
        metric: &DistanceMetric,
        abort: &AbortSignal,
    ) -> Vec<bool> {
        let span = row_span(self.len(), &rows);
        fill_condensed_rows(&self.frames, rows, &mut self.values[span], metric, abort)
    }

    /// Assemble a cache from worker fragments covering every row exactly once.
    ///
    /// Return
    /// ----------
    /// * [`ClusterError::FragmentMismatch`] if a fragment is out of bounds, has the
    ///   wrong number of values, overlaps another one, or if rows stay uncovered.
    pub fn from_fragments(
        frames: Vec<FrameIndex>,
        fragments: Vec<CacheFragment>,
        budget_bytes: usize,
    ) -> Result<Self, ClusterError> {
        let mut cache = Self::allocate(frames, budget_bytes)?;
        let n = cache.len();
        let mut covered = vec![false; n];

        for fragment in fragments {
            if fragment.rows.start > fragment.rows.end || fragment.rows.end > n {
                return Err(ClusterError::FragmentMismatch(format!(
                    "worker {} sent rows {:?} for a cache of {n} rows",
                    fragment.worker, fragment.rows
                )));
            }
            let span = row_span(n, &fragment.rows);
            if span.len() != fragment.values.len() {
                return Err(ClusterError::FragmentMismatch(format!(
                    "worker {} sent {} values for rows {:?}, expected {}",
                    fragment.worker,
                    fragment.values.len(),
                    fragment.rows,
                    span.len()
                )));
            }
            if let Some(row) = fragment.rows.clone().find(|&r| covered[r]) {
                return Err(ClusterError::FragmentMismatch(format!(
                    "row {row} delivered twice (second copy from worker {})",
                    fragment.worker
                )));
            }
            cache.values[span].copy_from_slice(&fragment.values);
            for row in fragment.rows {
                covered[row] = true;
                cache.rows_filled[row] = true;
            }
        }

        if let Some(row) = covered.iter().take(n - 1).position(|c| !c) {
            return Err(ClusterError::FragmentMismatch(format!(
                "row {row} is not covered by any fragment"
            )));
        }
        Ok(cache)
    }

    /// Mark rows as not computed. Their values are kept until re-filled but never served.
    pub fn invalidate_rows(&mut self, rows: Range<usize>) -> Result<(), ClusterError> {
        self.check_rows(&rows)?;
        let last = self.len() - 1;
        for row in rows.filter(|&r| r != last) {
            self.rows_filled[row] = false;
        }
        Ok(())
    }

    fn check_rows(&self, rows: &Range<usize>) -> Result<(), ClusterError> {
        if rows.start > rows.end || rows.end > self.len() {
            return Err(ClusterError::Configuration(format!(
                "row range {rows:?} outside a cache of {} rows",
                self.len()
            )));
        }
        Ok(())
    }

    /// Number of active frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Active frames, ascending.
    pub fn frames(&self) -> &[FrameIndex] {
        &self.frames
    }

    pub fn position_of(&self, frame: FrameIndex) -> Option<usize> {
        self.position.get(&frame).copied()
    }

    pub fn contains(&self, frame: FrameIndex) -> bool {
        self.position.contains_key(&frame)
    }

    /// True when every row is populated.
    pub fn is_complete(&self) -> bool {
        self.rows_filled.iter().all(|&f| f)
    }

    /// First pair (as frames) whose row is not populated.
    pub fn first_missing(&self) -> Option<(FrameIndex, FrameIndex)> {
        let row = self.rows_filled.iter().position(|&f| !f)?;
        Some((self.frames[row], self.frames[row + 1]))
    }

    pub fn memory_bytes(&self) -> usize {
        self.values.len() * BYTES_PER_DISTANCE
    }

    /// Raw condensed values (row-major upper triangle).
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Distance between two active frames.
    ///
    /// Return
    /// ----------
    /// * `Ok(0.0)` for `i == j` when `i` is active,
    /// * [`ClusterError::FrameNotInCache`] if either frame is not active,
    /// * [`ClusterError::NotComputed`] if the pair's row is not populated.
    pub fn get(&self, i: FrameIndex, j: FrameIndex) -> Result<f64, ClusterError> {
        let p = self
            .position_of(i)
            .ok_or(ClusterError::FrameNotInCache(i))?;
        let q = self
            .position_of(j)
            .ok_or(ClusterError::FrameNotInCache(j))?;
        self.at(p, q).ok_or(ClusterError::NotComputed { i, j })
    }

    /// Distance between two positions of the active list, `None` if a position is
    /// out of range or the pair is not populated.
    #[inline]
    pub fn at(&self, p: usize, q: usize) -> Option<f64> {
        let n = self.len();
        if p >= n || q >= n {
            return None;
        }
        if p == q {
            return Some(0.0);
        }
        let (p, q) = if p < q { (p, q) } else { (q, p) };
        if !self.rows_filled[p] {
            return None;
        }
        Some(self.values[row_offset(n, p) + (q - p - 1)] as f64)
    }

    /// Minimum, maximum and mean over populated pairs, `None` if none is populated.
    pub fn stats(&self) -> Option<CacheStats> {
        let n = self.len();
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;
        for row in (0..n).filter(|&r| self.rows_filled[r]) {
            for &v in &self.values[row_span(n, &(row..row + 1))] {
                let v = v as f64;
                min = min.min(v);
                max = max.max(v);
                sum += v;
                count += 1;
            }
        }
        (count > 0).then(|| CacheStats {
            n_frames: n,
            n_pairs: count,
            min,
            max,
            mean: sum / count as f64,
        })
    }
}

/// Summary of the populated cache entries.
///
/// Display
/// -----------------
/// * `{}` – one line, e.g. `pairs=45, min=0.1200, max=3.4000, mean=1.7500`.
/// * `{:#}` – aligned multi-line block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub n_frames: usize,
    pub n_pairs: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "Distance cache")?;
            writeln!(f, "--------------")?;
            writeln!(f, "frames : {}", self.n_frames)?;
            writeln!(f, "pairs  : {}", self.n_pairs)?;
            writeln!(f, "min    : {:.4}", self.min)?;
            writeln!(f, "max    : {:.4}", self.max)?;
            write!(f, "mean   : {:.4}", self.mean)
        } else {
            write!(
                f,
                "pairs={}, min={:.4}, max={:.4}, mean={:.4}",
                self.n_pairs, self.min, self.max, self.mean
            )
        }
    }
}

#[cfg(test)]
mod distance_cache_tests {
    use super::*;
    use crate::{
        constants::DEFAULT_CACHE_BUDGET_BYTES,
        frames::DataSeries,
        metric::{MetricConfig, MetricInput, MetricKind},
    };
    use approx::assert_relative_eq;

    fn line_metric(values: Vec<f64>) -> DistanceMetric {
        DistanceMetric::setup(
            &MetricConfig::new(MetricKind::Scalar),
            MetricInput::Series(vec![DataSeries::new("x", values)]),
        )
        .unwrap()
    }

    fn squares(n: usize) -> DistanceMetric {
        line_metric((0..n).map(|i| (i * i) as f64).collect())
    }

    #[test]
    fn condensed_offsets() {
        assert_eq!(pair_count(1), 0);
        assert_eq!(pair_count(5), 10);
        assert_eq!(row_offset(5, 0), 0);
        assert_eq!(row_offset(5, 1), 4);
        assert_eq!(row_offset(5, 4), 10);
        assert_eq!(row_offset(5, 5), 10);
        assert_eq!(row_span(5, &(1..3)), 4..9);
    }

    #[test]
    fn build_is_symmetric_and_complete() {
        let metric = squares(40);
        let cache = DistanceCache::build(
            (0..40).collect(),
            &metric,
            DEFAULT_CACHE_BUDGET_BYTES,
            &AbortSignal::new(),
        )
        .unwrap();
        assert!(cache.is_complete());
        for i in 0..40 {
            assert_eq!(cache.get(i, i).unwrap(), 0.0);
            for j in 0..40 {
                let d = cache.get(i, j).unwrap();
                assert_eq!(d, cache.get(j, i).unwrap());
                assert_relative_eq!(d, metric.distance(i, j), max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn sieved_cache_rejects_inactive_frames() {
        let metric = squares(10);
        let cache = DistanceCache::build(
            vec![8, 0, 4, 4],
            &metric,
            DEFAULT_CACHE_BUDGET_BYTES,
            &AbortSignal::new(),
        )
        .unwrap();
        assert_eq!(cache.frames(), &[0, 4, 8]);
        assert_relative_eq!(cache.get(8, 4).unwrap(), 48.0, max_relative = 1e-6);
        assert_eq!(cache.get(0, 3), Err(ClusterError::FrameNotInCache(3)));
    }

    #[test]
    fn invalidated_rows_are_not_served_until_refilled() {
        let metric = squares(6);
        let abort = AbortSignal::new();
        let mut cache =
            DistanceCache::build((0..6).collect(), &metric, usize::MAX, &abort).unwrap();
        cache.invalidate_rows(1..3).unwrap();
        assert!(!cache.is_complete());
        assert_eq!(cache.get(1, 4), Err(ClusterError::NotComputed { i: 1, j: 4 }));
        assert_eq!(cache.get(4, 2), Err(ClusterError::NotComputed { i: 4, j: 2 }));
        // row 0 holds (0, 1)
        assert!(cache.get(1, 0).is_ok());

        cache.fill_rows(1..3, &metric, &abort).unwrap();
        assert!(cache.is_complete());
        assert_relative_eq!(cache.get(1, 4).unwrap(), 15.0, max_relative = 1e-6);
        assert!(cache.invalidate_rows(2..9).is_err());
    }

    #[test]
    fn positions_outside_the_cache_are_not_served() {
        let cache =
            DistanceCache::build((0..4).collect(), &squares(4), usize::MAX, &AbortSignal::new())
                .unwrap();
        assert_eq!(cache.at(3, 3), Some(0.0));
        assert_eq!(cache.at(4, 4), None);
        assert_eq!(cache.at(0, 4), None);
        assert_eq!(cache.at(7, 1), None);
    }

    #[test]
    fn budget_is_enforced() {
        let err = DistanceCache::allocate((0..100).collect(), 1000).unwrap_err();
        assert_eq!(
            err,
            ClusterError::CacheTooLarge {
                n_frames: 100,
                required_bytes: 4950 * 4,
                budget_bytes: 1000
            }
        );
        assert_eq!(
            DistanceCache::allocate(vec![], usize::MAX).unwrap_err(),
            ClusterError::NoFrames
        );
    }

    #[test]
    fn raised_abort_stops_the_build() {
        let metric = squares(20);
        let abort = AbortSignal::new();
        abort.raise();
        let err = DistanceCache::build((0..20).collect(), &metric, usize::MAX, &abort).unwrap_err();
        assert_eq!(err, ClusterError::Aborted);
    }

    #[test]
    fn fragments_assemble_into_the_full_cache() {
        let metric = squares(7);
        let full =
            DistanceCache::build((0..7).collect(), &metric, usize::MAX, &AbortSignal::new())
                .unwrap();
        let split = |rows: Range<usize>, worker| CacheFragment {
            worker,
            values: full.values()[row_span(7, &rows)].to_vec(),
            rows,
        };

        let assembled = DistanceCache::from_fragments(
            (0..7).collect(),
            vec![split(3..7, 1), split(0..3, 0)],
            usize::MAX,
        )
        .unwrap();
        assert_eq!(assembled.values(), full.values());
        assert!(assembled.is_complete());

        let overlap = DistanceCache::from_fragments(
            (0..7).collect(),
            vec![split(0..4, 0), split(3..7, 1)],
            usize::MAX,
        );
        assert!(matches!(overlap, Err(ClusterError::FragmentMismatch(_))));

        let hole =
            DistanceCache::from_fragments((0..7).collect(), vec![split(0..3, 0)], usize::MAX);
        assert!(matches!(hole, Err(ClusterError::FragmentMismatch(_))));
    }

    #[test]
    fn stats_cover_populated_pairs() {
        let metric = line_metric(vec![0.0, 1.0, 3.0]);
        let cache =
            DistanceCache::build((0..3).collect(), &metric, usize::MAX, &AbortSignal::new())
                .unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.n_pairs, 3);
        assert_relative_eq!(stats.min, 1.0);
        assert_relative_eq!(stats.max, 3.0);
        assert_relative_eq!(stats.mean, 2.0);
        assert_eq!(format!("{stats}"), "pairs=3, min=1.0000, max=3.0000, mean=2.0000");

        let single =
            DistanceCache::build(vec![2], &metric, usize::MAX, &AbortSignal::new()).unwrap();
        assert!(single.stats().is_none());
    }
}
