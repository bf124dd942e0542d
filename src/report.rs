//! # Reports
//!
//! Views of a [`FinalizedClustering`] for humans and for downstream tools:
//!
//! * [`ClusteringReport`] – the summary table (`comfy-table`), one row per cluster:
//!   member count, fraction of frames, mean/sd internal distance, representative
//!   frame, mean distance to the other centroids; quality statistics underneath
//!   when attached.
//! * [`time_series`] – cluster of every frame.
//! * [`part_summary`] – fraction of each part of the trajectory falling in each cluster.
//! * [`membership_strings`] – one `X`/`.` line per cluster, one character per frame.
//! * [`ClusteringDatasets`] – every numeric output bundled for serialization.
use std::{fmt, ops::Range};

use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Row, Table};
use serde::Serialize;

use crate::{
    cluster_errors::ClusterError,
    constants::{ClusterId, FrameIndex},
    engine::{ClusterDistanceMatrix, FinalizedClustering},
    statistics::ClusterQuality,
};

/// One line of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub frames: usize,
    pub fraction: f64,
    pub mean_distance: f64,
    pub sd_distance: f64,
    pub representative: FrameIndex,
    /// Mean centroid distance to every other cluster, `None` for a single cluster.
    pub mean_centroid_distance: Option<f64>,
}

/// Summary rows in cluster order.
pub fn summarize(result: &FinalizedClustering) -> Vec<ClusterSummary> {
    let n = result.n_frames().max(1) as f64;
    let matrix = result.cluster_distances();
    result
        .clusters()
        .iter()
        .enumerate()
        .map(|(p, c)| {
            let stats = c.stats();
            ClusterSummary {
                id: c.id(),
                frames: c.len(),
                fraction: c.len() as f64 / n,
                mean_distance: stats.map_or(0.0, |s| s.mean_distance),
                sd_distance: stats.map_or(0.0, |s| s.sd_distance),
                representative: stats.map_or(c.members()[0], |s| s.representative),
                mean_centroid_distance: matrix.mean_from(p),
            }
        })
        .collect()
}

/// Display adaptor rendering the cluster summary table.
///
/// ```rust,no_run
/// # fn demo(result: &trajclust::engine::FinalizedClustering) -> Result<(), trajclust::ClusterError> {
/// use trajclust::report::ClusteringReport;
/// use trajclust::statistics::ClusterQuality;
///
/// let quality = ClusterQuality::compute(result)?;
/// println!("{}", ClusteringReport::new(result).with_quality(&quality));
/// # Ok(()) }
/// ```
pub struct ClusteringReport<'a> {
    result: &'a FinalizedClustering,
    quality: Option<&'a ClusterQuality>,
    precision: usize,
}

impl<'a> ClusteringReport<'a> {
    pub fn new(result: &'a FinalizedClustering) -> Self {
        ClusteringReport {
            result,
            quality: None,
            precision: 3,
        }
    }

    pub fn with_quality(mut self, quality: &'a ClusterQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Fractional digits of distances (default 3).
    pub fn with_precision(mut self, digits: usize) -> Self {
        self.precision = digits;
        self
    }

    fn render_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("#Cluster"),
            Cell::new("Frames"),
            Cell::new("Frac"),
            Cell::new("AvgDist"),
            Cell::new("Stdev"),
            Cell::new("Centroid"),
            Cell::new("AvgCDist"),
        ]);

        let dp = self.precision;
        for row in summarize(self.result) {
            let cdist = row
                .mean_centroid_distance
                .map_or_else(|| "-".to_string(), |d| format!("{d:.dp$}"));
            table.add_row(Row::from(vec![
                Cell::new(row.id).set_alignment(CellAlignment::Right),
                Cell::new(row.frames).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3}", row.fraction)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.dp$}", row.mean_distance)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.dp$}", row.sd_distance)).set_alignment(CellAlignment::Right),
                Cell::new(row.representative).set_alignment(CellAlignment::Right),
                Cell::new(cdist).set_alignment(CellAlignment::Right),
            ]));
        }
        table.to_string()
    }
}

impl fmt::Display for ClusteringReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} frames, {} clusters, metric {}",
            self.result.n_frames(),
            self.result.n_clusters(),
            self.result.metric().kind()
        )?;
        write!(f, "{}", self.render_table())?;
        if let Some(q) = self.quality {
            write!(f, "\n{q:#}")?;
        }
        Ok(())
    }
}

/// Cluster of every frame, indexed by frame.
pub fn time_series(result: &FinalizedClustering) -> Vec<ClusterId> {
    result.assignments().to_vec()
}

/// Fractions of each part's frames falling in each cluster.
///
/// Fields
/// -----------------
/// * `parts` – frame ranges delimiting the parts.
/// * `fractions` – per cluster (cluster order), one fraction per part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartSummary {
    pub parts: Vec<Range<FrameIndex>>,
    pub fractions: Vec<(ClusterId, Vec<f64>)>,
}

/// Split the trajectory at `splits` and tabulate cluster populations per part.
///
/// Arguments
/// -----------------
/// * `splits`: first frame of every part after the first, strictly increasing,
///   each inside `1..n_frames`.
///
/// Return
/// ----------
/// * The summary, or [`ClusterError::InvalidClusterParameter`] for bad split points.
pub fn part_summary(
    result: &FinalizedClustering,
    splits: &[FrameIndex],
) -> Result<PartSummary, ClusterError> {
    let n = result.n_frames();
    let mut bounds = Vec::with_capacity(splits.len() + 2);
    bounds.push(0);
    for &s in splits {
        let last = bounds[bounds.len() - 1];
        if s <= last || s >= n {
            return Err(ClusterError::InvalidClusterParameter(format!(
                "split point {s} must be increasing and inside 1..{n}"
            )));
        }
        bounds.push(s);
    }
    bounds.push(n);
    let parts: Vec<Range<FrameIndex>> = bounds.windows(2).map(|w| w[0]..w[1]).collect();

    let assignments = result.assignments();
    let fractions = result
        .clusters()
        .iter()
        .map(|c| {
            let per_part = parts
                .iter()
                .map(|part| {
                    let inside = assignments[part.clone()]
                        .iter()
                        .filter(|&&a| a == c.id())
                        .count();
                    if part.is_empty() {
                        0.0
                    } else {
                        inside as f64 / part.len() as f64
                    }
                })
                .collect();
            (c.id(), per_part)
        })
        .collect();

    Ok(PartSummary { parts, fractions })
}

impl fmt::Display for PartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        let mut header = vec![Cell::new("#Cluster")];
        header.extend(
            self.parts
                .iter()
                .map(|p| Cell::new(format!("{}-{}", p.start, p.end.saturating_sub(1)))),
        );
        table.set_header(header);
        for (id, fractions) in &self.fractions {
            let mut row = vec![Cell::new(id).set_alignment(CellAlignment::Right)];
            row.extend(
                fractions
                    .iter()
                    .map(|x| Cell::new(format!("{x:.3}")).set_alignment(CellAlignment::Right)),
            );
            table.add_row(Row::from(row));
        }
        write!(f, "{table}")
    }
}

/// One line per cluster: `X` where the frame belongs to the cluster, `.` elsewhere.
pub fn membership_strings(result: &FinalizedClustering) -> Vec<(ClusterId, String)> {
    let assignments = result.assignments();
    result
        .clusters()
        .iter()
        .map(|c| {
            let line = assignments
                .iter()
                .map(|&a| if a == c.id() { 'X' } else { '.' })
                .collect();
            (c.id(), line)
        })
        .collect()
}

/// Every numeric output of a run, ready for serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusteringDatasets {
    pub metric: String,
    pub n_frames: usize,
    pub clusters: Vec<ClusterSummary>,
    pub time_series: Vec<ClusterId>,
    pub cluster_distances: ClusterDistanceMatrix,
    pub quality: ClusterQuality,
}

impl ClusteringDatasets {
    pub fn collect(result: &FinalizedClustering) -> Result<Self, ClusterError> {
        Ok(ClusteringDatasets {
            metric: result.metric().kind().to_string(),
            n_frames: result.n_frames(),
            clusters: summarize(result),
            time_series: time_series(result),
            cluster_distances: result.cluster_distances().clone(),
            quality: ClusterQuality::compute(result)?,
        })
    }
}
