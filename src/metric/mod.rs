//! # Distance metrics
//!
//! The structural dissimilarity used by every other component of the crate.
//! A metric is chosen once, at configuration time, from a closed set of variants:
//!
//! | Variant | Input | Centroid |
//! |---|---|---|
//! | [`DistanceMetric::Rmsd`] | coordinates | (fitted) coordinate average |
//! | [`DistanceMetric::SymmetricRmsd`] | coordinates + symmetric groups | relabelled, fitted average |
//! | [`DistanceMetric::Dme`] | coordinates | fitted coordinate average |
//! | [`DistanceMetric::Dihedral`] | angle series (degrees) | circular mean |
//! | [`DistanceMetric::Scalar`] | data series | arithmetic mean |
//!
//! Every variant answers the same three questions:
//!
//! * [`distance`](DistanceMetric::distance) between two frames,
//! * [`compute_centroid`](DistanceMetric::compute_centroid) of a member set,
//! * [`distance_to_centroid`](DistanceMetric::distance_to_centroid) of a frame.
//!
//! Distances are symmetric and zero on the diagonal. The triangle inequality is
//! **not** guaranteed: symmetry-corrected RMSD picks its atom correspondence for
//! each pair independently.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trajclust::frames::{Topology, Trajectory};
//! use trajclust::metric::{DistanceMetric, MetricConfig, MetricInput, MetricKind, RmsdOptions};
//!
//! # fn demo(trajectory: Arc<Trajectory>, topology: Arc<Topology>) -> Result<(), trajclust::ClusterError> {
//! let config = MetricConfig::new(MetricKind::Rmsd)
//!     .with_mask(vec![0, 1, 2, 3])
//!     .with_options(RmsdOptions { fit: true, use_mass: true });
//! let metric = DistanceMetric::setup(&config, MetricInput::Coordinates { trajectory, topology })?;
//! let d = metric.distance(0, 10);
//! # Ok(()) }
//! ```
use std::{fmt, sync::Arc};

use nalgebra::Vector3;

use crate::{
    assignment::{derive_groups, SymmetricAssignment},
    cluster_errors::ClusterError,
    constants::{AtomIndex, FrameIndex},
    frames::{AtomMask, DataSeries, Frame, Topology, Trajectory},
};

pub mod coordinates;
pub mod series;
pub mod symmetric_rmsd;

pub use coordinates::{CoordinateSet, DmeMetric, RmsdMetric, RmsdOptions};
pub use series::SeriesMetric;
pub use symmetric_rmsd::{SymmetricMatch, SymmetricRmsdMetric};

/// Which metric to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Rmsd,
    SymmetricRmsd,
    Dme,
    Dihedral,
    Scalar,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Rmsd => "rms",
            MetricKind::SymmetricRmsd => "srmsd",
            MetricKind::Dme => "dme",
            MetricKind::Dihedral => "dihedral",
            MetricKind::Scalar => "data",
        };
        f.write_str(s)
    }
}

impl MetricKind {
    fn uses_coordinates(self) -> bool {
        matches!(
            self,
            MetricKind::Rmsd | MetricKind::SymmetricRmsd | MetricKind::Dme
        )
    }
}

/// Configuration of a metric, independent of the data it will run on.
///
/// Fields
/// -----------------
/// * `kind` – metric variant.
/// * `mask` – selected atom indices for coordinate metrics (`None` selects every atom).
/// * `options` – fit / mass weighting, coordinate metrics only.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricConfig {
    pub kind: MetricKind,
    pub mask: Option<Vec<AtomIndex>>,
    pub options: RmsdOptions,
}

impl MetricConfig {
    pub fn new(kind: MetricKind) -> Self {
        let options = match kind {
            MetricKind::Rmsd | MetricKind::SymmetricRmsd => RmsdOptions::default(),
            _ => RmsdOptions {
                fit: false,
                use_mass: false,
            },
        };
        MetricConfig {
            kind,
            mask: None,
            options,
        }
    }

    pub fn with_mask(mut self, atoms: Vec<AtomIndex>) -> Self {
        self.mask = Some(atoms);
        self
    }

    pub fn with_options(mut self, options: RmsdOptions) -> Self {
        self.options = options;
        self
    }
}

/// Data a metric runs on, handed over by the trajectory/topology collaborators.
#[derive(Debug, Clone)]
pub enum MetricInput {
    Coordinates {
        trajectory: Arc<Trajectory>,
        topology: Arc<Topology>,
    },
    Series(Vec<DataSeries>),
}

/// Representative structure (or values) of a cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum Centroid {
    /// Averaged coordinates of the selected atoms.
    Coords(Vec<Vector3<f64>>),
    /// Averaged series values, one per series.
    Values(Vec<f64>),
}

/// The metric selected for a clustering run.
#[derive(Debug, Clone)]
pub enum DistanceMetric {
    Rmsd(RmsdMetric),
    SymmetricRmsd(SymmetricRmsdMetric),
    Dme(DmeMetric),
    Dihedral(SeriesMetric),
    Scalar(SeriesMetric),
}

impl DistanceMetric {
    /// Build a metric from its configuration and input data.
    ///
    /// Arguments
    /// -----------------
    /// * `config`: variant, mask and options.
    /// * `input`: coordinates (with topology) or data series, matching the variant.
    ///
    /// Return
    /// ----------
    /// * The metric, or [`ClusterError::Configuration`] when:
    ///   - the input kind does not match the variant,
    ///   - the mask selects zero atoms or atoms outside the frames,
    ///   - an option is not supported by the variant (fit/mass on DME or series),
    ///   - mass weighting is requested without masses,
    ///   - the symmetric group table cannot be built.
    pub fn setup(config: &MetricConfig, input: MetricInput) -> Result<Self, ClusterError> {
        let kind = config.kind;
        match input {
            MetricInput::Coordinates {
                trajectory,
                topology,
            } => {
                if !kind.uses_coordinates() {
                    return Err(ClusterError::Configuration(format!(
                        "metric '{kind}' needs data series, got coordinates"
                    )));
                }
                if kind == MetricKind::Dme && (config.options.fit || config.options.use_mass) {
                    return Err(ClusterError::Configuration(
                        "metric 'dme' supports neither fitting nor mass weighting".into(),
                    ));
                }
                let n_atoms = if topology.n_atoms() > 0 {
                    topology.n_atoms()
                } else {
                    trajectory.n_atoms()
                };
                let mask = match &config.mask {
                    Some(atoms) => AtomMask::new(atoms.clone(), n_atoms)?,
                    None => AtomMask::all(n_atoms)?,
                };
                let groups = if kind == MetricKind::SymmetricRmsd {
                    derive_groups(&topology, &mask)?
                } else {
                    Vec::new()
                };
                let coords =
                    CoordinateSet::new(trajectory, &topology, mask, config.options.use_mass)?;
                Ok(match kind {
                    MetricKind::Rmsd => {
                        DistanceMetric::Rmsd(RmsdMetric::new(coords, config.options.fit))
                    }
                    MetricKind::SymmetricRmsd => DistanceMetric::SymmetricRmsd(
                        SymmetricRmsdMetric::new(
                            coords,
                            SymmetricAssignment::new(groups),
                            config.options.fit,
                        ),
                    ),
                    _ => DistanceMetric::Dme(DmeMetric::new(coords)),
                })
            }
            MetricInput::Series(series) => {
                if kind.uses_coordinates() {
                    return Err(ClusterError::Configuration(format!(
                        "metric '{kind}' needs coordinates, got data series"
                    )));
                }
                if config.options.fit || config.options.use_mass {
                    return Err(ClusterError::Configuration(format!(
                        "metric '{kind}' supports neither fitting nor mass weighting"
                    )));
                }
                let periodic = kind == MetricKind::Dihedral;
                let metric = SeriesMetric::new(series, periodic)?;
                Ok(if periodic {
                    DistanceMetric::Dihedral(metric)
                } else {
                    DistanceMetric::Scalar(metric)
                })
            }
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            DistanceMetric::Rmsd(_) => MetricKind::Rmsd,
            DistanceMetric::SymmetricRmsd(_) => MetricKind::SymmetricRmsd,
            DistanceMetric::Dme(_) => MetricKind::Dme,
            DistanceMetric::Dihedral(_) => MetricKind::Dihedral,
            DistanceMetric::Scalar(_) => MetricKind::Scalar,
        }
    }

    /// Number of frames the metric can address.
    pub fn n_frames(&self) -> usize {
        match self {
            DistanceMetric::Rmsd(m) => m.coords.n_frames(),
            DistanceMetric::SymmetricRmsd(m) => m.coords.n_frames(),
            DistanceMetric::Dme(m) => m.coords.n_frames(),
            DistanceMetric::Dihedral(m) | DistanceMetric::Scalar(m) => m.n_frames(),
        }
    }

    /// Distance between frames `a` and `b`.
    pub fn distance(&self, a: FrameIndex, b: FrameIndex) -> f64 {
        match self {
            DistanceMetric::Rmsd(m) => m.distance(a, b),
            DistanceMetric::SymmetricRmsd(m) => m.distance(a, b),
            DistanceMetric::Dme(m) => m.distance(a, b),
            DistanceMetric::Dihedral(m) | DistanceMetric::Scalar(m) => m.distance(a, b),
        }
    }

    /// Centroid of a member set, `None` when `members` is empty.
    pub fn compute_centroid(&self, members: &[FrameIndex]) -> Option<Centroid> {
        match self {
            DistanceMetric::Rmsd(m) => m.coords.average(members, m.fit).map(Centroid::Coords),
            DistanceMetric::SymmetricRmsd(m) => m.average(members).map(Centroid::Coords),
            DistanceMetric::Dme(m) => m.coords.average(members, true).map(Centroid::Coords),
            DistanceMetric::Dihedral(m) | DistanceMetric::Scalar(m) => {
                m.average(members).map(Centroid::Values)
            }
        }
    }

    /// Distance of a frame to a centroid built by this metric.
    ///
    /// A centroid of the wrong kind is infinitely far away.
    pub fn distance_to_centroid(&self, frame: FrameIndex, centroid: &Centroid) -> f64 {
        match (self, centroid) {
            (DistanceMetric::Rmsd(m), Centroid::Coords(c)) => m.rmsd(m.coords.selected(frame), c),
            (DistanceMetric::SymmetricRmsd(m), Centroid::Coords(c)) => {
                m.compare(m.coords.selected(frame), c).rmsd
            }
            (DistanceMetric::Dme(m), Centroid::Coords(c)) => m.dme(m.coords.selected(frame), c),
            (DistanceMetric::Dihedral(m) | DistanceMetric::Scalar(m), Centroid::Values(v)) => {
                m.value_distance(&m.values(frame), v)
            }
            _ => f64::INFINITY,
        }
    }

    /// Distance between two centroids built by this metric.
    pub fn centroid_distance(&self, a: &Centroid, b: &Centroid) -> f64 {
        match (self, a, b) {
            (DistanceMetric::Rmsd(m), Centroid::Coords(x), Centroid::Coords(y)) => m.rmsd(x, y),
            (DistanceMetric::SymmetricRmsd(m), Centroid::Coords(x), Centroid::Coords(y)) => {
                m.compare(x, y).rmsd
            }
            (DistanceMetric::Dme(m), Centroid::Coords(x), Centroid::Coords(y)) => m.dme(x, y),
            (
                DistanceMetric::Dihedral(m) | DistanceMetric::Scalar(m),
                Centroid::Values(x),
                Centroid::Values(y),
            ) => m.value_distance(x, y),
            _ => f64::INFINITY,
        }
    }

    /// Full frame relabelled to best match a centroid (symmetry-corrected RMSD only).
    ///
    /// For the other variants no relabelling exists and the frame is returned unchanged;
    /// series metrics have no frame to return.
    pub fn remap_frame(&self, frame: FrameIndex, reference: &Centroid) -> Option<Frame> {
        match (self, reference) {
            (DistanceMetric::SymmetricRmsd(m), Centroid::Coords(c)) => m.remap_frame(frame, c),
            (DistanceMetric::Rmsd(m), _) => m.coords.full_frame(frame).cloned(),
            (DistanceMetric::Dme(m), _) => m.coords.full_frame(frame).cloned(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod metric_tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn coordinates(n_frames: usize) -> MetricInput {
        let frames = (0..n_frames)
            .map(|i| {
                let s = 1.0 + 0.1 * i as f64;
                Frame::new(vec![
                    Vector3::new(0.0, 0.0, 0.0),
                    Vector3::new(s, 0.0, 0.0),
                    Vector3::new(0.0, s, 0.0),
                    Vector3::new(0.0, 0.0, 2.0 * s),
                ])
            })
            .collect();
        MetricInput::Coordinates {
            trajectory: Arc::new(Trajectory::new(frames).unwrap()),
            topology: Arc::new(Topology::new(vec![12.0, 1.0, 1.0, 16.0])),
        }
    }

    #[test]
    fn every_variant_is_symmetric_with_zero_diagonal() {
        let series = vec![
            DataSeries::dihedral("phi", vec![10.0, 170.0, -170.0]),
            DataSeries::new("x", vec![0.0, 1.0, 4.0]),
        ];
        let metrics = vec![
            DistanceMetric::setup(&MetricConfig::new(MetricKind::Rmsd), coordinates(3)).unwrap(),
            DistanceMetric::setup(
                &MetricConfig::new(MetricKind::Rmsd).with_options(RmsdOptions {
                    fit: false,
                    use_mass: true,
                }),
                coordinates(3),
            )
            .unwrap(),
            DistanceMetric::setup(&MetricConfig::new(MetricKind::SymmetricRmsd), coordinates(3))
                .unwrap(),
            DistanceMetric::setup(&MetricConfig::new(MetricKind::Dme), coordinates(3)).unwrap(),
            DistanceMetric::setup(
                &MetricConfig::new(MetricKind::Dihedral),
                MetricInput::Series(series.clone()),
            )
            .unwrap(),
            DistanceMetric::setup(&MetricConfig::new(MetricKind::Scalar), MetricInput::Series(series))
                .unwrap(),
        ];

        for metric in &metrics {
            assert_eq!(metric.n_frames(), 3);
            for a in 0..3 {
                assert_eq!(metric.distance(a, a), 0.0, "{}", metric.kind());
                for b in 0..3 {
                    assert_relative_eq!(
                        metric.distance(a, b),
                        metric.distance(b, a),
                        epsilon = 1e-9
                    );
                    assert!(metric.distance(a, b) >= 0.0);
                }
            }
            let centroid = metric.compute_centroid(&[0, 1, 2]).unwrap();
            assert!(metric.distance_to_centroid(1, &centroid).is_finite());
            assert_relative_eq!(metric.centroid_distance(&centroid, &centroid), 0.0, epsilon = 1e-9);
            assert!(metric.compute_centroid(&[]).is_none());
        }
    }

    /// Methyl-like frames whose hydrogens are cyclically relabelled, with jitter.
    fn relabelled_methyls(n_frames: usize) -> MetricInput {
        let mut rng = StdRng::seed_from_u64(7);
        let hydrogens: Vec<Vector3<f64>> = (0..3)
            .map(|k| {
                let a = 2.0 * std::f64::consts::PI * k as f64 / 3.0;
                Vector3::new(0.36, a.cos(), a.sin())
            })
            .collect();
        let frames = (0..n_frames)
            .map(|i| {
                let mut coords = vec![Vector3::zeros()];
                coords.extend((0..3).map(|k| hydrogens[(k + i) % 3]));
                coords.push(Vector3::new(-1.4, 0.2, 0.0));
                for x in &mut coords {
                    *x += Vector3::from_fn(|_, _| rng.random_range(-0.05..0.05));
                }
                Frame::new(coords)
            })
            .collect();
        MetricInput::Coordinates {
            trajectory: Arc::new(Trajectory::new(frames).unwrap()),
            topology: Arc::new(
                Topology::new(vec![12.0, 1.0, 1.0, 1.0, 16.0])
                    .with_equivalent_atoms(vec![vec![1, 2, 3]]),
            ),
        }
    }

    #[test]
    fn symmetric_rmsd_with_groups_is_symmetric_under_every_option() {
        let options = [(true, false), (false, true), (true, true)];
        for (fit, use_mass) in options {
            let opts = RmsdOptions { fit, use_mass };
            let symmetric = DistanceMetric::setup(
                &MetricConfig::new(MetricKind::SymmetricRmsd).with_options(opts),
                relabelled_methyls(4),
            )
            .unwrap();
            let plain = DistanceMetric::setup(
                &MetricConfig::new(MetricKind::Rmsd).with_options(opts),
                relabelled_methyls(4),
            )
            .unwrap();

            for a in 0..4 {
                assert_eq!(symmetric.distance(a, a), 0.0);
                for b in 0..4 {
                    let d = symmetric.distance(a, b);
                    assert_relative_eq!(d, symmetric.distance(b, a), epsilon = 1e-9);
                    assert!(d <= plain.distance(a, b) + 1e-9, "fit={fit} use_mass={use_mass}");
                    // relabelling leaves only the jitter
                    assert!(d < 0.2, "fit={fit} use_mass={use_mass}: {d}");
                }
            }
        }
    }

    #[test]
    fn single_member_centroid_is_at_zero_distance() {
        let metric =
            DistanceMetric::setup(&MetricConfig::new(MetricKind::Rmsd), coordinates(4)).unwrap();
        let centroid = metric.compute_centroid(&[2]).unwrap();
        assert_relative_eq!(metric.distance_to_centroid(2, &centroid), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn configuration_errors() {
        let empty_mask = MetricConfig::new(MetricKind::Rmsd).with_mask(vec![]);
        assert!(matches!(
            DistanceMetric::setup(&empty_mask, coordinates(2)),
            Err(ClusterError::Configuration(_))
        ));

        let dme_fit = MetricConfig::new(MetricKind::Dme).with_options(RmsdOptions {
            fit: true,
            use_mass: false,
        });
        assert!(DistanceMetric::setup(&dme_fit, coordinates(2)).is_err());

        let wrong_input = MetricConfig::new(MetricKind::Dihedral);
        assert!(DistanceMetric::setup(&wrong_input, coordinates(2)).is_err());

        let bad_groups = MetricInput::Coordinates {
            trajectory: Arc::new(Trajectory::new(vec![]).unwrap()),
            topology: Arc::new(
                Topology::new(vec![1.0; 4]).with_equivalent_atoms(vec![vec![0, 1], vec![1, 2]]),
            ),
        };
        assert!(matches!(
            DistanceMetric::setup(&MetricConfig::new(MetricKind::SymmetricRmsd), bad_groups),
            Err(ClusterError::Configuration(_))
        ));
    }

    #[test]
    fn mismatched_centroid_is_never_nearest() {
        let metric =
            DistanceMetric::setup(&MetricConfig::new(MetricKind::Rmsd), coordinates(2)).unwrap();
        let values = Centroid::Values(vec![1.0]);
        assert_eq!(metric.distance_to_centroid(0, &values), f64::INFINITY);
    }
}
