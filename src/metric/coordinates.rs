//! Coordinate-based metrics: plain RMSD and distance-matrix error (DME).
use std::sync::Arc;

use itertools::Itertools;
use nalgebra::Vector3;

use crate::{
    cluster_errors::ClusterError,
    constants::FrameIndex,
    frames::{AtomMask, Frame, Topology, Trajectory},
    superposition::{rmsd_fit, rmsd_no_fit, weighted_center},
};

/// Mask-selected coordinates of every frame, with optional per-atom weights.
#[derive(Debug, Clone)]
pub struct CoordinateSet {
    trajectory: Arc<Trajectory>,
    mask: AtomMask,
    selected: Vec<Vec<Vector3<f64>>>,
    weights: Option<Arc<[f64]>>,
}

impl CoordinateSet {
    /// Extract the selection of every frame.
    ///
    /// Arguments
    /// -----------------
    /// * `trajectory`: frames to compare.
    /// * `topology`: source of per-atom masses when `use_mass` is set.
    /// * `mask`: selected atoms.
    /// * `use_mass`: weight atoms by mass.
    ///
    /// Return
    /// ----------
    /// * The coordinate set, or [`ClusterError::Configuration`] if the mask selects atoms
    ///   beyond the frames' atom count or masses are requested but unavailable.
    pub fn new(
        trajectory: Arc<Trajectory>,
        topology: &Topology,
        mask: AtomMask,
        use_mass: bool,
    ) -> Result<Self, ClusterError> {
        if !trajectory.is_empty() && mask.max_atom() >= trajectory.n_atoms() {
            return Err(ClusterError::Configuration(format!(
                "mask selects atom {} but frames hold {} atoms",
                mask.max_atom(),
                trajectory.n_atoms()
            )));
        }

        let weights = if use_mass {
            let masses = if topology.n_atoms() > 0 {
                topology.selected_masses(&mask)?
            } else {
                trajectory
                    .frame(0)
                    .and_then(|f| f.masses.as_ref())
                    .map(|m| mask.iter().map(|&a| m[a]).collect::<Vec<f64>>())
                    .ok_or_else(|| {
                        ClusterError::Configuration(
                            "mass weighting requested but no masses are available".into(),
                        )
                    })?
            };
            if masses.iter().sum::<f64>() <= 0.0 {
                return Err(ClusterError::Configuration(
                    "selected atoms have a zero total mass".into(),
                ));
            }
            Some(Arc::from(masses))
        } else {
            None
        };

        let selected = trajectory.iter().map(|f| f.select(&mask)).collect();

        Ok(CoordinateSet {
            trajectory,
            mask,
            selected,
            weights,
        })
    }

    pub fn n_frames(&self) -> usize {
        self.selected.len()
    }

    pub fn n_selected(&self) -> usize {
        self.mask.len()
    }

    pub fn mask(&self) -> &AtomMask {
        &self.mask
    }

    #[inline]
    pub fn selected(&self, frame: FrameIndex) -> &[Vector3<f64>] {
        &self.selected[frame]
    }

    #[inline]
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn full_frame(&self, frame: FrameIndex) -> Option<&Frame> {
        self.trajectory.frame(frame)
    }

    /// Average of the members' selections.
    ///
    /// With `fit`, the first member is centered and every following member is
    /// superposed onto it before accumulation; without `fit` raw coordinates are averaged.
    pub fn average(&self, members: &[FrameIndex], fit: bool) -> Option<Vec<Vector3<f64>>> {
        let (&first, rest) = members.split_first()?;
        let mut reference = self.selected(first).to_vec();
        if fit {
            let center = weighted_center(&reference, self.weights());
            reference.iter_mut().for_each(|x| *x -= center);
        }

        let mut sum = reference.clone();
        for &frame in rest {
            let coords = self.selected(frame);
            if fit {
                let moved = rmsd_fit(coords, &reference, self.weights()).apply(coords);
                accumulate(&mut sum, &moved);
            } else {
                accumulate(&mut sum, coords);
            }
        }
        let n = members.len() as f64;
        sum.iter_mut().for_each(|x| *x /= n);
        Some(sum)
    }
}

#[inline]
pub(crate) fn accumulate(sum: &mut [Vector3<f64>], coords: &[Vector3<f64>]) {
    for (s, x) in sum.iter_mut().zip(coords) {
        *s += x;
    }
}

/// Options shared by the coordinate metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmsdOptions {
    /// Superpose structures before measuring.
    pub fit: bool,
    /// Weight atoms by mass.
    pub use_mass: bool,
}

impl Default for RmsdOptions {
    fn default() -> Self {
        RmsdOptions {
            fit: true,
            use_mass: false,
        }
    }
}

/// Coordinate RMSD, with or without best-fit superposition.
#[derive(Debug, Clone)]
pub struct RmsdMetric {
    pub(crate) coords: CoordinateSet,
    pub(crate) fit: bool,
}

impl RmsdMetric {
    pub fn new(coords: CoordinateSet, fit: bool) -> Self {
        RmsdMetric { coords, fit }
    }

    pub(crate) fn rmsd(&self, target: &[Vector3<f64>], reference: &[Vector3<f64>]) -> f64 {
        if self.fit {
            rmsd_fit(target, reference, self.coords.weights()).rmsd
        } else {
            rmsd_no_fit(target, reference, self.coords.weights())
        }
    }

    pub fn distance(&self, a: FrameIndex, b: FrameIndex) -> f64 {
        if a == b {
            return 0.0;
        }
        self.rmsd(self.coords.selected(a), self.coords.selected(b))
    }
}

/// Distance-matrix error: RMS difference of all intra-structure atom-pair distances.
///
/// Invariant to rigid motion, so no superposition is involved.
#[derive(Debug, Clone)]
pub struct DmeMetric {
    pub(crate) coords: CoordinateSet,
}

impl DmeMetric {
    pub fn new(coords: CoordinateSet) -> Self {
        DmeMetric { coords }
    }

    pub(crate) fn dme(&self, a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
        let mut sum = 0.0;
        let mut n_pairs = 0usize;
        for (i, j) in (0..a.len()).tuple_combinations() {
            let da = (a[i] - a[j]).norm();
            let db = (b[i] - b[j]).norm();
            sum += (da - db) * (da - db);
            n_pairs += 1;
        }
        if n_pairs == 0 {
            0.0
        } else {
            (sum / n_pairs as f64).sqrt()
        }
    }

    pub fn distance(&self, a: FrameIndex, b: FrameIndex) -> f64 {
        if a == b {
            return 0.0;
        }
        self.dme(self.coords.selected(a), self.coords.selected(b))
    }
}
