//! # Frames, topology and atom selections
//!
//! Read-only views over the data handed in by the trajectory and topology
//! collaborators:
//!
//! * [`Frame`] – one structural snapshot (coordinates + optional per-atom masses),
//! * [`Trajectory`] – the ordered frame collection, indexed by [`FrameIndex`],
//! * [`AtomMask`] – an ordered, deduplicated atom selection,
//! * [`Topology`] – atom count, masses and groups of chemically equivalent atoms,
//! * [`DataSeries`] – a per-frame scalar series (dihedral angles, arbitrary data).
//!
//! Nothing in this module owns any file format: readers live outside the crate
//! and only build these values.
use std::sync::Arc;

use nalgebra::Vector3;

use crate::{
    cluster_errors::ClusterError,
    constants::{AtomIndex, FrameIndex},
};

/// A structural snapshot of the system.
///
/// Fields
/// -----------------
/// * `coords` – atom positions (Å), one entry per atom of the topology.
/// * `masses` – optional per-atom masses, same length as `coords`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub coords: Vec<Vector3<f64>>,
    pub masses: Option<Arc<[f64]>>,
}

impl Frame {
    pub fn new(coords: Vec<Vector3<f64>>) -> Self {
        Frame {
            coords,
            masses: None,
        }
    }

    /// Attach per-atom masses to the frame.
    ///
    /// Return
    /// ----------
    /// * The frame, or [`ClusterError::Configuration`] if the mass count differs from the atom count.
    pub fn with_masses(mut self, masses: Arc<[f64]>) -> Result<Self, ClusterError> {
        if masses.len() != self.coords.len() {
            return Err(ClusterError::Configuration(format!(
                "{} masses given for a frame of {} atoms",
                masses.len(),
                self.coords.len()
            )));
        }
        self.masses = Some(masses);
        Ok(self)
    }

    pub fn n_atoms(&self) -> usize {
        self.coords.len()
    }

    /// Copy the selected atoms, in mask order.
    pub fn select(&self, mask: &AtomMask) -> Vec<Vector3<f64>> {
        mask.iter().map(|&a| self.coords[a]).collect()
    }
}

/// Ordered collection of frames sharing one atom count.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    frames: Vec<Frame>,
}

impl Trajectory {
    /// Build a trajectory, checking that every frame has the same number of atoms.
    pub fn new(frames: Vec<Frame>) -> Result<Self, ClusterError> {
        if let Some(first) = frames.first() {
            let n_atoms = first.n_atoms();
            if let Some((idx, bad)) = frames
                .iter()
                .enumerate()
                .find(|(_, f)| f.n_atoms() != n_atoms)
            {
                return Err(ClusterError::Configuration(format!(
                    "frame {idx} has {} atoms, expected {n_atoms}",
                    bad.n_atoms()
                )));
            }
        }
        Ok(Trajectory { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of atoms per frame (0 for an empty trajectory).
    pub fn n_atoms(&self) -> usize {
        self.frames.first().map_or(0, Frame::n_atoms)
    }

    pub fn frame(&self, idx: FrameIndex) -> Option<&Frame> {
        self.frames.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

impl std::ops::Index<FrameIndex> for Trajectory {
    type Output = Frame;

    fn index(&self, idx: FrameIndex) -> &Frame {
        &self.frames[idx]
    }
}

/// An ordered, deduplicated list of selected atoms.
///
/// Mask *strings* are parsed by the caller; this type only validates the
/// resulting index list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomMask {
    atoms: Vec<AtomIndex>,
}

impl AtomMask {
    /// Build a mask from atom indices.
    ///
    /// Arguments
    /// -----------------
    /// * `atoms`: selected atom indices, in any order, duplicates allowed.
    /// * `n_atoms`: number of atoms in the topology.
    ///
    /// Return
    /// ----------
    /// * A sorted, deduplicated mask, or [`ClusterError::Configuration`] if the
    ///   selection is empty or references an atom outside the topology.
    pub fn new(mut atoms: Vec<AtomIndex>, n_atoms: usize) -> Result<Self, ClusterError> {
        atoms.sort_unstable();
        atoms.dedup();
        if atoms.is_empty() {
            return Err(ClusterError::Configuration(
                "atom mask selects zero atoms".into(),
            ));
        }
        if let Some(&last) = atoms.last() {
            if last >= n_atoms {
                return Err(ClusterError::Configuration(format!(
                    "atom mask selects atom {last} but the topology has {n_atoms} atoms"
                )));
            }
        }
        Ok(AtomMask { atoms })
    }

    /// Select every atom of a topology with `n_atoms` atoms.
    pub fn all(n_atoms: usize) -> Result<Self, ClusterError> {
        Self::new((0..n_atoms).collect(), n_atoms)
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AtomIndex> {
        self.atoms.iter()
    }

    /// Position of a topology atom inside the selection, if selected.
    pub fn position(&self, atom: AtomIndex) -> Option<usize> {
        self.atoms.binary_search(&atom).ok()
    }

    /// Highest selected atom index.
    pub fn max_atom(&self) -> AtomIndex {
        // never empty by construction
        self.atoms[self.atoms.len() - 1]
    }
}

/// Topology facts consumed by the clustering core.
///
/// `equivalent_atoms` lists groups of chemically interchangeable atoms
/// (e.g. the three hydrogens of a methyl group), as derived by the topology
/// collaborator from its bond graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub masses: Vec<f64>,
    pub equivalent_atoms: Vec<Vec<AtomIndex>>,
}

impl Topology {
    pub fn new(masses: Vec<f64>) -> Self {
        Topology {
            masses,
            equivalent_atoms: Vec::new(),
        }
    }

    pub fn with_equivalent_atoms(mut self, groups: Vec<Vec<AtomIndex>>) -> Self {
        self.equivalent_atoms = groups;
        self
    }

    pub fn n_atoms(&self) -> usize {
        self.masses.len()
    }

    /// Masses of the selected atoms, in mask order.
    pub fn selected_masses(&self, mask: &AtomMask) -> Result<Vec<f64>, ClusterError> {
        if mask.max_atom() >= self.masses.len() {
            return Err(ClusterError::Configuration(format!(
                "mask selects atom {} but only {} masses are known",
                mask.max_atom(),
                self.masses.len()
            )));
        }
        Ok(mask.iter().map(|&a| self.masses[a]).collect())
    }
}

/// A named per-frame scalar series.
///
/// `periodic` series hold angles in degrees and are compared modulo 360.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub periodic: bool,
}

impl DataSeries {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        DataSeries {
            name: name.into(),
            values,
            periodic: false,
        }
    }

    pub fn dihedral(name: impl Into<String>, values: Vec<f64>) -> Self {
        DataSeries {
            name: name.into(),
            values,
            periodic: true,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
