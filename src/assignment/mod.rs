//! # Symmetric atom assignment
//!
//! Atoms of a [`SymmetricAtomGroup`] (e.g. the three hydrogens of a methyl group,
//! the two oxygens of a carboxylate) can be relabelled without changing the
//! chemistry, so comparing two structures atom-by-atom is only meaningful after
//! choosing the relabelling that brings them closest. This module finds it.
//!
//! For every group of size `m` an `m × m` cost matrix of squared distances
//! between reference atom `r` and target atom `t` is solved with the
//! [`Hungarian`](hungarian::Hungarian) algorithm. The union of the per-group
//! assignments, identity elsewhere, is the [`Correspondence`].
//!
//! Behaviour worth knowing
//! -----------------
//! * The correspondence is recomputed for every compared pair of structures;
//!   nothing is shared between pairs, so the resulting distance is not a metric.
//! * A group whose identity labelling already costs zero is not solved.
//! * A group with a non-finite cost keeps the identity labelling and a warning is
//!   emitted; the comparison goes on.
//! * Ties are resolved by the solver's fixed rule (lowest column first), so the
//!   correspondence is reproducible bit for bit.
use nalgebra::Vector3;
use smallvec::SmallVec;
use tracing::warn;

use crate::{
    cluster_errors::ClusterError,
    constants::EPS,
    frames::{AtomMask, Topology},
};

pub mod hungarian;

use hungarian::{CostMatrix, Hungarian};

/// A disjoint set of interchangeable atoms, as positions in the mask-selected atom list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricAtomGroup {
    atoms: SmallVec<[usize; 4]>,
}

impl SymmetricAtomGroup {
    pub fn atoms(&self) -> &[usize] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

/// Derive the symmetric groups restricted to a selection.
///
/// Atoms of an equivalence group that the mask does not select are dropped, and
/// groups left with fewer than two atoms are ignored.
///
/// Arguments
/// -----------------
/// * `topology`: provides the groups of equivalent atoms (topology indices).
/// * `mask`: the atom selection the distance is computed on.
///
/// Return
/// ----------
/// * The groups, expressed as positions inside `mask`.
/// * [`ClusterError::Configuration`] if a group lists fewer than two atoms,
///   references an atom outside the topology, repeats an atom, or overlaps with
///   another group.
pub fn derive_groups(
    topology: &Topology,
    mask: &AtomMask,
) -> Result<Vec<SymmetricAtomGroup>, ClusterError> {
    let n_atoms = topology.n_atoms().max(mask.max_atom() + 1);
    let mut owner: Vec<Option<usize>> = vec![None; n_atoms];
    let mut groups = Vec::new();

    for (gidx, group) in topology.equivalent_atoms.iter().enumerate() {
        if group.len() < 2 {
            return Err(ClusterError::Configuration(format!(
                "symmetric group {gidx} lists {} atom(s), at least 2 are needed",
                group.len()
            )));
        }
        let mut selected: SmallVec<[usize; 4]> = SmallVec::new();
        for &atom in group {
            if atom >= n_atoms {
                return Err(ClusterError::Configuration(format!(
                    "symmetric group {gidx} references atom {atom} outside the topology"
                )));
            }
            match owner[atom] {
                Some(other) if other == gidx => {
                    return Err(ClusterError::Configuration(format!(
                        "symmetric group {gidx} lists atom {atom} twice"
                    )));
                }
                Some(other) => {
                    return Err(ClusterError::Configuration(format!(
                        "atom {atom} belongs to symmetric groups {other} and {gidx}"
                    )));
                }
                None => owner[atom] = Some(gidx),
            }
            if let Some(pos) = mask.position(atom) {
                selected.push(pos);
            }
        }
        if selected.len() >= 2 {
            selected.sort_unstable();
            groups.push(SymmetricAtomGroup { atoms: selected });
        }
    }
    Ok(groups)
}

/// Relabelling of selected atoms: `map[r]` is the target atom matched with reference atom `r`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correspondence {
    map: Vec<usize>,
}

impl Correspondence {
    pub fn identity(n: usize) -> Self {
        Correspondence {
            map: (0..n).collect(),
        }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.map
    }

    pub fn is_identity(&self) -> bool {
        self.map.iter().enumerate().all(|(i, &j)| i == j)
    }

    /// Reorder target coordinates so that entry `r` is the atom matched with reference atom `r`.
    pub fn apply(&self, target: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        self.map.iter().map(|&t| target[t]).collect()
    }

    /// True when the correspondence maps `group` onto itself bijectively.
    pub fn is_bijection_on(&self, group: &SymmetricAtomGroup) -> bool {
        let mut images: SmallVec<[usize; 4]> = group.atoms().iter().map(|&a| self.map[a]).collect();
        images.sort_unstable();
        images.as_slice() == group.atoms()
    }
}

/// Solver of the symmetric correspondence for one set of groups.
#[derive(Debug, Clone, Default)]
pub struct SymmetricAssignment {
    groups: Vec<SymmetricAtomGroup>,
}

impl SymmetricAssignment {
    pub fn new(groups: Vec<SymmetricAtomGroup>) -> Self {
        SymmetricAssignment { groups }
    }

    pub fn groups(&self) -> &[SymmetricAtomGroup] {
        &self.groups
    }

    /// Optimal correspondence of `target` onto `reference`.
    ///
    /// Arguments
    /// -----------------
    /// * `target`, `reference`: selected coordinates, same length, already in a
    ///   common frame (superposed when fitting is on).
    ///
    /// Return
    /// ----------
    /// * The [`Correspondence`] minimising, group by group, the summed squared
    ///   distances between matched atoms.
    pub fn correspondence(
        &self,
        target: &[Vector3<f64>],
        reference: &[Vector3<f64>],
    ) -> Correspondence {
        let mut correspondence = Correspondence::identity(reference.len());
        let mut solver = Hungarian::new();
        let mut cost = CostMatrix::zeros(0);

        for group in &self.groups {
            let atoms = group.atoms();
            let identity_cost: f64 = atoms
                .iter()
                .map(|&a| (reference[a] - target[a]).norm_squared())
                .sum();
            if identity_cost <= EPS {
                continue;
            }

            cost.fill(atoms.len(), |r, t| {
                (reference[atoms[r]] - target[atoms[t]]).norm_squared()
            });
            match solver.solve(&cost) {
                Some(assignment) => {
                    for (r, &t) in assignment.iter().enumerate() {
                        correspondence.map[atoms[r]] = atoms[t];
                    }
                }
                None => {
                    warn!(
                        group_size = atoms.len(),
                        "degenerate symmetric assignment, keeping identity labelling"
                    );
                }
            }
        }
        correspondence
    }
}

#[cfg(test)]
mod assignment_tests {
    use super::*;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    fn methyl(shift: f64) -> Vec<Vector3<f64>> {
        let angle = |k: f64| 2.0 * std::f64::consts::PI * k / 3.0;
        let mut coords = vec![Vector3::new(shift, 0.0, 0.0)];
        for k in 0..3 {
            let a = angle(k as f64);
            coords.push(Vector3::new(shift + 0.36, a.cos(), a.sin()));
        }
        coords
    }

    #[test]
    fn groups_are_restricted_to_mask_positions() {
        let topology = Topology::new(vec![12.0, 1.0, 1.0, 1.0, 16.0])
            .with_equivalent_atoms(vec![vec![1, 2, 3]]);
        let mask = AtomMask::new(vec![0, 2, 3, 4], 5).unwrap();
        let groups = derive_groups(&topology, &mask).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].atoms(), &[1, 2]);

        let mask = AtomMask::new(vec![0, 3], 5).unwrap();
        assert!(derive_groups(&topology, &mask).unwrap().is_empty());
    }

    #[test]
    fn single_atom_group_is_rejected() {
        let topology = Topology::new(vec![1.0; 4]).with_equivalent_atoms(vec![vec![2]]);
        let mask = AtomMask::all(4).unwrap();
        assert!(matches!(
            derive_groups(&topology, &mask),
            Err(ClusterError::Configuration(_))
        ));
    }

    #[test]
    fn overlapping_groups_are_rejected() {
        let topology = Topology::new(vec![1.0; 5])
            .with_equivalent_atoms(vec![vec![0, 1], vec![1, 2]]);
        let mask = AtomMask::all(5).unwrap();
        assert!(matches!(
            derive_groups(&topology, &mask),
            Err(ClusterError::Configuration(_))
        ));
    }

    #[test]
    fn cyclic_permutation_is_undone() {
        let reference = methyl(0.0);
        // target hydrogens 1,2,3 hold the positions of reference hydrogens 2,3,1
        let target = vec![reference[0], reference[2], reference[3], reference[1]];
        let topology = Topology::new(vec![12.0, 1.0, 1.0, 1.0])
            .with_equivalent_atoms(vec![vec![1, 2, 3]]);
        let groups = derive_groups(&topology, &AtomMask::all(4).unwrap()).unwrap();
        let assignment = SymmetricAssignment::new(groups.clone());

        let corr = assignment.correspondence(&target, &reference);
        assert_eq!(corr.as_slice(), &[0, 3, 1, 2]);
        assert!(corr.is_bijection_on(&groups[0]));
        let remapped = corr.apply(&target);
        for (a, b) in remapped.iter().zip(&reference) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn random_structures_map_each_group_onto_itself() {
        let mut rng = StdRng::seed_from_u64(11);
        let topology = Topology::new(vec![1.0; 9])
            .with_equivalent_atoms(vec![vec![1, 2, 3], vec![5, 6], vec![7, 8, 4]]);
        let groups = derive_groups(&topology, &AtomMask::all(9).unwrap()).unwrap();
        let assignment = SymmetricAssignment::new(groups.clone());

        for _ in 0..50 {
            let reference: Vec<Vector3<f64>> = (0..9)
                .map(|_| Vector3::from_fn(|_, _| rng.random_range(-2.0..2.0)))
                .collect();
            let mut target: Vec<Vector3<f64>> = (0..9)
                .map(|_| Vector3::from_fn(|_, _| rng.random_range(-2.0..2.0)))
                .collect();
            target.shuffle(&mut rng);

            let corr = assignment.correspondence(&target, &reference);
            for group in &groups {
                assert!(corr.is_bijection_on(group), "{:?}", corr.as_slice());
            }
            // atoms outside every group keep their label
            assert_eq!(corr.as_slice()[0], 0);
            let before: f64 = (0..9).map(|a| (reference[a] - target[a]).norm_squared()).sum();
            let after: f64 = corr
                .apply(&target)
                .iter()
                .zip(&reference)
                .map(|(t, r)| (r - t).norm_squared())
                .sum();
            assert!(after <= before + 1e-9);
        }
    }

    #[test]
    fn already_matching_structure_keeps_identity() {
        let reference = methyl(1.0);
        let topology = Topology::new(vec![1.0; 4]).with_equivalent_atoms(vec![vec![1, 2, 3]]);
        let groups = derive_groups(&topology, &AtomMask::all(4).unwrap()).unwrap();
        let corr = SymmetricAssignment::new(groups).correspondence(&reference, &reference);
        assert!(corr.is_identity());
    }

    #[test]
    fn non_finite_coordinates_fall_back_to_identity() {
        let reference = methyl(0.0);
        let mut target = methyl(0.5);
        target[2] = Vector3::new(f64::NAN, 0.0, 0.0);
        let topology = Topology::new(vec![1.0; 4]).with_equivalent_atoms(vec![vec![1, 2, 3]]);
        let groups = derive_groups(&topology, &AtomMask::all(4).unwrap()).unwrap();
        let corr = SymmetricAssignment::new(groups).correspondence(&target, &reference);
        assert!(corr.is_identity());
    }
}
