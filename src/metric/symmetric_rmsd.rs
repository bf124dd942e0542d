//! Symmetry-corrected RMSD.
//!
//! The comparison of a target with a reference runs in three steps:
//!
//! 1. with fitting on, superpose the target on the reference;
//! 2. for every symmetric group, relabel the target atoms with the
//!    minimum-cost [`Correspondence`];
//! 3. measure the RMSD of the relabelled target, re-fitting when fitting is on.
//!
//! The correspondence depends on the pair being compared, so the resulting
//! distance does not satisfy the triangle inequality.
use nalgebra::Vector3;

use crate::{
    assignment::{Correspondence, SymmetricAssignment},
    constants::FrameIndex,
    frames::Frame,
    superposition::{rmsd_fit, rmsd_no_fit, weighted_center},
};

use super::coordinates::{accumulate, CoordinateSet};

/// Outcome of one symmetry-corrected comparison.
#[derive(Debug, Clone)]
pub struct SymmetricMatch {
    pub rmsd: f64,
    pub correspondence: Correspondence,
    /// Target relabelled by the correspondence, expressed in the reference frame.
    pub aligned: Vec<Vector3<f64>>,
}

#[derive(Debug, Clone)]
pub struct SymmetricRmsdMetric {
    pub(crate) coords: CoordinateSet,
    pub(crate) assignment: SymmetricAssignment,
    pub(crate) fit: bool,
}

impl SymmetricRmsdMetric {
    pub fn new(coords: CoordinateSet, assignment: SymmetricAssignment, fit: bool) -> Self {
        SymmetricRmsdMetric {
            coords,
            assignment,
            fit,
        }
    }

    /// Compare `target` against `reference` with symmetry correction.
    pub fn compare(&self, target: &[Vector3<f64>], reference: &[Vector3<f64>]) -> SymmetricMatch {
        let weights = self.coords.weights();
        let moved = if self.fit {
            rmsd_fit(target, reference, weights).apply(target)
        } else {
            target.to_vec()
        };

        let correspondence = self.assignment.correspondence(&moved, reference);
        let remapped = correspondence.apply(&moved);

        let (rmsd, aligned) = if self.fit {
            let sup = rmsd_fit(&remapped, reference, weights);
            let aligned = sup.apply(&remapped);
            (sup.rmsd, aligned)
        } else {
            let rmsd = rmsd_no_fit(&remapped, reference, weights);
            (rmsd, remapped)
        };

        SymmetricMatch {
            rmsd,
            correspondence,
            aligned,
        }
    }

    pub fn distance(&self, a: FrameIndex, b: FrameIndex) -> f64 {
        if a == b {
            return 0.0;
        }
        self.compare(self.coords.selected(a), self.coords.selected(b))
            .rmsd
    }

    /// Average of the members after relabelling each onto the first member.
    pub fn average(&self, members: &[FrameIndex]) -> Option<Vec<Vector3<f64>>> {
        let (&first, rest) = members.split_first()?;
        let mut reference = self.coords.selected(first).to_vec();
        if self.fit {
            let center = weighted_center(&reference, self.coords.weights());
            reference.iter_mut().for_each(|x| *x -= center);
        }

        let mut sum = reference.clone();
        for &frame in rest {
            let matched = self.compare(self.coords.selected(frame), &reference);
            accumulate(&mut sum, &matched.aligned);
        }
        let n = members.len() as f64;
        sum.iter_mut().for_each(|x| *x /= n);
        Some(sum)
    }

    /// Copy of a full frame whose selected atoms are relabelled to best match `reference`.
    ///
    /// Only atom labels change; coordinates stay in the frame's own reference system.
    pub fn remap_frame(&self, frame: FrameIndex, reference: &[Vector3<f64>]) -> Option<Frame> {
        let full = self.coords.full_frame(frame)?;
        let matched = self.compare(self.coords.selected(frame), reference);
        let mask: Vec<usize> = self.coords.mask().iter().copied().collect();

        let mut remapped = full.clone();
        for (r, &t) in matched.correspondence.as_slice().iter().enumerate() {
            remapped.coords[mask[r]] = full.coords[mask[t]];
        }
        Some(remapped)
    }
}

#[cfg(test)]
mod symmetric_rmsd_tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        assignment::derive_groups,
        frames::{AtomMask, Topology, Trajectory},
    };

    fn ethane_like() -> Vec<Vector3<f64>> {
        let mut coords = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.5, 0.0, 0.0)];
        for k in 0..3 {
            let a = 2.0 * std::f64::consts::PI * k as f64 / 3.0 + 0.2;
            coords.push(Vector3::new(-0.4, a.cos(), a.sin()));
        }
        coords
    }

    fn metric(frames: Vec<Vec<Vector3<f64>>>, fit: bool) -> SymmetricRmsdMetric {
        let traj = Arc::new(Trajectory::new(frames.into_iter().map(Frame::new).collect()).unwrap());
        let topology = Topology::new(vec![12.0, 12.0, 1.0, 1.0, 1.0])
            .with_equivalent_atoms(vec![vec![2, 3, 4]]);
        let mask = AtomMask::all(5).unwrap();
        let groups = derive_groups(&topology, &mask).unwrap();
        let coords = CoordinateSet::new(traj, &topology, mask, false).unwrap();
        SymmetricRmsdMetric::new(coords, SymmetricAssignment::new(groups), fit)
    }

    #[test]
    fn swapped_hydrogens_give_zero_with_and_without_fit() {
        let reference = ethane_like();
        let mut swapped = reference.clone();
        swapped.swap(2, 4);
        for fit in [false, true] {
            let m = metric(vec![reference.clone(), swapped.clone()], fit);
            assert_relative_eq!(m.distance(0, 1), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn remapped_frame_restores_reference_labels() {
        let reference = ethane_like();
        let mut swapped = reference.clone();
        swapped.swap(3, 4);
        let m = metric(vec![reference.clone(), swapped], false);
        let remapped = m.remap_frame(1, &reference).unwrap();
        for (a, b) in remapped.coords.iter().zip(&reference) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn average_of_relabelled_copies_is_the_structure() {
        let reference = ethane_like();
        let mut swapped = reference.clone();
        swapped.swap(2, 3);
        let m = metric(vec![reference.clone(), swapped], false);
        let avg = m.average(&[0, 1]).unwrap();
        for (a, b) in avg.iter().zip(&reference) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }
}
