#![allow(dead_code)]

use std::sync::Arc;

use nalgebra::Vector3;
use trajclust::frames::{DataSeries, Frame, Topology, Trajectory};
use trajclust::metric::MetricInput;

/// Rigid four-atom scaffold used by the coordinate scenarios.
pub fn scaffold() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.5, 0.0, 0.0),
        Vector3::new(1.5, 1.5, 0.0),
        Vector3::new(0.0, 1.5, 0.7),
    ]
}

/// Scaffold with atom 3 pushed along z by `lift` and every atom jittered by `jitter`.
pub fn deformed(lift: f64, jitter: f64) -> Frame {
    let mut coords = scaffold();
    coords[3].z += lift;
    for (i, c) in coords.iter_mut().enumerate() {
        let phase = i as f64 + 1.0;
        c.x += jitter * phase.sin();
        c.y += jitter * phase.cos();
    }
    Frame::new(coords)
}

/// Ten frames: five near the scaffold, five with atom 3 lifted by 3 Å.
pub fn two_state_trajectory() -> Arc<Trajectory> {
    let frames = (0..10)
        .map(|i| {
            let lift = if i < 5 { 0.0 } else { 3.0 };
            deformed(lift, 0.02 * (i % 5) as f64)
        })
        .collect();
    Arc::new(Trajectory::new(frames).unwrap())
}

pub fn coordinates(trajectory: Arc<Trajectory>) -> MetricInput {
    let n_atoms = trajectory.n_atoms();
    MetricInput::Coordinates {
        trajectory,
        topology: Arc::new(Topology::new(vec![1.0; n_atoms])),
    }
}

/// Carbon at the origin with three hydrogens around the z axis.
///
/// `shift` rotates the hydrogen labels: hydrogen `k` sits at the position of
/// hydrogen `(k + shift) % 3` of the unshifted group.
pub fn methyl(shift: usize) -> Frame {
    let h = |k: usize| {
        let angle = std::f64::consts::TAU * k as f64 / 3.0;
        Vector3::new(1.09 * angle.cos(), 1.09 * angle.sin(), -0.36)
    };
    let mut coords = vec![Vector3::new(0.0, 0.0, 0.0)];
    coords.extend((0..3).map(|k| h((k + shift) % 3)));
    Frame::new(coords)
}

pub fn methyl_topology() -> Topology {
    Topology::new(vec![12.011, 1.008, 1.008, 1.008]).with_equivalent_atoms(vec![vec![1, 2, 3]])
}

/// Scalar series of `n` frames cycling through three well separated bands.
pub fn banded_series(n: usize) -> DataSeries {
    let values = (0..n)
        .map(|i| {
            let band = (i % 3) as f64 * 10.0;
            band + 0.01 * (i % 7) as f64
        })
        .collect();
    DataSeries::new("banded", values)
}
