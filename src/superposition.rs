//! # Optimal rigid-body superposition
//!
//! Weighted Kabsch fit of a target coordinate set onto a reference, plus the
//! plain (no-fit) RMSD. Weights are per-atom masses when mass weighting is on,
//! otherwise every atom counts once.
//!
//! The fitted rotation `R` is the proper rotation (det = +1) minimising
//!
//! ```text
//! Σ wᵢ ‖R (tᵢ − c_t) − (rᵢ − c_r)‖²
//! ```
//!
//! where `c_t`, `c_r` are the weighted centers of target and reference. It is
//! obtained from the SVD of the weighted covariance `H = Σ wᵢ (tᵢ − c_t)(rᵢ − c_r)ᵀ`
//! as `R = V Uᵀ`, flipping the last singular vector when `det(V Uᵀ) < 0`.
use nalgebra::{Matrix3, Vector3};

/// Rigid transform mapping a target onto a reference, with the resulting RMSD.
#[derive(Debug, Clone, PartialEq)]
pub struct Superposition {
    pub rotation: Matrix3<f64>,
    pub target_center: Vector3<f64>,
    pub reference_center: Vector3<f64>,
    pub rmsd: f64,
}

impl Superposition {
    /// Move target coordinates into the reference frame.
    pub fn apply(&self, coords: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        coords
            .iter()
            .map(|x| self.rotation * (x - self.target_center) + self.reference_center)
            .collect()
    }
}

#[inline]
fn weight(weights: Option<&[f64]>, i: usize) -> f64 {
    weights.map_or(1.0, |w| w[i])
}

/// Weighted geometric center of a coordinate set.
pub fn weighted_center(coords: &[Vector3<f64>], weights: Option<&[f64]>) -> Vector3<f64> {
    let mut sum = Vector3::zeros();
    let mut total = 0.0;
    for (i, x) in coords.iter().enumerate() {
        let w = weight(weights, i);
        sum += x * w;
        total += w;
    }
    if total > 0.0 {
        sum / total
    } else {
        sum
    }
}

/// RMSD without superposition.
///
/// Arguments
/// -----------------
/// * `target`, `reference`: coordinate sets of equal length.
/// * `weights`: optional per-atom weights (masses).
///
/// Return
/// ----------
/// * `sqrt(Σ wᵢ ‖tᵢ − rᵢ‖² / Σ wᵢ)`, or `0.0` for empty input.
pub fn rmsd_no_fit(
    target: &[Vector3<f64>],
    reference: &[Vector3<f64>],
    weights: Option<&[f64]>,
) -> f64 {
    let mut sum = 0.0;
    let mut total = 0.0;
    for (i, (t, r)) in target.iter().zip(reference).enumerate() {
        let w = weight(weights, i);
        sum += w * (t - r).norm_squared();
        total += w;
    }
    if total > 0.0 {
        (sum / total).max(0.0).sqrt()
    } else {
        0.0
    }
}

/// Best-fit RMSD of `target` onto `reference` (weighted Kabsch).
///
/// Return
/// ----------
/// * The [`Superposition`] carrying the rotation, both centers and the fitted RMSD.
///   If the SVD cannot be computed the identity rotation is used, which reduces to a
///   translation-only fit.
pub fn rmsd_fit(
    target: &[Vector3<f64>],
    reference: &[Vector3<f64>],
    weights: Option<&[f64]>,
) -> Superposition {
    let target_center = weighted_center(target, weights);
    let reference_center = weighted_center(reference, weights);

    let mut h: Matrix3<f64> = Matrix3::zeros();
    for (i, (t, r)) in target.iter().zip(reference).enumerate() {
        let w = weight(weights, i);
        h += (t - target_center) * (r - reference_center).transpose() * w;
    }

    let svd = h.svd(true, true);
    let rotation = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => {
            let r = v_t.transpose() * u.transpose();
            if r.determinant() < 0.0 {
                let mut v_t_adj = v_t;
                v_t_adj.row_mut(2).neg_mut();
                v_t_adj.transpose() * u.transpose()
            } else {
                r
            }
        }
        _ => Matrix3::identity(),
    };

    let mut sum = 0.0;
    let mut total = 0.0;
    for (i, (t, r)) in target.iter().zip(reference).enumerate() {
        let w = weight(weights, i);
        let diff = rotation * (t - target_center) - (r - reference_center);
        sum += w * diff.norm_squared();
        total += w;
    }
    let rmsd = if total > 0.0 {
        (sum / total).max(0.0).sqrt()
    } else {
        0.0
    };

    Superposition {
        rotation,
        target_center,
        reference_center,
        rmsd,
    }
}

#[cfg(test)]
mod superposition_tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn sample() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.5, 0.0, 0.0),
            Vector3::new(1.5, 1.2, 0.0),
            Vector3::new(0.3, 1.0, 2.1),
            Vector3::new(-0.7, 0.4, 1.1),
        ]
    }

    #[test]
    fn rotated_copy_fits_to_zero() {
        let reference = sample();
        let rot = Rotation3::from_euler_angles(0.3, -1.1, 2.0);
        let shift = Vector3::new(4.0, -2.0, 7.5);
        let target: Vec<_> = reference.iter().map(|x| rot * x + shift).collect();

        let fit = rmsd_fit(&target, &reference, None);
        assert_relative_eq!(fit.rmsd, 0.0, epsilon = 1e-9);
        assert_relative_eq!(fit.rotation.determinant(), 1.0, epsilon = 1e-9);

        let moved = fit.apply(&target);
        for (m, r) in moved.iter().zip(&reference) {
            assert_relative_eq!(*m, *r, epsilon = 1e-9);
        }
        assert!(rmsd_no_fit(&target, &reference, None) > 1.0);
    }

    #[test]
    fn mirror_image_is_not_fitted_by_reflection() {
        let reference = sample();
        let mirrored: Vec<_> = reference
            .iter()
            .map(|x| Vector3::new(x.x, x.y, -x.z))
            .collect();
        let fit = rmsd_fit(&mirrored, &reference, None);
        assert_relative_eq!(fit.rotation.determinant(), 1.0, epsilon = 1e-9);
        assert!(fit.rmsd > 1e-3);
    }

    #[test]
    fn mass_weighting_matches_manual_value() {
        let a = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)];
        let b = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 2.0, 0.0)];
        let masses = [3.0, 1.0];
        // (3*0 + 1*4) / 4 = 1
        assert_relative_eq!(rmsd_no_fit(&a, &b, Some(&masses[..])), 1.0, epsilon = 1e-12);
        assert_relative_eq!(rmsd_no_fit(&a, &b, None), 2.0_f64.sqrt(), epsilon = 1e-12);
    }
}
