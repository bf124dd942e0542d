//! Frame subsampling for the initial distance cache.
//!
//! A [`Sieve`] splits the frames of a run into the *active* set, clustered from
//! the cache, and the *sieved-out* set, assigned afterwards to the nearest
//! cluster. Both selections are reproducible: the regular sieve keeps every
//! `step`-th frame from `offset`, the random sieve draws from a seeded generator.
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{cluster_errors::ClusterError, constants::FrameIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sieve {
    /// Every frame is active.
    #[default]
    None,
    /// Keep frames `offset, offset + step, offset + 2·step, …`.
    Regular { step: usize, offset: usize },
    /// Keep each frame with probability `1/step`, drawn from a generator seeded with `seed`.
    Random { step: usize, seed: u64 },
}

impl Sieve {
    pub fn regular(step: usize) -> Self {
        Sieve::Regular { step, offset: 0 }
    }

    /// Check the sieve parameters against the number of frames.
    pub fn validate(&self, n_frames: usize) -> Result<(), ClusterError> {
        match *self {
            Sieve::None => Ok(()),
            Sieve::Regular { step, offset } => {
                if step == 0 {
                    return Err(ClusterError::InvalidClusterParameter(
                        "sieve step must be at least 1".into(),
                    ));
                }
                if offset >= step || (n_frames > 0 && offset >= n_frames) {
                    return Err(ClusterError::InvalidClusterParameter(format!(
                        "sieve offset {offset} must be below the step ({step}) and the frame count ({n_frames})"
                    )));
                }
                Ok(())
            }
            Sieve::Random { step, .. } => {
                if step == 0 {
                    return Err(ClusterError::InvalidClusterParameter(
                        "sieve step must be at least 1".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Split `0..n_frames` into `(active, sieved_out)`, both ascending.
    ///
    /// The random sieve always keeps at least one frame when `n_frames > 0`.
    pub fn split(&self, n_frames: usize) -> (Vec<FrameIndex>, Vec<FrameIndex>) {
        let mut active = Vec::new();
        let mut rest = Vec::new();
        match *self {
            Sieve::None => active.extend(0..n_frames),
            Sieve::Regular { step, offset } => {
                let step = step.max(1);
                for frame in 0..n_frames {
                    if frame >= offset && (frame - offset) % step == 0 {
                        active.push(frame);
                    } else {
                        rest.push(frame);
                    }
                }
            }
            Sieve::Random { step, seed } => {
                let p = 1.0 / step.max(1) as f64;
                let mut rng = StdRng::seed_from_u64(seed);
                for frame in 0..n_frames {
                    if rng.random_bool(p) {
                        active.push(frame);
                    } else {
                        rest.push(frame);
                    }
                }
                if active.is_empty() && !rest.is_empty() {
                    active.push(rest.remove(0));
                }
            }
        }
        (active, rest)
    }
}

#[cfg(test)]
mod sieve_tests {
    use super::*;

    #[test]
    fn regular_sieve_every_fifth_frame() {
        let (active, rest) = Sieve::regular(5).split(100);
        assert_eq!(active.len(), 20);
        assert_eq!(rest.len(), 80);
        assert!(active.iter().all(|f| f % 5 == 0));

        let (active, _) = Sieve::Regular { step: 3, offset: 2 }.split(10);
        assert_eq!(active, vec![2, 5, 8]);
    }

    #[test]
    fn random_sieve_is_reproducible_and_partitions() {
        let sieve = Sieve::Random { step: 4, seed: 42 };
        let (a1, r1) = sieve.split(200);
        let (a2, r2) = sieve.split(200);
        assert_eq!(a1, a2);
        assert_eq!(r1, r2);
        assert_eq!(a1.len() + r1.len(), 200);
        assert!(!a1.is_empty());
        let mut all: Vec<_> = a1.iter().chain(&r1).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn invalid_parameters() {
        assert!(Sieve::regular(0).validate(10).is_err());
        assert!(Sieve::Regular { step: 3, offset: 3 }.validate(10).is_err());
        assert!(Sieve::Random { step: 0, seed: 1 }.validate(10).is_err());
        assert!(Sieve::regular(5).validate(100).is_ok());
    }
}
