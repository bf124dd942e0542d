//! Distances over per-frame scalar series (dihedral angles and generic data).
use crate::{
    cluster_errors::ClusterError,
    constants::{FrameIndex, DIHEDRAL_HALF_PERIOD, DIHEDRAL_PERIOD},
    frames::DataSeries,
};

/// Euclidean combination of per-series differences.
///
/// Periodic series contribute `min(|a − b|, 360 − |a − b|)`, other series `|a − b|`.
#[derive(Debug, Clone)]
pub struct SeriesMetric {
    series: Vec<DataSeries>,
}

/// Difference of two angles in degrees, folded into `[0, 180]`.
#[inline]
pub fn periodic_difference(a: f64, b: f64) -> f64 {
    let mut diff = (a - b).abs() % DIHEDRAL_PERIOD;
    if diff > DIHEDRAL_HALF_PERIOD {
        diff = DIHEDRAL_PERIOD - diff;
    }
    diff
}

/// Circular mean of angles in degrees, in `(-180, 180]`.
pub fn circular_mean(angles: impl Iterator<Item = f64>) -> f64 {
    let (sin, cos) = angles.fold((0.0, 0.0), |(s, c), a| {
        let r = a.to_radians();
        (s + r.sin(), c + r.cos())
    });
    sin.atan2(cos).to_degrees()
}

impl SeriesMetric {
    /// Build the metric.
    ///
    /// Arguments
    /// -----------------
    /// * `series`: one or more series of identical length.
    /// * `force_periodic`: treat every series as a dihedral angle.
    ///
    /// Return
    /// ----------
    /// * The metric, or [`ClusterError::Configuration`] if no series is given or the
    ///   series lengths differ.
    pub fn new(mut series: Vec<DataSeries>, force_periodic: bool) -> Result<Self, ClusterError> {
        let Some(first) = series.first() else {
            return Err(ClusterError::Configuration(
                "data metric needs at least one series".into(),
            ));
        };
        let n = first.len();
        if let Some(bad) = series.iter().find(|s| s.len() != n) {
            return Err(ClusterError::Configuration(format!(
                "series '{}' has {} values, expected {n}",
                bad.name,
                bad.len()
            )));
        }
        if force_periodic {
            series.iter_mut().for_each(|s| s.periodic = true);
        }
        Ok(SeriesMetric { series })
    }

    pub fn n_frames(&self) -> usize {
        self.series.first().map_or(0, DataSeries::len)
    }

    pub fn series(&self) -> &[DataSeries] {
        &self.series
    }

    pub fn values(&self, frame: FrameIndex) -> Vec<f64> {
        self.series.iter().map(|s| s.values[frame]).collect()
    }

    /// Distance between two value vectors laid out like [`values`](Self::values).
    pub fn value_distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.series
            .iter()
            .zip(a.iter().zip(b))
            .map(|(s, (&x, &y))| {
                let d = if s.periodic {
                    periodic_difference(x, y)
                } else {
                    (x - y).abs()
                };
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }

    pub fn distance(&self, a: FrameIndex, b: FrameIndex) -> f64 {
        if a == b {
            return 0.0;
        }
        self.series
            .iter()
            .map(|s| {
                let (x, y) = (s.values[a], s.values[b]);
                let d = if s.periodic {
                    periodic_difference(x, y)
                } else {
                    (x - y).abs()
                };
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Per-series mean of the members (circular mean for periodic series).
    pub fn average(&self, members: &[FrameIndex]) -> Option<Vec<f64>> {
        if members.is_empty() {
            return None;
        }
        let n = members.len() as f64;
        Some(
            self.series
                .iter()
                .map(|s| {
                    if s.periodic {
                        circular_mean(members.iter().map(|&m| s.values[m]))
                    } else {
                        members.iter().map(|&m| s.values[m]).sum::<f64>() / n
                    }
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod series_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn periodic_difference_wraps() {
        assert_relative_eq!(periodic_difference(170.0, -170.0), 20.0, epsilon = 1e-12);
        assert_relative_eq!(periodic_difference(10.0, 350.0), 20.0, epsilon = 1e-12);
        assert_relative_eq!(periodic_difference(0.0, 180.0), 180.0, epsilon = 1e-12);
        assert_relative_eq!(periodic_difference(725.0, 5.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn circular_mean_across_the_seam() {
        let mean = circular_mean([170.0, -170.0].into_iter());
        assert_relative_eq!(mean.abs(), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn dihedral_distance_combines_series() {
        let phi = DataSeries::dihedral("phi", vec![-60.0, 120.0, 170.0]);
        let psi = DataSeries::dihedral("psi", vec![-45.0, -45.0, -170.0]);
        let metric = SeriesMetric::new(vec![phi, psi], true).unwrap();
        assert_relative_eq!(metric.distance(0, 1), 180.0, epsilon = 1e-12);
        // phi: 130 ; psi: 125
        assert_relative_eq!(
            metric.distance(0, 2),
            (130.0f64.powi(2) + 125.0f64.powi(2)).sqrt(),
            epsilon = 1e-9
        );
        assert_eq!(metric.distance(2, 2), 0.0);
    }

    #[test]
    fn scalar_distance_is_euclidean() {
        let a = DataSeries::new("a", vec![0.0, 3.0]);
        let b = DataSeries::new("b", vec![0.0, 4.0]);
        let metric = SeriesMetric::new(vec![a, b], false).unwrap();
        assert_relative_eq!(metric.distance(0, 1), 5.0, epsilon = 1e-12);
        assert_eq!(metric.average(&[0, 1]).unwrap(), vec![1.5, 2.0]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let a = DataSeries::new("a", vec![0.0, 3.0]);
        let b = DataSeries::new("b", vec![0.0]);
        assert!(SeriesMetric::new(vec![a, b], false).is_err());
        assert!(SeriesMetric::new(vec![], false).is_err());
    }
}
