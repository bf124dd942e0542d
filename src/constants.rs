//! # Constants and type definitions for trajclust
//!
//! This module centralizes the **numerical tolerances**, **resource limits**, and
//! **common type aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Identifiers for frames and clusters
//! - Floating-point tolerances used by metrics and statistics
//! - Default memory budget of the pairwise distance cache
//! - Period of angular (dihedral) data

// -------------------------------------------------------------------------------------------------
// Numerical constants
// -------------------------------------------------------------------------------------------------

/// Numerical epsilon used for floating-point comparisons on distances
pub const EPS: f64 = 1e-9;

/// Period of dihedral data series, in degrees
pub const DIHEDRAL_PERIOD: f64 = 360.0;

/// Half period of dihedral data series, in degrees
pub const DIHEDRAL_HALF_PERIOD: f64 = DIHEDRAL_PERIOD / 2.0;

/// Default memory budget for the condensed distance cache (4 GiB)
pub const DEFAULT_CACHE_BUDGET_BYTES: usize = 4 * 1024 * 1024 * 1024;

/// Bytes used by one stored pairwise distance
pub const BYTES_PER_DISTANCE: usize = std::mem::size_of::<f32>();

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Stable position of a frame in the trajectory
pub type FrameIndex = usize;

/// Stable identifier of a cluster
pub type ClusterId = usize;

/// Index of an atom in the topology
pub type AtomIndex = usize;
