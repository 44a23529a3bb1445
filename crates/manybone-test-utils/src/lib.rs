//! Shared test fixtures and utilities for manybone crates.
//!
//! Provides deterministic RNG setup, random geometry for numerical tests and
//! canned skeletons for chain and solver tests.

pub mod fixtures;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{branched_skeleton, single_bone, two_link_arm, z_offset};
pub use rng::{random_points, random_rotation, seeded_rng};
