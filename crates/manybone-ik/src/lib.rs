//! Constrained inverse kinematics for bone chains.
//!
//! Solves root-to-tip chains (optionally with extra targets on side branches)
//! by iterated weighted point-set superposition: each joint, effector-first,
//! rotates to best align its effector headings with the target headings using
//! the QCP method, then its [`Kusudama`] constraint pulls the result back
//! inside the allowed cone path and twist range.
//!
//! # Architecture
//!
//! ```text
//! SkeletonSource ──► Chain ──► ChainSolver ──► PoseSink (global overrides)
//!                      ▲
//!                 ConstraintSet
//! ```
//!
//! [`create_task`] is the usual entry point: it builds a [`Chain`] between two
//! bones, attaches constraints and pairs it with a [`ChainSolver`].

pub mod chain;
pub mod constraint;
pub mod math;
pub mod qcp;
pub mod solver;
pub mod task;

pub use chain::{Chain, ChainItem, ChainTarget, Headings, ReturnStep, TargetPriorities};
pub use constraint::{DirectionalConstraint, Kusudama, TwistConstraint};
pub use qcp::{Qcp, QcpConfig};
pub use solver::{ChainSolver, SolveOptions, SolveReport};
pub use task::{create_task, free_task, Task, TaskOptions};
