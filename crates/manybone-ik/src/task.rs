//! Caller-facing task boundary.
//!
//! A [`Task`] owns a [`Chain`] and the solver scratch state for one root/tip
//! pair. Build it with [`create_task`], move its goal with [`Task::set_goal`],
//! call [`Task::solve`] once per animation update and drop it (or pass it to
//! [`free_task`]) when done.

use nalgebra::{Isometry3, Vector3};
use tracing::{debug, warn};

use manybone_core::{BoneId, ConstraintSet, IkError, PoseSink, SkeletonSource, SolverConfig};

use crate::chain::Chain;
use crate::solver::{ChainSolver, SolveOptions, SolveReport};

/// Build-time options for [`create_task`].
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Per-iteration dampening in radians. Negative uses the chain default.
    pub dampening: f64,
    /// Stabilization passes per joint. Negative uses the chain default.
    pub stabilization_passes: i32,
    /// Per-bone constraint records.
    pub constraints: Option<ConstraintSet>,
    pub config: SolverConfig,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            dampening: -1.0,
            stabilization_passes: -1,
            constraints: None,
            config: SolverConfig::default(),
        }
    }
}

/// One solvable root/tip chain.
#[derive(Debug, Clone)]
pub struct Task {
    root: BoneId,
    tip: BoneId,
    goal: Isometry3<f64>,
    chain: Chain,
    solver: ChainSolver,
}

/// Build a task from `source` between `root` and `tip`.
///
/// Nothing is built unless every step succeeds; rejected builds are logged.
///
/// # Errors
///
/// Any [`IkError`] raised while validating the configuration, building the
/// chain or attaching constraints.
pub fn create_task<S: SkeletonSource + ?Sized>(
    source: &S,
    root: BoneId,
    tip: BoneId,
    goal: Isometry3<f64>,
    options: &TaskOptions,
) -> Result<Task, IkError> {
    Task::build(source, root, tip, goal, options).inspect_err(|e| {
        warn!(root = %root, tip = %tip, error = %e, "Rejected IK task");
    })
}

/// Release a task and its chain.
pub fn free_task(task: Task) {
    debug!(root = %task.root, tip = %task.tip, "Freed IK task");
    drop(task);
}

impl Task {
    fn build<S: SkeletonSource + ?Sized>(
        source: &S,
        root: BoneId,
        tip: BoneId,
        goal: Isometry3<f64>,
        options: &TaskOptions,
    ) -> Result<Self, IkError> {
        options.config.validate()?;
        let mut chain = Chain::new(source, root, tip, goal, &options.config)?;
        if options.dampening >= 0.0 {
            chain.set_dampening(options.dampening);
        }
        if let Ok(passes) = u32::try_from(options.stabilization_passes) {
            chain.set_stabilization_passes(passes);
        }
        if let Some(constraints) = &options.constraints {
            chain.apply_constraints(source, constraints)?;
        }
        Ok(Self {
            root,
            tip,
            goal,
            chain,
            solver: ChainSolver::new(options.config.clone()),
        })
    }

    pub const fn root(&self) -> BoneId {
        self.root
    }

    pub const fn tip(&self) -> BoneId {
        self.tip
    }

    pub const fn goal(&self) -> &Isometry3<f64> {
        &self.goal
    }

    pub const fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Mutable chain access for extra targets, priorities and constraints.
    pub fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    /// Move the tip goal without rebuilding the chain.
    pub fn set_goal(&mut self, goal: Isometry3<f64>) {
        self.goal = goal;
        self.chain.set_goal(0, goal);
    }

    /// Run one solve against `host` and write the resulting global poses to it.
    ///
    /// `blending_delta` at or below the configured threshold (0.01 by
    /// default) leaves `host` untouched.
    pub fn solve<H>(
        &mut self,
        host: &mut H,
        blending_delta: f64,
        override_tip_basis: bool,
        magnet: Option<Vector3<f64>>,
    ) -> SolveReport
    where
        H: SkeletonSource + PoseSink + ?Sized,
    {
        let options = SolveOptions {
            blending_delta,
            override_tip_basis,
            use_magnet: magnet.is_some(),
            magnet_position: magnet.unwrap_or_else(Vector3::zeros),
        };
        self.solver.solve(&mut self.chain, host, &options)
    }

    /// Like [`Task::solve`] with explicit options.
    pub fn solve_with<H>(&mut self, host: &mut H, options: &SolveOptions) -> SolveReport
    where
        H: SkeletonSource + PoseSink + ?Sized,
    {
        self.solver.solve(&mut self.chain, host, options)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use manybone_core::{ConfigError, JointConstraintConfig};
    use manybone_test_utils::two_link_arm;

    fn ids(skeleton: &manybone_core::Skeleton) -> (BoneId, BoneId) {
        (
            skeleton.find_bone("base").unwrap(),
            skeleton.find_bone("tip").unwrap(),
        )
    }

    #[test]
    fn negative_overrides_keep_defaults() {
        let skeleton = two_link_arm();
        let (root, tip) = ids(&skeleton);
        let task = create_task(&skeleton, root, tip, Isometry3::identity(), &TaskOptions::default()).unwrap();
        let defaults = SolverConfig::default();
        assert_relative_eq!(task.chain().dampening(), defaults.default_dampening);
        assert_eq!(task.chain().stabilization_passes(), defaults.stabilization_passes);
    }

    #[test]
    fn explicit_overrides_apply() {
        let skeleton = two_link_arm();
        let (root, tip) = ids(&skeleton);
        let options = TaskOptions {
            dampening: 0.3,
            stabilization_passes: 0,
            ..TaskOptions::default()
        };
        let task = create_task(&skeleton, root, tip, Isometry3::identity(), &options).unwrap();
        assert_relative_eq!(task.chain().dampening(), 0.3);
        assert_eq!(task.chain().stabilization_passes(), 0);
        assert_relative_eq!(task.chain().items()[1].dampening(), 0.3);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let skeleton = two_link_arm();
        let (root, tip) = ids(&skeleton);
        let mut options = TaskOptions::default();
        options.config.iterations = 0;
        let err = create_task(&skeleton, root, tip, Isometry3::identity(), &options).unwrap_err();
        assert!(matches!(err, IkError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn bad_constraints_reject_the_whole_task() {
        let skeleton = two_link_arm();
        let (root, tip) = ids(&skeleton);
        let options = TaskOptions {
            constraints: Some(ConstraintSet::new().with(JointConstraintConfig::new("nope"))),
            ..TaskOptions::default()
        };
        let err = create_task(&skeleton, root, tip, Isometry3::identity(), &options).unwrap_err();
        assert!(matches!(err, IkError::UnknownBone(_)));
    }

    #[test]
    fn set_goal_updates_the_tip_target() {
        let skeleton = two_link_arm();
        let (root, tip) = ids(&skeleton);
        let mut task = create_task(&skeleton, root, tip, Isometry3::identity(), &TaskOptions::default()).unwrap();
        let goal = Isometry3::translation(0.1, 0.2, 0.3);
        task.set_goal(goal);
        assert_eq!(task.goal(), &goal);
        assert_eq!(task.chain().targets()[0].goal, goal);
        free_task(task);
    }
}
