//! Iterative QCP solve driver.
//!
//! Each outer iteration visits the chain's joints effector-first. A joint
//! aligns its effector headings with its target headings through one QCP
//! superposition, the rotation is clamped to the joint's dampening and applied
//! in the joint's local frame, and the constraint is enforced right away.
//! Stabilization passes retry joints whose step did not reduce the residual,
//! adding the soft return-to-rest correction and keeping the better pose.

use nalgebra::{Isometry3, Translation3, Vector3};
use tracing::{debug, trace};

use manybone_core::{PoseSink, SkeletonSource, SolverConfig};

use crate::chain::{Chain, Headings};
use crate::math::clamp_to_cos_half_angle;
use crate::qcp::{weighted_msd, Qcp, QcpConfig};

/// Per-call solve parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOptions {
    /// How much of the new goal to blend in, from the effector's current pose.
    pub blending_delta: f64,
    /// Give tip joints the goal orientation in the final poses.
    pub override_tip_basis: bool,
    /// Before iterating, swing the middle joint of the chain toward
    /// `magnet_position` to pick the side the chain bends to.
    pub use_magnet: bool,
    pub magnet_position: Vector3<f64>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            blending_delta: 1.0,
            override_tip_basis: false,
            use_magnet: false,
            magnet_position: Vector3::zeros(),
        }
    }
}

/// Outcome of one solve call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    /// The blending delta was at or below the threshold; nothing was touched.
    pub skipped: bool,
    /// Outer iterations run.
    pub iterations: u32,
    /// Root-mean-square heading residual seen from the chain root.
    pub rmsd: f64,
    /// Largest distance from an enabled target's goal to its effector.
    pub effector_error: f64,
    /// Stabilization passes that applied a return-to-rest correction.
    pub soft_returns: u32,
}

impl SolveReport {
    const fn skipped() -> Self {
        Self {
            skipped: true,
            iterations: 0,
            rmsd: 0.0,
            effector_error: 0.0,
            soft_returns: 0,
        }
    }
}

/// Runs solves for any number of chains; owns only scratch state.
#[derive(Debug, Clone)]
pub struct ChainSolver {
    config: SolverConfig,
    qcp: Qcp,
    headings: Headings,
    soft_returns: u32,
}

impl ChainSolver {
    pub fn new(config: SolverConfig) -> Self {
        let qcp = Qcp::new(QcpConfig {
            eval_precision: config.qcp_eval_precision,
            evec_precision: config.qcp_evec_precision,
            max_iterations: config.qcp_max_iterations,
        });
        Self {
            config,
            qcp,
            headings: Headings::default(),
            soft_returns: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SolverConfig::default())
    }

    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve `chain` against the current pose of `host` and write the final
    /// global poses back to it.
    pub fn solve<H>(&mut self, chain: &mut Chain, host: &mut H, options: &SolveOptions) -> SolveReport
    where
        H: SkeletonSource + PoseSink + ?Sized,
    {
        if options.blending_delta <= self.config.blend_threshold {
            debug!(blending_delta = options.blending_delta, "Skipping IK solve");
            return SolveReport::skipped();
        }

        chain.refresh_from(&*host);
        blend_goals(chain, options.blending_delta.min(1.0));

        if options.use_magnet {
            if let Some(mid) = magnet_item(chain) {
                self.pull_toward(chain, mid, &options.magnet_position);
            }
        }

        self.soft_returns = 0;
        let order = chain.effector_first_order();
        let iterations = chain.iterations();
        for iteration in 0..iterations {
            for &item in &order {
                self.update_joint(chain, item, iteration as usize);
            }
            trace!(iteration, rmsd = self.residual(chain), "IK iteration");
        }

        if options.override_tip_basis {
            override_tips(chain);
        }
        for item in chain.items() {
            host.set_global_pose_override(item.bone(), *item.global());
        }

        let report = SolveReport {
            skipped: false,
            iterations,
            rmsd: self.residual(chain),
            effector_error: effector_error(chain),
            soft_returns: self.soft_returns,
        };
        debug!(
            iterations = report.iterations,
            rmsd = report.rmsd,
            effector_error = report.effector_error,
            "IK solve finished"
        );
        report
    }

    /// Solve one joint, then run its stabilization passes.
    fn update_joint(&mut self, chain: &mut Chain, item: usize, iteration: usize) {
        if chain.items()[item].is_orientation_locked() {
            return;
        }
        chain.fill_headings(item, &mut self.headings);
        if self.headings.is_empty() {
            return;
        }
        let baseline = self.current_msd();

        self.step(chain, item, None);
        let mut current = self.msd_at(chain, item);

        let passes = chain.stabilization_passes();
        for pass in 0..passes {
            if current < baseline {
                break;
            }
            let saved = *chain.items()[item].local();
            let ratio = f64::from(pass + 1) / f64::from(passes);
            if self.step(chain, item, Some((iteration, ratio))) {
                self.soft_returns += 1;
            }
            let candidate = self.msd_at(chain, item);
            if candidate < current {
                current = candidate;
            } else {
                chain.item_mut(item).restore_local(saved);
                chain.update_globals_from(item);
            }
        }
    }

    /// One QCP step on `item`: clamp, apply locally, optionally soften, snap.
    ///
    /// Returns whether a return-to-rest correction was applied.
    fn step(&mut self, chain: &mut Chain, item: usize, soft: Option<(usize, f64)>) -> bool {
        chain.fill_headings(item, &mut self.headings);
        if self.headings.is_empty() {
            return false;
        }
        let translate = self.config.translate_root && chain.items()[item].parent().is_none();
        self.qcp.set(
            &self.headings.effector,
            &self.headings.target,
            Some(&self.headings.weights),
            translate,
        );
        let rotation = clamp_to_cos_half_angle(&self.qcp.rotation(), chain.items()[item].cos_half_dampen());
        let parent_rotation = chain.parent_rotation(item);
        let local_delta = parent_rotation.inverse() * rotation * parent_rotation;

        let joint = chain.item_mut(item);
        joint.set_local_rotation(local_delta * joint.local().rotation);
        if translate {
            joint.translate_local(parent_rotation.inverse() * self.qcp.translation());
        }

        let softened = soft.and_then(|(iteration, ratio)| {
            let kusudama = joint.constraint()?;
            let schedule = joint.returnful_schedule();
            let step = schedule.get(iteration.min(schedule.len().checked_sub(1)?))?;
            let angle = step.angle * ratio;
            let cos_half = if ratio >= 1.0 {
                step.cos_half
            } else {
                (angle * 0.5).cos()
            };
            Some(kusudama.set_axes_to_returnful(&joint.limited_rotation(), cos_half, angle))
        });
        let soft_applied = softened.is_some();
        if let Some(rotation) = softened {
            joint.set_limited_rotation(rotation);
        }
        joint.snap_to_limits();
        chain.update_globals_from(item);
        soft_applied
    }

    /// Rotate the joints above `mid` so `mid` moves toward `magnet`, each by at
    /// most its dampening.
    fn pull_toward(&mut self, chain: &mut Chain, mid: usize, magnet: &Vector3<f64>) {
        let path = chain.path_to_root(mid);
        for &joint in path.iter().skip(1) {
            if chain.items()[joint].is_orientation_locked() {
                continue;
            }
            let origin = chain.items()[joint].global().translation.vector;
            let moved = chain.items()[mid].global().translation.vector - origin;
            let rotation = self.qcp.weighted_superpose(&[moved], &[magnet - origin], None, false);
            let rotation = clamp_to_cos_half_angle(&rotation, chain.items()[joint].cos_half_dampen());
            let parent_rotation = chain.parent_rotation(joint);
            let local_delta = parent_rotation.inverse() * rotation * parent_rotation;
            let item = chain.item_mut(joint);
            item.set_local_rotation(local_delta * item.local().rotation);
            item.snap_to_limits();
            chain.update_globals_from(joint);
        }
    }

    fn current_msd(&self) -> f64 {
        weighted_msd(&self.headings.effector, &self.headings.target, &self.headings.weights)
    }

    fn msd_at(&mut self, chain: &Chain, item: usize) -> f64 {
        chain.fill_headings(item, &mut self.headings);
        self.current_msd()
    }

    fn residual(&mut self, chain: &Chain) -> f64 {
        if chain.is_empty() {
            return 0.0;
        }
        self.msd_at(chain, 0).sqrt()
    }
}

/// Blend every target's goal from its effector's current pose.
fn blend_goals(chain: &mut Chain, blend: f64) {
    let goals = chain
        .targets()
        .iter()
        .map(|target| {
            if blend >= 1.0 {
                return target.goal;
            }
            let effector = chain.items()[target.item].global();
            let position = effector
                .translation
                .vector
                .lerp(&target.goal.translation.vector, blend);
            let rotation = effector
                .rotation
                .try_slerp(&target.goal.rotation, blend, 1.0e-9)
                .unwrap_or(target.goal.rotation);
            Isometry3::from_parts(Translation3::from(position), rotation)
        })
        .collect();
    chain.set_solve_goals(goals);
}

/// Middle joint of the path from the root to the first target's joint.
fn magnet_item(chain: &Chain) -> Option<usize> {
    let tip = chain.targets().first()?.item;
    let path = chain.path_to_root(tip);
    if path.len() < 3 {
        return None;
    }
    Some(path[path.len() / 2])
}

/// Tip joints owning an enabled target take that target's solved orientation.
fn override_tips(chain: &mut Chain) {
    let overrides: Vec<(usize, Isometry3<f64>)> = chain
        .targets()
        .iter()
        .enumerate()
        .filter(|(_, t)| t.enabled && chain.items()[t.item].children().is_empty())
        .map(|(i, t)| {
            let mut pose = *chain.items()[t.item].global();
            pose.rotation = chain.solve_goal(i).rotation;
            (t.item, chain.local_for_global(t.item, &pose))
        })
        .collect();
    for (item, local) in overrides {
        chain.item_mut(item).restore_local(local);
        chain.update_globals_from(item);
    }
}

fn effector_error(chain: &Chain) -> f64 {
    chain
        .targets()
        .iter()
        .enumerate()
        .filter(|(_, t)| t.enabled)
        .map(|(i, t)| (t.position() - chain.effector_position(i)).norm())
        .fold(0.0, f64::max)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use manybone_core::{BoneId, Skeleton};
    use manybone_test_utils::{two_link_arm, z_offset};
    use nalgebra::{UnitQuaternion, Vector3};

    fn arm_chain(goal: Isometry3<f64>) -> (Skeleton, Chain) {
        let skeleton = two_link_arm();
        let root = skeleton.find_bone("base").unwrap();
        let tip = skeleton.find_bone("tip").unwrap();
        let chain = Chain::new(&skeleton, root, tip, goal, &SolverConfig::default()).unwrap();
        (skeleton, chain)
    }

    #[test]
    fn zero_blend_skips() {
        let (mut skeleton, mut chain) = arm_chain(Isometry3::translation(0.3, 0.0, 0.3));
        let mut solver = ChainSolver::with_defaults();
        let options = SolveOptions {
            blending_delta: 0.0,
            ..SolveOptions::default()
        };
        let report = solver.solve(&mut chain, &mut skeleton, &options);
        assert!(report.skipped);
        assert!(skeleton.pose_override(BoneId(1)).is_none());
    }

    #[test]
    fn solve_writes_every_joint() {
        let (mut skeleton, mut chain) = arm_chain(Isometry3::translation(0.2, 0.0, 0.45));
        let mut solver = ChainSolver::with_defaults();
        let report = solver.solve(&mut chain, &mut skeleton, &SolveOptions::default());
        assert!(!report.skipped);
        assert_eq!(report.iterations, chain.iterations());
        for i in 0..3 {
            assert!(skeleton.pose_override(BoneId(i)).is_some());
        }
    }

    #[test]
    fn dampening_limits_a_single_iteration() {
        let (mut skeleton, mut chain) = arm_chain(Isometry3::translation(0.0, 0.3, 0.3));
        chain.set_iterations(1);
        chain.set_stabilization_passes(0);
        chain.set_orientation_locked(0, true);
        let mut solver = ChainSolver::with_defaults();
        solver.solve(&mut chain, &mut skeleton, &SolveOptions::default());
        let upper = chain.items()[1].local().rotation;
        assert!(upper.angle() <= chain.items()[1].dampening() + 1e-9);
        assert!(upper.angle() > 0.0);
        assert_relative_eq!(chain.items()[0].local().rotation.angle(), 0.0);
    }

    #[test]
    fn override_tip_basis_copies_goal_rotation() {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.7);
        let goal = Isometry3::from_parts(Translation3::new(0.1, 0.0, 0.5), rotation);
        let (mut skeleton, mut chain) = arm_chain(goal);
        let mut solver = ChainSolver::with_defaults();
        let options = SolveOptions {
            override_tip_basis: true,
            ..SolveOptions::default()
        };
        solver.solve(&mut chain, &mut skeleton, &options);
        let tip = skeleton.pose_override(BoneId(2)).unwrap();
        assert_relative_eq!(tip.rotation.angle_to(&rotation), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn half_blend_aims_between_effector_and_goal() {
        let (skeleton, mut chain) = arm_chain(z_offset(0.35));
        chain.refresh_from(&skeleton);
        blend_goals(&mut chain, 0.5);
        assert_relative_eq!(chain.solve_goal(0).translation.z, 0.45, epsilon = 1e-12);
    }

    #[test]
    fn magnet_needs_three_joints() {
        let (_, chain) = arm_chain(z_offset(0.5));
        assert_eq!(magnet_item(&chain), Some(1));
    }
}
