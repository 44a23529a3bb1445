//! Joint tree extracted from a [`SkeletonSource`] between a root and one or more tips.
//!
//! A [`Chain`] is an arena of [`ChainItem`]s stored parent-first: every
//! item's parent index is lower than its own, so a forward sweep recomputes
//! global transforms and a reverse sweep visits joints effector-first.
//! Targets attach to items and are turned into weighted heading sets for the
//! QCP solver, one set per joint.

use std::collections::HashMap;
use std::f64::consts::PI;

use nalgebra::{Isometry3, UnitQuaternion, Vector3};
use tracing::debug;

use manybone_core::{BoneId, ConstraintSet, IkError, SkeletonSource, SolverConfig};

use crate::constraint::Kusudama;

// ---------------------------------------------------------------------------
// ChainItem
// ---------------------------------------------------------------------------

/// One entry of a joint's return-to-rest schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnStep {
    /// Largest correction allowed at this iteration (radians).
    pub angle: f64,
    /// `cos(angle / 2)`.
    pub cos_half: f64,
}

/// A joint in the chain.
#[derive(Debug, Clone)]
pub struct ChainItem {
    bone: BoneId,
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
    rest: Isometry3<f64>,
    local: Isometry3<f64>,
    global: Isometry3<f64>,
    constraint: Option<Kusudama>,
    stiffness: f64,
    orientation_locked: bool,
    dampening: f64,
    cos_half_dampen: f64,
    returnful: Vec<ReturnStep>,
}

impl ChainItem {
    fn new(
        bone: BoneId,
        name: String,
        parent: Option<usize>,
        depth: usize,
        rest: Isometry3<f64>,
        local: Isometry3<f64>,
    ) -> Self {
        Self {
            bone,
            name,
            parent,
            children: Vec::new(),
            depth,
            rest,
            local,
            global: Isometry3::identity(),
            constraint: None,
            stiffness: 0.0,
            orientation_locked: false,
            dampening: 0.0,
            cos_half_dampen: 1.0,
            returnful: Vec::new(),
        }
    }

    pub const fn bone(&self) -> BoneId {
        self.bone
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Distance from the chain root (0 for the root).
    pub const fn depth(&self) -> usize {
        self.depth
    }

    pub const fn rest(&self) -> &Isometry3<f64> {
        &self.rest
    }

    /// Current transform relative to the parent bone.
    pub const fn local(&self) -> &Isometry3<f64> {
        &self.local
    }

    /// Cached global transform; valid after [`Chain::update_globals`].
    pub const fn global(&self) -> &Isometry3<f64> {
        &self.global
    }

    pub const fn constraint(&self) -> Option<&Kusudama> {
        self.constraint.as_ref()
    }

    pub const fn stiffness(&self) -> f64 {
        self.stiffness
    }

    pub const fn is_orientation_locked(&self) -> bool {
        self.orientation_locked
    }

    /// Largest rotation this joint may take per iteration.
    pub const fn dampening(&self) -> f64 {
        self.dampening
    }

    pub const fn cos_half_dampen(&self) -> f64 {
        self.cos_half_dampen
    }

    /// Return-to-rest schedule, one step per outer iteration. Empty when the
    /// joint has no softness.
    pub fn returnful_schedule(&self) -> &[ReturnStep] {
        &self.returnful
    }

    /// Frame the constraint is expressed in, relative to the parent bone.
    pub fn limiting_axes(&self) -> UnitQuaternion<f64> {
        self.constraint.as_ref().map_or(self.rest.rotation, |k| {
            k.limiting_axes(&self.rest.rotation)
        })
    }

    /// Local rotation expressed in the limiting frame.
    pub fn limited_rotation(&self) -> UnitQuaternion<f64> {
        self.limiting_axes().inverse() * self.local.rotation
    }

    pub(crate) fn set_local_rotation(&mut self, rotation: UnitQuaternion<f64>) {
        self.local.rotation = rotation;
    }

    pub(crate) fn set_limited_rotation(&mut self, rotation: UnitQuaternion<f64>) {
        self.local.rotation = self.limiting_axes() * rotation;
    }

    pub(crate) fn translate_local(&mut self, offset: Vector3<f64>) {
        self.local.translation.vector += offset;
    }

    pub(crate) fn restore_local(&mut self, local: Isometry3<f64>) {
        self.local = local;
    }

    /// Hard-clamp the local rotation into the constraint. Returns whether it
    /// was already compliant.
    pub fn snap_to_limits(&mut self) -> bool {
        let Some(kusudama) = self.constraint.as_ref() else {
            return true;
        };
        let (snapped, compliant) = kusudama.set_axes_to_snapped(&self.limited_rotation());
        if !compliant {
            self.set_limited_rotation(snapped);
        }
        compliant
    }

    fn rebuild_dampening(&mut self, chain_dampening: f64, iterations: u32) {
        let base = if self.parent.is_none() { PI } else { chain_dampening };
        self.dampening = (1.0 - self.stiffness) * base;
        self.cos_half_dampen = (self.dampening * 0.5).cos();

        self.returnful.clear();
        let pain = self.constraint.as_ref().map_or(0.0, Kusudama::pain);
        if pain <= 0.0 || iterations == 0 {
            return;
        }
        // Front-loaded: full correction on the first iteration, none at the end.
        let n = f64::from(iterations);
        let exponent = 1.0 + pain;
        let total = n.powf(exponent);
        for i in 0..iterations {
            let scalar = (total - f64::from(i).powf(exponent)) / total;
            let angle = scalar * pain * self.dampening;
            self.returnful.push(ReturnStep {
                angle,
                cos_half: (angle * 0.5).cos(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// ChainTarget
// ---------------------------------------------------------------------------

/// Orientation priorities of a target. Zero disables alignment along that axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TargetPriorities {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl TargetPriorities {
    /// Position only.
    pub const NONE: Self = Self::new(0.0, 0.0, 0.0);
    /// Full orientation alignment.
    pub const ALL: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Axis/priority pairs with non-zero priority.
    pub fn enabled_axes(&self) -> impl Iterator<Item = (Vector3<f64>, f64)> {
        [
            (Vector3::x(), self.x),
            (Vector3::y(), self.y),
            (Vector3::z(), self.z),
        ]
        .into_iter()
        .filter(|(_, p)| *p > 0.0)
    }
}

/// A goal attached to one chain item. The item's own frame is the effector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTarget {
    pub item: usize,
    pub goal: Isometry3<f64>,
    pub enabled: bool,
    pub weight: f64,
    pub priorities: TargetPriorities,
    /// Multiplier applied to deeper targets' influence on this target's ancestors.
    pub depth_falloff: f64,
}

impl ChainTarget {
    pub fn new(item: usize, goal: Isometry3<f64>) -> Self {
        Self {
            item,
            goal,
            enabled: true,
            weight: 1.0,
            priorities: TargetPriorities::NONE,
            depth_falloff: 1.0,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        self.goal.translation.vector
    }
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

/// Parallel heading arrays for one joint. All three always have equal length.
#[derive(Debug, Clone, Default)]
pub struct Headings {
    pub target: Vec<Vector3<f64>>,
    pub effector: Vec<Vector3<f64>>,
    pub weights: Vec<f64>,
}

impl Headings {
    pub fn clear(&mut self) {
        self.target.clear();
        self.effector.clear();
        self.weights.clear();
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    fn push(&mut self, target: Vector3<f64>, effector: Vector3<f64>, weight: f64) {
        self.target.push(target);
        self.effector.push(effector);
        self.weights.push(weight);
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Articulated joint tree with its targets.
#[derive(Debug, Clone)]
pub struct Chain {
    items: Vec<ChainItem>,
    index: HashMap<BoneId, usize>,
    /// Global transform of the root bone's parent, read from the source.
    root_parent: Isometry3<f64>,
    targets: Vec<ChainTarget>,
    /// Goals actually solved for this call (blended), parallel to `targets`.
    solve_goals: Vec<Isometry3<f64>>,
    /// `penalties[item][target]`: how strongly `item` reacts to `target`.
    penalties: Vec<Vec<f64>>,
    dampening: f64,
    iterations: u32,
    stabilization_passes: u32,
}

impl Chain {
    /// Build the chain from `root` down to `tip` and attach a target at `tip`
    /// with goal `goal`.
    ///
    /// # Errors
    ///
    /// [`IkError::InvalidBoneId`] for ids outside the source,
    /// [`IkError::NotAncestor`] if `root` is not a strict ancestor of `tip`.
    pub fn new<S: SkeletonSource + ?Sized>(
        source: &S,
        root: BoneId,
        tip: BoneId,
        goal: Isometry3<f64>,
        config: &SolverConfig,
    ) -> Result<Self, IkError> {
        for id in [root, tip] {
            if id.index() >= source.bone_count() {
                return Err(IkError::InvalidBoneId(id.index()));
            }
        }
        if root == tip {
            return Err(IkError::NoTargets);
        }
        if !source.is_ancestor(root, tip) {
            return Err(IkError::NotAncestor {
                root: root.index(),
                tip: tip.index(),
            });
        }

        let root_parent = source
            .bone_parent(root)
            .and_then(|p| source.bone_global_pose(p))
            .unwrap_or_else(Isometry3::identity);
        let mut chain = Self {
            items: Vec::new(),
            index: HashMap::new(),
            root_parent,
            targets: Vec::new(),
            solve_goals: Vec::new(),
            penalties: Vec::new(),
            dampening: config.default_dampening,
            iterations: config.iterations,
            stabilization_passes: config.stabilization_passes,
        };
        chain.push_item(source, root, None)?;
        let tip_index = chain.extend_to(source, tip)?;
        chain.targets.push(ChainTarget::new(tip_index, goal));
        chain.rebuild_dampening();
        chain.rebuild_penalties();
        chain.update_globals();

        debug!(
            root = %root,
            tip = %tip,
            joints = chain.items.len(),
            "Built IK chain"
        );
        Ok(chain)
    }

    /// Add the path from the existing tree down to `tip`, returning `tip`'s item index.
    ///
    /// # Errors
    ///
    /// [`IkError::NotAncestor`] if `tip` does not descend from the chain root.
    pub fn extend_to<S: SkeletonSource + ?Sized>(
        &mut self,
        source: &S,
        tip: BoneId,
    ) -> Result<usize, IkError> {
        if tip.index() >= source.bone_count() {
            return Err(IkError::InvalidBoneId(tip.index()));
        }
        let mut path = Vec::new();
        let mut current = Some(tip);
        let attach = loop {
            match current {
                Some(bone) => {
                    if let Some(&existing) = self.index.get(&bone) {
                        break existing;
                    }
                    path.push(bone);
                    current = source.bone_parent(bone);
                }
                None => {
                    return Err(IkError::NotAncestor {
                        root: self.items[0].bone.index(),
                        tip: tip.index(),
                    });
                }
            }
        };

        let mut parent = attach;
        for bone in path.into_iter().rev() {
            parent = self.push_item(source, bone, Some(parent))?;
        }
        self.rebuild_dampening();
        self.rebuild_penalties();
        Ok(parent)
    }

    fn push_item<S: SkeletonSource + ?Sized>(
        &mut self,
        source: &S,
        bone: BoneId,
        parent: Option<usize>,
    ) -> Result<usize, IkError> {
        let rest = source
            .bone_rest(bone)
            .ok_or(IkError::InvalidBoneId(bone.index()))?;
        let local = source.bone_pose(bone).unwrap_or(rest);
        let name = source.bone_name(bone).unwrap_or_default().to_string();
        let depth = parent.map_or(0, |p| self.items[p].depth + 1);
        let index = self.items.len();
        self.items
            .push(ChainItem::new(bone, name, parent, depth, rest, local));
        if let Some(p) = parent {
            self.items[p].children.push(index);
        }
        self.index.insert(bone, index);
        Ok(index)
    }

    // -- accessors ----------------------------------------------------------

    pub fn items(&self) -> &[ChainItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&ChainItem> {
        self.items.get(index)
    }

    pub(crate) fn item_mut(&mut self, index: usize) -> &mut ChainItem {
        &mut self.items[index]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index_of(&self, bone: BoneId) -> Option<usize> {
        self.index.get(&bone).copied()
    }

    pub const fn root_parent(&self) -> &Isometry3<f64> {
        &self.root_parent
    }

    pub fn targets(&self) -> &[ChainTarget] {
        &self.targets
    }

    pub const fn dampening(&self) -> f64 {
        self.dampening
    }

    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    pub const fn stabilization_passes(&self) -> u32 {
        self.stabilization_passes
    }

    /// Penalty of `target` as felt by `item`.
    pub fn penalty(&self, item: usize, target: usize) -> f64 {
        self.penalties
            .get(item)
            .and_then(|row| row.get(target))
            .copied()
            .unwrap_or(0.0)
    }

    /// Items deepest first; ties go to the later item.
    pub fn effector_first_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        order.sort_by(|a, b| {
            self.items[*b]
                .depth
                .cmp(&self.items[*a].depth)
                .then(b.cmp(a))
        });
        order
    }

    /// Items from `item` up to the root, inclusive.
    pub fn path_to_root(&self, item: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = Some(item);
        while let Some(i) = current {
            path.push(i);
            current = self.items[i].parent;
        }
        path
    }

    // -- configuration ------------------------------------------------------

    /// Attach another target to `bone`, extending the chain if needed.
    ///
    /// # Errors
    ///
    /// Fails like [`Chain::extend_to`] when `bone` is not below the root.
    pub fn add_target<S: SkeletonSource + ?Sized>(
        &mut self,
        source: &S,
        bone: BoneId,
        goal: Isometry3<f64>,
    ) -> Result<usize, IkError> {
        let item = match self.index_of(bone) {
            Some(item) => item,
            None => self.extend_to(source, bone)?,
        };
        self.targets.push(ChainTarget::new(item, goal));
        self.rebuild_penalties();
        Ok(self.targets.len() - 1)
    }

    /// Edit a target in place; penalty arrays are rebuilt afterwards.
    ///
    /// An edit that points the target at an item outside the chain is
    /// discarded and `false` is returned.
    pub fn update_target(&mut self, target: usize, edit: impl FnOnce(&mut ChainTarget)) -> bool {
        let Some(current) = self.targets.get(target) else {
            return false;
        };
        let mut edited = current.clone();
        edit(&mut edited);
        if edited.item >= self.items.len() {
            return false;
        }
        self.targets[target] = edited;
        self.rebuild_penalties();
        true
    }

    pub fn set_goal(&mut self, target: usize, goal: Isometry3<f64>) -> bool {
        match self.targets.get_mut(target) {
            Some(t) => {
                t.goal = goal;
                true
            }
            None => false,
        }
    }

    pub fn set_dampening(&mut self, dampening: f64) {
        self.dampening = dampening.clamp(0.0, PI);
        self.rebuild_dampening();
    }

    pub fn set_iterations(&mut self, iterations: u32) {
        self.iterations = iterations.max(1);
        self.rebuild_dampening();
    }

    pub fn set_stabilization_passes(&mut self, passes: u32) {
        self.stabilization_passes = passes;
    }

    /// Attach constraint records to chain joints by bone name.
    ///
    /// # Errors
    ///
    /// [`IkError::UnknownBone`] for a name the source does not know,
    /// [`IkError::ConstraintMismatch`] if a record names a bone outside the
    /// chain, [`IkError::InvalidConstraint`] for an invalid record.
    pub fn apply_constraints<S: SkeletonSource + ?Sized>(
        &mut self,
        source: &S,
        constraints: &ConstraintSet,
    ) -> Result<(), IkError> {
        constraints.validate()?;
        let mut staged = Vec::with_capacity(constraints.len());
        for record in &constraints.joints {
            let bone = source
                .find_bone(&record.bone)
                .ok_or_else(|| IkError::UnknownBone(record.bone.clone()))?;
            let Some(item) = self.index_of(bone) else {
                return Err(IkError::ConstraintMismatch {
                    constraints: constraints.len(),
                    bones: self.items.len(),
                });
            };
            let kusudama = if record.is_constrained() || record.softness > 0.0 {
                Some(Kusudama::from_config(record)?)
            } else {
                None
            };
            staged.push((item, kusudama, record.stiffness, record.orientation_locked));
        }
        // Nothing is applied unless every record is valid.
        for (item, kusudama, stiffness, locked) in staged {
            let item = &mut self.items[item];
            item.constraint = kusudama;
            item.stiffness = stiffness;
            item.orientation_locked = locked;
        }
        self.rebuild_dampening();
        Ok(())
    }

    /// Replace the constraint of one item.
    pub fn set_constraint(&mut self, item: usize, constraint: Option<Kusudama>) {
        if let Some(i) = self.items.get_mut(item) {
            i.constraint = constraint;
        }
        self.rebuild_dampening();
    }

    pub fn set_stiffness(&mut self, item: usize, stiffness: f64) {
        if let Some(i) = self.items.get_mut(item) {
            i.stiffness = stiffness.clamp(0.0, 1.0);
        }
        self.rebuild_dampening();
    }

    pub fn set_orientation_locked(&mut self, item: usize, locked: bool) {
        if let Some(i) = self.items.get_mut(item) {
            i.orientation_locked = locked;
        }
    }

    fn rebuild_dampening(&mut self) {
        let (dampening, iterations) = (self.dampening, self.iterations);
        for item in &mut self.items {
            item.rebuild_dampening(dampening, iterations);
        }
    }

    /// Recompute every item's penalty row.
    ///
    /// Walking outward from an item, a target met at some joint contributes
    /// `weight * falloff`; deeper levels then see `falloff` multiplied by the
    /// depth falloff of the targets at that joint.
    fn rebuild_penalties(&mut self) {
        let mut targets_at: Vec<Vec<usize>> = vec![Vec::new(); self.items.len()];
        for (t, target) in self.targets.iter().enumerate() {
            if target.enabled {
                targets_at[target.item].push(t);
            }
        }

        self.penalties = vec![vec![0.0; self.targets.len()]; self.items.len()];
        let mut stack = Vec::new();
        for start in 0..self.items.len() {
            stack.clear();
            stack.push((start, 1.0_f64));
            while let Some((item, falloff)) = stack.pop() {
                let mut next_falloff = falloff;
                for &t in &targets_at[item] {
                    let target = &self.targets[t];
                    self.penalties[start][t] = target.weight * falloff;
                    next_falloff *= target.depth_falloff;
                }
                if next_falloff <= 0.0 {
                    continue;
                }
                for &child in &self.items[item].children {
                    stack.push((child, next_falloff));
                }
            }
        }
    }

    // -- per-solve state ------------------------------------------------------

    /// Reload rest and current local transforms of every joint from `source`.
    pub fn refresh_from<S: SkeletonSource + ?Sized>(&mut self, source: &S) {
        for item in &mut self.items {
            if let Some(rest) = source.bone_rest(item.bone) {
                item.rest = rest;
            }
            if let Some(pose) = source.bone_pose(item.bone) {
                item.local = pose;
            }
        }
        if let Some(root) = self.items.first() {
            self.root_parent = source
                .bone_parent(root.bone)
                .and_then(|p| source.bone_global_pose(p))
                .unwrap_or_else(Isometry3::identity);
        }
        self.update_globals();
    }

    /// Recompute cached global transforms of every joint.
    pub fn update_globals(&mut self) {
        self.update_globals_from(0);
    }

    /// Recompute cached global transforms from `start` onward. Items before
    /// `start` are assumed current.
    pub fn update_globals_from(&mut self, start: usize) {
        for i in start..self.items.len() {
            let parent = self.items[i]
                .parent
                .map_or(self.root_parent, |p| self.items[p].global);
            self.items[i].global = parent * self.items[i].local;
        }
    }

    /// Global rotation of `item`'s parent frame.
    pub fn parent_rotation(&self, item: usize) -> UnitQuaternion<f64> {
        self.items[item]
            .parent
            .map_or(self.root_parent.rotation, |p| self.items[p].global.rotation)
    }

    /// Set the goals solved for this call. Falls back to the raw goals.
    pub(crate) fn set_solve_goals(&mut self, goals: Vec<Isometry3<f64>>) {
        self.solve_goals = goals;
    }

    pub fn solve_goal(&self, target: usize) -> Isometry3<f64> {
        self.solve_goals
            .get(target)
            .copied()
            .unwrap_or(self.targets[target].goal)
    }

    /// Fill `out` with the heading sets `item` aligns.
    ///
    /// Per target with non-zero penalty: one position pair, plus for every
    /// enabled orientation axis a `+axis` and a `-axis` pair. Axis offsets are
    /// scaled by `max(distance to goal, 1)` so orientation keeps its leverage
    /// at range.
    pub fn fill_headings(&self, item: usize, out: &mut Headings) {
        out.clear();
        let origin = self.items[item].global.translation.vector;
        for (t, target) in self.targets.iter().enumerate() {
            let penalty = self.penalty(item, t);
            if penalty <= 0.0 {
                continue;
            }
            let goal = self.solve_goal(t);
            let effector = &self.items[target.item].global;
            let goal_heading = goal.translation.vector - origin;
            let effector_heading = effector.translation.vector - origin;
            out.push(goal_heading, effector_heading, penalty);

            let scale = goal_heading.norm().max(1.0);
            for (axis, priority) in target.priorities.enabled_axes() {
                let goal_axis = goal.rotation * axis * scale;
                let effector_axis = effector.rotation * axis * scale;
                let weight = penalty * priority;
                out.push(goal_heading + goal_axis, effector_heading + effector_axis, weight);
                out.push(goal_heading - goal_axis, effector_heading - effector_axis, weight);
            }
        }
    }

    /// Global poses of every item, in item order.
    pub fn global_poses(&self) -> Vec<Isometry3<f64>> {
        self.items.iter().map(|i| i.global).collect()
    }

    /// Local transform to place `item` at global `pose`.
    pub fn local_for_global(&self, item: usize, pose: &Isometry3<f64>) -> Isometry3<f64> {
        let parent = self.items[item]
            .parent
            .map_or(self.root_parent, |p| self.items[p].global);
        parent.inverse() * pose
    }

    /// Global translation of the target's effector.
    pub fn effector_position(&self, target: usize) -> Vector3<f64> {
        self.items[self.targets[target].item].global.translation.vector
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
