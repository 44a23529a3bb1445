use std::collections::HashMap;

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::error::IkError;
use crate::traits::{PoseSink, SkeletonSource};

// ---------------------------------------------------------------------------
// BoneId
// ---------------------------------------------------------------------------

/// Index of a bone in the hosting skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoneId(pub usize);

impl BoneId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for BoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Skeleton
// ---------------------------------------------------------------------------

/// A bone in an in-memory [`Skeleton`].
#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub parent: Option<BoneId>,
    /// Rest transform relative to the parent bone.
    pub rest: Isometry3<f64>,
    /// Currently applied local transform (animation output).
    pub pose: Isometry3<f64>,
    /// Global pose written back by the solver, if any.
    pub global_override: Option<Isometry3<f64>>,
}

/// Minimal bone hierarchy implementing both sides of the solver boundary.
///
/// Bones must be added parent-first, so every parent id is lower than the ids
/// of its children.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    bones: Vec<Bone>,
    names: HashMap<String, BoneId>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bone whose current pose starts at its rest transform.
    pub fn add_bone(
        &mut self,
        name: impl Into<String>,
        parent: Option<BoneId>,
        rest: Isometry3<f64>,
    ) -> Result<BoneId, IkError> {
        let name = name.into();
        if let Some(parent) = parent {
            if parent.0 >= self.bones.len() {
                return Err(IkError::InvalidBoneId(parent.0));
            }
        }
        if self.names.contains_key(&name) {
            return Err(IkError::DuplicateBone(name));
        }
        let id = BoneId(self.bones.len());
        self.names.insert(name.clone(), id);
        self.bones.push(Bone {
            name,
            parent,
            rest,
            pose: rest,
            global_override: None,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bone(&self, id: BoneId) -> Option<&Bone> {
        self.bones.get(id.0)
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// Replace a bone's current local pose.
    pub fn set_pose(&mut self, id: BoneId, pose: Isometry3<f64>) {
        if let Some(bone) = self.bones.get_mut(id.0) {
            bone.pose = pose;
        }
    }

    pub fn pose_override(&self, id: BoneId) -> Option<Isometry3<f64>> {
        self.bones.get(id.0).and_then(|b| b.global_override)
    }

    pub fn clear_overrides(&mut self) {
        for bone in &mut self.bones {
            bone.global_override = None;
        }
    }

    /// Global transforms of every bone, overrides included.
    pub fn compute_global_poses(&self) -> Vec<Isometry3<f64>> {
        let mut globals: Vec<Isometry3<f64>> = Vec::with_capacity(self.bones.len());
        for bone in &self.bones {
            let parent = bone.parent.map_or_else(Isometry3::identity, |p| globals[p.0]);
            globals.push(bone.global_override.unwrap_or(parent * bone.pose));
        }
        globals
    }

    /// Fold solver overrides back into local poses and clear them.
    ///
    /// Lets a host keep the solved pose as the starting point of the next frame.
    pub fn bake_overrides(&mut self) {
        let globals = self.compute_global_poses();
        for (i, bone) in self.bones.iter_mut().enumerate() {
            if bone.global_override.take().is_some() {
                let parent = bone.parent.map_or_else(Isometry3::identity, |p| globals[p.0]);
                bone.pose = parent.inverse() * globals[i];
            }
        }
    }
}

impl SkeletonSource for Skeleton {
    fn bone_count(&self) -> usize {
        self.bones.len()
    }

    fn find_bone(&self, name: &str) -> Option<BoneId> {
        self.names.get(name).copied()
    }

    fn bone_name(&self, bone: BoneId) -> Option<&str> {
        self.bones.get(bone.0).map(|b| b.name.as_str())
    }

    fn bone_parent(&self, bone: BoneId) -> Option<BoneId> {
        self.bones.get(bone.0).and_then(|b| b.parent)
    }

    fn bone_rest(&self, bone: BoneId) -> Option<Isometry3<f64>> {
        self.bones.get(bone.0).map(|b| b.rest)
    }

    fn bone_pose(&self, bone: BoneId) -> Option<Isometry3<f64>> {
        self.bones.get(bone.0).map(|b| b.pose)
    }
}

impl PoseSink for Skeleton {
    fn set_global_pose_override(&mut self, bone: BoneId, pose: Isometry3<f64>) {
        if let Some(b) = self.bones.get_mut(bone.0) {
            b.global_override = Some(pose);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
