use nalgebra::Isometry3;

use crate::types::BoneId;

// ---------------------------------------------------------------------------
// SkeletonSource
// ---------------------------------------------------------------------------

/// Read side of the hosting animation system.
///
/// Names, counts and parents are only consulted while a chain is built; rest
/// and current poses are re-read at the start of every solve.
pub trait SkeletonSource {
    /// Number of bones in the hierarchy.
    fn bone_count(&self) -> usize;

    /// Look up a bone id by name.
    fn find_bone(&self, name: &str) -> Option<BoneId>;

    /// Name of a bone.
    fn bone_name(&self, bone: BoneId) -> Option<&str>;

    /// Parent of a bone. `None` for skeleton roots and unknown ids.
    fn bone_parent(&self, bone: BoneId) -> Option<BoneId>;

    /// Rest transform relative to the parent bone.
    fn bone_rest(&self, bone: BoneId) -> Option<Isometry3<f64>>;

    /// Currently applied local transform relative to the parent bone.
    fn bone_pose(&self, bone: BoneId) -> Option<Isometry3<f64>>;

    /// Global transform assembled from current local poses.
    fn bone_global_pose(&self, bone: BoneId) -> Option<Isometry3<f64>> {
        let mut pose = self.bone_pose(bone)?;
        let mut current = self.bone_parent(bone);
        while let Some(parent) = current {
            pose = self.bone_pose(parent)? * pose;
            current = self.bone_parent(parent);
        }
        Some(pose)
    }

    /// Whether `ancestor` lies on the parent path of `bone` (or is `bone`).
    fn is_ancestor(&self, ancestor: BoneId, bone: BoneId) -> bool {
        let mut current = Some(bone);
        while let Some(b) = current {
            if b == ancestor {
                return true;
            }
            current = self.bone_parent(b);
        }
        false
    }
}

// ---------------------------------------------------------------------------
// PoseSink
// ---------------------------------------------------------------------------

/// Write side of the hosting animation system.
pub trait PoseSink {
    /// Override a bone's global pose (rotation + origin) for this frame.
    fn set_global_pose_override(&mut self, bone: BoneId, pose: Isometry3<f64>);
}
