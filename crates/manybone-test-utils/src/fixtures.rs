//! Canned skeletons. Bones extend along their parent's +Z axis.

use nalgebra::{Isometry3, Translation3, UnitQuaternion};

use manybone_core::{BoneId, Skeleton};

/// Pure translation along +Z.
pub fn z_offset(z: f64) -> Isometry3<f64> {
    Isometry3::from_parts(Translation3::new(0.0, 0.0, z), UnitQuaternion::identity())
}

fn add(skeleton: &mut Skeleton, name: &str, parent: Option<BoneId>, rest: Isometry3<f64>) -> BoneId {
    skeleton
        .add_bone(name, parent, rest)
        .unwrap_or_else(|e| panic!("fixture bone {name}: {e}"))
}

/// `base` at the origin, `upper` 0.3 above it, `tip` 0.25 above that.
pub fn two_link_arm() -> Skeleton {
    let mut skeleton = Skeleton::new();
    let base = add(&mut skeleton, "base", None, z_offset(0.0));
    let upper = add(&mut skeleton, "upper", Some(base), z_offset(0.3));
    add(&mut skeleton, "tip", Some(upper), z_offset(0.25));
    skeleton
}

/// One unit-length bone: `bone` at the origin with its end marker `end` at +Z.
pub fn single_bone() -> Skeleton {
    let mut skeleton = Skeleton::new();
    let bone = add(&mut skeleton, "bone", None, z_offset(0.0));
    add(&mut skeleton, "end", Some(bone), z_offset(1.0));
    skeleton
}

/// `spine` with two branches: `arm` -> `hand` and `head`.
pub fn branched_skeleton() -> Skeleton {
    let mut skeleton = Skeleton::new();
    let spine = add(&mut skeleton, "spine", None, z_offset(0.0));
    let arm = add(
        &mut skeleton,
        "arm",
        Some(spine),
        Isometry3::translation(0.2, 0.0, 0.5),
    );
    add(&mut skeleton, "hand", Some(arm), z_offset(0.3));
    add(&mut skeleton, "head", Some(spine), z_offset(0.6));
    skeleton
}

#[cfg(test)]
mod tests {
    use super::*;
    use manybone_core::SkeletonSource;

    #[test]
    fn fixtures_have_expected_shape() {
        assert_eq!(two_link_arm().bone_count(), 3);
        assert_eq!(single_bone().bone_count(), 2);
        let branched = branched_skeleton();
        assert_eq!(branched.bone_count(), 4);
        let head = branched.find_bone("head").unwrap();
        assert_eq!(branched.bone_parent(head), branched.find_bone("spine"));
    }
}
