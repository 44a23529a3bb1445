//! Composite orientation constraint: a path of reach cones plus a twist range.
//!
//! All rotations handled here are expressed relative to the joint's limiting
//! frame. The bone axis is local +Z: cones limit where that axis may point and
//! the twist range limits rotation about it.

use nalgebra::{UnitQuaternion, Vector3};

use manybone_core::{IkError, JointConstraintConfig};

use super::cone::DirectionalConstraint;
use super::twist::TwistConstraint;
use crate::math::{
    clamp_to_cos_half_angle, normalize_or, shortest_arc, twist_angle, ZERO_EPSILON,
};

/// Cosine above which a candidate is considered to be the input itself.
const SAME_DIRECTION_COS: f64 = 1.0 - 1.0e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Kusudama {
    cones: Vec<DirectionalConstraint>,
    twist: TwistConstraint,
    pain: f64,
    axes_offset: UnitQuaternion<f64>,
}

impl Default for Kusudama {
    fn default() -> Self {
        Self {
            cones: Vec::new(),
            twist: TwistConstraint::default(),
            pain: 0.0,
            axes_offset: UnitQuaternion::identity(),
        }
    }
}

impl Kusudama {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a persisted per-bone record.
    ///
    /// # Errors
    ///
    /// Returns [`IkError::InvalidConstraint`] if the record fails validation.
    pub fn from_config(config: &JointConstraintConfig) -> Result<Self, IkError> {
        config.validate().map_err(|e| IkError::InvalidConstraint {
            bone: config.bone.clone(),
            message: e.to_string(),
        })?;
        let mut kusudama = Self::new();
        for cone in &config.cones {
            let [x, y, z] = cone.control_point;
            kusudama
                .cones
                .push(DirectionalConstraint::new(Vector3::new(x, y, z), cone.radius));
        }
        if let Some(twist) = config.twist {
            kusudama.twist = TwistConstraint::new(twist.min_angle, twist.range);
        }
        kusudama.pain = config.softness;
        kusudama.update_tangent_radii();
        Ok(kusudama)
    }

    pub fn cones(&self) -> &[DirectionalConstraint] {
        &self.cones
    }

    pub const fn twist(&self) -> &TwistConstraint {
        &self.twist
    }

    /// Softness in `[0, 1]`.
    pub const fn pain(&self) -> f64 {
        self.pain
    }

    pub const fn axes_offset(&self) -> &UnitQuaternion<f64> {
        &self.axes_offset
    }

    // -- mutation; every cone change rebuilds the tangent caches ------------

    pub fn add_cone(&mut self, control_point: Vector3<f64>, radius: f64) {
        self.cones.push(DirectionalConstraint::new(control_point, radius));
        self.update_tangent_radii();
    }

    pub fn insert_cone(&mut self, index: usize, control_point: Vector3<f64>, radius: f64) {
        let index = index.min(self.cones.len());
        self.cones
            .insert(index, DirectionalConstraint::new(control_point, radius));
        self.update_tangent_radii();
    }

    pub fn remove_cone(&mut self, index: usize) -> Option<DirectionalConstraint> {
        if index >= self.cones.len() {
            return None;
        }
        let removed = self.cones.remove(index);
        self.update_tangent_radii();
        Some(removed)
    }

    /// Move a cone and/or change its radius. Returns false for an unknown index.
    pub fn set_cone(&mut self, index: usize, control_point: Vector3<f64>, radius: f64) -> bool {
        let Some(cone) = self.cones.get_mut(index) else {
            return false;
        };
        cone.set_control_point(control_point);
        cone.set_radius(radius);
        self.update_tangent_radii();
        true
    }

    pub fn set_twist(&mut self, twist: TwistConstraint) {
        self.twist = twist;
    }

    pub fn set_pain(&mut self, pain: f64) {
        self.pain = pain.clamp(0.0, 1.0);
    }

    /// Rotate the frame the cones and twist are defined in, relative to the
    /// bone's rest orientation.
    pub fn set_axes_offset(&mut self, offset: UnitQuaternion<f64>) {
        self.axes_offset = offset;
    }

    /// Rebuild the tangent circles of every consecutive cone pair.
    pub fn update_tangent_radii(&mut self) {
        for i in 1..self.cones.len() {
            let (head, tail) = self.cones.split_at_mut(i);
            head[i - 1].update_tangent_handles(&tail[0]);
        }
    }

    /// Limiting frame in the parent's space, given the bone's rest rotation.
    pub fn limiting_axes(&self, rest_rotation: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        rest_rotation * self.axes_offset
    }

    // -- queries ------------------------------------------------------------

    /// Closest allowed direction to `direction`, and whether it was already allowed.
    ///
    /// Allowed means inside any cone or inside the corridor between two
    /// consecutive cones. Otherwise the boundary point with the highest cosine
    /// to the input is returned.
    pub fn point_in_limits(&self, direction: &Vector3<f64>) -> (Vector3<f64>, bool) {
        let direction = normalize_or(direction, Vector3::z());
        if self.cones.is_empty() {
            return (direction, true);
        }
        if self.cones.iter().any(|c| c.contains(&direction)) {
            return (direction, true);
        }

        let mut best = direction;
        let mut best_cos = f64::NEG_INFINITY;
        let mut consider = |candidate: Vector3<f64>| {
            let cos = candidate.dot(&direction);
            if cos > best_cos {
                best_cos = cos;
                best = candidate;
            }
        };

        for pair in self.cones.windows(2) {
            if let Some(candidate) = pair[0].on_great_tangent_triangle(&pair[1], &direction) {
                if candidate.dot(&direction) >= SAME_DIRECTION_COS {
                    return (direction, true);
                }
                consider(candidate);
            }
        }
        for cone in &self.cones {
            consider(cone.closest_to_cone(&direction).0);
        }
        (normalize_or(&best, direction), false)
    }

    /// Nearest point on the path through the cone control points.
    ///
    /// A single cone's path is its control point.
    pub fn closest_path_point(&self, direction: &Vector3<f64>) -> Vector3<f64> {
        let direction = normalize_or(direction, Vector3::z());
        let mut best = self
            .cones
            .first()
            .map_or(Vector3::z(), |c| *c.control_point());
        let mut best_cos = best.dot(&direction);
        let arcs = self
            .cones
            .windows(2)
            .filter_map(|pair| pair[0].closest_on_path_arc(&pair[1], &direction));
        let points = self.cones.iter().map(|c| *c.control_point());
        for candidate in arcs.chain(points) {
            let cos = candidate.dot(&direction);
            if cos > best_cos {
                best_cos = cos;
                best = candidate;
            }
        }
        best
    }

    // -- constraint application ----------------------------------------------

    /// Rotate `rotation` about its own axis back into the twist range.
    ///
    /// Returns the adjusted rotation and the signed delta applied (0 when compliant).
    pub fn snap_to_twist_limits(&self, rotation: &UnitQuaternion<f64>) -> (UnitQuaternion<f64>, f64) {
        if self.twist.is_free() {
            return (*rotation, 0.0);
        }
        let twist = twist_angle(rotation, &Vector3::z_axis());
        let delta = self.twist.snap_delta(twist);
        if delta == 0.0 {
            return (*rotation, 0.0);
        }
        (rotation * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), delta), delta)
    }

    /// Hard-clamp `rotation` into the cones and the twist range.
    ///
    /// Returns the constrained rotation and whether it was already compliant.
    pub fn set_axes_to_snapped(&self, rotation: &UnitQuaternion<f64>) -> (UnitQuaternion<f64>, bool) {
        let axis = rotation * Vector3::z();
        let (allowed, in_bounds) = self.point_in_limits(&axis);
        let swung = if in_bounds {
            *rotation
        } else {
            shortest_arc(&axis, &allowed) * rotation
        };
        let (snapped, delta) = self.snap_to_twist_limits(&swung);
        (snapped, in_bounds && delta == 0.0)
    }

    /// Nudge `rotation` toward the comfortable region by at most the scheduled angle.
    ///
    /// The bone axis moves toward the nearest path point and the twist toward
    /// the middle of its range. `cos_half_return` and `return_angle` come from
    /// the joint's per-iteration schedule and already include the softness.
    pub fn set_axes_to_returnful(
        &self,
        rotation: &UnitQuaternion<f64>,
        cos_half_return: f64,
        return_angle: f64,
    ) -> UnitQuaternion<f64> {
        if self.pain <= 0.0 || return_angle <= 0.0 {
            return *rotation;
        }
        let mut result = *rotation;
        if !self.cones.is_empty() {
            let axis = rotation * Vector3::z();
            let path_point = self.closest_path_point(&axis);
            let correction = clamp_to_cos_half_angle(&shortest_arc(&axis, &path_point), cos_half_return);
            result = correction * result;
        }
        if !self.twist.is_free() {
            let z = Vector3::z_axis();
            let delta = self
                .twist
                .delta_to_mid(twist_angle(&result, &z))
                .clamp(-return_angle, return_angle);
            if delta.abs() > ZERO_EPSILON {
                result *= UnitQuaternion::from_axis_angle(&z, delta);
            }
        }
        result
    }

    /// Whether `rotation` satisfies both the cones and the twist range.
    pub fn is_within_limits(&self, rotation: &UnitQuaternion<f64>) -> bool {
        let axis = rotation * Vector3::z();
        let (_, in_bounds) = self.point_in_limits(&axis);
        in_bounds && self.snap_to_twist_limits(rotation).1 == 0.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use manybone_core::{ConeConfig, TwistConfig};
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_6, PI, TAU};

    fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        a.normalize().dot(&b.normalize()).clamp(-1.0, 1.0).acos()
    }

    fn single_cone() -> Kusudama {
        let mut k = Kusudama::new();
        k.add_cone(Vector3::z(), FRAC_PI_6);
        k
    }

    #[test]
    fn empty_kusudama_allows_everything() {
        let k = Kusudama::new();
        let (p, in_bounds) = k.point_in_limits(&Vector3::new(0.0, -1.0, 0.0));
        assert!(in_bounds);
        assert_relative_eq!(p, -Vector3::y());
    }

    #[test]
    fn out_of_cone_direction_is_clamped_to_rim() {
        let k = single_cone();
        let (p, in_bounds) = k.point_in_limits(&Vector3::x());
        assert!(!in_bounds);
        assert_relative_eq!(angle_between(&p, &Vector3::z()), FRAC_PI_6, epsilon = 1e-12);
        assert!(p.x > 0.0);
    }

    #[test]
    fn corridor_between_two_cones_is_allowed() {
        let mut k = Kusudama::new();
        k.add_cone(Vector3::x(), 0.3);
        k.add_cone(Vector3::y(), 0.3);
        let mid = (Vector3::x() + Vector3::y()).normalize();
        let (p, in_bounds) = k.point_in_limits(&mid);
        assert!(in_bounds);
        assert_relative_eq!(p, mid, epsilon = 1e-12);

        let (_, in_bounds) = k.point_in_limits(&-mid);
        assert!(!in_bounds);
    }

    #[test]
    fn mutations_rebuild_tangents() {
        let mut k = Kusudama::new();
        k.add_cone(Vector3::x(), 0.3);
        k.add_cone(Vector3::y(), 0.3);
        let before = k.cones()[0].tangent_radius();
        assert!(k.set_cone(1, Vector3::y(), 0.5));
        let after = k.cones()[0].tangent_radius();
        assert_relative_eq!(before - after, 0.1, epsilon = 1e-12);

        assert!(k.remove_cone(1).is_some());
        assert!(k.remove_cone(4).is_none());
        assert!(!k.set_cone(3, Vector3::z(), 0.1));
        k.insert_cone(0, Vector3::z(), 0.2);
        assert_eq!(k.cones().len(), 2);
        assert_relative_eq!(k.cones()[0].tangent_radius(), (PI - 0.5) * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn snapped_rotation_points_inside_cone() {
        let k = single_cone();
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2);
        let (snapped, compliant) = k.set_axes_to_snapped(&rotation);
        assert!(!compliant);
        let axis = snapped * Vector3::z();
        assert!(angle_between(&axis, &Vector3::z()) <= FRAC_PI_6 + 1e-9);
        assert!(k.is_within_limits(&snapped));
    }

    #[test]
    fn twist_is_snapped_to_range() {
        let mut k = Kusudama::new();
        k.set_twist(TwistConstraint::new(0.0, FRAC_PI_2));
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI);
        let (snapped, delta) = k.snap_to_twist_limits(&rotation);
        assert_relative_eq!(delta, -FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(twist_angle(&snapped, &Vector3::z_axis()), FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn returnful_moves_toward_path_by_bounded_angle() {
        let mut k = single_cone();
        k.set_pain(0.5);
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.4);
        let step = 0.1;
        let returned = k.set_axes_to_returnful(&rotation, (step * 0.5_f64).cos(), step);
        let before = angle_between(&(rotation * Vector3::z()), &Vector3::z());
        let after = angle_between(&(returned * Vector3::z()), &Vector3::z());
        assert_relative_eq!(before - after, step, epsilon = 1e-9);
    }

    #[test]
    fn returnful_without_pain_is_identity() {
        let k = single_cone();
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.4);
        let returned = k.set_axes_to_returnful(&rotation, 0.99, 0.1);
        assert_relative_eq!(returned.angle_to(&rotation), 0.0);
    }

    #[test]
    fn from_config_builds_cones_twist_and_pain() {
        let config = JointConstraintConfig::new("elbow")
            .with_cone(ConeConfig::from_degrees([0.0, 0.0, 1.0], 30.0))
            .with_cone(ConeConfig::from_degrees([0.0, 1.0, 0.0], 20.0))
            .with_twist(TwistConfig::new(0.0, TAU))
            .with_softness(0.25);
        let k = Kusudama::from_config(&config).unwrap();
        assert_eq!(k.cones().len(), 2);
        assert!(k.twist().is_free());
        assert_relative_eq!(k.pain(), 0.25);
        assert!(k.cones()[0].tangent_radius() > 0.0);
    }

    #[test]
    fn from_config_rejects_invalid_record() {
        let config = JointConstraintConfig::new("elbow").with_cone(ConeConfig::new([0.0, 0.0, 0.0], 0.3));
        let err = Kusudama::from_config(&config).unwrap_err();
        assert!(matches!(err, IkError::InvalidConstraint { .. }));
    }

    #[test]
    fn closest_path_point_on_arc() {
        let mut k = Kusudama::new();
        k.add_cone(Vector3::x(), 0.1);
        k.add_cone(Vector3::y(), 0.1);
        let p = k.closest_path_point(&Vector3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(p, (Vector3::x() + Vector3::y()).normalize(), epsilon = 1e-12);
    }
}
