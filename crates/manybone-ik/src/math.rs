//! Geometry primitives shared by the QCP solver and the constraints.
//!
//! Everything here is pure: rays, swing-twist decomposition, rotation clamping
//! and angle arithmetic on the circle.

use std::f64::consts::{PI, TAU};

use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};

/// Squared length below which a vector is treated as zero.
pub const ZERO_EPSILON: f64 = 1.0e-12;

// ---------------------------------------------------------------------------
// Ray
// ---------------------------------------------------------------------------

/// A directed segment from `p1` to `p2`, extended infinitely for intersections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub p1: Vector3<f64>,
    pub p2: Vector3<f64>,
}

impl Ray {
    pub const fn new(p1: Vector3<f64>, p2: Vector3<f64>) -> Self {
        Self { p1, p2 }
    }

    pub fn heading(&self) -> Vector3<f64> {
        self.p2 - self.p1
    }

    /// Point at parameter `t` (0 at `p1`, 1 at `p2`).
    pub fn point_at(&self, t: f64) -> Vector3<f64> {
        self.p1 + self.heading() * t
    }

    /// Intersections with the sphere at `center` of `radius`, ordered along the ray.
    ///
    /// A tangent ray yields the same point twice.
    pub fn intersects_sphere(
        &self,
        center: &Vector3<f64>,
        radius: f64,
    ) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let d = self.heading();
        let a = d.norm_squared();
        if a < ZERO_EPSILON {
            return None;
        }
        let m = self.p1 - center;
        let b = m.dot(&d);
        let c = m.norm_squared() - radius * radius;
        let disc = b * b - a * c;
        if disc < 0.0 {
            return None;
        }
        let root = disc.sqrt();
        Some((self.point_at((-b - root) / a), self.point_at((-b + root) / a)))
    }
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

/// Some unit vector orthogonal to `v`. Falls back to +X for a zero input.
pub fn any_perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let candidate = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    Unit::try_new(v.cross(&candidate), ZERO_EPSILON).map_or_else(Vector3::x, Unit::into_inner)
}

/// Normalize, or return `fallback` if `v` is too short or not finite.
pub fn normalize_or(v: &Vector3<f64>, fallback: Vector3<f64>) -> Vector3<f64> {
    if v.iter().all(|c| c.is_finite()) {
        if let Some(unit) = Unit::try_new(*v, ZERO_EPSILON) {
            return unit.into_inner();
        }
    }
    fallback
}

/// Shortest-arc rotation taking direction `from` onto direction `to`.
///
/// Opposite directions rotate half a turn about an arbitrary perpendicular axis;
/// zero-length inputs give the identity.
pub fn shortest_arc(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    if from.norm_squared() < ZERO_EPSILON || to.norm_squared() < ZERO_EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::rotation_between(from, to).unwrap_or_else(|| {
        UnitQuaternion::from_axis_angle(&Unit::new_unchecked(any_perpendicular(from)), PI)
    })
}

/// Rotation of `angle` radians about `axis`; identity for a degenerate axis.
pub fn axis_angle(axis: &Vector3<f64>, angle: f64) -> UnitQuaternion<f64> {
    Unit::try_new(*axis, ZERO_EPSILON).map_or_else(UnitQuaternion::identity, |axis| {
        UnitQuaternion::from_axis_angle(&axis, angle)
    })
}

// ---------------------------------------------------------------------------
// Swing-twist
// ---------------------------------------------------------------------------

/// Split `rotation` into `(swing, twist)` with `rotation = swing * twist`.
///
/// `twist` rotates about `axis` only; `swing` moves `axis` without spinning
/// about it. A half-turn swing leaves the twist undefined and it is reported
/// as the identity.
pub fn swing_twist(
    rotation: &UnitQuaternion<f64>,
    axis: &Unit<Vector3<f64>>,
) -> (UnitQuaternion<f64>, UnitQuaternion<f64>) {
    let q = rotation.quaternion();
    let projected = axis.into_inner() * q.imag().dot(axis);
    let raw = Quaternion::from_parts(q.w, projected);
    let twist = if raw.norm_squared() < ZERO_EPSILON {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::from_quaternion(raw)
    };
    let swing = rotation * twist.inverse();
    (swing, twist)
}

/// Signed twist angle of `rotation` about `axis`, in `(-pi, pi]`.
pub fn twist_angle(rotation: &UnitQuaternion<f64>, axis: &Unit<Vector3<f64>>) -> f64 {
    let (_, twist) = swing_twist(rotation, axis);
    let q = twist.quaternion();
    let s = q.imag().dot(axis);
    wrap_pi(2.0 * s.atan2(q.w))
}

// ---------------------------------------------------------------------------
// Clamping
// ---------------------------------------------------------------------------

/// Limit `rotation` to at most `2 * acos(cos_half_angle)` radians, keeping its axis.
pub fn clamp_to_cos_half_angle(
    rotation: &UnitQuaternion<f64>,
    cos_half_angle: f64,
) -> UnitQuaternion<f64> {
    let mut q = *rotation.quaternion();
    if q.w < 0.0 {
        q = -q;
    }
    let cos_half = cos_half_angle.clamp(-1.0, 1.0);
    if q.w >= cos_half {
        return UnitQuaternion::new_unchecked(q);
    }
    let allowed_sin_sq = 1.0 - cos_half * cos_half;
    let current_sin_sq = q.imag().norm_squared();
    if current_sin_sq < ZERO_EPSILON {
        return UnitQuaternion::identity();
    }
    let scale = (allowed_sin_sq / current_sin_sq).sqrt();
    UnitQuaternion::new_normalize(Quaternion::from_parts(cos_half, q.imag() * scale))
}

// ---------------------------------------------------------------------------
// Angles on the circle
// ---------------------------------------------------------------------------

/// Wrap into `[0, 2pi)`.
pub fn wrap_tau(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Wrap into `(-pi, pi]`.
pub fn wrap_pi(angle: f64) -> f64 {
    let wrapped = wrap_tau(angle);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Smallest signed rotation taking angle `from` to angle `to`.
pub fn signed_angle_difference(from: f64, to: f64) -> f64 {
    wrap_pi(to - from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn ray_hits_unit_sphere_twice() {
        let ray = Ray::new(Vector3::new(-2.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0));
        let (a, b) = ray.intersects_sphere(&Vector3::zeros(), 1.0).unwrap();
        assert_relative_eq!(a, Vector3::new(-1.0, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(b, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn ray_outside_sphere_misses() {
        let ray = Ray::new(Vector3::new(-2.0, 2.0, 0.0), Vector3::new(2.0, 2.0, 0.0));
        assert!(ray.intersects_sphere(&Vector3::zeros(), 1.0).is_none());
    }

    #[test]
    fn perpendicular_is_orthogonal_and_unit() {
        for v in [Vector3::x(), Vector3::new(0.2, -3.0, 1.0), Vector3::new(1.0, 1.0e-9, 0.0)] {
            let p = any_perpendicular(&v);
            assert_relative_eq!(p.norm(), 1.0, epsilon = 1e-12);
            assert!(p.dot(&v).abs() < 1e-9);
        }
        assert_relative_eq!(any_perpendicular(&Vector3::zeros()), Vector3::x());
    }

    #[test]
    fn shortest_arc_handles_opposite_vectors() {
        let q = shortest_arc(&Vector3::z(), &-Vector3::z());
        assert_relative_eq!(q * Vector3::z(), -Vector3::z(), epsilon = 1e-12);
        let q = shortest_arc(&Vector3::zeros(), &Vector3::z());
        assert_relative_eq!(q.angle(), 0.0);
    }

    #[test]
    fn swing_twist_recomposes() {
        let axis = Vector3::z_axis();
        let rotation = UnitQuaternion::from_euler_angles(0.3, -0.4, 1.1);
        let (swing, twist) = swing_twist(&rotation, &axis);
        assert_relative_eq!(swing * twist, rotation, epsilon = 1e-12);
        // twist only spins about the axis
        assert_relative_eq!(twist * Vector3::z(), Vector3::z(), epsilon = 1e-12);
        // swing has no component about the axis
        assert!(swing.quaternion().imag().dot(&axis).abs() < 1e-12);
    }

    #[test]
    fn twist_angle_of_pure_twist() {
        let axis = Vector3::z_axis();
        let rotation = UnitQuaternion::from_axis_angle(&axis, 2.5);
        assert_relative_eq!(twist_angle(&rotation, &axis), 2.5, epsilon = 1e-12);
        let rotation = UnitQuaternion::from_axis_angle(&axis, -1.0);
        assert_relative_eq!(twist_angle(&rotation, &axis), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn clamp_limits_large_rotation() {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 1.0);
        let clamped = clamp_to_cos_half_angle(&rotation, 0.125f64.cos());
        assert_relative_eq!(clamped.angle(), 0.25, epsilon = 1e-12);
        assert_relative_eq!(
            clamped.axis().unwrap().into_inner(),
            Vector3::y(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn clamp_passes_small_rotation() {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.1);
        let clamped = clamp_to_cos_half_angle(&rotation, 0.125f64.cos());
        assert_relative_eq!(clamped, rotation, epsilon = 1e-12);
    }

    #[test]
    fn angle_wrapping() {
        assert_relative_eq!(wrap_tau(-FRAC_PI_2), 1.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_tau(TAU), 0.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_pi(1.5 * PI), -FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(signed_angle_difference(0.1, TAU - 0.1), -0.2, epsilon = 1e-12);
    }
}
