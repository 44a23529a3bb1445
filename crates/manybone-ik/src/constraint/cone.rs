//! A single reach cone and the tangent circles joining it to the next cone.
//!
//! Two consecutive cones on the unit sphere are connected by a corridor whose
//! sides are arcs of two tangent circles, one on each side of the great circle
//! through both control points. Each tangent circle touches both cones, so the
//! boundary of the corridor meets the cones without a seam.

use std::f64::consts::PI;

use nalgebra::Vector3;

use crate::math::{any_perpendicular, axis_angle, normalize_or, Ray, ZERO_EPSILON};

/// Slack on the cosine comparison so points placed on a rim count as inside.
const BOUNDARY_TOLERANCE: f64 = 1.0e-12;

/// A direction limit: everything within `radius` of `control_point`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalConstraint {
    control_point: Vector3<f64>,
    radius: f64,
    radius_cos: f64,
    /// Tangent circle on the negative side of `control_point x next`.
    tangent_center_1: Vector3<f64>,
    /// Tangent circle on the positive side of `control_point x next`.
    tangent_center_2: Vector3<f64>,
    tangent_radius: f64,
    tangent_radius_cos: f64,
}

impl DirectionalConstraint {
    /// Build a cone. The control point is normalized (+Z if degenerate) and the
    /// radius clamped to `[0, pi]`.
    pub fn new(control_point: Vector3<f64>, radius: f64) -> Self {
        let control_point = normalize_or(&control_point, Vector3::z());
        let radius = radius.clamp(0.0, PI);
        Self {
            control_point,
            radius,
            radius_cos: radius.cos(),
            tangent_center_1: any_perpendicular(&control_point),
            tangent_center_2: -any_perpendicular(&control_point),
            tangent_radius: 0.0,
            tangent_radius_cos: 1.0,
        }
    }

    pub const fn control_point(&self) -> &Vector3<f64> {
        &self.control_point
    }

    pub const fn radius(&self) -> f64 {
        self.radius
    }

    pub const fn radius_cos(&self) -> f64 {
        self.radius_cos
    }

    pub const fn tangent_centers(&self) -> (&Vector3<f64>, &Vector3<f64>) {
        (&self.tangent_center_1, &self.tangent_center_2)
    }

    pub const fn tangent_radius(&self) -> f64 {
        self.tangent_radius
    }

    /// Move the control point. Tangent geometry must be rebuilt afterwards.
    pub(crate) fn set_control_point(&mut self, control_point: Vector3<f64>) {
        self.control_point = normalize_or(&control_point, Vector3::z());
    }

    /// Change the radius. Tangent geometry must be rebuilt afterwards.
    pub(crate) fn set_radius(&mut self, radius: f64) {
        self.radius = radius.clamp(0.0, PI);
        self.radius_cos = self.radius.cos();
    }

    /// Recompute the two tangent circles joining this cone to `next`.
    ///
    /// The tangent radius is half the angular slack left by both cones,
    /// `(pi - (r_a + r_b)) / 2`. A tangent center lies at angular distance
    /// `r_a + t` from this control point and `r_b + t` from the next one, which
    /// puts it on the line where two planes meet; that line is intersected with
    /// the unit sphere.
    pub fn update_tangent_handles(&mut self, next: &Self) {
        let tangent_radius = ((PI - (self.radius + next.radius)) * 0.5).max(0.0);
        self.tangent_radius = tangent_radius;
        self.tangent_radius_cos = tangent_radius.cos();

        let a = self.control_point;
        let b = next.control_point;
        let cos_a = (self.radius + tangent_radius).cos();
        let cos_b = (next.radius + tangent_radius).cos();
        let g = a.dot(&b);
        let det = 1.0 - g * g;

        let normal = a.cross(&b);
        let (first, second) = if det < 1.0e-9 {
            // Coincident or opposite cones: no plane to side with.
            let axis = any_perpendicular(&a);
            let angle = self.radius + tangent_radius;
            (axis_angle(&axis, angle) * a, axis_angle(&axis, -angle) * a)
        } else {
            let alpha = (cos_a - g * cos_b) / det;
            let beta = (cos_b - g * cos_a) / det;
            let base = a * alpha + b * beta;
            let line = Ray::new(base, base + normal);
            match line.intersects_sphere(&Vector3::zeros(), 1.0) {
                Some((p, q)) => (p, q),
                None => {
                    let fallback = normalize_or(&base, any_perpendicular(&a));
                    (fallback, fallback)
                }
            }
        };

        let first = normalize_or(&first, any_perpendicular(&a));
        let second = normalize_or(&second, -any_perpendicular(&a));
        if first.dot(&normal) <= second.dot(&normal) {
            self.tangent_center_1 = first;
            self.tangent_center_2 = second;
        } else {
            self.tangent_center_1 = second;
            self.tangent_center_2 = first;
        }
    }

    /// Whether `direction` (unit) lies inside this cone.
    pub fn contains(&self, direction: &Vector3<f64>) -> bool {
        direction.dot(&self.control_point) >= self.radius_cos - BOUNDARY_TOLERANCE
    }

    /// `direction` itself when inside the cone, otherwise the nearest point on
    /// its boundary circle.
    pub fn closest_to_cone(&self, direction: &Vector3<f64>) -> (Vector3<f64>, bool) {
        if self.contains(direction) {
            return (*direction, true);
        }
        let axis = self.control_point.cross(direction);
        let axis = if axis.norm_squared() < ZERO_EPSILON {
            any_perpendicular(&self.control_point)
        } else {
            axis
        };
        (axis_angle(&axis, self.radius) * self.control_point, false)
    }

    /// Test `direction` against the corridor between this cone and `next`.
    ///
    /// Returns `None` when `direction` is outside both great tangent triangles
    /// (control point, tangent center, next control point). Inside a triangle,
    /// the result is `direction` itself if it lies in the corridor, or the
    /// nearest point on the tangent circle if it lies within that circle.
    pub fn on_great_tangent_triangle(
        &self,
        next: &Self,
        direction: &Vector3<f64>,
    ) -> Option<Vector3<f64>> {
        let c1 = &self.control_point;
        let c2 = &next.control_point;
        let side = direction.dot(&c1.cross(c2));
        let center = if side < 0.0 {
            let t1 = &self.tangent_center_1;
            if direction.dot(&c1.cross(t1)) > 0.0 && direction.dot(&t1.cross(c2)) > 0.0 {
                t1
            } else {
                return None;
            }
        } else {
            let t2 = &self.tangent_center_2;
            if direction.dot(&t2.cross(c1)) > 0.0 && direction.dot(&c2.cross(t2)) > 0.0 {
                t2
            } else {
                return None;
            }
        };

        if direction.dot(center) > self.tangent_radius_cos {
            let axis = center.cross(direction);
            let axis = if axis.norm_squared() < ZERO_EPSILON {
                any_perpendicular(center)
            } else {
                axis
            };
            Some(axis_angle(&axis, self.tangent_radius) * center)
        } else {
            Some(*direction)
        }
    }

    /// Nearest point to `direction` on the great arc from this control point
    /// to `next`'s, if its projection falls between the two.
    pub fn closest_on_path_arc(&self, next: &Self, direction: &Vector3<f64>) -> Option<Vector3<f64>> {
        let c1 = &self.control_point;
        let c2 = &next.control_point;
        let normal = c1.cross(c2);
        if normal.norm_squared() < ZERO_EPSILON {
            return None;
        }
        let normal = normal.normalize();
        let projected = direction - normal * direction.dot(&normal);
        if projected.norm_squared() < ZERO_EPSILON {
            return None;
        }
        let projected = projected.normalize();
        let between = c1.cross(&projected).dot(&normal) >= 0.0
            && projected.cross(c2).dot(&normal) >= 0.0;
        between.then_some(projected)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
