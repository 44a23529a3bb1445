use std::f64::consts::TAU;

use crate::math::{signed_angle_difference, wrap_tau};

/// Allowed twist about the bone axis: `[min_angle, min_angle + range]` on the circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwistConstraint {
    min_angle: f64,
    range: f64,
}

impl Default for TwistConstraint {
    fn default() -> Self {
        Self {
            min_angle: 0.0,
            range: TAU,
        }
    }
}

impl TwistConstraint {
    pub fn new(min_angle: f64, range: f64) -> Self {
        Self {
            min_angle: wrap_tau(min_angle),
            range: range.clamp(0.0, TAU),
        }
    }

    pub const fn min_angle(&self) -> f64 {
        self.min_angle
    }

    pub const fn range(&self) -> f64 {
        self.range
    }

    /// Whether every twist is allowed.
    pub fn is_free(&self) -> bool {
        self.range >= TAU
    }

    pub fn mid_angle(&self) -> f64 {
        wrap_tau(self.min_angle + self.range * 0.5)
    }

    /// Signed rotation that brings `twist` back into range; 0 when it already is.
    ///
    /// Out-of-range angles go to whichever bound is closer around the circle.
    /// Ties go to the upper bound.
    pub fn snap_delta(&self, twist: f64) -> f64 {
        if self.is_free() {
            return 0.0;
        }
        let from_min = wrap_tau(twist - self.min_angle);
        if from_min <= self.range {
            return 0.0;
        }
        let past_max = from_min - self.range;
        let before_min = TAU - from_min;
        if before_min < past_max {
            before_min
        } else {
            -past_max
        }
    }

    /// Signed rotation from `twist` to the middle of the range.
    pub fn delta_to_mid(&self, twist: f64) -> f64 {
        signed_angle_difference(twist, self.mid_angle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn twist_clamp_goes_to_nearest_bound() {
        let twist = TwistConstraint::new(0.0, FRAC_PI_2);
        let delta = twist.snap_delta(PI);
        assert_relative_eq!(PI + delta, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn in_range_is_untouched() {
        let twist = TwistConstraint::new(-FRAC_PI_4, FRAC_PI_2);
        assert_eq!(twist.snap_delta(0.0), 0.0);
        assert_eq!(twist.snap_delta(0.2), 0.0);
        assert_eq!(twist.snap_delta(-0.7), 0.0);
    }

    #[test]
    fn wraps_around_to_min_bound() {
        let twist = TwistConstraint::new(0.0, FRAC_PI_2);
        // Just below zero: the min bound is 0.3 away, the max bound much farther.
        let delta = twist.snap_delta(-0.3);
        assert_relative_eq!(delta, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn full_range_never_snaps() {
        let twist = TwistConstraint::default();
        assert!(twist.is_free());
        assert_eq!(twist.snap_delta(2.5), 0.0);
    }

    #[test]
    fn mid_angle_delta() {
        let twist = TwistConstraint::new(0.0, FRAC_PI_2);
        assert_relative_eq!(twist.mid_angle(), FRAC_PI_4);
        assert_relative_eq!(twist.delta_to_mid(0.0), FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(twist.delta_to_mid(-0.5), FRAC_PI_4 + 0.5, epsilon = 1e-12);
    }
}
