use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

/// 5 degrees.
const fn default_dampening() -> f64 {
    0.087_266_462_599_716_48
}
const fn default_iterations() -> u32 {
    10
}
const fn default_stabilization_passes() -> u32 {
    1
}
const fn default_qcp_max_iterations() -> u32 {
    10
}
const fn default_qcp_eval_precision() -> f64 {
    1.0e-6
}
const fn default_qcp_evec_precision() -> f64 {
    1.0e-11
}
const fn default_blend_threshold() -> f64 {
    0.01
}
const fn default_full_twist() -> f64 {
    TAU
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Chain-wide solver defaults.
///
/// Per-task overrides (dampening, stabilization passes) take precedence when
/// they are non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum rotation a joint may take per iteration, in radians (default: 5 deg).
    #[serde(default = "default_dampening")]
    pub default_dampening: f64,

    /// Outer solver iterations per `solve` call (default: 10).
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Extra refinement passes per joint per iteration (default: 1).
    #[serde(default = "default_stabilization_passes")]
    pub stabilization_passes: u32,

    /// Newton iteration cap inside the QCP eigenvalue search (default: 10).
    #[serde(default = "default_qcp_max_iterations")]
    pub qcp_max_iterations: u32,

    /// Relative convergence threshold for the QCP eigenvalue.
    #[serde(default = "default_qcp_eval_precision")]
    pub qcp_eval_precision: f64,

    /// Squared-norm floor below which a QCP eigenvector candidate is rejected.
    #[serde(default = "default_qcp_evec_precision")]
    pub qcp_evec_precision: f64,

    /// Let the QCP translation move the chain root.
    #[serde(default)]
    pub translate_root: bool,

    /// Blending deltas at or below this value skip the solve entirely.
    #[serde(default = "default_blend_threshold")]
    pub blend_threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            default_dampening: default_dampening(),
            iterations: default_iterations(),
            stabilization_passes: default_stabilization_passes(),
            qcp_max_iterations: default_qcp_max_iterations(),
            qcp_eval_precision: default_qcp_eval_precision(),
            qcp_evec_precision: default_qcp_evec_precision(),
            translate_root: false,
            blend_threshold: default_blend_threshold(),
        }
    }
}

impl SolverConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.default_dampening > 0.0 && self.default_dampening <= PI) {
            return Err(ConfigError::invalid(
                "default_dampening",
                format!("{} (must be in (0, pi])", self.default_dampening),
            ));
        }
        if self.iterations == 0 {
            return Err(ConfigError::invalid("iterations", "must be >= 1"));
        }
        if self.qcp_max_iterations == 0 {
            return Err(ConfigError::invalid("qcp_max_iterations", "must be >= 1"));
        }
        if !(self.qcp_eval_precision > 0.0) || !(self.qcp_evec_precision > 0.0) {
            return Err(ConfigError::invalid("qcp_precision", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.blend_threshold) {
            return Err(ConfigError::invalid("blend_threshold", "must be in [0, 1]"));
        }
        Ok(())
    }

    /// Parse and validate from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

// ---------------------------------------------------------------------------
// ConeConfig / TwistConfig
// ---------------------------------------------------------------------------

/// One reach cone: a direction in the joint's limiting frame plus an angular radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConeConfig {
    /// Cone axis; normalized when the constraint is built.
    pub control_point: [f64; 3],
    /// Angular radius in radians.
    pub radius: f64,
}

impl ConeConfig {
    pub const fn new(control_point: [f64; 3], radius: f64) -> Self {
        Self {
            control_point,
            radius,
        }
    }

    pub fn from_degrees(control_point: [f64; 3], radius_degrees: f64) -> Self {
        Self::new(control_point, radius_degrees.to_radians())
    }

    pub fn radius_degrees(&self) -> f64 {
        self.radius.to_degrees()
    }
}

/// Allowed twist about the bone axis: `[min_angle, min_angle + range]` on a circle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwistConfig {
    /// Radians.
    #[serde(default)]
    pub min_angle: f64,
    /// Radians, in `[0, 2pi]`.
    #[serde(default = "default_full_twist")]
    pub range: f64,
}

impl Default for TwistConfig {
    fn default() -> Self {
        Self {
            min_angle: 0.0,
            range: TAU,
        }
    }
}

impl TwistConfig {
    pub const fn new(min_angle: f64, range: f64) -> Self {
        Self { min_angle, range }
    }

    /// Build from degrees, the unit configuration front-ends display.
    pub fn from_degrees(min_angle: f64, range: f64) -> Self {
        Self::new(min_angle.to_radians(), range.to_radians())
    }

    pub fn min_angle_degrees(&self) -> f64 {
        self.min_angle.to_degrees()
    }

    pub fn range_degrees(&self) -> f64 {
        self.range.to_degrees()
    }
}

// ---------------------------------------------------------------------------
// JointConstraintConfig
// ---------------------------------------------------------------------------

/// Persisted constraint record for one bone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointConstraintConfig {
    /// Bone name this record applies to.
    pub bone: String,

    /// Ordered reach cones forming a path on the sphere.
    #[serde(default)]
    pub cones: Vec<ConeConfig>,

    /// Twist range. `None` leaves twist unconstrained.
    #[serde(default)]
    pub twist: Option<TwistConfig>,

    /// Pull back toward the comfortable region, in `[0, 1]`.
    #[serde(default)]
    pub softness: f64,

    /// Resistance to rotation, in `[0, 1]`. Scales the per-iteration dampening.
    #[serde(default)]
    pub stiffness: f64,

    /// Joint never rotates during a solve.
    #[serde(default)]
    pub orientation_locked: bool,
}

impl JointConstraintConfig {
    pub fn new(bone: impl Into<String>) -> Self {
        Self {
            bone: bone.into(),
            cones: Vec::new(),
            twist: None,
            softness: 0.0,
            stiffness: 0.0,
            orientation_locked: false,
        }
    }

    #[must_use]
    pub fn with_cone(mut self, cone: ConeConfig) -> Self {
        self.cones.push(cone);
        self
    }

    #[must_use]
    pub fn with_twist(mut self, twist: TwistConfig) -> Self {
        self.twist = Some(twist);
        self
    }

    #[must_use]
    pub fn with_softness(mut self, softness: f64) -> Self {
        self.softness = softness;
        self
    }

    #[must_use]
    pub fn with_stiffness(mut self, stiffness: f64) -> Self {
        self.stiffness = stiffness;
        self
    }

    #[must_use]
    pub fn locked(mut self) -> Self {
        self.orientation_locked = true;
        self
    }

    /// Whether this record limits orientation at all.
    pub fn is_constrained(&self) -> bool {
        !self.cones.is_empty() || self.twist.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let field = |name: &str| format!("{}.{name}", self.bone);
        for (i, cone) in self.cones.iter().enumerate() {
            let [x, y, z] = cone.control_point;
            if !(x.is_finite() && y.is_finite() && z.is_finite()) {
                return Err(ConfigError::invalid(
                    field(&format!("cones[{i}].control_point")),
                    "must be finite",
                ));
            }
            if x * x + y * y + z * z < 1e-12 {
                return Err(ConfigError::invalid(
                    field(&format!("cones[{i}].control_point")),
                    "must be non-zero",
                ));
            }
            if !(cone.radius > 0.0 && cone.radius <= PI) {
                return Err(ConfigError::invalid(
                    field(&format!("cones[{i}].radius")),
                    format!("{} (must be in (0, pi])", cone.radius),
                ));
            }
        }
        if let Some(twist) = self.twist {
            if !twist.min_angle.is_finite() {
                return Err(ConfigError::invalid(field("twist.min_angle"), "must be finite"));
            }
            if !(0.0..=TAU).contains(&twist.range) {
                return Err(ConfigError::invalid(
                    field("twist.range"),
                    format!("{} (must be in [0, 2pi])", twist.range),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.softness) {
            return Err(ConfigError::invalid(field("softness"), "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.stiffness) {
            return Err(ConfigError::invalid(field("stiffness"), "must be in [0, 1]"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConstraintSet
// ---------------------------------------------------------------------------

/// Flat list of per-bone constraint records, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    #[serde(default)]
    pub joints: Vec<JointConstraintConfig>,
}

impl ConstraintSet {
    pub const fn new() -> Self {
        Self { joints: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, joint: JointConstraintConfig) -> Self {
        self.joints.push(joint);
        self
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Record for `bone`, if any.
    pub fn get(&self, bone: &str) -> Option<&JointConstraintConfig> {
        self.joints.iter().find(|j| j.bone == bone)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, joint) in self.joints.iter().enumerate() {
            if self.joints[..i].iter().any(|j| j.bone == joint.bone) {
                return Err(ConfigError::invalid(
                    format!("joints[{i}].bone"),
                    format!("duplicate record for {}", joint.bone),
                ));
            }
            joint.validate()?;
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let set: Self = toml::from_str(content)?;
        set.validate()?;
        Ok(set)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solver_config_defaults() {
        let config = SolverConfig::default();
        assert_relative_eq!(config.default_dampening, 5f64.to_radians(), epsilon = 1e-12);
        assert_eq!(config.iterations, 10);
        assert_eq!(config.stabilization_passes, 1);
        assert_eq!(config.qcp_max_iterations, 10);
        assert!(!config.translate_root);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn solver_config_partial_toml_uses_defaults() {
        let config = SolverConfig::from_toml_str("iterations = 4\n").unwrap();
        assert_eq!(config.iterations, 4);
        assert_eq!(config.stabilization_passes, 1);
        assert_relative_eq!(config.blend_threshold, 0.01);
    }

    #[test]
    fn solver_config_rejects_zero_iterations() {
        let err = SolverConfig::from_toml_str("iterations = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn solver_config_rejects_bad_dampening() {
        let config = SolverConfig {
            default_dampening: -1.0,
            ..SolverConfig::default()
        };
        assert!(config.validate().is_err());
        let config = SolverConfig {
            default_dampening: f64::NAN,
            ..SolverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn solver_config_from_missing_file() {
        let err = SolverConfig::from_file("/nonexistent/manybone.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn twist_degree_helpers() {
        let twist = TwistConfig::from_degrees(-45.0, 90.0);
        assert_relative_eq!(twist.min_angle, -std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(twist.range_degrees(), 90.0, epsilon = 1e-9);
        assert_relative_eq!(twist.min_angle_degrees(), -45.0, epsilon = 1e-9);
    }

    #[test]
    fn constraint_set_toml_roundtrip_keeps_records() {
        let set = ConstraintSet::new()
            .with(
                JointConstraintConfig::new("upper_arm")
                    .with_cone(ConeConfig::from_degrees([0.0, 0.0, 1.0], 30.0))
                    .with_cone(ConeConfig::from_degrees([1.0, 0.0, 0.0], 20.0))
                    .with_twist(TwistConfig::from_degrees(0.0, 120.0))
                    .with_softness(0.3),
            )
            .with(JointConstraintConfig::new("hand").locked());

        let text = set.to_toml_string().unwrap();
        let parsed = ConstraintSet::from_toml_str(&text).unwrap();
        assert_eq!(parsed, set);
        assert!(parsed.get("hand").unwrap().orientation_locked);
        assert!(parsed.get("missing").is_none());
    }

    #[test]
    fn constraint_set_parses_hand_written_toml() {
        let text = r#"
            [[joints]]
            bone = "forearm"
            softness = 0.5
            cones = [{ control_point = [0.0, 0.0, 1.0], radius = 0.5 }]
            twist = { min_angle = 0.0, range = 1.0 }
        "#;
        let set = ConstraintSet::from_toml_str(text).unwrap();
        let forearm = set.get("forearm").unwrap();
        assert_eq!(forearm.cones.len(), 1);
        assert!(forearm.is_constrained());
        assert_relative_eq!(forearm.twist.unwrap().range, 1.0);
        assert_relative_eq!(forearm.stiffness, 0.0);
    }

    #[test]
    fn constraint_validation_catches_bad_values() {
        let zero_axis = JointConstraintConfig::new("a").with_cone(ConeConfig::new([0.0; 3], 0.3));
        assert!(zero_axis.validate().is_err());

        let big_radius = JointConstraintConfig::new("a").with_cone(ConeConfig::new([0.0, 0.0, 1.0], 4.0));
        assert!(big_radius.validate().is_err());

        let soft = JointConstraintConfig::new("a").with_softness(1.5);
        assert!(soft.validate().is_err());

        let twist = JointConstraintConfig::new("a").with_twist(TwistConfig::new(0.0, 7.0));
        assert!(twist.validate().is_err());
    }

    #[test]
    fn constraint_set_rejects_duplicates() {
        let set = ConstraintSet::new()
            .with(JointConstraintConfig::new("a"))
            .with(JointConstraintConfig::new("a"));
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
