//! TOML scene files: a skeleton, a root/tip pair, a goal and solver settings.

use std::path::Path;

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::Deserialize;
use thiserror::Error;

use manybone_core::{ConfigError, ConstraintSet, IkError, Skeleton, SkeletonSource, SolverConfig};
use manybone_ik::{create_task, SolveOptions, Task, TaskOptions};

const fn default_frames() -> u32 {
    1
}
const fn default_blend() -> f64 {
    1.0
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ik(#[from] IkError),
}

/// One bone: rest translation plus rest rotation as XYZ Euler angles in degrees.
#[derive(Debug, Clone, Deserialize)]
pub struct BoneSpec {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub translation: [f64; 3],
    #[serde(default)]
    pub rotation: [f64; 3],
}

impl BoneSpec {
    fn rest(&self) -> Isometry3<f64> {
        isometry(self.translation, self.rotation)
    }
}

/// A scene: skeleton, root/tip pair, goal and per-run solver settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    pub root: String,
    pub tip: String,
    pub goal: [f64; 3],
    /// XYZ Euler angles in degrees.
    #[serde(default)]
    pub goal_rotation: [f64; 3],
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default = "default_blend")]
    pub blend: f64,
    #[serde(default)]
    pub override_tip_basis: bool,
    #[serde(default)]
    pub magnet: Option<[f64; 3]>,
    #[serde(default)]
    pub dampening: Option<f64>,
    #[serde(default)]
    pub stabilization_passes: Option<u32>,
    pub bones: Vec<BoneSpec>,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub constraints: ConstraintSet,
}

impl SceneConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, SceneError> {
        let scene: Self = toml::from_str(content)?;
        scene.solver.validate()?;
        Ok(scene)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Build the skeleton. Parents must be listed before their children.
    pub fn skeleton(&self) -> Result<Skeleton, IkError> {
        let mut skeleton = Skeleton::new();
        for spec in &self.bones {
            let parent = match &spec.parent {
                Some(name) => Some(
                    skeleton
                        .find_bone(name)
                        .ok_or_else(|| IkError::UnknownBone(name.clone()))?,
                ),
                None => None,
            };
            skeleton.add_bone(spec.name.as_str(), parent, spec.rest())?;
        }
        Ok(skeleton)
    }

    pub fn goal(&self) -> Isometry3<f64> {
        isometry(self.goal, self.goal_rotation)
    }

    pub fn task_options(&self) -> TaskOptions {
        TaskOptions {
            dampening: self.dampening.unwrap_or(-1.0),
            stabilization_passes: self
                .stabilization_passes
                .and_then(|p| i32::try_from(p).ok())
                .unwrap_or(-1),
            constraints: (!self.constraints.is_empty()).then(|| self.constraints.clone()),
            config: self.solver.clone(),
        }
    }

    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            blending_delta: self.blend,
            override_tip_basis: self.override_tip_basis,
            use_magnet: self.magnet.is_some(),
            magnet_position: self.magnet.map_or_else(Vector3::zeros, Vector3::from),
        }
    }

    /// Skeleton plus a task for its root/tip pair.
    pub fn build(&self) -> Result<(Skeleton, Task), IkError> {
        let skeleton = self.skeleton()?;
        let root = skeleton
            .find_bone(&self.root)
            .ok_or_else(|| IkError::UnknownBone(self.root.clone()))?;
        let tip = skeleton
            .find_bone(&self.tip)
            .ok_or_else(|| IkError::UnknownBone(self.tip.clone()))?;
        let task = create_task(&skeleton, root, tip, self.goal(), &self.task_options())?;
        Ok((skeleton, task))
    }
}

fn isometry(translation: [f64; 3], euler_degrees: [f64; 3]) -> Isometry3<f64> {
    let [x, y, z] = translation;
    let [roll, pitch, yaw] = euler_degrees.map(f64::to_radians);
    Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ARM: &str = include_str!("../scenes/arm.toml");

    #[test]
    fn sample_scene_parses() {
        let scene = SceneConfig::from_toml_str(ARM).unwrap();
        assert_eq!(scene.bones.len(), 3);
        assert_eq!(scene.frames, 3);
        assert_eq!(scene.constraints.len(), 1);
        assert_relative_eq!(scene.goal().translation.x, 0.3);

        let options = scene.task_options();
        assert_relative_eq!(options.dampening, std::f64::consts::PI);
        assert_eq!(options.stabilization_passes, -1);
        assert!(options.constraints.is_some());
    }

    #[test]
    fn sample_scene_builds_and_solves() {
        let scene = SceneConfig::from_toml_str(ARM).unwrap();
        let (mut skeleton, mut task) = scene.build().unwrap();
        assert_eq!(task.chain().len(), 3);
        let report = task.solve_with(&mut skeleton, &scene.solve_options());
        assert!(!report.skipped);
        assert!(skeleton.pose_override(task.tip()).is_some());
    }

    #[test]
    fn minimal_scene_uses_defaults() {
        let scene = SceneConfig::from_toml_str(
            r#"
            root = "a"
            tip = "b"
            goal = [0.0, 1.0, 0.0]
            [[bones]]
            name = "a"
            [[bones]]
            name = "b"
            parent = "a"
            translation = [0.0, 0.0, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(scene.frames, 1);
        assert_eq!(scene.solver, SolverConfig::default());
        assert!(scene.task_options().constraints.is_none());
        assert!(!scene.solve_options().use_magnet);
    }

    #[test]
    fn parent_must_come_first() {
        let scene = SceneConfig::from_toml_str(
            r#"
            root = "a"
            tip = "b"
            goal = [0.0, 0.0, 1.0]
            [[bones]]
            name = "b"
            parent = "a"
            [[bones]]
            name = "a"
            "#,
        )
        .unwrap();
        assert!(matches!(scene.skeleton(), Err(IkError::UnknownBone(name)) if name == "a"));
    }

    #[test]
    fn invalid_solver_section_is_rejected() {
        let err = SceneConfig::from_toml_str(
            r#"
            root = "a"
            tip = "b"
            goal = [0.0, 0.0, 1.0]
            bones = []
            [solver]
            iterations = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SceneError::Config(_)));
    }
}
