//! manybone IK command-line tool.
//!
//! Provides three modes of operation:
//! - `solve`: Load a TOML scene, run the solver for N frames and print the result
//! - `check`: Validate a constraint file and summarize it
//! - `info`: Print crate versions and solver defaults

mod scene;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use manybone_core::{ConstraintSet, SkeletonSource, SolverConfig};

use crate::scene::{SceneConfig, SceneError};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Constrained inverse kinematics for bone chains.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a scene and print the final bone poses.
    Solve {
        /// Scene file (TOML).
        scene: PathBuf,

        /// Override the number of frames to solve.
        #[arg(short, long)]
        frames: Option<u32>,

        /// Override the blending delta.
        #[arg(short, long)]
        blend: Option<f64>,
    },

    /// Validate a constraint file.
    Check {
        /// Constraint file (TOML).
        constraints: PathBuf,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn run_solve(path: &Path, frames: Option<u32>, blend: Option<f64>) -> Result<(), SceneError> {
    let mut scene = SceneConfig::from_file(path)?;
    if let Some(frames) = frames {
        scene.frames = frames;
    }
    if let Some(blend) = blend {
        scene.blend = blend;
    }
    let (mut skeleton, mut task) = scene.build()?;
    info!(
        scene = %path.display(),
        joints = task.chain().len(),
        frames = scene.frames,
        "Loaded scene"
    );

    let options = scene.solve_options();
    for frame in 0..scene.frames {
        let report = task.solve_with(&mut skeleton, &options);
        println!(
            "frame {}: skipped={}, iterations={}, rmsd={:.6}, error={:.6}",
            frame + 1,
            report.skipped,
            report.iterations,
            report.rmsd,
            report.effector_error
        );
        // Next frame starts from the solved pose.
        skeleton.bake_overrides();
    }

    let globals = skeleton.compute_global_poses();
    println!();
    for item in task.chain().items() {
        let pose = globals[item.bone().index()];
        let t = pose.translation.vector;
        let (roll, pitch, yaw) = pose.rotation.euler_angles();
        println!(
            "  {:<12} pos=({:.4}, {:.4}, {:.4}) rot=({:.2}, {:.2}, {:.2})",
            item.name(),
            t.x,
            t.y,
            t.z,
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees()
        );
    }
    Ok(())
}

fn run_check(path: &Path) -> Result<(), SceneError> {
    let set = ConstraintSet::from_file(path)?;
    println!("{}: {} joint record(s)", path.display(), set.len());
    for joint in &set.joints {
        let twist = joint.twist.map_or_else(
            || "free".to_string(),
            |t| format!("{:.1}..{:.1} deg", t.min_angle_degrees(), t.min_angle_degrees() + t.range_degrees()),
        );
        println!(
            "  {:<12} cones={} twist={} softness={:.2} stiffness={:.2}{}",
            joint.bone,
            joint.cones.len(),
            twist,
            joint.softness,
            joint.stiffness,
            if joint.orientation_locked { " locked" } else { "" }
        );
    }
    Ok(())
}

fn run_info() {
    let defaults = SolverConfig::default();
    println!("manybone v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  manybone-core {}", env!("CARGO_PKG_VERSION"));
    println!("  manybone-ik   {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("solver defaults:");
    println!("  dampening            {:.2} deg", defaults.default_dampening.to_degrees());
    println!("  iterations           {}", defaults.iterations);
    println!("  stabilization passes {}", defaults.stabilization_passes);
    println!("  blend threshold      {}", defaults.blend_threshold);
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Solve { scene, frames, blend }) => run_solve(&scene, frames, blend),
        Some(Commands::Check { constraints }) => run_check(&constraints),
        Some(Commands::Info) | None => {
            run_info();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "manybone failed");
            ExitCode::FAILURE
        }
    }
}
