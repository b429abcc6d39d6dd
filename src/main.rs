//! Animtree driver: loads a rig description, ticks its tree and reports the result.
//!
//! Usage: animtree [OPTIONS] <RIG_JSON>
//!
//! Options:
//!   -f, --frames <N>      Frames to simulate (default: 60)
//!   -d, --delta <SECS>    Seconds per frame (default: 1/60)
//!   -s, --speed <UNITS>   Actor speed along its facing (default: 0)
//!   -l, --lod <N>         Predicted level of detail (default: 0)
//!   -h, --help            Print this help

use std::path::PathBuf;
use std::process::ExitCode;

use glam::Vec3;

use animtree::core::logging;
use animtree::tree::{RigDefinition, TreeEvent};

fn main() -> ExitCode {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return ExitCode::SUCCESS;
    }
    let Some(path) = rig_path(&args) else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let frames = parse_usize_arg(&args, &["-f", "--frames"]).unwrap_or(60);
    let delta = parse_f32_arg(&args, &["-d", "--delta"]).unwrap_or(1.0 / 60.0);
    let speed = parse_f32_arg(&args, &["-s", "--speed"]).unwrap_or(0.0);
    let lod = parse_u32_arg(&args, &["-l", "--lod"]).unwrap_or(0);

    let rig = match RigDefinition::load(&path) {
        Ok(rig) => rig,
        Err(e) => {
            log::error!("Failed to load {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let mut tree = match rig.build() {
        Ok(tree) => tree,
        Err(e) => {
            log::error!("Failed to build tree: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(mesh) = tree.mesh_mut() {
        mesh.actor.velocity = Vec3::X * speed;
        mesh.settings.predicted_lod = lod;
    }

    println!("=== Animtree ===");
    println!("Rig:    {}", path.display());
    println!("Nodes:  {}", tree.node_count());
    println!("Frames: {} x {:.4}s", frames, delta);
    println!();

    let mut travelled = Vec3::ZERO;
    let mut notifies = 0usize;
    for frame in 0..frames {
        tree.tick(delta);
        let root_motion = tree.evaluate();
        if root_motion.has_root_motion {
            travelled += root_motion.delta.translation;
        }
        for event in tree.drain_events() {
            match &event {
                TreeEvent::Notify { name, time, .. } => {
                    notifies += 1;
                    println!("[{:>4}] notify '{}' at {:.3}s", frame, name, time);
                }
                other => log::debug!("[{:>4}] {:?}", frame, other),
            }
        }
    }

    println!();
    println!("Notifies fired: {}", notifies);
    println!("Root motion:    ({:.3}, {:.3}, {:.3})", travelled.x, travelled.y, travelled.z);
    if let Some(root_bone) = tree.mesh().and_then(|m| m.local_atoms().first()) {
        let (axis, angle) = root_bone.rotation.to_axis_angle();
        println!(
            "Root bone:      t ({:.3}, {:.3}, {:.3}) r {:.1} deg about ({:.2}, {:.2}, {:.2})",
            root_bone.translation.x,
            root_bone.translation.y,
            root_bone.translation.z,
            angle.to_degrees(),
            axis.x,
            axis.y,
            axis.z
        );
    }
    for node in tree.nodes().iter().filter(|n| n.is_relevant()) {
        println!(
            "  {:<24} {:<16} weight {:.3}",
            node.name.as_deref().unwrap_or("<unnamed>"),
            node.kind.type_name(),
            node.total_weight()
        );
    }
    ExitCode::SUCCESS
}

fn print_usage() {
    println!("Usage: animtree [OPTIONS] <RIG_JSON>");
    println!();
    println!("Options:");
    println!("  -f, --frames <N>      Frames to simulate (default: 60)");
    println!("  -d, --delta <SECS>    Seconds per frame (default: 1/60)");
    println!("  -s, --speed <UNITS>   Actor speed along its facing (default: 0)");
    println!("  -l, --lod <N>         Predicted level of detail (default: 0)");
    println!("  -h, --help            Print this help");
}

/// First argument that is neither an option nor an option's value
fn rig_path(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg.starts_with('-') {
            iter.next();
        } else {
            return Some(PathBuf::from(arg));
        }
    }
    None
}

fn parse_str_arg(args: &[String], flags: &[&str]) -> Option<String> {
    args.iter()
        .position(|a| flags.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_f32_arg(args: &[String], flags: &[&str]) -> Option<f32> {
    parse_str_arg(args, flags).and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flags: &[&str]) -> Option<u32> {
    parse_str_arg(args, flags).and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flags: &[&str]) -> Option<usize> {
    parse_str_arg(args, flags).and_then(|s| s.parse().ok())
}
