//! Example: Load a scene description and show how it would be converted.
//!
//! Run with: cargo run --example inspect_scene -- assets/shot.json

use std::env;

use bakeshift_core::scene::HostScene;
use bakeshift_core::{classify, load_description, ConversionSettings};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("Usage: inspect_scene <path-to-scene-json>");
        println!("\nExample:");
        println!("  cargo run --example inspect_scene -- assets/shot.json");
        return;
    }

    let path = &args[1];
    println!("Loading scene description: {}", path);

    match load_description(path) {
        Ok(loaded) => {
            let scene = &loaded.scene;
            let roles = &loaded.roles;
            println!("\n=== Scene: {} ===", scene.name());
            println!("Nodes: {}", scene.node_count());
            println!("Range: {}..={}", roles.range.start(), roles.range.end());
            println!("Namespaces: {:?}", scene.namespaces());

            println!("\n--- Hierarchy ---");
            for root in scene.root_nodes() {
                let mut stack = vec![(root, 0usize)];
                while let Some((node, depth)) = stack.pop() {
                    let (Ok(name), Ok(kind)) = (scene.node_name(node), scene.node_kind(node)) else {
                        continue;
                    };
                    println!("  {}{} ({})", "  ".repeat(depth), name, kind.tag());
                    if let Ok(children) = scene.children(node) {
                        stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
                    }
                }
            }

            let classification = classify(
                scene,
                &roles.geometry_roots,
                roles.range,
                &ConversionSettings::default(),
            );
            println!("\n--- Classification ---");
            println!("  {}", classification.counts());
            for skipped in &classification.skipped {
                println!("  skipped {}", skipped);
            }
        }
        Err(e) => {
            eprintln!("Error loading scene description: {}", e);
        }
    }
}
