//! CLI tool to run the hit-detection stages on saved frames.
//! Usage: cargo run -p dryfire-vision --features cli --bin analyze_frame --
//!     <frame.png> [previous.png] [output_dir]
//!
//! With one frame the red mask itself is searched for blobs; with a previous
//! frame the temporal diff is searched, the same way the game loop does it.

use dryfire_vision::{segment_red, BlobSelector, TemporalDiffer};
use std::path::PathBuf;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <frame.png> [previous.png] [output_dir]", args[0]);
        std::process::exit(1);
    }

    let frame_path = PathBuf::from(&args[1]);
    let previous_path = args.get(2).map(PathBuf::from).filter(|p| p.is_file());
    let output_dir = args
        .get(if previous_path.is_some() { 3 } else { 2 })
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./debug_output"));
    let _ = std::fs::create_dir_all(&output_dir);

    let load = |path: &PathBuf| match image::open(path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            eprintln!("Failed to open {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let frame = load(&frame_path);
    println!("Frame: {} ({}x{})", frame_path.display(), frame.width(), frame.height());

    let mask = segment_red(&frame);
    let red_pixels = mask.pixels().filter(|p| p[0] > 0).count();
    println!("Red-candidate pixels after opening: {}", red_pixels);
    let _ = mask.save(output_dir.join("red_mask.png"));

    let search = match &previous_path {
        Some(prev_path) => {
            let prev = load(prev_path);
            let prev = dryfire_capture::to_processing_frame(&prev, frame.width(), frame.height());
            let mut differ = TemporalDiffer::new();
            differ.update(segment_red(prev.as_ref()));
            let diff = differ.update(mask).unwrap_or_default();
            let _ = diff.save(output_dir.join("diff_mask.png"));
            println!("Diffed against {}", prev_path.display());
            diff
        }
        None => mask,
    };

    let labeled = dryfire_vision::connected_components(&search);
    println!("\n=== Components ({}) ===", labeled.components.len());
    for comp in &labeled.components {
        let c = comp.centroid().unwrap_or_else(nalgebra::Point2::origin);
        println!(
            "  #{:<3} area={:<6} centroid=({:.1}, {:.1}) bbox={:?}..{:?}",
            comp.label, comp.area, c.x, c.y, comp.min, comp.max
        );
    }

    let selector = BlobSelector::new(12, 8);
    match selector.select(&search) {
        Some(det) => println!(
            "\nSelected blob: ({:.1}, {:.1}) area {}",
            det.centroid.x, det.centroid.y, det.area
        ),
        None => println!(
            "\nNo blob above min_area={} sensitivity={}",
            selector.min_area, selector.sensitivity
        ),
    }

    println!("\nDebug images saved to: {}", output_dir.display());
}
