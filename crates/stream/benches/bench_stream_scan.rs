use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use chunkspace_format::{GridBounds, MemorySource, SpaceSettings, write_outside_grid};
use chunkspace_kernel::Space;
use chunkspace_stream::{StreamConfig, WorldContext};
use glam::{Affine3A, Vec3};

fn grid_source(side: i32) -> Arc<MemorySource> {
    let settings = SpaceSettings::new(GridBounds::new(0, 0, side - 1, side - 1));
    let source = Arc::new(MemorySource::new("bench/", settings.clone()));
    write_outside_grid(source.as_ref(), &settings).expect("generate grid");
    source
}

fn loaded_space(side: i32) -> Space {
    let mut space = Space::new();
    let mapping = space
        .add_mapping(grid_source(side), Affine3A::IDENTITY)
        .expect("add mapping");
    for x in 0..side {
        for z in 0..side {
            let name = format!("{:04x}{:04x}o", x as u16, z as u16);
            let id = space
                .find_chunk_by_name(&name, mapping.id(), true)
                .expect("chunk");
            let _ = space.load_now(id);
        }
    }
    space
}

fn bench_load_and_bind(side: i32, iterations: usize) {
    let start = Instant::now();
    for _ in 0..iterations {
        black_box(loaded_space(black_box(side)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  load+bind ({side}x{side} chunks, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_focus(side: i32, iterations: usize) {
    let mut space = loaded_space(side);
    let centre = side as f32 * 50.0;
    let start = Instant::now();
    for i in 0..iterations {
        // alternate between two cells so every pass refocuses something
        let x = centre + (i % 2) as f32 * 400.0;
        black_box(space.focus(black_box(Vec3::new(x, 0.0, centre))));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  focus ({side}x{side} chunks, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_stream_tick(side: i32, frames: usize) {
    let mut world = WorldContext::new(StreamConfig::default()).expect("world");
    world
        .add_mapping(0, grid_source(side), Affine3A::IDENTITY)
        .expect("add mapping");

    let start = Instant::now();
    for i in 0..frames {
        let x = 50.0 + (i as f32 * 10.0) % (side as f32 * 100.0 - 100.0);
        world.set_camera(0, Vec3::new(x, 0.0, side as f32 * 50.0));
        let _ = black_box(world.tick(0.016));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / frames as u32;
    println!("  stream tick ({side}x{side} chunks, {frames} frames): {per_iter:?}/frame, total {elapsed:?}");
}

fn main() {
    println!("=== Chunk Streaming Benchmarks ===\n");

    println!("Load and bind:");
    bench_load_and_bind(4, 100);
    bench_load_and_bind(16, 10);

    println!("\nFocus:");
    bench_focus(16, 1000);
    bench_focus(32, 100);

    println!("\nStream tick (scan, bind, eject):");
    bench_stream_tick(16, 1000);
    bench_stream_tick(32, 500);

    println!("\n=== Done ===");
}
