use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chunkspace_common::GRID_RESOLUTION;
use chunkspace_format::{ChunkDoc, ChunkSource, DirSource, GridBounds, SpaceSettings, write_outside_grid};
use chunkspace_kernel::{GraphError, Space};
use chunkspace_stream::{StreamConfig, WorldContext};
use clap::{Parser, Subcommand};
use glam::{Affine3A, Vec3};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chunkspace-cli", about = "CLI tool for chunk directories")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Write a directory of outside chunks covering a grid
    Generate {
        /// Directory to create
        dir: PathBuf,
        /// Cells along x
        #[arg(short = 'x', long, default_value = "4")]
        width: i32,
        /// Cells along z
        #[arg(short = 'z', long, default_value = "4")]
        depth: i32,
        /// Grid cell of the first chunk, as `x,z`
        #[arg(long, default_value = "0,0", value_parser = parse_cell)]
        origin: (i32, i32),
    },
    /// Print the boundaries and portals of a chunk file
    Inspect {
        /// Path to a `.chunk` file
        file: PathBuf,
    },
    /// Load every chunk of a directory and check the graph invariants
    Validate {
        dir: PathBuf,
    },
    /// Move a camera through a directory and report streaming per frame
    Stream {
        dir: PathBuf,
        /// Start point, as `x,z` in world units
        #[arg(long, default_value = "50,50", value_parser = parse_point)]
        from: (f32, f32),
        /// End point, as `x,z` in world units
        #[arg(long, value_parser = parse_point)]
        to: Option<(f32, f32)>,
        #[arg(short, long, default_value = "60")]
        frames: usize,
        /// YAML stream configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn parse_pair<T: std::str::FromStr>(s: &str) -> Result<(T, T), String> {
    let (a, b) = s.split_once(',').ok_or_else(|| format!("expected `a,b`, got `{s}`"))?;
    let parse = |v: &str| v.trim().parse::<T>().map_err(|_| format!("bad number `{v}`"));
    Ok((parse(a)?, parse(b)?))
}

fn parse_cell(s: &str) -> Result<(i32, i32), String> {
    parse_pair(s)
}

fn parse_point(s: &str) -> Result<(f32, f32), String> {
    parse_pair(s)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("chunkspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", chunkspace_common::crate_info());
            println!("format: {}", chunkspace_format::crate_info());
            println!("kernel: {}", chunkspace_kernel::crate_info());
            println!("stream: {}", chunkspace_stream::crate_info());
        }
        Commands::Generate {
            dir,
            width,
            depth,
            origin: (x0, z0),
        } => {
            if width < 1 || depth < 1 {
                bail!("grid must be at least 1x1, got {width}x{depth}");
            }
            let settings = SpaceSettings::new(GridBounds::new(x0, z0, x0 + width - 1, z0 + depth - 1));
            let source = DirSource::create(&dir, &settings)
                .with_context(|| format!("creating {}", dir.display()))?;
            let written = write_outside_grid(&source, &settings)?;
            println!("wrote {written} chunks to {}", dir.display());
        }
        Commands::Inspect { file } => inspect(&file)?,
        Commands::Validate { dir } => validate(&dir)?,
        Commands::Stream {
            dir,
            from,
            to,
            frames,
            config,
        } => {
            let config = match config {
                Some(path) => StreamConfig::load(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => StreamConfig::default(),
            };
            stream(&dir, from, to.unwrap_or(from), frames, config)?;
        }
    }

    Ok(())
}

fn inspect(file: &Path) -> anyhow::Result<()> {
    let reader = std::fs::File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let doc: ChunkDoc = serde_json::from_reader(std::io::BufReader::new(reader))
        .with_context(|| format!("parsing {}", file.display()))?;

    println!("chunk: {}", file.display());
    if let Some(t) = &doc.transform {
        println!("transform: translation {:?}", t.to_affine().translation);
    }
    if let Some(shell) = &doc.shell {
        println!("shell: {} {:?}", shell.resource, shell.bounding_box);
    }
    for (i, b) in doc.boundaries.iter().enumerate() {
        println!("boundary {i}: normal {:?} d {}", b.normal, b.d);
        for p in &b.portals {
            let target = if p.chunk.is_empty() { "<unnamed>" } else { p.chunk.as_str() };
            println!(
                "  portal '{}' -> {target} ({} points{}{})",
                p.label,
                p.points.len(),
                if p.internal { ", internal" } else { "" },
                if p.permissive { "" } else { ", blocking" },
            );
        }
    }
    if !doc.overlappers.is_empty() {
        println!("overlappers: {}", doc.overlappers.join(", "));
    }
    Ok(())
}

fn validate(dir: &Path) -> anyhow::Result<()> {
    let source = Arc::new(DirSource::open(dir).with_context(|| format!("opening {}", dir.display()))?);
    let identifiers = source.chunk_identifiers()?;
    let mut space = Space::new();
    let mapping = space.add_mapping(source, Affine3A::IDENTITY)?;

    let mut degraded = 0;
    let mut bind_errors = 0;
    for identifier in &identifiers {
        let Some(id) = space.find_chunk_by_name(identifier, mapping.id(), true) else {
            continue;
        };
        if space.chunk(id).is_some_and(|c| c.is_loaded()) {
            continue;
        }
        match space.load_now(id) {
            Ok(true) if space.chunk(id).is_some_and(|c| !c.is_good()) => degraded += 1,
            Ok(_) => {}
            Err(e @ GraphError::MissingReversePortal { .. }) => {
                tracing::error!(chunk = %identifier, error = %e, "bind failed");
                bind_errors += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("loading {identifier}")),
        }
    }

    let bounds = space.grid_bounds();
    let half = GRID_RESOLUTION * 0.5;
    let centre = Vec3::new(
        (bounds.min_x + bounds.max_x + 1) as f32 * half,
        0.0,
        (bounds.min_y + bounds.max_y + 1) as f32 * half,
    );
    space.focus(centre);

    let violations = space.validate();
    println!(
        "{} chunks, {} degraded, {} bind errors, {} violations",
        identifiers.len(),
        degraded,
        bind_errors,
        violations.len()
    );
    for v in &violations {
        println!("  {v}");
    }
    if bind_errors > 0 || !violations.is_empty() {
        bail!("{} is inconsistent", dir.display());
    }
    Ok(())
}

fn stream(dir: &Path, from: (f32, f32), to: (f32, f32), frames: usize, config: StreamConfig) -> anyhow::Result<()> {
    let source = Arc::new(DirSource::open(dir).with_context(|| format!("opening {}", dir.display()))?);
    let mut world = WorldContext::new(config)?;
    world.add_mapping(0, source, Affine3A::IDENTITY)?;

    let start = Vec3::new(from.0, 0.0, from.1);
    let end = Vec3::new(to.0, 0.0, to.1);
    let frames = frames.max(1);
    for frame in 0..frames {
        let t = if frames == 1 { 1.0 } else { frame as f32 / (frames - 1) as f32 };
        world.set_camera(0, start.lerp(end, t));
        let stats = world.tick(1.0 / 60.0)?;
        println!(
            "frame {frame:4}: online {:4} loading {:2} +{} bound {} ejected {} focused {} closest {} ({:?})",
            stats.online,
            stats.loading,
            stats.loads_started,
            stats.loads_bound,
            stats.chunks_ejected,
            stats.chunks_focused,
            stats.closest_unloaded.map_or("-".to_string(), |d| format!("{d:.0}")),
            stats.frame_time,
        );
    }
    world.flush()?;

    let timer = world.manager().timer();
    println!(
        "frame time: avg {:?} min {:?} max {:?} over {} frames",
        timer.average(),
        timer.min(),
        timer.max(),
        timer.count()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pairs_are_parsed() {
        assert_eq!(parse_cell("3,-2"), Ok((3, -2)));
        assert_eq!(parse_point(" 50.5, 20 "), Ok((50.5, 20.0)));
        assert!(parse_cell("3").is_err());
        assert!(parse_cell("a,b").is_err());
    }

    #[test]
    fn stream_defaults_to_a_still_camera() {
        let cli = Cli::try_parse_from(["chunkspace-cli", "stream", "world"]).unwrap();
        match cli.command {
            Commands::Stream { from, to, frames, .. } => {
                assert_eq!(from, (50.0, 50.0));
                assert!(to.is_none());
                assert_eq!(frames, 60);
            }
            _ => panic!("expected stream"),
        }
    }

    #[test]
    fn generated_directory_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid");
        let settings = SpaceSettings::new(GridBounds::new(0, 0, 2, 1));
        let source = DirSource::create(&path, &settings).unwrap();
        write_outside_grid(&source, &settings).unwrap();

        validate(&path).unwrap();
        inspect(&path.join("00000000o.chunk")).unwrap();
    }
}
