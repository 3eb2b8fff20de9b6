//! CLI utility for inspecting navigation meshes, querying paths and running
//! crowd scenarios

mod demo;
mod scenario;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nav_detour::{NavMesh, NavMeshQuery, QueryFilter, StraightPathFlags, StraightPathOptions};

use crate::demo::{parse_cell, DemoGrid};
use crate::scenario::Scenario;

/// Nodes available to path searches run from the command line
const QUERY_MAX_NODES: usize = 4096;

/// A CLI utility for tiled navigation meshes and crowd simulation
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the parameters and tiles of a navigation mesh
    Info {
        /// Navigation mesh file
        #[clap(value_parser)]
        mesh: PathBuf,
    },

    /// Find a path on a navigation mesh
    FindPath {
        /// Input navigation mesh file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector, allow_hyphen_values = true)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector, allow_hyphen_values = true)]
        end: Vec3,

        /// Half extents of the box searched around the start and end (x,y,z)
        #[clap(long, value_parser = parse_vector, default_value = "2,4,2")]
        extents: Vec3,

        /// Maximum number of polygons in the path
        #[clap(long, default_value = "256")]
        max_path: usize,

        /// Output path file
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Write a generated grid mesh
    DemoMesh {
        /// Output navigation mesh file
        #[clap(long, value_parser)]
        output: PathBuf,

        /// Number of cells per side
        #[clap(long, default_value = "10")]
        size: usize,

        /// Side length of a cell
        #[clap(long, default_value = "1.0")]
        cell_size: f32,

        /// Cell to leave out of the mesh (x,z); may be repeated
        #[clap(long = "block", value_parser = parse_cell)]
        blocked: Vec<(usize, usize)>,

        /// Start of a bidirectional jump link (x,y,z); pairs with --link-end
        #[clap(long, value_parser = parse_vector)]
        link_start: Vec<Vec3>,

        /// End of a bidirectional jump link (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        link_end: Vec<Vec3>,
    },

    /// Run a crowd scenario on a navigation mesh
    Crowd {
        /// Input navigation mesh file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Scenario file (JSON)
        #[clap(long, value_parser)]
        scenario: PathBuf,

        /// Number of updates, overriding the scenario
        #[clap(long)]
        steps: Option<usize>,

        /// Write the final agent states as JSON
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();

    if parts.len() != 3 {
        return Err(format!("Vector must have 3 components, got {}", parts.len()));
    }

    let x = parts[0].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let y = parts[1].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let z = parts[2].trim().parse::<f32>().map_err(|e| e.to_string())?;

    Ok(Vec3::new(x, y, z))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Info { mesh } => info(&mesh),
        Commands::FindPath {
            mesh,
            start,
            end,
            extents,
            max_path,
            output,
        } => find_path(&mesh, start, end, extents, max_path, output.as_deref()),
        Commands::DemoMesh {
            output,
            size,
            cell_size,
            blocked,
            link_start,
            link_end,
        } => {
            if link_start.len() != link_end.len() {
                bail!(
                    "Got {} link starts but {} link ends",
                    link_start.len(),
                    link_end.len()
                );
            }
            let grid = DemoGrid {
                size,
                cell_size,
                blocked,
                links: link_start.into_iter().zip(link_end).collect(),
            };
            demo_mesh(&grid, &output)
        }
        Commands::Crowd {
            mesh,
            scenario,
            steps,
            output,
        } => run_crowd(&mesh, &scenario, steps, output.as_deref()),
    }
}

fn load_mesh(path: &Path) -> Result<NavMesh> {
    println!("Loading navigation mesh from {}...", path.display());
    let nav_mesh = NavMesh::load_from_file(path)
        .with_context(|| format!("Failed to load navigation mesh: {}", path.display()))?;
    println!("Loaded navigation mesh with {} tiles", nav_mesh.tile_count());
    Ok(nav_mesh)
}

/// Print the parameters and tiles of a navigation mesh
fn info(mesh_path: &Path) -> Result<()> {
    let nav_mesh = load_mesh(mesh_path)?;

    let params = nav_mesh.params();
    println!("Origin: {:?}", params.origin);
    println!("Tile size: {} x {}", params.tile_width, params.tile_height);
    println!(
        "Capacity: {} tiles, {} polygons per tile",
        params.max_tiles, params.max_polys_per_tile
    );

    for tile in nav_mesh.tiles() {
        let Some(header) = &tile.header else {
            continue;
        };
        println!(
            "Tile ({}, {}) layer {}: {} polygons, {} vertices, {} off-mesh connections, {} BV nodes",
            header.x,
            header.y,
            header.layer,
            header.poly_count,
            header.vert_count,
            header.off_mesh_con_count,
            header.bv_node_count
        );
        println!("  bounds: min={:?}, max={:?}", header.bmin, header.bmax);
        println!(
            "  agent: height={}, radius={}, climb={}",
            header.walkable_height, header.walkable_radius, header.walkable_climb
        );
    }

    Ok(())
}

/// Find a path on a navigation mesh
fn find_path(
    mesh_path: &Path,
    start: Vec3,
    end: Vec3,
    extents: Vec3,
    max_path: usize,
    output: Option<&Path>,
) -> Result<()> {
    let nav_mesh = load_mesh(mesh_path)?;

    println!("Finding path from {:?} to {:?}...", start, end);

    let mut query = NavMeshQuery::new(&nav_mesh, QUERY_MAX_NODES);
    let filter = QueryFilter::default();
    let start_pos = start.to_array();
    let end_pos = end.to_array();
    let ext = extents.to_array();

    // Find nearest polygons to start and end positions
    let (start_ref, closest_start) = query
        .find_nearest_poly(&start_pos, &ext, &filter)
        .context("Failed to search for the start polygon")?;
    if !start_ref.is_valid() {
        bail!("No polygon found near the start position {start_pos:?}");
    }
    let (end_ref, closest_end) = query
        .find_nearest_poly(&end_pos, &ext, &filter)
        .context("Failed to search for the end polygon")?;
    if !end_ref.is_valid() {
        bail!("No polygon found near the end position {end_pos:?}");
    }

    println!("Found start polygon: {} at {:?}", start_ref, closest_start);
    println!("Found end polygon: {} at {:?}", end_ref, closest_end);

    let path = query
        .find_path(start_ref, end_ref, &closest_start, &closest_end, &filter, max_path)
        .context("Failed to find path")?;

    if path.is_partial() {
        println!("Found partial path with {} polygons ({})", path.polys.len(), path.status);
    } else {
        println!("Found path with {} polygons", path.polys.len());
    }

    // A partial path ends in the polygon closest to the goal
    let straight_path = query
        .find_straight_path(
            &closest_start,
            &closest_end,
            &path.polys,
            max_path,
            StraightPathOptions::empty(),
        )
        .context("Failed to find straight path")?;

    println!("Generated straight path with {} waypoints", straight_path.points.len());

    let mut out: Box<dyn Write> = match output {
        Some(output_path) => {
            println!("Saving path to {}...", output_path.display());
            let file = File::create(output_path)
                .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout().lock()),
    };

    writeln!(out, "# Path from {:?} to {:?}", start, end)?;
    writeln!(out, "# {} waypoints", straight_path.points.len())?;
    for point in &straight_path.points {
        let p = point.pos;
        if point.flags.contains(StraightPathFlags::OFFMESH_CONNECTION) {
            writeln!(out, "{},{},{} # off-mesh {}", p[0], p[1], p[2], point.reference)?;
        } else {
            writeln!(out, "{},{},{}", p[0], p[1], p[2])?;
        }
    }
    out.flush()?;

    Ok(())
}

/// Write a generated grid mesh
fn demo_mesh(grid: &DemoGrid, output: &Path) -> Result<()> {
    println!(
        "Generating {}x{} grid mesh with {} blocked cells and {} links...",
        grid.size,
        grid.size,
        grid.blocked.len(),
        grid.links.len()
    );

    let params = grid.create_params()?;
    let nav_mesh = NavMesh::from_create_params(&params).context("Failed to build navigation mesh")?;

    println!("Saving navigation mesh to {}...", output.display());
    nav_mesh
        .save_to_file(output)
        .with_context(|| format!("Failed to save navigation mesh: {}", output.display()))?;

    Ok(())
}

/// Run a crowd scenario and report where the agents ended up
fn run_crowd(mesh_path: &Path, scenario_path: &Path, steps: Option<usize>, output: Option<&Path>) -> Result<()> {
    let nav_mesh = load_mesh(mesh_path)?;
    let scenario = Scenario::load(scenario_path)?;
    let steps = steps.unwrap_or(scenario.steps);

    println!(
        "Running {} agents for {} steps of {}s...",
        scenario.agents.len(),
        steps,
        scenario.dt
    );
    let reports = scenario.run(&nav_mesh, steps);

    for report in &reports {
        match &report.snapshot {
            Some(snap) => println!(
                "Agent {}: {:?} {:?} pos={:?} vel={:?}",
                report.entry, snap.state, snap.target_state, snap.pos, snap.vel
            ),
            None => println!("Agent {}: not added", report.entry),
        }
    }

    if let Some(output_path) = output {
        println!("Saving agent states to {}...", output_path.display());
        let file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &reports)
            .context("Failed to write agent states")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1,2.5,-3"), Ok(Vec3::new(1.0, 2.5, -3.0)));
        assert_eq!(parse_vector(" 0, 0 ,0"), Ok(Vec3::ZERO));
        assert!(parse_vector("1,2").is_err());
        assert!(parse_vector("1,x,3").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "nav-cli", "find-path", "--mesh", "a.navmesh", "--start", "1,0,1", "--end", "-4,0,2",
        ])
        .unwrap();
        match args.command {
            Commands::FindPath { start, end, extents, max_path, .. } => {
                assert_eq!(start, Vec3::new(1.0, 0.0, 1.0));
                assert_eq!(end, Vec3::new(-4.0, 0.0, 2.0));
                assert_eq!(extents, Vec3::new(2.0, 4.0, 2.0));
                assert_eq!(max_path, 256);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = Args::try_parse_from([
            "nav-cli", "demo-mesh", "--output", "g.navmesh", "--block", "2,3", "--block", "2,4",
        ])
        .unwrap();
        match args.command {
            Commands::DemoMesh { blocked, size, .. } => {
                assert_eq!(blocked, vec![(2, 3), (2, 4)]);
                assert_eq!(size, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_demo_mesh_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.navmesh");
        let grid = DemoGrid {
            size: 6,
            cell_size: 1.0,
            blocked: vec![(3, 0), (3, 1), (3, 2)],
            links: Vec::new(),
        };
        demo_mesh(&grid, &path).unwrap();

        let out = dir.path().join("path.txt");
        find_path(
            &path,
            Vec3::new(0.5, 0.0, 0.5),
            Vec3::new(5.5, 0.0, 0.5),
            Vec3::new(1.0, 2.0, 1.0),
            256,
            Some(&out),
        )
        .unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        let waypoints: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        // Around the top of the wall
        assert!(waypoints.len() >= 3, "{text}");
        assert!(info(&path).is_ok());
        assert!(load_mesh(&dir.path().join("missing.navmesh")).is_err());
    }
}
