//! Mesh fixtures shared by the unit tests

use crate::nav_mesh_builder::{NavMeshBuilder, NavMeshCreateParams};
use crate::{MESH_NULL_IDX, NavMesh, NavMeshParams, PolyFlags, Result, TileRef};

const NVP: usize = 6;

/// Builder input for a flat `n` x `n` grid of unit quads
///
/// Polygons are row-major (`z * n + x`), outer edges are tile portals and
/// the surface lies at `origin[1]`.
pub fn create_grid_params(
    tile_x: i32,
    tile_y: i32,
    n: usize,
    cell_size: f32,
    origin: [f32; 3],
) -> NavMeshCreateParams {
    let stride = n + 1;
    let mut verts = Vec::with_capacity(stride * stride * 3);
    for z in 0..stride {
        for x in 0..stride {
            verts.extend_from_slice(&[x as u16, 1, z as u16]);
        }
    }

    let vi = |x: usize, z: usize| (z * stride + x) as u16;
    let pi = |x: usize, z: usize| (z * n + x) as u16;
    let mut polys = Vec::with_capacity(n * n * NVP * 2);
    for z in 0..n {
        for x in 0..n {
            let mut p = [MESH_NULL_IDX; NVP * 2];
            p[..4].copy_from_slice(&[vi(x, z), vi(x, z + 1), vi(x + 1, z + 1), vi(x + 1, z)]);
            p[NVP] = if x > 0 { pi(x - 1, z) } else { 0x8000 };
            p[NVP + 1] = if z + 1 < n { pi(x, z + 1) } else { 0x8001 };
            p[NVP + 2] = if x + 1 < n { pi(x + 1, z) } else { 0x8002 };
            p[NVP + 3] = if z > 0 { pi(x, z - 1) } else { 0x8003 };
            polys.extend_from_slice(&p);
        }
    }

    let size = n as f32 * cell_size;
    NavMeshCreateParams {
        verts,
        vert_count: stride * stride,
        polys,
        poly_flags: vec![PolyFlags::WALK; n * n],
        poly_areas: vec![0; n * n],
        poly_count: n * n,
        nvp: NVP,
        tile_x,
        tile_y,
        bmin: [origin[0], origin[1] - 1.0, origin[2]],
        bmax: [origin[0] + size, origin[1] + 1.0, origin[2] + size],
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.5,
        cs: cell_size,
        ch: 1.0,
        build_bv_tree: true,
        ..Default::default()
    }
}

/// Tile data for [`create_grid_params`]
pub fn create_grid_tile_data(
    tile_x: i32,
    tile_y: i32,
    n: usize,
    cell_size: f32,
    origin: [f32; 3],
) -> Result<Vec<u8>> {
    NavMeshBuilder::create_nav_mesh_data(&create_grid_params(tile_x, tile_y, n, cell_size, origin))
}

/// Single tile 3 x 3 grid with unit cells at the origin
pub fn create_test_nav_mesh() -> Result<NavMesh> {
    NavMesh::new_single_tile(&create_grid_tile_data(0, 0, 3, 1.0, [0.0; 3])?)
}

/// `tiles_x` x `tiles_z` tiles, each an `n` x `n` grid of unit cells
pub fn create_multi_tile_nav_mesh(tiles_x: i32, tiles_z: i32, n: usize) -> Result<NavMesh> {
    let size = n as f32;
    let mut mesh = NavMesh::new(NavMeshParams {
        origin: [0.0; 3],
        tile_width: size,
        tile_height: size,
        max_tiles: 64,
        max_polys_per_tile: 256,
    })?;
    for tz in 0..tiles_z {
        for tx in 0..tiles_x {
            let origin = [tx as f32 * size, 0.0, tz as f32 * size];
            mesh.add_tile(&create_grid_tile_data(tx, tz, n, 1.0, origin)?, TileRef::NULL)?;
        }
    }
    Ok(mesh)
}

/// 4 x 4 grid with one bidirectional jump connection from cell (0, 0) to
/// cell (3, 3)
pub fn create_off_mesh_params() -> NavMeshCreateParams {
    let mut params = create_grid_params(0, 0, 4, 1.0, [0.0; 3]);
    params.off_mesh_con_verts = vec![0.5, 0.0, 0.5, 3.5, 0.0, 3.5];
    params.off_mesh_con_rad = vec![0.5];
    params.off_mesh_con_flags = vec![PolyFlags::JUMP];
    params.off_mesh_con_areas = vec![2];
    params.off_mesh_con_dir = vec![1];
    params.off_mesh_con_user_id = vec![42];
    params.off_mesh_con_count = 1;
    params
}

pub fn create_off_mesh_tile_data() -> Result<Vec<u8>> {
    NavMeshBuilder::create_nav_mesh_data(&create_off_mesh_params())
}

pub fn create_off_mesh_nav_mesh() -> Result<NavMesh> {
    NavMesh::new_single_tile(&create_off_mesh_tile_data()?)
}
