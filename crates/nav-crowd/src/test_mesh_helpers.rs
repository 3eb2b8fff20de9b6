//! Mesh fixtures shared by the crowd tests

use nav_detour::{
    MESH_NULL_IDX, NavMesh, NavMeshBuilder, NavMeshCreateParams, NavMeshQuery, OFFMESH_CON_BIDIR,
    PolyFlags, PolyRef, QueryFilter, Result,
};

const NVP: usize = 6;

/// Flat `n` x `n` grid of square cells with `cell_size` sides at `y = 0`
///
/// Cells listed in `blocked` are left out, so their edges become walls.
/// Use [`poly_at`] to look up the polygon of a cell.
pub fn create_grid_nav_mesh(n: usize, cell_size: f32, blocked: &[(usize, usize)]) -> Result<NavMesh> {
    NavMesh::new_single_tile(&NavMeshBuilder::create_nav_mesh_data(&grid_params(n, cell_size, blocked))?)
}

/// 5 x 5 unit grid split by the blocked column `x = 2`, with a
/// bidirectional jump connection from (1.5, 2.5) to (3.5, 2.5)
pub fn create_linked_islands_nav_mesh() -> Result<NavMesh> {
    let blocked: Vec<(usize, usize)> = (0..5).map(|z| (2, z)).collect();
    let mut params = grid_params(5, 1.0, &blocked);
    params.off_mesh_con_verts = vec![1.5, 0.0, 2.5, 3.5, 0.0, 2.5];
    params.off_mesh_con_rad = vec![0.5];
    params.off_mesh_con_flags = vec![PolyFlags::JUMP];
    params.off_mesh_con_areas = vec![0];
    params.off_mesh_con_dir = vec![OFFMESH_CON_BIDIR];
    params.off_mesh_con_user_id = vec![7];
    params.off_mesh_con_count = 1;
    NavMesh::new_single_tile(&NavMeshBuilder::create_nav_mesh_data(&params)?)
}

fn grid_params(n: usize, cell_size: f32, blocked: &[(usize, usize)]) -> NavMeshCreateParams {
    let stride = n + 1;
    let mut verts = Vec::with_capacity(stride * stride * 3);
    for z in 0..stride {
        for x in 0..stride {
            verts.extend_from_slice(&[x as u16, 1, z as u16]);
        }
    }

    let open = |x: usize, z: usize| !blocked.contains(&(x, z));
    let mut index = vec![MESH_NULL_IDX; n * n];
    let mut count = 0u16;
    for z in 0..n {
        for x in 0..n {
            if open(x, z) {
                index[z * n + x] = count;
                count += 1;
            }
        }
    }

    let vi = |x: usize, z: usize| (z * stride + x) as u16;
    let mut polys = Vec::with_capacity(count as usize * NVP * 2);
    for z in 0..n {
        for x in 0..n {
            if !open(x, z) {
                continue;
            }
            let mut p = [MESH_NULL_IDX; NVP * 2];
            p[..4].copy_from_slice(&[vi(x, z), vi(x, z + 1), vi(x + 1, z + 1), vi(x + 1, z)]);
            p[NVP] = if x > 0 { index[z * n + x - 1] } else { MESH_NULL_IDX };
            p[NVP + 1] = if z + 1 < n { index[(z + 1) * n + x] } else { MESH_NULL_IDX };
            p[NVP + 2] = if x + 1 < n { index[z * n + x + 1] } else { MESH_NULL_IDX };
            p[NVP + 3] = if z > 0 { index[(z - 1) * n + x] } else { MESH_NULL_IDX };
            polys.extend_from_slice(&p);
        }
    }

    let size = n as f32 * cell_size;
    let poly_count = count as usize;
    NavMeshCreateParams {
        verts,
        vert_count: stride * stride,
        polys,
        poly_flags: vec![PolyFlags::WALK; poly_count],
        poly_areas: vec![0; poly_count],
        poly_count,
        nvp: NVP,
        bmin: [0.0, -1.0, 0.0],
        bmax: [size, 1.0, size],
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.5,
        cs: cell_size,
        ch: 1.0,
        build_bv_tree: true,
        ..Default::default()
    }
}

/// Polygon under the world position `(x, z)`, null when there is none
pub fn poly_at(mesh: &NavMesh, x: f32, z: f32) -> PolyRef {
    NavMeshQuery::new(mesh, 16)
        .find_nearest_poly(&[x, 0.0, z], &[0.01, 1.0, 0.01], &QueryFilter::default())
        .map_or(PolyRef::NULL, |(r, _)| r)
}
