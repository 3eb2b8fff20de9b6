//! Generated grid meshes for trying out queries and crowd scenarios

use anyhow::{bail, Result};
use glam::Vec3;
use nav_detour::{NavMeshCreateParams, PolyFlags, MESH_NULL_IDX, OFFMESH_CON_BIDIR};

const NVP: usize = 6;

/// Shape of a generated demo mesh
#[derive(Debug, Clone, PartialEq)]
pub struct DemoGrid {
    /// Cells per side
    pub size: usize,
    pub cell_size: f32,
    /// Cells left out of the mesh as `(x, z)`
    pub blocked: Vec<(usize, usize)>,
    /// Bidirectional jump links as start and end points
    pub links: Vec<(Vec3, Vec3)>,
}

/// Parses a cell as `x,z`
pub fn parse_cell(s: &str) -> Result<(usize, usize), String> {
    let (x, z) = s
        .split_once(',')
        .ok_or_else(|| format!("Cell must be given as x,z, got {s}"))?;
    let x = x.trim().parse::<usize>().map_err(|e| e.to_string())?;
    let z = z.trim().parse::<usize>().map_err(|e| e.to_string())?;
    Ok((x, z))
}

impl DemoGrid {
    /// Polygon mesh input for the grid, one square polygon per open cell
    pub fn create_params(&self) -> Result<NavMeshCreateParams> {
        let n = self.size;
        if n == 0 || n > 128 {
            bail!("Grid size must be between 1 and 128, got {n}");
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            bail!("Cell size must be positive, got {}", self.cell_size);
        }
        if let Some(&(x, z)) = self.blocked.iter().find(|&&(x, z)| x >= n || z >= n) {
            bail!("Blocked cell {x},{z} is outside the {n}x{n} grid");
        }

        let stride = n + 1;
        let mut verts = Vec::with_capacity(stride * stride * 3);
        for z in 0..stride {
            for x in 0..stride {
                verts.extend_from_slice(&[x as u16, 0, z as u16]);
            }
        }

        let open = |x: usize, z: usize| !self.blocked.contains(&(x, z));
        let mut index = vec![MESH_NULL_IDX; n * n];
        let mut poly_count = 0usize;
        for z in 0..n {
            for x in 0..n {
                if open(x, z) {
                    index[z * n + x] = poly_count as u16;
                    poly_count += 1;
                }
            }
        }
        if poly_count == 0 {
            bail!("Every cell of the grid is blocked");
        }

        let vi = |x: usize, z: usize| (z * stride + x) as u16;
        let mut polys = Vec::with_capacity(poly_count * NVP * 2);
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

        let extent = n as f32 * self.cell_size;
        let mut params = NavMeshCreateParams {
            verts,
            vert_count: stride * stride,
            polys,
            poly_flags: vec![PolyFlags::WALK; poly_count],
            poly_areas: vec![0; poly_count],
            poly_count,
            nvp: NVP,
            bmin: [0.0, 0.0, 0.0],
            bmax: [extent, 1.0, extent],
            walkable_height: 2.0,
            walkable_radius: 0.5,
            walkable_climb: 0.5,
            cs: self.cell_size,
            ch: 1.0,
            build_bv_tree: true,
            ..Default::default()
        };

        for (i, (start, end)) in self.links.iter().enumerate() {
            params.off_mesh_con_verts.extend_from_slice(&[start.x, start.y, start.z, end.x, end.y, end.z]);
            params.off_mesh_con_rad.push(self.cell_size * 0.5);
            params.off_mesh_con_flags.push(PolyFlags::JUMP);
            params.off_mesh_con_areas.push(0);
            params.off_mesh_con_dir.push(OFFMESH_CON_BIDIR);
            params.off_mesh_con_user_id.push(i as u32);
        }
        params.off_mesh_con_count = self.links.len();

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nav_detour::NavMesh;

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("3,4"), Ok((3, 4)));
        assert_eq!(parse_cell(" 0 , 7"), Ok((0, 7)));
        assert!(parse_cell("3").is_err());
        assert!(parse_cell("a,1").is_err());
    }

    #[test]
    fn test_grid_builds_a_mesh() {
        let grid = DemoGrid {
            size: 4,
            cell_size: 0.5,
            blocked: vec![(1, 1)],
            links: vec![(Vec3::new(0.25, 0.0, 0.25), Vec3::new(1.75, 0.0, 1.75))],
        };
        let params = grid.create_params().unwrap();
        assert_eq!(params.poly_count, 15);
        assert_eq!(params.off_mesh_con_count, 1);

        let mesh = NavMesh::from_create_params(&params).unwrap();
        assert_eq!(mesh.tile_count(), 1);
        let tile = mesh.tiles().next().unwrap();
        assert_eq!(tile.polys.len(), 16);
        assert_eq!(tile.off_mesh_cons.len(), 1);
    }

    #[test]
    fn test_rejects_bad_grids() {
        let grid = DemoGrid {
            size: 2,
            cell_size: 1.0,
            blocked: vec![(0, 0), (0, 1), (1, 0), (1, 1)],
            links: Vec::new(),
        };
        assert!(grid.create_params().is_err());

        let outside = DemoGrid { blocked: vec![(5, 0)], ..grid.clone() };
        assert!(outside.create_params().is_err());

        let empty = DemoGrid { size: 0, blocked: Vec::new(), ..grid };
        assert!(empty.create_params().is_err());
    }
}
