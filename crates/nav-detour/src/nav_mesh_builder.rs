//! Tile builder: packs a polygon mesh into tile data
//!
//! The input is an already generated polygon mesh with quantized vertices,
//! optional detail triangulation and off-mesh connections. The builder
//! converts it to world space, triangulates polygons without detail data,
//! builds the BV tree and writes the tile in the binary tile layout.

use crate::binary_format;
use crate::nav_mesh::{
    BVNode, LINK_INTERNAL_SIDE, MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader,
};
use crate::{
    EXT_LINK, MAX_VERTS_PER_POLY, MESH_NULL_IDX, OFFMESH_CON_BIDIR, PolyFlags, PolyType, Result,
    Status,
};
use nav_common::{vert_at, vmax, vmin};

/// Polygon mesh neighbour flag marking a border or portal edge
const MESH_BORDER_FLAG: u16 = 0x8000;

/// Input of [`NavMeshBuilder::create_nav_mesh_data`]
#[derive(Debug, Clone, Default)]
pub struct NavMeshCreateParams {
    /// Quantized vertices `[x, y, z, ...]` in cell units relative to `bmin`
    pub verts: Vec<u16>,
    pub vert_count: usize,
    /// Polygons, `nvp * 2` entries each: vertex indices padded with
    /// [`MESH_NULL_IDX`], then neighbour data (`index`, or `0x8000 | dir`
    /// for borders with `dir` 0..=3 a portal and 0xf a wall)
    pub polys: Vec<u16>,
    pub poly_flags: Vec<PolyFlags>,
    pub poly_areas: Vec<u8>,
    pub poly_count: usize,
    /// Maximum vertices per polygon
    pub nvp: usize,

    /// Detail meshes, `[vert_base, vert_count, tri_base, tri_count]` per polygon
    pub detail_meshes: Vec<u32>,
    /// Detail vertices in world units, including the polygon vertices
    pub detail_verts: Vec<f32>,
    pub detail_vert_count: usize,
    /// Detail triangles `[a, b, c, flags]`
    pub detail_tris: Vec<u8>,
    pub detail_tri_count: usize,

    /// Off-mesh connection end points `[sx, sy, sz, ex, ey, ez, ...]`
    pub off_mesh_con_verts: Vec<f32>,
    pub off_mesh_con_rad: Vec<f32>,
    pub off_mesh_con_flags: Vec<PolyFlags>,
    pub off_mesh_con_areas: Vec<u8>,
    /// Non-zero for bidirectional connections
    pub off_mesh_con_dir: Vec<u8>,
    pub off_mesh_con_user_id: Vec<u32>,
    pub off_mesh_con_count: usize,

    pub user_id: u32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    /// World-space bounds of the tile
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],

    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Cell size on the xz-plane
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    /// Build a BV tree for the tile
    pub build_bv_tree: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct BVItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

/// Builder for tile data
pub struct NavMeshBuilder;

impl NavMeshBuilder {
    /// Creates serialized tile data from the provided parameters
    pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<Vec<u8>> {
        Self::validate_params(params)?;
        let tile = Self::build_tile(params)?;
        binary_format::write_tile(&tile)
    }

    fn validate_params(params: &NavMeshCreateParams) -> Result<()> {
        let nvp = params.nvp;
        let ok = nvp >= 3
            && nvp <= MAX_VERTS_PER_POLY
            && params.vert_count > 0
            && params.vert_count < MESH_NULL_IDX as usize
            && params.poly_count > 0
            && params.cs > 0.0
            && params.ch > 0.0
            && params.verts.len() >= params.vert_count * 3
            && params.polys.len() >= params.poly_count * nvp * 2
            && params.poly_flags.len() >= params.poly_count
            && params.poly_areas.len() >= params.poly_count;
        if !ok {
            return Err(Status::invalid_param());
        }

        let polys = &params.polys[..params.poly_count * nvp * 2];
        for p in polys.chunks(nvp * 2) {
            let nv = p[..nvp].iter().take_while(|&&v| v != MESH_NULL_IDX).count();
            if nv < 3 || p[..nv].iter().any(|&v| v as usize >= params.vert_count) {
                return Err(Status::invalid_param());
            }
            for &nei in &p[nvp..nvp + nv] {
                if nei & MESH_BORDER_FLAG == 0 && nei as usize >= params.poly_count {
                    return Err(Status::invalid_param());
                }
            }
        }

        if !params.detail_meshes.is_empty()
            && (params.detail_meshes.len() < params.poly_count * 4
                || params.detail_verts.len() < params.detail_vert_count * 3
                || params.detail_tris.len() < params.detail_tri_count * 4)
        {
            return Err(Status::invalid_param());
        }

        let n = params.off_mesh_con_count;
        if n > 0
            && (params.off_mesh_con_verts.len() < n * 6
                || params.off_mesh_con_rad.len() < n
                || params.off_mesh_con_flags.len() < n
                || params.off_mesh_con_areas.len() < n
                || params.off_mesh_con_dir.len() < n
                || params.off_mesh_con_user_id.len() < n)
        {
            return Err(Status::invalid_param());
        }

        Ok(())
    }

    /// Classifies a point against the tile bounds: 0xff inside, otherwise
    /// the neighbour side it lies towards
    fn classify_off_mesh_point(pt: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> u8 {
        const XP: u8 = 1 << 0;
        const ZP: u8 = 1 << 1;
        const XM: u8 = 1 << 2;
        const ZM: u8 = 1 << 3;

        let mut outcode = 0;
        if pt[0] >= bmax[0] {
            outcode |= XP;
        }
        if pt[2] >= bmax[2] {
            outcode |= ZP;
        }
        if pt[0] < bmin[0] {
            outcode |= XM;
        }
        if pt[2] < bmin[2] {
            outcode |= ZM;
        }

        match outcode {
            XP => 0,
            o if o == XP | ZP => 1,
            ZP => 2,
            o if o == XM | ZP => 3,
            XM => 4,
            o if o == XM | ZM => 5,
            ZM => 6,
            o if o == XP | ZM => 7,
            _ => LINK_INTERNAL_SIDE,
        }
    }

    /// Per-connection classes of start and end points
    fn classify_off_mesh_connections(params: &NavMeshCreateParams) -> Vec<[u8; 2]> {
        if params.off_mesh_con_count == 0 {
            return Vec::new();
        }

        // Tight height bounds, used to cull start points far from the mesh
        let (mut hmin, mut hmax) = (f32::MAX, f32::MIN);
        if !params.detail_meshes.is_empty() {
            for v in params.detail_verts[..params.detail_vert_count * 3].chunks(3) {
                hmin = hmin.min(v[1]);
                hmax = hmax.max(v[1]);
            }
        } else {
            for v in params.verts[..params.vert_count * 3].chunks(3) {
                let h = params.bmin[1] + v[1] as f32 * params.ch;
                hmin = hmin.min(h);
                hmax = hmax.max(h);
            }
        }
        hmin -= params.walkable_climb;
        hmax += params.walkable_climb;

        let mut bmin = params.bmin;
        let mut bmax = params.bmax;
        bmin[1] = hmin;
        bmax[1] = hmax;

        (0..params.off_mesh_con_count)
            .map(|i| {
                let p0 = vert_at(&params.off_mesh_con_verts, i * 2);
                let p1 = vert_at(&params.off_mesh_con_verts, i * 2 + 1);
                let mut start = Self::classify_off_mesh_point(&p0, &bmin, &bmax);
                let end = Self::classify_off_mesh_point(&p1, &bmin, &bmax);
                if start == LINK_INTERNAL_SIDE && (p0[1] < bmin[1] || p0[1] > bmax[1]) {
                    start = 0;
                }
                [start, end]
            })
            .collect()
    }

    /// Builds the in-memory tile described by the parameters
    fn build_tile(params: &NavMeshCreateParams) -> Result<MeshTile> {
        let nvp = params.nvp;
        let classes = Self::classify_off_mesh_connections(params);
        let stored: Vec<usize> = (0..classes.len())
            .filter(|&i| classes[i][0] == LINK_INTERNAL_SIDE)
            .collect();
        let off_mesh_link_count: usize = classes
            .iter()
            .map(|c| c.iter().filter(|&&k| k == LINK_INTERNAL_SIDE).count())
            .sum();

        let mut edge_count = 0;
        let mut portal_count = 0;
        for p in params.polys[..params.poly_count * nvp * 2].chunks(nvp * 2) {
            for j in 0..nvp {
                if p[j] == MESH_NULL_IDX {
                    break;
                }
                edge_count += 1;
                let nei = p[nvp + j];
                if nei & MESH_BORDER_FLAG != 0 && nei & 0xf != 0xf {
                    portal_count += 1;
                }
            }
        }
        let max_link_count = edge_count + portal_count * 2 + off_mesh_link_count * 2;

        let mut tile = MeshTile::default();

        // Vertices
        let cs = params.cs;
        let ch = params.ch;
        for v in params.verts[..params.vert_count * 3].chunks(3) {
            tile.verts.extend_from_slice(&[
                params.bmin[0] + v[0] as f32 * cs,
                params.bmin[1] + v[1] as f32 * ch,
                params.bmin[2] + v[2] as f32 * cs,
            ]);
        }
        for &i in &stored {
            tile.verts
                .extend_from_slice(&params.off_mesh_con_verts[i * 6..i * 6 + 6]);
        }

        // Ground polygons
        for (i, p) in params.polys[..params.poly_count * nvp * 2]
            .chunks(nvp * 2)
            .enumerate()
        {
            let mut poly = Poly::new(
                params.poly_areas[i] & 0x3f,
                PolyType::Ground,
                params.poly_flags[i],
            );
            for j in 0..nvp {
                if p[j] == MESH_NULL_IDX {
                    break;
                }
                poly.verts[j] = p[j];
                let nei = p[nvp + j];
                poly.neis[j] = if nei & MESH_BORDER_FLAG != 0 {
                    match nei & 0xf {
                        0 => EXT_LINK | 4,
                        1 => EXT_LINK | 2,
                        2 => EXT_LINK,
                        3 => EXT_LINK | 6,
                        _ => 0,
                    }
                } else {
                    nei + 1
                };
                poly.vert_count += 1;
            }
            tile.polys.push(poly);
        }

        // Off-mesh connection polygons
        let off_mesh_vert_base = params.vert_count;
        for (n, &i) in stored.iter().enumerate() {
            let mut poly = Poly::new(
                params.off_mesh_con_areas[i] & 0x3f,
                PolyType::OffMeshConnection,
                params.off_mesh_con_flags[i],
            );
            poly.verts[0] = (off_mesh_vert_base + n * 2) as u16;
            poly.verts[1] = (off_mesh_vert_base + n * 2 + 1) as u16;
            poly.vert_count = 2;
            tile.polys.push(poly);
        }

        Self::build_detail(params, &mut tile)?;

        if params.build_bv_tree {
            tile.bv_tree = Self::create_bv_tree(params);
        }

        for (n, &i) in stored.iter().enumerate() {
            let mut pos = [0.0; 6];
            pos.copy_from_slice(&params.off_mesh_con_verts[i * 6..i * 6 + 6]);
            tile.off_mesh_cons.push(OffMeshConnection {
                pos,
                rad: params.off_mesh_con_rad[i],
                poly: (params.poly_count + n) as u16,
                flags: if params.off_mesh_con_dir[i] != 0 {
                    OFFMESH_CON_BIDIR
                } else {
                    0
                },
                side: classes[i][1],
                user_id: params.off_mesh_con_user_id[i],
            });
        }

        tile.header = Some(TileHeader {
            x: params.tile_x,
            y: params.tile_y,
            layer: params.tile_layer,
            user_id: params.user_id,
            poly_count: tile.polys.len() as i32,
            vert_count: (tile.verts.len() / 3) as i32,
            max_link_count: max_link_count as i32,
            detail_mesh_count: tile.detail_meshes.len() as i32,
            detail_vert_count: (tile.detail_verts.len() / 3) as i32,
            detail_tri_count: (tile.detail_tris.len() / 4) as i32,
            bv_node_count: tile.bv_tree.len() as i32,
            off_mesh_con_count: tile.off_mesh_cons.len() as i32,
            off_mesh_base: params.poly_count as i32,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            bmin: params.bmin,
            bmax: params.bmax,
            bv_quant_factor: 1.0 / cs,
        });

        log::debug!(
            "built tile ({}, {}, {}): {} polys, {} off-mesh connections, {} bv nodes",
            params.tile_x,
            params.tile_y,
            params.tile_layer,
            tile.polys.len(),
            tile.off_mesh_cons.len(),
            tile.bv_tree.len()
        );
        Ok(tile)
    }

    fn build_detail(params: &NavMeshCreateParams, tile: &mut MeshTile) -> Result<()> {
        if !params.detail_meshes.is_empty() {
            let mut vbase = 0u32;
            for i in 0..params.poly_count {
                let dm = &params.detail_meshes[i * 4..i * 4 + 4];
                let (vb, ndv) = (dm[0] as usize, dm[1] as usize);
                let nv = tile.polys[i].vert_count as usize;
                if ndv < nv || vb + ndv > params.detail_vert_count {
                    return Err(Status::invalid_param());
                }
                let extra = ndv - nv;
                tile.detail_meshes.push(PolyDetail {
                    vert_base: vbase,
                    tri_base: dm[2],
                    vert_count: extra as u8,
                    tri_count: dm[3] as u8,
                });
                // Skip the first `nv` detail vertices, they repeat the polygon's
                tile.detail_verts
                    .extend_from_slice(&params.detail_verts[(vb + nv) * 3..(vb + ndv) * 3]);
                vbase += extra as u32;
            }
            tile.detail_tris
                .extend_from_slice(&params.detail_tris[..params.detail_tri_count * 4]);
            return Ok(());
        }

        // Triangle fans
        let mut tbase = 0u32;
        for poly in &tile.polys[..params.poly_count] {
            let nv = poly.vert_count as usize;
            tile.detail_meshes.push(PolyDetail {
                vert_base: 0,
                tri_base: tbase,
                vert_count: 0,
                tri_count: (nv - 2) as u8,
            });
            for j in 2..nv {
                let mut flags = 1 << 2;
                if j == 2 {
                    flags |= 1;
                }
                if j == nv - 1 {
                    flags |= 1 << 4;
                }
                tile.detail_tris
                    .extend_from_slice(&[0, (j - 1) as u8, j as u8, flags]);
                tbase += 1;
            }
        }
        Ok(())
    }

    fn create_bv_tree(params: &NavMeshCreateParams) -> Vec<BVNode> {
        let quant_factor = 1.0 / params.cs;
        let nvp = params.nvp;
        let quantize = |v: f32, origin: f32| ((v - origin) * quant_factor).clamp(0.0, 65535.0) as u16;

        let mut items: Vec<BVItem> = (0..params.poly_count)
            .map(|i| {
                let mut it = BVItem {
                    i: i as i32,
                    ..Default::default()
                };
                if !params.detail_meshes.is_empty() {
                    let vb = params.detail_meshes[i * 4] as usize;
                    let ndv = params.detail_meshes[i * 4 + 1] as usize;
                    let mut bmin = vert_at(&params.detail_verts, vb);
                    let mut bmax = bmin;
                    for j in 1..ndv {
                        let v = vert_at(&params.detail_verts, vb + j);
                        vmin(&mut bmin, &v);
                        vmax(&mut bmax, &v);
                    }
                    for k in 0..3 {
                        it.bmin[k] = quantize(bmin[k], params.bmin[k]);
                        it.bmax[k] = quantize(bmax[k], params.bmin[k]);
                    }
                } else {
                    let p = &params.polys[i * nvp * 2..i * nvp * 2 + nvp];
                    let first = p[0] as usize * 3;
                    it.bmin.copy_from_slice(&params.verts[first..first + 3]);
                    it.bmax = it.bmin;
                    for &v in p[1..].iter().take_while(|&&v| v != MESH_NULL_IDX) {
                        let q = &params.verts[v as usize * 3..v as usize * 3 + 3];
                        for k in 0..3 {
                            it.bmin[k] = it.bmin[k].min(q[k]);
                            it.bmax[k] = it.bmax[k].max(q[k]);
                        }
                    }
                    // Remap y to the xz cell size
                    it.bmin[1] = (it.bmin[1] as f32 * params.ch / params.cs).floor() as u16;
                    it.bmax[1] = (it.bmax[1] as f32 * params.ch / params.cs).ceil() as u16;
                }
                it
            })
            .collect();

        let mut nodes = Vec::with_capacity(items.len() * 2);
        let n = items.len();
        Self::subdivide(&mut items, 0, n, &mut nodes);
        nodes
    }

    fn subdivide(items: &mut [BVItem], imin: usize, imax: usize, nodes: &mut Vec<BVNode>) {
        let inum = imax - imin;
        let icur = nodes.len();
        nodes.push(BVNode::default());

        if inum == 1 {
            let it = items[imin];
            nodes[icur] = BVNode {
                bmin: it.bmin,
                bmax: it.bmax,
                i: it.i,
            };
            return;
        }

        let mut bmin = items[imin].bmin;
        let mut bmax = items[imin].bmax;
        for it in &items[imin + 1..imax] {
            for k in 0..3 {
                bmin[k] = bmin[k].min(it.bmin[k]);
                bmax[k] = bmax[k].max(it.bmax[k]);
            }
        }

        let extent = [
            bmax[0] - bmin[0],
            bmax[1] - bmin[1],
            bmax[2] - bmin[2],
        ];
        let mut axis = 0;
        if extent[1] > extent[axis] {
            axis = 1;
        }
        if extent[2] > extent[axis] {
            axis = 2;
        }
        items[imin..imax].sort_by_key(|it| it.bmin[axis]);

        let isplit = imin + inum / 2;
        Self::subdivide(items, imin, isplit, nodes);
        Self::subdivide(items, isplit, imax, nodes);

        let escape = (nodes.len() - icur) as i32;
        nodes[icur] = BVNode {
            bmin,
            bmax,
            i: -escape,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{create_grid_params, create_off_mesh_params};

    #[test]
    fn test_create_rejects_bad_params() {
        let mut params = create_grid_params(0, 0, 2, 1.0, [0.0; 3]);
        params.nvp = 7;
        assert!(NavMeshBuilder::create_nav_mesh_data(&params).is_err());

        let mut params = create_grid_params(0, 0, 2, 1.0, [0.0; 3]);
        params.poly_count = 0;
        assert!(NavMeshBuilder::create_nav_mesh_data(&params).is_err());

        let mut params = create_grid_params(0, 0, 2, 1.0, [0.0; 3]);
        params.polys[0] = 500;
        assert!(NavMeshBuilder::create_nav_mesh_data(&params).is_err());
    }

    #[test]
    fn test_fan_detail_and_links() {
        let params = create_grid_params(0, 0, 2, 1.0, [0.0; 3]);
        let tile = NavMeshBuilder::build_tile(&params).unwrap();
        let header = tile.header.as_ref().unwrap();

        assert_eq!(tile.polys.len(), 4);
        assert_eq!(tile.detail_meshes.len(), 4);
        // Quads become two fan triangles each
        assert_eq!(header.detail_tri_count, 8);
        assert_eq!(&tile.detail_tris[..4], &[0, 1, 2, 0b0101]);
        assert_eq!(&tile.detail_tris[4..8], &[0, 2, 3, 0b1_0100]);
        // 16 edges, 8 of them portals on the tile border
        assert_eq!(header.max_link_count, 16 + 8 * 2);
    }

    #[test]
    fn test_bv_tree_shape() {
        let params = create_grid_params(0, 0, 3, 1.0, [0.0; 3]);
        let tile = NavMeshBuilder::build_tile(&params).unwrap();
        assert_eq!(tile.bv_tree.len(), 2 * 9 - 1);
        assert_eq!(tile.bv_tree[0].i, -(tile.bv_tree.len() as i32));
        let leaves = tile.bv_tree.iter().filter(|n| n.i >= 0).count();
        assert_eq!(leaves, 9);
    }

    #[test]
    fn test_portal_encoding() {
        let mut params = create_grid_params(0, 0, 1, 1.0, [0.0; 3]);
        let tile = NavMeshBuilder::build_tile(&params).unwrap();
        assert_eq!(
            &tile.polys[0].neis[..4],
            &[EXT_LINK | 4, EXT_LINK | 2, EXT_LINK, EXT_LINK | 6]
        );
        assert_eq!(tile.header.as_ref().unwrap().max_link_count, 4 + 4 * 2);

        // Only the x- edge stays a portal
        let nvp = params.nvp;
        params.polys[nvp + 1..nvp + 4].fill(MESH_BORDER_FLAG | 0xf);
        let tile = NavMeshBuilder::build_tile(&params).unwrap();
        assert_eq!(&tile.polys[0].neis[..4], &[EXT_LINK | 4, 0, 0, 0]);
        assert_eq!(tile.header.as_ref().unwrap().max_link_count, 4 + 2);
    }

    #[test]
    fn test_off_mesh_classification() {
        let params = create_off_mesh_params();
        let tile = NavMeshBuilder::build_tile(&params).unwrap();
        let header = tile.header.as_ref().unwrap();
        assert_eq!(header.off_mesh_base as usize, params.poly_count);
        assert_eq!(tile.off_mesh_cons.len(), 1);
        assert_eq!(tile.off_mesh_cons[0].side, LINK_INTERNAL_SIDE);
        assert!(tile.off_mesh_cons[0].is_bidirectional());

        let bmin = [0.0, 0.0, 0.0];
        let bmax = [4.0, 1.0, 4.0];
        assert_eq!(NavMeshBuilder::classify_off_mesh_point(&[5.0, 0.0, 1.0], &bmin, &bmax), 0);
        assert_eq!(NavMeshBuilder::classify_off_mesh_point(&[1.0, 0.0, 5.0], &bmin, &bmax), 2);
        assert_eq!(NavMeshBuilder::classify_off_mesh_point(&[-1.0, 0.0, -1.0], &bmin, &bmax), 5);
        assert_eq!(
            NavMeshBuilder::classify_off_mesh_point(&[1.0, 0.5, 1.0], &bmin, &bmax),
            LINK_INTERNAL_SIDE
        );
    }
}
