//! Tiled navigation mesh storage
//!
//! The navigation mesh is a fixed pool of tile slots. Each tile owns its
//! polygons, vertices, detail triangulation, BV tree and off-mesh
//! connections. Adjacency is stored as per-polygon linked lists of [`Link`]s
//! that are rebuilt whenever a neighbouring tile is added or removed.

use std::collections::BTreeMap;
use std::path::Path;

use crate::binary_format;
use crate::nav_mesh_builder::{NavMeshBuilder, NavMeshCreateParams};
use crate::{
    EXT_LINK, MAX_VERTS_PER_POLY, NavMeshParams, OFFMESH_CON_BIDIR, PolyFlags, PolyRef, PolyType,
    Result, SALT_BITS, Status, StatusDetail, TILE_BITS, TileRef,
};
use nav_common::{
    closest_height_point_triangle, dist_pt_seg_sqr_2d, overlap_bounds, overlap_quant_bounds,
    point_in_polygon, sqr, vdist_sqr, vert_at, vlerp, vmax, vmin,
};

/// Maximum number of tiles a mesh can address
pub const MAX_TILES: usize = 1 << TILE_BITS;

/// Maximum number of polygons a tile can address
pub const MAX_POLYS_PER_TILE: usize = 1 << 16;

/// Side value of links and off-mesh connections that stay inside a tile
pub const LINK_INTERNAL_SIDE: u8 = 0xff;

/// Detail triangle edge flag: the edge lies on the polygon boundary
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x01;

const MAX_NEAREST_CANDIDATES: usize = 128;
const MAX_CONNECTING_POLYS: usize = 4;

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// Neighbour polygon
    pub reference: PolyRef,
    /// Next link of the owning polygon
    pub next: Option<usize>,
    /// Edge of the owning polygon this link crosses
    pub edge: u8,
    /// Tile side for links across tiles, [`LINK_INTERNAL_SIDE`] otherwise
    pub side: u8,
    /// Start of the shared portal segment, `0..=255` along the edge
    pub bmin: u8,
    /// End of the shared portal segment, `0..=255` along the edge
    pub bmax: u8,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            reference: PolyRef::NULL,
            next: None,
            edge: 0,
            side: LINK_INTERNAL_SIDE,
            bmin: 0,
            bmax: 0,
        }
    }
}

/// Polygon in the navigation mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
    /// First link in the polygon's link list
    pub first_link: Option<usize>,
    /// Vertex indices into the tile vertex buffer
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Per-edge neighbour: 0 for a wall, `index + 1` for an internal
    /// neighbour, `EXT_LINK | side` for a tile portal
    pub neis: [u16; MAX_VERTS_PER_POLY],
    /// Polygon flags
    pub flags: PolyFlags,
    /// Number of vertices
    pub vert_count: u8,
    /// Area id (`0..MAX_AREAS`)
    pub area: u8,
    /// Polygon type
    pub poly_type: PolyType,
}

impl Poly {
    /// Creates a polygon without vertices
    pub fn new(area: u8, poly_type: PolyType, flags: PolyFlags) -> Self {
        Self {
            first_link: None,
            verts: [0; MAX_VERTS_PER_POLY],
            neis: [0; MAX_VERTS_PER_POLY],
            flags,
            vert_count: 0,
            area,
            poly_type,
        }
    }

    /// Returns true if the polygon represents an off-mesh connection
    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type == PolyType::OffMeshConnection
    }

    /// Vertex indices actually used by the polygon
    pub fn vert_indices(&self) -> &[u16] {
        &self.verts[..(self.vert_count as usize).min(MAX_VERTS_PER_POLY)]
    }
}

/// Detail triangulation of a polygon
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolyDetail {
    /// First detail vertex (detail vertices exclude the polygon's own)
    pub vert_base: u32,
    /// First detail triangle
    pub tri_base: u32,
    /// Number of detail vertices
    pub vert_count: u8,
    /// Number of detail triangles
    pub tri_count: u8,
}

/// Bounding volume node with quantized bounds
///
/// `i >= 0` is a leaf holding polygon `i`; `i < 0` is an internal node and
/// `-i` is the number of nodes to skip to escape its subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BVNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

/// Off-mesh connection stored in the tile that holds its start point
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OffMeshConnection {
    /// Start and end points `[sx, sy, sz, ex, ey, ez]`
    pub pos: [f32; 6],
    /// Snap radius of the end points
    pub rad: f32,
    /// Index of the connection polygon within the tile
    pub poly: u16,
    /// Connection flags ([`OFFMESH_CON_BIDIR`])
    pub flags: u8,
    /// Tile side of the end point, [`LINK_INTERNAL_SIDE`] when inside the tile
    pub side: u8,
    /// User defined id
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn start_pos(&self) -> [f32; 3] {
        [self.pos[0], self.pos[1], self.pos[2]]
    }

    pub fn end_pos(&self) -> [f32; 3] {
        [self.pos[3], self.pos[4], self.pos[5]]
    }

    pub fn is_bidirectional(&self) -> bool {
        self.flags & OFFMESH_CON_BIDIR != 0
    }
}

/// Tile header
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileHeader {
    /// Tile grid location
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    /// User defined id
    pub user_id: u32,
    /// Number of polygons, including off-mesh connection polygons
    pub poly_count: i32,
    /// Number of vertices, including off-mesh connection end points
    pub vert_count: i32,
    /// Number of link slots reserved by the builder
    pub max_link_count: i32,
    pub detail_mesh_count: i32,
    pub detail_vert_count: i32,
    pub detail_tri_count: i32,
    pub bv_node_count: i32,
    pub off_mesh_con_count: i32,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: i32,
    /// Agent height the tile was built for
    pub walkable_height: f32,
    /// Agent radius the tile was built for
    pub walkable_radius: f32,
    /// Maximum climb the tile was built for
    pub walkable_climb: f32,
    /// Tile bounds
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    /// Quantization factor of the BV tree
    pub bv_quant_factor: f32,
}

/// Navigation mesh tile
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    /// Generation counter of the slot, part of every reference into it
    pub salt: u32,
    /// Header, `None` for a free slot
    pub header: Option<TileHeader>,
    pub polys: Vec<Poly>,
    /// Vertices `[x, y, z, ...]`
    pub verts: Vec<f32>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    /// Detail vertices `[x, y, z, ...]`
    pub detail_verts: Vec<f32>,
    /// Detail triangles `[a, b, c, edge_flags, ...]`
    pub detail_tris: Vec<u8>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    pub(crate) links_free_list: Vec<usize>,
    pub(crate) index: usize,
}

/// Iterator over the links of a polygon
pub struct PolyLinks<'a> {
    links: &'a [Link],
    cur: Option<usize>,
}

impl<'a> Iterator for PolyLinks<'a> {
    type Item = &'a Link;

    fn next(&mut self) -> Option<Self::Item> {
        let link = self.links.get(self.cur?)?;
        self.cur = link.next;
        Some(link)
    }
}

impl MeshTile {
    /// Returns true if the slot holds a tile
    pub fn is_loaded(&self) -> bool {
        self.header.is_some()
    }

    /// Slot index of the tile in its mesh
    pub fn index(&self) -> usize {
        self.index
    }

    /// Vertex `i` of the tile
    #[inline]
    pub fn vert(&self, i: usize) -> [f32; 3] {
        vert_at(&self.verts, i)
    }

    /// Flat vertex buffer of a polygon
    pub fn poly_verts(&self, poly: &Poly) -> Vec<f32> {
        poly.vert_indices()
            .iter()
            .flat_map(|&v| self.vert(v as usize))
            .collect()
    }

    /// Links of a polygon
    pub fn poly_links(&self, poly: &Poly) -> PolyLinks<'_> {
        PolyLinks {
            links: &self.links,
            cur: poly.first_link,
        }
    }

    fn walkable_climb(&self) -> f32 {
        self.header.as_ref().map_or(0.0, |h| h.walkable_climb)
    }

    fn alloc_link(&mut self) -> usize {
        if let Some(idx) = self.links_free_list.pop() {
            idx
        } else {
            self.links.push(Link::default());
            self.links.len() - 1
        }
    }

    /// Prepends a link to a polygon's link list
    pub(crate) fn push_link(&mut self, poly_idx: usize, mut link: Link) {
        let Some(first) = self.polys.get(poly_idx).map(|p| p.first_link) else {
            return;
        };
        let idx = self.alloc_link();
        link.next = first;
        self.links[idx] = link;
        self.polys[poly_idx].first_link = Some(idx);
    }

    /// Number of detail triangles of a polygon. Polygons without detail data
    /// are treated as a triangle fan.
    pub fn detail_tri_count(&self, poly_idx: usize) -> usize {
        match self.detail_meshes.get(poly_idx) {
            Some(pd) => pd.tri_count as usize,
            None => self
                .polys
                .get(poly_idx)
                .map_or(0, |p| (p.vert_count as usize).saturating_sub(2)),
        }
    }

    /// Detail triangle `j` of a polygon and its edge flags
    pub fn detail_triangle(&self, poly_idx: usize, j: usize) -> Option<([[f32; 3]; 3], u8)> {
        let poly = self.polys.get(poly_idx)?;
        let nv = poly.vert_count as usize;
        let Some(pd) = self.detail_meshes.get(poly_idx) else {
            if j + 2 >= nv {
                return None;
            }
            let mut flags = 1 << 2;
            if j == 0 {
                flags |= 1;
            }
            if j + 3 == nv {
                flags |= 1 << 4;
            }
            let v = [
                self.vert(poly.verts[0] as usize),
                self.vert(poly.verts[j + 1] as usize),
                self.vert(poly.verts[j + 2] as usize),
            ];
            return Some((v, flags));
        };

        let t = (pd.tri_base as usize + j) * 4;
        let tri = self.detail_tris.get(t..t + 4)?;
        let mut v = [[0.0; 3]; 3];
        for k in 0..3 {
            let idx = tri[k] as usize;
            v[k] = if idx < nv {
                self.vert(poly.verts[idx] as usize)
            } else {
                vert_at(&self.detail_verts, pd.vert_base as usize + (idx - nv))
            };
        }
        Some((v, tri[3]))
    }

    /// Closest point to `pos` on the detail edges of a polygon
    pub fn closest_point_on_detail_edges(
        &self,
        poly_idx: usize,
        pos: &[f32; 3],
        only_boundary: bool,
    ) -> [f32; 3] {
        const ANY_BOUNDARY_EDGE: u8 =
            DETAIL_EDGE_BOUNDARY | (DETAIL_EDGE_BOUNDARY << 2) | (DETAIL_EDGE_BOUNDARY << 4);

        let mut dmin = f32::MAX;
        let mut tmin = 0.0;
        let mut best: Option<([f32; 3], [f32; 3])> = None;

        for i in 0..self.detail_tri_count(poly_idx) {
            let Some((v, flags)) = self.detail_triangle(poly_idx, i) else {
                continue;
            };
            if only_boundary && flags & ANY_BOUNDARY_EDGE == 0 {
                continue;
            }

            let mut j = 2;
            for k in 0..3 {
                let is_boundary = (flags >> (j * 2)) & 0x3 & DETAIL_EDGE_BOUNDARY != 0;
                if !is_boundary && only_boundary {
                    j = k;
                    continue;
                }
                let (d, t) = dist_pt_seg_sqr_2d(pos, &v[j], &v[k]);
                if d < dmin {
                    dmin = d;
                    tmin = t;
                    best = Some((v[j], v[k]));
                }
                j = k;
            }
        }

        match best {
            Some((pmin, pmax)) => vlerp(&pmin, &pmax, tmin),
            None => *pos,
        }
    }

    /// Height of the detail surface under `pos`, `None` when `pos` is
    /// outside the polygon on the xz-plane or the polygon is an off-mesh
    /// connection
    pub fn poly_height(&self, poly_idx: usize, pos: &[f32; 3]) -> Option<f32> {
        let poly = self.polys.get(poly_idx)?;
        if poly.is_off_mesh_connection() {
            return None;
        }

        let verts = self.poly_verts(poly);
        if !point_in_polygon(pos, &verts, poly.vert_count as usize) {
            return None;
        }

        for j in 0..self.detail_tri_count(poly_idx) {
            if let Some((v, _)) = self.detail_triangle(poly_idx, j) {
                if let Some(h) = closest_height_point_triangle(pos, &v[0], &v[1], &v[2]) {
                    return Some(h);
                }
            }
        }

        // Degenerate triangles: the point lies on an edge
        Some(self.closest_point_on_detail_edges(poly_idx, pos, false)[1])
    }
}

/// Tiled navigation mesh
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tile_lut: BTreeMap<(i32, i32, i32), usize>,
    tiles: Vec<MeshTile>,
    next_free: Vec<usize>,
}

/// Grid offset of a tile side, sides ordered counter-clockwise from +x
fn side_offset(side: u8) -> (i32, i32) {
    match side {
        0 => (1, 0),
        1 => (1, 1),
        2 => (0, 1),
        3 => (-1, 1),
        4 => (-1, 0),
        5 => (-1, -1),
        6 => (0, -1),
        _ => (1, -1),
    }
}

#[inline]
pub(crate) fn opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}

fn get_slab_coord(va: &[f32; 3], side: u8) -> f32 {
    match side {
        0 | 4 => va[0],
        2 | 6 => va[2],
        _ => 0.0,
    }
}

fn calc_slab_end_points(va: &[f32; 3], vb: &[f32; 3], side: u8) -> ([f32; 2], [f32; 2]) {
    let axis = if side == 0 || side == 4 { 2 } else { 0 };
    if va[axis] < vb[axis] {
        ([va[axis], va[1]], [vb[axis], vb[1]])
    } else {
        ([vb[axis], vb[1]], [va[axis], va[1]])
    }
}

fn overlap_slabs(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2], px: f32, py: f32) -> bool {
    // Shrink the slabs slightly to avoid matching portals that only touch
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap
    if dmin * dmax < 0.0 {
        return true;
    }

    let thr = sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Link planned against immutable mesh state, applied afterwards
struct PlannedLink {
    tile: usize,
    poly: usize,
    link: Link,
}

impl NavMesh {
    /// Creates an empty tiled navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        let finite = params.origin.iter().all(|v| v.is_finite())
            && params.tile_width.is_finite()
            && params.tile_height.is_finite();
        if !finite
            || params.tile_width <= 0.0
            || params.tile_height <= 0.0
            || params.max_tiles <= 0
            || params.max_tiles as usize > MAX_TILES
            || params.max_polys_per_tile <= 0
            || params.max_polys_per_tile as usize > MAX_POLYS_PER_TILE
        {
            log::warn!("rejected navmesh parameters: {params:?}");
            return Err(Status::invalid_param());
        }

        let max_tiles = params.max_tiles as usize;
        let tiles = (0..max_tiles)
            .map(|index| MeshTile {
                salt: 1,
                index,
                ..Default::default()
            })
            .collect();

        Ok(Self {
            params,
            tile_lut: BTreeMap::new(),
            tiles,
            next_free: (0..max_tiles).rev().collect(),
        })
    }

    /// Creates a single-tile mesh from serialized tile data
    pub fn new_single_tile(data: &[u8]) -> Result<Self> {
        let header = binary_format::read_tile_header(data)?;
        let params = NavMeshParams {
            origin: header.bmin,
            tile_width: header.bmax[0] - header.bmin[0],
            tile_height: header.bmax[2] - header.bmin[2],
            max_tiles: 1,
            max_polys_per_tile: header.poly_count.max(1),
        };
        let mut mesh = Self::new(params)?;
        mesh.add_tile(data, TileRef::NULL)?;
        Ok(mesh)
    }

    /// Builds tile data from a polygon mesh and creates a single-tile mesh
    pub fn from_create_params(params: &NavMeshCreateParams) -> Result<Self> {
        let data = NavMeshBuilder::create_nav_mesh_data(params)?;
        Self::new_single_tile(&data)
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Number of loaded tiles
    pub fn tile_count(&self) -> usize {
        self.tile_lut.len()
    }

    /// Tile slot by index, loaded or not
    pub fn get_tile(&self, index: usize) -> Option<&MeshTile> {
        self.tiles.get(index)
    }

    /// Iterates over loaded tiles
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.tiles.iter().filter(|t| t.is_loaded())
    }

    /// Tile grid location containing a world position
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        let tx = ((pos[0] - self.params.origin[0]) / self.params.tile_width).floor() as i32;
        let ty = ((pos[2] - self.params.origin[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    /// Reference of polygon 0 in the tile; polygon references are `base | index`
    pub fn get_poly_ref_base(&self, tile: &MeshTile) -> PolyRef {
        PolyRef::encode(tile.salt, tile.index as u32, 0)
    }

    /// Reference of a loaded tile
    pub fn get_tile_ref(&self, tile: &MeshTile) -> TileRef {
        if tile.is_loaded() {
            self.get_poly_ref_base(tile)
        } else {
            TileRef::NULL
        }
    }

    /// Tile at a grid location and layer
    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tile_lut.get(&(x, y, layer)).map(|&i| &self.tiles[i])
    }

    /// All layers at a grid location
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_indices_at(x, y)
            .into_iter()
            .map(|i| &self.tiles[i])
            .collect()
    }

    /// Reference of the tile at a grid location and layer, null if none
    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> TileRef {
        self.get_tile_at(x, y, layer)
            .map_or(TileRef::NULL, |t| self.get_poly_ref_base(t))
    }

    /// Loaded tile by reference; stale references return `None`
    pub fn get_tile_by_ref(&self, tile_ref: TileRef) -> Option<&MeshTile> {
        if !tile_ref.is_valid() {
            return None;
        }
        let tile = self.tiles.get(tile_ref.tile_index() as usize)?;
        (tile.is_loaded() && tile.salt == tile_ref.salt()).then_some(tile)
    }

    pub(crate) fn tile_indices_at(&self, x: i32, y: i32) -> Vec<usize> {
        self.tile_lut
            .range((x, y, i32::MIN)..=(x, y, i32::MAX))
            .map(|(_, &i)| i)
            .collect()
    }

    fn neighbour_tile_indices(&self, x: i32, y: i32, side: u8) -> Vec<usize> {
        let (dx, dy) = side_offset(side);
        self.tile_indices_at(x + dx, y + dy)
    }

    /// Decodes a reference into validated tile and polygon indices
    pub(crate) fn decode_ref(&self, reference: PolyRef) -> Option<(usize, usize)> {
        if !reference.is_valid() {
            return None;
        }
        let (salt, it, ip) = reference.decode();
        let tile = self.tiles.get(it as usize)?;
        if tile.salt != salt || !tile.is_loaded() || ip as usize >= tile.polys.len() {
            return None;
        }
        Some((it as usize, ip as usize))
    }

    /// Tile and polygon of a reference
    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (it, ip) = self.decode_ref(reference).ok_or(Status::invalid_param())?;
        let tile = &self.tiles[it];
        Ok((tile, &tile.polys[ip]))
    }

    /// Returns true if the reference points at a polygon of a loaded tile
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.decode_ref(reference).is_some()
    }

    pub fn get_poly_flags(&self, reference: PolyRef) -> Result<PolyFlags> {
        Ok(self.get_tile_and_poly_by_ref(reference)?.1.flags)
    }

    pub fn set_poly_flags(&mut self, reference: PolyRef, flags: PolyFlags) -> Result<()> {
        let (it, ip) = self.decode_ref(reference).ok_or(Status::invalid_param())?;
        self.tiles[it].polys[ip].flags = flags;
        Ok(())
    }

    pub fn get_poly_area(&self, reference: PolyRef) -> Result<u8> {
        Ok(self.get_tile_and_poly_by_ref(reference)?.1.area)
    }

    /// Sets a polygon's area id; only the low six bits are kept
    pub fn set_poly_area(&mut self, reference: PolyRef, area: u8) -> Result<()> {
        let (it, ip) = self.decode_ref(reference).ok_or(Status::invalid_param())?;
        self.tiles[it].polys[ip].area = area & 0x3f;
        Ok(())
    }

    /// End points of an off-mesh connection in the direction of travel
    ///
    /// `prev_ref` is the polygon the connection is entered from; its end
    /// point is returned first.
    pub fn get_off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(poly_ref)?;
        if !poly.is_off_mesh_connection() {
            return Err(Status::invalid_param());
        }

        let (mut idx0, mut idx1) = (0, 1);
        if let Some(link) = tile.poly_links(poly).find(|l| l.edge == 0) {
            if link.reference != prev_ref {
                idx0 = 1;
                idx1 = 0;
            }
        }

        Ok((
            tile.vert(poly.verts[idx0] as usize),
            tile.vert(poly.verts[idx1] as usize),
        ))
    }

    /// Off-mesh connection backing a connection polygon
    pub fn get_off_mesh_connection_by_ref(&self, reference: PolyRef) -> Option<&OffMeshConnection> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(reference).ok()?;
        if !poly.is_off_mesh_connection() {
            return None;
        }
        let base = tile.header.as_ref()?.off_mesh_base as usize;
        tile.off_mesh_cons
            .get((reference.poly_index() as usize).checked_sub(base)?)
    }

    /// Height of the detail surface of a polygon under `pos`
    pub fn get_poly_height(&self, tile: &MeshTile, poly_idx: usize, pos: &[f32; 3]) -> Option<f32> {
        tile.poly_height(poly_idx, pos)
    }

    /// Closest point on a polygon and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, reference: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        let (it, ip) = self.decode_ref(reference).ok_or(Status::invalid_param())?;
        Ok(Self::closest_point_in_tile(&self.tiles[it], ip, pos))
    }

    fn closest_point_in_tile(tile: &MeshTile, ip: usize, pos: &[f32; 3]) -> ([f32; 3], bool) {
        let mut closest = *pos;
        if let Some(h) = tile.poly_height(ip, pos) {
            closest[1] = h;
            return (closest, true);
        }

        let poly = &tile.polys[ip];
        if poly.is_off_mesh_connection() {
            let v0 = tile.vert(poly.verts[0] as usize);
            let v1 = tile.vert(poly.verts[1] as usize);
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return (vlerp(&v0, &v1, t), false);
        }

        (tile.closest_point_on_detail_edges(ip, pos, true), false)
    }

    /// Ground polygons of a tile whose bounds overlap the query box
    pub fn query_polygons_in_tile(&self, tile: &MeshTile, qmin: &[f32; 3], qmax: &[f32; 3]) -> Vec<PolyRef> {
        let Some(header) = tile.header.as_ref() else {
            return Vec::new();
        };
        let base = self.get_poly_ref_base(tile);
        let mut polys = Vec::new();

        if !tile.bv_tree.is_empty() {
            let tbmin = header.bmin;
            let tbmax = header.bmax;
            let qfac = header.bv_quant_factor;

            let mut bmin = [0u16; 3];
            let mut bmax = [0u16; 3];
            for k in 0..3 {
                let lo = qmin[k].clamp(tbmin[k], tbmax[k]) - tbmin[k];
                let hi = qmax[k].clamp(tbmin[k], tbmax[k]) - tbmin[k];
                bmin[k] = ((qfac * lo) as u16) & 0xfffe;
                bmax[k] = ((qfac * hi + 1.0) as u16) | 1;
            }

            let mut i = 0usize;
            while i < tile.bv_tree.len() {
                let node = &tile.bv_tree[i];
                let overlap = overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
                let is_leaf = node.i >= 0;

                if is_leaf && overlap {
                    polys.push(PolyRef::new(base.id() | node.i as u32));
                }

                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += node.i.unsigned_abs() as usize;
                }
            }
            return polys;
        }

        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.is_off_mesh_connection() || poly.vert_count == 0 {
                continue;
            }
            let mut bmin = tile.vert(poly.verts[0] as usize);
            let mut bmax = bmin;
            for &v in &poly.vert_indices()[1..] {
                let p = tile.vert(v as usize);
                vmin(&mut bmin, &p);
                vmax(&mut bmax, &p);
            }
            if overlap_bounds(qmin, qmax, &bmin, &bmax) {
                polys.push(PolyRef::new(base.id() | i as u32));
            }
        }
        polys
    }

    fn find_nearest_poly_in_tile(&self, ti: usize, center: &[f32; 3], half_extents: &[f32; 3]) -> (PolyRef, [f32; 3]) {
        let tile = &self.tiles[ti];
        let bmin = [
            center[0] - half_extents[0],
            center[1] - half_extents[1],
            center[2] - half_extents[2],
        ];
        let bmax = [
            center[0] + half_extents[0],
            center[1] + half_extents[1],
            center[2] + half_extents[2],
        ];

        let mut nearest = PolyRef::NULL;
        let mut nearest_pt = *center;
        let mut nearest_dist_sqr = f32::MAX;

        let candidates = self.query_polygons_in_tile(tile, &bmin, &bmax);
        for reference in candidates.into_iter().take(MAX_NEAREST_CANDIDATES) {
            let ip = reference.poly_index() as usize;
            let (closest, pos_over_poly) = Self::closest_point_in_tile(tile, ip, center);

            // Over the polygon, climbable height differences are free
            let d = if pos_over_poly {
                let d = (center[1] - closest[1]).abs() - tile.walkable_climb();
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                vdist_sqr(center, &closest)
            };

            if d < nearest_dist_sqr {
                nearest_pt = closest;
                nearest_dist_sqr = d;
                nearest = reference;
            }
        }

        (nearest, nearest_pt)
    }

    /// Adds a tile from serialized data
    ///
    /// With a valid `last_ref` the tile is restored into the slot and salt
    /// encoded in the reference, so references saved earlier stay valid.
    pub fn add_tile(&mut self, data: &[u8], last_ref: TileRef) -> Result<TileRef> {
        let mut tile = binary_format::read_tile(data)?;
        let Some(header) = tile.header.clone() else {
            return Err(Status::invalid_param());
        };

        if header.poly_count > self.params.max_polys_per_tile {
            return Err(Status::invalid_param());
        }
        if self.tile_lut.contains_key(&(header.x, header.y, header.layer)) {
            return Err(Status::failure(StatusDetail::ALREADY_OCCUPIED));
        }

        let index = if last_ref.is_valid() {
            let index = last_ref.tile_index() as usize;
            let Some(pos) = self.next_free.iter().position(|&i| i == index) else {
                return Err(Status::failure(StatusDetail::OUT_OF_MEMORY));
            };
            if last_ref.salt() == 0 {
                return Err(Status::invalid_param());
            }
            self.next_free.remove(pos);
            tile.salt = last_ref.salt();
            index
        } else {
            let Some(index) = self.next_free.pop() else {
                return Err(Status::failure(StatusDetail::OUT_OF_MEMORY));
            };
            tile.salt = self.tiles[index].salt;
            index
        };

        tile.index = index;
        self.tiles[index] = tile;
        self.tile_lut.insert((header.x, header.y, header.layer), index);

        self.connect_int_links(index);
        self.base_off_mesh_links(index);
        self.connect_ext_off_mesh_links(index, index, None);

        // Other layers at the same location
        for j in self.tile_indices_at(header.x, header.y) {
            if j == index {
                continue;
            }
            self.connect_ext_links(index, j, None);
            self.connect_ext_links(j, index, None);
            self.connect_ext_off_mesh_links(index, j, None);
            self.connect_ext_off_mesh_links(j, index, None);
        }

        for side in 0..8u8 {
            for j in self.neighbour_tile_indices(header.x, header.y, side) {
                self.connect_ext_links(index, j, Some(side));
                self.connect_ext_links(j, index, Some(opposite_tile(side)));
                self.connect_ext_off_mesh_links(index, j, Some(side));
                self.connect_ext_off_mesh_links(j, index, Some(opposite_tile(side)));
            }
        }

        let tile_ref = self.get_poly_ref_base(&self.tiles[index]);
        log::debug!(
            "added tile ({}, {}, {}) with {} polys as {tile_ref}",
            header.x,
            header.y,
            header.layer,
            header.poly_count
        );
        Ok(tile_ref)
    }

    /// Removes a tile and returns its serialized data
    ///
    /// The slot salt is advanced so every reference into the tile becomes
    /// invalid.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<Vec<u8>> {
        if !tile_ref.is_valid() {
            return Err(Status::invalid_param());
        }
        let index = tile_ref.tile_index() as usize;
        let Some(tile) = self.tiles.get(index) else {
            return Err(Status::invalid_param());
        };
        if tile.salt != tile_ref.salt() {
            return Err(Status::invalid_param());
        }
        let Some(header) = tile.header.clone() else {
            return Err(Status::invalid_param());
        };

        let data = binary_format::write_tile(tile)?;

        self.tile_lut.remove(&(header.x, header.y, header.layer));

        for j in self.tile_indices_at(header.x, header.y) {
            self.unconnect_links(j, index);
        }
        for side in 0..8u8 {
            for j in self.neighbour_tile_indices(header.x, header.y, side) {
                self.unconnect_links(j, index);
            }
        }

        let mask = (1u32 << SALT_BITS) - 1;
        let mut salt = (self.tiles[index].salt + 1) & mask;
        if salt == 0 {
            salt = 1;
        }
        self.tiles[index] = MeshTile {
            salt,
            index,
            ..Default::default()
        };
        self.next_free.push(index);

        log::debug!(
            "removed tile ({}, {}, {}) {tile_ref}",
            header.x,
            header.y,
            header.layer
        );
        Ok(data)
    }

    /// Serializes a loaded tile
    pub fn tile_to_bytes(&self, tile_ref: TileRef) -> Result<Vec<u8>> {
        let tile = self.get_tile_by_ref(tile_ref).ok_or(Status::invalid_param())?;
        binary_format::write_tile(tile)
    }

    fn connect_int_links(&mut self, ti: usize) {
        let base = self.get_poly_ref_base(&self.tiles[ti]);
        let tile = &mut self.tiles[ti];
        tile.links.clear();
        tile.links_free_list.clear();

        for i in 0..tile.polys.len() {
            tile.polys[i].first_link = None;
            if tile.polys[i].is_off_mesh_connection() {
                continue;
            }

            // Build edge links backwards so the list ends up in edge order
            let nv = tile.polys[i].vert_count as usize;
            for j in (0..nv).rev() {
                let nei = tile.polys[i].neis[j];
                if nei == 0 || nei & EXT_LINK != 0 {
                    continue;
                }
                tile.push_link(
                    i,
                    Link {
                        reference: PolyRef::new(base.id() | (nei - 1) as u32),
                        edge: j as u8,
                        ..Default::default()
                    },
                );
            }
        }
    }

    fn base_off_mesh_links(&mut self, ti: usize) {
        let tile = &self.tiles[ti];
        let Some(header) = tile.header.as_ref() else {
            return;
        };
        let base = self.get_poly_ref_base(tile);
        let mut snaps = Vec::new();
        let mut planned = Vec::new();

        for con in &tile.off_mesh_cons {
            let ext = [con.rad, header.walkable_climb, con.rad];
            let p = con.start_pos();
            let (reference, nearest) = self.find_nearest_poly_in_tile(ti, &p, &ext);
            if !reference.is_valid() {
                continue;
            }
            if sqr(nearest[0] - p[0]) + sqr(nearest[2] - p[2]) > sqr(con.rad) {
                continue;
            }
            let con_poly = con.poly as usize;
            let Some(poly) = tile.polys.get(con_poly) else {
                continue;
            };

            // Snap the start onto the mesh
            snaps.push((poly.verts[0] as usize, nearest));

            planned.push(PlannedLink {
                tile: ti,
                poly: con_poly,
                link: Link {
                    reference,
                    edge: 0,
                    ..Default::default()
                },
            });
            planned.push(PlannedLink {
                tile: ti,
                poly: reference.poly_index() as usize,
                link: Link {
                    reference: PolyRef::new(base.id() | con.poly as u32),
                    edge: 0xff,
                    ..Default::default()
                },
            });
        }

        let tile = &mut self.tiles[ti];
        for (v, p) in snaps {
            tile.verts[v * 3..v * 3 + 3].copy_from_slice(&p);
        }
        self.apply_links(planned);
    }

    fn connect_ext_off_mesh_links(&mut self, ti: usize, target: usize, side: Option<u8>) {
        let opposite_side = side.map_or(LINK_INTERNAL_SIDE, opposite_tile);
        let target_tile = &self.tiles[target];
        let Some(target_header) = target_tile.header.as_ref() else {
            return;
        };
        let target_base = self.get_poly_ref_base(target_tile);
        let mut snaps = Vec::new();
        let mut planned = Vec::new();

        for con in &target_tile.off_mesh_cons {
            if con.side != opposite_side {
                continue;
            }
            let con_poly = con.poly as usize;
            let Some(target_poly) = target_tile.polys.get(con_poly) else {
                continue;
            };
            // Connections whose start could not be linked are skipped
            if target_poly.first_link.is_none() {
                continue;
            }

            let ext = [con.rad, target_header.walkable_climb, con.rad];
            let p = con.end_pos();
            let (reference, nearest) = self.find_nearest_poly_in_tile(ti, &p, &ext);
            if !reference.is_valid() {
                continue;
            }
            if sqr(nearest[0] - p[0]) + sqr(nearest[2] - p[2]) > sqr(con.rad) {
                continue;
            }

            snaps.push((target_poly.verts[1] as usize, nearest));

            planned.push(PlannedLink {
                tile: target,
                poly: con_poly,
                link: Link {
                    reference,
                    edge: 1,
                    side: opposite_side,
                    ..Default::default()
                },
            });

            if con.is_bidirectional() {
                planned.push(PlannedLink {
                    tile: ti,
                    poly: reference.poly_index() as usize,
                    link: Link {
                        reference: PolyRef::new(target_base.id() | con.poly as u32),
                        edge: 0xff,
                        side: side.unwrap_or(LINK_INTERNAL_SIDE),
                        ..Default::default()
                    },
                });
            }
        }

        let target_tile = &mut self.tiles[target];
        for (v, p) in snaps {
            target_tile.verts[v * 3..v * 3 + 3].copy_from_slice(&p);
        }
        self.apply_links(planned);
    }

    fn connect_ext_links(&mut self, ti: usize, target: usize, side: Option<u8>) {
        let tile = &self.tiles[ti];
        let mut planned = Vec::new();

        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] & EXT_LINK == 0 {
                    continue;
                }
                let dir = (poly.neis[j] & 0xff) as u8;
                if side.is_some_and(|s| s != dir) {
                    continue;
                }

                let va = tile.vert(poly.verts[j] as usize);
                let vb = tile.vert(poly.verts[(j + 1) % nv] as usize);
                for (reference, nmin, nmax) in
                    self.find_connecting_polys(&va, &vb, target, opposite_tile(dir))
                {
                    // Compress the portal limits to a byte
                    let axis = match dir {
                        0 | 4 => Some(2),
                        2 | 6 => Some(0),
                        _ => None,
                    };
                    let (bmin, bmax) = match axis {
                        Some(a) => {
                            let mut tmin = (nmin - va[a]) / (vb[a] - va[a]);
                            let mut tmax = (nmax - va[a]) / (vb[a] - va[a]);
                            if tmin > tmax {
                                std::mem::swap(&mut tmin, &mut tmax);
                            }
                            (
                                (tmin.clamp(0.0, 1.0) * 255.0).round() as u8,
                                (tmax.clamp(0.0, 1.0) * 255.0).round() as u8,
                            )
                        }
                        None => (0, 0),
                    };

                    planned.push(PlannedLink {
                        tile: ti,
                        poly: i,
                        link: Link {
                            reference,
                            edge: j as u8,
                            side: dir,
                            bmin,
                            bmax,
                            ..Default::default()
                        },
                    });
                }
            }
        }

        self.apply_links(planned);
    }

    fn find_connecting_polys(
        &self,
        va: &[f32; 3],
        vb: &[f32; 3],
        target: usize,
        side: u8,
    ) -> Vec<(PolyRef, f32, f32)> {
        let tile = &self.tiles[target];
        let mut found = Vec::new();
        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = get_slab_coord(va, side);
        let base = self.get_poly_ref_base(tile);
        let m = EXT_LINK | side as u16;

        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] != m {
                    continue;
                }
                let vc = tile.vert(poly.verts[j] as usize);
                let vd = tile.vert(poly.verts[(j + 1) % nv] as usize);
                let bpos = get_slab_coord(&vc, side);
                if (apos - bpos).abs() > 0.01 {
                    continue;
                }

                let (bmin, bmax) = calc_slab_end_points(&vc, &vd, side);
                if !overlap_slabs(&amin, &amax, &bmin, &bmax, 0.01, tile.walkable_climb()) {
                    continue;
                }

                if found.len() < MAX_CONNECTING_POLYS {
                    found.push((
                        PolyRef::new(base.id() | i as u32),
                        amin[0].max(bmin[0]),
                        amax[0].min(bmax[0]),
                    ));
                }
                break;
            }
        }
        found
    }

    fn unconnect_links(&mut self, ti: usize, target: usize) {
        let tile = &mut self.tiles[ti];
        for i in 0..tile.polys.len() {
            let mut prev: Option<usize> = None;
            let mut cur = tile.polys[i].first_link;
            while let Some(j) = cur {
                let next = tile.links[j].next;
                if tile.links[j].reference.tile_index() as usize == target {
                    match prev {
                        None => tile.polys[i].first_link = next,
                        Some(p) => tile.links[p].next = next,
                    }
                    tile.links_free_list.push(j);
                } else {
                    prev = Some(j);
                }
                cur = next;
            }
        }
    }

    fn apply_links(&mut self, planned: Vec<PlannedLink>) {
        for p in planned {
            self.tiles[p.tile].push_link(p.poly, p.link);
        }
    }

    /// Size of the state blob written by [`NavMesh::store_tile_state`]
    pub fn get_tile_state_size(&self, tile_ref: TileRef) -> usize {
        self.get_tile_by_ref(tile_ref)
            .map_or(0, binary_format::tile_state_size)
    }

    /// Stores per-polygon flags and areas of a tile
    pub fn store_tile_state(&self, tile_ref: TileRef) -> Result<Vec<u8>> {
        let tile = self.get_tile_by_ref(tile_ref).ok_or(Status::invalid_param())?;
        binary_format::write_tile_state(tile, tile_ref)
    }

    /// Restores per-polygon flags and areas stored by [`NavMesh::store_tile_state`]
    pub fn restore_tile_state(&mut self, tile_ref: TileRef, data: &[u8]) -> Result<()> {
        if self.get_tile_by_ref(tile_ref).is_none() {
            return Err(Status::invalid_param());
        }
        let tile = &mut self.tiles[tile_ref.tile_index() as usize];
        binary_format::read_tile_state(tile, tile_ref, data)
    }

    /// Serializes the whole mesh as a mesh set
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let tiles: Vec<(TileRef, Vec<u8>)> = self
            .tiles()
            .map(|t| Ok((self.get_tile_ref(t), binary_format::write_tile(t)?)))
            .collect::<Result<_>>()?;
        binary_format::write_mesh_set(&self.params, &tiles)
    }

    /// Rebuilds a mesh serialized by [`NavMesh::to_bytes`], restoring every
    /// tile at its original reference
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (params, tiles) = binary_format::read_mesh_set(data)?;
        let mut mesh = Self::new(params)?;
        for (tile_ref, tile_data) in tiles {
            mesh.add_tile(tile_data, tile_ref)?;
        }
        log::info!("loaded navmesh with {} tiles", mesh.tile_count());
        Ok(mesh)
    }

    /// Writes the mesh set to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), crate::Error> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Reads a mesh set from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, crate::Error> {
        let data = std::fs::read(path)?;
        Ok(Self::from_bytes(&data)?)
    }
}
