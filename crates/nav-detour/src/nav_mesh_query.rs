//! Spatial and path queries over a navigation mesh
//!
//! [`NavMeshQuery`] borrows a [`NavMesh`] and owns the search state: a node
//! pool for graph searches, a small second pool for local searches and the
//! open list. A sliced path search keeps its state in the query between
//! calls; while one is in flight the graph searches that share the node pool
//! are rejected with an invalid parameter status.

use std::collections::VecDeque;

use bitflags::bitflags;
use rand::Rng;

use crate::nav_mesh::{LINK_INTERNAL_SIDE, MeshTile, Poly};
use crate::node_pool::{NodeFlags, NodeIndex, NodePool, NodeQueue};
use crate::raycast_hit::{RaycastHit, RaycastOptions};
use crate::{
    EXT_LINK, MAX_VERTS_PER_POLY, NavMesh, PolyRef, QueryFilter, Result, Status, StatusDetail,
};
use nav_common::{
    calc_poly_center, dist_pt_seg_sqr_2d, distance_pt_poly_edges_sqr, intersect_seg_seg_2d,
    intersect_segment_poly_2d, overlap_poly_poly_2d, point_in_polygon, random_point_in_convex_poly,
    sqr, tri_area_2d, vadd, vdist, vequal, vert_at, visfinite, vlerp, vnormalize, vsub,
};

/// Heuristic scale of the A* search, slightly below one so the search
/// stays admissible with float rounding
const H_SCALE: f32 = 0.999;

const TINY_NODE_POOL_SIZE: usize = 64;
const MAX_LOCAL_STACK: usize = 48;
const MAX_WALL_INTERVALS: usize = 16;

/// Maximum number of polygons reported by [`NavMeshQuery::move_along_surface`]
pub const MAX_MOVE_VISITED: usize = 16;

/// Default half extents used to resolve positions to polygons
pub const DEFAULT_QUERY_EXTENT: [f32; 3] = [2.0, 4.0, 2.0];

bitflags! {
    /// Flags of a straight path vertex
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the start position
        const START = 0x01;
        /// The vertex is the end position
        const END = 0x02;
        /// The vertex is the start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags! {
    /// Extra vertices added by [`NavMeshQuery::find_straight_path`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StraightPathOptions: u8 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

/// Result of a path search
#[derive(Debug, Clone, PartialEq)]
pub struct FindPathResult {
    /// Polygons from the start polygon towards the goal
    pub polys: Vec<PolyRef>,
    /// Success status, with `PARTIAL_RESULT`, `BUFFER_TOO_SMALL` or
    /// `OUT_OF_NODES` details when the path is incomplete
    pub status: Status,
}

impl FindPathResult {
    /// Returns true if the path does not reach the goal polygon
    pub fn is_partial(&self) -> bool {
        self.status.has_detail(StatusDetail::PARTIAL_RESULT)
    }
}

/// Polygons reached by a flood search, in ascending cost order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolysAroundResult {
    pub refs: Vec<PolyRef>,
    /// Polygon each result was reached from, null for the start polygon
    pub parents: Vec<PolyRef>,
    /// Search cost of each result; empty for neighbourhood searches
    pub costs: Vec<f32>,
    pub status: Status,
}

/// Vertex of a straight path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    pub pos: [f32; 3],
    pub flags: StraightPathFlags,
    /// Polygon entered at this vertex, null for the end vertex
    pub reference: PolyRef,
}

/// Result of [`NavMeshQuery::find_straight_path`]
#[derive(Debug, Clone, PartialEq)]
pub struct StraightPath {
    pub points: Vec<StraightPathPoint>,
    pub status: Status,
}

/// Result of [`NavMeshQuery::find_distance_to_wall`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallDistance {
    /// Distance to the nearest wall, the search radius when none was found
    pub distance: f32,
    /// Nearest wall point, the search center when none was found
    pub hit_pos: [f32; 3],
    /// Direction from the wall towards the search center
    pub hit_normal: [f32; 3],
}

/// Boundary segment of a polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    pub start: [f32; 3],
    pub end: [f32; 3],
    /// Neighbour across the segment, null for walls
    pub neighbour: PolyRef,
}

struct StraightPathBuilder {
    points: Vec<StraightPathPoint>,
    max: usize,
}

impl StraightPathBuilder {
    /// Appends a vertex, merging it with the previous one when they
    /// coincide. Returns the final status once the path is complete.
    fn append_vertex(
        &mut self,
        pos: &[f32; 3],
        flags: StraightPathFlags,
        reference: PolyRef,
    ) -> Option<Status> {
        if let Some(last) = self.points.last_mut() {
            if vequal(&last.pos, pos) {
                last.flags = flags;
                last.reference = reference;
                return None;
            }
        }

        self.points.push(StraightPathPoint {
            pos: *pos,
            flags,
            reference,
        });
        if self.points.len() >= self.max {
            return Some(Status::success(StatusDetail::BUFFER_TOO_SMALL));
        }
        if flags == StraightPathFlags::END {
            return Some(Status::SUCCESS);
        }
        None
    }

    fn buffer_status(&self) -> StatusDetail {
        if self.points.len() >= self.max {
            StatusDetail::BUFFER_TOO_SMALL
        } else {
            StatusDetail::empty()
        }
    }

    fn finish(self, status: Status) -> StraightPath {
        StraightPath {
            points: self.points,
            status,
        }
    }
}

#[derive(Debug)]
struct SlicedQuery {
    status: Status,
    last_best_node: Option<NodeIndex>,
    last_best_node_cost: f32,
    start_ref: PolyRef,
    end_ref: PolyRef,
    end_pos: [f32; 3],
    filter: QueryFilter,
}

fn collect_verts(tile: &MeshTile, poly: &Poly) -> ([f32; MAX_VERTS_PER_POLY * 3], usize) {
    let mut verts = [0.0; MAX_VERTS_PER_POLY * 3];
    let idx = poly.vert_indices();
    for (i, &v) in idx.iter().enumerate() {
        verts[i * 3..i * 3 + 3].copy_from_slice(&tile.vert(v as usize));
    }
    (verts, idx.len())
}

fn poly_area(verts: &[f32], nv: usize) -> f32 {
    let v0 = vert_at(verts, 0);
    (2..nv)
        .map(|j| tri_area_2d(&v0, &vert_at(verts, j - 1), &vert_at(verts, j)))
        .sum()
}

fn midpoint(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    vlerp(a, b, 0.5)
}

/// Sorted insert of a portal interval along an edge
fn insert_interval(ints: &mut Vec<(i32, i32, PolyRef)>, tmin: i32, tmax: i32, r: PolyRef) {
    if ints.len() >= MAX_WALL_INTERVALS {
        return;
    }
    let idx = ints
        .iter()
        .position(|&(imin, _, _)| tmax <= imin)
        .unwrap_or(ints.len());
    ints.insert(idx, (tmin, tmax, r));
}

/// Query engine over a navigation mesh
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    nav_mesh: &'a NavMesh,
    node_pool: NodePool,
    tiny_node_pool: NodePool,
    open_list: NodeQueue,
    sliced: Option<SlicedQuery>,
    query_extent: [f32; 3],
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query with a node pool of `max_nodes` nodes (at most 65535)
    pub fn new(nav_mesh: &'a NavMesh, max_nodes: usize) -> Self {
        let max_nodes = max_nodes.clamp(1, u16::MAX as usize);
        Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes, (max_nodes / 4).max(1)),
            tiny_node_pool: NodePool::new(TINY_NODE_POOL_SIZE, TINY_NODE_POOL_SIZE / 2),
            open_list: NodeQueue::new(max_nodes),
            sliced: None,
            query_extent: DEFAULT_QUERY_EXTENT,
        }
    }

    /// Mesh the query runs against
    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    /// Half extents used to resolve positions when a reference is missing
    pub fn query_extent(&self) -> [f32; 3] {
        self.query_extent
    }

    pub fn set_query_extent(&mut self, extent: [f32; 3]) {
        self.query_extent = extent;
    }

    fn tile_and_poly(&self, reference: PolyRef) -> Option<(&'a MeshTile, &'a Poly)> {
        let mesh: &'a NavMesh = self.nav_mesh;
        mesh.get_tile_and_poly_by_ref(reference).ok()
    }

    fn ensure_unrestricted(&self) -> Result<()> {
        if self.sliced.is_some() {
            log::debug!("graph search rejected while a sliced path search is in flight");
            return Err(Status::invalid_param());
        }
        Ok(())
    }

    /// Returns true if the reference is valid and passes the filter
    pub fn is_valid_poly_ref(&self, reference: PolyRef, filter: &QueryFilter) -> bool {
        self.tile_and_poly(reference)
            .is_some_and(|(tile, poly)| filter.pass_filter(reference, tile, poly))
    }

    /// Returns true if the polygon was expanded by the last graph search
    pub fn is_in_closed_list(&self, reference: PolyRef) -> bool {
        self.node_pool
            .find_nodes(reference, usize::MAX)
            .iter()
            .any(|&i| self.node_pool.node(i).flags.contains(NodeFlags::CLOSED))
    }

    // Portal helpers

    fn portal_points(
        from_ref: PolyRef,
        from_tile: &MeshTile,
        from_poly: &Poly,
        to_ref: PolyRef,
        to_tile: &MeshTile,
        to_poly: &Poly,
    ) -> Option<([f32; 3], [f32; 3])> {
        let link = from_tile
            .poly_links(from_poly)
            .find(|l| l.reference == to_ref)?;

        if from_poly.is_off_mesh_connection() {
            let v = from_tile.vert(from_poly.verts[link.edge as usize] as usize);
            return Some((v, v));
        }
        if to_poly.is_off_mesh_connection() {
            let back = to_tile
                .poly_links(to_poly)
                .find(|l| l.reference == from_ref)?;
            let v = to_tile.vert(to_poly.verts[back.edge as usize] as usize);
            return Some((v, v));
        }

        let nv = from_poly.vert_count as usize;
        let e = link.edge as usize;
        let v0 = from_tile.vert(from_poly.verts[e] as usize);
        let v1 = from_tile.vert(from_poly.verts[(e + 1) % nv] as usize);

        // Portals across tiles may cover only part of the edge
        if link.side != LINK_INTERNAL_SIDE && (link.bmin != 0 || link.bmax != 255) {
            let s = 1.0 / 255.0;
            return Some((
                vlerp(&v0, &v1, link.bmin as f32 * s),
                vlerp(&v0, &v1, link.bmax as f32 * s),
            ));
        }
        Some((v0, v1))
    }

    /// Left and right end points of the portal between two adjacent polygons
    pub fn get_portal_points(&self, from: PolyRef, to: PolyRef) -> Result<([f32; 3], [f32; 3])> {
        let (from_tile, from_poly) = self.tile_and_poly(from).ok_or(Status::invalid_param())?;
        let (to_tile, to_poly) = self.tile_and_poly(to).ok_or(Status::invalid_param())?;
        Self::portal_points(from, from_tile, from_poly, to, to_tile, to_poly)
            .ok_or(Status::invalid_param())
    }

    /// Midpoint of the portal between two adjacent polygons
    pub fn get_edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<[f32; 3]> {
        let (left, right) = self.get_portal_points(from, to)?;
        Ok(midpoint(&left, &right))
    }

    // Point queries

    /// Closest point on a polygon and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, reference: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }
        self.nav_mesh.closest_point_on_poly(reference, pos)
    }

    /// Closest point on the polygon boundary on the xz-plane, or `pos` itself
    /// when it lies inside the polygon. Faster than
    /// [`closest_point_on_poly`](Self::closest_point_on_poly) as the detail
    /// mesh is not used.
    pub fn closest_point_on_poly_boundary(&self, reference: PolyRef, pos: &[f32; 3]) -> Result<[f32; 3]> {
        let (tile, poly) = self.tile_and_poly(reference).ok_or(Status::invalid_param())?;
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }

        let (verts, nv) = collect_verts(tile, poly);
        let mut edged = [0.0; MAX_VERTS_PER_POLY];
        let mut edget = [0.0; MAX_VERTS_PER_POLY];
        if distance_pt_poly_edges_sqr(pos, &verts, nv, &mut edged, &mut edget) {
            return Ok(*pos);
        }

        let mut imin = 0;
        for i in 1..nv {
            if edged[i] < edged[imin] {
                imin = i;
            }
        }
        let va = vert_at(&verts, imin);
        let vb = vert_at(&verts, (imin + 1) % nv);
        Ok(vlerp(&va, &vb, edget[imin]))
    }

    /// Height of the polygon surface under `pos`
    pub fn get_poly_height(&self, reference: PolyRef, pos: &[f32; 3]) -> Result<f32> {
        let (tile, poly) = self.tile_and_poly(reference).ok_or(Status::invalid_param())?;
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }

        if poly.is_off_mesh_connection() {
            let v0 = tile.vert(poly.verts[0] as usize);
            let v1 = tile.vert(poly.verts[1] as usize);
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return Ok(v0[1] + (v1[1] - v0[1]) * t);
        }

        tile.poly_height(reference.poly_index() as usize, pos)
            .ok_or(Status::invalid_param())
    }

    /// Centroid of a polygon's vertices
    pub fn get_poly_center(&self, reference: PolyRef) -> Result<[f32; 3]> {
        let (tile, poly) = self.tile_and_poly(reference).ok_or(Status::invalid_param())?;
        Ok(calc_poly_center(poly.vert_indices(), &tile.verts))
    }

    fn polys_in_box(&self, center: &[f32; 3], half_extents: &[f32; 3], filter: &QueryFilter) -> Vec<PolyRef> {
        let bmin = vsub(center, half_extents);
        let bmax = vadd(center, half_extents);
        let (minx, miny) = self.nav_mesh.calc_tile_loc(&bmin);
        let (maxx, maxy) = self.nav_mesh.calc_tile_loc(&bmax);

        let mut polys = Vec::new();
        for y in miny..=maxy {
            for x in minx..=maxx {
                for tile in self.nav_mesh.get_tiles_at(x, y) {
                    for r in self.nav_mesh.query_polygons_in_tile(tile, &bmin, &bmax) {
                        let poly = &tile.polys[r.poly_index() as usize];
                        if filter.pass_filter(r, tile, poly) {
                            polys.push(r);
                        }
                    }
                }
            }
        }
        polys
    }

    fn check_box(center: &[f32; 3], half_extents: &[f32; 3]) -> Result<()> {
        if !visfinite(center) || !visfinite(half_extents) || half_extents.iter().any(|&e| e < 0.0) {
            return Err(Status::invalid_param());
        }
        Ok(())
    }

    /// Ground polygons whose bounds overlap the query box
    ///
    /// At most `max_polys` are returned; the status carries
    /// `BUFFER_TOO_SMALL` when more overlapped.
    pub fn query_polygons(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
        max_polys: usize,
    ) -> Result<(Vec<PolyRef>, Status)> {
        Self::check_box(center, half_extents)?;
        if max_polys == 0 {
            return Err(Status::invalid_param());
        }

        let mut polys = self.polys_in_box(center, half_extents, filter);
        let mut status = Status::SUCCESS;
        if polys.len() > max_polys {
            polys.truncate(max_polys);
            status = status.with_detail(StatusDetail::BUFFER_TOO_SMALL);
        }
        Ok((polys, status))
    }

    /// Nearest polygon to `center` within the query box
    ///
    /// Returns a null reference, not an error, when no polygon overlaps the
    /// box. Polygons the point lies over are preferred: their distance is
    /// the height difference less the tile's walkable climb.
    pub fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<(PolyRef, [f32; 3])> {
        Self::check_box(center, half_extents)?;

        let mut nearest = PolyRef::NULL;
        let mut nearest_pt = *center;
        let mut nearest_dist_sqr = f32::MAX;

        for r in self.polys_in_box(center, half_extents, filter) {
            let Ok((closest, pos_over_poly)) = self.nav_mesh.closest_point_on_poly(r, center) else {
                continue;
            };
            let d = if pos_over_poly {
                let climb = self
                    .tile_and_poly(r)
                    .and_then(|(tile, _)| tile.header.as_ref())
                    .map_or(0.0, |h| h.walkable_climb);
                let d = (center[1] - closest[1]).abs() - climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                nav_common::vdist_sqr(center, &closest)
            };

            if d < nearest_dist_sqr {
                nearest_dist_sqr = d;
                nearest_pt = closest;
                nearest = r;
            }
        }

        Ok((nearest, nearest_pt))
    }

    // A* search

    fn push_start_node(&mut self, reference: PolyRef, pos: &[f32; 3], total: f32) -> Result<NodeIndex> {
        let idx = self
            .node_pool
            .get_node(reference, 0)
            .ok_or(Status::failure(StatusDetail::OUT_OF_NODES))?;
        let node = self.node_pool.node_mut(idx);
        node.pos = *pos;
        node.parent = None;
        node.cost = 0.0;
        node.total = total;
        node.flags = NodeFlags::OPEN;
        self.open_list.push(&self.node_pool, idx);
        Ok(idx)
    }

    fn close_node(&mut self, idx: NodeIndex) {
        let flags = &mut self.node_pool.node_mut(idx).flags;
        flags.remove(NodeFlags::OPEN);
        flags.insert(NodeFlags::CLOSED);
    }

    fn path_to_node(&self, idx: NodeIndex, max_path: usize) -> (Vec<PolyRef>, StatusDetail) {
        let mut path = self.node_pool.path_to(idx);
        let mut detail = StatusDetail::empty();
        if path.len() > max_path {
            path.truncate(max_path);
            detail |= StatusDetail::BUFFER_TOO_SMALL;
        }
        (path, detail)
    }

    /// Expands one A* node. Returns whether the node pool ran out, or an
    /// error when the node or its parent no longer resolves.
    fn expand_path_node(
        &mut self,
        best: NodeIndex,
        end_ref: PolyRef,
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        last_best: &mut NodeIndex,
        last_best_cost: &mut f32,
    ) -> Result<bool> {
        let (best_ref, best_pos, best_cost, parent) = {
            let n = self.node_pool.node(best);
            (n.id, n.pos, n.cost, n.parent)
        };
        let (best_tile, best_poly) = self.tile_and_poly(best_ref).ok_or(Status::invalid_param())?;
        let parent_ref = match parent {
            Some(p) => {
                let r = self.node_pool.node(p).id;
                if !self.nav_mesh.is_valid_poly_ref(r) {
                    return Err(Status::invalid_param());
                }
                r
            }
            None => PolyRef::NULL,
        };

        let mut out_of_nodes = false;
        for link in best_tile.poly_links(best_poly) {
            let neighbour_ref = link.reference;
            if !neighbour_ref.is_valid() || neighbour_ref == parent_ref {
                continue;
            }
            let Some((neighbour_tile, neighbour_poly)) = self.tile_and_poly(neighbour_ref) else {
                continue;
            };
            if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                continue;
            }

            // Nodes are per polygon and tile side, so a polygon can be
            // entered from several tiles
            let cross_side = if link.side != LINK_INTERNAL_SIDE {
                link.side >> 1
            } else {
                0
            };
            let Some(nidx) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                out_of_nodes = true;
                continue;
            };

            if self.node_pool.node(nidx).flags.is_empty() {
                let Some((left, right)) = Self::portal_points(
                    best_ref,
                    best_tile,
                    best_poly,
                    neighbour_ref,
                    neighbour_tile,
                    neighbour_poly,
                ) else {
                    continue;
                };
                self.node_pool.node_mut(nidx).pos = midpoint(&left, &right);
            }
            let npos = self.node_pool.node(nidx).pos;

            let (cost, heuristic) = if neighbour_ref == end_ref {
                let cur_cost = filter.get_cost(&best_pos, &npos, best_poly);
                let end_cost = filter.get_cost(&npos, end_pos, neighbour_poly);
                (best_cost + cur_cost + end_cost, 0.0)
            } else {
                let cur_cost = filter.get_cost(&best_pos, &npos, best_poly);
                (best_cost + cur_cost, vdist(&npos, end_pos) * H_SCALE)
            };
            let total = cost + heuristic;

            let node = self.node_pool.node_mut(nidx);
            if node.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= node.total {
                continue;
            }
            node.parent = Some(best);
            node.flags.remove(NodeFlags::CLOSED);
            node.flags.insert(NodeFlags::OPEN);
            node.cost = cost;
            node.total = total;
            self.open_list.push(&self.node_pool, nidx);

            if heuristic < *last_best_cost {
                *last_best_cost = heuristic;
                *last_best = nidx;
            }
        }
        Ok(out_of_nodes)
    }

    fn check_path_params(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
    ) -> Result<()> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !self.nav_mesh.is_valid_poly_ref(end_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
        {
            return Err(Status::invalid_param());
        }
        Ok(())
    }

    /// A* path search from `start_ref` to `end_ref`
    ///
    /// When the goal cannot be reached the path leads to the visited polygon
    /// closest to the goal and carries `PARTIAL_RESULT`. Paths longer than
    /// `max_path` keep their start and carry `BUFFER_TOO_SMALL`.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<FindPathResult> {
        self.ensure_unrestricted()?;
        self.check_path_params(start_ref, end_ref, start_pos, end_pos)?;
        if max_path == 0 {
            return Err(Status::invalid_param());
        }

        if start_ref == end_ref {
            return Ok(FindPathResult {
                polys: vec![start_ref],
                status: Status::SUCCESS,
            });
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_total = vdist(start_pos, end_pos) * H_SCALE;
        let start = self.push_start_node(start_ref, start_pos, start_total)?;
        let mut last_best = start;
        let mut last_best_cost = start_total;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            self.close_node(best);
            if self.node_pool.node(best).id == end_ref {
                last_best = best;
                break;
            }
            if let Ok(oon) =
                self.expand_path_node(best, end_ref, end_pos, filter, &mut last_best, &mut last_best_cost)
            {
                out_of_nodes |= oon;
            }
        }

        let (polys, mut detail) = self.path_to_node(last_best, max_path);
        if self.node_pool.node(last_best).id != end_ref {
            detail |= StatusDetail::PARTIAL_RESULT;
        }
        if out_of_nodes {
            detail |= StatusDetail::OUT_OF_NODES;
        }

        log::debug!(
            "find_path {start_ref} -> {end_ref}: {} polys, {} nodes, {detail:?}",
            polys.len(),
            self.node_pool.node_count()
        );
        Ok(FindPathResult {
            polys,
            status: Status::success(detail),
        })
    }

    /// [`find_path`](Self::find_path) that resolves null start or end
    /// references to the nearest polygon within the query extent
    pub fn find_path_ext(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<FindPathResult> {
        let extent = self.query_extent;
        let start_ref = if start_ref.is_valid() {
            start_ref
        } else {
            self.find_nearest_poly(start_pos, &extent, filter)?.0
        };
        let end_ref = if end_ref.is_valid() {
            end_ref
        } else {
            self.find_nearest_poly(end_pos, &extent, filter)?.0
        };
        if !start_ref.is_valid() || !end_ref.is_valid() {
            return Err(Status::invalid_param());
        }
        self.find_path(start_ref, end_ref, start_pos, end_pos, filter, max_path)
    }

    // Sliced A* search

    /// Returns true while a sliced path search is in flight
    pub fn is_sliced_find_path_in_flight(&self) -> bool {
        self.sliced.is_some()
    }

    /// Starts a sliced path search
    ///
    /// The filter is copied into the query. Fails with an invalid parameter
    /// status when another sliced search is still in flight.
    pub fn init_sliced_find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<Status> {
        if self.sliced.is_some() {
            return Err(Status::invalid_param());
        }
        self.check_path_params(start_ref, end_ref, start_pos, end_pos)?;

        let mut query = SlicedQuery {
            status: Status::IN_PROGRESS,
            last_best_node: None,
            last_best_node_cost: f32::MAX,
            start_ref,
            end_ref,
            end_pos: *end_pos,
            filter: filter.clone(),
        };

        if start_ref == end_ref {
            query.status = Status::SUCCESS;
            self.sliced = Some(query);
            return Ok(Status::SUCCESS);
        }

        self.node_pool.clear();
        self.open_list.clear();
        let total = vdist(start_pos, end_pos) * H_SCALE;
        let start = self.push_start_node(start_ref, start_pos, total)?;
        query.last_best_node = Some(start);
        query.last_best_node_cost = total;
        self.sliced = Some(query);
        Ok(Status::IN_PROGRESS)
    }

    /// Runs up to `max_iter` iterations of the sliced search
    ///
    /// Returns the number of iterations done and the search status. Once the
    /// search failed, for example because a visited polygon no longer
    /// resolves, the failure is returned until the search is finalized or
    /// cancelled.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> Result<(usize, Status)> {
        let Some(mut query) = self.sliced.take() else {
            return Err(Status::invalid_param());
        };
        let result = self.update_sliced(&mut query, max_iter);
        self.sliced = Some(query);
        result
    }

    fn update_sliced(&mut self, q: &mut SlicedQuery, max_iter: usize) -> Result<(usize, Status)> {
        if q.status.is_failure() {
            return Err(q.status);
        }
        if !q.status.is_in_progress() {
            return Ok((0, q.status));
        }
        if !self.nav_mesh.is_valid_poly_ref(q.start_ref) || !self.nav_mesh.is_valid_poly_ref(q.end_ref) {
            q.status = Status::FAILURE;
            return Err(q.status);
        }

        let mut iter = 0;
        while iter < max_iter {
            let Some(best) = self.open_list.pop(&self.node_pool) else {
                break;
            };
            iter += 1;
            self.close_node(best);

            if self.node_pool.node(best).id == q.end_ref {
                q.last_best_node = Some(best);
                q.status = Status::success(q.status.detail);
                return Ok((iter, q.status));
            }

            let mut last_best = q.last_best_node.unwrap_or(best);
            let mut last_best_cost = q.last_best_node_cost;
            match self.expand_path_node(
                best,
                q.end_ref,
                &q.end_pos,
                &q.filter,
                &mut last_best,
                &mut last_best_cost,
            ) {
                Ok(out_of_nodes) => {
                    if out_of_nodes {
                        q.status = q.status.with_detail(StatusDetail::OUT_OF_NODES);
                    }
                }
                Err(_) => {
                    log::debug!("sliced path search failed: visited polygon no longer valid");
                    q.status = Status::FAILURE;
                    return Err(q.status);
                }
            }
            q.last_best_node = Some(last_best);
            q.last_best_node_cost = last_best_cost;
        }

        if self.open_list.is_empty(&self.node_pool) {
            q.status = Status::success(q.status.detail);
        }
        Ok((iter, q.status))
    }

    /// Finishes the sliced search and returns the path to the goal, or to
    /// the polygon closest to it
    pub fn finalize_sliced_find_path(&mut self, max_path: usize) -> Result<FindPathResult> {
        if max_path == 0 {
            return Err(Status::invalid_param());
        }
        let Some(q) = self.sliced.take() else {
            return Err(Status::invalid_param());
        };
        if q.status.is_failure() {
            return Err(q.status);
        }
        if q.start_ref == q.end_ref {
            return Ok(FindPathResult {
                polys: vec![q.start_ref],
                status: Status::SUCCESS,
            });
        }

        let last_best = q.last_best_node.ok_or(Status::FAILURE)?;
        let (polys, mut detail) = self.path_to_node(last_best, max_path);
        if self.node_pool.node(last_best).id != q.end_ref {
            detail |= StatusDetail::PARTIAL_RESULT;
        }
        Ok(FindPathResult {
            polys,
            status: Status::success(q.status.detail | detail),
        })
    }

    /// Finishes the sliced search, ending the path at the furthest polygon
    /// of `existing` that the search visited
    pub fn finalize_sliced_find_path_partial(
        &mut self,
        existing: &[PolyRef],
        max_path: usize,
    ) -> Result<FindPathResult> {
        if existing.is_empty() || max_path == 0 {
            return Err(Status::invalid_param());
        }
        let Some(q) = self.sliced.take() else {
            return Err(Status::invalid_param());
        };
        if q.status.is_failure() {
            return Err(q.status);
        }
        if q.start_ref == q.end_ref {
            return Ok(FindPathResult {
                polys: vec![q.start_ref],
                status: Status::SUCCESS,
            });
        }

        let visited = existing
            .iter()
            .rev()
            .find_map(|&r| self.node_pool.find_nodes(r, 1).first().copied());
        let mut detail = StatusDetail::empty();
        let node = match visited {
            Some(node) => node,
            None => {
                detail |= StatusDetail::PARTIAL_RESULT;
                q.last_best_node.ok_or(Status::FAILURE)?
            }
        };

        let (polys, path_detail) = self.path_to_node(node, max_path);
        Ok(FindPathResult {
            polys,
            status: Status::success(q.status.detail | detail | path_detail),
        })
    }

    /// Drops the in-flight sliced search
    pub fn cancel_sliced_find_path(&mut self) {
        self.sliced = None;
    }

    // Dijkstra searches

    fn dijkstra_flood<F>(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        filter: &QueryFilter,
        max_result: usize,
        touches: F,
    ) -> Result<PolysAroundResult>
    where
        F: Fn(&[f32; 3], &[f32; 3]) -> bool,
    {
        self.node_pool.clear();
        self.open_list.clear();
        self.push_start_node(start_ref, center, 0.0)?;

        let mut result = PolysAroundResult::default();
        let mut detail = StatusDetail::empty();

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            self.close_node(best);
            let (best_ref, best_pos, best_total, parent) = {
                let n = self.node_pool.node(best);
                (n.id, n.pos, n.total, n.parent)
            };
            let Some((best_tile, best_poly)) = self.tile_and_poly(best_ref) else {
                continue;
            };
            let parent_ref = parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            if result.refs.len() < max_result {
                result.refs.push(best_ref);
                result.parents.push(parent_ref);
                result.costs.push(best_total);
            } else {
                detail |= StatusDetail::BUFFER_TOO_SMALL;
            }

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || neighbour_ref == parent_ref {
                    continue;
                }
                let Some((neighbour_tile, neighbour_poly)) = self.tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }
                let Some((va, vb)) = Self::portal_points(
                    best_ref,
                    best_tile,
                    best_poly,
                    neighbour_ref,
                    neighbour_tile,
                    neighbour_poly,
                ) else {
                    continue;
                };
                if !touches(&va, &vb) {
                    continue;
                }

                let Some(nidx) = self.node_pool.get_node(neighbour_ref, 0) else {
                    detail |= StatusDetail::OUT_OF_NODES;
                    continue;
                };
                let node = self.node_pool.node_mut(nidx);
                if node.flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if node.flags.is_empty() {
                    node.pos = midpoint(&va, &vb);
                }

                let total = best_total + filter.get_cost(&best_pos, &node.pos, best_poly);
                if node.flags.contains(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.total = total;
                node.flags = NodeFlags::OPEN;
                self.open_list.push(&self.node_pool, nidx);
            }
        }

        result.status = Status::success(detail);
        Ok(result)
    }

    /// Polygons whose portals touch a circle, flooding out from `start_ref`
    pub fn find_polys_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<PolysAroundResult> {
        self.ensure_unrestricted()?;
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !visfinite(center)
            || !radius.is_finite()
            || radius < 0.0
        {
            return Err(Status::invalid_param());
        }

        let radius_sqr = sqr(radius);
        let center = *center;
        self.dijkstra_flood(start_ref, &center, filter, max_result, |va, vb| {
            dist_pt_seg_sqr_2d(&center, va, vb).0 <= radius_sqr
        })
    }

    /// Polygons whose portals intersect a convex shape given as a flat
    /// vertex buffer, flooding out from `start_ref`
    pub fn find_polys_around_shape(
        &mut self,
        start_ref: PolyRef,
        verts: &[f32],
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<PolysAroundResult> {
        self.ensure_unrestricted()?;
        let nverts = verts.len() / 3;
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || nverts < 3
            || verts.len() % 3 != 0
            || verts.iter().any(|v| !v.is_finite())
        {
            return Err(Status::invalid_param());
        }

        let idx: Vec<u16> = (0..nverts as u16).collect();
        let center = calc_poly_center(&idx, verts);
        self.dijkstra_flood(start_ref, &center, filter, max_result, |va, vb| {
            intersect_segment_poly_2d(va, vb, verts, nverts)
                .is_some_and(|hit| hit.tmin <= 1.0 && hit.tmax >= 0.0)
        })
    }

    /// Path from the start of the last Dijkstra or A* search to `end_ref`
    pub fn get_path_from_dijkstra_search(&self, end_ref: PolyRef, max_path: usize) -> Result<FindPathResult> {
        self.ensure_unrestricted()?;
        if !self.nav_mesh.is_valid_poly_ref(end_ref) || max_path == 0 {
            return Err(Status::invalid_param());
        }
        let idx = self
            .node_pool
            .find_nodes(end_ref, 1)
            .first()
            .copied()
            .ok_or(Status::invalid_param())?;
        let (polys, detail) = self.path_to_node(idx, max_path);
        Ok(FindPathResult {
            polys,
            status: Status::success(detail),
        })
    }

    /// Non-overlapping polygons around `start_ref` within `radius`
    ///
    /// Off-mesh connections are skipped. Polygons overlapping an already
    /// accepted, unconnected polygon are left out, so the set is usable as
    /// a local 2D surface.
    pub fn find_local_neighbourhood(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<PolysAroundResult> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !visfinite(center)
            || !radius.is_finite()
            || radius < 0.0
            || max_result == 0
        {
            return Err(Status::invalid_param());
        }

        self.tiny_node_pool.clear();
        let start = self
            .tiny_node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(StatusDetail::OUT_OF_NODES))?;
        self.tiny_node_pool.node_mut(start).flags = NodeFlags::CLOSED;

        let mut stack = VecDeque::with_capacity(MAX_LOCAL_STACK);
        stack.push_back(start);

        let radius_sqr = sqr(radius);
        let mut result = PolysAroundResult {
            refs: vec![start_ref],
            parents: vec![PolyRef::NULL],
            ..Default::default()
        };
        let mut detail = StatusDetail::empty();

        while let Some(cur) = stack.pop_front() {
            let cur_ref = self.tiny_node_pool.node(cur).id;
            let Some((cur_tile, cur_poly)) = self.tile_and_poly(cur_ref) else {
                continue;
            };

            for link in cur_tile.poly_links(cur_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() {
                    continue;
                }
                let Some(nidx) = self.tiny_node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                if self.tiny_node_pool.node(nidx).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                let Some((neighbour_tile, neighbour_poly)) = self.tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if neighbour_poly.is_off_mesh_connection()
                    || !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly)
                {
                    continue;
                }
                let Some((va, vb)) = Self::portal_points(
                    cur_ref,
                    cur_tile,
                    cur_poly,
                    neighbour_ref,
                    neighbour_tile,
                    neighbour_poly,
                ) else {
                    continue;
                };
                if dist_pt_seg_sqr_2d(center, &va, &vb).0 > radius_sqr {
                    continue;
                }

                // Visited before the overlap test so a rejected polygon is
                // not tried again
                let node = self.tiny_node_pool.node_mut(nidx);
                node.flags.insert(NodeFlags::CLOSED);
                node.parent = Some(cur);

                let (pa, npa) = collect_verts(neighbour_tile, neighbour_poly);
                let overlaps = result.refs.iter().any(|&past_ref| {
                    // Connected polygons do not overlap
                    if cur_tile.poly_links(cur_poly).any(|l| l.reference == past_ref) {
                        return false;
                    }
                    let Some((past_tile, past_poly)) = self.tile_and_poly(past_ref) else {
                        return false;
                    };
                    let (pb, npb) = collect_verts(past_tile, past_poly);
                    overlap_poly_poly_2d(&pa, npa, &pb, npb)
                });
                if overlaps {
                    continue;
                }

                if result.refs.len() < max_result {
                    result.refs.push(neighbour_ref);
                    result.parents.push(cur_ref);
                } else {
                    detail |= StatusDetail::BUFFER_TOO_SMALL;
                }

                if stack.len() < MAX_LOCAL_STACK {
                    stack.push_back(nidx);
                }
            }
        }

        result.status = Status::success(detail);
        Ok(result)
    }

    /// Distance from `center` to the nearest wall within `max_radius`
    ///
    /// Walls are polygon edges without a neighbour that passes the filter.
    /// When no wall is found within the radius the reported distance is
    /// `max_radius` itself.
    pub fn find_distance_to_wall(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &QueryFilter,
    ) -> Result<WallDistance> {
        self.ensure_unrestricted()?;
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !visfinite(center)
            || !max_radius.is_finite()
            || max_radius < 0.0
        {
            return Err(Status::invalid_param());
        }

        self.node_pool.clear();
        self.open_list.clear();
        self.push_start_node(start_ref, center, 0.0)?;

        let mut radius_sqr = sqr(max_radius);
        let mut hit_pos: Option<[f32; 3]> = None;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            self.close_node(best);
            let (best_ref, best_pos, best_total, parent) = {
                let n = self.node_pool.node(best);
                (n.id, n.pos, n.total, n.parent)
            };
            let Some((best_tile, best_poly)) = self.tile_and_poly(best_ref) else {
                continue;
            };
            let parent_ref = parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);
            let base = self.nav_mesh.get_poly_ref_base(best_tile);
            let nv = best_poly.vert_count as usize;

            // Hit test walls
            let mut j = nv - 1;
            for i in 0..nv {
                let solid = if best_poly.neis[j] & EXT_LINK != 0 {
                    match best_tile.poly_links(best_poly).find(|l| l.edge as usize == j) {
                        Some(link) if link.reference.is_valid() => self
                            .tile_and_poly(link.reference)
                            .map_or(true, |(t, p)| !filter.pass_filter(link.reference, t, p)),
                        _ => true,
                    }
                } else if best_poly.neis[j] != 0 {
                    let idx = (best_poly.neis[j] - 1) as usize;
                    let r = PolyRef::new(base.id() | idx as u32);
                    !filter.pass_filter(r, best_tile, &best_tile.polys[idx])
                } else {
                    true
                };

                if solid {
                    let vj = best_tile.vert(best_poly.verts[j] as usize);
                    let vi = best_tile.vert(best_poly.verts[i] as usize);
                    let (dist_sqr, tseg) = dist_pt_seg_sqr_2d(center, &vj, &vi);
                    if dist_sqr <= radius_sqr {
                        radius_sqr = dist_sqr;
                        hit_pos = Some(vlerp(&vj, &vi, tseg));
                    }
                }
                j = i;
            }

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || neighbour_ref == parent_ref {
                    continue;
                }
                let Some((neighbour_tile, neighbour_poly)) = self.tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if neighbour_poly.is_off_mesh_connection() {
                    continue;
                }

                let e = link.edge as usize;
                let va = best_tile.vert(best_poly.verts[e] as usize);
                let vb = best_tile.vert(best_poly.verts[(e + 1) % nv] as usize);
                if dist_pt_seg_sqr_2d(center, &va, &vb).0 > radius_sqr {
                    continue;
                }
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }

                let Some(nidx) = self.node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                if self.node_pool.node(nidx).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if self.node_pool.node(nidx).flags.is_empty() {
                    if let Some((l, r)) = Self::portal_points(
                        best_ref,
                        best_tile,
                        best_poly,
                        neighbour_ref,
                        neighbour_tile,
                        neighbour_poly,
                    ) {
                        self.node_pool.node_mut(nidx).pos = midpoint(&l, &r);
                    }
                }

                let node = self.node_pool.node_mut(nidx);
                let total = best_total + vdist(&best_pos, &node.pos);
                if node.flags.contains(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.total = total;
                node.flags = NodeFlags::OPEN;
                self.open_list.push(&self.node_pool, nidx);
            }
        }

        let distance = radius_sqr.sqrt();
        Ok(match hit_pos {
            Some(hit_pos) => {
                let mut hit_normal = vsub(center, &hit_pos);
                vnormalize(&mut hit_normal);
                WallDistance {
                    distance,
                    hit_pos,
                    hit_normal,
                }
            }
            None => WallDistance {
                distance: max_radius,
                hit_pos: *center,
                hit_normal: [0.0; 3],
            },
        })
    }

    /// Boundary segments of a polygon
    ///
    /// Edges leading to a neighbour that passes the filter are portals; they
    /// are reported only when `store_portals` is set. Tile border edges
    /// that are only partly connected are split into portal and wall parts.
    pub fn get_poly_wall_segments(
        &self,
        reference: PolyRef,
        filter: &QueryFilter,
        store_portals: bool,
    ) -> Result<Vec<WallSegment>> {
        let (tile, poly) = self.tile_and_poly(reference).ok_or(Status::invalid_param())?;
        let base = self.nav_mesh.get_poly_ref_base(tile);
        let nv = poly.vert_count as usize;
        let mut segments = Vec::new();

        let mut j = nv - 1;
        for i in 0..nv {
            let vj = tile.vert(poly.verts[j] as usize);
            let vi = tile.vert(poly.verts[i] as usize);

            if poly.neis[j] & EXT_LINK == 0 {
                let mut nei_ref = PolyRef::NULL;
                if poly.neis[j] != 0 {
                    let idx = (poly.neis[j] - 1) as usize;
                    let r = PolyRef::new(base.id() | idx as u32);
                    if filter.pass_filter(r, tile, &tile.polys[idx]) {
                        nei_ref = r;
                    }
                }
                if !nei_ref.is_valid() || store_portals {
                    segments.push(WallSegment {
                        start: vj,
                        end: vi,
                        neighbour: nei_ref,
                    });
                }
                j = i;
                continue;
            }

            // Tile border
            let mut ints: Vec<(i32, i32, PolyRef)> = Vec::with_capacity(MAX_WALL_INTERVALS);
            for link in tile.poly_links(poly) {
                if link.edge as usize != j || !link.reference.is_valid() {
                    continue;
                }
                if let Some((nt, np)) = self.tile_and_poly(link.reference) {
                    if filter.pass_filter(link.reference, nt, np) {
                        insert_interval(&mut ints, link.bmin as i32, link.bmax as i32, link.reference);
                    }
                }
            }
            // Sentinels
            insert_interval(&mut ints, -1, 0, PolyRef::NULL);
            insert_interval(&mut ints, 255, 256, PolyRef::NULL);

            let s = 1.0 / 255.0;
            for k in 1..ints.len() {
                let (kmin, kmax, kref) = ints[k];
                if store_portals && kref.is_valid() {
                    segments.push(WallSegment {
                        start: vlerp(&vj, &vi, kmin as f32 * s),
                        end: vlerp(&vj, &vi, kmax as f32 * s),
                        neighbour: kref,
                    });
                }

                let imin = ints[k - 1].1;
                let imax = kmin;
                if imin != imax {
                    segments.push(WallSegment {
                        start: vlerp(&vj, &vi, imin as f32 * s),
                        end: vlerp(&vj, &vi, imax as f32 * s),
                        neighbour: PolyRef::NULL,
                    });
                }
            }
            j = i;
        }

        Ok(segments)
    }

    // Local movement

    /// Moves from `start_pos` towards `end_pos` constrained to the surface
    ///
    /// Returns the reached position and the visited polygons from the start
    /// polygon, at most [`MAX_MOVE_VISITED`]. The search only considers
    /// polygons within reach of the segment, so it is meant for short
    /// per-frame moves.
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<([f32; 3], Vec<PolyRef>)> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref) || !visfinite(start_pos) || !visfinite(end_pos) {
            return Err(Status::invalid_param());
        }

        self.tiny_node_pool.clear();
        let start = self
            .tiny_node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(StatusDetail::OUT_OF_NODES))?;
        self.tiny_node_pool.node_mut(start).flags = NodeFlags::CLOSED;

        let mut stack = VecDeque::with_capacity(MAX_LOCAL_STACK);
        stack.push_back(start);

        let mut best_pos = *start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node: Option<NodeIndex> = None;

        let search_pos = vlerp(start_pos, end_pos, 0.5);
        let search_rad_sqr = sqr(vdist(start_pos, end_pos) / 2.0 + 0.001);

        while let Some(cur) = stack.pop_front() {
            let cur_ref = self.tiny_node_pool.node(cur).id;
            let Some((cur_tile, cur_poly)) = self.tile_and_poly(cur_ref) else {
                continue;
            };

            let (verts, nverts) = collect_verts(cur_tile, cur_poly);
            if point_in_polygon(end_pos, &verts, nverts) {
                best_node = Some(cur);
                best_pos = *end_pos;
                break;
            }

            let base = self.nav_mesh.get_poly_ref_base(cur_tile);
            let mut j = nverts - 1;
            for i in 0..nverts {
                let mut neis: Vec<PolyRef> = Vec::with_capacity(8);
                if cur_poly.neis[j] & EXT_LINK != 0 {
                    for link in cur_tile.poly_links(cur_poly) {
                        if link.edge as usize != j || !link.reference.is_valid() {
                            continue;
                        }
                        if let Some((nt, np)) = self.tile_and_poly(link.reference) {
                            if filter.pass_filter(link.reference, nt, np) && neis.len() < 8 {
                                neis.push(link.reference);
                            }
                        }
                    }
                } else if cur_poly.neis[j] != 0 {
                    let idx = (cur_poly.neis[j] - 1) as usize;
                    let r = PolyRef::new(base.id() | idx as u32);
                    if filter.pass_filter(r, cur_tile, &cur_tile.polys[idx]) {
                        neis.push(r);
                    }
                }

                let vj = vert_at(&verts, j);
                let vi = vert_at(&verts, i);
                if neis.is_empty() {
                    // Wall edge, track the nearest point on it
                    let (dist_sqr, tseg) = dist_pt_seg_sqr_2d(end_pos, &vj, &vi);
                    if dist_sqr < best_dist {
                        best_pos = vlerp(&vj, &vi, tseg);
                        best_dist = dist_sqr;
                        best_node = Some(cur);
                    }
                } else {
                    for &r in &neis {
                        let Some(nidx) = self.tiny_node_pool.get_node(r, 0) else {
                            continue;
                        };
                        if self.tiny_node_pool.node(nidx).flags.contains(NodeFlags::CLOSED) {
                            continue;
                        }
                        if dist_pt_seg_sqr_2d(&search_pos, &vj, &vi).0 > search_rad_sqr {
                            continue;
                        }
                        if stack.len() < MAX_LOCAL_STACK {
                            let node = self.tiny_node_pool.node_mut(nidx);
                            node.parent = Some(cur);
                            node.flags.insert(NodeFlags::CLOSED);
                            stack.push_back(nidx);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = best_node.map_or_else(Vec::new, |n| self.tiny_node_pool.path_to(n));
        visited.truncate(MAX_MOVE_VISITED);
        Ok((best_pos, visited))
    }

    /// Casts a ray along the surface from `start_pos` towards `end_pos`
    ///
    /// The ray follows polygon adjacency on the xz-plane. `prev_ref` is the
    /// polygon the caller came from, used for cost computation only.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        options: RaycastOptions,
        prev_ref: PolyRef,
    ) -> Result<RaycastHit> {
        let Some((mut tile, mut poly)) = self.tile_and_poly(start_ref) else {
            return Err(Status::invalid_param());
        };
        if !visfinite(start_pos)
            || !visfinite(end_pos)
            || (prev_ref.is_valid() && !self.nav_mesh.is_valid_poly_ref(prev_ref))
        {
            return Err(Status::invalid_param());
        }

        let mut hit = RaycastHit {
            t: 0.0,
            ..RaycastHit::no_hit()
        };
        let dir = vsub(end_pos, start_pos);
        let mut cur_pos = *start_pos;
        let mut cur_ref = start_ref;

        loop {
            let (verts, nv) = collect_verts(tile, poly);
            let Some(clip) = intersect_segment_poly_2d(start_pos, end_pos, &verts, nv) else {
                // Could not hit the polygon, keep the old t and report a hit
                return Ok(hit);
            };

            hit.hit_edge_index = clip.seg_max;
            if clip.tmax > hit.t {
                hit.t = clip.tmax;
            }
            hit.path.push(cur_ref);

            // Ray end is inside the polygon
            let Some(seg_max) = clip.seg_max else {
                hit.t = f32::MAX;
                if options.use_costs {
                    hit.path_cost += filter.get_cost(&cur_pos, end_pos, poly);
                }
                return Ok(hit);
            };

            let mut next: Option<(PolyRef, &'a MeshTile, &'a Poly)> = None;
            for link in tile.poly_links(poly) {
                if link.edge as usize != seg_max {
                    continue;
                }
                let Some((next_tile, next_poly)) = self.tile_and_poly(link.reference) else {
                    continue;
                };
                if next_poly.is_off_mesh_connection()
                    || !filter.pass_filter(link.reference, next_tile, next_poly)
                {
                    continue;
                }

                // Internal links and full-edge portals are always crossed
                if link.side == LINK_INTERNAL_SIDE || (link.bmin == 0 && link.bmax == 255) {
                    next = Some((link.reference, next_tile, next_poly));
                    break;
                }

                // Partial portal, check the crossing lies inside it
                let left = tile.vert(poly.verts[link.edge as usize] as usize);
                let right = tile.vert(poly.verts[(link.edge as usize + 1) % nv] as usize);
                let axis = match link.side {
                    0 | 4 => 2,
                    2 | 6 => 0,
                    _ => continue,
                };
                let s = 1.0 / 255.0;
                let mut lmin = left[axis] + (right[axis] - left[axis]) * (link.bmin as f32 * s);
                let mut lmax = left[axis] + (right[axis] - left[axis]) * (link.bmax as f32 * s);
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                let c = start_pos[axis] + (end_pos[axis] - start_pos[axis]) * clip.tmax;
                if c >= lmin && c <= lmax {
                    next = Some((link.reference, next_tile, next_poly));
                    break;
                }
            }

            if options.use_costs {
                // Project the exit point back onto the edge to get its height
                let last_pos = cur_pos;
                cur_pos = [
                    start_pos[0] + dir[0] * hit.t,
                    start_pos[1] + dir[1] * hit.t,
                    start_pos[2] + dir[2] * hit.t,
                ];
                let e1 = vert_at(&verts, seg_max);
                let e2 = vert_at(&verts, (seg_max + 1) % nv);
                let e_dir = vsub(&e2, &e1);
                let diff = vsub(&cur_pos, &e1);
                let s = if sqr(e_dir[0]) > sqr(e_dir[2]) {
                    diff[0] / e_dir[0]
                } else {
                    diff[2] / e_dir[2]
                };
                cur_pos[1] = e1[1] + e_dir[1] * s;
                hit.path_cost += filter.get_cost(&last_pos, &cur_pos, poly);
            }

            let Some((next_ref, next_tile, next_poly)) = next else {
                // Wall hit
                let va = vert_at(&verts, seg_max);
                let vb = vert_at(&verts, (seg_max + 1) % nv);
                let mut normal = [vb[2] - va[2], 0.0, -(vb[0] - va[0])];
                vnormalize(&mut normal);
                hit.hit_normal = normal;
                return Ok(hit);
            };

            cur_ref = next_ref;
            tile = next_tile;
            poly = next_poly;
        }
    }

    /// String-pulls a polygon corridor into corner points
    ///
    /// The start and end positions are clamped to the first and last
    /// polygon. A single-polygon corridor yields the start and end points.
    /// At most `max_straight_path` points are returned.
    pub fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_straight_path: usize,
        options: StraightPathOptions,
    ) -> Result<StraightPath> {
        if !visfinite(start_pos)
            || !visfinite(end_pos)
            || path.is_empty()
            || !path[0].is_valid()
            || max_straight_path == 0
        {
            return Err(Status::invalid_param());
        }

        let closest_start = self.closest_point_on_poly_boundary(path[0], start_pos)?;
        let mut closest_end = self.closest_point_on_poly_boundary(path[path.len() - 1], end_pos)?;

        let mut out = StraightPathBuilder {
            points: Vec::with_capacity(max_straight_path.min(64)),
            max: max_straight_path,
        };
        if let Some(status) = out.append_vertex(&closest_start, StraightPathFlags::START, path[0]) {
            return Ok(out.finish(status));
        }

        let crossings = options.intersects(StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS);

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_off_mesh = false;
            let mut right_off_mesh = false;
            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_off_mesh) = if i + 1 < path.len() {
                    let portal = self.tile_and_poly(path[i]).zip(self.tile_and_poly(path[i + 1]));
                    let points = portal.and_then(|((ft, fp), (tt, tp))| {
                        Self::portal_points(path[i], ft, fp, path[i + 1], tt, tp)
                            .map(|(l, r)| (l, r, tp.is_off_mesh_connection()))
                    });
                    let Some(points) = points else {
                        // The next polygon is invalid, end the path at the
                        // current one
                        closest_end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                        if crossings {
                            self.append_portals(&mut out, apex_index, i, &closest_end, path, options);
                        }
                        out.append_vertex(&closest_end, StraightPathFlags::empty(), path[i]);
                        let detail = StatusDetail::PARTIAL_RESULT | out.buffer_status();
                        return Ok(out.finish(Status::success(detail)));
                    };

                    // Starting really close to the first portal, skip it
                    if i == 0 && dist_pt_seg_sqr_2d(&portal_apex, &points.0, &points.1).0 < sqr(0.001) {
                        i += 1;
                        continue;
                    }
                    points
                } else {
                    (closest_end, closest_end, false)
                };

                // Right vertex
                if tri_area_2d(&portal_apex, &portal_right, &right) <= 0.0 {
                    if vequal(&portal_apex, &portal_right)
                        || tri_area_2d(&portal_apex, &portal_left, &right) > 0.0
                    {
                        portal_right = right;
                        right_poly_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);
                        right_off_mesh = to_off_mesh;
                        right_index = i;
                    } else {
                        // Left side becomes the new apex
                        if crossings {
                            if let Some(status) =
                                self.append_portals(&mut out, apex_index, left_index, &portal_left, path, options)
                            {
                                return Ok(out.finish(status));
                            }
                        }
                        portal_apex = portal_left;
                        apex_index = left_index;

                        let flags = if !left_poly_ref.is_valid() {
                            StraightPathFlags::END
                        } else if left_off_mesh {
                            StraightPathFlags::OFFMESH_CONNECTION
                        } else {
                            StraightPathFlags::empty()
                        };
                        if let Some(status) = out.append_vertex(&portal_apex, flags, left_poly_ref) {
                            return Ok(out.finish(status));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left vertex
                if tri_area_2d(&portal_apex, &portal_left, &left) >= 0.0 {
                    if vequal(&portal_apex, &portal_left)
                        || tri_area_2d(&portal_apex, &portal_right, &left) < 0.0
                    {
                        portal_left = left;
                        left_poly_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);
                        left_off_mesh = to_off_mesh;
                        left_index = i;
                    } else {
                        // Right side becomes the new apex
                        if crossings {
                            if let Some(status) =
                                self.append_portals(&mut out, apex_index, right_index, &portal_right, path, options)
                            {
                                return Ok(out.finish(status));
                            }
                        }
                        portal_apex = portal_right;
                        apex_index = right_index;

                        let flags = if !right_poly_ref.is_valid() {
                            StraightPathFlags::END
                        } else if right_off_mesh {
                            StraightPathFlags::OFFMESH_CONNECTION
                        } else {
                            StraightPathFlags::empty()
                        };
                        if let Some(status) = out.append_vertex(&portal_apex, flags, right_poly_ref) {
                            return Ok(out.finish(status));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            if crossings {
                if let Some(status) =
                    self.append_portals(&mut out, apex_index, path.len() - 1, &closest_end, path, options)
                {
                    return Ok(out.finish(status));
                }
            }
        }

        out.append_vertex(&closest_end, StraightPathFlags::END, PolyRef::NULL);
        let detail = out.buffer_status();
        Ok(out.finish(Status::success(detail)))
    }

    /// Adds the portal crossings between the last straight path vertex and
    /// `end_pos` for the corridor section `start_idx..end_idx`
    fn append_portals(
        &self,
        out: &mut StraightPathBuilder,
        start_idx: usize,
        end_idx: usize,
        end_pos: &[f32; 3],
        path: &[PolyRef],
        options: StraightPathOptions,
    ) -> Option<Status> {
        let start_pos = out.points.last()?.pos;
        for i in start_idx..end_idx {
            let (from_tile, from_poly) = self.tile_and_poly(path[i])?;
            let (to_tile, to_poly) = self.tile_and_poly(path[i + 1])?;
            let (left, right) =
                Self::portal_points(path[i], from_tile, from_poly, path[i + 1], to_tile, to_poly)?;

            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from_poly.area == to_poly.area {
                continue;
            }

            if let Some((_, t)) = intersect_seg_seg_2d(&start_pos, end_pos, &left, &right) {
                let pt = vlerp(&left, &right, t);
                if let Some(status) = out.append_vertex(&pt, StraightPathFlags::empty(), path[i + 1]) {
                    return Some(status);
                }
            }
        }
        None
    }

    // Random sampling

    /// Random point on the mesh
    ///
    /// A tile is picked uniformly, then a polygon weighted by area, then a
    /// point inside it.
    pub fn find_random_point<R: Rng + ?Sized>(
        &self,
        filter: &QueryFilter,
        rng: &mut R,
    ) -> Result<(PolyRef, [f32; 3])> {
        let mut tile: Option<&'a MeshTile> = None;
        let mesh: &'a NavMesh = self.nav_mesh;
        let mut tsum = 0.0;
        for t in mesh.tiles() {
            // Tiles are assumed to cover roughly the same area
            let area = 1.0;
            tsum += area;
            if rng.gen::<f32>() * tsum <= area {
                tile = Some(t);
            }
        }
        let tile = tile.ok_or(Status::FAILURE)?;

        let base = mesh.get_poly_ref_base(tile);
        let mut picked: Option<(PolyRef, &Poly)> = None;
        let mut area_sum = 0.0;
        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.is_off_mesh_connection() {
                continue;
            }
            let r = PolyRef::new(base.id() | i as u32);
            if !filter.pass_filter(r, tile, poly) {
                continue;
            }
            let (verts, nv) = collect_verts(tile, poly);
            let area = poly_area(&verts, nv);
            area_sum += area;
            if rng.gen::<f32>() * area_sum <= area {
                picked = Some((r, poly));
            }
        }
        let (r, poly) = picked.ok_or(Status::FAILURE)?;

        let (verts, nv) = collect_verts(tile, poly);
        let s = rng.gen::<f32>();
        let t = rng.gen::<f32>();
        let mut pt = random_point_in_convex_poly(&verts, nv, s, t);
        pt[1] = self.get_poly_height(r, &pt)?;
        Ok((r, pt))
    }

    /// Random point on polygons reachable from `start_ref` within
    /// `max_radius`
    ///
    /// The polygon is picked by area among the flooded polygons; the point
    /// may lie outside the circle when a polygon only partly overlaps it.
    pub fn find_random_point_around_circle<R: Rng + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &QueryFilter,
        rng: &mut R,
    ) -> Result<(PolyRef, [f32; 3])> {
        self.ensure_unrestricted()?;
        let Some((start_tile, start_poly)) = self.tile_and_poly(start_ref) else {
            return Err(Status::invalid_param());
        };
        if !visfinite(center)
            || !max_radius.is_finite()
            || max_radius < 0.0
            || !filter.pass_filter(start_ref, start_tile, start_poly)
        {
            return Err(Status::invalid_param());
        }

        self.node_pool.clear();
        self.open_list.clear();
        self.push_start_node(start_ref, center, 0.0)?;

        let radius_sqr = sqr(max_radius);
        let mut area_sum = 0.0;
        let mut picked: Option<(PolyRef, &'a MeshTile, &'a Poly)> = None;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            self.close_node(best);
            let (best_ref, best_pos, best_total, parent) = {
                let n = self.node_pool.node(best);
                (n.id, n.pos, n.total, n.parent)
            };
            let Some((best_tile, best_poly)) = self.tile_and_poly(best_ref) else {
                continue;
            };

            if !best_poly.is_off_mesh_connection() {
                // Reservoir sampling weighted by area
                let (verts, nv) = collect_verts(best_tile, best_poly);
                let area = poly_area(&verts, nv);
                area_sum += area;
                if rng.gen::<f32>() * area_sum <= area {
                    picked = Some((best_ref, best_tile, best_poly));
                }
            }

            let parent_ref = parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);
            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || neighbour_ref == parent_ref {
                    continue;
                }
                let Some((neighbour_tile, neighbour_poly)) = self.tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }
                let Some((va, vb)) = Self::portal_points(
                    best_ref,
                    best_tile,
                    best_poly,
                    neighbour_ref,
                    neighbour_tile,
                    neighbour_poly,
                ) else {
                    continue;
                };
                if dist_pt_seg_sqr_2d(center, &va, &vb).0 > radius_sqr {
                    continue;
                }

                let Some(nidx) = self.node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                let node = self.node_pool.node_mut(nidx);
                if node.flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if node.flags.is_empty() {
                    node.pos = midpoint(&va, &vb);
                }
                let total = best_total + vdist(&best_pos, &node.pos);
                if node.flags.contains(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.total = total;
                node.flags = NodeFlags::OPEN;
                self.open_list.push(&self.node_pool, nidx);
            }
        }

        let (r, tile, poly) = picked.ok_or(Status::FAILURE)?;
        let (verts, nv) = collect_verts(tile, poly);
        let s = rng.gen::<f32>();
        let t = rng.gen::<f32>();
        let mut pt = random_point_in_convex_poly(&verts, nv, s, t);
        pt[1] = self.get_poly_height(r, &pt)?;
        Ok((r, pt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::create_test_nav_mesh;

    fn poly_ref(mesh: &NavMesh, i: u32) -> PolyRef {
        PolyRef::new(mesh.get_tile_ref_at(0, 0, 0).id() | i)
    }

    #[test]
    fn test_portal_points_and_mid_point() {
        let mesh = create_test_nav_mesh().unwrap();
        let query = NavMeshQuery::new(&mesh, 64);
        // Cell (0, 0) and cell (1, 0) share the edge x = 1
        let (left, right) = query.get_portal_points(poly_ref(&mesh, 0), poly_ref(&mesh, 1)).unwrap();
        assert_eq!(left, [1.0, 0.0, 1.0]);
        assert_eq!(right, [1.0, 0.0, 0.0]);
        let mid = query.get_edge_mid_point(poly_ref(&mesh, 0), poly_ref(&mesh, 1)).unwrap();
        assert_eq!(mid, [1.0, 0.0, 0.5]);

        // Not adjacent
        assert!(query.get_portal_points(poly_ref(&mesh, 0), poly_ref(&mesh, 8)).is_err());
    }

    #[test]
    fn test_closest_point_on_poly_boundary() {
        let mesh = create_test_nav_mesh().unwrap();
        let query = NavMeshQuery::new(&mesh, 64);
        let r = poly_ref(&mesh, 0);
        assert_eq!(
            query.closest_point_on_poly_boundary(r, &[0.5, 0.0, 0.5]).unwrap(),
            [0.5, 0.0, 0.5]
        );
        let p = query.closest_point_on_poly_boundary(r, &[2.0, 0.0, 0.5]).unwrap();
        assert!((p[0] - 1.0).abs() < 1e-5);
        assert!((p[2] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_straight_path_builder_merges_equal_points() {
        let mut out = StraightPathBuilder {
            points: Vec::new(),
            max: 4,
        };
        assert!(out.append_vertex(&[0.0; 3], StraightPathFlags::START, PolyRef::new(1)).is_none());
        assert!(out.append_vertex(&[0.0; 3], StraightPathFlags::empty(), PolyRef::new(2)).is_none());
        assert_eq!(out.points.len(), 1);
        assert_eq!(out.points[0].reference, PolyRef::new(2));
        let status = out.append_vertex(&[1.0, 0.0, 0.0], StraightPathFlags::END, PolyRef::NULL);
        assert_eq!(status, Some(Status::SUCCESS));
    }

    #[test]
    fn test_insert_interval_keeps_order() {
        let mut ints = Vec::new();
        insert_interval(&mut ints, 100, 200, PolyRef::new(1));
        insert_interval(&mut ints, -1, 0, PolyRef::NULL);
        insert_interval(&mut ints, 255, 256, PolyRef::NULL);
        insert_interval(&mut ints, 10, 50, PolyRef::new(2));
        let starts: Vec<i32> = ints.iter().map(|i| i.0).collect();
        assert_eq!(starts, vec![-1, 10, 100, 255]);
    }

    #[test]
    fn test_restricted_while_sliced() {
        let mesh = create_test_nav_mesh().unwrap();
        let mut query = NavMeshQuery::new(&mesh, 64);
        let filter = QueryFilter::default();
        let a = poly_ref(&mesh, 0);
        let b = poly_ref(&mesh, 8);
        let pa = [0.5, 0.0, 0.5];
        let pb = [2.5, 0.0, 2.5];

        query.init_sliced_find_path(a, b, &pa, &pb, &filter).unwrap();
        assert!(query.is_sliced_find_path_in_flight());

        let err = query.find_path(a, b, &pa, &pb, &filter, 16).unwrap_err();
        assert!(err.has_detail(StatusDetail::INVALID_PARAM));
        assert!(query.find_polys_around_circle(a, &pa, 1.0, &filter, 16).is_err());
        assert!(query.find_distance_to_wall(a, &pa, 1.0, &filter).is_err());
        assert!(query.init_sliced_find_path(a, b, &pa, &pb, &filter).is_err());

        // Local queries still work
        assert!(query.move_along_surface(a, &pa, &[1.5, 0.0, 0.5], &filter).is_ok());

        query.cancel_sliced_find_path();
        assert!(query.find_path(a, b, &pa, &pb, &filter, 16).is_ok());
    }
}
