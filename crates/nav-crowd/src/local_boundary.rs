use nav_common::dist_pt_seg_sqr_2d;
use nav_detour::{NavMeshQuery, PolyRef, QueryFilter, Result};

/// Maximum number of wall segments kept around an agent
pub const MAX_LOCAL_SEGS: usize = 8;

/// Maximum number of polygons searched for walls
pub const MAX_LOCAL_POLYS: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
struct Segment {
    s: [f32; 6], // Segment start/end (start_x, start_y, start_z, end_x, end_y, end_z)
    d: f32,      // Squared distance for pruning
}

/// Nearest walls around an agent, cached until the agent moves away from
/// the point they were collected at
#[derive(Debug, Clone)]
pub struct LocalBoundary {
    center: [f32; 3],
    segs: Vec<Segment>,
    polys: Vec<PolyRef>,
}

impl Default for LocalBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBoundary {
    pub fn new() -> Self {
        Self {
            center: [f32::MAX; 3],
            segs: Vec::with_capacity(MAX_LOCAL_SEGS),
            polys: Vec::with_capacity(MAX_LOCAL_POLYS),
        }
    }

    /// Forgets the cached walls so the next validity check fails
    pub fn reset(&mut self) {
        self.center = [f32::MAX; 3];
        self.segs.clear();
        self.polys.clear();
    }

    /// Collects the wall segments within `collision_query_range` of `pos`
    pub fn update(
        &mut self,
        poly_ref: PolyRef,
        pos: &[f32; 3],
        collision_query_range: f32,
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<()> {
        if !poly_ref.is_valid() {
            self.reset();
            return Ok(());
        }

        self.center = *pos;
        self.segs.clear();

        // First, find all nearby polygons
        let local = navquery.find_local_neighbourhood(poly_ref, pos, collision_query_range, filter, MAX_LOCAL_POLYS)?;
        self.polys = local.refs;

        let range_sqr = collision_query_range * collision_query_range;
        for &r in &self.polys {
            for seg in navquery.get_poly_wall_segments(r, filter, false)? {
                let (dist_sqr, _) = dist_pt_seg_sqr_2d(pos, &seg.start, &seg.end);
                if dist_sqr > range_sqr {
                    continue;
                }
                let s = [
                    seg.start[0], seg.start[1], seg.start[2], seg.end[0], seg.end[1], seg.end[2],
                ];
                add_segment(&mut self.segs, dist_sqr, s);
            }
        }

        Ok(())
    }

    /// Returns false if any cached polygon became stale or is now rejected
    /// by the filter
    pub fn is_valid(&self, navquery: &NavMeshQuery, filter: &QueryFilter) -> bool {
        !self.polys.is_empty() && self.polys.iter().all(|&r| navquery.is_valid_poly_ref(r, filter))
    }

    pub fn get_center(&self) -> &[f32; 3] {
        &self.center
    }

    pub fn get_segment_count(&self) -> usize {
        self.segs.len()
    }

    pub fn get_segment(&self, i: usize) -> Option<&[f32; 6]> {
        self.segs.get(i).map(|seg| &seg.s)
    }

    pub fn get_polys(&self) -> &[PolyRef] {
        &self.polys
    }
}

/// Inserts a segment keeping the list sorted by distance, closest first
fn add_segment(segs: &mut Vec<Segment>, dist: f32, s: [f32; 6]) {
    let insert_idx = segs.iter().position(|seg| dist <= seg.d).unwrap_or(segs.len());
    if insert_idx >= MAX_LOCAL_SEGS {
        return;
    }
    segs.insert(insert_idx, Segment { s, d: dist });
    segs.truncate(MAX_LOCAL_SEGS);
}
