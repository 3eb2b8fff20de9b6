//! Path corridor implementation
//!
//! A corridor is the list of polygons an agent travels through, from the
//! polygon under its position to the polygon under its target. Movement
//! is constrained to the navigation mesh and the corridor is patched
//! locally as the agent and the target move, so a full replan is only
//! needed when the corridor becomes invalid.

use nav_common::{vdist_2d, vdist_2d_sqr, vmad, vsub};
use nav_detour::{
    NavMeshQuery, PolyRef, QueryFilter, RaycastOptions, Result, Status, StraightPathFlags,
    StraightPathOptions, StraightPathPoint,
};

/// Default number of polygons a corridor can hold
pub const DEFAULT_MAX_PATH: usize = 256;

/// Corners closer than this to the position are dropped
const MIN_TARGET_DIST: f32 = 0.01;

/// Node expansions spent on a topology optimization
const MAX_TOPOLOGY_ITER: usize = 32;

/// Longest path a topology optimization produces
const MAX_TOPOLOGY_RES: usize = 32;

/// Copy of the corridor state for diagnostics
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CorridorSnapshot {
    pub pos: [f32; 3],
    pub target: [f32; 3],
    pub path: Vec<PolyRef>,
}

/// Off-mesh connection the corridor moved over
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffMeshTraversal {
    /// Polygon before the connection and the connection polygon
    pub refs: [PolyRef; 2],
    /// Connection end point on the near side
    pub start_pos: [f32; 3],
    /// Connection end point on the far side, the new corridor position
    pub end_pos: [f32; 3],
}

/// Result of a corridor operation that also refreshes the corners
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorridorCorners {
    /// True if the operation itself succeeded
    pub changed: bool,
    /// Corners of the corridor after the operation, as from
    /// [`PathCorridor::find_corners`]
    pub corners: Vec<StraightPathPoint>,
}

/// Path corridor for smooth path following
#[derive(Debug, Clone)]
pub struct PathCorridor {
    /// Current position in the corridor
    pos: [f32; 3],
    /// Target position in the corridor
    target: [f32; 3],
    /// Path polygon references, position polygon first
    path: Vec<PolyRef>,
    max_path: usize,
}

impl Default for PathCorridor {
    fn default() -> Self {
        Self::new()
    }
}

impl PathCorridor {
    /// Creates a corridor holding up to [`DEFAULT_MAX_PATH`] polygons
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PATH)
    }

    /// Creates a corridor holding up to `max_path` polygons
    pub fn with_capacity(max_path: usize) -> Self {
        let max_path = max_path.max(1);
        Self {
            pos: [0.0; 3],
            target: [0.0; 3],
            path: Vec::with_capacity(max_path),
            max_path,
        }
    }

    /// Resets the corridor to a single polygon with position and target at
    /// `pos`
    pub fn reset(&mut self, reference: PolyRef, pos: [f32; 3]) {
        self.pos = pos;
        self.target = pos;
        self.path.clear();
        self.path.push(reference);
    }

    /// Finds the corners of the corridor from the position toward the
    /// target, at most `max_corners - 1` of them
    ///
    /// Corners too close to the position are dropped and the list ends at
    /// the first off-mesh connection, so the last corner is either the
    /// target or the start of a connection.
    pub fn find_corners(&self, max_corners: usize, navquery: &NavMeshQuery) -> Result<Vec<StraightPathPoint>> {
        if self.path.is_empty() || max_corners == 0 {
            return Err(Status::invalid_param());
        }

        let straight = navquery.find_straight_path(
            &self.pos,
            &self.target,
            &self.path,
            max_corners,
            StraightPathOptions::empty(),
        )?;
        let mut corners = straight.points;

        // Prune points in the beginning of the path which are too close
        let skip = corners
            .iter()
            .take_while(|c| {
                !c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION)
                    && vdist_2d_sqr(&c.pos, &self.pos) <= MIN_TARGET_DIST * MIN_TARGET_DIST
            })
            .count();
        corners.drain(..skip);

        // Nothing past an off-mesh connection is usable yet
        if let Some(i) = corners
            .iter()
            .position(|c| c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION))
        {
            corners.truncate(i + 1);
        }

        // One slot stays reserved for the start point
        corners.truncate(max_corners - 1);
        Ok(corners)
    }

    /// Shortcuts the corridor if `next` is visible from the position
    ///
    /// The ray is clamped to `path_optimization_range`. Inexpensive enough
    /// to call every update.
    pub fn optimize_path_visibility(
        &mut self,
        next: &[f32; 3],
        path_optimization_range: f32,
        navquery: &NavMeshQuery,
        filter: &QueryFilter,
    ) {
        let Some(&first) = self.path.first() else {
            return;
        };

        // Clamp the ray to max distance
        let dist = vdist_2d(&self.pos, next);
        if dist < 0.01 {
            return;
        }
        let dist = (dist + 0.01).min(path_optimization_range);
        let delta = vsub(next, &self.pos);
        let goal = vmad(&self.pos, &delta, path_optimization_range / dist);

        let Ok(hit) = navquery.raycast(first, &self.pos, &goal, filter, RaycastOptions::default(), PolyRef::NULL)
        else {
            return;
        };
        if hit.path.len() > 1 && hit.t > 0.99 {
            merge_corridor_start_shortcut(&mut self.path, self.max_path, &hit.path);
        }
    }

    /// Runs [`Self::optimize_path_visibility`] and returns the new corners
    pub fn optimize_path_visibility_ext(
        &mut self,
        next: &[f32; 3],
        path_optimization_range: f32,
        max_corners: usize,
        navquery: &NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<Vec<StraightPathPoint>> {
        self.optimize_path_visibility(next, path_optimization_range, navquery, filter);
        self.find_corners(max_corners, navquery)
    }

    /// Replans the corridor toward the target with a small sliced search
    /// and keeps the result if it rejoins the current corridor
    ///
    /// Returns true if the corridor was changed. Fails without touching the
    /// corridor when the query already has a sliced search in flight.
    pub fn optimize_path_topology(&mut self, navquery: &mut NavMeshQuery, filter: &QueryFilter) -> Result<bool> {
        if self.path.len() < 3 {
            return Ok(false);
        }

        let (first, last) = (self.path[0], self.path[self.path.len() - 1]);
        navquery.init_sliced_find_path(first, last, &self.pos, &self.target, filter)?;
        if let Err(status) = navquery.update_sliced_find_path(MAX_TOPOLOGY_ITER) {
            navquery.cancel_sliced_find_path();
            return Err(status);
        }
        let result = navquery.finalize_sliced_find_path_partial(&self.path, MAX_TOPOLOGY_RES)?;

        if result.polys.is_empty() {
            return Ok(false);
        }
        merge_corridor_start_shortcut(&mut self.path, self.max_path, &result.polys);
        Ok(true)
    }

    /// Runs [`Self::optimize_path_topology`] and returns the new corners
    pub fn optimize_path_topology_ext(
        &mut self,
        max_corners: usize,
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<CorridorCorners> {
        let changed = self.optimize_path_topology(navquery, filter)?;
        let corners = self.find_corners(max_corners, navquery)?;
        Ok(CorridorCorners { changed, corners })
    }

    /// Advances the corridor over the off-mesh connection `off_mesh_con_ref`
    ///
    /// The polygons up to and including the connection are removed and the
    /// position moves to the far end point of the connection.
    pub fn move_over_off_mesh_connection(
        &mut self,
        off_mesh_con_ref: PolyRef,
        navquery: &NavMeshQuery,
    ) -> Result<OffMeshTraversal> {
        // The connection must have a landing polygon after it
        let Some(con_idx) = self.path.iter().position(|&r| r == off_mesh_con_ref) else {
            return Err(Status::invalid_param());
        };
        if con_idx + 1 >= self.path.len() {
            return Err(Status::invalid_param());
        }
        let prev_ref = if con_idx > 0 { self.path[con_idx - 1] } else { PolyRef::NULL };

        let (start_pos, end_pos) = navquery
            .nav_mesh()
            .get_off_mesh_connection_poly_end_points(prev_ref, off_mesh_con_ref)?;

        // Prune path
        self.path.drain(..=con_idx);
        self.pos = end_pos;

        Ok(OffMeshTraversal {
            refs: [prev_ref, off_mesh_con_ref],
            start_pos,
            end_pos,
        })
    }

    /// Moves the position along the surface toward `npos`
    ///
    /// The corridor start is patched with the polygons visited on the way.
    /// Movement is blocked by walls, so the new position is the nearest
    /// reachable point. Returns false if the move could not be done.
    pub fn move_position(&mut self, npos: &[f32; 3], navquery: &mut NavMeshQuery, filter: &QueryFilter) -> bool {
        let Some(&first) = self.path.first() else {
            return false;
        };

        let Ok((mut result, visited)) = navquery.move_along_surface(first, &self.pos, npos, filter) else {
            return false;
        };
        merge_corridor_start_moved(&mut self.path, self.max_path, &visited);

        // Adjust the position to stay on top of the navmesh
        if let Some(h) = self.path.first().and_then(|&r| navquery.get_poly_height(r, &result).ok()) {
            result[1] = h;
        }
        self.pos = result;
        true
    }

    /// Moves the target along the surface toward `npos`
    ///
    /// The corridor end is patched with the polygons visited on the way.
    /// Only suitable for small moves; large moves need a replan.
    pub fn move_target_position(
        &mut self,
        npos: &[f32; 3],
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> bool {
        let Some(&last) = self.path.last() else {
            return false;
        };

        let Ok((result, visited)) = navquery.move_along_surface(last, &self.target, npos, filter) else {
            return false;
        };
        merge_corridor_end_moved(&mut self.path, self.max_path, &visited);
        self.target = result;
        true
    }

    /// Moves the target and then the position
    pub fn move_both(
        &mut self,
        npos: &[f32; 3],
        ntarget: &[f32; 3],
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> bool {
        let target_moved = self.move_target_position(ntarget, navquery, filter);
        let pos_moved = self.move_position(npos, navquery, filter);
        target_moved && pos_moved
    }

    /// Runs [`Self::move_position`] and returns the new corners
    pub fn move_position_ext(
        &mut self,
        npos: &[f32; 3],
        max_corners: usize,
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<CorridorCorners> {
        let changed = self.move_position(npos, navquery, filter);
        let corners = self.find_corners(max_corners, navquery)?;
        Ok(CorridorCorners { changed, corners })
    }

    /// Runs [`Self::move_target_position`] and returns the new corners
    pub fn move_target_position_ext(
        &mut self,
        npos: &[f32; 3],
        max_corners: usize,
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<CorridorCorners> {
        let changed = self.move_target_position(npos, navquery, filter);
        let corners = self.find_corners(max_corners, navquery)?;
        Ok(CorridorCorners { changed, corners })
    }

    /// Runs [`Self::move_both`] and returns the new corners
    pub fn move_both_ext(
        &mut self,
        npos: &[f32; 3],
        ntarget: &[f32; 3],
        max_corners: usize,
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<CorridorCorners> {
        let changed = self.move_both(npos, ntarget, navquery, filter);
        let corners = self.find_corners(max_corners, navquery)?;
        Ok(CorridorCorners { changed, corners })
    }

    /// Loads a new path and target into the corridor
    ///
    /// `path` must start at the polygon containing the current position,
    /// so the corridor has to be reset first. Paths longer than the
    /// corridor capacity are truncated.
    pub fn set_corridor(&mut self, target: &[f32; 3], path: &[PolyRef]) -> Result<()> {
        let Some(&first) = path.first() else {
            return Err(Status::invalid_param());
        };
        if !first.is_valid() || self.path.first() != Some(&first) {
            return Err(Status::invalid_param());
        }

        self.target = *target;
        self.path.clear();
        self.path.extend_from_slice(&path[..path.len().min(self.max_path)]);
        Ok(())
    }

    /// Runs [`Self::set_corridor`] and returns the new corners
    pub fn set_corridor_ext(
        &mut self,
        target: &[f32; 3],
        path: &[PolyRef],
        max_corners: usize,
        navquery: &NavMeshQuery,
    ) -> Result<Vec<StraightPathPoint>> {
        self.set_corridor(target, path)?;
        self.find_corners(max_corners, navquery)
    }

    /// Replaces the first polygon after the agent was repositioned to
    /// `safe_pos` inside `safe_ref`
    ///
    /// The rest of the corridor is kept so a replan can reuse it.
    pub fn fix_path_start(&mut self, safe_ref: PolyRef, safe_pos: &[f32; 3]) {
        self.pos = *safe_pos;
        match self.path.first_mut() {
            Some(first) => *first = safe_ref,
            None => self.path.push(safe_ref),
        }
    }

    /// Cuts the corridor at the first polygon that is stale or rejected by
    /// the filter
    ///
    /// When the first polygon itself is unusable the corridor collapses to
    /// `safe_ref` at `safe_pos`. The target is clamped into the new last
    /// polygon.
    pub fn trim_invalid_path(
        &mut self,
        safe_ref: PolyRef,
        safe_pos: &[f32; 3],
        navquery: &NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<()> {
        let valid = self
            .path
            .iter()
            .take_while(|&&r| navquery.is_valid_poly_ref(r, filter))
            .count();

        if valid == self.path.len() {
            // All valid
            return Ok(());
        }
        if valid == 0 {
            self.pos = *safe_pos;
            self.path.clear();
            self.path.push(safe_ref);
        } else {
            // The path is partially usable
            self.path.truncate(valid);
        }

        // Clamp target pos to last poly
        let last = self.get_last_poly();
        self.target = navquery.closest_point_on_poly_boundary(last, &self.target)?;
        Ok(())
    }

    /// Checks the first `max_look_ahead` polygons against the mesh and the
    /// filter
    pub fn is_valid(&self, max_look_ahead: usize, navquery: &NavMeshQuery, filter: &QueryFilter) -> bool {
        self.path
            .iter()
            .take(max_look_ahead)
            .all(|&r| navquery.is_valid_poly_ref(r, filter))
    }

    /// Gets the current position in the corridor
    pub fn get_pos(&self) -> [f32; 3] {
        self.pos
    }

    /// Gets the target position in the corridor
    pub fn get_target(&self) -> [f32; 3] {
        self.target
    }

    /// Polygon containing the position, null for an empty corridor
    pub fn get_first_poly(&self) -> PolyRef {
        self.path.first().copied().unwrap_or(PolyRef::NULL)
    }

    /// Polygon containing the target, null for an empty corridor
    pub fn get_last_poly(&self) -> PolyRef {
        self.path.last().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn get_path(&self) -> &[PolyRef] {
        &self.path
    }

    pub fn get_path_count(&self) -> usize {
        self.path.len()
    }

    pub fn get_max_path(&self) -> usize {
        self.max_path
    }

    pub fn snapshot(&self) -> CorridorSnapshot {
        CorridorSnapshot {
            pos: self.pos,
            target: self.target,
            path: self.path.clone(),
        }
    }
}

/// Furthest polygon of `path` that also appears in `visited`, searching
/// the path from the back; returns the indices into both
fn furthest_common_from_back(path: &[PolyRef], visited: &[PolyRef]) -> Option<(usize, usize)> {
    path.iter().enumerate().rev().find_map(|(i, r)| {
        visited.iter().position(|v| v == r).map(|j| (i, j))
    })
}

/// Patches the corridor start after the position moved through `visited`
/// (start polygon first)
fn merge_corridor_start_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((furthest_path, furthest_visited)) = furthest_common_from_back(path, visited) else {
        return;
    };

    // The visited polygons, newest first, replace the path up to the
    // common polygon
    let mut merged: Vec<PolyRef> = visited[furthest_visited..].iter().rev().copied().collect();
    merged.extend_from_slice(&path[(furthest_path + 1).min(path.len())..]);
    merged.truncate(max_path);
    *path = merged;
}

/// Patches the corridor end after the target moved through `visited`
/// (old end polygon first)
fn merge_corridor_end_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let common = path.iter().enumerate().find_map(|(i, r)| {
        visited.iter().position(|v| v == r).map(|j| (i, j))
    });
    let Some((furthest_path, furthest_visited)) = common else {
        return;
    };

    path.truncate(furthest_path + 1);
    let room = max_path.saturating_sub(path.len());
    path.extend(visited[furthest_visited + 1..].iter().take(room));
}

/// Replaces the corridor start with the shortcut `visited` when it rejoins
/// the corridor
fn merge_corridor_start_shortcut(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((furthest_path, furthest_visited)) = furthest_common_from_back(path, visited) else {
        return;
    };
    if furthest_visited == 0 {
        return;
    }

    let mut merged = visited[..furthest_visited].to_vec();
    merged.extend_from_slice(&path[furthest_path..]);
    merged.truncate(max_path);
    *path = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(ids: &[u32]) -> Vec<PolyRef> {
        ids.iter().map(|&i| PolyRef::new(i)).collect()
    }

    #[test]
    fn test_create_corridor() {
        let corridor = PathCorridor::new();

        assert_eq!(corridor.get_pos(), [0.0, 0.0, 0.0]);
        assert_eq!(corridor.get_target(), [0.0, 0.0, 0.0]);
        assert_eq!(corridor.get_path_count(), 0);
        assert_eq!(corridor.get_max_path(), DEFAULT_MAX_PATH);
        assert_eq!(corridor.get_first_poly(), PolyRef::NULL);
    }

    #[test]
    fn test_reset_corridor() {
        let mut corridor = PathCorridor::new();

        let start_pos = [10.0, 5.0, 10.0];
        let start_ref = PolyRef::new(42);

        corridor.reset(start_ref, start_pos);

        assert_eq!(corridor.get_pos(), start_pos);
        assert_eq!(corridor.get_target(), start_pos);
        assert_eq!(corridor.get_path_count(), 1);
        assert_eq!(corridor.get_first_poly(), start_ref);
        assert_eq!(corridor.get_last_poly(), start_ref);
    }

    #[test]
    fn test_set_corridor_respects_capacity() {
        let mut corridor = PathCorridor::with_capacity(3);
        corridor.reset(PolyRef::new(1), [0.0; 3]);
        corridor.set_corridor(&[1.0, 0.0, 1.0], &refs(&[1, 2, 3, 4, 5])).unwrap();
        assert_eq!(corridor.get_path(), refs(&[1, 2, 3]).as_slice());
        assert_eq!(corridor.get_target(), [1.0, 0.0, 1.0]);

        let snapshot = corridor.snapshot();
        assert_eq!(snapshot.path, refs(&[1, 2, 3]));
        assert_eq!(snapshot.pos, [0.0; 3]);
    }

    #[test]
    fn test_set_corridor_rejects_bad_paths() {
        let mut corridor = PathCorridor::new();
        // Not reset yet
        assert!(corridor.set_corridor(&[1.0, 0.0, 1.0], &refs(&[1, 2])).is_err());

        corridor.reset(PolyRef::new(1), [0.0; 3]);
        assert!(corridor.set_corridor(&[1.0, 0.0, 1.0], &[]).is_err());
        assert!(corridor.set_corridor(&[1.0, 0.0, 1.0], &refs(&[2, 3])).is_err());
        assert!(corridor.set_corridor(&[1.0, 0.0, 1.0], &[PolyRef::NULL]).is_err());

        // A rejected path leaves the corridor untouched
        assert_eq!(corridor.get_path(), refs(&[1]).as_slice());
        assert_eq!(corridor.get_target(), [0.0; 3]);
    }

    #[test]
    fn test_merge_start_moved() {
        // Moved forward from 1 through 2 into 3
        let mut path = refs(&[1, 2, 3, 4, 5]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[1, 2, 3]));
        assert_eq!(path, refs(&[3, 4, 5]));

        // Moved backward off the corridor: 1 -> 9
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[1, 9]));
        assert_eq!(path, refs(&[9, 1, 2, 3]));

        // No common polygon leaves the path alone
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[7, 8]));
        assert_eq!(path, refs(&[1, 2, 3]));
    }

    #[test]
    fn test_merge_end_moved() {
        // Target moved from 5 into 6
        let mut path = refs(&[1, 2, 3, 4, 5]);
        merge_corridor_end_moved(&mut path, 256, &refs(&[5, 6]));
        assert_eq!(path, refs(&[1, 2, 3, 4, 5, 6]));

        // Target moved back into the corridor
        let mut path = refs(&[1, 2, 3, 4, 5]);
        merge_corridor_end_moved(&mut path, 256, &refs(&[5, 4]));
        assert_eq!(path, refs(&[1, 2, 3, 4]));

        let mut path = refs(&[1, 2]);
        merge_corridor_end_moved(&mut path, 3, &refs(&[2, 6, 7, 8]));
        assert_eq!(path, refs(&[1, 2, 6]));
    }

    #[test]
    fn test_merge_start_shortcut() {
        // 1 sees 4 directly through 9
        let mut path = refs(&[1, 2, 3, 4, 5]);
        merge_corridor_start_shortcut(&mut path, 256, &refs(&[1, 9, 4]));
        assert_eq!(path, refs(&[1, 9, 4, 5]));

        // A shortcut that does not rejoin is ignored
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_shortcut(&mut path, 256, &refs(&[1, 9]));
        assert_eq!(path, refs(&[1, 2, 3]));
    }
}
