//! Path corridor tests on real meshes
//!
//! The corridor merge functions are covered by unit tests next to them;
//! these tests drive the corridor through queries on grid meshes.

#[cfg(test)]
mod tests {
    use nav_detour::{NavMeshQuery, PolyFlags, PolyRef, QueryFilter, StraightPathFlags};

    use crate::path_corridor::{CorridorCorners, PathCorridor};
    use crate::test_mesh_helpers::{create_grid_nav_mesh, create_linked_islands_nav_mesh, poly_at};

    fn approx(a: &[f32; 3], b: &[f32; 3]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-3)
    }

    /// 5 x 5 grid with a wall along x = 1 from z = 0 to z = 4
    fn walled_grid() -> nav_detour::NavMesh {
        create_grid_nav_mesh(5, 1.0, &[(1, 0), (1, 1), (1, 2), (1, 3)]).unwrap()
    }

    #[test]
    fn test_find_corners_around_wall() {
        let mesh = walled_grid();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();

        let start = [0.5, 0.0, 0.5];
        let end = [2.5, 0.0, 0.5];
        let (start_ref, end_ref) = (poly_at(&mesh, 0.5, 0.5), poly_at(&mesh, 2.5, 0.5));
        let path = query.find_path(start_ref, end_ref, &start, &end, &filter, 64).unwrap();

        let mut corridor = PathCorridor::new();
        corridor.reset(start_ref, start);
        corridor.set_corridor(&end, &path.polys).unwrap();
        assert_eq!(corridor.get_first_poly(), start_ref);
        assert_eq!(corridor.get_last_poly(), end_ref);

        // Around the top of the wall and down to the target
        let corners = corridor.find_corners(4, &query).unwrap();
        assert_eq!(corners.len(), 3);
        assert!(approx(&corners[0].pos, &[1.0, 0.0, 4.0]), "{:?}", corners[0].pos);
        assert!(approx(&corners[1].pos, &[2.0, 0.0, 4.0]), "{:?}", corners[1].pos);
        assert!(corners[2].flags.contains(StraightPathFlags::END));
        assert!(approx(&corners[2].pos, &end));

        // One slot is always reserved
        let corners = corridor.find_corners(3, &query).unwrap();
        assert_eq!(corners.len(), 2);
        assert!(!corners[1].flags.contains(StraightPathFlags::END));
    }

    #[test]
    fn test_find_corners_in_single_polygon() {
        let mesh = create_grid_nav_mesh(3, 1.0, &[]).unwrap();
        let query = NavMeshQuery::new(&mesh, 64);
        let r = poly_at(&mesh, 1.5, 1.5);

        let mut corridor = PathCorridor::new();
        corridor.reset(r, [1.2, 0.0, 1.2]);
        corridor.set_corridor(&[1.8, 0.0, 1.7], &[r]).unwrap();

        let corners = corridor.find_corners(4, &query).unwrap();
        assert_eq!(corners.len(), 1);
        assert!(corners[0].flags.contains(StraightPathFlags::END));

        // Standing on the target leaves nothing to steer to
        corridor.reset(r, [1.5, 0.0, 1.5]);
        corridor.set_corridor(&[1.5, 0.0, 1.5], &[r]).unwrap();
        assert!(corridor.find_corners(4, &query).unwrap().is_empty());
        assert!(PathCorridor::new().find_corners(4, &query).is_err());
    }

    #[test]
    fn test_move_position_follows_surface() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();

        let start = [0.5, 0.0, 0.5];
        let end = [4.5, 0.0, 0.5];
        let (start_ref, end_ref) = (poly_at(&mesh, 0.5, 0.5), poly_at(&mesh, 4.5, 0.5));
        let path = query.find_path(start_ref, end_ref, &start, &end, &filter, 64).unwrap();
        assert_eq!(path.polys.len(), 5);

        let mut corridor = PathCorridor::new();
        corridor.reset(start_ref, start);
        corridor.set_corridor(&end, &path.polys).unwrap();

        assert!(corridor.move_position(&[1.5, 0.0, 0.5], &mut query, &filter));
        assert!(approx(&corridor.get_pos(), &[1.5, 0.0, 0.5]));
        assert_eq!(corridor.get_first_poly(), poly_at(&mesh, 1.5, 0.5));
        assert_eq!(corridor.get_path_count(), 4);
        assert_eq!(corridor.get_last_poly(), end_ref);
    }

    #[test]
    fn test_move_position_blocked_by_wall() {
        let mesh = walled_grid();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let start_ref = poly_at(&mesh, 0.5, 0.5);

        let mut corridor = PathCorridor::new();
        corridor.reset(start_ref, [0.5, 0.0, 0.5]);
        assert!(corridor.move_position(&[1.5, 0.0, 0.5], &mut query, &filter));

        let pos = corridor.get_pos();
        assert!(pos[0] <= 1.0 + 1e-3, "{pos:?}");
        assert!(pos[0] > 0.9, "{pos:?}");
        assert_eq!(corridor.get_first_poly(), start_ref);
    }

    #[test]
    fn test_move_target_position_extends_corridor() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();

        let path: Vec<PolyRef> = [0.5, 1.5, 2.5].iter().map(|&x| poly_at(&mesh, x, 0.5)).collect();
        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], [0.5, 0.0, 0.5]);
        corridor.set_corridor(&[2.5, 0.0, 0.5], &path).unwrap();

        assert!(corridor.move_target_position(&[3.5, 0.0, 0.5], &mut query, &filter));
        assert_eq!(corridor.get_path_count(), 4);
        assert_eq!(corridor.get_last_poly(), poly_at(&mesh, 3.5, 0.5));
        assert!(approx(&corridor.get_target(), &[3.5, 0.0, 0.5]));

        assert!(corridor.move_both(&[1.5, 0.0, 0.5], &[3.7, 0.0, 0.5], &mut query, &filter));
        assert_eq!(corridor.get_first_poly(), poly_at(&mesh, 1.5, 0.5));
        assert!(approx(&corridor.get_target(), &[3.7, 0.0, 0.5]));
    }

    /// Corridor that wanders through (0, 1) and (1, 1) before reaching
    /// (2, 0) on a 5 x 5 grid
    fn detour_corridor(mesh: &nav_detour::NavMesh) -> PathCorridor {
        let cells = [(0.5, 0.5), (0.5, 1.5), (1.5, 1.5), (1.5, 0.5), (2.5, 0.5)];
        let path: Vec<PolyRef> = cells.iter().map(|&(x, z)| poly_at(mesh, x, z)).collect();
        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], [0.5, 0.0, 0.5]);
        corridor.set_corridor(&[2.5, 0.0, 0.5], &path).unwrap();
        corridor
    }

    #[test]
    fn test_optimize_path_visibility() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let mut corridor = detour_corridor(&mesh);
        assert_eq!(corridor.get_path_count(), 5);

        corridor.optimize_path_visibility(&[2.5, 0.0, 0.5], 2.005, &query, &filter);
        let expected: Vec<PolyRef> = [0.5, 1.5, 2.5].iter().map(|&x| poly_at(&mesh, x, 0.5)).collect();
        assert_eq!(corridor.get_path(), expected.as_slice());
    }

    #[test]
    fn test_optimize_path_topology() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let mut corridor = detour_corridor(&mesh);

        assert!(corridor.optimize_path_topology(&mut query, &filter).unwrap());
        assert_eq!(corridor.get_path_count(), 3);
        assert_eq!(corridor.get_first_poly(), poly_at(&mesh, 0.5, 0.5));
        assert_eq!(corridor.get_last_poly(), poly_at(&mesh, 2.5, 0.5));
        assert!(!query.is_sliced_find_path_in_flight());

        // Short corridors are left alone
        let mut short = PathCorridor::new();
        short.reset(poly_at(&mesh, 0.5, 0.5), [0.5, 0.0, 0.5]);
        assert!(!short.optimize_path_topology(&mut query, &filter).unwrap());
    }

    #[test]
    fn test_trim_invalid_path() {
        let mut mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let path: Vec<PolyRef> = (0..5).map(|x| poly_at(&mesh, x as f32 + 0.5, 0.5)).collect();
        mesh.set_poly_flags(path[3], PolyFlags::DISABLED).unwrap();

        let query = NavMeshQuery::new(&mesh, 64);
        let filter = QueryFilter::new(PolyFlags::all(), PolyFlags::DISABLED);

        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], [0.5, 0.0, 0.5]);
        corridor.set_corridor(&[4.5, 0.0, 0.5], &path).unwrap();
        assert!(!corridor.is_valid(10, &query, &filter));
        // Only the look-ahead window is checked
        assert!(corridor.is_valid(3, &query, &filter));

        corridor
            .trim_invalid_path(path[0], &[0.5, 0.0, 0.5], &query, &filter)
            .unwrap();
        assert_eq!(corridor.get_path(), &path[..3]);
        assert!(approx(&corridor.get_target(), &[3.0, 0.0, 0.5]));
        assert!(corridor.is_valid(10, &query, &filter));
    }

    #[test]
    fn test_trim_invalid_path_start() {
        let mut mesh = create_grid_nav_mesh(3, 1.0, &[]).unwrap();
        let first = poly_at(&mesh, 0.5, 0.5);
        let safe = poly_at(&mesh, 1.5, 1.5);
        mesh.set_poly_flags(first, PolyFlags::DISABLED).unwrap();

        let query = NavMeshQuery::new(&mesh, 64);
        let filter = QueryFilter::new(PolyFlags::all(), PolyFlags::DISABLED);

        let mut corridor = PathCorridor::new();
        corridor.reset(first, [0.5, 0.0, 0.5]);
        corridor
            .trim_invalid_path(safe, &[1.5, 0.0, 1.5], &query, &filter)
            .unwrap();
        assert_eq!(corridor.get_path(), &[safe]);
        assert!(approx(&corridor.get_pos(), &[1.5, 0.0, 1.5]));
    }

    #[test]
    fn test_fix_path_start() {
        let mut corridor = PathCorridor::new();
        corridor.reset(PolyRef::new(1), [0.0; 3]);
        let path = [PolyRef::new(1), PolyRef::new(2), PolyRef::new(3)];
        corridor.set_corridor(&[5.0, 0.0, 0.0], &path).unwrap();

        corridor.fix_path_start(PolyRef::new(9), &[0.5, 0.0, 0.5]);
        assert_eq!(corridor.get_path(), &[PolyRef::new(9), PolyRef::new(2), PolyRef::new(3)]);
        assert_eq!(corridor.get_pos(), [0.5, 0.0, 0.5]);
        assert_eq!(corridor.get_target(), [5.0, 0.0, 0.0]);

        let mut empty = PathCorridor::new();
        empty.fix_path_start(PolyRef::new(4), &[1.0, 0.0, 1.0]);
        assert_eq!(empty.get_path(), &[PolyRef::new(4)]);
    }

    #[test]
    fn test_move_over_off_mesh_connection() {
        let mesh = create_linked_islands_nav_mesh().unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();

        let start = [0.5, 0.0, 2.5];
        let end = [4.5, 0.0, 2.5];
        let (start_ref, end_ref) = (poly_at(&mesh, 0.5, 2.5), poly_at(&mesh, 4.5, 2.5));
        let path = query.find_path(start_ref, end_ref, &start, &end, &filter, 64).unwrap();
        assert!(!path.is_partial());
        assert_eq!(path.polys.len(), 5);
        let con = path.polys[2];
        assert!(mesh.get_off_mesh_connection_by_ref(con).is_some());

        let mut corridor = PathCorridor::new();
        corridor.reset(start_ref, start);
        corridor.set_corridor(&end, &path.polys).unwrap();

        // The corners stop at the connection
        let corners = corridor.find_corners(4, &query).unwrap();
        let last = corners.last().unwrap();
        assert!(last.flags.contains(StraightPathFlags::OFFMESH_CONNECTION));
        assert_eq!(last.reference, con);
        assert!(approx(&last.pos, &[1.5, 0.0, 2.5]));

        // Not part of the corridor
        assert!(corridor.move_over_off_mesh_connection(end_ref, &query).is_err());

        let traversal = corridor.move_over_off_mesh_connection(con, &query).unwrap();
        assert_eq!(traversal.refs, [path.polys[1], con]);
        assert!(approx(&traversal.start_pos, &[1.5, 0.0, 2.5]));
        assert!(approx(&traversal.end_pos, &[3.5, 0.0, 2.5]));
        assert_eq!(corridor.get_path(), &path.polys[3..]);
        assert!(approx(&corridor.get_pos(), &traversal.end_pos));
    }

    /// Single END corner at `target`
    fn heads_straight_to(corners: &[nav_detour::StraightPathPoint], target: &[f32; 3]) -> bool {
        corners.len() == 1 && corners[0].flags.contains(StraightPathFlags::END) && approx(&corners[0].pos, target)
    }

    #[test]
    fn test_set_corridor_rejects_empty_path() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let start_ref = poly_at(&mesh, 0.5, 0.5);

        let mut corridor = PathCorridor::new();
        corridor.reset(start_ref, [0.5, 0.0, 0.5]);
        assert!(corridor.set_corridor(&[4.5, 0.0, 0.5], &[]).is_err());
        let elsewhere = [poly_at(&mesh, 2.5, 2.5)];
        assert!(corridor.set_corridor(&[2.5, 0.0, 2.5], &elsewhere).is_err());

        // Still usable after the rejected paths
        assert_eq!(corridor.get_path(), &[start_ref]);
        assert!(corridor.move_position(&[0.7, 0.0, 0.6], &mut query, &filter));
        assert_eq!(corridor.get_first_poly(), start_ref);
    }

    #[test]
    fn test_set_corridor_ext_returns_corners() {
        let mesh = walled_grid();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let (start, end) = ([0.5, 0.0, 0.5], [2.5, 0.0, 0.5]);
        let (start_ref, end_ref) = (poly_at(&mesh, 0.5, 0.5), poly_at(&mesh, 2.5, 0.5));
        let path = query.find_path(start_ref, end_ref, &start, &end, &filter, 64).unwrap();

        let mut corridor = PathCorridor::new();
        corridor.reset(start_ref, start);
        let corners = corridor.set_corridor_ext(&end, &path.polys, 4, &query).unwrap();
        assert_eq!(corners, corridor.find_corners(4, &query).unwrap());
        assert_eq!(corners.len(), 3);
        assert!(approx(&corners[0].pos, &[1.0, 0.0, 4.0]));

        assert!(corridor.set_corridor_ext(&end, &[], 4, &query).is_err());
    }

    #[test]
    fn test_move_position_ext_returns_corners() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let path: Vec<PolyRef> = (0..5).map(|x| poly_at(&mesh, x as f32 + 0.5, 0.5)).collect();
        let target = [4.5, 0.0, 0.5];

        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], [0.5, 0.0, 0.5]);
        corridor.set_corridor(&target, &path).unwrap();

        let CorridorCorners { changed, corners } = corridor
            .move_position_ext(&[1.5, 0.0, 0.5], 4, &mut query, &filter)
            .unwrap();
        assert!(changed);
        assert_eq!(corridor.get_first_poly(), path[1]);
        assert!(heads_straight_to(&corners, &target), "{corners:?}");

        // Moving onto the target leaves no corners
        let update = corridor.move_position_ext(&target, 4, &mut query, &filter).unwrap();
        assert!(update.changed);
        assert!(update.corners.is_empty());

        assert!(PathCorridor::new()
            .move_position_ext(&target, 4, &mut query, &filter)
            .is_err());
    }

    #[test]
    fn test_move_target_and_both_ext_return_corners() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let path: Vec<PolyRef> = [0.5, 1.5, 2.5].iter().map(|&x| poly_at(&mesh, x, 0.5)).collect();

        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], [0.5, 0.0, 0.5]);
        corridor.set_corridor(&[2.5, 0.0, 0.5], &path).unwrap();

        let update = corridor
            .move_target_position_ext(&[3.5, 0.0, 0.5], 4, &mut query, &filter)
            .unwrap();
        assert!(update.changed);
        assert!(heads_straight_to(&update.corners, &[3.5, 0.0, 0.5]), "{:?}", update.corners);

        let update = corridor
            .move_both_ext(&[1.5, 0.0, 0.5], &[3.7, 0.0, 0.5], 4, &mut query, &filter)
            .unwrap();
        assert!(update.changed);
        assert_eq!(corridor.get_first_poly(), path[1]);
        assert!(heads_straight_to(&update.corners, &[3.7, 0.0, 0.5]), "{:?}", update.corners);
    }

    #[test]
    fn test_optimize_ext_return_corners() {
        let mesh = create_grid_nav_mesh(5, 1.0, &[]).unwrap();
        let mut query = NavMeshQuery::new(&mesh, 256);
        let filter = QueryFilter::default();
        let target = [2.5, 0.0, 0.5];

        let mut corridor = detour_corridor(&mesh);
        let corners = corridor
            .optimize_path_visibility_ext(&target, 2.005, 4, &query, &filter)
            .unwrap();
        assert_eq!(corridor.get_path_count(), 3);
        assert!(heads_straight_to(&corners, &target), "{corners:?}");

        let mut corridor = detour_corridor(&mesh);
        let update = corridor.optimize_path_topology_ext(4, &mut query, &filter).unwrap();
        assert!(update.changed);
        assert_eq!(corridor.get_path_count(), 3);
        assert!(heads_straight_to(&update.corners, &target), "{:?}", update.corners);
    }
}
