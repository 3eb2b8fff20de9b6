//! Crowd simulation tests
//!
//! Agents are run on flat grid meshes for a fixed number of steps and
//! checked for where they end up.

#[cfg(test)]
mod tests {
    use nav_common::vdist_2d;
    use nav_detour::{NavMesh, PolyFlags};

    use crate::crowd::{Crowd, CrowdAgentParams, CrowdAgentState, MoveRequestState, UpdateFlags};
    use crate::test_mesh_helpers::{create_grid_nav_mesh, create_linked_islands_nav_mesh, poly_at};

    const DT: f32 = 0.1;

    fn small_agent() -> CrowdAgentParams {
        CrowdAgentParams {
            radius: 0.3,
            height: 2.0,
            max_acceleration: 8.0,
            max_speed: 2.0,
            collision_query_range: 2.0,
            path_optimization_range: 6.0,
            ..Default::default()
        }
    }

    fn open_grid(n: usize) -> NavMesh {
        create_grid_nav_mesh(n, 1.0, &[]).unwrap()
    }

    fn run(crowd: &mut Crowd, steps: usize) {
        for _ in 0..steps {
            crowd.update(DT);
        }
    }

    #[test]
    fn test_add_agent_snaps_to_mesh() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(4, 0.6, &mesh);
        assert_eq!(crowd.get_agent_count(), 4);
        assert_eq!(crowd.get_active_agent_count(), 0);

        let idx = crowd.add_agent([1.5, 0.4, 1.5], small_agent()).unwrap();
        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_state(), CrowdAgentState::Walking);
        assert_eq!(ag.get_target_state(), MoveRequestState::None);
        assert!((ag.get_pos()[1]).abs() < 1e-4);
        assert_eq!(ag.get_corridor().get_first_poly(), poly_at(&mesh, 1.5, 1.5));
        assert_eq!(ag.get_corridor().get_path_count(), 1);
    }

    #[test]
    fn test_add_agent_when_full() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let a = crowd.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();
        let b = crowd.add_agent([2.5, 0.0, 2.5], small_agent()).unwrap();
        assert_ne!(a, b);

        assert!(crowd.add_agent([4.5, 0.0, 4.5], small_agent()).is_none());
        assert_eq!(crowd.get_active_agent_count(), 2);
        assert!(vdist_2d(&crowd.get_agent(a).unwrap().get_pos(), &[0.5, 0.0, 0.5]) < 1e-4);
        assert!(vdist_2d(&crowd.get_agent(b).unwrap().get_pos(), &[2.5, 0.0, 2.5]) < 1e-4);

        // A freed slot is reused
        assert!(crowd.remove_agent(a));
        assert!(!crowd.remove_agent(a));
        assert!(crowd.get_agent(a).is_none());
        assert_eq!(crowd.add_agent([4.5, 0.0, 4.5], small_agent()), Some(a));
    }

    #[test]
    fn test_add_agent_rejections() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(4, 0.6, &mesh);

        // Nowhere near the mesh
        assert!(crowd.add_agent([50.0, 0.0, 50.0], small_agent()).is_none());

        let bad_filter = CrowdAgentParams { query_filter_type: 16, ..small_agent() };
        assert!(crowd.add_agent([1.5, 0.0, 1.5], bad_filter).is_none());
        let bad_avoidance = CrowdAgentParams { obstacle_avoidance_type: 8, ..small_agent() };
        assert!(crowd.add_agent([1.5, 0.0, 1.5], bad_avoidance).is_none());

        let rejected = [
            CrowdAgentParams { radius: 0.7, ..small_agent() },
            CrowdAgentParams { radius: -0.1, ..small_agent() },
            CrowdAgentParams { height: f32::NAN, ..small_agent() },
            CrowdAgentParams { max_acceleration: -1.0, ..small_agent() },
            CrowdAgentParams { max_speed: f32::INFINITY, ..small_agent() },
            CrowdAgentParams { collision_query_range: f32::INFINITY, ..small_agent() },
            CrowdAgentParams { collision_query_range: -2.0, ..small_agent() },
            CrowdAgentParams { path_optimization_range: f32::NAN, ..small_agent() },
            CrowdAgentParams { separation_weight: f32::NEG_INFINITY, ..small_agent() },
        ];
        for params in rejected {
            assert!(crowd.add_agent([1.5, 0.0, 1.5], params.clone()).is_none(), "{params:?}");
        }
        assert_eq!(crowd.get_active_agent_count(), 0);

        // The same checks guard parameter updates
        let idx = crowd.add_agent([1.5, 0.0, 1.5], small_agent()).unwrap();
        let huge_radius = CrowdAgentParams { radius: 1.0e9, ..small_agent() };
        assert!(!crowd.update_agent_parameters(idx, huge_radius));
        let nan_range = CrowdAgentParams { collision_query_range: f32::NAN, ..small_agent() };
        assert!(!crowd.update_agent_parameters(idx, nan_range));
        assert_eq!(crowd.get_agent(idx).unwrap().get_params(), &small_agent());
    }

    #[test]
    fn test_huge_query_ranges_keep_update_bounded() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(4, 0.6, &mesh);
        let far_sighted = CrowdAgentParams {
            collision_query_range: 1.0e9,
            path_optimization_range: 1.0e9,
            ..small_agent()
        };
        let a = crowd.add_agent([0.5, 0.0, 0.5], far_sighted).unwrap();
        let b = crowd.add_agent([4.5, 0.0, 4.5], small_agent()).unwrap();

        let target = [4.5, 0.0, 0.5];
        assert!(crowd.request_move_target(a, poly_at(&mesh, target[0], target[2]), target));
        run(&mut crowd, 5);

        // Every agent in the crowd is within range
        let ag = crowd.get_agent(a).unwrap();
        assert_eq!(ag.get_neighbours().len(), 1);
        assert_eq!(ag.get_neighbours()[0].idx, b);
        assert!(ag.get_pos()[0] > 0.5);
    }

    #[test]
    fn test_stale_indices_are_ignored() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let target = poly_at(&mesh, 3.5, 3.5);

        assert!(!crowd.request_move_target(1, target, [3.5, 0.0, 3.5]));
        assert!(!crowd.request_move_velocity(7, [1.0, 0.0, 0.0]));
        assert!(!crowd.reset_move_target(1));
        assert!(!crowd.update_agent_parameters(0, small_agent()));
        assert!(crowd.get_agent(9).is_none());
        assert!(crowd.agent_snapshot(0).is_none());

        // Updating an empty crowd is fine
        crowd.update(DT);
    }

    #[test]
    fn test_agent_reaches_target() {
        let mesh = open_grid(10);
        let mut crowd = Crowd::new(4, 0.6, &mesh);
        let idx = crowd.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();

        let target = [8.5, 0.0, 8.5];
        let target_ref = poly_at(&mesh, target[0], target[2]);
        assert!(crowd.request_move_target(idx, target_ref, target));
        assert_eq!(crowd.get_agent(idx).unwrap().get_target_state(), MoveRequestState::Requesting);

        run(&mut crowd, 400);

        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_state(), CrowdAgentState::Walking);
        assert_eq!(ag.get_target_state(), MoveRequestState::Valid);
        assert!(!ag.is_partial());
        assert_eq!(ag.get_corridor().get_last_poly(), target_ref);
        let dist = vdist_2d(&ag.get_pos(), &target);
        assert!(dist < 0.3, "agent stopped {dist} from the target");
    }

    #[test]
    fn test_agent_plans_around_wall() {
        // Wall along x = 2 with a gap at the top row
        let blocked: Vec<(usize, usize)> = (0..5).map(|z| (2, z)).collect();
        let mesh = create_grid_nav_mesh(6, 1.0, &blocked).unwrap();
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let idx = crowd.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();

        let target = [4.5, 0.0, 0.5];
        let target_ref = poly_at(&mesh, target[0], target[2]);
        assert!(crowd.request_move_target(idx, target_ref, target));
        run(&mut crowd, 500);

        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_corridor().get_last_poly(), target_ref);
        let dist = vdist_2d(&ag.get_pos(), &target);
        assert!(dist < 0.3, "agent stopped {dist} from the target");
    }

    #[test]
    fn test_distant_agents_do_not_interact() {
        let mesh = open_grid(10);
        let target = [4.5, 0.0, 0.5];
        let target_ref = poly_at(&mesh, target[0], target[2]);

        let mut alone = Crowd::new(4, 0.6, &mesh);
        let a = alone.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();
        alone.request_move_target(a, target_ref, target);

        let mut pair = Crowd::new(4, 0.6, &mesh);
        let b = pair.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();
        let far = pair.add_agent([9.5, 0.0, 9.5], small_agent()).unwrap();
        pair.request_move_target(b, target_ref, target);

        for _ in 0..10 {
            alone.update(DT);
            pair.update(DT);
            let (lhs, rhs) = (alone.get_agent(a).unwrap(), pair.get_agent(b).unwrap());
            assert_eq!(lhs.get_vel(), rhs.get_vel());
            assert_eq!(lhs.get_pos(), rhs.get_pos());
            assert!(rhs.get_neighbours().is_empty());
        }
        assert!(vdist_2d(&pair.get_agent(far).unwrap().get_pos(), &[9.5, 0.0, 9.5]) < 1e-3);
    }

    #[test]
    fn test_nearby_agents_become_neighbours() {
        let mesh = open_grid(6);
        let mut crowd = Crowd::new(4, 0.6, &mesh);
        let a = crowd.add_agent([1.5, 0.0, 1.5], small_agent()).unwrap();
        let b = crowd.add_agent([2.5, 0.0, 1.5], small_agent()).unwrap();
        let c = crowd.add_agent([2.5, 0.0, 2.5], small_agent()).unwrap();
        crowd.update(DT);

        let neis = crowd.get_agent(a).unwrap().get_neighbours();
        assert_eq!(neis.len(), 2);
        assert_eq!(neis[0].idx, b);
        assert_eq!(neis[1].idx, c);
        assert!(neis[0].dist <= neis[1].dist);
        // Grid cells are three max radii wide
        assert!(crowd.grid().item_count_at(0, 0) > 0);
    }

    #[test]
    fn test_overlapping_agents_are_separated() {
        let mesh = open_grid(6);
        let mut crowd = Crowd::new(4, 0.6, &mesh);
        let a = crowd.add_agent([2.9, 0.0, 3.0], small_agent()).unwrap();
        let b = crowd.add_agent([3.1, 0.0, 3.0], small_agent()).unwrap();

        run(&mut crowd, 20);

        let pa = crowd.get_agent(a).unwrap().get_pos();
        let pb = crowd.get_agent(b).unwrap().get_pos();
        assert!(vdist_2d(&pa, &pb) > 0.5, "{pa:?} {pb:?}");
    }

    #[test]
    fn test_velocity_request() {
        let mesh = open_grid(10);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let idx = crowd.add_agent([2.5, 0.0, 5.0], small_agent()).unwrap();

        assert!(crowd.request_move_velocity(idx, [1.0, 0.0, 0.0]));
        run(&mut crowd, 20);

        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_target_state(), MoveRequestState::Velocity);
        assert!(ag.get_pos()[0] > 3.5, "{:?}", ag.get_pos());
        assert!(ag.get_corners().is_empty());
        // The corridor only tracks the agent
        assert_eq!(ag.get_corridor().get_path_count(), 1);
        assert_eq!(ag.get_corridor().get_target(), ag.get_pos());

        // Without a request the agent brakes to a stop
        assert!(crowd.reset_move_target(idx));
        run(&mut crowd, 10);
        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_target_state(), MoveRequestState::None);
        assert!(nav_common::vlen(&ag.get_vel()) < 0.01);
    }

    #[test]
    fn test_excluded_ground_invalidates_agent() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let idx = crowd.add_agent([1.5, 0.0, 1.5], small_agent()).unwrap();
        crowd.update(DT);
        assert_eq!(crowd.get_agent(idx).unwrap().get_state(), CrowdAgentState::Walking);

        crowd.get_filter_mut(0).unwrap().set_exclude_flags(PolyFlags::WALK);
        crowd.update(DT);
        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_state(), CrowdAgentState::Invalid);
        assert!(!ag.get_corridor().get_first_poly().is_valid());

        // Invalid agents are skipped by later updates
        let pos = ag.get_pos();
        run(&mut crowd, 5);
        assert_eq!(crowd.get_agent(idx).unwrap().get_pos(), pos);
    }

    #[test]
    fn test_off_mesh_connection_traversal() {
        let mesh = create_linked_islands_nav_mesh().unwrap();
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let params = CrowdAgentParams {
            update_flags: UpdateFlags::ANTICIPATE_TURNS,
            ..small_agent()
        };
        let idx = crowd.add_agent([0.5, 0.0, 2.5], params).unwrap();

        let target = [4.5, 0.0, 2.5];
        let target_ref = poly_at(&mesh, target[0], target[2]);
        assert!(crowd.request_move_target(idx, target_ref, target));

        let mut connection = None;
        for _ in 0..200 {
            crowd.update(DT);
            let ag = crowd.get_agent(idx).unwrap();
            if ag.get_state() == CrowdAgentState::OffMesh {
                let anim = ag.get_animation();
                assert!(anim.active);
                assert!(anim.t <= anim.tmax);
                connection = Some(anim.poly_ref);
            }
        }

        let con = connection.expect("agent never used the connection");
        assert!(mesh.get_off_mesh_connection_by_ref(con).is_some());

        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_state(), CrowdAgentState::Walking);
        assert!(!ag.get_animation().active);
        assert!(ag.get_pos()[0] > 3.0, "{:?}", ag.get_pos());
        assert_eq!(ag.get_corridor().get_first_poly(), target_ref);
    }

    #[test]
    fn test_adjust_move_target() {
        let mesh = open_grid(10);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let idx = crowd.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();
        let target_ref = poly_at(&mesh, 8.5, 0.5);

        // Without a planned path the adjustment is a regular request
        assert!(crowd.adjust_move_target(idx, target_ref, [8.5, 0.0, 0.5]));
        assert_eq!(crowd.get_agent(idx).unwrap().get_target_state(), MoveRequestState::Requesting);

        run(&mut crowd, 5);
        assert_eq!(crowd.get_agent(idx).unwrap().get_target_state(), MoveRequestState::Valid);

        // Inside the same polygon the corridor is patched in place
        assert!(crowd.adjust_move_target(idx, target_ref, [8.7, 0.0, 0.6]));
        assert_eq!(crowd.get_agent(idx).unwrap().get_target_state(), MoveRequestState::Adjusting);
        crowd.update(DT);
        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_target_state(), MoveRequestState::Valid);
        assert_eq!(ag.get_target_pos(), [8.7, 0.0, 0.6]);
        assert!(vdist_2d(&ag.get_corridor().get_target(), &[8.7, 0.0, 0.6]) < 1e-3);

        // A target in another polygon is replanned
        let other_ref = poly_at(&mesh, 8.5, 5.5);
        assert!(crowd.adjust_move_target(idx, other_ref, [8.5, 0.0, 5.5]));
        run(&mut crowd, 5);
        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_target_state(), MoveRequestState::Valid);
        assert_eq!(ag.get_corridor().get_last_poly(), other_ref);
    }

    #[test]
    fn test_update_agent_parameters() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let idx = crowd.add_agent([1.5, 0.0, 1.5], small_agent()).unwrap();

        let faster = CrowdAgentParams { max_speed: 4.0, ..small_agent() };
        assert!(crowd.update_agent_parameters(idx, faster));
        assert_eq!(crowd.get_agent(idx).unwrap().get_params().max_speed, 4.0);

        let invalid = CrowdAgentParams { query_filter_type: 99, ..small_agent() };
        assert!(!crowd.update_agent_parameters(idx, invalid));
        assert_eq!(crowd.get_agent(idx).unwrap().get_params().query_filter_type, 0);
    }

    #[test]
    fn test_obstacle_avoidance_params() {
        let mesh = open_grid(5);
        let mut crowd = Crowd::new(2, 0.6, &mesh);

        let mut params = *crowd.get_obstacle_avoidance_params(0).unwrap();
        params.adaptive_divs = 5;
        assert!(crowd.set_obstacle_avoidance_params(0, params));
        assert_eq!(crowd.get_obstacle_avoidance_params(0).unwrap().adaptive_divs, 5);
        assert!(!crowd.set_obstacle_avoidance_params(8, params));
        assert!(crowd.get_obstacle_avoidance_params(8).is_none());
    }

    #[test]
    fn test_velocity_samples_are_counted() {
        let mesh = open_grid(6);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let idx = crowd.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();
        crowd.request_move_target(idx, poly_at(&mesh, 4.5, 0.5), [4.5, 0.0, 0.5]);
        run(&mut crowd, 3);
        assert!(crowd.velocity_sample_count() > 0);

        let quiet = CrowdAgentParams { update_flags: UpdateFlags::ANTICIPATE_TURNS, ..small_agent() };
        assert!(crowd.update_agent_parameters(idx, quiet));
        crowd.update(DT);
        assert_eq!(crowd.velocity_sample_count(), 0);
        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(ag.get_new_vel(), ag.get_desired_vel());
    }

    #[test]
    fn test_agent_snapshot() {
        let mesh = open_grid(6);
        let mut crowd = Crowd::new(2, 0.6, &mesh);
        let idx = crowd.add_agent([0.5, 0.0, 0.5], small_agent()).unwrap();
        crowd.request_move_target(idx, poly_at(&mesh, 4.5, 0.5), [4.5, 0.0, 0.5]);
        run(&mut crowd, 3);

        let snap = crowd.agent_snapshot(idx).unwrap();
        let ag = crowd.get_agent(idx).unwrap();
        assert_eq!(snap.state, CrowdAgentState::Walking);
        assert_eq!(snap.target_state, MoveRequestState::Valid);
        assert_eq!(snap.pos, ag.get_pos());
        assert_eq!(snap.vel, ag.get_vel());
        assert_eq!(snap.poly_ref, ag.get_corridor().get_first_poly());
        assert_eq!(snap.target_ref, poly_at(&mesh, 4.5, 0.5));
        assert_eq!(snap.corridor.path, ag.get_corridor().get_path());
        assert_eq!(snap.corner, ag.get_corners()[0].pos);
        assert_eq!(crowd.active_agents().count(), 1);
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_snapshot_serialization() {
        let mesh = open_grid(4);
        let mut crowd = Crowd::new(1, 0.6, &mesh);
        let idx = crowd.add_agent([1.5, 0.0, 1.5], small_agent()).unwrap();
        crowd.update(DT);

        let snap = crowd.agent_snapshot(idx).unwrap();
        let json = serde_json::to_string(&snap).unwrap();
        let back: crate::crowd::AgentSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);

        let params: CrowdAgentParams = serde_json::from_str(r#"{"radius": 0.4}"#).unwrap();
        assert_eq!(params.radius, 0.4);
        assert_eq!(params.max_speed, CrowdAgentParams::default().max_speed);
    }
}
