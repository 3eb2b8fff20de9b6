//! Crowd management
//!
//! The crowd owns a fixed number of agent slots. Every agent follows its
//! own path corridor, and [`Crowd::update`] advances all of them at once:
//! path planning is amortized over updates through a path queue, nearby
//! agents and walls are gathered through a proximity grid and a local
//! boundary, and the steering velocity is corrected by velocity-space
//! obstacle avoidance before being integrated and constrained to the
//! navigation mesh.

use bitflags::bitflags;
use nav_common::{
    sqr, tri_area_2d, vadd, vdist_2d, vdist_2d_sqr, vlen, vlen_sqr, vlerp, vmad, vnormalize,
    vscale, vsub,
};
use nav_detour::{
    NavMesh, NavMeshQuery, PATHQ_INVALID, PathQueue, PathQueueRef, PolyRef, QueryFilter,
    StatusDetail, StraightPathFlags, StraightPathPoint,
};

use crate::local_boundary::LocalBoundary;
use crate::obstacle_avoidance::{ObstacleAvoidanceParams, ObstacleAvoidanceQuery};
use crate::path_corridor::{CorridorSnapshot, PathCorridor};
use crate::proximity_grid::ProximityGrid;

/// The maximum number of neighbors that a crowd agent can take into account
/// for steering decisions.
pub const MAX_NEIGHBOURS: usize = 6;

/// The maximum number of corners a crowd agent will look ahead in the path.
/// Due to the behavior of the crowd manager, the actual number of useful
/// corners will be one less than this number.
pub const MAX_CORNERS: usize = 4;

/// The maximum number of crowd avoidance configurations supported by the
/// crowd manager.
pub const MAX_OBSTAVOIDANCE_PARAMS: usize = 8;

/// The maximum number of query filter types supported by the crowd manager.
pub const MAX_QUERY_FILTER_TYPE: usize = 16;

/// Node expansions the path queue may spend per update
const MAX_ITERS_PER_UPDATE: usize = 100;

const MAX_PATHQUEUE_NODES: usize = 4096;
const MAX_COMMON_NODES: usize = 512;

/// Longest path kept by an agent corridor
const MAX_PATH_RESULT: usize = 256;

/// Node expansions and path length of the search done right when a move
/// is requested
const QUICK_SEARCH_ITERS: usize = 20;
const QUICK_SEARCH_RESULT: usize = 32;

/// Corridor polygons checked for validity every update
const CHECK_LOOKAHEAD: usize = 10;

/// Seconds before a corridor that ends short of its target is replanned
const TARGET_REPLAN_DELAY: f32 = 1.0;

/// Seconds between topology optimizations of one agent
const OPT_TIME_THR: f32 = 0.5;

/// Agents whose corridor topology is optimized per update
const OPT_MAX_AGENTS: usize = 1;

/// Agents that may submit a request to the path queue per update
const PATH_MAX_AGENTS: usize = 8;

const COLLISION_RESOLVE_FACTOR: f32 = 0.7;
const COLLISION_RESOLVE_ITERATIONS: usize = 4;

/// Candidates returned by the proximity grid for a neighbour query
const MAX_GRID_QUERY: usize = 32;

/// Default radius of an agent
const DEFAULT_AGENT_RADIUS: f32 = 0.6;

/// Default height of an agent
const DEFAULT_AGENT_HEIGHT: f32 = 2.0;

/// Default max acceleration of an agent
const DEFAULT_AGENT_MAX_ACCELERATION: f32 = 8.0;

/// Default max speed of an agent
const DEFAULT_AGENT_MAX_SPEED: f32 = 3.5;

/// The type of navigation mesh polygon the agent is currently traversing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum CrowdAgentState {
    /// The agent is not in a valid state.
    #[default]
    Invalid = 0,
    /// The agent is traversing a normal navigation mesh polygon.
    Walking = 1,
    /// The agent is traversing an off-mesh connection.
    OffMesh = 2,
}

/// Progress of an agent's move request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum MoveRequestState {
    #[default]
    None = 0,
    Failed,
    Valid,
    Requesting,
    WaitingForQueue,
    WaitingForPath,
    Velocity,
    /// Target moved a little, the corridor end is patched instead of
    /// replanning
    Adjusting,
}

bitflags! {
    /// Steering features enabled for an agent
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct UpdateFlags: u8 {
        /// Steer towards the corner after the next one for smoother turns
        const ANTICIPATE_TURNS = 0x01;
        /// Sample velocities that avoid neighbours and walls
        const OBSTACLE_AVOIDANCE = 0x02;
        /// Push away from neighbours
        const SEPARATION = 0x04;
        /// Shortcut the corridor to visible corners
        const OPTIMIZE_VIS = 0x08;
        /// Periodically replan the start of the corridor
        const OPTIMIZE_TOPO = 0x10;
    }
}

impl Default for UpdateFlags {
    fn default() -> Self {
        UpdateFlags::ANTICIPATE_TURNS | UpdateFlags::OBSTACLE_AVOIDANCE | UpdateFlags::SEPARATION
    }
}

/// Configuration of a crowd agent
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct CrowdAgentParams {
    /// Radius of the agent
    pub radius: f32,
    /// Height of the agent
    pub height: f32,
    /// Maximum acceleration of the agent
    pub max_acceleration: f32,
    /// Maximum speed of the agent
    pub max_speed: f32,
    /// Distance at which neighbours and walls are considered for steering
    pub collision_query_range: f32,
    /// Distance of the path visibility optimization
    pub path_optimization_range: f32,
    /// How strongly the agent keeps away from neighbours
    pub separation_weight: f32,
    /// Steering features for the agent
    pub update_flags: UpdateFlags,
    /// Index of the avoidance profile, below [`MAX_OBSTAVOIDANCE_PARAMS`]
    pub obstacle_avoidance_type: u8,
    /// Index of the query filter, below [`MAX_QUERY_FILTER_TYPE`]
    pub query_filter_type: u8,
}

impl Default for CrowdAgentParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_AGENT_RADIUS,
            height: DEFAULT_AGENT_HEIGHT,
            max_acceleration: DEFAULT_AGENT_MAX_ACCELERATION,
            max_speed: DEFAULT_AGENT_MAX_SPEED,
            collision_query_range: 12.0,
            path_optimization_range: 30.0,
            separation_weight: 2.0,
            update_flags: UpdateFlags::default(),
            obstacle_avoidance_type: 3,
            query_filter_type: 0,
        }
    }
}

impl CrowdAgentParams {
    fn is_valid(&self) -> bool {
        let non_negative = |v: f32| v.is_finite() && v >= 0.0;
        (self.obstacle_avoidance_type as usize) < MAX_OBSTAVOIDANCE_PARAMS
            && (self.query_filter_type as usize) < MAX_QUERY_FILTER_TYPE
            && non_negative(self.radius)
            && non_negative(self.height)
            && non_negative(self.max_speed)
            && non_negative(self.max_acceleration)
            && non_negative(self.collision_query_range)
            && non_negative(self.path_optimization_range)
            && non_negative(self.separation_weight)
    }
}

/// Neighbour of an agent
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CrowdNeighbour {
    /// Agent index of the neighbour
    pub idx: usize,
    /// Squared xz distance to the neighbour
    pub dist: f32,
}

/// Progress of an off-mesh connection traversal
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrowdAgentAnimation {
    pub active: bool,
    /// Agent position when the traversal started
    pub init_pos: [f32; 3],
    pub start_pos: [f32; 3],
    pub end_pos: [f32; 3],
    /// Connection polygon being traversed
    pub poly_ref: PolyRef,
    pub t: f32,
    pub tmax: f32,
}

/// Diagnostic copy of an agent's state
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentSnapshot {
    pub state: CrowdAgentState,
    pub target_state: MoveRequestState,
    /// Polygon under the agent
    pub poly_ref: PolyRef,
    /// Polygon at the end of the corridor
    pub target_ref: PolyRef,
    /// Polygon entered at the next corner
    pub corner_ref: PolyRef,
    pub neighbour_count: usize,
    pub desired_speed: f32,
    pub pos: [f32; 3],
    pub disp: [f32; 3],
    pub dvel: [f32; 3],
    pub nvel: [f32; 3],
    pub vel: [f32; 3],
    /// Corridor target
    pub target: [f32; 3],
    /// Next corner, the position when there is none
    pub corner: [f32; 3],
    pub corridor: CorridorSnapshot,
}

/// Agent in the crowd
#[derive(Debug, Clone)]
pub struct CrowdAgent {
    state: CrowdAgentState,
    /// True if the corridor does not reach the requested target
    partial: bool,
    corridor: PathCorridor,
    boundary: LocalBoundary,
    /// Seconds since the last topology optimization
    topology_opt_time: f32,
    neis: Vec<CrowdNeighbour>,
    desired_speed: f32,

    npos: [f32; 3], // Current position
    disp: [f32; 3], // Collision resolution displacement
    dvel: [f32; 3], // Desired velocity
    nvel: [f32; 3], // Velocity chosen by obstacle avoidance
    vel: [f32; 3],  // Actual velocity

    params: CrowdAgentParams,
    corners: Vec<StraightPathPoint>,

    target_state: MoveRequestState,
    target_ref: PolyRef,
    /// Target position, or the requested velocity in velocity mode
    target_pos: [f32; 3],
    target_pathq_ref: PathQueueRef,
    /// True when the current request replans an existing corridor
    target_replan: bool,
    /// Seconds since the last replan
    target_replan_time: f32,

    anim: CrowdAgentAnimation,
}

impl CrowdAgent {
    fn new(params: CrowdAgentParams, max_path: usize) -> Self {
        Self {
            state: CrowdAgentState::Invalid,
            partial: false,
            corridor: PathCorridor::with_capacity(max_path),
            boundary: LocalBoundary::new(),
            topology_opt_time: 0.0,
            neis: Vec::with_capacity(MAX_NEIGHBOURS),
            desired_speed: 0.0,
            npos: [0.0; 3],
            disp: [0.0; 3],
            dvel: [0.0; 3],
            nvel: [0.0; 3],
            vel: [0.0; 3],
            params,
            corners: Vec::with_capacity(MAX_CORNERS),
            target_state: MoveRequestState::None,
            target_ref: PolyRef::NULL,
            target_pos: [0.0; 3],
            target_pathq_ref: PATHQ_INVALID,
            target_replan: false,
            target_replan_time: 0.0,
            anim: CrowdAgentAnimation::default(),
        }
    }

    pub fn get_state(&self) -> CrowdAgentState {
        self.state
    }

    /// Returns true if the corridor ends short of the requested target
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Gets the agent's position
    pub fn get_pos(&self) -> [f32; 3] {
        self.npos
    }

    /// Gets the agent's velocity
    pub fn get_vel(&self) -> [f32; 3] {
        self.vel
    }

    /// Velocity the agent steers towards, before avoidance
    pub fn get_desired_vel(&self) -> [f32; 3] {
        self.dvel
    }

    /// Velocity chosen by obstacle avoidance
    pub fn get_new_vel(&self) -> [f32; 3] {
        self.nvel
    }

    pub fn get_displacement(&self) -> [f32; 3] {
        self.disp
    }

    pub fn get_desired_speed(&self) -> f32 {
        self.desired_speed
    }

    pub fn get_params(&self) -> &CrowdAgentParams {
        &self.params
    }

    pub fn get_corridor(&self) -> &PathCorridor {
        &self.corridor
    }

    pub fn get_boundary(&self) -> &LocalBoundary {
        &self.boundary
    }

    /// Neighbours, nearest first
    pub fn get_neighbours(&self) -> &[CrowdNeighbour] {
        &self.neis
    }

    /// Corners the agent steers through, next corner first
    pub fn get_corners(&self) -> &[StraightPathPoint] {
        &self.corners
    }

    pub fn get_target_state(&self) -> MoveRequestState {
        self.target_state
    }

    pub fn get_target_ref(&self) -> PolyRef {
        self.target_ref
    }

    pub fn get_target_pos(&self) -> [f32; 3] {
        self.target_pos
    }

    pub fn get_animation(&self) -> &CrowdAgentAnimation {
        &self.anim
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let next_corner = self.corners.first();
        AgentSnapshot {
            state: self.state,
            target_state: self.target_state,
            poly_ref: self.corridor.get_first_poly(),
            target_ref: self.corridor.get_last_poly(),
            corner_ref: next_corner.map_or(PolyRef::NULL, |c| c.reference),
            neighbour_count: self.neis.len(),
            desired_speed: self.desired_speed,
            pos: self.npos,
            disp: self.disp,
            dvel: self.dvel,
            nvel: self.nvel,
            vel: self.vel,
            target: self.corridor.get_target(),
            corner: next_corner.map_or(self.npos, |c| c.pos),
            corridor: self.corridor.snapshot(),
        }
    }

    fn set_move_target(&mut self, target_ref: PolyRef, pos: [f32; 3], replan: bool) {
        self.target_ref = target_ref;
        self.target_pos = pos;
        self.target_pathq_ref = PATHQ_INVALID;
        self.target_replan = replan;
        self.target_state = if target_ref.is_valid() {
            MoveRequestState::Requesting
        } else {
            MoveRequestState::Failed
        };
    }

    fn follows_path(&self) -> bool {
        !matches!(self.target_state, MoveRequestState::None | MoveRequestState::Velocity)
    }

    fn calc_smooth_steer_direction(&self) -> [f32; 3] {
        let Some(first) = self.corners.first() else {
            return [0.0; 3];
        };
        let second = &self.corners[1.min(self.corners.len() - 1)];

        let mut dir0 = vsub(&first.pos, &self.npos);
        let mut dir1 = vsub(&second.pos, &self.npos);
        dir0[1] = 0.0;
        dir1[1] = 0.0;

        let len0 = vlen(&dir0);
        let len1 = vlen(&dir1);
        if len1 > 0.001 {
            dir1 = vscale(&dir1, 1.0 / len1);
        }

        let mut dir = [dir0[0] - dir1[0] * len0 * 0.5, 0.0, dir0[2] - dir1[2] * len0 * 0.5];
        vnormalize(&mut dir);
        dir
    }

    fn calc_straight_steer_direction(&self) -> [f32; 3] {
        let Some(first) = self.corners.first() else {
            return [0.0; 3];
        };
        let mut dir = vsub(&first.pos, &self.npos);
        dir[1] = 0.0;
        vnormalize(&mut dir);
        dir
    }

    /// Distance to the end of the path, capped at `range`
    fn get_distance_to_goal(&self, range: f32) -> f32 {
        match self.corners.last() {
            Some(last) if last.flags.contains(StraightPathFlags::END) => vdist_2d(&self.npos, &last.pos).min(range),
            _ => range,
        }
    }

    fn over_off_mesh_connection(&self, radius: f32) -> bool {
        self.corners.last().is_some_and(|last| {
            last.flags.contains(StraightPathFlags::OFFMESH_CONNECTION)
                && vdist_2d_sqr(&self.npos, &last.pos) < radius * radius
        })
    }

    fn integrate(&mut self, dt: f32) {
        // Fake dynamic constraint
        let max_delta = self.params.max_acceleration * dt;
        let mut dv = vsub(&self.nvel, &self.vel);
        let ds = vlen(&dv);
        if ds > max_delta {
            dv = vscale(&dv, max_delta / ds);
        }
        self.vel = vadd(&self.vel, &dv);

        // Integrate
        if vlen(&self.vel) > 0.0001 {
            self.npos = vmad(&self.npos, &self.vel, dt);
        } else {
            self.vel = [0.0; 3];
        }
    }
}

/// State of another agent read while one agent is being updated
#[derive(Debug, Clone, Copy)]
struct AgentProbe {
    npos: [f32; 3],
    vel: [f32; 3],
    dvel: [f32; 3],
    radius: f32,
    height: f32,
}

impl From<&CrowdAgent> for AgentProbe {
    fn from(ag: &CrowdAgent) -> Self {
        Self {
            npos: ag.npos,
            vel: ag.vel,
            dvel: ag.dvel,
            radius: ag.params.radius,
            height: ag.params.height,
        }
    }
}

/// Crowd manager
///
/// Borrows the navigation mesh for its whole lifetime, so the mesh cannot
/// change tiles under a running simulation.
#[derive(Debug)]
pub struct Crowd<'a> {
    agents: Vec<Option<CrowdAgent>>,
    max_agent_radius: f32,
    max_path_result: usize,
    /// Half extents used to place agents and targets on the mesh
    agent_placement_half_extents: [f32; 3],
    filters: Vec<QueryFilter>,
    obstacle_query: ObstacleAvoidanceQuery,
    obstacle_query_params: [ObstacleAvoidanceParams; MAX_OBSTAVOIDANCE_PARAMS],
    grid: ProximityGrid,
    pathq: PathQueue<'a>,
    navquery: NavMeshQuery<'a>,
    velocity_sample_count: usize,
}

impl<'a> Crowd<'a> {
    /// Creates a crowd with `max_agents` slots
    ///
    /// `max_agent_radius` sizes the proximity grid and the placement
    /// extents; agents may be smaller but not larger.
    pub fn new(max_agents: usize, max_agent_radius: f32, nav_mesh: &'a NavMesh) -> Self {
        let max_agent_radius = if max_agent_radius.is_finite() && max_agent_radius > 0.0 {
            max_agent_radius
        } else {
            DEFAULT_AGENT_RADIUS
        };

        Self {
            agents: vec![None; max_agents],
            max_agent_radius,
            max_path_result: MAX_PATH_RESULT,
            agent_placement_half_extents: [max_agent_radius * 2.0, max_agent_radius * 1.5, max_agent_radius * 2.0],
            filters: vec![QueryFilter::default(); MAX_QUERY_FILTER_TYPE],
            obstacle_query: ObstacleAvoidanceQuery::new(MAX_NEIGHBOURS, 8),
            obstacle_query_params: [ObstacleAvoidanceParams::default(); MAX_OBSTAVOIDANCE_PARAMS],
            grid: ProximityGrid::new(max_agent_radius * 3.0),
            pathq: PathQueue::new(nav_mesh, MAX_PATH_RESULT, MAX_PATHQUEUE_NODES),
            navquery: NavMeshQuery::new(nav_mesh, MAX_COMMON_NODES),
            velocity_sample_count: 0,
        }
    }

    fn accepts(&self, params: &CrowdAgentParams) -> bool {
        params.is_valid() && params.radius <= self.max_agent_radius
    }

    /// Adds an agent at the nearest point of the mesh to `pos`
    ///
    /// Returns `None` when every slot is taken, when the parameters are
    /// out of range, or when no polygon is found near `pos`. Existing
    /// agents are never touched in that case.
    pub fn add_agent(&mut self, pos: [f32; 3], params: CrowdAgentParams) -> Option<usize> {
        if !self.accepts(&params) {
            log::warn!("rejected crowd agent parameters: {params:?}");
            return None;
        }
        let Some(slot) = self.agents.iter().position(Option::is_none) else {
            log::debug!("crowd is full, agent not added");
            return None;
        };

        // Find nearest position on navmesh and place the agent there
        let filter = &self.filters[params.query_filter_type as usize];
        let (nearest_ref, nearest) = match self
            .navquery
            .find_nearest_poly(&pos, &self.agent_placement_half_extents, filter)
        {
            Ok((r, p)) if r.is_valid() => (r, p),
            _ => {
                log::debug!("no polygon near {pos:?}, agent not added");
                return None;
            }
        };

        let mut agent = CrowdAgent::new(params, self.max_path_result);
        agent.corridor.reset(nearest_ref, nearest);
        agent.npos = nearest;
        agent.state = CrowdAgentState::Walking;
        self.agents[slot] = Some(agent);

        log::debug!("added crowd agent {slot} at {nearest:?}");
        Some(slot)
    }

    /// Removes an agent; returns false for an unknown index
    pub fn remove_agent(&mut self, idx: usize) -> bool {
        match self.agents.get_mut(idx).and_then(Option::take) {
            Some(_) => {
                log::debug!("removed crowd agent {idx}");
                true
            }
            None => false,
        }
    }

    /// Replaces the configuration of an agent
    pub fn update_agent_parameters(&mut self, idx: usize, params: CrowdAgentParams) -> bool {
        if !self.accepts(&params) {
            log::warn!("rejected crowd agent parameters: {params:?}");
            return false;
        }
        match self.agent_mut(idx) {
            Some(ag) => {
                ag.params = params;
                true
            }
            None => false,
        }
    }

    /// Asks the agent to move to `pos` inside `target_ref`
    ///
    /// The path is planned over the following updates. Returns false for an
    /// unknown agent or a null reference.
    pub fn request_move_target(&mut self, idx: usize, target_ref: PolyRef, pos: [f32; 3]) -> bool {
        if !target_ref.is_valid() {
            return false;
        }
        let Some(ag) = self.agent_mut(idx) else {
            return false;
        };
        ag.set_move_target(target_ref, pos, false);
        log::debug!("agent {idx} requested move to {pos:?}");
        true
    }

    /// Moves the target of an agent a short distance
    ///
    /// An agent with a planned corridor patches the corridor end on the
    /// next update and only replans if the target left the corridor. Any
    /// other agent gets a regular move request.
    pub fn adjust_move_target(&mut self, idx: usize, target_ref: PolyRef, pos: [f32; 3]) -> bool {
        if !target_ref.is_valid() {
            return false;
        }
        let Some(ag) = self.agent_mut(idx) else {
            return false;
        };
        if ag.target_state != MoveRequestState::Valid && ag.target_state != MoveRequestState::Adjusting {
            return self.request_move_target(idx, target_ref, pos);
        }
        ag.target_ref = target_ref;
        ag.target_pos = pos;
        ag.target_state = MoveRequestState::Adjusting;
        true
    }

    /// Drives the agent with a velocity instead of a target
    pub fn request_move_velocity(&mut self, idx: usize, vel: [f32; 3]) -> bool {
        let Some(ag) = self.agent_mut(idx) else {
            return false;
        };
        ag.target_ref = PolyRef::NULL;
        ag.target_pos = vel;
        ag.target_pathq_ref = PATHQ_INVALID;
        ag.target_replan = false;
        ag.target_state = MoveRequestState::Velocity;
        true
    }

    /// Cancels the move request of an agent
    pub fn reset_move_target(&mut self, idx: usize) -> bool {
        let Some(ag) = self.agent_mut(idx) else {
            return false;
        };
        ag.target_ref = PolyRef::NULL;
        ag.target_pos = [0.0; 3];
        ag.dvel = [0.0; 3];
        ag.target_pathq_ref = PATHQ_INVALID;
        ag.target_replan = false;
        ag.target_state = MoveRequestState::None;
        true
    }

    /// Gets an active agent
    pub fn get_agent(&self, idx: usize) -> Option<&CrowdAgent> {
        self.agents.get(idx).and_then(Option::as_ref)
    }

    fn agent_mut(&mut self, idx: usize) -> Option<&mut CrowdAgent> {
        self.agents.get_mut(idx).and_then(Option::as_mut)
    }

    pub fn agent_snapshot(&self, idx: usize) -> Option<AgentSnapshot> {
        self.get_agent(idx).map(CrowdAgent::snapshot)
    }

    /// Number of agent slots
    pub fn get_agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn get_active_agent_count(&self) -> usize {
        self.agents.iter().flatten().count()
    }

    /// Active agents with their indices
    pub fn active_agents(&self) -> impl Iterator<Item = (usize, &CrowdAgent)> {
        self.agents
            .iter()
            .enumerate()
            .filter_map(|(i, ag)| ag.as_ref().map(|ag| (i, ag)))
    }

    pub fn get_filter(&self, idx: usize) -> Option<&QueryFilter> {
        self.filters.get(idx)
    }

    /// Editable filter; agents using it pick the change up on the next
    /// update
    pub fn get_filter_mut(&mut self, idx: usize) -> Option<&mut QueryFilter> {
        self.filters.get_mut(idx)
    }

    pub fn set_obstacle_avoidance_params(&mut self, idx: usize, params: ObstacleAvoidanceParams) -> bool {
        match self.obstacle_query_params.get_mut(idx) {
            Some(slot) => {
                *slot = params;
                true
            }
            None => false,
        }
    }

    pub fn get_obstacle_avoidance_params(&self, idx: usize) -> Option<&ObstacleAvoidanceParams> {
        self.obstacle_query_params.get(idx)
    }

    /// Half extents used to place agents and targets on the mesh
    pub fn query_extents(&self) -> [f32; 3] {
        self.agent_placement_half_extents
    }

    /// Velocity samples taken by obstacle avoidance during the last update
    pub fn velocity_sample_count(&self) -> usize {
        self.velocity_sample_count
    }

    pub fn grid(&self) -> &ProximityGrid {
        &self.grid
    }

    pub fn nav_query(&self) -> &NavMeshQuery<'a> {
        &self.navquery
    }

    fn active_indices(&self) -> Vec<usize> {
        self.active_agents().map(|(i, _)| i).collect()
    }

    fn probes(&self) -> Vec<Option<AgentProbe>> {
        self.agents.iter().map(|ag| ag.as_ref().map(AgentProbe::from)).collect()
    }

    /// Advances the simulation by `dt` seconds
    pub fn update(&mut self, dt: f32) {
        self.velocity_sample_count = 0;
        let active = self.active_indices();

        // Check that all agents still have valid paths
        self.check_path_validity(&active, dt);

        // Update async move request and path finder
        self.update_move_requests();

        self.update_topology_optimization(&active, dt);

        // Register agents to proximity grid
        self.grid.clear();
        for &idx in &active {
            if let Some(ag) = &self.agents[idx] {
                let (p, r) = (ag.npos, ag.params.radius);
                self.grid.add_item(idx, p[0] - r, p[2] - r, p[0] + r, p[2] + r);
            }
        }

        self.update_neighbourhood(&active);
        self.update_corners(&active);
        self.trigger_off_mesh_connections(&active);
        self.update_off_mesh_animations(&active, dt);
        self.calculate_steering(&active);
        self.plan_velocities(&active);

        for &idx in &active {
            if let Some(ag) = self.agent_mut(idx) {
                if ag.state == CrowdAgentState::Walking {
                    ag.integrate(dt);
                }
            }
        }

        self.resolve_collisions(&active);
        self.move_along_corridors(&active);
    }

    fn check_path_validity(&mut self, active: &[usize], dt: f32) {
        let half_extents = self.agent_placement_half_extents;

        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking {
                continue;
            }
            ag.target_replan_time += dt;

            let filter = &self.filters[ag.params.query_filter_type as usize];
            let mut replan = false;

            // First check that the current location is valid
            let mut agent_ref = ag.corridor.get_first_poly();
            let mut agent_pos = ag.npos;
            if !self.navquery.is_valid_poly_ref(agent_ref, filter) {
                // Current location is not valid, try to reposition
                (agent_ref, agent_pos) = self
                    .navquery
                    .find_nearest_poly(&ag.npos, &half_extents, filter)
                    .unwrap_or((PolyRef::NULL, ag.npos));

                if !agent_ref.is_valid() {
                    log::debug!("agent {idx} is off the navmesh");
                    ag.corridor.reset(PolyRef::NULL, agent_pos);
                    ag.partial = false;
                    ag.boundary.reset();
                    ag.state = CrowdAgentState::Invalid;
                    continue;
                }

                // Keep the rest of the corridor for the replanner
                ag.corridor.fix_path_start(agent_ref, &agent_pos);
                ag.boundary.reset();
                ag.npos = agent_pos;
                replan = true;
            }

            if !ag.follows_path() {
                continue;
            }

            // Try to recover move request position
            if ag.target_state != MoveRequestState::Failed {
                if !self.navquery.is_valid_poly_ref(ag.target_ref, filter) {
                    (ag.target_ref, ag.target_pos) = self
                        .navquery
                        .find_nearest_poly(&ag.target_pos, &half_extents, filter)
                        .unwrap_or((PolyRef::NULL, ag.target_pos));
                    replan = true;
                }
                if !ag.target_ref.is_valid() {
                    log::debug!("agent {idx} lost its move target");
                    ag.corridor.reset(agent_ref, agent_pos);
                    ag.partial = false;
                    ag.target_state = MoveRequestState::None;
                }
            }

            // If nearby corridor is not valid, replan
            if !ag.corridor.is_valid(CHECK_LOOKAHEAD, &self.navquery, filter) {
                replan = true;
            }

            // If the end of the path is near and it is not the requested
            // location, replan
            if ag.target_state == MoveRequestState::Valid
                && ag.target_replan_time > TARGET_REPLAN_DELAY
                && ag.corridor.get_path_count() < CHECK_LOOKAHEAD
                && ag.corridor.get_last_poly() != ag.target_ref
            {
                replan = true;
            }

            if replan && ag.target_state != MoveRequestState::None {
                log::debug!("agent {idx} replans its path");
                ag.set_move_target(ag.target_ref, ag.target_pos, true);
            }
        }
    }

    fn update_move_requests(&mut self) {
        let mut queue: Vec<(usize, f32)> = Vec::new();

        for idx in 0..self.agents.len() {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state == CrowdAgentState::Invalid || !ag.follows_path() {
                continue;
            }
            let filter = &self.filters[ag.params.query_filter_type as usize];

            if ag.target_state == MoveRequestState::Adjusting {
                let moved = ag.corridor.move_target_position(&ag.target_pos, &mut self.navquery, filter);
                if moved && ag.corridor.get_last_poly() == ag.target_ref {
                    ag.target_state = MoveRequestState::Valid;
                } else {
                    log::debug!("agent {idx} target left the corridor, replanning");
                    ag.set_move_target(ag.target_ref, ag.target_pos, true);
                }
            }

            if ag.target_state == MoveRequestState::Requesting {
                let (path, pos) = quick_search(&mut self.navquery, ag, filter);
                if let Err(status) = ag.corridor.set_corridor(&pos, &path) {
                    log::debug!("agent {idx} quick path rejected: {status}");
                }
                ag.boundary.reset();
                ag.partial = false;

                if path.last() == Some(&ag.target_ref) {
                    ag.target_state = MoveRequestState::Valid;
                    ag.target_replan_time = 0.0;
                } else {
                    // The path is longer or potentially unreachable, full plan
                    ag.target_state = MoveRequestState::WaitingForQueue;
                }
            }

            if ag.target_state == MoveRequestState::WaitingForQueue {
                queue.push((idx, ag.target_replan_time));
            }
        }

        // Agents waiting the longest go first
        queue.sort_by(|a, b| b.1.total_cmp(&a.1));
        queue.truncate(PATH_MAX_AGENTS);
        for (idx, _) in queue {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            let filter = &self.filters[ag.params.query_filter_type as usize];
            ag.target_pathq_ref = self.pathq.request(
                ag.corridor.get_last_poly(),
                ag.target_ref,
                &ag.corridor.get_target(),
                &ag.target_pos,
                filter,
            );
            if ag.target_pathq_ref != PATHQ_INVALID {
                ag.target_state = MoveRequestState::WaitingForPath;
            }
        }

        // Update requests
        self.pathq.update(MAX_ITERS_PER_UPDATE);

        // Process path results
        for idx in 0..self.agents.len() {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.target_state != MoveRequestState::WaitingForPath {
                continue;
            }

            let status = self.pathq.get_request_status(ag.target_pathq_ref);
            if status.is_failure() {
                // Path find failed, retry if the target location is still valid
                ag.target_pathq_ref = PATHQ_INVALID;
                ag.target_state = if ag.target_ref.is_valid() {
                    MoveRequestState::Requesting
                } else {
                    MoveRequestState::Failed
                };
                ag.target_replan_time = 0.0;
                log::debug!("agent {idx} path request failed");
                continue;
            }
            if !status.is_success() {
                continue;
            }

            let result = self.pathq.get_path_result(ag.target_pathq_ref);
            ag.target_pathq_ref = PATHQ_INVALID;

            let mut target_pos = ag.target_pos;
            let merged = result.ok().and_then(|(res, status)| {
                ag.partial = status.has_detail(StatusDetail::PARTIAL_RESULT);
                merge_queued_path(ag.corridor.get_path(), res, self.max_path_result)
            });
            let merged = merged.and_then(|path| {
                let last = *path.last()?;
                if last != ag.target_ref {
                    // Partial path, constrain target position inside the last polygon
                    target_pos = self.navquery.closest_point_on_poly(last, &target_pos).ok()?.0;
                }
                Some(path)
            });

            let merged = merged.filter(|path| ag.corridor.set_corridor(&target_pos, path).is_ok());
            match merged {
                Some(path) => {
                    // Force to update boundary
                    ag.boundary.reset();
                    ag.target_state = MoveRequestState::Valid;
                    log::debug!("agent {idx} got a path of {} polygons", path.len());
                }
                None => {
                    ag.target_state = MoveRequestState::Failed;
                    log::debug!("agent {idx} path could not be merged into its corridor");
                }
            }
            ag.target_replan_time = 0.0;
        }
    }

    fn update_topology_optimization(&mut self, active: &[usize], dt: f32) {
        let mut queue: Vec<(usize, f32)> = Vec::new();
        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking
                || !ag.follows_path()
                || !ag.params.update_flags.contains(UpdateFlags::OPTIMIZE_TOPO)
            {
                continue;
            }
            ag.topology_opt_time += dt;
            if ag.topology_opt_time >= OPT_TIME_THR {
                queue.push((idx, ag.topology_opt_time));
            }
        }

        queue.sort_by(|a, b| b.1.total_cmp(&a.1));
        queue.truncate(OPT_MAX_AGENTS);
        for (idx, _) in queue {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            let filter = &self.filters[ag.params.query_filter_type as usize];
            if let Err(status) = ag.corridor.optimize_path_topology(&mut self.navquery, filter) {
                log::debug!("agent {idx} topology optimization failed: {status}");
            }
            ag.topology_opt_time = 0.0;
        }
    }

    /// Refreshes the local boundary and the neighbour list of walking agents
    fn update_neighbourhood(&mut self, active: &[usize]) {
        let probes = self.probes();

        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking {
                continue;
            }
            let filter = &self.filters[ag.params.query_filter_type as usize];

            // Update the collision boundary after certain distance has been
            // passed or if it has become invalid
            let update_thr = ag.params.collision_query_range * 0.25;
            if vdist_2d_sqr(&ag.npos, ag.boundary.get_center()) > sqr(update_thr)
                || !ag.boundary.is_valid(&self.navquery, filter)
            {
                if let Err(status) = ag.boundary.update(
                    ag.corridor.get_first_poly(),
                    &ag.npos,
                    ag.params.collision_query_range,
                    &mut self.navquery,
                    filter,
                ) {
                    log::debug!("agent {idx} boundary update failed: {status}");
                    ag.boundary.reset();
                }
            }

            ag.neis = get_neighbours(
                &ag.npos,
                ag.params.height,
                ag.params.collision_query_range,
                idx,
                &probes,
                &self.grid,
            );
        }
    }

    /// Finds the next corners to steer to
    fn update_corners(&mut self, active: &[usize]) {
        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking {
                continue;
            }
            if !ag.follows_path() {
                ag.corners.clear();
                continue;
            }
            let filter = &self.filters[ag.params.query_filter_type as usize];

            ag.corners = ag.corridor.find_corners(MAX_CORNERS, &self.navquery).unwrap_or_default();

            // Check to see if the corner after the next corner is directly
            // visible, and short cut to there
            if ag.params.update_flags.contains(UpdateFlags::OPTIMIZE_VIS) && !ag.corners.is_empty() {
                let target = ag.corners[1.min(ag.corners.len() - 1)].pos;
                ag.corridor.optimize_path_visibility(
                    &target,
                    ag.params.path_optimization_range,
                    &self.navquery,
                    filter,
                );
            }
        }
    }

    fn trigger_off_mesh_connections(&mut self, active: &[usize]) {
        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking || !ag.follows_path() {
                continue;
            }

            let trigger_radius = ag.params.radius * 2.25;
            if !ag.over_off_mesh_connection(trigger_radius) {
                continue;
            }
            let Some(con_ref) = ag.corners.last().map(|c| c.reference) else {
                continue;
            };

            // Adjust the path over the off-mesh connection. A failure is
            // left to the path validity check, which replans around bad
            // or blocked connections.
            let Ok(traversal) = ag.corridor.move_over_off_mesh_connection(con_ref, &self.navquery) else {
                continue;
            };

            let tmax = if ag.params.max_speed > 0.0 {
                vdist_2d(&traversal.start_pos, &traversal.end_pos) / ag.params.max_speed * 0.5
            } else {
                0.0
            };
            ag.anim = CrowdAgentAnimation {
                active: true,
                init_pos: ag.npos,
                start_pos: traversal.start_pos,
                end_pos: traversal.end_pos,
                poly_ref: traversal.refs[1],
                t: 0.0,
                tmax,
            };
            ag.state = CrowdAgentState::OffMesh;
            ag.corners.clear();
            ag.neis.clear();
            log::debug!("agent {idx} enters off-mesh connection {con_ref}");
        }
    }

    fn update_off_mesh_animations(&mut self, active: &[usize], dt: f32) {
        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if !ag.anim.active {
                continue;
            }

            let anim = &mut ag.anim;
            anim.t += dt;
            if anim.t > anim.tmax {
                // Reset animation and prepare agent for walking
                anim.active = false;
                ag.state = CrowdAgentState::Walking;
                log::debug!("agent {idx} left off-mesh connection {}", anim.poly_ref);
                continue;
            }

            // Update position
            let ta = anim.tmax * 0.15;
            let tb = anim.tmax;
            ag.npos = if anim.t < ta {
                vlerp(&anim.init_pos, &anim.start_pos, tween(anim.t, 0.0, ta))
            } else {
                vlerp(&anim.start_pos, &anim.end_pos, tween(anim.t, ta, tb))
            };

            // Update velocity
            ag.vel = [0.0; 3];
            ag.dvel = [0.0; 3];
        }
    }

    /// Computes the desired velocity of walking agents
    fn calculate_steering(&mut self, active: &[usize]) {
        let probes = self.probes();

        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking || ag.target_state == MoveRequestState::None {
                continue;
            }

            let mut dvel = if ag.target_state == MoveRequestState::Velocity {
                ag.desired_speed = vlen(&ag.target_pos);
                ag.target_pos
            } else {
                // Calculate steering direction
                let dir = if ag.params.update_flags.contains(UpdateFlags::ANTICIPATE_TURNS) {
                    ag.calc_smooth_steer_direction()
                } else {
                    ag.calc_straight_steer_direction()
                };

                // Slow down at the end of the path
                let slow_down_radius = ag.params.radius * 2.0;
                let speed_scale = if slow_down_radius > 0.0 {
                    ag.get_distance_to_goal(slow_down_radius) / slow_down_radius
                } else {
                    1.0
                };
                ag.desired_speed = ag.params.max_speed;
                vscale(&dir, ag.desired_speed * speed_scale)
            };

            // Separation
            if ag.params.update_flags.contains(UpdateFlags::SEPARATION) && ag.params.collision_query_range > 0.0 {
                let separation_dist = ag.params.collision_query_range;
                let inv_separation_dist = 1.0 / separation_dist;
                let separation_weight = ag.params.separation_weight;

                let mut w = 0.0;
                let mut disp = [0.0; 3];
                for nei in &ag.neis {
                    let Some(other) = probes.get(nei.idx).copied().flatten() else {
                        continue;
                    };
                    let mut diff = vsub(&ag.npos, &other.npos);
                    diff[1] = 0.0;

                    let dist_sqr = vlen_sqr(&diff);
                    if dist_sqr < 0.00001 || dist_sqr > sqr(separation_dist) {
                        continue;
                    }
                    let dist = dist_sqr.sqrt();
                    let weight = separation_weight * (1.0 - sqr(dist * inv_separation_dist));

                    disp = vmad(&disp, &diff, weight / dist);
                    w += 1.0;
                }

                if w > 0.0001 {
                    // Adjust desired velocity
                    dvel = vmad(&dvel, &disp, 1.0 / w);
                    // Clamp desired velocity to desired speed
                    let speed_sqr = vlen_sqr(&dvel);
                    let desired_sqr = sqr(ag.desired_speed);
                    if speed_sqr > desired_sqr {
                        dvel = vscale(&dvel, desired_sqr / speed_sqr);
                    }
                }
            }

            ag.dvel = dvel;
        }
    }

    /// Picks the new velocity of walking agents
    fn plan_velocities(&mut self, active: &[usize]) {
        let probes = self.probes();

        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking {
                continue;
            }

            if !ag.params.update_flags.contains(UpdateFlags::OBSTACLE_AVOIDANCE) {
                // Without velocity planning the desired velocity is used as is
                ag.nvel = ag.dvel;
                continue;
            }

            self.obstacle_query.reset();

            // Add neighbours as obstacles
            for nei in &ag.neis {
                if let Some(other) = probes.get(nei.idx).copied().flatten() {
                    self.obstacle_query.add_circle(&other.npos, other.radius, &other.vel, &other.dvel);
                }
            }

            // Append neighbour segments as obstacles
            for j in 0..ag.boundary.get_segment_count() {
                let Some(s) = ag.boundary.get_segment(j) else {
                    continue;
                };
                let p = [s[0], s[1], s[2]];
                let q = [s[3], s[4], s[5]];
                // Skip segments facing away from the agent
                if tri_area_2d(&ag.npos, &p, &q) < 0.0 {
                    continue;
                }
                self.obstacle_query.add_segment(&p, &q);
            }

            // Sample new safe velocity
            let params = &self.obstacle_query_params[ag.params.obstacle_avoidance_type as usize];
            let sampled = self.obstacle_query.sample_velocity_adaptive(
                &ag.npos,
                ag.params.radius,
                ag.params.max_speed,
                &ag.vel,
                &ag.dvel,
                params,
                None,
            );
            ag.nvel = sampled.vel;
            self.velocity_sample_count += sampled.sample_count;
        }
    }

    /// Pushes overlapping agents apart
    fn resolve_collisions(&mut self, active: &[usize]) {
        for _ in 0..COLLISION_RESOLVE_ITERATIONS {
            let probes = self.probes();

            for &idx in active {
                let Some(ag) = self.agents[idx].as_mut() else {
                    continue;
                };
                if ag.state != CrowdAgentState::Walking {
                    continue;
                }

                let mut disp = [0.0; 3];
                let mut w = 0.0;
                for nei in &ag.neis {
                    let Some(other) = probes.get(nei.idx).copied().flatten() else {
                        continue;
                    };
                    let mut diff = vsub(&ag.npos, &other.npos);
                    diff[1] = 0.0;

                    let combined = ag.params.radius + other.radius;
                    let dist_sqr = vlen_sqr(&diff);
                    if dist_sqr > sqr(combined) {
                        continue;
                    }
                    let dist = dist_sqr.sqrt();

                    let pen = if dist < 0.0001 {
                        // Agents on top of each other, try to choose diverging
                        // separation directions
                        diff = if idx > nei.idx {
                            [-ag.dvel[2], 0.0, ag.dvel[0]]
                        } else {
                            [ag.dvel[2], 0.0, -ag.dvel[0]]
                        };
                        0.01
                    } else {
                        (1.0 / dist) * ((combined - dist) * 0.5) * COLLISION_RESOLVE_FACTOR
                    };

                    disp = vmad(&disp, &diff, pen);
                    w += 1.0;
                }

                if w > 0.0001 {
                    disp = vscale(&disp, 1.0 / w);
                }
                ag.disp = disp;
            }

            for &idx in active {
                if let Some(ag) = self.agent_mut(idx) {
                    if ag.state == CrowdAgentState::Walking {
                        ag.npos = vadd(&ag.npos, &ag.disp);
                    }
                }
            }
        }
    }

    /// Constrains the integrated positions to the navigation mesh
    fn move_along_corridors(&mut self, active: &[usize]) {
        for &idx in active {
            let Some(ag) = self.agents[idx].as_mut() else {
                continue;
            };
            if ag.state != CrowdAgentState::Walking {
                continue;
            }
            let filter = &self.filters[ag.params.query_filter_type as usize];

            // Move along navmesh and get the valid constrained position back
            ag.corridor.move_position(&ag.npos, &mut self.navquery, filter);
            ag.npos = ag.corridor.get_pos();

            // If not using path, truncate the corridor to just one poly
            if !ag.follows_path() {
                ag.corridor.reset(ag.corridor.get_first_poly(), ag.npos);
                ag.partial = false;
            }
        }
    }
}

/// Short sliced search from the agent towards its target
///
/// Returns the path and the corridor target to use. The target is clamped
/// into the last polygon of a partial path; when nothing was found the
/// agent keeps its current polygon and position.
fn quick_search(navquery: &mut NavMeshQuery, ag: &CrowdAgent, filter: &QueryFilter) -> (Vec<PolyRef>, [f32; 3]) {
    let first = ag.corridor.get_first_poly();

    let found = navquery
        .init_sliced_find_path(first, ag.target_ref, &ag.npos, &ag.target_pos, filter)
        .and_then(|_| {
            // A failed update is reported again by the finalize call
            if let Err(status) = navquery.update_sliced_find_path(QUICK_SEARCH_ITERS) {
                log::debug!("quick path search failed: {status}");
            }
            if ag.target_replan {
                navquery.finalize_sliced_find_path_partial(ag.corridor.get_path(), QUICK_SEARCH_RESULT)
            } else {
                navquery.finalize_sliced_find_path(QUICK_SEARCH_RESULT)
            }
        });

    let request = found.ok().and_then(|result| {
        let last = *result.polys.last()?;
        let pos = if last != ag.target_ref {
            navquery.closest_point_on_poly(last, &ag.target_pos).ok()?.0
        } else {
            ag.target_pos
        };
        Some((result.polys, pos))
    });

    request.unwrap_or_else(|| (vec![first], ag.npos))
}

/// Prepends the current corridor to a path that was planned from its last
/// polygon
fn merge_queued_path(corridor: &[PolyRef], res: Vec<PolyRef>, max_path: usize) -> Option<Vec<PolyRef>> {
    if res.is_empty() || corridor.last() != res.first() {
        return None;
    }

    let keep = corridor.len() - 1;
    let mut merged = Vec::with_capacity(max_path);
    merged.extend_from_slice(&corridor[..keep]);
    merged.extend(res.into_iter().take(max_path.saturating_sub(keep)));
    remove_trackbacks(&mut merged);

    if merged.is_empty() {
        return None;
    }
    Some(merged)
}

/// Removes `A B A` detours, keeping the second `A`
fn remove_trackbacks(path: &mut Vec<PolyRef>) {
    let mut j = 1;
    while j + 1 < path.len() {
        if path[j - 1] == path[j + 1] {
            path.drain(j - 1..j + 1);
            j = (j - 1).max(1);
        } else {
            j += 1;
        }
    }
}

/// Inserts a neighbour keeping the list sorted by distance, nearest first
fn add_neighbour(neis: &mut Vec<CrowdNeighbour>, idx: usize, dist: f32) {
    let insert_idx = neis.iter().position(|n| dist <= n.dist).unwrap_or(neis.len());
    if insert_idx >= MAX_NEIGHBOURS {
        return;
    }
    neis.insert(insert_idx, CrowdNeighbour { idx, dist });
    neis.truncate(MAX_NEIGHBOURS);
}

fn get_neighbours(
    pos: &[f32; 3],
    height: f32,
    range: f32,
    skip: usize,
    probes: &[Option<AgentProbe>],
    grid: &ProximityGrid,
) -> Vec<CrowdNeighbour> {
    let mut result = Vec::with_capacity(MAX_NEIGHBOURS);
    let ids = grid.query_items(pos[0] - range, pos[2] - range, pos[0] + range, pos[2] + range, MAX_GRID_QUERY);

    for id in ids {
        if id == skip {
            continue;
        }
        let Some(other) = probes.get(id).copied().flatten() else {
            continue;
        };

        // Check for overlap
        let mut diff = vsub(pos, &other.npos);
        if diff[1].abs() >= (height + other.height) / 2.0 {
            continue;
        }
        diff[1] = 0.0;
        let dist_sqr = vlen_sqr(&diff);
        if dist_sqr > sqr(range) {
            continue;
        }

        add_neighbour(&mut result, id, dist_sqr);
    }
    result
}

fn tween(t: f32, t0: f32, t1: f32) -> f32 {
    if t1 - t0 <= 0.0 {
        return 1.0;
    }
    ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
}
