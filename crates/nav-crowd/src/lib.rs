//! Multi-agent crowd simulation on navigation meshes
//!
//! This crate moves groups of agents over a shared navigation mesh. Each
//! agent follows a path corridor and is steered locally around its
//! neighbours and the nearby walls.
//!
//! # Features
//!
//! - **Agent Management**: fixed pool of agent slots with per-agent
//!   parameters, query filters and avoidance profiles
//! - **Path Following**: corridors patched as agents move, replanned
//!   through an amortized path queue, shortcut by visibility and topology
//!   optimization
//! - **Collision Avoidance**: velocity-space sampling against moving agents
//!   and wall segments, followed by iterative overlap resolution
//! - **Off-mesh Connections**: agents traverse connections as a timed
//!   animation before walking on
//! - **Proximity Queries**: spatial grid for neighbour lookups
//!
//! # Example
//!
//! ```rust,ignore
//! use nav_crowd::{Crowd, CrowdAgentParams};
//!
//! let mut crowd = Crowd::new(128, 0.6, &nav_mesh);
//!
//! let params = CrowdAgentParams {
//!     radius: 0.6,
//!     max_speed: 3.5,
//!     ..Default::default()
//! };
//! let agent = crowd.add_agent(start_pos, params).expect("no room or no mesh at start");
//!
//! crowd.request_move_target(agent, target_poly, target_pos);
//! for _ in 0..100 {
//!     crowd.update(0.1);
//! }
//! let pos = crowd.get_agent(agent).map(|a| a.get_pos());
//! ```
//!
//! # Architecture
//!
//! - [`Crowd`]: simulation manager owning the agents
//! - [`PathCorridor`]: polygon corridor of one agent
//! - [`LocalBoundary`]: cached walls around one agent
//! - [`ObstacleAvoidanceQuery`]: velocity sampler
//! - [`ProximityGrid`]: spatial index for neighbour queries

pub mod crowd;
pub mod local_boundary;
pub mod obstacle_avoidance;
pub mod path_corridor;
pub mod proximity_grid;

#[cfg(test)]
pub(crate) mod test_mesh_helpers;

#[cfg(test)]
mod crowd_tests;
#[cfg(test)]
mod path_corridor_tests;

pub use crowd::{
    AgentSnapshot, Crowd, CrowdAgent, CrowdAgentAnimation, CrowdAgentParams, CrowdAgentState,
    CrowdNeighbour, MAX_CORNERS, MAX_NEIGHBOURS, MAX_OBSTAVOIDANCE_PARAMS, MAX_QUERY_FILTER_TYPE,
    MoveRequestState, UpdateFlags,
};
pub use local_boundary::LocalBoundary;
pub use obstacle_avoidance::{
    AvoidanceSample, ObstacleAvoidanceDebugData, ObstacleAvoidanceParams, ObstacleAvoidanceQuery,
    ObstacleCircle, ObstacleSegment, SampledVelocity,
};
pub use path_corridor::{CorridorCorners, CorridorSnapshot, OffMeshTraversal, PathCorridor};
pub use proximity_grid::ProximityGrid;
