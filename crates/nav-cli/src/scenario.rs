//! Crowd scenario files
//!
//! A scenario is a JSON document listing agents with their start position
//! and either a target position or a constant velocity. Missing fields take
//! their defaults, so the smallest scenario is a list of positions.
//!
//! ```json
//! {
//!   "steps": 200,
//!   "agents": [
//!     { "position": [0.5, 0.0, 0.5], "target": [8.5, 0.0, 8.5] },
//!     { "position": [8.5, 0.0, 0.5], "velocity": [-1.0, 0.0, 0.0],
//!       "params": { "radius": 0.4, "max_speed": 2.0 } }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use nav_crowd::{AgentSnapshot, Crowd, CrowdAgentParams, ObstacleAvoidanceParams, MAX_OBSTAVOIDANCE_PARAMS};
use nav_detour::NavMesh;
use serde::{Deserialize, Serialize};

fn default_dt() -> f32 {
    0.1
}

fn default_steps() -> usize {
    100
}

fn default_max_agents() -> usize {
    64
}

fn default_max_agent_radius() -> f32 {
    0.6
}

/// Crowd scenario loaded from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Seconds per update
    #[serde(default = "default_dt")]
    pub dt: f32,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    #[serde(default = "default_max_agent_radius")]
    pub max_agent_radius: f32,
    /// Replacement avoidance profiles, starting at profile 0
    #[serde(default)]
    pub avoidance: Vec<ObstacleAvoidanceParams>,
    pub agents: Vec<ScenarioAgent>,
}

/// Agent entry of a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAgent {
    pub position: [f32; 3],
    #[serde(default)]
    pub target: Option<[f32; 3]>,
    #[serde(default)]
    pub velocity: Option<[f32; 3]>,
    #[serde(default)]
    pub params: CrowdAgentParams,
}

/// Final state of a scenario agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    /// Position of the agent in the scenario file
    pub entry: usize,
    /// Crowd slot, `None` when the agent could not be added
    pub index: Option<usize>,
    pub snapshot: Option<AgentSnapshot>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scenario file: {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            bail!("Scenario time step must be positive, got {}", self.dt);
        }
        if self.avoidance.len() > MAX_OBSTAVOIDANCE_PARAMS {
            bail!(
                "Scenario has {} avoidance profiles, at most {MAX_OBSTAVOIDANCE_PARAMS} are supported",
                self.avoidance.len()
            );
        }
        if let Some(i) = self.agents.iter().position(|a| a.target.is_some() && a.velocity.is_some()) {
            bail!("Scenario agent {i} has both a target and a velocity");
        }
        Ok(())
    }

    /// Runs the scenario for `steps` updates on `mesh`
    pub fn run(&self, mesh: &NavMesh, steps: usize) -> Vec<AgentReport> {
        let mut crowd = Crowd::new(self.max_agents, self.max_agent_radius, mesh);
        for (i, params) in self.avoidance.iter().enumerate() {
            crowd.set_obstacle_avoidance_params(i, *params);
        }

        let mut slots = Vec::with_capacity(self.agents.len());
        for (entry, agent) in self.agents.iter().enumerate() {
            let index = crowd.add_agent(agent.position, agent.params.clone());
            match index {
                Some(idx) => self.start_agent(&mut crowd, entry, idx, agent),
                None => log::warn!("scenario agent {entry} at {:?} could not be added", agent.position),
            }
            slots.push(index);
        }

        for step in 0..steps {
            crowd.update(self.dt);
            log::trace!("step {step}: {} velocity samples", crowd.velocity_sample_count());
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(entry, index)| AgentReport {
                entry,
                index,
                snapshot: index.and_then(|idx| crowd.agent_snapshot(idx)),
            })
            .collect()
    }

    fn start_agent(&self, crowd: &mut Crowd, entry: usize, idx: usize, agent: &ScenarioAgent) {
        if let Some(vel) = agent.velocity {
            crowd.request_move_velocity(idx, vel);
            return;
        }
        let Some(target) = agent.target else {
            return;
        };

        let filter_idx = agent.params.query_filter_type as usize;
        let extents = crowd.query_extents();
        let nearest = crowd
            .get_filter(filter_idx)
            .and_then(|filter| crowd.nav_query().find_nearest_poly(&target, &extents, filter).ok());
        match nearest {
            Some((target_ref, pos)) if target_ref.is_valid() => {
                crowd.request_move_target(idx, target_ref, pos);
            }
            _ => log::warn!("scenario agent {entry} target {target:?} is not on the mesh"),
        }
    }
}
