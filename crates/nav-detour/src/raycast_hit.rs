//! Result and options of surface raycasts

use crate::PolyRef;

/// Options for [`crate::NavMeshQuery::raycast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RaycastOptions {
    /// Accumulate the filter cost of the traversed polygons
    pub use_costs: bool,
}

/// Result of a surface raycast
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the ray, `f32::MAX` when the ray reaches its end
    pub t: f32,
    /// Normal of the wall that was hit
    pub hit_normal: [f32; 3],
    /// Edge of the last visited polygon that was hit, if any
    pub hit_edge_index: Option<usize>,
    /// Visited polygons, starting with the start polygon
    pub path: Vec<PolyRef>,
    /// Cost of the traversed path when costs were requested
    pub path_cost: f32,
}

impl RaycastHit {
    /// A hit that reached the end of the ray
    pub fn no_hit() -> Self {
        Self {
            t: f32::MAX,
            hit_normal: [0.0; 3],
            hit_edge_index: None,
            path: Vec::new(),
            path_cost: 0.0,
        }
    }

    /// Returns true if the ray stopped at a wall
    pub fn hit_wall(&self) -> bool {
        self.t < f32::MAX
    }

    /// Point where the ray stopped
    pub fn hit_point(&self, start: &[f32; 3], end: &[f32; 3]) -> [f32; 3] {
        if !self.hit_wall() {
            return *end;
        }
        nav_common::vlerp(start, end, self.t)
    }
}
