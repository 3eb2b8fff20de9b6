//! Common math and geometry used by the navigation mesh and crowd crates
//!
//! Positions are plain `[f32; 3]` arrays with `y` up. Most 2D helpers work
//! on the xz-plane and ignore the `y` component.

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;
