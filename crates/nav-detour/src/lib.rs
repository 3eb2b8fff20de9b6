//! Tiled navigation mesh storage and path queries
//!
//! This crate stores a navigation mesh as a set of tiles and answers spatial
//! and path queries over it.
//!
//! # Features
//!
//! - **Tiled storage**: tiles are added and removed at runtime and linked to
//!   their neighbours; polygon references carry a salt so references into a
//!   removed tile are rejected.
//! - **Queries**: nearest polygon, A* path search (immediate and sliced),
//!   Dijkstra floods, surface raycasts, string pulling, wall queries and
//!   random sampling.
//! - **Binary format**: tiles and whole meshes serialize to a stable little
//!   endian layout guarded by magic and version fields.
//!
//! # Example
//!
//! ```rust,ignore
//! use nav_detour::{NavMesh, NavMeshQuery, QueryFilter};
//!
//! let mesh = NavMesh::from_bytes(&bytes)?;
//! let mut query = NavMeshQuery::new(&mesh, 2048);
//! let filter = QueryFilter::default();
//!
//! let (start_ref, start) = query.find_nearest_poly(&start_pos, &[2.0, 4.0, 2.0], &filter)?;
//! let (end_ref, end) = query.find_nearest_poly(&end_pos, &[2.0, 4.0, 2.0], &filter)?;
//! let path = query.find_path(start_ref, end_ref, &start, &end, &filter, 256)?;
//! let corners = query.find_straight_path(&start, &end, &path.polys, 32, StraightPathOptions::empty())?;
//! ```

pub mod binary_format;
pub mod error;
pub mod nav_mesh;
pub mod nav_mesh_builder;
pub mod nav_mesh_query;
pub mod node_pool;
pub mod path_queue;
pub mod query_filter;
pub mod raycast_hit;
pub mod status;

#[cfg(test)]
pub(crate) mod test_mesh_helpers;


use bitflags::bitflags;

pub use error::Error;
pub use nav_mesh::{
    BVNode, Link, MeshTile, NavMesh, OffMeshConnection, Poly, PolyDetail, TileHeader,
};
pub use nav_mesh_builder::{NavMeshBuilder, NavMeshCreateParams};
pub use nav_mesh_query::{
    FindPathResult, NavMeshQuery, PolysAroundResult, StraightPath, StraightPathFlags,
    StraightPathOptions, StraightPathPoint, WallDistance, WallSegment,
};
pub use path_queue::{PATHQ_INVALID, PathQueue, PathQueueRef};
pub use query_filter::QueryFilter;
pub use raycast_hit::{RaycastHit, RaycastOptions};
pub use status::{Completion, Result, Status, StatusDetail};

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Number of area ids (areas are `0..MAX_AREAS`)
pub const MAX_AREAS: usize = 64;

/// Number of bits of a polygon reference used for the salt
pub const SALT_BITS: u32 = 6;
/// Number of bits of a polygon reference used for the tile index
pub const TILE_BITS: u32 = 10;
/// Number of bits of a polygon reference used for the polygon index
pub const POLY_BITS: u32 = 16;

/// Flag marking a polygon edge as a portal to a neighbouring tile
pub const EXT_LINK: u16 = 0x8000;

/// Null index in polygon mesh vertex and neighbour lists
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Off-mesh connection flag: the connection can be traversed both ways
pub const OFFMESH_CON_BIDIR: u8 = 1;

/// Reference to a polygon (or, with polygon index 0, to a tile)
///
/// Layout: `salt | tile index | polygon index`. Zero is the null reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

/// Reference to a tile. Tile references share the polygon reference layout.
pub type TileRef = PolyRef;

impl PolyRef {
    /// The null reference
    pub const NULL: PolyRef = PolyRef(0);

    /// Creates a reference from its raw value
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// Returns true if the reference is not null
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Packs salt, tile index and polygon index into a reference
    pub fn encode(salt: u32, tile: u32, poly: u32) -> Self {
        let salt_mask = (1u32 << SALT_BITS) - 1;
        let tile_mask = (1u32 << TILE_BITS) - 1;
        let poly_mask = (1u32 << POLY_BITS) - 1;
        Self(
            ((salt & salt_mask) << (POLY_BITS + TILE_BITS))
                | ((tile & tile_mask) << POLY_BITS)
                | (poly & poly_mask),
        )
    }

    /// Splits the reference into salt, tile index and polygon index
    pub fn decode(&self) -> (u32, u32, u32) {
        (self.salt(), self.tile_index(), self.poly_index())
    }

    /// Salt (tile generation) part of the reference
    pub fn salt(&self) -> u32 {
        (self.0 >> (POLY_BITS + TILE_BITS)) & ((1 << SALT_BITS) - 1)
    }

    /// Tile index part of the reference
    pub fn tile_index(&self) -> u32 {
        (self.0 >> POLY_BITS) & ((1 << TILE_BITS) - 1)
    }

    /// Polygon index part of the reference
    pub fn poly_index(&self) -> u32 {
        self.0 & ((1 << POLY_BITS) - 1)
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// Polygon flags used by query filters
    ///
    /// The named flags are the conventional meanings; any 16-bit mask is
    /// accepted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct PolyFlags: u16 {
        /// Ability to walk (ground, grass, road)
        const WALK = 0x01;
        /// Ability to swim (water)
        const SWIM = 0x02;
        /// Ability to move through doors
        const DOOR = 0x04;
        /// Ability to jump
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;

        const _ = !0;
    }
}

/// Polygon type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum PolyType {
    /// Regular ground polygon
    #[default]
    Ground = 0,
    /// Off-mesh connection represented as a two-vertex polygon
    OffMeshConnection = 1,
}

/// Parameters of a tiled navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World-space origin of the tile grid
    pub origin: [f32; 3],
    /// Width of each tile along the x-axis
    pub tile_width: f32,
    /// Height of each tile along the z-axis
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: i32,
    /// Maximum number of polygons per tile
    pub max_polys_per_tile: i32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            tile_width: 32.0,
            tile_height: 32.0,
            max_tiles: 128,
            max_polys_per_tile: 4096,
        }
    }
}
