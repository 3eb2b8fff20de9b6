//! Binary layouts of tiles, tile state and mesh sets
//!
//! All values are little endian. A tile is a [`TileHeader`] followed by
//! vertices, polygons, reserved link slots, detail meshes, detail vertices,
//! detail triangles, BV nodes and off-mesh connections. A mesh set wraps
//! the mesh parameters and a list of `(tile ref, tile data)` records.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::nav_mesh::{BVNode, MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader};
use crate::{
    MAX_VERTS_PER_POLY, NavMeshParams, PolyFlags, PolyRef, PolyType, Result, Status, StatusDetail,
    TileRef, EXT_LINK,
};

/// Magic number of tile data ('DNAV')
pub const NAVMESH_MAGIC: u32 = 0x5641_4E44;

/// Current tile data version
pub const NAVMESH_VERSION: u32 = 7;

/// Magic number of tile state blobs ('DNMS')
pub const NAVMESH_STATE_MAGIC: u32 = 0x534D_4E44;

/// Current tile state version
pub const NAVMESH_STATE_VERSION: u32 = 1;

/// Magic number of mesh sets ('MSET')
pub const NAVMESH_SET_MAGIC: u32 = 0x5445_534D;

/// Current mesh set version
pub const NAVMESH_SET_VERSION: u32 = 1;

/// Null link value in serialized polygons
const NULL_LINK: u32 = 0xffff_ffff;

const HEADER_SIZE: usize = 100;
const POLY_SIZE: usize = 32;
const LINK_SIZE: usize = 12;
const DETAIL_MESH_SIZE: usize = 12;
const BV_NODE_SIZE: usize = 16;
const OFF_MESH_CON_SIZE: usize = 36;
const TILE_STATE_HEADER_SIZE: usize = 12;
const POLY_STATE_SIZE: usize = 4;

fn read_vec3<R: Read>(reader: &mut R) -> Result<[f32; 3]> {
    Ok([
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ])
}

fn write_vec3<W: Write>(writer: &mut W, v: &[f32; 3]) -> Result<()> {
    for &c in v {
        writer.write_f32::<LittleEndian>(c)?;
    }
    Ok(())
}

fn read_header<R: Read>(reader: &mut R) -> Result<TileHeader> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != NAVMESH_MAGIC {
        return Err(Status::failure(StatusDetail::WRONG_MAGIC));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != NAVMESH_VERSION {
        return Err(Status::failure(StatusDetail::WRONG_VERSION));
    }

    Ok(TileHeader {
        x: reader.read_i32::<LittleEndian>()?,
        y: reader.read_i32::<LittleEndian>()?,
        layer: reader.read_i32::<LittleEndian>()?,
        user_id: reader.read_u32::<LittleEndian>()?,
        poly_count: reader.read_i32::<LittleEndian>()?,
        vert_count: reader.read_i32::<LittleEndian>()?,
        max_link_count: reader.read_i32::<LittleEndian>()?,
        detail_mesh_count: reader.read_i32::<LittleEndian>()?,
        detail_vert_count: reader.read_i32::<LittleEndian>()?,
        detail_tri_count: reader.read_i32::<LittleEndian>()?,
        bv_node_count: reader.read_i32::<LittleEndian>()?,
        off_mesh_con_count: reader.read_i32::<LittleEndian>()?,
        off_mesh_base: reader.read_i32::<LittleEndian>()?,
        walkable_height: reader.read_f32::<LittleEndian>()?,
        walkable_radius: reader.read_f32::<LittleEndian>()?,
        walkable_climb: reader.read_f32::<LittleEndian>()?,
        bmin: read_vec3(reader)?,
        bmax: read_vec3(reader)?,
        bv_quant_factor: reader.read_f32::<LittleEndian>()?,
    })
}

fn write_header<W: Write>(writer: &mut W, h: &TileHeader) -> Result<()> {
    writer.write_u32::<LittleEndian>(NAVMESH_MAGIC)?;
    writer.write_u32::<LittleEndian>(NAVMESH_VERSION)?;
    writer.write_i32::<LittleEndian>(h.x)?;
    writer.write_i32::<LittleEndian>(h.y)?;
    writer.write_i32::<LittleEndian>(h.layer)?;
    writer.write_u32::<LittleEndian>(h.user_id)?;
    writer.write_i32::<LittleEndian>(h.poly_count)?;
    writer.write_i32::<LittleEndian>(h.vert_count)?;
    writer.write_i32::<LittleEndian>(h.max_link_count)?;
    writer.write_i32::<LittleEndian>(h.detail_mesh_count)?;
    writer.write_i32::<LittleEndian>(h.detail_vert_count)?;
    writer.write_i32::<LittleEndian>(h.detail_tri_count)?;
    writer.write_i32::<LittleEndian>(h.bv_node_count)?;
    writer.write_i32::<LittleEndian>(h.off_mesh_con_count)?;
    writer.write_i32::<LittleEndian>(h.off_mesh_base)?;
    writer.write_f32::<LittleEndian>(h.walkable_height)?;
    writer.write_f32::<LittleEndian>(h.walkable_radius)?;
    writer.write_f32::<LittleEndian>(h.walkable_climb)?;
    write_vec3(writer, &h.bmin)?;
    write_vec3(writer, &h.bmax)?;
    writer.write_f32::<LittleEndian>(h.bv_quant_factor)?;
    Ok(())
}

/// Byte size of the tile body described by a header, `None` if a count is
/// negative or the size overflows
fn tile_data_size(h: &TileHeader) -> Option<usize> {
    let count = |c: i32| usize::try_from(c).ok();
    let sections = [
        (count(h.vert_count)?, 12),
        (count(h.poly_count)?, POLY_SIZE),
        (count(h.max_link_count)?, LINK_SIZE),
        (count(h.detail_mesh_count)?, DETAIL_MESH_SIZE),
        (count(h.detail_vert_count)?, 12),
        (count(h.detail_tri_count)?, 4),
        (count(h.bv_node_count)?, BV_NODE_SIZE),
        (count(h.off_mesh_con_count)?, OFF_MESH_CON_SIZE),
    ];
    sections
        .iter()
        .try_fold(HEADER_SIZE, |acc, &(n, size)| acc.checked_add(n.checked_mul(size)?))
}

/// Reads and validates the header of serialized tile data
pub fn read_tile_header(data: &[u8]) -> Result<TileHeader> {
    let header = read_header(&mut Cursor::new(data))?;
    match tile_data_size(&header) {
        Some(size) if size <= data.len() => Ok(header),
        _ => Err(Status::invalid_param()),
    }
}

fn read_poly<R: Read>(reader: &mut R) -> Result<Poly> {
    let first_link = reader.read_u32::<LittleEndian>()?;
    let mut verts = [0u16; MAX_VERTS_PER_POLY];
    for v in &mut verts {
        *v = reader.read_u16::<LittleEndian>()?;
    }
    let mut neis = [0u16; MAX_VERTS_PER_POLY];
    for n in &mut neis {
        *n = reader.read_u16::<LittleEndian>()?;
    }
    let flags = PolyFlags::from_bits_retain(reader.read_u16::<LittleEndian>()?);
    let vert_count = reader.read_u8()?;
    let area_and_type = reader.read_u8()?;

    let poly_type = if area_and_type >> 6 == PolyType::OffMeshConnection as u8 {
        PolyType::OffMeshConnection
    } else {
        PolyType::Ground
    };
    let mut poly = Poly::new(area_and_type & 0x3f, poly_type, flags);
    poly.first_link = (first_link != NULL_LINK).then_some(first_link as usize);
    poly.verts = verts;
    poly.neis = neis;
    poly.vert_count = vert_count;
    Ok(poly)
}

fn write_poly<W: Write>(writer: &mut W, poly: &Poly) -> Result<()> {
    // Links are rebuilt when the tile is added, so none are stored
    writer.write_u32::<LittleEndian>(NULL_LINK)?;
    for &v in &poly.verts {
        writer.write_u16::<LittleEndian>(v)?;
    }
    for &n in &poly.neis {
        writer.write_u16::<LittleEndian>(n)?;
    }
    writer.write_u16::<LittleEndian>(poly.flags.bits())?;
    writer.write_u8(poly.vert_count)?;
    writer.write_u8((poly.area & 0x3f) | ((poly.poly_type as u8) << 6))?;
    Ok(())
}

fn read_off_mesh_con<R: Read>(reader: &mut R) -> Result<OffMeshConnection> {
    let mut pos = [0.0; 6];
    for p in &mut pos {
        *p = reader.read_f32::<LittleEndian>()?;
    }
    Ok(OffMeshConnection {
        pos,
        rad: reader.read_f32::<LittleEndian>()?,
        poly: reader.read_u16::<LittleEndian>()?,
        flags: reader.read_u8()?,
        side: reader.read_u8()?,
        user_id: reader.read_u32::<LittleEndian>()?,
    })
}

fn write_off_mesh_con<W: Write>(writer: &mut W, con: &OffMeshConnection) -> Result<()> {
    for &p in &con.pos {
        writer.write_f32::<LittleEndian>(p)?;
    }
    writer.write_f32::<LittleEndian>(con.rad)?;
    writer.write_u16::<LittleEndian>(con.poly)?;
    writer.write_u8(con.flags)?;
    writer.write_u8(con.side)?;
    writer.write_u32::<LittleEndian>(con.user_id)?;
    Ok(())
}

/// Parses tile data into an unlinked tile
pub(crate) fn read_tile(data: &[u8]) -> Result<MeshTile> {
    let header = read_tile_header(data)?;
    let mut cursor = Cursor::new(data);
    cursor.set_position(HEADER_SIZE as u64);

    let mut tile = MeshTile::default();

    let vert_count = header.vert_count as usize;
    tile.verts = (0..vert_count * 3)
        .map(|_| cursor.read_f32::<LittleEndian>())
        .collect::<std::io::Result<_>>()?;

    tile.polys = (0..header.poly_count)
        .map(|_| read_poly(&mut cursor))
        .collect::<Result<_>>()?;

    // Link slots are reserved space only
    cursor.set_position(cursor.position() + (header.max_link_count as usize * LINK_SIZE) as u64);

    for _ in 0..header.detail_mesh_count {
        let detail = PolyDetail {
            vert_base: cursor.read_u32::<LittleEndian>()?,
            tri_base: cursor.read_u32::<LittleEndian>()?,
            vert_count: cursor.read_u8()?,
            tri_count: cursor.read_u8()?,
        };
        cursor.read_u16::<LittleEndian>()?;
        tile.detail_meshes.push(detail);
    }

    tile.detail_verts = (0..header.detail_vert_count as usize * 3)
        .map(|_| cursor.read_f32::<LittleEndian>())
        .collect::<std::io::Result<_>>()?;

    let mut tris = vec![0u8; header.detail_tri_count as usize * 4];
    cursor.read_exact(&mut tris)?;
    tile.detail_tris = tris;

    for _ in 0..header.bv_node_count {
        let mut node = BVNode::default();
        for v in &mut node.bmin {
            *v = cursor.read_u16::<LittleEndian>()?;
        }
        for v in &mut node.bmax {
            *v = cursor.read_u16::<LittleEndian>()?;
        }
        node.i = cursor.read_i32::<LittleEndian>()?;
        tile.bv_tree.push(node);
    }

    tile.off_mesh_cons = (0..header.off_mesh_con_count)
        .map(|_| read_off_mesh_con(&mut cursor))
        .collect::<Result<_>>()?;

    for poly in &mut tile.polys {
        poly.first_link = None;
    }

    tile.header = Some(header);
    validate_tile(&tile)?;
    Ok(tile)
}

/// Rejects tiles whose indices point outside their own buffers
fn validate_tile(tile: &MeshTile) -> Result<()> {
    let invalid = Err(Status::invalid_param());
    let Some(header) = tile.header.as_ref() else {
        return invalid;
    };
    let vert_count = tile.verts.len() / 3;
    let poly_count = tile.polys.len();

    if header.off_mesh_base < 0 || header.off_mesh_base as usize > poly_count {
        return invalid;
    }

    for poly in &tile.polys {
        let nv = poly.vert_count as usize;
        if nv > MAX_VERTS_PER_POLY
            || (poly.is_off_mesh_connection() && nv != 2)
            || (!poly.is_off_mesh_connection() && nv < 3)
        {
            return invalid;
        }
        if poly.vert_indices().iter().any(|&v| v as usize >= vert_count) {
            return invalid;
        }
        for &nei in &poly.neis[..nv] {
            if nei != 0 && nei & EXT_LINK == 0 && (nei - 1) as usize >= poly_count {
                return invalid;
            }
        }
    }

    let detail_verts = tile.detail_verts.len() / 3;
    let detail_tris = tile.detail_tris.len() / 4;
    for (i, pd) in tile.detail_meshes.iter().enumerate() {
        let Some(poly) = tile.polys.get(i) else {
            return invalid;
        };
        if pd.vert_base as usize + pd.vert_count as usize > detail_verts
            || pd.tri_base as usize + pd.tri_count as usize > detail_tris
        {
            return invalid;
        }
        let max_index = poly.vert_count as usize + pd.vert_count as usize;
        let tris = &tile.detail_tris
            [pd.tri_base as usize * 4..(pd.tri_base as usize + pd.tri_count as usize) * 4];
        if tris.chunks(4).any(|t| t[..3].iter().any(|&v| v as usize >= max_index)) {
            return invalid;
        }
    }

    // Leaves index polygons, internal nodes escape forward within the tree
    let node_count = tile.bv_tree.len();
    let bad_node = tile.bv_tree.iter().enumerate().any(|(j, n)| {
        if n.i >= 0 {
            n.i as usize >= poly_count
        } else {
            n.i.unsigned_abs() as usize > node_count - j
        }
    });
    if bad_node {
        return invalid;
    }

    for con in &tile.off_mesh_cons {
        match tile.polys.get(con.poly as usize) {
            Some(p) if p.is_off_mesh_connection() => {}
            _ => return invalid,
        }
    }

    Ok(())
}

/// Serializes a loaded tile
pub(crate) fn write_tile(tile: &MeshTile) -> Result<Vec<u8>> {
    let Some(src) = tile.header.as_ref() else {
        return Err(Status::invalid_param());
    };
    let header = TileHeader {
        poly_count: tile.polys.len() as i32,
        vert_count: (tile.verts.len() / 3) as i32,
        detail_mesh_count: tile.detail_meshes.len() as i32,
        detail_vert_count: (tile.detail_verts.len() / 3) as i32,
        detail_tri_count: (tile.detail_tris.len() / 4) as i32,
        bv_node_count: tile.bv_tree.len() as i32,
        off_mesh_con_count: tile.off_mesh_cons.len() as i32,
        ..src.clone()
    };

    let mut buffer = Vec::with_capacity(tile_data_size(&header).unwrap_or(HEADER_SIZE));
    write_header(&mut buffer, &header)?;

    for &v in &tile.verts {
        buffer.write_f32::<LittleEndian>(v)?;
    }
    for poly in &tile.polys {
        write_poly(&mut buffer, poly)?;
    }
    buffer.resize(buffer.len() + header.max_link_count.max(0) as usize * LINK_SIZE, 0);

    for detail in &tile.detail_meshes {
        buffer.write_u32::<LittleEndian>(detail.vert_base)?;
        buffer.write_u32::<LittleEndian>(detail.tri_base)?;
        buffer.write_u8(detail.vert_count)?;
        buffer.write_u8(detail.tri_count)?;
        buffer.write_u16::<LittleEndian>(0)?;
    }
    for &v in &tile.detail_verts {
        buffer.write_f32::<LittleEndian>(v)?;
    }
    buffer.write_all(&tile.detail_tris)?;

    for node in &tile.bv_tree {
        for &v in node.bmin.iter().chain(&node.bmax) {
            buffer.write_u16::<LittleEndian>(v)?;
        }
        buffer.write_i32::<LittleEndian>(node.i)?;
    }
    for con in &tile.off_mesh_cons {
        write_off_mesh_con(&mut buffer, con)?;
    }

    Ok(buffer)
}

/// Size of a tile state blob
pub(crate) fn tile_state_size(tile: &MeshTile) -> usize {
    if tile.is_loaded() {
        TILE_STATE_HEADER_SIZE + tile.polys.len() * POLY_STATE_SIZE
    } else {
        0
    }
}

/// Writes per-polygon flags and areas
pub(crate) fn write_tile_state(tile: &MeshTile, tile_ref: TileRef) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(tile_state_size(tile));
    buffer.write_u32::<LittleEndian>(NAVMESH_STATE_MAGIC)?;
    buffer.write_u32::<LittleEndian>(NAVMESH_STATE_VERSION)?;
    buffer.write_u32::<LittleEndian>(tile_ref.id())?;
    for poly in &tile.polys {
        buffer.write_u16::<LittleEndian>(poly.flags.bits())?;
        buffer.write_u8(poly.area)?;
        buffer.write_u8(0)?;
    }
    Ok(buffer)
}

/// Applies a tile state blob; the tile is untouched on failure
pub(crate) fn read_tile_state(tile: &mut MeshTile, tile_ref: TileRef, data: &[u8]) -> Result<()> {
    let mut cursor = Cursor::new(data);
    if cursor.read_u32::<LittleEndian>()? != NAVMESH_STATE_MAGIC {
        return Err(Status::failure(StatusDetail::WRONG_MAGIC));
    }
    if cursor.read_u32::<LittleEndian>()? != NAVMESH_STATE_VERSION {
        return Err(Status::failure(StatusDetail::WRONG_VERSION));
    }
    if PolyRef::new(cursor.read_u32::<LittleEndian>()?) != tile_ref {
        return Err(Status::invalid_param());
    }
    if data.len() < tile_state_size(tile) {
        return Err(Status::invalid_param());
    }

    for poly in &mut tile.polys {
        poly.flags = PolyFlags::from_bits_retain(cursor.read_u16::<LittleEndian>()?);
        poly.area = cursor.read_u8()? & 0x3f;
        cursor.read_u8()?;
    }
    Ok(())
}

/// Writes a mesh set
pub(crate) fn write_mesh_set(params: &NavMeshParams, tiles: &[(TileRef, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.write_u32::<LittleEndian>(NAVMESH_SET_MAGIC)?;
    buffer.write_u32::<LittleEndian>(NAVMESH_SET_VERSION)?;
    buffer.write_i32::<LittleEndian>(tiles.len() as i32)?;
    write_vec3(&mut buffer, &params.origin)?;
    buffer.write_f32::<LittleEndian>(params.tile_width)?;
    buffer.write_f32::<LittleEndian>(params.tile_height)?;
    buffer.write_i32::<LittleEndian>(params.max_tiles)?;
    buffer.write_i32::<LittleEndian>(params.max_polys_per_tile)?;

    for (tile_ref, data) in tiles {
        buffer.write_u32::<LittleEndian>(tile_ref.id())?;
        buffer.write_i32::<LittleEndian>(data.len() as i32)?;
        buffer.write_all(data)?;
    }
    Ok(buffer)
}

/// Reads a mesh set into its parameters and tile records
pub(crate) fn read_mesh_set(data: &[u8]) -> Result<(NavMeshParams, Vec<(TileRef, &[u8])>)> {
    let mut cursor = Cursor::new(data);
    if cursor.read_u32::<LittleEndian>()? != NAVMESH_SET_MAGIC {
        return Err(Status::failure(StatusDetail::WRONG_MAGIC));
    }
    if cursor.read_u32::<LittleEndian>()? != NAVMESH_SET_VERSION {
        return Err(Status::failure(StatusDetail::WRONG_VERSION));
    }
    let tile_count = cursor.read_i32::<LittleEndian>()?;
    let params = NavMeshParams {
        origin: read_vec3(&mut cursor)?,
        tile_width: cursor.read_f32::<LittleEndian>()?,
        tile_height: cursor.read_f32::<LittleEndian>()?,
        max_tiles: cursor.read_i32::<LittleEndian>()?,
        max_polys_per_tile: cursor.read_i32::<LittleEndian>()?,
    };
    if tile_count < 0 || tile_count > params.max_tiles {
        return Err(Status::invalid_param());
    }

    let mut tiles = Vec::with_capacity(tile_count as usize);
    for _ in 0..tile_count {
        let tile_ref = PolyRef::new(cursor.read_u32::<LittleEndian>()?);
        let size = usize::try_from(cursor.read_i32::<LittleEndian>()?)
            .map_err(|_| Status::invalid_param())?;
        let start = cursor.position() as usize;
        let end = start.checked_add(size).ok_or(Status::invalid_param())?;
        let Some(tile_data) = data.get(start..end) else {
            return Err(Status::invalid_param());
        };
        tiles.push((tile_ref, tile_data));
        cursor.set_position(end as u64);
    }
    Ok((params, tiles))
}
