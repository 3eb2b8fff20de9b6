//! Scalar and vector math helpers

/// Returns the square of the value
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(a: T) -> T {
    a * a
}

/// Clamps the value to the specified range
#[inline]
pub fn clamp<T: PartialOrd>(v: T, mn: T, mx: T) -> T {
    if v < mn {
        mn
    } else if v > mx {
        mx
    } else {
        v
    }
}

/// Aligns value to 4-byte boundary
#[inline]
pub fn align4(x: usize) -> usize {
    (x + 3) & !3
}

/// Returns the next power of 2
#[inline]
pub fn next_pow2(mut v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}

/// Derives the cross product of two vectors (v1 x v2)
#[inline]
pub fn vcross(v1: &[f32; 3], v2: &[f32; 3]) -> [f32; 3] {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

/// Derives the dot product of two vectors (v1 . v2)
#[inline]
pub fn vdot(v1: &[f32; 3], v2: &[f32; 3]) -> f32 {
    v1[0] * v2[0] + v1[1] * v2[1] + v1[2] * v2[2]
}

/// Performs a scaled vector addition (v1 + (v2 * s))
#[inline]
pub fn vmad(v1: &[f32; 3], v2: &[f32; 3], s: f32) -> [f32; 3] {
    [v1[0] + v2[0] * s, v1[1] + v2[1] * s, v1[2] + v2[2] * s]
}

/// Performs a linear interpolation between two vectors (v1 toward v2)
#[inline]
pub fn vlerp(v1: &[f32; 3], v2: &[f32; 3], t: f32) -> [f32; 3] {
    [
        v1[0] + (v2[0] - v1[0]) * t,
        v1[1] + (v2[1] - v1[1]) * t,
        v1[2] + (v2[2] - v1[2]) * t,
    ]
}

/// Performs a vector addition (v1 + v2)
#[inline]
pub fn vadd(v1: &[f32; 3], v2: &[f32; 3]) -> [f32; 3] {
    [v1[0] + v2[0], v1[1] + v2[1], v1[2] + v2[2]]
}

/// Performs a vector subtraction (v1 - v2)
#[inline]
pub fn vsub(v1: &[f32; 3], v2: &[f32; 3]) -> [f32; 3] {
    [v1[0] - v2[0], v1[1] - v2[1], v1[2] - v2[2]]
}

/// Scales the vector by the specified value (v * t)
#[inline]
pub fn vscale(v: &[f32; 3], t: f32) -> [f32; 3] {
    [v[0] * t, v[1] * t, v[2] * t]
}

/// Selects the minimum value of each element
#[inline]
pub fn vmin(mn: &mut [f32; 3], v: &[f32; 3]) {
    mn[0] = mn[0].min(v[0]);
    mn[1] = mn[1].min(v[1]);
    mn[2] = mn[2].min(v[2]);
}

/// Selects the maximum value of each element
#[inline]
pub fn vmax(mx: &mut [f32; 3], v: &[f32; 3]) {
    mx[0] = mx[0].max(v[0]);
    mx[1] = mx[1].max(v[1]);
    mx[2] = mx[2].max(v[2]);
}

/// Derives the scalar length of the vector
#[inline]
pub fn vlen(v: &[f32; 3]) -> f32 {
    vlen_sqr(v).sqrt()
}

/// Derives the square of the scalar length of the vector
#[inline]
pub fn vlen_sqr(v: &[f32; 3]) -> f32 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}

/// Returns the distance between two points
#[inline]
pub fn vdist(v1: &[f32; 3], v2: &[f32; 3]) -> f32 {
    vdist_sqr(v1, v2).sqrt()
}

/// Returns the square of the distance between two points
#[inline]
pub fn vdist_sqr(v1: &[f32; 3], v2: &[f32; 3]) -> f32 {
    let dx = v2[0] - v1[0];
    let dy = v2[1] - v1[1];
    let dz = v2[2] - v1[2];
    dx * dx + dy * dy + dz * dz
}

/// Derives the distance between the specified points on the xz-plane
#[inline]
pub fn vdist_2d(v1: &[f32; 3], v2: &[f32; 3]) -> f32 {
    vdist_2d_sqr(v1, v2).sqrt()
}

/// Derives the square of the distance between the specified points on the xz-plane
#[inline]
pub fn vdist_2d_sqr(v1: &[f32; 3], v2: &[f32; 3]) -> f32 {
    let dx = v2[0] - v1[0];
    let dz = v2[2] - v1[2];
    dx * dx + dz * dz
}

/// Normalizes the vector. Zero-length vectors are left unchanged.
#[inline]
pub fn vnormalize(v: &mut [f32; 3]) {
    let len = vlen(v);
    if len > 0.0 {
        let d = 1.0 / len;
        v[0] *= d;
        v[1] *= d;
        v[2] *= d;
    }
}

/// Performs a 'sloppy' colocation check of the specified points
#[inline]
pub fn vequal(p0: &[f32; 3], p1: &[f32; 3]) -> bool {
    const THR: f32 = 1.0 / 16384.0;
    vdist_sqr(p0, p1) < THR * THR
}

/// Checks that the specified vector's components are all finite
#[inline]
pub fn visfinite(v: &[f32; 3]) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Derives the dot product of two vectors on the xz-plane
#[inline]
pub fn vdot_2d(u: &[f32; 3], v: &[f32; 3]) -> f32 {
    u[0] * v[0] + u[2] * v[2]
}

/// Derives the xz-plane 2D perp product of the two vectors (uz*vx - ux*vz)
#[inline]
pub fn vperp_2d(u: &[f32; 3], v: &[f32; 3]) -> f32 {
    u[2] * v[0] - u[0] * v[2]
}

/// Reads the vertex at `index` from a flat `[x, y, z, x, y, z, ...]` buffer
#[inline]
pub fn vert_at(verts: &[f32], index: usize) -> [f32; 3] {
    [verts[index * 3], verts[index * 3 + 1], verts[index * 3 + 2]]
}
