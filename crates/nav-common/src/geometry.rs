//! Geometry helpers for polygons, triangles and segments
//!
//! Polygons are flat vertex buffers (`[x, y, z, x, y, z, ...]`). Functions
//! suffixed with `_2d` project onto the xz-plane.

use crate::math::{vdot_2d, vert_at};
use crate::Vec3;

/// Derives the signed xz-plane area of the triangle ABC, or the relationship
/// of line AB to point C.
#[inline]
pub fn tri_area_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Determines if two axis-aligned bounding boxes overlap
#[inline]
pub fn overlap_bounds(amin: &[f32; 3], amax: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Determines if two quantized axis-aligned bounding boxes overlap
#[inline]
pub fn overlap_quant_bounds(
    amin: &[u16; 3],
    amax: &[u16; 3],
    bmin: &[u16; 3],
    bmax: &[u16; 3],
) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Derives the closest point on a triangle from the specified reference point
pub fn closest_pt_point_triangle(p: &[f32; 3], a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> [f32; 3] {
    let p = Vec3::from_array(*p);
    let a = Vec3::from_array(*a);
    let b = Vec3::from_array(*b);
    let c = Vec3::from_array(*c);

    // Vertex region outside A
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a.to_array();
    }

    // Vertex region outside B
    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b.to_array();
    }

    // Edge region of AB
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v).to_array();
    }

    // Vertex region outside C
    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c.to_array();
    }

    // Edge region of AC
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w).to_array();
    }

    // Edge region of BC
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w).to_array();
    }

    // Inside face region
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w).to_array()
}

/// Derives the y-axis height of the point projected onto the triangle.
///
/// Returns `None` when the point lies outside the triangle on the xz-plane.
pub fn closest_height_point_triangle(
    p: &[f32; 3],
    a: &[f32; 3],
    b: &[f32; 3],
    c: &[f32; 3],
) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let v1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v2 = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];

    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];

    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Result of clipping a segment against a convex polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyIntersection {
    /// Parametric distance along the segment where it enters the polygon
    pub tmin: f32,
    /// Parametric distance along the segment where it exits the polygon
    pub tmax: f32,
    /// Edge index the segment enters through, if it starts outside
    pub seg_min: Option<usize>,
    /// Edge index the segment exits through, if it ends outside
    pub seg_max: Option<usize>,
}

/// Clips the segment `p0 -> p1` against a convex polygon on the xz-plane.
///
/// Returns `None` when the segment does not intersect the polygon. The edge
/// indices refer to the edge starting at vertex `j` and ending at `j + 1`.
pub fn intersect_segment_poly_2d(
    p0: &[f32; 3],
    p1: &[f32; 3],
    verts: &[f32],
    nverts: usize,
) -> Option<SegmentPolyIntersection> {
    const EPS: f32 = 0.000_001;

    let mut result = SegmentPolyIntersection {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };

    let dir = [p1[0] - p0[0], p1[1] - p0[1], p1[2] - p0[2]];

    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = vert_at(verts, i);
        let vj = vert_at(verts, j);
        let edge = [vi[0] - vj[0], vi[1] - vj[1], vi[2] - vj[2]];
        let diff = [p0[0] - vj[0], p0[1] - vj[1], p0[2] - vj[2]];
        let n = crate::vperp_2d(&edge, &diff);
        let d = crate::vperp_2d(&dir, &edge);

        if d.abs() < EPS {
            // Nearly parallel to this edge
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }

        let t = n / d;
        if d < 0.0 {
            // Entering across this edge
            if t > result.tmin {
                result.tmin = t;
                result.seg_min = Some(j);
                if result.tmin > result.tmax {
                    return None;
                }
            }
        } else if t < result.tmax {
            // Exiting across this edge
            result.tmax = t;
            result.seg_max = Some(j);
            if result.tmax < result.tmin {
                return None;
            }
        }

        j = i;
    }

    Some(result)
}

#[inline]
fn vperp_xz(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[2] - a[2] * b[0]
}

/// Intersects the infinite lines through segments `ap -> aq` and `bp -> bq`
/// on the xz-plane, returning the parameters `(s, t)` along each segment.
pub fn intersect_seg_seg_2d(
    ap: &[f32; 3],
    aq: &[f32; 3],
    bp: &[f32; 3],
    bq: &[f32; 3],
) -> Option<(f32, f32)> {
    let u = [aq[0] - ap[0], aq[1] - ap[1], aq[2] - ap[2]];
    let v = [bq[0] - bp[0], bq[1] - bp[1], bq[2] - bp[2]];
    let w = [ap[0] - bp[0], ap[1] - bp[1], ap[2] - bp[2]];

    let d = vperp_xz(&u, &v);
    if d.abs() < 1e-6 {
        return None;
    }

    Some((vperp_xz(&v, &w) / d, vperp_xz(&u, &w) / d))
}

/// Determines if the specified point is inside the convex polygon on the xz-plane
pub fn point_in_polygon(pt: &[f32; 3], verts: &[f32], nverts: usize) -> bool {
    let mut inside = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = vert_at(verts, i);
        let vj = vert_at(verts, j);
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Computes the squared xz distance from `pt` to every polygon edge.
///
/// `ed[j]` and `et[j]` receive the squared distance and segment parameter
/// of the edge starting at vertex `j`. Returns whether the point is inside.
pub fn distance_pt_poly_edges_sqr(
    pt: &[f32; 3],
    verts: &[f32],
    nverts: usize,
    ed: &mut [f32],
    et: &mut [f32],
) -> bool {
    let mut inside = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = vert_at(verts, i);
        let vj = vert_at(verts, j);
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        let (d, t) = dist_pt_seg_sqr_2d(pt, &vj, &vi);
        ed[j] = d;
        et[j] = t;
        j = i;
    }
    inside
}

/// Squared xz distance from `pt` to segment `p -> q` and the clamped
/// parameter of the closest point along the segment.
pub fn dist_pt_seg_sqr_2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> (f32, f32) {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let dx = pt[0] - p[0];
    let dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pqx - pt[0];
    let dz = p[2] + t * pqz - pt[2];
    (dx * dx + dz * dz, t)
}

/// Derives the centroid of a convex polygon given by vertex indices
pub fn calc_poly_center(idx: &[u16], verts: &[f32]) -> [f32; 3] {
    let mut center = [0.0f32; 3];
    if idx.is_empty() {
        return center;
    }
    for &i in idx {
        let v = vert_at(verts, i as usize);
        center[0] += v[0];
        center[1] += v[1];
        center[2] += v[2];
    }
    let s = 1.0 / idx.len() as f32;
    [center[0] * s, center[1] * s, center[2] * s]
}

fn project_poly(axis: &[f32; 3], poly: &[f32], npoly: usize) -> (f32, f32) {
    let mut rmin = f32::MAX;
    let mut rmax = f32::MIN;
    for i in 0..npoly {
        let d = vdot_2d(axis, &vert_at(poly, i));
        rmin = rmin.min(d);
        rmax = rmax.max(d);
    }
    (rmin, rmax)
}

#[inline]
fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32, eps: f32) -> bool {
    !((amin + eps) > bmax || (amax - eps) < bmin)
}

fn has_separating_axis(polya: &[f32], npolya: usize, polyb: &[f32], npolyb: usize) -> bool {
    const EPS: f32 = 1e-4;
    let mut j = npolya - 1;
    for i in 0..npolya {
        let va = vert_at(polya, j);
        let vb = vert_at(polya, i);
        let n = [vb[2] - va[2], 0.0, -(vb[0] - va[0])];
        let (amin, amax) = project_poly(&n, polya, npolya);
        let (bmin, bmax) = project_poly(&n, polyb, npolyb);
        if !overlap_range(amin, amax, bmin, bmax, EPS) {
            return true;
        }
        j = i;
    }
    false
}

/// Determines if the two convex polygons overlap on the xz-plane
pub fn overlap_poly_poly_2d(polya: &[f32], npolya: usize, polyb: &[f32], npolyb: usize) -> bool {
    !(has_separating_axis(polya, npolya, polyb, npolyb)
        || has_separating_axis(polyb, npolyb, polya, npolya))
}

/// Picks a point inside a convex polygon using two uniform random values
/// `s` and `t` in `[0, 1)`, weighting triangles of a fan by area.
pub fn random_point_in_convex_poly(pts: &[f32], npts: usize, s: f32, t: f32) -> [f32; 3] {
    let mut areas = vec![0.0f32; npts];
    let mut areasum = 0.0;
    let p0 = vert_at(pts, 0);
    for i in 2..npts {
        areas[i] = tri_area_2d(&p0, &vert_at(pts, i - 1), &vert_at(pts, i));
        areasum += areas[i].max(0.001);
    }

    let thr = s * areasum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = npts - 1;
    for (i, &dacc) in areas.iter().enumerate().take(npts).skip(2) {
        if thr >= acc && thr < acc + dacc {
            u = (thr - acc) / dacc;
            tri = i;
            break;
        }
        acc += dacc;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    let pa = p0;
    let pb = vert_at(pts, tri - 1);
    let pc = vert_at(pts, tri);

    [
        a * pa[0] + b * pb[0] + c * pc[0],
        a * pa[1] + b * pb[1] + c * pc[1],
        a * pa[2] + b * pb[2] + c * pc[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: [f32; 12] = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0];

    #[test]
    fn test_closest_point_triangle() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 0.0, 1.0];

        let inside = closest_pt_point_triangle(&[0.25, 1.0, 0.25], &a, &b, &c);
        assert!((inside[0] - 0.25).abs() < 1e-5);
        assert!(inside[1].abs() < 1e-5);
        assert!((inside[2] - 0.25).abs() < 1e-5);

        let outside = closest_pt_point_triangle(&[-1.0, 0.0, -1.0], &a, &b, &c);
        assert_eq!(outside, a);
    }

    #[test]
    fn test_closest_height_point_triangle() {
        let a = [0.0, 0.0, 0.0];
        let b = [0.0, 2.0, 1.0];
        let c = [1.0, 0.0, 0.0];

        let h = closest_height_point_triangle(&[0.2, 10.0, 0.5], &a, &b, &c);
        assert!(h.is_some());
        assert!((h.unwrap_or_default() - 1.0).abs() < 1e-4);
        assert!(closest_height_point_triangle(&[2.0, 0.0, 2.0], &a, &b, &c).is_none());
    }

    #[test]
    fn test_point_in_polygon() {
        assert!(point_in_polygon(&[0.5, 0.0, 0.5], &SQUARE, 4));
        assert!(!point_in_polygon(&[1.5, 0.0, 0.5], &SQUARE, 4));
    }

    #[test]
    fn test_intersect_segment_poly() {
        let hit = intersect_segment_poly_2d(&[-1.0, 0.0, 0.5], &[2.0, 0.0, 0.5], &SQUARE, 4);
        let hit = hit.expect("segment crosses the square");
        assert!((hit.tmin - 1.0 / 3.0).abs() < 1e-5);
        assert!((hit.tmax - 2.0 / 3.0).abs() < 1e-5);
        assert!(hit.seg_min.is_some());
        assert!(hit.seg_max.is_some());

        let miss = intersect_segment_poly_2d(&[-1.0, 0.0, 2.0], &[2.0, 0.0, 2.0], &SQUARE, 4);
        assert!(miss.is_none());
    }

    #[test]
    fn test_dist_pt_seg() {
        let (d, t) = dist_pt_seg_sqr_2d(&[0.5, 3.0, 1.0], &[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_poly_poly() {
        let shifted: Vec<f32> = SQUARE
            .chunks(3)
            .flat_map(|v| [v[0] + 0.5, v[1], v[2]])
            .collect();
        assert!(overlap_poly_poly_2d(&SQUARE, 4, &shifted, 4));

        let far: Vec<f32> = SQUARE
            .chunks(3)
            .flat_map(|v| [v[0] + 5.0, v[1], v[2]])
            .collect();
        assert!(!overlap_poly_poly_2d(&SQUARE, 4, &far, 4));
    }

    #[test]
    fn test_random_point_in_convex_poly() {
        for &(s, t) in &[(0.0, 0.0), (0.3, 0.7), (0.99, 0.99), (0.5, 0.1)] {
            let p = random_point_in_convex_poly(&SQUARE, 4, s, t);
            assert!((-1e-4..=1.0001).contains(&p[0]));
            assert!((-1e-4..=1.0001).contains(&p[2]));
        }
    }

    #[test]
    fn test_calc_poly_center() {
        let c = calc_poly_center(&[0, 1, 2, 3], &SQUARE);
        assert!((c[0] - 0.5).abs() < 1e-6);
        assert!((c[2] - 0.5).abs() < 1e-6);
    }
}
