//! Velocity-space obstacle avoidance
//!
//! Candidate velocities are sampled around the desired velocity and scored
//! against nearby agents (moving circles) and walls (segments). The
//! sample with the lowest penalty wins.

use nav_common::{dist_pt_seg_sqr_2d, sqr, tri_area_2d, vdist_2d, vdot_2d, vperp_2d};

pub const MAX_PATTERN_DIVS: usize = 32;
pub const MAX_PATTERN_RINGS: usize = 4;

/// Moving circular obstacle, another agent
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleCircle {
    pub p: [f32; 3],    // Position of the obstacle
    pub vel: [f32; 3],  // Velocity of the obstacle
    pub dvel: [f32; 3], // Desired velocity of the obstacle
    pub rad: f32,       // Radius of the obstacle
    pub dp: [f32; 3],   // Use for side selection during sampling
    pub np: [f32; 3],   // Use for side selection during sampling
}

/// Static wall obstacle
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleSegment {
    pub p: [f32; 3], // Start point of the obstacle segment
    pub q: [f32; 3], // End point of the obstacle segment
    pub touch: bool,
}

/// Sampling configuration, one per avoidance quality profile
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct ObstacleAvoidanceParams {
    pub vel_bias: f32,       // Velocity bias
    pub weight_des_vel: f32, // Weight for desired velocity
    pub weight_cur_vel: f32, // Weight for current velocity
    pub weight_side: f32,    // Weight for side preference
    pub weight_toi: f32,     // Weight for time of impact
    pub horiz_time: f32,     // Horizon time
    pub grid_size: u8,       // Grid size for grid-based sampling
    pub adaptive_divs: u8,   // Adaptive divisions for adaptive sampling
    pub adaptive_rings: u8,  // Adaptive rings for adaptive sampling
    pub adaptive_depth: u8,  // Adaptive depth for adaptive sampling
}

impl Default for ObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            vel_bias: 0.4,
            weight_des_vel: 2.0,
            weight_cur_vel: 0.75,
            weight_side: 0.75,
            weight_toi: 2.5,
            horiz_time: 2.5,
            grid_size: 33,
            adaptive_divs: 7,
            adaptive_rings: 2,
            adaptive_depth: 5,
        }
    }
}

/// One scored candidate velocity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvoidanceSample {
    pub vel: [f32; 3],
    pub size: f32,
    pub penalty: f32,
    pub desired_velocity_penalty: f32,
    pub current_velocity_penalty: f32,
    pub preferred_side_penalty: f32,
    pub collision_time_penalty: f32,
}

/// Record of the samples taken by one sampling call
#[derive(Debug, Default)]
pub struct ObstacleAvoidanceDebugData {
    samples: Vec<AvoidanceSample>,
    max_samples: usize,
}

impl ObstacleAvoidanceDebugData {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    fn add_sample(&mut self, sample: AvoidanceSample) {
        if self.samples.len() < self.max_samples {
            self.samples.push(sample);
        }
    }

    /// Scales every penalty column into `[0, 1]`
    pub fn normalize_samples(&mut self) {
        normalize_column(&mut self.samples, |s| &mut s.penalty);
        normalize_column(&mut self.samples, |s| &mut s.desired_velocity_penalty);
        normalize_column(&mut self.samples, |s| &mut s.current_velocity_penalty);
        normalize_column(&mut self.samples, |s| &mut s.preferred_side_penalty);
        normalize_column(&mut self.samples, |s| &mut s.collision_time_penalty);
    }

    pub fn get_sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn get_sample(&self, i: usize) -> Option<&AvoidanceSample> {
        self.samples.get(i)
    }
}

fn normalize_column<F>(samples: &mut [AvoidanceSample], mut field: F)
where
    F: FnMut(&mut AvoidanceSample) -> &mut f32,
{
    let mut min_pen = f32::MAX;
    let mut max_pen = -f32::MAX;
    for s in samples.iter_mut() {
        let v = *field(s);
        min_pen = min_pen.min(v);
        max_pen = max_pen.max(v);
    }
    let pen_range = max_pen - min_pen;
    let s = if pen_range > 0.001 { 1.0 / pen_range } else { 1.0 };
    for sample in samples.iter_mut() {
        let v = field(sample);
        *v = ((*v - min_pen) * s).clamp(0.0, 1.0);
    }
}

/// Result of a sampling call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledVelocity {
    /// Chosen velocity
    pub vel: [f32; 3],
    /// Number of candidates evaluated
    pub sample_count: usize,
}

/// Velocity sampler for one agent at a time
#[derive(Debug)]
pub struct ObstacleAvoidanceQuery {
    params: ObstacleAvoidanceParams,
    inv_horiz_time: f32,
    vmax: f32,
    inv_vmax: f32,

    max_circles: usize,
    circles: Vec<ObstacleCircle>,

    max_segments: usize,
    segments: Vec<ObstacleSegment>,
}

impl ObstacleAvoidanceQuery {
    pub fn new(max_circles: usize, max_segments: usize) -> Self {
        Self {
            params: ObstacleAvoidanceParams::default(),
            inv_horiz_time: 0.0,
            vmax: 0.0,
            inv_vmax: 0.0,
            max_circles,
            circles: Vec::with_capacity(max_circles),
            max_segments,
            segments: Vec::with_capacity(max_segments),
        }
    }

    /// Removes all obstacles
    pub fn reset(&mut self) {
        self.circles.clear();
        self.segments.clear();
    }

    /// Adds a moving circle; ignored when the circle buffer is full
    pub fn add_circle(&mut self, pos: &[f32; 3], rad: f32, vel: &[f32; 3], dvel: &[f32; 3]) {
        if self.circles.len() >= self.max_circles {
            return;
        }
        self.circles.push(ObstacleCircle {
            p: *pos,
            vel: *vel,
            dvel: *dvel,
            rad,
            ..Default::default()
        });
    }

    /// Adds a wall segment; ignored when the segment buffer is full
    pub fn add_segment(&mut self, p: &[f32; 3], q: &[f32; 3]) {
        if self.segments.len() >= self.max_segments {
            return;
        }
        self.segments.push(ObstacleSegment {
            p: *p,
            q: *q,
            touch: false,
        });
    }

    pub fn get_obstacle_circle_count(&self) -> usize {
        self.circles.len()
    }

    pub fn get_obstacle_circle(&self, i: usize) -> Option<&ObstacleCircle> {
        self.circles.get(i)
    }

    pub fn get_obstacle_segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn get_obstacle_segment(&self, i: usize) -> Option<&ObstacleSegment> {
        self.segments.get(i)
    }

    fn begin_sampling(&mut self, pos: &[f32; 3], vmax: f32, dvel: &[f32; 3], params: &ObstacleAvoidanceParams) {
        self.prepare(pos, dvel);
        self.params = *params;
        self.inv_horiz_time = 1.0 / params.horiz_time;
        self.vmax = vmax;
        self.inv_vmax = if vmax > 0.0 { 1.0 / vmax } else { f32::MAX };
    }

    /// Samples candidate velocities on a regular grid centered on the
    /// biased desired velocity
    pub fn sample_velocity_grid(
        &mut self,
        pos: &[f32; 3],
        rad: f32,
        vmax: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> SampledVelocity {
        self.begin_sampling(pos, vmax, dvel, params);
        if let Some(debug_data) = debug.as_deref_mut() {
            debug_data.reset();
        }

        let mut nvel = [0.0; 3];
        let grid_size = params.grid_size.max(2) as usize;
        let cvx = dvel[0] * params.vel_bias;
        let cvz = dvel[2] * params.vel_bias;
        let cs = vmax * 2.0 * (1.0 - params.vel_bias) / (grid_size as f32 - 1.0);
        let half = (grid_size as f32 - 1.0) * cs * 0.5;

        let mut min_penalty = f32::MAX;
        let mut ns = 0;

        for y in 0..grid_size {
            for x in 0..grid_size {
                let vcand = [cvx + x as f32 * cs - half, 0.0, cvz + y as f32 * cs - half];

                if sqr(vcand[0]) + sqr(vcand[2]) > sqr(vmax + cs / 2.0) {
                    continue;
                }

                let penalty = self.process_sample(&vcand, cs, pos, rad, vel, dvel, min_penalty, debug.as_deref_mut());
                ns += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    nvel = vcand;
                }
            }
        }

        SampledVelocity { vel: nvel, sample_count: ns }
    }

    /// Samples candidate velocities on rings aligned with the desired
    /// velocity, refining around the best candidate `adaptive_depth` times
    pub fn sample_velocity_adaptive(
        &mut self,
        pos: &[f32; 3],
        rad: f32,
        vmax: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> SampledVelocity {
        self.begin_sampling(pos, vmax, dvel, params);
        if let Some(debug_data) = debug.as_deref_mut() {
            debug_data.reset();
        }

        let pattern = sampling_pattern(dvel, params.adaptive_divs as usize, params.adaptive_rings as usize);

        // Start sampling
        let mut cr = vmax * (1.0 - params.vel_bias);
        let mut res = [dvel[0] * params.vel_bias, 0.0, dvel[2] * params.vel_bias];
        let mut ns = 0;

        for _ in 0..params.adaptive_depth {
            let mut min_penalty = f32::MAX;
            let mut bvel = [0.0; 3];

            for &[px, pz] in &pattern {
                let vcand = [res[0] + px * cr, 0.0, res[2] + pz * cr];

                if sqr(vcand[0]) + sqr(vcand[2]) > sqr(vmax + 0.001) {
                    continue;
                }

                let penalty =
                    self.process_sample(&vcand, cr / 10.0, pos, rad, vel, dvel, min_penalty, debug.as_deref_mut());
                ns += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    bvel = vcand;
                }
            }

            res = bvel;
            cr *= 0.5;
        }

        SampledVelocity { vel: res, sample_count: ns }
    }

    fn prepare(&mut self, pos: &[f32; 3], dvel: &[f32; 3]) {
        // Prepare obstacles
        for cir in &mut self.circles {
            // Side
            let mut dp = [cir.p[0] - pos[0], 0.0, cir.p[2] - pos[2]];
            normalize_2d(&mut dp);
            cir.dp = dp;
            let dv = [cir.dvel[0] - dvel[0], 0.0, cir.dvel[2] - dvel[2]];

            let a = tri_area_2d(&[0.0; 3], &cir.dp, &dv);
            cir.np = if a < 0.01 {
                [-cir.dp[2], 0.0, cir.dp[0]]
            } else {
                [cir.dp[2], 0.0, -cir.dp[0]]
            };
        }

        for seg in &mut self.segments {
            // Precalc if the agent is really close to the segment
            let r = 0.01;
            let (dist_sqr, _) = dist_pt_seg_sqr_2d(pos, &seg.p, &seg.q);
            seg.touch = dist_sqr < sqr(r);
        }
    }

    /// Scores a candidate velocity
    ///
    /// Returns `min_penalty` unchanged as soon as the candidate cannot beat
    /// the best sample so far.
    fn process_sample(
        &self,
        vcand: &[f32; 3],
        cs: f32,
        pos: &[f32; 3],
        rad: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        min_penalty: f32,
        debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> f32 {
        // Penalty for straying away from the desired and current velocities
        let vpen = self.params.weight_des_vel * (vdist_2d(vcand, dvel) * self.inv_vmax);
        let vcpen = self.params.weight_cur_vel * (vdist_2d(vcand, vel) * self.inv_vmax);

        // Find the threshold hit time to bail out based on the early out
        // penalty; the time penalty is weight_toi / (0.1 + t / horiz_time)
        let min_pen = min_penalty - vpen - vcpen;
        let t_threshold = (self.params.weight_toi / min_pen - 0.1) * self.params.horiz_time;
        if t_threshold - self.params.horiz_time > -f32::EPSILON {
            return min_penalty;
        }

        // Find min time of impact and exit amongst all obstacles
        let mut tmin = self.params.horiz_time;
        let mut side = 0.0;
        let mut nside = 0;

        for cir in &self.circles {
            // RVO
            let vab = [
                vcand[0] * 2.0 - vel[0] - cir.vel[0],
                0.0,
                vcand[2] * 2.0 - vel[2] - cir.vel[2],
            ];

            // Side
            side += (vdot_2d(&cir.dp, &vab) * 0.5 + 0.5)
                .min(vdot_2d(&cir.np, &vab) * 2.0)
                .clamp(0.0, 1.0);
            nside += 1;

            let Some((mut htmin, htmax)) = sweep_circle_circle(pos, rad, &vab, &cir.p, cir.rad) else {
                continue;
            };

            // Handle overlapping obstacles
            if htmin < 0.0 && htmax > 0.0 {
                // Avoid more when overlapped
                htmin = -htmin * 0.5;
            }

            if htmin >= 0.0 && htmin < tmin {
                // The closest obstacle is somewhere ahead of us
                tmin = htmin;
                if tmin < t_threshold {
                    return min_penalty;
                }
            }
        }

        for seg in &self.segments {
            let mut htmin = 0.0;

            if seg.touch {
                // Special case when the agent is very close to the segment
                let sdir = [seg.q[0] - seg.p[0], 0.0, seg.q[2] - seg.p[2]];
                let snorm = [-sdir[2], 0.0, sdir[0]];
                // If the velocity is pointing towards the segment, no collision
                if vdot_2d(&snorm, vcand) < 0.0 {
                    continue;
                }
            } else {
                match isect_ray_seg(pos, vcand, &seg.p, &seg.q) {
                    Some(t) => htmin = t,
                    None => continue,
                }
            }

            // Avoid less when facing walls
            htmin *= 2.0;

            // The closest obstacle is somewhere ahead of us
            if htmin < tmin {
                tmin = htmin;
                if tmin < t_threshold {
                    return min_penalty;
                }
            }
        }

        // Normalize side bias, to prevent it dominating too much
        if nside > 0 {
            side /= nside as f32;
        }

        let spen = self.params.weight_side * side;
        let tpen = self.params.weight_toi * (1.0 / (0.1 + tmin * self.inv_horiz_time));

        let penalty = vpen + vcpen + spen + tpen;

        if let Some(debug_data) = debug {
            debug_data.add_sample(AvoidanceSample {
                vel: *vcand,
                size: cs,
                penalty,
                desired_velocity_penalty: vpen,
                current_velocity_penalty: vcpen,
                preferred_side_penalty: spen,
                collision_time_penalty: tpen,
            });
        }

        penalty
    }
}

/// Unit sampling pattern: the origin, then `rings` rings of `divs` points
/// starting at the desired direction, alternating half a step per ring
fn sampling_pattern(dvel: &[f32; 3], divs: usize, rings: usize) -> Vec<[f32; 2]> {
    let nd = divs.clamp(1, MAX_PATTERN_DIVS);
    let nr = rings.clamp(1, MAX_PATTERN_RINGS);
    let da = (1.0 / nd as f32) * std::f32::consts::PI * 2.0;
    let (sa, ca) = da.sin_cos();

    // Desired direction and the same rotated by half a step
    let mut ddir = [dvel[0], 0.0, dvel[2]];
    normalize_2d(&mut ddir);
    let rotated = rotate_2d(&ddir, da * 0.5);
    let dirs = [ddir, rotated];

    let mut pat = Vec::with_capacity(nd * nr + 1);
    // Always add sample at zero
    pat.push([0.0, 0.0]);

    for j in 0..nr {
        let r = (nr - j) as f32 / nr as f32;
        let d = dirs[j % 2];
        let first = [d[0] * r, d[2] * r];
        pat.push(first);

        let mut last1 = first;
        let mut last2 = first;
        for _ in (1..nd.saturating_sub(1)).step_by(2) {
            // Get next point on the "right" (rotate CW)
            let right = [last1[0] * ca + last1[1] * sa, -last1[0] * sa + last1[1] * ca];
            // Get next point on the "left" (rotate CCW)
            let left = [last2[0] * ca - last2[1] * sa, last2[0] * sa + last2[1] * ca];
            pat.push(right);
            pat.push(left);
            last1 = right;
            last2 = left;
        }

        if nd & 1 == 0 {
            pat.push([last2[0] * ca - last2[1] * sa, last2[0] * sa + last2[1] * ca]);
        }
    }

    pat
}

/// Time interval during which a circle at `c0` moving with `v` overlaps
/// the static circle at `c1`
fn sweep_circle_circle(c0: &[f32; 3], r0: f32, v: &[f32; 3], c1: &[f32; 3], r1: f32) -> Option<(f32, f32)> {
    const EPS: f32 = 0.0001;
    let s = [c1[0] - c0[0], 0.0, c1[2] - c0[2]];
    let r = r0 + r1;
    let c = vdot_2d(&s, &s) - r * r;
    let a = vdot_2d(v, v);
    if a < EPS {
        return None; // not moving
    }

    // Overlap, calc time to exit
    let b = vdot_2d(v, &s);
    let d = b * b - a * c;
    if d < 0.0 {
        return None; // no intersection
    }
    let a = 1.0 / a;
    let rd = d.sqrt();
    Some(((b - rd) * a, (b + rd) * a))
}

/// Parameter along the ray `ap + t u` where it crosses segment `bp bq`
fn isect_ray_seg(ap: &[f32; 3], u: &[f32; 3], bp: &[f32; 3], bq: &[f32; 3]) -> Option<f32> {
    let v = [bq[0] - bp[0], 0.0, bq[2] - bp[2]];
    let w = [ap[0] - bp[0], 0.0, ap[2] - bp[2]];
    let d = vperp_2d(u, &v);
    if d.abs() < 1e-6 {
        return None;
    }
    let d = 1.0 / d;
    let t = vperp_2d(&v, &w) * d;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let s = vperp_2d(u, &w) * d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}

fn normalize_2d(v: &mut [f32; 3]) {
    let d = (v[0] * v[0] + v[2] * v[2]).sqrt();
    if d == 0.0 {
        return;
    }
    let d = 1.0 / d;
    v[0] *= d;
    v[2] *= d;
}

fn rotate_2d(v: &[f32; 3], ang: f32) -> [f32; 3] {
    let (s, c) = ang.sin_cos();
    [v[0] * c - v[2] * s, v[1], v[0] * s + v[2] * c]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn len_2d(v: &[f32; 3]) -> f32 {
        (v[0] * v[0] + v[2] * v[2]).sqrt()
    }

    #[test]
    fn test_free_space_keeps_desired_velocity() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();
        let dvel = [2.0, 0.0, 0.0];

        let result = query.sample_velocity_adaptive(&[0.0; 3], 0.5, 2.0, &[0.0; 3], &dvel, &params, None);
        assert!(result.sample_count > 0);
        assert!((result.vel[0] - 2.0).abs() < 0.2, "{:?}", result.vel);
        assert!(result.vel[2].abs() < 0.2);

        let result = query.sample_velocity_grid(&[0.0; 3], 0.5, 2.0, &[0.0; 3], &dvel, &params, None);
        assert!(result.sample_count > 0);
        assert!(result.vel[0] > 1.5, "{:?}", result.vel);
    }

    #[test]
    fn test_head_on_agent_is_avoided() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();
        let dvel = [2.0, 0.0, 0.0];

        // Another agent straight ahead, walking towards us
        query.add_circle(&[1.5, 0.0, 0.0], 0.5, &[-2.0, 0.0, 0.0], &[-2.0, 0.0, 0.0]);
        assert_eq!(query.get_obstacle_circle_count(), 1);

        let result = query.sample_velocity_adaptive(&[0.0; 3], 0.5, 2.0, &[2.0, 0.0, 0.0], &dvel, &params, None);
        // Either sidestep or slow down, but never keep charging ahead
        let straight_ahead = result.vel[2].abs() < 0.1 && result.vel[0] > 1.9;
        assert!(!straight_ahead, "{:?}", result.vel);
        assert!(len_2d(&result.vel) <= 2.0 + 0.01);
    }

    #[test]
    fn test_wall_ahead_is_avoided() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();
        let dvel = [0.0, 0.0, 2.0];

        // Wall across the path at z = 0.6
        query.add_segment(&[-5.0, 0.0, 0.6], &[5.0, 0.0, 0.6]);
        let free = ObstacleAvoidanceQuery::new(6, 8)
            .sample_velocity_grid(&[0.0; 3], 0.5, 2.0, &[0.0; 3], &dvel, &params, None);
        let blocked = query.sample_velocity_grid(&[0.0; 3], 0.5, 2.0, &[0.0; 3], &dvel, &params, None);
        assert!(blocked.vel[2] < free.vel[2], "{:?} vs {:?}", blocked.vel, free.vel);
    }

    #[test]
    fn test_buffers_are_bounded() {
        let mut query = ObstacleAvoidanceQuery::new(2, 1);
        for i in 0..4 {
            query.add_circle(&[i as f32, 0.0, 0.0], 0.5, &[0.0; 3], &[0.0; 3]);
            query.add_segment(&[0.0; 3], &[1.0, 0.0, 0.0]);
        }
        assert_eq!(query.get_obstacle_circle_count(), 2);
        assert_eq!(query.get_obstacle_segment_count(), 1);
        assert!(query.get_obstacle_circle(2).is_none());
        assert!(query.get_obstacle_segment(0).is_some());

        query.reset();
        assert_eq!(query.get_obstacle_circle_count(), 0);
        assert_eq!(query.get_obstacle_segment_count(), 0);
    }

    #[test]
    fn test_debug_data_records_samples() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();
        let mut debug = ObstacleAvoidanceDebugData::new(1024);
        query.add_circle(&[1.0, 0.0, 0.0], 0.5, &[0.0; 3], &[0.0; 3]);

        let result = query.sample_velocity_grid(
            &[0.0; 3],
            0.5,
            2.0,
            &[0.0; 3],
            &[2.0, 0.0, 0.0],
            &params,
            Some(&mut debug),
        );
        assert!(debug.get_sample_count() > 0);
        assert!(debug.get_sample_count() <= result.sample_count);

        debug.normalize_samples();
        for i in 0..debug.get_sample_count() {
            let s = debug.get_sample(i).unwrap();
            assert!((0.0..=1.0).contains(&s.penalty));
        }
    }

    #[test]
    fn test_sampling_pattern() {
        let pat = sampling_pattern(&[1.0, 0.0, 0.0], 7, 2);
        // Origin plus 7 points per ring
        assert_eq!(pat.len(), 1 + 2 * 7);
        assert_eq!(pat[0], [0.0, 0.0]);
        assert!((pat[1][0] - 1.0).abs() < 1e-5 && pat[1][1].abs() < 1e-5);
        // Outer ring has unit radius, inner ring half of it
        assert!(pat[1..8].iter().all(|p| ((p[0] * p[0] + p[1] * p[1]).sqrt() - 1.0).abs() < 1e-4));
        assert!(pat[8..].iter().all(|p| ((p[0] * p[0] + p[1] * p[1]).sqrt() - 0.5).abs() < 1e-4));

        let even = sampling_pattern(&[0.0, 0.0, 1.0], 8, 1);
        assert_eq!(even.len(), 1 + 8);
    }

    #[test]
    fn test_sweep_and_ray_helpers() {
        let (tmin, tmax) = sweep_circle_circle(&[0.0; 3], 0.5, &[1.0, 0.0, 0.0], &[3.0, 0.0, 0.0], 0.5).unwrap();
        assert!((tmin - 2.0).abs() < 1e-5);
        assert!((tmax - 4.0).abs() < 1e-5);
        assert!(sweep_circle_circle(&[0.0; 3], 0.5, &[0.0; 3], &[3.0, 0.0, 0.0], 0.5).is_none());

        let t = isect_ray_seg(&[0.0; 3], &[0.0, 0.0, 2.0], &[-1.0, 0.0, 1.0], &[1.0, 0.0, 1.0]).unwrap();
        assert!((t - 0.5).abs() < 1e-5);
        assert!(isect_ray_seg(&[0.0; 3], &[2.0, 0.0, 0.0], &[-1.0, 0.0, 1.0], &[1.0, 0.0, 1.0]).is_none());
    }
}
