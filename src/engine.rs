use crate::correction;
use crate::state::{Skater, SkaterState};
use crate::track::{Bounds, ClosestPoint, Track, TrackId};
use nalgebra::Vector2;

/// Fixed physics timestep. Wall-clock deltas outside (0, 1] second are
/// replaced by this to avoid tab-switch glitches.
pub const DEFAULT_DT: f64 = 1.0 / 60.0;
pub const MAX_WALL_CLOCK_DT: f64 = 1.0;
/// Euler sub-steps per frame while riding a track. Tuned empirically for
/// stability at interactive frame rates, not physically derived.
pub const TRACK_SUBSTEPS: usize = 4;
/// Below this ground speed, friction stops integrating and the velocity is
/// halved each step instead, to avoid sign-flip jitter.
pub const STOP_SPEED: f64 = 1.0e-2;
/// Curvature radii beyond this are treated as "effectively flat" before
/// being used as a centripetal-force denominator.
pub const MAX_CURVATURE_RADIUS: f64 = 1.0e5;
/// Offset along the local normal when the skater leaves a track, so the
/// very next free-fall step does not immediately re-collide.
pub const DETACH_NUDGE: f64 = 1.0e-6;
/// Fraction of the speed blended toward the normal direction on detach.
pub const DETACH_VELOCITY_BLEND: f64 = 0.01;
/// Half-length of the local tangent segment used by the crossing test.
pub const TANGENT_SEGMENT_EXTENT: f64 = 100.0;

pub const DEFAULT_GRAVITY: f64 = -9.8;
pub const DEFAULT_MASS: f64 = 50.0;

/// Authoritative collection of live tracks. Slot indices are never reused,
/// so a stale `TrackId` held across an edit can only miss, not alias.
#[derive(Debug, Default)]
pub struct TrackStore {
    slots: Vec<Option<Track>>,
}

impl TrackStore {
    pub fn add(&mut self, track: Track) -> TrackId {
        self.slots.push(Some(track));
        TrackId(self.slots.len() - 1)
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Live tracks in slot order; iteration order is deterministic.
    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &Track)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|t| (TrackId(i), t)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one on-track Euler sub-step.
enum TrackStep {
    /// Still riding; carry on sub-stepping.
    Stay(SkaterState),
    /// Left the track (force imbalance or edge fly-off); the rest of the
    /// frame runs in free fall with track interaction suppressed.
    Detach(SkaterState),
    /// Ran off the high-u edge of a slope-to-ground track.
    Ground(SkaterState),
}

/// The per-frame physics core: owns the track collection and the live
/// skater, and advances the dragged / grounded / free-fall / on-track
/// state machine once per fixed timestep.
pub struct Engine {
    pub(crate) tracks: TrackStore,
    pub skater: Skater,
    friction: f64,
    detachable: bool,
    thrust: Vector2<f64>,
    /// Set by the editor when it swaps tracks out from under the stepper;
    /// suppresses the thermal-nudge correction for one frame.
    pub(crate) track_change_pending: bool,
    /// Step the physics every Nth tick (slow motion). 1 = real time.
    slow_motion_divisor: u32,
    tick_count: u64,
    /// Region the editor confines control points to.
    pub bounds: Bounds,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            tracks: TrackStore::default(),
            skater: Skater::new(DEFAULT_MASS, DEFAULT_GRAVITY, Vector2::new(0.0, 0.0)),
            friction: 0.0,
            detachable: true,
            thrust: Vector2::new(0.0, 0.0),
            track_change_pending: false,
            slow_motion_divisor: 1,
            tick_count: 0,
            bounds: Bounds::new(-10.0, -2.0, 10.0, 12.0),
        }
    }

    pub fn add_track(&mut self, track: Track) -> TrackId {
        self.tracks.add(track)
    }

    pub fn add_track_from_positions(
        &mut self,
        positions: &[Vector2<f64>],
        physical: bool,
    ) -> Result<TrackId, String> {
        let track = Track::from_positions(positions, physical)?;
        Ok(self.tracks.add(track))
    }

    /// Remove a track; an attached skater is released into free fall.
    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        let removed = self.tracks.remove(id);
        if removed.is_some() && self.skater.track == Some(id) {
            self.skater.track = None;
            self.skater.u_dot = 0.0;
            self.track_change_pending = true;
        }
        removed
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(id)
    }

    pub fn physical_tracks(&self) -> Vec<TrackId> {
        self.tracks
            .iter()
            .filter(|(_, t)| t.physical)
            .map(|(id, _)| id)
            .collect()
    }

    fn has_physical_tracks(&self) -> bool {
        self.tracks.iter().any(|(_, t)| t.physical)
    }

    /// Closest point over the union of physical tracks. Slot-order
    /// iteration with strict improvement keeps the winner deterministic
    /// when distances tie.
    pub fn closest_track_point(&self, p: Vector2<f64>) -> Option<(TrackId, ClosestPoint)> {
        let mut best: Option<(TrackId, ClosestPoint)> = None;
        for (id, track) in self.tracks.iter() {
            if !track.physical {
                continue;
            }
            let found = track.closest_point(p);
            let improves = match &best {
                None => true,
                Some((_, b)) => found.distance_squared < b.distance_squared,
            };
            if improves {
                best = Some((id, found));
            }
        }
        best
    }

    pub fn friction(&self) -> f64 {
        self.friction
    }

    pub fn set_friction(&mut self, friction: f64) {
        self.friction = friction.max(0.0);
    }

    pub fn detachable(&self) -> bool {
        self.detachable
    }

    pub fn set_detachable(&mut self, detachable: bool) {
        self.detachable = detachable;
    }

    pub fn thrust(&self) -> Vector2<f64> {
        self.thrust
    }

    pub fn set_thrust(&mut self, thrust: Vector2<f64>) {
        self.thrust = thrust;
    }

    /// Gravity is a negative scalar. Refreshes the skater's cached
    /// energies so a paused GUI can redraw immediately.
    pub fn set_gravity(&mut self, gravity: f64) {
        self.skater.gravity = gravity;
        self.skater.update_energy();
    }

    /// Mass changes also refresh the cached energies, even while paused.
    pub fn set_mass(&mut self, mass: f64) {
        self.skater.mass = mass;
        self.skater.update_energy();
    }

    pub fn set_slow_motion_divisor(&mut self, divisor: u32) {
        self.slow_motion_divisor = divisor.max(1);
    }

    /// Advance one frame. In slow motion only every Nth tick steps the
    /// physics; out-of-range wall-clock deltas fall back to the fixed dt.
    pub fn step(&mut self, dt: f64) {
        self.tick_count += 1;
        if self.slow_motion_divisor > 1 && self.tick_count % self.slow_motion_divisor as u64 != 0 {
            return;
        }
        let dt = if dt <= 0.0 || dt > MAX_WALL_CLOCK_DT {
            DEFAULT_DT
        } else {
            dt
        };
        self.step_once(dt);
    }

    /// Single fixed step regardless of slow motion, for frame-by-frame
    /// stepping while paused.
    pub fn manual_step(&mut self) {
        self.step_once(DEFAULT_DT);
    }

    fn step_once(&mut self, dt: f64) {
        if self.skater.dragging {
            // The drag handler owns position while dragging.
            self.track_change_pending = false;
            return;
        }
        let state = self.skater.snapshot();
        let next = if let Some(id) = state.track {
            self.step_track(state, id, dt)
        } else if state.position.y <= 0.0 {
            self.step_ground(state, dt)
        } else {
            self.step_free_fall(state, dt, false)
        };
        self.skater.apply(&next);
        self.track_change_pending = false;
    }

    /// Grounded: x integrates under kinetic friction, y stays pinned at 0.
    /// Thermal energy comes from the before/after energy budget rather
    /// than force times distance, so conservation is exact per step.
    fn step_ground(&self, state: SkaterState, dt: f64) -> SkaterState {
        let e0 = state.total_energy();
        let vx = state.velocity.x;
        let new_vx = if self.friction == 0.0 {
            vx
        } else if vx.abs() < STOP_SPEED {
            0.5 * vx
        } else {
            let accel = -vx.signum() * self.friction * state.gravity.abs();
            let v1 = vx + accel * dt;
            // Friction never reverses motion.
            if v1 * vx < 0.0 { 0.0 } else { v1 }
        };
        let moved = state
            .with_position(Vector2::new(state.position.x + new_vx * dt, 0.0))
            .with_velocity(Vector2::new(new_vx, 0.0));
        let thermal =
            (e0 - moved.kinetic_energy() - moved.potential_energy()).max(state.thermal_energy);
        moved.with_thermal_energy(thermal)
    }

    /// Free fall: semi-implicit Euler under gravity, with the vertical
    /// position recomputed from the energy budget so the total matches the
    /// pre-step value exactly. `just_left` suppresses track interaction
    /// for the frame in which the skater detached.
    fn step_free_fall(&self, state: SkaterState, dt: f64, just_left: bool) -> SkaterState {
        let e0 = state.total_energy();
        let velocity = state.velocity + Vector2::new(0.0, state.gravity * dt);
        let proposed = state.position + velocity * dt;

        if proposed.y < 0.0 {
            // Strike the ground, conserving the total: the horizontal
            // component survives, the rest becomes thermal.
            let vx = velocity.x;
            if vx.abs() < STOP_SPEED {
                let thermal = e0.max(state.thermal_energy);
                debug_assert!(thermal.is_finite());
                return state.strike_ground(thermal, proposed.x);
            }
            let thermal = (e0 - 0.5 * state.mass * vx * vx).max(state.thermal_energy);
            debug_assert!(thermal.is_finite());
            return state.switch_to_ground(thermal, vx, proposed.x);
        }

        if !just_left && self.has_physical_tracks() {
            if let Some(attached) = self.try_attach(&state, proposed, velocity, e0) {
                return attached;
            }
        }

        // The raw Euler y is not trusted: recompute it so the total energy
        // matches the pre-step value exactly.
        let ke = 0.5 * state.mass * velocity.norm_squared();
        let m_g = state.mass * -state.gravity;
        let y = if m_g > 1.0e-12 {
            (e0 - ke - state.thermal_energy) / m_g
        } else {
            proposed.y
        };
        state.continue_free_fall(velocity, Vector2::new(proposed.x, y))
    }

    /// Crossing test: sample the closest track point at the start,
    /// midpoint and proposed end of the step, pick the sample nearest the
    /// movement segment (three samples so high-curvature regions are not
    /// stepped over), then do an exact segment-intersection check against
    /// the local tangent line.
    fn try_attach(
        &self,
        state: &SkaterState,
        proposed: Vector2<f64>,
        velocity: Vector2<f64>,
        e0: f64,
    ) -> Option<SkaterState> {
        let start = state.position;
        let end = proposed;
        let mid = 0.5 * (start + end);

        let mut best: Option<(TrackId, ClosestPoint, f64)> = None;
        for probe in [start, mid, end] {
            if let Some((id, found)) = self.closest_track_point(probe) {
                let perp = point_to_segment_distance(found.point, start, end);
                let improves = match &best {
                    None => true,
                    Some((_, _, best_perp)) => perp < *best_perp,
                };
                if improves {
                    best = Some((id, found, perp));
                }
            }
        }
        let (id, found, _) = best?;
        let track = self.tracks.get(id)?;
        if !track.is_in_bounds(found.u) {
            return None;
        }

        let tangent = track.tangent_at(found.u);
        let line_a = found.point - tangent * TANGENT_SEGMENT_EXTENT;
        let line_b = found.point + tangent * TANGENT_SEGMENT_EXTENT;
        if !segments_intersect(line_a, line_b, start, end) {
            return None;
        }

        Some(self.attach(state, id, track, &found, velocity, e0))
    }

    fn attach(
        &self,
        state: &SkaterState,
        id: TrackId,
        track: &Track,
        found: &ClosestPoint,
        proposed_velocity: Vector2<f64>,
        e0: f64,
    ) -> SkaterState {
        let u = found.u;
        let tangent = track.tangent_at(u);
        let normal = track.normal_at(u);
        let point = track.point_at(u);
        let on_top_side = normal.dot(&(state.position - point)) >= 0.0;

        // Only the component along the track survives.
        let along = proposed_velocity.dot(&tangent);
        let prior = state.velocity.dot(&tangent);
        let mut speed = along.abs();

        // Direction of travel: the proposed velocity's projection onto the
        // tangent decides, unless the prior velocity projects more
        // strongly, in which case the prior direction wins. Replacing this
        // three-way comparison reintroduces spurious direction flips on
        // attachment.
        let sign = if along.abs() >= prior.abs() {
            if along >= 0.0 { 1.0 } else { -1.0 }
        } else if prior >= 0.0 {
            1.0
        } else {
            -1.0
        };

        // Energy budget: the perpendicular component becomes thermal, but
        // thermal energy never decreases on attachment; if it would, clamp
        // it and take the difference out of kinetic energy instead.
        let pe = -state.mass * state.gravity * point.y;
        let mut thermal = e0 - 0.5 * state.mass * speed * speed - pe;
        if thermal < state.thermal_energy {
            thermal = state.thermal_energy;
            let ke_target = e0 - pe - thermal;
            debug_assert!(
                ke_target >= -1.0e-9,
                "no non-negative kinetic energy on attachment: {}",
                ke_target
            );
            speed = (2.0 * ke_target.max(0.0) / state.mass).sqrt();
        }

        let metric = track.derivative_at(u).norm().max(f64::MIN_POSITIVE);
        state
            .attach_to_track(
                id,
                u,
                sign * speed / metric,
                on_top_side,
                point,
                tangent * (sign * speed),
                thermal,
            )
            .with_angle(tangent.y.atan2(tangent.x))
    }

    /// Riding a track: N Euler sub-steps in (u, u̇), then the energy
    /// correction pass over the whole group.
    fn step_track(&self, state: SkaterState, id: TrackId, dt: f64) -> SkaterState {
        let Some(track) = self.tracks.get(id) else {
            // The track was edited away mid-session; fall freely.
            return self.step_free_fall(state.leave_track(), dt, false);
        };

        let e0 = state.total_energy();
        let pre_thermal = state.thermal_energy;
        let pre_u = state.u;
        let sub_dt = dt / TRACK_SUBSTEPS as f64;

        let mut current = state;
        for i in 0..TRACK_SUBSTEPS {
            match self.track_substep(current, track, sub_dt) {
                TrackStep::Stay(next) => current = next,
                TrackStep::Detach(mut falling) => {
                    // Finish the frame in free fall, suppressing track
                    // interaction so the skater cannot re-collide at once.
                    for _ in i..TRACK_SUBSTEPS {
                        falling = self.step_free_fall(falling, sub_dt, true);
                    }
                    return falling;
                }
                TrackStep::Ground(grounded) => return grounded,
            }
        }

        let absorb_into_thermal =
            self.friction > 0.0 && self.thrust.norm_squared() == 0.0 && !self.track_change_pending;
        correction::correct_energy(current, e0, pre_thermal, pre_u, track, absorb_into_thermal)
    }

    fn track_substep(&self, state: SkaterState, track: &Track, dt: f64) -> TrackStep {
        let metric = track.derivative_at(state.u).norm().max(f64::MIN_POSITIVE);
        let tangent = track.tangent_at(state.u);
        let normal = track.normal_at(state.u);
        let speed = state.u_dot * metric;

        let applied = Vector2::new(0.0, state.mass * state.gravity) + self.thrust;

        let curvature = track.curvature_at(state.u);
        let radius = curvature.radius.abs().min(MAX_CURVATURE_RADIUS);
        let effectively_flat = curvature.radius.abs() >= MAX_CURVATURE_RADIUS;
        // Unit direction toward the curvature centre; a degenerate (flat)
        // bend substitutes the net applied-force direction.
        let to_center = if effectively_flat {
            if applied.norm() > 1.0e-12 {
                applied.normalize()
            } else {
                Vector2::new(0.0, -1.0)
            }
        } else {
            normal * curvature.radius.signum()
        };

        let centripetal = state.mass * speed * speed / radius;
        let applied_radial = applied.dot(&to_center);
        // What the track has to supply on top of gravity and thrust;
        // friction scales with its magnitude.
        let normal_force = centripetal - applied_radial;

        let side_normal = normal * if state.on_top_side { 1.0 } else { -1.0 };
        if self.detachable && !effectively_flat {
            let center_on_riding_side = to_center.dot(&side_normal) > 0.0;
            if !center_on_riding_side && applied_radial < centripetal {
                // The track would have to pull; the skater leaves instead.
                return TrackStep::Detach(detach(state, side_normal));
            }
        }

        let friction_force = if self.friction > 0.0 && speed.abs() > 1.0e-12 {
            tangent * (-speed.signum() * self.friction * normal_force.abs())
        } else {
            Vector2::new(0.0, 0.0)
        };

        let tangential_accel = (applied + friction_force).dot(&tangent) / state.mass;
        let new_speed = speed + tangential_accel * dt;
        let ds = new_speed * dt;
        let du = track.parametric_distance(state.u, ds);
        let new_u = state.u + du;

        if !track.is_in_bounds(new_u) {
            if new_u > track.max_point() && track.slope_to_ground {
                // The high edge meets the ground: flow straight onto it
                // with no thermal-energy discontinuity.
                let edge = track.max_point();
                let end_tangent = track.tangent_at(edge);
                let vx = if end_tangent.x * new_speed >= 0.0 {
                    new_speed.abs()
                } else {
                    -new_speed.abs()
                };
                return TrackStep::Ground(state.switch_to_ground(
                    state.thermal_energy,
                    vx,
                    track.point_at(edge).x,
                ));
            }
            // Fly off the corresponding edge.
            let edge = if new_u < track.min_point() {
                track.min_point()
            } else {
                track.max_point()
            };
            let edge_metric = track.derivative_at(edge).norm().max(f64::MIN_POSITIVE);
            let edge_tangent = track.tangent_at(edge);
            let at_edge = state.update_track_motion(
                edge,
                new_speed / edge_metric,
                track.point_at(edge),
                edge_tangent * new_speed,
            );
            let edge_side =
                track.normal_at(edge) * if state.on_top_side { 1.0 } else { -1.0 };
            return TrackStep::Detach(detach(at_edge, edge_side));
        }

        let new_metric = track.derivative_at(new_u).norm().max(f64::MIN_POSITIVE);
        let new_tangent = track.tangent_at(new_u);
        let friction_heat = friction_force.norm() * ds.abs();
        let next = state
            .update_track_motion(
                new_u,
                new_speed / new_metric,
                track.point_at(new_u),
                new_tangent * new_speed,
            )
            .with_angle(new_tangent.y.atan2(new_tangent.x))
            .with_thermal_energy(state.thermal_energy + friction_heat);
        TrackStep::Stay(next)
    }
}

/// Nudge the skater off the riding surface and blend a sliver of the
/// speed toward the normal, so the next free-fall step cannot re-collide.
fn detach(state: SkaterState, side_normal: Vector2<f64>) -> SkaterState {
    let v = state.velocity;
    let blended =
        v * (1.0 - DETACH_VELOCITY_BLEND) + side_normal * v.norm() * DETACH_VELOCITY_BLEND;
    state
        .leave_track()
        .with_position(state.position + side_normal * DETACH_NUDGE)
        .with_velocity(blended)
}

fn cross2(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Distance from `p` to the segment [a, b].
fn point_to_segment_distance(p: Vector2<f64>, a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 < 1.0e-24 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Exact segment intersection test, touching endpoints included.
fn segments_intersect(
    p1: Vector2<f64>,
    p2: Vector2<f64>,
    p3: Vector2<f64>,
    p4: Vector2<f64>,
) -> bool {
    let d1 = cross2(p4 - p3, p1 - p3);
    let d2 = cross2(p4 - p3, p2 - p3);
    let d3 = cross2(p2 - p1, p3 - p1);
    let d4 = cross2(p2 - p1, p4 - p1);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(p3, p4, p1))
        || (d2 == 0.0 && on_segment(p3, p4, p2))
        || (d3 == 0.0 && on_segment(p1, p2, p3))
        || (d4 == 0.0 && on_segment(p1, p2, p4))
}

fn on_segment(a: Vector2<f64>, b: Vector2<f64>, p: Vector2<f64>) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}
