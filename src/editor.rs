//! Track editing: delete/split control points, join tracks, bump above
//! ground, and re-resolution of an attached skater across a rebuild.
//!
//! Every edit builds a brand-new `Track` from a recomputed control-point
//! list (point counts of a live track are never mutated), smooths the
//! affected region, bumps the result above the ground, and swaps it into
//! the engine's store under a fresh id. Misuse (foreign index, deleting
//! below the minimum point count) is a programmer error and fails fast.

use crate::engine::Engine;
use crate::state::SkaterState;
use crate::track::{ControlPoint, Track, TrackId};
use nalgebra::Vector2;

/// Distance between the two points a split produces.
pub const SPLIT_SEPARATION: f64 = 0.2;

/// Pre-edit skater info needed to re-resolve `(track, u)` on the
/// replacement track.
struct PreEdit {
    state: SkaterState,
    /// The skater's "up" vector before the edit (side-signed normal).
    up: Vector2<f64>,
}

/// Delete control point `index`, replacing the track under a new id.
/// The track must keep at least 3 points afterwards.
pub fn delete_control_point(
    engine: &mut Engine,
    id: TrackId,
    index: usize,
) -> Result<TrackId, String> {
    let track = engine
        .track(id)
        .ok_or_else(|| format!("no track with id {:?}", id))?;
    let n = track.control_points().len();
    assert!(index < n, "control point index {} out of range {}", index, n);
    assert!(n > 3, "cannot delete below 3 control points");

    let mut points: Vec<ControlPoint> = track.control_points().to_vec();
    points.remove(index);
    let smooth_at = index.min(points.len() - 1);
    let new_track = rebuild(engine, track, points, &[id], smooth_at)?;
    Ok(replace_tracks(engine, &[id], new_track))
}

/// Split control point `index` into two points separated along the
/// direction `angle` (radians), replacing the track under a new id.
pub fn split_control_point(
    engine: &mut Engine,
    id: TrackId,
    index: usize,
    angle: f64,
) -> Result<TrackId, String> {
    let track = engine
        .track(id)
        .ok_or_else(|| format!("no track with id {:?}", id))?;
    let n = track.control_points().len();
    assert!(index < n, "control point index {} out of range {}", index, n);

    let offset = Vector2::new(angle.cos(), angle.sin()) * (0.5 * SPLIT_SEPARATION);
    let mut points: Vec<ControlPoint> = track.control_points().to_vec();
    let position = points[index].position;
    points[index] = ControlPoint {
        position: position - offset,
        snap_target: None,
    };
    points.insert(
        index + 1,
        ControlPoint {
            position: position + offset,
            snap_target: None,
        },
    );
    // Smooth a neighbour rather than either of the freshly split points:
    // the spiral search would otherwise relocate one of the pair and
    // collapse the separation the split just created.
    let smooth_at = if index > 0 { index - 1 } else { index + 2 };
    let new_track = rebuild(engine, track, points, &[id], smooth_at)?;
    Ok(replace_tracks(engine, &[id], new_track))
}

/// Join two tracks end to end, replacing both under a new id. The
/// endpoint pairing with the smallest gap decides the orientation; the
/// two meeting endpoints merge into their midpoint.
pub fn join_tracks(engine: &mut Engine, a: TrackId, b: TrackId) -> Result<TrackId, String> {
    assert!(a != b, "cannot join a track with itself");
    let track_a = engine
        .track(a)
        .ok_or_else(|| format!("no track with id {:?}", a))?;
    let track_b = engine
        .track(b)
        .ok_or_else(|| format!("no track with id {:?}", b))?;

    let mut pa: Vec<ControlPoint> = track_a.control_points().to_vec();
    let mut pb: Vec<ControlPoint> = track_b.control_points().to_vec();

    // Four possible endpoint pairings: a-tail/b-head, a-tail/b-tail,
    // a-head/b-head, a-head/b-tail.
    let gap = |p: &ControlPoint, q: &ControlPoint| (p.position - q.position).norm_squared();
    let tail_head = gap(pa.last().unwrap_or(&pa[0]), &pb[0]);
    let tail_tail = gap(pa.last().unwrap_or(&pa[0]), pb.last().unwrap_or(&pb[0]));
    let head_head = gap(&pa[0], &pb[0]);
    let head_tail = gap(&pa[0], pb.last().unwrap_or(&pb[0]));
    let smallest = tail_head.min(tail_tail).min(head_head).min(head_tail);
    if smallest == tail_tail {
        pb.reverse();
    } else if smallest == head_head {
        pa.reverse();
    } else if smallest == head_tail {
        std::mem::swap(&mut pa, &mut pb);
    }

    // Merge the meeting endpoints into their midpoint.
    let junction = pa.len() - 1;
    let meeting = 0.5 * (pa[junction].position + pb[0].position);
    let mut points = pa;
    points[junction] = ControlPoint {
        position: meeting,
        snap_target: None,
    };
    points.extend(pb.into_iter().skip(1));

    let physical = track_a.physical || track_b.physical;
    let mut new_track = Track::new(points, physical)?;
    new_track.slope_to_ground = track_a.slope_to_ground || track_b.slope_to_ground;
    new_track.parents = vec![a, b];
    new_track.smooth(junction, &engine.bounds);
    bump_above_ground(&mut new_track);
    Ok(replace_tracks(engine, &[a, b], new_track))
}

/// Translate the track straight up if any part of it dips below ground.
pub fn bump_above_ground(track: &mut Track) {
    let lowest = track.lowest_y();
    if lowest < 0.0 {
        track.translate(Vector2::new(0.0, -lowest));
    }
}

/// Build the replacement track for a single-parent edit: same flags,
/// lineage extended, smoothed around the edited index, bumped above
/// ground.
fn rebuild(
    engine: &Engine,
    source: &Track,
    points: Vec<ControlPoint>,
    parents: &[TrackId],
    smooth_at: usize,
) -> Result<Track, String> {
    let mut track = Track::new(points, source.physical)?;
    track.slope_to_ground = source.slope_to_ground;
    track.parents = source
        .parents
        .iter()
        .chain(parents.iter())
        .copied()
        .collect();
    track.smooth(smooth_at, &engine.bounds);
    bump_above_ground(&mut track);
    Ok(track)
}

/// Swap the replacement in: capture the skater's pre-edit frame, remove
/// the old tracks, add the new one, and re-resolve the skater onto it.
/// Marks the track change pending so the next correction pass skips the
/// thermal nudge.
fn replace_tracks(engine: &mut Engine, old: &[TrackId], new_track: Track) -> TrackId {
    let pre_edit = engine.skater.track.and_then(|ridden| {
        if !old.contains(&ridden) {
            return None;
        }
        let state = engine.skater.snapshot();
        let track = engine.track(ridden)?;
        let side = if state.on_top_side { 1.0 } else { -1.0 };
        Some(PreEdit {
            state,
            up: track.normal_at(state.u) * side,
        })
    });

    for id in old {
        engine.tracks.remove(*id);
    }
    let new_id = engine.tracks.add(new_track);
    engine.track_change_pending = true;

    if let Some(pre_edit) = pre_edit {
        reattach_skater(engine, new_id, &pre_edit);
    } else if let Some(ridden) = engine.skater.track {
        if old.contains(&ridden) {
            // Attached but the old track is gone and unresolvable.
            engine.skater.track = None;
            engine.skater.u_dot = 0.0;
        }
    }
    new_id
}

/// Re-resolve `(track, u)` on the replacement: closest point to the old
/// position, `on_top_side` flipped when the new normal is antiparallel to
/// the old up vector, u̇ sign flipped when the direction of travel
/// reverses under the new parameterization. Speed magnitude is preserved;
/// the next correction pass settles the remaining discrepancy.
fn reattach_skater(engine: &mut Engine, new_id: TrackId, pre_edit: &PreEdit) {
    let state = pre_edit.state;
    let Some(track) = engine.track(new_id) else {
        return;
    };
    let found = track.closest_point(state.position);
    let u = found.u.clamp(track.min_point(), track.max_point());

    let normal = track.normal_at(u);
    let on_top_side = if normal.dot(&pre_edit.up) < 0.0 {
        !state.on_top_side
    } else {
        state.on_top_side
    };

    let tangent = track.tangent_at(u);
    let metric = track.derivative_at(u).norm().max(f64::MIN_POSITIVE);
    let speed = state.velocity.norm();
    let sign = if state.velocity.dot(&tangent) < 0.0 {
        -1.0
    } else {
        1.0
    };

    let next = state
        .update_track_and_speed(Some(new_id), u, sign * speed / metric, on_top_side)
        .with_position(track.point_at(u))
        .with_velocity(tangent * (sign * speed))
        .with_angle(tangent.y.atan2(tangent.x));
    engine.skater.apply(&next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn wavy_track(engine: &mut Engine) -> TrackId {
        engine
            .add_track_from_positions(
                &[
                    Vector2::new(-4.0, 3.0),
                    Vector2::new(-2.0, 1.0),
                    Vector2::new(0.0, 2.0),
                    Vector2::new(2.0, 1.0),
                    Vector2::new(4.0, 3.0),
                ],
                true,
            )
            .unwrap()
    }

    #[test]
    fn delete_rebuilds_under_a_fresh_id() {
        let mut engine = Engine::new();
        let id = wavy_track(&mut engine);
        let new_id = delete_control_point(&mut engine, id, 2).unwrap();
        assert_ne!(new_id, id);
        assert!(engine.track(id).is_none());
        let rebuilt = engine.track(new_id).unwrap();
        assert_eq!(rebuilt.control_points().len(), 4);
        assert_eq!(rebuilt.parents, vec![id]);
    }

    #[test]
    #[should_panic]
    fn delete_below_three_points_is_fatal() {
        let mut engine = Engine::new();
        let id = engine
            .add_track_from_positions(
                &[
                    Vector2::new(0.0, 1.0),
                    Vector2::new(1.0, 2.0),
                    Vector2::new(2.0, 1.0),
                ],
                true,
            )
            .unwrap();
        let _ = delete_control_point(&mut engine, id, 1);
    }

    #[test]
    #[should_panic]
    fn foreign_index_is_fatal() {
        let mut engine = Engine::new();
        let id = wavy_track(&mut engine);
        let _ = delete_control_point(&mut engine, id, 17);
    }

    #[test]
    fn split_separates_one_point_into_two() {
        let mut engine = Engine::new();
        let id = wavy_track(&mut engine);
        let new_id = split_control_point(&mut engine, id, 2, 0.0).unwrap();
        let rebuilt = engine.track(new_id).unwrap();
        assert_eq!(rebuilt.control_points().len(), 6);
        let left = rebuilt.control_points()[2].position;
        let right = rebuilt.control_points()[3].position;
        // The smoothing pass may move a neighbour but must leave the split
        // pair itself fully separated.
        assert_relative_eq!((right - left).norm(), SPLIT_SEPARATION, epsilon = 1e-12);
        assert!(left.x < right.x);
    }

    #[test]
    fn splitting_the_first_point_smooths_a_point_past_the_pair() {
        let mut engine = Engine::new();
        let id = wavy_track(&mut engine);
        let new_id = split_control_point(&mut engine, id, 0, 0.5).unwrap();
        let rebuilt = engine.track(new_id).unwrap();
        assert_eq!(rebuilt.control_points().len(), 6);
        let left = rebuilt.control_points()[0].position;
        let right = rebuilt.control_points()[1].position;
        assert_relative_eq!((right - left).norm(), SPLIT_SEPARATION, epsilon = 1e-12);
    }

    #[test]
    fn join_merges_the_meeting_endpoints() {
        let mut engine = Engine::new();
        let a = engine
            .add_track_from_positions(
                &[
                    Vector2::new(-4.0, 2.0),
                    Vector2::new(-2.0, 1.0),
                    Vector2::new(0.0, 1.0),
                ],
                true,
            )
            .unwrap();
        let b = engine
            .add_track_from_positions(
                &[
                    Vector2::new(0.5, 1.0),
                    Vector2::new(2.0, 1.0),
                    Vector2::new(4.0, 2.0),
                ],
                true,
            )
            .unwrap();
        let joined = join_tracks(&mut engine, a, b).unwrap();
        assert!(engine.track(a).is_none());
        assert!(engine.track(b).is_none());
        let track = engine.track(joined).unwrap();
        // 3 + 3 points, two merged into one at the junction midpoint.
        assert_eq!(track.control_points().len(), 5);
        assert_eq!(track.parents, vec![a, b]);
        let junction = track.control_points()[2].position;
        assert_abs_diff_eq!(junction.x, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn join_reverses_a_backwards_partner() {
        let mut engine = Engine::new();
        let a = engine
            .add_track_from_positions(
                &[
                    Vector2::new(0.0, 1.0),
                    Vector2::new(1.0, 1.0),
                    Vector2::new(2.0, 1.0),
                ],
                true,
            )
            .unwrap();
        // Runs right to left: its tail is nearest a's tail.
        let b = engine
            .add_track_from_positions(
                &[
                    Vector2::new(5.0, 1.0),
                    Vector2::new(4.0, 1.0),
                    Vector2::new(3.0, 1.0),
                ],
                true,
            )
            .unwrap();
        let joined = join_tracks(&mut engine, a, b).unwrap();
        let track = engine.track(joined).unwrap();
        let xs: Vec<f64> = track.control_points().iter().map(|p| p.position.x).collect();
        // Monotone left to right after reversal.
        for pair in xs.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn bump_lifts_a_sunken_track() {
        let mut track = Track::from_positions(
            &[
                Vector2::new(-2.0, -1.0),
                Vector2::new(0.0, -2.0),
                Vector2::new(2.0, -1.0),
            ],
            true,
        )
        .unwrap();
        bump_above_ground(&mut track);
        assert!(track.lowest_y() >= -1.0e-9);
    }

    #[test]
    fn skater_survives_an_edit_of_the_ridden_track() {
        let mut engine = Engine::new();
        let id = wavy_track(&mut engine);
        let track = engine.track(id).unwrap();
        let u = 0.5 * track.max_point();
        let point = track.point_at(u);
        let tangent = track.tangent_at(u);
        let metric = track.derivative_at(u).norm();

        let state = engine
            .skater
            .snapshot()
            .update_track_and_speed(Some(id), u, 2.0 / metric, true)
            .with_position(point)
            .with_velocity(tangent * 2.0);
        engine.skater.apply(&state);

        let new_id = delete_control_point(&mut engine, id, 4).unwrap();
        assert_eq!(engine.skater.track, Some(new_id));
        // Speed magnitude is preserved across the rebuild.
        assert_relative_eq!(engine.skater.velocity.norm(), 2.0, epsilon = 1e-9);
        let rebuilt = engine.track(new_id).unwrap();
        assert!(rebuilt.is_in_bounds(engine.skater.u));
    }

    #[test]
    fn parametric_speed_sign_flips_when_the_parameterization_reverses() {
        let mut engine = Engine::new();
        let a = engine
            .add_track_from_positions(
                &[
                    Vector2::new(0.0, 1.0),
                    Vector2::new(1.0, 1.0),
                    Vector2::new(2.0, 1.0),
                ],
                true,
            )
            .unwrap();
        let b = engine
            .add_track_from_positions(
                &[
                    Vector2::new(5.0, 1.0),
                    Vector2::new(4.0, 1.0),
                    Vector2::new(3.0, 1.0),
                ],
                true,
            )
            .unwrap();

        // Riding b toward increasing u means moving in -x.
        let track = engine.track(b).unwrap();
        let u = 0.5 * track.max_point();
        let metric = track.derivative_at(u).norm();
        let tangent = track.tangent_at(u);
        let state = engine
            .skater
            .snapshot()
            .update_track_and_speed(Some(b), u, 1.5 / metric, true)
            .with_position(track.point_at(u))
            .with_velocity(tangent * 1.5);
        engine.skater.apply(&state);
        assert!(engine.skater.velocity.x < 0.0);

        // The joined track runs left to right, so travelling in -x is now
        // travelling toward decreasing u.
        let joined = join_tracks(&mut engine, a, b).unwrap();
        assert_eq!(engine.skater.track, Some(joined));
        assert!(engine.skater.u_dot < 0.0);
        assert!(engine.skater.velocity.x < 0.0);
    }
}
