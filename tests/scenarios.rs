//! End-to-end stepping scenarios over whole simulated sessions.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use nalgebra::Vector2;
use skatephys::{Engine, TrackId, DEFAULT_DT};

/// Symmetric valley: y = 1 + x²/4 over x in [-3, 3].
fn add_parabola(engine: &mut Engine) -> TrackId {
    let positions: Vec<Vector2<f64>> = (-3..=3)
        .map(|i| {
            let x = i as f64;
            Vector2::new(x, 1.0 + 0.25 * x * x)
        })
        .collect();
    engine.add_track_from_positions(&positions, true).unwrap()
}

/// Put the skater at rest on the track at parametric position `u`.
fn release_on_track(engine: &mut Engine, id: TrackId, u: f64) {
    let track = engine.track(id).unwrap();
    let point = track.point_at(u);
    let state = engine
        .skater
        .snapshot()
        .update_track_and_speed(Some(id), u, 0.0, true)
        .with_position(point);
    engine.skater.apply(&state);
}

#[test]
fn frictionless_ride_conserves_energy_over_ten_thousand_steps() {
    let mut engine = Engine::new();
    let id = add_parabola(&mut engine);
    let u = 0.1 * engine.track(id).unwrap().max_point();
    release_on_track(&mut engine, id, u);
    let e0 = engine.skater.total_energy;

    for _ in 0..10_000 {
        engine.step(DEFAULT_DT);
    }
    assert_eq!(engine.skater.track, Some(id), "skater left the valley");
    assert!(
        (engine.skater.total_energy - e0).abs() < 1.0e-6,
        "energy drifted by {}",
        engine.skater.total_energy - e0
    );
}

#[test]
fn thermal_energy_is_monotone_under_friction() {
    let mut engine = Engine::new();
    engine.set_friction(0.02);
    let id = add_parabola(&mut engine);
    let u = 0.1 * engine.track(id).unwrap().max_point();
    release_on_track(&mut engine, id, u);
    let e0 = engine.skater.total_energy;

    let mut last_thermal = engine.skater.thermal_energy;
    for _ in 0..3_000 {
        engine.step(DEFAULT_DT);
        assert!(
            engine.skater.thermal_energy >= last_thermal - 1.0e-12,
            "thermal energy decreased: {} -> {}",
            last_thermal,
            engine.skater.thermal_energy
        );
        last_thermal = engine.skater.thermal_energy;
        assert_abs_diff_eq!(engine.skater.total_energy, e0, epsilon = 1e-4);
    }
    assert!(engine.skater.thermal_energy > 0.0);
}

// Scenario: skater at rest on frictional ground must stay at rest.
#[test]
fn resting_on_frictional_ground_stays_at_rest() {
    let mut engine = Engine::new();
    engine.set_friction(0.5);
    for _ in 0..300 {
        engine.step(DEFAULT_DT);
        assert_relative_eq!(engine.skater.velocity.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(engine.skater.position.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(engine.skater.thermal_energy, 0.0, epsilon = 1e-12);
    }
}

// Scenario: released at rest on a frictionless valley, the skater must come
// back up to the release height on the far side.
#[test]
fn frictionless_valley_round_trip_returns_to_release_height() {
    let mut engine = Engine::new();
    let id = add_parabola(&mut engine);
    let u = 0.1 * engine.track(id).unwrap().max_point();
    release_on_track(&mut engine, id, u);
    let release_y = engine.skater.position.y;

    // Run until the first turning point on the far side.
    let mut moved = false;
    let mut turning_y = None;
    for _ in 0..2_000 {
        let before = engine.skater.u_dot;
        engine.step(DEFAULT_DT);
        let after = engine.skater.u_dot;
        if after.abs() > 0.1 {
            moved = true;
        }
        if moved && before > 0.0 && after <= 0.0 {
            turning_y = Some(engine.skater.position.y);
            break;
        }
    }
    let turning_y = turning_y.expect("no turning point reached");
    assert_abs_diff_eq!(turning_y, release_y, epsilon = 1e-3);
}

// Scenario: free fall with no tracks ends on the ground with all the
// potential energy converted to thermal.
#[test]
fn free_fall_onto_the_ground_converts_potential_to_thermal() {
    let mut engine = Engine::new();
    engine.skater.position = Vector2::new(0.0, 5.0);
    engine.skater.update_energy();
    let e0 = engine.skater.total_energy;

    for _ in 0..600 {
        engine.step(DEFAULT_DT);
    }
    assert_relative_eq!(engine.skater.position.y, 0.0, epsilon = 1e-12);
    assert_relative_eq!(engine.skater.velocity.norm(), 0.0, epsilon = 1e-12);
    assert!((engine.skater.thermal_energy - e0).abs() < 1.0e-6);
    assert!((engine.skater.total_energy - e0).abs() < 1.0e-6);
}

// Scenario: dropped above a track, the skater must end the fall attached,
// with the velocity component perpendicular to the track gone.
#[test]
fn drop_onto_a_track_attaches_without_perpendicular_velocity() {
    let mut engine = Engine::new();
    engine.set_detachable(false);
    let id = add_parabola(&mut engine);
    engine.skater.position = Vector2::new(0.0, 4.0);
    engine.skater.update_energy();
    let e0 = engine.skater.total_energy;

    let mut attached = false;
    for _ in 0..600 {
        engine.step(DEFAULT_DT);
        if engine.skater.track.is_some() {
            attached = true;
            break;
        }
    }
    assert!(attached, "skater fell through the track");
    assert_eq!(engine.skater.track, Some(id));

    let track = engine.track(id).unwrap();
    let normal = track.normal_at(engine.skater.u);
    let perpendicular = engine.skater.velocity.dot(&normal);
    assert_abs_diff_eq!(perpendicular, 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(engine.skater.total_energy, e0, epsilon = 1e-6);
}

#[test]
fn editing_the_ridden_track_keeps_the_session_alive() {
    let mut engine = Engine::new();
    engine.set_detachable(false);
    let id = add_parabola(&mut engine);
    let u = 0.2 * engine.track(id).unwrap().max_point();
    release_on_track(&mut engine, id, u);
    for _ in 0..120 {
        engine.step(DEFAULT_DT);
    }
    assert_eq!(engine.skater.track, Some(id));

    let new_id = skatephys::editor::delete_control_point(&mut engine, id, 6).unwrap();
    assert_eq!(engine.skater.track, Some(new_id));
    // Stepping continues without panicking or losing the skater.
    for _ in 0..120 {
        engine.step(DEFAULT_DT);
    }
    assert!(engine.skater.total_energy.is_finite());
}
