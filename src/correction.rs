//! Energy-correction passes applied after each on-track sub-step group.
//!
//! Discrete Euler steps along the spline drift the total energy; these
//! heuristics pull it back to the pre-step value by adjusting thermal
//! energy (friction case), tangential speed, or the parametric position.
//! They are idempotent: re-applying a pass to an already-corrected state
//! changes nothing, and thermal energy never drops below its pre-step
//! value.

use crate::state::SkaterState;
use crate::track::Track;

/// Discrepancies below this are accepted as-is.
pub const ENERGY_TOLERANCE: f64 = 1.0e-6;
/// Inner tolerance for the speed rescale / position search.
pub const CORRECTION_TOLERANCE: f64 = 1.0e-8;
/// Iteration cap for the fixed-point speed rescale.
pub const SPEED_RESCALE_MAX_ITERS: usize = 100;
/// Recursive rounds and samples per round for the position binary search.
pub const POSITION_SEARCH_ROUNDS: usize = 10;
pub const POSITION_SEARCH_SAMPLES: usize = 10;

/// Correct `state` so its total energy matches `target_energy` (the
/// pre-step total). `pre_thermal` and `pre_u` are the pre-step thermal
/// energy and parametric position. With `absorb_into_thermal` set (friction
/// active, no thrust, no pending track edit) the discrepancy is pushed into
/// thermal energy first, clamped so thermal never falls below `pre_thermal`.
pub fn correct_energy(
    state: SkaterState,
    target_energy: f64,
    pre_thermal: f64,
    pre_u: f64,
    track: &Track,
    absorb_into_thermal: bool,
) -> SkaterState {
    let mut state = state;
    let de = state.total_energy() - target_energy;
    if de.abs() < ENERGY_TOLERANCE {
        return state;
    }

    if absorb_into_thermal {
        let nudged = state.thermal_energy - de;
        if nudged >= pre_thermal {
            return state.with_thermal_energy(nudged);
        }
        // The full nudge would eat pre-step thermal energy; clamp and let
        // the mechanical corrections take the rest.
        state = state.with_thermal_energy(pre_thermal);
    }

    let de = state.total_energy() - target_energy;
    if de.abs() < ENERGY_TOLERANCE {
        return state;
    }

    if de > 0.0 {
        // Too much energy.
        if state.kinetic_energy() >= de {
            return rescale_speed(state, target_energy, track);
        }
        let relocated = search_alternate_position(state, target_energy, pre_u, track);
        let still = relocated.total_energy() - target_energy;
        if still > ENERGY_TOLERANCE && relocated.kinetic_energy() >= still {
            return rescale_speed(relocated, target_energy, track);
        }
        relocated
    } else {
        // Too little energy: solve v = sqrt(2(E0 - PE - thermal)/m) and
        // point it along the tangent with the existing sign.
        let ke_target =
            (target_energy - state.potential_energy() - state.thermal_energy).max(0.0);
        let speed = (2.0 * ke_target / state.mass).sqrt();
        let sign = if signed_speed(&state, track) < 0.0 {
            -1.0
        } else {
            1.0
        };
        place_on_track(state, track, state.u, sign * speed)
    }
}

/// Metric speed along the track, signed by the direction of travel in u.
pub fn signed_speed(state: &SkaterState, track: &Track) -> f64 {
    state.u_dot * track.derivative_at(state.u).norm()
}

/// Rebuild the state at parametric position `u` with the given signed
/// metric speed directed along the local tangent.
pub fn place_on_track(state: SkaterState, track: &Track, u: f64, speed: f64) -> SkaterState {
    let metric = track.derivative_at(u).norm().max(f64::MIN_POSITIVE);
    let tangent = track.tangent_at(u);
    state.update_track_motion(u, speed / metric, track.point_at(u), tangent * speed)
}

/// Bounded fixed-point search that rescales the tangential speed until the
/// total energy matches the target. Kinetic energy must cover the excess;
/// cap exhaustion keeps the best candidate.
fn rescale_speed(state: SkaterState, target_energy: f64, track: &Track) -> SkaterState {
    let mut current = state;
    for _ in 0..SPEED_RESCALE_MAX_ITERS {
        let de = current.total_energy() - target_energy;
        if de.abs() <= CORRECTION_TOLERANCE {
            return current;
        }
        let ke = current.kinetic_energy();
        if ke <= 0.0 {
            break;
        }
        let factor = ((ke - de) / ke).max(0.0).sqrt();
        let speed = signed_speed(&current, track);
        current = place_on_track(current, track, current.u, speed * factor);
    }
    log::debug!(
        "speed rescale hit the iteration cap; residual dE = {}",
        current.total_energy() - target_energy
    );
    current
}

/// Binary search for a parametric position between the pre- and post-step
/// u whose potential energy best matches the target, keeping the metric
/// speed. Ten recursive rounds of ten samples each.
fn search_alternate_position(
    state: SkaterState,
    target_energy: f64,
    pre_u: f64,
    track: &Track,
) -> SkaterState {
    let speed = signed_speed(&state, track);
    let (range_lo, range_hi) = if pre_u <= state.u {
        (pre_u, state.u)
    } else {
        (state.u, pre_u)
    };
    if range_hi - range_lo <= f64::EPSILON {
        return state;
    }

    let mut lo = range_lo;
    let mut hi = range_hi;
    let mut best = state;
    let mut best_err = (state.total_energy() - target_energy).abs();
    for _ in 0..POSITION_SEARCH_ROUNDS {
        let step = (hi - lo) / (POSITION_SEARCH_SAMPLES - 1) as f64;
        let mut round_best_u = lo;
        let mut round_best_err = f64::INFINITY;
        for i in 0..POSITION_SEARCH_SAMPLES {
            let u = lo + step * i as f64;
            let candidate = place_on_track(state, track, u, speed);
            let err = (candidate.total_energy() - target_energy).abs();
            if err < round_best_err {
                round_best_err = err;
                round_best_u = u;
            }
        }
        if round_best_err < best_err {
            best_err = round_best_err;
            best = place_on_track(state, track, round_best_u, speed);
        }
        lo = (round_best_u - step).max(range_lo);
        hi = (round_best_u + step).min(range_hi);
        if best_err <= CORRECTION_TOLERANCE {
            return best;
        }
    }
    log::debug!(
        "position search exhausted its rounds; residual |dE| = {}",
        best_err
    );
    best
}
