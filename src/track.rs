use crate::spline::CubicSpline;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;

/// Samples per spline segment in the closest-point search lattice.
pub const SEARCH_SAMPLES_PER_SEGMENT: usize = 20;
/// The search lattice overhangs the parametric range by this much on each
/// end so off-track approach and departure stay detectable.
pub const SEARCH_OVERHANG: f64 = 1.0e-6;
/// Fixed iteration count for the closest-point refinement.
pub const SEARCH_REFINEMENTS: usize = 40;
/// Chord subdivisions used by `arc_length`. Deliberately coarse.
pub const ARC_LENGTH_SUBDIVISIONS: usize = 10;
/// Bisection tolerance and iteration cap for `parametric_distance`.
pub const PARAMETRIC_DISTANCE_TOLERANCE: f64 = 1.0e-8;
pub const PARAMETRIC_DISTANCE_MAX_ITERS: usize = 100;
/// Sample count for the track-wide extrema scans.
pub const EXTREMA_SAMPLES: usize = 400;
/// `smooth` succeeds once the minimum radius of curvature reaches this (m).
pub const SMOOTH_RADIUS_THRESHOLD: f64 = 0.03;
/// Try budget for the `smooth` spiral search.
pub const SMOOTH_MAX_TRIES: usize = 80;
/// Guard for near-zero tangent lengths and curvature denominators.
pub const GEOMETRY_EPSILON: f64 = 1.0e-12;

/// Stable handle into the engine's track store. Non-owning; the skater
/// references its track through one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub usize);

/// One user-placed point the spline passes through. `snap_target` remembers
/// another track's endpoint position while the user is lining tracks up;
/// only the editor reads it.
#[derive(Debug, Clone)]
pub struct ControlPoint {
    pub position: Vector2<f64>,
    pub snap_target: Option<Vector2<f64>>,
}

impl ControlPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            position: Vector2::new(x, y),
            snap_target: None,
        }
    }
}

/// Signed curvature at a parametric position: `radius` carries the sign of
/// the curvature itself, `center` is the curvature center. Degenerate
/// (near-straight) regions produce a huge but finite radius; callers clamp
/// before dividing by it.
#[derive(Debug, Clone, Copy)]
pub struct Curvature {
    pub radius: f64,
    pub center: Vector2<f64>,
}

/// Result of the closest-point search.
#[derive(Debug, Clone, Copy)]
pub struct ClosestPoint {
    pub u: f64,
    pub point: Vector2<f64>,
    pub distance_squared: f64,
}

/// Axis-aligned region the editor confines `smooth` perturbations to.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min: Vector2<f64>,
    pub max: Vector2<f64>,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min: Vector2::new(min_x, min_y),
            max: Vector2::new(max_x, max_y),
        }
    }

    pub fn contains(&self, p: Vector2<f64>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

#[derive(Debug, Clone, Copy)]
struct SearchSample {
    u: f64,
    point: Vector2<f64>,
}

/// Parametric track: an ordered, fixed-length list of control points with
/// two fitted cubic splines x(u), y(u). Control point i sits at u = i/n,
/// so u ranges over [0, (n-1)/n]. Any edit that changes the point count
/// builds a brand-new `Track`.
#[derive(Debug)]
pub struct Track {
    control_points: Vec<ControlPoint>,
    x_spline: CubicSpline,
    y_spline: CubicSpline,
    /// Lazy closest-point lattice, invalidated by `fit`.
    search_lattice: OnceCell<Vec<SearchSample>>,
    /// Whether the skater may interact with this track.
    pub physical: bool,
    /// Whether leaving the high-u edge flows smoothly onto the ground.
    pub slope_to_ground: bool,
    /// Tracks this one was produced from by join/split. Editor-only.
    pub parents: Vec<TrackId>,
}

impl Clone for Track {
    fn clone(&self) -> Self {
        Self {
            control_points: self.control_points.clone(),
            x_spline: self.x_spline.clone(),
            y_spline: self.y_spline.clone(),
            search_lattice: OnceCell::new(),
            physical: self.physical,
            slope_to_ground: self.slope_to_ground,
            parents: self.parents.clone(),
        }
    }
}

impl Track {
    /// Build a track through the given control points. At least three
    /// points are required; positions must be finite.
    pub fn new(control_points: Vec<ControlPoint>, physical: bool) -> Result<Self, String> {
        let n = control_points.len();
        if n < 3 {
            return Err(format!("track needs at least 3 control points, got {}", n));
        }
        for (i, cp) in control_points.iter().enumerate() {
            if !cp.position.x.is_finite() || !cp.position.y.is_finite() {
                return Err(format!("control point {} is not finite", i));
            }
        }
        let (x_spline, y_spline) = fit_splines(&control_points)?;
        Ok(Self {
            control_points,
            x_spline,
            y_spline,
            search_lattice: OnceCell::new(),
            physical,
            slope_to_ground: false,
            parents: Vec::new(),
        })
    }

    /// Convenience constructor from bare positions.
    pub fn from_positions(positions: &[Vector2<f64>], physical: bool) -> Result<Self, String> {
        let points = positions
            .iter()
            .map(|p| ControlPoint {
                position: *p,
                snap_target: None,
            })
            .collect();
        Self::new(points, physical)
    }

    pub fn control_points(&self) -> &[ControlPoint] {
        &self.control_points
    }

    pub fn control_point_count(&self) -> usize {
        self.control_points.len()
    }

    /// Move one control point and refit. Panics on a foreign index: that
    /// cannot happen through correct editor logic.
    pub fn move_control_point(&mut self, index: usize, position: Vector2<f64>) {
        assert!(
            index < self.control_points.len(),
            "control point index {} out of range",
            index
        );
        self.control_points[index].position = position;
        self.fit();
    }

    /// Translate the whole track (used by the editor's bump-above-ground).
    pub fn translate(&mut self, delta: Vector2<f64>) {
        for cp in self.control_points.iter_mut() {
            cp.position += delta;
        }
        self.fit();
    }

    /// Refit both splines and drop derived caches. Must run after any
    /// control point moves.
    pub fn fit(&mut self) {
        let (x_spline, y_spline) =
            fit_splines(&self.control_points).expect("refit of a valid track cannot fail");
        self.x_spline = x_spline;
        self.y_spline = y_spline;
        self.search_lattice = OnceCell::new();
    }

    /// Low end of the parametric range.
    pub fn min_point(&self) -> f64 {
        0.0
    }

    /// High end of the parametric range: (n-1)/n.
    pub fn max_point(&self) -> f64 {
        let n = self.control_points.len() as f64;
        (n - 1.0) / n
    }

    pub fn is_in_bounds(&self, u: f64) -> bool {
        u >= self.min_point() && u <= self.max_point()
    }

    pub fn point_at(&self, u: f64) -> Vector2<f64> {
        Vector2::new(self.x_spline.value(u), self.y_spline.value(u))
    }

    /// Unnormalized first derivative (dx/du, dy/du). Its norm converts
    /// between parametric speed and metric speed.
    pub fn derivative_at(&self, u: f64) -> Vector2<f64> {
        Vector2::new(self.x_spline.derivative(u), self.y_spline.derivative(u))
    }

    /// Unit tangent. Falls back to +x for a degenerate (near-zero) derivative.
    pub fn tangent_at(&self, u: f64) -> Vector2<f64> {
        let d = self.derivative_at(u);
        let norm = d.norm();
        if norm < GEOMETRY_EPSILON {
            Vector2::new(1.0, 0.0)
        } else {
            d / norm
        }
    }

    /// Unit normal: the tangent rotated +90 degrees.
    pub fn normal_at(&self, u: f64) -> Vector2<f64> {
        let t = self.tangent_at(u);
        Vector2::new(-t.y, t.x)
    }

    /// Signed curvature: k = (x'y'' - y'x'') / (x'^2 + y'^2)^1.5,
    /// radius = 1/k, center = point + normal/k. A near-zero k is clamped
    /// away from zero so the result stays finite (callers additionally
    /// clamp |radius| before using it as a force denominator).
    pub fn curvature_at(&self, u: f64) -> Curvature {
        let dx = self.x_spline.derivative(u);
        let dy = self.y_spline.derivative(u);
        let ddx = self.x_spline.second_derivative(u);
        let ddy = self.y_spline.second_derivative(u);
        let speed2 = dx * dx + dy * dy;
        let denom = speed2.powf(1.5).max(GEOMETRY_EPSILON);
        let mut k = (dx * ddy - dy * ddx) / denom;
        if k.abs() < GEOMETRY_EPSILON {
            k = if k < 0.0 {
                -GEOMETRY_EPSILON
            } else {
                GEOMETRY_EPSILON
            };
        }
        let point = self.point_at(u);
        let normal = self.normal_at(u);
        Curvature {
            radius: 1.0 / k,
            center: point + normal / k,
        }
    }

    /// Arc length between two parametric positions, approximated by a chord
    /// sum over a small fixed subdivision count. The reduced resolution is a
    /// deliberate performance/precision trade-off.
    pub fn arc_length(&self, u0: f64, u1: f64) -> f64 {
        let (lo, hi) = if u0 <= u1 { (u0, u1) } else { (u1, u0) };
        let step = (hi - lo) / ARC_LENGTH_SUBDIVISIONS as f64;
        let mut length = 0.0;
        let mut prev = self.point_at(lo);
        for i in 1..=ARC_LENGTH_SUBDIVISIONS {
            let next = self.point_at(lo + step * i as f64);
            length += (next - prev).norm();
            prev = next;
        }
        length
    }

    /// Find the parametric offset du such that the arc length from u0 to
    /// u0+du is approximately ds (signed). Bisection over [-1, 2]; cap
    /// exhaustion is recoverable: log and return the best guess.
    pub fn parametric_distance(&self, u0: f64, ds: f64) -> f64 {
        let signed_arc = |du: f64| -> f64 {
            if du >= 0.0 {
                self.arc_length(u0, u0 + du)
            } else {
                -self.arc_length(u0 + du, u0)
            }
        };

        let mut lo = -1.0;
        let mut hi = 2.0;
        let mut mid = 0.0;
        for _ in 0..PARAMETRIC_DISTANCE_MAX_ITERS {
            mid = 0.5 * (lo + hi);
            let err = signed_arc(mid) - ds;
            if err.abs() <= PARAMETRIC_DISTANCE_TOLERANCE {
                return mid;
            }
            if err < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        log::warn!(
            "parametric_distance hit the iteration cap at u0={}, ds={}; using best guess {}",
            u0,
            ds,
            mid
        );
        mid
    }

    fn search_lattice(&self) -> &[SearchSample] {
        self.search_lattice.get_or_init(|| {
            let segments = self.control_points.len() - 1;
            let count = segments * SEARCH_SAMPLES_PER_SEGMENT + 1;
            let lo = self.min_point() - SEARCH_OVERHANG;
            let hi = self.max_point() + SEARCH_OVERHANG;
            let mut lattice = Vec::with_capacity(count);
            for i in 0..count {
                let u = lo + (hi - lo) * i as f64 / (count - 1) as f64;
                lattice.push(SearchSample {
                    u,
                    point: self.point_at(u),
                });
            }
            lattice
        })
    }

    /// Closest point on the track to `p`: coarse scan over the sample
    /// lattice, then a fixed number of two-neighbour refinement steps with a
    /// halving parametric stride. Bit-stable for a fixed track and point.
    pub fn closest_point(&self, p: Vector2<f64>) -> ClosestPoint {
        let lattice = self.search_lattice();
        let mut best_u = lattice[0].u;
        let mut best_d2 = (lattice[0].point - p).norm_squared();
        for sample in &lattice[1..] {
            let d2 = (sample.point - p).norm_squared();
            if d2 < best_d2 {
                best_d2 = d2;
                best_u = sample.u;
            }
        }

        let spacing = (lattice[1].u - lattice[0].u).abs();
        let mut u = best_u;
        let mut du = spacing * 0.5;
        let mut d_center = best_d2;
        for _ in 0..SEARCH_REFINEMENTS {
            let d_minus = (self.point_at(u - du) - p).norm_squared();
            let d_plus = (self.point_at(u + du) - p).norm_squared();
            if d_minus < d_center && d_minus <= d_plus {
                u -= du;
                d_center = d_minus;
            } else if d_plus < d_center {
                u += du;
                d_center = d_plus;
            }
            du *= 0.5;
        }

        ClosestPoint {
            u,
            point: self.point_at(u),
            distance_squared: d_center,
        }
    }

    /// Lowest sampled y over the whole track.
    pub fn lowest_y(&self) -> f64 {
        let mut lowest = f64::INFINITY;
        for i in 0..=EXTREMA_SAMPLES {
            let u = self.sample_u(i);
            let y = self.y_spline.value(u);
            if y < lowest {
                lowest = y;
            }
        }
        lowest
    }

    /// Smallest sampled |radius of curvature| over the whole track.
    pub fn minimum_radius_of_curvature(&self) -> f64 {
        self.point_of_highest_curvature().1
    }

    /// Parametric position of the sharpest bend and its |radius|.
    pub fn point_of_highest_curvature(&self) -> (f64, f64) {
        let mut best_u = self.min_point();
        let mut best_r = f64::INFINITY;
        for i in 0..=EXTREMA_SAMPLES {
            let u = self.sample_u(i);
            let r = self.curvature_at(u).radius.abs();
            if r < best_r {
                best_r = r;
                best_u = u;
            }
        }
        (best_u, best_r)
    }

    fn sample_u(&self, i: usize) -> f64 {
        self.min_point()
            + (self.max_point() - self.min_point()) * i as f64 / EXTREMA_SAMPLES as f64
    }

    /// Spiraling local search that perturbs one control point until the
    /// whole track's minimum radius of curvature clears the threshold, or
    /// the try budget runs out. Candidates outside `region` are skipped.
    /// On exhaustion the original position is restored and false returned.
    pub fn smooth(&mut self, index: usize, region: &Bounds) -> bool {
        assert!(
            index < self.control_points.len(),
            "smooth: control point index {} out of range",
            index
        );
        if self.minimum_radius_of_curvature() >= SMOOTH_RADIUS_THRESHOLD {
            return true;
        }

        let original = self.control_points[index].position;
        for attempt in 0..SMOOTH_MAX_TRIES {
            // Expanding radius, rotating angle: 8 directions per ring.
            let radius = 0.02 * (1.0 + (attempt / 8) as f64);
            let angle = attempt as f64 * std::f64::consts::FRAC_PI_4;
            let candidate = original + Vector2::new(radius * angle.cos(), radius * angle.sin());
            if !region.contains(candidate) {
                continue;
            }
            self.control_points[index].position = candidate;
            self.fit();
            if self.minimum_radius_of_curvature() >= SMOOTH_RADIUS_THRESHOLD {
                return true;
            }
        }

        self.control_points[index].position = original;
        self.fit();
        log::debug!(
            "smooth exhausted {} tries around control point {}",
            SMOOTH_MAX_TRIES,
            index
        );
        false
    }
}

fn fit_splines(control_points: &[ControlPoint]) -> Result<(CubicSpline, CubicSpline), String> {
    let n = control_points.len();
    let mut knots = Vec::with_capacity(n);
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for (i, cp) in control_points.iter().enumerate() {
        knots.push(i as f64 / n as f64);
        xs.push(cp.position.x);
        ys.push(cp.position.y);
    }
    let x_spline = CubicSpline::fit(&knots, &xs)?;
    let y_spline = CubicSpline::fit(&knots, &ys)?;
    Ok((x_spline, y_spline))
}
