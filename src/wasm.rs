#![cfg(target_arch = "wasm32")]

use crate::editor;
use crate::engine::Engine;
use crate::track::TrackId;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmSkaterSim {
    engine: Engine,
}

#[wasm_bindgen]
impl WasmSkaterSim {
    /// Empty scene: ground only, default skater.
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmSkaterSim {
        WasmSkaterSim {
            engine: Engine::new(),
        }
    }

    /// Build a scene from a config object:
    /// {
    ///   mass?: number, gravity?: number, friction?: number,
    ///   detachable?: bool,
    ///   tracks?: [{ points: [[x, y], ...], physical?: bool }]
    /// }
    #[wasm_bindgen(js_name = "newFromConfig")]
    pub fn new_from_config(config: JsValue) -> Result<WasmSkaterSim, JsValue> {
        let cfg: SceneConfig = serde_wasm_bindgen::from_value(config)
            .map_err(|e| JsValue::from_str(&format!("invalid config: {}", e)))?;
        let mut engine = Engine::new();
        if let Some(mass) = cfg.mass {
            engine.set_mass(mass);
        }
        if let Some(gravity) = cfg.gravity {
            engine.set_gravity(gravity);
        }
        if let Some(friction) = cfg.friction {
            engine.set_friction(friction);
        }
        if let Some(detachable) = cfg.detachable {
            engine.set_detachable(detachable);
        }
        for track in cfg.tracks.unwrap_or_default() {
            let points: Vec<Vector2<f64>> = track
                .points
                .iter()
                .map(|p| Vector2::new(p[0], p[1]))
                .collect();
            engine
                .add_track_from_positions(&points, track.physical.unwrap_or(true))
                .map_err(|e| JsValue::from_str(&e))?;
        }
        Ok(WasmSkaterSim { engine })
    }

    pub fn step(&mut self, dt: f64) {
        self.engine.step(dt);
    }

    pub fn manual_step(&mut self) {
        self.engine.manual_step();
    }

    /// Skater snapshot plus cached energies as a JS object.
    pub fn skater(&self) -> JsValue {
        let s = &self.engine.skater;
        let snapshot = SkaterSnapshot {
            position: [s.position.x, s.position.y],
            velocity: [s.velocity.x, s.velocity.y],
            angle: s.angle,
            track: s.track.map(|id| id.0),
            u: s.u,
            kinetic_energy: s.kinetic_energy,
            potential_energy: s.potential_energy,
            thermal_energy: s.thermal_energy,
            total_energy: s.total_energy,
        };
        serde_wasm_bindgen::to_value(&snapshot).unwrap_or(JsValue::NULL)
    }

    /// Sampled polyline of one track for drawing, as [x0, y0, x1, y1, ...].
    pub fn track_polyline(&self, id: usize, samples: usize) -> Vec<f64> {
        let Some(track) = self.engine.track(TrackId(id)) else {
            return Vec::new();
        };
        let samples = samples.max(2);
        let span = track.max_point() - track.min_point();
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let u = track.min_point() + span * i as f64 / (samples - 1) as f64;
            let p = track.point_at(u);
            out.push(p.x);
            out.push(p.y);
        }
        out
    }

    pub fn track_ids(&self) -> Vec<usize> {
        self.engine.physical_tracks().iter().map(|id| id.0).collect()
    }

    /// All live tracks as [{ id, physical, controlPoints: [[x, y], ...] }].
    pub fn tracks(&self) -> js_sys::Array {
        let out = js_sys::Array::new();
        for id in self.engine.physical_tracks() {
            if let Some(track) = self.engine.track(id) {
                out.push(&track_to_js(id.0, track));
            }
        }
        out
    }

    pub fn add_track(&mut self, points_flat: Vec<f64>, physical: bool) -> Result<usize, JsValue> {
        if points_flat.len() % 2 != 0 {
            return Err(JsValue::from_str("points array must have even length"));
        }
        let points: Vec<Vector2<f64>> = points_flat
            .chunks_exact(2)
            .map(|c| Vector2::new(c[0], c[1]))
            .collect();
        self.engine
            .add_track_from_positions(&points, physical)
            .map(|id| id.0)
            .map_err(|e| JsValue::from_str(&e))
    }

    pub fn remove_track(&mut self, id: usize) -> bool {
        self.engine.remove_track(TrackId(id)).is_some()
    }

    pub fn delete_control_point(&mut self, id: usize, index: usize) -> Result<usize, JsValue> {
        editor::delete_control_point(&mut self.engine, TrackId(id), index)
            .map(|id| id.0)
            .map_err(|e| JsValue::from_str(&e))
    }

    pub fn split_control_point(
        &mut self,
        id: usize,
        index: usize,
        angle: f64,
    ) -> Result<usize, JsValue> {
        editor::split_control_point(&mut self.engine, TrackId(id), index, angle)
            .map(|id| id.0)
            .map_err(|e| JsValue::from_str(&e))
    }

    pub fn join_tracks(&mut self, a: usize, b: usize) -> Result<usize, JsValue> {
        editor::join_tracks(&mut self.engine, TrackId(a), TrackId(b))
            .map(|id| id.0)
            .map_err(|e| JsValue::from_str(&e))
    }

    pub fn set_skater_position(&mut self, x: f64, y: f64) {
        self.engine.skater.position = Vector2::new(x, y);
        self.engine.skater.update_energy();
    }

    pub fn set_dragging(&mut self, dragging: bool) {
        self.engine.skater.dragging = dragging;
        if dragging {
            self.engine.skater.velocity = Vector2::new(0.0, 0.0);
            self.engine.skater.track = None;
            self.engine.skater.u_dot = 0.0;
            self.engine.skater.update_energy();
        }
    }

    pub fn set_mass(&mut self, mass: f64) {
        self.engine.set_mass(mass);
    }

    pub fn set_gravity(&mut self, gravity: f64) {
        self.engine.set_gravity(gravity);
    }

    pub fn set_friction(&mut self, friction: f64) {
        self.engine.set_friction(friction);
    }

    pub fn set_detachable(&mut self, detachable: bool) {
        self.engine.set_detachable(detachable);
    }

    pub fn set_slow_motion_divisor(&mut self, divisor: u32) {
        self.engine.set_slow_motion_divisor(divisor);
    }

    pub fn clear_thermal_energy(&mut self) {
        self.engine.skater.clear_thermal_energy();
    }
}

fn track_to_js(id: usize, track: &crate::track::Track) -> JsValue {
    let obj = js_sys::Object::new();
    let _ = js_sys::Reflect::set(
        &obj,
        &JsValue::from_str("id"),
        &JsValue::from_f64(id as f64),
    );
    let _ = js_sys::Reflect::set(
        &obj,
        &JsValue::from_str("physical"),
        &JsValue::from_bool(track.physical),
    );
    let points = js_sys::Array::new();
    for cp in track.control_points() {
        let pair = js_sys::Array::new();
        pair.push(&JsValue::from_f64(cp.position.x));
        pair.push(&JsValue::from_f64(cp.position.y));
        points.push(&pair);
    }
    let _ = js_sys::Reflect::set(&obj, &JsValue::from_str("controlPoints"), &points);
    JsValue::from(obj)
}

#[derive(Debug, Deserialize)]
struct SceneConfig {
    #[serde(default)]
    mass: Option<f64>,
    #[serde(default)]
    gravity: Option<f64>,
    #[serde(default)]
    friction: Option<f64>,
    #[serde(default)]
    detachable: Option<bool>,
    #[serde(default)]
    tracks: Option<Vec<TrackConfig>>,
}

#[derive(Debug, Deserialize)]
struct TrackConfig {
    points: Vec<[f64; 2]>,
    #[serde(default)]
    physical: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkaterSnapshot {
    position: [f64; 2],
    velocity: [f64; 2],
    angle: f64,
    track: Option<usize>,
    u: f64,
    kinetic_energy: f64,
    potential_energy: f64,
    thermal_energy: f64,
    total_energy: f64,
}
