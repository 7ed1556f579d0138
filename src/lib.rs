//! Физическое ядро 2D-симуляции «лыжник на треке»: сплайновые треки,
//! неизменяемые снимки состояния лыжника, пошаговый движок с коррекцией
//! энергии и редактор треков.

pub mod correction;
pub mod editor;
pub mod engine;
pub mod spline;
pub mod state;
pub mod track;

pub use engine::{Engine, TrackStore, DEFAULT_DT, DEFAULT_GRAVITY, DEFAULT_MASS};
pub use spline::CubicSpline;
pub use state::{Skater, SkaterState};
pub use track::{Bounds, ClosestPoint, ControlPoint, Curvature, Track, TrackId};

#[cfg(target_arch = "wasm32")]
pub mod wasm;
