use crate::track::TrackId;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Неизменяемый снимок лыжника на один шаг интегрирования.
///
/// Каждая операция перехода возвращает НОВОЕ состояние и не трогает
/// приёмник; между последовательными состояниями нет разделяемых
/// изменяемых данных. Снимок живёт в пределах одного тика: создаётся из
/// живого `Skater`, прогоняется через движок и записывается обратно.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SkaterState {
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub mass: f64,
    /// Ускорение свободного падения, отрицательный скаляр (м/с²).
    pub gravity: f64,
    /// Трек, к которому лыжник прикреплён (невладеющая ссылка).
    pub track: Option<TrackId>,
    /// Параметрическая позиция u на треке.
    pub u: f64,
    /// Параметрическая скорость du/dt; знак — направление движения по u.
    pub u_dot: f64,
    /// С какой стороны трека едет лыжник.
    pub on_top_side: bool,
    pub angle: f64,
    /// Пока пользователь тащит лыжника, физика не работает.
    pub dragging: bool,
    /// Тепловая энергия, рассеянная трением. Инвариант: неотрицательна и
    /// не убывает, кроме явного сброса пользователем.
    pub thermal_energy: f64,
}

impl SkaterState {
    /// Проверка инвариантов при каждом построении: все числа конечны,
    /// тепловая энергия неотрицательна. Нарушение — ошибка логики выше по
    /// стеку: в debug-сборке падаем, в release зажимаем, чтобы не ронять
    /// интерактивную сессию.
    fn validated(mut self) -> Self {
        debug_assert!(self.position.x.is_finite(), "non-finite position.x");
        debug_assert!(self.position.y.is_finite(), "non-finite position.y");
        debug_assert!(self.velocity.x.is_finite(), "non-finite velocity.x");
        debug_assert!(self.velocity.y.is_finite(), "non-finite velocity.y");
        debug_assert!(self.u.is_finite() && self.u_dot.is_finite(), "non-finite u/u_dot");
        debug_assert!(
            self.thermal_energy >= 0.0,
            "negative thermal energy: {}",
            self.thermal_energy
        );
        if self.thermal_energy < 0.0 {
            self.thermal_energy = 0.0;
        }
        self
    }

    /// Кинетическая энергия: ½mv².
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.norm_squared()
    }

    /// Потенциальная энергия: -m·g·y (g отрицательна, значит PE растёт с высотой).
    pub fn potential_energy(&self) -> f64 {
        -self.mass * self.gravity * self.position.y
    }

    pub fn total_energy(&self) -> f64 {
        self.kinetic_energy() + self.potential_energy() + self.thermal_energy
    }

    pub fn speed(&self) -> f64 {
        self.velocity.norm()
    }

    pub fn with_thermal_energy(self, thermal_energy: f64) -> Self {
        Self {
            thermal_energy,
            ..self
        }
        .validated()
    }

    pub fn with_position(self, position: Vector2<f64>) -> Self {
        Self { position, ..self }.validated()
    }

    pub fn with_velocity(self, velocity: Vector2<f64>) -> Self {
        Self { velocity, ..self }.validated()
    }

    pub fn with_dragging(self, dragging: bool) -> Self {
        Self { dragging, ..self }
    }

    /// Угол наклона фигурки (вдоль касательной на треке).
    pub fn with_angle(self, angle: f64) -> Self {
        Self { angle, ..self }.validated()
    }

    /// Открепиться от трека: ссылка очищается, параметрическая скорость
    /// обнуляется.
    pub fn leave_track(self) -> Self {
        Self {
            track: None,
            u_dot: 0.0,
            ..self
        }
        .validated()
    }

    /// Прикрепиться к треку в точке u.
    #[allow(clippy::too_many_arguments)]
    pub fn attach_to_track(
        self,
        track: TrackId,
        u: f64,
        u_dot: f64,
        on_top_side: bool,
        position: Vector2<f64>,
        velocity: Vector2<f64>,
        thermal_energy: f64,
    ) -> Self {
        Self {
            track: Some(track),
            u,
            u_dot,
            on_top_side,
            position,
            velocity,
            thermal_energy,
            ..self
        }
        .validated()
    }

    /// Переход на землю с сохранением полной энергии: горизонтальная
    /// скорость задаётся снаружи из компоненты вдоль земли, y = 0.
    pub fn switch_to_ground(self, thermal_energy: f64, velocity_x: f64, position_x: f64) -> Self {
        Self {
            track: None,
            u_dot: 0.0,
            on_top_side: true,
            angle: 0.0,
            position: Vector2::new(position_x, 0.0),
            velocity: Vector2::new(velocity_x, 0.0),
            thermal_energy,
            ..self
        }
        .validated()
    }

    /// Удар о землю с полной остановкой (вся кинетика уже переведена в
    /// тепло вызывающей стороной).
    pub fn strike_ground(self, thermal_energy: f64, position_x: f64) -> Self {
        self.switch_to_ground(thermal_energy, 0.0, position_x)
    }

    /// Продолжить свободное падение с новыми скоростью и позицией.
    pub fn continue_free_fall(self, velocity: Vector2<f64>, position: Vector2<f64>) -> Self {
        Self {
            track: None,
            u_dot: 0.0,
            velocity,
            position,
            ..self
        }
        .validated()
    }

    /// Шаг движения по треку: новые u, u̇, позиция и скорость.
    pub fn update_track_motion(
        self,
        u: f64,
        u_dot: f64,
        position: Vector2<f64>,
        velocity: Vector2<f64>,
    ) -> Self {
        Self {
            u,
            u_dot,
            position,
            velocity,
            ..self
        }
        .validated()
    }

    /// Перепривязка после перестройки трека редактором: новая ссылка,
    /// позиция на треке и, при необходимости, перевёрнутые сторона/знак u̇.
    pub fn update_track_and_speed(
        self,
        track: Option<TrackId>,
        u: f64,
        u_dot: f64,
        on_top_side: bool,
    ) -> Self {
        Self {
            track,
            u,
            u_dot,
            on_top_side,
            ..self
        }
        .validated()
    }
}

/// Живой лыжник: авторитетное изменяемое состояние между тиками.
/// Кэшированные энергии нужны GUI, чтобы перерисоваться сразу после
/// изменения массы или гравитации даже на паузе.
#[derive(Debug, Clone)]
pub struct Skater {
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub mass: f64,
    pub gravity: f64,
    pub track: Option<TrackId>,
    pub u: f64,
    pub u_dot: f64,
    pub on_top_side: bool,
    pub angle: f64,
    pub dragging: bool,
    pub thermal_energy: f64,
    pub kinetic_energy: f64,
    pub potential_energy: f64,
    pub total_energy: f64,
}

impl Skater {
    pub fn new(mass: f64, gravity: f64, position: Vector2<f64>) -> Self {
        let mut skater = Self {
            position,
            velocity: Vector2::new(0.0, 0.0),
            mass,
            gravity,
            track: None,
            u: 0.0,
            u_dot: 0.0,
            on_top_side: true,
            angle: 0.0,
            dragging: false,
            thermal_energy: 0.0,
            kinetic_energy: 0.0,
            potential_energy: 0.0,
            total_energy: 0.0,
        };
        skater.update_energy();
        skater
    }

    /// Снимок для движка.
    pub fn snapshot(&self) -> SkaterState {
        SkaterState {
            position: self.position,
            velocity: self.velocity,
            mass: self.mass,
            gravity: self.gravity,
            track: self.track,
            u: self.u,
            u_dot: self.u_dot,
            on_top_side: self.on_top_side,
            angle: self.angle,
            dragging: self.dragging,
            thermal_energy: self.thermal_energy,
        }
    }

    /// Записать результат шага обратно и пересчитать кэш энергий.
    pub fn apply(&mut self, state: &SkaterState) {
        self.position = state.position;
        self.velocity = state.velocity;
        self.mass = state.mass;
        self.gravity = state.gravity;
        self.track = state.track;
        self.u = state.u;
        self.u_dot = state.u_dot;
        self.on_top_side = state.on_top_side;
        self.angle = state.angle;
        self.thermal_energy = state.thermal_energy;
        self.update_energy();
    }

    /// Пересчитать кэш энергий из текущих полей.
    pub fn update_energy(&mut self) {
        let state = self.snapshot();
        self.kinetic_energy = state.kinetic_energy();
        self.potential_energy = state.potential_energy();
        self.total_energy = state.total_energy();
    }

    /// Единственный разрешённый сброс тепловой энергии — явное действие
    /// пользователя вне физического ядра.
    pub fn clear_thermal_energy(&mut self) {
        self.thermal_energy = 0.0;
        self.update_energy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn base_state() -> SkaterState {
        SkaterState {
            position: Vector2::new(1.0, 2.0),
            velocity: Vector2::new(3.0, -1.0),
            mass: 50.0,
            gravity: -9.8,
            track: None,
            u: 0.0,
            u_dot: 0.0,
            on_top_side: true,
            angle: 0.0,
            dragging: false,
            thermal_energy: 5.0,
        }
    }

    #[test]
    fn energies_add_up() {
        let s = base_state();
        assert_relative_eq!(s.kinetic_energy(), 0.5 * 50.0 * 10.0, epsilon = 1e-12);
        assert_relative_eq!(s.potential_energy(), 50.0 * 9.8 * 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            s.total_energy(),
            s.kinetic_energy() + s.potential_energy() + 5.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn potential_energy_grows_with_height() {
        let s = base_state();
        let higher = s.with_position(Vector2::new(1.0, 3.0));
        assert!(higher.potential_energy() > s.potential_energy());
    }

    #[test]
    fn transitions_leave_the_receiver_unchanged() {
        let s = base_state();
        let _ = s.with_thermal_energy(100.0);
        let _ = s.leave_track();
        let _ = s.switch_to_ground(5.0, 2.0, 0.0);
        assert_relative_eq!(s.thermal_energy, 5.0, epsilon = 1e-15);
        assert_relative_eq!(s.position.y, 2.0, epsilon = 1e-15);
        assert!(s.track.is_none());
    }

    #[test]
    fn leave_track_clears_track_and_parametric_speed() {
        let s = SkaterState {
            track: Some(TrackId(3)),
            u: 0.4,
            u_dot: 1.5,
            ..base_state()
        };
        let left = s.leave_track();
        assert!(left.track.is_none());
        assert_relative_eq!(left.u_dot, 0.0, epsilon = 1e-15);
    }

    #[test]
    fn switch_to_ground_pins_y_and_vertical_velocity() {
        let s = base_state();
        let grounded = s.switch_to_ground(7.0, 2.5, 4.0);
        assert_relative_eq!(grounded.position.y, 0.0, epsilon = 1e-15);
        assert_relative_eq!(grounded.velocity.y, 0.0, epsilon = 1e-15);
        assert_relative_eq!(grounded.velocity.x, 2.5, epsilon = 1e-15);
        assert_relative_eq!(grounded.potential_energy(), 0.0, epsilon = 1e-15);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn negative_thermal_energy_is_fatal_in_debug() {
        let _ = base_state().with_thermal_energy(-1.0);
    }

    #[test]
    fn skater_round_trips_through_snapshot() {
        let mut skater = Skater::new(50.0, -9.8, Vector2::new(0.0, 4.0));
        let state = skater.snapshot().with_velocity(Vector2::new(1.0, 0.0));
        skater.apply(&state);
        assert_relative_eq!(skater.velocity.x, 1.0, epsilon = 1e-15);
        assert_relative_eq!(skater.kinetic_energy, 25.0, epsilon = 1e-12);
        assert_relative_eq!(
            skater.total_energy,
            25.0 + 50.0 * 9.8 * 4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn clear_thermal_energy_is_the_only_reset() {
        let mut skater = Skater::new(50.0, -9.8, Vector2::new(0.0, 0.0));
        skater.thermal_energy = 12.0;
        skater.update_energy();
        assert_relative_eq!(skater.total_energy, 12.0, epsilon = 1e-12);
        skater.clear_thermal_energy();
        assert_relative_eq!(skater.thermal_energy, 0.0, epsilon = 1e-15);
    }
}
