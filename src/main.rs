use nalgebra::Vector2;
use skatephys::{Engine, DEFAULT_DT};

fn main() {
    // Пример: параболический трек, лыжник падает на него сверху.
    let mut engine = Engine::new();
    let positions: Vec<Vector2<f64>> = (-3..=3)
        .map(|i| {
            let x = i as f64;
            Vector2::new(x, 1.0 + 0.25 * x * x)
        })
        .collect();
    let track_id = engine
        .add_track_from_positions(&positions, true)
        .expect("parabola control points are valid");

    engine.skater.position = Vector2::new(-2.0, 5.0);
    engine.skater.update_energy();
    let e0 = engine.skater.total_energy;
    println!("E0 = {:.3} J", e0);

    let steps = 600; // десять секунд
    for step in 0..steps {
        engine.step(DEFAULT_DT);
        if step % 60 == 0 {
            let s = &engine.skater;
            println!(
                "t = {:.1} s: pos = ({:.3}, {:.3}), KE = {:.3}, PE = {:.3}, thermal = {:.3}, on track: {}",
                step as f64 * DEFAULT_DT,
                s.position.x,
                s.position.y,
                s.kinetic_energy,
                s.potential_energy,
                s.thermal_energy,
                s.track == Some(track_id),
            );
        }
    }

    let drift = engine.skater.total_energy - e0;
    println!("energy drift after {} steps: {:.3e} J", steps, drift);
}
