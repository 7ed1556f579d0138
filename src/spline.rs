//! Натуральный кубический сплайн по одной координате.
//!
//! Трек хранит два таких сплайна: x(u) и y(u). Граничные условия —
//! натуральные (вторая производная на концах равна нулю), система
//! решается прогонкой (трёхдиагональное исключение Гаусса).

/// Кубический сплайн через узлы (t_i, y_i), t_i строго возрастают.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    /// Вторые производные в узлах (m[0] = m[n-1] = 0 для натурального сплайна).
    second_derivatives: Vec<f64>,
}

impl CubicSpline {
    /// Построить сплайн. Требуется не меньше двух узлов.
    pub fn fit(knots: &[f64], values: &[f64]) -> Result<Self, String> {
        let n = knots.len();
        if n < 2 {
            return Err(format!("cubic spline needs at least 2 knots, got {}", n));
        }
        if values.len() != n {
            return Err(format!(
                "knot/value length mismatch: {} vs {}",
                n,
                values.len()
            ));
        }
        for w in knots.windows(2) {
            if w[1] <= w[0] {
                return Err("spline knots must be strictly increasing".to_string());
            }
        }

        let m = solve_natural_system(knots, values);
        Ok(Self {
            knots: knots.to_vec(),
            values: values.to_vec(),
            second_derivatives: m,
        })
    }

    pub fn len(&self) -> usize {
        self.knots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    /// Значение сплайна в точке t. Вне диапазона узлов — линейное
    /// продолжение крайнего сегмента (нужно решётке поиска ближайшей
    /// точки, которая выступает на 1e-6 за края трека).
    pub fn value(&self, t: f64) -> f64 {
        let n = self.knots.len();
        let t0 = self.knots[0];
        let t1 = self.knots[n - 1];
        if t < t0 {
            return self.values[0] + self.derivative(t0) * (t - t0);
        }
        if t > t1 {
            return self.values[n - 1] + self.derivative(t1) * (t - t1);
        }

        let k = self.segment_index(t);
        let (a, b, h) = self.segment_weights(k, t);
        let m0 = self.second_derivatives[k];
        let m1 = self.second_derivatives[k + 1];
        a * self.values[k]
            + b * self.values[k + 1]
            + ((a * a * a - a) * m0 + (b * b * b - b) * m1) * h * h / 6.0
    }

    /// Первая производная dy/dt.
    pub fn derivative(&self, t: f64) -> f64 {
        let n = self.knots.len();
        let t_clamped = t.clamp(self.knots[0], self.knots[n - 1]);
        let k = self.segment_index(t_clamped);
        let (a, b, h) = self.segment_weights(k, t_clamped);
        let m0 = self.second_derivatives[k];
        let m1 = self.second_derivatives[k + 1];
        (self.values[k + 1] - self.values[k]) / h
            - (3.0 * a * a - 1.0) / 6.0 * h * m0
            + (3.0 * b * b - 1.0) / 6.0 * h * m1
    }

    /// Вторая производная d²y/dt². За краями — ноль (линейное продолжение).
    pub fn second_derivative(&self, t: f64) -> f64 {
        let n = self.knots.len();
        if t < self.knots[0] || t > self.knots[n - 1] {
            return 0.0;
        }
        let k = self.segment_index(t);
        let (a, b, _h) = self.segment_weights(k, t);
        a * self.second_derivatives[k] + b * self.second_derivatives[k + 1]
    }

    /// Индекс сегмента [k, k+1], содержащего t (двоичный поиск).
    fn segment_index(&self, t: f64) -> usize {
        let n = self.knots.len();
        let mut lo = 0usize;
        let mut hi = n - 1;
        while lo < hi - 1 {
            let mid = (lo + hi) / 2;
            if self.knots[mid] <= t {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn segment_weights(&self, k: usize, t: f64) -> (f64, f64, f64) {
        let h = self.knots[k + 1] - self.knots[k];
        let a = (self.knots[k + 1] - t) / h;
        let b = 1.0 - a;
        (a, b, h)
    }
}

/// Прогонка для вторых производных натурального сплайна.
fn solve_natural_system(knots: &[f64], values: &[f64]) -> Vec<f64> {
    let n = knots.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        // Два узла: отрезок прямой, вторые производные нулевые.
        return m;
    }

    // Трёхдиагональная система для внутренних узлов 1..n-1.
    let interior = n - 2;
    let mut diag = vec![0.0; interior];
    let mut upper = vec![0.0; interior];
    let mut lower = vec![0.0; interior];
    let mut rhs = vec![0.0; interior];
    for i in 0..interior {
        let h0 = knots[i + 1] - knots[i];
        let h1 = knots[i + 2] - knots[i + 1];
        lower[i] = h0 / 6.0;
        diag[i] = (h0 + h1) / 3.0;
        upper[i] = h1 / 6.0;
        rhs[i] = (values[i + 2] - values[i + 1]) / h1 - (values[i + 1] - values[i]) / h0;
    }

    // Прямой ход.
    for i in 1..interior {
        let w = lower[i] / diag[i - 1];
        diag[i] -= w * upper[i - 1];
        rhs[i] -= w * rhs[i - 1];
    }
    // Обратный ход.
    m[interior] = rhs[interior - 1] / diag[interior - 1];
    for i in (0..interior - 1).rev() {
        m[i + 1] = (rhs[i] - upper[i] * m[i + 2]) / diag[i];
    }
    m
}
