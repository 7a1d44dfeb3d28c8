use nalgebra::DVector;

/// Operations on state vectors used by the solver on top of those provided by nalgebra.
pub trait VectorExt {
    /// Weighted squared norm, `sum((x_i / (|y_i| * rtol + atol_i))^2) / n`.
    fn squared_norm(&self, y: &Self, atol: &Self, rtol: f64) -> f64;

    /// As [VectorExt::squared_norm] but only the components with `include[i] == true` contribute,
    /// and the sum is averaged over the number of included components. Returns zero if no
    /// component is included.
    fn squared_norm_masked(&self, y: &Self, atol: &Self, rtol: f64, include: &[bool]) -> f64;

    /// Given the values of the event indicators `self` at the start of a step and `g1` at the
    /// end, return (a root lies exactly at the end, the largest fraction `g1 / (g1 - g0)` over all
    /// sign changes, index of the indicator with this fraction or -1).
    fn root_finding(&self, g1: &Self) -> (bool, f64, i32);

    fn is_all_finite(&self) -> bool;
}

impl VectorExt for DVector<f64> {
    fn squared_norm(&self, y: &Self, atol: &Self, rtol: f64) -> f64 {
        assert_eq!(y.len(), self.len(), "Vector lengths do not match");
        assert_eq!(atol.len(), self.len(), "Vector lengths do not match");
        if self.is_empty() {
            return 0.0;
        }
        let acc = self
            .iter()
            .zip(y.iter())
            .zip(atol.iter())
            .map(|((xi, yi), ai)| (xi / (yi.abs() * rtol + ai)).powi(2))
            .sum::<f64>();
        acc / self.len() as f64
    }

    fn squared_norm_masked(&self, y: &Self, atol: &Self, rtol: f64, include: &[bool]) -> f64 {
        assert_eq!(include.len(), self.len(), "Vector lengths do not match");
        let mut acc = 0.0;
        let mut count = 0usize;
        for i in 0..self.len() {
            if include[i] {
                acc += (self[i] / (y[i].abs() * rtol + atol[i])).powi(2);
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            acc / count as f64
        }
    }

    fn root_finding(&self, g1: &Self) -> (bool, f64, i32) {
        let mut max_frac = 0.0;
        let mut max_frac_index = -1;
        let mut found_root = false;
        assert_eq!(self.len(), g1.len(), "Vector lengths do not match");
        for i in 0..self.len() {
            let g0 = self[i];
            let g1 = g1[i];
            if g1 == 0.0 {
                found_root = true;
            }
            if g0 * g1 < 0.0 {
                let frac = (g1 / (g1 - g0)).abs();
                if frac > max_frac {
                    max_frac = frac;
                    max_frac_index = i as i32;
                }
            }
        }
        (found_root, max_frac, max_frac_index)
    }

    fn is_all_finite(&self) -> bool {
        self.iter().all(|x| x.is_finite())
    }
}
