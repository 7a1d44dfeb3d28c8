use nalgebra::{DMatrix, DVector};

use crate::IndexType;

/// Integration state of the BDF driver: the last accepted point and the modified divided
/// differences `diff` that define the interpolating polynomial over the last steps.
///
/// `diff` has `MAX_ORDER + 3` columns, column `i` holding `D^i y` scaled to step size `h`. The
/// sensitivities carry their own differences in `sdiff`, rescaled together with `diff`.
#[derive(Clone, Debug)]
pub struct BdfState {
    pub(crate) order: usize,
    pub(crate) t: f64,
    pub(crate) h: f64,
    pub(crate) y: DVector<f64>,
    pub(crate) yp: DVector<f64>,
    pub(crate) diff: DMatrix<f64>,
    pub(crate) s: Vec<DVector<f64>>,
    pub(crate) sp: Vec<DVector<f64>>,
    pub(crate) sdiff: Vec<DMatrix<f64>>,
}

impl BdfState {
    pub(crate) const MAX_ORDER: IndexType = 5;

    pub fn new(
        t: f64,
        h: f64,
        y: DVector<f64>,
        yp: DVector<f64>,
        s: Vec<DVector<f64>>,
        sp: Vec<DVector<f64>>,
    ) -> Self {
        let n = y.len();
        let sdiff = vec![DMatrix::zeros(n, Self::MAX_ORDER + 3); s.len()];
        let mut state = Self {
            order: 1,
            t,
            h,
            y,
            yp,
            diff: DMatrix::zeros(n, Self::MAX_ORDER + 3),
            s,
            sp,
            sdiff,
        };
        state.initialise_diff_to_first_order();
        state.initialise_sdiff_to_first_order();
        state
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn y(&self) -> &DVector<f64> {
        &self.y
    }

    pub fn yp(&self) -> &DVector<f64> {
        &self.yp
    }

    pub fn s(&self) -> &[DVector<f64>] {
        &self.s
    }

    pub fn initialise_diff_to_first_order(&mut self) {
        self.order = 1;
        self.diff.fill(0.0);
        self.diff.column_mut(0).copy_from(&self.y);
        self.diff.column_mut(1).copy_from(&self.yp);
        self.diff.column_mut(1).scale_mut(self.h);
    }

    pub fn initialise_sdiff_to_first_order(&mut self) {
        for ((sdiff, s), sp) in self.sdiff.iter_mut().zip(self.s.iter()).zip(self.sp.iter()) {
            sdiff.fill(0.0);
            sdiff.column_mut(0).copy_from(s);
            sdiff.column_mut(1).copy_from(sp);
            sdiff.column_mut(1).scale_mut(self.h);
        }
    }
}

/// Evaluate the interpolating polynomial defined by `diff` at `t`, where the last accepted point
/// is `t1` and the step size is `h`.
pub fn interpolate_from_diff(
    t: f64,
    t1: f64,
    h: f64,
    order: usize,
    diff: &DMatrix<f64>,
) -> DVector<f64> {
    let mut time_factor = 1.0;
    let mut order_summation = diff.column(0).into_owned();
    for i in 0..order {
        let i_t = i as f64;
        time_factor *= (t - (t1 - h * i_t)) / (h * (1.0 + i_t));
        order_summation.axpy(time_factor, &diff.column(i + 1), 1.0);
    }
    order_summation
}

/// Time derivative of the polynomial of [interpolate_from_diff].
pub fn interpolate_derivative_from_diff(
    t: f64,
    t1: f64,
    h: f64,
    order: usize,
    diff: &DMatrix<f64>,
) -> DVector<f64> {
    let mut time_factor = 1.0;
    let mut time_factor_dot = 0.0;
    let mut order_summation = DVector::zeros(diff.nrows());
    for i in 0..order {
        let i_t = i as f64;
        let denom = h * (1.0 + i_t);
        time_factor_dot = time_factor_dot * (t - (t1 - h * i_t)) / denom + time_factor / denom;
        time_factor *= (t - (t1 - h * i_t)) / denom;
        order_summation.axpy(time_factor_dot, &diff.column(i + 1), 1.0);
    }
    order_summation
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_order_state() {
        let y = DVector::from_vec(vec![1.0, 2.0]);
        let yp = DVector::from_vec(vec![-1.0, 0.0]);
        let s = vec![DVector::from_vec(vec![0.5, 0.0])];
        let sp = vec![DVector::from_vec(vec![2.0, 0.0])];
        let state = BdfState::new(0.0, 0.1, y, yp, s, sp);
        assert_eq!(state.order(), 1);
        assert_eq!(state.diff.ncols(), BdfState::MAX_ORDER + 3);
        assert_relative_eq!(state.diff[(0, 1)], -0.1);
        assert_relative_eq!(state.sdiff[0][(0, 1)], 0.2);
    }

    #[test]
    fn test_interpolate_quadratic() {
        // y(t) = t^2 with t1 = 1, h = 0.5: D^0 = 1, D^1 = y(1) - y(0.5) = 0.75,
        // D^2 = D^1(1) - D^1(0.5) = 0.75 - 0.25 = 0.5
        let mut diff = DMatrix::zeros(1, 8);
        diff[(0, 0)] = 1.0;
        diff[(0, 1)] = 0.75;
        diff[(0, 2)] = 0.5;
        for &t in &[0.25, 0.6, 0.9, 1.0] {
            let y = interpolate_from_diff(t, 1.0, 0.5, 2, &diff);
            assert_relative_eq!(y[0], t * t, epsilon = 1e-12);
            let yp = interpolate_derivative_from_diff(t, 1.0, 0.5, 2, &diff);
            assert_relative_eq!(yp[0], 2.0 * t, epsilon = 1e-12);
        }
    }
}
