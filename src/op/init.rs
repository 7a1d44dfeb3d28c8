use std::cell::{Ref, RefCell};

use nalgebra::DVector;

use crate::DaeSolverError;

/// Consistent initial conditions for a DAE system.
///
/// We calculate consistent initial conditions following the approach of
/// Brown, P. N., Hindmarsh, A. C., & Petzold, L. R. (1998). Consistent initial condition
/// calculation for differential-algebraic systems. SIAM Journal on Scientific Computing, 19(5),
/// 1495-1512.
///
/// Given the differential states `u` and algebraic states `v`, the unknowns are `du` and `v`
/// while `u` is held fixed. The iteration matrix is `dF/dy + cj * dF/dy'` at `cj = 1 / h`, so the
/// differential unknowns are scaled as `x_u = du / cj` and the Newton update of `x` is the
/// solution of that matrix with the residual.
pub struct InitOp<'a> {
    differential: &'a [bool],
    cj: f64,
    y: RefCell<DVector<f64>>,
    yp: RefCell<DVector<f64>>,
}

impl<'a> InitOp<'a> {
    pub fn new(differential: &'a [bool], cj: f64, y0: &DVector<f64>, yp0: &DVector<f64>) -> Self {
        Self {
            differential,
            cj,
            y: RefCell::new(y0.clone()),
            yp: RefCell::new(yp0.clone()),
        }
    }

    pub fn cj(&self) -> f64 {
        self.cj
    }

    /// The unknowns `x` for the current state.
    pub fn pack(&self) -> DVector<f64> {
        let y = self.y.borrow();
        let yp = self.yp.borrow();
        DVector::from_fn(y.len(), |i, _| {
            if self.differential[i] {
                yp[i] / self.cj
            } else {
                y[i]
            }
        })
    }

    /// Set the state from the unknowns `x`.
    pub fn unpack(&self, x: &DVector<f64>) {
        let mut y = self.y.borrow_mut();
        let mut yp = self.yp.borrow_mut();
        for (i, &is_diff) in self.differential.iter().enumerate() {
            if is_diff {
                yp[i] = x[i] * self.cj;
            } else {
                y[i] = x[i];
            }
        }
    }

    // r = F(y(x), yp(x))
    pub fn call_inplace(
        &self,
        residual: impl Fn(&DVector<f64>, &DVector<f64>, &mut DVector<f64>) -> Result<(), DaeSolverError>,
        x: &DVector<f64>,
        r: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        self.unpack(x);
        residual(&self.y.borrow(), &self.yp.borrow(), r)
    }

    pub fn y(&self) -> Ref<'_, DVector<f64>> {
        self.y.borrow()
    }

    pub fn yp(&self) -> Ref<'_, DVector<f64>> {
        self.yp.borrow()
    }

    pub fn into_state(self) -> (DVector<f64>, DVector<f64>) {
        (self.y.into_inner(), self.yp.into_inner())
    }
}
