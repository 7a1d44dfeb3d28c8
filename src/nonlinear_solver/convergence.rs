use log::trace;
use nalgebra::DVector;

use crate::{vector::VectorExt, IndexType};

/// Convergence test for Newton iterations, based on the estimated contraction rate of the
/// iteration.
#[derive(Clone)]
pub struct Convergence<'a> {
    pub rtol: f64,
    pub atol: &'a DVector<f64>,
    tol: f64,
    divergence_rate: f64,
    max_iter: IndexType,
    niter: IndexType,
    old_norm: Option<f64>,
    last_rate: Option<f64>,
}

pub enum ConvergenceStatus {
    Converged,
    Diverged,
    Continue,
    MaximumIterations,
}

impl<'a> Convergence<'a> {
    pub fn new(rtol: f64, atol: &'a DVector<f64>) -> Self {
        Self {
            rtol,
            atol,
            tol: 0.33,
            divergence_rate: 0.9,
            max_iter: 10,
            niter: 0,
            old_norm: None,
            last_rate: None,
        }
    }

    pub fn with_tolerance(mut self, tol: f64, divergence_rate: f64) -> Self {
        self.tol = tol;
        self.divergence_rate = divergence_rate;
        self
    }

    pub fn max_iter(&self) -> IndexType {
        self.max_iter
    }
    pub fn set_max_iter(&mut self, value: IndexType) {
        self.max_iter = value;
    }
    pub fn niter(&self) -> IndexType {
        self.niter
    }
    /// Contraction rate estimated during the last solve, if more than one iteration was taken.
    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }

    pub fn reset(&mut self) {
        self.niter = 0;
        self.old_norm = None;
        self.last_rate = None;
    }

    pub fn norm(&self, dy: &DVector<f64>, y: &DVector<f64>) -> f64 {
        dy.squared_norm(y, self.atol, self.rtol).sqrt()
    }

    fn check_norm(&mut self, norm: f64) -> ConvergenceStatus {
        self.niter += 1;
        trace!("  Iteration {}, norm = {:.3e}", self.niter, norm);
        // if norm is zero then we are done
        if norm <= f64::EPSILON {
            return ConvergenceStatus::Converged;
        }
        let eta = if let Some(old_norm) = self.old_norm {
            let rate = (norm / old_norm).powf(1.0 / (self.niter - 1) as f64);
            self.last_rate = Some(rate);

            // check if iteration is diverging
            if rate > self.divergence_rate {
                trace!("  Diverged with rate {:.3e}", rate);
                return ConvergenceStatus::Diverged;
            }

            // if iteration is not going to converge in max_iter
            // (assuming the current rate), then abort
            let remaining = self.max_iter.saturating_sub(self.niter) as i32;
            if rate.powi(remaining) / (1.0 - rate) * norm > self.tol {
                return ConvergenceStatus::Diverged;
            }

            rate / (1.0 - rate)
        } else {
            20.0
        };

        // check if iteration is converged
        if eta * norm < self.tol {
            return ConvergenceStatus::Converged;
        }
        if self.niter >= self.max_iter {
            return ConvergenceStatus::MaximumIterations;
        }
        ConvergenceStatus::Continue
    }

    /// Check the norm of the latest Newton update `dy`, weighted relative to `y`.
    pub fn check_new_iteration(&mut self, dy: &DVector<f64>, y: &DVector<f64>) -> ConvergenceStatus {
        let norm = self.norm(dy, y);
        let status = self.check_norm(norm);
        if self.niter == 1 {
            self.old_norm = Some(norm);
        }
        status
    }
}
