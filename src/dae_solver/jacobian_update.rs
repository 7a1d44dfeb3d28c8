use crate::IndexType;

/// Outcome of the last attempt of the driver, which decides whether the Jacobian is rebuilt
/// before the next attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverState {
    StepSuccess,
    FirstConvergenceFail,
    SecondConvergenceFail,
    ErrorTestFail,
}

/// Refresh policy for the Jacobian used by the modified Newton corrector.
///
/// The Jacobian is rebuilt when it has been marked stale (the corrector failed with it, or it was
/// evaluated at a state that has since been discarded), or after `update_jacobian_after_steps`
/// accepted steps. Drift of the shift constant is checked separately by
/// [crate::linear_solver::FactorizedJacobian::is_valid_for].
pub struct JacobianUpdate {
    steps_since_jacobian_eval: IndexType,
    cj_at_last_jacobian_update: f64,
    update_jacobian_after_steps: IndexType,
    stale: bool,
}

impl JacobianUpdate {
    pub fn new(update_jacobian_after_steps: IndexType) -> Self {
        Self {
            steps_since_jacobian_eval: 0,
            cj_at_last_jacobian_update: 1.0,
            update_jacobian_after_steps,
            stale: true,
        }
    }

    pub fn update_jacobian(&mut self, cj: f64) {
        self.steps_since_jacobian_eval = 0;
        self.cj_at_last_jacobian_update = cj;
        self.stale = false;
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn step(&mut self) {
        self.steps_since_jacobian_eval += 1;
    }

    pub fn cj_at_last_jacobian_update(&self) -> f64 {
        self.cj_at_last_jacobian_update
    }

    pub fn check_jacobian_update(&self, state: SolverState) -> bool {
        match state {
            SolverState::StepSuccess => {
                self.stale || self.steps_since_jacobian_eval >= self.update_jacobian_after_steps
            }
            SolverState::FirstConvergenceFail | SolverState::SecondConvergenceFail => self.stale,
            // a rejected step says nothing about the quality of the Jacobian
            SolverState::ErrorTestFail => false,
        }
    }
}

impl Default for JacobianUpdate {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_after_steps() {
        let mut update = JacobianUpdate::new(2);
        assert!(update.check_jacobian_update(SolverState::StepSuccess));
        update.update_jacobian(10.0);
        assert_eq!(update.cj_at_last_jacobian_update(), 10.0);
        assert!(!update.check_jacobian_update(SolverState::StepSuccess));
        update.step();
        assert!(!update.check_jacobian_update(SolverState::StepSuccess));
        update.step();
        assert!(update.check_jacobian_update(SolverState::StepSuccess));
        assert!(!update.check_jacobian_update(SolverState::ErrorTestFail));
    }

    #[test]
    fn test_refresh_when_stale() {
        let mut update = JacobianUpdate::new(20);
        update.update_jacobian(1.0);
        assert!(!update.check_jacobian_update(SolverState::FirstConvergenceFail));
        update.mark_stale();
        assert!(update.is_stale());
        assert!(update.check_jacobian_update(SolverState::FirstConvergenceFail));
        assert!(update.check_jacobian_update(SolverState::SecondConvergenceFail));
    }
}
