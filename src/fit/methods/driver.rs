//! Running argmin solvers on a `ScalarObjective`.
//!
//! argmin works on `Vec<f64>` parameters; nalgebra vectors are converted at
//! this boundary. Every cost and gradient evaluation is checked against the
//! evaluation budget, and the lowest cost seen is remembered so that a run
//! ending in a solver error still yields its best point.

use std::cell::{Cell, RefCell};

use argmin::core::{
    CostFunction, Error, Gradient, Hessian, IterState, KV, Problem, Solver, State, TerminationReason,
    TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use nalgebra::DVector;

use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

/// Fresh runs from the best point after a solver error that still made progress.
const MAX_RESTARTS: usize = 3;

/// State of solvers that only use gradients.
pub(crate) type GradientState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;
/// State of solvers that also carry a (inverse) Hessian.
pub(crate) type HessianState = IterState<Vec<f64>, Vec<f64>, (), Vec<Vec<f64>>, (), f64>;
/// State of derivative-free simplex solvers.
pub(crate) type SimplexState = IterState<Vec<f64>, (), (), (), (), f64>;

pub(crate) type MoreThuente = MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64>;

struct Tracker {
    best: RefCell<(DVector<f64>, f64)>,
    budget_hit: Cell<bool>,
    max_nfev: usize,
}

/// A `ScalarObjective` seen through argmin's problem traits.
pub(crate) struct ArgminObjective<'a> {
    inner: &'a dyn ScalarObjective,
    tracker: &'a Tracker,
}

impl ArgminObjective<'_> {
    fn check_budget(&self) -> Result<(), Error> {
        if self.inner.evaluations() >= self.tracker.max_nfev {
            self.tracker.budget_hit.set(true);
            return Err(Error::msg(format!(
                "maximum number of function evaluations ({}) exceeded",
                self.tracker.max_nfev
            )));
        }
        Ok(())
    }
}

impl CostFunction for ArgminObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Vec<f64>) -> Result<f64, Error> {
        self.check_budget()?;
        let x = DVector::from_column_slice(param);
        let value = self.inner.value(&x);
        let value = if value.is_finite() { value } else { f64::INFINITY };
        let mut best = self.tracker.best.borrow_mut();
        if value < best.1 {
            *best = (x, value);
        }
        Ok(value)
    }
}

impl Gradient for ArgminObjective<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Vec<f64>) -> Result<Vec<f64>, Error> {
        self.check_budget()?;
        let g = self.inner.gradient(&DVector::from_column_slice(param));
        if g.iter().any(|v| !v.is_finite()) {
            return Err(Error::msg("gradient is not finite"));
        }
        Ok(g.as_slice().to_vec())
    }
}

impl Hessian for ArgminObjective<'_> {
    type Param = Vec<f64>;
    type Hessian = Vec<Vec<f64>>;

    fn hessian(&self, param: &Vec<f64>) -> Result<Vec<Vec<f64>>, Error> {
        self.check_budget()?;
        let h = self.inner.hessian(&DVector::from_column_slice(param));
        if h.iter().any(|v| !v.is_finite()) {
            return Err(Error::msg("Hessian is not finite"));
        }
        Ok(h.row_iter().map(|row| row.iter().copied().collect()).collect())
    }
}

/// Scale-free stopping thresholds for one run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StopRule {
    /// Relative cost decrease per iteration below which a run has converged.
    pub ftol: f64,
    /// Cost at the start of the run.
    pub initial: f64,
}

impl StopRule {
    /// Below this the cost is rounding noise of the starting cost; residuals
    /// are then about `sqrt(eps)` of their initial size.
    fn floor(&self) -> f64 {
        self.initial * f64::EPSILON
    }

    fn converged(&self, prev: f64, cost: f64) -> bool {
        if !cost.is_finite() {
            return false;
        }
        if cost <= self.floor() {
            return true;
        }
        prev.is_finite() && (prev - cost).abs() <= self.ftol * prev.abs().max(cost.abs())
    }
}

/// Wraps an argmin solver with `StopRule` on top of its own termination test.
#[derive(Clone)]
pub(crate) struct Stopping<S> {
    inner: S,
    rule: StopRule,
}

impl<S> Stopping<S> {
    pub(crate) fn new(inner: S, rule: StopRule) -> Self {
        Self { inner, rule }
    }
}

impl<O, S, G, H> Solver<O, IterState<Vec<f64>, G, (), H, (), f64>> for Stopping<S>
where
    S: Solver<O, IterState<Vec<f64>, G, (), H, (), f64>>,
{
    const NAME: &'static str = <S as Solver<O, IterState<Vec<f64>, G, (), H, (), f64>>>::NAME;

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: IterState<Vec<f64>, G, (), H, (), f64>,
    ) -> Result<(IterState<Vec<f64>, G, (), H, (), f64>, Option<KV>), Error> {
        self.inner.init(problem, state)
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: IterState<Vec<f64>, G, (), H, (), f64>,
    ) -> Result<(IterState<Vec<f64>, G, (), H, (), f64>, Option<KV>), Error> {
        self.inner.next_iter(problem, state)
    }

    fn terminate(&mut self, state: &IterState<Vec<f64>, G, (), H, (), f64>) -> TerminationStatus {
        let status = self.inner.terminate(state);
        if status.terminated() {
            return status;
        }
        if state.get_iter() > 0 && self.rule.converged(state.get_prev_cost(), state.get_cost()) {
            return TerminationStatus::Terminated(TerminationReason::SolverConverged);
        }
        TerminationStatus::NotTerminated
    }
}

/// How a single argmin run ended.
pub(crate) type RunEnd = (Option<TerminationReason>, u64);

/// Termination reason and iteration count of a finished run.
pub(crate) fn run_end<I: State>(state: &I) -> RunEnd {
    (state.get_termination_reason().cloned(), state.get_iter())
}

/// `n × n` identity, the starting inverse Hessian of BFGS.
pub(crate) fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// Run `run` from `x0`, restarting from the best point when the solver fails
/// after having made progress.
///
/// `run` builds and executes one argmin run on the objective it is handed,
/// starting from the given parameters.
pub(crate) fn drive<R>(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings, mut run: R) -> MinimizerOutcome
where
    R: FnMut(ArgminObjective<'_>, Vec<f64>, StopRule) -> Result<RunEnd, Error>,
{
    let f0 = obj.value(&x0);
    if !f0.is_finite() {
        return MinimizerOutcome::stopped(x0, 0, "objective is not finite at the initial point");
    }
    let tracker = Tracker {
        best: RefCell::new((x0, f0)),
        budget_hit: Cell::new(false),
        max_nfev: settings.max_nfev,
    };

    let mut n_iter = 0u64;
    let mut restarts = 0;
    loop {
        let (start, start_value) = {
            let best = tracker.best.borrow();
            (best.0.as_slice().to_vec(), best.1)
        };
        let rule = StopRule {
            ftol: settings.ftol,
            initial: start_value,
        };
        let objective = ArgminObjective {
            inner: obj,
            tracker: &tracker,
        };
        let result = run(objective, start, rule);
        let (best_x, best_value) = tracker.best.borrow().clone();

        match result {
            Ok((reason, iters)) => {
                n_iter += iters;
                let n = n_iter as usize;
                return match reason {
                    Some(TerminationReason::SolverConverged | TerminationReason::TargetCostReached) => {
                        MinimizerOutcome::converged(best_x, n, "solver converged")
                    }
                    Some(other) => MinimizerOutcome::stopped(best_x, n, other.text().to_string()),
                    None => MinimizerOutcome::stopped(best_x, n, "solver stopped without a reason"),
                };
            }
            Err(_) if tracker.budget_hit.get() => {
                return MinimizerOutcome::budget_exhausted(best_x, n_iter as usize, settings.max_nfev);
            }
            Err(err) => {
                let progressed = best_value < start_value - settings.ftol * start_value.abs();
                if progressed && restarts < MAX_RESTARTS {
                    restarts += 1;
                    log::debug!("restarting from best point after solver error: {err}");
                    continue;
                }
                return MinimizerOutcome::converged(
                    best_x,
                    n_iter as usize,
                    format!("no further decrease along the search direction ({err})"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, settings};

    #[test]
    fn stop_rule_is_relative_to_the_cost() {
        let rule = StopRule {
            ftol: 1e-10,
            initial: 1.0,
        };
        assert!(rule.converged(1e-6, 1e-6 * (1.0 - 1e-12)));
        assert!(!rule.converged(1e-6, 0.5e-6));
        assert!(!rule.converged(f64::INFINITY, 1.0));
        assert!(rule.converged(1.0, 0.0));
        assert!(rule.converged(f64::INFINITY, 1e-17));
    }

    #[test]
    fn exhausted_budget_surfaces_from_the_objective() {
        let obj = Valley::new(2);
        let tight = Settings {
            max_nfev: 5,
            ..settings()
        };
        let out = drive(&obj, DVector::zeros(2), &tight, |objective, start, _| {
            let mut x = start;
            loop {
                objective.cost(&x)?;
                x[0] += 0.1;
            }
        });
        assert!(!out.success);
        assert!(out.message.contains("maximum number of function evaluations"), "{}", out.message);
    }

    #[test]
    fn best_point_survives_a_failed_run() {
        let obj = Valley::new(2);
        let out = drive(&obj, DVector::zeros(2), &settings(), |objective, _, _| {
            objective.cost(&vec![1.0, 2.0])?;
            Err(Error::msg("line search failed"))
        });
        assert!(out.success, "{}", out.message);
        assert_eq!(out.x.as_slice(), &[1.0, 2.0]);
    }
}
