//! Quasi-Newton minimization for smooth unconstrained objectives.
//!
//! [`Lbfgs`] runs argmin's L-BFGS with a More-Thuente line search over plain
//! `Vec<f64>` parameters. Around it this module keeps the evaluation budget,
//! the finite-difference gradient, the start-up gradient check and the mapping
//! of argmin's termination reasons onto [`ExitStatus`]. A stalled search is not
//! an error: the lowest point evaluated is always returned.

use crate::error::{invalid_config, NormalFormError, Result};
use crate::traits::{Minimizer, Objective};
use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{
    CostFunction, Error as SolverError, Executor, Gradient, IterState, State, TerminationReason,
    KV,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Correction pairs kept by L-BFGS.
const HISTORY: usize = 7;
const GRADIENT_CHECK_TOLERANCE: f64 = 1e-6;

type Point = Vec<f64>;
type SearchState = IterState<Point, Point, (), (), (), f64>;
type LineSearch = MoreThuenteLineSearch<Point, Point, f64>;
type Solver = LBFGS<LineSearch, Point, Point, f64>;

/// Verbosity of the minimizer's log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    #[default]
    Off,
    Iter,
    Final,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MinimizerSettings {
    /// Stop when `‖g‖∞ ≤ tol · max(1, ‖g0‖∞)`.
    pub optimality_tolerance: f64,
    /// Stop when an iteration changes the objective by less than this.
    pub function_tolerance: f64,
    pub max_iterations: usize,
    /// Cap on objective evaluations. A finite-difference gradient costs two
    /// per coordinate.
    pub max_function_evaluations: usize,
    /// Use the objective's analytic gradient; otherwise central differences.
    pub specify_objective_gradient: bool,
    /// Compare the analytic gradient against central differences at the start.
    pub check_gradients: bool,
    pub display: Display,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            optimality_tolerance: 1e-6,
            function_tolerance: f64::EPSILON,
            max_iterations: 400,
            max_function_evaluations: 10_000,
            specify_objective_gradient: true,
            check_gradients: false,
            display: Display::Off,
        }
    }
}

impl MinimizerSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.optimality_tolerance.is_finite() || self.optimality_tolerance < 0.0 {
            invalid_config!(
                "optimality_tolerance must be finite and non-negative, got {}.",
                self.optimality_tolerance
            );
        }
        if !self.function_tolerance.is_finite() || self.function_tolerance < 0.0 {
            invalid_config!(
                "function_tolerance must be finite and non-negative, got {}.",
                self.function_tolerance
            );
        }
        if self.max_function_evaluations == 0 {
            invalid_config!("max_function_evaluations must be greater than zero.");
        }
        Ok(())
    }
}

/// Why the search stopped. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    GradientTolerance,
    FunctionTolerance,
    MaxIterations,
    MaxFunctionEvaluations,
    LineSearchFailed,
    NoFreeParameters,
}

impl ExitStatus {
    pub fn converged(self) -> bool {
        matches!(
            self,
            ExitStatus::GradientTolerance
                | ExitStatus::FunctionTolerance
                | ExitStatus::NoFreeParameters
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientCheck {
    pub max_relative_error: f64,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct MinimizerOutcome {
    pub point: DVector<f64>,
    pub value: f64,
    /// `‖g‖∞` at the returned point.
    pub first_order_optimality: f64,
    pub iterations: usize,
    /// Includes the evaluations spent on the gradient check.
    pub function_evaluations: usize,
    pub status: ExitStatus,
    pub gradient_check: Option<GradientCheck>,
}

#[derive(Debug, Clone, Default)]
pub struct Lbfgs {
    settings: MinimizerSettings,
}

impl Lbfgs {
    pub fn new(settings: MinimizerSettings) -> Self {
        Self { settings }
    }

    fn solver(&self, threshold: f64) -> Result<Solver> {
        LBFGS::new(MoreThuenteLineSearch::new(), HISTORY)
            .with_tolerance_grad(threshold)
            .and_then(|solver| solver.with_tolerance_cost(self.settings.function_tolerance))
            .map_err(|e| NormalFormError::InvalidConfiguration(e.to_string()))
    }

    /// Runs argmin from the evaluated start. `GradientTolerance` here stands for
    /// any convergence argmin reports; the caller splits it by the final
    /// gradient.
    fn search<O: Objective>(
        &self,
        evaluator: &RefCell<Evaluator<'_, O>>,
        start: (Point, f64, Point),
        threshold: f64,
        iterations: &Arc<AtomicUsize>,
    ) -> Result<ExitStatus> {
        let (param, cost, gradient) = start;
        let log = IterationLog {
            display: self.settings.display,
            iterations: Arc::clone(iterations),
        };
        let result = Executor::new(SearchProblem { evaluator }, self.solver(threshold)?)
            .configure(|state| {
                state
                    .param(param)
                    .cost(cost)
                    .gradient(gradient)
                    .max_iters(self.settings.max_iterations as u64)
            })
            .add_observer(log, ObserverMode::Always)
            .timer(false)
            .run();

        let mut evaluator = evaluator.borrow_mut();
        if let Some(err) = evaluator.failure.take() {
            return Err(err);
        }
        if evaluator.exhausted {
            return Ok(ExitStatus::MaxFunctionEvaluations);
        }
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                log::debug!("L-BFGS aborted: {}", err);
                return Ok(ExitStatus::LineSearchFailed);
            }
        };
        let status = match result.state().get_termination_reason() {
            Some(TerminationReason::MaxItersReached) => ExitStatus::MaxIterations,
            Some(TerminationReason::SolverExit(reason)) => {
                log::debug!("L-BFGS exited: {}", reason);
                ExitStatus::LineSearchFailed
            }
            _ => ExitStatus::GradientTolerance,
        };
        Ok(status)
    }

    fn report(&self, outcome: &MinimizerOutcome) {
        if self.settings.display != Display::Off {
            log::info!(
                "L-BFGS stopped ({:?}) after {} iterations and {} evaluations: \
                 f = {:.6e}, ‖g‖∞ = {:.3e}",
                outcome.status,
                outcome.iterations,
                outcome.function_evaluations,
                outcome.value,
                outcome.first_order_optimality
            );
        }
    }
}

impl Minimizer for Lbfgs {
    fn minimize<O: Objective>(
        &self,
        objective: &O,
        initial: DVector<f64>,
    ) -> Result<MinimizerOutcome> {
        let settings = &self.settings;
        settings.validate()?;
        let dim = objective.dimension();
        if initial.len() != dim {
            invalid_config!(
                "Initial point dimension mismatch. Expected {}, got {}.",
                dim,
                initial.len()
            );
        }

        if dim == 0 {
            let value = objective.value(&initial)?;
            let outcome = MinimizerOutcome {
                point: initial,
                value,
                first_order_optimality: 0.0,
                iterations: 0,
                function_evaluations: 1,
                status: ExitStatus::NoFreeParameters,
                gradient_check: None,
            };
            self.report(&outcome);
            return Ok(outcome);
        }

        let mut spent = 0;
        let gradient_check = if settings.check_gradients && settings.specify_objective_gradient {
            let check = check_gradient(objective, &initial)?;
            spent += 1 + 2 * dim;
            if !check.passed {
                log::warn!(
                    "Analytic gradient disagrees with central differences \
                     (max relative error {:.3e}).",
                    check.max_relative_error
                );
            }
            Some(check)
        } else {
            None
        };

        let mut evaluator = Evaluator::new(objective, settings, spent);
        let (value, gradient) = evaluator.evaluate(&initial)?;
        if !value.is_finite() {
            invalid_config!("Objective is not finite at the initial point ({}).", value);
        }
        let threshold = settings.optimality_tolerance * gradient.amax().max(1.0);
        evaluator.record(&initial, value, Some(&gradient));

        let iterations = Arc::new(AtomicUsize::new(0));
        let (status, mut evaluator) = if gradient.amax() <= threshold {
            (ExitStatus::GradientTolerance, evaluator)
        } else {
            let start = (
                initial.as_slice().to_vec(),
                value,
                gradient.as_slice().to_vec(),
            );
            let evaluator = RefCell::new(evaluator);
            let status = self.search(&evaluator, start, threshold, &iterations)?;
            (status, evaluator.into_inner())
        };

        let gradient = evaluator.best_gradient()?;
        let first_order_optimality = gradient.amax();
        let status = match status {
            ExitStatus::GradientTolerance if first_order_optimality > threshold => {
                ExitStatus::FunctionTolerance
            }
            other => other,
        };
        let outcome = MinimizerOutcome {
            point: evaluator.best.point,
            value: evaluator.best.value,
            first_order_optimality,
            iterations: iterations.load(Ordering::Relaxed),
            function_evaluations: evaluator.evaluations,
            status,
            gradient_check,
        };
        self.report(&outcome);
        Ok(outcome)
    }
}

/// Central-difference gradient with per-coordinate steps
/// `ε^(1/3) · max(1, |x_i|)`.
pub fn central_difference_gradient<O: Objective>(
    objective: &O,
    x: &DVector<f64>,
) -> Result<DVector<f64>> {
    let base_step = f64::EPSILON.cbrt();
    let mut gradient = DVector::zeros(x.len());
    let mut shifted = x.clone();
    for i in 0..x.len() {
        let h = base_step * x[i].abs().max(1.0);
        shifted[i] = x[i] + h;
        let forward = objective.value(&shifted)?;
        shifted[i] = x[i] - h;
        let backward = objective.value(&shifted)?;
        shifted[i] = x[i];
        gradient[i] = (forward - backward) / (2.0 * h);
    }
    Ok(gradient)
}

/// Compares the analytic gradient at `x` with central differences. Costs one
/// gradient and `2 · dim` values.
pub fn check_gradient<O: Objective>(objective: &O, x: &DVector<f64>) -> Result<GradientCheck> {
    let (_, analytic) = objective.value_and_gradient(x)?;
    let numeric = central_difference_gradient(objective, x)?;
    let scale = analytic.amax().max(numeric.amax());
    let max_relative_error = if scale > 0.0 {
        (&analytic - &numeric).amax() / scale
    } else {
        0.0
    };
    Ok(GradientCheck {
        max_relative_error,
        passed: max_relative_error <= GRADIENT_CHECK_TOLERANCE,
    })
}

#[derive(Debug, Clone)]
struct Iterate {
    point: DVector<f64>,
    value: f64,
    gradient: Option<DVector<f64>>,
}

/// Counts and budgets objective calls and remembers the lowest point seen.
struct Evaluator<'a, O> {
    objective: &'a O,
    analytic: bool,
    evaluations: usize,
    budget: usize,
    exhausted: bool,
    /// Objective error raised inside argmin, returned once the run unwinds.
    failure: Option<NormalFormError>,
    best: Iterate,
}

impl<'a, O: Objective> Evaluator<'a, O> {
    fn new(objective: &'a O, settings: &MinimizerSettings, spent: usize) -> Self {
        let dim = objective.dimension();
        Self {
            objective,
            analytic: settings.specify_objective_gradient,
            evaluations: spent,
            budget: settings.max_function_evaluations,
            exhausted: false,
            failure: None,
            best: Iterate {
                point: DVector::zeros(dim),
                value: f64::INFINITY,
                gradient: None,
            },
        }
    }

    fn gradient_cost(&self, dim: usize) -> usize {
        if self.analytic {
            1
        } else {
            2 * dim
        }
    }

    /// Value and gradient outside the budget, for the start and the final
    /// report.
    fn evaluate(&mut self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        if self.analytic {
            self.evaluations += 1;
            return self.objective.value_and_gradient(x);
        }
        self.evaluations += 1 + 2 * x.len();
        let value = self.objective.value(x)?;
        Ok((value, central_difference_gradient(self.objective, x)?))
    }

    fn charge(&mut self, cost: usize) -> std::result::Result<(), SolverError> {
        if self.evaluations + cost > self.budget {
            self.exhausted = true;
            return Err(SolverError::msg("function evaluation budget exhausted"));
        }
        self.evaluations += cost;
        Ok(())
    }

    fn fail(&mut self, err: NormalFormError) -> SolverError {
        let error = SolverError::msg(err.to_string());
        self.failure = Some(err);
        error
    }

    fn cost(&mut self, x: &DVector<f64>) -> std::result::Result<f64, SolverError> {
        self.charge(1)?;
        let value = match self.objective.value(x) {
            Ok(value) => finite_or_infinite(value),
            Err(err) => return Err(self.fail(err)),
        };
        self.record(x, value, None);
        Ok(value)
    }

    fn gradient(&mut self, x: &DVector<f64>) -> std::result::Result<DVector<f64>, SolverError> {
        self.charge(self.gradient_cost(x.len()))?;
        let evaluated = if self.analytic {
            self.objective
                .value_and_gradient(x)
                .map(|(value, gradient)| (Some(value), gradient))
        } else {
            central_difference_gradient(self.objective, x).map(|gradient| (None, gradient))
        };
        let (value, gradient) = evaluated.map_err(|err| self.fail(err))?;
        match value {
            Some(value) => self.record(x, finite_or_infinite(value), Some(&gradient)),
            None => self.attach(x, &gradient),
        }
        Ok(gradient)
    }

    fn record(&mut self, x: &DVector<f64>, value: f64, gradient: Option<&DVector<f64>>) {
        if value < self.best.value {
            self.best = Iterate {
                point: x.clone(),
                value,
                gradient: gradient.cloned(),
            };
        } else if let Some(gradient) = gradient {
            self.attach(x, gradient);
        }
    }

    fn attach(&mut self, x: &DVector<f64>, gradient: &DVector<f64>) {
        if self.best.point == *x {
            self.best.gradient = Some(gradient.clone());
        }
    }

    fn best_gradient(&mut self) -> Result<DVector<f64>> {
        if let Some(gradient) = &self.best.gradient {
            return Ok(gradient.clone());
        }
        let point = self.best.point.clone();
        let (_, gradient) = self.evaluate(&point)?;
        self.best.gradient = Some(gradient.clone());
        Ok(gradient)
    }
}

fn finite_or_infinite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::INFINITY
    }
}

/// The argmin face of an [`Evaluator`].
struct SearchProblem<'e, 'a, O> {
    evaluator: &'e RefCell<Evaluator<'a, O>>,
}

impl<O: Objective> CostFunction for SearchProblem<'_, '_, O> {
    type Param = Point;
    type Output = f64;

    fn cost(&self, param: &Point) -> std::result::Result<f64, SolverError> {
        self.evaluator
            .borrow_mut()
            .cost(&DVector::from_column_slice(param))
    }
}

impl<O: Objective> Gradient for SearchProblem<'_, '_, O> {
    type Param = Point;
    type Gradient = Point;

    fn gradient(&self, param: &Point) -> std::result::Result<Point, SolverError> {
        let gradient = self
            .evaluator
            .borrow_mut()
            .gradient(&DVector::from_column_slice(param))?;
        Ok(gradient.as_slice().to_vec())
    }
}

struct IterationLog {
    display: Display,
    iterations: Arc<AtomicUsize>,
}

impl Observe<SearchState> for IterationLog {
    fn observe_iter(
        &mut self,
        state: &SearchState,
        _kv: &KV,
    ) -> std::result::Result<(), SolverError> {
        // A failed line search ends its iteration terminated; it moved nothing.
        if state.terminated() {
            return Ok(());
        }
        let iteration = self.iterations.fetch_add(1, Ordering::Relaxed) + 1;
        if self.display == Display::Iter {
            let optimality = state
                .get_gradient()
                .map_or(f64::NAN, |g| g.iter().fold(0.0, |m: f64, v| m.max(v.abs())));
            log::info!(
                "Iteration {}: f = {:.6e}, ‖g‖∞ = {:.3e}",
                iteration,
                state.get_cost(),
                optimality
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn dimension(&self) -> usize {
            2
        }

        fn value(&self, x: &DVector<f64>) -> Result<f64> {
            Ok((1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2))
        }

        fn value_and_gradient(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
            let inner = x[1] - x[0] * x[0];
            let gradient = DVector::from_vec(vec![
                -2.0 * (1.0 - x[0]) - 400.0 * x[0] * inner,
                200.0 * inner,
            ]);
            Ok((self.value(x)?, gradient))
        }
    }

    /// `½ Σ i (x_i - 1/i)²` over `i = 1..=n`, counting every call.
    struct Quadratic {
        dim: usize,
        calls: Cell<usize>,
    }

    impl Quadratic {
        fn new(dim: usize) -> Self {
            Self {
                dim,
                calls: Cell::new(0),
            }
        }

        fn sum(&self, x: &DVector<f64>) -> f64 {
            (0..self.dim)
                .map(|i| {
                    let weight = i as f64 + 1.0;
                    0.5 * weight * (x[i] - 1.0 / weight).powi(2)
                })
                .sum()
        }
    }

    impl Objective for Quadratic {
        fn dimension(&self) -> usize {
            self.dim
        }

        fn value(&self, x: &DVector<f64>) -> Result<f64> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.sum(x))
        }

        fn value_and_gradient(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
            self.calls.set(self.calls.get() + 1);
            let gradient = DVector::from_fn(self.dim, |i, _| (i as f64 + 1.0) * x[i] - 1.0);
            Ok((self.sum(x), gradient))
        }
    }

    /// Correct value with a gradient that is off by a factor of two.
    struct WrongGradient;

    impl Objective for WrongGradient {
        fn dimension(&self) -> usize {
            1
        }

        fn value(&self, x: &DVector<f64>) -> Result<f64> {
            Ok(x[0] * x[0])
        }

        fn value_and_gradient(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
            Ok((x[0] * x[0], DVector::from_element(1, 4.0 * x[0])))
        }
    }

    /// Fails once `x[0]` leaves `[-1, 1]`.
    struct Fenced;

    impl Objective for Fenced {
        fn dimension(&self) -> usize {
            1
        }

        fn value(&self, x: &DVector<f64>) -> Result<f64> {
            if x[0].abs() > 1.0 {
                return Err(NormalFormError::LinearAlgebraError(format!(
                    "left the fence at {}",
                    x[0]
                )));
            }
            Ok(-x[0])
        }

        fn value_and_gradient(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
            Ok((self.value(x)?, DVector::from_element(1, -1.0)))
        }
    }

    fn tight_settings() -> MinimizerSettings {
        MinimizerSettings {
            optimality_tolerance: 1e-9,
            ..MinimizerSettings::default()
        }
    }

    #[test]
    fn lbfgs_minimizes_rosenbrock_with_analytic_gradient() {
        let outcome = Lbfgs::new(tight_settings())
            .minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]))
            .expect("minimize");
        assert!(outcome.status.converged(), "status {:?}", outcome.status);
        assert!((outcome.point[0] - 1.0).abs() < 1e-4);
        assert!((outcome.point[1] - 1.0).abs() < 1e-4);
        assert!(outcome.value < 1e-8);
        assert!(outcome.iterations < 200);
    }

    #[test]
    fn lbfgs_minimizes_rosenbrock_with_finite_differences() {
        let settings = MinimizerSettings {
            specify_objective_gradient: false,
            ..tight_settings()
        };
        let outcome = Lbfgs::new(settings)
            .minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]))
            .expect("minimize");
        assert!((outcome.point[0] - 1.0).abs() < 1e-2);
        assert!((outcome.point[1] - 1.0).abs() < 1e-2);
        // Every iteration evaluates at least one value and one gradient of
        // two values per coordinate.
        assert!(outcome.function_evaluations >= 5 * outcome.iterations);
    }

    #[test]
    fn rosenbrock_valley_is_reached_from_several_starts() {
        for start in [[-1.2, 1.0], [2.0, 2.0], [-1.0, -1.0], [0.5, -0.5]] {
            let outcome = Lbfgs::new(tight_settings())
                .minimize(&Rosenbrock, DVector::from_row_slice(&start))
                .expect("minimize");
            assert!(
                outcome.status.converged(),
                "start {:?}: {:?} at {:?}",
                start,
                outcome.status,
                outcome.point.as_slice()
            );
            assert!((outcome.point[0] - 1.0).abs() < 1e-4, "start {:?}", start);
            assert!((outcome.point[1] - 1.0).abs() < 1e-4, "start {:?}", start);
        }
    }

    #[test]
    fn lbfgs_solves_quadratic_in_few_iterations() {
        let objective = Quadratic::new(5);
        let outcome = Lbfgs::new(tight_settings())
            .minimize(&objective, DVector::zeros(5))
            .expect("minimize");
        assert!(outcome.status.converged(), "status {:?}", outcome.status);
        for i in 0..5 {
            assert!((outcome.point[i] - 1.0 / (i as f64 + 1.0)).abs() < 1e-6);
        }
        assert!(outcome.iterations <= 30);
        assert_eq!(outcome.function_evaluations, objective.calls.get());
    }

    #[test]
    fn iteration_cap_returns_best_iterate() {
        let settings = MinimizerSettings {
            max_iterations: 2,
            ..tight_settings()
        };
        let start = DVector::from_vec(vec![-1.2, 1.0]);
        let initial_value = Rosenbrock.value(&start).unwrap();
        let outcome = Lbfgs::new(settings).minimize(&Rosenbrock, start).expect("minimize");
        assert_eq!(outcome.status, ExitStatus::MaxIterations);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.value < initial_value);
    }

    #[test]
    fn evaluation_cap_stops_search() {
        let settings = MinimizerSettings {
            max_function_evaluations: 3,
            ..tight_settings()
        };
        let outcome = Lbfgs::new(settings)
            .minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]))
            .expect("minimize");
        assert_eq!(outcome.status, ExitStatus::MaxFunctionEvaluations);
        assert!(outcome.function_evaluations <= 3);
    }

    #[test]
    fn empty_problem_terminates_immediately() {
        let objective = Quadratic::new(0);
        let outcome = Lbfgs::default()
            .minimize(&objective, DVector::zeros(0))
            .expect("minimize");
        assert_eq!(outcome.status, ExitStatus::NoFreeParameters);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.function_evaluations, 1);
        assert_eq!(objective.calls.get(), 1);
    }

    #[test]
    fn stationary_start_needs_no_iterations() {
        let objective = Quadratic::new(3);
        let minimum = DVector::from_fn(3, |i, _| 1.0 / (i as f64 + 1.0));
        let outcome = Lbfgs::default().minimize(&objective, minimum).expect("minimize");
        assert_eq!(outcome.status, ExitStatus::GradientTolerance);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.function_evaluations, 1);
    }

    #[test]
    fn gradient_check_flags_wrong_gradients() {
        let x = DVector::from_element(1, 0.7);
        let bad = check_gradient(&WrongGradient, &x).expect("check");
        assert!(!bad.passed);
        assert!((bad.max_relative_error - 0.5).abs() < 1e-6);

        let good = check_gradient(&Rosenbrock, &DVector::from_vec(vec![0.3, -0.2])).expect("check");
        assert!(good.passed, "error {}", good.max_relative_error);

        let settings = MinimizerSettings {
            check_gradients: true,
            ..MinimizerSettings::default()
        };
        let outcome = Lbfgs::new(settings).minimize(&WrongGradient, x).expect("minimize");
        assert_eq!(outcome.gradient_check.map(|c| c.passed), Some(false));
    }

    #[test]
    fn gradient_check_is_charged_to_the_budget() {
        let start = DVector::zeros(2);
        let plain = Lbfgs::new(tight_settings())
            .minimize(&Quadratic::new(2), start.clone())
            .expect("minimize");
        let checked_settings = MinimizerSettings {
            check_gradients: true,
            ..tight_settings()
        };
        let checked = Lbfgs::new(checked_settings)
            .minimize(&Quadratic::new(2), start.clone())
            .expect("minimize");
        // One analytic gradient plus a central difference on each coordinate.
        assert_eq!(checked.function_evaluations, plain.function_evaluations + 5);
        assert_eq!(checked.point, plain.point);

        let starved = MinimizerSettings {
            max_function_evaluations: 5,
            ..checked_settings
        };
        let outcome = Lbfgs::new(starved)
            .minimize(&Quadratic::new(2), start)
            .expect("minimize");
        assert_eq!(outcome.status, ExitStatus::MaxFunctionEvaluations);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.function_evaluations, 6);
    }

    #[test]
    fn objective_errors_propagate_out_of_the_search() {
        let err = Lbfgs::default()
            .minimize(&Fenced, DVector::zeros(1))
            .expect_err("objective error");
        assert!(matches!(err, NormalFormError::LinearAlgebraError(_)));
        assert!(format!("{err}").contains("left the fence"));
    }

    #[test]
    fn minimize_rejects_bad_inputs() {
        let err = Lbfgs::default()
            .minimize(&Rosenbrock, DVector::zeros(3))
            .expect_err("dimension mismatch");
        assert!(format!("{err}").contains("Expected 2, got 3"));

        let settings = MinimizerSettings {
            optimality_tolerance: -1.0,
            ..MinimizerSettings::default()
        };
        assert!(Lbfgs::new(settings)
            .minimize(&Rosenbrock, DVector::zeros(2))
            .is_err());

        let settings = MinimizerSettings {
            function_tolerance: f64::NAN,
            ..MinimizerSettings::default()
        };
        assert!(Lbfgs::new(settings)
            .minimize(&Rosenbrock, DVector::zeros(2))
            .is_err());
    }
}
