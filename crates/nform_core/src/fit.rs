//! The fitting pipeline: configure, optimize the invariance residual,
//! reconstruct the inverse and normal-form maps, regress the forward map and
//! assemble the bundle.

use crate::conjugate::complete_conjugates;
use crate::error::{invalid_config, Result};
use crate::layout::{CoefficientLayout, SparsityPattern};
use crate::maps::{check_nonlinear_basis, MapBundle, PolynomialMap};
use crate::minimizer::{
    Display, ExitStatus, GradientCheck, Lbfgs, MinimizerOutcome, MinimizerSettings,
};
use crate::polynomial::PolynomialBasis;
use crate::regression::ridge_regression;
use crate::residual::{InvarianceContext, InvarianceResidual};
use crate::samples::SampleSet;
use crate::traits::{Minimizer, Objective};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Non-negative per-coordinate, per-sample weights (`L2`). All ones when
    /// absent.
    #[serde(skip)]
    pub weights: Option<DMatrix<f64>>,
    pub display: Display,
    pub optimality_tolerance: f64,
    pub function_tolerance: f64,
    pub max_iterations: usize,
    pub max_function_evaluations: usize,
    pub specify_objective_gradient: bool,
    pub check_gradients: bool,
    /// Start from zero nonlinear coefficients (`IC_nf`).
    pub cold_start: bool,
    /// Packed starting parameters, used when `cold_start` is false.
    pub initial_guess: Option<Vec<f64>>,
    /// Highest order of the forward-map regression basis (`T_PolyOrd`).
    pub forward_poly_order: u32,
    pub ridge_penalty: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        let minimizer = MinimizerSettings::default();
        Self {
            weights: None,
            display: minimizer.display,
            optimality_tolerance: minimizer.optimality_tolerance,
            function_tolerance: minimizer.function_tolerance,
            max_iterations: minimizer.max_iterations,
            max_function_evaluations: minimizer.max_function_evaluations,
            specify_objective_gradient: minimizer.specify_objective_gradient,
            check_gradients: minimizer.check_gradients,
            cold_start: true,
            initial_guess: None,
            forward_poly_order: 3,
            ridge_penalty: 0.0,
        }
    }
}

impl FitOptions {
    pub fn minimizer_settings(&self) -> MinimizerSettings {
        MinimizerSettings {
            optimality_tolerance: self.optimality_tolerance,
            function_tolerance: self.function_tolerance,
            max_iterations: self.max_iterations,
            max_function_evaluations: self.max_function_evaluations,
            specify_objective_gradient: self.specify_objective_gradient,
            check_gradients: self.check_gradients,
            display: self.display,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.minimizer_settings().validate()?;
        if !self.ridge_penalty.is_finite() || self.ridge_penalty < 0.0 {
            invalid_config!(
                "ridge_penalty must be finite and non-negative, got {}.",
                self.ridge_penalty
            );
        }
        if !self.cold_start && self.initial_guess.is_none() {
            invalid_config!("cold_start is disabled but no initial_guess was supplied.");
        }
        Ok(())
    }

    fn initial_point(&self, layout: &CoefficientLayout) -> Result<DVector<f64>> {
        let len = layout.parameter_len();
        let guess = match (&self.initial_guess, self.cold_start) {
            (Some(guess), false) => guess,
            _ => return Ok(DVector::zeros(len)),
        };
        if guess.len() != len {
            invalid_config!(
                "Initial guess dimension mismatch. Expected {}, got {}.",
                len,
                guess.len()
            );
        }
        if guess.iter().any(|v| !v.is_finite()) {
            invalid_config!("Initial guess must be finite.");
        }
        Ok(DVector::from_column_slice(guess))
    }
}

/// Everything a fit needs besides its options.
#[derive(Debug, Clone)]
pub struct NormalFormProblem {
    pub samples: SampleSet,
    /// Nonlinear basis of the inverse map, on `[y; ȳ]`.
    pub inverse_basis: PolynomialBasis,
    /// Nonlinear basis of the normal form, on `[z; z̄]`.
    pub normal_form_basis: PolynomialBasis,
    /// Free `(row, col)` entries of the inverse-map nonlinear coefficients.
    pub inverse_pattern: Vec<(usize, usize)>,
    /// Free `(row, col)` entries of the normal-form nonlinear coefficients.
    pub normal_form_pattern: Vec<(usize, usize)>,
    /// Own modal vectors `V_own` (physical × reduced).
    pub change_of_basis: DMatrix<Complex<f64>>,
}

impl NormalFormProblem {
    pub fn layout(&self) -> Result<CoefficientLayout> {
        let rows = self.samples.reduced_dim();
        CoefficientLayout::new(
            SparsityPattern::new(
                self.inverse_pattern.clone(),
                rows,
                self.inverse_basis.dimension(),
            )?,
            SparsityPattern::new(
                self.normal_form_pattern.clone(),
                rows,
                self.normal_form_basis.dimension(),
            )?,
        )
    }

    /// Packs the nonlinear blocks of an earlier fit into starting parameters
    /// for this problem's layout.
    pub fn initial_guess_from(&self, maps: &MapBundle) -> Result<Vec<f64>> {
        let packed = self
            .layout()?
            .pack(maps.inverse_map().nonlinear(), maps.normal_form_map().nonlinear())?;
        Ok(packed.into_vector().as_slice().to_vec())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub status: ExitStatus,
    pub converged: bool,
    pub initial_loss: f64,
    pub final_loss: f64,
    pub first_order_optimality: f64,
    pub iterations: usize,
    pub function_evaluations: usize,
    pub free_parameters: usize,
    pub gradient_check: Option<GradientCheck>,
}

#[derive(Debug, Clone)]
pub struct NormalFormFit {
    pub maps: MapBundle,
    pub outcome: MinimizerOutcome,
    pub initial_loss: f64,
    /// Invariance residual at the returned parameters.
    pub residual: DMatrix<Complex<f64>>,
}

impl NormalFormFit {
    pub fn parameters(&self) -> &DVector<f64> {
        &self.outcome.point
    }

    pub fn report(&self) -> FitReport {
        FitReport {
            status: self.outcome.status,
            converged: self.outcome.status.converged(),
            initial_loss: self.initial_loss,
            final_loss: self.outcome.value,
            first_order_optimality: self.outcome.first_order_optimality,
            iterations: self.outcome.iterations,
            function_evaluations: self.outcome.function_evaluations,
            free_parameters: self.outcome.point.len(),
            gradient_check: self.outcome.gradient_check,
        }
    }
}

pub fn fit_normal_form(problem: &NormalFormProblem, options: &FitOptions) -> Result<NormalFormFit> {
    let samples = &problem.samples;
    let dim = samples.reduced_dim();
    log::debug!(
        "Configuring normal-form fit: {} reduced coordinates, {} samples",
        dim,
        samples.len()
    );
    options.validate()?;
    check_nonlinear_basis(&problem.inverse_basis, "Inverse-map")?;
    check_nonlinear_basis(&problem.normal_form_basis, "Normal-form")?;
    if problem.change_of_basis.ncols() != dim {
        invalid_config!(
            "Change of basis has {} columns for {} reduced coordinates.",
            problem.change_of_basis.ncols(),
            dim
        );
    }

    let weights = options
        .weights
        .clone()
        .unwrap_or_else(|| DMatrix::from_element(dim, samples.len(), 1.0));
    let context = InvarianceContext::new(
        samples,
        &problem.inverse_basis,
        &problem.normal_form_basis,
        &weights,
    )?;
    let layout = problem.layout()?;
    let objective = InvarianceResidual::new(&context, &layout)?;
    let initial = options.initial_point(&layout)?;
    let initial_loss = objective.value(&initial)?;

    log::debug!(
        "Optimizing {} real parameters from loss {:.6e}",
        layout.parameter_len(),
        initial_loss
    );
    let outcome = Lbfgs::new(options.minimizer_settings()).minimize(&objective, initial)?;

    log::debug!("Reconstructing coefficients after {:?}", outcome.status);
    let (inverse_nl, normal_form_nl) = layout.unpack(&outcome.point)?;
    let residual = objective.evaluate(&outcome.point, false)?.residual;
    let transformed = samples.reduced() + &inverse_nl * context.inverse_values();
    let inverse = PolynomialMap::new(
        DVector::from_element(dim, Complex::new(1.0, 0.0)),
        inverse_nl,
        problem.inverse_basis.clone(),
    )?;
    let normal_form = PolynomialMap::new(
        samples.linear_part().clone(),
        normal_form_nl,
        problem.normal_form_basis.clone(),
    )?;

    log::debug!("Regressing forward map up to order {}", options.forward_poly_order);
    let forward = regress_forward(samples.reduced(), &transformed, options)?;

    log::debug!("Assembling map bundle");
    let maps = MapBundle::new(forward, inverse, normal_form, problem.change_of_basis.clone())?;
    Ok(NormalFormFit {
        maps,
        outcome,
        initial_loss,
        residual,
    })
}

/// Fits `T(z) = z + W_t Φ_T([z; z̄])` so that `T(Z) ≈ Y`, where `Z = iT(Y)`.
fn regress_forward(
    reduced: &DMatrix<Complex<f64>>,
    transformed: &DMatrix<Complex<f64>>,
    options: &FitOptions,
) -> Result<PolynomialMap> {
    let dim = reduced.nrows();
    let basis = PolynomialBasis::total_order(2 * dim, 2, options.forward_poly_order)?;
    let values = basis.evaluate(&complete_conjugates(transformed))?;
    let target = reduced - transformed;
    let nonlinear = ridge_regression(&values, &target, options.ridge_penalty)?;
    PolynomialMap::new(DVector::from_element(dim, Complex::new(1.0, 0.0)), nonlinear, basis)
}
