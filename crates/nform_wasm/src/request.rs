//! Decoding of serialized fit requests into core problems.

use anyhow::{bail, Context};
use nalgebra::{DMatrix, DVector};
use nform_core::fit::{fit_normal_form, FitOptions, NormalFormFit, NormalFormProblem};
use nform_core::maps::ComplexNumber;
use nform_core::polynomial::PolynomialBasis;
use nform_core::samples::SampleSet;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Map,
    Flow,
}

/// A nonlinear basis, either every monomial in an order range or explicit
/// exponent rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BasisRequest {
    Orders { min_order: u32, max_order: u32 },
    Exponents { exponents: Vec<Vec<u32>> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitRequest {
    pub kind: SampleKind,
    /// Own reduced coordinates, one row per coordinate, one column per sample.
    pub states: Vec<Vec<ComplexNumber>>,
    /// Next-step states for maps, velocities for flows.
    pub advanced: Vec<Vec<ComplexNumber>>,
    pub linear_part: Vec<ComplexNumber>,
    /// Rows of `V_own` (physical × reduced).
    pub change_of_basis: Vec<Vec<ComplexNumber>>,
    pub inverse_basis: BasisRequest,
    pub normal_form_basis: BasisRequest,
    pub inverse_pattern: Vec<(usize, usize)>,
    pub normal_form_pattern: Vec<(usize, usize)>,
    #[serde(default)]
    pub weights: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub options: FitOptions,
}

pub fn build_problem(request: &FitRequest) -> anyhow::Result<(NormalFormProblem, FitOptions)> {
    let states = complex_matrix(&request.states).context("Invalid states")?;
    let advanced = complex_matrix(&request.advanced).context("Invalid advanced samples")?;
    let linear_part = DVector::from_iterator(
        request.linear_part.len(),
        request.linear_part.iter().map(|&v| Complex::from(v)),
    );
    let samples = match request.kind {
        SampleKind::Map => SampleSet::from_map(states, advanced, linear_part),
        SampleKind::Flow => SampleSet::from_flow(states, advanced, linear_part),
    }
    .context("Invalid samples")?;

    let nvars = 2 * samples.reduced_dim();
    let inverse_basis =
        build_basis(&request.inverse_basis, nvars).context("Invalid inverse basis")?;
    let normal_form_basis =
        build_basis(&request.normal_form_basis, nvars).context("Invalid normal-form basis")?;
    let change_of_basis =
        complex_matrix(&request.change_of_basis).context("Invalid change of basis")?;

    let mut options = request.options.clone();
    if let Some(weights) = &request.weights {
        options.weights = Some(real_matrix(weights).context("Invalid weights")?);
    }

    let problem = NormalFormProblem {
        samples,
        inverse_basis,
        normal_form_basis,
        inverse_pattern: request.inverse_pattern.clone(),
        normal_form_pattern: request.normal_form_pattern.clone(),
        change_of_basis,
    };
    Ok((problem, options))
}

pub fn run_request(request: &FitRequest) -> anyhow::Result<NormalFormFit> {
    let (problem, options) = build_problem(request)?;
    let fit = fit_normal_form(&problem, &options)?;
    Ok(fit)
}

fn build_basis(request: &BasisRequest, nvars: usize) -> anyhow::Result<PolynomialBasis> {
    let basis = match request {
        BasisRequest::Orders {
            min_order,
            max_order,
        } => PolynomialBasis::total_order(nvars, *min_order, *max_order)?,
        BasisRequest::Exponents { exponents } => {
            PolynomialBasis::from_exponents(nvars, exponents.clone())?
        }
    };
    Ok(basis)
}

fn row_shape<T>(rows: &[Vec<T>]) -> anyhow::Result<(usize, usize)> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != cols) {
        bail!("Row {} has {} entries, expected {}.", idx, row.len(), cols);
    }
    Ok((rows.len(), cols))
}

pub(crate) fn complex_matrix(rows: &[Vec<ComplexNumber>]) -> anyhow::Result<DMatrix<Complex<f64>>> {
    let (nrows, ncols) = row_shape(rows)?;
    Ok(DMatrix::from_fn(nrows, ncols, |i, j| Complex::from(rows[i][j])))
}

fn real_matrix(rows: &[Vec<f64>]) -> anyhow::Result<DMatrix<f64>> {
    let (nrows, ncols) = row_shape(rows)?;
    Ok(DMatrix::from_fn(nrows, ncols, |i, j| rows[i][j]))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nform_core::minimizer::ExitStatus;

    fn c(re: f64, im: f64) -> ComplexNumber {
        ComplexNumber { re, im }
    }

    /// Map samples of `y' = d y + γ y² ȳ` on a fixed grid of points.
    pub(crate) fn cubic_map_request() -> FitRequest {
        let d = Complex::new(0.9, 0.1);
        let gamma = Complex::new(0.1, -0.05);
        let mut states = Vec::new();
        let mut advanced = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                let y = Complex::new(-0.25 + 0.1 * i as f64, -0.25 + 0.1 * j as f64);
                states.push(ComplexNumber::from(y));
                advanced.push(ComplexNumber::from(d * y + gamma * y * y * y.conj()));
            }
        }
        FitRequest {
            kind: SampleKind::Map,
            states: vec![states],
            advanced: vec![advanced],
            linear_part: vec![ComplexNumber::from(d)],
            change_of_basis: vec![vec![c(0.5, 0.0)], vec![c(0.0, 0.5)]],
            inverse_basis: BasisRequest::Exponents {
                exponents: vec![vec![2, 0], vec![1, 1], vec![0, 2]],
            },
            normal_form_basis: BasisRequest::Orders {
                min_order: 3,
                max_order: 3,
            },
            inverse_pattern: vec![(0, 0), (0, 1), (0, 2)],
            normal_form_pattern: vec![(0, 1)],
            weights: None,
            options: FitOptions {
                optimality_tolerance: 1e-10,
                ..FitOptions::default()
            },
        }
    }

    #[test]
    fn run_request_fits_cubic_normal_form() {
        let fit = run_request(&cubic_map_request()).expect("fit");
        let report = fit.report();
        assert!(report.final_loss < 1e-8, "loss {}", report.final_loss);
        assert_ne!(report.status, ExitStatus::NoFreeParameters);

        let normal_form = fit.maps.normal_form_map();
        assert_eq!(normal_form.basis().exponents()[1], vec![2, 1]);
        let gamma = normal_form.nonlinear()[(0, 1)];
        assert!((gamma - Complex::new(0.1, -0.05)).norm() < 1e-3);
    }

    #[test]
    fn build_problem_applies_weights_and_options() {
        let mut request = cubic_map_request();
        request.weights = Some(vec![vec![2.0; 36]]);
        request.options.max_iterations = 7;
        let (problem, options) = build_problem(&request).expect("problem");

        assert_eq!(problem.samples.len(), 36);
        assert_eq!(problem.normal_form_basis.dimension(), 4);
        assert_eq!(options.max_iterations, 7);
        assert_eq!(options.weights.map(|w| w.shape()), Some((1, 36)));
    }

    #[test]
    fn build_problem_reports_context() {
        let mut request = cubic_map_request();
        request.advanced[0].pop();
        let err = build_problem(&request).expect_err("ragged samples");
        let message = format!("{err:#}");
        assert!(message.contains("Invalid samples"), "{message}");

        let mut request = cubic_map_request();
        request.change_of_basis[1].push(c(1.0, 0.0));
        let err = build_problem(&request).expect_err("ragged basis");
        assert!(format!("{err:#}").contains("Invalid change of basis"));

        let mut request = cubic_map_request();
        request.inverse_basis = BasisRequest::Exponents {
            exponents: vec![vec![2, 0, 1]],
        };
        let err = build_problem(&request).expect_err("wrong arity");
        assert!(format!("{err:#}").contains("Invalid inverse basis"));
    }

    #[test]
    fn run_request_surfaces_core_errors() {
        let mut request = cubic_map_request();
        request.normal_form_pattern = vec![(0, 9)];
        let err = run_request(&request).expect_err("index error");
        assert!(format!("{err}").contains("outside the 1x4 coefficient matrix"));
    }
}
