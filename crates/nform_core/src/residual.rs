//! Weighted residual of the invariance equation
//!
//! ```text
//! iT(y_{k+1}) = N(iT(y_k))
//! ```
//!
//! and its analytic gradient with respect to the free real parameters.
//!
//! With `iT(y) = y + W_it Φ_iT([y; ȳ])` and `N(z) = d ⊙ z + W_n Φ_N([z; z̄])`
//! the residual at the samples is
//!
//! ```text
//! Err = Yk_1_DYk + W_it Φ_iT(Y_{k+1}) - d ⊙ (W_it Φ_iT(Y_k)) - W_n Φ_N([Z; Z̄])
//! ```
//!
//! where `Z = Y_k + W_it Φ_iT(Y_k)`. The loss is the `L2`-weighted mean of
//! `|Err|²`. Because `Φ_N` sees both `Z` and `Z̄`, the inverse-map gradient
//! picks up a chain-rule term from every own variable and, conjugated, from
//! every paired variable.

use crate::conjugate::complete_conjugates;
use crate::error::{invalid_config, Result};
use crate::layout::CoefficientLayout;
use crate::polynomial::{BasisJacobian, PolynomialBasis};
use crate::samples::SampleSet;
use crate::traits::Objective;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use num_complex::Complex;

/// Sample-dependent quantities that stay fixed during optimization.
#[derive(Debug, Clone)]
pub struct InvarianceContext {
    reduced: DMatrix<Complex<f64>>,
    shifted: DMatrix<Complex<f64>>,
    linear_part: DVector<Complex<f64>>,
    inverse_values: DMatrix<Complex<f64>>,
    inverse_advanced: DMatrix<Complex<f64>>,
    weights: DMatrix<f64>,
    normal_form_basis: PolynomialBasis,
    normal_form_jacobian: BasisJacobian,
}

impl InvarianceContext {
    pub fn new(
        samples: &SampleSet,
        inverse_basis: &PolynomialBasis,
        normal_form_basis: &PolynomialBasis,
        weights: &DMatrix<f64>,
    ) -> Result<Self> {
        let nvars = 2 * samples.reduced_dim();
        for (label, basis) in [("Inverse-map", inverse_basis), ("Normal-form", normal_form_basis)] {
            if basis.nvars() != nvars {
                invalid_config!(
                    "{} basis has {} variables; {} reduced coordinates need {}.",
                    label,
                    basis.nvars(),
                    samples.reduced_dim(),
                    nvars
                );
            }
        }
        if weights.shape() != samples.reduced().shape() {
            invalid_config!(
                "Weight matrix has shape {:?}, expected {:?}.",
                weights.shape(),
                samples.reduced().shape()
            );
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            invalid_config!("Weights must be finite and non-negative, found {}.", w);
        }

        let inverse_values = inverse_basis.evaluate(&complete_conjugates(samples.reduced()))?;
        let inverse_advanced = samples.advanced_basis(inverse_basis)?;
        Ok(Self {
            reduced: samples.reduced().clone(),
            shifted: samples.shifted().clone(),
            linear_part: samples.linear_part().clone(),
            inverse_values,
            inverse_advanced,
            weights: weights.clone(),
            normal_form_basis: normal_form_basis.clone(),
            normal_form_jacobian: normal_form_basis.jacobian(),
        })
    }

    pub fn reduced_dim(&self) -> usize {
        self.reduced.nrows()
    }

    pub fn sample_count(&self) -> usize {
        self.reduced.ncols()
    }

    /// `Φ_iT` at the samples.
    pub fn inverse_values(&self) -> &DMatrix<Complex<f64>> {
        &self.inverse_values
    }

    fn normalization(&self) -> f64 {
        (self.sample_count() * self.reduced_dim()) as f64
    }
}

#[derive(Debug, Clone)]
pub struct ResidualEvaluation {
    pub residual: DMatrix<Complex<f64>>,
    pub loss: f64,
    pub gradient: Option<DVector<f64>>,
}

/// Objective over the packed parameters, borrowing a read-only context.
#[derive(Debug, Clone, Copy)]
pub struct InvarianceResidual<'a> {
    context: &'a InvarianceContext,
    layout: &'a CoefficientLayout,
}

impl<'a> InvarianceResidual<'a> {
    pub fn new(context: &'a InvarianceContext, layout: &'a CoefficientLayout) -> Result<Self> {
        let rows = context.reduced_dim();
        let inverse_cols = context.inverse_values.nrows();
        let normal_cols = context.normal_form_basis.dimension();
        let inverse = layout.inverse();
        let normal_form = layout.normal_form();
        if inverse.rows() != rows
            || inverse.cols() != inverse_cols
            || normal_form.rows() != rows
            || normal_form.cols() != normal_cols
        {
            invalid_config!(
                "Layout {}x{} / {}x{} does not match coefficient shapes {}x{} / {}x{}.",
                inverse.rows(),
                inverse.cols(),
                normal_form.rows(),
                normal_form.cols(),
                rows,
                inverse_cols,
                rows,
                normal_cols
            );
        }
        Ok(Self { context, layout })
    }

    pub fn layout(&self) -> &CoefficientLayout {
        self.layout
    }

    pub fn evaluate(
        &self,
        params: &DVector<f64>,
        with_gradient: bool,
    ) -> Result<ResidualEvaluation> {
        let ctx = self.context;
        let (w_it, w_n) = self.layout.unpack(params)?;

        let inverse_nl = &w_it * &ctx.inverse_values;
        let transformed = complete_conjugates(&(&ctx.reduced + &inverse_nl));
        let normal_values = ctx.normal_form_basis.evaluate(&transformed)?;

        let mut residual = &ctx.shifted + &w_it * &ctx.inverse_advanced - &w_n * &normal_values;
        for s in 0..residual.ncols() {
            for i in 0..residual.nrows() {
                residual[(i, s)] -= ctx.linear_part[i] * inverse_nl[(i, s)];
            }
        }

        let loss = residual
            .iter()
            .zip(ctx.weights.iter())
            .map(|(e, w)| e.norm_sqr() * w)
            .sum::<f64>()
            / ctx.normalization();

        let gradient = if with_gradient {
            Some(self.gradient(&residual, &w_n, &transformed, &normal_values)?)
        } else {
            None
        };

        Ok(ResidualEvaluation {
            residual,
            loss,
            gradient,
        })
    }

    /// Conjugate Wirtinger derivatives of the loss, packed into real parameters.
    fn gradient(
        &self,
        residual: &DMatrix<Complex<f64>>,
        w_n: &DMatrix<Complex<f64>>,
        transformed: &DMatrix<Complex<f64>>,
        normal_values: &DMatrix<Complex<f64>>,
    ) -> Result<DVector<f64>> {
        let ctx = self.context;
        let half = ctx.reduced_dim();
        let jacobian = &ctx.normal_form_jacobian;
        let scale = Complex::new(1.0 / ctx.normalization(), 0.0);

        let weighted = residual.zip_map(&ctx.weights, |e, w| e * w);
        let adjoint = w_n.adjoint() * &weighted;
        let support = jacobian.support().evaluate(transformed)?;

        // Chain rule through Φ_N([Z; Z̄]): own variables enter directly, the
        // paired variables through their conjugate.
        let mut lifted = DMatrix::zeros(half, residual.ncols());
        for j in 0..half {
            let own = contract(jacobian.operator(j), &adjoint, &support);
            let paired = contract(jacobian.operator(half + j), &adjoint, &support);
            for s in 0..residual.ncols() {
                lifted[(j, s)] =
                    own[s] + paired[s].conj() + ctx.linear_part[j].conj() * weighted[(j, s)];
            }
        }

        let grad_inverse = (&weighted * ctx.inverse_advanced.adjoint()
            - lifted * ctx.inverse_values.adjoint())
            * scale;
        let grad_normal = -(&weighted * normal_values.adjoint()) * scale;
        self.layout.pack_gradient(&grad_inverse, &grad_normal)
    }
}

/// `Σ_{(q,r)} op[q,r] · B[q,s] · conj(S[r,s])` for every sample `s`.
fn contract(
    operator: &CsrMatrix<f64>,
    adjoint: &DMatrix<Complex<f64>>,
    support: &DMatrix<Complex<f64>>,
) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); adjoint.ncols()];
    for (q, r, &factor) in operator.triplet_iter() {
        for (s, acc) in out.iter_mut().enumerate() {
            *acc += adjoint[(q, s)] * support[(r, s)].conj() * factor;
        }
    }
    out
}

impl Objective for InvarianceResidual<'_> {
    fn dimension(&self) -> usize {
        self.layout.parameter_len()
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64> {
        Ok(self.evaluate(x, false)?.loss)
    }

    fn value_and_gradient(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let evaluation = self.evaluate(x, true)?;
        let gradient = evaluation
            .gradient
            .unwrap_or_else(|| DVector::zeros(self.dimension()));
        Ok((evaluation.loss, gradient))
    }
}
