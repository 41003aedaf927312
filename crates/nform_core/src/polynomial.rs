//! Multivariate monomial bases and their partial-derivative operators.
//!
//! A basis is an exponent matrix (one row per term, one column per variable).
//! Evaluation works on complex points stored column-wise, so the same basis
//! serves the conjugate-completed reduced coordinates `[z; conj(z)]`.
//!
//! Differentiating `x^e` in variable `i` gives `e_i * x^(e - unit_i)`. The
//! lowered terms form a (usually smaller) basis of their own, and the
//! derivative is a sparse operator from that basis back onto the parent terms.

use crate::error::{invalid_config, Result};
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num_complex::Complex;
use num_traits::One;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolynomialBasis {
    nvars: usize,
    exponents: Vec<Vec<u32>>,
}

impl PolynomialBasis {
    /// Every monomial in `nvars` variables with total order in
    /// `min_order..=max_order`, graded by order. Within one order the first
    /// variable carries the highest power first.
    ///
    /// An empty order range gives an empty basis.
    pub fn total_order(nvars: usize, min_order: u32, max_order: u32) -> Result<Self> {
        if nvars == 0 {
            invalid_config!("A polynomial basis needs at least one variable.");
        }
        let mut exponents = Vec::new();
        let mut current = vec![0u32; nvars];
        for order in min_order..=max_order {
            push_compositions(order, 0, &mut current, &mut exponents);
        }
        Ok(Self { nvars, exponents })
    }

    /// Builds a basis from an explicit exponent matrix.
    pub fn from_exponents(nvars: usize, exponents: Vec<Vec<u32>>) -> Result<Self> {
        if nvars == 0 {
            invalid_config!("A polynomial basis needs at least one variable.");
        }
        let mut seen = HashMap::with_capacity(exponents.len());
        for (row, term) in exponents.iter().enumerate() {
            if term.len() != nvars {
                invalid_config!(
                    "Exponent row {} has {} entries, expected {}.",
                    row,
                    term.len(),
                    nvars
                );
            }
            if let Some(first) = seen.insert(term.clone(), row) {
                invalid_config!(
                    "Exponent row {} duplicates row {} ({:?}).",
                    row,
                    first,
                    term
                );
            }
        }
        Ok(Self { nvars, exponents })
    }

    pub fn nvars(&self) -> usize {
        self.nvars
    }

    pub fn dimension(&self) -> usize {
        self.exponents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exponents.is_empty()
    }

    pub fn exponents(&self) -> &[Vec<u32>] {
        &self.exponents
    }

    /// Lowest total order among the terms, `None` for an empty basis.
    pub fn min_order(&self) -> Option<u32> {
        self.exponents.iter().map(|e| e.iter().sum()).min()
    }

    /// Row of the term with exponent `term`, if present.
    pub fn position(&self, term: &[u32]) -> Option<usize> {
        self.exponents.iter().position(|e| e.as_slice() == term)
    }

    /// Prepends the `nvars` linear monomials (in variable order).
    ///
    /// The closed-form maps put their fixed linear block in these leading
    /// columns, so the nonlinear basis must not already contain them.
    pub fn with_linear_terms(&self) -> Result<Self> {
        let mut exponents = Vec::with_capacity(self.nvars + self.exponents.len());
        for var in 0..self.nvars {
            let mut unit = vec![0u32; self.nvars];
            unit[var] = 1;
            exponents.push(unit);
        }
        exponents.extend(self.exponents.iter().cloned());
        Self::from_exponents(self.nvars, exponents)
    }

    /// Evaluates every term at every column of `points`, giving a
    /// `dimension × points.ncols()` matrix.
    pub fn evaluate(&self, points: &DMatrix<Complex<f64>>) -> Result<DMatrix<Complex<f64>>> {
        if points.nrows() != self.nvars {
            invalid_config!(
                "Basis in {} variables evaluated at points of dimension {}.",
                self.nvars,
                points.nrows()
            );
        }

        let max_powers: Vec<usize> = (0..self.nvars)
            .map(|var| {
                self.exponents
                    .iter()
                    .map(|e| e[var] as usize)
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let mut powers: Vec<Vec<Complex<f64>>> = max_powers
            .iter()
            .map(|&p| vec![Complex::one(); p + 1])
            .collect();

        let mut values = DMatrix::zeros(self.dimension(), points.ncols());
        for s in 0..points.ncols() {
            for (var, table) in powers.iter_mut().enumerate() {
                let x = points[(var, s)];
                for p in 1..table.len() {
                    table[p] = table[p - 1] * x;
                }
            }
            for (row, term) in self.exponents.iter().enumerate() {
                let mut value = Complex::one();
                for (var, &e) in term.iter().enumerate() {
                    if e > 0 {
                        value *= powers[var][e as usize];
                    }
                }
                values[(row, s)] = value;
            }
        }
        Ok(values)
    }

    /// Partial derivative of every term with respect to variable `var`.
    pub fn derivative(&self, var: usize) -> Result<BasisDerivative> {
        if var >= self.nvars {
            invalid_config!(
                "Cannot differentiate in variable {} of a {}-variable basis.",
                var,
                self.nvars
            );
        }

        let mut lowered = Vec::new();
        let mut index = HashMap::new();
        let mut row_map = vec![None; self.dimension()];
        let mut entries = Vec::new();
        for (row, term) in self.exponents.iter().enumerate() {
            if let Some((target, factor)) = lower_term(term, var, &mut lowered, &mut index) {
                row_map[row] = Some(target);
                entries.push((row, target, factor));
            }
        }

        let operator = sparse_operator(self.dimension(), lowered.len(), &entries);
        Ok(BasisDerivative {
            basis: PolynomialBasis {
                nvars: self.nvars,
                exponents: lowered,
            },
            operator,
            row_map,
        })
    }

    /// Partial derivatives in every variable, sharing one support basis.
    ///
    /// Evaluating the support once and applying each operator yields all the
    /// partial derivatives at the same points.
    pub fn jacobian(&self) -> BasisJacobian {
        let mut support = Vec::new();
        let mut index = HashMap::new();
        let mut per_var = Vec::with_capacity(self.nvars);
        for var in 0..self.nvars {
            let mut entries = Vec::new();
            for (row, term) in self.exponents.iter().enumerate() {
                if let Some((target, factor)) = lower_term(term, var, &mut support, &mut index) {
                    entries.push((row, target, factor));
                }
            }
            per_var.push(entries);
        }

        let operators = per_var
            .iter()
            .map(|entries| sparse_operator(self.dimension(), support.len(), entries))
            .collect();
        BasisJacobian {
            support: PolynomialBasis {
                nvars: self.nvars,
                exponents: support,
            },
            operators,
        }
    }
}

/// `∂/∂x_var` of a basis: `operator · lowered.evaluate(x)` is the derivative
/// of every parent term at `x`.
#[derive(Debug, Clone)]
pub struct BasisDerivative {
    basis: PolynomialBasis,
    operator: CsrMatrix<f64>,
    row_map: Vec<Option<usize>>,
}

impl BasisDerivative {
    /// The lowered terms `e - unit_var`, in order of first appearance.
    pub fn basis(&self) -> &PolynomialBasis {
        &self.basis
    }

    /// Parent-dimension × lowered-dimension operator carrying the factors `e_var`.
    pub fn operator(&self) -> &CsrMatrix<f64> {
        &self.operator
    }

    /// For each parent term, the lowered row it differentiates to. Terms that
    /// do not contain the variable map to `None` and differentiate to zero.
    pub fn row_map(&self) -> &[Option<usize>] {
        &self.row_map
    }

    pub fn evaluate(&self, points: &DMatrix<Complex<f64>>) -> Result<DMatrix<Complex<f64>>> {
        let lowered = self.basis.evaluate(points)?;
        Ok(apply_operator(&self.operator, &lowered))
    }
}

#[derive(Debug, Clone)]
pub struct BasisJacobian {
    support: PolynomialBasis,
    operators: Vec<CsrMatrix<f64>>,
}

impl BasisJacobian {
    pub fn support(&self) -> &PolynomialBasis {
        &self.support
    }

    pub fn nvars(&self) -> usize {
        self.operators.len()
    }

    pub fn operator(&self, var: usize) -> &CsrMatrix<f64> {
        &self.operators[var]
    }

    /// Partial derivative in `var`, given the support evaluated at the points.
    pub fn partial(
        &self,
        var: usize,
        support_values: &DMatrix<Complex<f64>>,
    ) -> DMatrix<Complex<f64>> {
        apply_operator(&self.operators[var], support_values)
    }
}

/// Dense result of a real sparse operator acting on complex basis values.
pub fn apply_operator(
    operator: &CsrMatrix<f64>,
    values: &DMatrix<Complex<f64>>,
) -> DMatrix<Complex<f64>> {
    debug_assert_eq!(operator.ncols(), values.nrows());
    let mut out = DMatrix::zeros(operator.nrows(), values.ncols());
    for (row, lane) in operator.row_iter().enumerate() {
        for (&col, &factor) in lane.col_indices().iter().zip(lane.values()) {
            for s in 0..values.ncols() {
                out[(row, s)] += values[(col, s)] * factor;
            }
        }
    }
    out
}

fn lower_term(
    term: &[u32],
    var: usize,
    lowered: &mut Vec<Vec<u32>>,
    index: &mut HashMap<Vec<u32>, usize>,
) -> Option<(usize, f64)> {
    let power = term[var];
    if power == 0 {
        return None;
    }
    let mut reduced = term.to_vec();
    reduced[var] -= 1;
    let target = *index.entry(reduced.clone()).or_insert_with(|| {
        lowered.push(reduced);
        lowered.len() - 1
    });
    Some((target, power as f64))
}

fn sparse_operator(rows: usize, cols: usize, entries: &[(usize, usize, f64)]) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(rows, cols);
    for &(row, col, value) in entries {
        coo.push(row, col, value);
    }
    CsrMatrix::from(&coo)
}

fn push_compositions(remaining: u32, var: usize, current: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
    if var + 1 == current.len() {
        current[var] = remaining;
        out.push(current.clone());
        return;
    }
    for power in (0..=remaining).rev() {
        current[var] = power;
        push_compositions(remaining - power, var + 1, current, out);
    }
    current[var] = 0;
}
