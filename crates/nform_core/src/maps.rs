//! Closed-form maps produced by a fit.
//!
//! All three maps act on own reduced coordinates and share the form
//! `z ↦ linear ⊙ z + W_nl Φ([z; z̄])`. The bundle moves between those
//! coordinates and real physical coordinates with the modal basis `V_own`.

use crate::conjugate::{complete_conjugates, realify};
use crate::error::{invalid_config, NormalFormError, Result};
use crate::polynomial::PolynomialBasis;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

const PROJECTION_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

impl From<ComplexNumber> for Complex<f64> {
    fn from(value: ComplexNumber) -> Self {
        Complex::new(value.re, value.im)
    }
}

/// Rejects bases that overlap the fixed linear block.
pub(crate) fn check_nonlinear_basis(basis: &PolynomialBasis, label: &str) -> Result<()> {
    if let Some(order) = basis.min_order() {
        if order < 2 {
            invalid_config!(
                "{} basis must only contain terms of order 2 or higher, found order {}.",
                label,
                order
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PolynomialMap {
    linear: DVector<Complex<f64>>,
    nonlinear: DMatrix<Complex<f64>>,
    basis: PolynomialBasis,
}

impl PolynomialMap {
    pub fn new(
        linear: DVector<Complex<f64>>,
        nonlinear: DMatrix<Complex<f64>>,
        basis: PolynomialBasis,
    ) -> Result<Self> {
        let dim = linear.len();
        if basis.nvars() != 2 * dim {
            invalid_config!(
                "Map basis has {} variables; {} reduced coordinates need {}.",
                basis.nvars(),
                dim,
                2 * dim
            );
        }
        if nonlinear.shape() != (dim, basis.dimension()) {
            invalid_config!(
                "Nonlinear coefficients have shape {:?}, expected {:?}.",
                nonlinear.shape(),
                (dim, basis.dimension())
            );
        }
        check_nonlinear_basis(&basis, "Map")?;
        Ok(Self {
            linear,
            nonlinear,
            basis,
        })
    }

    pub fn reduced_dim(&self) -> usize {
        self.linear.len()
    }

    pub fn linear(&self) -> &DVector<Complex<f64>> {
        &self.linear
    }

    pub fn nonlinear(&self) -> &DMatrix<Complex<f64>> {
        &self.nonlinear
    }

    /// Basis of the nonlinear block only.
    pub fn basis(&self) -> &PolynomialBasis {
        &self.basis
    }

    /// Basis matching [`Self::coefficients`]: linear monomials, then the
    /// nonlinear terms.
    pub fn full_basis(&self) -> Result<PolynomialBasis> {
        self.basis.with_linear_terms()
    }

    /// `[diag(linear) 0 | W_nl]`, one row per own coordinate.
    pub fn coefficients(&self) -> DMatrix<Complex<f64>> {
        let dim = self.reduced_dim();
        let mut full = DMatrix::zeros(dim, 2 * dim + self.basis.dimension());
        for i in 0..dim {
            full[(i, i)] = self.linear[i];
        }
        full.view_mut((0, 2 * dim), self.nonlinear.shape())
            .copy_from(&self.nonlinear);
        full
    }

    /// Applies the map to own coordinates stored column-wise.
    pub fn evaluate(&self, own: &DMatrix<Complex<f64>>) -> Result<DMatrix<Complex<f64>>> {
        if own.nrows() != self.reduced_dim() {
            invalid_config!(
                "Expected {} reduced coordinates per point, got {}.",
                self.reduced_dim(),
                own.nrows()
            );
        }
        let values = self.basis.evaluate(&complete_conjugates(own))?;
        let mut image = &self.nonlinear * values;
        for (s, mut column) in image.column_iter_mut().enumerate() {
            for i in 0..column.nrows() {
                column[i] += self.linear[i] * own[(i, s)];
            }
        }
        Ok(image)
    }

    pub fn snapshot(&self) -> Result<MapSnapshot> {
        Ok(MapSnapshot {
            coefficients: matrix_rows(&self.coefficients()),
            exponents: self.full_basis()?.exponents().to_vec(),
        })
    }
}

/// The forward map `T`, inverse map `iT` and normal form `N` of one fit.
#[derive(Debug, Clone)]
pub struct MapBundle {
    forward: PolynomialMap,
    inverse: PolynomialMap,
    normal_form: PolynomialMap,
    change_of_basis: DMatrix<Complex<f64>>,
    projection: DMatrix<Complex<f64>>,
}

impl MapBundle {
    /// `change_of_basis` holds the own modal vectors `V_own` (physical × reduced);
    /// the paired half of the basis is their conjugate.
    pub fn new(
        forward: PolynomialMap,
        inverse: PolynomialMap,
        normal_form: PolynomialMap,
        change_of_basis: DMatrix<Complex<f64>>,
    ) -> Result<Self> {
        let dim = inverse.reduced_dim();
        if forward.reduced_dim() != dim || normal_form.reduced_dim() != dim {
            invalid_config!(
                "Maps disagree on the reduced dimension ({}, {}, {}).",
                forward.reduced_dim(),
                dim,
                normal_form.reduced_dim()
            );
        }
        if change_of_basis.ncols() != dim || change_of_basis.nrows() == 0 {
            invalid_config!(
                "Change of basis has shape {:?}; expected n x {}.",
                change_of_basis.shape(),
                dim
            );
        }
        if !change_of_basis
            .iter()
            .all(|v| v.re.is_finite() && v.im.is_finite())
        {
            invalid_config!("Change of basis must be finite.");
        }

        let conjugated = change_of_basis.map(|v| v.conj());
        let full = DMatrix::from_fn(change_of_basis.nrows(), 2 * dim, |i, j| {
            if j < dim {
                change_of_basis[(i, j)]
            } else {
                conjugated[(i, j - dim)]
            }
        });
        let projection = full
            .pseudo_inverse(PROJECTION_EPS)
            .map_err(|err| NormalFormError::LinearAlgebraError(err.to_string()))?;

        Ok(Self {
            forward,
            inverse,
            normal_form,
            change_of_basis,
            projection,
        })
    }

    pub fn reduced_dim(&self) -> usize {
        self.inverse.reduced_dim()
    }

    pub fn physical_dim(&self) -> usize {
        self.change_of_basis.nrows()
    }

    pub fn forward_map(&self) -> &PolynomialMap {
        &self.forward
    }

    pub fn inverse_map(&self) -> &PolynomialMap {
        &self.inverse
    }

    pub fn normal_form_map(&self) -> &PolynomialMap {
        &self.normal_form
    }

    pub fn change_of_basis(&self) -> &DMatrix<Complex<f64>> {
        &self.change_of_basis
    }

    /// `T` in reduced coordinates. Accepts own or conjugate-completed points.
    pub fn forward_reduced(&self, z: &DMatrix<Complex<f64>>) -> Result<DMatrix<Complex<f64>>> {
        self.forward.evaluate(&self.own_rows(z)?)
    }

    /// `T` followed by the change of basis: real physical coordinates.
    pub fn forward(&self, z: &DMatrix<Complex<f64>>) -> Result<DMatrix<f64>> {
        Ok(realify(&self.change_of_basis, &self.forward_reduced(z)?))
    }

    /// `iT(V⁺x)` for physical points `x`, conjugate-completed.
    pub fn inverse(&self, x: &DMatrix<f64>) -> Result<DMatrix<Complex<f64>>> {
        if x.nrows() != self.physical_dim() {
            invalid_config!(
                "Expected {} physical coordinates per point, got {}.",
                self.physical_dim(),
                x.nrows()
            );
        }
        let projected = &self.projection * x.map(|v| Complex::new(v, 0.0));
        let own = projected.rows(0, self.reduced_dim()).into_owned();
        Ok(complete_conjugates(&self.inverse.evaluate(&own)?))
    }

    /// `N(z)`, conjugate-completed. Accepts own or conjugate-completed points.
    pub fn normal_form(&self, z: &DMatrix<Complex<f64>>) -> Result<DMatrix<Complex<f64>>> {
        Ok(complete_conjugates(&self.normal_form.evaluate(&self.own_rows(z)?)?))
    }

    pub fn snapshot(&self) -> Result<MapBundleSnapshot> {
        Ok(MapBundleSnapshot {
            forward: self.forward.snapshot()?,
            inverse: self.inverse.snapshot()?,
            normal_form: self.normal_form.snapshot()?,
            change_of_basis: matrix_rows(&self.change_of_basis),
        })
    }

    fn own_rows(&self, z: &DMatrix<Complex<f64>>) -> Result<DMatrix<Complex<f64>>> {
        let dim = self.reduced_dim();
        if z.nrows() == dim {
            Ok(z.clone())
        } else if z.nrows() == 2 * dim {
            Ok(z.rows(0, dim).into_owned())
        } else {
            invalid_config!(
                "Expected {} or {} reduced coordinates per point, got {}.",
                dim,
                2 * dim,
                z.nrows()
            );
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSnapshot {
    /// Rows of `[diag(linear) 0 | W_nl]`.
    pub coefficients: Vec<Vec<ComplexNumber>>,
    /// Exponent rows matching the coefficient columns.
    pub exponents: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapBundleSnapshot {
    pub forward: MapSnapshot,
    pub inverse: MapSnapshot,
    pub normal_form: MapSnapshot,
    pub change_of_basis: Vec<Vec<ComplexNumber>>,
}

fn matrix_rows(matrix: &DMatrix<Complex<f64>>) -> Vec<Vec<ComplexNumber>> {
    matrix
        .row_iter()
        .map(|row| row.iter().map(|v| ComplexNumber::from(*v)).collect())
        .collect()
}
