//! Mapping between the real parameter vector seen by the minimizer and the
//! sparse complex coefficient matrices of the inverse map and normal form.
//!
//! Parameter layout, for `a` free inverse-map entries and `b` free
//! normal-form entries:
//!
//! ```text
//! [ Re(iT_0..iT_a) | Re(N_0..N_b) | Im(iT_0..iT_a) | Im(N_0..N_b) ]
//! ```

use crate::error::{invalid_config, NormalFormError, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use std::collections::HashSet;

/// Real encoding of a complex coefficient vector: real parts, then imaginary parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector(DVector<f64>);

impl ParameterVector {
    pub fn from_vector(values: DVector<f64>) -> Result<Self> {
        if values.len() % 2 != 0 {
            invalid_config!(
                "Parameter vector length {} is odd; real and imaginary halves must match.",
                values.len()
            );
        }
        Ok(Self(values))
    }

    pub fn from_complex(values: &[Complex<f64>]) -> Self {
        let free = values.len();
        Self(DVector::from_fn(2 * free, |i, _| {
            if i < free {
                values[i].re
            } else {
                values[i - free].im
            }
        }))
    }

    pub fn to_complex(&self) -> Vec<Complex<f64>> {
        split_complex(self.0.as_slice())
    }

    /// Number of complex coefficients encoded.
    pub fn free_count(&self) -> usize {
        self.0.len() / 2
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.0
    }

    pub fn into_vector(self) -> DVector<f64> {
        self.0
    }
}

fn split_complex(values: &[f64]) -> Vec<Complex<f64>> {
    let free = values.len() / 2;
    (0..free)
        .map(|i| Complex::new(values[i], values[free + i]))
        .collect()
}

/// Free `(row, col)` entries of one coefficient matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    rows: usize,
    cols: usize,
    entries: Vec<(usize, usize)>,
    linear: Vec<usize>,
}

impl SparsityPattern {
    pub fn new(entries: Vec<(usize, usize)>, rows: usize, cols: usize) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for &(row, col) in &entries {
            if row >= rows || col >= cols {
                return Err(NormalFormError::IndexError {
                    row,
                    col,
                    rows,
                    cols,
                });
            }
            if !seen.insert((row, col)) {
                invalid_config!("Sparsity entry ({}, {}) is listed twice.", row, col);
            }
        }
        // nalgebra storage is column-major.
        let linear = entries.iter().map(|&(row, col)| col * rows + row).collect();
        Ok(Self {
            rows,
            cols,
            entries,
            linear,
        })
    }

    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            entries: Vec::new(),
            linear: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(usize, usize)] {
        &self.entries
    }

    pub fn linear_indices(&self) -> &[usize] {
        &self.linear
    }

    /// Dense matrix with `values` at the pattern coordinates and zeros elsewhere.
    pub fn place(&self, values: &[Complex<f64>]) -> DMatrix<Complex<f64>> {
        debug_assert_eq!(values.len(), self.entries.len());
        let mut matrix = DMatrix::zeros(self.rows, self.cols);
        for (&(row, col), &value) in self.entries.iter().zip(values) {
            matrix[(row, col)] = value;
        }
        matrix
    }

    /// Values of `matrix` at the pattern coordinates, read through the linear indices.
    pub fn extract(&self, matrix: &DMatrix<Complex<f64>>) -> Vec<Complex<f64>> {
        debug_assert_eq!(matrix.shape(), (self.rows, self.cols));
        let storage = matrix.as_slice();
        self.linear.iter().map(|&idx| storage[idx]).collect()
    }
}

/// Both sparsity patterns and the parameter layout built from them.
#[derive(Debug, Clone)]
pub struct CoefficientLayout {
    inverse: SparsityPattern,
    normal_form: SparsityPattern,
}

impl CoefficientLayout {
    pub fn new(inverse: SparsityPattern, normal_form: SparsityPattern) -> Result<Self> {
        if inverse.rows() != normal_form.rows() {
            invalid_config!(
                "Inverse-map pattern has {} rows but normal-form pattern has {}.",
                inverse.rows(),
                normal_form.rows()
            );
        }
        Ok(Self {
            inverse,
            normal_form,
        })
    }

    pub fn reduced_dim(&self) -> usize {
        self.inverse.rows()
    }

    pub fn inverse(&self) -> &SparsityPattern {
        &self.inverse
    }

    pub fn normal_form(&self) -> &SparsityPattern {
        &self.normal_form
    }

    /// Number of complex free coefficients across both matrices.
    pub fn free_count(&self) -> usize {
        self.inverse.len() + self.normal_form.len()
    }

    pub fn parameter_len(&self) -> usize {
        2 * self.free_count()
    }

    /// Splits `params` into the nonlinear coefficient blocks `(W_it_nl, W_n_nl)`.
    pub fn unpack(
        &self,
        params: &DVector<f64>,
    ) -> Result<(DMatrix<Complex<f64>>, DMatrix<Complex<f64>>)> {
        if params.len() != self.parameter_len() {
            invalid_config!(
                "Expected {} parameters, got {}.",
                self.parameter_len(),
                params.len()
            );
        }
        let coefficients = split_complex(params.as_slice());
        let (inverse, normal_form) = coefficients.split_at(self.inverse.len());
        Ok((self.inverse.place(inverse), self.normal_form.place(normal_form)))
    }

    /// Inverse of [`Self::unpack`] on the pattern entries.
    pub fn pack(
        &self,
        inverse: &DMatrix<Complex<f64>>,
        normal_form: &DMatrix<Complex<f64>>,
    ) -> Result<ParameterVector> {
        self.check_shapes(inverse, normal_form)?;
        let mut coefficients = self.inverse.extract(inverse);
        coefficients.extend(self.normal_form.extract(normal_form));
        Ok(ParameterVector::from_complex(&coefficients))
    }

    /// Packs conjugate Wirtinger derivatives `∂f/∂conj(W)` into the gradient
    /// with respect to the real parameters, which is twice their real and
    /// imaginary parts.
    pub fn pack_gradient(
        &self,
        inverse: &DMatrix<Complex<f64>>,
        normal_form: &DMatrix<Complex<f64>>,
    ) -> Result<DVector<f64>> {
        let mut packed = self.pack(inverse, normal_form)?.into_vector();
        packed *= 2.0;
        Ok(packed)
    }

    fn check_shapes(
        &self,
        inverse: &DMatrix<Complex<f64>>,
        normal_form: &DMatrix<Complex<f64>>,
    ) -> Result<()> {
        let expected_inverse = (self.inverse.rows(), self.inverse.cols());
        let expected_normal = (self.normal_form.rows(), self.normal_form.cols());
        if inverse.shape() != expected_inverse || normal_form.shape() != expected_normal {
            invalid_config!(
                "Coefficient shapes {:?} / {:?} do not match layout {:?} / {:?}.",
                inverse.shape(),
                normal_form.shape(),
                expected_inverse,
                expected_normal
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> CoefficientLayout {
        let inverse = SparsityPattern::new(vec![(0, 2), (1, 0), (0, 1)], 2, 3).expect("pattern");
        let normal_form = SparsityPattern::new(vec![(1, 1)], 2, 2).expect("pattern");
        CoefficientLayout::new(inverse, normal_form).expect("layout")
    }

    #[test]
    fn parameter_vector_complex_round_trip_is_exact() {
        let values = vec![
            Complex::new(0.1, -3.0),
            Complex::new(1e-300, 7.25),
            Complex::new(-2.5, 0.0),
        ];
        let params = ParameterVector::from_complex(&values);
        assert_eq!(params.as_vector().as_slice(), &[0.1, 1e-300, -2.5, -3.0, 7.25, 0.0]);
        assert_eq!(params.to_complex(), values);
        assert_eq!(params.free_count(), 3);

        let back = ParameterVector::from_vector(params.clone().into_vector()).expect("even");
        assert_eq!(back, params);
        assert!(ParameterVector::from_vector(DVector::zeros(3)).is_err());
    }

    #[test]
    fn sparsity_pattern_rejects_out_of_range_entries() {
        let err = SparsityPattern::new(vec![(0, 0), (2, 1)], 2, 4).expect_err("row out of range");
        assert_eq!(
            err,
            NormalFormError::IndexError {
                row: 2,
                col: 1,
                rows: 2,
                cols: 4
            }
        );
        let err = SparsityPattern::new(vec![(0, 4)], 2, 4).expect_err("col out of range");
        assert!(matches!(err, NormalFormError::IndexError { col: 4, .. }));
    }

    #[test]
    fn sparsity_pattern_rejects_duplicates() {
        let err = SparsityPattern::new(vec![(1, 1), (1, 1)], 2, 2).expect_err("duplicate");
        assert!(matches!(err, NormalFormError::InvalidConfiguration(_)));
    }

    #[test]
    fn linear_indices_are_column_major() {
        let pattern = SparsityPattern::new(vec![(0, 2), (1, 0), (1, 2)], 2, 3).expect("pattern");
        assert_eq!(pattern.linear_indices(), &[4, 1, 5]);
    }

    #[test]
    fn unpack_places_real_then_imaginary_halves() {
        let layout = layout();
        assert_eq!(layout.parameter_len(), 8);
        let params = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0, -1.0, -2.0, -3.0, -4.0]);
        let (inverse, normal_form) = layout.unpack(&params).expect("unpack");

        assert_eq!(inverse.shape(), (2, 3));
        assert_eq!(inverse[(0, 2)], Complex::new(1.0, -1.0));
        assert_eq!(inverse[(1, 0)], Complex::new(2.0, -2.0));
        assert_eq!(inverse[(0, 1)], Complex::new(3.0, -3.0));
        assert_eq!(inverse[(0, 0)], Complex::new(0.0, 0.0));
        assert_eq!(normal_form[(1, 1)], Complex::new(4.0, -4.0));
        assert_eq!(normal_form[(0, 1)], Complex::new(0.0, 0.0));

        assert!(layout.unpack(&DVector::zeros(6)).is_err());
    }

    #[test]
    fn placed_values_are_recovered_by_linear_extraction() {
        let layout = layout();
        let params = DVector::from_fn(8, |i, _| (i as f64 + 1.0) * 0.37 - 1.1);
        let (inverse, normal_form) = layout.unpack(&params).expect("unpack");

        let values = ParameterVector::from_vector(params.clone()).unwrap().to_complex();
        for (k, &(row, col)) in layout.inverse().entries().iter().enumerate() {
            assert_eq!(inverse[(row, col)], values[k]);
            assert_eq!(layout.inverse().extract(&inverse)[k], values[k]);
        }
        let offset = layout.inverse().len();
        assert_eq!(layout.normal_form().extract(&normal_form)[0], values[offset]);

        let packed = layout.pack(&inverse, &normal_form).expect("pack");
        assert_eq!(packed.as_vector(), &params);
    }

    #[test]
    fn pack_gradient_doubles_parts() {
        let layout = layout();
        let mut inverse = DMatrix::zeros(2, 3);
        inverse[(1, 0)] = Complex::new(0.5, -0.25);
        let mut normal_form = DMatrix::zeros(2, 2);
        normal_form[(1, 1)] = Complex::new(-1.0, 2.0);
        normal_form[(0, 0)] = Complex::new(9.0, 9.0);

        let gradient = layout.pack_gradient(&inverse, &normal_form).expect("gradient");
        assert_eq!(
            gradient.as_slice(),
            &[0.0, 1.0, 0.0, -2.0, 0.0, -0.5, 0.0, 4.0]
        );

        let wrong = DMatrix::zeros(3, 3);
        assert!(layout.pack_gradient(&wrong, &normal_form).is_err());
    }

    #[test]
    fn layout_requires_matching_row_counts() {
        let inverse = SparsityPattern::empty(2, 3);
        let normal_form = SparsityPattern::empty(1, 3);
        assert!(CoefficientLayout::new(inverse, normal_form).is_err());
    }
}
