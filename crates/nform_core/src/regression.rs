//! Complex ridge regression used to fit the forward map from the optimized
//! inverse transform.

use crate::error::{invalid_config, NormalFormError, Result};
use nalgebra::linalg::SVD;
use nalgebra::DMatrix;
use num_complex::Complex;

const SVD_MAX_ITERATIONS: usize = 1_000;

/// Solves `min_X ‖target - X·basis‖² + penalty·‖X‖²` for `X`.
///
/// `basis` holds one evaluated basis function per row (p × n) and `target`
/// one output coordinate per row (k × n); the result is k × p. With a zero
/// penalty this is the minimum-norm least-squares solution, discarding
/// singular values below `max(p, n) · ε · σ_max`.
pub fn ridge_regression(
    basis: &DMatrix<Complex<f64>>,
    target: &DMatrix<Complex<f64>>,
    penalty: f64,
) -> Result<DMatrix<Complex<f64>>> {
    if !penalty.is_finite() || penalty < 0.0 {
        invalid_config!("Ridge penalty must be finite and non-negative, got {}.", penalty);
    }
    if basis.ncols() != target.ncols() {
        invalid_config!(
            "Regression basis has {} samples but target has {}.",
            basis.ncols(),
            target.ncols()
        );
    }
    let finite = |v: &Complex<f64>| v.re.is_finite() && v.im.is_finite();
    if !basis.iter().all(finite) || !target.iter().all(finite) {
        return Err(NormalFormError::LinearAlgebraError(
            "Regression inputs contain non-finite values.".into(),
        ));
    }

    let (terms, samples) = basis.shape();
    if terms == 0 || samples == 0 {
        return Ok(DMatrix::zeros(target.nrows(), terms));
    }

    let svd = SVD::try_new(basis.clone(), true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or_else(|| NormalFormError::LinearAlgebraError("SVD did not converge.".into()))?;
    let missing = |side: &str| {
        NormalFormError::LinearAlgebraError(format!("SVD returned no {side} vectors."))
    };
    let u = svd.u.ok_or_else(|| missing("left"))?;
    let v_t = svd.v_t.ok_or_else(|| missing("right"))?;

    let largest = svd.singular_values.max();
    let cutoff = terms.max(samples) as f64 * f64::EPSILON * largest;
    let filter = svd.singular_values.map(|s| {
        if penalty > 0.0 {
            Complex::new(s / (s * s + penalty), 0.0)
        } else if s > cutoff {
            Complex::new(1.0 / s, 0.0)
        } else {
            Complex::new(0.0, 0.0)
        }
    });

    // X = R V diag(filter) Uᴴ
    let mut projected = target * v_t.adjoint();
    for (j, mut column) in projected.column_iter_mut().enumerate() {
        column *= filter[j];
    }
    let coefficients = projected * u.adjoint();

    if !coefficients.iter().all(finite) {
        return Err(NormalFormError::LinearAlgebraError(
            "Regression produced non-finite coefficients.".into(),
        ));
    }
    Ok(coefficients)
}
