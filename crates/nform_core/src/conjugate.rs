//! Conversions between own reduced coordinates, their conjugate-paired
//! completion, and real physical coordinates.

use nalgebra::DMatrix;
use num_complex::Complex;

/// Stacks `own` on top of its elementwise conjugate: `[z; conj(z)]`.
///
/// Polynomial bases act on this completed vector so that a map with complex
/// coefficients stays consistent with real dynamics.
pub fn complete_conjugates(own: &DMatrix<Complex<f64>>) -> DMatrix<Complex<f64>> {
    let half = own.nrows();
    DMatrix::from_fn(2 * half, own.ncols(), |i, j| {
        if i < half {
            own[(i, j)]
        } else {
            own[(i - half, j)].conj()
        }
    })
}

/// Real physical coordinates `2 Re(V_own z)` of own coordinates `z`, for a
/// modal basis of the form `V = [V_own, conj(V_own)]`.
pub fn realify(v_own: &DMatrix<Complex<f64>>, own: &DMatrix<Complex<f64>>) -> DMatrix<f64> {
    (v_own * own).map(|v| 2.0 * v.re)
}
