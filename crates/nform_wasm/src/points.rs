//! Single-point evaluation of a fitted bundle with flat JS-friendly inputs.

use anyhow::bail;
use nalgebra::DMatrix;
use nform_core::maps::{ComplexNumber, MapBundle};
use num_complex::Complex;

fn own_point(maps: &MapBundle, re: &[f64], im: &[f64]) -> anyhow::Result<DMatrix<Complex<f64>>> {
    if re.len() != im.len() {
        bail!(
            "Real and imaginary parts differ in length ({} vs {}).",
            re.len(),
            im.len()
        );
    }
    if re.len() != maps.reduced_dim() {
        bail!(
            "Expected {} reduced coordinates, got {}.",
            maps.reduced_dim(),
            re.len()
        );
    }
    Ok(DMatrix::from_fn(re.len(), 1, |i, _| Complex::new(re[i], im[i])))
}

fn column(values: &DMatrix<Complex<f64>>) -> Vec<ComplexNumber> {
    values.column(0).iter().map(|v| ComplexNumber::from(*v)).collect()
}

/// `T(z)` in physical coordinates.
pub fn forward_point(maps: &MapBundle, re: &[f64], im: &[f64]) -> anyhow::Result<Vec<f64>> {
    let physical = maps.forward(&own_point(maps, re, im)?)?;
    Ok(physical.column(0).iter().copied().collect())
}

/// `iT(V⁺x)`, conjugate-completed.
pub fn inverse_point(maps: &MapBundle, x: &[f64]) -> anyhow::Result<Vec<ComplexNumber>> {
    let point = DMatrix::from_column_slice(x.len(), 1, x);
    Ok(column(&maps.inverse(&point)?))
}

/// `N(z)`, conjugate-completed.
pub fn normal_form_point(
    maps: &MapBundle,
    re: &[f64],
    im: &[f64],
) -> anyhow::Result<Vec<ComplexNumber>> {
    Ok(column(&maps.normal_form(&own_point(maps, re, im)?)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::run_request;
    use crate::request::tests::cubic_map_request;

    #[test]
    fn point_helpers_round_trip_through_the_bundle() {
        let fit = run_request(&cubic_map_request()).expect("fit");
        let maps = &fit.maps;

        let physical = forward_point(maps, &[0.1], &[-0.2]).expect("forward");
        assert_eq!(physical.len(), 2);

        let reduced = inverse_point(maps, &physical).expect("inverse");
        assert_eq!(reduced.len(), 2);
        assert!((reduced[0].re - 0.1).abs() < 1e-3);
        assert!((reduced[0].im + 0.2).abs() < 1e-3);
        assert_eq!(reduced[1].im, -reduced[0].im);

        let image = normal_form_point(maps, &[0.1], &[-0.2]).expect("normal form");
        let z = Complex::new(0.1, -0.2);
        let expected = Complex::new(0.9, 0.1) * z + Complex::new(0.1, -0.05) * z * z * z.conj();
        assert!((Complex::from(image[0]) - expected).norm() < 1e-4);
    }

    #[test]
    fn point_helpers_validate_lengths() {
        let fit = run_request(&cubic_map_request()).expect("fit");
        assert!(forward_point(&fit.maps, &[0.1, 0.2], &[0.0, 0.0]).is_err());
        assert!(normal_form_point(&fit.maps, &[0.1], &[]).is_err());
        assert!(inverse_point(&fit.maps, &[1.0, 2.0, 3.0]).is_err());
    }
}
