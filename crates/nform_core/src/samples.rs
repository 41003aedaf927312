//! Reduced-coordinate training samples and the quantities derived from them
//! once, before optimization.

use crate::conjugate::complete_conjugates;
use crate::error::{invalid_config, Result};
use crate::polynomial::PolynomialBasis;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

/// How the paired sample advances the dynamics.
#[derive(Debug, Clone)]
enum Advance {
    /// Discrete time: the state one step later.
    Map { next: DMatrix<Complex<f64>> },
    /// Continuous time: the time derivative at the sample.
    Flow { velocity: DMatrix<Complex<f64>> },
}

/// Own reduced coordinates `Yk_r` (reduced_dim × n_samples), the shifted
/// quantity `Yk_1_DYk_r` and the diagonal linear part `d_r`.
#[derive(Debug, Clone)]
pub struct SampleSet {
    reduced: DMatrix<Complex<f64>>,
    shifted: DMatrix<Complex<f64>>,
    linear_part: DVector<Complex<f64>>,
    advance: Advance,
}

impl SampleSet {
    /// Discrete-time samples: `shifted = next - d ⊙ current`.
    pub fn from_map(
        current: DMatrix<Complex<f64>>,
        next: DMatrix<Complex<f64>>,
        linear_part: DVector<Complex<f64>>,
    ) -> Result<Self> {
        validate(&current, &next, &linear_part, "next-step")?;
        let shifted = shift(&next, &current, &linear_part);
        Ok(Self {
            reduced: current,
            shifted,
            linear_part,
            advance: Advance::Map { next },
        })
    }

    /// Continuous-time samples: `shifted = velocity - d ⊙ state`.
    pub fn from_flow(
        states: DMatrix<Complex<f64>>,
        velocities: DMatrix<Complex<f64>>,
        linear_part: DVector<Complex<f64>>,
    ) -> Result<Self> {
        validate(&states, &velocities, &linear_part, "velocity")?;
        let shifted = shift(&velocities, &states, &linear_part);
        Ok(Self {
            reduced: states,
            shifted,
            linear_part,
            advance: Advance::Flow {
                velocity: velocities,
            },
        })
    }

    pub fn reduced_dim(&self) -> usize {
        self.reduced.nrows()
    }

    pub fn len(&self) -> usize {
        self.reduced.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.reduced.ncols() == 0
    }

    pub fn reduced(&self) -> &DMatrix<Complex<f64>> {
        &self.reduced
    }

    pub fn shifted(&self) -> &DMatrix<Complex<f64>> {
        &self.shifted
    }

    pub fn linear_part(&self) -> &DVector<Complex<f64>> {
        &self.linear_part
    }

    /// `basis` evaluated at the advanced samples.
    ///
    /// For maps this is the basis at the next step. For flows it is the
    /// directional derivative `Σ_j ∂Φ/∂x_j · ẋ_j` along the completed velocity.
    pub fn advanced_basis(&self, basis: &PolynomialBasis) -> Result<DMatrix<Complex<f64>>> {
        match &self.advance {
            Advance::Map { next } => basis.evaluate(&complete_conjugates(next)),
            Advance::Flow { velocity } => {
                let jacobian = basis.jacobian();
                let support = jacobian.support().evaluate(&complete_conjugates(&self.reduced))?;
                let velocity = complete_conjugates(velocity);
                let mut directional = DMatrix::zeros(basis.dimension(), self.len());
                for var in 0..jacobian.nvars() {
                    let partial = jacobian.partial(var, &support);
                    for s in 0..self.len() {
                        let rate = velocity[(var, s)];
                        for row in 0..basis.dimension() {
                            directional[(row, s)] += partial[(row, s)] * rate;
                        }
                    }
                }
                Ok(directional)
            }
        }
    }
}

fn shift(
    advanced: &DMatrix<Complex<f64>>,
    current: &DMatrix<Complex<f64>>,
    linear_part: &DVector<Complex<f64>>,
) -> DMatrix<Complex<f64>> {
    DMatrix::from_fn(current.nrows(), current.ncols(), |i, s| {
        advanced[(i, s)] - linear_part[i] * current[(i, s)]
    })
}

fn validate(
    current: &DMatrix<Complex<f64>>,
    advanced: &DMatrix<Complex<f64>>,
    linear_part: &DVector<Complex<f64>>,
    label: &str,
) -> Result<()> {
    if current.nrows() == 0 {
        invalid_config!("Samples must have at least one reduced coordinate.");
    }
    if current.ncols() == 0 {
        invalid_config!("At least one sample is required.");
    }
    if current.shape() != advanced.shape() {
        invalid_config!(
            "Samples have shape {:?} but {} samples have shape {:?}.",
            current.shape(),
            label,
            advanced.shape()
        );
    }
    if linear_part.len() != current.nrows() {
        invalid_config!(
            "Linear part has {} entries for {} reduced coordinates.",
            linear_part.len(),
            current.nrows()
        );
    }
    let finite = |v: &Complex<f64>| v.re.is_finite() && v.im.is_finite();
    if !current.iter().all(finite)
        || !advanced.iter().all(finite)
        || !linear_part.iter().all(finite)
    {
        invalid_config!("Samples and linear part must be finite.");
    }
    Ok(())
}
