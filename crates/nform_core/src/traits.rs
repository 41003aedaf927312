use crate::error::Result;
use crate::minimizer::MinimizerOutcome;
use nalgebra::DVector;

/// A smooth real-valued function of a real parameter vector.
pub trait Objective {
    /// Returns the number of parameters.
    fn dimension(&self) -> usize;

    /// Evaluates the objective at `x`.
    fn value(&self, x: &DVector<f64>) -> Result<f64>;

    /// Evaluates the objective and its gradient at `x`.
    fn value_and_gradient(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)>;
}

/// An unconstrained minimizer over real vectors.
///
/// Implementations always hand back the best point found, even when their own
/// stopping policy ends the search early; the reason is in the outcome status.
pub trait Minimizer {
    fn minimize<O: Objective>(
        &self,
        objective: &O,
        initial: DVector<f64>,
    ) -> Result<MinimizerOutcome>;
}
