pub mod conjugate;
pub mod error;
pub mod fit;
pub mod layout;
pub mod maps;
pub mod minimizer;
pub mod polynomial;
pub mod regression;
pub mod residual;
pub mod samples;
/// The `nform_core` crate fits data-driven normal forms of reduced-order dynamics.
/// Given samples of a map or flow in reduced complex coordinates, it optimizes an
/// inverse coordinate change and a sparse normal form so that the invariance
/// equation holds, then regresses the forward coordinate change.
///
/// Key components:
/// - **Polynomial**: Monomial bases on conjugate-completed coordinates and their
///   derivative operators.
/// - **Layout**: Sparsity patterns and the packed real parameter vector.
/// - **Residual**: The weighted invariance residual with its analytic gradient.
/// - **Minimizer / Regression**: argmin's L-BFGS behind the `Objective` seam, and
///   complex ridge regression.
/// - **Fit**: The end-to-end pipeline producing a `MapBundle`.
pub mod traits;

pub use error::{NormalFormError, Result};
pub use fit::{fit_normal_form, FitOptions, FitReport, NormalFormFit, NormalFormProblem};
pub use maps::{ComplexNumber, MapBundle, MapBundleSnapshot, PolynomialMap};
pub use polynomial::PolynomialBasis;
pub use samples::SampleSet;
