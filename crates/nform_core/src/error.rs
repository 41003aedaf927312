use thiserror::Error;

/// Failure modes of the normal-form fitting pipeline.
///
/// Non-convergence of the minimizer is not represented here: the best iterate
/// is always returned together with its [`crate::minimizer::ExitStatus`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalFormError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Sparsity entry ({row}, {col}) is outside the {rows}x{cols} coefficient matrix.")]
    IndexError {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Linear algebra failure: {0}")]
    LinearAlgebraError(String),
}

pub type Result<T> = std::result::Result<T, NormalFormError>;

/// Early-return with an [`NormalFormError::InvalidConfiguration`], `bail!` style.
macro_rules! invalid_config {
    ($($arg:tt)*) => {
        return Err($crate::error::NormalFormError::InvalidConfiguration(format!($($arg)*)))
    };
}

pub(crate) use invalid_config;
