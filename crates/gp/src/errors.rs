use std::fmt;
use thiserror::Error;

/// A result type for sparse GP regression algorithm
pub type Result<T> = std::result::Result<T, GpError>;

/// Matrices handed to a Cholesky factorization, used to report which one failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GramBlock {
    /// Inducing points covariance `Kuu + jitter.I`
    InducingCovariance,
    /// Variational low-rank correction `I + A.A^T`
    VfeCorrection,
    /// FITC low-rank correction `I + V.diag(1/nu).V^T`
    FitcCorrection,
}

impl fmt::Display for GramBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            GramBlock::InducingCovariance => "inducing covariance Kuu + jitter.I",
            GramBlock::VfeCorrection => "variational correction I + A.A^T",
            GramBlock::FitcCorrection => "FITC correction I + V.diag(1/nu).V^T",
        };
        write!(f, "{name}")
    }
}

/// Numerical failures raised during evidence or prediction computations.
///
/// No recovery is attempted: retrying with a larger jitter is left to the caller.
#[derive(Error, Debug)]
pub enum NumericalError {
    /// Cholesky factorization failed
    #[error(
        "{matrix} ({size}x{size}) is not numerically positive definite \
         (jitter={jitter:e}, diagonal max/min ratio={diag_ratio:e})"
    )]
    NotPositiveDefinite {
        /// Which matrix was factorized
        matrix: GramBlock,
        /// Jitter value used for the computation
        jitter: f64,
        /// Matrix size
        size: usize,
        /// Ratio between largest and smallest diagonal terms, a cheap conditioning hint
        diag_ratio: f64,
    },
    /// FITC effective noise `nu_i = Kdiag_i - Qff_ii + noise` is not positive
    #[error(
        "FITC effective noise nu[{index}]={value:e} is not positive (noise variance={noise_variance:e})"
    )]
    NonPositiveEffectiveNoise {
        /// Index of the training point
        index: usize,
        /// Offending nu value
        value: f64,
        /// Gaussian noise variance
        noise_variance: f64,
    },
}

/// An error when using a [`SparseGaussianProcess`](crate::SparseGaussianProcess)
#[derive(Error, Debug)]
pub enum GpError {
    /// When input matrices dimensions are inconsistent
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// When a factorization fails or an intermediate quantity is out of its domain
    #[error(transparent)]
    NumericalError(#[from] NumericalError),
    /// When FITC approximation error goes negative beyond floating point noise
    #[error(
        "Degenerate FITC approximation: {count} points with Kdiag - Qff < 0 (min={min_error:e}), \
         inducing points are likely poorly located"
    )]
    DegenerateApproximation {
        /// Number of flagged training points
        count: usize,
        /// Smallest approximation error
        min_error: f64,
    },
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When error dur to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When error during saving
    #[cfg(feature = "persistent")]
    #[error("Save error: {0}")]
    SaveError(#[from] serde_json::Error),
    /// When error during loading
    #[error("Load IO error")]
    LoadIoError(#[from] std::io::Error),
    /// When error during loading
    #[error("Load error: {0}")]
    LoadError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerical_error_messages() {
        let err: GpError = NumericalError::NotPositiveDefinite {
            matrix: GramBlock::FitcCorrection,
            jitter: 0.,
            size: 3,
            diag_ratio: 2.,
        }
        .into();
        assert_eq!(
            "FITC correction I + V.diag(1/nu).V^T (3x3) is not numerically positive definite \
             (jitter=0e0, diagonal max/min ratio=2e0)",
            err.to_string()
        );
        assert_eq!(
            "inducing covariance Kuu + jitter.I",
            GramBlock::InducingCovariance.to_string()
        );
        assert_eq!(
            "variational correction I + A.A^T",
            GramBlock::VfeCorrection.to_string()
        );
    }
}
