//! Linear algebra primitives shared by the sparse engines.
//!
//! Explicit inverses are never formed: every `K^-1.B` product goes through a
//! Cholesky factor and triangular solves, and intermediates stay (M, N) or (M, M).

use crate::errors::{GramBlock, NumericalError, Result};
use crate::utils::to_f64;
use linfa::Float;
use linfa_linalg::cholesky::Cholesky;
use linfa_linalg::triangular::SolveTriangular;
use linfa_linalg::LinalgError;
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_stats::QuantileExt;

pub use linfa_linalg::triangular::UPLO;

/// Returns `k + jitter.I`
pub fn add_jitter<F: Float>(k: &ArrayBase<impl Data<Elem = F>, Ix2>, jitter: F) -> Array2<F> {
    let mut kj = k.to_owned();
    kj.diag_mut().mapv_inplace(|v| v + jitter);
    kj
}

/// Lower Cholesky factor `L` such that `L.L^T = mat`.
///
/// Failure is detected by the factorization itself and reported as
/// [`NumericalError::NotPositiveDefinite`] with `matrix` and `jitter` as context.
pub fn cholesky_lower<F: Float>(
    mat: &ArrayBase<impl Data<Elem = F>, Ix2>,
    matrix: GramBlock,
    jitter: F,
) -> Result<Array2<F>> {
    let not_pd = || NumericalError::NotPositiveDefinite {
        matrix,
        jitter: to_f64(jitter),
        size: mat.nrows(),
        diag_ratio: diag_ratio(mat),
    };
    match mat.cholesky() {
        Ok(l) => {
            // NaN entries slip through the pivot sign test
            if l.diag().iter().all(|v| v.is_finite()) {
                Ok(l)
            } else {
                Err(not_pd().into())
            }
        }
        Err(LinalgError::NotPositiveDefinite) => Err(not_pd().into()),
        Err(err) => Err(err.into()),
    }
}

/// Lower Cholesky factor of a low-rank correction `I + U.U^T` built by the engines.
///
/// No jitter is added to these matrices, failures are reported with a zero jitter.
pub fn cholesky_correction<F: Float>(
    mat: &ArrayBase<impl Data<Elem = F>, Ix2>,
    matrix: GramBlock,
) -> Result<Array2<F>> {
    cholesky_lower(mat, matrix, F::zero())
}

/// Solves `a.X = b` where `a` is triangular as specified by `uplo`.
///
/// Pass `l.t()` with [`UPLO::Upper`] to solve against the transpose of a lower factor.
pub fn triangular_solve<F: Float>(
    a: &ArrayBase<impl Data<Elem = F>, Ix2>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
    uplo: UPLO,
) -> Result<Array2<F>> {
    Ok(a.solve_triangular(b, uplo)?)
}

/// Column-wise sum of squares, ie `diag(a^T.a)`
pub fn colsum_squares<F: Float>(a: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
    a.mapv(|v| v * v).sum_axis(Axis(0))
}

/// Sum of the log of the diagonal of a triangular factor, ie `0.5 * log det(L.L^T)`
pub fn log_diag_sum<F: Float>(l: &ArrayBase<impl Data<Elem = F>, Ix2>) -> F {
    l.diag().mapv(|v| v.ln()).sum()
}

fn diag_ratio<F: Float>(mat: &ArrayBase<impl Data<Elem = F>, Ix2>) -> f64 {
    let diag = mat.diag().to_owned();
    match (diag.max(), diag.min()) {
        (Ok(max), Ok(min)) => to_f64(*max) / to_f64(*min),
        _ => f64::NAN,
    }
}

/// Identity matrix helper
pub(crate) fn eye<F: Float>(n: usize) -> Array2<F> {
    Array::eye(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GpError;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_lower() {
        let a = array![[4., 2., 0.6], [2., 5., 1.], [0.6, 1., 3.]];
        let l = cholesky_lower(&a, GramBlock::InducingCovariance, 0.).unwrap();
        assert_abs_diff_eq!(l.dot(&l.t()), a, epsilon = 1e-12);
        assert_eq!(l[[0, 1]], 0.);
        assert_eq!(l[[0, 2]], 0.);
        assert_eq!(l[[1, 2]], 0.);
    }

    #[test]
    fn test_cholesky_not_positive_definite() {
        // duplicated inducing points without jitter
        let a = array![[1., 1.], [1., 1.]];
        match cholesky_lower(&a, GramBlock::InducingCovariance, 0.) {
            Err(GpError::NumericalError(NumericalError::NotPositiveDefinite {
                matrix, size, ..
            })) => {
                assert_eq!(matrix, GramBlock::InducingCovariance);
                assert_eq!(size, 2);
            }
            other => panic!("expected not positive definite error, got {other:?}"),
        }
        let aj = add_jitter(&a, 1e-6);
        assert!(cholesky_lower(&aj, GramBlock::InducingCovariance, 1e-6).is_ok());
    }

    #[test]
    fn test_cholesky_nan() {
        let a = array![[1., f64::NAN], [f64::NAN, 1.]];
        assert!(cholesky_lower(&a, GramBlock::VfeCorrection, 0.).is_err());
    }

    #[test]
    fn test_cholesky_correction_reports_no_jitter() {
        let b = array![[1., f64::NAN], [f64::NAN, 2.]];
        match cholesky_correction(&b, GramBlock::FitcCorrection) {
            Err(GpError::NumericalError(NumericalError::NotPositiveDefinite {
                matrix,
                jitter,
                size,
                ..
            })) => {
                assert_eq!(GramBlock::FitcCorrection, matrix);
                assert_eq!(0., jitter);
                assert_eq!(2, size);
            }
            other => panic!("expected not positive definite error, got {other:?}"),
        }
        let b = array![[2., 0.5], [0.5, 1.5]];
        let l = cholesky_correction(&b, GramBlock::VfeCorrection).unwrap();
        assert_abs_diff_eq!(l.dot(&l.t()), b, epsilon = 1e-12);
    }

    #[test]
    fn test_triangular_solve() {
        let a = array![[4., 2., 0.6], [2., 5., 1.], [0.6, 1., 3.]];
        let l = cholesky_lower(&a, GramBlock::InducingCovariance, 0.).unwrap();
        let b = array![[1., 2.], [3., 4.], [5., 6.]];

        let x = triangular_solve(&l, &b, UPLO::Lower).unwrap();
        assert_abs_diff_eq!(l.dot(&x), b, epsilon = 1e-12);

        let y = triangular_solve(&l.t(), &b, UPLO::Upper).unwrap();
        assert_abs_diff_eq!(l.t().dot(&y), b, epsilon = 1e-12);

        // both solves make a^-1.b
        let z = triangular_solve(&l.t(), &x, UPLO::Upper).unwrap();
        assert_abs_diff_eq!(a.dot(&z), b, epsilon = 1e-12);
    }

    #[test]
    fn test_helpers() {
        let a = array![[1., 2.], [3., 4.]];
        assert_eq!(colsum_squares(&a), array![10., 20.]);
        let l = array![[2., 0.], [1., 3.]];
        assert_abs_diff_eq!(log_diag_sum(&l), 6f64.ln(), epsilon = 1e-12);
        assert_eq!(add_jitter(&a, 0.5), array![[1.5, 2.], [3., 4.5]]);
    }
}
