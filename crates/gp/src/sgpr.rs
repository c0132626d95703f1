//! Variational Free Energy (VFE) engine, ie the Titsias collapsed lower bound
//! on the log marginal likelihood and its predictive distribution.
//!
//! With `Qff = Kfu.Kuu^-1.Kuf`, the bound reads
//!
//! ```text
//! log N(err | 0, Qff + s2.I) - 1/(2.s2) tr(Kff - Qff)
//! ```
//!
//! and is computed through two Cholesky factorizations of (M, M) matrices only.
//!
//! # Reference
//!
//! Titsias, M. [Variational Learning of Inducing Variables in Sparse Gaussian Processes](https://proceedings.mlr.press/v5/titsias09a.html).
//! In: Proceedings of the Twelfth International Conference on Artificial Intelligence and Statistics, PMLR 5:567-574, 2009

use crate::errors::{GramBlock, Result};
use crate::kernels::Kernel;
use crate::linalg::{
    add_jitter, cholesky_correction, cholesky_lower, colsum_squares, eye, log_diag_sum,
    triangular_solve, UPLO,
};
use crate::utils::sum_squares;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};

/// Intermediate terms of the variational bound, also used for prediction
#[derive(Debug, Clone)]
pub struct SgprTerms<F: Float> {
    /// Lower Cholesky factor of `Kuu + jitter.I`, (M, M)
    l: Array2<F>,
    /// `L^-1.Kuf / s`, (M, N)
    a: Array2<F>,
    /// Lower Cholesky factor of `B = A.A^T + I`, (M, M)
    lb: Array2<F>,
    /// `LB^-1.A.err / s`, (M, R)
    c: Array2<F>,
}

impl<F: Float> SgprTerms<F> {
    /// Compute bound terms given training inputs `x` (N, nx), residuals `err` (N, R)
    /// and inducing points `z` (M, nx).
    pub fn new<K: Kernel<F>>(
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        err: &ArrayBase<impl Data<Elem = F>, Ix2>,
        z: &ArrayBase<impl Data<Elem = F>, Ix2>,
        noise: F,
        jitter: F,
    ) -> Result<Self> {
        let kuu = kernel.k(z, z);
        let kuf = kernel.k(z, x);

        // Compute (lower) Cholesky decomposition: Kuu + jitter.I = L L^T
        let l = cholesky_lower(
            &add_jitter(&kuu, jitter),
            GramBlock::InducingCovariance,
            jitter,
        )?;

        // Noise scaling is folded into the low-rank factor: A = L^-1.Kuf / s
        let sigma = noise.sqrt();
        let a = triangular_solve(&l, &kuf, UPLO::Lower)?.mapv(|v| v / sigma);

        // Compute (lower) Cholesky decomposition: B = A A^T + I = LB LB^T
        let b = a.dot(&a.t()) + eye::<F>(z.nrows());
        let lb = cholesky_correction(&b, GramBlock::VfeCorrection)?;

        let c = triangular_solve(&lb, &a.dot(err), UPLO::Lower)?.mapv(|v| v / sigma);

        Ok(SgprTerms { l, a, lb, c })
    }

    /// Variational lower bound given the residuals `err` and the kernel diagonal
    /// `kdiag` at training inputs, both used to compute the terms.
    pub fn evidence(
        &self,
        err: &ArrayBase<impl Data<Elem = F>, Ix2>,
        kdiag: &Array1<F>,
        noise: F,
    ) -> F {
        let half = F::cast(0.5);
        let n = F::cast(err.nrows());
        let r = F::cast(err.ncols());

        let term0 = -half * n * r * F::cast(2. * std::f64::consts::PI).ln();
        let term1 = -r * log_diag_sum(&self.lb);
        let term2 = -half * n * r * noise.ln();
        let term3 = -half * sum_squares(err) / noise;
        let term4 = half * sum_squares(&self.c);
        // trace terms penalize poor coverage of the data by inducing points:
        // -R/2 * tr(Kff - Qff) / s2, with tr(A.A^T) = sum(A^2)
        let term5 = -half * r * kdiag.sum() / noise;
        let term6 = half * r * sum_squares(&self.a);

        term0 + term1 + term2 + term3 + term4 + term5 + term6
    }

    fn projections<K: Kernel<F>>(
        &self,
        kernel: &K,
        z: &ArrayBase<impl Data<Elem = F>, Ix2>,
        xnew: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>, Array2<F>)> {
        let kus = kernel.k(z, xnew);
        let tmp1 = triangular_solve(&self.l, &kus, UPLO::Lower)?;
        let tmp2 = triangular_solve(&self.lb, &tmp1, UPLO::Lower)?;
        let mean = tmp2.t().dot(&self.c);
        Ok((mean, tmp1, tmp2))
    }

    /// Predict latent mean (S, R), without prior mean, and the shared
    /// posterior covariance (S, S) at `xnew` (S, nx).
    pub fn predict_full_cov<K: Kernel<F>>(
        &self,
        kernel: &K,
        z: &ArrayBase<impl Data<Elem = F>, Ix2>,
        xnew: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        let (mean, tmp1, tmp2) = self.projections(kernel, z, xnew)?;
        let var = kernel.k(xnew, xnew) + tmp2.t().dot(&tmp2) - tmp1.t().dot(&tmp1);
        Ok((mean, var))
    }

    /// Predict latent mean (S, R), without prior mean, and the shared
    /// posterior variances (S,) at `xnew` (S, nx).
    pub fn predict_diag<K: Kernel<F>>(
        &self,
        kernel: &K,
        z: &ArrayBase<impl Data<Elem = F>, Ix2>,
        xnew: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array1<F>)> {
        let (mean, tmp1, tmp2) = self.projections(kernel, z, xnew)?;
        let var = kernel.k_diag(xnew) + colsum_squares(&tmp2) - colsum_squares(&tmp1);
        Ok((mean, var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{GpError, NumericalError};
    use crate::kernels::SquaredExponentialKernel;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Axis};

    fn data() -> (Array2<f64>, Array2<f64>) {
        let x = Array::linspace(0., 4., 12).insert_axis(Axis(1));
        let y = x.mapv(|v: f64| v.sin() + 0.1 * v);
        (x, y)
    }

    #[test]
    fn test_sgpr_exact_with_all_points() {
        // Z = X: Qff = Kff up to jitter, the bound is the exact log likelihood
        let x = Array::linspace(0., 4., 8).insert_axis(Axis(1));
        let y = x.mapv(|v: f64| v.sin());
        let kernel = SquaredExponentialKernel::isotropic(0.3, 1.);
        let noise = 0.1;
        let terms = SgprTerms::new(&kernel, &x, &y, &x, noise, 1e-10).unwrap();
        let bound = terms.evidence(&y, &kernel.k_diag(&x), noise);

        let kff = kernel.k(&x, &x) + Array2::<f64>::eye(x.nrows()) * noise;
        let l = cholesky_lower(&kff, GramBlock::InducingCovariance, 0.).unwrap();
        let alpha = triangular_solve(&l, &y, UPLO::Lower).unwrap();
        let exact = -0.5 * alpha.mapv(|v| v * v).sum()
            - log_diag_sum(&l)
            - 0.5 * x.nrows() as f64 * (2. * std::f64::consts::PI).ln();
        assert_abs_diff_eq!(bound, exact, epsilon = 1e-5);
    }

    #[test]
    fn test_sgpr_predict_consistency() {
        let (x, y) = data();
        let z = array![[0.5], [2.], [3.5]];
        let kernel = SquaredExponentialKernel::isotropic(0.8, 2.);
        let terms = SgprTerms::new(&kernel, &x, &y, &z, 0.05, 1e-6).unwrap();
        let xnew = array![[0.], [1.1], [2.7], [5.]];
        let (m1, full) = terms.predict_full_cov(&kernel, &z, &xnew).unwrap();
        let (m2, diag) = terms.predict_diag(&kernel, &z, &xnew).unwrap();
        assert_abs_diff_eq!(m1, m2, epsilon = 1e-12);
        assert_abs_diff_eq!(full.diag(), diag, epsilon = 1e-10);
        assert_abs_diff_eq!(full, full.t(), epsilon = 1e-10);
        assert_eq!((4, 1), m1.dim());
    }

    #[test]
    fn test_sgpr_duplicated_inducings() {
        let (x, y) = data();
        let z = array![[1.], [1.]];
        let kernel = SquaredExponentialKernel::isotropic(1., 1.);
        match SgprTerms::new(&kernel, &x, &y, &z, 0.1, 0.) {
            Err(GpError::NumericalError(NumericalError::NotPositiveDefinite {
                matrix, ..
            })) => assert_eq!(GramBlock::InducingCovariance, matrix),
            other => panic!("expected Kuu factorization failure, got {other:?}"),
        }
        assert!(SgprTerms::new(&kernel, &x, &y, &z, 0.1, 1e-6).is_ok());
    }

    #[test]
    fn test_sgpr_correction_failure_has_no_jitter() {
        let (mut x, y) = data();
        x[[3, 0]] = f64::NAN;
        let z = array![[0.5], [2.], [3.5]];
        let kernel = SquaredExponentialKernel::isotropic(1., 1.);
        match SgprTerms::new(&kernel, &x, &y, &z, 0.1, 1e-6) {
            Err(GpError::NumericalError(NumericalError::NotPositiveDefinite {
                matrix,
                jitter,
                ..
            })) => {
                assert_eq!(GramBlock::VfeCorrection, matrix);
                assert_eq!(0., jitter);
            }
            other => panic!("expected B factorization failure, got {other:?}"),
        }
    }
}
