//! Fully Independent Training Conditional (FITC) engine.
//!
//! FITC replaces the training covariance by `Qff + diag(nu)` where
//! `nu = Kdiag - diag(Qff) + s2` is a per point effective noise. The evidence
//! and predictions are obtained with the Woodbury identity and the matrix
//! determinant lemma on this diagonal plus low-rank structure.
//!
//! # Reference
//!
//! Snelson, E. and Ghahramani, Z. [Sparse Gaussian Processes using Pseudo-inputs](https://papers.nips.cc/paper/2857-sparse-gaussian-processes-using-pseudo-inputs).
//! In: Advances in Neural Information Processing Systems 18, 2006

use crate::errors::{GpError, GramBlock, NumericalError, Result};
use crate::kernels::Kernel;
use crate::linalg::{
    add_jitter, cholesky_correction, cholesky_lower, colsum_squares, eye, log_diag_sum,
    triangular_solve, UPLO,
};
use crate::sparse_parameters::DegeneracyPolicy;
use crate::utils::to_f64;
use linfa::Float;
use log::warn;
use ndarray::{Array1, Array2, ArrayBase, ArrayD, Data, Ix2};
use ndarray_einsum_beta::*;

/// Common terms shared by FITC evidence and prediction
#[derive(Debug, Clone)]
pub struct FitcTerms<F: Float> {
    /// Residuals `Y - m(X)`, (N, R)
    err: Array2<F>,
    /// Effective noise `Kdiag - diag(Qff) + s2`, (N,)
    nu: Array1<F>,
    /// Lower Cholesky factor of `Kuu + jitter.I`, (M, M)
    luu: Array2<F>,
    /// Lower Cholesky factor of `B = I + V.diag(1/nu).V^T`, (M, M)
    l: Array2<F>,
    /// `V.beta`, (M, R)
    alpha: Array2<F>,
    /// `err / nu`, (N, R)
    beta: Array2<F>,
    /// `L^-1.alpha`, (M, R)
    gamma: Array2<F>,
}

impl<F: Float> FitcTerms<F> {
    /// Compute common terms given training inputs `x` (N, nx), residuals `err` (N, R)
    /// and inducing points `z` (M, nx).
    ///
    /// Training points where `Kdiag - diag(Qff)` is negative beyond rounding errors
    /// are handled according to `degeneracy`. Any non positive `nu` is an error.
    #[allow(clippy::too_many_arguments)]
    pub fn new<K: Kernel<F>>(
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        err: &ArrayBase<impl Data<Elem = F>, Ix2>,
        z: &ArrayBase<impl Data<Elem = F>, Ix2>,
        noise: F,
        jitter: F,
        degeneracy: DegeneracyPolicy,
    ) -> Result<Self> {
        let kuu = kernel.k(z, z);
        let kuf = kernel.k(z, x);
        let kdiag = kernel.k_diag(x);

        // Compute (lower) Cholesky decomposition: Kuu + jitter.I = Luu Luu^T
        let luu = cholesky_lower(
            &add_jitter(&kuu, jitter),
            GramBlock::InducingCovariance,
            jitter,
        )?;

        // Compute low-rank factor of Qff = V^T V
        let v = triangular_solve(&luu, &kuf, UPLO::Lower)?;

        // Compute diagonal correction: nu = Knn_diag - Qnn_diag + noise
        let approx_err = &kdiag - &colsum_squares(&v);
        check_degeneracy(&approx_err, &kdiag, degeneracy)?;
        let nu = approx_err.mapv(|e| e + noise);
        check_effective_noise(&nu, noise)?;
        let nu_inv = nu.mapv(|v| F::one() / v);

        // Compute (lower) Cholesky decomposition: B = I + V diag(1/nu) V^T = L L^T
        let v_nu = into_matrix(einsum("ij,j->ij", &[&v, &nu_inv]))?;
        let b = eye::<F>(z.nrows()) + v_nu.dot(&v.t());
        let l = cholesky_correction(&b, GramBlock::FitcCorrection)?;

        let beta = into_matrix(einsum("ij,i->ij", &[err, &nu_inv]))?;
        let alpha = v.dot(&beta);
        let gamma = triangular_solve(&l, &alpha, UPLO::Lower)?;

        Ok(FitcTerms {
            err: err.to_owned(),
            nu,
            luu,
            l,
            alpha,
            beta,
            gamma,
        })
    }

    /// Effective noise at training points
    pub fn effective_noise(&self) -> &Array1<F> {
        &self.nu
    }

    /// FITC log marginal likelihood
    pub fn evidence(&self) -> F {
        let half = F::cast(0.5);
        let n = F::cast(self.err.nrows());
        let r = F::cast(self.err.ncols());

        // Woodbury identity on (Qff + diag(nu))^-1
        let mahalanobis = -half * (&self.err * &self.beta).sum()
            + half * self.gamma.mapv(|v| v * v).sum();
        // Matrix determinant lemma on det(Qff + diag(nu)), for each output
        let log_normalizer = -half * n * F::cast(2. * std::f64::consts::PI).ln()
            - half * self.nu.mapv(|v| v.ln()).sum()
            - log_diag_sum(&self.l);

        mahalanobis + r * log_normalizer
    }

    fn projections<K: Kernel<F>>(
        &self,
        kernel: &K,
        z: &ArrayBase<impl Data<Elem = F>, Ix2>,
        xnew: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>, Array2<F>)> {
        let kus = kernel.k(z, xnew);
        let w = triangular_solve(&self.luu, &kus, UPLO::Lower)?;
        let tmp = triangular_solve(&self.l.t(), &self.gamma, UPLO::Upper)?;
        let mean = w.t().dot(&tmp);
        let intermediate_a = triangular_solve(&self.l, &w, UPLO::Lower)?;
        Ok((mean, w, intermediate_a))
    }

    /// Predict latent mean (S, R), without prior mean, and the shared
    /// posterior covariance (S, S) at `xnew` (S, nx).
    pub fn predict_full_cov<K: Kernel<F>>(
        &self,
        kernel: &K,
        z: &ArrayBase<impl Data<Elem = F>, Ix2>,
        xnew: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        let (mean, w, ia) = self.projections(kernel, z, xnew)?;
        let var = kernel.k(xnew, xnew) - w.t().dot(&w) + ia.t().dot(&ia);
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
        let (mean, w, ia) = self.projections(kernel, z, xnew)?;
        let var = kernel.k_diag(xnew) - colsum_squares(&w) + colsum_squares(&ia);
        Ok((mean, var))
    }

    /// `V.beta` where `V = Luu^-1.Kuf`
    pub fn alpha(&self) -> &Array2<F> {
        &self.alpha
    }
}

/// Flags training points whose approximation error `Kdiag - diag(Qff)` is
/// below `-100.eps.max(1, Kdiag)`
fn check_degeneracy<F: Float>(
    approx_err: &Array1<F>,
    kdiag: &Array1<F>,
    policy: DegeneracyPolicy,
) -> Result<()> {
    let tol = F::cast(100.) * F::epsilon();
    let (count, min_error) = approx_err
        .iter()
        .zip(kdiag.iter())
        .filter(|(e, k)| **e < -tol * F::one().max(**k))
        .fold((0, F::infinity()), |(count, min), (e, _)| {
            (count + 1, min.min(*e))
        });
    if count > 0 {
        let min_error = to_f64(min_error);
        match policy {
            DegeneracyPolicy::Warn => warn!(
                "FITC: {count} training points with Kdiag - Qff < 0 (min={min_error:e}), \
                 inducing points are likely poorly located"
            ),
            DegeneracyPolicy::Fail => {
                return Err(GpError::DegenerateApproximation { count, min_error })
            }
        }
    }
    Ok(())
}

/// Fails on the first effective noise value which is not strictly positive (NaN included)
fn check_effective_noise<F: Float>(nu: &Array1<F>, noise: F) -> Result<()> {
    match nu
        .iter()
        .enumerate()
        .find(|(_, v)| v.is_nan() || **v <= F::zero())
    {
        Some((index, value)) => Err(NumericalError::NonPositiveEffectiveNoise {
            index,
            value: to_f64(*value),
            noise_variance: to_f64(noise),
        }
        .into()),
        None => Ok(()),
    }
}

fn into_matrix<F: Float, E: ToString>(
    res: std::result::Result<ArrayD<F>, E>,
) -> Result<Array2<F>> {
    res.map_err(|e| GpError::ShapeMismatch(e.to_string()))?
        .into_dimensionality::<Ix2>()
        .map_err(|e| GpError::ShapeMismatch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{Matern52Kernel, SquaredExponentialKernel};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, concatenate, s, Array, Axis};

    fn data() -> (Array2<f64>, Array2<f64>) {
        let x = Array::linspace(0., 4., 15).insert_axis(Axis(1));
        let y = x.mapv(|v: f64| (2. * v).cos());
        (x, y)
    }

    /// Dense FITC log likelihood log N(y | 0, Qff + diag(nu))
    fn dense_fitc<K: Kernel<f64>>(
        kernel: &K,
        x: &Array2<f64>,
        y: &Array2<f64>,
        z: &Array2<f64>,
        noise: f64,
        jitter: f64,
    ) -> f64 {
        let kuu = add_jitter(&kernel.k(z, z), jitter);
        let kuf = kernel.k(z, x);
        let luu = cholesky_lower(&kuu, GramBlock::InducingCovariance, jitter).unwrap();
        let v = triangular_solve(&luu, &kuf, UPLO::Lower).unwrap();
        let mut cov = v.t().dot(&v);
        cov.diag_mut()
            .assign(&kernel.k_diag(x).mapv(|k| k + noise));
        let l = cholesky_lower(&cov, GramBlock::InducingCovariance, 0.).unwrap();
        let alpha = triangular_solve(&l, y, UPLO::Lower).unwrap();
        let n = x.nrows() as f64;
        -0.5 * alpha.mapv(|v| v * v).sum()
            - log_diag_sum(&l)
            - 0.5 * n * (2. * std::f64::consts::PI).ln()
    }

    #[test]
    fn test_fitc_evidence_against_dense() {
        let (x, y) = data();
        let z = array![[0.2], [1.5], [2.4], [3.8]];
        let kernel = Matern52Kernel::isotropic(0.7, 1.3);
        let terms =
            FitcTerms::new(&kernel, &x, &y, &z, 0.05, 1e-6, DegeneracyPolicy::Fail).unwrap();
        let expected = dense_fitc(&kernel, &x, &y, &z, 0.05, 1e-6);
        assert_abs_diff_eq!(terms.evidence(), expected, epsilon = 1e-8);
    }

    #[test]
    fn test_fitc_evidence_multiple_outputs() {
        let (x, y) = data();
        let y_shifted = y.mapv(|v| 2. * v - 1.);
        let y2 = concatenate(Axis(1), &[y.view(), y_shifted.view()]).unwrap();
        let z = array![[0.5], [2.], [3.5]];
        let kernel = SquaredExponentialKernel::isotropic(0.8, 1.);
        let terms =
            FitcTerms::new(&kernel, &x, &y2, &z, 0.1, 1e-6, DegeneracyPolicy::Warn).unwrap();
        let expected = dense_fitc(&kernel, &x, &y, &z, 0.1, 1e-6)
            + dense_fitc(&kernel, &x, &y_shifted, &z, 0.1, 1e-6);
        assert_abs_diff_eq!(terms.evidence(), expected, epsilon = 1e-8);
        assert_eq!((3, 2), terms.alpha().dim());
    }

    #[test]
    fn test_fitc_predict_consistency() {
        let (x, y) = data();
        let z = array![[0.5], [2.], [3.5]];
        let kernel = SquaredExponentialKernel::isotropic(0.8, 2.);
        let terms =
            FitcTerms::new(&kernel, &x, &y, &z, 0.05, 1e-6, DegeneracyPolicy::Warn).unwrap();
        let xnew = array![[0.], [1.1], [2.7], [5.]];
        let (m1, full) = terms.predict_full_cov(&kernel, &z, &xnew).unwrap();
        let (m2, diag) = terms.predict_diag(&kernel, &z, &xnew).unwrap();
        assert_abs_diff_eq!(m1, m2, epsilon = 1e-12);
        assert_abs_diff_eq!(full.diag(), diag, epsilon = 1e-10);
        assert!(diag.iter().all(|v| *v > 0.));
    }

    #[test]
    fn test_fitc_effective_noise() {
        let (x, y) = data();
        // inducing points at training inputs: no approximation error there
        let z = x.slice(s![..;7, ..]).to_owned();
        let kernel = SquaredExponentialKernel::isotropic(1., 1.);
        let terms =
            FitcTerms::new(&kernel, &x, &y, &z, 0.01, 1e-8, DegeneracyPolicy::Fail).unwrap();
        let nu = terms.effective_noise();
        assert!(nu.iter().all(|v| *v >= 0.01 - 1e-6));
        assert_abs_diff_eq!(nu[0], 0.01, epsilon = 1e-6);
        assert_abs_diff_eq!(nu[7], 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_check_effective_noise() {
        assert!(check_effective_noise(&array![0.1, 1e-300, 2.], 0.1).is_ok());
        match check_effective_noise(&array![0.1, 0.2, 0., f64::NAN], 0.1) {
            Err(GpError::NumericalError(NumericalError::NonPositiveEffectiveNoise {
                index,
                value,
                noise_variance,
            })) => {
                assert_eq!(2, index);
                assert_eq!(0., value);
                assert_eq!(0.1, noise_variance);
            }
            other => panic!("expected non positive effective noise, got {other:?}"),
        }
        match check_effective_noise(&array![0.1, f64::NAN, -1.], 0.1) {
            Err(GpError::NumericalError(NumericalError::NonPositiveEffectiveNoise {
                index,
                value,
                ..
            })) => {
                assert_eq!(1, index);
                assert!(value.is_nan());
            }
            other => panic!("expected non positive effective noise, got {other:?}"),
        }
    }

    #[test]
    fn test_fitc_nan_effective_noise() {
        let (mut x, y) = data();
        x[[4, 0]] = f64::NAN;
        let z = array![[0.5], [2.], [3.5]];
        let kernel = SquaredExponentialKernel::isotropic(0.8, 1.);
        match FitcTerms::new(&kernel, &x, &y, &z, 0.1, 1e-6, DegeneracyPolicy::Fail) {
            Err(GpError::NumericalError(NumericalError::NonPositiveEffectiveNoise {
                index,
                value,
                ..
            })) => {
                assert_eq!(4, index);
                assert!(value.is_nan());
            }
            other => panic!("expected non positive effective noise, got {other:?}"),
        }
    }

    #[test]
    fn test_check_degeneracy() {
        let kdiag = array![1., 1., 1.];
        let approx_err = array![0.5, -1e-16, -1e-3];
        assert!(check_degeneracy(&approx_err, &kdiag, DegeneracyPolicy::Warn).is_ok());
        match check_degeneracy(&approx_err, &kdiag, DegeneracyPolicy::Fail) {
            Err(GpError::DegenerateApproximation { count, min_error }) => {
                assert_eq!(1, count);
                assert_abs_diff_eq!(-1e-3, min_error);
            }
            other => panic!("expected degenerate approximation, got {other:?}"),
        }
        let approx_err = array![0., -1e-16];
        assert!(check_degeneracy(&approx_err, &array![1., 1.], DegeneracyPolicy::Fail).is_ok());
    }
}
