//! Covariance kernels evaluated on point sets.
//!
//! Sparse engines only ever ask a kernel for cross covariance blocks `K(A, B)`
//! and for the diagonal `Kdiag(A)`, the latter never building the (n, n) matrix.

use crate::correlation_models::{
    AbsoluteExponentialCorr, CorrelationModel, Matern32Corr, Matern52Corr, SquaredExponentialCorr,
};
use crate::errors::{GpError, Result};
use crate::utils::differences;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for covariance kernels used by sparse GP engines
pub trait Kernel<F: Float>: Clone + fmt::Display + Sync {
    /// Covariance matrix between rows of `a` (na, nx) and rows of `b` (nb, nx)
    /// as a (na, nb) matrix
    fn k(
        &self,
        a: &ArrayBase<impl Data<Elem = F>, Ix2>,
        b: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F>;

    /// Variances `k(a_i, a_i)` as a (na,) vector
    fn k_diag(&self, a: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F>;

    /// Expected input dimension if the kernel is bound to one, `None` otherwise
    fn input_dim(&self) -> Option<usize>;

    /// Check hyperparameters values
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Stationary kernel `k(x, x') = variance * r(x - x'; theta)`
/// where `r` is a [correlation model](crate::correlation_models).
///
/// `theta` holds inverse length scales: either one value (isotropic kernel)
/// or one value per input dimension (anisotropic kernel).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct StationaryKernel<F: Float, Corr: CorrelationModel<F>> {
    corr: Corr,
    theta: Array1<F>,
    variance: F,
}

/// Squared exponential kernel, the usual RBF kernel
pub type SquaredExponentialKernel<F> = StationaryKernel<F, SquaredExponentialCorr>;
/// Absolute exponential kernel
pub type AbsoluteExponentialKernel<F> = StationaryKernel<F, AbsoluteExponentialCorr>;
/// Matern 3/2 kernel
pub type Matern32Kernel<F> = StationaryKernel<F, Matern32Corr>;
/// Matern 5/2 kernel
pub type Matern52Kernel<F> = StationaryKernel<F, Matern52Corr>;

impl<F: Float, Corr: CorrelationModel<F>> Default for StationaryKernel<F, Corr> {
    fn default() -> Self {
        Self {
            corr: Corr::default(),
            theta: Array1::from_elem(1, F::one()),
            variance: F::one(),
        }
    }
}

impl<F: Float, Corr: CorrelationModel<F>> StationaryKernel<F, Corr> {
    /// Constructor given correlation model, inverse length scales and variance
    pub fn new(corr: Corr, theta: Array1<F>, variance: F) -> Self {
        Self {
            corr,
            theta,
            variance,
        }
    }

    /// Isotropic kernel given a single length scale
    pub fn isotropic(lengthscale: F, variance: F) -> Self {
        Self::new(
            Corr::default(),
            Array1::from_elem(1, F::one() / lengthscale),
            variance,
        )
    }

    /// Correlation model
    pub fn corr(&self) -> &Corr {
        &self.corr
    }

    /// Inverse length scales
    pub fn theta(&self) -> &Array1<F> {
        &self.theta
    }

    /// Kernel variance, ie `k(x, x)`
    pub fn variance(&self) -> F {
        self.variance
    }

    fn theta_for(&self, nx: usize) -> Array1<F> {
        if self.theta.len() == 1 {
            Array1::from_elem(nx, self.theta[0])
        } else {
            self.theta.to_owned()
        }
    }
}

impl<F: Float, Corr: CorrelationModel<F>> Kernel<F> for StationaryKernel<F, Corr> {
    fn k(
        &self,
        a: &ArrayBase<impl Data<Elem = F>, Ix2>,
        b: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        let theta = self.theta_for(a.ncols());
        let b = b.view();
        let mut k = Array2::zeros((a.nrows(), b.nrows()));
        Zip::from(k.rows_mut())
            .and(a.rows())
            .par_for_each(|mut k_row, a_row| {
                let d = differences(&a_row, &b);
                let r = self.corr.value(&d, &theta).remove_axis(Axis(1));
                k_row.assign(&r.mapv(|v| v * self.variance));
            });
        k
    }

    fn k_diag(&self, a: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        Array1::from_elem(a.nrows(), self.variance)
    }

    fn input_dim(&self) -> Option<usize> {
        if self.theta.len() > 1 {
            Some(self.theta.len())
        } else {
            None
        }
    }

    fn check(&self) -> Result<()> {
        if self.theta.is_empty() {
            return Err(GpError::InvalidValueError(
                "Kernel theta should not be empty".to_string(),
            ));
        }
        if self.theta.iter().any(|t| !t.is_finite() || *t <= F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "Kernel theta components should be positive, got {}",
                self.theta
            )));
        }
        if !self.variance.is_finite() || self.variance <= F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "Kernel variance should be positive, got {}",
                self.variance
            )));
        }
        Ok(())
    }
}

impl<F: Float, Corr: CorrelationModel<F>> fmt::Display for StationaryKernel<F, Corr> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}(theta={}, variance={})",
            self.corr, self.theta, self.variance
        )
    }
}
