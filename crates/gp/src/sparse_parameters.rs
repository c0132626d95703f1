use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::mean_models::{MeanFunction, ZeroMean};
use linfa::{Float, ParamGuard};
use ndarray::Array2;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default gaussian noise variance
pub const DEFAULT_NOISE_VARIANCE: f64 = 1e-2;
/// Default jitter added to the inducing points covariance diagonal before factorization
pub const DEFAULT_JITTER: f64 = 1e-6;

/// SGP inducing points specification
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum Inducings<F: Float> {
    /// `usize` points are selected randomly in the training dataset
    Randomized(usize),
    /// Points are given as a (npoints, nx) matrix
    Located(Array2<F>),
}
impl<F: Float> Default for Inducings<F> {
    fn default() -> Inducings<F> {
        Self::Randomized(10)
    }
}

/// SGP algorithm method specification
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum SparseMethod {
    #[default]
    /// Variational Free Energy method, ie Titsias variational lower bound (SGPR)
    Vfe,
    /// Fully Independent Training Conditional method
    Fitc,
}

/// Behaviour when the FITC approximation error `Kdiag - Qff` goes negative
/// beyond floating point noise
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum DegeneracyPolicy {
    #[default]
    /// Log a warning and go on
    Warn,
    /// Raise [`GpError::DegenerateApproximation`]
    Fail,
}

/// A set of validated SGP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize, M: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>, M: Deserialize<'de>"
    ))
)]
pub struct SgpValidParams<F: Float, K: Kernel<F>, M: MeanFunction<F>> {
    /// Covariance kernel
    pub(crate) kernel: K,
    /// Prior mean function
    pub(crate) mean: M,
    /// Gaussian homoscedastic noise variance shared by all outputs
    pub(crate) noise: F,
    /// Inducing points
    pub(crate) z: Inducings<F>,
    /// Method
    pub(crate) method: SparseMethod,
    /// Jitter added to Kuu diagonal
    pub(crate) jitter: F,
    /// FITC degeneracy handling
    pub(crate) degeneracy: DegeneracyPolicy,
    /// Random generator seed
    pub(crate) seed: Option<u64>,
}

impl<F: Float, K: Kernel<F> + Default, M: MeanFunction<F> + Default> Default
    for SgpValidParams<F, K, M>
{
    fn default() -> SgpValidParams<F, K, M> {
        SgpValidParams {
            kernel: K::default(),
            mean: M::default(),
            noise: F::cast(DEFAULT_NOISE_VARIANCE),
            z: Inducings::default(),
            method: SparseMethod::default(),
            jitter: F::cast(DEFAULT_JITTER),
            degeneracy: DegeneracyPolicy::default(),
            seed: None,
        }
    }
}

impl<F: Float, K: Kernel<F>, M: MeanFunction<F>> SgpValidParams<F, K, M> {
    /// Get covariance kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get prior mean function
    pub fn mean(&self) -> &M {
        &self.mean
    }

    /// Get used sparse method
    pub fn method(&self) -> SparseMethod {
        self.method
    }

    /// Get inducing points
    pub fn inducings(&self) -> &Inducings<F> {
        &self.z
    }

    /// Get noise variance
    pub fn noise_variance(&self) -> F {
        self.noise
    }

    /// Get jitter
    pub fn jitter(&self) -> F {
        self.jitter
    }

    /// Get FITC degeneracy policy
    pub fn degeneracy(&self) -> DegeneracyPolicy {
        self.degeneracy
    }

    /// Get seed
    pub fn seed(&self) -> Option<&u64> {
        self.seed.as_ref()
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [SGP algorithm](crate::SparseGaussianProcess).
///
/// Parameters are a frozen snapshot: fitting only binds them to the training data,
/// hyperparameters optimization is left to the caller.
pub struct SgpParams<F: Float, K: Kernel<F>, M: MeanFunction<F>>(SgpValidParams<F, K, M>);

impl<F: Float, K: Kernel<F>> SgpParams<F, K, ZeroMean> {
    /// A constructor for SGP parameters given a kernel and inducing points, with a zero mean
    pub fn new(kernel: K, inducings: Inducings<F>) -> SgpParams<F, K, ZeroMean> {
        Self::new_with_mean(kernel, ZeroMean(), inducings)
    }
}

impl<F: Float, K: Kernel<F>, M: MeanFunction<F>> SgpParams<F, K, M> {
    /// A constructor for SGP parameters given kernel, mean function and inducing points
    pub fn new_with_mean(kernel: K, mean: M, inducings: Inducings<F>) -> SgpParams<F, K, M> {
        Self(SgpValidParams {
            kernel,
            mean,
            noise: F::cast(DEFAULT_NOISE_VARIANCE),
            z: inducings,
            method: SparseMethod::default(),
            jitter: F::cast(DEFAULT_JITTER),
            degeneracy: DegeneracyPolicy::default(),
            seed: None,
        })
    }

    /// A constructor for SGP parameters from validated parameters
    pub fn new_from_valid(params: &SgpValidParams<F, K, M>) -> Self {
        Self(params.clone())
    }

    /// Set covariance kernel
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set prior mean function, possibly changing its type
    pub fn mean<NewM: MeanFunction<F>>(self, mean: NewM) -> SgpParams<F, K, NewM> {
        SgpParams(SgpValidParams {
            kernel: self.0.kernel,
            mean,
            noise: self.0.noise,
            z: self.0.z,
            method: self.0.method,
            jitter: self.0.jitter,
            degeneracy: self.0.degeneracy,
            seed: self.0.seed,
        })
    }

    /// Specify the sparse method
    pub fn sparse_method(mut self, method: SparseMethod) -> Self {
        self.0.method = method;
        self
    }

    /// Specify nz inducing points as (nz, x_dim) matrix.
    pub fn inducings(mut self, z: Array2<F>) -> Self {
        self.0.z = Inducings::Located(z);
        self
    }

    /// Specify nz number of inducing points which will be picked randomly in the input training dataset.
    pub fn n_inducings(mut self, nz: usize) -> Self {
        self.0.z = Inducings::Randomized(nz);
        self
    }

    /// Set gaussian noise variance
    pub fn noise_variance(mut self, noise: F) -> Self {
        self.0.noise = noise;
        self
    }

    /// Set jitter value.
    ///
    /// Jitter is added to the inducing points covariance diagonal to improve numerical stability
    pub fn jitter(mut self, jitter: F) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Set the handling of a degenerate FITC approximation
    pub fn degeneracy(mut self, policy: DegeneracyPolicy) -> Self {
        self.0.degeneracy = policy;
        self
    }

    /// Set random generator seed used to pick inducing points
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, K: Kernel<F>, M: MeanFunction<F>> From<SgpValidParams<F, K, M>>
    for SgpParams<F, K, M>
{
    fn from(valid: SgpValidParams<F, K, M>) -> Self {
        SgpParams(valid)
    }
}

impl<F: Float, K: Kernel<F>, M: MeanFunction<F>> ParamGuard for SgpParams<F, K, M> {
    type Checked = SgpValidParams<F, K, M>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let noise = self.0.noise;
        if !noise.is_finite() || noise <= F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "Noise variance should be positive, got {noise}"
            )));
        }
        let jitter = self.0.jitter;
        if !jitter.is_finite() || jitter < F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "Jitter should be positive or zero, got {jitter}"
            )));
        }
        match &self.0.z {
            Inducings::Randomized(0) => {
                return Err(GpError::InvalidValueError(
                    "Number of inducing points should be greater than 0".to_string(),
                ));
            }
            Inducings::Located(z) if z.is_empty() => {
                return Err(GpError::InvalidValueError(
                    "Inducing points should not be empty".to_string(),
                ));
            }
            _ => (),
        }
        self.0.kernel.check()?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
