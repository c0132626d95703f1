use crate::errors::{GpError, Result};
use crate::fitc::FitcTerms;
use crate::kernels::{Kernel, SquaredExponentialKernel};
use crate::mean_models::{MeanFunction, ZeroMean};
use crate::sgpr::SgprTerms;
use crate::sparse_parameters::{Inducings, SgpParams, SgpValidParams, SparseMethod};
use crate::utils::{broadcast_outputs, tile_columns, to_f64};
use finitediff::FiniteDiff;
use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::eigh::EighInto;
use ndarray::{Array, Array1, Array2, Array3, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

use log::debug;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::time::Instant;

/// Posterior variance returned by [`SparseGaussianProcess::predict`]
#[derive(Debug, Clone, PartialEq)]
pub enum PosteriorVariance<F: Float> {
    /// Full posterior covariance as a (S, S, R) array, the (S, S) covariance
    /// being shared by the R outputs
    Full(Array3<F>),
    /// Posterior variances as a (S, R) matrix
    Diagonal(Array2<F>),
}

/// Engine terms computed from the current training data and parameters
enum SparseTerms<F: Float> {
    Vfe(SgprTerms<F>),
    Fitc(FitcTerms<F>),
}

impl<F: Float> SparseTerms<F> {
    fn predict_full_cov<K: Kernel<F>>(
        &self,
        kernel: &K,
        z: &Array2<F>,
        xnew: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        match self {
            SparseTerms::Vfe(terms) => terms.predict_full_cov(kernel, z, xnew),
            SparseTerms::Fitc(terms) => terms.predict_full_cov(kernel, z, xnew),
        }
    }

    fn predict_diag<K: Kernel<F>>(
        &self,
        kernel: &K,
        z: &Array2<F>,
        xnew: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array1<F>)> {
        match self {
            SparseTerms::Vfe(terms) => terms.predict_diag(kernel, z, xnew),
            SparseTerms::Fitc(terms) => terms.predict_diag(kernel, z, xnew),
        }
    }
}

/// Sparse gaussian process considers a set of `M` inducing points either to approximate the posterior Gaussian distribution
/// with a low-rank representation (FITC - Fully Independent Training Conditional method), or to approximate the posterior
/// distribution directly (VFE - Variational Free Energy method, ie Titsias variational lower bound).
///
/// These methods enable accurate modeling with large training datasets of N points while preserving
/// computational efficiency. With `M < N`, we get `O(NM^2)` complexity instead of `O(N^3)`
/// in time processing and `O(NM)` instead of `O(N^2)` in memory space.
///
/// # Implementation
///
/// [`SparseGaussianProcess`] binds training data `(X, Y)` with `Y` as a (N, R) matrix to a frozen
/// snapshot of parameters: kernel, prior mean, noise variance and inducing points. The R outputs are modeled
/// as independent replicates sharing the kernel and the noise variance.
///
/// Nothing is cached: [`SparseGaussianProcess::evidence`] and predictions recompute every
/// intermediate term from the parameters, so that any evaluation can be rerun independently.
///
/// Inducing points definition can be either random or provided by the user through
/// the [`Inducings`] specification. The used sparse method is specified with the [`SparseMethod`].
/// When targetting a squared exponential kernel with zero mean, one can use the [SparseKriging] shortcut.
///
/// # Features
///
/// ## serializable
///
/// The `serializable` feature enables the serialization of SGP models using the [`serde crate`](https://serde.rs/).
///
/// ## persistent
///
/// The `persistent` feature enables `save()`/`load()` methods for a SGP model to/from a json file.
///
/// # Example
///
/// ```
/// use ndarray::{Array, Array1, Array2, Axis};
/// use ndarray_rand::rand;
/// use ndarray_rand::rand::SeedableRng;
/// use ndarray_rand::RandomExt;
/// use ndarray_rand::rand_distr::{Normal, Uniform};
/// use linfa::prelude::{Dataset, Fit};
///
/// use sparse_gp::{SparseKriging, Inducings, SparseMethod};
///
/// const PI: f64 = std::f64::consts::PI;
///
/// // Let us define a hidden target function for our sparse GP example
/// fn f_obj(x: &Array1<f64>) -> Array1<f64> {
///     x.mapv(|v| (3. * PI * v).sin() + 0.3 * (9. * PI * v).cos() + 0.5 * (7. * PI * v).sin())
/// }
///
/// // Then we can define a utility function to generate some noisy data
/// // nt points with a gaussian noise with a variance eta2.
/// fn make_test_data(
///     nt: usize,
///     eta2: f64,
/// ) -> (Array2<f64>, Array1<f64>) {
///     let normal = Normal::new(0., eta2.sqrt()).unwrap();
///     let mut rng = rand::thread_rng();
///     let gaussian_noise = Array::<f64, _>::random_using((nt, ), normal, &mut rng);
///     let xt = 2. * Array::<f64, _>::random_using((nt, ), Uniform::new(0., 1.), &mut rng) - 1.;
///     let yt = f_obj(&xt) + gaussian_noise;
///     (xt.insert_axis(Axis(1)), yt)
/// }
///
/// // Generate training data
/// let nt = 200;
/// // Variance of the gaussian noise on our training data
/// let eta2: f64 = 0.01;
/// let (xt, yt) = make_test_data(nt, eta2);
///
/// // Bind our sparse gaussian process to the data with n inducing points taken in the dataset
/// let n_inducings = 30;
/// let sgp = SparseKriging::params(Inducings::Randomized(n_inducings))
///     .sparse_method(SparseMethod::Fitc)
///     .noise_variance(eta2)
///     .fit(&Dataset::new(xt, yt))
///     .expect("SGP fitted");
///
/// println!("evidence={}", sgp.evidence().expect("evidence"));
///
/// // Predict with our SGP
/// let xplot = Array::linspace(-1., 1., 100).insert_axis(Axis(1));
/// let (sgp_vals, sgp_vars) = sgp.predict_diag(&xplot).expect("predictions");
/// ```
///
/// # Reference
///
/// Matthias Bauer, Mark van der Wilk, and Carl Edward Rasmussen.
/// [Understanding Probabilistic Sparse Gaussian Process Approximations](https://arxiv.org/pdf/1606.04820.pdf).
/// In: Advances in Neural Information Processing Systems. Ed. by D. Lee et al. Vol. 29. Curran Associates, Inc., 2016
///
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize, M: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>, M: Deserialize<'de>"
    ))
)]
pub struct SparseGaussianProcess<F: Float, K: Kernel<F>, M: MeanFunction<F>> {
    /// Inducing points (M, nx)
    inducings: Array2<F>,
    /// Training data (input (N, nx), output (N, R))
    pub(crate) training_data: (Array2<F>, Array2<F>),
    /// Parameters used to fit this model
    pub(crate) params: SgpValidParams<F, K, M>,
}

/// Kriging as sparse GP special case when using squared exponential kernel and zero mean
pub type SparseKriging<F> = SgpParams<F, SquaredExponentialKernel<F>, ZeroMean>;

impl<F: Float> SparseKriging<F> {
    /// A constructor for SparseKriging parameters with a unit squared exponential kernel
    pub fn params(inducings: Inducings<F>) -> SgpParams<F, SquaredExponentialKernel<F>, ZeroMean> {
        SgpParams::new(SquaredExponentialKernel::default(), inducings)
    }
}

impl<F: Float, K: Kernel<F>, M: MeanFunction<F>> fmt::Display for SparseGaussianProcess<F, K, M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SGP(kernel={}, mean={}, method={:?}, inducings={}, noise variance={})",
            self.params.kernel,
            self.params.mean,
            self.params.method,
            self.inducings.nrows(),
            self.params.noise
        )
    }
}

impl<F: Float, K: Kernel<F>> SparseGaussianProcess<F, K, ZeroMean> {
    /// Sgp parameters contructor
    pub fn params(kernel: K, inducings: Inducings<F>) -> SgpParams<F, K, ZeroMean> {
        SgpParams::new(kernel, inducings)
    }
}

impl<F: Float, K: Kernel<F>, M: MeanFunction<F>> SparseGaussianProcess<F, K, M> {
    /// Compute evidence of the training data: the variational lower bound of
    /// the log marginal likelihood with VFE method, the approximated log marginal
    /// likelihood with FITC method.
    pub fn evidence(&self) -> Result<F> {
        let now = Instant::now();
        let (xt, _) = &self.training_data;
        let err = self.residuals()?;
        let evidence = match self.sparse_terms(&err)? {
            SparseTerms::Vfe(terms) => {
                terms.evidence(&err, &self.params.kernel.k_diag(xt), self.params.noise)
            }
            SparseTerms::Fitc(terms) => terms.evidence(),
        };
        debug!(
            "{:?} evidence={} (N={}, M={}, R={}) in {}ms",
            self.params.method,
            evidence,
            xt.nrows(),
            self.inducings.nrows(),
            err.ncols(),
            now.elapsed().as_millis()
        );
        Ok(evidence)
    }

    /// Predict posterior mean and variance at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns mean as a (n, R) matrix and either the full (n, n, R) covariance when `full_cov` is true
    /// or (n, R) variances otherwise.
    ///
    /// Variances are not clamped: values down to `-1e-10.max(1, k(x, x))` are expected
    /// rounding artifacts where the posterior variance vanishes.
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        full_cov: bool,
    ) -> Result<(Array2<F>, PosteriorVariance<F>)> {
        if full_cov {
            let (mean, cov) = self.predict_full_cov(x)?;
            Ok((mean, PosteriorVariance::Full(cov)))
        } else {
            let (mean, var) = self.predict_diag(x)?;
            Ok((mean, PosteriorVariance::Diagonal(var)))
        }
    }

    /// Predict posterior mean (n, R) and variances (n, R) at n given `x` points specified as a (n, nx) matrix.
    pub fn predict_diag(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        let (mean, var) = self.latent_diag(x)?;
        Ok((mean, tile_columns(&var, self.n_outputs())))
    }

    /// Predict posterior mean (n, R) and full covariance (n, n, R) at n given `x` points specified as a (n, nx) matrix.
    pub fn predict_full_cov(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array3<F>)> {
        let (mean, cov) = self.latent_full_cov(x)?;
        let cov = Array3::from_shape_fn((x.nrows(), x.nrows(), self.n_outputs()), |(i, j, _)| {
            cov[[i, j]]
        });
        Ok((mean, cov))
    }

    /// Predict posterior mean values at n given `x` points specified as a (n, nx) matrix.
    /// Returns (n, R) matrix.
    pub fn predict_mean(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        Ok(self.latent_diag(x)?.0)
    }

    /// Predict posterior variance values, shared by all outputs, at n given `x` points
    /// specified as a (n, nx) matrix. Returns n variance values as (n,) vector clamped at zero.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let (_, var) = self.latent_diag(x)?;
        Ok(var.mapv(|v| v.max(F::zero())))
    }

    /// Predict gradients of the first output mean at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n gradient vectors as a (n, nx) matrix.
    pub fn predict_gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        self.check_input(x)?;
        let err = self.residuals()?;
        let terms = self.sparse_terms(&err)?;
        central_diff_rows(x, |xi| {
            let (mean, _) = terms.predict_diag(&self.params.kernel, &self.inducings, xi)?;
            let prior = self.prior_mean(xi)?;
            Ok(mean[[0, 0]] + prior[[0, 0]])
        })
    }

    /// Predict gradients of the variance at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n gradient vectors as a (n, nx) matrix.
    pub fn predict_var_gradients(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        self.check_input(x)?;
        let err = self.residuals()?;
        let terms = self.sparse_terms(&err)?;
        central_diff_rows(x, |xi| {
            let (_, var) = terms.predict_diag(&self.params.kernel, &self.inducings, xi)?;
            Ok(var[0])
        })
    }

    /// Sample the posterior of the first output for `n_traj` trajectories at n given `x` points
    /// using eigenvalues decomposition of the posterior covariance.
    /// Returns a (n, n_traj) matrix.
    ///
    /// Random generation is seeded with the parameters `seed` if any.
    pub fn sample(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>, n_traj: usize) -> Result<Array2<F>> {
        let (mean, cov) = self.latent_full_cov(x)?;
        let mean = mean.column(0).to_owned().insert_axis(Axis(1));
        let mut rng = match self.params.seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };
        sample(mean, cov, n_traj, &mut rng)
    }

    /// Inducing points
    pub fn inducings(&self) -> &Array2<F> {
        &self.inducings
    }

    /// Gaussian noise variance
    pub fn noise_variance(&self) -> F {
        self.params.noise
    }

    /// Covariance kernel
    pub fn kernel(&self) -> &K {
        &self.params.kernel
    }

    /// Prior mean function
    pub fn mean(&self) -> &M {
        &self.params.mean
    }

    /// Sparse method
    pub fn method(&self) -> SparseMethod {
        self.params.method
    }

    /// Jitter added to the inducing points covariance
    pub fn jitter(&self) -> F {
        self.params.jitter
    }

    /// Retrieve input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.training_data.0.ncols(), self.training_data.1.ncols())
    }

    /// Training data (input (N, nx), output (N, R))
    pub fn training_data(&self) -> &(Array2<F>, Array2<F>) {
        &self.training_data
    }

    /// Parameters used to fit this model
    pub fn params_used(&self) -> &SgpValidParams<F, K, M> {
        &self.params
    }

    fn n_outputs(&self) -> usize {
        self.training_data.1.ncols()
    }

    fn check_input(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        let nx = self.training_data.0.ncols();
        if x.ncols() != nx {
            return Err(GpError::ShapeMismatch(format!(
                "Prediction points should have {} components, got {}",
                nx,
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Prior mean at `x` broadcast over the R outputs as a (n, R) matrix
    fn prior_mean(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        let mean = self.params.mean.value(x);
        let p = mean.ncols();
        broadcast_outputs(mean, self.n_outputs()).ok_or_else(|| {
            GpError::ShapeMismatch(format!(
                "Mean function gives {} columns, expected 1 or {}",
                p,
                self.n_outputs()
            ))
        })
    }

    /// Residuals `Y - m(X)` at training points
    fn residuals(&self) -> Result<Array2<F>> {
        let (xt, yt) = &self.training_data;
        Ok(yt - &self.prior_mean(xt)?)
    }

    fn sparse_terms(&self, err: &Array2<F>) -> Result<SparseTerms<F>> {
        let (xt, _) = &self.training_data;
        let params = &self.params;
        let terms = match params.method {
            SparseMethod::Vfe => SparseTerms::Vfe(SgprTerms::new(
                &params.kernel,
                xt,
                err,
                &self.inducings,
                params.noise,
                params.jitter,
            )?),
            SparseMethod::Fitc => SparseTerms::Fitc(FitcTerms::new(
                &params.kernel,
                xt,
                err,
                &self.inducings,
                params.noise,
                params.jitter,
                params.degeneracy,
            )?),
        };
        Ok(terms)
    }

    fn latent_diag(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array1<F>)> {
        self.check_input(x)?;
        let now = Instant::now();
        let err = self.residuals()?;
        let (mean, var) =
            self.sparse_terms(&err)?
                .predict_diag(&self.params.kernel, &self.inducings, x)?;
        debug!(
            "{:?} predictions at {} points in {}ms",
            self.params.method,
            x.nrows(),
            now.elapsed().as_millis()
        );
        Ok((mean + self.prior_mean(x)?, var))
    }

    fn latent_full_cov(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.check_input(x)?;
        let now = Instant::now();
        let err = self.residuals()?;
        let (mean, cov) =
            self.sparse_terms(&err)?
                .predict_full_cov(&self.params.kernel, &self.inducings, x)?;
        debug!(
            "{:?} full covariance predictions at {} points in {}ms",
            self.params.method,
            x.nrows(),
            now.elapsed().as_millis()
        );
        Ok((mean + self.prior_mean(x)?, cov))
    }
}

#[cfg(feature = "persistent")]
impl<F, K, M> SparseGaussianProcess<F, K, M>
where
    F: Float + Serialize + for<'de> Deserialize<'de>,
    K: Kernel<F> + Serialize + for<'de> Deserialize<'de>,
    M: MeanFunction<F> + Serialize + for<'de> Deserialize<'de>,
{
    /// Save SGP model in given file as json.
    pub fn save(&self, path: &str) -> Result<()> {
        use std::io::Write;

        let mut file = std::fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load SGP model from given json file.
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data).map_err(|err| GpError::LoadError(err.to_string()))
    }
}

impl<F, D, K, M> PredictInplace<ArrayBase<D, Ix2>, Array2<F>> for SparseGaussianProcess<F, K, M>
where
    F: Float,
    D: Data<Elem = F>,
    K: Kernel<F>,
    M: MeanFunction<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array2<F>) {
        assert_eq!(
            x.nrows(),
            y.nrows(),
            "The number of data points must match the number of output targets."
        );

        let values = self.predict_mean(x).expect("SGP Prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array2<F> {
        Array2::zeros((x.nrows(), self.n_outputs()))
    }
}

impl<F, D, D2, K, M> Fit<ArrayBase<D, Ix2>, ArrayBase<D2, Ix2>, GpError> for SgpValidParams<F, K, M>
where
    F: Float,
    D: Data<Elem = F>,
    D2: Data<Elem = F>,
    K: Kernel<F>,
    M: MeanFunction<F>,
{
    type Object = SparseGaussianProcess<F, K, M>;

    /// Bind training data (X, Y) with Y as a (N, R) matrix to the parameters
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D2, Ix2>>,
    ) -> Result<Self::Object> {
        self.bind(dataset.records().view(), dataset.targets().to_owned())
    }
}

impl<F, D, D2, K, M> Fit<ArrayBase<D, Ix2>, ArrayBase<D2, Ix1>, GpError> for SgpValidParams<F, K, M>
where
    F: Float,
    D: Data<Elem = F>,
    D2: Data<Elem = F>,
    K: Kernel<F>,
    M: MeanFunction<F>,
{
    type Object = SparseGaussianProcess<F, K, M>;

    /// Bind training data (X, y) with y as a (N,) vector to the parameters
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D2, Ix1>>,
    ) -> Result<Self::Object> {
        let yt = dataset.targets().to_owned().insert_axis(Axis(1));
        self.bind(dataset.records().view(), yt)
    }
}

impl<F: Float, K: Kernel<F>, M: MeanFunction<F>> SgpValidParams<F, K, M> {
    /// Check training data shapes, resolve inducing points and build the model
    fn bind(&self, xt: ArrayView2<F>, yt: Array2<F>) -> Result<SparseGaussianProcess<F, K, M>> {
        let (n, nx) = xt.dim();
        if n == 0 || nx == 0 {
            return Err(GpError::ShapeMismatch(format!(
                "Training inputs should not be empty, got ({n}, {nx}) matrix"
            )));
        }
        if yt.nrows() != n {
            return Err(GpError::ShapeMismatch(format!(
                "Training inputs and outputs should have the same number of rows, got {} and {}",
                n,
                yt.nrows()
            )));
        }
        if yt.ncols() == 0 {
            return Err(GpError::ShapeMismatch(
                "Training outputs should have at least one column".to_string(),
            ));
        }
        if let Some(dim) = self.kernel().input_dim() {
            if dim != nx {
                return Err(GpError::ShapeMismatch(format!(
                    "Kernel expects {dim}-dimensional inputs, got {nx}"
                )));
            }
        }
        if let Some(dim) = self.mean().input_dim() {
            if dim != nx {
                return Err(GpError::ShapeMismatch(format!(
                    "Mean function expects {dim}-dimensional inputs, got {nx}"
                )));
            }
        }
        if let Some(p) = self.mean().output_dim() {
            if p != yt.ncols() {
                return Err(GpError::ShapeMismatch(format!(
                    "Mean function gives {} outputs, got {} training outputs",
                    p,
                    yt.ncols()
                )));
            }
        }

        let z = match self.inducings() {
            Inducings::Randomized(nz) => {
                let mut rng = match self.seed() {
                    Some(seed) => Xoshiro256Plus::seed_from_u64(*seed),
                    None => Xoshiro256Plus::from_entropy(),
                };
                make_inducings(*nz, &xt, &mut rng)
            }
            Inducings::Located(z) => {
                if z.ncols() != nx {
                    return Err(GpError::ShapeMismatch(format!(
                        "Inducing points should have {} components, got {}",
                        nx,
                        z.ncols()
                    )));
                }
                z.to_owned()
            }
        };
        debug!(
            "SGP {:?} bound to N={} points, R={} outputs, M={} inducing points",
            self.method(),
            n,
            yt.ncols(),
            z.nrows()
        );

        Ok(SparseGaussianProcess {
            inducings: z,
            training_data: (xt.to_owned(), yt),
            params: self.clone(),
        })
    }
}

/// Central finite differences of a scalar function of one point, row by row.
/// The first error raised by `fun` is returned.
fn central_diff_rows<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    fun: impl Fn(&Array2<F>) -> Result<F>,
) -> Result<Array2<F>> {
    let first_err: Cell<Option<GpError>> = Cell::new(None);
    let f = |xi: &Vec<f64>| -> f64 {
        let xi = Array::from_shape_vec(
            (1, xi.len()),
            xi.iter().map(|v| F::cast(*v)).collect::<Vec<F>>(),
        );
        match xi
            .map_err(|err| GpError::ShapeMismatch(err.to_string()))
            .and_then(|xi| fun(&xi))
        {
            Ok(v) => to_f64(v),
            Err(err) => {
                let prev = first_err.take();
                first_err.set(prev.or(Some(err)));
                f64::NAN
            }
        }
    };
    let mut drv = Array2::<F>::zeros((x.nrows(), x.ncols()));
    Zip::from(drv.rows_mut())
        .and(x.rows())
        .for_each(|mut row, xi| {
            let xi = xi.iter().map(|v| to_f64(*v)).collect::<Vec<f64>>();
            let grad = xi.central_diff(&f);
            row.assign(&grad.into_iter().map(|v| F::cast(v)).collect::<Array1<F>>());
        });
    match first_err.into_inner() {
        Some(err) => Err(err),
        None => Ok(drv),
    }
}

/// Select `n_inducing` distinct training points at random (all of them if `n_inducing > N`)
fn make_inducings<F: Float>(
    n_inducing: usize,
    xt: &ArrayView2<F>,
    rng: &mut Xoshiro256Plus,
) -> Array2<F> {
    let mut indices = (0..xt.nrows()).collect::<Vec<_>>();
    indices.shuffle(rng);
    let n = n_inducing.min(xt.nrows());
    let mut z = Array2::zeros((n, xt.ncols()));
    let idx = indices[..n].to_vec();
    Zip::from(z.rows_mut())
        .and(&Array1::from_vec(idx))
        .for_each(|mut zi, i| zi.assign(&xt.row(*i)));
    z
}

/// Draw `n_traj` samples of N(mean, cov) where mean is (n, 1) and cov (n, n),
/// eigenvalues of cov below 1e-9 being considered as zero.
fn sample<F: Float>(
    mean: Array2<F>,
    cov: Array2<F>,
    n_traj: usize,
    rng: &mut Xoshiro256Plus,
) -> Result<Array2<F>> {
    let n_eval = mean.nrows();
    let (v, w) = cov.eigh_into()?;
    let v = v.mapv(|x| {
        // We lower bound the float value at 1e-9
        if x < F::cast(1e-9) {
            return F::zero();
        }
        x.sqrt()
    });
    let c = w.dot(&Array2::from_diag(&v));
    let ary = Array::<f64, _>::random_using((n_eval, n_traj), StandardNormal, rng)
        .mapv(|v| F::cast(v));
    Ok(c.dot(&ary) + &mean)
}
