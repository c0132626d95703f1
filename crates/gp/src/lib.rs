//! This library implements Sparse Gaussian Processes methods (SGPs) which address limitations of
//! [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression when the number of training
//! points is large. Indeed the complexity of GPs algorithm is in O(N^3) in processing time and O(N^2) in memory
//! where N is the number of training points. The complexity is then respectively reduced to O(N.M^2) and O(NM)
//! where M is the number of so-called inducing points with M < N.
//!
//! Two approximations are available, see [SparseMethod]:
//! * VFE, the Titsias variational lower bound on the log marginal likelihood (SGPR),
//! * FITC, the Fully Independent Training Conditional approximation.
//!
//! Both give a scalar evidence, to be maximized by the caller with respect to inducing points,
//! kernel hyperparameters and noise variance, and a posterior predictive distribution
//! (mean and full or diagonal covariance) at arbitrary query points.
//!
//! SGP methods are implemented by [SparseGaussianProcess] parameterized by [SgpParams],
//! covariance being given by a [Kernel] and prior mean by a [MeanFunction].
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
pub mod correlation_models;
mod errors;
mod fitc;
pub mod kernels;
pub mod linalg;
pub mod mean_models;
pub mod metrics;
mod sgpr;
mod sparse_algorithm;
mod sparse_parameters;
mod utils;

pub use errors::*;
pub use fitc::FitcTerms;
pub use kernels::*;
pub use mean_models::{ConstantMean, LinearMean, MeanFunction, ZeroMean};
pub use sgpr::SgprTerms;
pub use sparse_algorithm::*;
pub use sparse_parameters::*;
pub use utils::differences;

/// Env variable used to configure `env_logger` filtering in binaries, examples and benches
pub const SPARSE_GP_LOG: &str = "SPARSE_GP_LOG";
