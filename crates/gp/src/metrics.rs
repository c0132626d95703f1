//! A module for metrics to evaluate sparse Gaussian Process models performances
//! It implements metrics from the following paper:
//! Marrel, Amandine, and Bertrand Iooss.
//! "Probabilistic surrogate modeling by Gaussian process: A review on recent insights in estimation and validation."
//! Reliability Engineering & System Safety 247 (2024): 110094.

use linfa::dataset::Dataset;
use linfa::{
    traits::{Fit, Predict, PredictInplace},
    Float, ParamGuard,
};
use ndarray::{s, Array2, Axis};

use crate::{GpError, Kernel, MeanFunction, SgpParams, SparseGaussianProcess};

/// A trait for Q2 predictive coefficient cross validation score
pub trait PredictScore<F, ER, P, O>
where
    F: Float,
    ER: std::error::Error + From<linfa::error::Error>,
    P: Fit<Array2<F>, Array2<F>, ER, Object = O> + ParamGuard,
    O: PredictInplace<Array2<F>, Array2<F>>,
{
    /// Return the training data (xt, yt)
    fn training_data(&self) -> &(Array2<F>, Array2<F>);

    /// Return the model parameters
    fn params(&self) -> P;

    /// Compute quality metric Q2 with kfold cross validation,
    /// squared residuals being pooled over the outputs.
    ///
    /// Folds are consecutive blocks of `nsamples / kfold` rows, the last one
    /// taking the remaining rows.
    fn q2_score(&self, kfold: usize) -> Result<F, ER> {
        let (xt, yt) = self.training_data();
        let nsamples = xt.nrows();
        if kfold < 2 || kfold > nsamples {
            return Err(linfa::error::Error::Parameters(format!(
                "Number of folds should be in [2, {nsamples}], got {kfold}"
            ))
            .into());
        }
        let yt_mean = yt
            .mean_axis(Axis(0))
            .ok_or(linfa::error::Error::NotEnoughSamples)?;
        let fold_size = nsamples / kfold;
        // Predictive Residual Sum of Squares
        let mut press = F::zero();
        // Total Sum of Squares
        let mut tss = F::zero();
        for k in 0..kfold {
            let start = k * fold_size;
            let end = if k + 1 == kfold {
                nsamples
            } else {
                start + fold_size
            };
            let train_idx = (0..nsamples)
                .filter(|i| *i < start || *i >= end)
                .collect::<Vec<_>>();
            let train = Dataset::new(
                xt.select(Axis(0), &train_idx),
                yt.select(Axis(0), &train_idx),
            );
            let xvalid = xt.slice(s![start..end, ..]).to_owned();
            let yvalid = yt.slice(s![start..end, ..]);

            let model: O = self.params().fit(&train)?;
            let pred = model.predict(&xvalid);
            press += (&yvalid - &pred).mapv(|v| v * v).sum();
            tss += (&yvalid - &yt_mean).mapv(|v| v * v).sum();
        }
        Ok(F::one() - press / tss)
    }

    /// Q2 predictive coefficient with Leave-One-Out Cross-Validation
    fn looq2_score(&self) -> Result<F, ER> {
        self.q2_score(self.training_data().0.nrows())
    }
}

impl<F, K, M> PredictScore<F, GpError, SgpParams<F, K, M>, Self> for SparseGaussianProcess<F, K, M>
where
    F: Float,
    K: Kernel<F>,
    M: MeanFunction<F>,
{
    fn training_data(&self) -> &(Array2<F>, Array2<F>) {
        &self.training_data
    }

    fn params(&self) -> SgpParams<F, K, M> {
        SgpParams::from(self.params.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Inducings, SparseKriging, SparseMethod, SquaredExponentialKernel};
    use approx::assert_abs_diff_eq;
    use ndarray::{concatenate, Array, Axis};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn make_test_data() -> (Array2<f64>, Array2<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let xt = Array::linspace(0., 5., 50).insert_axis(Axis(1));
        let noise =
            Array::<f64, _>::random_using((50, 1), Normal::new(0., 0.1).unwrap(), &mut rng);
        let yt = xt.mapv(|v: f64| v.sin()) + noise;
        (xt, yt)
    }

    #[test]
    fn test_q2_sgp() {
        let (xt, yt) = make_test_data();
        let z = Array::linspace(0., 5., 10).insert_axis(Axis(1));
        for method in [SparseMethod::Vfe, SparseMethod::Fitc] {
            let sgp = SparseKriging::params(Inducings::Located(z.clone()))
                .sparse_method(method)
                .fit(&Dataset::new(xt.clone(), yt.clone()))
                .expect("SGP fitted");

            assert_abs_diff_eq!(sgp.looq2_score().unwrap(), 1., epsilon = 5e-2);
            assert_abs_diff_eq!(sgp.q2_score(10).unwrap(), 1., epsilon = 5e-2);
        }
    }

    #[test]
    fn test_q2_sgp_multiple_outputs() {
        let (xt, yt) = make_test_data();
        let yy = concatenate(Axis(1), &[yt.view(), yt.mapv(|v: f64| 1. - 2. * v).view()]).unwrap();
        let z = Array::linspace(0., 5., 10).insert_axis(Axis(1));
        let sgp = SparseKriging::params(Inducings::Located(z.clone()))
            .fit(&Dataset::new(xt.clone(), yy))
            .expect("SGP fitted");
        let q2 = sgp.q2_score(10).unwrap();
        assert_abs_diff_eq!(q2, 1., epsilon = 5e-2);
        assert_abs_diff_eq!(sgp.looq2_score().unwrap(), 1., epsilon = 5e-2);

        // too short length scale does not generalize between inducing points
        let bad = SparseKriging::params(Inducings::Located(z))
            .kernel(SquaredExponentialKernel::isotropic(0.01, 1.))
            .fit(&Dataset::new(xt, yt))
            .expect("SGP fitted");
        assert!(bad.q2_score(10).unwrap() < q2);
    }

    #[test]
    fn test_q2_uneven_folds_and_bad_kfold() {
        let (xt, yt) = make_test_data();
        let yy = concatenate(Axis(1), &[yt.view(), yt.view(), yt.view()]).unwrap();
        let z = Array::linspace(0., 5., 10).insert_axis(Axis(1));
        let sgp = SparseKriging::params(Inducings::Located(z))
            .fit(&Dataset::new(xt, yy))
            .expect("SGP fitted");
        // 50 rows in 7 folds: last fold takes 8 rows
        assert!(sgp.q2_score(7).unwrap().is_finite());
        assert!(matches!(sgp.q2_score(1), Err(GpError::LinfaError(_))));
        assert!(matches!(sgp.q2_score(51), Err(GpError::LinfaError(_))));
    }
}
