use env_logger::{Builder, Env};
use linfa::prelude::*;
use ndarray::{concatenate, Array, Array2, Axis};
use sparse_gp::{Inducings, SparseKriging, SparseMethod, SquaredExponentialKernel, SPARSE_GP_LOG};

fn xsinx(x: &Array2<f64>) -> Array2<f64> {
    (x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())
}

fn main() {
    let env = Env::new().filter_or(SPARSE_GP_LOG, "info");
    Builder::from_env(env).try_init().ok();

    let xt = Array::linspace(0., 25., 100).insert_axis(Axis(1));
    let yt = xsinx(&xt);
    let z = Array::linspace(0., 25., 12).insert_axis(Axis(1));

    for method in [SparseMethod::Vfe, SparseMethod::Fitc] {
        let sgp = SparseKriging::params(Inducings::Located(z.clone()))
            .kernel(SquaredExponentialKernel::isotropic(3., 100.))
            .sparse_method(method)
            .noise_variance(1e-2)
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .expect("SGP fitting");
        println!("{sgp}");
        println!("evidence = {}", sgp.evidence().expect("SGP evidence"));

        let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
        let ytest = xsinx(&xtest);
        let (ypred, yvar) = sgp.predict_diag(&xtest).expect("SGP prediction");
        let ysigma = yvar.mapv(|v| v.max(0.).sqrt());

        println!("Compute prediction errors (x, err(x), sigma(x))");
        println!("{}", concatenate![Axis(1), xtest, ypred - ytest, ysigma]);
    }
}
