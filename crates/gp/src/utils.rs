use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};

/// Computes differences between x and each element of y
/// resulting in a 2d array of shape (nrows(y), ncols(x));
/// *Panics* if x and y have not the same number of components
pub fn differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.len() == y.ncols());
    x.to_owned() - y
}

/// Lossy conversion used to report values in errors and logs
pub(crate) fn to_f64<F: Float>(v: F) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

/// Sum of squared values over all elements
pub(crate) fn sum_squares<F: Float>(a: &ArrayBase<impl Data<Elem = F>, Ix2>) -> F {
    a.fold(F::zero(), |acc, v| acc + *v * *v)
}

/// Broadcast a (n, p) matrix with p == 1 or p == n_outputs to (n, n_outputs)
pub(crate) fn broadcast_outputs<F: Float>(
    m: Array2<F>,
    n_outputs: usize,
) -> Option<Array2<F>> {
    if m.ncols() == n_outputs {
        Some(m)
    } else if m.ncols() == 1 {
        m.broadcast((m.nrows(), n_outputs)).map(|v| v.to_owned())
    } else {
        None
    }
}

/// Replicate a shared latent variance vector (n,) over `n_outputs` columns
pub(crate) fn tile_columns<F: Float>(v: &Array1<F>, n_outputs: usize) -> Array2<F> {
    let mut tiled = Array2::zeros((v.len(), n_outputs));
    tiled
        .columns_mut()
        .into_iter()
        .for_each(|mut col| col.assign(v));
    tiled
}
