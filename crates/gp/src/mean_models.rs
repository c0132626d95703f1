//! A module for prior mean functions of the sparse GP model.
//!
//! A mean function maps (n, nx) inputs to a (n, p) matrix where p is either 1,
//! the value being shared by all outputs, or the number of outputs.
//!
//! The following models are implemented:
//! * zero,
//! * constant,
//! * linear

use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use paste::paste;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for prior mean functions used in sparse GP regression
pub trait MeanFunction<F: Float>: Clone + fmt::Display + Sync {
    /// Compute the prior mean at the given `x` data points specified as (n, nx) matrix.
    /// Returns a (n, p) matrix
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F>;

    /// Number of output columns p of [`MeanFunction::value`], `None` when 1 column
    /// is broadcast to every output
    fn output_dim(&self) -> Option<usize> {
        None
    }

    /// Expected input dimension if the mean function is bound to one
    fn input_dim(&self) -> Option<usize> {
        None
    }
}

/// Zero prior mean
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct ZeroMean();

impl<F: Float> MeanFunction<F> for ZeroMean {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::<F>::zeros((x.nrows(), 1))
    }
}

macro_rules! declare_mean_util_impls {
    ($mean:ident) => {
        paste! {
            impl fmt::Display for [<$mean Mean>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}Mean", stringify!($mean))
                }
            }

            impl From<[<$mean Mean>]> for String {
                fn from(item: [<$mean Mean>]) -> Self {
                    item.to_string()
                }
            }

            impl TryFrom<String> for [<$mean Mean>] {
                type Error = &'static str;
                fn try_from(s: String) -> Result<Self, Self::Error> {
                    if s == stringify!([<$mean Mean>]) {
                        Ok(Self::default())
                    } else {
                        Err(concat!(
                            "Bad string value for ",
                            stringify!([<$mean Mean>]),
                            ", should be '",
                            stringify!([<$mean Mean>]),
                            "'"
                        ))
                    }
                }
            }
        }
    };
}

declare_mean_util_impls!(Zero);

/// A constant prior mean, one value per output or a single shared value
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct ConstantMean<F: Float> {
    c: Array1<F>,
}

impl<F: Float> ConstantMean<F> {
    /// Constant mean given values as (p,) vector
    pub fn new(c: Array1<F>) -> Self {
        ConstantMean { c }
    }

    /// Constant mean shared by all outputs
    pub fn shared(c: F) -> Self {
        ConstantMean {
            c: Array1::from_elem(1, c),
        }
    }

    /// Constant values
    pub fn values(&self) -> &Array1<F> {
        &self.c
    }
}

impl<F: Float> Default for ConstantMean<F> {
    fn default() -> Self {
        Self::shared(F::zero())
    }
}

impl<F: Float> MeanFunction<F> for ConstantMean<F> {
    /// regr(x) = [c, ..., c].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let mut res = Array2::<F>::zeros((x.nrows(), self.c.len()));
        res.rows_mut()
            .into_iter()
            .for_each(|mut row| row.assign(&self.c));
        res
    }

    fn output_dim(&self) -> Option<usize> {
        match self.c.len() {
            1 => None,
            p => Some(p),
        }
    }
}

impl<F: Float> fmt::Display for ConstantMean<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConstantMean(c={})", self.c)
    }
}

/// An affine prior mean `x.a + b`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct LinearMean<F: Float> {
    /// (nx, p) coefficients
    a: Array2<F>,
    /// (p,) offsets
    b: Array1<F>,
}

impl<F: Float> LinearMean<F> {
    /// Linear mean given (nx, p) coefficients and (p,) offsets.
    ///
    /// *Panics* if `a` and `b` have inconsistent output numbers
    pub fn new(a: Array2<F>, b: Array1<F>) -> Self {
        assert!(
            a.ncols() == b.len(),
            "LinearMean: a columns and b length should match"
        );
        LinearMean { a, b }
    }

    /// Coefficients (nx, p)
    pub fn coefficients(&self) -> &Array2<F> {
        &self.a
    }

    /// Offsets (p,)
    pub fn offsets(&self) -> &Array1<F> {
        &self.b
    }
}

impl<F: Float> MeanFunction<F> for LinearMean<F> {
    /// regr(x) = x.a + b
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        x.dot(&self.a) + &self.b
    }

    fn output_dim(&self) -> Option<usize> {
        match self.b.len() {
            1 => None,
            p => Some(p),
        }
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.a.nrows())
    }
}

impl<F: Float> fmt::Display for LinearMean<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LinearMean(a={}, b={})", self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_zero() {
        let x = array![[1., 2.], [3., 4.], [5., 6.]];
        let actual = MeanFunction::<f64>::value(&ZeroMean(), &x);
        assert_eq!(array![[0.], [0.], [0.]], actual);
        assert_eq!(None, MeanFunction::<f64>::output_dim(&ZeroMean()));
    }

    #[test]
    fn test_constant() {
        let x = array![[1.], [2.]];
        let mean = ConstantMean::new(array![1.5, -2.]);
        assert_abs_diff_eq!(array![[1.5, -2.], [1.5, -2.]], mean.value(&x));
        assert_eq!(Some(2), mean.output_dim());
        assert_eq!(None, ConstantMean::shared(3.).output_dim());
    }

    #[test]
    fn test_linear() {
        let x = array![[1., 2.], [0., -1.]];
        let mean = LinearMean::new(array![[1.], [2.]], array![0.5]);
        assert_abs_diff_eq!(array![[5.5], [-1.5]], mean.value(&x));
        assert_eq!(Some(2), mean.input_dim());
        assert_eq!(None, mean.output_dim());
    }

    #[test]
    #[should_panic]
    fn test_linear_bad_offsets() {
        let _ = LinearMean::new(array![[1., 2.], [2., 0.]], array![0.5]);
    }

    #[test]
    fn test_utils() {
        assert_eq!("ZeroMean", ZeroMean().to_string());
        assert_eq!(
            ZeroMean(),
            ZeroMean::try_from(String::from(ZeroMean())).unwrap()
        );
        assert!(ZeroMean::try_from("ConstantMean".to_string()).is_err());
        assert_eq!(
            "ConstantMean(c=[2])",
            ConstantMean::shared(2.).to_string()
        );
    }
}
