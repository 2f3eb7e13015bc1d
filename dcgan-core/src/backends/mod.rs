pub mod cpu;
pub mod session;

use crate::error::{Error, Result};

use ndarray::ArrayD;
use num_traits::Float;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Dense tensor storage the session evaluates graph nodes on.
///
/// Element-wise binary operations broadcast with NumPy rules. Operations
/// whose operands can disagree return an error instead of panicking.
pub trait Tensor<T>: Clone + Send + Sync
where
    T: Float,
{
    fn new(data: ArrayD<T>) -> Self;

    fn get_data(&self) -> &ArrayD<T>;

    fn into_data(self) -> ArrayD<T>;

    fn shape(&self) -> Vec<usize>;

    fn size(&self) -> usize;

    fn zeros(shape: &[usize]) -> Self;

    fn zeros_like(tensor: &Self) -> Self;

    fn ones(shape: &[usize]) -> Self;

    fn full(shape: &[usize], value: T) -> Self;

    /// Fills a tensor of `shape` in row-major order from `f`.
    fn from_shape_fn<F: FnMut() -> T>(shape: &[usize], f: F) -> Self;

    fn add(&self, other: &Self) -> Result<Self>;

    fn sub(&self, other: &Self) -> Result<Self>;

    fn mul(&self, other: &Self) -> Result<Self>;

    fn div(&self, other: &Self) -> Result<Self>;

    fn map<F: Fn(T) -> T>(&self, f: F) -> Self;

    fn rsqrt(&self) -> Self {
        self.map(|x| x.sqrt().recip())
    }

    fn exp(&self) -> Self {
        self.map(|x| x.exp())
    }

    fn log1p(&self) -> Self {
        self.map(|x| x.ln_1p())
    }

    fn floor(&self) -> Self {
        self.map(|x| x.floor())
    }

    fn neg(&self) -> Self {
        self.map(|x| -x)
    }

    fn matmul(&self, other: &Self) -> Result<Self>;

    fn reshape(&self, shape: &[usize]) -> Result<Self>;

    fn broadcast_to(&self, shape: &[usize]) -> Result<Self>;

    /// Picks from `on_true` where `cond` holds and from `on_false` elsewhere.
    fn select(cond: &ArrayD<bool>, on_true: &Self, on_false: &Self) -> Result<Self>;

    /// Mean over every element, as a scalar tensor.
    fn mean(&self) -> Self;

    /// Per-channel mean and (biased) variance over every axis but the last.
    fn moments(&self) -> Result<(Self, Self)>;

    fn conv2d(&self, filter: &Self, strides: [usize; 2], padding: Padding) -> Result<Self>;

    fn conv2d_backprop_input(
        input_sizes: &[usize],
        filter: &Self,
        out_backprop: &Self,
        strides: [usize; 2],
        padding: Padding,
    ) -> Result<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    Same,
    Valid,
}

impl Padding {
    /// Output extent and leading padding along one spatial axis.
    pub fn resolve(self, input: usize, kernel: usize, stride: usize) -> Option<(usize, usize)> {
        if stride == 0 || kernel == 0 {
            return None;
        }
        match self {
            Padding::Same => {
                let out = (input + stride - 1) / stride;
                let needed = out.saturating_sub(1) * stride + kernel;
                Some((out, needed.saturating_sub(input) / 2))
            }
            Padding::Valid => {
                if input < kernel {
                    return None;
                }
                Some(((input - kernel) / stride + 1, 0))
            }
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Padding::Same => write!(f, "SAME"),
            Padding::Valid => write!(f, "VALID"),
        }
    }
}

impl FromStr for Padding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SAME" => Ok(Padding::Same),
            "VALID" => Ok(Padding::Valid),
            other => Err(Error::invalid("Padding", format!("unknown padding `{other}`"))),
        }
    }
}

/// Resolved geometry of an NHWC convolution with an HWIO filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batch: usize,
    pub in_height: usize,
    pub in_width: usize,
    pub in_channels: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub out_channels: usize,
    pub stride_height: usize,
    pub stride_width: usize,
    pub out_height: usize,
    pub out_width: usize,
    pub pad_top: usize,
    pub pad_left: usize,
}

impl ConvGeometry {
    pub fn new(
        op: &'static str,
        input: &[usize],
        filter: &[usize],
        strides: [usize; 2],
        padding: Padding,
    ) -> Result<Self> {
        if input.len() != 4 {
            return Err(Error::Rank { op, expected: 4, shape: input.to_vec() });
        }
        if filter.len() != 4 {
            return Err(Error::Rank { op, expected: 4, shape: filter.to_vec() });
        }
        if filter[2] != input[3] {
            return Err(Error::IncompatibleShapes {
                op,
                lhs: input.to_vec(),
                rhs: filter.to_vec(),
            });
        }

        let (out_height, pad_top) = padding
            .resolve(input[1], filter[0], strides[0])
            .ok_or_else(|| Error::invalid(op, format!("{padding} padding cannot fit kernel {filter:?} with strides {strides:?} on input {input:?}")))?;
        let (out_width, pad_left) = padding
            .resolve(input[2], filter[1], strides[1])
            .ok_or_else(|| Error::invalid(op, format!("{padding} padding cannot fit kernel {filter:?} with strides {strides:?} on input {input:?}")))?;

        Ok(Self {
            batch: input[0],
            in_height: input[1],
            in_width: input[2],
            in_channels: input[3],
            kernel_height: filter[0],
            kernel_width: filter[1],
            out_channels: filter[3],
            stride_height: strides[0],
            stride_width: strides[1],
            out_height,
            out_width,
            pad_top,
            pad_left,
        })
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.in_height, self.in_width, self.in_channels]
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.out_height, self.out_width, self.out_channels]
    }

    /// Length of one im2col row: one receptive field across all input channels.
    pub fn patch_size(&self) -> usize {
        self.kernel_height * self.kernel_width * self.in_channels
    }

    /// Input coordinate read by output position `out` at kernel offset `k`,
    /// or `None` when it falls into the padding.
    pub(crate) fn source(out: usize, k: usize, stride: usize, pad: usize, extent: usize) -> Option<usize> {
        let pos = (out * stride + k).checked_sub(pad)?;
        (pos < extent).then_some(pos)
    }
}

/// NumPy-style broadcast of two shapes.
pub fn broadcast_shape(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut shape = vec![0; rank];
    for i in 0..rank {
        let l = if i < rank - lhs.len() { 1 } else { lhs[i - (rank - lhs.len())] };
        let r = if i < rank - rhs.len() { 1 } else { rhs[i - (rank - rhs.len())] };
        shape[i] = match (l, r) {
            (l, r) if l == r => l,
            (1, r) => r,
            (l, 1) => l,
            _ => {
                return Err(Error::IncompatibleShapes {
                    op,
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                })
            }
        };
    }
    Ok(shape)
}
