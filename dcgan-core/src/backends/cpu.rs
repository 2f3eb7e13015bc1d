use super::{broadcast_shape, ConvGeometry, Padding, Tensor};
use crate::error::{Error, Result};

use ndarray::linalg::general_mat_mul;
use ndarray::{arr0, s, Array, Array2, Array3, Array4, ArrayD, ArrayView3, ArrayView4, Axis, Ix2, Ix4, IxDyn, LinalgScalar, Zip};
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuTensor<T> {
    pub data: ArrayD<T>,
}

impl<T> CpuTensor<T>
where
    T: Float + Send + Sync,
{
    fn zip_broadcast<F>(&self, other: &Self, op: &'static str, f: F) -> Result<Self>
    where
        F: Fn(T, T) -> T,
    {
        let shape = broadcast_shape(op, self.data.shape(), other.data.shape())?;
        let incompatible = || Error::IncompatibleShapes {
            op,
            lhs: self.data.shape().to_vec(),
            rhs: other.data.shape().to_vec(),
        };
        let lhs = self.data.broadcast(shape.as_slice()).ok_or_else(incompatible)?;
        let rhs = other.data.broadcast(shape.as_slice()).ok_or_else(incompatible)?;
        let data = Zip::from(lhs).and(rhs).map_collect(|&a, &b| f(a, b));
        Ok(Self { data })
    }

    fn matrix(&self, rows: usize, cols: usize) -> Result<Array2<T>> {
        Ok(self.data.as_standard_layout().into_owned().into_shape((rows, cols))?)
    }
}

impl<T> Tensor<T> for CpuTensor<T>
where
    T: Float + LinalgScalar + FromPrimitive + Send + Sync,
{
    fn new(data: ArrayD<T>) -> Self {
        Self { data }
    }

    fn get_data(&self) -> &ArrayD<T> {
        &self.data
    }

    fn into_data(self) -> ArrayD<T> {
        self.data
    }

    fn shape(&self) -> Vec<usize> {
        self.data.shape().to_vec()
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn zeros(shape: &[usize]) -> Self {
        Self { data: Array::zeros(shape) }
    }

    fn zeros_like(tensor: &Self) -> Self {
        Self { data: Array::zeros(tensor.data.raw_dim()) }
    }

    fn ones(shape: &[usize]) -> Self {
        Self { data: Array::ones(shape) }
    }

    fn full(shape: &[usize], value: T) -> Self {
        Self { data: Array::from_elem(shape, value) }
    }

    fn from_shape_fn<F: FnMut() -> T>(shape: &[usize], mut f: F) -> Self {
        Self { data: Array::from_shape_fn(IxDyn(shape), |_| f()) }
    }

    fn add(&self, other: &Self) -> Result<Self> {
        self.zip_broadcast(other, "Add", |a, b| a + b)
    }

    fn sub(&self, other: &Self) -> Result<Self> {
        self.zip_broadcast(other, "Sub", |a, b| a - b)
    }

    fn mul(&self, other: &Self) -> Result<Self> {
        self.zip_broadcast(other, "Mul", |a, b| a * b)
    }

    fn div(&self, other: &Self) -> Result<Self> {
        self.zip_broadcast(other, "Div", |a, b| a / b)
    }

    fn map<F: Fn(T) -> T>(&self, f: F) -> Self {
        Self { data: self.data.mapv(f) }
    }

    fn matmul(&self, other: &Self) -> Result<Self> {
        let first = self.data.view().into_dimensionality::<Ix2>()?;
        let second = other.data.view().into_dimensionality::<Ix2>()?;
        if first.ncols() != second.nrows() {
            return Err(Error::IncompatibleShapes {
                op: "MatMul",
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }

        let mut result = Array2::<T>::zeros((first.nrows(), second.ncols()));
        general_mat_mul(T::one(), &first, &second, T::zero(), &mut result);
        Ok(Self::new(result.into_dyn()))
    }

    fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if shape.iter().product::<usize>() != self.size() {
            return Err(Error::IncompatibleShapes {
                op: "Reshape",
                lhs: self.shape(),
                rhs: shape.to_vec(),
            });
        }
        let data = self.data.as_standard_layout().into_owned().into_shape(shape)?;
        Ok(Self { data })
    }

    fn broadcast_to(&self, shape: &[usize]) -> Result<Self> {
        let view = self.data.broadcast(shape).ok_or_else(|| Error::IncompatibleShapes {
            op: "BroadcastTo",
            lhs: self.shape(),
            rhs: shape.to_vec(),
        })?;
        Ok(Self { data: view.to_owned() })
    }

    fn select(cond: &ArrayD<bool>, on_true: &Self, on_false: &Self) -> Result<Self> {
        let branches = broadcast_shape("SelectV2", on_true.data.shape(), on_false.data.shape())?;
        let shape = broadcast_shape("SelectV2", cond.shape(), &branches)?;
        let incompatible = || Error::IncompatibleShapes {
            op: "SelectV2",
            lhs: cond.shape().to_vec(),
            rhs: branches.clone(),
        };

        let cond = cond.broadcast(shape.as_slice()).ok_or_else(incompatible)?;
        let on_true = on_true.data.broadcast(shape.as_slice()).ok_or_else(incompatible)?;
        let on_false = on_false.data.broadcast(shape.as_slice()).ok_or_else(incompatible)?;
        let data = Zip::from(cond)
            .and(on_true)
            .and(on_false)
            .map_collect(|&c, &t, &f| if c { t } else { f });
        Ok(Self { data })
    }

    fn mean(&self) -> Self {
        let mean = self.data.mean().unwrap_or_else(T::nan);
        Self { data: arr0(mean).into_dyn() }
    }

    fn moments(&self) -> Result<(Self, Self)> {
        let channels = match self.data.shape().last() {
            Some(&c) if c > 0 => c,
            _ => return Err(Error::invalid("Moments", format!("cannot take per-channel moments of shape {:?}", self.shape()))),
        };
        let rows = self.size() / channels;
        if rows == 0 {
            return Err(Error::invalid("Moments", "empty batch"));
        }

        let flat = self.matrix(rows, channels)?;
        let mean = flat
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::invalid("Moments", "empty batch"))?;
        let variance = flat.var_axis(Axis(0), T::zero());
        Ok((Self::new(mean.into_dyn()), Self::new(variance.into_dyn())))
    }

    fn conv2d(&self, filter: &Self, strides: [usize; 2], padding: Padding) -> Result<Self> {
        let geometry = ConvGeometry::new("Conv2D", self.data.shape(), filter.data.shape(), strides, padding)?;
        let input = self.data.view().into_dimensionality::<Ix4>()?;

        let cols = im2col(&input, &geometry)?;
        let kernel = filter.matrix(geometry.patch_size(), geometry.out_channels)?;

        let mut out = Array2::<T>::zeros((cols.nrows(), geometry.out_channels));
        general_mat_mul(T::one(), &cols, &kernel, T::zero(), &mut out);
        Ok(Self::new(out.into_shape(geometry.output_shape().to_vec())?))
    }

    fn conv2d_backprop_input(
        input_sizes: &[usize],
        filter: &Self,
        out_backprop: &Self,
        strides: [usize; 2],
        padding: Padding,
    ) -> Result<Self> {
        let geometry = ConvGeometry::new("Conv2DBackpropInput", input_sizes, filter.data.shape(), strides, padding)?;
        if out_backprop.data.shape() != &geometry.output_shape()[..] {
            return Err(Error::IncompatibleShapes {
                op: "Conv2DBackpropInput",
                lhs: out_backprop.shape(),
                rhs: geometry.output_shape().to_vec(),
            });
        }

        let positions = geometry.out_height * geometry.out_width;
        let grad = out_backprop.matrix(geometry.batch * positions, geometry.out_channels)?;
        let kernel = filter.matrix(geometry.patch_size(), geometry.out_channels)?;

        let mut cols = Array2::<T>::zeros((grad.nrows(), geometry.patch_size()));
        general_mat_mul(T::one(), &grad, &kernel.t(), T::zero(), &mut cols);
        let cols = cols.into_shape((geometry.batch, positions, geometry.patch_size()))?;

        Ok(Self::new(col2im(cols.view(), &geometry).into_dyn()))
    }
}

/// Unfolds every receptive field of `input` into one row; padding reads as zero.
fn im2col<T>(input: &ArrayView4<T>, g: &ConvGeometry) -> Result<Array2<T>>
where
    T: Float + Send + Sync,
{
    let positions = g.out_height * g.out_width;
    let mut cols = Array3::<T>::zeros((g.batch, positions, g.patch_size()));

    Zip::from(cols.axis_iter_mut(Axis(0)))
        .and(input.axis_iter(Axis(0)))
        .par_for_each(|mut sample_cols, sample| {
            for oy in 0..g.out_height {
                for ox in 0..g.out_width {
                    let mut row = sample_cols.row_mut(oy * g.out_width + ox);
                    for ky in 0..g.kernel_height {
                        let Some(iy) = ConvGeometry::source(oy, ky, g.stride_height, g.pad_top, g.in_height) else {
                            continue;
                        };
                        for kx in 0..g.kernel_width {
                            let Some(ix) = ConvGeometry::source(ox, kx, g.stride_width, g.pad_left, g.in_width) else {
                                continue;
                            };
                            let base = (ky * g.kernel_width + kx) * g.in_channels;
                            row.slice_mut(s![base..base + g.in_channels])
                                .assign(&sample.slice(s![iy, ix, ..]));
                        }
                    }
                }
            }
        });

    Ok(cols.into_shape((g.batch * positions, g.patch_size()))?)
}

/// Folds im2col rows back onto the input grid, summing overlapping taps.
fn col2im<T>(cols: ArrayView3<T>, g: &ConvGeometry) -> Array4<T>
where
    T: Float + Send + Sync,
{
    let mut out = Array4::<T>::zeros(g.input_shape());

    Zip::from(out.axis_iter_mut(Axis(0)))
        .and(cols.axis_iter(Axis(0)))
        .par_for_each(|mut sample, sample_cols| {
            for oy in 0..g.out_height {
                for ox in 0..g.out_width {
                    let row = sample_cols.row(oy * g.out_width + ox);
                    for ky in 0..g.kernel_height {
                        let Some(iy) = ConvGeometry::source(oy, ky, g.stride_height, g.pad_top, g.in_height) else {
                            continue;
                        };
                        for kx in 0..g.kernel_width {
                            let Some(ix) = ConvGeometry::source(ox, kx, g.stride_width, g.pad_left, g.in_width) else {
                                continue;
                            };
                            let base = (ky * g.kernel_width + kx) * g.in_channels;
                            Zip::from(sample.slice_mut(s![iy, ix, ..]))
                                .and(row.slice(s![base..base + g.in_channels]))
                                .for_each(|acc, &v| *acc = *acc + v);
                        }
                    }
                }
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    fn ramp(shape: &[usize], scale: f32) -> CpuTensor<f32> {
        let mut i = 0.0f32;
        CpuTensor::from_shape_fn(shape, || {
            i += 1.0;
            (i * scale).sin()
        })
    }

    fn dot(a: &CpuTensor<f32>, b: &CpuTensor<f32>) -> f32 {
        a.data.iter().zip(b.data.iter()).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_broadcast_add() {
        let a = CpuTensor::new(array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn());
        let b = CpuTensor::new(array![10.0f32, 20.0].into_dyn());
        let c = a.add(&b).unwrap();
        assert_eq!(c.data, array![[11.0f32, 22.0], [13.0, 24.0]].into_dyn());

        let bad = CpuTensor::new(array![1.0f32, 2.0, 3.0].into_dyn());
        assert!(a.add(&bad).is_err());
    }

    #[test]
    fn test_matmul() {
        let a = CpuTensor::new(array![[1.0f32, 2.0, 3.0]].into_dyn());
        let b = CpuTensor::new(array![[1.0f32], [0.5], [2.0]].into_dyn());
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), vec![1, 1]);
        assert_abs_diff_eq!(c.data[[0, 0]], 8.0);
        assert!(b.matmul(&b).is_err());
    }

    #[test]
    fn test_select_and_unary_maps() {
        let cond = array![true, false, true].into_dyn();
        let t = CpuTensor::new(array![1.0f32, 2.0, 3.0].into_dyn());
        let f = CpuTensor::new(array![-1.0f32].into_dyn());
        let out = CpuTensor::select(&cond, &t, &f).unwrap();
        assert_eq!(out.data, array![1.0f32, -1.0, 3.0].into_dyn());

        let x = CpuTensor::new(array![4.0f32, 0.25].into_dyn());
        assert_eq!(x.rsqrt().data, array![0.5f32, 2.0].into_dyn());
        assert_eq!(x.neg().floor().data, array![-4.0f32, -1.0].into_dyn());
    }

    #[test]
    fn test_reshape_size_mismatch() {
        let x = CpuTensor::<f32>::zeros(&[2, 3]);
        assert_eq!(x.reshape(&[3, 2]).unwrap().shape(), vec![3, 2]);
        assert!(x.reshape(&[4, 2]).is_err());
    }

    #[test]
    fn test_moments_per_channel() {
        let x = CpuTensor::new(ArrayD::from_shape_vec(IxDyn(&[1, 2, 1, 2]), vec![1.0f32, 10.0, 3.0, 10.0]).unwrap());
        let (mean, variance) = x.moments().unwrap();
        assert_eq!(mean.data, array![2.0f32, 10.0].into_dyn());
        assert_eq!(variance.data, array![1.0f32, 0.0].into_dyn());
    }

    #[test]
    fn test_conv2d_same_padding_sums_neighbourhood() {
        let input = CpuTensor::<f32>::ones(&[1, 3, 3, 1]);
        let filter = CpuTensor::<f32>::ones(&[3, 3, 1, 1]);
        let out = input.conv2d(&filter, [1, 1], Padding::Same).unwrap();
        assert_eq!(out.shape(), vec![1, 3, 3, 1]);
        assert_eq!(
            out.data.into_shape((3, 3)).unwrap(),
            array![[4.0f32, 6.0, 4.0], [6.0, 9.0, 6.0], [4.0, 6.0, 4.0]]
        );
    }

    #[test]
    fn test_conv2d_strided_output_shape() {
        let input = ramp(&[2, 28, 28, 1], 0.1);
        let filter = ramp(&[5, 5, 1, 4], 0.3);
        let out = input.conv2d(&filter, [2, 2], Padding::Same).unwrap();
        assert_eq!(out.shape(), vec![2, 14, 14, 4]);

        let valid = input.conv2d(&filter, [1, 1], Padding::Valid).unwrap();
        assert_eq!(valid.shape(), vec![2, 24, 24, 4]);
    }

    #[test]
    fn test_conv2d_backprop_input_is_adjoint() {
        let filter = ramp(&[5, 5, 3, 4], 0.7);
        for (input_sizes, strides) in [([2, 7, 7, 3], [1, 1]), ([2, 14, 14, 3], [2, 2]), ([1, 9, 6, 3], [2, 3])] {
            let x = ramp(&input_sizes, 0.13);
            let y_shape = ConvGeometry::new("test", &input_sizes, &filter.shape(), strides, Padding::Same)
                .unwrap()
                .output_shape();
            let y = ramp(&y_shape, 0.29);

            let forward = x.conv2d(&filter, strides, Padding::Same).unwrap();
            let backward = CpuTensor::conv2d_backprop_input(&input_sizes, &filter, &y, strides, Padding::Same).unwrap();

            assert_eq!(backward.shape(), input_sizes.to_vec());
            assert_relative_eq!(dot(&forward, &y), dot(&x, &backward), epsilon = 1e-3, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_conv2d_backprop_input_rejects_wrong_gradient_shape() {
        let filter = CpuTensor::<f32>::ones(&[5, 5, 64, 128]);
        let grad = CpuTensor::<f32>::ones(&[1, 14, 14, 128]);
        let result = CpuTensor::conv2d_backprop_input(&[1, 14, 14, 64], &filter, &grad, [2, 2], Padding::Same);
        assert!(matches!(result, Err(Error::IncompatibleShapes { .. })));
    }
}
