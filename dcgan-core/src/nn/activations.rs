use crate::backends::Tensor;

use num_traits::Float;

pub fn leaky_relu<T, B: Tensor<T>>(x: &B, alpha: T) -> B
where
    T: Float,
{
    x.map(|x| if x >= T::zero() { x } else { alpha * x })
}

pub fn sigmoid<T, B: Tensor<T>>(x: &B) -> B
where
    T: Float,
{
    x.map(|x| T::one() / (T::one() + (-x).exp()))
}
