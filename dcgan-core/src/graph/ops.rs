//! Builders for primitive ops. Each call appends one node to the scope's graph.

use super::{DType, Literal, Op, Output, Scope};
use crate::backends::Padding;
use crate::error::Result;

use ndarray::{arr0, ArrayD, IxDyn};

pub fn constant(scope: &Scope, value: Literal) -> Result<Output> {
    scope.add(Op::Const(value), vec![])
}

/// Rank 0 float constant.
pub fn scalar(scope: &Scope, value: f32) -> Result<Output> {
    constant(scope, Literal::Float(arr0(value).into_dyn()))
}

/// Rank 1 float constant; `&[]` gives an empty vector.
pub fn vector(scope: &Scope, values: &[f32]) -> Result<Output> {
    constant(scope, Literal::Float(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())?))
}

/// Rank 1 int32 constant, typically a shape.
pub fn int_vector(scope: &Scope, values: &[i32]) -> Result<Output> {
    constant(scope, Literal::Int(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())?))
}

/// Int32 shape constant from dimensions.
pub fn shape_const(scope: &Scope, dims: &[usize]) -> Result<Output> {
    let values = dims.iter().map(|&d| d as i32).collect::<Vec<_>>();
    int_vector(scope, &values)
}

pub fn fill(scope: &Scope, value: f32, shape: &[usize]) -> Result<Output> {
    constant(scope, Literal::Float(ArrayD::from_elem(IxDyn(shape), value)))
}

pub fn zeros(scope: &Scope, shape: &[usize]) -> Result<Output> {
    fill(scope, 0.0, shape)
}

pub fn placeholder(scope: &Scope, shape: &[usize]) -> Result<Output> {
    scope.add(Op::Placeholder { shape: shape.to_vec() }, vec![])
}

pub fn variable(scope: &Scope, shape: &[usize]) -> Result<Output> {
    scope.add(Op::Variable { shape: shape.to_vec() }, vec![])
}

pub fn assign(scope: &Scope, variable: Output, value: Output) -> Result<Output> {
    scope.add(Op::Assign, vec![variable, value])
}

pub fn random_uniform(scope: &Scope, shape: Output) -> Result<Output> {
    scope.add(Op::RandomUniform, vec![shape])
}

pub fn random_normal(scope: &Scope, shape: Output) -> Result<Output> {
    scope.add(Op::RandomNormal, vec![shape])
}

pub fn shape(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::Shape, vec![x])
}

pub fn zeros_like(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::ZerosLike, vec![x])
}

pub fn ones_like(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::OnesLike, vec![x])
}

pub fn broadcast_to(scope: &Scope, x: Output, shape: &[usize]) -> Result<Output> {
    scope.add(Op::BroadcastTo { shape: shape.to_vec() }, vec![x])
}

pub fn cast(scope: &Scope, x: Output, to: DType) -> Result<Output> {
    scope.add(Op::Cast { to }, vec![x])
}

pub fn add(scope: &Scope, x: Output, y: Output) -> Result<Output> {
    scope.add(Op::Add, vec![x, y])
}

pub fn sub(scope: &Scope, x: Output, y: Output) -> Result<Output> {
    scope.add(Op::Sub, vec![x, y])
}

pub fn mul(scope: &Scope, x: Output, y: Output) -> Result<Output> {
    scope.add(Op::Mul, vec![x, y])
}

pub fn div(scope: &Scope, x: Output, y: Output) -> Result<Output> {
    scope.add(Op::Div, vec![x, y])
}

pub fn negate(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::Negate, vec![x])
}

pub fn rsqrt(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::Rsqrt, vec![x])
}

pub fn exp(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::Exp, vec![x])
}

pub fn log1p(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::Log1p, vec![x])
}

pub fn floor(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::Floor, vec![x])
}

pub fn greater_equal(scope: &Scope, x: Output, y: Output) -> Result<Output> {
    scope.add(Op::GreaterEqual, vec![x, y])
}

pub fn select_v2(scope: &Scope, cond: Output, on_true: Output, on_false: Output) -> Result<Output> {
    scope.add(Op::SelectV2, vec![cond, on_true, on_false])
}

pub fn leaky_relu(scope: &Scope, x: Output, alpha: f32) -> Result<Output> {
    scope.add(Op::LeakyRelu { alpha }, vec![x])
}

pub fn matmul(scope: &Scope, a: Output, b: Output) -> Result<Output> {
    scope.add(Op::MatMul, vec![a, b])
}

pub fn bias_add(scope: &Scope, value: Output, bias: Output) -> Result<Output> {
    scope.add(Op::BiasAdd, vec![value, bias])
}

pub fn reshape(scope: &Scope, x: Output, shape: &[usize]) -> Result<Output> {
    scope.add(Op::Reshape { shape: shape.to_vec() }, vec![x])
}

pub fn conv2d(scope: &Scope, input: Output, filter: Output, strides: [usize; 4], padding: Padding) -> Result<Output> {
    scope.add(Op::Conv2D { strides, padding }, vec![input, filter])
}

pub fn conv2d_backprop_input(
    scope: &Scope,
    input_sizes: Output,
    filter: Output,
    out_backprop: Output,
    strides: [usize; 4],
    padding: Padding,
) -> Result<Output> {
    scope.add(Op::Conv2DBackpropInput { strides, padding }, vec![input_sizes, filter, out_backprop])
}

#[derive(Debug, Clone, Copy)]
pub struct FusedBatchNorm {
    pub y: Output,
    pub batch_mean: Output,
    pub batch_variance: Output,
}

#[allow(clippy::too_many_arguments)]
pub fn fused_batch_norm(
    scope: &Scope,
    x: Output,
    scale: Output,
    offset: Output,
    mean: Output,
    variance: Output,
    epsilon: f32,
    is_training: bool,
) -> Result<FusedBatchNorm> {
    let node = scope.add_node(Op::FusedBatchNorm { epsilon, is_training }, vec![x, scale, offset, mean, variance])?;
    Ok(FusedBatchNorm {
        y: Output::new(node, 0),
        batch_mean: Output::new(node, 1),
        batch_variance: Output::new(node, 2),
    })
}

pub fn mean(scope: &Scope, x: Output) -> Result<Output> {
    scope.add(Op::Mean, vec![x])
}
