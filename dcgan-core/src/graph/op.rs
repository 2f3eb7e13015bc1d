use super::{DType, Graph, Literal, Output, TensorSpec};
use crate::backends::{broadcast_shape, ConvGeometry, Padding};
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Primitive graph operations. Image tensors are NHWC, filters HWIO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Const(Literal),
    Placeholder { shape: Vec<usize> },
    Variable { shape: Vec<usize> },
    /// `(variable, value)`; stores `value` in `variable` and yields it.
    Assign,
    /// `(shape)`; uniform samples in `[0, 1)`.
    RandomUniform,
    /// `(shape)`; standard normal samples.
    RandomNormal,
    Shape,
    ZerosLike,
    OnesLike,
    BroadcastTo { shape: Vec<usize> },
    Cast { to: DType },
    Add,
    Sub,
    Mul,
    Div,
    Negate,
    Rsqrt,
    Exp,
    Log1p,
    Floor,
    GreaterEqual,
    /// `(cond, on_true, on_false)`, broadcasting all three.
    SelectV2,
    LeakyRelu { alpha: f32 },
    MatMul,
    BiasAdd,
    Reshape { shape: Vec<usize> },
    Conv2D { strides: [usize; 4], padding: Padding },
    /// `(input_sizes, filter, out_backprop)`; gradient of `Conv2D` with
    /// respect to its input.
    Conv2DBackpropInput { strides: [usize; 4], padding: Padding },
    /// `(x, scale, offset, mean, variance)` → `(y, batch_mean, batch_variance)`.
    FusedBatchNorm { epsilon: f32, is_training: bool },
    /// Mean over every element.
    Mean,
}

impl Op {
    pub fn type_name(&self) -> &'static str {
        match self {
            Op::Const(_) => "Const",
            Op::Placeholder { .. } => "Placeholder",
            Op::Variable { .. } => "Variable",
            Op::Assign => "Assign",
            Op::RandomUniform => "RandomUniform",
            Op::RandomNormal => "RandomNormal",
            Op::Shape => "Shape",
            Op::ZerosLike => "ZerosLike",
            Op::OnesLike => "OnesLike",
            Op::BroadcastTo { .. } => "BroadcastTo",
            Op::Cast { .. } => "Cast",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::Negate => "Negate",
            Op::Rsqrt => "Rsqrt",
            Op::Exp => "Exp",
            Op::Log1p => "Log1p",
            Op::Floor => "Floor",
            Op::GreaterEqual => "GreaterEqual",
            Op::SelectV2 => "SelectV2",
            Op::LeakyRelu { .. } => "LeakyRelu",
            Op::MatMul => "MatMul",
            Op::BiasAdd => "BiasAdd",
            Op::Reshape { .. } => "Reshape",
            Op::Conv2D { .. } => "Conv2D",
            Op::Conv2DBackpropInput { .. } => "Conv2DBackpropInput",
            Op::FusedBatchNorm { .. } => "FusedBatchNorm",
            Op::Mean => "Mean",
        }
    }

    /// Output types of this op applied to `inputs` in `graph`.
    pub(crate) fn infer(&self, graph: &Graph, inputs: &[Output]) -> Result<Vec<TensorSpec>> {
        let op = self.type_name();
        let spec = move |i: usize| graph.spec(inputs[i]);

        match self {
            Op::Const(literal) => {
                arity(op, inputs, 0)?;
                Ok(vec![literal.spec()])
            }
            Op::Placeholder { shape } | Op::Variable { shape } => {
                arity(op, inputs, 0)?;
                Ok(vec![TensorSpec::float(shape.clone())])
            }
            Op::Assign => {
                arity(op, inputs, 2)?;
                let target = graph.node(inputs[0].node)?;
                if !matches!(target.op, Op::Variable { .. }) {
                    return Err(Error::invalid(op, format!("`{}` is not a variable", target.name)));
                }
                let (variable, value) = (spec(0)?, spec(1)?);
                expect_dtype(op, value, variable.dtype)?;
                if variable.shape != value.shape {
                    return Err(Error::IncompatibleShapes {
                        op,
                        lhs: variable.shape.clone(),
                        rhs: value.shape.clone(),
                    });
                }
                Ok(vec![variable.clone()])
            }
            Op::RandomUniform | Op::RandomNormal => {
                arity(op, inputs, 1)?;
                Ok(vec![TensorSpec::float(graph.constant_shape(op, inputs[0])?)])
            }
            Op::Shape => {
                arity(op, inputs, 1)?;
                Ok(vec![TensorSpec::new(DType::Int32, [spec(0)?.rank()])])
            }
            Op::ZerosLike | Op::OnesLike => {
                arity(op, inputs, 1)?;
                Ok(vec![spec(0)?.clone()])
            }
            Op::BroadcastTo { shape } => {
                arity(op, inputs, 1)?;
                let input = spec(0)?;
                let broadcast = broadcast_shape(op, &input.shape, shape)?;
                if &broadcast != shape {
                    return Err(Error::IncompatibleShapes {
                        op,
                        lhs: input.shape.clone(),
                        rhs: shape.clone(),
                    });
                }
                Ok(vec![TensorSpec::new(input.dtype, shape.clone())])
            }
            Op::Cast { to } => {
                arity(op, inputs, 1)?;
                Ok(vec![TensorSpec::new(*to, spec(0)?.shape.clone())])
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::GreaterEqual => {
                arity(op, inputs, 2)?;
                let (lhs, rhs) = (float(op, spec(0)?)?, float(op, spec(1)?)?);
                let shape = broadcast_shape(op, &lhs.shape, &rhs.shape)?;
                let dtype = if matches!(self, Op::GreaterEqual) { DType::Bool } else { DType::Float };
                Ok(vec![TensorSpec::new(dtype, shape)])
            }
            Op::Negate | Op::Rsqrt | Op::Exp | Op::Log1p | Op::Floor | Op::LeakyRelu { .. } => {
                arity(op, inputs, 1)?;
                Ok(vec![float(op, spec(0)?)?.clone()])
            }
            Op::SelectV2 => {
                arity(op, inputs, 3)?;
                let cond = expect_dtype(op, spec(0)?, DType::Bool)?;
                let (on_true, on_false) = (float(op, spec(1)?)?, float(op, spec(2)?)?);
                let branches = broadcast_shape(op, &on_true.shape, &on_false.shape)?;
                Ok(vec![TensorSpec::float(broadcast_shape(op, &cond.shape, &branches)?)])
            }
            Op::MatMul => {
                arity(op, inputs, 2)?;
                let (a, b) = (float(op, spec(0)?)?, float(op, spec(1)?)?);
                rank(op, a, 2)?;
                rank(op, b, 2)?;
                if a.shape[1] != b.shape[0] {
                    return Err(Error::IncompatibleShapes {
                        op,
                        lhs: a.shape.clone(),
                        rhs: b.shape.clone(),
                    });
                }
                Ok(vec![TensorSpec::float([a.shape[0], b.shape[1]])])
            }
            Op::BiasAdd => {
                arity(op, inputs, 2)?;
                let (value, bias) = (float(op, spec(0)?)?, float(op, spec(1)?)?);
                if value.rank() < 2 {
                    return Err(Error::invalid(op, format!("value must be at least rank 2, got shape {:?}", value.shape)));
                }
                rank(op, bias, 1)?;
                if value.shape.last() != bias.shape.first() {
                    return Err(Error::IncompatibleShapes {
                        op,
                        lhs: value.shape.clone(),
                        rhs: bias.shape.clone(),
                    });
                }
                Ok(vec![value.clone()])
            }
            Op::Reshape { shape } => {
                arity(op, inputs, 1)?;
                let input = spec(0)?;
                if input.num_elements() != shape.iter().product::<usize>() {
                    return Err(Error::IncompatibleShapes {
                        op,
                        lhs: input.shape.clone(),
                        rhs: shape.clone(),
                    });
                }
                Ok(vec![TensorSpec::new(input.dtype, shape.clone())])
            }
            Op::Conv2D { strides, padding } => {
                arity(op, inputs, 2)?;
                let (input, filter) = (float(op, spec(0)?)?, float(op, spec(1)?)?);
                let geometry = ConvGeometry::new(op, &input.shape, &filter.shape, spatial_strides(op, *strides)?, *padding)?;
                Ok(vec![TensorSpec::float(geometry.output_shape())])
            }
            Op::Conv2DBackpropInput { strides, padding } => {
                arity(op, inputs, 3)?;
                let input_sizes = graph.constant_shape(op, inputs[0])?;
                let (filter, out_backprop) = (float(op, spec(1)?)?, float(op, spec(2)?)?);
                let geometry = ConvGeometry::new(op, &input_sizes, &filter.shape, spatial_strides(op, *strides)?, *padding)?;
                if out_backprop.shape != geometry.output_shape() {
                    return Err(Error::IncompatibleShapes {
                        op,
                        lhs: out_backprop.shape.clone(),
                        rhs: geometry.output_shape().to_vec(),
                    });
                }
                Ok(vec![TensorSpec::float(input_sizes)])
            }
            Op::FusedBatchNorm { epsilon, is_training } => {
                arity(op, inputs, 5)?;
                if *epsilon < 0.0 {
                    return Err(Error::invalid(op, format!("epsilon must be non-negative, got {epsilon}")));
                }
                let x = float(op, spec(0)?)?;
                rank(op, x, 4)?;
                let channels = x.shape[3];

                for i in 1..5 {
                    let param = float(op, spec(i)?)?;
                    let stats = i >= 3;
                    let accepted = param.shape == [channels] || (stats && *is_training && param.num_elements() == 0);
                    if !accepted {
                        return Err(Error::IncompatibleShapes {
                            op,
                            lhs: x.shape.clone(),
                            rhs: param.shape.clone(),
                        });
                    }
                }

                Ok(vec![x.clone(), TensorSpec::float([channels]), TensorSpec::float([channels])])
            }
            Op::Mean => {
                arity(op, inputs, 1)?;
                float(op, spec(0)?)?;
                Ok(vec![TensorSpec::float(Vec::new())])
            }
        }
    }
}

fn arity(op: &'static str, inputs: &[Output], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(Error::Arity { op, expected, actual: inputs.len() });
    }
    Ok(())
}

fn expect_dtype<'a>(op: &'static str, spec: &'a TensorSpec, expected: DType) -> Result<&'a TensorSpec> {
    if spec.dtype != expected {
        return Err(Error::DType { op, expected, actual: spec.dtype });
    }
    Ok(spec)
}

fn float<'a>(op: &'static str, spec: &'a TensorSpec) -> Result<&'a TensorSpec> {
    expect_dtype(op, spec, DType::Float)
}

fn rank(op: &'static str, spec: &TensorSpec, expected: usize) -> Result<()> {
    if spec.rank() != expected {
        return Err(Error::Rank { op, expected, shape: spec.shape.clone() });
    }
    Ok(())
}

/// `[1, height, width, 1]` strides down to `[height, width]`.
fn spatial_strides(op: &'static str, strides: [usize; 4]) -> Result<[usize; 2]> {
    if strides[0] != 1 || strides[3] != 1 || strides[1] == 0 || strides[2] == 0 {
        return Err(Error::invalid(op, format!("strides must be [1, h, w, 1] with h, w > 0, got {strides:?}")));
    }
    Ok([strides[1], strides[2]])
}
