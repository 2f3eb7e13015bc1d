use super::cpu::CpuTensor;
use super::{broadcast_shape, Tensor};
use crate::error::{Error, Result};
use crate::graph::{DType, Graph, Literal, Node, NodeId, Op, Output, Scope};
use crate::nn::activations::leaky_relu;

use ndarray::{ArrayD, IxDyn, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A runtime value of one node output.
#[derive(Debug, Clone)]
pub enum Value<B> {
    Float(B),
    Int(ArrayD<i32>),
    Bool(ArrayD<bool>),
}

impl<B: Tensor<f32>> Value<B> {
    pub fn dtype(&self) -> DType {
        match self {
            Value::Float(_) => DType::Float,
            Value::Int(_) => DType::Int32,
            Value::Bool(_) => DType::Bool,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Float(t) => t.shape(),
            Value::Int(a) => a.shape().to_vec(),
            Value::Bool(a) => a.shape().to_vec(),
        }
    }

    pub fn as_float(&self) -> Result<&B> {
        match self {
            Value::Float(t) => Ok(t),
            other => Err(Error::DType { op: "Value", expected: DType::Float, actual: other.dtype() }),
        }
    }

    pub fn into_float(self) -> Result<B> {
        match self {
            Value::Float(t) => Ok(t),
            other => Err(Error::DType { op: "Value", expected: DType::Float, actual: other.dtype() }),
        }
    }

    pub fn as_int(&self) -> Result<&ArrayD<i32>> {
        match self {
            Value::Int(a) => Ok(a),
            other => Err(Error::DType { op: "Value", expected: DType::Int32, actual: other.dtype() }),
        }
    }

    pub fn as_bool(&self) -> Result<&ArrayD<bool>> {
        match self {
            Value::Bool(a) => Ok(a),
            other => Err(Error::DType { op: "Value", expected: DType::Bool, actual: other.dtype() }),
        }
    }

    /// Scalar float value, for rank 0 results such as losses.
    pub fn scalar(&self) -> Result<f32> {
        let t = self.as_float()?;
        match t.get_data().iter().next() {
            Some(&v) if t.size() == 1 => Ok(v),
            _ => Err(Error::invalid("Value", format!("expected a single element, got shape {:?}", t.shape()))),
        }
    }

    fn to_f32(&self) -> ArrayD<f32> {
        match self {
            Value::Float(t) => t.get_data().clone(),
            Value::Int(a) => a.mapv(|v| v as f32),
            Value::Bool(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
        }
    }
}

/// Evaluates graph nodes on a tensor backend. Variables live in the session
/// and persist across runs.
pub struct Session<B = CpuTensor<f32>> {
    graph: Rc<RefCell<Graph>>,
    variables: HashMap<NodeId, B>,
    rng: StdRng,
}

impl<B: Tensor<f32>> Session<B> {
    pub fn new(scope: &Scope) -> Self {
        Self::with_rng(scope, StdRng::from_entropy())
    }

    pub fn with_seed(scope: &Scope, seed: u64) -> Self {
        Self::with_rng(scope, StdRng::seed_from_u64(seed))
    }

    fn with_rng(scope: &Scope, rng: StdRng) -> Self {
        Self {
            graph: scope.graph_handle(),
            variables: HashMap::new(),
            rng,
        }
    }

    /// Current value of `variable`, if it has been assigned.
    pub fn variable(&self, variable: Output) -> Option<&B> {
        self.variables.get(&variable.node)
    }

    pub fn is_initialized(&self, variable: Output) -> bool {
        self.variables.contains_key(&variable.node)
    }

    /// Runs assign ops (or any other targets) for their side effects.
    pub fn initialize(&mut self, assigns: &[Output]) -> Result<()> {
        self.run(&[], &[], assigns)?;
        tracing::info!(assigns = assigns.len(), variables = self.variables.len(), "initialized variables");
        Ok(())
    }

    pub fn fetch(&mut self, output: Output) -> Result<Value<B>> {
        let mut values = self.run(&[], &[output], &[])?;
        values.pop().ok_or(Error::UnknownOutput(output))
    }

    /// Evaluates every node that `fetches` and `targets` depend on, once, in
    /// node order. Fed outputs replace their node and cut off its inputs.
    pub fn run(&mut self, feeds: &[(Output, Value<B>)], fetches: &[Output], targets: &[Output]) -> Result<Vec<Value<B>>> {
        let graph_handle = Rc::clone(&self.graph);
        let graph = graph_handle.borrow();

        let mut fed = HashMap::new();
        for (output, value) in feeds {
            let spec = graph.spec(*output)?;
            if spec.dtype != value.dtype() || spec.shape != value.shape() {
                return Err(Error::FeedMismatch {
                    name: graph.node(output.node)?.name.clone(),
                    expected: spec.shape.clone(),
                    actual: value.shape(),
                });
            }
            fed.insert(*output, value.clone());
        }
        for output in fed.keys() {
            let node = graph.node(output.node)?;
            if !is_fed(&fed, node, output.node) {
                return Err(Error::invalid(
                    "Session",
                    format!("`{}` has {} outputs and all of them must be fed together", node.name, node.outputs.len()),
                ));
            }
        }

        let mut needed = vec![false; graph.len()];
        let mut stack = Vec::new();
        for output in fetches.iter().chain(targets) {
            graph.spec(*output)?;
            stack.push(output.node);
        }
        while let Some(id) = stack.pop() {
            if needed[id.0] {
                continue;
            }
            needed[id.0] = true;
            if is_fed(&fed, &graph.nodes()[id.0], id) {
                continue;
            }
            stack.extend(data_inputs(&graph.nodes()[id.0]).iter().map(|input| input.node));
        }

        let mut values: HashMap<NodeId, Vec<Value<B>>> = HashMap::new();
        for (i, node) in graph.nodes().iter().enumerate() {
            if !needed[i] {
                continue;
            }
            let id = NodeId(i);

            let outputs = if is_fed(&fed, node, id) {
                (0..node.outputs.len())
                    .map(|index| fed[&Output::new(id, index)].clone())
                    .collect()
            } else {
                let inputs = data_inputs(node)
                    .iter()
                    .map(|input| &values[&input.node][input.index])
                    .collect::<Vec<_>>();
                self.evaluate(id, node, &inputs)?
            };
            values.insert(id, outputs);
        }

        tracing::debug!(
            evaluated = needed.iter().filter(|&&n| n).count(),
            fetches = fetches.len(),
            targets = targets.len(),
            "session run"
        );

        Ok(fetches
            .iter()
            .map(|output| values[&output.node][output.index].clone())
            .collect())
    }

    fn evaluate(&mut self, id: NodeId, node: &Node, inputs: &[&Value<B>]) -> Result<Vec<Value<B>>> {
        let op = node.op.type_name();
        let float = move |i: usize| inputs[i].as_float();

        let value = match &node.op {
            Op::Const(Literal::Float(a)) => Value::Float(B::new(a.clone())),
            Op::Const(Literal::Int(a)) => Value::Int(a.clone()),
            Op::Placeholder { .. } => return Err(Error::MissingFeed(node.name.clone())),
            Op::Variable { .. } => {
                let value = self
                    .variables
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| Error::UninitializedVariable(node.name.clone()))?;
                Value::Float(value)
            }
            Op::Assign => {
                let value = float(0)?.clone();
                self.variables.insert(node.inputs[0].node, value.clone());
                Value::Float(value)
            }
            Op::RandomUniform => {
                let shape = dims(op, inputs[0])?;
                let rng = &mut self.rng;
                Value::Float(B::from_shape_fn(&shape, || rng.gen::<f32>()))
            }
            Op::RandomNormal => {
                let shape = dims(op, inputs[0])?;
                let rng = &mut self.rng;
                Value::Float(B::from_shape_fn(&shape, || rng.sample::<f32, _>(StandardNormal)))
            }
            Op::Shape => {
                let shape = inputs[0].shape();
                let values = shape.iter().map(|&d| d as i32).collect::<Vec<_>>();
                Value::Int(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)?)
            }
            Op::ZerosLike | Op::OnesLike => {
                let ones = matches!(node.op, Op::OnesLike);
                let shape = inputs[0].shape();
                match inputs[0] {
                    Value::Float(_) if ones => Value::Float(B::ones(&shape)),
                    Value::Float(_) => Value::Float(B::zeros(&shape)),
                    Value::Int(_) => Value::Int(ArrayD::from_elem(IxDyn(&shape), i32::from(ones))),
                    Value::Bool(_) => Value::Bool(ArrayD::from_elem(IxDyn(&shape), ones)),
                }
            }
            Op::BroadcastTo { shape } => {
                let incompatible = || Error::IncompatibleShapes {
                    op,
                    lhs: inputs[0].shape(),
                    rhs: shape.clone(),
                };
                match inputs[0] {
                    Value::Float(t) => Value::Float(t.broadcast_to(shape)?),
                    Value::Int(a) => Value::Int(a.broadcast(IxDyn(shape)).ok_or_else(incompatible)?.to_owned()),
                    Value::Bool(a) => Value::Bool(a.broadcast(IxDyn(shape)).ok_or_else(incompatible)?.to_owned()),
                }
            }
            Op::Cast { to } => match to {
                DType::Float => Value::Float(B::new(inputs[0].to_f32())),
                DType::Int32 => Value::Int(inputs[0].to_f32().mapv(|v| v as i32)),
                DType::Bool => Value::Bool(inputs[0].to_f32().mapv(|v| v != 0.0)),
            },
            Op::Add => Value::Float(float(0)?.add(float(1)?)?),
            Op::Sub => Value::Float(float(0)?.sub(float(1)?)?),
            Op::Mul => Value::Float(float(0)?.mul(float(1)?)?),
            Op::Div => Value::Float(float(0)?.div(float(1)?)?),
            Op::BiasAdd => Value::Float(float(0)?.add(float(1)?)?),
            Op::Negate => Value::Float(float(0)?.neg()),
            Op::Rsqrt => Value::Float(float(0)?.rsqrt()),
            Op::Exp => Value::Float(float(0)?.exp()),
            Op::Log1p => Value::Float(float(0)?.log1p()),
            Op::Floor => Value::Float(float(0)?.floor()),
            Op::LeakyRelu { alpha } => Value::Float(leaky_relu(float(0)?, *alpha)),
            Op::GreaterEqual => Value::Bool(greater_equal(float(0)?, float(1)?)?),
            Op::SelectV2 => Value::Float(B::select(inputs[0].as_bool()?, float(1)?, float(2)?)?),
            Op::MatMul => Value::Float(float(0)?.matmul(float(1)?)?),
            Op::Reshape { shape } => match inputs[0] {
                Value::Float(t) => Value::Float(t.reshape(shape)?),
                Value::Int(a) => Value::Int(a.as_standard_layout().into_owned().into_shape(IxDyn(shape))?),
                Value::Bool(a) => Value::Bool(a.as_standard_layout().into_owned().into_shape(IxDyn(shape))?),
            },
            Op::Conv2D { strides, padding } => Value::Float(float(0)?.conv2d(float(1)?, [strides[1], strides[2]], *padding)?),
            Op::Conv2DBackpropInput { strides, padding } => {
                let input_sizes = dims(op, inputs[0])?;
                Value::Float(B::conv2d_backprop_input(
                    &input_sizes,
                    float(1)?,
                    float(2)?,
                    [strides[1], strides[2]],
                    *padding,
                )?)
            }
            Op::FusedBatchNorm { epsilon, is_training } => {
                return fused_batch_norm(
                    [float(0)?, float(1)?, float(2)?, float(3)?, float(4)?],
                    *epsilon,
                    *is_training,
                );
            }
            Op::Mean => Value::Float(float(0)?.mean()),
        };

        Ok(vec![value])
    }
}

/// Inputs whose values a node reads. The target of an `Assign` is written,
/// not read.
fn data_inputs(node: &Node) -> &[Output] {
    match node.op {
        Op::Assign => &node.inputs[1..],
        _ => &node.inputs,
    }
}

fn is_fed<B>(fed: &HashMap<Output, Value<B>>, node: &Node, id: NodeId) -> bool {
    !node.outputs.is_empty() && (0..node.outputs.len()).all(|index| fed.contains_key(&Output::new(id, index)))
}

fn dims<B: Tensor<f32>>(op: &'static str, value: &Value<B>) -> Result<Vec<usize>> {
    value
        .as_int()?
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| Error::invalid(op, format!("negative dimension {d}"))))
        .collect()
}

fn greater_equal<B: Tensor<f32>>(lhs: &B, rhs: &B) -> Result<ArrayD<bool>> {
    let shape = broadcast_shape("GreaterEqual", &lhs.shape(), &rhs.shape())?;
    let incompatible = || Error::IncompatibleShapes {
        op: "GreaterEqual",
        lhs: lhs.shape(),
        rhs: rhs.shape(),
    };
    let a = lhs.get_data().broadcast(shape.as_slice()).ok_or_else(incompatible)?;
    let b = rhs.get_data().broadcast(shape.as_slice()).ok_or_else(incompatible)?;
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| x >= y))
}

/// `y = (x - mean) * rsqrt(variance + epsilon) * scale + offset` per channel.
/// In training mode the statistics come from the batch and the returned
/// variance is Bessel corrected.
fn fused_batch_norm<B: Tensor<f32>>(inputs: [&B; 5], epsilon: f32, is_training: bool) -> Result<Vec<Value<B>>> {
    let [x, scale, offset, mean, variance] = inputs;

    let (mean, variance, reported_variance) = if is_training {
        let (mean, variance) = x.moments()?;
        let channels = variance.size().max(1);
        let n = (x.size() / channels) as f32;
        let corrected = if n > 1.0 { variance.map(|v| v * n / (n - 1.0)) } else { variance.clone() };
        (mean, variance, corrected)
    } else {
        (mean.clone(), variance.clone(), variance.clone())
    };

    let inv = variance.map(|v| v + epsilon).rsqrt().mul(scale)?;
    let y = x.sub(&mean)?.mul(&inv)?.add(offset)?;

    Ok(vec![Value::Float(y), Value::Float(mean), Value::Float(reported_variance)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_variables_persist_across_runs() {
        let scope = Scope::new_root();
        let w = ops::variable(&scope, &[2]).unwrap();
        let init = ops::vector(&scope, &[1.0, 2.0]).unwrap();
        let assign = ops::assign(&scope, w, init).unwrap();
        let doubled = ops::add(&scope, w, w).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        assert!(matches!(session.fetch(doubled), Err(Error::UninitializedVariable(_))));

        session.initialize(&[assign]).unwrap();
        assert!(session.is_initialized(w));
        let out = session.fetch(doubled).unwrap().into_float().unwrap();
        assert_eq!(out.data, array![2.0f32, 4.0].into_dyn());
    }

    #[test]
    fn test_placeholder_feeds() {
        let scope = Scope::new_root();
        let x = ops::placeholder(&scope.with_op_name("x"), &[2, 2]).unwrap();
        let y = ops::negate(&scope, x).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        assert!(matches!(session.fetch(y), Err(Error::MissingFeed(name)) if name == "x"));

        let wrong = Value::Float(CpuTensor::zeros(&[3]));
        assert!(matches!(session.run(&[(x, wrong)], &[y], &[]), Err(Error::FeedMismatch { .. })));

        let fed = Value::Float(CpuTensor::new(array![[1.0f32, -2.0], [0.0, 3.0]].into_dyn()));
        let out = session.run(&[(x, fed)], &[y], &[]).unwrap();
        assert_eq!(out[0].as_float().unwrap().data, array![[-1.0f32, 2.0], [-0.0, -3.0]].into_dyn());
    }

    #[test]
    fn test_random_ops_are_seeded() {
        let scope = Scope::new_root();
        let dims = ops::shape_const(&scope, &[3, 4]).unwrap();
        let noise = ops::random_normal(&scope, dims).unwrap();
        let uniform = ops::random_uniform(&scope, dims).unwrap();

        let mut first: Session = Session::with_seed(&scope, 7);
        let mut second: Session = Session::with_seed(&scope, 7);
        let a = first.run(&[], &[noise, uniform], &[]).unwrap();
        let b = second.run(&[], &[noise, uniform], &[]).unwrap();
        assert_eq!(a[0].as_float().unwrap().data, b[0].as_float().unwrap().data);

        let u = a[1].as_float().unwrap();
        assert_eq!(u.shape(), vec![3, 4]);
        assert!(u.data.iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_fused_batch_norm_normalizes_each_channel() {
        let scope = Scope::new_root();
        let x = ops::placeholder(&scope, &[2, 1, 1, 2]).unwrap();
        let scale = ops::vector(&scope, &[1.0, 2.0]).unwrap();
        let offset = ops::vector(&scope, &[0.0, 1.0]).unwrap();
        let empty = ops::vector(&scope, &[]).unwrap();
        let bn = ops::fused_batch_norm(&scope, x, scale, offset, empty, empty, 0.0, true).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        let fed = Value::Float(CpuTensor::new(ArrayD::from_shape_vec(IxDyn(&[2, 1, 1, 2]), vec![1.0f32, 5.0, 3.0, 9.0]).unwrap()));
        let out = session.run(&[(x, fed)], &[bn.y, bn.batch_mean, bn.batch_variance], &[]).unwrap();

        let y = out[0].as_float().unwrap();
        assert_abs_diff_eq!(y.data[[0, 0, 0, 0]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y.data[[1, 0, 0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y.data[[0, 0, 0, 1]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y.data[[1, 0, 0, 1]], 3.0, epsilon = 1e-6);
        assert_eq!(out[1].as_float().unwrap().data, array![2.0f32, 7.0].into_dyn());
        assert_eq!(out[2].as_float().unwrap().data, array![2.0f32, 8.0].into_dyn());
    }

    #[test]
    fn test_initialize_does_not_read_the_target() {
        let scope = Scope::new_root();
        let w = ops::variable(&scope, &[2, 3]).unwrap();
        let dims = ops::shape_const(&scope, &[2, 3]).unwrap();
        let init = ops::mul(&scope, ops::random_normal(&scope, dims).unwrap(), ops::scalar(&scope, 0.01).unwrap()).unwrap();
        let assign = ops::assign(&scope, w, init).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        session.initialize(&[assign]).unwrap();

        let stored = session.variable(w).unwrap().clone();
        let fetched = session.fetch(w).unwrap().into_float().unwrap();
        assert_eq!(fetched.shape(), vec![2, 3]);
        assert_eq!(fetched.data, stored.data);
        assert!(fetched.data.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_fused_batch_norm_inference_uses_given_statistics() {
        let scope = Scope::new_root();
        let x = ops::placeholder(&scope, &[2, 1, 1, 2]).unwrap();
        let scale = ops::vector(&scope, &[1.0, 2.0]).unwrap();
        let offset = ops::vector(&scope, &[0.0, 1.0]).unwrap();
        let mean = ops::vector(&scope, &[1.0, 3.0]).unwrap();
        let variance = ops::vector(&scope, &[4.0, 1.0]).unwrap();
        let bn = ops::fused_batch_norm(&scope, x, scale, offset, mean, variance, 0.0, false).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        let fed = Value::Float(CpuTensor::new(ArrayD::from_shape_vec(IxDyn(&[2, 1, 1, 2]), vec![1.0f32, 5.0, 3.0, 9.0]).unwrap()));
        let out = session.run(&[(x, fed)], &[bn.y, bn.batch_mean, bn.batch_variance], &[]).unwrap();

        let y = out[0].as_float().unwrap();
        assert_abs_diff_eq!(y.data[[0, 0, 0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y.data[[1, 0, 0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y.data[[0, 0, 0, 1]], 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y.data[[1, 0, 0, 1]], 13.0, epsilon = 1e-6);
        assert_eq!(out[1].as_float().unwrap().data, array![1.0f32, 3.0].into_dyn());
        assert_eq!(out[2].as_float().unwrap().data, array![4.0f32, 1.0].into_dyn());
    }

    #[test]
    fn test_multi_output_node_must_be_fed_whole() {
        let scope = Scope::new_root();
        let x = ops::zeros(&scope, &[2, 1, 1, 2]).unwrap();
        let ones = ops::vector(&scope, &[1.0, 1.0]).unwrap();
        let empty = ops::vector(&scope, &[]).unwrap();
        let bn = ops::fused_batch_norm(&scope, x, ones, ones, empty, empty, 0.001, true).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        let mean = Value::Float(CpuTensor::zeros(&[2]));
        let partial = session.run(&[(bn.batch_mean, mean.clone())], &[bn.batch_mean], &[]);
        assert!(matches!(partial, Err(Error::InvalidArgument { .. })));

        let y = Value::Float(CpuTensor::ones(&[2, 1, 1, 2]));
        let variance = Value::Float(CpuTensor::ones(&[2]));
        let out = session.run(&[(bn.y, y), (bn.batch_mean, mean), (bn.batch_variance, variance)], &[bn.y], &[]).unwrap();
        assert!(out[0].as_float().unwrap().data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_only_needed_nodes_are_evaluated() {
        let scope = Scope::new_root();
        let unfed = ops::placeholder(&scope, &[1]).unwrap();
        ops::negate(&scope, unfed).unwrap();
        let one = ops::scalar(&scope, 1.0).unwrap();

        let mut session: Session = Session::with_seed(&scope, 0);
        assert_eq!(session.fetch(one).unwrap().scalar().unwrap(), 1.0);
    }
}
