//! Symbolic computation graphs.
//!
//! A [`Graph`] is an append-only arena of [`Node`]s. Nodes are added through a
//! [`Scope`] by the builders in [`ops`]; each builder infers the dtype and
//! shape of its outputs before the node is appended, so a graph only ever
//! holds nodes whose inputs line up. Node ids therefore form a topological
//! order.

pub mod def;
pub mod op;
pub mod ops;
pub mod scope;

pub use def::{GraphDef, NodeDef};
pub use op::Op;
pub use scope::Scope;

use crate::error::{Error, Result};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Float,
    Int32,
    Bool,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Float => write!(f, "float"),
            DType::Int32 => write!(f, "int32"),
            DType::Bool => write!(f, "bool"),
        }
    }
}

/// Statically known type of one node output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        Self { dtype, shape: shape.into() }
    }

    pub fn float(shape: impl Into<Vec<usize>>) -> Self {
        Self::new(DType::Float, shape)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// One output of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    pub node: NodeId,
    pub index: usize,
}

impl Output {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node.0, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Float(ArrayD<f32>),
    Int(ArrayD<i32>),
}

impl Literal {
    pub fn spec(&self) -> TensorSpec {
        match self {
            Literal::Float(a) => TensorSpec::new(DType::Float, a.shape()),
            Literal::Int(a) => TensorSpec::new(DType::Int32, a.shape()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: Op,
    pub inputs: Vec<Output>,
    pub outputs: Vec<TensorSpec>,
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    names: HashMap<String, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::UnknownOutput(Output::new(id, 0)))
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn spec(&self, output: Output) -> Result<&TensorSpec> {
        self.nodes
            .get(output.node.0)
            .and_then(|node| node.outputs.get(output.index))
            .ok_or(Error::UnknownOutput(output))
    }

    pub fn variables(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node.op, Op::Variable { .. }))
            .map(|(i, node)| (NodeId(i), node))
    }

    /// Value of an int32 tensor when it is known while the graph is built:
    /// int constants and the `Shape` of a fully typed tensor.
    pub fn constant_value(&self, output: Output) -> Option<Vec<i64>> {
        let node = self.nodes.get(output.node.0)?;
        match &node.op {
            Op::Const(Literal::Int(values)) => Some(values.iter().map(|&v| v as i64).collect()),
            Op::Shape => {
                let input = self.spec(*node.inputs.first()?).ok()?;
                Some(input.shape.iter().map(|&d| d as i64).collect())
            }
            _ => None,
        }
    }

    /// Reads a constant int32 vector as a shape.
    pub(crate) fn constant_shape(&self, op: &'static str, output: Output) -> Result<Vec<usize>> {
        let spec = self.spec(output)?;
        if spec.dtype != DType::Int32 {
            return Err(Error::DType { op, expected: DType::Int32, actual: spec.dtype });
        }
        if spec.rank() != 1 {
            return Err(Error::Rank { op, expected: 1, shape: spec.shape.clone() });
        }
        let values = self
            .constant_value(output)
            .ok_or_else(|| Error::invalid(op, "shape input must be known while the graph is built"))?;
        values
            .into_iter()
            .map(|v| usize::try_from(v).map_err(|_| Error::invalid(op, format!("negative dimension {v}"))))
            .collect()
    }

    /// Unique node name derived from `base`: `base`, `base_1`, `base_2`, ...
    /// skipping any suffix already taken by an explicitly named node.
    pub(crate) fn unique_name(&mut self, base: &str) -> String {
        let mut count = self.names.get(base).copied().unwrap_or(0);
        let name = loop {
            let candidate = if count == 0 { base.to_string() } else { format!("{base}_{count}") };
            count += 1;
            if !self.names.contains_key(&candidate) {
                break candidate;
            }
        };
        self.names.insert(base.to_string(), count);
        self.names.entry(name.clone()).or_insert(1);
        name
    }

    /// Infers the outputs of `op` and appends it. Nothing is appended on error.
    pub(crate) fn add_node(&mut self, name: &str, op: Op, inputs: Vec<Output>) -> Result<NodeId> {
        for &input in &inputs {
            self.spec(input)?;
        }

        let outputs = match op.infer(self, &inputs) {
            Ok(outputs) => outputs,
            Err(err) => {
                tracing::warn!(node = name, op = op.type_name(), error = %err, "rejected node");
                return Err(err);
            }
        };

        let name = self.unique_name(name);
        let id = NodeId(self.nodes.len());
        tracing::debug!(node = %name, op = op.type_name(), outputs = ?outputs.iter().map(|o| &o.shape).collect::<Vec<_>>(), "built node");

        self.nodes.push(Node { name, op, inputs, outputs });
        Ok(id)
    }

    pub fn to_graph_def(&self) -> GraphDef {
        GraphDef::from_graph(self)
    }
}
