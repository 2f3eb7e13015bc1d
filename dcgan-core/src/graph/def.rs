use super::{Graph, Op, TensorSpec};
use crate::error::Result;

use serde::{Deserialize, Serialize};

use std::path::Path;

/// Serializable snapshot of a graph; inputs are written as `node_name:index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub nodes: Vec<NodeDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: Op,
    pub inputs: Vec<String>,
    pub outputs: Vec<TensorSpec>,
}

impl GraphDef {
    pub fn from_graph(graph: &Graph) -> Self {
        let nodes = graph.nodes();
        let nodes = nodes
            .iter()
            .map(|node| NodeDef {
                name: node.name.clone(),
                op: node.op.clone(),
                inputs: node
                    .inputs
                    .iter()
                    .map(|input| format!("{}:{}", nodes[input.node.0].name, input.index))
                    .collect(),
                outputs: node.outputs.clone(),
            })
            .collect();
        Self { nodes }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn count_ops(&self, op_type: &str) -> usize {
        self.nodes.iter().filter(|node| node.op.type_name() == op_type).count()
    }
}
