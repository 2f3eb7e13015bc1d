use super::{Graph, NodeId, Op, Output, TensorSpec};
use crate::error::Result;

use std::cell::{Ref, RefCell};
use std::rc::Rc;

/// Handle for adding nodes to a shared [`Graph`] under a name prefix.
///
/// Cloning a scope, or deriving one with [`Scope::with_name`], shares the
/// underlying graph.
#[derive(Debug, Clone)]
pub struct Scope {
    graph: Rc<RefCell<Graph>>,
    prefix: String,
    op_name: Option<String>,
}

impl Scope {
    pub fn new_root() -> Self {
        Self {
            graph: Rc::new(RefCell::new(Graph::new())),
            prefix: String::new(),
            op_name: None,
        }
    }

    /// Sub-scope whose nodes are named `<prefix>/<name>/...`.
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            graph: Rc::clone(&self.graph),
            prefix: self.qualify(name),
            op_name: None,
        }
    }

    /// Scope whose nodes are named `name` instead of their op type. Every node
    /// built through it gets the override, so a helper that adds several nodes
    /// yields `name`, `name_1`, ...
    pub fn with_op_name(&self, name: &str) -> Self {
        Self {
            graph: Rc::clone(&self.graph),
            prefix: self.prefix.clone(),
            op_name: Some(name.to_string()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn graph(&self) -> Ref<'_, Graph> {
        self.graph.borrow()
    }

    pub fn graph_handle(&self) -> Rc<RefCell<Graph>> {
        Rc::clone(&self.graph)
    }

    pub fn spec(&self, output: Output) -> Result<TensorSpec> {
        self.graph.borrow().spec(output).cloned()
    }

    pub fn shape(&self, output: Output) -> Result<Vec<usize>> {
        Ok(self.spec(output)?.shape)
    }

    pub(crate) fn add_node(&self, op: Op, inputs: Vec<Output>) -> Result<NodeId> {
        let base = self.op_name.as_deref().unwrap_or(op.type_name());
        let name = self.qualify(base);
        self.graph.borrow_mut().add_node(&name, op, inputs)
    }

    pub(crate) fn add(&self, op: Op, inputs: Vec<Output>) -> Result<Output> {
        Ok(Output::new(self.add_node(op, inputs)?, 0))
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }
}
