use dcgan_core::graph::{ops, Output, Scope};
use dcgan_core::Result;

/// A trainable variable with its initializer and Adam moment slots.
///
/// The moments `m` and `v` start at zero and are not updated by anything in
/// this crate.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub shape: Vec<usize>,
    pub variable: Output,
    pub assign: Output,
    pub m: Output,
    pub assign_m: Output,
    pub v: Output,
    pub assign_v: Output,
}

impl Parameter {
    /// Declares `name`, `name_m` and `name_v` in `scope`, shaped like `initial`.
    pub fn new(scope: &Scope, name: &str, initial: Output) -> Result<Self> {
        let shape = scope.shape(initial)?;

        let variable = ops::variable(&scope.with_op_name(name), &shape)?;
        let assign = ops::assign(&scope.with_op_name(&format!("{name}/init")), variable, initial)?;

        let (m, assign_m) = Self::moment(scope, &format!("{name}_m"), &shape)?;
        let (v, assign_v) = Self::moment(scope, &format!("{name}_v"), &shape)?;

        Ok(Self {
            name: scope.graph().node(variable.node)?.name.clone(),
            shape,
            variable,
            assign,
            m,
            assign_m,
            v,
            assign_v,
        })
    }

    fn moment(scope: &Scope, name: &str, shape: &[usize]) -> Result<(Output, Output)> {
        let slot = ops::variable(&scope.with_op_name(name), shape)?;
        let zeros = ops::broadcast_to(scope, ops::scalar(scope, 0.0)?, shape)?;
        let assign = ops::assign(&scope.with_op_name(&format!("{name}/init")), slot, zeros)?;
        Ok((slot, assign))
    }

    /// The assign ops that give this parameter and its moments their initial values.
    pub fn initializers(&self) -> [Output; 3] {
        [self.assign, self.assign_m, self.assign_v]
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}
