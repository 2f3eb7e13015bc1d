use crate::error::Result;
use crate::graph::{ops, Output, Scope};

/// Element-wise logistic loss `max(x, 0) - x * z + log(1 + exp(-|x|))` for
/// logits `x` and labels `z`.
///
/// `max` and `abs` are expressed through a single `x >= 0` select so both
/// branches stay finite for large logits.
pub fn sigmoid_cross_entropy_with_logits(scope: &Scope, labels: Output, logits: Output) -> Result<Output> {
    let zeros = ops::zeros_like(scope, logits)?;
    let cond = ops::greater_equal(scope, logits, zeros)?;
    let relu_logits = ops::select_v2(scope, cond, logits, zeros)?;
    let neg_abs_logits = ops::select_v2(scope, cond, ops::negate(scope, logits)?, logits)?;

    let linear = ops::sub(scope, relu_logits, ops::mul(scope, logits, labels)?)?;
    ops::add(scope, linear, ops::log1p(scope, ops::exp(scope, neg_abs_logits)?)?)
}
