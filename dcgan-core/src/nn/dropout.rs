use crate::error::{Error, Result};
use crate::graph::{ops, Output, Scope};

/// Zeroes each element of `x` with probability `rate` and scales the rest by
/// `1 / (1 - rate)`.
pub fn dropout(scope: &Scope, x: Output, rate: f32) -> Result<Output> {
    if !(0.0..1.0).contains(&rate) {
        return Err(Error::invalid("Dropout", format!("rate must be in [0, 1), got {rate}")));
    }
    let keep_prob = 1.0 - rate;

    let noise = ops::random_uniform(scope, ops::shape(scope, x)?)?;
    let mask = ops::floor(scope, ops::add(scope, noise, ops::scalar(scope, keep_prob)?)?)?;
    let scaled = ops::div(scope, x, ops::scalar(scope, keep_prob)?)?;
    ops::mul(scope, scaled, mask)
}
