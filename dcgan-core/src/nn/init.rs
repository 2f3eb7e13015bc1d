use crate::error::{Error, Result};
use crate::graph::{ops, Output, Scope};

/// Half-width of the Glorot uniform range for a dense `[in, out]` or
/// convolution `[kh, kw, in, out]` weight.
pub fn glorot_limit(shape: &[usize]) -> Result<f32> {
    let (fan_in, fan_out) = match *shape {
        [fan_in, fan_out] => (fan_in as f32, fan_out as f32),
        [kh, kw, fan_in, fan_out] => {
            let receptive_field = (kh * kw) as f32;
            (receptive_field * fan_in as f32, receptive_field * fan_out as f32)
        }
        _ => {
            return Err(Error::invalid(
                "GlorotUniform",
                format!("only rank 2 and rank 4 shapes are supported, got {shape:?}"),
            ))
        }
    };

    let scale = 1.0 / f32::max(1.0, (fan_in + fan_out) / 2.0);
    Ok((3.0 * scale).sqrt())
}

/// Samples of `U(-limit, limit)` in a tensor of `shape`.
pub fn glorot_uniform(scope: &Scope, shape: &[usize]) -> Result<Output> {
    let limit = glorot_limit(shape)?;
    let random = ops::random_uniform(scope, ops::shape_const(scope, shape)?)?;
    let spread = ops::mul(scope, random, ops::scalar(scope, 2.0 * limit)?)?;
    ops::add(scope, spread, ops::scalar(scope, -limit)?)
}
