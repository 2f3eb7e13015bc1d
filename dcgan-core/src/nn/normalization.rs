use crate::graph::{ops, DType, Output, Scope};
use crate::error::Result;

/// `x * inv + (offset - mean * inv)` with `inv = rsqrt(variance + epsilon) * scale`.
///
/// All statistics broadcast against `x`, so scalars and per-channel vectors
/// both work.
pub fn batch_normalization(
    scope: &Scope,
    x: Output,
    mean: Output,
    variance: Output,
    offset: Output,
    scale: Output,
    variance_epsilon: Output,
) -> Result<Output> {
    let inv = ops::rsqrt(scope, ops::add(scope, variance, variance_epsilon)?)?;
    let inv = ops::mul(scope, inv, scale)?;

    let scaled = ops::mul(scope, x, ops::cast(scope, inv, DType::Float)?)?;
    let shift = ops::sub(scope, offset, ops::mul(scope, mean, inv)?)?;
    ops::add(scope, scaled, ops::cast(scope, shift, DType::Float)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cpu::CpuTensor;
    use crate::backends::session::{Session, Value};
    use crate::backends::Tensor;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_batch_normalization() {
        let scope = Scope::new_root();
        let x = ops::placeholder(&scope, &[2, 2]).unwrap();
        let mean = ops::vector(&scope, &[1.0, 2.0]).unwrap();
        let variance = ops::vector(&scope, &[4.0, 1.0]).unwrap();
        let offset = ops::scalar(&scope, 0.5).unwrap();
        let scale = ops::vector(&scope, &[2.0, 1.0]).unwrap();
        let epsilon = ops::scalar(&scope, 0.0).unwrap();
        let y = batch_normalization(&scope, x, mean, variance, offset, scale, epsilon).unwrap();
        assert_eq!(scope.shape(y).unwrap(), vec![2, 2]);

        let mut session: Session = Session::with_seed(&scope, 0);
        let fed = Value::Float(CpuTensor::new(array![[3.0f32, 2.0], [-1.0, 4.0]].into_dyn()));
        let out = session.run(&[(x, fed)], &[y], &[]).unwrap().remove(0).into_float().unwrap();

        // (x - mean) / sqrt(variance) * scale + offset
        let expected = array![[2.5f32, 0.5], [-1.5, 2.5]].into_dyn();
        for (a, b) in out.get_data().iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_batch_normalization_rejects_mismatched_statistics() {
        let scope = Scope::new_root();
        let x = ops::placeholder(&scope, &[2, 3]).unwrap();
        let mean = ops::vector(&scope, &[0.0, 0.0]).unwrap();
        let one = ops::scalar(&scope, 1.0).unwrap();
        assert!(batch_normalization(&scope, x, mean, one, one, one, one).is_err());
    }
}
