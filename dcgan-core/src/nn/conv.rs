use crate::backends::Padding;
use crate::error::Result;
use crate::graph::{ops, Output, Scope};

/// Transposed convolution: the gradient of `conv2d` with respect to its
/// input, used to upsample. `input_sizes` is the int32 shape of the result.
pub fn conv2d_transpose(
    scope: &Scope,
    input_sizes: Output,
    filter: Output,
    out_backprop: Output,
    strides: [usize; 4],
    padding: Padding,
) -> Result<Output> {
    ops::conv2d_backprop_input(scope, input_sizes, filter, out_backprop, strides, padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Tensor;
    use crate::backends::session::Session;

    #[test]
    fn test_upsamples_by_stride() {
        let scope = Scope::new_root();
        let x = ops::fill(&scope, 1.0, &[1, 2, 2, 3]).unwrap();
        let filter = ops::fill(&scope, 1.0, &[3, 3, 1, 3]).unwrap();
        let sizes = ops::shape_const(&scope, &[1, 4, 4, 1]).unwrap();
        let y = conv2d_transpose(&scope, sizes, filter, x, [1, 2, 2, 1], Padding::Same).unwrap();
        assert_eq!(scope.shape(y).unwrap(), vec![1, 4, 4, 1]);
        assert_eq!(scope.graph().node(y.node).unwrap().op.type_name(), "Conv2DBackpropInput");

        let mut session: Session = Session::with_seed(&scope, 0);
        let out = session.fetch(y).unwrap().into_float().unwrap();
        // Rows and columns 0, 1, 3 are reached by one window, row and column 2 by two.
        assert_eq!(out.get_data()[[0, 0, 0, 0]], 3.0);
        assert_eq!(out.get_data()[[0, 2, 0, 0]], 6.0);
        assert_eq!(out.get_data()[[0, 2, 2, 0]], 12.0);
        assert_eq!(out.get_data().iter().sum::<f32>(), 75.0);
    }

    #[test]
    fn test_rejects_inconsistent_sizes() {
        let scope = Scope::new_root();
        let x = ops::zeros(&scope, &[1, 7, 7, 256]).unwrap();
        let filter = ops::zeros(&scope, &[5, 5, 128, 256]).unwrap();
        let sizes = ops::shape_const(&scope, &[1, 14, 14, 128]).unwrap();
        assert!(conv2d_transpose(&scope, sizes, filter, x, [1, 1, 1, 1], Padding::Same).is_err());
        let sizes = ops::shape_const(&scope, &[1, 7, 7, 128]).unwrap();
        assert!(conv2d_transpose(&scope, sizes, filter, x, [1, 1, 1, 1], Padding::Same).is_ok());
    }
}
