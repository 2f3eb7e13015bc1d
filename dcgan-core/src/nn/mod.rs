//! Graph-building helpers composed from the primitive ops in
//! [`crate::graph::ops`], plus the element-wise activation kernels the
//! session evaluates.

pub mod activations;
pub mod conv;
pub mod dropout;
pub mod init;
pub mod losses;
pub mod normalization;

pub use conv::conv2d_transpose;
pub use dropout::dropout;
pub use init::{glorot_limit, glorot_uniform};
pub use losses::sigmoid_cross_entropy_with_logits;
pub use normalization::batch_normalization;
