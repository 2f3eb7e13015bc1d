use crate::graph::{DType, Output};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op}: incompatible shapes {lhs:?} and {rhs:?}")]
    IncompatibleShapes {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error("{op}: expected a rank {expected} tensor, got shape {shape:?}")]
    Rank {
        op: &'static str,
        expected: usize,
        shape: Vec<usize>,
    },

    #[error("{op}: expected {expected} input, got {actual}")]
    DType {
        op: &'static str,
        expected: DType,
        actual: DType,
    },

    #[error("{op}: {message}")]
    InvalidArgument { op: &'static str, message: String },

    #[error("{op}: expected {expected} inputs, got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("output {0} does not exist in this graph")]
    UnknownOutput(Output),

    #[error("variable `{0}` was read before being assigned")]
    UninitializedVariable(String),

    #[error("placeholder `{0}` was not fed")]
    MissingFeed(String),

    #[error("value fed to `{name}` has shape {actual:?}, expected {expected:?}")]
    FeedMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(op: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            op,
            message: message.into(),
        }
    }
}
