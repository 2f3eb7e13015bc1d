pub mod backends;
pub mod error;
pub mod graph;
pub mod nn;

pub use error::{Error, Result};
