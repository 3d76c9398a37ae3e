//! Wire error types.

use thiserror::Error;

/// Wire errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),
}
