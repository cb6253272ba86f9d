//! # List Error Types

use tessera_core::PoolError;
use thiserror::Error;

use crate::node::NodeRef;

/// Errors that can occur in list operations.
#[derive(Error, Debug)]
pub enum ListError {
    /// The pool backing the list refused the operation.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The node has been deleted or never belonged to this list.
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeRef),
}

/// Result type for list operations.
pub type ListResult<T> = Result<T, ListError>;
