//! Runtime errors

use thiserror::Error;

use crate::address::Address;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
///
/// Format errors surface while loading a story; everything else indicates a
/// bug in the compiled story or the runtime and aborts the story.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported story format version {0}")]
    UnsupportedVersion(i64),

    #[error("unrecognized node token {0:?}")]
    UnrecognizedToken(String),

    #[error("malformed node: {0}")]
    MalformedNode(String),

    #[error("address not found: {0}")]
    AddressNotFound(Address),

    #[error("container not found at {0:?}")]
    ContainerNotFound(String),

    #[error("variable {0:?} not found")]
    VariableNotFound(String),

    #[error("evaluation stack underflow")]
    StackUnderflow,

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("unexpected node {node} in {mode} flow")]
    UnexpectedNode { node: String, mode: &'static str },

    #[error("function return outside a function frame")]
    ReturnOutsideFunction,

    #[error("tunnel return with no tunnel to return to")]
    TunnelReturnOutsideTunnel,

    #[error("unexpected output while initializing globals: {0:?}")]
    UnexpectedOutput(String),

    #[error("unexpected choice while initializing globals: {0:?}")]
    UnexpectedChoice(String),

    #[error("failed to read story: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse story JSON: {0}")]
    Json(#[from] serde_json::Error),
}
