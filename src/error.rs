//! Error taxonomy for compilation and table emission.
//!
//! All errors carry enough context to locate the offending policy or
//! diagram subterm. Interned nodes are produced by pure computations that
//! complete before being published, so no error ever leaves the manager's
//! tables inconsistent.

use thiserror::Error;

use crate::field::Field;
use crate::reference::Ref;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Error {
    /// A `Link` term was reached during local compilation.
    #[error("link {src_switch}@{src_port} -> {dst_switch}@{dst_port} in local compilation")]
    NonLocal {
        src_switch: u64,
        src_port: u64,
        dst_switch: u64,
        dst_port: u64,
    },

    /// The diagram tests a field not covered by the multi-table layout.
    #[error("field {field} is not covered by the table layout")]
    FieldOutOfLayout { field: Field },

    /// `negate` was applied to a diagram with a non-predicate leaf.
    #[error("negation of non-predicate diagram at {node}")]
    NonPredicateNegation { node: Ref },

    /// An action reached table emission without an output port.
    #[error("action has no output port and no default was provided")]
    IndeterminatePort,

    /// The action cannot be expressed on the target wire protocol (strict
    /// adherence only).
    #[error("unsupported action: {reason}")]
    UnsupportedAction { reason: String },

    /// The options JSON was malformed or carried unknown keys (strict
    /// adherence only).
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

pub type Result<T> = std::result::Result<T, Error>;
