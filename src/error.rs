//! Errors surfaced at the public edges of the runtime.
//!
//! Operations that run inside the update loop never fail: a missing
//! boundary, grounding def or envelope is treated as already handled.
//! Only calls that take caller-supplied ids, keys or configuration return
//! a [`Result`].

use crate::ids::{BoundaryId, ContextId, HostId, StreamId};

/// Errors returned by the runtime's public entry points.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The boundary does not exist or was already discarded.
    #[error("unknown boundary {0}")]
    UnknownBoundary(BoundaryId),

    /// The host does not exist or was already destroyed.
    #[error("unknown host {0}")]
    UnknownHost(HostId),

    /// The context was never created on this runtime.
    #[error("unknown context {0}")]
    UnknownContext(ContextId),

    /// The stream was never created on this runtime.
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),

    /// A key that must be of the form `"contextName.rest"` was not.
    #[error("expected a \"context.name\" key, got {0:?}")]
    MalformedKey(String),

    /// A data or signal listener panicked. The remaining listeners of the
    /// same dispatch still ran.
    #[error("listener panicked: {0}")]
    ListenerPanicked(String),

    /// Host or context settings could not be parsed.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}
