//! # Reply Model
//!
//! Purpose: Describe what a command answers with, independent of how the
//! transport frames it on the wire.
//!
//! ## Design Principles
//!
//! 1. **Kind + Payload**: Handlers pick a reply kind and its payload; framing
//!    is the transport's job.
//! 2. **Shared Values**: Bulk payloads are `Arc<[u8]>` so a stored value can be
//!    replied without copying it out of the store.
//! 3. **Absent Is Explicit**: `Null` is distinct from an empty bulk string.

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::CommandError;

/// A single reply produced by one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple status string, e.g. `OK` or `PONG`.
    Status(Cow<'static, str>),
    /// Error string; always starts with an error prefix such as `ERR`.
    Error(String),
    /// Signed integer.
    Integer(i64),
    /// Binary-safe byte string.
    Bulk(Arc<[u8]>),
    /// Null indicator for an absent value.
    Null,
}

impl Reply {
    /// The `OK` acknowledgement.
    pub const fn ok() -> Self {
        Reply::Status(Cow::Borrowed("OK"))
    }

    /// Builds a static status reply.
    pub const fn status(text: &'static str) -> Self {
        Reply::Status(Cow::Borrowed(text))
    }

    /// Builds an error reply with the `ERR ` prefix.
    pub fn err(message: impl AsRef<str>) -> Self {
        Reply::Error(format!("ERR {}", message.as_ref()))
    }

    /// Builds a bulk reply by copying the provided bytes.
    pub fn bulk(data: &[u8]) -> Self {
        Reply::Bulk(Arc::from(data))
    }

    /// Returns true if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::err(err.to_string())
    }
}

impl From<Option<Arc<[u8]>>> for Reply {
    fn from(value: Option<Arc<[u8]>>) -> Self {
        match value {
            Some(data) => Reply::Bulk(data),
            None => Reply::Null,
        }
    }
}

impl From<bool> for Reply {
    fn from(flag: bool) -> Self {
        Reply::Integer(i64::from(flag))
    }
}
