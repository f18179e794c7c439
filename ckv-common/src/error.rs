//! # clonekv Error Types
//!
//! ## Design Principles
//!
//! 1. **Client-Facing Text**: Usage errors render exactly the message the
//!    client sees after the `ERR ` prefix.
//! 2. **Categorized**: Every failure belongs to one category (usage,
//!    diagnostics, transport) that decides how it is handled.
//! 3. **No Retries**: Nothing in the core retries; categories only say
//!    whether a failure is confined to one command or ends the process.

use thiserror::Error;

/// High-level category for grouping failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Wrong arity or unknown verb; reported to the client, connection stays open.
    Usage,
    /// Profiling hook failures; the process terminates.
    Diagnostics,
    /// Framing or socket failures; owned by the transport, ends the connection.
    Transport,
}

impl ErrorCategory {
    /// Returns true if a failure in this category must stop the process.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Diagnostics)
    }
}

/// Protocol usage errors. `Display` is the message after the `ERR ` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Argument count does not match the verb's arity.
    #[error("wrong number of arguments for '{verb}' command")]
    WrongArity { verb: String },
    /// No handler is registered for the verb.
    #[error("unknown command '{verb}'")]
    UnknownCommand { verb: String },
}

/// Umbrella error carrying the category alongside the message.
#[derive(Debug, Error)]
pub enum CkvError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("diagnostics: {0}")]
    Diagnostics(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl CkvError {
    /// Returns the coarse category of the error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Command(_) => ErrorCategory::Usage,
            Self::Diagnostics(_) => ErrorCategory::Diagnostics,
            Self::Transport(_) => ErrorCategory::Transport,
        }
    }
}
