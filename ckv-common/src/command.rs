//! # Parsed Commands
//!
//! A command is the ordered argument vector produced by the transport for one
//! request. Argument 0 is the verb.

use std::borrow::Cow;

/// One parsed request: `args[0]` is the verb, the rest are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Wraps a parsed argument vector. Returns `None` for an empty vector,
    /// which carries no verb.
    pub fn new(args: Vec<Vec<u8>>) -> Option<Self> {
        if args.is_empty() {
            return None;
        }
        Some(Command { args })
    }

    /// Convenience constructor used by tests and in-process callers.
    pub fn from_parts<I, A>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self::new(parts.into_iter().map(|p| p.as_ref().to_vec()).collect())
    }

    /// The verb exactly as the client sent it.
    pub fn verb(&self) -> &[u8] {
        &self.args[0]
    }

    /// Lossy UTF-8 rendering of the verb, for error messages and logs.
    pub fn verb_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.verb())
    }

    /// Number of arguments including the verb.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Borrows the argument at `idx`.
    pub fn arg(&self, idx: usize) -> Option<&[u8]> {
        self.args.get(idx).map(Vec::as_slice)
    }

    /// Consumes the command and returns its arguments.
    pub fn into_args(self) -> Vec<Vec<u8>> {
        self.args
    }
}
