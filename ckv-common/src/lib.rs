// ckv-common - Shared types for the clonekv workspace
//
// This crate defines the command/reply model and the error taxonomy shared
// by the storage engine and the server.

pub mod command;
pub mod error;
pub mod reply;

// Re-export for convenience
pub use command::*;
pub use error::*;
pub use reply::*;
