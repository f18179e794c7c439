//! # clonekv Server
//!
//! Command dispatch, connection lifecycle and the RESP2 transport that feeds
//! them.
//!
//! ```text
//! TcpListener ──accept?──> LifecycleManager
//!      │
//!      └─ task per connection: RespParser ─> Dispatcher ─> KvStore
//!                                               │
//!                                               └─ detach ─> own task (DetachedConn)
//! ```

pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use connection::{Conn, ConnState, DetachedConn, PeerInfo};
pub use dispatch::{CommandSpec, Dispatcher};
pub use lifecycle::{ConnectionHooks, LifecycleManager};
pub use server::Server;
