//! # Connection Handles
//!
//! `Conn` is what a command handler sees of a client session: its identity,
//! a reply buffer and a state machine. It never touches the socket; the
//! transport drains replies after every dispatch.
//!
//! `DetachedConn` is what a handler receives after detaching: exclusive
//! ownership of the socket, outside the dispatch loop.
//!
//! ```text
//! Pending ──accept──> Accepted ──open──> Open ──close──> Closed
//!    │                                    │
//!    └──deny──> Denied                    └──detach──> Detached
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use ckv_common::{Command, Reply};

use crate::error::TransportError;
use crate::protocol::{encode_reply, RespParser};

/// Identity of a client session as seen by hooks and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Process-unique connection id.
    pub id: u64,
    /// Remote address, when the transport has one.
    pub addr: Option<SocketAddr>,
}

impl PeerInfo {
    pub fn new(id: u64, addr: Option<SocketAddr>) -> Self {
        PeerInfo { id, addr }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "#{}@{}", self.id, addr),
            None => write!(f, "#{}", self.id),
        }
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Pending,
    Accepted,
    Denied,
    Open,
    Closed,
    Detached,
}

impl ConnState {
    /// Returns true once no further commands may be dispatched.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Closed | Self::Detached)
    }

    fn can_become(self, next: ConnState) -> bool {
        use ConnState::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Denied)
                | (Accepted, Open)
                | (Accepted, Closed)
                | (Open, Closed)
                | (Open, Detached)
        )
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnState,
    pub to: ConnState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection cannot go from {:?} to {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Continuation that takes over a detached connection.
pub type DetachHandler = Box<dyn FnOnce(DetachedConn) -> BoxFuture<'static, io::Result<()>> + Send>;

/// Handler-facing view of one client session.
pub struct Conn {
    peer: PeerInfo,
    state: ConnState,
    replies: Vec<Reply>,
    detach: Option<DetachHandler>,
}

impl Conn {
    /// Creates a connection in the `Pending` state.
    pub fn new(peer: PeerInfo) -> Self {
        Conn {
            peer,
            state: ConnState::Pending,
            replies: Vec::new(),
            detach: None,
        }
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Records the admission decision.
    pub fn admit(&mut self, accepted: bool) -> Result<(), InvalidTransition> {
        let next = if accepted {
            ConnState::Accepted
        } else {
            ConnState::Denied
        };
        self.transition(next)
    }

    /// Moves an accepted connection into the command loop.
    pub fn open(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ConnState::Open)
    }

    /// Queues a reply. Dropped if the connection is no longer open.
    pub fn write(&mut self, reply: Reply) {
        if self.state != ConnState::Open {
            warn!(peer = %self.peer, state = ?self.state, "reply dropped on inactive connection");
            return;
        }
        self.replies.push(reply);
    }

    /// Asks the transport to close the connection once queued replies are sent.
    pub fn close(&mut self) {
        if let Err(err) = self.transition(ConnState::Closed) {
            warn!(peer = %self.peer, error = %err, "close ignored");
        }
    }

    /// Transfers the socket to `handler`, which runs on its own task.
    ///
    /// Replies queued before this call are still delivered first. After it,
    /// the transport stops reading commands and never writes to or closes
    /// the connection again.
    pub fn detach<F, Fut>(&mut self, handler: F)
    where
        F: FnOnce(DetachedConn) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        if let Err(err) = self.transition(ConnState::Detached) {
            warn!(peer = %self.peer, error = %err, "detach ignored");
            return;
        }
        self.detach = Some(Box::new(move |conn: DetachedConn| handler(conn).boxed()));
    }

    /// Drains the replies queued since the last call.
    pub fn take_replies(&mut self) -> Vec<Reply> {
        std::mem::take(&mut self.replies)
    }

    /// Hands the detach continuation to the transport, once.
    pub fn take_detach_handler(&mut self) -> Option<DetachHandler> {
        self.detach.take()
    }

    fn transition(&mut self, next: ConnState) -> Result<(), InvalidTransition> {
        if !self.state.can_become(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("replies", &self.replies.len())
            .field("detach", &self.detach.is_some())
            .finish()
    }
}

/// Any byte stream a connection can run over.
pub trait ConnIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConnIo for T {}

/// Exclusive owner of a connection taken out of the dispatch loop.
pub struct DetachedConn {
    peer: PeerInfo,
    io: Box<dyn ConnIo>,
    input: BytesMut,
    parser: RespParser,
    output: BytesMut,
}

impl DetachedConn {
    /// Wraps the socket together with any input the dispatch loop had
    /// already read but not parsed.
    pub fn new(peer: PeerInfo, io: Box<dyn ConnIo>, input: BytesMut, parser: RespParser) -> Self {
        DetachedConn {
            peer,
            io,
            input,
            parser,
            output: BytesMut::new(),
        }
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Buffers a reply; nothing reaches the client until `flush`.
    pub fn write(&mut self, reply: Reply) {
        encode_reply(&reply, &mut self.output);
    }

    /// Writes buffered replies to the socket.
    pub async fn flush(&mut self) -> io::Result<()> {
        if !self.output.is_empty() {
            self.io.write_all(&self.output).await?;
            self.output.clear();
        }
        self.io.flush().await
    }

    /// Reads the next command sent by the client, or `None` on EOF.
    pub async fn read_command(&mut self) -> Result<Option<Command>, TransportError> {
        loop {
            if let Some(args) = self.parser.parse(&mut self.input)? {
                match Command::new(args) {
                    Some(cmd) => return Ok(Some(cmd)),
                    None => continue,
                }
            }
            if self.io.read_buf(&mut self.input).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Flushes pending replies and shuts the socket down.
    pub async fn close(mut self) -> io::Result<()> {
        self.flush().await?;
        self.io.shutdown().await
    }
}
