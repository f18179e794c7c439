//! # TCP Transport
//!
//! Accept connections, frame RESP2 requests into commands, hand each one to
//! the dispatcher and write replies back in order.
//!
//! ## Design Principles
//!
//! 1. **Task Per Connection**: Each admitted socket gets its own Tokio task.
//! 2. **Batch Then Write**: All complete commands in one read are dispatched
//!    before their replies are written, preserving request order.
//! 3. **Ownership Hand-Off**: A detached connection leaves this loop for good;
//!    the socket moves into the detach continuation's task.
//! 4. **Fail-Open Defaults**: Protocol errors are localized to the connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use ckv_common::{Command, Reply};
use ckv_engine::KvStore;

use crate::config::ServerConfig;
use crate::connection::{Conn, ConnIo, ConnState, DetachedConn, PeerInfo};
use crate::diagnostics::{Diagnostics, PprofProfiler};
use crate::dispatch::Dispatcher;
use crate::error::TransportError;
use crate::lifecycle::{ConnectionHooks, LifecycleManager};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::protocol::{encode_reply, RespError, RespParser};

const READ_BUF_CAPACITY: usize = 16 * 1024;

/// What the connection loop does after draining its input buffer.
enum Step {
    NeedInput,
    Closed,
    Detached,
    ProtocolError(RespError),
}

/// The transport: a dispatcher plus lifecycle hooks.
pub struct Server<S> {
    dispatcher: Arc<Dispatcher<S>>,
    hooks: Arc<dyn ConnectionHooks>,
    metrics: Arc<Metrics>,
    keepalive: Option<Duration>,
    next_id: Arc<AtomicU64>,
}

impl<S> Clone for Server<S> {
    fn clone(&self) -> Self {
        Server {
            dispatcher: Arc::clone(&self.dispatcher),
            hooks: Arc::clone(&self.hooks),
            metrics: Arc::clone(&self.metrics),
            keepalive: self.keepalive,
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<S: KvStore + 'static> Server<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>, hooks: Arc<dyn ConnectionHooks>) -> Self {
        let metrics = Arc::clone(dispatcher.metrics());
        Server {
            dispatcher,
            hooks,
            metrics,
            keepalive: None,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Wires the default lifecycle manager and pprof-backed diagnostics.
    pub fn from_config(config: &ServerConfig, store: Arc<S>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let diagnostics = Diagnostics::new(Arc::new(PprofProfiler::new(&config.profile_dir)));
        let dispatcher = Arc::new(Dispatcher::new(store, diagnostics, Arc::clone(&metrics)));
        let hooks = LifecycleManager::new(metrics).with_max_connections(config.max_connections);
        Server::new(dispatcher, Arc::new(hooks)).with_keepalive(config.tcp_keepalive)
    }

    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn run_until<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accept = listener.accept() => match accept {
                    Ok((stream, addr)) => self.spawn_tcp(stream, addr),
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                },
            }
        }

        let snapshot = self.metrics();
        info!(
            commands = snapshot.commands_total,
            errors = snapshot.errors_total,
            accepted = snapshot.connections.accepted,
            denied = snapshot.connections.denied,
            detached = snapshot.connections.detached,
            "server stopped"
        );
        Ok(())
    }

    fn spawn_tcp(&self, stream: TcpStream, addr: SocketAddr) {
        let Some(conn) = self.admit(Some(addr)) else {
            return;
        };
        self.configure_socket(&stream);
        let server = self.clone();
        tokio::spawn(async move {
            server.run_connection(stream, conn).await;
        });
    }

    fn configure_socket(&self, stream: &TcpStream) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "set_nodelay failed");
        }
        if let Some(idle) = self.keepalive {
            let keepalive = TcpKeepalive::new().with_time(idle);
            if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
                warn!(error = %err, "set_tcp_keepalive failed");
            }
        }
    }

    /// Admits and serves one connection over any byte stream.
    pub async fn serve_connection<IO>(&self, io: IO, addr: Option<SocketAddr>)
    where
        IO: ConnIo + 'static,
    {
        if let Some(conn) = self.admit(addr) {
            self.run_connection(io, conn).await;
        }
    }

    /// Asks the hooks; denied connections are dropped by the caller.
    fn admit(&self, addr: Option<SocketAddr>) -> Option<Conn> {
        let peer = PeerInfo::new(self.next_id.fetch_add(1, Ordering::Relaxed), addr);
        let mut conn = Conn::new(peer);
        let accepted = self.hooks.accept(conn.peer());
        if conn.admit(accepted).is_err() || !accepted {
            self.metrics.record_denied();
            return None;
        }
        self.metrics.record_accepted();
        Some(conn)
    }

    async fn run_connection<IO>(&self, mut io: IO, mut conn: Conn)
    where
        IO: ConnIo + 'static,
    {
        let mut input = BytesMut::with_capacity(READ_BUF_CAPACITY);
        let mut output = BytesMut::new();
        let mut parser = RespParser::new();
        if let Err(err) = conn.open() {
            warn!(peer = %conn.peer(), error = %err, "cannot open connection");
        }

        let cause = loop {
            let step = self.drain_input(&mut conn, &mut parser, &mut input, &mut output);

            let written = if output.is_empty() {
                Ok(())
            } else {
                let written = match io.write_all(&output).await {
                    Ok(()) => io.flush().await,
                    Err(err) => Err(err),
                };
                output.clear();
                written
            };

            // Once detached, the socket belongs to the continuation even if
            // the earlier replies failed to go out.
            if let Step::Detached = step {
                if let Err(err) = written {
                    debug!(peer = %conn.peer(), error = %err, "write failed before detach");
                }
                self.hand_off(conn, Box::new(io), input, parser);
                return;
            }
            if let Err(err) = written {
                break Some(TransportError::Io(err));
            }

            match step {
                Step::NeedInput | Step::Detached => {}
                Step::Closed => break None,
                Step::ProtocolError(err) => break Some(TransportError::Protocol(err)),
            }

            match io.read_buf(&mut input).await {
                Ok(0) => break None,
                Ok(_) => {}
                Err(err) => break Some(TransportError::Io(err)),
            }
        };

        if conn.state() == ConnState::Open {
            conn.close();
        }
        if let Err(err) = io.shutdown().await {
            debug!(peer = %conn.peer(), error = %err, "shutdown failed");
        }
        self.metrics.record_closed();
        self.hooks.closed(conn.peer(), cause.as_ref());
    }

    /// Dispatches every complete command in `input`, encoding replies into
    /// `output`. Stops at the first command that ends the loop.
    fn drain_input(
        &self,
        conn: &mut Conn,
        parser: &mut RespParser,
        input: &mut BytesMut,
        output: &mut BytesMut,
    ) -> Step {
        loop {
            let args = match parser.parse(input) {
                Ok(Some(args)) => args,
                Ok(None) => return Step::NeedInput,
                Err(err) => {
                    encode_reply(&Reply::err(format!("Protocol error: {err}")), output);
                    return Step::ProtocolError(err);
                }
            };
            let Some(cmd) = Command::new(args) else {
                continue;
            };

            self.dispatcher.dispatch(conn, cmd);
            for reply in conn.take_replies() {
                encode_reply(&reply, output);
            }

            match conn.state() {
                ConnState::Open => {}
                ConnState::Detached => return Step::Detached,
                _ => return Step::Closed,
            }
        }
    }

    /// Moves the socket into the detach continuation on a new task.
    fn hand_off(&self, mut conn: Conn, io: Box<dyn ConnIo>, input: BytesMut, parser: RespParser) {
        let peer = conn.peer().clone();
        self.metrics.record_detached();
        self.hooks.detached(&peer);

        let Some(handler) = conn.take_detach_handler() else {
            warn!(%peer, "detached without a handler; dropping connection");
            return;
        };
        let detached = DetachedConn::new(peer.clone(), io, input, parser);
        tokio::spawn(async move {
            if let Err(err) = handler(detached).await {
                warn!(%peer, error = %err, "detached connection ended with error");
            }
        });
    }
}
