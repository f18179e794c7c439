//! # Command Dispatch
//!
//! Route a parsed command to its handler through a verb table.
//!
//! ## Design Principles
//!
//! 1. **Table Driven**: Every verb is one `CommandSpec` row (name, arity,
//!    handler). Adding a verb never touches the dispatch path.
//! 2. **Validate Before Execute**: Unknown verbs and wrong arity are answered
//!    before any handler runs, so they never mutate the store.
//! 3. **No Shadowing**: Lookup compares the verb against every row; row order
//!    cannot hide a verb.
//! 4. **Explicit Dependencies**: The store and diagnostics are handed in at
//!    construction; there is no process-global state.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use ckv_common::{Command, CommandError, Reply};
use ckv_engine::KvStore;

use crate::connection::{Conn, DetachedConn};
use crate::diagnostics::{self, Diagnostics};
use crate::metrics::Metrics;

/// Signature shared by all command handlers. Arity is already checked.
pub type Handler<S> = fn(&Dispatcher<S>, &mut Conn, Command);

/// One row of the verb table.
pub struct CommandSpec<S> {
    /// Verb name, matched case-insensitively.
    pub name: &'static str,
    /// Required argument count, verb included.
    pub arity: usize,
    pub handler: Handler<S>,
}

impl<S> CommandSpec<S> {
    pub const fn new(name: &'static str, arity: usize, handler: Handler<S>) -> Self {
        CommandSpec {
            name,
            arity,
            handler,
        }
    }

    fn matches(&self, verb: &[u8]) -> bool {
        self.name.as_bytes().eq_ignore_ascii_case(verb)
    }
}

impl<S> Clone for CommandSpec<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for CommandSpec<S> {}

impl<S> fmt::Debug for CommandSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// The built-in verb table.
pub fn builtin_commands<S: KvStore + 'static>() -> Vec<CommandSpec<S>> {
    vec![
        CommandSpec::new("get", 2, cmd_get::<S>),
        CommandSpec::new("set", 3, cmd_set::<S>),
        CommandSpec::new("del", 2, cmd_del::<S>),
        CommandSpec::new("ping", 1, cmd_ping::<S>),
        CommandSpec::new("quit", 1, cmd_quit::<S>),
        CommandSpec::new("detach", 1, cmd_detach::<S>),
        CommandSpec::new("start", 1, cmd_start::<S>),
        CommandSpec::new("stop", 1, cmd_stop::<S>),
    ]
}

/// Executes commands against a shared store.
pub struct Dispatcher<S> {
    store: Arc<S>,
    diagnostics: Diagnostics,
    metrics: Arc<Metrics>,
    commands: Vec<CommandSpec<S>>,
}

impl<S: KvStore + 'static> Dispatcher<S> {
    pub fn new(store: Arc<S>, diagnostics: Diagnostics, metrics: Arc<Metrics>) -> Self {
        Dispatcher {
            store,
            diagnostics,
            metrics,
            commands: builtin_commands(),
        }
    }

    /// Adds a verb, replacing any existing row with the same name.
    pub fn register(&mut self, spec: CommandSpec<S>) {
        self.commands.retain(|row| !row.name.eq_ignore_ascii_case(spec.name));
        self.commands.push(spec);
    }

    /// Finds the row for `verb`, case-insensitively.
    pub fn lookup(&self, verb: &[u8]) -> Option<&CommandSpec<S>> {
        self.commands.iter().find(|row| row.matches(verb))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Runs one command. Exactly one reply is queued on `conn`, unless the
    /// handler detaches it.
    pub fn dispatch(&self, conn: &mut Conn, cmd: Command) {
        let started = Instant::now();
        self.metrics.record_command_start();

        if let Err(err) = self.execute(conn, cmd) {
            debug!(peer = %conn.peer(), error = %err, "rejected command");
            self.metrics.record_error();
            conn.write(err.into());
        }

        self.metrics.record_command_end(started.elapsed());
    }

    fn execute(&self, conn: &mut Conn, cmd: Command) -> Result<(), CommandError> {
        let Some(spec) = self.lookup(cmd.verb()) else {
            return Err(CommandError::UnknownCommand {
                verb: cmd.verb_lossy().into_owned(),
            });
        };
        if cmd.arg_count() != spec.arity {
            return Err(CommandError::WrongArity {
                verb: cmd.verb_lossy().into_owned(),
            });
        }
        (spec.handler)(self, conn, cmd);
        Ok(())
    }
}

fn cmd_get<S: KvStore>(d: &Dispatcher<S>, conn: &mut Conn, cmd: Command) {
    let Some(key) = cmd.arg(1) else { return };
    conn.write(d.store.get(key).into());
}

fn cmd_set<S: KvStore>(d: &Dispatcher<S>, conn: &mut Conn, cmd: Command) {
    let Ok([_, key, value]) = <[Vec<u8>; 3]>::try_from(cmd.into_args()) else {
        return;
    };
    d.store.set(key, value);
    conn.write(Reply::ok());
}

fn cmd_del<S: KvStore>(d: &Dispatcher<S>, conn: &mut Conn, cmd: Command) {
    let Some(key) = cmd.arg(1) else { return };
    conn.write(d.store.delete(key).into());
}

fn cmd_ping<S>(_: &Dispatcher<S>, conn: &mut Conn, _: Command) {
    conn.write(Reply::status("PONG"));
}

fn cmd_quit<S>(_: &Dispatcher<S>, conn: &mut Conn, _: Command) {
    conn.write(Reply::ok());
    conn.close();
}

fn cmd_detach<S>(_: &Dispatcher<S>, conn: &mut Conn, _: Command) {
    conn.detach(|mut hconn: DetachedConn| async move {
        hconn.write(Reply::ok());
        hconn.close().await
    });
    info!(peer = %conn.peer(), "connection has been detached");
}

fn cmd_start<S>(d: &Dispatcher<S>, conn: &mut Conn, _: Command) {
    if let Err(err) = d.diagnostics.start() {
        diagnostics::fatal(&err);
    }
    conn.write(Reply::ok());
}

fn cmd_stop<S>(d: &Dispatcher<S>, conn: &mut Conn, _: Command) {
    if let Err(err) = d.diagnostics.stop() {
        diagnostics::fatal(&err);
    }
    conn.write(Reply::ok());
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use ckv_engine::MemoryStore;

    use crate::connection::{ConnState, PeerInfo};
    use crate::diagnostics::tests::RecordingProfiler;

    fn dispatcher() -> (Dispatcher<MemoryStore>, Arc<RecordingProfiler>) {
        let profiler = Arc::new(RecordingProfiler::default());
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryStore::new()),
            Diagnostics::new(profiler.clone()),
            Arc::new(Metrics::new()),
        );
        (dispatcher, profiler)
    }

    fn open_conn() -> Conn {
        let mut conn = Conn::new(PeerInfo::new(1, None));
        conn.admit(true).unwrap();
        conn.open().unwrap();
        conn
    }

    fn run(d: &Dispatcher<MemoryStore>, conn: &mut Conn, parts: &[&str]) -> Reply {
        d.dispatch(conn, Command::from_parts(parts).unwrap());
        let mut replies = conn.take_replies();
        assert_eq!(replies.len(), 1, "expected exactly one reply for {parts:?}");
        replies.remove(0)
    }

    #[test]
    fn set_get_del_scenario() {
        let (d, _) = dispatcher();
        let mut conn = open_conn();
        assert_eq!(run(&d, &mut conn, &["set", "x", "1"]), Reply::ok());
        assert_eq!(run(&d, &mut conn, &["get", "x"]), Reply::bulk(b"1"));
        assert_eq!(run(&d, &mut conn, &["del", "x"]), Reply::Integer(1));
        assert_eq!(run(&d, &mut conn, &["get", "x"]), Reply::Null);
        assert_eq!(run(&d, &mut conn, &["del", "x"]), Reply::Integer(0));
    }

    #[test]
    fn unset_key_is_null() {
        let (d, _) = dispatcher();
        let mut conn = open_conn();
        assert_eq!(run(&d, &mut conn, &["get", "nope"]), Reply::Null);
    }

    #[test]
    fn verbs_match_case_insensitively_but_keys_do_not() {
        let (d, _) = dispatcher();
        let mut conn = open_conn();
        assert_eq!(run(&d, &mut conn, &["SeT", "Key", "V"]), Reply::ok());
        assert_eq!(run(&d, &mut conn, &["GET", "Key"]), Reply::bulk(b"V"));
        assert_eq!(run(&d, &mut conn, &["get", "key"]), Reply::Null);
        assert_eq!(run(&d, &mut conn, &["PiNg"]), Reply::status("PONG"));
    }

    #[test]
    fn wrong_arity_names_verb_and_leaves_store_untouched() {
        let (d, _) = dispatcher();
        let mut conn = open_conn();
        run(&d, &mut conn, &["set", "a", "before"]);

        assert_eq!(
            run(&d, &mut conn, &["set", "a"]),
            Reply::Error("ERR wrong number of arguments for 'set' command".into())
        );
        assert_eq!(
            run(&d, &mut conn, &["SET", "a", "b", "c"]),
            Reply::Error("ERR wrong number of arguments for 'SET' command".into())
        );
        assert!(run(&d, &mut conn, &["del", "a", "extra"]).is_error());
        assert!(run(&d, &mut conn, &["ping", "extra"]).is_error());

        assert_eq!(run(&d, &mut conn, &["get", "a"]), Reply::bulk(b"before"));
        assert_eq!(d.store().len(), 1);
        assert_eq!(conn.state(), ConnState::Open);
    }

    #[test]
    fn unknown_verb_is_named_regardless_of_arity() {
        let (d, _) = dispatcher();
        let mut conn = open_conn();
        for parts in [&["foo"][..], &["foo", "a"][..], &["foo", "a", "b", "c"][..]] {
            match run(&d, &mut conn, parts) {
                Reply::Error(msg) => {
                    assert!(msg.starts_with("ERR "));
                    assert!(msg.contains("foo"));
                }
                other => panic!("expected error, got {other:?}"),
            }
        }
        assert_eq!(d.metrics().snapshot().errors_total, 3);
    }

    #[test]
    fn every_builtin_verb_is_reachable() {
        let (d, _) = dispatcher();
        for verb in ["get", "set", "del", "ping", "quit", "detach", "start", "stop"] {
            let spec = d.lookup(verb.as_bytes()).expect(verb);
            assert_eq!(spec.name, verb);
        }
        assert!(d.lookup(b"default").is_none());
    }

    #[test]
    fn quit_acknowledges_then_closes() {
        let (d, _) = dispatcher();
        let mut conn = open_conn();
        assert_eq!(run(&d, &mut conn, &["quit"]), Reply::ok());
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[test]
    fn detach_hands_off_without_a_synchronous_reply() {
        let (d, _) = dispatcher();
        let mut conn = open_conn();
        d.dispatch(&mut conn, Command::from_parts(["detach"]).unwrap());
        assert!(conn.take_replies().is_empty());
        assert_eq!(conn.state(), ConnState::Detached);
        assert!(conn.take_detach_handler().is_some());
    }

    #[test]
    fn start_and_stop_drive_diagnostics_only() {
        let (d, profiler) = dispatcher();
        let mut conn = open_conn();
        assert_eq!(run(&d, &mut conn, &["START"]), Reply::ok());
        assert_eq!(run(&d, &mut conn, &["stop"]), Reply::ok());
        assert_eq!(*profiler.calls.lock(), vec!["start_cpu", "heap", "stop_cpu"]);
        assert!(d.store().is_empty());
    }

    #[test]
    fn register_extends_and_replaces_rows() {
        fn cmd_echo<S>(_: &Dispatcher<S>, conn: &mut Conn, cmd: Command) {
            let Some(arg) = cmd.arg(1) else { return };
            conn.write(Reply::bulk(arg));
        }
        fn cmd_ping_custom<S>(_: &Dispatcher<S>, conn: &mut Conn, _: Command) {
            conn.write(Reply::status("HELLO"));
        }

        let (mut d, _) = dispatcher();
        d.register(CommandSpec::new("echo", 2, cmd_echo::<MemoryStore>));
        d.register(CommandSpec::new("PING", 1, cmd_ping_custom::<MemoryStore>));

        let mut conn = open_conn();
        assert_eq!(run(&d, &mut conn, &["ECHO", "hi"]), Reply::bulk(b"hi"));
        assert_eq!(run(&d, &mut conn, &["ping"]), Reply::status("HELLO"));
    }

    #[test]
    fn concurrent_sets_leave_one_whole_value() {
        let (d, _) = dispatcher();
        let d = Arc::new(d);
        let values: Vec<String> = (0..16).map(|i| format!("{i}").repeat(512)).collect();

        let handles: Vec<_> = values
            .iter()
            .cloned()
            .map(|value| {
                let d = Arc::clone(&d);
                thread::spawn(move || {
                    let mut conn = open_conn();
                    for _ in 0..50 {
                        d.dispatch(&mut conn, Command::from_parts(["set", "k", value.as_str()]).unwrap());
                    }
                    assert!(conn.take_replies().iter().all(|r| *r == Reply::ok()));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut conn = open_conn();
        let Reply::Bulk(got) = run(&d, &mut conn, &["get", "k"]) else {
            panic!("expected a bulk reply");
        };
        assert!(values.iter().any(|v| v.as_bytes() == &got[..]));
        assert_eq!(d.metrics().snapshot().commands_total, 16 * 50 + 1);
    }
}
