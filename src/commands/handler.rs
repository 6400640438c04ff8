//! Command dispatch and execution
//!
//! Every parsed command flows through [`Dispatcher::dispatch`]:
//!
//! 1. Shape validation: the outer value must be a non-nil array of bulk
//!    strings, otherwise the connection gets a fatal protocol error.
//! 2. Descriptor lookup by uppercased name.
//! 3. Arity validation.
//! 4. The processed-commands counter ticks.
//! 5. A connection in MULTI mode queues everything except the transaction
//!    control commands and replies `+QUEUED`.
//! 6. The handler executes. Mutating commands append themselves to the
//!    AOF after their arguments validate and before the keyspace changes,
//!    so the append (and the fsync under `always`) happens before the
//!    reply exists.
//!
//! The server core — keyspace, AOF handle, command counter — lives behind
//! one mutex. Each dispatch holds it for the whole execute-and-log step
//! and EXEC holds it across the entire queue, so transactions observe no
//! interleaving from other connections.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::aof::{Aof, AofError, FsyncPolicy};
use crate::commands::command::Command;
use crate::commands::registry::{CommandKind, CommandRegistry};
use crate::protocol::RespValue;
use crate::storage::Keyspace;
use crate::transaction::TransactionSession;

/// Process-wide mutable state commands execute against.
pub struct ServerCore {
    keyspace: Keyspace,
    aof: Option<Aof>,
    commands_processed: u64,
    start_time: Instant,
    /// Set while the AOF is being replayed so mutations are not
    /// re-appended.
    replaying: bool,
}

impl ServerCore {
    fn new(aof: Option<Aof>) -> Self {
        Self {
            keyspace: Keyspace::new(),
            aof,
            commands_processed: 0,
            start_time: Instant::now(),
            replaying: false,
        }
    }

    /// Appends a validated mutating command to the AOF.
    ///
    /// Returns `false` only when the command must fail: an append error
    /// under the `always` policy. Under `everysec`/`no` a failed append is
    /// logged and the command still succeeds.
    fn log_mutation(&mut self, command: &Command) -> bool {
        if self.replaying {
            return true;
        }
        let Some(aof) = self.aof.as_mut() else {
            return true;
        };
        match aof.append(&command.to_resp()) {
            Ok(()) => true,
            Err(e) => {
                error!(command = command.name(), error = %e, "AOF append failed");
                aof.policy() != FsyncPolicy::Always
            }
        }
    }
}

impl std::fmt::Debug for ServerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCore")
            .field("keys", &self.keyspace.len())
            .field("aof", &self.aof.is_some())
            .field("commands_processed", &self.commands_processed)
            .finish()
    }
}

/// What the connection should do with a dispatch result.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Send the reply and keep serving the connection.
    Reply(RespValue),
    /// Send the reply, then close the connection.
    FatalReply(RespValue),
}

/// Owns the command table and the server core; shared by every
/// connection task.
#[derive(Debug)]
pub struct Dispatcher {
    registry: CommandRegistry,
    core: Mutex<ServerCore>,
}

impl Dispatcher {
    /// Creates a dispatcher over a fresh keyspace, persisting to `aof`
    /// when given.
    pub fn new(aof: Option<Aof>) -> Self {
        Self {
            registry: CommandRegistry::new(),
            core: Mutex::new(ServerCore::new(aof)),
        }
    }

    /// Runs one client command through validation, transaction queueing,
    /// and execution.
    pub fn dispatch(&self, session: &mut TransactionSession, value: RespValue) -> DispatchOutcome {
        let Some(command) = Command::parse(&value) else {
            return DispatchOutcome::FatalReply(RespValue::error("ERR Protocol error"));
        };

        let Some(spec) = self.registry.lookup(command.name()) else {
            return DispatchOutcome::Reply(RespValue::error(format!(
                "ERR unknown command '{}'",
                command.raw_name()
            )));
        };

        if !spec.arity.accepts(command.argc()) {
            return DispatchOutcome::Reply(RespValue::error(format!(
                "ERR wrong number of arguments for '{}' command",
                command.raw_name()
            )));
        }

        let mut core = self.core.lock().unwrap();
        core.commands_processed += 1;

        if session.in_multi() && !matches!(spec.kind, CommandKind::Control) {
            session.queue_command(value);
            return DispatchOutcome::Reply(RespValue::simple_string("QUEUED"));
        }

        let reply = match spec.kind {
            CommandKind::Control => self.control(&mut core, session, command.name()),
            CommandKind::Core(handler) => handler(&mut core, &command),
        };
        DispatchOutcome::Reply(reply)
    }

    /// MULTI/EXEC/DISCARD: the state machine lives on the connection, the
    /// queued effects land on the core.
    fn control(
        &self,
        core: &mut ServerCore,
        session: &mut TransactionSession,
        name: &str,
    ) -> RespValue {
        match name {
            "MULTI" => {
                if session.begin_multi() {
                    RespValue::ok()
                } else {
                    RespValue::error("ERR MULTI calls can not be nested")
                }
            }
            "EXEC" => match session.take_queued_for_exec() {
                Some(queued) => {
                    // Per-element runtime errors become that element's
                    // reply; earlier effects stand.
                    let replies = queued
                        .iter()
                        .map(|value| self.execute_frame(core, value))
                        .collect();
                    RespValue::array(replies)
                }
                None => RespValue::error("ERR EXEC without MULTI"),
            },
            "DISCARD" => {
                if session.discard() {
                    RespValue::ok()
                } else {
                    RespValue::error("ERR DISCARD without MULTI")
                }
            }
            _ => RespValue::error(format!("ERR unknown command '{}'", name)),
        }
    }

    /// Executes one command frame against the core. Used for EXEC'd queue
    /// entries and AOF replay; errors come back as RESP error replies.
    fn execute_frame(&self, core: &mut ServerCore, value: &RespValue) -> RespValue {
        let Some(command) = Command::parse(value) else {
            return RespValue::error("ERR Protocol error");
        };
        let Some(spec) = self.registry.lookup(command.name()) else {
            return RespValue::error(format!(
                "ERR unknown command '{}'",
                command.raw_name()
            ));
        };
        if !spec.arity.accepts(command.argc()) {
            return RespValue::error(format!(
                "ERR wrong number of arguments for '{}' command",
                command.raw_name()
            ));
        }
        match spec.kind {
            CommandKind::Core(handler) => handler(core, &command),
            // Transaction control never reaches this path through a
            // well-formed queue; it can only appear in a tampered AOF.
            CommandKind::Control => RespValue::error(format!(
                "ERR {} is not valid here",
                command.name()
            )),
        }
    }

    /// Replays the persisted command log into the keyspace. Runs before
    /// the listener binds; replayed mutations are not re-appended.
    pub fn replay_aof(&self) -> Result<usize, AofError> {
        let mut core = self.core.lock().unwrap();
        let Some(aof) = core.aof.as_ref() else {
            return Ok(0);
        };
        let commands = aof.load_commands()?;

        core.replaying = true;
        let mut applied = 0;
        for value in &commands {
            let reply = self.execute_frame(&mut core, value);
            if reply.is_error() {
                warn!(reply = %reply, "replayed AOF command failed");
            } else {
                applied += 1;
            }
        }
        core.replaying = false;

        info!(records = commands.len(), applied, "AOF replay complete");
        Ok(applied)
    }

    /// One sampling sweep over the expiration map. Wired to the 100 ms
    /// repeating timer.
    pub fn sweep_expired(&self) -> usize {
        self.core
            .lock()
            .unwrap()
            .keyspace
            .sweep_expired(Instant::now())
    }

    /// Flushes dirty AOF appends to disk. Wired to the 1000 ms repeating
    /// timer under the `everysec` policy.
    pub fn flush_aof(&self) {
        let mut core = self.core.lock().unwrap();
        if let Some(aof) = core.aof.as_mut() {
            if let Err(e) = aof.flush() {
                error!(error = %e, "AOF fsync failed");
            }
        }
    }

    /// The configured AOF policy, if persistence is on.
    pub fn aof_policy(&self) -> Option<FsyncPolicy> {
        self.core
            .lock()
            .unwrap()
            .aof
            .as_ref()
            .map(|aof| aof.policy())
    }

    /// Count of well-formed commands dispatched so far.
    pub fn commands_processed(&self) -> u64 {
        self.core.lock().unwrap().commands_processed
    }

    /// Live keys in the keyspace.
    pub fn key_count(&self) -> usize {
        self.core.lock().unwrap().keyspace.len()
    }
}

// ============================================================================
// Command handlers
//
// All handlers run with the core lock held and arity already validated.
// Mutating handlers call `log_mutation` after their own argument
// validation and before touching the keyspace.
// ============================================================================

pub(super) fn cmd_set(core: &mut ServerCore, command: &Command) -> RespValue {
    if !core.log_mutation(command) {
        return RespValue::error("ERR server error");
    }
    let args = command.args();
    core.keyspace.set(args[0].clone(), args[1].clone());
    RespValue::ok()
}

pub(super) fn cmd_get(core: &mut ServerCore, command: &Command) -> RespValue {
    match core.keyspace.get(&command.args()[0], Instant::now()) {
        Some(value) => RespValue::BulkString(Some(value)),
        None => RespValue::null_bulk(),
    }
}

pub(super) fn cmd_del(core: &mut ServerCore, command: &Command) -> RespValue {
    if !core.log_mutation(command) {
        return RespValue::error("ERR server error");
    }
    let now = Instant::now();
    let mut removed = 0;
    for key in command.args() {
        if core.keyspace.del(key, now) {
            removed += 1;
        }
    }
    RespValue::integer(removed)
}

pub(super) fn cmd_exists(core: &mut ServerCore, command: &Command) -> RespValue {
    let now = Instant::now();
    let mut found = 0;
    for key in command.args() {
        if core.keyspace.exists(key, now) {
            found += 1;
        }
    }
    RespValue::integer(found)
}

pub(super) fn cmd_expire(core: &mut ServerCore, command: &Command) -> RespValue {
    let Some(seconds) = parse_i64(&command.args()[1]) else {
        return integer_argument_error();
    };
    let Some(ms) = seconds.checked_mul(1000) else {
        return integer_argument_error();
    };
    apply_expire(core, command, ms)
}

pub(super) fn cmd_pexpire(core: &mut ServerCore, command: &Command) -> RespValue {
    let Some(ms) = parse_i64(&command.args()[1]) else {
        return integer_argument_error();
    };
    apply_expire(core, command, ms)
}

/// Shared tail of EXPIRE/PEXPIRE once the relative deadline is in
/// milliseconds. A non-positive deadline deletes the key outright.
fn apply_expire(core: &mut ServerCore, command: &Command, ms: i64) -> RespValue {
    let now = Instant::now();
    let deadline = if ms > 0 {
        match now.checked_add(Duration::from_millis(ms as u64)) {
            Some(deadline) => Some(deadline),
            None => return integer_argument_error(),
        }
    } else {
        None
    };

    if !core.log_mutation(command) {
        return RespValue::error("ERR server error");
    }

    let key = &command.args()[0];
    match deadline {
        Some(deadline) => RespValue::integer(core.keyspace.expire_at(key, deadline, now)),
        None => RespValue::integer(i64::from(core.keyspace.del(key, now))),
    }
}

pub(super) fn cmd_persist(core: &mut ServerCore, command: &Command) -> RespValue {
    if !core.log_mutation(command) {
        return RespValue::error("ERR server error");
    }
    RespValue::integer(core.keyspace.persist(&command.args()[0], Instant::now()))
}

pub(super) fn cmd_ttl(core: &mut ServerCore, command: &Command) -> RespValue {
    RespValue::integer(core.keyspace.ttl(&command.args()[0], Instant::now()))
}

pub(super) fn cmd_pttl(core: &mut ServerCore, command: &Command) -> RespValue {
    RespValue::integer(core.keyspace.pttl(&command.args()[0], Instant::now()))
}

pub(super) fn cmd_keys(core: &mut ServerCore, command: &Command) -> RespValue {
    let keys = core.keyspace.keys(&command.args()[0], Instant::now());
    RespValue::array(
        keys.into_iter()
            .map(|key| RespValue::BulkString(Some(key)))
            .collect(),
    )
}

pub(super) fn cmd_info(core: &mut ServerCore, _command: &Command) -> RespValue {
    let mut info = String::new();
    info.push_str("# Server\r\n");
    info.push_str(&format!("version:{}\r\n", crate::VERSION));
    info.push_str(&format!(
        "uptime_in_seconds:{}\r\n",
        core.start_time.elapsed().as_secs()
    ));
    info.push_str("\r\n# Stats\r\n");
    info.push_str(&format!(
        "total_commands_processed:{}\r\n",
        core.commands_processed
    ));
    info.push_str(&format!("keyspace_hits:{}\r\n", core.keyspace.hits()));
    info.push_str(&format!("keyspace_misses:{}\r\n", core.keyspace.misses()));
    info.push_str("\r\n# Keyspace\r\n");
    info.push_str(&format!("db0:keys={}\r\n", core.keyspace.len()));
    RespValue::bulk(info)
}

pub(super) fn cmd_ping(_core: &mut ServerCore, command: &Command) -> RespValue {
    match command.args() {
        [] => RespValue::simple_string("PONG"),
        [message] => RespValue::BulkString(Some(message.clone())),
        _ => RespValue::error(format!(
            "ERR wrong number of arguments for '{}' command",
            command.raw_name()
        )),
    }
}

pub(super) fn cmd_echo(_core: &mut ServerCore, command: &Command) -> RespValue {
    RespValue::BulkString(Some(command.args()[0].clone()))
}

pub(super) fn cmd_dbsize(core: &mut ServerCore, _command: &Command) -> RespValue {
    RespValue::integer(core.keyspace.len() as i64)
}

pub(super) fn cmd_flushdb(core: &mut ServerCore, command: &Command) -> RespValue {
    if !core.log_mutation(command) {
        return RespValue::error("ERR server error");
    }
    core.keyspace.flush();
    RespValue::ok()
}

fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn integer_argument_error() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::array(
            parts
                .iter()
                .map(|part| RespValue::bulk(part.to_string()))
                .collect(),
        )
    }

    fn reply(dispatcher: &Dispatcher, session: &mut TransactionSession, parts: &[&str]) -> RespValue {
        match dispatcher.dispatch(session, cmd(parts)) {
            DispatchOutcome::Reply(value) => value,
            DispatchOutcome::FatalReply(value) => panic!("unexpected fatal reply: {}", value),
        }
    }

    fn temp_aof_path() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "cinderkv_dispatch_{}_{}.aof",
            std::process::id(),
            n
        ))
    }

    #[test]
    fn test_set_get_roundtrip() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["SET", "name", "alice"]),
            RespValue::ok()
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["GET", "name"]),
            RespValue::bulk("alice")
        );
    }

    #[test]
    fn test_get_missing_is_nil() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["GET", "absent"]),
            RespValue::null_bulk()
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["set", "k", "v"]),
            RespValue::ok()
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["GeT", "k"]),
            RespValue::bulk("v")
        );
    }

    #[test]
    fn test_unknown_command() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["NOSUCH", "x"]),
            RespValue::error("ERR unknown command 'NOSUCH'")
        );
    }

    #[test]
    fn test_arity_error() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["GET"]),
            RespValue::error("ERR wrong number of arguments for 'GET' command")
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["SET", "only-key"]),
            RespValue::error("ERR wrong number of arguments for 'SET' command")
        );
    }

    #[test]
    fn test_bad_shape_is_fatal() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        let outcome = dispatcher.dispatch(&mut session, RespValue::bulk("SET"));
        assert!(matches!(
            outcome,
            DispatchOutcome::FatalReply(RespValue::Error(ref e)) if e == "ERR Protocol error"
        ));

        let outcome = dispatcher.dispatch(
            &mut session,
            RespValue::array(vec![RespValue::Integer(1)]),
        );
        assert!(matches!(outcome, DispatchOutcome::FatalReply(_)));
    }

    #[test]
    fn test_del_and_exists() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "a", "1"]);
        reply(&dispatcher, &mut session, &["SET", "b", "2"]);

        assert_eq!(
            reply(&dispatcher, &mut session, &["EXISTS", "a", "b", "c"]),
            RespValue::integer(2)
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["DEL", "a", "b", "c"]),
            RespValue::integer(2)
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["EXISTS", "a"]),
            RespValue::integer(0)
        );
    }

    #[test]
    fn test_expire_ttl_persist() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "k", "v"]);
        assert_eq!(
            reply(&dispatcher, &mut session, &["TTL", "k"]),
            RespValue::integer(-1)
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["EXPIRE", "k", "100"]),
            RespValue::integer(1)
        );
        match reply(&dispatcher, &mut session, &["TTL", "k"]) {
            RespValue::Integer(ttl) => assert!(ttl > 0 && ttl <= 100),
            other => panic!("unexpected reply: {}", other),
        }
        match reply(&dispatcher, &mut session, &["PTTL", "k"]) {
            RespValue::Integer(pttl) => assert!(pttl > 99_000 && pttl <= 100_000),
            other => panic!("unexpected reply: {}", other),
        }
        assert_eq!(
            reply(&dispatcher, &mut session, &["PERSIST", "k"]),
            RespValue::integer(1)
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["TTL", "k"]),
            RespValue::integer(-1)
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["TTL", "missing"]),
            RespValue::integer(-2)
        );
    }

    #[test]
    fn test_expire_missing_key() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["EXPIRE", "missing", "10"]),
            RespValue::integer(0)
        );
    }

    #[test]
    fn test_expire_argument_must_be_integer() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "k", "v"]);
        assert_eq!(
            reply(&dispatcher, &mut session, &["EXPIRE", "k", "soon"]),
            RespValue::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_set_clears_expiration() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "k", "v1"]);
        reply(&dispatcher, &mut session, &["EXPIRE", "k", "100"]);
        reply(&dispatcher, &mut session, &["SET", "k", "v2"]);
        assert_eq!(
            reply(&dispatcher, &mut session, &["TTL", "k"]),
            RespValue::integer(-1)
        );
    }

    #[test]
    fn test_keys_command() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "user:1", "a"]);
        reply(&dispatcher, &mut session, &["SET", "user:2", "b"]);
        reply(&dispatcher, &mut session, &["SET", "other", "c"]);

        match reply(&dispatcher, &mut session, &["KEYS", "user:*"]) {
            RespValue::Array(Some(keys)) => assert_eq!(keys.len(), 2),
            other => panic!("unexpected reply: {}", other),
        }
    }

    #[test]
    fn test_ping_and_echo() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["PING"]),
            RespValue::simple_string("PONG")
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["PING", "hi"]),
            RespValue::bulk("hi")
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["ECHO", "hello"]),
            RespValue::bulk("hello")
        );
    }

    #[test]
    fn test_dbsize_and_flushdb() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "a", "1"]);
        reply(&dispatcher, &mut session, &["SET", "b", "2"]);
        assert_eq!(
            reply(&dispatcher, &mut session, &["DBSIZE"]),
            RespValue::integer(2)
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["FLUSHDB"]),
            RespValue::ok()
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["DBSIZE"]),
            RespValue::integer(0)
        );
    }

    #[test]
    fn test_commands_processed_counts_only_well_formed() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "k", "v"]);
        reply(&dispatcher, &mut session, &["GET", "k"]);
        // Unknown name and arity failures are rejected before the counter
        reply(&dispatcher, &mut session, &["NOSUCH"]);
        reply(&dispatcher, &mut session, &["GET"]);

        assert_eq!(dispatcher.commands_processed(), 2);
    }

    #[test]
    fn test_info_sections() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "k", "v"]);
        reply(&dispatcher, &mut session, &["GET", "k"]);
        reply(&dispatcher, &mut session, &["GET", "missing"]);

        let info = match reply(&dispatcher, &mut session, &["INFO"]) {
            RespValue::BulkString(Some(data)) => String::from_utf8(data.to_vec()).unwrap(),
            other => panic!("unexpected reply: {}", other),
        };

        assert!(info.contains("# Server"));
        assert!(info.contains("# Stats"));
        assert!(info.contains("total_commands_processed:4"));
        assert!(info.contains("keyspace_hits:1"));
        assert!(info.contains("keyspace_misses:1"));
        assert!(info.contains("db0:keys=1"));
    }

    #[test]
    fn test_multi_queues_and_exec_applies() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(reply(&dispatcher, &mut session, &["MULTI"]), RespValue::ok());
        assert_eq!(
            reply(&dispatcher, &mut session, &["SET", "a", "1"]),
            RespValue::simple_string("QUEUED")
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["SET", "b", "2"]),
            RespValue::simple_string("QUEUED")
        );

        // Nothing applied yet: another connection sees no keys
        let mut other = TransactionSession::new();
        assert_eq!(
            reply(&dispatcher, &mut other, &["GET", "a"]),
            RespValue::null_bulk()
        );

        assert_eq!(
            reply(&dispatcher, &mut session, &["EXEC"]),
            RespValue::array(vec![RespValue::ok(), RespValue::ok()])
        );
        assert_eq!(
            reply(&dispatcher, &mut other, &["GET", "a"]),
            RespValue::bulk("1")
        );
        assert!(!session.in_multi());
    }

    #[test]
    fn test_empty_exec() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["MULTI"]);
        assert_eq!(
            reply(&dispatcher, &mut session, &["EXEC"]),
            RespValue::array(vec![])
        );
    }

    #[test]
    fn test_exec_without_multi() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["EXEC"]),
            RespValue::error("ERR EXEC without MULTI")
        );
    }

    #[test]
    fn test_discard_without_multi() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        assert_eq!(
            reply(&dispatcher, &mut session, &["DISCARD"]),
            RespValue::error("ERR DISCARD without MULTI")
        );
    }

    #[test]
    fn test_nested_multi() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["MULTI"]);
        assert_eq!(
            reply(&dispatcher, &mut session, &["MULTI"]),
            RespValue::error("ERR MULTI calls can not be nested")
        );
        // Still in the original transaction
        assert!(session.in_multi());
    }

    #[test]
    fn test_discard_drops_queue() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["MULTI"]);
        reply(&dispatcher, &mut session, &["SET", "a", "1"]);
        assert_eq!(
            reply(&dispatcher, &mut session, &["DISCARD"]),
            RespValue::ok()
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["GET", "a"]),
            RespValue::null_bulk()
        );
    }

    #[test]
    fn test_exec_error_does_not_abort() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["MULTI"]);
        reply(&dispatcher, &mut session, &["SET", "a", "1"]);
        reply(&dispatcher, &mut session, &["EXPIRE", "a", "nonsense"]);
        reply(&dispatcher, &mut session, &["SET", "b", "2"]);

        let replies = match reply(&dispatcher, &mut session, &["EXEC"]) {
            RespValue::Array(Some(replies)) => replies,
            other => panic!("unexpected reply: {}", other),
        };
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], RespValue::ok());
        assert!(replies[1].is_error());
        assert_eq!(replies[2], RespValue::ok());

        // The failing element did not roll back its neighbors
        assert_eq!(
            reply(&dispatcher, &mut session, &["GET", "a"]),
            RespValue::bulk("1")
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["GET", "b"]),
            RespValue::bulk("2")
        );
    }

    #[test]
    fn test_nested_reply_shapes_preserved_in_exec() {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();

        reply(&dispatcher, &mut session, &["SET", "k", "v"]);
        reply(&dispatcher, &mut session, &["MULTI"]);
        reply(&dispatcher, &mut session, &["KEYS", "*"]);

        let replies = match reply(&dispatcher, &mut session, &["EXEC"]) {
            RespValue::Array(Some(replies)) => replies,
            other => panic!("unexpected reply: {}", other),
        };
        assert_eq!(
            replies[0],
            RespValue::array(vec![RespValue::bulk("k")])
        );
    }

    #[test]
    fn test_aof_appends_and_replays() {
        let path = temp_aof_path();
        {
            let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
            let dispatcher = Dispatcher::new(Some(aof));
            let mut session = TransactionSession::new();

            reply(&dispatcher, &mut session, &["SET", "name", "alice"]);
            reply(&dispatcher, &mut session, &["SET", "city", "paris"]);
            reply(&dispatcher, &mut session, &["DEL", "city"]);
            // Reads never land in the log
            reply(&dispatcher, &mut session, &["GET", "name"]);
        }

        let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
        assert_eq!(aof.load_commands().unwrap().len(), 3);

        let dispatcher = Dispatcher::new(Some(aof));
        let applied = dispatcher.replay_aof().unwrap();
        assert_eq!(applied, 3);

        let mut session = TransactionSession::new();
        assert_eq!(
            reply(&dispatcher, &mut session, &["GET", "name"]),
            RespValue::bulk("alice")
        );
        assert_eq!(
            reply(&dispatcher, &mut session, &["GET", "city"]),
            RespValue::null_bulk()
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_replay_does_not_reappend() {
        let path = temp_aof_path();
        {
            let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
            let dispatcher = Dispatcher::new(Some(aof));
            let mut session = TransactionSession::new();
            reply(&dispatcher, &mut session, &["SET", "k", "v"]);
        }

        let size_before = std::fs::metadata(&path).unwrap().len();

        let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
        let dispatcher = Dispatcher::new(Some(aof));
        dispatcher.replay_aof().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), size_before);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_exec_mutations_reach_the_aof() {
        let path = temp_aof_path();
        {
            let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
            let dispatcher = Dispatcher::new(Some(aof));
            let mut session = TransactionSession::new();

            reply(&dispatcher, &mut session, &["MULTI"]);
            reply(&dispatcher, &mut session, &["SET", "a", "1"]);
            reply(&dispatcher, &mut session, &["GET", "a"]);
            reply(&dispatcher, &mut session, &["SET", "b", "2"]);
            reply(&dispatcher, &mut session, &["EXEC"]);
        }

        // Only the two mutating queue entries were logged, at EXEC time
        let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
        assert_eq!(aof.load_commands().unwrap().len(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_idempotent_replay() {
        let path = temp_aof_path();
        {
            let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
            let dispatcher = Dispatcher::new(Some(aof));
            let mut session = TransactionSession::new();
            reply(&dispatcher, &mut session, &["SET", "k", "v1"]);
            reply(&dispatcher, &mut session, &["SET", "k", "v2"]);
            reply(&dispatcher, &mut session, &["SET", "other", "x"]);
            reply(&dispatcher, &mut session, &["DEL", "other"]);
        }

        // Replaying the same log twice converges on the same keyspace
        for _ in 0..2 {
            let aof = Aof::open(&path, FsyncPolicy::Always).unwrap();
            let dispatcher = Dispatcher::new(Some(aof));
            dispatcher.replay_aof().unwrap();

            let mut session = TransactionSession::new();
            assert_eq!(
                reply(&dispatcher, &mut session, &["GET", "k"]),
                RespValue::bulk("v2")
            );
            assert_eq!(
                reply(&dispatcher, &mut session, &["EXISTS", "other"]),
                RespValue::integer(0)
            );
            assert_eq!(dispatcher.key_count(), 1);
        }

        let _ = std::fs::remove_file(&path);
    }
}
