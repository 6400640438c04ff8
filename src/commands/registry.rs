//! Command table
//!
//! Mirrors the classic "command table + execution path" layout: the
//! protocol layer produces a canonical frame, the registry resolves its
//! descriptor, and the dispatcher runs the matching handler. Lookup is
//! case-insensitive via the frame's uppercased name.

use std::collections::HashMap;

use crate::commands::command::Command;
use crate::commands::handler::{self, ServerCore};
use crate::protocol::RespValue;

/// Handler function signature for commands that execute against the
/// server core.
pub type CommandHandler = fn(&mut ServerCore, &Command) -> RespValue;

/// Arity constraints for a command (argument count, name excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments.
    Exact(usize),
    /// At least this many arguments.
    AtLeast(usize),
}

impl Arity {
    /// Whether `argc` satisfies this constraint.
    pub fn accepts(&self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == *n,
            Arity::AtLeast(n) => argc >= *n,
        }
    }
}

/// How a command executes.
#[derive(Debug, Clone, Copy)]
pub enum CommandKind {
    /// Runs against the server core via its handler.
    Core(CommandHandler),
    /// MULTI/EXEC/DISCARD: handled by the dispatcher against the
    /// connection's transaction state.
    Control,
}

/// Metadata and callback for one command table entry.
#[derive(Debug)]
pub struct CommandSpec {
    /// Canonical uppercase command name.
    pub name: &'static str,
    /// Arity constraint checked before execution.
    pub arity: Arity,
    /// Whether the command mutates the keyspace (gates AOF appends).
    pub mutating: bool,
    /// Execution path.
    pub kind: CommandKind,
}

static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        name: "SET",
        arity: Arity::Exact(2),
        mutating: true,
        kind: CommandKind::Core(handler::cmd_set),
    },
    CommandSpec {
        name: "GET",
        arity: Arity::Exact(1),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_get),
    },
    CommandSpec {
        name: "DEL",
        arity: Arity::AtLeast(1),
        mutating: true,
        kind: CommandKind::Core(handler::cmd_del),
    },
    CommandSpec {
        name: "EXISTS",
        arity: Arity::AtLeast(1),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_exists),
    },
    CommandSpec {
        name: "EXPIRE",
        arity: Arity::Exact(2),
        mutating: true,
        kind: CommandKind::Core(handler::cmd_expire),
    },
    CommandSpec {
        name: "PEXPIRE",
        arity: Arity::Exact(2),
        mutating: true,
        kind: CommandKind::Core(handler::cmd_pexpire),
    },
    CommandSpec {
        name: "PERSIST",
        arity: Arity::Exact(1),
        mutating: true,
        kind: CommandKind::Core(handler::cmd_persist),
    },
    CommandSpec {
        name: "TTL",
        arity: Arity::Exact(1),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_ttl),
    },
    CommandSpec {
        name: "PTTL",
        arity: Arity::Exact(1),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_pttl),
    },
    CommandSpec {
        name: "KEYS",
        arity: Arity::Exact(1),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_keys),
    },
    CommandSpec {
        name: "INFO",
        arity: Arity::AtLeast(0),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_info),
    },
    CommandSpec {
        name: "PING",
        arity: Arity::AtLeast(0),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_ping),
    },
    CommandSpec {
        name: "ECHO",
        arity: Arity::Exact(1),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_echo),
    },
    CommandSpec {
        name: "DBSIZE",
        arity: Arity::Exact(0),
        mutating: false,
        kind: CommandKind::Core(handler::cmd_dbsize),
    },
    CommandSpec {
        name: "FLUSHDB",
        arity: Arity::Exact(0),
        mutating: true,
        kind: CommandKind::Core(handler::cmd_flushdb),
    },
    CommandSpec {
        name: "MULTI",
        arity: Arity::Exact(0),
        mutating: false,
        kind: CommandKind::Control,
    },
    CommandSpec {
        name: "EXEC",
        arity: Arity::Exact(0),
        mutating: false,
        kind: CommandKind::Control,
    },
    CommandSpec {
        name: "DISCARD",
        arity: Arity::Exact(0),
        mutating: false,
        kind: CommandKind::Control,
    },
];

/// Name-to-descriptor table with case-insensitive lookup.
#[derive(Debug)]
pub struct CommandRegistry {
    table: HashMap<&'static str, &'static CommandSpec>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Builds the registry over the static command table.
    pub fn new() -> Self {
        let table = COMMAND_TABLE.iter().map(|spec| (spec.name, spec)).collect();
        Self { table }
    }

    /// Resolves a descriptor by uppercased name.
    pub fn lookup(&self, name: &str) -> Option<&'static CommandSpec> {
        self.table.get(name).copied()
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Always false: the table is static and non-empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
