use thiserror::Error;

use crate::OperatingMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Arm,
    Start,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Arm => f.write_str("ARM"),
            Command::Start => f.write_str("start sequence"),
        }
    }
}

/// Which guard blocked a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    Permissives,
    Interlocks,
}

impl std::fmt::Display for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Guard::Permissives => f.write_str("one or more permissives are not satisfied"),
            Guard::Interlocks => f.write_str("interlock(s) active"),
        }
    }
}

/// A rejected operator command. Nothing was mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Cannot {command} — {guard}")]
    GuardRejected { command: Command, guard: Guard },
    #[error("Cannot {command} — system is not {required}")]
    InvalidTransition {
        command: Command,
        mode: OperatingMode,
        required: OperatingMode,
    },
}
