//! What a job runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A job's command: a shell command line or an argument vector.
///
/// Stored as JSON text, so `"echo hi"` and `["echo", "hi"]` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobCommand {
    /// Run through the platform shell.
    Shell(String),
    /// Run directly: the first element is the program, the rest its arguments.
    Argv(Vec<String>),
}

impl JobCommand {
    /// Whether there is nothing to run.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Shell(line) => line.trim().is_empty(),
            Self::Argv(argv) => argv.first().is_none_or(|program| program.trim().is_empty()),
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.write_str(line),
            Self::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

impl From<String> for JobCommand {
    fn from(line: String) -> Self {
        Self::Shell(line)
    }
}

impl From<&str> for JobCommand {
    fn from(line: &str) -> Self {
        Self::Shell(line.to_string())
    }
}

impl From<Vec<String>> for JobCommand {
    fn from(argv: Vec<String>) -> Self {
        Self::Argv(argv)
    }
}

impl<const N: usize> From<[&str; N]> for JobCommand {
    fn from(argv: [&str; N]) -> Self {
        Self::Argv(argv.iter().map(|arg| arg.to_string()).collect())
    }
}
