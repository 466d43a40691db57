// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Value Objects
//!
//! Vocabulary for supervised child processes: the [`ProcessHandle`] that keys
//! every event, the [`ProcessPhase`] lifecycle, the [`ExitReason`] reported at
//! the end, and the [`InterpreterTable`] that decides how a script is run.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Process lifecycle rules and interpreter lookup, no I/O

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Identity of one spawned child process.
///
/// Timers and exit notifications are keyed to this handle rather than to the
/// owning session, so a late event from a finished process can never touch a
/// newer process started by the same client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle(pub Uuid);

impl ProcessHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a supervised process.
///
/// ```text
/// Spawning ──► Running ──► Draining ──► Exited
///     │                                   ▲
///     └───────────────────────────────────┘  (spawn failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPhase {
    Spawning,
    Running,
    /// The child is gone; remaining stdout/stderr is being flushed.
    Draining,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid process phase transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ProcessPhase,
    pub to: ProcessPhase,
}

impl ProcessPhase {
    pub fn can_transition_to(self, next: ProcessPhase) -> bool {
        matches!(
            (self, next),
            (Self::Spawning, Self::Running)
                | (Self::Spawning, Self::Exited)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Exited)
        )
    }

    pub fn transition(&mut self, next: ProcessPhase) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(next) {
            return Err(InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    pub fn is_live(self) -> bool {
        !matches!(self, Self::Exited)
    }
}

/// Why a supervised process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExitReason {
    /// The process exited on its own. `code` is `None` when a signal ended it.
    Exited { code: Option<i32> },
    /// The wall-clock limit elapsed and the process was killed.
    TimedOut { after_secs: u64 },
    /// The process was killed on request (client kill, session teardown, shutdown).
    Killed,
}

impl ExitReason {
    /// Human message carried by the terminal `execute_end` notification.
    pub fn end_message(&self) -> String {
        match self {
            Self::Exited { code: Some(code) } => format!("Process ended with code {}", code),
            Self::Exited { code: None } => "Process ended by signal".to_string(),
            Self::TimedOut { after_secs } => format!(
                "Process terminated after exceeding the {}s time limit",
                after_secs
            ),
            Self::Killed => "Process was terminated".to_string(),
        }
    }
}

/// Program and leading arguments used to run one kind of script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported file type: {extension}")]
pub struct UnsupportedExtension {
    pub extension: String,
}

/// Maps file extensions (lowercase, with leading dot) to interpreter commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterTable {
    entries: HashMap<String, Vec<String>>,
}

impl InterpreterTable {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(ext, cmd)| (ext.to_lowercase(), cmd))
            .collect();
        Self { entries }
    }

    /// Build the command line for `script`. The script path is always the
    /// final argument, passed straight to the interpreter.
    pub fn invocation_for(&self, script: &Path) -> Result<Invocation, UnsupportedExtension> {
        let extension = extension_of(script);
        let command = self
            .entries
            .get(&extension)
            .filter(|cmd| !cmd.is_empty())
            .ok_or_else(|| UnsupportedExtension {
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension.clone()
                },
            })?;

        let mut args: Vec<String> = command[1..].to_vec();
        args.push(script.to_string_lossy().into_owned());

        Ok(Invocation {
            program: command[0].clone(),
            args,
        })
    }

    pub fn supports(&self, script: &Path) -> bool {
        self.invocation_for(script).is_ok()
    }
}

impl Default for InterpreterTable {
    fn default() -> Self {
        Self::new(default_interpreters())
    }
}

/// `.js` through node, `.py` through python3, `.bat` through `cmd /c`.
pub fn default_interpreters() -> HashMap<String, Vec<String>> {
    HashMap::from([
        (".js".to_string(), vec!["node".to_string()]),
        (".py".to_string(), vec!["python3".to_string()]),
        (".bat".to_string(), vec!["cmd".to_string(), "/c".to_string()]),
    ])
}

/// Lowercased extension with its leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Directory a script runs in: the directory that contains it.
pub fn working_dir_for(script: &Path) -> PathBuf {
    script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_happy_path() {
        let mut phase = ProcessPhase::Spawning;
        phase.transition(ProcessPhase::Running).unwrap();
        phase.transition(ProcessPhase::Draining).unwrap();
        phase.transition(ProcessPhase::Exited).unwrap();
        assert!(!phase.is_live());
    }

    #[test]
    fn test_phase_rejects_skips_and_reversals() {
        let mut phase = ProcessPhase::Running;
        assert!(phase.transition(ProcessPhase::Exited).is_err());
        assert!(phase.transition(ProcessPhase::Spawning).is_err());
        assert_eq!(phase, ProcessPhase::Running);

        let mut exited = ProcessPhase::Exited;
        assert!(exited.transition(ProcessPhase::Running).is_err());
    }

    #[test]
    fn test_default_interpreters() {
        let table = InterpreterTable::default();

        let js = table.invocation_for(Path::new("/srv/m/app.js")).unwrap();
        assert_eq!(js.program, "node");
        assert_eq!(js.args, vec!["/srv/m/app.js"]);

        let bat = table.invocation_for(Path::new("/srv/m/run.BAT")).unwrap();
        assert_eq!(bat.program, "cmd");
        assert_eq!(bat.args, vec!["/c", "/srv/m/run.BAT"]);

        assert!(table.supports(Path::new("x.py")));
    }

    #[test]
    fn test_unsupported_extension() {
        let table = InterpreterTable::default();
        let err = table.invocation_for(Path::new("tool.exe")).unwrap_err();
        assert_eq!(err.extension, ".exe");
        let err = table.invocation_for(Path::new("Makefile")).unwrap_err();
        assert_eq!(err.extension, "(none)");
    }

    #[test]
    fn test_end_messages() {
        assert_eq!(
            ExitReason::Exited { code: Some(0) }.end_message(),
            "Process ended with code 0"
        );
        assert!(ExitReason::TimedOut { after_secs: 300 }
            .end_message()
            .contains("terminated"));
    }

    #[test]
    fn test_working_dir_is_script_parent() {
        assert_eq!(
            working_dir_for(Path::new("/srv/m/sub/app.py")),
            PathBuf::from("/srv/m/sub")
        );
    }
}
