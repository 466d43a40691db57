// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process Supervisor
//!
//! Runs managed scripts as child processes, at most one per session, and turns
//! everything they do into [`ProcessEvent`]s on a single channel that the
//! protocol loop consumes alongside inbound datagrams.
//!
//! Each child gets one supervision task plus three pump tasks:
//!
//! ```text
//! stdin_rx ──► pump_stdin ──► child stdin
//! child stdout ──► pump_output ──► ProcessEvent::Stdout
//! child stderr ──► pump_output ──► ProcessEvent::Stderr
//! supervise: select { wait(), timeout, kill token } ──► ProcessEvent::Draining
//!            ──► drain pumps ──► ProcessEvent::Exited
//! ```
//!
//! `Exited` is sent exactly once per handle, after both output pumps are done
//! (or the drain grace period ran out), so it is always the last event for that
//! handle on the channel. Observing the events walks the process through
//! `Running → Draining → Exited`; a kill request moves it to `Draining` at once
//! so no further input is accepted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::process::{
    working_dir_for, ExitReason, InterpreterTable, ProcessHandle, ProcessPhase,
    UnsupportedExtension,
};
use crate::domain::session::ClientId;
use crate::infrastructure::telemetry;

/// How long output pumps may keep running after the child is gone.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout {
        client: ClientId,
        handle: ProcessHandle,
        data: String,
    },
    Stderr {
        client: ClientId,
        handle: ProcessHandle,
        data: String,
    },
    /// The time limit elapsed; `Exited` follows once the kill completes.
    TimedOut {
        client: ClientId,
        handle: ProcessHandle,
        after_secs: u64,
    },
    /// The child is gone; remaining output is being flushed.
    Draining {
        client: ClientId,
        handle: ProcessHandle,
    },
    Exited {
        client: ClientId,
        handle: ProcessHandle,
        reason: ExitReason,
    },
}

impl ProcessEvent {
    pub fn client(&self) -> ClientId {
        match self {
            Self::Stdout { client, .. }
            | Self::Stderr { client, .. }
            | Self::TimedOut { client, .. }
            | Self::Draining { client, .. }
            | Self::Exited { client, .. } => *client,
        }
    }

    pub fn handle(&self) -> ProcessHandle {
        match self {
            Self::Stdout { handle, .. }
            | Self::Stderr { handle, .. }
            | Self::TimedOut { handle, .. }
            | Self::Draining { handle, .. }
            | Self::Exited { handle, .. } => *handle,
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("A process is already running for this session")]
    AlreadyRunning(ProcessHandle),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedExtension),

    #[error("Failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub interpreters: InterpreterTable,
    pub timeout: Duration,
    pub chunk_bytes: usize,
    pub drain_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            interpreters: InterpreterTable::default(),
            timeout: Duration::from_secs(300),
            chunk_bytes: 8192,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

#[derive(Debug)]
struct ActiveProcess {
    handle: ProcessHandle,
    script: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    phase: ProcessPhase,
    stdin_tx: mpsc::UnboundedSender<String>,
    kill: CancellationToken,
}

/// Snapshot of a session's running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub handle: ProcessHandle,
    pub script: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub phase: ProcessPhase,
}

pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    active: HashMap<ClientId, ActiveProcess>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                settings,
                active: HashMap::new(),
                events_tx,
            },
            events_rx,
        )
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Spawn `script` on behalf of `client`.
    ///
    /// The script runs through the interpreter registered for its extension,
    /// with its own directory as the working directory. `display_name` is the
    /// name the client used and only appears in logs.
    pub fn start(
        &mut self,
        client: ClientId,
        script: &Path,
        display_name: &str,
    ) -> Result<ProcessHandle, SupervisorError> {
        if let Some(existing) = self.active.get(&client) {
            return Err(SupervisorError::AlreadyRunning(existing.handle));
        }

        let invocation = self.settings.interpreters.invocation_for(script)?;
        let handle = ProcessHandle::new();
        let mut phase = ProcessPhase::Spawning;

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(working_dir_for(script))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| {
            warn!(
                client_id = %client,
                program = %invocation.program,
                error = %source,
                "Failed to spawn process"
            );
            SupervisorError::SpawnFailed {
                program: invocation.program.clone(),
                source,
            }
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SupervisorError::SpawnFailed {
                program: invocation.program,
                source: std::io::Error::other("child stdio was not captured"),
            });
        };

        phase
            .transition(ProcessPhase::Running)
            .map_err(|e| SupervisorError::SpawnFailed {
                program: invocation.program.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let pid = child.id();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();

        let run = RunContext {
            client,
            handle,
            events_tx: self.events_tx.clone(),
            timeout: self.settings.timeout,
            chunk_bytes: self.settings.chunk_bytes.max(1),
            drain_grace: self.settings.drain_grace,
            kill: kill.clone(),
        };
        tokio::spawn(supervise(child, stdin, stdout, stderr, stdin_rx, run));

        info!(
            client_id = %client,
            process = %handle,
            pid = ?pid,
            script = %display_name,
            program = %invocation.program,
            "Process started"
        );
        metrics::counter!(telemetry::PROCESSES_STARTED).increment(1);

        self.active.insert(
            client,
            ActiveProcess {
                handle,
                script: display_name.to_string(),
                pid,
                started_at: Utc::now(),
                phase,
                stdin_tx,
                kill,
            },
        );
        Ok(handle)
    }

    /// Send one line of input to the client's process. A newline is appended.
    /// Returns false when the client has no live process.
    pub fn forward_input(&self, client: &ClientId, text: &str) -> bool {
        match self.active.get(client) {
            Some(active) if active.phase == ProcessPhase::Running => {
                active.stdin_tx.send(text.to_string()).is_ok()
            }
            _ => false,
        }
    }

    /// Request termination of the client's process. The process moves to
    /// `Draining` immediately; the entry stays until the matching `Exited`
    /// event is observed.
    pub fn terminate(&mut self, client: &ClientId) -> bool {
        match self.active.get_mut(client) {
            Some(active) => {
                debug!(client_id = %client, process = %active.handle, "Terminating process");
                active.kill.cancel();
                active.enter(ProcessPhase::Draining);
                true
            }
            None => false,
        }
    }

    pub fn terminate_all(&mut self) {
        let clients: Vec<ClientId> = self.active.keys().copied().collect();
        for client in &clients {
            self.terminate(client);
        }
    }

    /// Fold an event into the bookkeeping.
    ///
    /// Returns false for events whose handle is not the client's current
    /// process; such stragglers must not be forwarded.
    pub fn observe(&mut self, event: &ProcessEvent) -> bool {
        let client = event.client();
        let Some(active) = self.active.get_mut(&client) else {
            return false;
        };
        if active.handle != event.handle() {
            debug!(client_id = %client, process = %event.handle(), "Ignoring event from stale process");
            return false;
        }

        match event {
            ProcessEvent::TimedOut { .. } => {
                metrics::counter!(telemetry::PROCESSES_TIMED_OUT).increment(1);
                active.enter(ProcessPhase::Draining);
            }
            ProcessEvent::Draining { .. } => {
                active.enter(ProcessPhase::Draining);
            }
            ProcessEvent::Exited { reason, .. } => {
                active.enter(ProcessPhase::Exited);
                info!(
                    client_id = %client,
                    process = %active.handle,
                    script = %active.script,
                    reason = ?reason,
                    phase = ?active.phase,
                    runtime_ms = (Utc::now() - active.started_at).num_milliseconds(),
                    "Process exited"
                );
                self.active.remove(&client);
            }
            ProcessEvent::Stdout { .. } | ProcessEvent::Stderr { .. } => {}
        }
        true
    }

    pub fn is_active(&self, client: &ClientId) -> bool {
        self.active.contains_key(client)
    }

    pub fn info(&self, client: &ClientId) -> Option<ProcessInfo> {
        self.active.get(client).map(|a| ProcessInfo {
            handle: a.handle,
            script: a.script.clone(),
            pid: a.pid,
            started_at: a.started_at,
            phase: a.phase,
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl ActiveProcess {
    /// Move to `next`, treating a repeat of the current phase as a no-op.
    fn enter(&mut self, next: ProcessPhase) {
        if self.phase == next {
            return;
        }
        if let Err(e) = self.phase.transition(next) {
            warn!(process = %self.handle, error = %e, "Rejected process phase change");
        }
    }
}

struct RunContext {
    client: ClientId,
    handle: ProcessHandle,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    timeout: Duration,
    chunk_bytes: usize,
    drain_grace: Duration,
    kill: CancellationToken,
}

enum Stop {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Killed,
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

async fn supervise(
    mut child: Child,
    stdin: ChildStdin,
    stdout: impl AsyncRead + Unpin + Send + 'static,
    stderr: impl AsyncRead + Unpin + Send + 'static,
    stdin_rx: mpsc::UnboundedReceiver<String>,
    run: RunContext,
) {
    let writer = tokio::spawn(pump_stdin(stdin, stdin_rx));
    let out_pump = tokio::spawn(pump_output(
        stdout,
        OutputStream::Stdout,
        run.client,
        run.handle,
        run.events_tx.clone(),
        run.chunk_bytes,
    ));
    let err_pump = tokio::spawn(pump_output(
        stderr,
        OutputStream::Stderr,
        run.client,
        run.handle,
        run.events_tx.clone(),
        run.chunk_bytes,
    ));
    let pump_aborts = [out_pump.abort_handle(), err_pump.abort_handle()];

    let stop = tokio::select! {
        status = child.wait() => Stop::Exited(status),
        _ = tokio::time::sleep(run.timeout) => Stop::TimedOut,
        _ = run.kill.cancelled() => Stop::Killed,
    };

    let reason = match stop {
        Stop::Exited(Ok(status)) => ExitReason::Exited { code: status.code() },
        Stop::Exited(Err(e)) => {
            warn!(process = %run.handle, error = %e, "Failed to wait for process");
            ExitReason::Exited { code: None }
        }
        Stop::TimedOut => {
            let after_secs = run.timeout.as_secs();
            warn!(client_id = %run.client, process = %run.handle, after_secs, "Process exceeded time limit");
            let _ = run.events_tx.send(ProcessEvent::TimedOut {
                client: run.client,
                handle: run.handle,
                after_secs,
            });
            kill_child(&mut child, run.handle).await;
            ExitReason::TimedOut { after_secs }
        }
        Stop::Killed => {
            kill_child(&mut child, run.handle).await;
            ExitReason::Killed
        }
    };

    writer.abort();

    let _ = run.events_tx.send(ProcessEvent::Draining {
        client: run.client,
        handle: run.handle,
    });

    let drained = tokio::time::timeout(run.drain_grace, async {
        let _ = out_pump.await;
        let _ = err_pump.await;
    })
    .await;
    if drained.is_err() {
        debug!(process = %run.handle, "Output still open after drain grace, abandoning pumps");
        for pump in &pump_aborts {
            pump.abort();
        }
    }

    let _ = run.events_tx.send(ProcessEvent::Exited {
        client: run.client,
        handle: run.handle,
        reason,
    });
}

async fn kill_child(child: &mut Child, handle: ProcessHandle) {
    if let Err(e) = child.start_kill() {
        debug!(process = %handle, error = %e, "Kill signal not delivered");
    }
    if let Err(e) = child.wait().await {
        warn!(process = %handle, error = %e, "Failed to reap killed process");
    }
}

async fn pump_stdin(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let mut payload = line.into_bytes();
        payload.push(b'\n');
        if let Err(e) = stdin.write_all(&payload).await {
            debug!(error = %e, "Process stdin closed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(error = %e, "Process stdin flush failed");
            break;
        }
    }
}

async fn pump_output<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: OutputStream,
    client: ClientId,
    handle: ProcessHandle,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    chunk_bytes: usize,
) {
    let mut buf = vec![0u8; chunk_bytes];
    let mut pending: Vec<u8> = Vec::new();

    let emit = |data: String| {
        let event = match stream {
            OutputStream::Stdout => ProcessEvent::Stdout { client, handle, data },
            OutputStream::Stderr => ProcessEvent::Stderr { client, handle, data },
        };
        let _ = events_tx.send(event);
    };

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_complete_utf8(&mut pending);
                if !text.is_empty() {
                    emit(text);
                }
            }
            Err(e) => {
                debug!(process = %handle, stream = ?stream, error = %e, "Output read failed");
                break;
            }
        }
    }

    if !pending.is_empty() {
        emit(String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Split off the longest decodable prefix of `pending`, keeping an incomplete
/// trailing code point for the next read. Invalid bytes are replaced.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}
