// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Command Dispatcher
//!
//! Routes decoded client messages to the registry, the managed file store and
//! the process supervisor, enforcing role capabilities on the way, and turns
//! process events into client notifications.
//!
//! The dispatcher owns every piece of mutable server state and is driven from a
//! single task, so handlers run one at a time and never observe each other
//! half-way.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Authorization and routing for every inbound message

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::session_registry::SessionRegistry;
use crate::domain::path_sanitizer::{PathSanitizer, PathSanitizerError};
use crate::domain::protocol::{
    decode_client_message, ClientMessage, DecodeError, ErrorKind, FileOperation, ServerMessage,
    UnknownOperation,
};
use crate::domain::role::{Capability, Role};
use crate::domain::server_config::ServerConfig;
use crate::domain::session::{ClientId, Session};
use crate::infrastructure::managed_files::{
    format_file_size, format_modified, FileStoreError, ManagedFiles,
};
use crate::infrastructure::notifier::Notifier;
use crate::infrastructure::process_supervisor::{
    ProcessEvent, ProcessSupervisor, SupervisorError, SupervisorSettings,
    DEFAULT_DRAIN_GRACE,
};
use crate::infrastructure::telemetry;

/// A request that could not be carried out. Rendered to the client as an
/// `error` message.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<String>,
    },

    #[error("Permission denied: Your role cannot {}", .0.verb_phrase())]
    Permission(Capability),

    #[error("{message}")]
    Io {
        message: String,
        details: Option<String>,
    },

    #[error("{message}")]
    Process {
        message: String,
        details: Option<String>,
    },
}

impl CommandError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Permission(_) => ErrorKind::Permission,
            Self::Io { .. } => ErrorKind::Io,
            Self::Process { .. } => ErrorKind::Process,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Validation { details, .. }
            | Self::Io { details, .. }
            | Self::Process { details, .. } => details.as_deref(),
            Self::Permission(_) => None,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.kind(), self.to_string(), self.details().map(str::to_string))
    }
}

pub struct CommandDispatcher {
    config: Arc<ServerConfig>,
    sanitizer: PathSanitizer,
    files: ManagedFiles,
    registry: SessionRegistry,
    supervisor: ProcessSupervisor,
    notifier: Notifier,
}

impl CommandDispatcher {
    /// Prepare the managed directory and build a dispatcher around it.
    ///
    /// Returns the receiving end of the process event channel; the caller feeds
    /// each event back through [`handle_process_event`](Self::handle_process_event).
    pub async fn from_config(
        config: Arc<ServerConfig>,
        notifier: Notifier,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let files = ManagedFiles::open(&config.storage.managed_dir).await?;
        let sanitizer = PathSanitizer::new(files.root());

        let (supervisor, events) = ProcessSupervisor::new(SupervisorSettings {
            interpreters: config.interpreter_table(),
            timeout: config.execution_timeout(),
            chunk_bytes: config.execution.output_chunk_bytes,
            drain_grace: DEFAULT_DRAIN_GRACE,
        });

        Ok((
            Self {
                config,
                sanitizer,
                files,
                registry: SessionRegistry::new(),
                supervisor,
                notifier,
            },
            events,
        ))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn files(&self) -> &ManagedFiles {
        &self.files
    }

    /// Decode and handle one inbound datagram. Undecodable input is logged and
    /// dropped without a reply.
    pub async fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        metrics::counter!(telemetry::DATAGRAMS_RECEIVED).increment(1);
        let client = ClientId::from(from);

        match decode_client_message(bytes) {
            Ok(message) => self.handle_message(client, message).await,
            Err(DecodeError::UnknownType(kind)) => {
                warn!(client_id = %client, message_type = %kind, "Unknown message type");
                metrics::counter!(telemetry::DATAGRAMS_DROPPED).increment(1);
            }
            Err(e) => {
                warn!(client_id = %client, error = %e, "Error processing message");
                metrics::counter!(telemetry::DATAGRAMS_DROPPED).increment(1);
            }
        }
    }

    pub async fn handle_message(&mut self, client: ClientId, message: ClientMessage) {
        if let ClientMessage::Register { user_name } = message {
            self.handle_register(client, user_name.as_deref().unwrap_or_default());
            return;
        }

        if !self.registry.touch(&client) {
            debug!(client_id = %client, "Dropping message from unregistered client");
            metrics::counter!(telemetry::DATAGRAMS_DROPPED).increment(1);
            return;
        }

        let result = match message {
            ClientMessage::Register { .. } => Ok(None),
            ClientMessage::FileAccess {
                operation,
                filename,
                content,
            } => {
                self.handle_file_access(client, &operation, filename, content)
                    .await
            }
            ClientMessage::ProcessInput { input } => {
                if !self.supervisor.forward_input(&client, &input) {
                    debug!(client_id = %client, "No running process for input");
                }
                Ok(None)
            }
            ClientMessage::ProcessKill => self.handle_process_kill(client),
            ClientMessage::RoleManagement {
                target_client_id,
                new_role,
            } => self.handle_role_management(client, &target_client_id, &new_role),
        };

        match result {
            Ok(Some(reply)) => {
                self.notifier.reply(&client, reply);
            }
            Ok(None) => {}
            Err(e) => {
                info!(client_id = %client, kind = e.kind().as_str(), error = %e, "Request rejected");
                self.notifier.reply(&client, e.to_message());
            }
        }
    }

    fn handle_register(&mut self, client: ClientId, user_name: &str) {
        let registration = self.registry.register(client, user_name);
        let session = &registration.session;

        if registration.is_admin {
            info!(client_id = %client, user_name = %session.user_name, "Admin registered");
        } else {
            info!(client_id = %client, user_name = %session.user_name, role = %session.role, "User registered");
        }
        metrics::gauge!(telemetry::ACTIVE_SESSIONS).set(self.registry.len() as f64);

        if registration.is_new && !registration.is_admin {
            self.notifier.notify_admin(
                &self.registry,
                ServerMessage::UserConnected {
                    user_name: session.user_name.clone(),
                    client_id: client,
                    role: session.role,
                },
            );
        }

        self.notifier.reply(
            &client,
            ServerMessage::RegistrationSuccess {
                message: format!("Welcome {}!", session.user_name),
                is_admin: registration.is_admin,
                role: session.role,
            },
        );
    }

    async fn handle_file_access(
        &mut self,
        client: ClientId,
        operation: &str,
        filename: Option<String>,
        content: Option<String>,
    ) -> Result<Option<ServerMessage>, CommandError> {
        let session = self
            .registry
            .lookup(&client)
            .cloned()
            .ok_or_else(|| CommandError::validation("Invalid client ID"))?;

        let operation: FileOperation = operation
            .parse()
            .map_err(|e: UnknownOperation| CommandError::validation(e.to_string()))?;

        if operation == FileOperation::List {
            return self.list_files().await.map(Some);
        }

        let filename = filename.unwrap_or_default();
        let path = self.resolve_path(operation, &filename)?;
        authorize(&session, operation)?;

        debug!(
            client_id = %client,
            operation = %operation,
            path = %path.display(),
            "File access"
        );

        match operation {
            FileOperation::List => self.list_files().await.map(Some),
            FileOperation::Read => self.read_file(&path, &filename).await.map(Some),
            FileOperation::Write => self
                .write_file(&path, &filename, content.as_deref().unwrap_or_default())
                .await
                .map(Some),
            FileOperation::Delete => self.delete_file(&path, &filename).await.map(Some),
            FileOperation::Execute => self.execute_file(client, &path, &filename).await.map(|_| None),
        }
    }

    fn resolve_path(&self, operation: FileOperation, filename: &str) -> Result<PathBuf, CommandError> {
        self.sanitizer.resolve(filename).map_err(|e| match e {
            PathSanitizerError::EmptyName => {
                CommandError::validation(format!("No filename provided for operation: {}", operation))
            }
            other => CommandError::Validation {
                message: "Invalid file path".to_string(),
                details: Some(other.to_string()),
            },
        })
    }

    async fn list_files(&self) -> Result<ServerMessage, CommandError> {
        let files = self.files.list().await.map_err(|e| CommandError::Io {
            message: "Failed to list files".to_string(),
            details: Some(e.cause()),
        })?;

        Ok(ServerMessage::Success {
            message: Some("File listing:".to_string()),
            files: Some(files),
            content: None,
            details: None,
        })
    }

    async fn read_file(&self, path: &std::path::Path, filename: &str) -> Result<ServerMessage, CommandError> {
        let file = self.files.read(path).await.map_err(|e| match e {
            FileStoreError::NotFound(_) => CommandError::Io {
                message: format!("File \"{}\" not found", filename),
                details: None,
            },
            other => CommandError::Io {
                message: format!("Cannot read \"{}\": {}", filename, other.cause()),
                details: None,
            },
        })?;

        let modified = file.modified.map(format_modified).unwrap_or_default();
        Ok(ServerMessage::Success {
            message: None,
            files: None,
            content: Some(file.content),
            details: Some(format!(
                "File size: {} | Last modified: {}",
                format_file_size(file.size),
                modified
            )),
        })
    }

    async fn write_file(
        &self,
        path: &std::path::Path,
        filename: &str,
        content: &str,
    ) -> Result<ServerMessage, CommandError> {
        let outcome = self
            .files
            .write(path, content)
            .await
            .map_err(|e| CommandError::Io {
                message: format!("Failed to write \"{}\": {}", filename, e.cause()),
                details: None,
            })?;

        let verb = if outcome.created { "created" } else { "updated" };
        Ok(ServerMessage::success_message(
            format!("File {} {} successfully", filename, verb),
            Some(format!(
                "Size: {} | Location: {}",
                format_file_size(outcome.size),
                path.display()
            )),
        ))
    }

    async fn delete_file(&self, path: &std::path::Path, filename: &str) -> Result<ServerMessage, CommandError> {
        if !self.files.exists(path).await {
            return Err(CommandError::Io {
                message: format!("File \"{}\" does not exist", filename),
                details: None,
            });
        }

        self.files.delete(path).await.map_err(|e| CommandError::Io {
            message: format!("Failed to delete \"{}\"", filename),
            details: Some(e.cause()),
        })?;

        Ok(ServerMessage::success_message(
            format!("File \"{}\" has been deleted successfully", filename),
            Some(format!("Location: {}", path.display())),
        ))
    }

    async fn execute_file(
        &mut self,
        client: ClientId,
        path: &std::path::Path,
        filename: &str,
    ) -> Result<(), CommandError> {
        if !self.files.exists(path).await {
            return Err(CommandError::Io {
                message: format!("File \"{}\" does not exist", filename),
                details: None,
            });
        }

        self.supervisor
            .start(client, path, filename)
            .map(|_| ())
            .map_err(|e| match e {
                SupervisorError::AlreadyRunning(_) => CommandError::Process {
                    message: e.to_string(),
                    details: None,
                },
                SupervisorError::Unsupported(unsupported) => CommandError::Process {
                    message: format!("Cannot execute \"{}\"", filename),
                    details: Some(unsupported.to_string()),
                },
                SupervisorError::SpawnFailed { .. } => CommandError::Process {
                    message: format!("Failed to execute \"{}\"", filename),
                    details: Some(e.to_string()),
                },
            })
    }

    fn handle_process_kill(&mut self, client: ClientId) -> Result<Option<ServerMessage>, CommandError> {
        if self.supervisor.terminate(&client) {
            Ok(None)
        } else {
            Err(CommandError::Process {
                message: "No process is running".to_string(),
                details: None,
            })
        }
    }

    /// Admin-only role change. Checks run in order: caller capability, target
    /// existence, target is not the admin, requested role is assignable.
    fn handle_role_management(
        &mut self,
        client: ClientId,
        target: &str,
        new_role: &str,
    ) -> Result<Option<ServerMessage>, CommandError> {
        let requester = self
            .registry
            .lookup(&client)
            .cloned()
            .ok_or_else(|| CommandError::validation("Invalid client ID"))?;
        if !requester.role.allows(Capability::ManageUsers) {
            return Err(CommandError::Permission(Capability::ManageUsers));
        }

        let target = self
            .registry
            .resolve_target(target.trim())
            .cloned()
            .ok_or_else(|| CommandError::validation("Invalid client ID"))?;

        if self.registry.is_admin(&target.id) {
            return Err(CommandError::validation("Cannot change admin's role"));
        }

        let role = new_role
            .parse::<Role>()
            .ok()
            .filter(|r| r.is_assignable())
            .ok_or_else(|| {
                CommandError::validation(format!(
                    "Invalid role. Valid roles are: {}",
                    Role::assignable().map(Role::as_str).join(", ")
                ))
            })?;

        let previous = self
            .registry
            .set_role(&target.id, role)
            .map_err(|e| CommandError::validation(e.to_string()))?;

        info!(
            client_id = %target.id,
            user_name = %target.user_name,
            from = %previous,
            to = %role,
            "Role updated"
        );

        self.notifier.reply(
            &target.id,
            ServerMessage::RoleUpdated {
                target_client_id: None,
                new_role: role,
                message: format!("Your role has been updated to: {}", role),
            },
        );

        Ok(Some(ServerMessage::RoleUpdated {
            target_client_id: Some(target.id),
            new_role: role,
            message: format!("Role updated for {} to {}", target.user_name, role),
        }))
    }

    /// Translate a supervisor event into the matching client notification.
    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        if !self.supervisor.observe(&event) {
            return;
        }

        let (client, message) = match event {
            ProcessEvent::Stdout { client, data, .. } => (
                client,
                ServerMessage::ExecuteOutput {
                    output: data,
                    interactive: true,
                },
            ),
            ProcessEvent::Stderr { client, data, .. } => {
                (client, ServerMessage::ExecuteError { error: data })
            }
            ProcessEvent::TimedOut {
                client, after_secs, ..
            } => (
                client,
                ServerMessage::error(
                    ErrorKind::Process,
                    "Process timed out and was terminated",
                    Some(format!("Time limit: {}s", after_secs)),
                ),
            ),
            ProcessEvent::Draining { .. } => return,
            ProcessEvent::Exited { client, reason, .. } => (
                client,
                ServerMessage::ExecuteEnd {
                    message: reason.end_message(),
                    should_prompt: true,
                },
            ),
        };
        self.notifier.reply(&client, message);
    }

    /// Remove sessions silent for longer than `idle_timeout`, killing their
    /// processes and telling the admin. Returns the reaped identities.
    pub fn reap_idle(&mut self, idle_timeout: Duration) -> Vec<ClientId> {
        let Some(cutoff) = Instant::now().checked_sub(idle_timeout) else {
            return Vec::new();
        };

        let idle = self.registry.idle_since(cutoff);
        for id in &idle {
            self.disconnect(id, "idle timeout");
        }
        idle
    }

    fn disconnect(&mut self, id: &ClientId, reason: &str) {
        let Some(session) = self.registry.remove(id) else {
            return;
        };
        self.supervisor.terminate(id);
        info!(client_id = %id, user_name = %session.user_name, reason, "Session removed");
        metrics::gauge!(telemetry::ACTIVE_SESSIONS).set(self.registry.len() as f64);

        if !self.registry.is_admin(id) {
            self.notifier.notify_admin(
                &self.registry,
                ServerMessage::UserDisconnected { client_id: *id },
            );
        }
    }

    /// Tell the admin every other session is going away and kill all processes.
    pub fn shutdown(&mut self) {
        let departing: Vec<ClientId> = self
            .registry
            .sessions()
            .into_iter()
            .filter(|s| !self.registry.is_admin(&s.id))
            .map(|s| s.id)
            .collect();

        for id in departing {
            self.notifier.notify_admin(
                &self.registry,
                ServerMessage::UserDisconnected { client_id: id },
            );
        }

        let running = self.supervisor.active_count();
        self.supervisor.terminate_all();
        info!(
            sessions = self.registry.len(),
            processes = running,
            "Dispatcher shut down"
        );
    }
}

fn authorize(session: &Session, operation: FileOperation) -> Result<(), CommandError> {
    match operation.required_capability() {
        Some(capability) if !session.role.allows(capability) => {
            Err(CommandError::Permission(capability))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_message() {
        let err = CommandError::Permission(Capability::Execute);
        assert_eq!(err.to_string(), "Permission denied: Your role cannot execute files");
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert!(matches!(
            err.to_message(),
            ServerMessage::Error { kind: ErrorKind::Permission, details: None, .. }
        ));
    }

    #[test]
    fn test_authorize_follows_role_table() {
        let id: ClientId = "127.0.0.1:1".parse().unwrap();
        let moderator = Session::new(id, "m", Role::Moderator, 0);
        assert!(authorize(&moderator, FileOperation::List).is_ok());
        assert!(authorize(&moderator, FileOperation::Write).is_ok());
        assert!(matches!(
            authorize(&moderator, FileOperation::Execute),
            Err(CommandError::Permission(Capability::Execute))
        ));
        assert!(matches!(
            authorize(&moderator, FileOperation::Delete),
            Err(CommandError::Permission(Capability::Delete))
        ));
    }
}
