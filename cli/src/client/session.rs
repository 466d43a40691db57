// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Interactive client state
//!
//! Turns typed lines into protocol messages and server messages into printable
//! lines. Kept free of I/O so the whole interaction can be driven from tests.

use std::collections::BTreeMap;

use udpfm_core::domain::protocol::{ClientMessage, ServerMessage};
use udpfm_core::domain::role::{Capability, Role};
use udpfm_core::domain::session::ClientId;

use crate::client::view;

/// What the connect loop should do after a line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(ClientMessage),
    Print(Vec<String>),
    Quit,
}

/// Where a script started from this client currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    /// `execute` was sent; no output or end has come back yet.
    Starting,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownUser {
    pub user_name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
struct PendingConfirmation {
    message: ClientMessage,
    starts_process: bool,
}

#[derive(Debug)]
pub struct ClientSession {
    user_name: String,
    role: Option<Role>,
    is_admin: bool,
    exec: ExecState,
    /// Sessions announced to the admin via `user_connected`.
    users: BTreeMap<ClientId, KnownUser>,
    pending: Option<PendingConfirmation>,
}

impl ClientSession {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            role: None,
            is_admin: false,
            exec: ExecState::Idle,
            users: BTreeMap::new(),
            pending: None,
        }
    }

    pub fn register_message(&self) -> ClientMessage {
        ClientMessage::Register {
            user_name: Some(self.user_name.clone()),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.role.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn exec_state(&self) -> ExecState {
        self.exec
    }

    pub fn known_users(&self) -> &BTreeMap<ClientId, KnownUser> {
        &self.users
    }

    pub fn prompt(&self) -> String {
        if self.pending.is_some() {
            return String::new();
        }
        format!("{}> ", self.user_name)
    }

    /// Interpret one line typed by the user.
    pub fn handle_input(&mut self, line: &str) -> Action {
        if let Some(pending) = self.pending.take() {
            return if line.trim().eq_ignore_ascii_case("y") {
                if pending.starts_process {
                    self.exec = ExecState::Starting;
                }
                Action::Send(pending.message)
            } else {
                Action::Print(vec![view::warning("Operation cancelled")])
            };
        }

        if self.exec != ExecState::Idle {
            if line.trim() == "!kill" {
                return Action::Send(ClientMessage::ProcessKill);
            }
            return Action::Send(ClientMessage::ProcessInput {
                input: line.to_string(),
            });
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Action::Print(Vec::new());
        }

        let mut parts = trimmed.split(' ');
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match command {
            "exit" | "quit" => Action::Quit,
            "help" => Action::Print(view::help(self.role.unwrap_or(Role::User))),
            "users" if self.is_admin => Action::Print(view::user_table(&self.users)),
            "setrole" if self.is_admin => self.set_role_command(&args),
            "kill" => Action::Send(ClientMessage::ProcessKill),
            _ => self.file_command(command, &args),
        }
    }

    fn set_role_command(&self, args: &[&str]) -> Action {
        let (Some(target), Some(role)) = (args.first(), args.get(1)) else {
            return Action::Print(vec![view::error("Usage: setrole <username|clientId> <role>")]);
        };

        let target_client_id = self
            .users
            .iter()
            .find(|(_, user)| user.user_name == *target)
            .map(|(id, _)| id.to_string())
            .unwrap_or_else(|| target.to_string());

        Action::Send(ClientMessage::RoleManagement {
            target_client_id,
            new_role: role.to_string(),
        })
    }

    fn file_command(&mut self, command: &str, args: &[&str]) -> Action {
        let filename = args.first().map(|f| f.to_string());
        let content = args.get(1..).map(|rest| rest.join(" "));
        let message = ClientMessage::FileAccess {
            operation: command.to_string(),
            filename: filename.clone(),
            content: content.filter(|c| !c.is_empty()),
        };

        if matches!(command, "write" | "execute" | "delete") {
            self.pending = Some(PendingConfirmation {
                message,
                starts_process: command == "execute",
            });
            return Action::Print(vec![view::warning(&format!(
                "Are you sure you want to {} \"{}\"? (y/n): ",
                command,
                filename.unwrap_or_default()
            ))]);
        }

        Action::Send(message)
    }

    /// Fold a server message into local state and render it.
    pub fn handle_server_message(&mut self, message: ServerMessage) -> Vec<String> {
        match message {
            ServerMessage::RegistrationSuccess {
                message,
                is_admin,
                role,
            } => {
                self.is_admin = is_admin;
                self.role = Some(role);
                let mut lines = vec![view::success(&message), view::info(&format!("Role: {}", role))];
                lines.extend(view::help(role));
                lines
            }
            ServerMessage::UserConnected {
                user_name,
                client_id,
                role,
            } => {
                let announce = view::info(&format!("New user connected: {}", user_name));
                self.users.insert(client_id, KnownUser { user_name, role });
                let mut lines = vec![announce];
                lines.extend(view::user_table(&self.users));
                lines
            }
            ServerMessage::UserDisconnected { client_id } => {
                let name = self
                    .users
                    .remove(&client_id)
                    .map(|u| u.user_name)
                    .unwrap_or_else(|| client_id.to_string());
                let mut lines = vec![view::warning(&format!("User disconnected: {}", name))];
                lines.extend(view::user_table(&self.users));
                lines
            }
            ServerMessage::RoleUpdated {
                target_client_id: Some(target),
                new_role,
                message,
            } => {
                if let Some(user) = self.users.get_mut(&target) {
                    user.role = new_role;
                }
                vec![view::success(&message)]
            }
            ServerMessage::RoleUpdated {
                target_client_id: None,
                new_role,
                message,
            } => {
                self.role = Some(new_role);
                let mut lines = vec![view::success(&message), "Your new permissions are:".to_string()];
                lines.extend(view::help(new_role));
                lines
            }
            ServerMessage::Success {
                message,
                files,
                content,
                details,
            } => view::success_body(message, files, content, details),
            ServerMessage::Error {
                message, details, ..
            } => {
                if self.exec == ExecState::Starting {
                    self.exec = ExecState::Idle;
                }
                let mut lines = vec![view::error(&message)];
                if let Some(details) = details {
                    lines.push(view::warning(&details));
                }
                lines
            }
            ServerMessage::ExecuteOutput { output, .. } => {
                self.exec = ExecState::Running;
                vec![output]
            }
            ServerMessage::ExecuteError { error } => {
                self.exec = ExecState::Running;
                vec![view::error(&error)]
            }
            ServerMessage::ExecuteEnd { message, .. } => {
                self.exec = ExecState::Idle;
                vec![view::info(&message), String::new()]
            }
        }
    }

    /// Whether the current role allows `capability`, as far as this client knows.
    pub fn can(&self, capability: Capability) -> bool {
        self.role.is_some_and(|r| r.allows(capability))
    }
}
