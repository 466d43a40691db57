// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Wire Protocol
//!
//! One JSON object per UDP datagram, discriminated by its `type` field.
//!
//! ## Inbound (client → server)
//!
//! | `type` | Fields |
//! |--------|--------|
//! | `register` | `userName` |
//! | `fileAccess` | `operation`, `filename`, `content` |
//! | `process_input` | `input` |
//! | `process_kill` | (none) |
//! | `role_management` | `targetClientId`, `newRole` |
//!
//! `operation` and `newRole` stay plain strings on the wire and are parsed into
//! [`FileOperation`] / [`Role`] after decoding, so an unknown value still gets an
//! `error` reply instead of being dropped with the rest of the datagram.
//!
//! ## Outbound (server → client)
//!
//! See [`ServerMessage`]. Process output is pushed as `execute_output` /
//! `execute_error` without sequence numbers; a dropped datagram is not detectable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::role::{Capability, Role};
use crate::domain::session::ClientId;

/// Inbound message types the server understands.
pub const CLIENT_MESSAGE_TYPES: [&str; 5] = [
    "register",
    "fileAccess",
    "process_input",
    "process_kill",
    "role_management",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "userName", default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },

    #[serde(rename = "fileAccess")]
    FileAccess {
        #[serde(default)]
        operation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    #[serde(rename = "process_input")]
    ProcessInput {
        #[serde(default)]
        input: String,
    },

    #[serde(rename = "process_kill")]
    ProcessKill,

    #[serde(rename = "role_management")]
    RoleManagement {
        #[serde(rename = "targetClientId", default)]
        target_client_id: String,
        #[serde(rename = "newRole", default)]
        new_role: String,
    },
}

/// Why an inbound datagram could not be turned into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Message has no 'type' field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid '{kind}' message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode one datagram payload.
pub fn decode_client_message(bytes: &[u8]) -> Result<ClientMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?
        .to_string();

    if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| DecodeError::InvalidFields { kind, source })
}

/// File operations carried by `fileAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    List,
    Read,
    Write,
    Execute,
    Delete,
}

impl FileOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Delete => "delete",
        }
    }

    /// Capability the caller's role must grant. Listing is open to everyone.
    pub const fn required_capability(self) -> Option<Capability> {
        match self {
            Self::List => None,
            Self::Read => Some(Capability::Read),
            Self::Write => Some(Capability::Write),
            Self::Execute => Some(Capability::Execute),
            Self::Delete => Some(Capability::Delete),
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for FileOperation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(Self::List),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "execute" => Ok(Self::Execute),
            "delete" => Ok(Self::Delete),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

/// Classification carried by every `error` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[default]
    Validation,
    Permission,
    Io,
    Process,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::Io => "io",
            Self::Process => "process",
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileEntry {
    pub fn described(name: String, size: String, modified: String, file_type: String) -> Self {
        Self {
            name,
            size: Some(size),
            modified: Some(modified),
            file_type: Some(file_type),
            error: None,
        }
    }

    pub fn unreadable(name: String) -> Self {
        Self {
            name,
            size: None,
            modified: None,
            file_type: None,
            error: Some("Cannot read file info".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegistrationSuccess {
        message: String,
        #[serde(rename = "isAdmin")]
        is_admin: bool,
        role: Role,
    },
    UserConnected {
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "clientId")]
        client_id: ClientId,
        role: Role,
    },
    UserDisconnected {
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },
    RoleUpdated {
        #[serde(rename = "targetClientId", default, skip_serializing_if = "Option::is_none")]
        target_client_id: Option<ClientId>,
        #[serde(rename = "newRole")]
        new_role: Role,
        message: String,
    },
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<Vec<FileEntry>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(default)]
        kind: ErrorKind,
    },
    ExecuteOutput {
        output: String,
        interactive: bool,
    },
    ExecuteError {
        error: String,
    },
    ExecuteEnd {
        message: String,
        #[serde(rename = "shouldPrompt")]
        should_prompt: bool,
    },
}

impl ServerMessage {
    pub fn success_message(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
            files: None,
            content: None,
            details,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
            kind,
        }
    }

    /// Wire name of this message's `type` field.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::RegistrationSuccess { .. } => "registration_success",
            Self::UserConnected { .. } => "user_connected",
            Self::UserDisconnected { .. } => "user_disconnected",
            Self::RoleUpdated { .. } => "role_updated",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::ExecuteOutput { .. } => "execute_output",
            Self::ExecuteError { .. } => "execute_error",
            Self::ExecuteEnd { .. } => "execute_end",
        }
    }
}

/// Serialize `message`, substituting an `error` reply when the result would
/// not fit in `max_bytes`.
pub fn encode_for_datagram(message: &ServerMessage, max_bytes: usize) -> Result<Vec<u8>, serde_json::Error> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() <= max_bytes {
        return Ok(bytes);
    }

    tracing::warn!(
        message_type = message.type_name(),
        size = bytes.len(),
        limit = max_bytes,
        "Outbound message exceeds datagram limit, sending error instead"
    );
    serde_json::to_vec(&ServerMessage::error(
        ErrorKind::Io,
        "Response too large to fit in a single datagram",
        Some(format!("{} bytes (limit {} bytes)", bytes.len(), max_bytes)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_register() {
        let msg = decode_client_message(br#"{"type":"register","userName":"alice"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                user_name: Some("alice".to_string())
            }
        );
    }

    #[test]
    fn test_decode_file_access_with_nulls() {
        let msg = decode_client_message(
            br#"{"type":"fileAccess","operation":"list","filename":null,"content":""}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::FileAccess {
                operation: "list".to_string(),
                filename: None,
                content: Some(String::new()),
            }
        );
    }

    #[test]
    fn test_decode_rejections() {
        assert!(matches!(
            decode_client_message(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_message(br#"{"userName":"x"}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            decode_client_message(br#"{"type":"shutdown"}"#),
            Err(DecodeError::UnknownType(t)) if t == "shutdown"
        ));
        assert!(matches!(
            decode_client_message(br#"{"type":"process_input","input":42}"#),
            Err(DecodeError::InvalidFields { .. })
        ));
    }

    #[test]
    fn test_unknown_operation_survives_decoding() {
        let msg = decode_client_message(br#"{"type":"fileAccess","operation":"chmod","filename":"a"}"#)
            .unwrap();
        let ClientMessage::FileAccess { operation, .. } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(
            operation.parse::<FileOperation>(),
            Err(UnknownOperation("chmod".to_string()))
        );
    }

    #[test]
    fn test_server_message_wire_shape() {
        let id: ClientId = "127.0.0.1:5000".parse().unwrap();
        let value = serde_json::to_value(ServerMessage::UserConnected {
            user_name: "bob".to_string(),
            client_id: id,
            role: Role::User,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "user_connected", "userName": "bob", "clientId": "127.0.0.1:5000", "role": "user"})
        );

        let value = serde_json::to_value(ServerMessage::ExecuteEnd {
            message: "Process ended with code 0".to_string(),
            should_prompt: true,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "execute_end", "message": "Process ended with code 0", "shouldPrompt": true})
        );

        let value = serde_json::to_value(ServerMessage::RoleUpdated {
            target_client_id: None,
            new_role: Role::Moderator,
            message: "m".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "role_updated", "newRole": "moderator", "message": "m"}));
    }

    #[test]
    fn test_listing_entries_shape() {
        let value = serde_json::to_value(vec![
            FileEntry::described("a.txt".into(), "1.0 KB".into(), "now".into(), ".txt".into()),
            FileEntry::unreadable("b".into()),
        ])
        .unwrap();
        assert_eq!(
            value,
            json!([
                {"name": "a.txt", "size": "1.0 KB", "modified": "now", "type": ".txt"},
                {"name": "b", "error": "Cannot read file info"}
            ])
        );
    }

    #[test]
    fn test_oversized_message_is_replaced() {
        let big = ServerMessage::Success {
            message: None,
            files: None,
            content: Some("x".repeat(2048)),
            details: None,
        };
        let bytes = encode_for_datagram(&big, 512).unwrap();
        let decoded: ServerMessage = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(decoded, ServerMessage::Error { kind: ErrorKind::Io, .. }));

        let small = ServerMessage::ExecuteError { error: "e".into() };
        let bytes = encode_for_datagram(&small, 512).unwrap();
        assert_eq!(serde_json::from_slice::<ServerMessage>(&bytes).unwrap(), small);
    }
}
