// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Client Session Aggregate
//!
//! A [`Session`] binds a network identity to a display name and a [`Role`].
//!
//! ## Session Lifecycle
//!
//! ```text
//! register{userName} from (ip, port)
//!   └─ SessionRegistry::register(ClientId, name)   ← first ever caller becomes admin
//!         └─ SessionRegistry::touch(ClientId)      ← every datagram from that identity
//!         └─ SessionRegistry::set_role(..)          ← admin role management
//!         └─ SessionRegistry::remove(ClientId)      ← idle reaping
//! ```
//!
//! ## Invariants
//!
//! - There is at most **one** session per [`ClientId`]; re-registration updates it.
//! - The admin identity is recorded once and never reassigned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;

use crate::domain::role::Role;

/// Display name used when a client registers without one.
pub const ANONYMOUS: &str = "Anonymous";

/// Network identity of a client: the address and port its datagrams come from.
///
/// Rendered as `"<ip>:<port>"`, which is the key clients use to address each
/// other in `role_management`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(SocketAddr);

impl ClientId {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Address replies for this client are sent to.
    pub fn endpoint(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self)
    }
}

impl Serialize for ClientId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Server-side record for one registered client.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ClientId,
    pub user_name: String,
    pub role: Role,
    /// Registration order; resolves duplicate display names (first match wins).
    pub seq: u64,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Instant,
}

impl Session {
    pub fn new(id: ClientId, user_name: &str, role: Role, seq: u64) -> Self {
        Self {
            id,
            user_name: normalize_user_name(user_name),
            role,
            seq,
            registered_at: Utc::now(),
            last_seen: Instant::now(),
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.id.endpoint()
    }

    pub fn is_idle_since(&self, cutoff: Instant) -> bool {
        self.last_seen < cutoff
    }
}

/// Trimmed display name, or [`ANONYMOUS`] when nothing usable was sent.
pub fn normalize_user_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        ANONYMOUS.to_string()
    } else {
        trimmed.to_string()
    }
}
