// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Registry
//!
//! In-memory table of registered clients plus the one-time admin pointer.
//! Owned exclusively by the protocol loop, so it needs no locking.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Session creation, lookup, role changes and removal

use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::role::Role;
use crate::domain::session::{normalize_user_name, ClientId, Session};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid client ID")]
    NotFound(ClientId),

    #[error("Cannot change admin's role")]
    AdminImmutable,
}

/// Outcome of a `register` call.
#[derive(Debug, Clone)]
pub struct Registration {
    pub session: Session,
    /// False when an existing session was updated in place.
    pub is_new: bool,
    pub is_admin: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ClientId, Session>,
    /// Set by the first registration and never changed afterwards.
    admin: Option<ClientId>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update the session for `id`.
    ///
    /// The very first registration ever processed becomes the admin. Later
    /// registrations from new identities get `user`; repeat registrations keep
    /// whatever role the identity already holds and only update the name.
    pub fn register(&mut self, id: ClientId, requested_name: &str) -> Registration {
        if self.admin.is_none() {
            self.admin = Some(id);
            info!(client_id = %id, "Admin identity recorded");
        }
        let is_admin = self.is_admin(&id);

        if let Some(existing) = self.sessions.get_mut(&id) {
            existing.user_name = normalize_user_name(requested_name);
            existing.last_seen = Instant::now();
            debug!(client_id = %id, user_name = %existing.user_name, "Session re-registered");
            return Registration {
                session: existing.clone(),
                is_new: false,
                is_admin,
            };
        }

        let role = if is_admin { Role::Admin } else { Role::User };
        let session = Session::new(id, requested_name, role, self.next_seq);
        self.next_seq += 1;
        self.sessions.insert(id, session.clone());

        Registration {
            session,
            is_new: true,
            is_admin,
        }
    }

    pub fn lookup(&self, id: &ClientId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Resolve a display name. Duplicate names resolve to the earliest registration.
    pub fn lookup_by_name(&self, name: &str) -> Option<&Session> {
        self.sessions
            .values()
            .filter(|s| s.user_name == name)
            .min_by_key(|s| s.seq)
    }

    /// Resolve a role-management target: identity first, display name second.
    pub fn resolve_target(&self, target: &str) -> Option<&Session> {
        target
            .parse::<ClientId>()
            .ok()
            .and_then(|id| self.lookup(&id))
            .or_else(|| self.lookup_by_name(target))
    }

    pub fn set_role(&mut self, id: &ClientId, role: Role) -> Result<Role, RegistryError> {
        if self.is_admin(id) {
            return Err(RegistryError::AdminImmutable);
        }
        let session = self
            .sessions
            .get_mut(id)
            .ok_or(RegistryError::NotFound(*id))?;
        let previous = session.role;
        session.role = role;
        Ok(previous)
    }

    pub fn remove(&mut self, id: &ClientId) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Refresh last-seen for `id`. Returns false for unknown identities.
    pub fn touch(&mut self, id: &ClientId) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Sessions that have been silent since before `cutoff`.
    pub fn idle_since(&self, cutoff: Instant) -> Vec<ClientId> {
        let mut idle: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| s.is_idle_since(cutoff))
            .collect();
        idle.sort_by_key(|s| s.seq);
        idle.into_iter().map(|s| s.id).collect()
    }

    pub fn admin_id(&self) -> Option<ClientId> {
        self.admin
    }

    pub fn is_admin(&self, id: &ClientId) -> bool {
        self.admin.as_ref() == Some(id)
    }

    /// The admin's live session, if the admin is still registered.
    pub fn admin_session(&self) -> Option<&Session> {
        self.admin.as_ref().and_then(|id| self.sessions.get(id))
    }

    /// All sessions in registration order.
    pub fn sessions(&self) -> Vec<&Session> {
        let mut all: Vec<&Session> = self.sessions.values().collect();
        all.sort_by_key(|s| s.seq);
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(port: u16) -> ClientId {
        ClientId::new(format!("127.0.0.1:{port}").parse().unwrap())
    }

    #[test]
    fn test_first_registration_is_admin() {
        let mut registry = SessionRegistry::new();
        let first = registry.register(id(1), "alice");
        let second = registry.register(id(2), "bob");
        let third = registry.register(id(3), "carol");

        assert!(first.is_admin);
        assert_eq!(first.session.role, Role::Admin);
        assert!(!second.is_admin);
        assert_eq!(second.session.role, Role::User);
        assert!(!third.is_admin);
        assert_eq!(registry.admin_id(), Some(id(1)));
    }

    #[test]
    fn test_reregistration_updates_in_place() {
        let mut registry = SessionRegistry::new();
        registry.register(id(1), "alice");
        registry.register(id(2), "bob");
        registry.set_role(&id(2), Role::Moderator).unwrap();

        let again = registry.register(id(2), "robert");
        assert!(!again.is_new);
        assert_eq!(again.session.role, Role::Moderator);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(&id(2)).unwrap().user_name, "robert");

        let admin_again = registry.register(id(1), "alice");
        assert!(admin_again.is_admin);
        assert_eq!(admin_again.session.role, Role::Admin);
    }

    #[test]
    fn test_admin_role_cannot_change() {
        let mut registry = SessionRegistry::new();
        registry.register(id(1), "alice");
        assert_eq!(
            registry.set_role(&id(1), Role::User),
            Err(RegistryError::AdminImmutable)
        );
        assert_eq!(registry.lookup(&id(1)).unwrap().role, Role::Admin);
    }

    #[test]
    fn test_admin_slot_survives_removal() {
        let mut registry = SessionRegistry::new();
        registry.register(id(1), "alice");
        registry.remove(&id(1));
        assert!(registry.admin_session().is_none());

        let next = registry.register(id(2), "bob");
        assert!(!next.is_admin);
        assert_eq!(next.session.role, Role::User);
        assert_eq!(registry.admin_id(), Some(id(1)));
    }

    #[test]
    fn test_lookup_by_name_prefers_earliest() {
        let mut registry = SessionRegistry::new();
        registry.register(id(1), "admin");
        registry.register(id(9), "dup");
        registry.register(id(5), "dup");
        assert_eq!(registry.lookup_by_name("dup").unwrap().id, id(9));
        assert!(registry.lookup_by_name("nobody").is_none());
    }

    #[test]
    fn test_resolve_target_by_id_or_name() {
        let mut registry = SessionRegistry::new();
        registry.register(id(1), "admin");
        registry.register(id(2), "bob");
        assert_eq!(registry.resolve_target("127.0.0.1:2").unwrap().id, id(2));
        assert_eq!(registry.resolve_target("bob").unwrap().id, id(2));
        assert!(registry.resolve_target("127.0.0.1:7").is_none());
    }

    #[test]
    fn test_set_role_unknown_session() {
        let mut registry = SessionRegistry::new();
        registry.register(id(1), "admin");
        assert_eq!(
            registry.set_role(&id(4), Role::Moderator),
            Err(RegistryError::NotFound(id(4)))
        );
    }

    #[test]
    fn test_idle_since() {
        let mut registry = SessionRegistry::new();
        registry.register(id(1), "admin");
        registry.register(id(2), "bob");
        let cutoff = Instant::now() + Duration::from_millis(1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(registry.touch(&id(2)));
        assert_eq!(registry.idle_since(cutoff), vec![id(1)]);
        assert!(!registry.touch(&id(3)));
    }
}
