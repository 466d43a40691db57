// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Notifier - outbound message queue for the UDP writer task
//
// Every reply and push notification goes through a bounded mpsc channel that
// a single writer task drains onto the socket. Producers never block: when the
// queue is full the message is dropped with a warning, matching the
// fire-and-forget delivery UDP already gives us.

use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::session_registry::SessionRegistry;
use crate::domain::protocol::ServerMessage;
use crate::domain::session::ClientId;
use crate::infrastructure::telemetry;

/// Default outbox depth before messages start being dropped.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

/// One message addressed to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub message: ServerMessage,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NotifierError {
    #[error("Outbox closed")]
    Closed,
    #[error("Outbox empty")]
    Empty,
}

/// Producer half of the outbox.
#[derive(Clone, Debug)]
pub struct Notifier {
    sender: mpsc::Sender<Outbound>,
}

impl Notifier {
    pub fn new(capacity: usize) -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, OutboundReceiver { receiver })
    }

    pub fn with_default_capacity() -> (Self, OutboundReceiver) {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }

    /// Queue `message` for `to`. Returns false if it was dropped.
    pub fn send_to(&self, to: SocketAddr, message: ServerMessage) -> bool {
        debug!(to = %to, message_type = message.type_name(), "Queueing outbound message");
        match self.sender.try_send(Outbound { to, message }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    to = %dropped.to,
                    message_type = dropped.message.type_name(),
                    "Outbox full, dropping message"
                );
                metrics::counter!(telemetry::OUTBOUND_DROPPED).increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!(to = %dropped.to, "Outbox closed, discarding message");
                false
            }
        }
    }

    pub fn reply(&self, client: &ClientId, message: ServerMessage) -> bool {
        self.send_to(client.endpoint(), message)
    }

    /// Deliver to the admin session, if one is currently registered.
    pub fn notify_admin(&self, registry: &SessionRegistry, message: ServerMessage) -> bool {
        match registry.admin_session() {
            Some(admin) => self.send_to(admin.endpoint(), message),
            None => {
                debug!(
                    message_type = message.type_name(),
                    "No admin registered, skipping admin notification"
                );
                false
            }
        }
    }
}

/// Consumer half of the outbox, owned by the writer task.
#[derive(Debug)]
pub struct OutboundReceiver {
    receiver: mpsc::Receiver<Outbound>,
}

impl OutboundReceiver {
    /// Next queued message, or `None` once every [`Notifier`] is dropped and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Outbound, NotifierError> {
        self.receiver.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => NotifierError::Empty,
            mpsc::error::TryRecvError::Disconnected => NotifierError::Closed,
        })
    }

    /// Everything currently queued, without waiting.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = self.receiver.try_recv() {
            out.push(item);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::ErrorKind;

    fn id(port: u16) -> ClientId {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn ping(n: usize) -> ServerMessage {
        ServerMessage::ExecuteOutput {
            output: n.to_string(),
            interactive: true,
        }
    }

    #[test]
    fn test_full_outbox_drops_without_blocking() {
        let (notifier, mut rx) = Notifier::new(2);
        assert!(notifier.reply(&id(1), ping(1)));
        assert!(notifier.reply(&id(1), ping(2)));
        assert!(!notifier.reply(&id(1), ping(3)));

        let queued = rx.drain();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].message, ping(1));
        assert_eq!(rx.try_recv(), Err(NotifierError::Empty));
    }

    #[test]
    fn test_admin_notifications_follow_admin_session() {
        let (notifier, mut rx) = Notifier::new(8);
        let mut registry = SessionRegistry::new();

        let msg = ServerMessage::error(ErrorKind::Validation, "x", None);
        assert!(!notifier.notify_admin(&registry, msg.clone()));

        registry.register(id(10), "root");
        registry.register(id(11), "bob");
        assert!(notifier.notify_admin(&registry, msg.clone()));
        assert_eq!(rx.try_recv().unwrap().to, id(10).endpoint());

        registry.remove(&id(10));
        assert!(!notifier.notify_admin(&registry, msg));
        assert_eq!(rx.try_recv(), Err(NotifierError::Empty));
    }

    #[tokio::test]
    async fn test_receiver_ends_after_producers_drop() {
        let (notifier, mut rx) = Notifier::new(4);
        notifier.reply(&id(1), ping(1));
        drop(notifier);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
