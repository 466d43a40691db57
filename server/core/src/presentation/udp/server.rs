// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! UDP Server
//!
//! One socket, one protocol loop. The loop owns the [`CommandDispatcher`] and
//! multiplexes inbound datagrams, process events and the idle sweep; a separate
//! writer task drains the outbox onto the socket so slow sends never stall
//! request handling.

use anyhow::Context;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::dispatcher::CommandDispatcher;
use crate::domain::protocol::encode_for_datagram;
use crate::domain::server_config::ServerConfig;
use crate::infrastructure::notifier::{Notifier, OutboundReceiver};
use crate::infrastructure::process_supervisor::ProcessEvent;

/// Receive buffer size; large enough for any IPv4 UDP payload.
const RECV_BUFFER_BYTES: usize = 65_536;

/// How long shutdown waits for queued replies to reach the socket.
const WRITER_FLUSH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Bind `address:port`. When the port is taken and `fallback` is set, retry
/// exactly once on `port + 1`.
pub async fn bind_with_fallback(address: &str, port: u16, fallback: bool) -> anyhow::Result<UdpSocket> {
    match UdpSocket::bind((address, port)).await {
        Ok(socket) => Ok(socket),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse && fallback && port != 0 => {
            let next = port.checked_add(1).context("No port available above 65535")?;
            warn!(port, next, "Port in use, trying next port");
            UdpSocket::bind((address, next))
                .await
                .with_context(|| format!("Failed to bind UDP socket on {}:{} (fallback)", address, next))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to bind UDP socket on {}:{}", address, port)),
    }
}

pub struct UdpServer {
    socket: Arc<UdpSocket>,
    config: Arc<ServerConfig>,
    dispatcher: CommandDispatcher,
    process_events: mpsc::UnboundedReceiver<ProcessEvent>,
    outbound: OutboundReceiver,
}

impl UdpServer {
    /// Validate `config`, prepare the managed directory and bind the socket.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let (notifier, outbound) = Notifier::with_default_capacity();
        let (dispatcher, process_events) = CommandDispatcher::from_config(config.clone(), notifier)
            .await
            .context("Failed to prepare managed directory")?;

        let socket = bind_with_fallback(
            &config.network.bind_address,
            config.network.port,
            config.network.port_fallback,
        )
        .await?;

        Ok(Self {
            socket: Arc::new(socket),
            config,
            dispatcher,
            process_events,
            outbound,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let Self {
            socket,
            config,
            mut dispatcher,
            mut process_events,
            outbound,
        } = self;

        let local = socket.local_addr().context("Socket has no local address")?;
        info!(
            addr = %local,
            managed_dir = %dispatcher.files().root().display(),
            "UDP file manager listening"
        );

        let writer = spawn_writer(socket.clone(), outbound, config.network.max_datagram_bytes);

        let idle_timeout = config.idle_timeout();
        let mut sweep = tokio::time::interval(config.sweep_interval());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut buf = vec![0u8; RECV_BUFFER_BYTES];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        debug!(from = %from, len, "Received datagram");
                        dispatcher.handle_datagram(from, &buf[..len]).await;
                    }
                    // ICMP port-unreachable from a departed client surfaces here on
                    // some platforms; the socket itself is still healthy.
                    Err(e) => warn!(error = %e, "UDP receive failed"),
                },

                Some(event) = process_events.recv() => {
                    dispatcher.handle_process_event(event);
                }

                _ = sweep.tick(), if idle_timeout.is_some() => {
                    if let Some(timeout) = idle_timeout {
                        let reaped = dispatcher.reap_idle(timeout);
                        if !reaped.is_empty() {
                            info!(count = reaped.len(), "Reaped idle sessions");
                        }
                    }
                }
            }
        }

        dispatcher.shutdown();
        drop(dispatcher);

        match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Outbound writer task failed"),
            Err(_) => warn!("Outbound writer did not flush before shutdown deadline"),
        }

        info!("UDP file manager stopped");
        Ok(())
    }
}

fn spawn_writer(socket: Arc<UdpSocket>, mut outbound: OutboundReceiver, max_bytes: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let bytes = match encode_for_datagram(&item.message, max_bytes) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(error = %e, "Failed to encode outbound message");
                    continue;
                }
            };
            if let Err(e) = socket.send_to(&bytes, item.to).await {
                warn!(to = %item.to, error = %e, "UDP send failed");
            }
        }
        debug!("Outbound writer finished");
    })
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
