// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prometheus exporter wiring.
//!
//! Counters and gauges are recorded with the `metrics` macros wherever the
//! event happens; this module only installs the recorder and describes the
//! series so the scrape output carries help text.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, SocketAddr};
use tracing::info;

use crate::domain::server_config::MetricsConfig;

pub const DATAGRAMS_RECEIVED: &str = "udpfm_datagrams_received_total";
pub const DATAGRAMS_DROPPED: &str = "udpfm_datagrams_dropped_total";
pub const PROCESSES_STARTED: &str = "udpfm_processes_started_total";
pub const PROCESSES_TIMED_OUT: &str = "udpfm_processes_timed_out_total";
pub const OUTBOUND_DROPPED: &str = "udpfm_outbound_dropped_total";
pub const ACTIVE_SESSIONS: &str = "udpfm_active_sessions";

/// Install the global Prometheus recorder when metrics are enabled.
///
/// Must be called from inside a tokio runtime; the HTTP listener is spawned
/// onto it.
pub fn install(config: &MetricsConfig, bind_address: &str) -> anyhow::Result<Option<SocketAddr>> {
    if !config.enabled {
        return Ok(None);
    }

    let addr = listen_addr(bind_address, config.port)?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe();
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(Some(addr))
}

fn listen_addr(bind_address: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let ip: IpAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid metrics bind address '{}'", bind_address))?;
    Ok(SocketAddr::new(ip, port))
}

fn describe() {
    metrics::describe_counter!(DATAGRAMS_RECEIVED, "Inbound datagrams read from the socket");
    metrics::describe_counter!(
        DATAGRAMS_DROPPED,
        "Inbound datagrams discarded as malformed, unknown or unregistered"
    );
    metrics::describe_counter!(PROCESSES_STARTED, "Managed scripts spawned");
    metrics::describe_counter!(PROCESSES_TIMED_OUT, "Managed scripts killed by the time limit");
    metrics::describe_counter!(OUTBOUND_DROPPED, "Outbound messages dropped because the outbox was full");
    metrics::describe_gauge!(ACTIVE_SESSIONS, "Registered sessions");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_installs_nothing() {
        let config = MetricsConfig {
            enabled: false,
            port: 9090,
        };
        assert_eq!(install(&config, "127.0.0.1").unwrap(), None);
    }

    #[test]
    fn test_listen_addr_accepts_both_families() {
        assert_eq!(
            listen_addr("0.0.0.0", 9090).unwrap(),
            SocketAddr::from(([0, 0, 0, 0], 9090))
        );
        let v6 = listen_addr("::", 9090).unwrap();
        assert!(v6.is_ipv6());
        assert_eq!(v6.port(), 9090);
        assert!(listen_addr("localhost", 9090).is_err());
    }
}
