// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `udpfm connect`: interactive terminal client.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use udpfm_core::domain::protocol::{ClientMessage, ServerMessage};

use crate::client::{Action, ClientSession};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);
const REGISTER_ATTEMPTS: usize = 3;
const RECV_BUFFER_BYTES: usize = 65_536;

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Server address
    #[arg(short, long, env = "UDPFM_SERVER", default_value = "127.0.0.1:3000")]
    pub server: String,

    /// User name to register with (prompted when omitted)
    #[arg(short, long)]
    pub name: Option<String>,
}

pub async fn run(args: ConnectArgs) -> Result<()> {
    let server = tokio::net::lookup_host(&args.server)
        .await
        .with_context(|| format!("Failed to resolve {}", args.server))?
        .next()
        .with_context(|| format!("No address found for {}", args.server))?;

    let local: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(local)
        .await
        .context("Failed to bind client socket")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let name = match args.name {
        Some(name) => name,
        None => {
            prompt("Enter your username: ")?;
            stdin.next_line().await?.unwrap_or_default()
        }
    };

    let mut session = ClientSession::new(name.trim());
    let mut buf = vec![0u8; RECV_BUFFER_BYTES];

    register(&socket, server, &mut session, &mut buf, REGISTER_TIMEOUT).await?;
    prompt(&session.prompt())?;

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match session.handle_input(&line) {
                    Action::Quit => break,
                    Action::Print(lines) => print_lines(&lines),
                    Action::Send(message) => send(&socket, server, &message).await?,
                }
            }

            received = socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        continue;
                    }
                };
                if from != server {
                    debug!(from = %from, "Ignoring datagram from unknown sender");
                    continue;
                }
                match serde_json::from_slice::<ServerMessage>(&buf[..len]) {
                    Ok(message) => print_lines(&session.handle_server_message(message)),
                    Err(e) => {
                        warn!(error = %e, "Unreadable message from server");
                        continue;
                    }
                }
            }
        }
        prompt(&session.prompt())?;
    }

    println!();
    println!("{}", "Goodbye!".dimmed());
    Ok(())
}

async fn register(
    socket: &UdpSocket,
    server: SocketAddr,
    session: &mut ClientSession,
    buf: &mut [u8],
    wait: Duration,
) -> Result<()> {
    for attempt in 1..=REGISTER_ATTEMPTS {
        send(socket, server, &session.register_message()).await?;

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let received = tokio::time::timeout_at(deadline, socket.recv_from(buf)).await;
            let Ok(received) = received else {
                warn!(attempt, "No registration reply from {}", server);
                break;
            };
            let (len, from) = received.context("Receive failed")?;
            if from != server {
                continue;
            }
            match serde_json::from_slice::<ServerMessage>(&buf[..len]) {
                Ok(message) => {
                    print_lines(&session.handle_server_message(message));
                    if session.is_registered() {
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "Unreadable message from server"),
            }
        }
    }

    bail!(
        "Server at {} did not answer after {} attempts",
        server,
        REGISTER_ATTEMPTS
    )
}

async fn send(socket: &UdpSocket, server: SocketAddr, message: &ClientMessage) -> Result<()> {
    let bytes = serde_json::to_vec(message).context("Failed to encode message")?;
    socket
        .send_to(&bytes, server)
        .await
        .with_context(|| format!("Failed to send to {}", server))?;
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line.trim_end_matches('\n'));
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_gives_up_without_server() {
        colored::control::set_override(false);
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = silent.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut session = ClientSession::new("alice");
        let mut buf = vec![0u8; 1024];
        let err = register(&client, server, &mut session, &mut buf, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not answer"));
        assert!(!session.is_registered());
        drop(silent);
    }

    #[tokio::test]
    async fn test_register_with_live_reply() {
        colored::control::set_override(false);
        let fake_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = fake_server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let (len, from) = fake_server.recv_from(&mut buf).await.unwrap();
            let request: ClientMessage = serde_json::from_slice(&buf[..len]).unwrap();
            assert_eq!(
                request,
                ClientMessage::Register {
                    user_name: Some("alice".to_string())
                }
            );
            let reply = ServerMessage::RegistrationSuccess {
                message: "Welcome alice!".to_string(),
                is_admin: true,
                role: udpfm_core::domain::role::Role::Admin,
            };
            fake_server
                .send_to(&serde_json::to_vec(&reply).unwrap(), from)
                .await
                .unwrap();
        });

        let mut session = ClientSession::new("alice");
        let mut buf = vec![0u8; 1024];
        register(&client, server, &mut session, &mut buf, REGISTER_TIMEOUT)
            .await
            .unwrap();
        assert!(session.is_registered());
        responder.await.unwrap();
    }
}
