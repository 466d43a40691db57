// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Loopback tests that put real datagrams through a running server.

use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use udpfm_core::domain::protocol::ServerMessage;
use udpfm_core::domain::role::Role;
use udpfm_core::domain::server_config::ServerConfig;
use udpfm_core::presentation::udp::UdpServer;

async fn recv_message(socket: &UdpSocket) -> ServerMessage {
    let mut buf = vec![0u8; 65_536];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("no reply from server")
        .unwrap();
    serde_json::from_slice(&buf[..len]).unwrap()
}

async fn send_json(socket: &UdpSocket, server: SocketAddr, value: serde_json::Value) {
    socket
        .send_to(&serde_json::to_vec(&value).unwrap(), server)
        .await
        .unwrap();
}

fn loopback_config(dir: &TempDir) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.network.bind_address = "127.0.0.1".to_string();
    config.network.port = 0;
    config.storage.managed_dir = dir.path().join("managed_files");
    config
}

#[tokio::test]
async fn test_register_and_list_over_udp() {
    let dir = TempDir::new().unwrap();
    let server = UdpServer::bind(loopback_config(&dir)).await.unwrap();
    let server_addr = server.local_addr().unwrap();
    assert!(dir.path().join("managed_files").is_dir());

    let shutdown = CancellationToken::new();
    let running = tokio::spawn(server.run(shutdown.clone()));

    let admin = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send_json(&admin, server_addr, json!({"type": "register", "userName": "root"})).await;
    assert_eq!(
        recv_message(&admin).await,
        ServerMessage::RegistrationSuccess {
            message: "Welcome root!".to_string(),
            is_admin: true,
            role: Role::Admin,
        }
    );

    let user = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send_json(&user, server_addr, json!({"type": "register", "userName": "bob"})).await;
    assert!(matches!(
        recv_message(&user).await,
        ServerMessage::RegistrationSuccess { is_admin: false, role: Role::User, .. }
    ));
    match recv_message(&admin).await {
        ServerMessage::UserConnected { user_name, client_id, .. } => {
            assert_eq!(user_name, "bob");
            assert_eq!(client_id.endpoint(), user.local_addr().unwrap());
        }
        other => panic!("expected user_connected, got {other:?}"),
    }

    // Garbage is dropped without killing the loop.
    user.send_to(b"\xff\xfe not json", server_addr).await.unwrap();

    send_json(
        &user,
        server_addr,
        json!({"type": "fileAccess", "operation": "list", "filename": null, "content": null}),
    )
    .await;
    assert!(matches!(
        recv_message(&user).await,
        ServerMessage::Success { files: Some(files), .. } if files.is_empty()
    ));

    shutdown.cancel();
    running.await.unwrap().unwrap();

    // The admin hears that the other session went away with the server.
    assert!(matches!(
        recv_message(&admin).await,
        ServerMessage::UserDisconnected { .. }
    ));
}
