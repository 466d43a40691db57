// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`udpfm-core`)
//!
//! Network surface that moves datagrams between the socket and the
//! application layer. No authorization or file logic lives here; every decoded
//! message is handed to [`crate::application::dispatcher::CommandDispatcher`].
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`udp`] | UDP/JSON | Bind, receive loop, outbound writer, shutdown |

pub mod udp;
