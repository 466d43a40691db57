// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod server;

pub use server::{bind_with_fallback, shutdown_signal, UdpServer};
