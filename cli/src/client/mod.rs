// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Interactive terminal client for a udpfm server.

pub mod session;
pub mod view;

pub use session::{Action, ClientSession, ExecState};
