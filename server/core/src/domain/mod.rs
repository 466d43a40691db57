// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Domain model for the file manager server.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and rules, no I/O

pub mod path_sanitizer;
pub mod role;
pub mod session;
pub mod process;
pub mod protocol;
pub mod server_config;
