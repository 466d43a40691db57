// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! udpfm core
//!
//! Sessions, roles, the managed-file sandbox, the process supervisor and the
//! UDP protocol loop that ties them together.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Implements the UDP file manager server

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
