// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dispatcher;
pub mod session_registry;

pub use dispatcher::{CommandDispatcher, CommandError};
pub use session_registry::{Registration, RegistryError, SessionRegistry};
