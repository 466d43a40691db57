// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod managed_files;
pub mod telemetry;
pub mod notifier;
pub mod process_supervisor;

pub use managed_files::{FileStoreError, ManagedFiles};
pub use notifier::{Notifier, Outbound, OutboundReceiver};
pub use process_supervisor::{ProcessEvent, ProcessSupervisor, SupervisorError, SupervisorSettings};
