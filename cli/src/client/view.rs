// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Terminal rendering for server replies.

use colored::Colorize;
use std::collections::BTreeMap;

use udpfm_core::domain::protocol::FileEntry;
use udpfm_core::domain::role::{Capability, Role};
use udpfm_core::domain::session::ClientId;

use crate::client::session::KnownUser;

pub fn success(message: &str) -> String {
    format!("{} {}", "✓".green(), message.green())
}

pub fn error(message: &str) -> String {
    format!("{} {}", "✗".red(), message.red())
}

pub fn warning(message: &str) -> String {
    format!("{} {}", "!".yellow(), message.yellow())
}

pub fn info(message: &str) -> String {
    format!("{} {}", "ℹ".cyan(), message.cyan())
}

/// Commands the given role can use, with the role's description on top.
pub fn help(role: Role) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!("{} ({})", "Available commands".bold(), role.capabilities().description),
        format!("  {:<36} {}", "list", "List files"),
    ];

    let gated: [(Capability, &str, &str); 4] = [
        (Capability::Read, "read <filename>", "Read file content"),
        (Capability::Write, "write <filename> <content>", "Write content to file"),
        (Capability::Execute, "execute <filename>", "Execute a script"),
        (Capability::Delete, "delete <filename>", "Delete a file"),
    ];
    for (capability, usage, what) in gated {
        if role.allows(capability) {
            lines.push(format!("  {:<36} {}", usage, what));
        }
    }

    if role.allows(Capability::ManageUsers) {
        lines.push(format!("  {:<36} {}", "users", "Show connected users"));
        lines.push(format!(
            "  {:<36} {}",
            "setrole <username|clientId> <role>", "Change a user's role"
        ));
        let roles: Vec<&str> = Role::assignable().iter().map(|r| r.as_str()).collect();
        lines.push(format!("  {:<36} {}", "", roles.join(", ").dimmed()));
    }
    if role.allows(Capability::Execute) {
        lines.push(format!("  {:<36} {}", "kill", "Stop your running script"));
    }

    lines.push(format!("  {:<36} {}", "help", "Show this help"));
    lines.push(format!("  {:<36} {}", "exit", "Quit"));
    lines.push(String::new());
    lines
}

pub fn user_table(users: &BTreeMap<ClientId, KnownUser>) -> Vec<String> {
    if users.is_empty() {
        return vec![info("No users connected")];
    }

    let mut lines = vec![
        format!("{:<20} {:<12} {}", "Name".bold(), "Role".bold(), "Client ID".bold()),
        "-".repeat(56),
    ];
    for (id, user) in users {
        lines.push(format!("{:<20} {:<12} {}", user.user_name, user.role.as_str(), id));
    }
    lines
}

pub fn file_table(files: &[FileEntry]) -> Vec<String> {
    if files.is_empty() {
        return vec![info("Directory is empty")];
    }

    let mut lines = vec![
        format!(
            "{:<20} {:<10} {:<10} {}",
            "Name".bold(),
            "Size".bold(),
            "Type".bold(),
            "Last Modified".bold()
        ),
        "-".repeat(70),
    ];
    for file in files {
        if let Some(reason) = &file.error {
            lines.push(format!("{:<20} {}", file.name, reason.red()));
            continue;
        }
        lines.push(format!(
            "{:<20} {:<10} {:<10} {}",
            file.name,
            file.size.as_deref().unwrap_or("-"),
            file.file_type.as_deref().unwrap_or("-"),
            file.modified.as_deref().unwrap_or("-"),
        ));
    }
    lines
}

/// Body of a `success` reply: message, then any listing, content or details.
pub fn success_body(
    message: Option<String>,
    files: Option<Vec<FileEntry>>,
    content: Option<String>,
    details: Option<String>,
) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(message) = message {
        lines.push(success(&message));
    }
    if let Some(files) = files {
        lines.extend(file_table(&files));
    }
    if let Some(details) = details {
        lines.push(info(&details));
    }
    if let Some(content) = content {
        lines.push("-".repeat(40));
        lines.extend(content.lines().map(str::to_string));
        lines.push("-".repeat(40));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_follows_capabilities() {
        colored::control::set_override(false);
        let user = help(Role::User).join("\n");
        assert!(user.contains("read <filename>"));
        assert!(!user.contains("write <filename>"));
        assert!(!user.contains("setrole"));

        let admin = help(Role::Admin).join("\n");
        assert!(admin.contains("delete <filename>"));
        assert!(admin.contains("user, moderator, power_user"));
    }

    #[test]
    fn test_file_table_marks_unreadable_entries() {
        colored::control::set_override(false);
        let files = vec![
            FileEntry::described(
                "a.txt".to_string(),
                "3.0 B".to_string(),
                "1/2/2026, 3:04:05 PM".to_string(),
                "txt".to_string(),
            ),
            FileEntry::unreadable("broken".to_string()),
        ];
        let lines = file_table(&files);
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("a.txt"));
        assert!(lines[2].contains("3.0 B"));
        assert!(lines[3].contains("Cannot read file info"));
    }

    #[test]
    fn test_prefixes() {
        colored::control::set_override(false);
        assert_eq!(success("done"), "✓ done");
        assert_eq!(error("bad"), "✗ bad");
        assert_eq!(warning("hm"), "! hm");
        assert_eq!(info("fyi"), "ℹ fyi");
    }
}
