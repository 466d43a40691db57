// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Resolves client-supplied file names against the managed directory and
//! rejects anything that would land outside it. Path validation is a core
//! security rule of the file manager, so it lives in the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Confines every file operation to the managed root

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Path sanitization errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSanitizerError {
    #[error("No filename provided")]
    EmptyName,

    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path outside managed directory: {0}")]
    OutsideBoundary(String),

    #[error("Path too long: {0}")]
    PathTooLong(String),
}

/// Path sanitizer domain service
///
/// Joins a relative name onto the managed root the way a platform path join
/// would, collapses `.` and `..` lexically, and requires the result to sit
/// strictly below the root.
///
/// # Security Guarantees
/// - `..` segments may never climb above the root
/// - A leading `/` is treated as relative to the root, never as the host root
/// - The root itself is not a valid target for file operations
/// - Symlinks are not followed (lexical check only)
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    root: PathBuf,
    /// Maximum allowed name length (default: 4096)
    max_path_len: usize,
}

impl PathSanitizer {
    /// Create a sanitizer for the given managed root with default settings
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_path_len: 4096,
        }
    }

    /// Create a sanitizer with a custom max name length
    pub fn with_max_length(root: impl Into<PathBuf>, max_path_len: usize) -> Self {
        Self {
            root: root.into(),
            max_path_len,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied name to an absolute path under the root
    ///
    /// # Arguments
    /// * `name` - The relative file name sent by the client
    ///
    /// # Returns
    /// * `Ok(PathBuf)` - Absolute path strictly below the managed root
    /// * `Err(PathSanitizerError)` - Name is empty, malformed or escapes the root
    ///
    /// # Examples
    /// ```
    /// use udpfm_core::domain::path_sanitizer::PathSanitizer;
    /// use std::path::PathBuf;
    ///
    /// let sanitizer = PathSanitizer::new("/srv/managed");
    ///
    /// let safe = sanitizer.resolve("notes/todo.txt").unwrap();
    /// assert_eq!(safe, PathBuf::from("/srv/managed/notes/todo.txt"));
    ///
    /// assert!(sanitizer.resolve("../../etc/passwd").is_err());
    /// ```
    pub fn resolve(&self, name: &str) -> Result<PathBuf, PathSanitizerError> {
        self.validate(name)?;

        let mut resolved = self.root.clone();
        let mut depth = 0usize;

        for component in Path::new(name).components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        tracing::warn!(
                            path = %name,
                            "Path traversal attempt detected: '..' climbs above the managed root"
                        );
                        return Err(PathSanitizerError::PathTraversal(name.to_string()));
                    }
                    resolved.pop();
                    depth -= 1;
                }
            }
        }

        if depth == 0 || !resolved.starts_with(&self.root) || resolved == self.root {
            tracing::warn!(path = %name, "Path does not name an entry below the managed root");
            return Err(PathSanitizerError::OutsideBoundary(name.to_string()));
        }

        Ok(resolved)
    }

    /// Validate a name without resolving it (lightweight check)
    pub fn validate(&self, name: &str) -> Result<(), PathSanitizerError> {
        if name.is_empty() {
            return Err(PathSanitizerError::EmptyName);
        }

        if name.len() > self.max_path_len {
            return Err(PathSanitizerError::PathTooLong(name.to_string()));
        }

        if name.contains('\0') {
            tracing::warn!(
                path = %name.escape_debug(),
                "Path contains null byte (potential security issue)"
            );
            return Err(PathSanitizerError::InvalidPath(
                "Path contains null byte".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> PathSanitizer {
        PathSanitizer::new("/srv/managed")
    }

    #[test]
    fn test_simple_name() {
        let result = sanitizer().resolve("file.txt");
        assert_eq!(result.unwrap(), PathBuf::from("/srv/managed/file.txt"));
    }

    #[test]
    fn test_reject_escape() {
        let result = sanitizer().resolve("../../etc/passwd");
        assert!(matches!(result.unwrap_err(), PathSanitizerError::PathTraversal(_)));
    }

    #[test]
    fn test_reject_escape_after_descent() {
        let result = sanitizer().resolve("sub/../../secret");
        assert!(matches!(result.unwrap_err(), PathSanitizerError::PathTraversal(_)));
    }

    #[test]
    fn test_parent_dir_inside_root_is_allowed() {
        let result = sanitizer().resolve("sub/../file.txt");
        assert_eq!(result.unwrap(), PathBuf::from("/srv/managed/file.txt"));
    }

    #[test]
    fn test_normalize_current_dir() {
        let result = sanitizer().resolve("./sub/./file.txt");
        assert_eq!(result.unwrap(), PathBuf::from("/srv/managed/sub/file.txt"));
    }

    #[test]
    fn test_leading_slash_is_relative_to_root() {
        let result = sanitizer().resolve("/etc/passwd");
        assert_eq!(result.unwrap(), PathBuf::from("/srv/managed/etc/passwd"));
    }

    #[test]
    fn test_root_itself_is_rejected() {
        assert!(matches!(
            sanitizer().resolve(".").unwrap_err(),
            PathSanitizerError::OutsideBoundary(_)
        ));
        assert!(matches!(
            sanitizer().resolve("sub/..").unwrap_err(),
            PathSanitizerError::OutsideBoundary(_)
        ));
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(sanitizer().resolve("").unwrap_err(), PathSanitizerError::EmptyName);
    }

    #[test]
    fn test_path_too_long() {
        let sanitizer = PathSanitizer::with_max_length("/srv/managed", 10);
        let result = sanitizer.resolve("a/very/long/name/that/exceeds/limit");
        assert!(matches!(result.unwrap_err(), PathSanitizerError::PathTooLong(_)));
    }

    #[test]
    fn test_null_byte() {
        assert!(matches!(
            sanitizer().resolve("bad\0name").unwrap_err(),
            PathSanitizerError::InvalidPath(_)
        ));
    }

    #[test]
    fn test_resolved_paths_stay_under_root() {
        let s = sanitizer();
        for name in ["a", "a/b/c", "./a/../b", "x/./y/../z", "/abs/name", "dots..txt"] {
            let resolved = s.resolve(name).unwrap();
            assert!(resolved.starts_with(s.root()), "{name} escaped: {resolved:?}");
            assert_ne!(resolved, s.root());
        }
        for name in ["..", "../x", "a/../../x", "./../x", "/../x"] {
            assert!(s.resolve(name).is_err(), "{name} should be rejected");
        }
    }
}
