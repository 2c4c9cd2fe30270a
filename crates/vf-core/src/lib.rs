//! Shared primitives used across VirtFrame crates.

use core::fmt;

/// Result alias used across the workspace.
pub type VirtResult<T> = Result<T, VirtError>;

/// Coded error raised by every VirtFrame subsystem.
///
/// `code` is a stable dotted identifier (`storage.archive.entry_missing`)
/// that callers match on; `message` is for humans and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtError {
    pub code: &'static str,
    pub message: String,
}

impl VirtError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true when the error belongs to the given dotted code family.
    pub fn is_in(&self, prefix: &str) -> bool {
        self.code == prefix
            || self
                .code
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for VirtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for VirtError {}
