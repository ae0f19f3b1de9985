//! Shared helpers and error types for the provisioner crates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Result type for shared helpers.
pub type UtilsResult<T> = Result<T, UtilsError>;

/// Shared error variants for cross-crate helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UtilsError {
    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,
}

/// Cooperative cancellation flag shared between a worker and its driver.
///
/// Clones share state: cancelling any clone is observed by all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(UtilsError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> UtilsResult<()> {
        if self.is_cancelled() {
            return Err(UtilsError::Cancelled);
        }
        Ok(())
    }
}

/// Basic heuristic for detecting secrets in script or preset content.
pub fn contains_potential_secret(contents: &str) -> bool {
    let lowered = contents.to_lowercase();
    let signals = [
        "token=",
        "api_key",
        "apikey",
        "access_token",
        "authorization:",
        "bearer ",
        "ghp_",
        "github_pat_",
        "civitai_token",
    ];
    signals.iter().any(|signal| lowered.contains(signal))
}

/// Insert an access token into an `https://github.com/...` remote URL.
///
/// Other hosts and empty tokens leave the URL untouched.
pub fn with_token(repo_url: &str, token: Option<&str>) -> String {
    match token.map(str::trim) {
        Some(token) if !token.is_empty() && repo_url.contains("github.com") => {
            repo_url.replacen("https://", &format!("https://{token}@"), 1)
        }
        _ => repo_url.to_string(),
    }
}

/// Replace every occurrence of `token` in `message` with `***`.
pub fn redact(message: &str, token: Option<&str>) -> String {
    match token.map(str::trim) {
        Some(token) if !token.is_empty() => message.replace(token, "***"),
        _ => message.to_string(),
    }
}
