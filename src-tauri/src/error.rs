use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Which privileged grant a [`ScannerError::Permission`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    /// Persistent draw-over-other-apps permission.
    Overlay,
    /// Per-session screen-recording consent.
    CaptureConsent,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKind::Overlay => f.write_str("overlay"),
            PermissionKind::CaptureConsent => f.write_str("screen capture"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScannerError {
    /// A required grant is absent or was denied. Recoverable by prompting the user.
    #[error("{0} permission not granted")]
    Permission(PermissionKind),

    /// Capture attempted without an unconsumed grant.
    #[error("no unconsumed capture grant available")]
    NoGrant,

    /// No frame could be produced within the wait window.
    #[error("screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("a capture session is already active")]
    CaptureBusy,

    #[error("a capture consent request is already pending")]
    ConsentPending,

    #[error("operation cancelled")]
    Cancelled,

    #[error("analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("overlay window error: {0}")]
    Overlay(String),

    /// Structural failure of a platform API.
    #[error("platform error: {0:#}")]
    Platform(#[from] anyhow::Error),
}

impl ScannerError {
    /// Transient errors the caller may retry by re-requesting consent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScannerError::NoGrant | ScannerError::CaptureFailed(_) | ScannerError::CaptureBusy
        )
    }
}

pub type ScannerResult<T> = std::result::Result<T, ScannerError>;
