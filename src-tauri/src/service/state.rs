use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::overlay::BubbleWindowState;
use crate::permissions::{ConsentPhase, OverlayPermission};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScannerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ScannerStatus {
    pub fn is_running(self) -> bool {
        self == ScannerStatus::Running
    }
}

/// Lifecycle bookkeeping of one scanner run.
#[derive(Debug, Clone, Default)]
pub struct ScannerState {
    pub status: ScannerStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub capture_in_flight: bool,
    pub screenshots_emitted: u64,
}

impl ScannerState {
    pub fn begin(&mut self, session_id: String, started_at: DateTime<Utc>) {
        *self = Self {
            status: ScannerStatus::Running,
            session_id: Some(session_id),
            started_at: Some(started_at),
            capture_in_flight: false,
            screenshots_emitted: 0,
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerSnapshot {
    pub status: ScannerStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub overlay_permission: OverlayPermission,
    pub consent: ConsentPhase,
    pub capture_in_flight: bool,
    pub screenshots_emitted: u64,
    pub bubble: Option<BubbleWindowState>,
}
