//! Message channel between the background scanner and the application layer.
//!
//! Emitting never blocks: events go into a broadcast ring and each subscriber
//! reads at its own pace. With no subscriber attached the event is dropped,
//! with no buffering or replay. A subscriber that falls more than the ring
//! capacity behind loses the oldest events.

#[cfg(feature = "app")]
pub mod forward;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::analysis::AnalysisResult;
use crate::capture::ScreenshotEvent;
use crate::service::ScannerSnapshot;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub const SCREENSHOT_CAPTURED: &str = "onScreenshotCaptured";
pub const CAPTURE_FAILED: &str = "capture-failed";
pub const STATE_CHANGED: &str = "scanner-state-changed";
pub const CONSENT_REQUESTED: &str = "capture-consent-requested";
pub const ANALYSIS_COMPLETED: &str = "analysis-completed";
pub const ANALYSIS_FAILED: &str = "analysis-failed";

const DEFAULT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotPayload {
    pub base64: String,
    pub timestamp: i64,
}

impl From<&ScreenshotEvent> for ScreenshotPayload {
    fn from(event: &ScreenshotEvent) -> Self {
        Self {
            base64: event.to_base64(),
            timestamp: event.captured_at_millis,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFailure {
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    /// `timestamp` of the screenshot analysed, absent for text analysis.
    pub captured_at: Option<i64>,
    pub result: AnalysisResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFailure {
    pub captured_at: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum ScannerEvent {
    ScreenshotCaptured(ScreenshotEvent),
    CaptureFailed(CaptureFailure),
    StatusChanged(ScannerSnapshot),
    ConsentRequested,
    AnalysisCompleted(AnalysisReport),
    AnalysisFailed(AnalysisFailure),
}

impl ScannerEvent {
    /// Event name as seen by the frontend.
    pub fn name(&self) -> &'static str {
        match self {
            ScannerEvent::ScreenshotCaptured(_) => SCREENSHOT_CAPTURED,
            ScannerEvent::CaptureFailed(_) => CAPTURE_FAILED,
            ScannerEvent::StatusChanged(_) => STATE_CHANGED,
            ScannerEvent::ConsentRequested => CONSENT_REQUESTED,
            ScannerEvent::AnalysisCompleted(_) => ANALYSIS_COMPLETED,
            ScannerEvent::AnalysisFailed(_) => ANALYSIS_FAILED,
        }
    }

    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            ScannerEvent::ScreenshotCaptured(event) => {
                serde_json::to_value(ScreenshotPayload::from(event))
            }
            ScannerEvent::CaptureFailed(failure) => serde_json::to_value(failure),
            ScannerEvent::StatusChanged(snapshot) => serde_json::to_value(snapshot),
            ScannerEvent::ConsentRequested => Ok(serde_json::Value::Null),
            ScannerEvent::AnalysisCompleted(report) => serde_json::to_value(report),
            ScannerEvent::AnalysisFailed(failure) => serde_json::to_value(failure),
        }
    }
}

#[derive(Clone)]
pub struct EventBridge {
    tx: broadcast::Sender<ScannerEvent>,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBridge {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScannerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Fire-and-forget. Returns whether any subscriber was attached.
    pub fn emit(&self, event: ScannerEvent) -> bool {
        match self.tx.send(event) {
            Ok(receivers) => {
                log_debug!("Bridge event delivered to {receivers} subscriber(s)");
                true
            }
            Err(broadcast::error::SendError(event)) => {
                log_warn!("Dropped {} event: no subscriber attached", event.name());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn screenshot() -> ScreenshotEvent {
        ScreenshotEvent {
            image_data: vec![0xFF, 0xD8, 0xFF, 0xD9].into(),
            captured_at_millis: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_screenshot_payload_shape() {
        let payload = ScannerEvent::ScreenshotCaptured(screenshot())
            .payload()
            .unwrap();
        assert_eq!(payload["base64"], "/9j/2Q==");
        assert_eq!(payload["timestamp"], 1_700_000_000_123i64);
    }

    #[test]
    fn test_emit_without_subscriber_drops() {
        let bridge = EventBridge::default();
        assert!(!bridge.emit(ScannerEvent::ScreenshotCaptured(screenshot())));

        // A late subscriber does not see the dropped event.
        let mut rx = bridge.subscribe();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_every_subscriber_receives() {
        let bridge = EventBridge::default();
        let mut first = bridge.subscribe();
        let mut second = bridge.subscribe();
        assert_eq!(bridge.subscriber_count(), 2);

        assert!(bridge.emit(ScannerEvent::ConsentRequested));
        assert_eq!(first.try_recv().unwrap().name(), CONSENT_REQUESTED);
        assert_eq!(second.try_recv().unwrap().name(), CONSENT_REQUESTED);
    }

    #[test]
    fn test_slow_subscriber_lags_without_blocking() {
        let bridge = EventBridge::new(2);
        let mut rx = bridge.subscribe();
        for _ in 0..5 {
            assert!(bridge.emit(ScannerEvent::ScreenshotCaptured(screenshot())));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_failure_payload_is_camel_case() {
        let payload = ScannerEvent::CaptureFailed(CaptureFailure {
            message: "no frame".into(),
            retryable: true,
        })
        .payload()
        .unwrap();
        assert_eq!(payload["retryable"], true);
        assert_eq!(payload["message"], "no frame");
    }
}
