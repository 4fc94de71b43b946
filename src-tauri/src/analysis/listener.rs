use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::{AnalysisFailure, AnalysisReport, EventBridge, ScannerEvent};

use super::{AnalysisInput, ScamAnalyzer};

/// Analyses every screenshot that crosses the bridge and publishes the
/// verdict back onto it. Screenshots are handled one at a time, in order.
pub fn spawn_analysis_listener(
    bridge: EventBridge,
    analyzer: Arc<dyn ScamAnalyzer>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = bridge.subscribe();
    tokio::spawn(async move {
        info!("Analysis listener started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            let screenshot = match event {
                Ok(ScannerEvent::ScreenshotCaptured(screenshot)) => screenshot,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Analysis listener fell behind; skipped {skipped} event(s)");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let captured_at = Some(screenshot.captured_at_millis);
            let input = AnalysisInput::Image {
                jpeg_base64: screenshot.to_base64(),
                context: None,
            };
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = analyzer.analyze(input) => outcome,
            };

            let event = match outcome {
                Ok(result) => ScannerEvent::AnalysisCompleted(AnalysisReport {
                    captured_at,
                    result,
                }),
                Err(err) => ScannerEvent::AnalysisFailed(AnalysisFailure {
                    captured_at,
                    message: err.to_string(),
                }),
            };
            bridge.emit(event);
        }
        info!("Analysis listener stopped");
    })
}

/// Waits for the listener task and logs an abnormal end. Returns whether it
/// stopped cleanly.
pub async fn join_analysis_listener(listener: JoinHandle<()>) -> bool {
    match listener.await {
        Ok(()) => true,
        Err(err) => {
            error!("Analysis listener ended abnormally: {err}");
            false
        }
    }
}
