use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bridge::{CaptureFailure, EventBridge, ScannerEvent};
use crate::capture::{CapturePipeline, ProjectionSource};
use crate::display::DisplayInfo;
use crate::error::{PermissionKind, ScannerError, ScannerResult};
use crate::overlay::{GestureEvent, OverlaySurface, OverlayWindowController, PointerEvent, TapHandler};
use crate::permissions::{ConsentOutcome, PermissionBroker};
use crate::settings::ScannerSettings;

use super::state::{ScannerSnapshot, ScannerState, ScannerStatus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const INDICATOR_TITLE: &str = "Canary scanner is active";
const INDICATOR_TEXT: &str = "Tap the bubble to check your screen for scams";

/// Persistent user-visible sign that scanning is active.
pub trait StatusIndicator: Send + Sync {
    fn show(&self, title: &str, text: &str) -> Result<()>;
    fn hide(&self);
}

/// Platform adapters the scanner runs on.
pub struct ScannerPlatform {
    pub broker: PermissionBroker,
    pub surface: Box<dyn OverlaySurface>,
    pub display: Arc<dyn DisplayInfo>,
    pub projection: Arc<dyn ProjectionSource>,
    pub indicator: Arc<dyn StatusIndicator>,
}

/// The background scanner: owns the bubble, turns taps into captures and
/// publishes results on the bridge. Its lifecycle is independent of any UI.
#[derive(Clone)]
pub struct ScannerService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    broker: PermissionBroker,
    overlay: Mutex<OverlayWindowController>,
    pipeline: CapturePipeline,
    indicator: Arc<dyn StatusIndicator>,
    bridge: EventBridge,
    settings: Mutex<ScannerSettings>,
    state: Mutex<ScannerState>,
    /// Held for the whole of start and stop so they never interleave.
    lifecycle: tokio::sync::Mutex<Option<ActiveRun>>,
    /// Set from the tap until the scan it started has finished.
    scan_busy: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

struct ActiveRun {
    cancel: CancellationToken,
    tap_loop: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScannerService {
    pub fn new(platform: ScannerPlatform, bridge: EventBridge, settings: ScannerSettings) -> Self {
        let overlay = OverlayWindowController::new(
            platform.surface,
            platform.broker.clone(),
            platform.display.clone(),
            settings.bubble.clone(),
            settings.gesture.clone(),
        );
        let pipeline = CapturePipeline::new(
            platform.projection,
            platform.display,
            settings.capture.clone(),
        );

        Self {
            inner: Arc::new(ServiceInner {
                broker: platform.broker,
                overlay: Mutex::new(overlay),
                pipeline,
                indicator: platform.indicator,
                bridge,
                settings: Mutex::new(settings),
                state: Mutex::new(ScannerState::default()),
                lifecycle: tokio::sync::Mutex::new(None),
                scan_busy: Arc::new(AtomicBool::new(false)),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.inner.bridge
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).status.is_running()
    }

    pub fn has_overlay_permission(&self) -> ScannerResult<bool> {
        Ok(self.inner.broker.check_overlay()?.is_granted())
    }

    /// Sends the user to the overlay settings and reports the permission once
    /// the host app is back in front.
    pub async fn request_overlay_permission(&self) -> ScannerResult<bool> {
        let state = self
            .inner
            .broker
            .request_overlay(&self.inner.shutdown)
            .await?;
        Ok(state.is_granted())
    }

    /// Forwarded by the host whenever its window regains the foreground.
    pub fn notify_host_resumed(&self) {
        self.inner.broker.notify_host_resumed();
    }

    /// Bubble and gesture settings apply on the next start; capture settings
    /// apply to the next capture.
    pub fn configure(&self, settings: ScannerSettings) {
        lock(&self.inner.overlay).configure(settings.bubble.clone(), settings.gesture.clone());
        self.inner.pipeline.configure(settings.capture.clone());
        *lock(&self.inner.settings) = settings;
    }

    pub fn snapshot(&self) -> ScannerSnapshot {
        self.inner.snapshot()
    }

    /// Routes a pointer event from the bubble window.
    pub fn handle_pointer(&self, event: PointerEvent) -> Option<GestureEvent> {
        lock(&self.inner.overlay).on_pointer(event)
    }

    /// Shows the status indicator and the bubble. Fails with a permission
    /// error if the overlay permission is missing; this never prompts.
    /// Starting a running scanner is a no-op.
    pub async fn start(&self) -> ScannerResult<()> {
        let inner = &self.inner;
        let mut run = inner.lifecycle.lock().await;
        if run.is_some() {
            log_debug!("Scanner already running; ignoring start");
            return Ok(());
        }

        inner.set_status(ScannerStatus::Starting);
        let (tap_tx, tap_rx) = mpsc::unbounded_channel();
        if let Err(err) = inner.bring_up(tap_tx) {
            log_warn!("Scanner failed to start: {err}");
            lock(&inner.state).reset();
            inner.publish_state();
            return Err(err);
        }

        let cancel = CancellationToken::new();
        let tap_loop = tokio::spawn(tap_loop(inner.clone(), tap_rx, cancel.clone()));
        *run = Some(ActiveRun { cancel, tap_loop });

        let session_id = Uuid::new_v4().to_string();
        lock(&inner.state).begin(session_id.clone(), Utc::now());
        log_info!("Scanner running (session {session_id})");
        inner.publish_state();
        Ok(())
    }

    /// Tears everything down: abandons a pending consent request, releases
    /// an in-flight capture, removes the bubble and the indicator. Safe to
    /// call in any state.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let mut run = inner.lifecycle.lock().await;
        let Some(active) = run.take() else {
            log_debug!("Scanner not running; ignoring stop");
            return;
        };

        inner.set_status(ScannerStatus::Stopping);
        active.cancel.cancel();
        inner.pipeline.abort();
        lock(&inner.overlay).stop();

        if let Err(err) = active.tap_loop.await {
            log_error!("Tap loop ended abnormally: {err}");
        }

        inner.broker.reset_consent();
        inner.indicator.hide();
        inner.scan_busy.store(false, Ordering::Release);

        lock(&inner.state).reset();
        log_info!("Scanner stopped");
        inner.publish_state();
    }

    /// Stops the scanner and resolves any pending overlay-permission wait.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.stop().await;
    }
}

impl ServiceInner {
    fn bring_up(&self, taps: mpsc::UnboundedSender<()>) -> ScannerResult<()> {
        if !self.broker.check_overlay()?.is_granted() {
            return Err(ScannerError::Permission(PermissionKind::Overlay));
        }

        self.indicator
            .show(INDICATOR_TITLE, INDICATOR_TEXT)
            .map_err(|err| ScannerError::Platform(err.context("show status indicator")))?;

        self.scan_busy.store(false, Ordering::Release);
        let corner = lock(&self.settings).bubble.initial_corner;
        if let Err(err) = lock(&self.overlay).start(corner, self.tap_handler(taps)) {
            self.indicator.hide();
            return Err(err);
        }
        Ok(())
    }

    /// Runs on the window thread: only flips a flag and queues the tap.
    fn tap_handler(&self, taps: mpsc::UnboundedSender<()>) -> TapHandler {
        let busy = self.scan_busy.clone();
        Box::new(move || {
            if busy.swap(true, Ordering::AcqRel) {
                log_debug!("Tap ignored: a scan is already in progress");
                return;
            }
            if taps.send(()).is_err() {
                busy.store(false, Ordering::Release);
            }
        })
    }

    fn set_status(&self, status: ScannerStatus) {
        lock(&self.state).status = status;
        log_debug!("Scanner status -> {status:?}");
        self.publish_state();
    }

    fn publish_state(&self) {
        self.bridge.emit(ScannerEvent::StatusChanged(self.snapshot()));
    }

    fn snapshot(&self) -> ScannerSnapshot {
        let state = lock(&self.state).clone();
        let bubble = {
            let overlay = lock(&self.overlay);
            overlay.is_attached().then(|| overlay.window_state())
        };
        ScannerSnapshot {
            status: state.status,
            session_id: state.session_id,
            started_at: state.started_at,
            overlay_permission: self.broker.overlay_state(),
            consent: self.broker.consent_phase(),
            capture_in_flight: state.capture_in_flight,
            screenshots_emitted: state.screenshots_emitted,
            bubble,
        }
    }

    /// One tap: get a grant (prompting if needed), capture, publish.
    async fn scan_once(&self, cancel: &CancellationToken) {
        let grant = match self.broker.take_grant() {
            Some(grant) => grant,
            None => match self.broker.request_capture_consent(cancel).await {
                Ok(ConsentOutcome::Granted) => match self.broker.take_grant() {
                    Some(grant) => grant,
                    None => {
                        log_warn!("Consent granted but the grant was already taken");
                        return;
                    }
                },
                Ok(ConsentOutcome::Denied) => {
                    log_info!("Capture consent denied; no scan");
                    return;
                }
                Ok(ConsentOutcome::Abandoned) => return,
                Err(ScannerError::ConsentPending) => {
                    log_debug!("Consent already pending; tap ignored");
                    return;
                }
                Err(err) => {
                    self.report_failure(&err, cancel);
                    return;
                }
            },
        };

        lock(&self.state).capture_in_flight = true;
        let result = self.pipeline.capture(Some(grant), cancel).await;
        lock(&self.state).capture_in_flight = false;

        match result {
            Ok(_) if cancel.is_cancelled() => {
                log_info!("Discarding screenshot captured while stopping");
            }
            Ok(screenshot) => {
                lock(&self.state).screenshots_emitted += 1;
                log_info!(
                    "Publishing screenshot ({} bytes)",
                    screenshot.image_data.len()
                );
                self.bridge.emit(ScannerEvent::ScreenshotCaptured(screenshot));
            }
            Err(ScannerError::Cancelled) => log_info!("Capture interrupted by stop"),
            Err(err) => self.report_failure(&err, cancel),
        }
    }

    fn report_failure(&self, err: &ScannerError, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        log_warn!("Scan failed: {err}");
        self.bridge.emit(ScannerEvent::CaptureFailed(CaptureFailure {
            message: err.to_string(),
            retryable: err.is_retryable(),
        }));
    }
}

async fn tap_loop(
    inner: Arc<ServiceInner>,
    mut taps: UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    loop {
        let tap = tokio::select! {
            _ = cancel.cancelled() => break,
            tap = taps.recv() => tap,
        };
        if tap.is_none() {
            break;
        }

        inner.scan_once(&cancel).await;
        inner.scan_busy.store(false, Ordering::Release);
    }
    log_debug!("Tap loop exited");
}
