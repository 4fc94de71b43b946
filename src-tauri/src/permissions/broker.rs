use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ScannerError, ScannerResult};

use super::consent::{
    CaptureConsent, CaptureGrant, ConsentOutcome, ConsentPhase, ConsentPrompt, ConsentResponder,
};
use super::overlay_grant::{OverlayPermission, OverlayPermissionSource};

/// Owns both privileged grants. The capture-consent slot is process-wide:
/// at most one request is pending and at most one unconsumed grant exists.
#[derive(Clone)]
pub struct PermissionBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    overlay_source: Arc<dyn OverlayPermissionSource>,
    overlay: Mutex<OverlayPermission>,
    host_resumed: Notify,
    prompt: Arc<dyn ConsentPrompt>,
    consent: Mutex<CaptureConsent>,
}

impl BrokerInner {
    fn consent(&self) -> MutexGuard<'_, CaptureConsent> {
        self.consent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves a pending request to its final state, unless the slot was reset
    /// or taken over by another request in the meantime.
    fn settle(&self, request_id: Uuid, next: CaptureConsent) -> bool {
        let mut consent = self.consent();
        match &*consent {
            CaptureConsent::Requested { request_id: pending } if *pending == request_id => {
                *consent = next;
                true
            }
            _ => false,
        }
    }
}

/// Puts the slot back to `NotRequested` if the request future is dropped
/// before it settles.
struct PendingRequest<'a> {
    inner: &'a BrokerInner,
    request_id: Uuid,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self
            .inner
            .settle(self.request_id, CaptureConsent::NotRequested)
        {
            debug!("Consent request {} dropped before settling", self.request_id);
        }
    }
}

impl PermissionBroker {
    pub fn new(
        overlay_source: Arc<dyn OverlayPermissionSource>,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                overlay_source,
                overlay: Mutex::new(OverlayPermission::Unknown),
                host_resumed: Notify::new(),
                prompt,
                consent: Mutex::new(CaptureConsent::NotRequested),
            }),
        }
    }

    /// Queries the OS for the overlay permission. No side effects beyond
    /// caching the answer.
    pub fn check_overlay(&self) -> ScannerResult<OverlayPermission> {
        let granted = self
            .inner
            .overlay_source
            .can_draw_overlays()
            .map_err(|err| ScannerError::Platform(err.context("query overlay permission")))?;
        let state = OverlayPermission::from(granted);
        *self
            .inner
            .overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        Ok(state)
    }

    /// Last observed overlay permission, `Unknown` before the first check.
    pub fn overlay_state(&self) -> OverlayPermission {
        *self
            .inner
            .overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sends the user to the overlay settings page and re-checks once the host
    /// app is back in the foreground. There is no timeout: the user may never
    /// come back. Cancelling resolves with whatever the OS reports right now.
    pub async fn request_overlay(
        &self,
        cancel: &CancellationToken,
    ) -> ScannerResult<OverlayPermission> {
        if self.check_overlay()?.is_granted() {
            return Ok(OverlayPermission::Granted);
        }

        // Registered before launching settings so a fast return is not missed.
        let resumed = self.inner.host_resumed.notified();

        self.inner
            .overlay_source
            .open_overlay_settings()
            .map_err(|err| ScannerError::Platform(err.context("open overlay settings")))?;
        info!("Opened overlay permission settings; waiting for the app to resume");

        tokio::select! {
            _ = resumed => debug!("Host resumed after overlay settings"),
            _ = cancel.cancelled() => debug!("Overlay permission wait cancelled"),
        }

        let state = self.check_overlay()?;
        info!("Overlay permission after settings round-trip: {state:?}");
        Ok(state)
    }

    /// Called by the host when the app returns to the foreground.
    pub fn notify_host_resumed(&self) {
        self.inner.host_resumed.notify_waiters();
    }

    /// Asks the user for screen-capture consent. Resolves when the user
    /// answers, which may be never; `cancel` abandons the wait cleanly.
    ///
    /// If an unconsumed grant already exists no prompt is shown. A second
    /// request while one is pending fails with [`ScannerError::ConsentPending`].
    pub async fn request_capture_consent(
        &self,
        cancel: &CancellationToken,
    ) -> ScannerResult<ConsentOutcome> {
        let request_id = Uuid::new_v4();
        {
            let mut consent = self.inner.consent();
            match &*consent {
                CaptureConsent::Requested { .. } => return Err(ScannerError::ConsentPending),
                CaptureConsent::Granted(_) => return Ok(ConsentOutcome::Granted),
                CaptureConsent::NotRequested | CaptureConsent::Consumed => {}
            }
            *consent = CaptureConsent::Requested { request_id };
        }
        let pending = PendingRequest {
            inner: &self.inner,
            request_id,
        };

        let (tx, rx) = oneshot::channel();
        if let Err(err) = self
            .inner
            .prompt
            .launch(ConsentResponder::new(request_id, tx))
        {
            return Err(ScannerError::Platform(
                err.context("launch capture consent prompt"),
            ));
        }
        info!("Capture consent requested ({request_id})");

        let outcome = tokio::select! {
            answer = rx => match answer {
                Ok(Some(grant)) => {
                    if self.inner.settle(request_id, CaptureConsent::Granted(grant)) {
                        ConsentOutcome::Granted
                    } else {
                        ConsentOutcome::Abandoned
                    }
                }
                Ok(None) | Err(_) => {
                    self.inner.settle(request_id, CaptureConsent::NotRequested);
                    ConsentOutcome::Denied
                }
            },
            _ = cancel.cancelled() => {
                self.inner.settle(request_id, CaptureConsent::NotRequested);
                ConsentOutcome::Abandoned
            }
        };
        drop(pending);

        match outcome {
            ConsentOutcome::Granted => info!("Capture consent granted ({request_id})"),
            ConsentOutcome::Denied => info!("Capture consent denied ({request_id})"),
            ConsentOutcome::Abandoned => warn!("Capture consent request {request_id} abandoned"),
        }
        Ok(outcome)
    }

    /// Removes the unconsumed grant, if any. Whoever receives it owns the
    /// only authorization; the slot records it as consumed.
    pub fn take_grant(&self) -> Option<CaptureGrant> {
        let mut consent = self.inner.consent();
        if !matches!(&*consent, CaptureConsent::Granted(_)) {
            return None;
        }
        match std::mem::replace(&mut *consent, CaptureConsent::Consumed) {
            CaptureConsent::Granted(grant) => Some(grant),
            _ => None,
        }
    }

    pub fn has_unconsumed_grant(&self) -> bool {
        matches!(&*self.inner.consent(), CaptureConsent::Granted(_))
    }

    pub fn consent_phase(&self) -> ConsentPhase {
        self.inner.consent().phase()
    }

    /// Drops any unconsumed grant and forgets a pending request. A responder
    /// answering afterwards is ignored.
    pub fn reset_consent(&self) {
        let previous = std::mem::replace(&mut *self.inner.consent(), CaptureConsent::NotRequested);
        if !matches!(previous, CaptureConsent::NotRequested) {
            debug!("Capture consent reset from {:?}", previous.phase());
        }
    }
}
