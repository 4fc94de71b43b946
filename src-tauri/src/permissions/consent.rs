use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Single-use authorization issued by the platform's screen-capture consent
/// flow. Deliberately not `Clone`: handing it to the capture pipeline moves
/// it, and dropping it is what invalidates it.
pub struct CaptureGrant {
    id: Uuid,
    result_code: i32,
    payload: Vec<u8>,
    granted_at: DateTime<Utc>,
}

impl CaptureGrant {
    pub fn new(result_code: i32, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            result_code,
            payload,
            granted_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn result_code(&self) -> i32 {
        self.result_code
    }

    /// Opaque data the platform needs to open a projection with this grant.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }
}

impl fmt::Debug for CaptureGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The payload is an authorization token; keep it out of logs.
        f.debug_struct("CaptureGrant")
            .field("id", &self.id)
            .field("result_code", &self.result_code)
            .field("granted_at", &self.granted_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum CaptureConsent {
    NotRequested,
    Requested { request_id: Uuid },
    Granted(CaptureGrant),
    Consumed,
}

impl CaptureConsent {
    pub fn phase(&self) -> ConsentPhase {
        match self {
            CaptureConsent::NotRequested => ConsentPhase::NotRequested,
            CaptureConsent::Requested { .. } => ConsentPhase::Requested,
            CaptureConsent::Granted(_) => ConsentPhase::Granted,
            CaptureConsent::Consumed => ConsentPhase::Consumed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsentPhase {
    NotRequested,
    Requested,
    Granted,
    Consumed,
}

/// How a consent request ended. Declining is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsentOutcome {
    Granted,
    Denied,
    /// The request was cancelled before the user answered.
    Abandoned,
}

/// Handed to the platform prompt; answering consumes it. Dropping it without
/// answering counts as a denial.
pub struct ConsentResponder {
    request_id: Uuid,
    tx: oneshot::Sender<Option<CaptureGrant>>,
}

impl ConsentResponder {
    pub(crate) fn new(request_id: Uuid, tx: oneshot::Sender<Option<CaptureGrant>>) -> Self {
        Self { request_id, tx }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn grant(self, result_code: i32, payload: Vec<u8>) {
        if self.tx.send(Some(CaptureGrant::new(result_code, payload))).is_err() {
            log::debug!(
                "Consent {} granted after the request was abandoned; discarding grant",
                self.request_id
            );
        }
    }

    pub fn deny(self) {
        let _ = self.tx.send(None);
    }
}

impl fmt::Debug for ConsentResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentResponder")
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Launches the privileged system consent dialog. The answer arrives later,
/// from outside normal control flow, through the responder.
pub trait ConsentPrompt: Send + Sync {
    fn launch(&self, responder: ConsentResponder) -> anyhow::Result<()>;
}
