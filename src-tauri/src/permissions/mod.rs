pub mod broker;
pub mod consent;
pub mod overlay_grant;

pub use broker::PermissionBroker;
pub use consent::{
    CaptureConsent, CaptureGrant, ConsentOutcome, ConsentPhase, ConsentPrompt, ConsentResponder,
};
pub use overlay_grant::{OverlayPermission, OverlayPermissionSource};
