use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayPermission {
    #[default]
    Unknown,
    Denied,
    Granted,
}

impl OverlayPermission {
    pub fn is_granted(self) -> bool {
        self == OverlayPermission::Granted
    }
}

impl From<bool> for OverlayPermission {
    fn from(granted: bool) -> Self {
        if granted {
            OverlayPermission::Granted
        } else {
            OverlayPermission::Denied
        }
    }
}

/// OS side of the draw-over-other-apps permission. The grant is persisted by
/// the platform; the app can only query it or send the user to settings.
pub trait OverlayPermissionSource: Send + Sync {
    fn can_draw_overlays(&self) -> anyhow::Result<bool>;

    /// Opens the system settings page. Returns once the page is launched, not
    /// when the user has decided.
    fn open_overlay_settings(&self) -> anyhow::Result<()>;
}
