//! Desktop adapters: a topmost Tauri webview as the bubble, `xcap` for the
//! display mirror, the tray for the status indicator and the main window for
//! the consent prompt.

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use tauri::{
    tray::TrayIconBuilder, AppHandle, Emitter, PhysicalPosition, PhysicalSize, WebviewUrl,
    WebviewWindow, WebviewWindowBuilder,
};
use xcap::Monitor;

use crate::bridge::{EventBridge, ScannerEvent};
use crate::capture::{MirrorSession, ProjectionSource, RawFrame};
use crate::display::{DisplayInfo, DisplayMetrics};
use crate::overlay::{BubbleGeometry, OverlaySurface, Position};
use crate::permissions::{
    CaptureGrant, ConsentPrompt, ConsentResponder, OverlayPermissionSource,
};
use crate::service::StatusIndicator;

const BUBBLE_LABEL: &str = "bubble";
const TRAY_ID: &str = "canary-scanner";
const BASELINE_DPI: f32 = 96.0;

fn primary_monitor() -> Result<Monitor> {
    Monitor::all()
        .context("Failed to enumerate monitors")?
        .into_iter()
        .find(|monitor| monitor.is_primary())
        .ok_or_else(|| anyhow!("No primary monitor found"))
}

pub struct PrimaryDisplay;

impl DisplayInfo for PrimaryDisplay {
    fn metrics(&self) -> Result<DisplayMetrics> {
        let monitor = primary_monitor()?;
        let scale = monitor.scale_factor();
        Ok(DisplayMetrics {
            width_px: monitor.width(),
            height_px: monitor.height(),
            density_dpi: (BASELINE_DPI * scale).round() as u32,
            scale,
        })
    }
}

/// Desktop window managers let any app keep a window on top, so there is no
/// grant to ask for.
pub struct DesktopOverlayPermission;

impl OverlayPermissionSource for DesktopOverlayPermission {
    fn can_draw_overlays(&self) -> Result<bool> {
        Ok(true)
    }

    fn open_overlay_settings(&self) -> Result<()> {
        Ok(())
    }
}

pub struct BubbleWindow {
    app: AppHandle,
    window: Option<WebviewWindow>,
}

impl BubbleWindow {
    pub fn new(app: AppHandle) -> Self {
        Self { app, window: None }
    }
}

impl OverlaySurface for BubbleWindow {
    fn attach(&mut self, geometry: BubbleGeometry) -> Result<()> {
        let size = f64::from(geometry.size_px);
        let window = WebviewWindowBuilder::new(
            &self.app,
            BUBBLE_LABEL,
            WebviewUrl::App("bubble.html".into()),
        )
        .title("Canary")
        .inner_size(size, size)
        .resizable(false)
        .decorations(false)
        .always_on_top(true)
        .skip_taskbar(true)
        .focused(false)
        .visible(false)
        .build()
        .context("Failed to create bubble window")?;

        window.set_size(PhysicalSize::new(geometry.size_px, geometry.size_px))?;
        window.set_position(PhysicalPosition::new(
            geometry.position.x,
            geometry.position.y,
        ))?;
        window.show()?;
        self.window = Some(window);
        Ok(())
    }

    fn move_to(&mut self, position: Position) -> Result<()> {
        if let Some(window) = &self.window {
            window.set_position(PhysicalPosition::new(position.x, position.y))?;
        }
        Ok(())
    }

    fn set_pressed(&mut self, pressed: bool) {
        if let Some(window) = &self.window {
            if let Err(err) = window.emit("bubble-pressed", pressed) {
                debug!("Failed to send pressed state to bubble: {err}");
            }
        }
    }

    fn detach(&mut self) -> Result<()> {
        if let Some(window) = self.window.take() {
            window.close().context("Failed to close bubble window")?;
        }
        Ok(())
    }
}

/// Mirrors the primary monitor through `xcap`. The monitor is looked up by
/// id on every read so the session holds no native handles.
pub struct XcapProjection;

impl ProjectionSource for XcapProjection {
    fn open(&self, grant: CaptureGrant, metrics: &DisplayMetrics) -> Result<Box<dyn MirrorSession>> {
        let monitor = primary_monitor()?;
        debug!(
            "Mirroring monitor {} ({}x{}) for grant {}; expected {}x{}",
            monitor.id(),
            monitor.width(),
            monitor.height(),
            grant.id(),
            metrics.width_px,
            metrics.height_px
        );
        Ok(Box::new(XcapMirror {
            monitor_id: Some(monitor.id()),
        }))
    }
}

struct XcapMirror {
    monitor_id: Option<u32>,
}

impl MirrorSession for XcapMirror {
    fn acquire_latest_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(id) = self.monitor_id else {
            return Ok(None);
        };
        let monitor = Monitor::all()
            .context("Failed to enumerate monitors")?
            .into_iter()
            .find(|monitor| monitor.id() == id)
            .ok_or_else(|| anyhow!("Monitor {id} disappeared during capture"))?;

        let image = monitor
            .capture_image()
            .context("Failed to capture monitor; check the screen recording permission")?;
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Ok(None);
        }
        Ok(Some(RawFrame {
            width,
            height,
            row_stride: width as usize * 4,
            data: image.into_raw(),
        }))
    }

    fn release(&mut self) {
        self.monitor_id = None;
    }
}

/// Tray icon shown for as long as the scanner runs.
pub struct TrayIndicator {
    app: AppHandle,
}

impl TrayIndicator {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl StatusIndicator for TrayIndicator {
    fn show(&self, title: &str, text: &str) -> Result<()> {
        if self.app.tray_by_id(TRAY_ID).is_some() {
            return Ok(());
        }

        let mut builder = TrayIconBuilder::with_id(TRAY_ID).tooltip(format!("{title}\n{text}"));
        if let Some(icon) = self.app.default_window_icon() {
            builder = builder.icon(icon.clone().to_owned());
        }
        builder
            .build(&self.app)
            .context("Failed to create tray indicator")?;
        Ok(())
    }

    fn hide(&self) {
        if self.app.remove_tray_by_id(TRAY_ID).is_none() {
            debug!("Tray indicator already removed");
        }
    }
}

/// Consent dialog rendered by the main window. The request is announced on
/// the bridge and answered through [`FrontendConsentPrompt::resolve`].
pub struct FrontendConsentPrompt {
    bridge: EventBridge,
    pending: Mutex<Option<ConsentResponder>>,
}

impl FrontendConsentPrompt {
    pub fn new(bridge: EventBridge) -> Self {
        Self {
            bridge,
            pending: Mutex::new(None),
        }
    }

    /// Answers the open prompt. Returns false if none was open.
    pub fn resolve(&self, granted: bool) -> bool {
        let responder = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match responder {
            Some(responder) if granted => {
                info!("Capture consent granted from the frontend");
                responder.grant(0, Vec::new());
                true
            }
            Some(responder) => {
                responder.deny();
                true
            }
            None => false,
        }
    }
}

impl ConsentPrompt for FrontendConsentPrompt {
    fn launch(&self, responder: ConsentResponder) -> Result<()> {
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(responder);
        if previous.is_some() {
            warn!("Replacing an unanswered consent prompt");
        }
        if !self.bridge.emit(ScannerEvent::ConsentRequested) {
            warn!("No frontend listening for the consent prompt");
        }
        Ok(())
    }
}
