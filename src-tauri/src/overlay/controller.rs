use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::display::{DisplayInfo, DisplayMetrics};
use crate::error::{PermissionKind, ScannerError, ScannerResult};
use crate::permissions::PermissionBroker;
use crate::settings::{BubbleSettings, GestureSettings};

use super::gesture::{GestureDisambiguator, GestureEvent, PointerEvent};
use super::{BubbleWindowState, Corner, Position};

/// Where and how big the bubble window is, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BubbleGeometry {
    pub position: Position,
    pub size_px: u32,
}

/// The window-system side of the bubble: a small topmost, non-focusable
/// window drawn above every other app.
pub trait OverlaySurface: Send {
    fn attach(&mut self, geometry: BubbleGeometry) -> Result<()>;
    fn move_to(&mut self, position: Position) -> Result<()>;
    /// Pressed-state feedback while a finger is down.
    fn set_pressed(&mut self, pressed: bool);
    fn detach(&mut self) -> Result<()>;
}

pub type TapHandler = Box<dyn Fn() + Send + Sync>;

pub struct OverlayWindowController {
    surface: Box<dyn OverlaySurface>,
    permissions: PermissionBroker,
    display: Arc<dyn DisplayInfo>,
    bubble: BubbleSettings,
    gesture_settings: GestureSettings,
    gesture: GestureDisambiguator,
    position: Position,
    attached: Option<BubbleGeometry>,
    on_tap: Option<TapHandler>,
}

impl OverlayWindowController {
    pub fn new(
        surface: Box<dyn OverlaySurface>,
        permissions: PermissionBroker,
        display: Arc<dyn DisplayInfo>,
        bubble: BubbleSettings,
        gesture_settings: GestureSettings,
    ) -> Self {
        Self {
            surface,
            permissions,
            display,
            bubble,
            gesture: GestureDisambiguator::new(gesture_settings.tap_slop_dp),
            gesture_settings,
            position: Position::default(),
            attached: None,
            on_tap: None,
        }
    }

    /// Takes effect on the next `start`.
    pub fn configure(&mut self, bubble: BubbleSettings, gesture_settings: GestureSettings) {
        self.bubble = bubble;
        self.gesture_settings = gesture_settings;
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub fn window_state(&self) -> BubbleWindowState {
        BubbleWindowState {
            position: self.position,
            origin: self.gesture.origin(),
            is_dragging: self.gesture.is_dragging(),
        }
    }

    /// Attaches the bubble at `corner`. Calling it while attached is a no-op.
    /// Nothing is attached when this returns an error.
    pub fn start(&mut self, corner: Corner, on_tap: TapHandler) -> ScannerResult<()> {
        if self.attached.is_some() {
            debug!("Overlay already attached; ignoring start");
            return Ok(());
        }

        if !self.permissions.check_overlay()?.is_granted() {
            return Err(ScannerError::Permission(PermissionKind::Overlay));
        }

        let metrics = self
            .display
            .metrics()
            .map_err(|err| ScannerError::Platform(err.context("read display metrics")))?;
        let geometry = initial_geometry(&metrics, &self.bubble, corner);

        self.gesture = GestureDisambiguator::new(
            self.gesture_settings.tap_slop_dp * metrics.scale,
        );
        self.surface
            .attach(geometry)
            .map_err(|err| ScannerError::Overlay(format!("attach bubble: {err:#}")))?;

        self.position = geometry.position;
        self.attached = Some(geometry);
        self.on_tap = Some(on_tap);
        info!(
            "Bubble attached at ({}, {}) size {}px",
            geometry.position.x, geometry.position.y, geometry.size_px
        );
        Ok(())
    }

    /// Routes one pointer event through the disambiguator and applies the
    /// result to the window.
    pub fn on_pointer(&mut self, event: PointerEvent) -> Option<GestureEvent> {
        if self.attached.is_none() {
            return None;
        }

        match event {
            PointerEvent::Down { .. } => self.surface.set_pressed(true),
            PointerEvent::Up { .. } | PointerEvent::Cancel => self.surface.set_pressed(false),
            PointerEvent::Move { .. } => {}
        }

        let gesture = self.gesture.handle(event, self.position)?;
        self.on_gesture(gesture);
        Some(gesture)
    }

    pub fn on_gesture(&mut self, gesture: GestureEvent) {
        match gesture {
            GestureEvent::DragDelta(position) => {
                self.position = position;
                if let Err(err) = self.surface.move_to(position) {
                    warn!("Failed to move bubble to ({}, {}): {err:#}", position.x, position.y);
                }
            }
            GestureEvent::Tap => {
                if let Some(on_tap) = &self.on_tap {
                    on_tap();
                }
            }
            GestureEvent::DragEnd | GestureEvent::Cancelled => {}
        }
    }

    /// Detaches the bubble and drops the tap handler. Safe from any state.
    pub fn stop(&mut self) {
        self.on_tap = None;
        self.gesture.reset();
        if self.attached.take().is_some() {
            if let Err(err) = self.surface.detach() {
                warn!("Failed to detach bubble window: {err:#}");
            } else {
                info!("Bubble detached");
            }
        }
    }
}

fn initial_geometry(metrics: &DisplayMetrics, bubble: &BubbleSettings, corner: Corner) -> BubbleGeometry {
    let size = metrics.dp_to_px(bubble.size_dp);
    let margin_x = metrics.dp_to_px(bubble.margin_x_dp);
    let margin_y = metrics.dp_to_px(bubble.margin_y_dp);
    let right = metrics.width_px as i32 - size - margin_x;
    let bottom = metrics.height_px as i32 - size - margin_y;

    let position = match corner {
        Corner::TopLeft => Position { x: margin_x, y: margin_y },
        Corner::TopRight => Position { x: right, y: margin_y },
        Corner::BottomLeft => Position { x: margin_x, y: bottom },
        Corner::BottomRight => Position { x: right, y: bottom },
    };

    BubbleGeometry {
        position,
        size_px: size.max(1) as u32,
    }
}
