use serde::{Deserialize, Serialize};

use super::Position;

/// Raw pointer input on the bubble, in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PointerEvent {
    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up { x: f32, y: f32 },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    Tap,
    /// New absolute window position.
    DragDelta(Position),
    DragEnd,
    Cancelled,
}

/// Where the current gesture started, in touch and window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DragOrigin {
    pub touch_x: f32,
    pub touch_y: f32,
    pub window: Position,
}

/// Tells a tap from a drag. One gesture is `down`, any number of `move`s,
/// then `up` or `cancel`; a gesture produces exactly one of `Tap`, `DragEnd`
/// or `Cancelled`, preceded by `DragDelta`s once it has become a drag.
#[derive(Debug, Clone)]
pub struct GestureDisambiguator {
    threshold_px: f32,
    origin: Option<DragOrigin>,
    dragging: bool,
}

impl GestureDisambiguator {
    pub fn new(threshold_px: f32) -> Self {
        Self {
            threshold_px,
            origin: None,
            dragging: false,
        }
    }

    pub fn origin(&self) -> Option<DragOrigin> {
        self.origin
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn reset(&mut self) {
        self.origin = None;
        self.dragging = false;
    }

    /// Feeds one pointer event. `window` is the bubble's current position and
    /// is only read on `down`.
    pub fn handle(&mut self, event: PointerEvent, window: Position) -> Option<GestureEvent> {
        match event {
            PointerEvent::Down { x, y } => {
                // A second down without an up starts over from the new point.
                self.origin = Some(DragOrigin {
                    touch_x: x,
                    touch_y: y,
                    window,
                });
                self.dragging = false;
                None
            }
            PointerEvent::Move { x, y } => {
                let origin = self.origin?;
                let dx = (x - origin.touch_x) as i32;
                let dy = (y - origin.touch_y) as i32;

                if !self.dragging
                    && (dx.unsigned_abs() as f32) <= self.threshold_px
                    && (dy.unsigned_abs() as f32) <= self.threshold_px
                {
                    return None;
                }

                self.dragging = true;
                Some(GestureEvent::DragDelta(Position {
                    x: origin.window.x.saturating_add(dx),
                    y: origin.window.y.saturating_add(dy),
                }))
            }
            PointerEvent::Up { .. } => {
                self.origin?;
                let outcome = if self.dragging {
                    GestureEvent::DragEnd
                } else {
                    GestureEvent::Tap
                };
                self.reset();
                Some(outcome)
            }
            PointerEvent::Cancel => {
                self.origin?;
                self.reset();
                Some(GestureEvent::Cancelled)
            }
        }
    }
}
