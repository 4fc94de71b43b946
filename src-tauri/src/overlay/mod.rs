pub mod controller;
pub mod gesture;

use serde::{Deserialize, Serialize};

pub use controller::{BubbleGeometry, OverlaySurface, OverlayWindowController, TapHandler};
pub use gesture::{DragOrigin, GestureDisambiguator, GestureEvent, PointerEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Screen corner the bubble is anchored to when it first appears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

/// Snapshot of the bubble window: where it is and the gesture in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BubbleWindowState {
    pub position: Position,
    pub origin: Option<DragOrigin>,
    pub is_dragging: bool,
}
