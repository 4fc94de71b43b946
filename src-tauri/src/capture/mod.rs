pub mod encode;
pub mod pipeline;
pub mod session;

use std::sync::Arc;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;

use crate::display::DisplayMetrics;
use crate::permissions::CaptureGrant;

pub use pipeline::CapturePipeline;
pub use session::{ProjectionSlot, SessionGuard, SessionHandle};

/// One frame read off the mirrored display, RGBA8888 with 4-byte pixels.
/// Rows may carry padding: `row_stride` can exceed `width * 4`.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    pub data: Vec<u8>,
}

/// A successfully captured and encoded still frame.
#[derive(Debug, Clone)]
pub struct ScreenshotEvent {
    pub image_data: Arc<[u8]>,
    pub captured_at_millis: i64,
}

impl ScreenshotEvent {
    pub fn new(image_data: Vec<u8>) -> Self {
        Self {
            image_data: image_data.into(),
            captured_at_millis: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.image_data)
    }
}

/// Platform display-mirroring service.
pub trait ProjectionSource: Send + Sync {
    /// Establishes a virtual output surface sized to `metrics`, authorized by
    /// `grant`. The grant is spent whether or not this succeeds.
    fn open(&self, grant: CaptureGrant, metrics: &DisplayMetrics) -> Result<Box<dyn MirrorSession>>;
}

/// An open projection: virtual display, frame reader and projection handle.
pub trait MirrorSession: Send {
    /// The most recent composited frame, or `None` if nothing has been
    /// rendered into the surface yet.
    fn acquire_latest_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Releases every resource of the session. Called exactly once.
    fn release(&mut self);
}
