use anyhow::Result;
use serde::Serialize;

/// Real pixel size and density of the device's primary display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMetrics {
    pub width_px: u32,
    pub height_px: u32,
    pub density_dpi: u32,
    /// Pixels per density-independent pixel.
    pub scale: f32,
}

impl DisplayMetrics {
    /// Converts density-independent pixels to whole device pixels, truncating
    /// like the platform's layout params do.
    pub fn dp_to_px(&self, dp: f32) -> i32 {
        (dp * self.scale) as i32
    }
}

pub trait DisplayInfo: Send + Sync {
    fn metrics(&self) -> Result<DisplayMetrics>;
}
