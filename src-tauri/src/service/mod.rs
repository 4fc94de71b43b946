#[cfg(feature = "app")]
pub mod commands;
pub mod controller;
pub mod state;

pub use controller::{ScannerPlatform, ScannerService, StatusIndicator};
pub use state::{ScannerSnapshot, ScannerState, ScannerStatus};
