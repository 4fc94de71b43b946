use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::overlay::Corner;

pub const API_KEY_ENV: &str = "GOOGLE_GENERATIVE_AI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BubbleSettings {
    pub size_dp: f32,
    /// Distance from the nearest vertical screen edge.
    pub margin_x_dp: f32,
    /// Distance from the nearest horizontal screen edge.
    pub margin_y_dp: f32,
    pub initial_corner: Corner,
}

impl Default for BubbleSettings {
    fn default() -> Self {
        Self {
            size_dp: 60.0,
            margin_x_dp: 16.0,
            margin_y_dp: 100.0,
            initial_corner: Corner::BottomRight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GestureSettings {
    /// Movement beyond this distance (per axis) turns a press into a drag.
    pub tap_slop_dp: f32,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self { tap_slop_dp: 10.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureSettings {
    pub settle_delay_ms: u64,
    /// Extra time allowed for a frame to show up after the settle delay.
    pub frame_wait_ms: u64,
    pub frame_poll_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
            frame_wait_ms: 500,
            frame_poll_ms: 50,
            jpeg_quality: 80,
        }
    }
}

impl CaptureSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }

    pub fn frame_poll(&self) -> Duration {
        Duration::from_millis(self.frame_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisSettings {
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".into(),
            api_key: None,
        }
    }
}

impl AnalysisSettings {
    /// Stored key first, then the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScannerSettings {
    pub bubble: BubbleSettings,
    pub gesture: GestureSettings,
    pub capture: CaptureSettings,
    pub analysis: AnalysisSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScannerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unparsable settings at {}: {err}",
                    path.display()
                );
                ScannerSettings::default()
            })
        } else {
            ScannerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> ScannerSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: ScannerSettings) -> Result<()> {
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &ScannerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ScannerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScannerSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
