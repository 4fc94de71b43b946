#[cfg(feature = "app")]
pub mod commands;
pub mod gemini;
pub mod listener;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScannerResult;

pub use gemini::GeminiAnalyzer;
pub use listener::{join_analysis_listener, spawn_analysis_listener};

/// Verdict returned by the remote analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub is_scam: bool,
    /// 0..=100.
    pub confidence: f32,
    pub explanation: String,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub safety_tips: Vec<String>,
}

impl AnalysisResult {
    pub fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self
    }
}

#[derive(Debug, Clone)]
pub enum AnalysisInput {
    Image {
        jpeg_base64: String,
        context: Option<String>,
    },
    /// A pasted message, email body or URL.
    Text(String),
}

/// Opaque remote scam classifier. Implementations do not retry.
#[async_trait]
pub trait ScamAnalyzer: Send + Sync {
    async fn analyze(&self, input: AnalysisInput) -> ScannerResult<AnalysisResult>;
}
