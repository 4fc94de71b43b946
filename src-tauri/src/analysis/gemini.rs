use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::error::{ScannerError, ScannerResult};
use crate::settings::{AnalysisSettings, API_KEY_ENV};

use super::{AnalysisInput, AnalysisResult, ScamAnalyzer};

const ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are an expert scam detector for Canary. Analyze the content for \
potential scams including phishing attempts (fake login pages, impersonation), fraudulent payment \
requests, fake prize or lottery notifications, romance scams, tech support scams, investment or \
crypto scams and other social engineering attempts.\n\n\
Don't immediately assume scam or not scam, especially when it is not obvious. Consider who the \
sender is, whether the content comes from a reputable company, and whether the contact details \
match that company's official ones.\n\n\
Be thorough but concise. Focus on actionable insights.";

/// Scam analysis through the Gemini `generateContent` API with a JSON
/// response schema.
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    settings: RwLock<AnalysisSettings>,
}

impl GeminiAnalyzer {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: RwLock::new(settings),
        }
    }

    pub fn configure(&self, settings: AnalysisSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    fn settings(&self) -> AnalysisSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn generate(&self, api_key: &str, model: &str, body: &Value) -> Result<Value> {
        let url = format!("{ENDPOINT}/{model}:generateContent");
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .context("analysis request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("analysis service returned {status}: {}", text.trim()));
        }

        resp.json().await.context("failed to parse analysis response")
    }
}

#[async_trait]
impl ScamAnalyzer for GeminiAnalyzer {
    async fn analyze(&self, input: AnalysisInput) -> ScannerResult<AnalysisResult> {
        let settings = self.settings();
        let api_key = settings.resolve_api_key().ok_or_else(|| {
            ScannerError::AnalysisUnavailable(format!(
                "API key not configured; set {API_KEY_ENV} or add it in settings"
            ))
        })?;

        let body = request_body(&input);
        debug!("Sending {} analysis to {}", input_kind(&input), settings.model);

        let response = self
            .generate(&api_key, &settings.model, &body)
            .await
            .map_err(|err| {
                warn!("Analysis request failed: {err:#}");
                ScannerError::AnalysisUnavailable(format!("{err:#}"))
            })?;

        let result = parse_response(&response)
            .map_err(|err| ScannerError::AnalysisUnavailable(format!("{err:#}")))?;
        info!(
            "Analysis finished: scam={} confidence={}",
            result.is_scam, result.confidence
        );
        Ok(result)
    }
}

fn input_kind(input: &AnalysisInput) -> &'static str {
    match input {
        AnalysisInput::Image { .. } => "image",
        AnalysisInput::Text(_) => "text",
    }
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "isScam": { "type": "BOOLEAN", "description": "Whether the content appears to be a scam" },
            "confidence": { "type": "NUMBER", "description": "Confidence level (0-100)" },
            "explanation": { "type": "STRING", "description": "Detailed explanation of the analysis" },
            "redFlags": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "List of warning signs detected"
            },
            "safetyTips": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "Safety recommendations for the user"
            }
        },
        "required": ["isScam", "confidence", "explanation", "redFlags", "safetyTips"]
    })
}

fn request_body(input: &AnalysisInput) -> Value {
    let parts = match input {
        AnalysisInput::Image {
            jpeg_base64,
            context,
        } => {
            let mut prompt = String::from("Analyze this image for potential scam content.");
            if let Some(context) = context.as_deref().filter(|c| !c.trim().is_empty()) {
                prompt.push_str("\n\nAdditional context from the user: ");
                prompt.push_str(context);
            }
            json!([
                { "text": prompt },
                { "inline_data": { "mime_type": "image/jpeg", "data": jpeg_base64 } }
            ])
        }
        AnalysisInput::Text(text) => json!([
            { "text": format!("Analyze this message for potential scam content:\n\n{text}") }
        ]),
    };

    json!({
        "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema()
        }
    })
}

fn parse_response(response: &Value) -> Result<AnalysisResult> {
    let text = response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str);

    let Some(text) = text else {
        if let Some(reason) = response
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            return Err(anyhow!("analysis blocked: {reason}"));
        }
        return Err(anyhow!("analysis response contained no candidates"));
    };

    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let result: AnalysisResult =
        serde_json::from_str(trimmed).context("analysis output did not match the result schema")?;
    Ok(result.normalized())
}
