use tauri::State;

use crate::analysis::{AnalysisInput, AnalysisResult, ScamAnalyzer};
use crate::AppState;

#[tauri::command]
pub async fn analyze_image(
    state: State<'_, AppState>,
    base64: String,
    context: Option<String>,
) -> Result<AnalysisResult, String> {
    if base64.trim().is_empty() {
        return Err("image data is required".into());
    }
    let analyzer = state.analyzer.clone();
    analyzer
        .analyze(AnalysisInput::Image {
            jpeg_base64: base64,
            context,
        })
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn analyze_text(state: State<'_, AppState>, text: String) -> Result<AnalysisResult, String> {
    if text.trim().is_empty() {
        return Err("text is required".into());
    }
    let analyzer = state.analyzer.clone();
    analyzer
        .analyze(AnalysisInput::Text(text))
        .await
        .map_err(|e| e.to_string())
}
