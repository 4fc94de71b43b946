use tauri::State;

use crate::overlay::{GestureEvent, PointerEvent};
use crate::service::{ScannerService, ScannerSnapshot};

use crate::AppState;

fn scanner_from_state(state: &State<'_, AppState>) -> ScannerService {
    state.scanner.clone()
}

#[tauri::command]
pub async fn has_overlay_permission(state: State<'_, AppState>) -> Result<bool, String> {
    scanner_from_state(&state)
        .has_overlay_permission()
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn request_overlay_permission(state: State<'_, AppState>) -> Result<bool, String> {
    let scanner = scanner_from_state(&state);
    scanner
        .request_overlay_permission()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn start_floating_scanner(state: State<'_, AppState>) -> Result<(), String> {
    let scanner = scanner_from_state(&state);
    scanner.start().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn stop_floating_scanner(state: State<'_, AppState>) -> Result<(), String> {
    let scanner = scanner_from_state(&state);
    scanner.stop().await;
    Ok(())
}

#[tauri::command]
pub async fn is_floating_scanner_running(state: State<'_, AppState>) -> Result<bool, String> {
    Ok(scanner_from_state(&state).is_running())
}

#[tauri::command]
pub async fn get_scanner_state(state: State<'_, AppState>) -> Result<ScannerSnapshot, String> {
    Ok(scanner_from_state(&state).snapshot())
}

/// Pointer input from the bubble webview, in physical screen pixels.
#[tauri::command]
pub fn bubble_pointer(event: PointerEvent, state: State<'_, AppState>) -> Option<String> {
    state.scanner.handle_pointer(event).map(|gesture| match gesture {
        GestureEvent::Tap => "tap".into(),
        GestureEvent::DragDelta(_) => "drag".into(),
        GestureEvent::DragEnd => "dragEnd".into(),
        GestureEvent::Cancelled => "cancelled".into(),
    })
}

#[tauri::command]
pub fn resolve_capture_consent(granted: bool, state: State<'_, AppState>) -> Result<bool, String> {
    Ok(state.consent.resolve(granted))
}
