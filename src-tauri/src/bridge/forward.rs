use log::{debug, warn};
use tauri::{AppHandle, Emitter};
use tokio::sync::broadcast::error::RecvError;

use super::EventBridge;

/// Relays every bridge event to the webviews under its frontend name.
pub fn spawn_forwarder(app: AppHandle, bridge: &EventBridge) {
    let mut events = bridge.subscribe();
    tauri::async_runtime::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Frontend forwarder skipped {skipped} event(s)");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let payload = match event.payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("Failed to serialize {} payload: {err}", event.name());
                    continue;
                }
            };
            if let Err(err) = app.emit(event.name(), payload) {
                warn!("Failed to emit {}: {err}", event.name());
            }
        }
        debug!("Frontend forwarder stopped");
    });
}
