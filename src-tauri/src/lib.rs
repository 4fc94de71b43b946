pub mod analysis;
pub mod bridge;
pub mod capture;
pub mod display;
pub mod error;
pub mod overlay;
pub mod permissions;
pub mod platform;
pub mod service;
pub mod settings;
mod utils;

pub use error::{ScannerError, ScannerResult};

#[cfg(feature = "app")]
pub use app::run;
#[cfg(feature = "app")]
pub(crate) use app::AppState;

#[cfg(feature = "app")]
mod app {
    use std::sync::Arc;

    use tauri::{Manager, RunEvent, State, WindowEvent};
    use tokio_util::sync::CancellationToken;

    use crate::analysis::{
        commands::{analyze_image, analyze_text},
        join_analysis_listener, spawn_analysis_listener, GeminiAnalyzer,
    };
    use crate::bridge::{forward::spawn_forwarder, EventBridge};
    use crate::permissions::PermissionBroker;
    use crate::platform::desktop::{
        BubbleWindow, DesktopOverlayPermission, FrontendConsentPrompt, PrimaryDisplay,
        TrayIndicator, XcapProjection,
    };
    use crate::service::{
        commands::{
            bubble_pointer, get_scanner_state, has_overlay_permission,
            is_floating_scanner_running, request_overlay_permission, resolve_capture_consent,
            start_floating_scanner, stop_floating_scanner,
        },
        ScannerPlatform, ScannerService,
    };
    use crate::settings::{ScannerSettings, SettingsStore};

    pub(crate) struct AppState {
        pub(crate) scanner: ScannerService,
        pub(crate) analyzer: Arc<GeminiAnalyzer>,
        pub(crate) consent: Arc<FrontendConsentPrompt>,
        pub(crate) settings: SettingsStore,
        pub(crate) shutdown: CancellationToken,
    }

    #[tauri::command]
    fn get_scanner_settings(state: State<AppState>) -> Result<ScannerSettings, String> {
        Ok(state.settings.get())
    }

    #[tauri::command]
    fn set_scanner_settings(settings: ScannerSettings, state: State<AppState>) -> Result<(), String> {
        state
            .settings
            .update(settings.clone())
            .map_err(|e| e.to_string())?;
        state.analyzer.configure(settings.analysis.clone());
        state.scanner.configure(settings);
        Ok(())
    }

    fn debug_logging_requested() -> bool {
        std::env::var("CANARY_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        // RUST_LOG still wins over the default level
        let level = if debug_logging_requested() {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .init();

        log::info!("Canary scanner starting up...");

        let app = tauri::Builder::default()
            .plugin(tauri_plugin_opener::init())
            .setup(|app| {
                let result = (|| -> anyhow::Result<()> {
                    let app_data_dir = app
                        .path()
                        .app_data_dir()
                        .map_err(|err| anyhow::anyhow!(err))?;
                    std::fs::create_dir_all(&app_data_dir)?;

                    let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;
                    let settings = settings_store.get();

                    let bridge = EventBridge::default();
                    spawn_forwarder(app.handle().clone(), &bridge);

                    let consent = Arc::new(FrontendConsentPrompt::new(bridge.clone()));
                    let broker =
                        PermissionBroker::new(Arc::new(DesktopOverlayPermission), consent.clone());
                    let scanner = ScannerService::new(
                        ScannerPlatform {
                            broker,
                            surface: Box::new(BubbleWindow::new(app.handle().clone())),
                            display: Arc::new(PrimaryDisplay),
                            projection: Arc::new(XcapProjection),
                            indicator: Arc::new(TrayIndicator::new(app.handle().clone())),
                        },
                        bridge.clone(),
                        settings.clone(),
                    );

                    let analyzer = Arc::new(GeminiAnalyzer::new(settings.analysis.clone()));
                    if settings.analysis.resolve_api_key().is_none() {
                        log::warn!("No analysis API key configured; screenshots will not be analysed");
                    }

                    let shutdown = CancellationToken::new();
                    {
                        let analyzer = analyzer.clone();
                        let shutdown = shutdown.clone();
                        tauri::async_runtime::spawn(async move {
                            let listener = spawn_analysis_listener(bridge, analyzer, shutdown);
                            join_analysis_listener(listener).await;
                        });
                    }

                    app.manage(AppState {
                        scanner,
                        analyzer,
                        consent,
                        settings: settings_store,
                        shutdown,
                    });
                    Ok(())
                })();

                result.map_err(|err| err.into())
            })
            .on_window_event(|window, event| {
                // Returning from the system settings shows up as the main
                // window regaining focus.
                if let WindowEvent::Focused(true) = event {
                    if window.label() == "main" {
                        if let Some(state) = window.try_state::<AppState>() {
                            state.scanner.notify_host_resumed();
                        }
                    }
                }
            })
            .invoke_handler(tauri::generate_handler![
                has_overlay_permission,
                request_overlay_permission,
                start_floating_scanner,
                stop_floating_scanner,
                is_floating_scanner_running,
                get_scanner_state,
                bubble_pointer,
                resolve_capture_consent,
                analyze_image,
                analyze_text,
                get_scanner_settings,
                set_scanner_settings,
            ])
            .build(tauri::generate_context!())
            .expect("error while building tauri application");

        app.run(|app_handle, event| {
            if let RunEvent::Exit = event {
                if let Some(state) = app_handle.try_state::<AppState>() {
                    state.shutdown.cancel();
                    let scanner = state.scanner.clone();
                    tauri::async_runtime::block_on(async move { scanner.shutdown().await });
                }
            }
        });
    }
}
