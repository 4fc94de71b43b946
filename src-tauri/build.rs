fn main() {
    // The core library builds without the Tauri shell; only the `app`
    // feature needs the generated context and capability manifests.
    #[cfg(feature = "app")]
    tauri_build::build();
}
