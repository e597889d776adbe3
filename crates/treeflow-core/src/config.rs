//! Engine settings loader.
//!
//! Reads a TOML file into [`EngineSettings`]. Falls back to defaults when the
//! file is missing, unreadable, malformed, or holds unusable limits.

use std::path::Path;

use treeflow_types::config::EngineSettings;

/// Conventional settings file name.
pub const SETTINGS_FILE_NAME: &str = "treeflow.toml";

/// Load engine settings from `path`.
///
/// - Missing file: defaults, logged at debug level.
/// - Unreadable or unparsable file: defaults, logged as a warning.
/// - Parsed but invalid (zero limits): defaults, logged as a warning.
pub async fn load_engine_settings(path: &Path) -> EngineSettings {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return EngineSettings::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineSettings::default();
        }
    };

    let settings = match toml::from_str::<EngineSettings>(&content) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            return EngineSettings::default();
        }
    };

    if let Err(reason) = settings.validate() {
        tracing::warn!("Invalid settings in {}: {reason}, using defaults", path.display());
        return EngineSettings::default();
    }
    settings
}
