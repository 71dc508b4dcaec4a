use crate::config::loader;
use crate::config::model::{
    AppConfig, CameraConfig, ExportConfig, IndicatorConfig, MeterConfig, ServerConfig,
};
use crate::errors::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// Camera block as the legacy JSON tool wrote it. Early documents used
/// `rtsp_url` and `interval`; both spellings are accepted and mapped
/// onto the current field names. Unknown keys are tolerated here, the
/// legacy tool carried settings this service never had.
#[derive(Debug, Deserialize)]
struct LegacyCameraConfig {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(alias = "rtsp_url")]
    url: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_interval", alias = "interval")]
    processing_interval_seconds: f64,
    #[serde(default)]
    meters: Vec<MeterConfig>,
    #[serde(default)]
    indicators: Vec<IndicatorConfig>,
}

/// Root of the legacy JSON document.
#[derive(Debug, Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    cameras: Vec<LegacyCameraConfig>,
    #[serde(default)]
    export: ExportConfig,
    #[serde(default)]
    server: ServerConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> f64 {
    1.0
}

impl From<LegacyCameraConfig> for CameraConfig {
    fn from(legacy: LegacyCameraConfig) -> Self {
        Self {
            id: legacy.id,
            name: legacy.name,
            url: legacy.url,
            enabled: legacy.enabled,
            processing_interval_seconds: legacy.processing_interval_seconds,
            meters: legacy.meters,
            indicators: legacy.indicators,
        }
    }
}

/// Convert a legacy JSON document into the canonical YAML document and
/// return the snapshot the new loader produces from it. Writing first
/// and loading back through the normal path guarantees the migrated
/// document is semantically identical to what `run` will see.
pub fn migrate<P: AsRef<Path>, Q: AsRef<Path>>(
    json_path: P,
    yaml_path: Q,
) -> Result<AppConfig, ConfigError> {
    let json_path = json_path.as_ref();
    let text = std::fs::read_to_string(json_path).map_err(|source| ConfigError::Io {
        path: json_path.to_path_buf(),
        source,
    })?;
    let text = loader::substitute_env(&text)?;
    let legacy: LegacyConfig =
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: json_path.to_path_buf(),
            source,
        })?;
    let config = AppConfig {
        cameras: legacy.cameras.into_iter().map(CameraConfig::from).collect(),
        export: legacy.export,
        server: legacy.server,
    };
    loader::validate(&config)?;
    loader::save(&config, yaml_path.as_ref())?;
    loader::load(yaml_path)
}
