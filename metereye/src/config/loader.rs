use crate::config::model::{AppConfig, CameraConfig, DatabaseType, PerspectiveConfig};
use crate::errors::ConfigError;
use crate::vision::geometry::normalize_quad;
use regex::Regex;
use std::path::{Path, PathBuf};

/// File name of the document shipped with the repository, used as the
/// last resort of the search order.
pub const EXAMPLE_FILE: &str = "config.example.yaml";

/// Load, substitute, validate and normalise a configuration document.
/// Returns an immutable snapshot, or the first error on the way there;
/// a failed load never produces a partially applied snapshot.
pub fn load<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = substitute_env(&text)?;
    let mut config: AppConfig =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
    validate(&config)?;
    normalize(&mut config);
    Ok(config)
}

/// Write a snapshot as canonical YAML: keys in declaration order,
/// two space indent, no anchors. `save(load(x))` is a fixed point, the
/// migration tool and the editing API both rely on that.
pub fn save<P: AsRef<Path>>(config: &AppConfig, path: P) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let text = to_canonical_yaml(config);
    std::fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Render a snapshot to the canonical YAML text without touching disk.
pub fn to_canonical_yaml(config: &AppConfig) -> String {
    // serde_yaml emits mappings in struct declaration order with two
    // space indentation and never emits aliases for owned values.
    serde_yaml::to_string(config).unwrap_or_default()
}

/// Resolve the configuration path: an explicit path wins, otherwise
/// `$XDG_CONFIG_HOME/ctme/config.yaml`, `./config.yaml` and
/// `./config.example.yaml` are tried in order.
pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let mut candidates = Vec::new();
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg).join("ctme").join("config.yaml"));
    }
    candidates.push(PathBuf::from("config.yaml"));
    candidates.push(PathBuf::from(EXAMPLE_FILE));
    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    Err(ConfigError::NotFound {
        searched: candidates,
    })
}

/// Substitute `${NAME}` and `${NAME:-default}` from the process
/// environment across the raw document text. A name with no value and
/// no default fails the load.
pub fn substitute_env(text: &str) -> Result<String, ConfigError> {
    // Unwrap is fine, the pattern is a compile time constant.
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for captures in pattern.captures_iter(text) {
        let whole = captures.get(0).unwrap();
        let name = &captures[1];
        out.push_str(&text[last..whole.start()]);
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => match captures.get(3) {
                Some(default) => out.push_str(default.as_str()),
                None => {
                    return Err(ConfigError::UnresolvedVariable {
                        name: name.to_string(),
                    })
                }
            },
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Validate a parsed document. Errors carry the dotted path of the
/// first offending value.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let mut camera_ids = std::collections::HashSet::new();
    for (index, camera) in config.cameras.iter().enumerate() {
        let base = format!("cameras[{index}]");
        validate_camera(camera, &base)?;
        if !camera_ids.insert(camera.id.clone()) {
            return Err(ConfigError::invalid(
                format!("{base}.id"),
                format!("duplicate camera id {:?}", camera.id),
            ));
        }
    }
    validate_export(config)?;
    Ok(())
}

fn validate_camera(camera: &CameraConfig, base: &str) -> Result<(), ConfigError> {
    if camera.id.is_empty() {
        return Err(ConfigError::invalid(format!("{base}.id"), "id must not be empty"));
    }
    if camera.id.len() > 64 {
        return Err(ConfigError::invalid(
            format!("{base}.id"),
            "id must be at most 64 characters",
        ));
    }
    if camera.url.is_empty() {
        return Err(ConfigError::invalid(format!("{base}.url"), "url must not be empty"));
    }
    if camera.processing_interval_seconds < 0.1 {
        return Err(ConfigError::invalid(
            format!("{base}.processing_interval_seconds"),
            "must be at least 0.1",
        ));
    }
    let mut meter_ids = std::collections::HashSet::new();
    for (index, meter) in camera.meters.iter().enumerate() {
        let meter_base = format!("{base}.meters[{index}]");
        if meter.id.is_empty() {
            return Err(ConfigError::invalid(
                format!("{meter_base}.id"),
                "id must not be empty",
            ));
        }
        if !meter_ids.insert(meter.id.clone()) {
            return Err(ConfigError::invalid(
                format!("{meter_base}.id"),
                format!("duplicate meter id {:?}", meter.id),
            ));
        }
        validate_perspective(&meter.perspective, &format!("{meter_base}.perspective"))?;
    }
    let mut indicator_ids = std::collections::HashSet::new();
    for (index, indicator) in camera.indicators.iter().enumerate() {
        let indicator_base = format!("{base}.indicators[{index}]");
        if indicator.id.is_empty() {
            return Err(ConfigError::invalid(
                format!("{indicator_base}.id"),
                "id must not be empty",
            ));
        }
        if !indicator_ids.insert(indicator.id.clone()) {
            return Err(ConfigError::invalid(
                format!("{indicator_base}.id"),
                format!("duplicate indicator id {:?}", indicator.id),
            ));
        }
        validate_perspective(
            &indicator.perspective,
            &format!("{indicator_base}.perspective"),
        )?;
        let ratio = indicator.detection.ratio_threshold;
        if !(ratio >= 0.0 && ratio <= 1.0) {
            return Err(ConfigError::invalid(
                format!("{indicator_base}.detection.ratio_threshold"),
                "must be within [0, 1]",
            ));
        }
    }
    Ok(())
}

fn validate_perspective(perspective: &PerspectiveConfig, base: &str) -> Result<(), ConfigError> {
    if perspective.points.len() != 4 {
        return Err(ConfigError::invalid(
            format!("{base}.points"),
            format!("expected exactly 4 points, got {}", perspective.points.len()),
        ));
    }
    for point in &perspective.points {
        if point[0] < 0 || point[1] < 0 {
            return Err(ConfigError::invalid(
                format!("{base}.points"),
                format!("point [{}, {}] has a negative coordinate", point[0], point[1]),
            ));
        }
    }
    if perspective.output_size[0] < 16 || perspective.output_size[1] < 16 {
        return Err(ConfigError::invalid(
            format!("{base}.output_size"),
            "width and height must be at least 16",
        ));
    }
    Ok(())
}

fn validate_export(config: &AppConfig) -> Result<(), ConfigError> {
    let export = &config.export;
    if export.http.enabled {
        if export.http.url.is_empty() {
            return Err(ConfigError::invalid("export.http.url", "url must not be empty"));
        }
        if export.http.batch_size == 0 {
            return Err(ConfigError::invalid(
                "export.http.batch_size",
                "must be at least 1",
            ));
        }
        if export.http.interval_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                "export.http.interval_seconds",
                "must be positive",
            ));
        }
        if export.http.timeout_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                "export.http.timeout_seconds",
                "must be positive",
            ));
        }
    }
    if export.database.enabled {
        match export.database.kind {
            DatabaseType::Sqlite if export.database.path.is_none() => {
                return Err(ConfigError::invalid(
                    "export.database.path",
                    "sqlite requires a file path",
                ));
            }
            DatabaseType::Postgresql if export.database.connection_string.is_none() => {
                return Err(ConfigError::invalid(
                    "export.database.connection_string",
                    "postgresql requires a connection string",
                ));
            }
            _ => {}
        }
    }
    if export.mqtt.enabled {
        if export.mqtt.broker.is_empty() {
            return Err(ConfigError::invalid(
                "export.mqtt.broker",
                "broker must not be empty",
            ));
        }
        if export.mqtt.qos > 2 {
            return Err(ConfigError::invalid("export.mqtt.qos", "must be 0, 1 or 2"));
        }
    }
    Ok(())
}

/// Rewrite every perspective quadrilateral into top-left, top-right,
/// bottom-right, bottom-left order. Runs after validation so every
/// quadrilateral is known to have four points.
fn normalize(config: &mut AppConfig) {
    for camera in &mut config.cameras {
        for meter in &mut camera.meters {
            normalize_perspective(&mut meter.perspective);
        }
        for indicator in &mut camera.indicators {
            normalize_perspective(&mut indicator.perspective);
        }
    }
}

fn normalize_perspective(perspective: &mut PerspectiveConfig) {
    let quad = [
        perspective.points[0],
        perspective.points[1],
        perspective.points[2],
        perspective.points[3],
    ];
    perspective.points = normalize_quad(quad).to_vec();
}

#[cfg(test)]
mod tests {

    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(contents.as_bytes()).expect("Failed to write temp file");
        file
    }

    const MINIMAL: &str = r#"
cameras:
  - id: cam-01
    name: Boiler room
    url: rtsp://10.0.0.4/stream1
    meters:
      - id: meter-01
        name: Pressure
        perspective:
          points: [[120, 80], [20, 90], [130, 160], [10, 170]]
          output_size: [160, 64]
        expected_digits: 3
        decimal_places: 2
        unit: kPa
"#;

    #[test]
    fn test_load_normalises_point_order() {
        let file = write_temp(MINIMAL);
        let config = load(file.path()).expect("Failed to load config");
        let points = &config.cameras[0].meters[0].perspective.points;
        assert_eq!(
            points,
            &vec![[20, 90], [120, 80], [130, 160], [10, 170]],
            "points must come back in TL, TR, BR, BL order"
        );
    }

    #[test]
    /// save(load(x)) must be a fixed point of load followed by save.
    fn test_canonical_round_trip() {
        let file = write_temp(MINIMAL);
        let first = load(file.path()).expect("Failed to load config");
        let canonical = to_canonical_yaml(&first);

        let second_file = write_temp(&canonical);
        let second = load(second_file.path()).expect("Failed to reload canonical config");
        assert_eq!(first, second, "canonical text must load to an equal snapshot");
        assert_eq!(
            canonical,
            to_canonical_yaml(&second),
            "canonical text must be byte for byte stable"
        );
    }

    #[test]
    #[serial]
    fn test_substitute_env_set_and_default() {
        std::env::set_var("CTME_TEST_HOST", "10.1.2.3");
        let out = substitute_env(
            "url: rtsp://${CTME_TEST_HOST}/stream\nother: ${CTME_TEST_MISSING:-fallback}\n",
        )
        .expect("Failed to substitute");
        assert_eq!(out, "url: rtsp://10.1.2.3/stream\nother: fallback\n");
        std::env::remove_var("CTME_TEST_HOST");
    }

    #[test]
    #[serial]
    fn test_substitute_env_unresolved_fails() {
        std::env::remove_var("CTME_TEST_MISSING");
        let result = substitute_env("url: ${CTME_TEST_MISSING}\n");
        match result {
            Err(ConfigError::UnresolvedVariable { name }) => {
                assert_eq!(name, "CTME_TEST_MISSING")
            }
            other => panic!("expected unresolved variable error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_camera_id_fails_with_path() {
        let text = r#"
cameras:
  - id: cam-01
    url: rtsp://a/1
  - id: cam-01
    url: rtsp://a/2
"#;
        let file = write_temp(text);
        match load(file.path()) {
            Err(ConfigError::Invalid { path, .. }) => assert_eq!(path, "cameras[1].id"),
            other => panic!("expected invalid error, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_point_count_fails_with_path() {
        let text = r#"
cameras:
  - id: cam-01
    url: rtsp://a/1
    meters:
      - id: m1
        perspective:
          points: [[0, 0], [10, 0], [10, 10]]
          output_size: [32, 32]
"#;
        let file = write_temp(text);
        match load(file.path()) {
            Err(ConfigError::Invalid { path, .. }) => {
                assert_eq!(path, "cameras[0].meters[0].perspective.points")
            }
            other => panic!("expected invalid error, got {other:?}"),
        }
    }

    #[test]
    fn test_short_processing_interval_fails() {
        let text = "cameras:\n  - id: cam-01\n    url: rtsp://a/1\n    processing_interval_seconds: 0.05\n";
        let file = write_temp(text);
        assert!(load(file.path()).is_err());
    }

    #[test]
    fn test_small_output_size_fails() {
        let text = r#"
cameras:
  - id: cam-01
    url: rtsp://a/1
    indicators:
      - id: lamp
        perspective:
          points: [[0, 0], [10, 0], [10, 10], [0, 10]]
          output_size: [8, 32]
"#;
        let file = write_temp(text);
        match load(file.path()) {
            Err(ConfigError::Invalid { path, .. }) => {
                assert_eq!(path, "cameras[0].indicators[0].perspective.output_size")
            }
            other => panic!("expected invalid error, got {other:?}"),
        }
    }

    #[test]
    /// Zero is a legal ratio threshold (an always-on indicator); only
    /// values outside [0, 1] are rejected.
    fn test_ratio_threshold_bounds() {
        let template = |ratio: &str| {
            format!(
                "cameras:\n  - id: cam-01\n    url: rtsp://a/1\n    indicators:\n      - id: lamp\n        perspective:\n          points: [[0, 0], [10, 0], [10, 10], [0, 10]]\n          output_size: [32, 32]\n        detection:\n          mode: color\n          on_color: green\n          ratio_threshold: {ratio}\n"
            )
        };

        let file = write_temp(&template("0.0"));
        assert!(load(file.path()).is_ok(), "ratio 0.0 must be accepted");

        let file = write_temp(&template("1.5"));
        match load(file.path()) {
            Err(ConfigError::Invalid { path, .. }) => assert_eq!(
                path,
                "cameras[0].indicators[0].detection.ratio_threshold"
            ),
            other => panic!("expected invalid error, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_path_prefers_explicit() {
        let resolved = resolve_path(Some(PathBuf::from("/tmp/custom.yaml"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/custom.yaml"));
    }

    #[test]
    #[serial]
    /// The shipped example document must always load; it is the last
    /// resort of the configuration search order.
    fn test_shipped_example_config_loads() {
        let path = crate::test_file_path!("/../config.example.yaml");
        let config = load(path).expect("Failed to load the shipped example");
        assert_eq!(config.cameras[0].id, "cam-01");
        assert_eq!(config.cameras[0].meters[0].unit, "kPa");
        assert!(config.export.database.enabled);
    }
}
