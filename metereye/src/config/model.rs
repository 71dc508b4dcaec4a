use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// Root of the configuration document. The three top level keys are
/// the whole vocabulary; anything else is rejected by the loader so a
/// typo never silently disables a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Cameras to monitor, in declaration order.
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    /// Export sink configuration.
    #[serde(default)]
    pub export: ExportConfig,
    /// REST/streaming server configuration, consumed by the serving
    /// surface. Validated here, used there.
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Look up a camera by id.
    pub fn camera(&self, camera_id: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id == camera_id)
    }
}

/// One RTSP source together with the meters and indicators read from
/// its frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    /// Unique id, at most 64 characters. Used in topics, URLs and the
    /// database, so keep it stable across edits.
    pub id: String,
    /// Operator facing display name.
    #[serde(default)]
    pub name: String,
    /// RTSP URL. `${VAR}` and `${VAR:-default}` are substituted from
    /// the process environment at load time.
    pub url: String,
    /// Disabled cameras keep their configuration but get no worker.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between processed frames, at least 0.1.
    #[serde(default = "default_processing_interval")]
    pub processing_interval_seconds: f64,
    /// Meters read from this camera, in declaration order.
    #[serde(default)]
    pub meters: Vec<MeterConfig>,
    /// Indicator lamps read from this camera, in declaration order.
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
}

/// A quadrilateral in source image coordinates and the rectangle it is
/// warped onto. The loader normalises `points` into top-left,
/// top-right, bottom-right, bottom-left order, whatever order the
/// caller supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerspectiveConfig {
    /// Exactly four `[x, y]` pairs, non-negative integers.
    pub points: Vec<[i64; 2]>,
    /// `[width, height]` of the warped image, both at least 16.
    pub output_size: [u32; 2],
}

impl PerspectiveConfig {
    /// Width of the warped image.
    pub fn width(&self) -> u32 {
        self.output_size[0]
    }

    /// Height of the warped image.
    pub fn height(&self) -> u32 {
        self.output_size[1]
    }
}

/// Whether the display renders lit segments brighter or darker than
/// the background.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DisplayMode {
    /// Lit segments are brighter than the background (LED, VFD).
    #[default]
    LightOnDark,
    /// Lit segments are darker than the background (LCD).
    DarkOnLight,
}

/// Which channel of the warped image the thresholder operates on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColorChannel {
    /// Red channel, for red LED displays.
    Red,
    /// Green channel.
    Green,
    /// Blue channel.
    Blue,
    /// Luminance with the 0.299/0.587/0.114 weights.
    #[default]
    Gray,
}

/// Thresholding parameters for the seven segment recogniser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecognitionConfig {
    /// Polarity of the display.
    #[serde(default)]
    pub display_mode: DisplayMode,
    /// Channel to threshold.
    #[serde(default)]
    pub color_channel: ColorChannel,
    /// Fixed binarisation threshold; 0 selects Otsu's automatic
    /// threshold computed over the warped channel.
    #[serde(default)]
    pub threshold: u8,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::default(),
            color_channel: ColorChannel::default(),
            threshold: 0,
        }
    }
}

/// One seven segment meter on a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterConfig {
    /// Unique within the camera.
    pub id: String,
    /// Operator facing display name.
    #[serde(default)]
    pub name: String,
    /// Where the display sits in the frame.
    pub perspective: PerspectiveConfig,
    /// How the warped region is binarised.
    #[serde(default)]
    pub recognition: RecognitionConfig,
    /// Expected digit count; 0 accepts any count of at least one.
    #[serde(default)]
    pub expected_digits: u32,
    /// Implied decimal places when the display has no decimal point.
    #[serde(default)]
    pub decimal_places: u32,
    /// Engineering unit copied into every reading.
    #[serde(default)]
    pub unit: String,
    /// Whether the dashboard lists this meter.
    #[serde(default = "default_enabled")]
    pub show_on_dashboard: bool,
}

/// Detection strategy for an indicator lamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetectionMode {
    /// Compare the mean gray level against a threshold.
    #[default]
    Brightness,
    /// Count pixels near a canonical hue.
    Color,
}

/// Canonical lamp colors for color mode detection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OnColor {
    /// Hue 0, wrapping around 360.
    #[default]
    Red,
    /// Hue 120.
    Green,
    /// Hue 240.
    Blue,
    /// Hue 60.
    Yellow,
}

impl OnColor {
    /// Canonical hue in degrees.
    pub fn hue_degrees(&self) -> f64 {
        match self {
            OnColor::Red => 0.0,
            OnColor::Yellow => 60.0,
            OnColor::Green => 120.0,
            OnColor::Blue => 240.0,
        }
    }
}

/// Detection parameters for an indicator lamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfig {
    /// Brightness or color detection.
    #[serde(default)]
    pub mode: DetectionMode,
    /// Brightness threshold; 0 selects Otsu. Unused in color mode.
    #[serde(default)]
    pub threshold: u8,
    /// Lamp color for color mode.
    #[serde(default)]
    pub on_color: OnColor,
    /// Fraction of matching pixels required for color mode, in [0, 1].
    #[serde(default = "default_ratio_threshold")]
    pub ratio_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::default(),
            threshold: 0,
            on_color: OnColor::default(),
            ratio_threshold: default_ratio_threshold(),
        }
    }
}

/// One on/off indicator lamp on a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorConfig {
    /// Unique within the camera.
    pub id: String,
    /// Operator facing display name.
    #[serde(default)]
    pub name: String,
    /// Where the lamp sits in the frame.
    pub perspective: PerspectiveConfig,
    /// How on/off is decided.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Whether the dashboard lists this indicator.
    #[serde(default = "default_enabled")]
    pub show_on_dashboard: bool,
}

/// Export sink configuration. Every sink defaults to disabled so a
/// minimal document runs with readings kept in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    /// Batched JSON POSTs to an external collector.
    #[serde(default)]
    pub http: HttpExportConfig,
    /// Row per reading persistence with retention.
    #[serde(default)]
    pub database: DatabaseExportConfig,
    /// Message per reading publication to a broker.
    #[serde(default)]
    pub mqtt: MqttExportConfig,
}

/// HTTP batch sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpExportConfig {
    /// Whether the sink runs.
    #[serde(default)]
    pub enabled: bool,
    /// Collector endpoint. `${VAR}` substitution applies.
    #[serde(default)]
    pub url: String,
    /// Flush a partial batch this many seconds after its first item.
    #[serde(default = "default_http_interval")]
    pub interval_seconds: f64,
    /// Flush as soon as this many readings are pending.
    #[serde(default = "default_http_batch")]
    pub batch_size: usize,
    /// Extra request headers, e.g. an authorization token. An ordered
    /// map so the canonical writer emits them deterministically.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Per request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: f64,
}

impl Default for HttpExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            interval_seconds: default_http_interval(),
            batch_size: default_http_batch(),
            headers: BTreeMap::new(),
            timeout_seconds: default_http_timeout(),
        }
    }
}

/// Supported database engines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DatabaseType {
    /// Single file sqlite database.
    #[default]
    Sqlite,
    /// External postgresql server.
    Postgresql,
}

/// Database sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseExportConfig {
    /// Whether the sink runs.
    #[serde(default)]
    pub enabled: bool,
    /// Which engine to connect to.
    #[serde(default, rename = "type")]
    pub kind: DatabaseType,
    /// File path for sqlite.
    #[serde(default)]
    pub path: Option<String>,
    /// Connection string for postgresql. `${VAR}` substitution applies
    /// so credentials stay out of the document.
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Rows older than this many days are deleted hourly.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for DatabaseExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: DatabaseType::default(),
            path: None,
            connection_string: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Optional broker credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttCredentials {
    /// Broker username.
    pub username: String,
    /// Broker password. `${VAR}` substitution applies.
    pub password: String,
}

/// MQTT sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttExportConfig {
    /// Whether the sink runs.
    #[serde(default)]
    pub enabled: bool,
    /// Broker host name or address.
    #[serde(default)]
    pub broker: String,
    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic template; `{camera_id}`, `{meter_id}` and
    /// `{indicator_id}` are substituted per reading.
    #[serde(default = "default_topic_template")]
    pub topic_template: String,
    /// Quality of service, 0, 1 or 2.
    #[serde(default)]
    pub qos: u8,
    /// Credentials, absent for anonymous brokers.
    #[serde(default)]
    pub credentials: Option<MqttCredentials>,
}

impl Default for MqttExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: String::new(),
            port: default_mqtt_port(),
            topic_template: default_topic_template(),
            qos: 0,
            credentials: None,
        }
    }
}

/// REST/streaming server settings, consumed by the serving surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Whether the server runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Bind address.
    #[serde(default = "default_server_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_processing_interval() -> f64 {
    1.0
}

fn default_ratio_threshold() -> f64 {
    0.2
}

fn default_http_interval() -> f64 {
    10.0
}

fn default_http_batch() -> usize {
    10
}

fn default_http_timeout() -> f64 {
    10.0
}

fn default_retention_days() -> u32 {
    30
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_template() -> String {
    String::from("ctme/{camera_id}/{meter_id}")
}

fn default_server_host() -> String {
    String::from("0.0.0.0")
}

fn default_server_port() -> u16 {
    8080
}
