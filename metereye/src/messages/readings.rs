use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded output for one meter at one instant. A failed
/// recognition is still a reading: `value` is `None`, `confidence` is
/// zero and `raw_text` carries whatever partial text was decoded, so
/// sinks can record failures and operators can tell a broken meter
/// apart from one that has not been read yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Id of the camera that produced the frame.
    pub camera_id: String,
    /// Id of the meter within that camera.
    pub meter_id: String,
    /// Decoded numeric value, absent when recognition failed.
    pub value: Option<f64>,
    /// The decoded character string before decimal normalisation.
    pub raw_text: String,
    /// Engineering unit copied from the meter configuration.
    pub unit: String,
    /// Mean segment clarity over the accepted digits, in [0, 1].
    pub confidence: f64,
    /// Wall clock capture time.
    pub timestamp: DateTime<Utc>,
}

/// One on/off decision for one indicator lamp at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReading {
    /// Id of the camera that produced the frame.
    pub camera_id: String,
    /// Id of the indicator within that camera.
    pub indicator_id: String,
    /// Whether the lamp is considered on.
    pub state: bool,
    /// Mean gray level (brightness mode, 0..255) or matching pixel
    /// ratio (color mode, 0..1).
    pub score: f64,
    /// Wall clock capture time.
    pub timestamp: DateTime<Utc>,
}

/// Either kind of reading, as handed from a camera worker to the
/// exporter dispatcher and to registry subscribers. Serialises
/// untagged so a batch mixes both payload shapes transparently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Observation {
    /// A meter reading.
    Meter(Reading),
    /// An indicator reading.
    Indicator(IndicatorReading),
}

impl Observation {
    /// Id of the camera that produced the observation.
    pub fn camera_id(&self) -> &str {
        match self {
            Observation::Meter(r) => &r.camera_id,
            Observation::Indicator(r) => &r.camera_id,
        }
    }

    /// Id of the meter or indicator within the camera.
    pub fn source_id(&self) -> &str {
        match self {
            Observation::Meter(r) => &r.meter_id,
            Observation::Indicator(r) => &r.indicator_id,
        }
    }

    /// Capture time of the observation.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Observation::Meter(r) => r.timestamp,
            Observation::Indicator(r) => r.timestamp,
        }
    }
}
