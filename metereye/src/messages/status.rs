use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Lifecycle state of one camera worker, as reported through the
/// status API. `Disabled` covers cameras present in the configuration
/// with `enabled: false`, which have no worker at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CameraState {
    /// Attempting to open the stream.
    Connecting,
    /// Reading and processing frames.
    Running,
    /// Sleeping between reconnect attempts.
    Backoff,
    /// Present in the configuration but not enabled.
    Disabled,
}

/// Status snapshot for one camera, readable at any time from the
/// registry without touching the worker thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    /// Current worker state.
    pub state: CameraState,
    /// Most recent stream error, cleared on a successful frame.
    pub last_error: Option<String>,
    /// Capture time of the most recent processed frame.
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl CameraStatus {
    /// Status for a camera that has no worker yet.
    pub fn disabled() -> Self {
        Self {
            state: CameraState::Disabled,
            last_error: None,
            last_frame_at: None,
        }
    }
}
