use crate::config::model::{AppConfig, CameraConfig};
use crate::errors::RegistryError;
use crate::messages::readings::Observation;
use crate::messages::status::{CameraState, CameraStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};

/// JPEG snapshots of the most recent processed frame of one camera,
/// served as-is by the snapshot endpoint and the MJPEG stream.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// The raw frame, JPEG quality 80.
    pub raw_jpeg: Vec<u8>,
    /// The frame with meter and indicator outlines drawn, same
    /// quality.
    pub annotated_jpeg: Vec<u8>,
    /// Capture time of the frame.
    pub captured_at: DateTime<Utc>,
}

/// Process-wide runtime state: the current configuration snapshot, the
/// latest frame and reading per source, camera statuses and the
/// subscriber list. Constructed once at service start, shared by
/// reference with the supervisor and the exporter, dropped on
/// shutdown.
///
/// Values in the frame and reading tables sit behind their own `Arc`,
/// so a slow reader (an MJPEG client holding a frame) never holds the
/// table lock while it works; workers replace entries without waiting
/// on readers.
pub struct Registry {
    snapshot: Mutex<Arc<AppConfig>>,
    frames: Mutex<HashMap<String, Arc<FrameRecord>>>,
    readings: Mutex<HashMap<(String, String), Arc<Observation>>>,
    status: Mutex<HashMap<String, CameraStatus>>,
    subscribers: Mutex<Arc<Vec<mpsc::Sender<Observation>>>>,
}

impl Registry {
    /// Create the registry around an initial snapshot. Every
    /// configured camera starts in the disabled state until its worker
    /// reports otherwise.
    pub fn new(initial: AppConfig) -> Self {
        let mut status = HashMap::new();
        for camera in &initial.cameras {
            status.insert(camera.id.clone(), CameraStatus::disabled());
        }
        Self {
            snapshot: Mutex::new(Arc::new(initial)),
            frames: Mutex::new(HashMap::new()),
            readings: Mutex::new(HashMap::new()),
            status: Mutex::new(status),
            subscribers: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// The current snapshot. Cheap: one lock for the pointer clone,
    /// callers read the snapshot itself without any lock held.
    pub fn current_config(&self) -> Arc<AppConfig> {
        self.snapshot.lock().expect("registry mutex poisoned").clone()
    }

    /// Replace the snapshot wholesale and prune state belonging to
    /// cameras or meters that no longer exist, so nothing stale is
    /// ever served after a reload.
    pub fn swap_config(&self, next: AppConfig) -> Arc<AppConfig> {
        let next = Arc::new(next);
        {
            let mut snapshot = self.snapshot.lock().expect("registry mutex poisoned");
            *snapshot = next.clone();
        }
        {
            let mut frames = self.frames.lock().expect("registry mutex poisoned");
            frames.retain(|camera_id, _| next.camera(camera_id).is_some());
        }
        {
            let mut readings = self.readings.lock().expect("registry mutex poisoned");
            readings.retain(|(camera_id, source_id), _| {
                next.camera(camera_id).map_or(false, |camera| {
                    camera.meters.iter().any(|m| &m.id == source_id)
                        || camera.indicators.iter().any(|i| &i.id == source_id)
                })
            });
        }
        {
            let mut status = self.status.lock().expect("registry mutex poisoned");
            status.retain(|camera_id, _| next.camera(camera_id).is_some());
            for camera in &next.cameras {
                status
                    .entry(camera.id.clone())
                    .or_insert_with(CameraStatus::disabled);
            }
        }
        next
    }

    /// The configuration of one camera in the current snapshot, cloned
    /// so the worker can use it across a whole frame without holding
    /// anything.
    pub fn camera_config(&self, camera_id: &str) -> Option<CameraConfig> {
        self.current_config().camera(camera_id).cloned()
    }

    /// Store the latest frame pair of a camera, replacing the previous
    /// one.
    pub fn publish_frame(&self, camera_id: &str, record: FrameRecord) {
        let mut frames = self.frames.lock().expect("registry mutex poisoned");
        frames.insert(camera_id.to_string(), Arc::new(record));
    }

    /// The latest frame pair of a camera, if any frame was processed
    /// yet.
    pub fn latest_frame(&self, camera_id: &str) -> Option<Arc<FrameRecord>> {
        self.frames
            .lock()
            .expect("registry mutex poisoned")
            .get(camera_id)
            .cloned()
    }

    /// Store an observation as the latest reading for its source and
    /// hand it to every subscriber. Exactly one entry exists per
    /// (camera, source) key. Observations whose source is no longer in
    /// the current snapshot are rejected, so a worker racing a reload
    /// can never emit a reading under a stale meter id.
    pub fn publish_observation(&self, observation: Observation) -> bool {
        let known = self
            .current_config()
            .camera(observation.camera_id())
            .map_or(false, |camera| {
                camera.meters.iter().any(|m| m.id == observation.source_id())
                    || camera.indicators.iter().any(|i| i.id == observation.source_id())
            });
        if !known {
            tracing::debug!(
                camera = %observation.camera_id(),
                source = %observation.source_id(),
                "dropping observation for a source not in the current snapshot"
            );
            return false;
        }
        let key = (
            observation.camera_id().to_string(),
            observation.source_id().to_string(),
        );
        {
            let mut readings = self.readings.lock().expect("registry mutex poisoned");
            readings.insert(key, Arc::new(observation.clone()));
        }
        self.notify_subscribers(observation);
        true
    }

    /// The latest reading for one (camera, meter or indicator) key.
    pub fn latest_reading(&self, camera_id: &str, source_id: &str) -> Option<Arc<Observation>> {
        self.readings
            .lock()
            .expect("registry mutex poisoned")
            .get(&(camera_id.to_string(), source_id.to_string()))
            .cloned()
    }

    /// All latest readings of one camera, for the camera detail
    /// endpoint.
    pub fn readings_for_camera(&self, camera_id: &str) -> Vec<Arc<Observation>> {
        self.readings
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .filter(|((camera, _), _)| camera == camera_id)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Register a subscriber. The sender list is copy on write: the
    /// new list replaces the old pointer, in-flight publishes keep
    /// using the list they already snapshotted.
    pub fn subscribe(&self) -> mpsc::Receiver<Observation> {
        let (sender, receiver) = mpsc::channel();
        let mut subscribers = self.subscribers.lock().expect("registry mutex poisoned");
        let mut next = subscribers.as_ref().clone();
        next.push(sender);
        *subscribers = Arc::new(next);
        receiver
    }

    fn notify_subscribers(&self, observation: Observation) {
        let current = self
            .subscribers
            .lock()
            .expect("registry mutex poisoned")
            .clone();
        let mut failed = Vec::new();
        for (index, subscriber) in current.iter().enumerate() {
            if subscriber.send(observation.clone()).is_err() {
                failed.push(index);
            }
        }
        if !failed.is_empty() {
            // Drop hung up receivers by replacing the list pointer,
            // unless someone replaced it while we were sending.
            let mut subscribers = self.subscribers.lock().expect("registry mutex poisoned");
            if Arc::ptr_eq(&subscribers, &current) {
                let pruned: Vec<_> = current
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| !failed.contains(index))
                    .map(|(_, sender)| sender.clone())
                    .collect();
                *subscribers = Arc::new(pruned);
            }
        }
    }

    /// Update the state of one camera. Errors are sticky until the
    /// next successful frame.
    pub fn set_camera_state(&self, camera_id: &str, state: CameraState, error: Option<String>) {
        let mut status = self.status.lock().expect("registry mutex poisoned");
        let entry = status
            .entry(camera_id.to_string())
            .or_insert_with(CameraStatus::disabled);
        entry.state = state;
        if let Some(message) = error {
            entry.last_error = Some(message);
        }
    }

    /// Record a successfully processed frame, clearing any sticky
    /// error.
    pub fn record_frame_success(&self, camera_id: &str, at: DateTime<Utc>) {
        let mut status = self.status.lock().expect("registry mutex poisoned");
        let entry = status
            .entry(camera_id.to_string())
            .or_insert_with(CameraStatus::disabled);
        entry.state = CameraState::Running;
        entry.last_error = None;
        entry.last_frame_at = Some(at);
    }

    /// Status of one camera. Unknown ids are programming errors.
    pub fn camera_status(&self, camera_id: &str) -> Result<CameraStatus, RegistryError> {
        self.status
            .lock()
            .expect("registry mutex poisoned")
            .get(camera_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCamera(camera_id.to_string()))
    }

    /// Statuses of every configured camera, for `/api/status`.
    pub fn statuses(&self) -> HashMap<String, CameraStatus> {
        self.status.lock().expect("registry mutex poisoned").clone()
    }
}
