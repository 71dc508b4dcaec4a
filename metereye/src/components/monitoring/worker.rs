use crate::components::exporting::dispatcher::DispatchQueue;
use crate::config::model::CameraConfig;
use crate::devices::hardware::rtsp::VideoSourceFactory;
use crate::messages::readings::{IndicatorReading, Observation, Reading};
use crate::messages::status::CameraState;
use crate::registry::{FrameRecord, Registry};
use crate::utils::image::{
    draw_quad_outline, encode_jpeg, INDICATOR_OUTLINE, METER_OUTLINE, SNAPSHOT_QUALITY,
};
use crate::vision::{indicator, sevenseg, VisionFailure};
use chrono::Utc;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A frame read that produces nothing for this long counts as a
/// stream failure.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// First reconnect delay.
const BACKOFF_START: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Granularity of stop flag checks inside sleeps.
const STOP_POLL: Duration = Duration::from_millis(50);
/// A given (source, failure kind) pair is logged at most once per
/// this period.
const FAILURE_LOG_PERIOD: Duration = Duration::from_secs(60);

/// Handle to one running camera worker thread. Created when a camera
/// becomes enabled, replaced when its definition changes, dropped on
/// removal or shutdown.
pub struct CameraWorkerHandle {
    camera_id: String,
    uuid: Uuid,
    started_with: CameraConfig,
    stop_signal: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl CameraWorkerHandle {
    /// Id of the camera this worker serves.
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Unique identifier of this worker instance, for log correlation
    /// across restarts of the same camera.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The definition this worker was started with; the supervisor
    /// deep-compares it against the target snapshot on reconcile.
    pub fn config(&self) -> &CameraConfig {
        &self.started_with
    }

    /// Ask the frame loop to exit at its next stop check.
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Whether the frame loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().map_or(true, |j| j.is_finished())
    }

    pub(crate) fn take_join(&mut self) -> Option<JoinHandle<()>> {
        self.join_handle.take()
    }
}

/// Unit struct to start camera workers; the loop itself borrows
/// nothing from the controller.
pub struct CameraWorkerController;

impl CameraWorkerController {
    /// Spawn the frame loop for one camera on its own thread.
    pub fn start(
        camera: CameraConfig,
        registry: Arc<Registry>,
        dispatch: Arc<DispatchQueue>,
        sources: Arc<dyn VideoSourceFactory>,
    ) -> CameraWorkerHandle {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let uuid = Uuid::new_v4();
        let camera_id = camera.id.clone();

        let thread_stop = stop_signal.clone();
        let thread_camera_id = camera_id.clone();
        let join_handle = thread::spawn(move || {
            run_loop(thread_camera_id, registry, dispatch, sources, thread_stop, uuid);
        });

        CameraWorkerHandle {
            camera_id,
            uuid,
            started_with: camera,
            stop_signal,
            join_handle: Some(join_handle),
        }
    }
}

/// The state machine: Connecting -> Running -> Backoff -> Connecting,
/// with Stopping reachable from anywhere via the stop flag. The
/// worker re-reads its camera definition from the snapshot pointer at
/// every frame boundary, so a reload takes effect on the next frame
/// without restarting the thread.
fn run_loop(
    camera_id: String,
    registry: Arc<Registry>,
    dispatch: Arc<DispatchQueue>,
    sources: Arc<dyn VideoSourceFactory>,
    stop: Arc<AtomicBool>,
    uuid: Uuid,
) {
    info!(camera = %camera_id, worker = %uuid, "camera worker started");
    let mut backoff = BACKOFF_START;

    'connect: while !stop.load(Ordering::Relaxed) {
        let Some(config) = registry.camera_config(&camera_id) else {
            break;
        };
        if !config.enabled {
            break;
        }

        registry.set_camera_state(&camera_id, CameraState::Connecting, None);
        debug!(camera = %camera_id, url = %config.url, "connecting");
        let mut source = match sources.open(&config.url) {
            Ok(source) => source,
            Err(error) => {
                warn!(camera = %camera_id, %error, retry_in = ?backoff, "connect failed");
                registry.set_camera_state(
                    &camera_id,
                    CameraState::Backoff,
                    Some(error.to_string()),
                );
                if !sleep_unless_stopped(&stop, backoff) {
                    break;
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
                continue;
            }
        };
        registry.set_camera_state(&camera_id, CameraState::Running, None);
        info!(camera = %camera_id, "stream connected");

        let mut last_processed: Option<Instant> = None;
        let mut failure_log: HashMap<(String, VisionFailure), Instant> = HashMap::new();
        loop {
            if stop.load(Ordering::Relaxed) {
                break 'connect;
            }
            // Fresh definition at the frame boundary; replacements
            // made mid-frame are honored here.
            let Some(config) = registry.camera_config(&camera_id) else {
                break 'connect;
            };
            if !config.enabled {
                break 'connect;
            }

            if let Some(last) = last_processed {
                let interval = Duration::from_secs_f64(config.processing_interval_seconds);
                let deadline = last + interval;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    if stop.load(Ordering::Relaxed) {
                        break 'connect;
                    }
                    thread::sleep(remaining.min(STOP_POLL));
                }
            }

            match source.read_frame(READ_TIMEOUT) {
                Ok(frame) => {
                    last_processed = Some(Instant::now());
                    backoff = BACKOFF_START;
                    process_frame(
                        &camera_id,
                        &config,
                        &frame,
                        &registry,
                        &dispatch,
                        &mut failure_log,
                    );
                }
                Err(error) => {
                    warn!(camera = %camera_id, %error, retry_in = ?backoff, "stream lost");
                    registry.set_camera_state(
                        &camera_id,
                        CameraState::Backoff,
                        Some(error.to_string()),
                    );
                    drop(source);
                    if !sleep_unless_stopped(&stop, backoff) {
                        break 'connect;
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    continue 'connect;
                }
            }
        }
    }

    // Only cameras still configured keep a status entry; a pruned
    // camera must not be resurrected by its dying worker.
    if registry.current_config().camera(&camera_id).is_some() {
        registry.set_camera_state(&camera_id, CameraState::Disabled, None);
    }
    info!(camera = %camera_id, worker = %uuid, "camera worker stopped");
}

/// Run every meter and indicator of the camera over one frame, then
/// publish the frame pair. Recognition failures become failure
/// readings and never abort the loop.
fn process_frame(
    camera_id: &str,
    config: &CameraConfig,
    frame: &RgbImage,
    registry: &Registry,
    dispatch: &DispatchQueue,
    failure_log: &mut HashMap<(String, VisionFailure), Instant>,
) {
    for meter in &config.meters {
        let recognition = sevenseg::recognize(frame, meter);
        if let Some(kind) = recognition.failure {
            log_failure(failure_log, camera_id, &meter.id, kind);
        }
        let observation = Observation::Meter(Reading {
            camera_id: camera_id.to_string(),
            meter_id: meter.id.clone(),
            value: recognition.value,
            raw_text: recognition.raw_text,
            unit: meter.unit.clone(),
            confidence: recognition.confidence,
            timestamp: Utc::now(),
        });
        // The registry refuses observations for sources a concurrent
        // reload removed; those must not reach the sinks either.
        if registry.publish_observation(observation.clone()) {
            dispatch.submit(observation);
        }
    }

    for indicator_config in &config.indicators {
        let detection = indicator::detect(frame, indicator_config);
        if let Some(kind) = detection.failure {
            log_failure(failure_log, camera_id, &indicator_config.id, kind);
        }
        let observation = Observation::Indicator(IndicatorReading {
            camera_id: camera_id.to_string(),
            indicator_id: indicator_config.id.clone(),
            state: detection.state,
            score: detection.score,
            timestamp: Utc::now(),
        });
        if registry.publish_observation(observation.clone()) {
            dispatch.submit(observation);
        }
    }

    publish_frames(camera_id, config, frame, registry);
    registry.record_frame_success(camera_id, Utc::now());
}

/// JPEG encode the raw frame and an annotated copy with every
/// configured region outlined, and store both as the camera's latest
/// frame.
fn publish_frames(camera_id: &str, config: &CameraConfig, frame: &RgbImage, registry: &Registry) {
    let raw_jpeg = match encode_jpeg(frame, SNAPSHOT_QUALITY) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(camera = %camera_id, %error, "failed to encode snapshot");
            return;
        }
    };
    let mut annotated = frame.clone();
    for meter in &config.meters {
        draw_quad_outline(&mut annotated, &meter.perspective.points, METER_OUTLINE);
    }
    for indicator_config in &config.indicators {
        draw_quad_outline(
            &mut annotated,
            &indicator_config.perspective.points,
            INDICATOR_OUTLINE,
        );
    }
    let annotated_jpeg = match encode_jpeg(&annotated, SNAPSHOT_QUALITY) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(camera = %camera_id, %error, "failed to encode annotated snapshot");
            return;
        }
    };
    registry.publish_frame(
        camera_id,
        FrameRecord {
            raw_jpeg,
            annotated_jpeg,
            captured_at: Utc::now(),
        },
    );
}

/// Warn about a vision failure at most once per (source, kind) per
/// minute; a permanently miscalibrated meter must not flood the log.
fn log_failure(
    failure_log: &mut HashMap<(String, VisionFailure), Instant>,
    camera_id: &str,
    source_id: &str,
    kind: VisionFailure,
) {
    let key = (source_id.to_string(), kind);
    let due = failure_log
        .get(&key)
        .map_or(true, |last| last.elapsed() >= FAILURE_LOG_PERIOD);
    if due {
        failure_log.insert(key, Instant::now());
        warn!(camera = %camera_id, source = %source_id, kind = %kind, "recognition failed");
    }
}

/// Sleep in stop-aware slices. Returns false when the stop flag was
/// raised during the sleep.
fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(STOP_POLL));
    }
}
