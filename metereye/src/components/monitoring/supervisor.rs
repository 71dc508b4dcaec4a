use crate::components::exporting::dispatcher::DispatchQueue;
use crate::components::monitoring::worker::{CameraWorkerController, CameraWorkerHandle};
use crate::config::loader;
use crate::devices::hardware::rtsp::VideoSourceFactory;
use crate::errors::ConfigError;
use crate::registry::Registry;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long a worker gets to leave its frame loop after the stop
/// request before its thread is abandoned.
const STOP_BUDGET: Duration = Duration::from_secs(5);

/// Owns the camera workers and reconciles them against the current
/// configuration snapshot: on startup, after every successful reload,
/// and on shutdown (the degenerate reconcile against nothing).
pub struct Supervisor {
    registry: Arc<Registry>,
    dispatch: Arc<DispatchQueue>,
    sources: Arc<dyn VideoSourceFactory>,
    workers: HashMap<String, CameraWorkerHandle>,
    // Workers that ignored their stop budget. The buffer keeps the
    // leak bounded; overwritten handles detach their threads.
    abandoned: AllocRingBuffer<JoinHandle<()>>,
}

impl Supervisor {
    /// Create a supervisor with no workers yet; call `reconcile` to
    /// bring the worker set up to the snapshot.
    pub fn new(
        registry: Arc<Registry>,
        dispatch: Arc<DispatchQueue>,
        sources: Arc<dyn VideoSourceFactory>,
    ) -> Self {
        Self {
            registry,
            dispatch,
            sources,
            workers: HashMap::new(),
            abandoned: AllocRingBuffer::new(128),
        }
    }

    /// Load a new document, swap it in atomically and reconcile. A
    /// load or validation failure leaves the running snapshot and the
    /// worker set untouched.
    pub fn reload<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let next = loader::load(path)?;
        self.registry.swap_config(next);
        self.reconcile();
        Ok(())
    }

    /// Bring the running worker set in line with the snapshot:
    /// missing cameras are spawned, deep-equal ones are left alone,
    /// changed ones are restarted, removed or disabled ones stopped.
    pub fn reconcile(&mut self) {
        let target = self.registry.current_config();

        let mut to_stop = Vec::new();
        for (camera_id, handle) in &self.workers {
            let keep = target
                .camera(camera_id)
                .map_or(false, |camera| camera.enabled && camera == handle.config());
            if !keep {
                to_stop.push(camera_id.clone());
            }
        }
        for camera_id in to_stop {
            if let Some(handle) = self.workers.remove(&camera_id) {
                self.stop_worker(handle);
            }
        }

        for camera in &target.cameras {
            if camera.enabled && !self.workers.contains_key(&camera.id) {
                info!(camera = %camera.id, "starting camera worker");
                let handle = CameraWorkerController::start(
                    camera.clone(),
                    self.registry.clone(),
                    self.dispatch.clone(),
                    self.sources.clone(),
                );
                self.workers.insert(camera.id.clone(), handle);
            }
        }
    }

    /// Ids of the cameras that currently have a worker.
    pub fn running_cameras(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    /// The worker handle of one camera, if it has one.
    pub fn worker(&self, camera_id: &str) -> Option<&CameraWorkerHandle> {
        self.workers.get(camera_id)
    }

    /// Stop every worker. Stop requests go out first so the workers
    /// wind down in parallel before each one is joined.
    pub fn shutdown(mut self) {
        for handle in self.workers.values() {
            handle.request_stop();
        }
        let camera_ids: Vec<String> = self.workers.keys().cloned().collect();
        for camera_id in camera_ids {
            if let Some(handle) = self.workers.remove(&camera_id) {
                self.stop_worker(handle);
            }
        }
    }

    /// Cooperative stop: raise the flag, give the frame loop its
    /// budget, then either join it or abandon the thread with a log
    /// line.
    fn stop_worker(&mut self, mut handle: CameraWorkerHandle) {
        debug!(camera = %handle.camera_id(), "stopping camera worker");
        handle.request_stop();
        let deadline = Instant::now() + STOP_BUDGET;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        match handle.take_join() {
            Some(join) if join.is_finished() => {
                if join.join().is_err() {
                    warn!(camera = %handle.camera_id(), "camera worker panicked");
                }
            }
            Some(join) => {
                warn!(
                    camera = %handle.camera_id(),
                    "camera worker ignored its stop budget, leaking its thread"
                );
                self.abandoned.push(join);
            }
            None => {}
        }
    }
}
