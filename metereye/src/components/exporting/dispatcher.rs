use crate::components::exporting::{database, http, mqtt};
use crate::config::model::ExportConfig;
use crate::messages::readings::Observation;
use crate::utils::queue::BoundedQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Capacity of the single entry queue every worker submits into.
pub const DISPATCH_CAPACITY: usize = 1024;
/// Capacity of each per sink queue.
pub const SINK_QUEUE_CAPACITY: usize = 1000;
/// Total graceful drain budget on shutdown.
const DRAIN_BUDGET: Duration = Duration::from_secs(10);
/// Consumer poll interval, also bounds stop latency.
const POLL: Duration = Duration::from_millis(100);

/// The submission side of the exporter. Submitting never blocks: at
/// capacity the oldest pending observation is discarded and counted,
/// a camera worker is never stalled behind a slow sink.
pub struct DispatchQueue {
    pub(crate) queue: BoundedQueue<Observation>,
    submitted: AtomicU64,
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: BoundedQueue::new(DISPATCH_CAPACITY),
            submitted: AtomicU64::new(0),
        }
    }

    /// Hand one observation to the exporter.
    pub fn submit(&self, observation: Observation) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if !self.queue.push(observation) {
            debug!("dispatcher queue overflow, oldest observation dropped");
        }
    }

    /// Observations submitted since startup.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Observations discarded by the entry queue since startup.
    pub fn drops_total(&self) -> u64 {
        self.queue.drops()
    }
}

/// One enabled sink, stored as a tagged variant; every variant offers
/// the same capability set of consuming its queue until closed.
pub enum SinkKind {
    /// Batched JSON POSTs.
    Http(crate::config::model::HttpExportConfig),
    /// Row per reading persistence.
    Database(crate::config::model::DatabaseExportConfig),
    /// Message per reading publication.
    Mqtt(crate::config::model::MqttExportConfig),
    /// Collects observations in memory, test suites only.
    #[cfg(test)]
    Capture(Arc<std::sync::Mutex<Vec<Observation>>>),
}

impl SinkKind {
    fn name(&self) -> &'static str {
        match self {
            SinkKind::Http(_) => "http",
            SinkKind::Database(_) => "database",
            SinkKind::Mqtt(_) => "mqtt",
            #[cfg(test)]
            SinkKind::Capture(_) => "capture",
        }
    }

    /// Consume the queue until it is closed and drained. Each variant
    /// owns its I/O, failures inside one sink never reach another.
    fn run(self, queue: Arc<BoundedQueue<Observation>>) {
        match self {
            SinkKind::Http(config) => http::run(config, queue),
            SinkKind::Database(config) => database::run(config, queue),
            SinkKind::Mqtt(config) => mqtt::run(config, queue),
            #[cfg(test)]
            SinkKind::Capture(store) => loop {
                match queue.recv_timeout(POLL) {
                    Some(observation) => {
                        store.lock().expect("capture mutex poisoned").push(observation)
                    }
                    None => {
                        if queue.is_closed() {
                            break;
                        }
                    }
                }
            },
        }
    }
}

struct SinkWorker {
    name: &'static str,
    queue: Arc<BoundedQueue<Observation>>,
    join: Option<JoinHandle<()>>,
}

/// The running exporter: the dispatcher thread plus one consumer
/// thread per enabled sink.
pub struct ExporterHandle {
    dispatch: Arc<DispatchQueue>,
    delivered: Arc<AtomicU64>,
    dispatcher_join: Option<JoinHandle<()>>,
    sinks: Vec<SinkWorker>,
}

/// Unit struct starting and wiring the exporter component.
pub struct ExporterController;

impl ExporterController {
    /// Start the dispatcher and a consumer per enabled sink.
    pub fn start(export: &ExportConfig) -> ExporterHandle {
        let mut kinds = Vec::new();
        if export.http.enabled {
            kinds.push(SinkKind::Http(export.http.clone()));
        }
        if export.database.enabled {
            kinds.push(SinkKind::Database(export.database.clone()));
        }
        if export.mqtt.enabled {
            kinds.push(SinkKind::Mqtt(export.mqtt.clone()));
        }
        Self::start_with_sinks(kinds)
    }

    pub(crate) fn start_with_sinks(kinds: Vec<SinkKind>) -> ExporterHandle {
        let dispatch = Arc::new(DispatchQueue::new());
        let delivered = Arc::new(AtomicU64::new(0));

        let mut sinks = Vec::new();
        let mut sink_queues = Vec::new();
        for kind in kinds {
            let name = kind.name();
            let queue = Arc::new(BoundedQueue::new(SINK_QUEUE_CAPACITY));
            sink_queues.push(queue.clone());
            let consumer_queue = queue.clone();
            let join = thread::spawn(move || kind.run(consumer_queue));
            info!(sink = name, "export sink started");
            sinks.push(SinkWorker {
                name,
                queue,
                join: Some(join),
            });
        }

        let dispatcher_dispatch = dispatch.clone();
        let dispatcher_delivered = delivered.clone();
        let dispatcher_join = thread::spawn(move || {
            loop {
                match dispatcher_dispatch.queue.recv_timeout(POLL) {
                    Some(observation) => {
                        dispatcher_delivered.fetch_add(1, Ordering::Relaxed);
                        for sink_queue in &sink_queues {
                            sink_queue.push(observation.clone());
                        }
                    }
                    None => {
                        if dispatcher_dispatch.queue.is_closed() {
                            break;
                        }
                    }
                }
            }
        });

        ExporterHandle {
            dispatch,
            delivered,
            dispatcher_join: Some(dispatcher_join),
            sinks,
        }
    }
}

impl ExporterHandle {
    /// The submission handle shared with every camera worker.
    pub fn submitter(&self) -> Arc<DispatchQueue> {
        self.dispatch.clone()
    }

    /// Observations handed to sink queues since startup.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Close the entry queue, let the dispatcher and every sink drain,
    /// then join them within the overall drain budget. Sinks that do
    /// not finish in time are abandoned with a log line.
    pub fn shutdown(mut self) {
        let deadline = Instant::now() + DRAIN_BUDGET;
        self.dispatch.queue.close();
        if let Some(join) = self.dispatcher_join.take() {
            join_until("dispatcher", join, deadline);
        }
        for sink in &self.sinks {
            sink.queue.close();
        }
        for sink in &mut self.sinks {
            if let Some(join) = sink.join.take() {
                join_until(sink.name, join, deadline);
            }
        }
    }
}

fn join_until(name: &str, join: JoinHandle<()>, deadline: Instant) {
    while !join.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    if join.is_finished() {
        let _ = join.join();
        debug!(thread = name, "exporter thread drained");
    } else {
        // Dropping the handle detaches the thread.
        warn!(thread = name, "exporter thread did not drain in time, leaking it");
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::messages::readings::Reading;
    use chrono::Utc;
    use std::sync::Mutex;

    fn reading(meter_id: &str, value: f64) -> Observation {
        Observation::Meter(Reading {
            camera_id: "cam-01".to_string(),
            meter_id: meter_id.to_string(),
            value: Some(value),
            raw_text: String::new(),
            unit: String::new(),
            confidence: 1.0,
            timestamp: Utc::now(),
        })
    }

    #[test]
    /// Everything submitted is either delivered to sinks or counted as
    /// dropped by the entry queue.
    fn test_conservation() {
        let store = Arc::new(Mutex::new(Vec::new()));
        let exporter =
            ExporterController::start_with_sinks(vec![SinkKind::Capture(store.clone())]);
        let submitter = exporter.submitter();
        for index in 0..200 {
            submitter.submit(reading("m1", index as f64));
        }
        exporter.shutdown();
        let delivered = store.lock().unwrap().len() as u64;
        assert_eq!(submitter.submitted(), delivered + submitter.drops_total());
        assert_eq!(delivered, 200, "no drops expected with a live consumer");
    }

    #[test]
    /// Per source order survives the dispatcher into each sink.
    fn test_order_preserved_per_source() {
        let store = Arc::new(Mutex::new(Vec::new()));
        let exporter =
            ExporterController::start_with_sinks(vec![SinkKind::Capture(store.clone())]);
        let submitter = exporter.submitter();
        for index in 0..50 {
            submitter.submit(reading("m1", index as f64));
        }
        exporter.shutdown();
        let values: Vec<f64> = store
            .lock()
            .unwrap()
            .iter()
            .map(|o| match o {
                Observation::Meter(r) => r.value.unwrap(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(values, sorted);
    }

    #[test]
    /// Every sink receives every observation; sinks do not share
    /// queues.
    fn test_fan_out_to_all_sinks() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let exporter = ExporterController::start_with_sinks(vec![
            SinkKind::Capture(first.clone()),
            SinkKind::Capture(second.clone()),
        ]);
        let submitter = exporter.submitter();
        for index in 0..20 {
            submitter.submit(reading("m1", index as f64));
        }
        exporter.shutdown();
        assert_eq!(first.lock().unwrap().len(), 20);
        assert_eq!(second.lock().unwrap().len(), 20);
    }

    #[test]
    /// With no consumer the entry queue drops its oldest item at
    /// capacity instead of blocking the submitter.
    fn test_submit_never_blocks_at_capacity() {
        let dispatch = DispatchQueue::new();
        for index in 0..(DISPATCH_CAPACITY as u64 + 100) {
            dispatch.submit(reading("m1", index as f64));
        }
        assert_eq!(dispatch.drops_total(), 100);
        let drained = dispatch.queue.drain();
        match &drained[0] {
            Observation::Meter(r) => assert_eq!(r.value, Some(100.0)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
