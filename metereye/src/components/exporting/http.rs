use crate::config::model::HttpExportConfig;
use crate::errors::ExportError;
use crate::messages::readings::Observation;
use crate::utils::queue::BoundedQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Consumer poll interval, bounds flush and stop latency.
const POLL: Duration = Duration::from_millis(200);
/// First retry delay after a transient failure.
const BACKOFF_START: Duration = Duration::from_secs(1);
/// Retry delay ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Consume the sink queue, batching readings and POSTing them as a
/// JSON array. A batch goes out when it reaches `batch_size` or when
/// `interval_seconds` have passed since its first item, whichever
/// comes first.
pub(crate) fn run(config: HttpExportConfig, queue: Arc<BoundedQueue<Observation>>) {
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs_f64(config.timeout_seconds))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to build http client, sink disabled");
            return;
        }
    };

    let mut batch: Vec<Observation> = Vec::new();
    let mut batch_started: Option<Instant> = None;
    loop {
        if let Some(observation) = queue.recv_timeout(POLL) {
            if batch.is_empty() {
                batch_started = Some(Instant::now());
            }
            batch.push(observation);
        }

        let interval_elapsed = batch_started
            .map(|started| started.elapsed() >= Duration::from_secs_f64(config.interval_seconds))
            .unwrap_or(false);
        if !batch.is_empty() && (batch.len() >= config.batch_size || interval_elapsed) {
            flush(&client, &config, &mut batch, &queue);
            batch_started = None;
        }

        if queue.is_closed() && queue.is_empty() {
            if !batch.is_empty() {
                flush(&client, &config, &mut batch, &queue);
            }
            break;
        }
    }
}

/// POST one batch, retrying transient failures with exponential
/// backoff while preserving the batch. Permanent failures drop the
/// batch with a warning.
fn flush(
    client: &reqwest::blocking::Client,
    config: &HttpExportConfig,
    batch: &mut Vec<Observation>,
    queue: &BoundedQueue<Observation>,
) {
    let mut backoff = BACKOFF_START;
    loop {
        match send(client, config, batch) {
            Ok(()) => {
                debug!(count = batch.len(), "http batch delivered");
                batch.clear();
                return;
            }
            Err(err) if !err.is_transient() => {
                warn!(error = %err, count = batch.len(), "dropping http batch");
                batch.clear();
                return;
            }
            Err(err) => {
                warn!(error = %err, retry_in = ?backoff, "http delivery failed, will retry");
                if queue.is_closed() {
                    // Shutting down, one failed attempt is final.
                    warn!(count = batch.len(), "dropping http batch during shutdown");
                    batch.clear();
                    return;
                }
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

fn send(
    client: &reqwest::blocking::Client,
    config: &HttpExportConfig,
    batch: &[Observation],
) -> Result<(), ExportError> {
    let mut request = client.post(&config.url).json(&batch);
    for (name, value) in &config.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    match request.send() {
        Ok(response) if response.status().is_success() => Ok(()),
        Ok(response) if response.status().is_client_error() => Err(ExportError::Permanent(
            format!("collector answered {}", response.status()),
        )),
        Ok(response) => Err(ExportError::Transient(format!(
            "collector answered {}",
            response.status()
        ))),
        Err(err) => Err(ExportError::Transient(err.to_string())),
    }
}
