use crate::config::model::MqttExportConfig;
use crate::messages::readings::Observation;
use crate::utils::queue::BoundedQueue;
use rumqttc::{Client, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Consumer poll interval.
const POLL: Duration = Duration::from_millis(200);
/// First reconnect delay after the broker drops us.
const BACKOFF_START: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Broker keep alive.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Build the topic for one observation: `{camera_id}` is always
/// substituted, `{meter_id}` and `{indicator_id}` both map to the
/// source id so one template serves either kind.
pub(crate) fn topic_for(template: &str, observation: &Observation) -> String {
    template
        .replace("{camera_id}", observation.camera_id())
        .replace("{meter_id}", observation.source_id())
        .replace("{indicator_id}", observation.source_id())
}

/// Map the configured QoS level onto the protocol enum.
pub(crate) fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Consume the sink queue and publish one message per reading. The
/// connection is driven on a companion thread that keeps polling the
/// event loop; rumqttc reconnects on its own as long as it is polled,
/// with our backoff inserted between failed rounds.
pub(crate) fn run(config: MqttExportConfig, queue: Arc<BoundedQueue<Observation>>) {
    let client_id = format!("ctme-{}", Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, config.broker.clone(), config.port);
    options.set_keep_alive(KEEP_ALIVE);
    if let Some(credentials) = &config.credentials {
        options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }
    let (client, mut connection) = Client::new(options, 100);

    let stop = Arc::new(AtomicBool::new(false));
    let driver_stop = stop.clone();
    let driver = std::thread::spawn(move || {
        let mut backoff = BACKOFF_START;
        for event in connection.iter() {
            if driver_stop.load(Ordering::Relaxed) {
                break;
            }
            match event {
                Ok(_) => backoff = BACKOFF_START,
                Err(error) => {
                    warn!(%error, retry_in = ?backoff, "broker connection lost");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    });

    let qos = qos_from(config.qos);
    loop {
        match queue.recv_timeout(POLL) {
            Some(observation) => {
                let topic = topic_for(&config.topic_template, &observation);
                match serde_json::to_vec(&observation) {
                    Ok(payload) => {
                        // try_publish never blocks; when the request
                        // channel is full the message is dropped, the
                        // bounded sink queue is our pending buffer.
                        if let Err(error) = client.try_publish(topic.clone(), qos, false, payload) {
                            warn!(%error, %topic, "dropping mqtt message");
                        } else {
                            debug!(%topic, "mqtt message queued");
                        }
                    }
                    Err(error) => warn!(%error, "failed to serialise observation"),
                }
            }
            None => {
                if queue.is_closed() && queue.is_empty() {
                    break;
                }
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    let _ = client.disconnect();
    // The driver wakes on the disconnect event and sees the stop flag.
    let _ = driver.join();
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::messages::readings::{IndicatorReading, Reading};
    use chrono::Utc;
    use rstest::rstest;

    fn meter_observation() -> Observation {
        Observation::Meter(Reading {
            camera_id: "cam-01".to_string(),
            meter_id: "meter-01".to_string(),
            value: Some(12.34),
            raw_text: "1234".to_string(),
            unit: "kPa".to_string(),
            confidence: 0.95,
            timestamp: Utc::now(),
        })
    }

    fn indicator_observation() -> Observation {
        Observation::Indicator(IndicatorReading {
            camera_id: "cam-01".to_string(),
            indicator_id: "fire-west".to_string(),
            state: true,
            score: 182.4,
            timestamp: Utc::now(),
        })
    }

    #[rstest]
    #[case("ctme/{camera_id}/{meter_id}", "ctme/cam-01/meter-01")]
    #[case("plant/{camera_id}", "plant/cam-01")]
    #[case("{meter_id}", "meter-01")]
    fn test_topic_for_meters(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(topic_for(template, &meter_observation()), expected);
    }

    #[rstest]
    #[case("ctme/{camera_id}/{indicator_id}", "ctme/cam-01/fire-west")]
    // A meter oriented template still lands on the indicator id.
    #[case("ctme/{camera_id}/{meter_id}", "ctme/cam-01/fire-west")]
    fn test_topic_for_indicators(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(topic_for(template, &indicator_observation()), expected);
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from(0), QoS::AtMostOnce);
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
    }

    #[cfg_attr(not(feature = "hardware_test"), ignore)]
    #[test]
    /// Publish against a live broker. Point CTME_TEST_MQTT_BROKER at
    /// one (host:port) before enabling the hardware tests.
    fn test_publish_against_live_broker() {
        let broker = std::env::var("CTME_TEST_MQTT_BROKER")
            .expect("CTME_TEST_MQTT_BROKER must be set for hardware tests");
        let (host, port) = broker.split_once(':').expect("expected host:port");
        let config = MqttExportConfig {
            enabled: true,
            broker: host.to_string(),
            port: port.parse().expect("invalid port"),
            ..MqttExportConfig::default()
        };
        let queue = Arc::new(BoundedQueue::new(16));
        queue.push(meter_observation());
        queue.push(indicator_observation());
        queue.close();
        run(config, queue);
    }
}
