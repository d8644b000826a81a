//! Buffered telemetry writer.
//!
//! Publishers append encoded lines to a shared buffer; a single writer
//! task drains the buffer to the time-series endpoint over persistent
//! HTTPS with token auth. A failed write is logged and the pipeline
//! continues; nothing here may ever stall trading.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, trace};

use crate::config::TelemetryConfig;
use crate::stats::line::Measurement;

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

struct PublisherShared {
    buffer: Mutex<String>,
    notify: Notify,
    instance_id: String,
}

/// Cheap-to-clone telemetry handle. Each component scopes its own copy
/// with a publisher name, which is attached to every measurement.
#[derive(Clone)]
pub struct StatsPublisher {
    shared: Option<Arc<PublisherShared>>,
    publisher: &'static str,
}

impl StatsPublisher {
    /// Spawn the writer task for the configured endpoint.
    pub fn spawn(config: &TelemetryConfig) -> Self {
        let shared = Arc::new(PublisherShared {
            buffer: Mutex::new(String::new()),
            notify: Notify::new(),
            instance_id: format!("{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)),
        });

        tokio::spawn(run_writer(shared.clone(), config.clone()));

        Self {
            shared: Some(shared),
            publisher: "engine",
        }
    }

    /// Telemetry disabled: every publish is a no-op. Used when no endpoint
    /// is configured and in tests.
    pub fn disabled() -> Self {
        Self {
            shared: None,
            publisher: "engine",
        }
    }

    /// A handle that tags measurements with `publisher=<name>`.
    pub fn scoped(&self, publisher: &'static str) -> Self {
        Self {
            shared: self.shared.clone(),
            publisher,
        }
    }

    pub fn publish(&self, measurement: Measurement) {
        self.publish_batch(std::slice::from_ref(&measurement));
    }

    /// Encode measurements at one timestamp and queue them for the writer.
    pub fn publish_batch(&self, measurements: &[Measurement]) {
        let Some(shared) = &self.shared else {
            return;
        };
        if measurements.is_empty() {
            return;
        }

        let timestamp_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let mut buffer = shared.buffer.lock();
        for measurement in measurements {
            let mut tagged = measurement.clone();
            tagged
                .tags
                .push(("instance_id".into(), shared.instance_id.clone()));
            tagged
                .tags
                .push(("publisher".into(), self.publisher.into()));

            let start = buffer.len();
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            if !tagged.encode(timestamp_ns, &mut buffer) {
                debug!(measurement = %measurement.name, "Skipping field-less measurement");
                buffer.truncate(start);
            }
        }
        drop(buffer);
        shared.notify.notify_one();
    }
}

async fn run_writer(shared: Arc<PublisherShared>, config: TelemetryConfig) {
    let client = match reqwest::Client::builder()
        .timeout(WRITE_TIMEOUT)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Telemetry writer failed to start");
            return;
        }
    };

    let url = format!(
        "{}/api/v2/write?bucket={}&org={}&precision=ns",
        config.url.trim_end_matches('/'),
        config.bucket,
        config.org
    );

    loop {
        shared.notify.notified().await;

        loop {
            let body = {
                let mut buffer = shared.buffer.lock();
                if buffer.is_empty() {
                    break;
                }
                std::mem::take(&mut *buffer)
            };

            let response = client
                .post(&url)
                .header("Authorization", format!("Token {}", config.token))
                .body(body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().as_u16() == 204 => {
                    trace!("Telemetry write acknowledged");
                }
                Ok(response) => {
                    error!(status = %response.status(), "Unexpected telemetry response");
                }
                Err(e) => {
                    // Reconnection is the HTTP client's concern; the batch
                    // that failed is dropped rather than replayed.
                    error!(error = %e, "Telemetry write failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::line::FieldValue;

    #[test]
    fn disabled_publisher_ignores_everything() {
        let publisher = StatsPublisher::disabled();
        publisher.publish(Measurement {
            name: "m".into(),
            tags: vec![],
            fields: vec![("v".into(), FieldValue::U64(1))],
        });
        // No shared buffer to inspect; the point is it must not panic.
        assert!(publisher.shared.is_none());
    }

    #[tokio::test]
    async fn measurements_are_joined_by_newline() {
        let shared = Arc::new(PublisherShared {
            buffer: Mutex::new(String::new()),
            notify: Notify::new(),
            instance_id: "1".into(),
        });
        let publisher = StatsPublisher {
            shared: Some(shared.clone()),
            publisher: "test",
        };

        let measurement = Measurement {
            name: "m".into(),
            tags: vec![],
            fields: vec![("v".into(), FieldValue::U64(1))],
        };
        publisher.publish_batch(&[measurement.clone(), measurement]);

        let buffer = shared.buffer.lock();
        let lines: Vec<&str> = buffer.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert!(line.starts_with("m,instance_id=1,publisher=test v=1 "));
        }
    }

    #[tokio::test]
    async fn fieldless_measurement_leaves_buffer_clean() {
        let shared = Arc::new(PublisherShared {
            buffer: Mutex::new(String::new()),
            notify: Notify::new(),
            instance_id: "1".into(),
        });
        let publisher = StatsPublisher {
            shared: Some(shared.clone()),
            publisher: "test",
        };

        publisher.publish(Measurement {
            name: "empty".into(),
            tags: vec![],
            fields: vec![],
        });
        assert!(shared.buffer.lock().is_empty());
    }
}
