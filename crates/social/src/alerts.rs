//! Operator alerting for conditions that need a human
//!
//! Credential expiry is the main customer: sync stops silently otherwise.

use log::{error, warn};

/// Sink for operator-facing alerts
pub trait AlertSink: Send + Sync {
    /// Raise an alert. Must not block sync for long and must not fail the
    /// operation that raised it.
    fn alert(&self, summary: &str, detail: &str);
}

/// Alert sink that writes to the application log
#[derive(Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, summary: &str, detail: &str) {
        error!("ALERT: {summary}: {detail}");
    }
}

/// Alert sink that POSTs a JSON payload to an operator webhook
pub struct WebhookAlertSink {
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl AlertSink for WebhookAlertSink {
    fn alert(&self, summary: &str, detail: &str) {
        let result = ureq::post(&self.url).send_json(serde_json::json!({
            "summary": summary,
            "detail": detail,
        }));
        if let Err(e) = result {
            // Alert delivery is fire-and-forget; the log is the fallback
            warn!("Alert webhook failed ({summary}): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures alerts for assertions
    #[derive(Default)]
    pub struct RecordingAlertSink {
        pub alerts: Mutex<Vec<(String, String)>>,
    }

    impl AlertSink for RecordingAlertSink {
        fn alert(&self, summary: &str, detail: &str) {
            self.alerts
                .lock()
                .unwrap()
                .push((summary.to_string(), detail.to_string()));
        }
    }

    #[test]
    fn test_log_sink_does_not_panic() {
        LogAlertSink.alert("credential expired", "connection c1");
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingAlertSink::default();
        sink.alert("a", "b");
        assert_eq!(sink.alerts.lock().unwrap().len(), 1);
    }
}
