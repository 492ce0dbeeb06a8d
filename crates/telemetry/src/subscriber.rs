use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{field::Visit, Event, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Filter used when neither `RUST_LOG` nor a level is configured
pub const DEFAULT_FILTER: &str = "info,docflow=debug";

/// Output settings for the global subscriber
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directive string, e.g. `info` or `warn,docflow_cascade=debug`
    pub level: Option<String>,
    /// One JSON object per line instead of human-readable text
    pub json: bool,
}

impl LoggingSettings {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// `RUST_LOG` wins, then the configured level, then [`DEFAULT_FILTER`]
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| match &self.level {
            Some(level) => EnvFilter::try_new(level)
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
            None => EnvFilter::new(DEFAULT_FILTER),
        })
    }
}

/// Initialize the global tracing subscriber
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), TracingError> {
    install(settings, None)
}

/// Initialize tracing and count CRITICAL events into `alerts`
pub fn init_tracing_with_alerts(
    settings: &LoggingSettings,
    alerts: Arc<CriticalEvents>,
) -> Result<(), TracingError> {
    install(settings, Some(CriticalEventLayer::new(alerts)))
}

fn install(
    settings: &LoggingSettings,
    alerts: Option<CriticalEventLayer>,
) -> Result<(), TracingError> {
    let json_layer = settings.json.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .json()
    });
    let text_layer = (!settings.json).then(|| fmt::layer().with_target(true).with_level(true));

    tracing_subscriber::registry()
        .with(settings.env_filter())
        .with(json_layer)
        .with(text_layer)
        .with(alerts)
        .try_init()
        .map_err(|e| TracingError::InitError(e.to_string()))?;

    Ok(())
}

/// Running tally of events logged with `severity = "CRITICAL"`
#[derive(Debug, Default)]
pub struct CriticalEvents {
    count: AtomicU64,
    last_message: Mutex<Option<String>>,
}

impl CriticalEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    fn record(&self, message: Option<String>) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_message.lock() {
            *last = message;
        }
    }
}

/// Tracing layer that tallies CRITICAL events
pub struct CriticalEventLayer {
    alerts: Arc<CriticalEvents>,
}

impl CriticalEventLayer {
    pub fn new(alerts: Arc<CriticalEvents>) -> Self {
        Self { alerts }
    }
}

impl<S> Layer<S> for CriticalEventLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = SeverityVisitor::default();
        event.record(&mut visitor);

        if visitor.critical {
            self.alerts.record(visitor.message);
        }
    }
}

/// Pulls `severity` and `message` out of an event
#[derive(Default)]
struct SeverityVisitor {
    critical: bool,
    message: Option<String>,
}

impl Visit for SeverityVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{value:?}")),
            "severity" => self.critical = format!("{value:?}").trim_matches('"') == "CRITICAL",
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "severity" => self.critical = value == "CRITICAL",
            _ => {}
        }
    }
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn test_critical_events_are_counted() {
        let alerts = Arc::new(CriticalEvents::new());
        let subscriber = Registry::default().with(CriticalEventLayer::new(alerts.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(severity = "CRITICAL", order_id = "order-1", "Phase gate violation");
            tracing::error!(order_id = "order-1", "Phase failed");
            tracing::warn!(severity = "HIGH", "Escalated");
        });

        assert_eq!(alerts.count(), 1);
        assert_eq!(alerts.last_message().as_deref(), Some("Phase gate violation"));
    }

    #[test]
    fn test_settings_builder() {
        let settings = LoggingSettings::default()
            .with_level("warn,docflow_cascade=debug")
            .with_json(true);
        assert_eq!(settings.level.as_deref(), Some("warn,docflow_cascade=debug"));
        assert!(settings.json);
    }

    #[test]
    fn test_second_init_fails() {
        let settings = LoggingSettings::default().with_level("error");
        // Another test may already have installed one; the second call fails either way
        let _ = init_tracing(&settings);
        assert!(matches!(
            init_tracing(&settings),
            Err(TracingError::InitError(_))
        ));
    }
}
