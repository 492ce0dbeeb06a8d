//! Wiring from [`AppConfig`] to a running [`WorkflowEngine`]

use anyhow::{Context, Result};
use chrono::Duration;
use docflow_cascade::{PaymentGateway, StandardRefundPolicy, SweeperConfig};
use docflow_config::{
    validate_config, AppConfig, CascadeConfig, ConfigLoader, DatabaseConfig, EffectsConfig,
    HoldDetectionSettings, RecoveryConfig, RefundConfig, ServiceConfig, ENV_PREFIX,
};
use docflow_effects::{InMemoryEventBus, RetryPolicy};
use docflow_orchestrator::{HoldDetectionConfig, OrchestratorConfig, PhaseExecutor};
use docflow_store::{SqliteStore, WorkflowStore};
use docflow_telemetry::LoggingSettings;
use docflow_types::{CascadeTimings, Clock, HoldReason};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::engine::WorkflowEngine;

/// Longest delay accepted from config
const MAX_DELAY_HOURS: u64 = 24 * 365 * 10;

/// Load and validate configuration.
///
/// With a path, the file is the base and `DOCFLOW_*` variables override it;
/// without one, only the environment and built-in defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => ConfigLoader::from_file_with_env(path, ENV_PREFIX)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => ConfigLoader::from_env().context("Failed to load config from environment")?,
    };

    validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

pub fn logging_settings(service: &ServiceConfig) -> LoggingSettings {
    LoggingSettings::default()
        .with_level(service.log_level.clone())
        .with_json(service.log_json)
}

fn hours(value: u64) -> Duration {
    Duration::hours(value.min(MAX_DELAY_HOURS) as i64)
}

pub fn cascade_timings(cascade: &CascadeConfig) -> CascadeTimings {
    CascadeTimings {
        hold_reminder: hours(cascade.hold_reminder_hours),
        hold_escalation: hours(cascade.hold_escalation_hours),
        hold_terminal: hours(cascade.hold_terminal_hours),
        external_review_timeout: hours(cascade.external_review_timeout_hours),
        final_approval_timeout: hours(cascade.final_approval_timeout_hours),
    }
}

pub fn orchestrator_config(config: &AppConfig) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_passing_score(config.workflow.passing_score)
        .with_max_revision_loops(config.workflow.max_revision_loops)
        .with_cascade_timings(cascade_timings(&config.cascade))
}

pub fn hold_detection(settings: &HoldDetectionSettings) -> HoldDetectionConfig {
    HoldDetectionConfig {
        default_reason: HoldReason::parse(&settings.default_reason),
        ..HoldDetectionConfig::default()
    }
    .with_keywords(settings.keywords.clone())
    .with_min_keyword_matches(settings.min_keyword_matches)
}

pub fn refund_policy(refund: &RefundConfig) -> StandardRefundPolicy {
    StandardRefundPolicy::default()
        .with_hold_timeout_pct(Decimal::from(refund.hold_timeout_refund_pct))
        .with_final_approval_pct(Decimal::from(refund.final_approval_refund_pct))
}

pub fn retry_policy(effects: &EffectsConfig) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(effects.max_attempts)
        .with_delays(
            std::time::Duration::from_millis(effects.initial_delay_ms),
            std::time::Duration::from_millis(effects.max_delay_ms),
        )
}

pub fn sweeper_config(recovery: &RecoveryConfig) -> SweeperConfig {
    SweeperConfig::default()
        .with_safety_margin(hours(recovery.safety_margin_hours))
        .with_batch_size(recovery.batch_size)
}

/// Open the configured store and apply migrations
pub async fn open_store(database: &DatabaseConfig) -> Result<Arc<dyn WorkflowStore>> {
    let store = if database.url == "sqlite::memory:" {
        SqliteStore::in_memory().await
    } else {
        SqliteStore::connect(&database.url, database.max_connections).await
    }
    .with_context(|| format!("Failed to open store at {}", database.url))?;

    Ok(Arc::new(store))
}

/// Host-provided collaborators the config cannot describe
pub struct Collaborators {
    pub executor: Arc<dyn PhaseExecutor>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub bus: Arc<InMemoryEventBus>,
    pub clock: Arc<dyn Clock>,
}

/// Build an engine from validated configuration
pub async fn build_engine(config: &AppConfig, collaborators: Collaborators) -> Result<WorkflowEngine> {
    let store = open_store(&config.database).await?;

    let engine = WorkflowEngine::builder()
        .with_store(store)
        .with_executor(collaborators.executor)
        .with_in_memory_bus(collaborators.bus)
        .with_payment_gateway(collaborators.gateway)
        .with_refund_policy(Arc::new(refund_policy(&config.refund)))
        .with_clock(collaborators.clock)
        .with_config(orchestrator_config(config))
        .with_hold_detection(hold_detection(&config.hold_detection))
        .with_retry_policy(retry_policy(&config.effects))
        .with_sweeper_config(sweeper_config(&config.recovery))
        .build()
        .context("Failed to assemble workflow engine")?;

    info!(
        service = %config.service.name,
        environment = ?config.service.environment,
        database = %config.database.url,
        "Workflow engine ready"
    );
    Ok(engine)
}

/// Start the recovery sweeper in the background, if enabled
pub fn spawn_sweeper(
    engine: Arc<WorkflowEngine>,
    recovery: &RecoveryConfig,
    shutdown: broadcast::Receiver<()>,
) -> Option<JoinHandle<()>> {
    if !recovery.enabled {
        info!("Recovery sweeper disabled");
        return None;
    }

    let interval = std::time::Duration::from_secs(recovery.interval_secs.max(1));
    Some(tokio::spawn(async move {
        engine.run_sweeper(interval, shutdown).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_component_defaults() {
        let config = AppConfig::default();

        assert_eq!(cascade_timings(&config.cascade), CascadeTimings::default());
        assert_eq!(orchestrator_config(&config), OrchestratorConfig::default());
        assert_eq!(hold_detection(&config.hold_detection), HoldDetectionConfig::default());
        assert_eq!(refund_policy(&config.refund), StandardRefundPolicy::default());
        assert_eq!(retry_policy(&config.effects), RetryPolicy::default());
        assert_eq!(sweeper_config(&config.recovery), SweeperConfig::default());
    }

    #[test]
    fn test_custom_values_flow_through() {
        let mut config = AppConfig::default();
        config.workflow.max_revision_loops = 2;
        config.cascade.hold_terminal_hours = 96;
        config.refund.final_approval_refund_pct = 30;
        config.hold_detection.default_reason = "revision_stall".to_string();
        config.hold_detection.min_keyword_matches = 3;

        let orchestrator = orchestrator_config(&config);
        assert_eq!(orchestrator.max_revision_loops, 2);
        assert_eq!(orchestrator.cascade.hold_terminal, Duration::hours(96));

        assert_eq!(
            refund_policy(&config.refund).final_approval_pct,
            Decimal::from(30)
        );

        let hold = hold_detection(&config.hold_detection);
        assert_eq!(hold.default_reason, HoldReason::RevisionStall);
        assert_eq!(hold.min_keyword_matches, 3);
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[workflow]\nmax_revision_loops = 9").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("workflow.max_revision_loops"));
    }

    #[tokio::test]
    async fn test_open_in_memory_store() {
        let store = open_store(&DatabaseConfig::default()).await.unwrap();
        assert!(store.get_order("missing").await.unwrap().is_none());
    }
}
