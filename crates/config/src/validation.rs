//! Checks that keep a loaded [`AppConfig`] inside the engine's limits

use crate::{AppConfig, CascadeConfig, ConfigError, Result};

/// One failed check, keyed by dotted field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Reject the config if any check fails, listing every failure
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let errors = collect_validation_errors(config);

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Every problem found in `config`, in section order
pub fn collect_validation_errors(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Service
    if let Err(e) = validate_log_level(&config.service.log_level) {
        errors.push(e);
    }

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "service name is required"));
    }

    // Database
    if config.database.url.is_empty() {
        errors.push(ValidationError::new("database.url", "database URL is required"));
    } else if !config.database.url.starts_with("sqlite:") {
        errors.push(ValidationError::new(
            "database.url",
            "only sqlite: URLs are supported",
        ));
    }

    if config.database.max_connections == 0 {
        errors.push(ValidationError::new(
            "database.max_connections",
            "must be greater than 0",
        ));
    }

    // Workflow
    if !(0.0..=100.0).contains(&config.workflow.passing_score) {
        errors.push(ValidationError::new(
            "workflow.passing_score",
            "must be between 0 and 100",
        ));
    }

    if !(1..=3).contains(&config.workflow.max_revision_loops) {
        errors.push(ValidationError::new(
            "workflow.max_revision_loops",
            "must be between 1 and 3",
        ));
    }

    // HOLD detection
    if config.hold_detection.min_keyword_matches == 0 {
        errors.push(ValidationError::new(
            "hold_detection.min_keyword_matches",
            "must be at least 1",
        ));
    }

    for (idx, keyword) in config.hold_detection.keywords.iter().enumerate() {
        if keyword.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("hold_detection.keywords[{idx}]"),
                "keyword cannot be empty",
            ));
        }
    }

    if let Err(e) = validate_hold_reason(&config.hold_detection.default_reason) {
        errors.push(e);
    }

    // Cascade
    errors.extend(validate_cascade(&config.cascade));

    // Refunds
    if config.refund.hold_timeout_refund_pct > 100 {
        errors.push(ValidationError::new(
            "refund.hold_timeout_refund_pct",
            "must be <= 100",
        ));
    }

    if config.refund.final_approval_refund_pct > 100 {
        errors.push(ValidationError::new(
            "refund.final_approval_refund_pct",
            "must be <= 100",
        ));
    }

    // Recovery
    if config.recovery.interval_secs == 0 {
        errors.push(ValidationError::new(
            "recovery.interval_secs",
            "must be greater than 0",
        ));
    }

    if config.recovery.batch_size == 0 {
        errors.push(ValidationError::new(
            "recovery.batch_size",
            "must be greater than 0",
        ));
    }

    // Effects
    if config.effects.max_attempts == 0 {
        errors.push(ValidationError::new(
            "effects.max_attempts",
            "must be at least 1",
        ));
    }

    if config.effects.initial_delay_ms > config.effects.max_delay_ms {
        errors.push(ValidationError::new(
            "effects.initial_delay_ms",
            "must not exceed effects.max_delay_ms",
        ));
    }

    errors
}

/// Validate cascade delays
///
/// HOLD steps must fire in order: reminder, escalation, terminal.
pub fn validate_cascade(cascade: &CascadeConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let delays = [
        ("cascade.hold_reminder_hours", cascade.hold_reminder_hours),
        ("cascade.hold_escalation_hours", cascade.hold_escalation_hours),
        ("cascade.hold_terminal_hours", cascade.hold_terminal_hours),
        (
            "cascade.external_review_timeout_hours",
            cascade.external_review_timeout_hours,
        ),
        (
            "cascade.final_approval_timeout_hours",
            cascade.final_approval_timeout_hours,
        ),
    ];
    for (field, hours) in delays {
        if hours == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if cascade.hold_reminder_hours >= cascade.hold_escalation_hours {
        errors.push(ValidationError::new(
            "cascade.hold_escalation_hours",
            "must be later than the reminder",
        ));
    }

    if cascade.hold_escalation_hours >= cascade.hold_terminal_hours {
        errors.push(ValidationError::new(
            "cascade.hold_terminal_hours",
            "must be later than the escalation",
        ));
    }

    errors
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "service.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

fn validate_hold_reason(reason: &str) -> std::result::Result<(), ValidationError> {
    let valid = !reason.is_empty()
        && reason
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new(
            "hold_detection.default_reason",
            format!("hold reason '{reason}' must be a non-empty snake_case tag"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServiceConfig, WorkflowConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AppConfig {
            service: ServiceConfig {
                log_level: "invalid".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let errors = collect_validation_errors(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "service.log_level");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_revision_loops_capped_at_three() {
        for loops in [0u8, 4] {
            let config = AppConfig {
                workflow: WorkflowConfig {
                    max_revision_loops: loops,
                    ..Default::default()
                },
                ..Default::default()
            };
            let errors = collect_validation_errors(&config);
            assert!(errors
                .iter()
                .any(|e| e.field == "workflow.max_revision_loops"));
        }
    }

    #[test]
    fn test_cascade_order_enforced() {
        let cascade = CascadeConfig {
            hold_reminder_hours: 80,
            hold_escalation_hours: 72,
            ..Default::default()
        };
        let errors = validate_cascade(&cascade);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "cascade.hold_escalation_hours");

        let cascade = CascadeConfig {
            external_review_timeout_hours: 0,
            ..Default::default()
        };
        assert_eq!(validate_cascade(&cascade).len(), 1);
    }

    #[test]
    fn test_errors_are_collected_not_short_circuited() {
        let mut config = AppConfig::default();
        config.refund.final_approval_refund_pct = 150;
        config.recovery.batch_size = 0;
        config.effects.initial_delay_ms = 10_000;
        config.hold_detection.default_reason = "Evidence Gap".to_string();

        let fields: Vec<_> = collect_validation_errors(&config)
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "hold_detection.default_reason",
                "refund.final_approval_refund_pct",
                "recovery.batch_size",
                "effects.initial_delay_ms",
            ]
        );
    }

    #[test]
    fn test_non_sqlite_url_rejected() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/docflow".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("database.url"));
    }
}
