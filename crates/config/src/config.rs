//! Core configuration structures for docflow

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Service identity and logging
    #[serde(default)]
    pub service: ServiceConfig,

    /// Workflow store connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Grading and revision loop
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// HOLD keyword heuristic
    #[serde(default)]
    pub hold_detection: HoldDetectionSettings,

    /// Timeout cascade delays
    #[serde(default)]
    pub cascade: CascadeConfig,

    /// Refund percentages applied on auto-cancel
    #[serde(default)]
    pub refund: RefundConfig,

    /// Stuck-cascade sweeper
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Retry budget for events and timers
    #[serde(default)]
    pub effects: EffectsConfig,
}

/// Service identity and logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Environment type (local, staging, production)
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,
}

/// Environment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Staging,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://docflow.db?mode=rwc`
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Minimum grade that ends the revision loop
    #[serde(default = "default_passing_score")]
    pub passing_score: f64,

    /// Revision passes before manual review (1 to 3)
    #[serde(default = "default_max_revision_loops")]
    pub max_revision_loops: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldDetectionSettings {
    /// Terms counted by the free-text heuristic
    #[serde(default = "default_hold_keywords")]
    pub keywords: Vec<String>,

    /// Distinct matches needed for a heuristic HOLD
    #[serde(default = "default_min_keyword_matches")]
    pub min_keyword_matches: usize,

    /// Reason recorded when none is given
    #[serde(default = "default_hold_reason")]
    pub default_reason: String,
}

/// Cascade delays in hours, measured from the start of the waiting state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeConfig {
    #[serde(default = "default_hold_reminder_hours")]
    pub hold_reminder_hours: u64,

    #[serde(default = "default_hold_escalation_hours")]
    pub hold_escalation_hours: u64,

    #[serde(default = "default_hold_terminal_hours")]
    pub hold_terminal_hours: u64,

    #[serde(default = "default_external_review_timeout_hours")]
    pub external_review_timeout_hours: u64,

    #[serde(default = "default_final_approval_timeout_hours")]
    pub final_approval_timeout_hours: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundConfig {
    /// Percent of the paid amount refunded when an evidence-gap HOLD times out
    #[serde(default = "default_hold_timeout_refund_pct")]
    pub hold_timeout_refund_pct: u32,

    /// Percent refunded when final approval times out
    #[serde(default = "default_final_approval_refund_pct")]
    pub final_approval_refund_pct: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_recovery_interval_secs")]
    pub interval_secs: u64,

    /// Idle hours beyond a cascade's horizon before it counts as stuck
    #[serde(default = "default_safety_margin_hours")]
    pub safety_margin_hours: u64,

    #[serde(default = "default_recovery_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectsConfig {
    /// Attempts per effect, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

// Default value functions
fn default_service_name() -> String {
    "docflow".to_string()
}

fn default_environment() -> Environment {
    Environment::Local
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_passing_score() -> f64 {
    87.0
}

fn default_max_revision_loops() -> u8 {
    3
}

fn default_hold_keywords() -> Vec<String> {
    [
        "missing evidence",
        "insufficient evidence",
        "additional documents",
        "awaiting client",
        "cannot proceed",
        "unable to verify",
        "incomplete record",
        "requires clarification",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_min_keyword_matches() -> usize {
    2
}

fn default_hold_reason() -> String {
    "evidence_gap".to_string()
}

fn default_hold_reminder_hours() -> u64 {
    24
}

fn default_hold_escalation_hours() -> u64 {
    72
}

fn default_hold_terminal_hours() -> u64 {
    7 * 24
}

fn default_external_review_timeout_hours() -> u64 {
    7 * 24
}

fn default_final_approval_timeout_hours() -> u64 {
    21 * 24
}

fn default_hold_timeout_refund_pct() -> u32 {
    100
}

fn default_final_approval_refund_pct() -> u32 {
    50
}

fn default_recovery_interval_secs() -> u64 {
    3600
}

fn default_safety_margin_hours() -> u64 {
    24
}

fn default_recovery_batch_size() -> usize {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            passing_score: default_passing_score(),
            max_revision_loops: default_max_revision_loops(),
        }
    }
}

impl Default for HoldDetectionSettings {
    fn default() -> Self {
        Self {
            keywords: default_hold_keywords(),
            min_keyword_matches: default_min_keyword_matches(),
            default_reason: default_hold_reason(),
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            hold_reminder_hours: default_hold_reminder_hours(),
            hold_escalation_hours: default_hold_escalation_hours(),
            hold_terminal_hours: default_hold_terminal_hours(),
            external_review_timeout_hours: default_external_review_timeout_hours(),
            final_approval_timeout_hours: default_final_approval_timeout_hours(),
        }
    }
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            hold_timeout_refund_pct: default_hold_timeout_refund_pct(),
            final_approval_refund_pct: default_final_approval_refund_pct(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_recovery_interval_secs(),
            safety_margin_hours: default_safety_margin_hours(),
            batch_size: default_recovery_batch_size(),
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
