//! HOLD detection over the analysis output.
//!
//! Detection runs as an ordered fallback chain and records which link fired:
//!
//! 1. the structured `hold_required` / `hold_reason` signal,
//! 2. differently-cased aliases of that signal,
//! 3. a keyword-density heuristic over the free text, consulted only when
//!    neither structured form is present.
//!
//! An explicit `false` at links 1 or 2 ends the chain without a HOLD.

use docflow_types::{HoldDetectionLink, HoldReason};
use serde_json::Value;
use tracing::info;

const SIGNAL_KEY: &str = "hold_required";
const REASON_KEY: &str = "hold_reason";

/// (signal key, reason key) pairs accepted at the alias link
const ALIASES: [(&str, &str); 3] = [
    ("holdRequired", "holdReason"),
    ("HoldRequired", "HoldReason"),
    ("HOLD_REQUIRED", "HOLD_REASON"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct HoldDetectionConfig {
    /// Terms whose co-occurrence in free text suggests missing evidence
    pub keywords: Vec<String>,
    /// Distinct keyword matches needed to trigger a heuristic HOLD
    pub min_keyword_matches: usize,
    /// Reason used when a signal carries none, and for heuristic HOLDs
    pub default_reason: HoldReason,
}

impl Default for HoldDetectionConfig {
    fn default() -> Self {
        Self {
            keywords: [
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
            .collect(),
            min_keyword_matches: 2,
            default_reason: HoldReason::EvidenceGap,
        }
    }
}

impl HoldDetectionConfig {
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_min_keyword_matches(mut self, min: usize) -> Self {
        self.min_keyword_matches = min;
        self
    }
}

/// A detected HOLD together with the chain link that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct HoldDecision {
    pub reason: HoldReason,
    pub link: HoldDetectionLink,
}

/// Outcome of a structured link
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The link's keys are not present
    Absent,
    /// The link explicitly says no HOLD
    Clear,
    Hold(HoldDecision),
}

pub struct HoldDetector {
    config: HoldDetectionConfig,
}

impl HoldDetector {
    pub fn new(config: HoldDetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HoldDetectionConfig {
        &self.config
    }

    /// Run the chain
    pub fn detect(&self, output: &Value) -> Option<HoldDecision> {
        match self.structured_signal(output) {
            Signal::Hold(decision) => return Some(decision),
            Signal::Clear => return None,
            Signal::Absent => {}
        }

        match self.cased_alias(output) {
            Signal::Hold(decision) => return Some(decision),
            Signal::Clear => return None,
            Signal::Absent => {}
        }

        self.keyword_heuristic(output)
    }

    pub fn structured_signal(&self, output: &Value) -> Signal {
        match read_flag(output, SIGNAL_KEY) {
            None => Signal::Absent,
            Some(false) => Signal::Clear,
            Some(true) => Signal::Hold(HoldDecision {
                reason: self.reason_from(output, REASON_KEY),
                link: HoldDetectionLink::StructuredSignal,
            }),
        }
    }

    pub fn cased_alias(&self, output: &Value) -> Signal {
        for (signal_key, reason_key) in ALIASES {
            match read_flag(output, signal_key) {
                None => continue,
                Some(false) => return Signal::Clear,
                Some(true) => {
                    return Signal::Hold(HoldDecision {
                        reason: self.reason_from(output, reason_key),
                        link: HoldDetectionLink::CasedAlias {
                            key: signal_key.to_string(),
                        },
                    })
                }
            }
        }
        Signal::Absent
    }

    pub fn keyword_heuristic(&self, output: &Value) -> Option<HoldDecision> {
        let mut text = String::new();
        collect_text(output, &mut text);
        let text = text.to_lowercase();

        let matched_terms: Vec<String> = self
            .config
            .keywords
            .iter()
            .filter(|term| !term.is_empty() && text.contains(&term.to_lowercase()))
            .cloned()
            .collect();

        if matched_terms.is_empty() || matched_terms.len() < self.config.min_keyword_matches {
            return None;
        }

        // Separate target so the threshold can be tuned against false positives
        info!(
            target: "docflow::hold::heuristic",
            matched = matched_terms.len(),
            threshold = self.config.min_keyword_matches,
            terms = ?matched_terms,
            "Heuristic HOLD triggered"
        );

        Some(HoldDecision {
            reason: self.config.default_reason.clone(),
            link: HoldDetectionLink::KeywordHeuristic { matched_terms },
        })
    }

    fn reason_from(&self, output: &Value, key: &str) -> HoldReason {
        output
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(HoldReason::parse)
            .unwrap_or_else(|| self.config.default_reason.clone())
    }
}

impl Default for HoldDetector {
    fn default() -> Self {
        Self::new(HoldDetectionConfig::default())
    }
}

/// Accepts JSON booleans and the strings "true"/"false"
fn read_flag(output: &Value, key: &str) -> Option<bool> {
    match output.get(key)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        Value::Object(fields) => fields.values().for_each(|field| collect_text(field, out)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
