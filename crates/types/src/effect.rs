use serde::{Deserialize, Serialize};

use crate::cascade::{CancelKey, TimeoutCascadeEntry};
use crate::event::WorkflowEvent;

/// A side effect produced by a workflow step, executed later by the effect runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingEffect {
    Emit(WorkflowEvent),
    Schedule(TimeoutCascadeEntry),
    CancelScheduled(CancelKey),
}

impl PendingEffect {
    /// Short label for logs
    pub fn describe(&self) -> String {
        match self {
            PendingEffect::Emit(event) => format!("emit {}", event.name),
            PendingEffect::Schedule(entry) => {
                format!("schedule {} for {}", entry.step, entry.order_id)
            }
            PendingEffect::CancelScheduled(key) => format!("cancel cascade {key}"),
        }
    }
}

/// Effects accumulated by one step, in execution order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectList {
    effects: Vec<PendingEffect>,
}

impl EffectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: PendingEffect) {
        self.effects.push(effect);
    }

    pub fn emit(&mut self, event: WorkflowEvent) {
        self.effects.push(PendingEffect::Emit(event));
    }

    pub fn cancel(&mut self, key: CancelKey) {
        self.effects.push(PendingEffect::CancelScheduled(key));
    }

    /// Replace any pending steps for `key` with a fresh schedule
    pub fn start_cascade(&mut self, key: CancelKey, entries: Vec<TimeoutCascadeEntry>) {
        self.effects.push(PendingEffect::CancelScheduled(key));
        self.effects
            .extend(entries.into_iter().map(PendingEffect::Schedule));
    }

    pub fn extend(&mut self, other: EffectList) {
        self.effects.extend(other.effects);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEffect> {
        self.effects.iter()
    }

    pub fn into_vec(self) -> Vec<PendingEffect> {
        self.effects
    }
}

impl From<Vec<PendingEffect>> for EffectList {
    fn from(effects: Vec<PendingEffect>) -> Self {
        Self { effects }
    }
}
