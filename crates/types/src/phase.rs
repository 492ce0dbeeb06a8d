use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::order::Tier;

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Intake,
    Analysis,
    Research,
    Drafting,
    CitationVerify,
    OppositionAnalysis,
    Grading,
    Revision,
    ReferenceRecheck,
    FinalAssembly,
    Delivery,
}

impl PhaseId {
    pub const ALL: [PhaseId; 11] = [
        PhaseId::Intake,
        PhaseId::Analysis,
        PhaseId::Research,
        PhaseId::Drafting,
        PhaseId::CitationVerify,
        PhaseId::OppositionAnalysis,
        PhaseId::Grading,
        PhaseId::Revision,
        PhaseId::ReferenceRecheck,
        PhaseId::FinalAssembly,
        PhaseId::Delivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseId::Intake => "intake",
            PhaseId::Analysis => "analysis",
            PhaseId::Research => "research",
            PhaseId::Drafting => "drafting",
            PhaseId::CitationVerify => "citation_verify",
            PhaseId::OppositionAnalysis => "opposition_analysis",
            PhaseId::Grading => "grading",
            PhaseId::Revision => "revision",
            PhaseId::ReferenceRecheck => "reference_recheck",
            PhaseId::FinalAssembly => "final_assembly",
            PhaseId::Delivery => "delivery",
        }
    }

    pub fn parse(s: &str) -> Option<PhaseId> {
        PhaseId::ALL.iter().copied().find(|p| p.as_str() == s)
    }

    /// Position in the pipeline (1-based)
    pub fn order(&self) -> u8 {
        PhaseRegistry::definition(*self).order
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a phase must have run before later phases may be entered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Always,
    /// Entered only on demand (e.g. by the revision loop)
    Optional,
    /// Required only for the listed order tiers
    TierIn(&'static [Tier]),
    /// Required only when the latest revision introduced new references
    WhenNewReferences,
}

/// Static description of a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDefinition {
    pub id: PhaseId,
    pub order: u8,
    pub requirement: Requirement,
    pub prerequisites: &'static [PhaseId],
}

impl PhaseDefinition {
    /// Whether this phase applies to a workflow with the given tier and revision state
    pub fn is_applicable(&self, tier: Tier, new_references: bool) -> bool {
        match &self.requirement {
            Requirement::Always | Requirement::Optional => true,
            Requirement::TierIn(tiers) => tiers.contains(&tier),
            Requirement::WhenNewReferences => new_references,
        }
    }

    /// Whether this phase is required (must be completed before any later phase)
    pub fn is_required(&self, tier: Tier, new_references: bool) -> bool {
        match &self.requirement {
            Requirement::Always => true,
            Requirement::Optional => false,
            Requirement::TierIn(tiers) => tiers.contains(&tier),
            Requirement::WhenNewReferences => new_references,
        }
    }
}

const NO_PREREQS: &[PhaseId] = &[];
const AFTER_INTAKE: &[PhaseId] = &[PhaseId::Intake];
const AFTER_ANALYSIS: &[PhaseId] = &[PhaseId::Analysis];
const AFTER_RESEARCH: &[PhaseId] = &[PhaseId::Research];
const AFTER_DRAFTING: &[PhaseId] = &[PhaseId::Drafting];
const AFTER_CITATIONS: &[PhaseId] = &[PhaseId::CitationVerify];
const AFTER_GRADING: &[PhaseId] = &[PhaseId::Grading];
const AFTER_REVISION: &[PhaseId] = &[PhaseId::Revision];
const AFTER_ASSEMBLY: &[PhaseId] = &[PhaseId::FinalAssembly];

const OPPOSITION_TIERS: &[Tier] = &[Tier::B, Tier::C];

/// Exhaustive phase registry
pub struct PhaseRegistry;

impl PhaseRegistry {
    pub fn definition(phase: PhaseId) -> PhaseDefinition {
        let (order, requirement, prerequisites) = match phase {
            PhaseId::Intake => (1, Requirement::Always, NO_PREREQS),
            PhaseId::Analysis => (2, Requirement::Always, AFTER_INTAKE),
            PhaseId::Research => (3, Requirement::Always, AFTER_ANALYSIS),
            PhaseId::Drafting => (4, Requirement::Always, AFTER_RESEARCH),
            PhaseId::CitationVerify => (5, Requirement::Always, AFTER_DRAFTING),
            PhaseId::OppositionAnalysis => {
                (6, Requirement::TierIn(OPPOSITION_TIERS), AFTER_CITATIONS)
            }
            PhaseId::Grading => (7, Requirement::Always, AFTER_CITATIONS),
            PhaseId::Revision => (8, Requirement::Optional, AFTER_GRADING),
            PhaseId::ReferenceRecheck => (9, Requirement::WhenNewReferences, AFTER_REVISION),
            PhaseId::FinalAssembly => (10, Requirement::Always, AFTER_GRADING),
            PhaseId::Delivery => (11, Requirement::Always, AFTER_ASSEMBLY),
        };

        PhaseDefinition {
            id: phase,
            order,
            requirement,
            prerequisites,
        }
    }

    pub fn first() -> PhaseId {
        PhaseId::Intake
    }

    /// Required phases with a lower order than `phase` that apply to this workflow
    pub fn required_before(phase: PhaseId, tier: Tier, new_references: bool) -> Vec<PhaseId> {
        let order = phase.order();
        PhaseId::ALL
            .iter()
            .copied()
            .filter(|p| p.order() < order)
            .filter(|p| Self::definition(*p).is_required(tier, new_references))
            .collect()
    }

    /// Next phase in linear progression after `phase`, skipping optional and
    /// non-applicable phases. `None` when the pipeline is finished.
    pub fn next_in_sequence(phase: PhaseId, tier: Tier, new_references: bool) -> Option<PhaseId> {
        let order = phase.order();
        PhaseId::ALL
            .iter()
            .copied()
            .filter(|p| p.order() > order)
            .find(|p| Self::definition(*p).is_required(tier, new_references))
    }

    /// Prerequisites of `phase` missing from `completed`
    pub fn missing_prerequisites(phase: PhaseId, completed: &BTreeSet<PhaseId>) -> Vec<PhaseId> {
        Self::definition(phase)
            .prerequisites
            .iter()
            .copied()
            .filter(|p| !completed.contains(p))
            .collect()
    }
}
