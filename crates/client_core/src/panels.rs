//! Which panels a connected account can act on, derived from phase and ownership.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use shared::phase::{PhaseAction, WorkflowPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelId {
    Owner,
    ProposalSubmission,
    Voting,
    Results,
    History,
}

pub fn actionable_panels(phase: Option<WorkflowPhase>, is_owner: bool) -> BTreeSet<PanelId> {
    let mut panels = BTreeSet::from([PanelId::History]);
    if is_owner {
        panels.insert(PanelId::Owner);
    }
    match phase {
        Some(WorkflowPhase::ProposalsRegistrationStarted) => {
            panels.insert(PanelId::ProposalSubmission);
        }
        Some(WorkflowPhase::VotingSessionStarted) => {
            panels.insert(PanelId::Voting);
        }
        Some(WorkflowPhase::VotesTallied) => {
            panels.insert(PanelId::Results);
        }
        _ => {}
    }
    panels
}

/// Controls shown inside the owner panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerControls {
    pub advance: Option<PhaseAction>,
    pub can_add_voter: bool,
}

pub fn owner_controls(phase: Option<WorkflowPhase>) -> OwnerControls {
    OwnerControls {
        advance: phase.and_then(WorkflowPhase::next_phase_action),
        can_add_voter: phase == Some(WorkflowPhase::RegisteringVoters),
    }
}
