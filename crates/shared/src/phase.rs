//! Workflow phases of the voting contract and the owner calls that advance them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VotingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkflowPhase {
    RegisteringVoters,
    ProposalsRegistrationStarted,
    ProposalsRegistrationEnded,
    VotingSessionStarted,
    VotingSessionEnded,
    VotesTallied,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 6] = [
        WorkflowPhase::RegisteringVoters,
        WorkflowPhase::ProposalsRegistrationStarted,
        WorkflowPhase::ProposalsRegistrationEnded,
        WorkflowPhase::VotingSessionStarted,
        WorkflowPhase::VotingSessionEnded,
        WorkflowPhase::VotesTallied,
    ];

    pub fn from_code(code: i64) -> Result<Self, VotingError> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or(VotingError::UnknownPhase(i128::from(code)))
    }

    /// Same as [`Self::from_code`] for the unsigned value a contract returns.
    pub fn from_uint(code: u64) -> Result<Self, VotingError> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or(VotingError::UnknownPhase(i128::from(code)))
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::RegisteringVoters => "RegisteringVoters",
            Self::ProposalsRegistrationStarted => "ProposalsRegistrationStarted",
            Self::ProposalsRegistrationEnded => "ProposalsRegistrationEnded",
            Self::VotingSessionStarted => "VotingSessionStarted",
            Self::VotingSessionEnded => "VotingSessionEnded",
            Self::VotesTallied => "VotesTallied",
        }
    }

    /// The owner call that moves the contract out of this phase.
    pub fn next_phase_action(self) -> Option<PhaseAction> {
        match self {
            Self::RegisteringVoters => Some(PhaseAction::StartProposalsRegistering),
            Self::ProposalsRegistrationStarted => Some(PhaseAction::EndProposalsRegistering),
            Self::ProposalsRegistrationEnded => Some(PhaseAction::StartVotingSession),
            Self::VotingSessionStarted => Some(PhaseAction::EndVotingSession),
            Self::VotingSessionEnded => Some(PhaseAction::TallyVotes),
            Self::VotesTallied => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        self.next_phase_action().map(PhaseAction::target)
    }

    pub fn is_terminal(self) -> bool {
        self.next_phase_action().is_none()
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label for a raw phase code as read from the contract.
pub fn label(code: i64) -> Result<&'static str, VotingError> {
    WorkflowPhase::from_code(code).map(WorkflowPhase::label)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseAction {
    StartProposalsRegistering,
    EndProposalsRegistering,
    StartVotingSession,
    EndVotingSession,
    TallyVotes,
}

impl PhaseAction {
    pub const ALL: [PhaseAction; 5] = [
        PhaseAction::StartProposalsRegistering,
        PhaseAction::EndProposalsRegistering,
        PhaseAction::StartVotingSession,
        PhaseAction::EndVotingSession,
        PhaseAction::TallyVotes,
    ];

    pub fn function_name(self) -> &'static str {
        match self {
            Self::StartProposalsRegistering => "startProposalsRegistering",
            Self::EndProposalsRegistering => "endProposalsRegistering",
            Self::StartVotingSession => "startVotingSession",
            Self::EndVotingSession => "endVotingSession",
            Self::TallyVotes => "tallyVotes",
        }
    }

    pub fn from_function_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.function_name() == name)
    }

    /// Phase the contract is in once this call succeeds.
    pub fn target(self) -> WorkflowPhase {
        match self {
            Self::StartProposalsRegistering => WorkflowPhase::ProposalsRegistrationStarted,
            Self::EndProposalsRegistering => WorkflowPhase::ProposalsRegistrationEnded,
            Self::StartVotingSession => WorkflowPhase::VotingSessionStarted,
            Self::EndVotingSession => WorkflowPhase::VotingSessionEnded,
            Self::TallyVotes => WorkflowPhase::VotesTallied,
        }
    }
}

impl fmt::Display for PhaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}
