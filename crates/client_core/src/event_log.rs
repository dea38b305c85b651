//! Backfill of the contract's event history into ordered read-model collections.
//!
//! Every backfill re-reads the full `[deploy_block, latest]` range of each
//! stream. Proposal and vote entries only carry a proposal id, so each one is
//! enriched with a `getOneProposal` read. Enrichment reads run concurrently but
//! results are collected in log order, and a failed read only marks its own
//! entry [`Description::Unavailable`].

use std::{fmt, sync::Arc};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Address, BlockNumber, ProposalId},
    error::{Diagnostic, VotingError},
    protocol::{functions, BlockTag, ContractCall, ContractEvent, ContractValue, LogFilter, RawLog},
};
use tracing::{debug, warn};

use crate::{ContractGateway, EventSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum Description {
    Available(String),
    Unavailable,
}

impl Description {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Available(text) => text,
            Self::Unavailable => "unavailable",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: ProposalId,
    pub description: Description,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter: Address,
    pub proposal_id: ProposalId,
    pub description: Description,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHistory {
    pub voters: Vec<VoterRecord>,
    pub proposals: Vec<ProposalRecord>,
    pub votes: Vec<VoteRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct EventLogReducer {
    gateway: Arc<dyn ContractGateway>,
    events: Arc<dyn EventSource>,
    contract: Address,
    from_block: BlockNumber,
}

impl EventLogReducer {
    pub fn new(
        gateway: Arc<dyn ContractGateway>,
        events: Arc<dyn EventSource>,
        contract: Address,
        from_block: BlockNumber,
    ) -> Self {
        Self {
            gateway,
            events,
            contract,
            from_block,
        }
    }

    /// Full-history backfill. Never fails: stream, decoding and enrichment
    /// problems are returned as diagnostics next to whatever did populate.
    pub async fn backfill(&self, account: Option<&Address>) -> EventHistory {
        let (voter_logs, proposal_logs, vote_logs) = futures::join!(
            self.fetch(ContractEvent::VoterRegistered),
            self.fetch(ContractEvent::ProposalRegistered),
            self.fetch(ContractEvent::Voted),
        );

        let mut diagnostics = Vec::new();
        let voter_logs = unwrap_stream(voter_logs, &mut diagnostics);
        let proposal_logs = unwrap_stream(proposal_logs, &mut diagnostics);
        let vote_logs = unwrap_stream(vote_logs, &mut diagnostics);

        let voters = voter_logs
            .iter()
            .filter_map(|log| {
                keep_decoded(
                    log.address_arg(ContractEvent::VoterRegistered, "voterAddress"),
                    &mut diagnostics,
                )
            })
            .map(|address| VoterRecord { address })
            .collect();

        let proposal_ids: Vec<ProposalId> = proposal_logs
            .iter()
            .filter_map(|log| {
                keep_decoded(
                    log.proposal_id_arg(ContractEvent::ProposalRegistered, "proposalId"),
                    &mut diagnostics,
                )
            })
            .collect();

        let ballots: Vec<(Address, ProposalId)> = vote_logs
            .iter()
            .filter_map(|log| {
                let decoded = log
                    .address_arg(ContractEvent::Voted, "voter")
                    .and_then(|voter| {
                        log.proposal_id_arg(ContractEvent::Voted, "proposalId")
                            .map(|id| (voter, id))
                    });
                keep_decoded(decoded, &mut diagnostics)
            })
            .collect();

        let (proposal_descriptions, vote_descriptions) = futures::join!(
            self.describe_all(proposal_ids.clone(), account),
            self.describe_all(ballots.iter().map(|(_, id)| *id).collect(), account),
        );

        let proposals = proposal_ids
            .into_iter()
            .zip(proposal_descriptions)
            .map(|(id, described)| ProposalRecord {
                id,
                description: keep_described(described, &mut diagnostics),
            })
            .collect();

        let votes = ballots
            .into_iter()
            .zip(vote_descriptions)
            .map(|((voter, proposal_id), described)| VoteRecord {
                voter,
                proposal_id,
                description: keep_described(described, &mut diagnostics),
            })
            .collect();

        let history = EventHistory {
            voters,
            proposals,
            votes,
            diagnostics,
        };
        debug!(
            voters = history.voters.len(),
            proposals = history.proposals.len(),
            votes = history.votes.len(),
            diagnostics = history.diagnostics.len(),
            "event backfill complete"
        );
        history
    }

    async fn fetch(&self, event: ContractEvent) -> Result<Vec<RawLog>, VotingError> {
        self.events
            .get_logs(LogFilter {
                contract: self.contract.clone(),
                event,
                from_block: self.from_block,
                to_block: BlockTag::Latest,
            })
            .await
            .map_err(|err| VotingError::read_failed(format!("getLogs({})", event.name()), err))
    }

    async fn describe_all(
        &self,
        ids: Vec<ProposalId>,
        account: Option<&Address>,
    ) -> Vec<Result<String, VotingError>> {
        join_all(
            ids.into_iter()
                .map(|id| describe(self.gateway.as_ref(), id, account)),
        )
        .await
    }
}

/// Single `getOneProposal` read.
pub async fn describe(
    gateway: &dyn ContractGateway,
    id: ProposalId,
    account: Option<&Address>,
) -> Result<String, VotingError> {
    let call = ContractCall::new(functions::GET_ONE_PROPOSAL)
        .arg(ContractValue::Uint(id.0))
        .from_account(account.cloned());
    let value = gateway
        .read(call)
        .await
        .map_err(|err| VotingError::EnrichmentUnavailable {
            proposal_id: id,
            cause: err.to_string(),
        })?;
    value
        .description()
        .map(str::to_string)
        .ok_or_else(|| VotingError::EnrichmentUnavailable {
            proposal_id: id,
            cause: format!("unexpected value {value:?}"),
        })
}

fn unwrap_stream(
    fetched: Result<Vec<RawLog>, VotingError>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<RawLog> {
    match fetched {
        Ok(logs) => logs,
        Err(err) => {
            warn!("event backfill: {err}");
            diagnostics.push(err.into());
            Vec::new()
        }
    }
}

fn keep_decoded<T>(decoded: Result<T, VotingError>, diagnostics: &mut Vec<Diagnostic>) -> Option<T> {
    match decoded {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("event backfill: skipping log: {err}");
            diagnostics.push(err.into());
            None
        }
    }
}

fn keep_described(
    described: Result<String, VotingError>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Description {
    match described {
        Ok(text) => Description::Available(text),
        Err(err) => {
            warn!("event backfill: {err}");
            diagnostics.push(err.into());
            Description::Unavailable
        }
    }
}

#[cfg(test)]
#[path = "tests/event_log_tests.rs"]
mod tests;
