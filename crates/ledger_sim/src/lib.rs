//! In-memory stand-in for the deployed voting contract.
//!
//! Implements [`ContractGateway`] and [`EventSource`] over a single mutable
//! ledger so sessions can be driven end to end without a node. Writes mine
//! one block each and revert with the contract's messages when a workflow
//! rule is broken.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use client_core::{ContractGateway, EventSource};
use shared::{
    domain::{Address, BlockNumber, ProposalId},
    phase::{PhaseAction, WorkflowPhase},
    protocol::{
        functions, BlockTag, ContractCall, ContractEvent, ContractValue, LogFilter, RawLog,
        TxReceipt,
    },
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const GENESIS_DESCRIPTION: &str = "GENESIS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("execution reverted: {0}")]
    Reverted(&'static str),
    #[error("unknown contract function `{0}`")]
    UnknownFunction(String),
    #[error("`{function}` expects an argument of type {expected}")]
    BadArgument {
        function: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Default)]
struct VoterEntry {
    has_voted: bool,
    voted_proposal_id: Option<ProposalId>,
}

#[derive(Debug, Clone)]
struct ProposalEntry {
    description: String,
    vote_count: u64,
}

impl ProposalEntry {
    fn value(&self) -> ContractValue {
        ContractValue::Proposal {
            description: self.description.clone(),
            vote_count: self.vote_count,
        }
    }
}

struct LedgerState {
    phase: WorkflowPhase,
    voters: HashMap<Address, VoterEntry>,
    proposals: Vec<ProposalEntry>,
    winning_proposal_id: Option<ProposalId>,
    block: u64,
    logs: Vec<(ContractEvent, RawLog)>,
}

pub struct InMemoryVotingLedger {
    contract: Address,
    owner: Address,
    state: Mutex<LedgerState>,
}

impl InMemoryVotingLedger {
    /// A freshly deployed contract: `deploy_block` is the deployment block,
    /// the first transaction lands in the block after it.
    pub fn new(contract: Address, owner: Address, deploy_block: BlockNumber) -> Self {
        Self {
            contract,
            owner,
            state: Mutex::new(LedgerState {
                phase: WorkflowPhase::RegisteringVoters,
                voters: HashMap::new(),
                proposals: Vec::new(),
                winning_proposal_id: None,
                block: deploy_block.0,
                logs: Vec::new(),
            }),
        }
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub async fn phase(&self) -> WorkflowPhase {
        self.state.lock().await.phase
    }

    pub async fn block_number(&self) -> BlockNumber {
        BlockNumber(self.state.lock().await.block)
    }

    pub async fn vote_of(&self, voter: &Address) -> Option<ProposalId> {
        self.state
            .lock()
            .await
            .voters
            .get(voter)
            .and_then(|entry| entry.voted_proposal_id)
    }

    fn require_owner(&self, from: &Address) -> Result<(), LedgerError> {
        if *from != self.owner {
            return Err(LedgerError::Reverted("Ownable: caller is not the owner"));
        }
        Ok(())
    }
}

impl LedgerState {
    fn require_voter(&self, account: Option<&Address>) -> Result<(), LedgerError> {
        match account {
            Some(account) if self.voters.contains_key(account) => Ok(()),
            _ => Err(LedgerError::Reverted("You're not a voter")),
        }
    }

    fn proposal(&self, id: u64) -> Result<&ProposalEntry, LedgerError> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.proposals.get(index))
            .ok_or(LedgerError::Reverted("Proposal not found"))
    }

    fn advance(&mut self, action: PhaseAction) -> Result<(), LedgerError> {
        if self.phase.next_phase_action() != Some(action) {
            return Err(LedgerError::Reverted(phase_revert_reason(action)));
        }
        if action == PhaseAction::StartProposalsRegistering {
            self.proposals.push(ProposalEntry {
                description: GENESIS_DESCRIPTION.into(),
                vote_count: 0,
            });
        }
        if action == PhaseAction::TallyVotes {
            self.winning_proposal_id = Some(self.tally());
        }
        self.phase = action.target();
        Ok(())
    }

    /// First proposal holding the highest count; ties keep the lower id.
    fn tally(&self) -> ProposalId {
        let mut winner = 0;
        for (index, proposal) in self.proposals.iter().enumerate() {
            if proposal.vote_count > self.proposals[winner].vote_count {
                winner = index;
            }
        }
        ProposalId(winner as u64)
    }

    fn emit(&mut self, event: ContractEvent, args: BTreeMap<String, ContractValue>) {
        let log_index = self
            .logs
            .iter()
            .filter(|(_, log)| log.block_number.0 == self.block)
            .count() as u32;
        self.logs.push((
            event,
            RawLog {
                args,
                block_number: BlockNumber(self.block),
                log_index,
            },
        ));
    }
}

fn phase_revert_reason(action: PhaseAction) -> &'static str {
    match action {
        PhaseAction::StartProposalsRegistering => "Registering proposals cant be started now",
        PhaseAction::EndProposalsRegistering => "Registering proposals havent started yet",
        PhaseAction::StartVotingSession => "Registering proposals phase is not finished",
        PhaseAction::EndVotingSession => "Voting session havent started yet",
        PhaseAction::TallyVotes => "Current status is not voting session ended",
    }
}

fn uint_arg(call: &ContractCall) -> Result<u64, LedgerError> {
    call.args
        .first()
        .and_then(ContractValue::as_uint)
        .ok_or_else(|| LedgerError::BadArgument {
            function: call.function.clone(),
            expected: "uint",
        })
}

fn address_arg(call: &ContractCall) -> Result<Address, LedgerError> {
    call.args
        .first()
        .and_then(ContractValue::as_address)
        .cloned()
        .ok_or_else(|| LedgerError::BadArgument {
            function: call.function.clone(),
            expected: "address",
        })
}

fn string_arg(call: &ContractCall) -> Result<String, LedgerError> {
    match call.args.first() {
        Some(ContractValue::String(text)) => Ok(text.clone()),
        _ => Err(LedgerError::BadArgument {
            function: call.function.clone(),
            expected: "string",
        }),
    }
}

#[async_trait]
impl ContractGateway for InMemoryVotingLedger {
    async fn read(&self, call: ContractCall) -> Result<ContractValue> {
        let state = self.state.lock().await;
        let value = match call.function.as_str() {
            functions::OWNER => ContractValue::Address(self.owner.clone()),
            functions::WORKFLOW_STATUS => ContractValue::Uint(u64::from(state.phase.code())),
            functions::GET_ONE_PROPOSAL => {
                state.require_voter(call.account.as_ref())?;
                state.proposal(uint_arg(&call)?)?.value()
            }
            functions::GET_WINNING_PROPOSAL => {
                let id = state
                    .winning_proposal_id
                    .ok_or(LedgerError::Reverted("Votes are not tallied yet"))?;
                state.proposal(id.0)?.value()
            }
            other => return Err(LedgerError::UnknownFunction(other.to_string()).into()),
        };
        Ok(value)
    }

    async fn write(&self, call: ContractCall, from: &Address) -> Result<TxReceipt> {
        let mut state = self.state.lock().await;
        let mut pending: Vec<(ContractEvent, BTreeMap<String, ContractValue>)> = Vec::new();

        if let Some(action) = PhaseAction::from_function_name(&call.function) {
            self.require_owner(from)?;
            state.advance(action)?;
            info!(action = %action, phase = %state.phase, "ledger: workflow advanced");
        } else {
            match call.function.as_str() {
                functions::ADD_VOTER => {
                    self.require_owner(from)?;
                    if state.phase != WorkflowPhase::RegisteringVoters {
                        return Err(LedgerError::Reverted("Voters registration is not open yet").into());
                    }
                    let voter = address_arg(&call)?;
                    if state.voters.contains_key(&voter) {
                        return Err(LedgerError::Reverted("Already registered").into());
                    }
                    state.voters.insert(voter.clone(), VoterEntry::default());
                    pending.push((
                        ContractEvent::VoterRegistered,
                        BTreeMap::from([("voterAddress".to_string(), ContractValue::Address(voter))]),
                    ));
                }
                functions::ADD_PROPOSAL => {
                    state.require_voter(Some(from))?;
                    if state.phase != WorkflowPhase::ProposalsRegistrationStarted {
                        return Err(LedgerError::Reverted("Proposals are not allowed yet").into());
                    }
                    let description = string_arg(&call)?;
                    if description.is_empty() {
                        return Err(LedgerError::Reverted("Empty proposal").into());
                    }
                    state.proposals.push(ProposalEntry {
                        description,
                        vote_count: 0,
                    });
                    let id = (state.proposals.len() - 1) as u64;
                    pending.push((
                        ContractEvent::ProposalRegistered,
                        BTreeMap::from([("proposalId".to_string(), ContractValue::Uint(id))]),
                    ));
                }
                functions::SET_VOTE => {
                    state.require_voter(Some(from))?;
                    if state.phase != WorkflowPhase::VotingSessionStarted {
                        return Err(LedgerError::Reverted("Voting session havent started yet").into());
                    }
                    let id = uint_arg(&call)?;
                    state.proposal(id)?;
                    if state.voters.get(from).is_some_and(|entry| entry.has_voted) {
                        return Err(LedgerError::Reverted("You have already voted").into());
                    }
                    if let Some(entry) = state.voters.get_mut(from) {
                        entry.has_voted = true;
                        entry.voted_proposal_id = Some(ProposalId(id));
                    }
                    if let Some(proposal) = usize::try_from(id)
                        .ok()
                        .and_then(|index| state.proposals.get_mut(index))
                    {
                        proposal.vote_count += 1;
                    }
                    pending.push((
                        ContractEvent::Voted,
                        BTreeMap::from([
                            ("voter".to_string(), ContractValue::Address(from.clone())),
                            ("proposalId".to_string(), ContractValue::Uint(id)),
                        ]),
                    ));
                }
                other => return Err(LedgerError::UnknownFunction(other.to_string()).into()),
            }
        }

        state.block += 1;
        for (event, args) in pending {
            state.emit(event, args);
        }
        debug!(function = %call.function, block = state.block, "ledger: transaction mined");

        Ok(TxReceipt {
            tx_hash: format!("0x{:064x}", state.block),
            block_number: BlockNumber(state.block),
        })
    }
}

#[async_trait]
impl EventSource for InMemoryVotingLedger {
    async fn get_logs(&self, filter: LogFilter) -> Result<Vec<RawLog>> {
        if filter.contract != self.contract {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|(event, log)| {
                *event == filter.event
                    && log.block_number >= filter.from_block
                    && match filter.to_block {
                        BlockTag::Latest => true,
                        BlockTag::Number(to) => log.block_number <= to,
                    }
            })
            .map(|(_, log)| log.clone())
            .collect())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
