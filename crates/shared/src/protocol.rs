use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Address, BlockNumber, ProposalId},
    error::VotingError,
};

pub mod functions {
    pub const OWNER: &str = "owner";
    pub const WORKFLOW_STATUS: &str = "workflowStatus";
    pub const GET_ONE_PROPOSAL: &str = "getOneProposal";
    pub const GET_WINNING_PROPOSAL: &str = "getWinningProposal";
    pub const ADD_VOTER: &str = "addVoter";
    pub const ADD_PROPOSAL: &str = "addProposal";
    pub const SET_VOTE: &str = "setVote";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContractValue {
    Unit,
    Bool(bool),
    Uint(u64),
    Address(Address),
    String(String),
    Proposal { description: String, vote_count: u64 },
}

impl ContractValue {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            Self::Address(v) => Some(v),
            _ => None,
        }
    }

    /// Human-readable description carried by a proposal struct or a bare string.
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Proposal { description, .. } | Self::String(description) => Some(description),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ContractValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Address>,
}

impl ContractCall {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
            account: None,
        }
    }

    pub fn arg(mut self, value: ContractValue) -> Self {
        self.args.push(value);
        self
    }

    pub fn from_account(mut self, account: Option<Address>) -> Self {
        self.account = account;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: BlockNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractEvent {
    VoterRegistered,
    ProposalRegistered,
    Voted,
}

impl ContractEvent {
    pub fn name(self) -> &'static str {
        match self {
            Self::VoterRegistered => "VoterRegistered",
            Self::ProposalRegistered => "ProposalRegistered",
            Self::Voted => "Voted",
        }
    }

    pub fn abi_signature(self) -> &'static str {
        match self {
            Self::VoterRegistered => "event VoterRegistered(address voterAddress)",
            Self::ProposalRegistered => "event ProposalRegistered(uint proposalId)",
            Self::Voted => "event Voted(address voter, uint256 proposalId)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    Latest,
    Number(BlockNumber),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub contract: Address,
    pub event: ContractEvent,
    pub from_block: BlockNumber,
    pub to_block: BlockTag,
}

/// Decoded log entry; `args` is keyed by the event's parameter names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub args: BTreeMap<String, ContractValue>,
    pub block_number: BlockNumber,
    pub log_index: u32,
}

impl RawLog {
    pub fn address_arg(&self, event: ContractEvent, name: &str) -> Result<Address, VotingError> {
        match self.args.get(name) {
            Some(ContractValue::Address(address)) => Ok(address.clone()),
            Some(other) => Err(malformed(event, name, other)),
            None => Err(missing(event, name)),
        }
    }

    pub fn proposal_id_arg(
        &self,
        event: ContractEvent,
        name: &str,
    ) -> Result<ProposalId, VotingError> {
        match self.args.get(name) {
            Some(ContractValue::Uint(id)) => Ok(ProposalId(*id)),
            Some(other) => Err(malformed(event, name, other)),
            None => Err(missing(event, name)),
        }
    }
}

fn missing(event: ContractEvent, name: &str) -> VotingError {
    VotingError::MalformedLog {
        event: event.name(),
        reason: format!("missing argument `{name}`"),
    }
}

fn malformed(event: ContractEvent, name: &str, value: &ContractValue) -> VotingError {
    VotingError::MalformedLog {
        event: event.name(),
        reason: format!("argument `{name}` has unexpected value {value:?}"),
    }
}
