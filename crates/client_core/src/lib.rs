use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::Address,
    protocol::{ContractCall, ContractValue, LogFilter, RawLog, TxReceipt},
};

pub mod config;
pub mod event_log;
pub mod panels;
pub mod session;

pub use event_log::{
    Description, EventHistory, EventLogReducer, ProposalRecord, VoteRecord, VoterRecord,
};
pub use panels::{actionable_panels, owner_controls, OwnerControls, PanelId};
pub use session::{
    RefreshOutcome, SessionAction, SessionEvent, SessionSnapshot, SessionState, SessionStatus,
    VotingSession,
};

/// Read/write access to the voting contract. Signing, submission and
/// confirmation happen behind this seam.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    async fn read(&self, call: ContractCall) -> Result<ContractValue>;
    async fn write(&self, call: ContractCall, from: &Address) -> Result<TxReceipt>;
}

/// Historical log access, ascending by `(block_number, log_index)`.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn get_logs(&self, filter: LogFilter) -> Result<Vec<RawLog>>;
}

pub struct MissingContractGateway;

#[async_trait]
impl ContractGateway for MissingContractGateway {
    async fn read(&self, call: ContractCall) -> Result<ContractValue> {
        Err(anyhow!(
            "contract gateway unavailable for read `{}`",
            call.function
        ))
    }

    async fn write(&self, call: ContractCall, _from: &Address) -> Result<TxReceipt> {
        Err(anyhow!(
            "contract gateway unavailable for write `{}`",
            call.function
        ))
    }
}

pub struct MissingEventSource;

#[async_trait]
impl EventSource for MissingEventSource {
    async fn get_logs(&self, filter: LogFilter) -> Result<Vec<RawLog>> {
        Err(anyhow!(
            "event source unavailable for `{}` logs",
            filter.event.name()
        ))
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
