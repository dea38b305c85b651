//! Connection-scoped mirror of the voting contract.
//!
//! `VotingSession` owns the only copy of [`SessionState`]. Every refresh
//! rebuilds it from gateway reads; at most one refresh cycle runs at a time,
//! and a cycle whose connection generation has been superseded (disconnect or
//! reconnect while it was in flight) is dropped instead of applied.

use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{Address, ProposalId},
    error::{Diagnostic, VotingError},
    phase::WorkflowPhase,
    protocol::{functions, ContractCall, ContractValue, TxReceipt},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    config::ContractSettings,
    event_log::{Description, EventLogReducer, ProposalRecord, VoteRecord, VoterRecord},
    panels::{actionable_panels, owner_controls, OwnerControls, PanelId},
    ContractGateway, EventSource, MissingContractGateway, MissingEventSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Loading,
    Ready,
    ActionInFlight,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::ActionInFlight => "action_in_flight",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Option<WorkflowPhase>,
    pub owner: Option<Address>,
    pub is_connected_address_owner: bool,
    pub voters: Vec<VoterRecord>,
    pub proposals: Vec<ProposalRecord>,
    pub votes: Vec<VoteRecord>,
    pub winning_proposal: Option<Description>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub account: Option<Address>,
    pub state: SessionState,
    pub last_error: Option<Diagnostic>,
}

impl SessionSnapshot {
    pub fn panels(&self) -> BTreeSet<PanelId> {
        match self.status {
            SessionStatus::Ready | SessionStatus::ActionInFlight => {
                actionable_panels(self.state.phase, self.state.is_connected_address_owner)
            }
            _ => BTreeSet::new(),
        }
    }

    pub fn owner_controls(&self) -> Option<OwnerControls> {
        match self.status {
            SessionStatus::Ready | SessionStatus::ActionInFlight => self
                .state
                .is_connected_address_owner
                .then(|| owner_controls(self.state.phase)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    AdvancePhase,
    AddVoter(Address),
    AddProposal(String),
    CastVote(ProposalId),
}

impl SessionAction {
    fn scope(&self) -> RefreshScope {
        match self {
            Self::AdvancePhase => RefreshScope::PhaseOnly,
            _ => RefreshScope::Full,
        }
    }

    fn call(&self, phase: Option<WorkflowPhase>) -> Result<ContractCall, VotingError> {
        let call = match self {
            Self::AdvancePhase => {
                let action = phase
                    .and_then(WorkflowPhase::next_phase_action)
                    .ok_or(VotingError::NoPhaseAction(phase))?;
                ContractCall::new(action.function_name())
            }
            Self::AddVoter(voter) => {
                ContractCall::new(functions::ADD_VOTER).arg(ContractValue::Address(voter.clone()))
            }
            Self::AddProposal(description) => ContractCall::new(functions::ADD_PROPOSAL)
                .arg(ContractValue::String(description.clone())),
            Self::CastVote(id) => {
                ContractCall::new(functions::SET_VOTE).arg(ContractValue::Uint(id.0))
            }
        };
        Ok(call)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RefreshScope {
    PhaseOnly,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// Another cycle was already running or scheduled; no new one started.
    Coalesced,
    /// The connection changed while the cycle was in flight.
    Discarded,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    StateRefreshed { phase: Option<WorkflowPhase> },
    ActionConfirmed { function: String, receipt: TxReceipt },
    Diagnostic(Diagnostic),
}

struct SessionInner {
    status: SessionStatus,
    account: Option<Address>,
    generation: u64,
    state: SessionState,
    last_error: Option<Diagnostic>,
    pending_refresh: Option<RefreshScope>,
}

pub struct VotingSession {
    gateway: Arc<dyn ContractGateway>,
    reducer: EventLogReducer,
    inner: Mutex<SessionInner>,
    refresh_gate: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl VotingSession {
    pub fn new(settings: &ContractSettings) -> Arc<Self> {
        Self::new_with_dependencies(
            settings,
            Arc::new(MissingContractGateway),
            Arc::new(MissingEventSource),
        )
    }

    pub fn new_with_dependencies(
        settings: &ContractSettings,
        gateway: Arc<dyn ContractGateway>,
        event_source: Arc<dyn EventSource>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            reducer: EventLogReducer::new(
                Arc::clone(&gateway),
                event_source,
                settings.contract.clone(),
                settings.deploy_block,
            ),
            gateway,
            inner: Mutex::new(SessionInner {
                status: SessionStatus::Disconnected,
                account: None,
                generation: 0,
                state: SessionState::default(),
                last_error: None,
                pending_refresh: None,
            }),
            refresh_gate: Mutex::new(()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            status: inner.status,
            account: inner.account.clone(),
            state: inner.state.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    /// Starts a new connection lifetime for `account` and loads owner, phase
    /// and the full event history.
    pub async fn connect(&self, account: Address) -> Result<RefreshOutcome, VotingError> {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.account = Some(account.clone());
            inner.state = SessionState::default();
            inner.last_error = None;
            inner.pending_refresh = None;
            self.set_status(&mut inner, SessionStatus::Loading);
            inner.generation
        };
        info!(account = %account, generation, "session: connecting");

        let _gate = self.refresh_gate.lock().await;
        if !self.is_current(generation).await {
            return Ok(RefreshOutcome::Discarded);
        }
        let loaded = self
            .load(&account, RefreshScope::Full, &SessionState::default())
            .await;
        self.commit(generation, loaded, true).await
    }

    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.account = None;
        inner.state = SessionState::default();
        inner.last_error = None;
        inner.pending_refresh = None;
        self.set_status(&mut inner, SessionStatus::Disconnected);
        info!(generation = inner.generation, "session: disconnected");
    }

    /// Re-reads owner, phase and history. Requests made while an action is in
    /// flight fold into the refresh that follows the action; requests made
    /// while another cycle runs are coalesced into it.
    pub async fn refresh(&self) -> Result<RefreshOutcome, VotingError> {
        let (generation, account) = {
            let mut inner = self.inner.lock().await;
            let Some(account) = inner.account.clone() else {
                return Err(VotingError::NotReady(inner.status.to_string()));
            };
            if inner.status == SessionStatus::ActionInFlight {
                inner.pending_refresh = Some(RefreshScope::Full);
                debug!("session: refresh folded into post-action refresh");
                return Ok(RefreshOutcome::Coalesced);
            }
            (inner.generation, account)
        };

        let Ok(_gate) = self.refresh_gate.try_lock() else {
            debug!("session: refresh already in flight, coalescing");
            return Ok(RefreshOutcome::Coalesced);
        };

        let previous = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Ok(RefreshOutcome::Discarded);
            }
            if inner.status == SessionStatus::Error {
                self.set_status(&mut inner, SessionStatus::Loading);
            }
            inner.state.clone()
        };

        let loaded = self.load(&account, RefreshScope::Full, &previous).await;
        self.commit(generation, loaded, false).await
    }

    /// Submits one state-changing call. On success the phase is re-read (and
    /// the history re-fetched for voter/proposal/vote actions) before the
    /// session returns to `Ready`. On rejection the state is left exactly as
    /// it was before the action.
    pub async fn apply_action(&self, action: SessionAction) -> Result<TxReceipt, VotingError> {
        let (generation, account) = {
            let mut inner = self.inner.lock().await;
            if inner.status != SessionStatus::Ready {
                return Err(VotingError::NotReady(inner.status.to_string()));
            }
            let Some(account) = inner.account.clone() else {
                return Err(VotingError::NotReady(inner.status.to_string()));
            };
            action.call(inner.state.phase)?;
            self.set_status(&mut inner, SessionStatus::ActionInFlight);
            (inner.generation, account)
        };

        let _gate = self.refresh_gate.lock().await;

        let (snapshot, call) = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Err(VotingError::NotReady(inner.status.to_string()));
            }
            // A refresh that was running when the action arrived may have moved the phase.
            match action.call(inner.state.phase) {
                Ok(call) => (inner.state.clone(), call),
                Err(err) => {
                    self.set_status(&mut inner, SessionStatus::Ready);
                    return Err(err);
                }
            }
        };
        let function = call.function.clone();
        info!(function = %function, account = %account, "session: submitting action");

        let receipt = match self
            .gateway
            .write(call.from_account(Some(account.clone())), &account)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                let err = VotingError::write_rejected(function, err);
                warn!("session: {err}");
                let pending = {
                    let mut inner = self.inner.lock().await;
                    if inner.generation == generation {
                        inner.state = snapshot.clone();
                        inner.last_error = Some(Diagnostic::from(&err));
                        self.set_status(&mut inner, SessionStatus::Ready);
                        inner.pending_refresh.take()
                    } else {
                        None
                    }
                };
                let _ = self.events.send(SessionEvent::Diagnostic(Diagnostic::from(&err)));

                // A refresh accepted while the write was pending still owes a cycle.
                if pending.is_some() {
                    debug!("session: running refresh requested during rejected action");
                    let loaded = self.load(&account, RefreshScope::Full, &snapshot).await;
                    if let Err(refresh_err) = self.commit(generation, loaded, false).await {
                        warn!("session: refresh after rejected action failed: {refresh_err}");
                    }
                }
                return Err(err);
            }
        };
        let _ = self.events.send(SessionEvent::ActionConfirmed {
            function: function.clone(),
            receipt: receipt.clone(),
        });

        let scope = {
            let mut inner = self.inner.lock().await;
            inner
                .pending_refresh
                .take()
                .map_or(action.scope(), |pending| pending.max(action.scope()))
        };
        let loaded = self.load(&account, scope, &snapshot).await;
        if let Err(err) = self.commit(generation, loaded, true).await {
            // The write itself went through; only the follow-up read failed.
            warn!(function = %function, "session: post-action refresh failed: {err}");
        }

        Ok(receipt)
    }

    /// Description of a single proposal, read on behalf of the connected account.
    pub async fn lookup_proposal(&self, id: ProposalId) -> Result<String, VotingError> {
        let account = {
            let inner = self.inner.lock().await;
            inner
                .account
                .clone()
                .ok_or_else(|| VotingError::NotReady(inner.status.to_string()))?
        };
        let value = self
            .read(
                ContractCall::new(functions::GET_ONE_PROPOSAL).arg(ContractValue::Uint(id.0)),
                &account,
            )
            .await?;
        value
            .description()
            .map(str::to_string)
            .ok_or_else(|| VotingError::UnexpectedValue {
                function: functions::GET_ONE_PROPOSAL.to_string(),
                expected: "proposal",
            })
    }

    async fn load(
        &self,
        account: &Address,
        scope: RefreshScope,
        previous: &SessionState,
    ) -> Result<SessionState, VotingError> {
        let (owner, phase) = match scope {
            RefreshScope::Full => {
                let (owner, phase) =
                    futures::join!(self.read_owner(account), self.read_phase(account));
                (owner?, phase?)
            }
            RefreshScope::PhaseOnly => {
                let owner = match previous.owner.clone() {
                    Some(owner) => owner,
                    None => self.read_owner(account).await?,
                };
                (owner, self.read_phase(account).await?)
            }
        };

        let mut state = SessionState {
            phase: Some(phase),
            is_connected_address_owner: owner == *account,
            owner: Some(owner),
            ..SessionState::default()
        };

        let winner = async {
            if phase == WorkflowPhase::VotesTallied {
                Some(self.read_winning_proposal(account).await)
            } else {
                None
            }
        };

        match scope {
            RefreshScope::Full => {
                let (history, winner) = futures::join!(self.reducer.backfill(Some(account)), winner);
                state.voters = history.voters;
                state.proposals = history.proposals;
                state.votes = history.votes;
                state.diagnostics = history.diagnostics;
                state.winning_proposal = winner.map(|w| keep_winner(w, &mut state.diagnostics));
            }
            RefreshScope::PhaseOnly => {
                state.voters = previous.voters.clone();
                state.proposals = previous.proposals.clone();
                state.votes = previous.votes.clone();
                // Never VotesTallied here, so these all belong to the kept history.
                state.diagnostics = previous.diagnostics.clone();
                state.winning_proposal = winner
                    .await
                    .map(|w| keep_winner(w, &mut state.diagnostics));
            }
        }

        Ok(state)
    }

    async fn commit(
        &self,
        generation: u64,
        loaded: Result<SessionState, VotingError>,
        settle: bool,
    ) -> Result<RefreshOutcome, VotingError> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!(generation, current = inner.generation, "session: discarding stale refresh");
            return Ok(RefreshOutcome::Discarded);
        }
        let in_action = inner.status == SessionStatus::ActionInFlight && !settle;

        match loaded {
            Ok(state) => {
                for diagnostic in &state.diagnostics {
                    let _ = self.events.send(SessionEvent::Diagnostic(diagnostic.clone()));
                }
                let phase = state.phase;
                inner.state = state;
                inner.last_error = None;
                if !in_action {
                    self.set_status(&mut inner, SessionStatus::Ready);
                }
                info!(
                    phase = ?phase,
                    voters = inner.state.voters.len(),
                    proposals = inner.state.proposals.len(),
                    votes = inner.state.votes.len(),
                    "session: state refreshed"
                );
                let _ = self.events.send(SessionEvent::StateRefreshed { phase });
                Ok(RefreshOutcome::Applied)
            }
            Err(err) => {
                warn!("session: refresh failed: {err}");
                inner.last_error = Some(Diagnostic::from(&err));
                if !in_action {
                    self.set_status(&mut inner, SessionStatus::Error);
                }
                let _ = self.events.send(SessionEvent::Diagnostic(Diagnostic::from(&err)));
                Err(err)
            }
        }
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().await.generation == generation
    }

    fn set_status(&self, inner: &mut SessionInner, status: SessionStatus) {
        if inner.status == status {
            return;
        }
        debug!(from = %inner.status, to = %status, "session: status change");
        inner.status = status;
        let _ = self.events.send(SessionEvent::StatusChanged(status));
    }

    async fn read(&self, call: ContractCall, account: &Address) -> Result<ContractValue, VotingError> {
        let function = call.function.clone();
        self.gateway
            .read(call.from_account(Some(account.clone())))
            .await
            .map_err(|err| VotingError::read_failed(function, err))
    }

    async fn read_owner(&self, account: &Address) -> Result<Address, VotingError> {
        let value = self.read(ContractCall::new(functions::OWNER), account).await?;
        value
            .as_address()
            .cloned()
            .ok_or_else(|| VotingError::UnexpectedValue {
                function: functions::OWNER.to_string(),
                expected: "address",
            })
    }

    async fn read_phase(&self, account: &Address) -> Result<WorkflowPhase, VotingError> {
        let value = self
            .read(ContractCall::new(functions::WORKFLOW_STATUS), account)
            .await?;
        let code = value.as_uint().ok_or_else(|| VotingError::UnexpectedValue {
            function: functions::WORKFLOW_STATUS.to_string(),
            expected: "uint",
        })?;
        WorkflowPhase::from_uint(code)
    }

    async fn read_winning_proposal(&self, account: &Address) -> Result<String, VotingError> {
        let value = self
            .read(ContractCall::new(functions::GET_WINNING_PROPOSAL), account)
            .await?;
        value
            .description()
            .map(str::to_string)
            .ok_or_else(|| VotingError::UnexpectedValue {
                function: functions::GET_WINNING_PROPOSAL.to_string(),
                expected: "proposal",
            })
    }
}

fn keep_winner(read: Result<String, VotingError>, diagnostics: &mut Vec<Diagnostic>) -> Description {
    match read {
        Ok(text) => Description::Available(text),
        Err(err) => {
            warn!("session: winning proposal unavailable: {err}");
            diagnostics.push(err.into());
            Description::Unavailable
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
