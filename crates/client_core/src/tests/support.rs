use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{Address, BlockNumber},
    phase::PhaseAction,
    protocol::{
        functions, ContractCall, ContractEvent, ContractValue, LogFilter, RawLog, TxReceipt,
    },
};
use tokio::sync::{Mutex, Notify};
use url::Url;

use crate::{config::ContractSettings, ContractGateway, EventSource};

pub(crate) fn contract_settings() -> ContractSettings {
    ContractSettings {
        contract: addr(0xc0),
        deploy_block: BlockNumber(50),
        rpc_url: Url::parse("http://127.0.0.1:8545").expect("url"),
        chain_id: 31337,
    }
}

pub(crate) fn addr(n: u64) -> Address {
    Address::parse(&format!("0x{n:040x}")).expect("test address")
}

pub(crate) fn voter_log(voter: &Address, block: u64, log_index: u32) -> RawLog {
    RawLog {
        args: BTreeMap::from([(
            "voterAddress".to_string(),
            ContractValue::Address(voter.clone()),
        )]),
        block_number: BlockNumber(block),
        log_index,
    }
}

pub(crate) fn proposal_log(id: u64, block: u64, log_index: u32) -> RawLog {
    RawLog {
        args: BTreeMap::from([("proposalId".to_string(), ContractValue::Uint(id))]),
        block_number: BlockNumber(block),
        log_index,
    }
}

pub(crate) fn vote_log(voter: &Address, id: u64, block: u64, log_index: u32) -> RawLog {
    RawLog {
        args: BTreeMap::from([
            ("voter".to_string(), ContractValue::Address(voter.clone())),
            ("proposalId".to_string(), ContractValue::Uint(id)),
        ]),
        block_number: BlockNumber(block),
        log_index,
    }
}

/// Scriptable contract double implementing both collaborator traits.
pub(crate) struct FakeContract {
    pub owner: Mutex<Option<Address>>,
    pub phase_code: Mutex<Option<u64>>,
    pub logs: Mutex<HashMap<ContractEvent, Vec<RawLog>>>,
    pub failing_streams: Mutex<HashSet<ContractEvent>>,
    pub descriptions: Mutex<HashMap<u64, String>>,
    pub failing_descriptions: Mutex<HashSet<u64>>,
    pub description_delays: Mutex<HashMap<u64, Duration>>,
    pub winning_description: Mutex<Option<String>>,
    pub reject_writes_with: Mutex<Option<String>>,
    pub writes: Mutex<Vec<(ContractCall, Address)>>,
    pub reads: Mutex<Vec<String>>,
    pub log_fetches: Mutex<usize>,
    pub phase_read_gate: Mutex<Option<Arc<Notify>>>,
    pub write_gate: Mutex<Option<Arc<Notify>>>,
    block: Mutex<u64>,
}

impl FakeContract {
    pub(crate) fn new(owner: Address, phase_code: u64) -> Arc<Self> {
        Arc::new(Self {
            owner: Mutex::new(Some(owner)),
            phase_code: Mutex::new(Some(phase_code)),
            logs: Mutex::new(HashMap::new()),
            failing_streams: Mutex::new(HashSet::new()),
            descriptions: Mutex::new(HashMap::new()),
            failing_descriptions: Mutex::new(HashSet::new()),
            description_delays: Mutex::new(HashMap::new()),
            winning_description: Mutex::new(None),
            reject_writes_with: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            reads: Mutex::new(Vec::new()),
            log_fetches: Mutex::new(0),
            phase_read_gate: Mutex::new(None),
            write_gate: Mutex::new(None),
            block: Mutex::new(100),
        })
    }

    pub(crate) async fn push_log(&self, event: ContractEvent, log: RawLog) {
        self.logs.lock().await.entry(event).or_default().push(log);
    }

    pub(crate) async fn add_proposal(&self, id: u64, description: &str) {
        self.descriptions
            .lock()
            .await
            .insert(id, description.to_string());
        let block = self.next_block().await;
        self.push_log(ContractEvent::ProposalRegistered, proposal_log(id, block, 0))
            .await;
    }

    pub(crate) async fn set_phase(&self, code: u64) {
        *self.phase_code.lock().await = Some(code);
    }

    pub(crate) async fn hold_phase_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.phase_read_gate.lock().await = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) async fn hold_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.write_gate.lock().await = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) async fn read_count(&self, function: &str) -> usize {
        self.reads
            .lock()
            .await
            .iter()
            .filter(|name| name.as_str() == function)
            .count()
    }

    async fn next_block(&self) -> u64 {
        let mut block = self.block.lock().await;
        *block += 1;
        *block
    }
}

#[async_trait]
impl ContractGateway for FakeContract {
    async fn read(&self, call: ContractCall) -> Result<ContractValue> {
        self.reads.lock().await.push(call.function.clone());
        match call.function.as_str() {
            functions::OWNER => self
                .owner
                .lock()
                .await
                .clone()
                .map(ContractValue::Address)
                .ok_or_else(|| anyhow!("owner read failed")),
            functions::WORKFLOW_STATUS => {
                // Holds only the first phase read after `hold_phase_reads`.
                let gate = self.phase_read_gate.lock().await.take();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                let code = (*self.phase_code.lock().await)
                    .ok_or_else(|| anyhow!("workflowStatus read failed"))?;
                Ok(ContractValue::Uint(code))
            }
            functions::GET_ONE_PROPOSAL => {
                let id = call
                    .args
                    .first()
                    .and_then(ContractValue::as_uint)
                    .ok_or_else(|| anyhow!("missing proposal id"))?;
                let delay = self.description_delays.lock().await.get(&id).copied();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if self.failing_descriptions.lock().await.contains(&id) {
                    return Err(anyhow!("execution reverted: You're not a voter"));
                }
                let description = self
                    .descriptions
                    .lock()
                    .await
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| anyhow!("Proposal not found"))?;
                Ok(ContractValue::Proposal {
                    description,
                    vote_count: 0,
                })
            }
            functions::GET_WINNING_PROPOSAL => self
                .winning_description
                .lock()
                .await
                .clone()
                .map(|description| ContractValue::Proposal {
                    description,
                    vote_count: 1,
                })
                .ok_or_else(|| anyhow!("no winner yet")),
            other => Err(anyhow!("unexpected read `{other}`")),
        }
    }

    async fn write(&self, call: ContractCall, from: &Address) -> Result<TxReceipt> {
        let gate = self.write_gate.lock().await.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(reason) = self.reject_writes_with.lock().await.clone() {
            return Err(anyhow!(reason));
        }
        self.writes.lock().await.push((call.clone(), from.clone()));
        let block = self.next_block().await;

        if let Some(action) = PhaseAction::from_function_name(&call.function) {
            self.set_phase(u64::from(action.target().code())).await;
        } else if call.function == functions::ADD_VOTER {
            let voter = call
                .args
                .first()
                .and_then(ContractValue::as_address)
                .cloned()
                .ok_or_else(|| anyhow!("missing voter"))?;
            self.push_log(ContractEvent::VoterRegistered, voter_log(&voter, block, 0))
                .await;
        }

        Ok(TxReceipt {
            tx_hash: format!("0x{block:064x}"),
            block_number: BlockNumber(block),
        })
    }
}

#[async_trait]
impl EventSource for FakeContract {
    async fn get_logs(&self, filter: LogFilter) -> Result<Vec<RawLog>> {
        *self.log_fetches.lock().await += 1;
        if self.failing_streams.lock().await.contains(&filter.event) {
            return Err(anyhow!("{} logs unavailable", filter.event.name()));
        }
        Ok(self
            .logs
            .lock()
            .await
            .get(&filter.event)
            .map(|logs| {
                logs.iter()
                    .filter(|log| log.block_number >= filter.from_block)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
