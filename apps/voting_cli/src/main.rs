use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_from, Network, Settings, SETTINGS_FILE},
    ContractGateway, EventSource, SessionAction, SessionEvent, VotingSession,
};
use ledger_sim::InMemoryVotingLedger;
use shared::{
    domain::{Address, ProposalId},
    phase::WorkflowPhase,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

// Default hardhat deployer and first deployment address.
const SIM_OWNER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const SIM_CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every workflow phase and the owner call that leaves it.
    Phases,
    /// Print the resolved settings as JSON.
    Settings,
    /// Run a scripted election against the in-memory ledger.
    Simulate {
        #[arg(long, default_value_t = 3)]
        voters: u64,
        #[arg(long = "proposal")]
        proposals: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    match cli.command {
        Command::Phases => print_phases(),
        Command::Settings => {
            let settings = load_settings_from(&cli.config, |key| std::env::var(key).ok());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if let Err(err) = settings.contract_settings() {
                warn!("settings are incomplete: {err:#}");
            }
        }
        Command::Simulate { voters, proposals } => {
            let proposals = if proposals.is_empty() {
                vec!["bike lanes".to_string(), "night market".to_string()]
            } else {
                proposals
            };
            simulate(voters.max(1), proposals).await?;
        }
    }

    Ok(())
}

fn print_phases() {
    for phase in WorkflowPhase::ALL {
        let next = phase
            .next_phase_action()
            .map(|action| action.function_name())
            .unwrap_or("-");
        println!("{:>2}  {:<30} {}", phase.code(), phase.label(), next);
    }
}

fn log_events(mut events: broadcast::Receiver<SessionEvent>, who: String) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StatusChanged(status)) => info!(%who, %status, "status"),
                Ok(SessionEvent::StateRefreshed { phase }) => {
                    info!(%who, phase = ?phase, "state refreshed")
                }
                Ok(SessionEvent::ActionConfirmed { function, receipt }) => {
                    info!(%who, %function, block = %receipt.block_number, "action confirmed")
                }
                Ok(SessionEvent::Diagnostic(diagnostic)) => {
                    warn!(%who, code = ?diagnostic.code, "{}", diagnostic.message)
                }
                Err(RecvError::Lagged(skipped)) => warn!(%who, skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn simulate(voter_count: u64, proposals: Vec<String>) -> Result<()> {
    let mut settings = Settings::for_network(Network::Localhost);
    settings.contract_address = SIM_CONTRACT.into();
    let contract = settings
        .contract_settings()
        .context("simulation settings")?;

    let owner = Address::parse(SIM_OWNER)?;
    let ledger = Arc::new(InMemoryVotingLedger::new(
        contract.contract.clone(),
        owner.clone(),
        contract.deploy_block,
    ));
    let open_session = |label: String| {
        let session = VotingSession::new_with_dependencies(
            &contract,
            Arc::clone(&ledger) as Arc<dyn ContractGateway>,
            Arc::clone(&ledger) as Arc<dyn EventSource>,
        );
        log_events(session.subscribe_events(), label);
        session
    };

    let admin = open_session("owner".into());
    admin.connect(owner.clone()).await?;

    let voters = (1..=voter_count)
        .map(|n| Address::parse(&format!("0x{:040x}", 0xa0 + n)))
        .collect::<Result<Vec<_>, _>>()?;
    for voter in &voters {
        admin
            .apply_action(SessionAction::AddVoter(voter.clone()))
            .await?;
    }
    admin.apply_action(SessionAction::AdvancePhase).await?;

    let mut members = Vec::with_capacity(voters.len());
    for (index, voter) in voters.iter().enumerate() {
        let member = open_session(format!("voter-{}", index + 1));
        member.connect(voter.clone()).await?;
        members.push(member);
    }
    for (index, description) in proposals.iter().enumerate() {
        members[index % members.len()]
            .apply_action(SessionAction::AddProposal(description.clone()))
            .await
            .with_context(|| format!("submitting proposal `{description}`"))?;
    }

    for _ in 0..2 {
        admin.apply_action(SessionAction::AdvancePhase).await?;
    }
    for (index, member) in members.iter().enumerate() {
        member.refresh().await?;
        let choice = ProposalId((index % proposals.len()) as u64 + 1);
        member.apply_action(SessionAction::CastVote(choice)).await?;
    }
    for _ in 0..2 {
        admin.apply_action(SessionAction::AdvancePhase).await?;
    }

    // Descriptions are only readable by registered voters.
    let auditor = &members[members.len() - 1];
    auditor.refresh().await?;
    let snapshot = auditor.snapshot().await;
    info!(
        phase = ?snapshot.state.phase,
        votes = snapshot.state.votes.len(),
        "simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
