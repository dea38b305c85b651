use std::{collections::BTreeSet, sync::Arc};

use client_core::{
    config::ContractSettings, ContractGateway, Description, EventSource, PanelId, SessionAction,
    SessionStatus, VoteRecord, VotingSession,
};
use ledger_sim::InMemoryVotingLedger;
use shared::{
    domain::{Address, BlockNumber, ProposalId},
    error::VotingError,
    phase::WorkflowPhase,
};
use url::Url;

fn addr(n: u64) -> Address {
    Address::parse(&format!("0x{n:040x}")).expect("test address")
}

fn settings() -> ContractSettings {
    ContractSettings {
        contract: addr(0xc0),
        deploy_block: BlockNumber(50),
        rpc_url: Url::parse("http://127.0.0.1:8545").expect("url"),
        chain_id: 31337,
    }
}

fn session_on(ledger: &Arc<InMemoryVotingLedger>) -> Arc<VotingSession> {
    VotingSession::new_with_dependencies(
        &settings(),
        Arc::clone(ledger) as Arc<dyn ContractGateway>,
        Arc::clone(ledger) as Arc<dyn EventSource>,
    )
}

async fn advance(session: &VotingSession, times: usize) {
    for _ in 0..times {
        session
            .apply_action(SessionAction::AdvancePhase)
            .await
            .expect("advance phase");
    }
}

#[tokio::test]
async fn full_workflow_from_registration_to_tally() {
    let (owner, voter) = (addr(1), addr(0xa));
    let ledger = Arc::new(InMemoryVotingLedger::new(
        addr(0xc0),
        owner.clone(),
        BlockNumber(50),
    ));

    let admin = session_on(&ledger);
    admin.connect(owner.clone()).await.expect("owner connects");
    let snapshot = admin.snapshot().await;
    assert_eq!(snapshot.state.phase, Some(WorkflowPhase::RegisteringVoters));
    assert_eq!(
        snapshot.panels(),
        BTreeSet::from([PanelId::Owner, PanelId::History])
    );

    for account in [&owner, &voter] {
        admin
            .apply_action(SessionAction::AddVoter(account.clone()))
            .await
            .expect("register voter");
    }
    advance(&admin, 1).await;
    assert_eq!(admin.snapshot().await.state.voters.len(), 2);

    let member = session_on(&ledger);
    member.connect(voter.clone()).await.expect("voter connects");
    assert_eq!(
        member.snapshot().await.panels(),
        BTreeSet::from([PanelId::ProposalSubmission, PanelId::History])
    );
    member
        .apply_action(SessionAction::AddProposal("bike lanes".into()))
        .await
        .expect("submit proposal");
    let proposals = member.snapshot().await.state.proposals;
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].id, ProposalId(1));
    assert_eq!(
        proposals[0].description,
        Description::Available("bike lanes".into())
    );

    let err = member
        .apply_action(SessionAction::AdvancePhase)
        .await
        .expect_err("only the owner advances");
    assert!(matches!(err, VotingError::WriteRejected { .. }));

    advance(&admin, 2).await;
    member.refresh().await.expect("voter refresh");
    assert_eq!(
        member.snapshot().await.state.phase,
        Some(WorkflowPhase::VotingSessionStarted)
    );
    member
        .apply_action(SessionAction::CastVote(ProposalId(1)))
        .await
        .expect("vote");

    let before = member.snapshot().await.state;
    let err = member
        .apply_action(SessionAction::CastVote(ProposalId(1)))
        .await
        .expect_err("second vote");
    assert_eq!(
        err,
        VotingError::WriteRejected {
            action: "setVote".into(),
            cause: "execution reverted: You have already voted".into(),
        }
    );
    assert_eq!(member.snapshot().await.state, before);

    advance(&admin, 2).await;
    // Phase-only follow-ups keep the history from the last full refresh.
    admin.refresh().await.expect("owner refresh");
    let snapshot = admin.snapshot().await;
    assert_eq!(snapshot.status, SessionStatus::Ready);
    assert_eq!(snapshot.state.phase, Some(WorkflowPhase::VotesTallied));
    assert_eq!(
        snapshot.state.winning_proposal,
        Some(Description::Available("bike lanes".into()))
    );
    assert_eq!(
        snapshot.state.votes,
        vec![VoteRecord {
            voter: voter.clone(),
            proposal_id: ProposalId(1),
            description: Description::Available("bike lanes".into()),
        }]
    );
    assert!(snapshot.panels().contains(&PanelId::Results));
    assert_eq!(ledger.vote_of(&voter).await, Some(ProposalId(1)));

    let err = admin
        .apply_action(SessionAction::AdvancePhase)
        .await
        .expect_err("terminal phase");
    assert_eq!(
        err,
        VotingError::NoPhaseAction(Some(WorkflowPhase::VotesTallied))
    );
}

#[tokio::test]
async fn non_voter_sees_unavailable_descriptions() {
    let owner = addr(1);
    let ledger = Arc::new(InMemoryVotingLedger::new(
        addr(0xc0),
        owner.clone(),
        BlockNumber(50),
    ));
    let admin = session_on(&ledger);
    admin.connect(owner.clone()).await.expect("owner connects");
    admin
        .apply_action(SessionAction::AddVoter(owner.clone()))
        .await
        .expect("register owner");
    advance(&admin, 1).await;
    admin
        .apply_action(SessionAction::AddProposal("night market".into()))
        .await
        .expect("proposal");

    let outsider = session_on(&ledger);
    outsider.connect(addr(0xee)).await.expect("outsider connects");

    let snapshot = outsider.snapshot().await;
    assert_eq!(snapshot.status, SessionStatus::Ready);
    assert_eq!(snapshot.state.proposals.len(), 1);
    assert_eq!(
        snapshot.state.proposals[0].description,
        Description::Unavailable
    );
    assert_eq!(snapshot.state.diagnostics.len(), 1);
}
