//! End-to-end scenario on an in-memory ledger.
//!
//! Walks one committee through membership, two submissions, voting to a
//! decision, settlement and a revision, printing every response.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use governance::service::{Command, CommandOutcome, Envelope, SubmissionMetadata};
use governance::{GovernanceConfig, GovernanceService};
use ledger::{Address, Amount, Fingerprint, InMemoryLedger, NewPaper, PaperId};

use crate::backend;

#[derive(Serialize)]
struct Step<'a> {
    step: &'a str,
    caller: &'a Address,
    expect_ok: bool,
    response: &'a Envelope,
}

struct Scenario {
    service: GovernanceService,
    as_expected: bool,
}

impl Scenario {
    async fn run(&mut self, step: &str, caller: &Address, expect_ok: bool, command: Command) -> anyhow::Result<Envelope> {
        let response = self.service.dispatch(caller, command).await;
        if response.ok != expect_ok {
            warn!(step, ok = response.ok, "Demo step did not go as expected");
            self.as_expected = false;
        }
        let line = serde_json::to_string(&Step {
            step,
            caller,
            expect_ok,
            response: &response,
        })?;
        println!("{line}");
        Ok(response)
    }
}

fn paper(title: &str, content: &str) -> NewPaper {
    NewPaper::new(title, Fingerprint::of_bytes(content.as_bytes()), Amount::ZERO)
        .with_team("A. Lovelace, C. Babbage")
        .with_field("Distributed Systems")
}

fn metadata(abstract_text: &str) -> SubmissionMetadata {
    SubmissionMetadata {
        abstract_text: abstract_text.to_string(),
        author_name: "Ada Lovelace".to_string(),
        author_email: "ada@example.org".to_string(),
        ..Default::default()
    }
}

/// Run the scenario; returns whether every step went as expected.
pub async fn run(config: &GovernanceConfig) -> anyhow::Result<bool> {
    let owner = Address::from_low_u64(0x100);
    let reviewers: Vec<Address> = (0x10..0x12).map(Address::from_low_u64).collect();
    let newcomer = Address::from_low_u64(0x13);
    let author = Address::from_low_u64(0x1);

    let ledger = Arc::new(
        InMemoryLedger::new(owner.clone())
            .with_min_required_votes(3)
            .with_members(reviewers.iter().cloned()),
    );
    let (metadata_store, requests) = backend::stores(config).await?;
    let mut scenario = Scenario {
        service: GovernanceService::new(ledger, metadata_store, requests, config),
        as_expected: true,
    };
    info!("Running demo scenario");

    let stake = scenario.service.engine().staking_amount().await?;

    let filed = scenario
        .run(
            "request membership",
            &newcomer,
            true,
            Command::RequestMembership {
                requester_id: "reviewer-3".into(),
                requester_name: "Grace".into(),
                justification: "Ten years of systems reviewing".into(),
            },
        )
        .await?;
    if let Some(CommandOutcome::MembershipRequested(request)) = filed.data {
        scenario
            .run(
                "approve membership",
                &owner,
                true,
                Command::ApproveMembership { request_id: request.id },
            )
            .await?;
    }

    scenario
        .run(
            "submit first paper",
            &author,
            true,
            Command::SubmitPaper {
                paper: paper("Gossip without Gossip", "v1"),
                stake,
                metadata: metadata("A first draft."),
            },
        )
        .await?;
    scenario
        .run(
            "submit second paper",
            &author,
            true,
            Command::SubmitPaper {
                paper: paper("Quorum Leases", "leases"),
                stake,
                metadata: metadata("Leases for quorum reads."),
            },
        )
        .await?;

    let committee = [reviewers[0].clone(), reviewers[1].clone(), newcomer.clone()];
    for (voter, approve) in committee.iter().zip([false, false, true]) {
        scenario
            .run(
                "vote on first paper",
                voter,
                true,
                Command::CastVote {
                    paper_id: PaperId(1),
                    approve,
                    comment: (if approve { "Promising" } else { "Evaluation is thin" }).to_string(),
                },
            )
            .await?;
    }
    for voter in &committee {
        scenario
            .run(
                "vote on second paper",
                voter,
                true,
                Command::CastVote {
                    paper_id: PaperId(2),
                    approve: true,
                    comment: "Clear and correct".into(),
                },
            )
            .await?;
    }

    scenario
        .run(
            "vote after decision",
            &reviewers[0],
            false,
            Command::CastVote {
                paper_id: PaperId(1),
                approve: true,
                comment: "Changed my mind".into(),
            },
        )
        .await?;

    scenario
        .run("author settles approved paper", &author, true, Command::Settle { paper_id: PaperId(2) })
        .await?;
    scenario
        .run("author cannot settle rejected paper", &author, false, Command::Settle { paper_id: PaperId(1) })
        .await?;
    scenario
        .run("owner forfeits rejected stake", &owner, true, Command::Settle { paper_id: PaperId(1) })
        .await?;

    scenario
        .run(
            "resubmit rejected paper",
            &author,
            true,
            Command::Resubmit {
                previous: PaperId(1),
                paper: paper("Gossip without Gossip (revised)", "v2"),
                stake,
                metadata: metadata("Adds a full evaluation."),
            },
        )
        .await?;
    scenario
        .run("revision history", &author, true, Command::RevisionHistory { paper_id: PaperId(1) })
        .await?;
    scenario.run("listing", &author, true, Command::ListPapers).await?;
    scenario.run("stats", &owner, true, Command::Stats).await?;

    info!(as_expected = scenario.as_expected, "Demo finished");
    Ok(scenario.as_expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_runs_as_expected() {
        assert!(run(&GovernanceConfig::default()).await.unwrap());
    }
}
