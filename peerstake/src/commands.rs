//! Subcommands and their translation into service commands.

use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;

use governance::service::{Command, SubmissionMetadata};
use governance::GovernanceService;
use ledger::{Address, Amount, Fingerprint, NewPaper, PaperId};

fn parse_amount(raw: &str) -> Result<Amount, String> {
    Amount::parse_decimal(raw).map_err(|e| e.to_string())
}

/// Paper content shared by `submit` and `resubmit`.
#[derive(Debug, clap::Args)]
pub struct PaperArgs {
    /// Paper title
    #[arg(long)]
    pub title: String,

    /// Content fingerprint; computed from --file when omitted
    #[arg(long)]
    pub fingerprint: Option<String>,

    /// Paper file to fingerprint
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Access price (decimal)
    #[arg(long, default_value = "0", value_parser = parse_amount)]
    pub price: Amount,

    /// Team members, free text
    #[arg(long, default_value = "")]
    pub team: String,

    /// Research field
    #[arg(long, default_value = "")]
    pub field: String,

    /// Stake to lock (decimal); the committee's staking amount when omitted
    #[arg(long, value_parser = parse_amount)]
    pub stake: Option<Amount>,

    /// Abstract stored with the metadata
    #[arg(long = "abstract", default_value = "")]
    pub abstract_text: String,

    /// Author display name
    #[arg(long, default_value = "")]
    pub author_name: String,

    /// Author contact email
    #[arg(long, default_value = "")]
    pub author_email: String,
}

impl PaperArgs {
    async fn resolve(self, service: &GovernanceService) -> anyhow::Result<(NewPaper, Amount, SubmissionMetadata)> {
        let (fingerprint, file_name, file_size) = match (&self.fingerprint, &self.file) {
            (Some(fingerprint), _) => (Fingerprint::new(fingerprint.clone()), String::new(), 0),
            (None, Some(path)) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading paper file {}", path.display()))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (Fingerprint::of_bytes(&bytes), name, bytes.len() as u64)
            }
            (None, None) => anyhow::bail!("pass --fingerprint or --file"),
        };

        let stake = match self.stake {
            Some(stake) => stake,
            None => service.engine().staking_amount().await?,
        };

        let paper = NewPaper::new(self.title, fingerprint, self.price)
            .with_team(self.team)
            .with_field(self.field);
        let metadata = SubmissionMetadata {
            abstract_text: self.abstract_text,
            file_ref: String::new(),
            file_name,
            file_size,
            author_name: self.author_name,
            author_email: self.author_email,
        };
        Ok((paper, stake, metadata))
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run an end-to-end scenario against an in-memory ledger
    Demo,

    /// List every paper with its metadata
    Papers,

    /// Show one paper with reviews and revision chain
    Paper {
        id: u64,
    },

    /// Show the revision chain of a paper
    History {
        id: u64,
    },

    /// Submit a paper with its stake
    Submit(PaperArgs),

    /// Vote on a paper
    Vote {
        id: u64,
        /// Approve (otherwise reject)
        #[arg(long)]
        approve: bool,
        /// Review comment
        #[arg(long)]
        comment: String,
    },

    /// Settle the stake of a decided paper
    Settle {
        id: u64,
    },

    /// Resubmit a rejected paper as a new revision
    Resubmit {
        /// Rejected paper being revised
        previous: u64,
        #[command(flatten)]
        paper: PaperArgs,
    },

    /// List committee members
    Members,

    /// Ask to join the committee
    RequestMembership {
        /// Requester account id
        #[arg(long)]
        requester_id: String,
        /// Requester display name
        #[arg(long)]
        name: String,
        /// Why the requester should be admitted
        #[arg(long)]
        justification: String,
    },

    /// Approve a membership request
    Approve {
        request_id: String,
    },

    /// Reject a membership request
    RejectRequest {
        request_id: String,
    },

    /// List pending membership requests
    Requests,

    /// Bring request records in line with ledger membership
    ReconcileRequests,

    /// Papers by an author (defaults to --caller)
    Dashboard {
        #[arg(long)]
        author: Option<Address>,
    },

    /// Undecided papers the caller has not voted on
    Queue,

    /// Committee parameters and paper counts
    Stats,

    /// Metadata records with no paper on the ledger
    Orphans,
}

impl Commands {
    /// Whether the command acts on the caller's behalf.
    pub fn needs_caller(&self) -> bool {
        matches!(
            self,
            Commands::Submit(_)
                | Commands::Vote { .. }
                | Commands::Settle { .. }
                | Commands::Resubmit { .. }
                | Commands::RequestMembership { .. }
                | Commands::Approve { .. }
                | Commands::RejectRequest { .. }
                | Commands::ReconcileRequests
                | Commands::Queue
        )
    }

    /// Whether the command reads records an earlier invocation stored.
    ///
    /// The memory backend starts empty on every run, so these only make
    /// sense against a persistent metadata store.
    pub fn reads_stored_records(&self) -> bool {
        matches!(
            self,
            Commands::Approve { .. }
                | Commands::RejectRequest { .. }
                | Commands::Requests
                | Commands::ReconcileRequests
                | Commands::Orphans
        )
    }

    /// Translate into a service command.
    pub async fn into_command(self, service: &GovernanceService) -> anyhow::Result<Command> {
        let command = match self {
            Commands::Demo => anyhow::bail!("demo does not map to a single command"),
            Commands::Papers => Command::ListPapers,
            Commands::Paper { id } => Command::GetPaper { paper_id: PaperId(id) },
            Commands::History { id } => Command::RevisionHistory { paper_id: PaperId(id) },
            Commands::Submit(args) => {
                let (paper, stake, metadata) = args.resolve(service).await?;
                Command::SubmitPaper { paper, stake, metadata }
            }
            Commands::Vote { id, approve, comment } => Command::CastVote {
                paper_id: PaperId(id),
                approve,
                comment,
            },
            Commands::Settle { id } => Command::Settle { paper_id: PaperId(id) },
            Commands::Resubmit { previous, paper } => {
                let (paper, stake, metadata) = paper.resolve(service).await?;
                Command::Resubmit {
                    previous: PaperId(previous),
                    paper,
                    stake,
                    metadata,
                }
            }
            Commands::Members => Command::ListMembers,
            Commands::RequestMembership {
                requester_id,
                name,
                justification,
            } => Command::RequestMembership {
                requester_id,
                requester_name: name,
                justification,
            },
            Commands::Approve { request_id } => Command::ApproveMembership { request_id },
            Commands::RejectRequest { request_id } => Command::RejectMembership { request_id },
            Commands::Requests => Command::PendingRequests,
            Commands::ReconcileRequests => Command::ReconcileRequests,
            Commands::Dashboard { author } => Command::AuthorDashboard { author },
            Commands::Queue => Command::ReviewQueue,
            Commands::Stats => Command::Stats,
            Commands::Orphans => Command::Orphans,
        };
        Ok(command)
    }
}
