//! Curation ledger (hl-ledger) - command line entry point

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hl_common::config::{find_config_file, resolve_database_path, FileConfig, DATABASE_ENV_VAR};
use hl_common::db::VariantSampleId;
use hl_ledger::details::OtherEvaluations;
use hl_ledger::records::CommentValue;
use hl_ledger::verdict::{EvaluationField, EvaluationValue, Interest, Pathogenicity};
use hl_ledger::{ActionOutcome, CommentTarget, CurationAction, Ledger, SessionConfig};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for hl-ledger
#[derive(Parser, Debug)]
#[command(name = "hl-ledger")]
#[command(about = "Curation ledger for variant evaluations and comments")]
#[command(version)]
struct Args {
    /// Path of the ledger database
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Acting username
    #[arg(short, long, env = "HL_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database
    Init,

    /// Set the pathogenicity class of selected rows
    Evaluate {
        #[arg(long, value_delimiter = ',', required = true)]
        rows: Vec<i64>,
        /// 0-5, roman numeral or "none"
        #[arg(long)]
        class: String,
    },

    /// Set a verification check or the evaluation comment
    Check {
        #[arg(long, value_delimiter = ',', required = true)]
        rows: Vec<i64>,
        /// Column name, e.g. check_insilico
        #[arg(long)]
        field: String,
        #[arg(long)]
        value: String,
    },

    /// Write a private or public comment
    Comment {
        #[arg(long, value_delimiter = ',', required = true)]
        rows: Vec<i64>,
        #[arg(long, value_enum)]
        target: TargetArg,
        /// Write the shared public comment instead of your own
        #[arg(long)]
        public: bool,
        #[arg(long)]
        text: String,
    },

    /// Set your "of interest" flag
    Flag {
        #[arg(long, value_delimiter = ',', required = true)]
        rows: Vec<i64>,
        #[arg(long, value_enum)]
        target: TargetArg,
        /// yes, no or unset
        #[arg(long)]
        interest: String,
    },

    /// Print the details panels of one row
    Show {
        #[arg(long)]
        row: i64,
    },

    /// Print evaluations of the same variant in other samples
    Others {
        #[arg(long)]
        row: i64,
        /// Include samples without a pathogenicity class
        #[arg(long)]
        all: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TargetArg {
    Variant,
    Gene,
    Sample,
}

impl From<TargetArg> for CommentTarget {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Variant => CommentTarget::Variant,
            TargetArg::Gene => CommentTarget::Gene,
            TargetArg::Sample => CommentTarget::Sample,
        }
    }
}

fn row_ids(rows: &[i64]) -> Vec<VariantSampleId> {
    rows.iter().copied().map(VariantSampleId).collect()
}

/// Acting username: flag or HL_USER, then config.toml
fn resolve_actor(cli_user: Option<String>) -> Result<SessionConfig> {
    let username = match cli_user {
        Some(user) => user,
        None => {
            let config = match find_config_file() {
                Ok(path) => FileConfig::load(&path)?,
                Err(_) => FileConfig::default(),
            };
            match config.username {
                Some(user) => user,
                None => bail!("No username given, use --user or HL_USER"),
            }
        }
    };
    Ok(SessionConfig::new(username)?)
}

/// Curator-facing error; driver details stay in the logs
fn user_error(err: hl_common::Error) -> anyhow::Error {
    anyhow!(err.user_message())
}

/// Details panels of one row
async fn show_report(ledger: &Ledger, session: &SessionConfig, row: i64) -> hl_common::Result<Value> {
    let occurrence = ledger.identity().resolve(VariantSampleId(row)).await?;
    let details = ledger.details();
    Ok(json!({
        "occurrence": occurrence,
        "evaluation": details.evaluation(&occurrence).await?,
        "private": details.private(&session.actor, &occurrence).await?,
        "public": details.public(&occurrence).await?,
    }))
}

async fn others_report(ledger: &Ledger, row: i64, all: bool) -> hl_common::Result<OtherEvaluations> {
    let occurrence = ledger.identity().resolve(VariantSampleId(row)).await?;
    ledger.details().other_evaluations(&occurrence.variant, all).await
}

fn print_outcome(outcome: &ActionOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hl_ledger=info,hl_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let db_path = resolve_database_path(args.database.as_deref(), DATABASE_ENV_VAR)
        .context("Failed to resolve database path")?;
    info!("Database: {}", db_path.display());

    let ledger = Ledger::open(&db_path)
        .await
        .context("Failed to open ledger database")?;

    let action = match args.command {
        Command::Init => {
            info!("Database ready");
            return Ok(());
        }
        Command::Show { row } => {
            let session = resolve_actor(args.user)?;
            let report = show_report(&ledger, &session, row).await.map_err(user_error)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        Command::Others { row, all } => {
            let others = others_report(&ledger, row, all).await.map_err(user_error)?;
            println!("{}", serde_json::to_string_pretty(&others)?);
            return Ok(());
        }
        Command::Evaluate { rows, class } => {
            let class: Pathogenicity = class.parse()?;
            CurationAction::Evaluate {
                rows: row_ids(&rows),
                value: EvaluationValue::Evaluation(class),
            }
        }
        Command::Check { rows, field, value } => {
            let field: EvaluationField = field.parse()?;
            CurationAction::Evaluate {
                rows: row_ids(&rows),
                value: EvaluationValue::parse(field, &value)?,
            }
        }
        Command::Comment {
            rows,
            target,
            public,
            text,
        } => {
            if public {
                CurationAction::SetPublicComment {
                    rows: row_ids(&rows),
                    target: target.into(),
                    text,
                }
            } else {
                CurationAction::SetPrivate {
                    rows: row_ids(&rows),
                    target: target.into(),
                    value: CommentValue::Text(text),
                }
            }
        }
        Command::Flag {
            rows,
            target,
            interest,
        } => {
            let interest: Interest = interest.parse()?;
            CurationAction::SetPrivate {
                rows: row_ids(&rows),
                target: target.into(),
                value: CommentValue::Interest(interest),
            }
        }
    };

    let session = resolve_actor(args.user)?;
    let outcome = ledger
        .submit(session, action)
        .await
        .context("Curation task panicked")?;

    match outcome {
        Ok(outcome) => print_outcome(&outcome),
        Err(e) => Err(user_error(e)),
    }
}
