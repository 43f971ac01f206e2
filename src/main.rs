//! `capsules`: run the inbox consolidation pipeline from the command line.
//!
//! Every subcommand prints a JSON result on stdout; logs go to stderr
//! (`RUST_LOG` overrides the default `info` level).

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use inbox_capsules::capsules::{CapsuleEngine, EngineSettings};
use inbox_capsules::db::CapsuleDb;
use inbox_capsules::google_api::GmailClient;
use inbox_capsules::intelligence::{OpenAiService, Semantic};
use inbox_capsules::pipeline::EmailPipeline;
use inbox_capsules::processor::EmailProcessor;
use inbox_capsules::retry::RetryPolicy;
use inbox_capsules::state::{load_config, token_path};

#[derive(Debug, Parser)]
#[command(name = "capsules")]
#[command(about = "Consolidate an inbox into capsules and track their follow-ups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest unread mail and place each message in a capsule.
    Process {
        /// Keep running, processing every `--interval` seconds.
        #[arg(long)]
        continuous: bool,
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        max_emails: Option<usize>,
    },
    /// Ingest one thread, then place its new messages.
    IngestThread { thread_id: String },
    /// Sweep recent unlinked messages into new capsules.
    Cluster {
        #[arg(long)]
        days: Option<i64>,
        #[arg(long)]
        min_size: Option<usize>,
    },
    /// Open follow-ups at least N days past due.
    FollowUps {
        #[arg(long, default_value_t = 0)]
        days_overdue: i64,
    },
    /// Mark a follow-up as done.
    CompleteFollowUp {
        capsule_id: String,
        follow_up_id: String,
    },
    /// Most recently updated capsules.
    Capsules {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load capsules config: {e}"))?;

    let db = CapsuleDb::open_configured(config.database_path.as_deref())
        .context("Failed to open capsule store")?;
    let service = OpenAiService::new(&config.openai).context("Failed to build semantic client")?;
    let semantic = Semantic::new(&service, RetryPolicy::from(&config.retry));
    let engine = CapsuleEngine::new(&db, semantic.clone(), EngineSettings::from(&config));

    match cli.command {
        Command::Process {
            continuous,
            interval,
            max_emails,
        } => {
            let token = token_path(&config).map_err(|e| anyhow::anyhow!(e))?;
            let gmail = GmailClient::new(token).context("Failed to build Gmail client")?;
            let pipeline = EmailPipeline::new(&gmail, engine);
            let max = max_emails.unwrap_or(config.max_emails);

            if continuous {
                let interval = Duration::from_secs(interval.unwrap_or(config.interval_seconds));
                pipeline.run_continuous(interval, max, |report| {
                    if let Err(e) = print_json(report) {
                        log::warn!("Failed to print report: {}", e);
                    }
                });
            }
            let report = pipeline.process_once(max);
            print_json(&report)?;
            if !report.success {
                std::process::exit(1);
            }
        }
        Command::IngestThread { thread_id } => {
            let token = token_path(&config).map_err(|e| anyhow::anyhow!(e))?;
            let gmail = GmailClient::new(token).context("Failed to build Gmail client")?;
            let processor = EmailProcessor::new(&db, semantic);
            let email_ids = processor.process_thread(&gmail, &thread_id)?;

            let capsule_ids = engine.place_messages(&email_ids);
            print_json(&serde_json::json!({
                "emailIds": email_ids,
                "capsuleIds": capsule_ids,
            }))?;
        }
        Command::Cluster { days, min_size } => {
            let created = engine.process_clusters(
                days.unwrap_or(config.cluster_days),
                min_size.unwrap_or(config.min_cluster_size),
            )?;
            print_json(&serde_json::json!({
                "createdCapsules": created.len(),
                "capsuleIds": created,
            }))?;
        }
        Command::FollowUps { days_overdue } => {
            print_json(&engine.get_pending_follow_ups(days_overdue)?)?;
        }
        Command::CompleteFollowUp {
            capsule_id,
            follow_up_id,
        } => {
            let completed = engine.mark_follow_up_completed(&capsule_id, &follow_up_id)?;
            print_json(&serde_json::json!({ "completed": completed }))?;
        }
        Command::Capsules { limit } => {
            print_json(&db.list_capsules(limit)?)?;
        }
    }
    Ok(())
}
