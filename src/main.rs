//! CLI for inspecting and repairing deployment directories.

use clap::{Parser, Subcommand};
use deploy_engine::deployment_journal::{DeploymentState, FileJournal, Journal};
use deploy_engine::{list_transactions, status, wipe};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the execution status of every future
    Status {
        /// Deployment directory
        dir: PathBuf,
    },
    /// List the transactions sent by a deployment
    Transactions {
        dir: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove a future's execution state so the next run starts it again
    Wipe {
        dir: PathBuf,
        future_id: String,
    },
    /// Replay a deployment's journal and print the resulting state
    Replay {
        dir: PathBuf,
        /// Print every journal message before the state
        #[arg(long)]
        messages: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Status { dir } => {
            let status = status(&dir)?;
            match status.chain_id {
                Some(chain_id) => println!("Chain id: {chain_id}"),
                None => println!("Chain id: unknown"),
            }
            for id in &status.outcomes.successful {
                match status.contracts.get(id) {
                    Some(contract) => println!("  {id:40} SUCCESS  {}", contract.address),
                    None => println!("  {id:40} SUCCESS"),
                }
            }
            for id in &status.outcomes.started {
                println!("  {id:40} STARTED");
            }
            for held in &status.outcomes.held {
                println!("  {:40} HELD     {}", held.future_id, held.reason);
            }
            for id in &status.outcomes.timed_out {
                println!("  {id:40} TIMEOUT");
            }
            for failed in &status.outcomes.failed {
                println!("  {:40} FAILED   {}", failed.future_id, failed.error);
            }
        }
        Commands::Transactions { dir, json } => {
            let transactions = list_transactions(&dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&transactions)?);
            } else {
                for tx in transactions {
                    println!(
                        "{:40} | {:7} | {} | {}",
                        tx.future_id, tx.status, tx.tx_hash, tx.from
                    );
                }
            }
        }
        Commands::Wipe { dir, future_id } => {
            wipe(&dir, &future_id)?;
            println!("{future_id} state has been cleared");
        }
        Commands::Replay { dir, messages } => {
            let journal = FileJournal::open(&dir)?;
            let recorded = journal.read()?;
            if messages {
                for message in &recorded {
                    println!("{}", serde_json::to_string(message)?);
                }
            }
            let state = DeploymentState::replay(&recorded)
                .wrap_err_with(|| format!("replaying {}", dir.display()))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }
    Ok(())
}
