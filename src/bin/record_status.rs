//! record_status - review stored detection records and update their status
//!
//! The only field that may change after a record is created is `status`;
//! `set` performs that read-modify-write through the configured record store.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use roadscan::runtime::open_record_store;
use roadscan::store::RecordStatus;
use roadscan::{RecordId, RoadscanConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "ROADSCAN_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List records in push order.
    List {
        /// Only records not marked fixed.
        #[arg(long)]
        unfixed: bool,
        /// Print JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Print one record as JSON.
    Show { id: String },
    /// Set the status of a record (e.g. "fixed").
    Set { id: String, status: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let cfg = RoadscanConfig::load_from(args.config.as_deref())?;
    let store = open_record_store(&cfg)?;

    match args.command {
        Command::List { unfixed, json } => {
            for (id, record) in store.list()? {
                if unfixed && record.is_fixed() {
                    continue;
                }
                if json {
                    let mut value = serde_json::to_value(&record)?;
                    value["id"] = serde_json::Value::from(id.as_str());
                    println!("{}", serde_json::to_string(&value)?);
                } else {
                    println!(
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        id, record.status, record.latitude, record.longitude, record.address,
                        record.image_url
                    );
                }
            }
        }
        Command::Show { id } => {
            let id = RecordId::new(id);
            let record = store
                .get(&id)?
                .ok_or_else(|| anyhow!("record {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Set { id, status } => {
            let status = status.trim();
            if status.is_empty() {
                return Err(anyhow!("status must not be empty"));
            }
            let id = RecordId::new(id);
            store.set_field(&id, "status", status)?;
            log::info!(
                "record {} status set to '{}' (fixed={})",
                id,
                status,
                RecordStatus::is_fixed(status)
            );
            println!("{} {}", id, status);
        }
    }
    Ok(())
}
