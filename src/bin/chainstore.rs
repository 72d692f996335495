//! chainstore maintenance binary
//!
//! Opens a persistent store (graph store disabled) and runs one command.

use std::process;

use clap::{Parser, Subcommand};
use chainstore::database::CommitMarker;
use chainstore::{Config, Database, OpenError, StoreError};
use tracing_subscriber::{fmt, EnvFilter};

/// chainstore maintenance
#[derive(Parser, Debug)]
#[command(name = "chainstore")]
#[command(about = "Inspect and maintain a chainstore data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./chainstore_data")]
    data_dir: String,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "64")]
    memtable_mb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify the commit markers agree
    Check,

    /// Rewrite the commit markers after an accepted inconsistency
    Repair,

    /// Print the current chain tip
    Tip,

    /// Print the latest epoch, or every epoch of an era
    Epoch {
        #[arg(long)]
        era: Option<u32>,
    },

    /// Print blob store statistics
    Stats,

    /// Run value log GC until nothing is left to reclaim
    Gc,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chainstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("chainstore v{}", chainstore::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .without_graph()
        .gc_enabled(false)
        .build();

    let db = match Database::open(config) {
        Ok(db) => db,
        Err(OpenError::Init { db, source }) => match args.command {
            // Repair and check need the handle even when init failed
            Commands::Repair | Commands::Check => {
                tracing::warn!("Initialization failed: {}", source);
                *db
            }
            _ => {
                tracing::error!("Failed to initialize database: {}", source);
                tracing::error!("Run `chainstore repair` to accept the current state");
                process::exit(2);
            }
        },
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            process::exit(1);
        }
    };

    let result = run(&db, &args.command);
    let close_result = db.close();

    if let Err(e) = result {
        tracing::error!("Command failed: {}", e);
        process::exit(1);
    }
    if let Err(e) = close_result {
        tracing::error!("Close failed: {}", e);
        process::exit(1);
    }
}

fn run(db: &Database, command: &Commands) -> chainstore::Result<()> {
    match command {
        Commands::Check => match db.check_consistency() {
            Ok(CommitMarker::Fresh) => println!("consistent (no commits yet)"),
            Ok(CommitMarker::Consistent(ts)) => println!("consistent (last commit {} ms)", ts),
            Err(StoreError::Inconsistency(reason)) => {
                println!("INCONSISTENT: {}", reason);
                return Err(StoreError::Inconsistency(reason));
            }
            Err(e) => return Err(e),
        },
        Commands::Repair => {
            let ts = db.repair_commit_timestamp()?;
            println!("commit markers set to {} ms", ts);
        }
        Commands::Tip => match db.metadata().get_tip(None) {
            Ok(tip) => println!(
                "slot {} block {} hash {}",
                tip.slot,
                tip.block_number,
                hex(&tip.hash)
            ),
            Err(e) if e.is_not_found() => println!("no tip recorded"),
            Err(e) => return Err(e),
        },
        Commands::Epoch { era: Some(era) } => {
            for epoch in db.metadata().get_epochs_by_era(*era, None)? {
                print_epoch(&epoch);
            }
        }
        Commands::Epoch { era: None } => match db.metadata().get_epoch_latest(None) {
            Ok(epoch) => print_epoch(&epoch),
            Err(e) if e.is_not_found() => println!("no epoch recorded"),
            Err(e) => return Err(e),
        },
        Commands::Stats => {
            let stats = db.blob().stats();
            println!("memtable bytes:   {}", stats.memtable_bytes);
            println!("memtable entries: {}", stats.memtable_entries);
            println!("vlog segments:    {}", stats.segment_count);
            println!("vlog bytes:       {}", stats.vlog_bytes);
        }
        Commands::Gc => {
            db.blob().flush()?;
            let report = db.collect_garbage()?;
            println!(
                "{} passes, {} segments rewritten, {} bytes reclaimed{}",
                report.attempts,
                report.rewrites,
                report.reclaimed_bytes,
                if report.failed { " (stopped on error)" } else { "" }
            );
        }
    }
    Ok(())
}

fn print_epoch(epoch: &chainstore::metadata::Epoch) {
    println!(
        "epoch {} era {} start slot {} length {} x {} nonce {}",
        epoch.epoch_id,
        epoch.era_id,
        epoch.start_slot,
        epoch.length_in_slots,
        epoch.slot_length,
        hex(&epoch.nonce)
    );
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
