//! CourierKV CLI
//!
//! Offline inspection of a data directory: WAL verification, store dumps
//! and snapshot listings.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use courierkv::snapshot::SnapshotReader;
use courierkv::wal::WalRecovery;
use courierkv::{Config, Result};

/// CourierKV CLI
#[derive(Parser, Debug)]
#[command(name = "courierkv-cli")]
#[command(about = "Inspect CourierKV data directories")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the WAL and report statistics or the first corruption
    Verify {
        /// Data directory holding wal.log
        data_dir: PathBuf,
    },

    /// Replay the WAL into a fresh store and print it as JSON
    Dump {
        /// Data directory holding wal.log
        data_dir: PathBuf,
    },

    /// List snapshots in a directory, oldest first
    Snapshots {
        /// Snapshot directory
        dir: PathBuf,
    },

    /// Print the contents of one snapshot
    Show {
        /// Snapshot file
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let result = match args.command {
        Commands::Verify { data_dir } => verify(&data_dir),
        Commands::Dump { data_dir } => dump(&data_dir),
        Commands::Snapshots { dir } => snapshots(&dir),
        Commands::Show { path } => show(&path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn wal_path(data_dir: &Path) -> PathBuf {
    Config::builder().data_dir(data_dir).build().wal_path()
}

fn verify(data_dir: &Path) -> Result<()> {
    let path = wal_path(data_dir);
    let result = WalRecovery::verify(&path)?;
    println!("WAL:      {}", path.display());
    println!("entries:  {}", result.entries_replayed);
    println!("last lsn: {}", result.last_lsn);
    println!("status:   ok");
    Ok(())
}

fn dump(data_dir: &Path) -> Result<()> {
    let (store, result) = WalRecovery::recover(&wal_path(data_dir))?;
    eprintln!(
        "replayed {} entries up to lsn {}",
        result.entries_replayed, result.last_lsn
    );
    println!("{}", serde_json::to_string_pretty(&store.to_json())?);
    Ok(())
}

fn snapshots(dir: &Path) -> Result<()> {
    let list = SnapshotReader::list(dir)?;
    if list.is_empty() {
        println!("no snapshots in {}", dir.display());
        return Ok(());
    }

    for (timestamp, path) in list {
        match SnapshotReader::read(&path) {
            Ok(image) => println!(
                "{}  captured_at={}  lsn={}  keys={}",
                path.display(),
                timestamp,
                image.lsn,
                image.data.len()
            ),
            Err(e) => println!("{}  unreadable: {}", path.display(), e),
        }
    }
    Ok(())
}

fn show(path: &Path) -> Result<()> {
    let image = SnapshotReader::read(path)?;
    println!("{}", serde_json::to_string_pretty(&image)?);
    Ok(())
}
