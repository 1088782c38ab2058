use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::node::config::{parse_peers_csv, ImporterConfig};
use crate::node::importer::Importer;
use crate::node::ServiceHandle;
use crate::sync::auditor::AuditOutcome;
use crate::utils::logging::init_logging;

/// CLI for the ledger history importer.
#[derive(Parser)]
#[clap(name = "ledger-historian", version)]
pub struct Cli {
    /// Path to a TOML config file (default: <data-dir>/historian.toml if present)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[clap(long)]
    pub data_dir: Option<PathBuf>,

    /// comma separated peer endpoints
    #[clap(long)]
    pub peers: Option<String>,

    #[clap(long)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub cmd: Cmd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ImportMode {
    /// Walk backward from the head (or --start) and exit
    Historical,
    /// Follow the network head until interrupted
    Live,
    /// Historical backfill and live tracking side by side
    Combined,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Import ledgers from the configured peers
    Import {
        #[clap(long, value_enum, default_value = "historical")]
        mode: ImportMode,

        /// ledger index to start walking back from
        #[clap(long)]
        start: Option<u32>,

        /// lowest ledger index to import
        #[clap(long)]
        min: Option<u32>,
    },
    /// Re-verify the stored chain
    Audit {
        #[clap(long)]
        from: Option<u32>,

        #[clap(long)]
        to: Option<u32>,
    },
    /// Print markers, stored range and counters
    Status,
}

fn load_config(cli: &Cli) -> Result<ImporterConfig> {
    let mut cfg = match &cli.config {
        Some(path) => ImporterConfig::load(path)?,
        None => {
            let dir = cli.data_dir.clone().unwrap_or_else(|| ImporterConfig::default().data_dir);
            let default_path = dir.join("historian.toml");
            if default_path.exists() {
                ImporterConfig::load(default_path)?
            } else {
                ImporterConfig::default()
            }
        }
    };
    if let Some(dir) = &cli.data_dir {
        cfg.data_dir = dir.clone();
    }
    if let Some(peers) = &cli.peers {
        cfg.peers.endpoints = parse_peers_csv(peers);
    }
    if let Some(level) = &cli.log_level {
        cfg.log_level = level.clone();
    }
    Ok(cfg)
}

/// Block until ctrl-c or until a task asks for shutdown, then stop everything.
async fn wait_and_stop(svc: ServiceHandle) -> Result<()> {
    let mut stop = svc.shutdown_rx();
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            println!("Shutting down importer...");
        }
        _ = stop.wait_for(|stopped| *stopped) => {
            warn!("a service requested shutdown");
        }
    }
    svc.shutdown().await?;
    println!("Importer stopped");
    Ok(())
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    init_logging(&cfg.log_level);

    match cli.cmd {
        Cmd::Import { mode, start, min } => {
            let importer = Arc::new(Importer::connect(cfg).await?);
            match mode {
                ImportMode::Historical => {
                    let (svc, shutdown) = ServiceHandle::new();
                    let stop = svc.shutdown_sender();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            let _ = stop.send(true);
                        }
                    });
                    let report = importer.historical(start, min, shutdown).await?;
                    info!(saved = report.saved, fetched = report.fetched, repairs = report.repairs, "historical import done");
                    println!(
                        "imported {} ledgers ({}..={}), anchored: {}",
                        report.saved,
                        report.lowest.map(|i| i.to_string()).unwrap_or_else(|| "-".into()),
                        report.highest.map(|i| i.to_string()).unwrap_or_else(|| "-".into()),
                        report.anchored
                    );
                    Ok(())
                }
                ImportMode::Live => {
                    let (mut svc, _rx) = ServiceHandle::new();
                    importer.start_live(&mut svc);
                    wait_and_stop(svc).await
                }
                ImportMode::Combined => {
                    let (mut svc, _rx) = ServiceHandle::new();
                    importer.start_live(&mut svc);
                    importer.start_backfill(&mut svc, start, min);
                    wait_and_stop(svc).await
                }
            }
        }
        Cmd::Audit { from, to } => {
            let importer = Importer::open(cfg, Vec::new()).await?;
            match importer.audit(from, to).await? {
                AuditOutcome::Completed { last_index, checked } => {
                    println!("audit ok: {} ledgers checked, last {:?}", checked, last_index);
                    Ok(())
                }
                AuditOutcome::BrokenAt { last_good, failure } => {
                    bail!("chain broken at ledger {} ({:?}); last good ledger {:?}", failure.index(), failure, last_good)
                }
            }
        }
        Cmd::Status => {
            let importer = Importer::open(cfg, Vec::new()).await?;
            let status = importer.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            print!("{}", importer.metrics());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_import_flags() {
        let cli = Cli::try_parse_from([
            "ledger-historian",
            "--peers",
            "http://a:5005, http://b:5005",
            "import",
            "--mode",
            "combined",
            "--min",
            "32570",
        ])
        .unwrap();
        let cfg = load_config(&cli).unwrap();
        assert_eq!(cfg.peers.endpoints, vec!["http://a:5005".to_string(), "http://b:5005".to_string()]);
        match cli.cmd {
            Cmd::Import { mode, start, min } => {
                assert_eq!(mode, ImportMode::Combined);
                assert_eq!(start, None);
                assert_eq!(min, Some(32570));
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn test_config_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historian.toml");
        std::fs::write(&path, "log_level = \"debug\"\ngenesis_index = 32570\n").unwrap();
        let cli = Cli::try_parse_from([
            "ledger-historian",
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--log-level",
            "warn",
            "status",
        ])
        .unwrap();
        let cfg = load_config(&cli).unwrap();
        assert_eq!(cfg.genesis_index, 32570);
        assert_eq!(cfg.log_level, "warn");
        assert_eq!(cfg.data_dir, dir.path());
    }
}
