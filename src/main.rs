// src/main.rs
//! satchel - CLI entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use satchel::fetch::{LocalDownloader, MemArchiveSource};
use satchel::{
    config::Config, dest::Destination, dest::Destinations, files, solver::Goal, status,
    transact, Backends, PkgIndex, PkgVersion, Solver, Transaction,
};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

#[derive(Parser)]
#[command(name = "satchel")]
#[command(version)]
#[command(about = "Lightweight package manager for resource-constrained systems", long_about = None)]
struct Cli {
    /// Install root directory
    #[arg(short, long, default_value = "/")]
    root: PathBuf,

    /// Stage all paths under this prefix instead of the live root
    #[arg(long)]
    offline_root: Option<PathBuf>,

    /// Package feed lists to load (control format, local files)
    #[arg(long)]
    feed: Vec<PathBuf>,

    /// Accept packages with missing or wrong checksums
    #[arg(long)]
    force_checksum: bool,

    /// Also install recommended packages
    #[arg(long)]
    add_recommends: bool,

    /// Allow removal of essential packages
    #[arg(long)]
    force_removal_of_essential: bool,

    /// Keep the full field set in the status file
    #[arg(long)]
    verbose_status: bool,

    /// Plan and report without touching the filesystem
    #[arg(long)]
    noaction: bool,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages (name or name=version)
    Install { packages: Vec<String> },

    /// Remove installed packages, keeping their conffiles
    Remove { packages: Vec<String> },

    /// Remove installed packages including conffiles
    Purge { packages: Vec<String> },

    /// Upgrade one package, or everything when none is named
    Upgrade { package: Option<String> },

    /// Re-run configuration for unpacked or half-configured packages
    Configure { package: Option<String> },

    /// Show the status of installed packages
    Status { package: Option<String> },

    /// List the files owned by an installed package
    Files { package: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("satchel: {:#}", err);
            let code = err
                .downcast_ref::<satchel::Error>()
                .map(satchel::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::default();
    config.offline_root = cli.offline_root.clone();
    config.force_checksum = cli.force_checksum;
    config.add_recommends = cli.add_recommends;
    config.force_removal_of_essential = cli.force_removal_of_essential;
    config.verbose_status_file = cli.verbose_status;
    config.noaction = cli.noaction;

    let mut dests = Destinations::new();
    let dest_id = dests.add(Destination::new("root", &cli.root));

    let mut index = PkgIndex::new();
    status::load_status(&mut index, &dests, dest_id)?;
    for feed in &cli.feed {
        let file = File::open(feed).with_context(|| format!("opening feed {}", feed.display()))?;
        for pkg in satchel::control::parse_control(BufReader::new(file), Some(feed))? {
            index.insert(pkg);
        }
    }

    let mut ownership = files::rebuild_ownership(&index, &dests, &config);

    let goals = match &cli.command {
        Commands::Install { packages } => packages.iter().map(|s| install_goal(s)).collect::<Result<Vec<_>>>()?,
        Commands::Remove { packages } => packages
            .iter()
            .map(|name| {
                Ok(Goal::Remove {
                    name: name.clone(),
                    purge: false,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Commands::Purge { packages } => packages
            .iter()
            .map(|name| {
                Ok(Goal::Remove {
                    name: name.clone(),
                    purge: true,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Commands::Upgrade { package } => vec![Goal::Upgrade {
            name: package.clone(),
        }],
        Commands::Configure { package } => {
            return configure_command(
                &mut index, &dests, dest_id, &config, &mut ownership, package.as_deref(),
            );
        }
        Commands::Status { package } => {
            return status_command(&index, package.as_deref());
        }
        Commands::Files { package } => {
            return files_command(&dests, dest_id, &config, package);
        }
    };

    let plan = Solver::new(&mut index, &config).solve(&goals)?;
    if plan.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    let downloader = LocalDownloader;
    let archives = MemArchiveSource::new();
    let backends = Backends {
        downloader: &downloader,
        archives: &archives,
        signer: None,
    };
    let cancel = transact::install_signal_handler();
    let mut txn = Transaction::new(&mut index, &dests, &config, &mut ownership, backends)
        .with_cancel(cancel);

    match txn.recover(dest_id) {
        Ok(outcomes) => {
            for outcome in outcomes {
                tracing::info!("recovery: {:?}", outcome);
            }
        }
        Err(e) => warn!("recovery incomplete: {}", e),
    }

    txn.execute(&plan, dest_id)?;
    Ok(())
}

fn install_goal(spec: &str) -> Result<Goal> {
    match spec.split_once('=') {
        Some((name, version)) => Ok(Goal::Install {
            name: name.to_string(),
            version: Some(PkgVersion::parse(version)?),
        }),
        None => Ok(Goal::Install {
            name: spec.to_string(),
            version: None,
        }),
    }
}

fn configure_command(
    index: &mut PkgIndex,
    dests: &Destinations,
    dest_id: satchel::DestId,
    config: &Config,
    ownership: &mut files::FileOwnership,
    package: Option<&str>,
) -> Result<()> {
    let downloader = LocalDownloader;
    let archives = MemArchiveSource::new();
    let backends = Backends {
        downloader: &downloader,
        archives: &archives,
        signer: None,
    };

    let targets: Vec<satchel::PkgId> = index
        .iter_ids()
        .filter(|&id| {
            let p = index.pkg(id);
            matches!(
                p.state_status,
                satchel::StateStatus::Unpacked | satchel::StateStatus::HalfConfigured
            ) && package.map(|n| p.name == n).unwrap_or(true)
        })
        .collect();

    let mut txn = Transaction::new(index, dests, config, ownership, backends);
    for id in targets {
        txn.configure(id, dest_id)?;
    }
    Ok(())
}

fn status_command(index: &PkgIndex, package: Option<&str>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for id in index.all_with_state() {
        if let Some(name) = package {
            if index.pkg(id).name != name {
                continue;
            }
        }
        satchel::control::write_info_entry(&mut out, index, id)?;
    }
    out.flush()?;
    Ok(())
}

fn files_command(
    dests: &Destinations,
    dest_id: satchel::DestId,
    config: &Config,
    package: &str,
) -> Result<()> {
    let mut cache = files::ListCache::new();
    let listed = cache
        .get(dests.get(dest_id), package, config)
        .with_context(|| format!("no file list for {}", package))?;
    for info in listed {
        println!("{}", info.path.display());
    }
    Ok(())
}
