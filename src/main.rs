//! relaymail - transfer, mailbox and monitoring servers
//!
//! Starts one component from a TOML configuration file and runs it until
//! standard input reaches end-of-file or reads a `shutdown` line.

use clap::{Parser, Subcommand};
use relaymail::{Config, MailboxServer, MonitoringServer, TransferServer};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use tracing::info;

/// relaymail - distributed mail relay
#[derive(Parser, Debug)]
#[command(name = "relaymail")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "relaymail.toml")]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept submissions and relay them to mailbox servers
    Transfer,

    /// Store relayed mail and serve it to its users
    Mailbox,

    /// Collect delivery reports
    Monitoring,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> relaymail::Result<()> {
    let mut config = Config::load(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if let Err(e) = relaymail::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        let _ = relaymail::logging::init_console_only(&config.logging.level);
    }

    match cli.command {
        Commands::Transfer => {
            let server = TransferServer::new(config.transfer()?.clone(), config.domains.clone());
            let handle = server.start()?;
            wait_for_shutdown()?;
            handle.shutdown();
        }
        Commands::Mailbox => {
            let handle = MailboxServer::new(config.mailbox()?.clone()).start()?;
            wait_for_shutdown()?;
            handle.shutdown();
        }
        Commands::Monitoring => {
            let handle = MonitoringServer::new(config.monitoring()?.clone()).start()?;
            wait_for_shutdown()?;
            for (server, count) in handle.servers() {
                println!("{server} {count}");
            }
            for (address, count) in handle.addresses() {
                println!("{address} {count}");
            }
            handle.shutdown();
        }
    }

    Ok(())
}

/// Block until stdin closes or an operator types `shutdown`
fn wait_for_shutdown() -> io::Result<()> {
    info!("type 'shutdown' or close stdin to stop");
    for line in io::stdin().lock().lines() {
        if line?.trim() == "shutdown" {
            break;
        }
    }
    Ok(())
}
