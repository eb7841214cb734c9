//! `lgh` - local git hub.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lgh_events::{read_events, select_last};
use lgh_node::auth::{hash_password, MIN_PASSWORD_LENGTH};
use lgh_node::config::Config;
use lgh_node::display::format_event_line;
use lgh_node::observability::{init_logging, LogFormat};
use lgh_node::replay::{Delivery, Replayer, DEFAULT_REPLAY_COUNT};
use lgh_node::server::Gateway;
use lgh_node::shutdown::shutdown_signal;
use std::path::PathBuf;

/// LGH - a local git hub with a live event stream
#[derive(Parser, Debug)]
#[command(name = "lgh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP gateway
    Serve(ServeArgs),
    /// Show, watch or replay events
    Events(EventsArgs),
    /// Authentication helpers
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    bind: Option<String>,

    /// Reject push operations
    #[arg(short, long)]
    read_only: bool,

    /// Allow a network bind without authentication or read-only mode
    #[arg(long)]
    allow_unsafe: bool,
}

#[derive(Args, Debug)]
struct EventsArgs {
    /// Number of events to show
    #[arg(short = 'n', long = "last", default_value_t = 20)]
    last: usize,

    /// Only events of this type (e.g. git.push)
    #[arg(long = "type")]
    event_type: Option<String>,

    #[command(subcommand)]
    command: Option<EventsCommand>,
}

#[derive(Subcommand, Debug)]
enum EventsCommand {
    /// Stream live events from the running gateway
    Watch {
        /// Only events of this type
        #[arg(long = "type")]
        event_type: Option<String>,
    },
    /// Re-send logged events to live subscribers
    Replay {
        /// Number of recent events to replay
        #[arg(short = 'n', long = "last", default_value_t = DEFAULT_REPLAY_COUNT)]
        last: usize,

        /// Only events of this type
        #[arg(long = "type")]
        event_type: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Print a salted hash for auth_password_hash
    HashPassword {
        /// Password to hash
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve(args) => serve(config, args).await,
        Command::Events(args) => events(config, args).await,
        Command::Auth {
            command: AuthCommand::HashPassword { password },
        } => {
            if password.chars().count() < MIN_PASSWORD_LENGTH {
                bail!("password must be at least {} characters", MIN_PASSWORD_LENGTH);
            }
            println!("{}", hash_password(&password));
            Ok(())
        }
    }
}

async fn serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    // The flag can only enable read-only mode, never disable it.
    config.read_only |= args.read_only;
    config.allow_unsafe |= args.allow_unsafe;

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));

    let gateway = Gateway::new(config).await?;
    let listener = gateway.bind().await?;
    eprintln!("LGH serving repositories at {}", gateway.config().server_url());
    gateway.run(listener, shutdown_signal()).await
}

async fn events(config: Config, args: EventsArgs) -> Result<()> {
    match args.command {
        None => {
            let path = config.event_log_path();
            let events = read_events(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            if events.is_empty() {
                eprintln!("No events found in {}", path.display());
                return Ok(());
            }
            for event in select_last(events, args.last, args.event_type.as_deref()) {
                println!("{}", format_event_line(&event));
            }
            Ok(())
        }
        Some(EventsCommand::Watch { event_type }) => watch(&config, event_type).await,
        Some(EventsCommand::Replay { last, event_type }) => {
            let replayer = Replayer::new(config.port)?;
            let path = config.event_log_path();
            let events = select_last(read_events(&path)?, last, event_type.as_deref());
            if events.is_empty() {
                eprintln!("No matching events found to replay.");
                return Ok(());
            }

            println!("Replaying {} events to {}...", events.len(), replayer.url());
            let report = replayer
                .replay(&events, |event, delivery| {
                    println!("  -> {} {}", event.event_type(), event.repo_name());
                    match delivery {
                        Delivery::Accepted => {}
                        Delivery::Rejected(status) => println!("  ! Server returned {}", status),
                        Delivery::Failed => println!("  ! Failed to send event {}", event.id()),
                    }
                })
                .await?;
            println!("Replayed {} events successfully.", report.accepted);
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn watch(config: &Config, event_type: Option<String>) -> Result<()> {
    let path = config.socket_path();
    eprintln!("Watching events on {} (Ctrl+C to stop)", path.display());
    lgh_node::ipc::watch(&path, |event| {
        let wanted = event_type
            .as_deref()
            .map_or(true, |t| event.event_type().as_str() == t);
        if wanted {
            println!("{}", format_event_line(&event));
        }
    })
    .await?;
    eprintln!("Server closed the event stream.");
    Ok(())
}

#[cfg(not(unix))]
async fn watch(_config: &Config, _event_type: Option<String>) -> Result<()> {
    bail!("live event streaming requires Unix domain sockets")
}
