//! vmess-relay agent
//!
//! Command-line host for the tunnel manager:
//! - `run`: relay a share link until Ctrl-C
//! - `parse`: decode a share link and print the endpoint
//! - `serve`: answer JSON requests on stdin/stdout, one per line
//! - `generate-config`: print an example configuration

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use vmess_relay::{
    config::{generate_example_config, Config, LoggingConfig},
    host::HostCapabilities,
    TunnelManager, TunnelService,
};

/// vmess-relay agent - local relay to a vmess share-link endpoint
#[derive(Parser, Debug)]
#[command(name = "vmess-agent")]
#[command(about = "Local tunneling agent: relays TCP to the endpoint of a vmess share link")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay and run until Ctrl-C
    Run {
        /// Share link (vmess://...)
        uri: String,

        /// Local listen address (overrides config)
        #[arg(short, long)]
        listen: Option<String>,

        /// Fail instead of continuing when the virtual interface is unavailable
        #[arg(long)]
        require_interface: bool,
    },
    /// Decode a share link and print the endpoint
    Parse {
        /// Share link (vmess://...)
        uri: String,
    },
    /// Serve JSON requests on stdin, replies on stdout
    Serve,
    /// Print an example configuration file
    GenerateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    match args.command {
        Command::GenerateConfig => {
            let toml = toml::to_string_pretty(&generate_example_config())
                .context("Failed to serialize example config")?;
            print!("{}", toml);
            Ok(())
        }
        Command::Parse { uri } => print_endpoint(&uri),
        Command::Run {
            uri,
            listen,
            require_interface,
        } => {
            if let Some(listen) = listen {
                config.relay.listen = listen;
            }
            config.interface.required |= require_interface;
            init_logging(&config.logging)?;
            run(config, &uri).await
        }
        Command::Serve => {
            init_logging(&config.logging)?;
            serve(config).await
        }
    }
}

/// Initialize logging from config; logs go to stderr or the configured file
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&logging.level)
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    let writer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(logging.file.is_none());

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
    Ok(())
}

fn print_endpoint(uri: &str) -> Result<()> {
    let endpoint = vmess_relay::parse(uri).context("Failed to parse share link")?;
    let hints = &endpoint.hints;

    println!("scheme:     {}", endpoint.scheme);
    println!("host:       {}", endpoint.host);
    println!("port:       {}", endpoint.port);
    println!("identifier: {}", endpoint.masked_identifier());
    if let Some(label) = &hints.label {
        println!("label:      {}", label);
    }
    if let Some(network) = &hints.network {
        println!("network:    {}", network);
    }
    if let Some(tls) = hints.tls.as_deref().filter(|t| !t.is_empty()) {
        println!("tls:        {}", tls);
    }
    Ok(())
}

async fn run(config: Config, uri: &str) -> Result<()> {
    let manager = TunnelManager::new(config, HostCapabilities::default());

    info!("vmess-relay agent v{}", vmess_relay::VERSION);
    let outcome = manager
        .start(uri)
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;
    info!("Relay: {} -> {}", outcome.local_addr(), outcome.endpoint());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    info!("Shutting down...");

    manager.stop();
    let stats = manager.stats();
    info!(
        "Relayed {} session(s), {} bytes up, {} bytes down, {} failed dial(s)",
        stats.accepted, stats.bytes_upstream, stats.bytes_downstream, stats.dial_failures
    );
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let manager = Arc::new(TunnelManager::new(config, HostCapabilities::default()));
    let service = TunnelService::new(Arc::clone(&manager));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("vmess-relay agent v{} serving requests on stdin", vmess_relay::VERSION);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read request")? else {
                    info!("Request stream closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let mut reply = service.handle_json(&line);
                reply.push('\n');
                if let Err(e) = stdout.write_all(reply.as_bytes()).await {
                    error!("Failed to write reply: {}", e);
                    break;
                }
                stdout.flush().await.ok();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    service.stop_tunnel();
    Ok(())
}
