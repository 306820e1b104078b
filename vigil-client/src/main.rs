//! Vigil client (vigil-client) - Main entry point
//!
//! Command-line consumer for a Vigil detection server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_client::ProtocolClient;
use vigil_common::artifact::validate_artifact_name;
use vigil_common::protocol::{DEFAULT_ARTIFACT_PORT, DEFAULT_EVENT_PORT};
use vigil_common::DetectionEvent;

/// Command-line arguments for vigil-client
#[derive(Parser, Debug)]
#[command(name = "vigil-client")]
#[command(about = "Fetch detection events and images from a Vigil server")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1", env = "VIGIL_HOST")]
    host: String,

    /// Event protocol port
    #[arg(long, default_value_t = DEFAULT_EVENT_PORT, env = "VIGIL_EVENT_PORT")]
    event_port: u16,

    /// Artifact protocol port
    #[arg(long, default_value_t = DEFAULT_ARTIFACT_PORT, env = "VIGIL_ARTIFACT_PORT")]
    artifact_port: u16,

    /// Connect and I/O timeout in seconds
    #[arg(long, default_value_t = 5, env = "VIGIL_CLIENT_TIMEOUT")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drain and print all pending events
    Events {
        /// Print the raw JSON array instead of one line per event
        #[arg(long)]
        json: bool,
    },
    /// Drain and print the newest N pending events
    Last { n: usize },
    /// Print the number of pending events
    Count,
    /// Download one detection image
    Image {
        name: String,
        /// Output file (defaults to the image name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the images available on the server
    List,
    /// Poll for events until Ctrl+C, optionally downloading their images
    Watch {
        /// Poll interval in seconds
        #[arg(long, default_value_t = 2)]
        interval: u64,
        /// Save each event's image into this directory
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let client = ProtocolClient::with_ports(args.host.clone(), args.event_port, args.artifact_port)
        .with_timeout(Duration::from_secs(args.timeout));

    match args.command {
        Command::Events { json } => {
            let events = client.fetch_events().await.context("Failed to fetch events")?;
            if json {
                println!("{}", vigil_common::protocol::wire::encode_events(&events));
            } else {
                print_events(&events);
            }
        }
        Command::Last { n } => {
            let events = client
                .fetch_last_events(n)
                .await
                .context("Failed to fetch events")?;
            print_events(&events);
        }
        Command::Count => {
            let count = client.fetch_count().await.context("Failed to fetch count")?;
            println!("{}", count);
        }
        Command::Image { name, output } => {
            let dest = output.unwrap_or_else(|| PathBuf::from(&name));
            let bytes = client
                .download_artifact(&name, &dest)
                .await
                .with_context(|| format!("Failed to download {}", name))?;
            println!("Saved {} ({} bytes)", dest.display(), bytes);
        }
        Command::List => {
            let names = client.list_artifacts().await.context("Failed to list images")?;
            for name in names {
                println!("{}", name);
            }
        }
        Command::Watch {
            interval,
            download_dir,
        } => {
            if let Some(dir) = &download_dir {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            tokio::select! {
                _ = watch(&client, Duration::from_secs(interval.max(1)), download_dir.as_deref()) => {},
                _ = signal::ctrl_c() => info!("Received Ctrl+C, stopping"),
            }
        }
    }

    Ok(())
}

fn print_events(events: &[DetectionEvent]) {
    if events.is_empty() {
        println!("No pending events");
    }
    for event in events {
        println!("{}", event);
    }
}

/// Poll `GET_LOGS` forever; failures are reported and polling continues
async fn watch(client: &ProtocolClient, interval: Duration, download_dir: Option<&Path>) {
    info!("Watching {} every {:?}", client.host(), interval);
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let events = match client.fetch_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Poll failed: {}", e);
                continue;
            }
        };

        for event in &events {
            println!("{}", event);

            let Some(dir) = download_dir else { continue };
            // Never write outside `dir`, whatever name the server sent
            let Ok(name) = validate_artifact_name(&event.artifact_name) else {
                warn!("Skipping image with unsafe name '{}'", event.artifact_name);
                continue;
            };
            let dest = dir.join(name);
            if let Err(e) = client.download_artifact(name, &dest).await {
                warn!("Failed to download {}: {}", name, e);
            }
        }
    }
}
