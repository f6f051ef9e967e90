use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doctoknow::{api, app::AppState, config, knowledge::WorkItem, logging};
use tokio::net::TcpListener;

/// PDF knowledge extraction pipeline and retrieval service.
#[derive(Parser)]
#[command(name = "doctoknow", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API and run the background workers (default).
    Serve,
    /// Process one work item and print its outcome as JSON.
    Process {
        /// Work item as JSON, e.g. `{"job_id":"…","folder_path":"…","file_name":"…","processing_mode":"full"}`.
        #[arg(long)]
        item: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("failed to load configuration")?;
    logging::init_tracing();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Process { item } => process(config, &item).await,
    }
}

async fn serve(config: &'static config::Config) -> Result<()> {
    let (state, workers) = AppState::from_config(config)
        .await
        .context("failed to assemble services")?;
    let _handles = workers.spawn();
    let app = api::create_router(state);

    let (listener, port) = bind_listener(config)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server terminated")?;
    Ok(())
}

async fn process(config: &'static config::Config, raw_item: &str) -> Result<()> {
    let item: WorkItem = serde_json::from_str(raw_item).context("invalid work item JSON")?;
    let (state, _workers) = AppState::from_config(config)
        .await
        .context("failed to assemble services")?;
    let outcome = state
        .work_items
        .run(&item)
        .await
        .with_context(|| format!("work item {} / {} failed", item.job_id, item.file_name))?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn bind_listener(config: &config::Config) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
