//! taskpad - personal to-do list server
//!
//! Serves the task list of one device over a small JSON API, keeping data
//! in the remote store when a session can be opened there and on the
//! device otherwise.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use taskpad::api;
use taskpad::config::Config;
use taskpad::local::{FileLocalStore, LocalStore};
use taskpad::remote::RemoteStore;
use taskpad::remote::sqlite::SqliteBackend;
use taskpad::session::Session;

#[derive(Parser)]
#[command(name = "taskpad")]
#[command(about = "Personal to-do list with remote sync and on-device fallback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taskpad=info".parse().context("Invalid log directive")?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, bind } => {
            let mut cfg = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };

            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            run_server(cfg).await
        }

        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            if path.exists() {
                println!("Config file already exists: {}", path.display());
                return Ok(());
            }

            Config::default().save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Start the server with: taskpad serve --config {}", path.display());
            Ok(())
        }
    }
}

async fn run_server(config: Config) -> Result<()> {
    let local: Arc<dyn LocalStore> = Arc::new(
        FileLocalStore::open(&config.local.path).context("Failed to open local store")?,
    );

    let remote: Option<Arc<dyn RemoteStore>> = if config.remote.enabled {
        let backend = SqliteBackend::open(&config.remote.path, config.remote.allow_anonymous)
            .context("Failed to open remote store")?;
        Some(Arc::new(backend))
    } else {
        tracing::info!("Remote store disabled, running on this device only");
        None
    };

    let session = Session::start(remote, local).await;
    tracing::info!(identity = ?session.identity(), "Session started");

    let app = api::create_router(api::AppState::new(session));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("taskpad listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
