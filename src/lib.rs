use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod ai;
pub mod api;
pub mod assistant;
pub mod auth;
pub mod cli;
pub mod config;
pub mod store;

use config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "smartsql")]
#[command(about = "SmartSQL - SQL teaching backend with a data assistant", long_about = None)]
pub struct Cli {
    /// Config file (.toml or .json). Defaults apply when it does not exist.
    #[arg(short, long, global = true, default_value = "smartsql.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server (default)
    Start {
        /// Port to listen on, overriding [server].port
        #[arg(short, long)]
        port: Option<u16>,
        /// Load demo users and courses into an empty database
        #[arg(long)]
        demo: bool,
    },
    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "smartsql.toml")]
        output: PathBuf,
    },
    /// Create the SmartSQL schema
    Migrate {
        /// Also load demo data into an empty database
        #[arg(long)]
        seed: bool,
    },
    /// Issue a bearer token for API calls
    Token {
        /// User id (the token subject)
        #[arg(short, long)]
        user: i64,
        /// student or instructor
        #[arg(short, long, default_value = "student")]
        role: String,
        /// Lifetime in hours, overriding [auth].token_ttl_hours
        #[arg(short, long)]
        expiry_hours: Option<u64>,
    },
    /// Check server status
    Status {
        #[arg(long, default_value = "localhost:8080")]
        host: String,
    },
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    let command = args.command.unwrap_or(Commands::Start { port: None, demo: false });

    match command {
        Commands::Init { output } => {
            cli::run_init(&output)?;
        }
        Commands::Status { host } => {
            cli::run_status(&host).await?;
        }
        Commands::Migrate { seed } => {
            let config = prepare(&args.config)?;
            cli::run_migrate(&config, seed).await?;
        }
        Commands::Token { user, role, expiry_hours } => {
            let config = prepare(&args.config)?;
            cli::generate_token(&config, user, &role, expiry_hours)?;
        }
        Commands::Start { port, demo } => {
            let config = prepare(&args.config)?;
            start_server(config, port, demo).await?;
        }
    }

    Ok(())
}

fn prepare(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    init_tracing(&config.logging)?;
    Ok(config)
}

/// Read the config file if present, otherwise fall back to defaults.
pub fn load_config(path: &Path) -> Result<Config, config::ConfigError> {
    let config = if path.exists() {
        Config::from_file(path)?
    } else {
        let mut config = Config::default();
        config.resolve_env();
        config
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    result.map_err(|e| e as Box<dyn std::error::Error>)
}

async fn start_server(config: Config, port: Option<u16>, demo: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting SmartSQL...");

    let store = store::Store::connect(&config.database).await?;
    store.migrate().await?;
    if demo {
        store.seed_demo().await?;
    }

    let provider = ai::ProviderRegistry::new(config.llm.clone()).build()?;
    info!(provider = provider.name(), model = %config.llm.model, "completion provider ready");

    let shared_store = Arc::new(store.clone());
    let orchestrator = Arc::new(assistant::Assistant::new(
        &config,
        provider,
        shared_store.clone(),
        shared_store,
    )?);
    let keys = Arc::new(auth::JwtKeys::from_config(&config.auth));

    let app = api::router(orchestrator, store, keys, &config.server);

    let port = port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("SmartSQL listening on {}", addr);
    info!("  - Assistant: POST http://{}/assistant/chat", addr);
    info!("  - Health:    GET  http://{}/health", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
