use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use irma::{
    build_router, generate_issuer_key, initialize_root, spawn_sweeper, AppState, RootConfig,
    RootError,
};
use irma_core::IssuerIdentifier;

/// IRMA session server
///
/// Runs disclosure, signature and issuance sessions between requestors
/// and IRMA wallets.
#[derive(Parser, Debug)]
#[command(name = "irma", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Trust store document to reference
        #[arg(long)]
        trust_store: Option<PathBuf>,

        /// Public URL wallets use to reach the server
        #[arg(long)]
        url: Option<String>,
    },

    /// Start the HTTP server
    Serve {
        /// Bind address, overriding the config
        #[arg(long)]
        bind: Option<String>,

        /// Port, overriding the config
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the configuration and load the trust store
    CheckConfig,

    /// Generate an issuer signing key
    Keygen {
        /// Issuer identifier, e.g. irma-demo.RU
        issuer: String,

        /// Key counter
        #[arg(long, default_value = "0")]
        counter: u32,

        /// Key directory, defaults to issuer_keys_path from the config
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("irma=debug,irma_server=debug,irma_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("irma=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RootConfig, RootError> {
    match path {
        Some(p) => RootConfig::load(p),
        None => {
            let default_path = RootConfig::default_config_path();
            RootConfig::load(&default_path)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RootError> {
    match cli.command {
        Commands::Init { trust_store, url } => cmd_init(cli.config.as_ref(), trust_store, url),
        Commands::Serve { bind, port } => cmd_serve(cli.config.as_ref(), bind, port).await,
        Commands::CheckConfig => cmd_check_config(cli.config.as_ref()),
        Commands::Keygen {
            issuer,
            counter,
            dir,
        } => cmd_keygen(cli.config.as_ref(), &issuer, counter, dir),
    }
}

fn cmd_init(
    config_path: Option<&PathBuf>,
    trust_store: Option<PathBuf>,
    url: Option<String>,
) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;
    if let Some(ts) = trust_store {
        config.trust_store_path = ts;
    }
    if let Some(url) = url {
        config.server.url = url;
    }
    config.validate()?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(RootConfig::default_config_path);
    config.save(&save_path)?;

    println!("Configuration written to {}", save_path.display());
    println!("  Trust store: {}", config.trust_store_path.display());
    Ok(())
}

async fn cmd_serve(
    config_path: Option<&PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = initialize_root(config)?;
    let sweep_period = std::time::Duration::from_secs(state.config.sessions.sweep_interval_secs);
    let sweeper = spawn_sweeper(state.server.clone(), sweep_period);

    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, url = %state.server.config().url, "irma server listening");

    let app = build_router(std::sync::Arc::new(AppState {
        server: state.server.clone(),
    }));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("irma server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}

fn cmd_check_config(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let config = load_config(config_path)?;
    let state = initialize_root(config)?;

    println!("Configuration OK");
    println!(
        "  Listen:      {}:{}",
        state.config.server.bind, state.config.server.port
    );
    println!("  Public URL:  {}", state.server.config().url);
    println!(
        "  Trust store: {}",
        state.config.trust_store_path.display()
    );
    match &state.config.issuer_keys_path {
        Some(dir) => println!("  Issuer keys: {}", dir.display()),
        None => println!("  Issuer keys: none (issuance disabled)"),
    }
    println!(
        "  Sessions:    timeout {}s, retention {}s",
        state.config.sessions.timeout_secs, state.config.sessions.result_retention_secs
    );
    Ok(())
}

fn cmd_keygen(
    config_path: Option<&PathBuf>,
    issuer: &str,
    counter: u32,
    dir: Option<PathBuf>,
) -> Result<(), RootError> {
    let issuer: IssuerIdentifier = issuer.parse()?;
    let dir = match dir {
        Some(dir) => dir,
        None => load_config(config_path)?.issuer_keys_path.ok_or_else(|| {
            RootError::Config("no --dir given and issuer_keys_path is not configured".into())
        })?,
    };

    let (path, public_key) = generate_issuer_key(&dir, issuer, counter)?;
    println!("Key written to {}", path.display());
    println!("Add this entry to public_keys in the trust store:");
    println!("{}", serde_json::to_string_pretty(&public_key)?);
    Ok(())
}
