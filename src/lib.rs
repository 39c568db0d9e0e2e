pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod entities;
pub mod models;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use auth::{AuthManager, CurrentUser, RoleGuard};
use cli::commands::{
    cmd_user_add, cmd_user_list, cmd_user_passwd, cmd_user_remove, cmd_user_role,
    cmd_user_set_active,
};
use cli::{Cli, Commands, UserCommands};
pub use config::Config;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Init)) {
        if Config::create_default_if_missing()? {
            println!("✓ Config file created. Edit config.toml and run again.");
        } else {
            println!("config.toml already exists, leaving it untouched.");
        }
        return Ok(());
    }

    let config = Config::load()?;
    config.validate()?;

    init_tracing(&config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let prometheus_handle = init_metrics(&config)?;
            serve(config, prometheus_handle).await
        }
        Commands::Init => Ok(()),
        Commands::Users { command } => match command {
            UserCommands::List => cmd_user_list(&config).await,
            UserCommands::Add {
                username,
                email,
                password,
                role,
            } => cmd_user_add(&config, &username, &email, &password, &role).await,
            UserCommands::Remove { username } => cmd_user_remove(&config, &username).await,
            UserCommands::Passwd { username, password } => {
                cmd_user_passwd(&config, &username, &password).await
            }
            UserCommands::Role { username, role } => {
                cmd_user_role(&config, &username, &role).await
            }
            UserCommands::Enable { username } => {
                cmd_user_set_active(&config, &username, true).await
            }
            UserCommands::Disable { username } => {
                cmd_user_set_active(&config, &username, false).await
            }
        },
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let (layer, task) = tracing_loki::builder()
            .label("app", "turnstile")?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    Ok(())
}

fn init_metrics(config: &Config) -> anyhow::Result<Option<PrometheusHandle>> {
    if !config.observability.metrics_enabled {
        return Ok(None);
    }

    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    info!("Prometheus metrics recorder initialized");

    Ok(Some(handle))
}

async fn serve(config: Config, prometheus_handle: Option<PrometheusHandle>) -> anyhow::Result<()> {
    info!("Turnstile v{} starting...", env!("CARGO_PKG_VERSION"));

    if !config.server.enabled {
        info!("Web server disabled in config, nothing to do");
        return Ok(());
    }

    let port = config.server.port;
    let state = api::create_app_state(config, prometheus_handle).await?;
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("🌐 Web Server running at http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {}", e),
    }
}
