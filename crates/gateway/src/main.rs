mod api;
mod cli;
mod state;

use std::net::SocketAddr;

use choir_security::spawn_rate_limiter_cleanup;
use clap::Parser;
use cli::{Cli, Command, ConfigCommand};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(fmt::format().compact())
        .init();
}

/// Builds a permissive-by-pattern CORS layer: entries ending in `:*`
/// match any port on that host, everything else is an exact origin.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let patterns: Vec<String> = allowed_origins.to_vec();
    CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let Ok(origin) = origin.to_str() else { return false };
            patterns.iter().any(|pattern| match pattern.strip_suffix(":*") {
                Some(host_prefix) => origin.starts_with(host_prefix),
                None => origin == pattern,
            })
        }))
}

async fn run_server(config: choir_domain::config::Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            choir_domain::config::ConfigSeverity::Error => tracing::error!("{issue}"),
            choir_domain::config::ConfigSeverity::Warning => tracing::warn!("{issue}"),
        }
    }
    if !config.is_valid() {
        anyhow::bail!("configuration has {} error(s), refusing to start", issues.len());
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let cors = build_cors_layer(&config.server.cors.allowed_origins);

    let app_state = state::AppState::bootstrap(config)?;
    spawn_rate_limiter_cleanup(app_state.rate_limiter.clone());

    let app = api::router(app_state).layer(cors).layer(TraceLayer::new_for_http());

    tracing::info!(%addr, "choir-gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli::load_config(&cli.config)?;

    match cli.command {
        Command::Serve => run_server(config).await,
        Command::Config(ConfigCommand::Show) => {
            cli::config_show(&config);
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            if cli::config_validate(&config) {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
    }
}
