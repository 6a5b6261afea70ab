use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use copgate_core::config::Config;
use copgate_core::router::{build_router, RouterOptions};
use copgate_core::state::{AccountType, AppState};
use copgate_core::{credentials, models, paths, vscode};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    paths::ensure_paths().context("creating app directory")?;
    let _log_guard = init_logging(args.verbose)?;

    let config_path = paths::config_path();
    let mut config = Config::load().context("loading config")?;
    config
        .merge_default_prompts(&config_path)
        .context("merging default prompts")?;

    let http = build_http_client(args.proxy_env)?;

    let vscode_version = vscode::fetch_vscode_version(&http).await;
    tracing::info!(version = %vscode_version, "impersonating VS Code");

    let state = Arc::new(AppState::new(
        config,
        http,
        AccountType::parse(&args.account_type),
        vscode_version,
        args.show_token,
    ));

    credentials::setup(&state, args.github_token.clone())
        .await
        .context("authentication failed")?;

    let count = models::refresh(&state)
        .await
        .context("fetching model catalog")?;
    tracing::info!(count, "models available");

    let router = build_router(
        state,
        RouterOptions {
            rate_limit_seconds: args.rate_limit,
            rate_limit_wait: args.rate_limit_wait,
            manual_approval: args.manual_approve,
        },
    );

    let bind = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(address = %bind, "server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    tracing::info!("server stopped");
    Ok(())
}

fn init_logging(verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let file_appender = tracing_appender::rolling::daily(paths::log_dir(), "copgate.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    Ok(guard)
}

fn build_http_client(proxy_env: bool) -> Result<wreq::Client> {
    let mut builder = wreq::Client::builder();
    if !proxy_env {
        builder = builder.no_proxy();
    }
    builder.build().context("building http client")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
