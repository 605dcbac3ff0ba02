/// file: src/main.rs
/// description: CLI entrypoint, logging setup, and server/batch/publish subcommands.
mod api;
mod cleaner;
mod config;
mod database;
mod harvester;
mod models;
mod pipeline;
mod publisher;
mod runner;
mod session;
mod staging;
mod targets;

#[cfg(test)]
mod testing;

use anyhow::Result;
use axum::http::{HeaderValue, Method, header};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// follow_tracker — incremental harvester for profile interest lists.
#[derive(Debug, Parser)]
#[command(name = "follow_tracker", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server.
    Server,
    /// Run one batch: stage rows to CSV and publish new ones.
    Scrape,
    /// Run one batch and only write the staging CSV.
    Stage,
    /// Clean a staging CSV and publish its new rows.
    Publish {
        /// Staging file (`source_url,name,run_date`).
        csv: PathBuf,
    },
    /// Import a `handle,company,date` export through the dedup publisher.
    Import {
        csv: PathBuf,
    },
    /// Apply the embedded schema.
    Migrate,
    /// Health-check the database and exit.
    Healthcheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Respect RUST_LOG; LOG_FORMAT=json for machine-readable output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,follow_tracker=debug"));

    let json_format = std::env::var("LOG_FORMAT").as_deref() == Ok("json");
    if json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let cli = Cli::parse();
    let cfg = config::Config::from_env()
        .map_err(|e| anyhow::anyhow!("Cannot start without a valid configuration: {e}"))?;

    match cli.command {
        Command::Server => run_server(cfg).await,
        Command::Scrape => run_scrape(cfg).await,
        Command::Stage => run_stage(cfg).await,
        Command::Publish { csv } => run_publish(cfg, csv, false).await,
        Command::Import { csv } => run_publish(cfg, csv, true).await,
        Command::Migrate => run_migrate(cfg).await,
        Command::Healthcheck => run_healthcheck(cfg).await,
    }
}

// ---------------------------------------------------------------------------
// Sub-command handlers
// ---------------------------------------------------------------------------

async fn run_server(cfg: config::Config) -> Result<()> {
    let addr = cfg.server.addr()?;
    let db = connect(&cfg).await?;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if !cfg.server.cors_allow_origins.is_empty() {
        let mut origins = Vec::with_capacity(cfg.server.cors_allow_origins.len());
        for origin in &cfg.server.cors_allow_origins {
            origins.push(HeaderValue::from_str(origin).map_err(|e| {
                anyhow::anyhow!("Invalid CORS_ALLOW_ORIGINS entry `{origin}`: {e}")
            })?);
        }
        cors = cors.allow_origin(origins);
    }

    let app = api::router(api::AppState::new(db, cfg))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_scrape(cfg: config::Config) -> Result<()> {
    let db = connect(&cfg).await?;
    let outcome = pipeline::scrape_and_publish(&cfg, &db).await?;
    for o in &outcome.report.outcomes {
        match &o.error {
            Some(e) => tracing::warn!(handle = %o.handle, url = %o.url, error = %e, "Target failed"),
            None => info!(handle = %o.handle, rows = o.rows, termination = ?o.termination, "Target harvested"),
        }
    }
    info!(
        run_id = %outcome.report.run_id,
        rows = outcome.report.total_rows,
        published = outcome.published,
        "{}",
        outcome.message()
    );
    Ok(())
}

async fn run_stage(cfg: config::Config) -> Result<()> {
    // Only the handles table needs the database.
    let pool = database::build_pool(&cfg.database)?;
    let db = database::DbClient::new(pool);
    let report = pipeline::stage_only(&cfg, &db).await?;
    info!(
        run_id = %report.run_id,
        rows = report.total_rows,
        failed_targets = report.failed_targets(),
        "Stage run finished"
    );
    Ok(())
}

async fn run_publish(cfg: config::Config, csv: PathBuf, legacy: bool) -> Result<()> {
    let db = connect(&cfg).await?;
    let mode = pipeline::delta_mode(&cfg);
    let report = if legacy {
        pipeline::import_legacy(&csv, db, mode).await?
    } else {
        pipeline::publish_staged(&csv, db, mode).await?
    };
    info!(
        path = %csv.display(),
        received = report.received,
        appended = report.new_rows.len(),
        range = ?report.range,
        "Publish finished"
    );
    Ok(())
}

async fn run_migrate(cfg: config::Config) -> Result<()> {
    let db = connect(&cfg).await?;
    db.migrate().await?;
    Ok(())
}

async fn run_healthcheck(cfg: config::Config) -> Result<()> {
    info!("Running health check…");

    let pool = database::build_pool(&cfg.database)?;
    let db = database::DbClient::new(pool);
    match db.ping().await {
        Ok(()) => info!("Database: ok"),
        Err(e) => tracing::warn!("Database: {e} ({})", error_chain(&e)),
    }

    match &cfg.session.storage_state_path {
        Some(path) if path.exists() => info!(path = %path.display(), "Storage state: ok"),
        Some(path) => tracing::warn!(path = %path.display(), "Storage state: file not found"),
        None => info!("Storage state: not configured"),
    }

    info!("Health check complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Pool + ping. Fails fast before any browser is launched.
async fn connect(cfg: &config::Config) -> Result<database::DbClient> {
    let pool = database::build_pool(&cfg.database)?;
    let db = database::DbClient::new(pool);

    db.ping().await.map_err(|e| {
        anyhow::anyhow!(
            "Database connectivity check failed: {}\n\
             Hint: verify POSTGRES_* env vars are correct and run `follow_tracker migrate` \
             once to create the tracker schema.\n\
             Cause chain: {}",
            e,
            error_chain(&e)
        )
    })?;
    Ok(db)
}

/// Walks the `std::error::Error::source()` chain and returns each cause
/// joined with " -> ".
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut parts = Vec::new();
    let mut src = e.source();
    while let Some(cause) = src {
        parts.push(cause.to_string());
        src = cause.source();
    }
    if parts.is_empty() {
        String::from("(no further cause)")
    } else {
        parts.join(" -> ")
    }
}
