use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus_gmail_exporter::auth::CredentialProvider;
use prometheus_gmail_exporter::config::{tracing_filter_directive, Cli, Config};
use prometheus_gmail_exporter::labels::LabelSet;
use prometheus_gmail_exporter::mail::GmailClient;
use prometheus_gmail_exporter::readiness::Readiness;
use prometheus_gmail_exporter::refresher::LabelMetricsRefresher;
use prometheus_gmail_exporter::registry::MetricRegistry;
use prometheus_gmail_exporter::scheduler::Scheduler;
use prometheus_gmail_exporter::{server, ExporterContext};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[::tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::load(Cli::parse())?;

    let directive = tracing_filter_directive(&config.log_level)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .init();

    info!("prometheus-gmail-exporter starting on port {}", config.prom_port);
    config.log_summary();

    let context = ExporterContext::new(
        Readiness::blocked("Waiting for credentials"),
        MetricRegistry::with_instance_id(config.instance_label.then(Uuid::new_v4)),
    );

    // Get the /readyz endpoint up before blocking on authorization.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = server::bind(config.prom_port)
        .await
        .context("Failed to bind HTTP listener")?;
    let server_task = tokio::spawn(server::serve(
        listener,
        context.clone(),
        shutdown_rx.clone(),
    ));

    tokio::spawn(server::forward_shutdown_signal(
        tokio::signal::ctrl_c(),
        shutdown_tx,
    ));

    let provider = CredentialProvider::new(
        config.client_secret_file.clone(),
        config.credentials_path.clone(),
        config.auth_code_path.clone(),
        context.readiness.clone(),
    )
    .poll_interval(config.auth_poll_interval());

    let mut interrupted = shutdown_rx.clone();
    let google_auth = tokio::select! {
        google_auth = provider.get_client() => google_auth.context("Authorization failed")?,
        _ = interrupted.changed() => {
            server_task.await??;
            return Ok(());
        }
    };

    let refresher = LabelMetricsRefresher::new(
        Arc::new(GmailClient::new(google_auth)?),
        LabelSet::new(config.labels.clone()),
        config.labels_sender_count.clone(),
        context.clone(),
    );

    Scheduler::new(refresher, shutdown_rx)
        .run(config.daemonize, config.update_interval())
        .await
        .context("Refreshing gmail metrics failed")?;

    server_task.await??;
    Ok(())
}
