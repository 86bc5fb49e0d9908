//! `livepatch`: push local script edits into a running engine.
//!
//! Run with: livepatch watch ./project --port 9229

mod args;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use args::{Cli, Command, ConnectOpts};
use clap::Parser;
use livepatch_core::ReloadConfig;
use livepatch_session::{ConnectOutcome, ConnectionManager};
use livepatch_transport::CdpConnector;
use livepatch_watch::NotifyWatcherFactory;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.command.opts().verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Command::Watch { local_roots, opts } => watch(&local_roots, &opts).await,
        Command::Update {
            local_root,
            file,
            opts,
        } => update(&local_root, &file, &opts).await,
    }
}

fn build_manager(config: ReloadConfig) -> anyhow::Result<ConnectionManager> {
    let connector = CdpConnector::new()?;
    let watchers = NotifyWatcherFactory::new(config.ignore.as_deref())?;
    Ok(ConnectionManager::new(
        Arc::new(connector),
        Arc::new(watchers),
        config,
    ))
}

fn absolute_roots(roots: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    roots
        .iter()
        .map(|root| {
            std::path::absolute(root).with_context(|| format!("resolving {}", root.display()))
        })
        .collect()
}

async fn watch(local_roots: &[PathBuf], opts: &ConnectOpts) -> anyhow::Result<()> {
    let local_roots = absolute_roots(local_roots)?;
    let manager = build_manager(opts.config(&local_roots))?;

    match manager.connect(&opts.host, opts.port).await? {
        ConnectOutcome::Watching => tracing::info!("watching {} root(s)", local_roots.len()),
        outcome => tracing::debug!(?outcome, "first attempt finished"),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    manager.close().await;
    Ok(())
}

async fn update(local_root: &Path, file: &Path, opts: &ConnectOpts) -> anyhow::Result<()> {
    let local_roots = absolute_roots(&[local_root.to_path_buf()])?;
    let path = local_roots[0].join(file);
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let manager = build_manager(opts.config(&local_roots))?;
    manager.set_update_task(path, content);
    manager.connect(&opts.host, opts.port).await?;

    tokio::select! {
        () = manager.wait_for_update() => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            manager.close().await;
        }
    }
    Ok(())
}
