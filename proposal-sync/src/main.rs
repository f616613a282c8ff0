// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use clap::Parser;
use proposal_sync::config::SyncNodeConfig;
use proposal_sync::ledger::{JsonRpcLedgerClient, PollingProposalFeed};
use proposal_sync::metrics::SyncMetrics;
use proposal_sync::orchestrator::SyncOrchestrator;
use proposal_sync::server::{start_server, ServerState};
use proposal_sync::snapshot_store::{FileStorage, SnapshotStore};
use proposal_sync::utils::generate_sync_node_config_and_write_to_file;
use proposal_sync_config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long, env = "PROPOSAL_SYNC_CONFIG")]
    pub config_path: PathBuf,

    /// Write a config template to `config_path` and exit
    #[clap(long)]
    pub generate_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.generate_config {
        generate_sync_node_config_and_write_to_file(&args.config_path)?;
        info!("Config template written to {}", args.config_path.display());
        return Ok(());
    }

    let config = SyncNodeConfig::load(&args.config_path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", args.config_path.display()))?;

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(SyncMetrics::new(&registry));
    let cancel = CancellationToken::new();

    let storage = Arc::new(FileStorage::new(&config.cache_dir));
    let store = Arc::new(
        SnapshotStore::new(
            storage,
            config.sync.cache_ttl,
            config.sync.max_cached_proposals,
        )
        .with_metrics(metrics.clone()),
    );
    let rpc = Arc::new(JsonRpcLedgerClient::new(
        config.ledger_rpc_url.clone(),
        config.contract_address.clone(),
    ));
    let feed = Arc::new(PollingProposalFeed::new(rpc.clone(), &config.sync));

    let orchestrator = SyncOrchestrator::new(
        config.namespace(),
        config.sync.clone(),
        store,
        rpc,
        feed,
        metrics,
    );

    let server_handle = match config.metrics_address {
        Some(addr) => Some(
            start_server(
                addr,
                ServerState::new(registry, orchestrator.clone()),
                cancel.child_token(),
            )
            .await
            .with_context(|| format!("Failed to start server on {}", addr))?,
        ),
        None => None,
    };

    info!(
        "Starting proposal sync for {} via {}",
        orchestrator.namespace(),
        config.ledger_rpc_url
    );
    orchestrator.initialize().await?;

    let mut views = orchestrator.subscribe_view();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                info!(
                    "[{}] phase={} proposals={} optimistic={} connected={} new={} error={:?}",
                    orchestrator.namespace(),
                    view.phase,
                    view.confirmed_count(),
                    view.optimistic_count(),
                    view.is_connected,
                    view.new_proposal_count,
                    view.error
                );
            }
        }
    }

    orchestrator.shutdown();
    cancel.cancel();
    if let Some(handle) = server_handle {
        handle
            .await
            .map_err(|e| anyhow::anyhow!("Task join error: {}", e))?;
    }
    Ok(())
}
