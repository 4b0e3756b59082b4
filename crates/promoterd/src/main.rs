//! GitOps promotion controller daemon.
//!
//! Wires the store, the SCM provider factory, the git SHA resolver and the
//! four reconcilers under one manager, serves the probe and metrics
//! endpoints, and on shutdown drains the manager and removes every tracked
//! git workdir.

mod http;
mod manifest;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use promoter_controller::{
    spawn_event_router, CommitStatusReconciler, Controller, GitCliResolver, Manager, PathLookup,
    PromotionStrategyReconciler, PromotionStrategyReconcilerConfig, ProposedCommitReconciler,
    ProposedCommitReconcilerConfig, PullRequestReconciler, RouterQueues, ShaResolver,
    StoreKeyLister,
};
use promoter_scm::{DefaultProviderFactory, FakeScm, ProviderFactory};
use promoter_store::{MemoryStore, Stores};

#[derive(Debug, Parser)]
#[command(name = "promoterd", version, about = "GitOps promotion controller")]
struct Args {
    /// The address the metric endpoint binds to.
    #[arg(long, default_value = ":9080")]
    metrics_bind_address: String,

    /// The address the probe endpoint binds to.
    #[arg(long, default_value = ":9081")]
    health_probe_bind_address: String,

    /// Enable leader election for the controller manager. The
    /// single-process build accepts the flag and runs as sole leader.
    #[arg(long)]
    leader_elect: bool,

    /// If set, HTTP/2 is enabled for the probe and metrics servers.
    #[arg(long)]
    enable_http2: bool,

    /// How frequently to requeue promotion strategy resources for auto
    /// reconciliation.
    #[arg(long, default_value = "60s")]
    promotion_strategy_requeue_duration: String,

    /// How frequently to requeue proposed commit resources for auto
    /// reconciliation.
    #[arg(long, default_value = "60s")]
    proposed_commit_requeue_duration: String,

    /// Directory of JSON manifests loaded into the store at startup.
    #[arg(long)]
    manifest_dir: Option<PathBuf>,
}

/// A bare `:port` bind address listens on all interfaces.
fn normalize_bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("promoterd: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let promotion_strategy_requeue =
        humantime::parse_duration(&args.promotion_strategy_requeue_duration)
            .context("failed to parse promotion strategy requeue duration")?;
    let proposed_commit_requeue = humantime::parse_duration(&args.proposed_commit_requeue_duration)
        .context("failed to parse proposed commit requeue duration")?;

    if args.leader_elect {
        info!("leader election requested; running as sole leader");
    }
    if args.enable_http2 {
        info!("http/2 enabled for probe and metrics servers");
    }

    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store.clone());
    if let Some(dir) = &args.manifest_dir {
        manifest::load_dir(&stores, dir).await?;
    }

    let path_lookup = PathLookup::new();
    let workdir_root = std::env::temp_dir().join("promoter-workdirs");
    std::fs::create_dir_all(&workdir_root).context("failed to create git workdir root")?;
    let resolver: Arc<dyn ShaResolver> =
        Arc::new(GitCliResolver::new(path_lookup.clone(), workdir_root));
    let factory: Arc<dyn ProviderFactory> =
        Arc::new(DefaultProviderFactory::new(Arc::new(FakeScm::new())));

    let promotion_strategies = Controller::new(
        Arc::new(PromotionStrategyReconciler::new(
            stores.clone(),
            PromotionStrategyReconcilerConfig {
                requeue_duration: promotion_strategy_requeue,
            },
        )),
        Arc::new(StoreKeyLister::new(stores.promotion_strategies.clone())),
    );
    let proposed_commits = Controller::new(
        Arc::new(ProposedCommitReconciler::new(
            stores.clone(),
            resolver,
            ProposedCommitReconcilerConfig {
                requeue_duration: proposed_commit_requeue,
            },
        )),
        Arc::new(StoreKeyLister::new(stores.proposed_commits.clone())),
    );
    let pull_requests = Controller::new(
        Arc::new(PullRequestReconciler::new(stores.clone(), factory.clone())),
        Arc::new(StoreKeyLister::new(stores.pull_requests.clone())),
    );
    let commit_statuses = Controller::new(
        Arc::new(CommitStatusReconciler::new(stores.clone(), factory)),
        Arc::new(StoreKeyLister::new(stores.commit_statuses.clone())),
    );

    let metrics = vec![
        ("PromotionStrategy", promotion_strategies.metrics()),
        ("ProposedCommit", proposed_commits.metrics()),
        ("PullRequest", pull_requests.metrics()),
        ("CommitStatus", commit_statuses.metrics()),
    ];
    let queues = RouterQueues {
        promotion_strategies: promotion_strategies.queue(),
        proposed_commits: proposed_commits.queue(),
        pull_requests: pull_requests.queue(),
        commit_statuses: commit_statuses.queue(),
    };

    let mut manager = Manager::new();
    manager.track(spawn_event_router(
        store,
        stores,
        queues,
        manager.cancel_token(),
    ));
    manager.register(promotion_strategies);
    manager.register(proposed_commits);
    manager.register(pull_requests);
    manager.register(commit_statuses);

    let health_handle = http::serve_health(
        &normalize_bind_address(&args.health_probe_bind_address),
        manager.cancel_token(),
    )
    .await?;
    manager.track(health_handle);
    let metrics_handle = http::serve_metrics(
        &normalize_bind_address(&args.metrics_bind_address),
        metrics,
        manager.cancel_token(),
    )
    .await?;
    manager.track(metrics_handle);

    info!("starting manager");
    shutdown_signal().await?;

    info!("shutting down");
    manager.shutdown().await;

    info!("cleaning up cloned directories");
    for path in path_lookup.drain() {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => info!(directory = %path.display(), "cleaned directory"),
            Err(err) => warn!(directory = %path.display(), error = %err, "failed to clean up directory"),
        }
    }
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to wait for ctrl-c")?;
        Ok(())
    }
}
