use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::stream;
use k8s_openapi::api::core::v1::Pod;
use kube_client::{Api, Client};
use kube_core::{ApiResource, DynamicObject, GroupVersionKind};
use kube_runtime::watcher;
use tokio_util::sync::CancellationToken;

use rollout_stable_label::config::{DEFAULT_ASSOCIATION_LABEL, DEFAULT_STABLE_LABEL};
use rollout_stable_label::store::kube::KubeStore;
use rollout_stable_label::{subscriber, Config, Controller, RunError};

/// Mirrors each rollout's stableRS onto a label of the rollout's pods.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Pod label naming the owning rollout.
    #[arg(long, env = "ROLLOUT_ASSOCIATION_LABEL", default_value = DEFAULT_ASSOCIATION_LABEL)]
    association_label: String,

    /// Pod label that receives the rollout's stableRS.
    #[arg(long, env = "ROLLOUT_STABLE_LABEL", default_value = DEFAULT_STABLE_LABEL)]
    stable_label: String,

    /// Only watch this namespace instead of the whole cluster.
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long, default_value = "argoproj.io")]
    rollout_group: String,

    #[arg(long, default_value = "v1alpha1")]
    rollout_version: String,

    #[arg(long, default_value = "Rollout")]
    rollout_kind: String,

    #[arg(long, default_value = "rollouts")]
    rollout_plural: String,

    /// First retry delay, in milliseconds.
    #[arg(long, default_value_t = 1)]
    backoff_base_ms: u64,

    /// Retry delay cap, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    backoff_max_ms: u64,

    #[arg(long, default_value_t = 1)]
    pod_workers: usize,

    #[arg(long, default_value_t = 1)]
    rollout_workers: usize,

    /// Seconds between full requeues of every cached object; 0 disables.
    #[arg(long, env = "RESYNC_PERIOD_SECS", default_value_t = 30 * 60)]
    resync_secs: u64,
}

impl Args {
    fn config(&self) -> Config {
        Config::default()
            .labels(&self.association_label, &self.stable_label)
            .backoff(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            )
            .workers(self.pod_workers, self.rollout_workers)
            .resync(Duration::from_secs(self.resync_secs))
    }

    fn rollout_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(
                &self.rollout_group,
                &self.rollout_version,
                &self.rollout_kind,
            ),
            &self.rollout_plural,
        )
    }
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("cannot create kubernetes client: {0}")]
    Client(#[from] kube_client::Error),
    #[error(transparent)]
    Run(#[from] RunError),
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config();
    let rollout_resource = args.rollout_resource();

    let client = Client::try_default().await?;
    let (pod_api, rollout_api) = match &args.namespace {
        Some(ns) => (
            Api::<Pod>::namespaced(client.clone(), ns),
            Api::<DynamicObject>::namespaced_with(client.clone(), ns, &rollout_resource),
        ),
        None => (
            Api::<Pod>::all(client.clone()),
            Api::<DynamicObject>::all_with(client.clone(), &rollout_resource),
        ),
    };

    // Only pods carrying the association label are candidates.
    let pod_watch = watcher::Config::default().labels(&config.labels.association);
    let (pod_cache, pod_feed) = subscriber::objects(pod_api, pod_watch);
    let (rollout_cache, rollout_feed) = subscriber::with(
        rollout_api,
        watcher::Config::default(),
        rollout_resource.clone(),
    );

    let store = Arc::new(KubeStore::new(
        client,
        pod_cache,
        rollout_cache,
        rollout_resource,
    ));
    let controller = Controller::new(config, Arc::clone(&store), store);
    log::info!("rollout-stable-label is up and running");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Received interrupt, shutting down");
                    cancel.cancel();
                }
                Err(err) => log::error!("Cannot listen for interrupt: {err}"),
            }
        }
    });

    controller
        .run(stream::select(pod_feed, rollout_feed), cancel)
        .await?;
    Ok(())
}
