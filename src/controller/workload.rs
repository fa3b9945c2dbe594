use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Api;
use log::{error, info, warn};

use super::bridge::EventBridge;
use super::queue::WorkQueue;
use super::{resources, split_key};
use crate::cluster::{ClusterOps, KubeCluster};
use crate::context::Context;
use crate::error::Error;

pub struct Reconciler<C> {
    cluster: C,
    workloads: Store<Deployment>,
    queue: Arc<WorkQueue>,
}

impl<C: ClusterOps> Reconciler<C> {
    pub fn new(cluster: C, workloads: Store<Deployment>, queue: Arc<WorkQueue>) -> Self {
        Self {
            cluster,
            workloads,
            queue,
        }
    }

    /// Worker loop: strictly sequential, one key at a time.
    pub async fn run(&self) {
        info!("starting reconcile worker");
        while let Some(key) = self.queue.get().await {
            self.process(key).await;
        }
        info!("work queue shut down, stopping reconcile worker");
    }

    async fn process(&self, key: String) {
        let outcome = self.reconcile(&key).await;
        self.queue.done(&key);
        match outcome {
            Ok(()) => {
                self.queue.forget(&key);
                info!("reconciled {key}");
            }
            Err(err) if err.is_permanent() => {
                self.queue.forget(&key);
                error!("dropping {key}: {err}");
            }
            Err(err) => {
                let retries = self.queue.requeue(&key);
                warn!("reconcile of {key} failed (retry {retries}): {err}");
            }
        }
    }

    async fn reconcile(&self, key: &str) -> Result<(), Error> {
        let (namespace, name) = split_key(key)?;

        // Authoritative existence probe against the remote API; the queued
        // key may be stale by the time it is dequeued.
        match self.cluster.get_workload(namespace, name).await? {
            Some(_) => self.sync_workload(namespace, name).await,
            None => self.delete_dependents(namespace, name).await,
        }
    }

    async fn sync_workload(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let workload = self
            .workloads
            .get(&ObjectRef::new(name).within(namespace))
            .ok_or_else(|| Error::CacheMiss(format!("{namespace}/{name}")))?;

        let service = resources::service_for(&workload)?;
        let service = match self.cluster.create_service(namespace, &service).await {
            Ok(created) => created,
            Err(err) if err.is_already_exists() => {
                match self.cluster.get_service(namespace, name).await? {
                    Some(existing) => existing,
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        let ingress = resources::ingress_for(&service)?;
        match self.cluster.create_ingress(namespace, &ingress).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn delete_dependents(&self, namespace: &str, name: &str) -> Result<(), Error> {
        allow_absent(self.cluster.delete_ingress(namespace, name).await)?;
        allow_absent(self.cluster.delete_service(namespace, name).await)?;
        Ok(())
    }
}

fn allow_absent(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

pub async fn run(ctx: Arc<Context>) -> anyhow::Result<()> {
    run_with_shutdown(ctx, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Blocking entry point: waits for the initial cache sync, runs the worker,
/// and returns once `shutdown` fires and the in-flight work has drained.
pub async fn run_with_shutdown(
    ctx: Arc<Context>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let client = ctx.kube_cli.clone();

    let workloads: Api<Deployment> = Api::namespaced(client.clone(), &ctx.namespace);
    let mut watch_cfg = watcher::Config::default();
    if let Some(selector) = &ctx.selector {
        watch_cfg = watch_cfg.labels(selector);
    }

    let (store, writer) = reflector::store();
    let events = reflector(writer, watcher(workloads, watch_cfg).default_backoff()).boxed();

    let queue = Arc::new(WorkQueue::default());
    let bridge = EventBridge::new(queue.clone());
    let cluster = KubeCluster::new(client, ctx.call_timeout);
    let reconciler = Reconciler::new(cluster, store.clone(), queue.clone());

    let stopper = {
        let queue = queue.clone();
        async move {
            tokio::select! {
                _ = shutdown => info!("shutdown signal received"),
                _ = queue.closed() => {}
            }
            queue.shut_down();
        }
    };

    let worker = {
        let queue = queue.clone();
        let ctx = ctx.clone();
        async move {
            match tokio::time::timeout(ctx.cache_sync_timeout, store.wait_until_ready()).await {
                Ok(Ok(())) => info!("workload cache synced"),
                Ok(Err(err)) => {
                    queue.shut_down();
                    return Err(anyhow!("workload watch stopped before cache sync: {err}"));
                }
                Err(_) if ctx.require_cache_sync => {
                    queue.shut_down();
                    return Err(anyhow!(
                        "workload cache did not sync within {:?}",
                        ctx.cache_sync_timeout
                    ));
                }
                Err(_) => warn!(
                    "workload cache still syncing after {:?}, reconciling against partial state",
                    ctx.cache_sync_timeout
                ),
            }

            reconciler.run().await;
            Ok(())
        }
    };

    let (_, result, _) = tokio::join!(bridge.run(events), worker, stopper);
    result
}
