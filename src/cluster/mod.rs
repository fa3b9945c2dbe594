pub use client::KubeCluster;
mod client;

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service, networking::v1::Ingress};

use crate::error::Error;

/// The remote operations the reconciler performs against the cluster.
///
/// Kept behind a trait so tests can substitute a fake cluster; the
/// production implementation is [`KubeCluster`].
#[async_trait]
pub trait ClusterOps {
    async fn get_workload(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress, Error>;

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), Error>;
}
