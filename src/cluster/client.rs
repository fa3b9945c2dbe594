use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service, networking::v1::Ingress};
use kube::api::{DeleteParams, PostParams};
use kube::Api;

use super::ClusterOps;
use crate::error::Error;

pub struct KubeCluster {
    client: kube::Client,
    call_timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: kube::Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    /// Every remote call carries a deadline; a hung apiserver connection
    /// surfaces as a retryable error instead of stalling the worker.
    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, kube::Error>>,
    ) -> Result<T, Error> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(Error::KubeError),
            Err(_) => Err(Error::DeadlineExceeded(self.call_timeout)),
        }
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.with_deadline(api.get_opt(name)).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.with_deadline(api.create(&PostParams::default(), service))
            .await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.with_deadline(api.get_opt(name)).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.with_deadline(api.delete(name, &DeleteParams::default()))
            .await?;
        Ok(())
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress, Error> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        self.with_deadline(api.create(&PostParams::default(), ingress))
            .await
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        self.with_deadline(api.delete(name, &DeleteParams::default()))
            .await?;
        Ok(())
    }
}
