use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

use crate::error::Error;

pub mod bridge;
pub mod queue;
pub mod resources;
pub mod workload;

pub use workload::{run, run_with_shutdown};

/// Queue key for a workload: `namespace/name`.
pub(crate) fn object_key(workload: &Deployment) -> String {
    format!(
        "{}/{}",
        workload.namespace().unwrap_or_default(),
        workload.name_any()
    )
}

pub(crate) fn split_key(key: &str) -> Result<(&str, &str), Error> {
    match key.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace, name))
        }
        _ => Err(Error::MalformedKey(key.to_string())),
    }
}
