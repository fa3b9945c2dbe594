use std::time::Duration;

#[derive(Clone)]
pub struct Context {
    pub kube_cli: kube::Client,
    /// Namespace whose workloads are watched and reconciled.
    pub namespace: String,
    /// Optional label selector restricting which workloads are observed.
    pub selector: Option<String>,
    pub call_timeout: Duration,
    pub cache_sync_timeout: Duration,
    /// Treat a cache sync timeout as fatal instead of warn-and-continue.
    pub require_cache_sync: bool,
}
