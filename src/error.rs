use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("remote call exceeded {0:?} deadline")]
    DeadlineExceeded(Duration),
    #[error("malformed queue key {0:?}")]
    MalformedKey(String),
    #[error("workload {0} missing from cache")]
    CacheMiss(String),
    #[error("workload {0} declares no named container port to expose")]
    NoNamedPort(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    fn status_code(&self) -> Option<u16> {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => Some(resp.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    pub fn is_already_exists(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Retrying cannot fix these; the reconciler drops the item instead.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::MalformedKey(_))
    }
}
