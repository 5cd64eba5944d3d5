//! Runtime client abstraction.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long any single runtime call may run before it counts as failed.
pub const RUNTIME_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Boxed future returned by [`RuntimeClient`] methods.
pub type ClientFuture<T> =
    Pin<Box<dyn Future<Output = Result<T, ProvisioningError>> + Send>>;

/// Errors from the runtime collaborator.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("runtime rejected the request: {0}")]
    Rejected(String),
    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),
    #[error("runtime unreachable: {0}")]
    Unreachable(String),
    #[error("runtime returned an unusable response: {0}")]
    Malformed(String),
    #[error("unknown instance: {0}")]
    UnknownInstance(String),
}

/// Instruction to launch one instance. The caller picks the instance id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub service: String,
    pub instance_id: String,
    /// Canonical image reference to run.
    pub image: String,
    pub port: u16,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Successful start response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedInstance {
    /// Address (`host:port`) where the instance serves traffic and probes.
    pub address: String,
}

/// Status of an instance as reported by the backing runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Running,
    Stopping,
    Exited,
    Gone,
}

/// Interface to the container runtime that starts and stops instances.
///
/// Methods return boxed futures so the manager can hold the client as a
/// trait object across await points. Implementations must not borrow from
/// their arguments in the returned future.
pub trait RuntimeClient: Send + Sync {
    /// Launch an instance.
    fn start(&self, request: StartRequest) -> ClientFuture<StartedInstance>;

    /// Stop an instance, allowing `grace` for in-flight work to drain.
    fn stop(&self, instance_id: &str, grace: Duration) -> ClientFuture<()>;

    /// Report the runtime's view of an instance. Unknown ids are [`RuntimeStatus::Gone`].
    fn status(&self, instance_id: &str) -> ClientFuture<RuntimeStatus>;
}
