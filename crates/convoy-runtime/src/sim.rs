//! In-process simulated runtime for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{
    ClientFuture, ProvisioningError, RuntimeClient, RuntimeStatus, StartRequest, StartedInstance,
};

#[derive(Debug)]
struct SimInstance {
    image: String,
    address: String,
    alive: bool,
}

#[derive(Debug, Default)]
struct SimState {
    instances: HashMap<String, SimInstance>,
    next_port: u16,
    reject_next: u32,
}

/// Simulated runtime: instances are bookkeeping entries, not processes.
///
/// Start rejections and instance deaths can be injected to exercise the
/// control loop's failure paths without a real runtime behind it.
#[derive(Clone, Default)]
pub struct SimRuntime {
    state: Arc<Mutex<SimState>>,
}

impl SimRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` start calls fail with a rejection.
    pub async fn reject_next_starts(&self, n: u32) {
        self.state.lock().await.reject_next = n;
    }

    /// Mark a tracked instance as exited, as if it crashed.
    pub async fn kill(&self, instance_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.instances.get_mut(instance_id) {
            Some(instance) => {
                instance.alive = false;
                true
            }
            None => false,
        }
    }

    /// Ids of instances the runtime still tracks (alive or exited), sorted.
    pub async fn instance_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of live instances.
    pub async fn running_count(&self) -> usize {
        let state = self.state.lock().await;
        state.instances.values().filter(|i| i.alive).count()
    }

    /// Whether a live instance serves at this address.
    pub async fn is_alive_at(&self, address: &str) -> bool {
        let state = self.state.lock().await;
        state
            .instances
            .values()
            .any(|i| i.alive && i.address == address)
    }

    /// Image an instance runs, if the runtime still tracks it.
    pub async fn image_of(&self, instance_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.instances.get(instance_id).map(|i| i.image.clone())
    }

    /// Image of the live instance serving at this address, if any.
    pub async fn image_at(&self, address: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .instances
            .values()
            .find(|i| i.alive && i.address == address)
            .map(|i| i.image.clone())
    }
}

impl RuntimeClient for SimRuntime {
    fn start(&self, request: StartRequest) -> ClientFuture<StartedInstance> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().await;
            if state.reject_next > 0 {
                state.reject_next -= 1;
                return Err(ProvisioningError::Rejected(format!(
                    "injected rejection for {}",
                    request.instance_id
                )));
            }
            let port = 30_000u16.wrapping_add(state.next_port);
            state.next_port = state.next_port.wrapping_add(1);
            let address = format!("127.0.0.1:{port}");
            debug!(
                instance = %request.instance_id,
                image = %request.image,
                %address,
                "sim instance started"
            );
            state.instances.insert(
                request.instance_id,
                SimInstance {
                    image: request.image,
                    address: address.clone(),
                    alive: true,
                },
            );
            Ok(StartedInstance { address })
        })
    }

    fn stop(&self, instance_id: &str, _grace: Duration) -> ClientFuture<()> {
        let state = Arc::clone(&self.state);
        let id = instance_id.to_string();
        Box::pin(async move {
            let mut state = state.lock().await;
            match state.instances.remove(&id) {
                Some(_) => {
                    debug!(instance = %id, "sim instance stopped");
                    Ok(())
                }
                None => Err(ProvisioningError::UnknownInstance(id)),
            }
        })
    }

    fn status(&self, instance_id: &str) -> ClientFuture<RuntimeStatus> {
        let state = Arc::clone(&self.state);
        let id = instance_id.to_string();
        Box::pin(async move {
            let state = state.lock().await;
            Ok(match state.instances.get(&id) {
                Some(instance) if instance.alive => RuntimeStatus::Running,
                Some(_) => RuntimeStatus::Exited,
                None => RuntimeStatus::Gone,
            })
        })
    }
}
