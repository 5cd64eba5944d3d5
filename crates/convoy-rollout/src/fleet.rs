//! Fleet observation — what the controller sees in one tick.
//!
//! Counting rules: every unswept handle counts toward totals, draining
//! (`Terminating`) instances included, because they still occupy runtime
//! capacity. Destroy candidates are picked only among `Starting` and
//! `Ready` instances; `Failed` ones go through the dedicated drain path
//! and `Terminating` ones are already on their way out.

use convoy_state::InstanceStatus;

/// One instance as observed at the start of a tick.
#[derive(Debug, Clone)]
pub struct InstanceObservation {
    pub id: String,
    pub version: String,
    pub status: InstanceStatus,
    /// Creation order within the service; lower is older.
    pub seq: u64,
}

/// Snapshot of a service's instances for one controller step.
#[derive(Debug, Clone, Default)]
pub struct FleetObservation {
    instances: Vec<InstanceObservation>,
}

impl FleetObservation {
    pub fn new(mut instances: Vec<InstanceObservation>) -> Self {
        instances.sort_by_key(|i| i.seq);
        Self { instances }
    }

    pub fn instances(&self) -> &[InstanceObservation] {
        &self.instances
    }

    /// Instances of `version`, any status.
    pub fn total(&self, version: &str) -> u32 {
        self.instances.iter().filter(|i| i.version == version).count() as u32
    }

    /// Ready instances of `version`.
    pub fn ready(&self, version: &str) -> u32 {
        self.instances
            .iter()
            .filter(|i| i.version == version && i.status == InstanceStatus::Ready)
            .count() as u32
    }

    /// All instances, any version, any status.
    pub fn total_all(&self) -> u32 {
        self.instances.len() as u32
    }

    /// Ready instances across all versions.
    pub fn ready_all(&self) -> u32 {
        self.instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Ready)
            .count() as u32
    }

    /// Instances not of `version`, any status.
    pub fn total_excluding(&self, version: &str) -> u32 {
        self.instances.iter().filter(|i| i.version != version).count() as u32
    }

    /// Oldest instance of `version` that is still live (`Starting` or
    /// `Ready`).
    pub fn oldest_of(&self, version: &str) -> Option<&InstanceObservation> {
        self.instances
            .iter()
            .filter(|i| i.version == version && is_live(i.status))
            .min_by_key(|i| i.seq)
    }

    /// Oldest live instance whose version is not `version`.
    pub fn oldest_active_excluding(&self, version: &str) -> Option<&InstanceObservation> {
        self.instances
            .iter()
            .filter(|i| i.version != version && is_live(i.status))
            .min_by_key(|i| i.seq)
    }

    /// Oldest instance marked `Failed`, any version.
    pub fn oldest_failed(&self) -> Option<&InstanceObservation> {
        self.instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Failed)
            .min_by_key(|i| i.seq)
    }
}

fn is_live(status: InstanceStatus) -> bool {
    matches!(status, InstanceStatus::Starting | InstanceStatus::Ready)
}
