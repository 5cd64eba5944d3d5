//! Prometheus text exposition format.
//!
//! Renders controller state into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use convoy_state::RolloutPhase;

/// One service's row in the exposition, assembled by the API layer from
/// the store, the replica managers, and the metric poller.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub service: String,
    pub phase: RolloutPhase,
    pub desired_replicas: u32,
    pub ready: u32,
    pub starting: u32,
    pub terminating: u32,
    pub failed: u32,
    /// Latest non-stale utilization, if any.
    pub utilization_pct: Option<f64>,
}

fn phase_code(phase: RolloutPhase) -> u8 {
    match phase {
        RolloutPhase::Idle => 0,
        RolloutPhase::Progressing => 1,
        RolloutPhase::Paused => 2,
        RolloutPhase::Succeeded => 3,
        RolloutPhase::Failed => 4,
    }
}

/// Render per-service controller state into Prometheus text format.
///
/// Produces GAUGE metrics with `service` labels.
pub fn render_prometheus(rows: &[ServiceMetrics]) -> String {
    let mut out = String::new();

    out.push_str("# HELP convoy_desired_replicas Replica count the controller converges toward.\n");
    out.push_str("# TYPE convoy_desired_replicas gauge\n");
    for row in rows {
        out.push_str(&format!(
            "convoy_desired_replicas{{service=\"{}\"}} {}\n",
            row.service, row.desired_replicas
        ));
    }

    out.push_str("# HELP convoy_instances_ready Instances passing readiness.\n");
    out.push_str("# TYPE convoy_instances_ready gauge\n");
    for row in rows {
        out.push_str(&format!(
            "convoy_instances_ready{{service=\"{}\"}} {}\n",
            row.service, row.ready
        ));
    }

    out.push_str("# HELP convoy_instances_starting Instances launched but not yet ready.\n");
    out.push_str("# TYPE convoy_instances_starting gauge\n");
    for row in rows {
        out.push_str(&format!(
            "convoy_instances_starting{{service=\"{}\"}} {}\n",
            row.service, row.starting
        ));
    }

    out.push_str("# HELP convoy_instances_terminating Instances draining toward shutdown.\n");
    out.push_str("# TYPE convoy_instances_terminating gauge\n");
    for row in rows {
        out.push_str(&format!(
            "convoy_instances_terminating{{service=\"{}\"}} {}\n",
            row.service, row.terminating
        ));
    }

    out.push_str("# HELP convoy_instances_failed Instances marked failed, pending replacement.\n");
    out.push_str("# TYPE convoy_instances_failed gauge\n");
    for row in rows {
        out.push_str(&format!(
            "convoy_instances_failed{{service=\"{}\"}} {}\n",
            row.service, row.failed
        ));
    }

    out.push_str(
        "# HELP convoy_rollout_phase Rollout phase (0=idle 1=progressing 2=paused 3=succeeded 4=failed).\n",
    );
    out.push_str("# TYPE convoy_rollout_phase gauge\n");
    for row in rows {
        out.push_str(&format!(
            "convoy_rollout_phase{{service=\"{}\"}} {}\n",
            row.service,
            phase_code(row.phase)
        ));
    }

    out.push_str("# HELP convoy_utilization_percent Latest observed utilization.\n");
    out.push_str("# TYPE convoy_utilization_percent gauge\n");
    for row in rows {
        if let Some(pct) = row.utilization_pct {
            out.push_str(&format!(
                "convoy_utilization_percent{{service=\"{}\"}} {pct:.2}\n",
                row.service
            ));
        }
    }

    out
}
