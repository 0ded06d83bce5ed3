//! Process-level liveness probe. The serving side is bootstrap glue; the
//! state machine only pushes snapshots into it.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::machine::Phase;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeSnapshot {
    pub status: &'static str,
    pub phase: Option<Phase>,
    pub project: Option<String>,
    #[serde(rename = "rpcHealthy")]
    pub rpc_healthy: Option<bool>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ProbeSnapshot {
    fn default() -> Self {
        Self {
            status: "ok",
            phase: None,
            project: None,
            rpc_healthy: None,
            updated_at: None,
        }
    }
}

/// Shared snapshot refreshed on every phase transition and every 60 ticks.
#[derive(Default)]
pub struct HealthProbe {
    inner: RwLock<ProbeSnapshot>,
}

impl HealthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, phase: Phase, project: Option<String>, rpc_healthy: Option<bool>) {
        let mut inner = self.inner.write();
        inner.phase = Some(phase);
        inner.project = project;
        if rpc_healthy.is_some() {
            inner.rpc_healthy = rpc_healthy;
        }
        inner.updated_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> ProbeSnapshot {
        self.inner.read().clone()
    }
}

async fn healthz(State(probe): State<Arc<HealthProbe>>) -> Json<ProbeSnapshot> {
    Json(probe.snapshot())
}

/// Router for the standalone health listener.
pub fn probe_router(probe: Arc<HealthProbe>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_stamps_snapshot() {
        let probe = HealthProbe::new();
        assert!(probe.snapshot().phase.is_none());

        probe.update(Phase::LaunchWindow, Some("PRJ".into()), Some(true));
        let snapshot = probe.snapshot();
        assert_eq!(snapshot.phase, Some(Phase::LaunchWindow));
        assert_eq!(snapshot.project.as_deref(), Some("PRJ"));
        assert_eq!(snapshot.rpc_healthy, Some(true));
        assert!(snapshot.updated_at.is_some());
    }
}
