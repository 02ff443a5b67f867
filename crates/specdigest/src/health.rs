//! Dependency health. Keys keep the names clients already poll for:
//! `redis` is the state store and `celery` the task queue.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::state::StateStore;
use crate::worker::TaskQueue;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyHealth {
    pub healthy: bool,
    pub status: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl DependencyHealth {
    fn new(healthy: bool, details: Value) -> Self {
        Self {
            healthy,
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            details: match details {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub redis: DependencyHealth,
    pub celery: DependencyHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.redis.healthy && self.celery.healthy
    }
}

pub fn check(store: &StateStore, queue: &dyn TaskQueue) -> HealthReport {
    let redis = match store.ping() {
        Ok(h) => DependencyHealth::new(
            true,
            json!({ "sqlite_version": h.sqlite_version, "records": h.records }),
        ),
        Err(e) => {
            warn!(error = %e, "State store health check failed");
            DependencyHealth::new(false, json!({ "error": e.to_string() }))
        }
    };

    let queue_health = queue.health();
    let celery = DependencyHealth::new(
        queue_health.is_healthy(),
        json!({
            "active_workers": queue_health.active_workers,
            "active_tasks": queue_health.active_tasks,
            "queued": queue_health.queued,
        }),
    );

    let healthy = redis.healthy && celery.healthy;
    HealthReport {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        redis,
        celery,
    }
}
