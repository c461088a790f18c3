//! Background liveness monitoring

use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use toolhub_config::MonitorSettings;
use tracing::{debug, info, warn};

use crate::state::SharedState;

/// Probe every tracked connection concurrently and apply the resulting
/// status transitions. Returns whether each server answered its probe.
pub async fn run_health_checks(
    state: &SharedState,
    probe_timeout: Duration,
) -> BTreeMap<String, bool> {
    let targets: Vec<_> = {
        let state = state.read().await;
        state
            .connections
            .values()
            .map(|c| (c.id.clone(), c.generation, c.session.clone()))
            .collect()
    };

    if targets.is_empty() {
        return BTreeMap::new();
    }

    let probes = targets.into_iter().map(|(server, generation, session)| async move {
        let healthy = match tokio::time::timeout(probe_timeout, session.list_tools()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!("Health probe for '{}' failed: {}", server, e);
                false
            }
            Err(_) => {
                warn!(
                    "Health probe for '{}' timed out after {:?}",
                    server, probe_timeout
                );
                false
            }
        };
        (server, generation, healthy)
    });
    let results = join_all(probes).await;

    let mut state = state.write().await;
    results
        .into_iter()
        .map(|(server, generation, healthy)| {
            if healthy {
                state.mark_recovered(&server, generation);
            } else {
                state.mark_degraded(&server, generation);
            }
            (server, healthy)
        })
        .collect()
}

/// Spawn the periodic monitor. It runs until its handle is aborted.
pub fn spawn_monitor(state: SharedState, settings: MonitorSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Health monitor started (interval {:?}, probe timeout {:?})",
            settings.interval(),
            settings.probe_timeout()
        );
        loop {
            tokio::time::sleep(settings.interval()).await;
            let results = run_health_checks(&state, settings.probe_timeout()).await;
            debug!(
                "Health pass complete: {}/{} servers healthy",
                results.values().filter(|healthy| **healthy).count(),
                results.len()
            );
        }
    })
}
