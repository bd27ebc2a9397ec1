//! Periodic background maintenance.
//!
//! Three independent tasks, each on its own timer: the supporter-privilege
//! expiry sweep, the service-status cache reroll, and the session liveness
//! reaper. A slow or failing sweep never delays the others.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::context::Gateway;
use crate::current_timestamp;

/// Handle to the running housekeeping tasks.
#[derive(Debug)]
pub struct HousekeepingScheduler {
    tasks: Vec<JoinHandle<()>>,
}

impl HousekeepingScheduler {
    /// Spawns the three maintenance tasks against the given context.
    pub fn start(gateway: Arc<Gateway>) -> Self {
        let cfg = &gateway.config.housekeeping;
        let sweep_interval = cfg.privilege_sweep_interval;
        let reroll_interval = cfg.status_reroll_interval;
        let reaper_interval = cfg.reaper_interval();

        // Expiry runs its body first so a restart never extends a lapsed
        // supporter by a full period.
        let sweep = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                loop {
                    sweep_expired_supporters(&gateway).await;
                    sleep(sweep_interval).await;
                }
            })
        };

        let reroll = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                loop {
                    sleep(reroll_interval).await;
                    gateway.caches.invalidate_status().await;
                    debug!("Service status cache rerolled");
                }
            })
        };

        let reaper = tokio::spawn(async move {
            loop {
                sleep(reaper_interval).await;
                reap_idle_sessions(&gateway, current_timestamp()).await;
            }
        });

        info!("🧹 Housekeeping tasks started");
        Self {
            tasks: vec![sweep, reroll, reaper],
        }
    }

    /// Stops every task. They hold no state worth draining, so this aborts
    /// rather than waiting out the current sleep.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("🧹 Housekeeping tasks stopped");
    }
}

/// One pass of the supporter expiry sweep.
///
/// The store is the source of truth; sessions already online pick up the
/// reduced privileges on their next store refresh rather than being
/// reconciled here.
pub(crate) async fn sweep_expired_supporters(gateway: &Gateway) {
    match gateway
        .store
        .expire_lapsed_supporters(current_timestamp())
        .await
    {
        Ok(0) => {}
        Ok(expired) => info!("🧹 Expired supporter perks on {expired} accounts"),
        // The sweep retries on its next tick; never let a store hiccup kill
        // the task.
        Err(e) => error!("Supporter expiry sweep failed: {e}"),
    }
}

/// One pass of the liveness reaper: logs out every non-bot session that has
/// been silent longer than the protocol's minimum ping interval. Returns
/// how many sessions were evicted.
pub(crate) async fn reap_idle_sessions(gateway: &Gateway, now: u64) -> usize {
    let deadline = gateway.config.housekeeping.client_ping_interval.as_secs();
    let mut reaped = 0;

    for session in gateway.sessions.snapshot().await {
        // Eviction is strictly-greater-than: a session idle for exactly the
        // ping interval is still within contract.
        if session.is_bot || session.idle_for(now) <= deadline {
            continue;
        }

        info!(
            "👻 {session} timed out after {}s of silence",
            session.idle_for(now)
        );
        gateway.logout(&session).await;
        reaped += 1;
    }

    if reaped > 0 {
        gateway.metrics.incr_sessions_reaped(reaped);
    } else {
        debug!("Liveness pass found nothing to reap");
    }
    reaped
}
