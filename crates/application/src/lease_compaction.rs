use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::claim_coordinator::ClaimCoordinator;

/// Periodically removes expired task leases until `cancel` fires.
pub async fn run_lease_compaction(
    coordinator: ClaimCoordinator,
    interval: Duration,
    cancel: CancellationToken,
) {
    if !coordinator.is_enabled() {
        debug!("task claims disabled; lease compaction not started");
        return;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match coordinator.compact_expired().await {
            Ok(0) => debug!("no expired task claims to compact"),
            Ok(removed) => info!(removed, "compacted expired task claims"),
            Err(error) => warn!(error = %error, "task claim compaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use inspectra_domain::LeasePolicy;
    use tokio_util::sync::CancellationToken;

    use crate::claim_coordinator::ClaimCoordinator;
    use crate::test_support::{FakeLeaseStore, TokioClock, holder, task};

    use super::run_lease_compaction;

    #[tokio::test(start_paused = true)]
    async fn compaction_purges_expired_leases_on_interval() {
        let store = Arc::new(FakeLeaseStore::default());
        let policy = LeasePolicy::new(10).unwrap_or_else(|_| unreachable!());
        let coordinator =
            ClaimCoordinator::new(store.clone(), policy, Arc::new(TokioClock::new()));
        assert!(coordinator.acquire(&task("task-1"), &holder("a")).await.is_ok());

        let cancel = CancellationToken::new();
        let compaction = tokio::spawn(run_lease_compaction(
            coordinator,
            Duration::from_secs(60),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.stored(&task("task-1")).await.is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.stored(&task("task-1")).await.is_none());

        cancel.cancel();
        assert!(compaction.await.is_ok());
    }
}
