//! Client-side claim session that keeps one task lease alive while a user works on it.

use std::sync::Arc;

use inspectra_core::{AppError, AppResult};
use inspectra_domain::{AcquireOutcome, ClaimSessionState, HolderId, RenewOutcome, TaskId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::claim_coordinator::ClaimCoordinator;

/// Renewal controller for one open task view.
///
/// Every exit path releases the lease exactly once: [`ClaimSession::close`]
/// on orderly exit, `Drop` on abrupt teardown. Both stop the renewal cadence
/// and wait for an in-flight renewal before the release is issued, so a late
/// renewal can never resurrect a released lease.
pub struct ClaimSession {
    coordinator: ClaimCoordinator,
    task_id: TaskId,
    holder_id: HolderId,
    state: Arc<watch::Sender<ClaimSessionState>>,
    cancel: CancellationToken,
    renewal: Option<JoinHandle<()>>,
    finished: bool,
}

impl ClaimSession {
    /// Opens a session and attempts the initial claim.
    ///
    /// A denied claim still returns a session in `Unclaimed` state carrying
    /// the current holder; only store failures return an error.
    pub async fn open(
        coordinator: ClaimCoordinator,
        task_id: TaskId,
        holder_id: HolderId,
    ) -> AppResult<Self> {
        let (state, _) = watch::channel(ClaimSessionState::Unclaimed { held_by: None });
        let mut session = Self {
            coordinator,
            task_id,
            holder_id,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            renewal: None,
            finished: false,
        };

        session.claim().await?;
        Ok(session)
    }

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> ClaimSessionState {
        self.state.borrow().clone()
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClaimSessionState> {
        self.state.subscribe()
    }

    /// Returns the claimed task.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Returns the session holder.
    #[must_use]
    pub fn holder_id(&self) -> &HolderId {
        &self.holder_id
    }

    /// Tries to claim again after a denial or a lost renewal.
    pub async fn reacquire(&mut self) -> AppResult<ClaimSessionState> {
        let current = self.state();
        if current.is_claimed() {
            return Ok(current);
        }

        if let Some(previous) = self.renewal.take()
            && let Err(error) = previous.await
        {
            warn!(task_id = %self.task_id, error = %error, "previous renewal task ended abnormally");
        }

        self.claim().await?;
        Ok(self.state())
    }

    /// Stops renewing and releases the lease.
    ///
    /// The release runs on its own task, so it still completes when the
    /// returned future is dropped before resolving.
    pub async fn close(mut self) -> AppResult<()> {
        let finishing = tokio::spawn(self.begin_finish());

        finishing.await.map_err(|error| {
            AppError::Internal(format!(
                "release task for '{}' ended abnormally: {error}",
                self.task_id
            ))
        })?
    }

    fn begin_finish(&mut self) -> impl Future<Output = AppResult<()>> + Send + use<> {
        self.finished = true;
        self.cancel.cancel();

        finish_session(
            self.coordinator.clone(),
            self.task_id.clone(),
            self.holder_id.clone(),
            self.state.clone(),
            self.renewal.take(),
        )
    }

    async fn claim(&mut self) -> AppResult<()> {
        self.state.send_replace(ClaimSessionState::Claiming);

        match self.coordinator.acquire(&self.task_id, &self.holder_id).await {
            Ok(AcquireOutcome::Claimed { expires_at }) => {
                self.state
                    .send_replace(ClaimSessionState::Claimed { expires_at });
                self.start_renewal();
                Ok(())
            }
            Ok(AcquireOutcome::Held { held_by }) => {
                self.state.send_replace(ClaimSessionState::Unclaimed {
                    held_by: Some(held_by),
                });
                Ok(())
            }
            Err(error) => {
                self.state
                    .send_replace(ClaimSessionState::Unclaimed { held_by: None });
                Err(error)
            }
        }
    }

    fn start_renewal(&mut self) {
        let renewal = RenewalLoop {
            coordinator: self.coordinator.clone(),
            task_id: self.task_id.clone(),
            holder_id: self.holder_id.clone(),
            state: self.state.clone(),
        };
        let cancel = self.cancel.child_token();
        self.renewal = Some(tokio::spawn(renewal.run(cancel)));
    }
}

impl Drop for ClaimSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task_id = self.task_id.clone();
                let finishing = self.begin_finish();
                runtime.spawn(async move {
                    if let Err(error) = finishing.await {
                        warn!(
                            task_id = %task_id,
                            error = %error,
                            "failed to release task claim for dropped session"
                        );
                    }
                });
            }
            Err(_) => {
                self.finished = true;
                self.cancel.cancel();
                if let Some(renewal) = self.renewal.take() {
                    renewal.abort();
                }
                warn!(
                    task_id = %self.task_id,
                    "claim session dropped outside a runtime; lease will lapse at expiry"
                );
            }
        }
    }
}

async fn finish_session(
    coordinator: ClaimCoordinator,
    task_id: TaskId,
    holder_id: HolderId,
    state: Arc<watch::Sender<ClaimSessionState>>,
    renewal: Option<JoinHandle<()>>,
) -> AppResult<()> {
    if let Some(renewal) = renewal
        && let Err(error) = renewal.await
    {
        return Err(AppError::Internal(format!(
            "renewal task for '{task_id}' ended abnormally: {error}"
        )));
    }

    let released = coordinator.release(&task_id, &holder_id).await;
    state.send_replace(ClaimSessionState::Released);
    debug!(task_id = %task_id, holder_id = %holder_id, "claim session closed");
    released
}

struct RenewalLoop {
    coordinator: ClaimCoordinator,
    task_id: TaskId,
    holder_id: HolderId,
    state: Arc<watch::Sender<ClaimSessionState>>,
}

impl RenewalLoop {
    async fn run(self, cancel: CancellationToken) {
        let period = self.coordinator.policy().renew_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let expires_at = match &*self.state.borrow() {
                ClaimSessionState::Claimed { expires_at } => *expires_at,
                _ => break,
            };
            self.state
                .send_replace(ClaimSessionState::Renewing { expires_at });

            match self.coordinator.renew(&self.task_id, &self.holder_id).await {
                Ok(RenewOutcome::Renewed { expires_at }) => {
                    self.state
                        .send_replace(ClaimSessionState::Claimed { expires_at });
                }
                Ok(RenewOutcome::Lost { held_by }) => {
                    warn!(
                        task_id = %self.task_id,
                        holder_id = %self.holder_id,
                        held_by = held_by.as_ref().map(HolderId::as_str),
                        "task claim lost during renewal"
                    );
                    self.state
                        .send_replace(ClaimSessionState::Unclaimed { held_by });
                    break;
                }
                Err(error) => {
                    warn!(
                        task_id = %self.task_id,
                        holder_id = %self.holder_id,
                        error = %error,
                        "task claim renewal failed; retrying on next tick"
                    );
                    self.state
                        .send_replace(ClaimSessionState::Claimed { expires_at });
                }
            }
        }
    }
}
