// ── Queue drainer ──
//
// Replays the mutation queue against the backend, one record at a time,
// in queue order. A transient failure leaves the record at the head and
// the background task waits out its backoff before the next pass, so a
// later record can never overtake it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::error::CoreError;
use crate::queue::{MutationQueue, MutationStatus};
use crate::remote::{RemoteApi, SubmitReceipt};
use crate::session::Connectivity;

/// What one `drain_once` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Nothing pending.
    Idle,
    /// Another pass holds the drain lock.
    Busy,
    /// Not attempted: the device is offline.
    Offline,
    /// Accepted by the backend and removed from the queue.
    Delivered { id: Uuid, entity_id: Option<String> },
    /// Transient failure; the record stays PENDING at its position.
    Retrying {
        id: Uuid,
        attempts: u32,
        retry_in: Duration,
    },
    /// Terminal: rejected, or out of attempts.
    Failed { id: Uuid, error: String },
}

impl DrainOutcome {
    /// Whether another `drain_once` right away could make progress.
    pub fn should_continue(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Failed { .. })
    }
}

/// Sequential replayer of the mutation queue.
pub struct QueueDrainer {
    queue: Arc<MutationQueue>,
    remote: Arc<dyn RemoteApi>,
    connectivity: watch::Receiver<Connectivity>,
    policy: RetryPolicy,
    network_timeout: Duration,
    /// Held for the duration of one pass.
    pass: Mutex<()>,
    wake: Notify,
}

impl QueueDrainer {
    pub fn new(
        queue: Arc<MutationQueue>,
        remote: Arc<dyn RemoteApi>,
        connectivity: watch::Receiver<Connectivity>,
        policy: RetryPolicy,
        network_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            remote,
            connectivity,
            policy,
            network_timeout,
            pass: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Nudge the background task (after an enqueue, say).
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Submit the head PENDING record.
    ///
    /// Storage failures are returned; backend failures are recorded on
    /// the record and reported through the outcome.
    pub async fn drain_once(&self) -> Result<DrainOutcome, CoreError> {
        let Ok(_pass) = self.pass.try_lock() else {
            return Ok(DrainOutcome::Busy);
        };
        if !self.connectivity.borrow().is_online() {
            return Ok(DrainOutcome::Offline);
        }
        let Some(head) = self.queue.head().await else {
            return Ok(DrainOutcome::Idle);
        };

        let record = self.queue.mark_in_flight(head.id).await?;
        let id = record.id;
        let key = id.to_string();
        debug!(%id, op_type = %record.op_type, attempts = record.attempts, "draining mutation");

        let submitted = tokio::time::timeout(
            self.network_timeout,
            self.remote.submit(record.op_type, &record.payload, &key),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CoreError::Timeout {
                timeout_secs: self.network_timeout.as_secs(),
            })
        });

        // A record must never stay IN_FLIGHT behind a failed settle, or
        // `head` skips it until the next restart.
        let settled = self.settle(id, submitted).await;
        if settled.is_err() {
            self.queue.release(id).await;
        }
        settled
    }

    /// Record the submission result against the queue.
    async fn settle(
        &self,
        id: Uuid,
        submitted: Result<SubmitReceipt, CoreError>,
    ) -> Result<DrainOutcome, CoreError> {
        match submitted {
            Ok(receipt) => {
                self.queue.mark_success(id).await?;
                info!(%id, entity_id = receipt.entity_id.as_deref().unwrap_or("-"), "mutation delivered");
                Ok(DrainOutcome::Delivered {
                    id,
                    entity_id: receipt.entity_id,
                })
            }
            Err(e) if e.is_permanent() => {
                let message = e.to_string();
                self.queue.mark_rejected(id, &message).await?;
                Ok(DrainOutcome::Failed { id, error: message })
            }
            Err(e) => {
                let message = e.to_string();
                let record = self.queue.mark_failure(id, &message).await?;
                if record.status == MutationStatus::Failed {
                    error!(%id, attempts = record.attempts, error = %message, "mutation failed permanently");
                    Ok(DrainOutcome::Failed { id, error: message })
                } else {
                    let retry_in = self.policy.delay_for(record.attempts);
                    warn!(
                        %id,
                        attempts = record.attempts,
                        retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                        error = %message,
                        "mutation submission failed, will retry"
                    );
                    Ok(DrainOutcome::Retrying {
                        id,
                        attempts: record.attempts,
                        retry_in,
                    })
                }
            }
        }
    }

    /// Call `drain_once` until it stops making progress. Returns every
    /// outcome; the last one says why the pass stopped.
    pub async fn drain_all(&self) -> Result<Vec<DrainOutcome>, CoreError> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.drain_once().await?;
            let more = outcome.should_continue();
            outcomes.push(outcome);
            if !more {
                return Ok(outcomes);
            }
        }
    }

    /// Background drain loop. Runs a pass on start when online, on every
    /// transition to online, on `wake()`, and when a backoff expires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut connectivity = self.connectivity.clone();
        let mut retry_at: Option<Instant> = None;
        info!("queue drainer started");

        loop {
            let online = connectivity.borrow_and_update().is_online();
            let backing_off = retry_at.is_some_and(|at| Instant::now() < at);

            if online && !backing_off {
                retry_at = match self.drain_all().await {
                    Ok(outcomes) => match outcomes.last() {
                        Some(DrainOutcome::Retrying { retry_in, .. }) => {
                            Some(Instant::now() + *retry_in)
                        }
                        _ => None,
                    },
                    Err(e) => {
                        error!(error = %e, "drain pass aborted by storage failure");
                        Some(Instant::now() + self.policy.initial_delay)
                    }
                };
            }

            let backoff = async {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if connectivity.borrow().is_online() {
                        debug!("back online, draining");
                        retry_at = None;
                    }
                }
                () = self.wake.notified() => {}
                () = backoff => {}
            }
        }

        info!("queue drainer stopped");
    }
}
