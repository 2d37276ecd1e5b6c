//! Single-flight execution of reconciliation runs.
//!
//! At most one run executes per process. Callers that arrive while a run is
//! in progress attach to it, and callers that arrive within the debounce
//! window after it settled receive its result. The state goes
//! `Idle -> Running -> Settling -> Idle`; every transition happens under one
//! mutex that is never held across an await.

use crate::errors::SyncError;
use crate::metrics_defs::{SYNC_ATTACHED, SYNC_DURATION, SYNC_RUNS};
use crate::reconcile::Reconciler;
use crate::types::SyncReport;
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub type SyncOutcome = Result<Arc<SyncReport>, Arc<SyncError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightStatus {
    Idle,
    Running,
    Settling,
}

enum FlightState<T> {
    Idle,
    Running {
        generation: u64,
        started_at: Instant,
        receiver: watch::Receiver<Option<T>>,
    },
    Settling {
        generation: u64,
        settled_at: Instant,
        result: T,
    },
}

struct Inner<T> {
    state: FlightState<T>,
    next_generation: u64,
}

impl<T> Inner<T> {
    /// Returns to `Idle` only if the settled run is the one that asked.
    fn clear_settled(&mut self, generation: u64) -> bool {
        match self.state {
            FlightState::Settling { generation: g, .. } if g == generation => {
                self.state = FlightState::Idle;
                true
            }
            _ => false,
        }
    }
}

pub struct SingleFlight<T> {
    inner: Arc<Mutex<Inner<T>>>,
    debounce: Duration,
}

pub enum Acquired<T> {
    /// The caller must run the computation and publish its result.
    Leader(FlightLeader<T>),
    Attached(FlightHandle<T>),
}

/// Completion handle shared by every caller of one run.
pub enum FlightHandle<T> {
    Pending(watch::Receiver<Option<T>>),
    Ready(T),
}

impl<T: Clone> FlightHandle<T> {
    /// Resolves to `None` if the leader went away without publishing.
    pub async fn wait(self) -> Option<T> {
        match self {
            FlightHandle::Ready(value) => Some(value),
            FlightHandle::Pending(mut receiver) => {
                let value = receiver.wait_for(Option::is_some).await.ok()?.clone();
                value
            }
        }
    }
}

pub struct FlightLeader<T> {
    inner: Arc<Mutex<Inner<T>>>,
    generation: u64,
    sender: watch::Sender<Option<T>>,
    debounce: Duration,
    published: bool,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(debounce: Duration) -> Self {
        SingleFlight {
            inner: Arc::new(Mutex::new(Inner {
                state: FlightState::Idle,
                next_generation: 0,
            })),
            debounce,
        }
    }

    pub fn acquire_or_attach(&self) -> Acquired<T> {
        let mut inner = self.inner.lock();

        match &inner.state {
            FlightState::Running {
                generation,
                started_at,
                receiver,
            } => {
                tracing::debug!(
                    generation,
                    running_for = ?started_at.elapsed(),
                    "Attaching to running sync"
                );
                return Acquired::Attached(FlightHandle::Pending(receiver.clone()));
            }
            FlightState::Settling {
                generation,
                settled_at,
                result,
            } if settled_at.elapsed() < self.debounce => {
                tracing::debug!(generation, "Serving settled sync result");
                return Acquired::Attached(FlightHandle::Ready(result.clone()));
            }
            _ => {}
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let (sender, receiver) = watch::channel(None);
        inner.state = FlightState::Running {
            generation,
            started_at: Instant::now(),
            receiver,
        };

        Acquired::Leader(FlightLeader {
            inner: Arc::clone(&self.inner),
            generation,
            sender,
            debounce: self.debounce,
            published: false,
        })
    }

    pub fn status(&self) -> FlightStatus {
        match self.inner.lock().state {
            FlightState::Idle => FlightStatus::Idle,
            FlightState::Running { .. } => FlightStatus::Running,
            FlightState::Settling { .. } => FlightStatus::Settling,
        }
    }
}

impl<T> FlightLeader<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> FlightHandle<T> {
        FlightHandle::Pending(self.sender.subscribe())
    }

    /// Delivers the result to every waiter and schedules the return to
    /// `Idle` once the debounce window has passed.
    pub fn publish(mut self, result: T) {
        let settled_at = Instant::now();
        {
            let mut inner = self.inner.lock();
            if let FlightState::Running { generation, .. } = inner.state
                && generation == self.generation
            {
                inner.state = FlightState::Settling {
                    generation,
                    settled_at,
                    result: result.clone(),
                };
            }
        }
        self.sender.send_replace(Some(result));
        self.published = true;

        let inner = Arc::clone(&self.inner);
        let generation = self.generation;
        let deadline = settled_at + self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if inner.lock().clear_settled(generation) {
                tracing::debug!(generation, "Sync lock released");
            }
        });
    }
}

impl<T> Drop for FlightLeader<T> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        let mut inner = self.inner.lock();
        if let FlightState::Running { generation, .. } = inner.state
            && generation == self.generation
        {
            tracing::warn!(generation, "Sync leader dropped without a result");
            inner.state = FlightState::Idle;
        }
    }
}

/// Runs reconciliations one at a time and shares each outcome with every
/// caller that asked for it.
pub struct SyncCoordinator {
    reconciler: Arc<Reconciler>,
    flight: SingleFlight<SyncOutcome>,
}

impl SyncCoordinator {
    pub fn new(reconciler: Reconciler, debounce: Duration) -> Self {
        SyncCoordinator {
            reconciler: Arc::new(reconciler),
            flight: SingleFlight::new(debounce),
        }
    }

    pub fn status(&self) -> FlightStatus {
        self.flight.status()
    }

    /// Starts a run or joins the current one. The run is spawned, so it
    /// completes even if the caller stops waiting.
    pub async fn trigger(&self, trigger: &str) -> SyncOutcome {
        let handle = match self.flight.acquire_or_attach() {
            Acquired::Leader(leader) => {
                let handle = leader.handle();
                let reconciler = Arc::clone(&self.reconciler);
                tracing::info!(trigger, generation = leader.generation(), "Starting sync");

                tokio::spawn(async move {
                    let start = Instant::now();
                    let outcome = reconciler.run().await.map(Arc::new).map_err(Arc::new);
                    histogram!(SYNC_DURATION).record(start.elapsed().as_secs_f64());

                    match &outcome {
                        Ok(report) => {
                            counter!(SYNC_RUNS, "outcome" => "success").increment(1);
                            tracing::info!(
                                generation = leader.generation(),
                                synced = report.synced,
                                errors = report.errors.len(),
                                "Sync finished"
                            );
                        }
                        Err(err) => {
                            counter!(SYNC_RUNS, "outcome" => "failure").increment(1);
                            tracing::error!(
                                generation = leader.generation(),
                                error = %err,
                                "Sync failed"
                            );
                        }
                    }

                    leader.publish(outcome);
                });
                handle
            }
            Acquired::Attached(handle) => {
                counter!(SYNC_ATTACHED).increment(1);
                tracing::info!(trigger, "Sync already in progress, attaching");
                handle
            }
        };

        handle
            .wait()
            .await
            .unwrap_or_else(|| Err(Arc::new(SyncError::Abandoned)))
    }
}
