//! Scheduler: drains the event store's trigger queue, enforces cascade
//! admission, and drives each admitted trigger through one `Kernel` turn
//! (C7, §4.7).
//!
//! Concurrency is two-layered: a `tokio::sync::Semaphore` bounds how many
//! turns run system-wide (`max_concurrency`), while a per-agent
//! `tokio::sync::Mutex` looked up from a shared table guarantees no two
//! turns for the *same* agent ever overlap, even though the semaphore
//! would otherwise allow it. This mirrors the teacher's task-per-item
//! `tokio::spawn` fan-out with an added per-key serialization the teacher
//! didn't need.

use crate::agent_state::AgentStateStore;
use crate::cascade::{Admission, CascadeGuard};
use crate::collaborators::{Kernel, TurnOutcome, WorkspaceProvider};
use crate::config::RemoraConfig;
use crate::error::RemoraError;
use crate::event::{EventKind, PartialEvent};
use crate::store::{EventStore, Trigger};
use crate::swarm_registry::SwarmRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify, Semaphore};
use uuid::Uuid;

/// Drives the `Queued → AdmissionCheck → [Reject | Run → Emitting →
/// Complete | Error]` state machine of §4.7 over the trigger queue of one
/// [`EventStore`].
pub struct AgentRunner {
    store: Arc<EventStore>,
    registry: Arc<SwarmRegistry>,
    agent_states: Arc<AgentStateStore>,
    cascade: Arc<CascadeGuard>,
    kernel: Arc<dyn Kernel>,
    workspaces: Arc<dyn WorkspaceProvider>,
    config: RemoraConfig,
    semaphore: Arc<Semaphore>,
    agent_locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
    trigger_rx: StdMutex<Option<mpsc::Receiver<Trigger>>>,
    shutdown: Notify,
    shutting_down: AtomicBool,
}

impl AgentRunner {
    /// Construct a runner bound to `store`'s trigger queue. Takes
    /// ownership of the receiver via `EventStore::take_triggers`; panics
    /// if that queue was already claimed by another runner.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<EventStore>,
        registry: Arc<SwarmRegistry>,
        agent_states: Arc<AgentStateStore>,
        cascade: Arc<CascadeGuard>,
        kernel: Arc<dyn Kernel>,
        workspaces: Arc<dyn WorkspaceProvider>,
        config: RemoraConfig,
    ) -> Self {
        let trigger_rx = store
            .take_triggers()
            .expect("EventStore's trigger queue was already claimed");
        Self {
            store,
            registry,
            agent_states,
            cascade,
            kernel,
            workspaces,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            agent_locks: StdMutex::new(HashMap::new()),
            trigger_rx: StdMutex::new(Some(trigger_rx)),
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Drain the trigger queue until shutdown, running up to
    /// `max_concurrency` turns at once. Returns once every in-flight turn
    /// has completed (bounded by `shutdown_grace_ms`).
    pub async fn run(self: Arc<Self>) {
        let mut rx = self
            .trigger_rx
            .lock()
            .expect("lock poisoned")
            .take()
            .expect("AgentRunner::run called more than once");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                trigger = rx.recv() => {
                    match trigger {
                        Some(trigger) => {
                            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                                Ok(permit) => permit,
                                Err(_) => break,
                            };
                            let this = Arc::clone(&self);
                            tokio::spawn(async move {
                                this.process_trigger(trigger).await;
                                drop(permit);
                            });
                        }
                        None => break,
                    }
                }
            }
        }

        self.drain_in_flight().await;
    }

    /// Signal the run loop to stop accepting new triggers. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    async fn drain_in_flight(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.shutdown_grace_ms);
        while self.semaphore.available_permits() < self.config.max_concurrency {
            if tokio::time::Instant::now() >= deadline {
                log::warn!("shutdown grace period elapsed with turns still in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn process_trigger(&self, trigger: Trigger) {
        let Trigger { agent_id, seq, event } = trigger;
        let correlation_id = event
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.cascade.try_admit(&correlation_id, &agent_id) {
            Admission::Reject(cause) => {
                log::warn!(
                    "admission rejected: agent={agent_id} seq={seq} correlation={correlation_id} cause={cause}"
                );
                self.emit_turn_error(&agent_id, &correlation_id, RemoraError::Admission(cause).to_string())
                    .await;
                return;
            }
            Admission::Allow => {}
        }

        let agent_lock = self.agent_lock_for(&agent_id);
        let _guard = agent_lock.lock().await;

        let Some(record) = self.registry.get(&agent_id) else {
            log::warn!("trigger for unknown agent {agent_id}, dropping");
            return;
        };

        let state = self.agent_states.get_or_create(&agent_id);
        let workspace = self.workspaces.acquire(&agent_id).await;

        log::info!("turn started: agent={agent_id} seq={seq} correlation={correlation_id}");
        // Lifecycle events carry `from_agent` for attribution but are not
        // addressed `to_agent`: routing them back to the agent that just
        // ran would re-trigger it under the same correlation id and turn
        // every admission rejection into an unbounded `TurnError` storm.
        self.try_emit(
            PartialEvent::new(
                EventKind::TurnStarted,
                serde_json::json!({"agent_id": agent_id, "seq": seq}),
            )
            .with_correlation_id(correlation_id.clone())
            .with_from_agent(agent_id.clone()),
        );

        let outcome = tokio::time::timeout(
            Duration::from_millis(self.config.turn_timeout_ms),
            self.kernel.turn(&record, &state, &event),
        )
        .await;

        match outcome {
            Err(_elapsed) => {
                log::error!("turn timed out: agent={agent_id} correlation={correlation_id}");
                self.emit_turn_error(&agent_id, &correlation_id, RemoraError::TurnTimeout.to_string())
                    .await;
            }
            Ok(TurnOutcome::Error { cause }) => {
                log::error!("turn failed: agent={agent_id} cause={cause}");
                self.emit_turn_error(&agent_id, &correlation_id, cause).await;
            }
            Ok(TurnOutcome::Ok { updated_state, emitted }) => {
                let mut updated_state = updated_state;
                updated_state.last_activated_at = Some(chrono::Utc::now());
                self.agent_states.put(updated_state);
                for partial in emitted {
                    let partial = partial
                        .with_correlation_id(correlation_id.clone())
                        .with_from_agent(agent_id.clone());
                    if let Err(e) = self.store.append(partial).await {
                        log::error!("failed to append agent-emitted event: {e}");
                    }
                }
                log::info!("turn completed: agent={agent_id} correlation={correlation_id}");
                self.try_emit(
                    PartialEvent::new(
                        EventKind::TurnCompleted,
                        serde_json::json!({"agent_id": agent_id}),
                    )
                    .with_correlation_id(correlation_id)
                    .with_from_agent(agent_id.clone()),
                );
            }
        }

        self.workspaces.release(workspace).await;
    }

    async fn emit_turn_error(&self, agent_id: &str, correlation_id: &str, cause: String) {
        self.try_emit(
            PartialEvent::new(
                EventKind::TurnError,
                serde_json::json!({"agent_id": agent_id, "cause": cause}),
            )
            .with_correlation_id(correlation_id.to_string())
            .with_from_agent(agent_id.to_string()),
        );
    }

    fn try_emit(&self, partial: PartialEvent) {
        if let Err(e) = self.store.try_append(partial) {
            log::error!("failed to record scheduler event: {e}");
        }
    }

    fn agent_lock_for(&self, agent_id: &str) -> Arc<TokioMutex<()>> {
        let mut locks = self.agent_locks.lock().expect("lock poisoned");
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }
}
