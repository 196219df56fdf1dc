//! Remora: an event-sourced reactive agent swarm core.
//!
//! Every parseable syntactic construct of a source tree is modeled as a
//! long-lived, addressable, dormant agent that wakes only when a matching
//! event arrives. This crate owns four subsystems — the durable event
//! store and trigger bridge, the pattern-matched subscription registry,
//! the cascade-bounded scheduler, and the syntax-topology reconciler —
//! and defines narrow trait seams (`Kernel`, `TreeParser`,
//! `WorkspaceProvider`) for the collaborators it does not implement:
//! source parsing, LLM inference, and per-agent scratch workspaces.
//!
//! [`RemoraCore`] wires every subsystem together explicitly; nothing in
//! this crate reaches for global or thread-local state.

pub mod agent_state;
pub mod cascade;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event;
pub mod reconcile;
pub mod runner;
pub mod store;
pub mod subscription;
pub mod swarm_registry;

pub use agent_state::{AgentState, AgentStateStore, ChatMessage, Role};
pub use cascade::{Admission, CascadeGuard};
pub use collaborators::{DiscoveredNode, Kernel, TreeParser, TurnOutcome, WorkspaceHandle, WorkspaceProvider};
pub use config::RemoraConfig;
pub use error::{AdmissionRejection, RemoraError, RemoraResult};
pub use event::{Event, EventCodecError, EventKind, PartialEvent, StructuralMatch};
pub use reconcile::{Reconciler, ReconcileReport};
pub use runner::AgentRunner;
pub use store::{EventStore, ReplayFilter, Trigger};
pub use subscription::{Subscription, SubscriptionPattern, SubscriptionRegistry};
pub use swarm_registry::{AgentFilter, AgentRecord, AgentStatus, NodeType, SwarmRegistry};

use std::path::PathBuf;
use std::sync::Arc;

/// Everything needed to construct a [`RemoraCore`] beyond its
/// configuration: the collaborators this crate does not implement (§6).
pub struct RemoraCollaborators {
    pub kernel: Arc<dyn Kernel>,
    pub tree_parser: Arc<dyn TreeParser>,
    pub workspaces: Arc<dyn WorkspaceProvider>,
}

/// Facade wiring the event store, subscription registry, swarm registry,
/// agent state store, reconciler, cascade guard, and scheduler together
/// (§6). This is the crate's only public entry point for embedders; every
/// component it owns is an explicit field, constructed once at
/// [`RemoraCore::new`] and never hidden behind a global.
pub struct RemoraCore {
    event_store: Arc<EventStore>,
    subscriptions: Arc<SubscriptionRegistry>,
    registry: Arc<SwarmRegistry>,
    agent_states: Arc<AgentStateStore>,
    cascade: Arc<CascadeGuard>,
    reconciler: Arc<Reconciler>,
    runner: Arc<AgentRunner>,
}

impl RemoraCore {
    /// Construct every subsystem and wire them together. `durable_path`,
    /// when set, backs the event store with a `.jsonl` file and replays
    /// any events already on disk before returning (§4.3, §9's crash
    /// recovery guarantee).
    pub fn new(
        config: RemoraConfig,
        collaborators: RemoraCollaborators,
        durable_path: Option<PathBuf>,
    ) -> RemoraResult<Self> {
        config.validate()?;

        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let event_store = Arc::new(match durable_path {
            Some(path) => EventStore::open(path, Arc::clone(&subscriptions), config.trigger_queue_capacity)?,
            None => EventStore::in_memory(Arc::clone(&subscriptions), config.trigger_queue_capacity),
        });
        let registry = Arc::new(SwarmRegistry::new());
        let agent_states = Arc::new(AgentStateStore::new());
        let cascade = Arc::new(CascadeGuard::new(
            config.max_chain_depth,
            config.cooldown_ms,
            config.correlation_ttl_ms,
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            Arc::clone(&event_store),
            collaborators.tree_parser,
        ));
        let runner = Arc::new(AgentRunner::new(
            Arc::clone(&event_store),
            Arc::clone(&registry),
            Arc::clone(&agent_states),
            Arc::clone(&cascade),
            collaborators.kernel,
            collaborators.workspaces,
            config,
        ));

        Ok(Self {
            event_store,
            subscriptions,
            registry,
            agent_states,
            cascade,
            reconciler,
            runner,
        })
    }

    /// Start the scheduler's run loop as a background task. Call at most
    /// once per `RemoraCore`.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let runner = Arc::clone(&self.runner);
        tokio::spawn(runner.run())
    }

    /// Request the scheduler stop accepting new triggers and drain
    /// in-flight turns within `shutdown_grace_ms`.
    pub fn shutdown(&self) {
        self.runner.shutdown();
    }

    /// Append an event to the durable log, assigning it a `seq` and
    /// enqueueing it against every matching subscription (§6).
    pub async fn ingest_event(&self, partial: PartialEvent) -> RemoraResult<u64> {
        self.event_store.append(partial).await
    }

    /// Register a subscription for `agent_id` (§6).
    pub fn subscribe_to_stream(&self, agent_id: &str, pattern: SubscriptionPattern) -> RemoraResult<String> {
        self.subscriptions.register(agent_id, pattern, false)
    }

    /// Reconcile the agent registry against the current syntactic view of
    /// `file_path` (§6, §4.6).
    pub async fn reconcile(&self, file_path: &str) -> RemoraResult<ReconcileReport> {
        self.reconciler.reconcile(file_path).await
    }

    /// List agents matching `filter` (§6).
    pub fn list_agents(&self, filter: &AgentFilter) -> Vec<AgentRecord> {
        self.registry.list(filter)
    }

    /// Fetch an agent's durable state, if it has ever been activated (§6).
    pub fn get_agent_state(&self, agent_id: &str) -> Option<AgentState> {
        self.agent_states.get(agent_id)
    }

    /// Snapshot of every persisted event matching `filter`, for
    /// inspection and tests.
    pub fn replay(&self, filter: Option<ReplayFilter>) -> Vec<Event> {
        self.event_store.replay(filter)
    }

    /// The cascade guard backing this core's scheduler, exposed for
    /// observability and tests.
    pub fn cascade_guard(&self) -> &Arc<CascadeGuard> {
        &self.cascade
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NullWorkspaceProvider, ScriptedKernel, StaticTreeParser};

    fn collaborators() -> RemoraCollaborators {
        RemoraCollaborators {
            kernel: Arc::new(ScriptedKernel::new(|_record, state, _event| TurnOutcome::Ok {
                updated_state: state.clone(),
                emitted: vec![],
            })),
            tree_parser: Arc::new(StaticTreeParser::new()),
            workspaces: Arc::new(NullWorkspaceProvider),
        }
    }

    #[tokio::test]
    async fn core_wires_every_subsystem_with_no_hidden_state() {
        let core = Arc::new(
            RemoraCore::new(RemoraConfig::default(), collaborators(), None).unwrap(),
        );
        let handle = core.start();

        core.subscribe_to_stream("A1", SubscriptionPattern::new().with_to_agent("A1"))
            .unwrap();
        core.ingest_event(PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({})).with_to_agent("A1"))
            .await
            .unwrap();

        for _ in 0..100 {
            if core.replay(None).len() >= 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        core.shutdown();
        handle.await.unwrap();

        assert!(!core.replay(None).is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_before_any_subsystem_is_built() {
        let config = RemoraConfig {
            max_concurrency: 0,
            ..RemoraConfig::default()
        };
        assert!(RemoraCore::new(config, collaborators(), None).is_err());
    }
}
