//! Narrow trait boundaries for the external collaborators this core
//! depends on but does not implement: source parsing, LLM inference, and
//! per-agent scratch workspaces (§1, §6).
//!
//! Grounded in the teacher's `ContextStrategy`/`ClientWrapper` pattern of
//! defining a small async trait at the seam and passing `Box<dyn Trait>`
//! or `Arc<dyn Trait>` across it, rather than this crate knowing anything
//! about tree-sitter, an LLM provider, or a filesystem sandbox.

use crate::agent_state::AgentState;
use crate::event::PartialEvent;
use crate::swarm_registry::{AgentRecord, NodeType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// A node discovered by a `TreeParser` pass over one file.
#[derive(Debug, Clone)]
pub struct DiscoveredNode {
    pub node_type: NodeType,
    pub name: String,
    pub qualified_name: String,
    pub parent_qualified_name: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub source_hash: String,
}

/// Source-parsing collaborator (§6). Implemented elsewhere by a
/// tree-sitter integration; this crate only consumes the result.
#[async_trait]
pub trait TreeParser: Send + Sync {
    async fn parse(&self, path: &str) -> Result<Vec<DiscoveredNode>, String>;
}

/// A scriptable `TreeParser` double driven by a pre-seeded table, used by
/// this crate's own reconciler tests.
#[derive(Default)]
pub struct StaticTreeParser {
    table: RwLock<HashMap<String, Vec<DiscoveredNode>>>,
}

impl StaticTreeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, path: impl Into<String>, nodes: Vec<DiscoveredNode>) {
        self.table.write().expect("lock poisoned").insert(path.into(), nodes);
    }
}

#[async_trait]
impl TreeParser for StaticTreeParser {
    async fn parse(&self, path: &str) -> Result<Vec<DiscoveredNode>, String> {
        Ok(self
            .table
            .read()
            .expect("lock poisoned")
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

/// Outcome of one `Kernel::turn` invocation (§6).
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Ok {
        updated_state: AgentState,
        emitted: Vec<PartialEvent>,
    },
    Error {
        cause: String,
    },
}

/// LLM-inference collaborator (§6). `turn` receives the triggering event
/// and the agent's current durable state, and returns both the updated
/// state and any events the agent wishes to emit; the
/// [`AgentRunner`](crate::runner::AgentRunner) reifies those with
/// correlation id and `from_agent` rather than the Kernel doing so.
#[async_trait]
pub trait Kernel: Send + Sync {
    async fn turn(
        &self,
        agent_record: &AgentRecord,
        agent_state: &AgentState,
        triggering_event: &crate::event::Event,
    ) -> TurnOutcome;
}

/// A scriptable `Kernel` double for tests: returns a fixed list of
/// `PartialEvent`s to emit, optionally forcing an error.
pub struct ScriptedKernel<F>
where
    F: Fn(&AgentRecord, &AgentState, &crate::event::Event) -> TurnOutcome + Send + Sync,
{
    script: F,
}

impl<F> ScriptedKernel<F>
where
    F: Fn(&AgentRecord, &AgentState, &crate::event::Event) -> TurnOutcome + Send + Sync,
{
    pub fn new(script: F) -> Self {
        Self { script }
    }
}

#[async_trait]
impl<F> Kernel for ScriptedKernel<F>
where
    F: Fn(&AgentRecord, &AgentState, &crate::event::Event) -> TurnOutcome + Send + Sync,
{
    async fn turn(
        &self,
        agent_record: &AgentRecord,
        agent_state: &AgentState,
        triggering_event: &crate::event::Event,
    ) -> TurnOutcome {
        (self.script)(agent_record, agent_state, triggering_event)
    }
}

/// Opaque handle to a per-agent scratch workspace (§6). The core never
/// inspects its contents.
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    pub agent_id: String,
}

/// Per-agent copy-on-write workspace collaborator (§6).
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    async fn acquire(&self, agent_id: &str) -> WorkspaceHandle;
    async fn release(&self, handle: WorkspaceHandle);
}

/// A no-op `WorkspaceProvider` for tests and embedders that don't need
/// per-agent scratch space.
#[derive(Default)]
pub struct NullWorkspaceProvider;

#[async_trait]
impl WorkspaceProvider for NullWorkspaceProvider {
    async fn acquire(&self, agent_id: &str) -> WorkspaceHandle {
        WorkspaceHandle {
            agent_id: agent_id.to_string(),
        }
    }

    async fn release(&self, _handle: WorkspaceHandle) {}
}
