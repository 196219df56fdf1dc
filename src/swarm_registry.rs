//! Catalog of known agents (C5, §4.5).
//!
//! Agents are never deleted: once discovered they persist as `active` or
//! `orphaned` for the lifetime of the store, preserving referential
//! integrity of prior events (§3). Grounded in the same retain-forever
//! status-transition discipline as a subagent registry that tracks
//! lifecycle state in an `Arc<RwLock<HashMap<_, _>>>` without ever
//! removing entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Kind of syntactic construct an agent is addressable for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Class,
    Function,
    Method,
}

/// Lifecycle status of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Active,
    Orphaned,
}

/// A registry row for one agent (§3).
///
/// `agent_id` is stable across edits: the [`Reconciler`](crate::reconcile::Reconciler)
/// preserves it whenever an edit is matched to an existing `(parent_qualified_name,
/// node_type, name)` identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub node_type: NodeType,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub parent_id: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub source_hash: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        node_type: NodeType,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        file_path: impl Into<String>,
        parent_id: Option<String>,
        start_line: u32,
        end_line: u32,
        source_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            node_type,
            name: name.into(),
            qualified_name: qualified_name.into(),
            file_path: file_path.into(),
            parent_id,
            start_line,
            end_line,
            source_hash: source_hash.into(),
            status: AgentStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Minimal constructor used by tests elsewhere in this crate that only
    /// care about `agent_id` and `file_path`.
    #[doc(hidden)]
    pub fn new_for_test(agent_id: &str, file_path: &str) -> Self {
        Self::new(
            agent_id,
            NodeType::File,
            agent_id,
            agent_id,
            file_path,
            None,
            1,
            1,
            "test-hash",
        )
    }
}

/// Optional filter for [`SwarmRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    pub file_path: Option<String>,
    pub node_type: Option<NodeType>,
}

/// In-memory catalog of agents (C5).
pub struct SwarmRegistry {
    records: RwLock<HashMap<String, AgentRecord>>,
}

impl SwarmRegistry {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert(&self, record: AgentRecord) {
        let mut records = self.records.write().expect("lock poisoned");
        records.insert(record.agent_id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<AgentRecord> {
        self.records.read().expect("lock poisoned").get(id).cloned()
    }

    pub fn list(&self, filter: &AgentFilter) -> Vec<AgentRecord> {
        self.records
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|r| filter.status.map(|s| s == r.status).unwrap_or(true))
            .filter(|r| {
                filter
                    .file_path
                    .as_deref()
                    .map(|p| p == r.file_path)
                    .unwrap_or(true)
            })
            .filter(|r| filter.node_type.map(|t| t == r.node_type).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Find the active record in `file_path` matching the tentative
    /// identity key `(parent_id, node_type, name)` (§4.6 step 3).
    pub fn find_active_by_identity(
        &self,
        file_path: &str,
        parent_id: Option<&str>,
        node_type: NodeType,
        name: &str,
    ) -> Option<AgentRecord> {
        self.records
            .read()
            .expect("lock poisoned")
            .values()
            .find(|r| {
                r.status == AgentStatus::Active
                    && r.file_path == file_path
                    && r.parent_id.as_deref() == parent_id
                    && r.node_type == node_type
                    && r.name == name
            })
            .cloned()
    }

    /// List every active record for a file, used by the reconciler to
    /// determine which records were not matched this pass.
    pub fn list_active_in_file(&self, file_path: &str) -> Vec<AgentRecord> {
        self.records
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|r| r.status == AgentStatus::Active && r.file_path == file_path)
            .cloned()
            .collect()
    }

    /// Transition a record to `orphaned`. Retained indefinitely (§4.5).
    pub fn mark_orphaned(&self, id: &str) {
        let mut records = self.records.write().expect("lock poisoned");
        if let Some(record) = records.get_mut(id) {
            record.status = AgentStatus::Orphaned;
            record.updated_at = Utc::now();
        }
    }
}

impl Default for SwarmRegistry {
    fn default() -> Self {
        Self::new()
    }
}
