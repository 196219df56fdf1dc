//! Reconcile the agent registry with the current syntactic view of a file
//! (C6, §4.6).
//!
//! Renames are not tracked: a rename from `foo` to `bar` orphans `foo` and
//! creates `bar`. This is the explicit simplicity/safety trade-off called
//! out in spec §4.6/§9 — identity is keyed on `(parent_qualified_name,
//! node_type, name)`, and a changed `name` is, by construction, a
//! different identity key.

use crate::collaborators::TreeParser;
use crate::error::{RemoraError, RemoraResult};
use crate::event::{EventKind, PartialEvent};
use crate::store::EventStore;
use crate::subscription::SubscriptionRegistry;
use crate::swarm_registry::{AgentRecord, SwarmRegistry};
use std::sync::Arc;
use uuid::Uuid;

/// Coordinates the registry, subscription registry, event store, and a
/// `TreeParser` collaborator to keep the registry aligned with source
/// (C6).
pub struct Reconciler {
    registry: Arc<SwarmRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    store: Arc<EventStore>,
    parser: Arc<dyn TreeParser>,
}

/// Summary of one `reconcile` call, useful for logging and tests (S4/S5/S6).
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub orphaned: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.orphaned.is_empty()
    }
}

impl Reconciler {
    pub fn new(
        registry: Arc<SwarmRegistry>,
        subscriptions: Arc<SubscriptionRegistry>,
        store: Arc<EventStore>,
        parser: Arc<dyn TreeParser>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            store,
            parser,
        }
    }

    /// Reconcile `file_path` against its current syntactic view.
    /// Idempotent: re-running with no intervening source change produces
    /// no registry changes and no emitted events (§4.6, S4).
    pub async fn reconcile(&self, file_path: &str) -> RemoraResult<ReconcileReport> {
        let discovered = self
            .parser
            .parse(file_path)
            .await
            .map_err(RemoraError::Reconcile)?;

        let mut report = ReconcileReport::default();
        let mut matched_agent_ids = std::collections::HashSet::new();

        for node in &discovered {
            let existing = self.registry.find_active_by_identity(
                file_path,
                node.parent_qualified_name.as_deref(),
                node.node_type,
                &node.name,
            );

            match existing {
                Some(record)
                    if record.source_hash == node.source_hash
                        && record.start_line == node.start_line
                        && record.end_line == node.end_line =>
                {
                    // Unchanged: preserve id, no mutation, no event.
                    matched_agent_ids.insert(record.agent_id.clone());
                }
                Some(mut record) => {
                    // Content changed: preserve id, update fields, emit ContentChanged.
                    record.start_line = node.start_line;
                    record.end_line = node.end_line;
                    record.source_hash = node.source_hash.clone();
                    record.updated_at = chrono::Utc::now();
                    self.registry.upsert(record.clone());
                    matched_agent_ids.insert(record.agent_id.clone());
                    report.updated.push(record.agent_id.clone());
                    self.emit_content_changed(&record).await?;
                }
                None => {
                    let agent_id = Uuid::new_v4().to_string();
                    let record = AgentRecord::new(
                        agent_id.clone(),
                        node.node_type,
                        node.name.clone(),
                        node.qualified_name.clone(),
                        file_path,
                        node.parent_qualified_name.clone(),
                        node.start_line,
                        node.end_line,
                        node.source_hash.clone(),
                    );
                    self.registry.upsert(record.clone());
                    self.subscriptions
                        .register_defaults(&record)
                        .map_err(|e| RemoraError::Reconcile(e.to_string()))?;
                    matched_agent_ids.insert(agent_id.clone());
                    report.created.push(agent_id);
                    self.emit_content_changed(&record).await?;
                }
            }
        }

        for record in self.registry.list_active_in_file(file_path) {
            if !matched_agent_ids.contains(&record.agent_id) {
                self.registry.mark_orphaned(&record.agent_id);
                self.subscriptions
                    .unregister_all(&record.agent_id)
                    .map_err(|e| RemoraError::Reconcile(e.to_string()))?;
                report.orphaned.push(record.agent_id);
            }
        }

        Ok(report)
    }

    async fn emit_content_changed(&self, record: &AgentRecord) -> RemoraResult<()> {
        let payload = serde_json::json!({
            "agent_id": record.agent_id,
            "source_hash": record.source_hash,
        });
        self.store
            .append(
                PartialEvent::new(EventKind::ContentChanged, payload)
                    .with_path(record.file_path.clone()),
            )
            .await
            .map_err(|e| RemoraError::Reconcile(e.to_string()))?;
        Ok(())
    }
}
