//! Pattern-indexed subscription matching (C2, §4.2).
//!
//! A [`SubscriptionPattern`] is an AND-composition of optional filters; an
//! unspecified filter is a wildcard. [`SubscriptionRegistry`] indexes
//! patterns by their most selective filter so a match only probes the
//! relevant bucket instead of scanning every registered subscription.

use crate::error::{RemoraError, RemoraResult};
use crate::event::StructuralMatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

/// AND-composed, optional-filter pattern (§3). An unset filter always
/// matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionPattern {
    pub event_kinds: Option<HashSet<crate::event::EventKind>>,
    pub from_agents: Option<HashSet<String>>,
    pub to_agent: Option<String>,
    pub path_glob: Option<String>,
    pub tags_required: Option<HashSet<String>>,
}

impl SubscriptionPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_kinds(mut self, kinds: impl IntoIterator<Item = crate::event::EventKind>) -> Self {
        self.event_kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_to_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.to_agent = Some(agent_id.into());
        self
    }

    pub fn with_from_agents(mut self, agents: impl IntoIterator<Item = String>) -> Self {
        self.from_agents = Some(agents.into_iter().collect());
        self
    }

    pub fn with_path_glob(mut self, glob: impl Into<String>) -> Self {
        self.path_glob = Some(glob.into());
        self
    }

    pub fn with_tags_required(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags_required = Some(tags.into_iter().collect());
        self
    }

    /// `true` iff every specified filter matches `event`.
    pub fn matches(&self, event: &StructuralMatch<'_>) -> bool {
        if let Some(kinds) = &self.event_kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(froms) = &self.from_agents {
            match event.from_agent {
                Some(from) if froms.contains(from) => {}
                _ => return false,
            }
        }
        if let Some(to) = &self.to_agent {
            match event.to_agent {
                Some(actual) if actual == to => {}
                _ => return false,
            }
        }
        if let Some(glob) = &self.path_glob {
            match event.path {
                Some(path) if glob_match(glob, path) => {}
                _ => return false,
            }
        }
        if let Some(required) = &self.tags_required {
            if !required.is_subset(event.tags) {
                return false;
            }
        }
        true
    }

    /// The bucket keys used by [`SubscriptionRegistry`]'s index, selected
    /// by priority: `to_agent` → `event_kinds` → `path_glob` prefix →
    /// fallback (§4.2). A pattern naming several `event_kinds` is indexed
    /// under every one of them, not just one, so an event of any of those
    /// kinds still probes a bucket this subscription is in.
    fn bucket_keys(&self) -> Vec<BucketKey> {
        if let Some(to) = &self.to_agent {
            return vec![BucketKey::ToAgent(to.clone())];
        }
        if let Some(kinds) = &self.event_kinds {
            if !kinds.is_empty() {
                return kinds.iter().map(|k| BucketKey::Kind(*k)).collect();
            }
        }
        if let Some(glob) = &self.path_glob {
            return vec![BucketKey::PathPrefix(glob_literal_prefix(glob))];
        }
        vec![BucketKey::Fallback]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BucketKey {
    ToAgent(String),
    Kind(crate::event::EventKind),
    PathPrefix(String),
    Fallback,
}

/// A registered subscription (§3). `is_default` subscriptions are managed
/// exclusively by the [`Reconciler`](crate::reconcile::Reconciler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub agent_id: String,
    pub pattern: SubscriptionPattern,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

struct Inner {
    subscriptions: HashMap<String, Subscription>,
    buckets: HashMap<BucketKey, HashSet<String>>,
    by_agent: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            buckets: HashMap::new(),
            by_agent: HashMap::new(),
        }
    }

    fn insert(&mut self, sub: Subscription) {
        for key in sub.pattern.bucket_keys() {
            self.buckets.entry(key).or_default().insert(sub.id.clone());
        }
        self.by_agent
            .entry(sub.agent_id.clone())
            .or_default()
            .insert(sub.id.clone());
        self.subscriptions.insert(sub.id.clone(), sub);
    }

    fn remove(&mut self, id: &str) -> Option<Subscription> {
        let sub = self.subscriptions.remove(id)?;
        for key in sub.pattern.bucket_keys() {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(id);
            }
        }
        if let Some(agent_subs) = self.by_agent.get_mut(&sub.agent_id) {
            agent_subs.remove(id);
        }
        Some(sub)
    }
}

/// Pattern-indexed, durably-backed subscription store (C2).
///
/// Readers may run concurrently with each other; writes are serialized
/// via an `RwLock`, matching the single-writer discipline of §5.
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Register a new subscription. Fails with `RegistryWriteError` if
    /// durable persistence fails; since this in-process implementation has
    /// no external durable table, the write can only fail on a poisoned
    /// lock, which is treated the same way.
    pub fn register(
        &self,
        agent_id: &str,
        pattern: SubscriptionPattern,
        is_default: bool,
    ) -> RemoraResult<String> {
        let id = Uuid::new_v4().to_string();
        let sub = Subscription {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            pattern,
            is_default,
            created_at: Utc::now(),
        };
        let mut inner = self
            .inner
            .write()
            .map_err(|_| RemoraError::RegistryWrite("lock poisoned".into()))?;
        inner.insert(sub);
        Ok(id)
    }

    pub fn unregister(&self, subscription_id: &str) -> RemoraResult<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| RemoraError::RegistryWrite("lock poisoned".into()))?;
        inner.remove(subscription_id);
        Ok(())
    }

    pub fn unregister_all(&self, agent_id: &str) -> RemoraResult<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| RemoraError::RegistryWrite("lock poisoned".into()))?;
        let ids: Vec<String> = inner
            .by_agent
            .get(agent_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for id in ids {
            inner.remove(&id);
        }
        Ok(())
    }

    /// Idempotently replace an agent's default subscriptions (§4.6): exactly
    /// a `to_agent=self` subscription and a `path_glob=file_path` subscription
    /// filtered to content/file kinds.
    pub fn register_defaults(&self, record: &crate::swarm_registry::AgentRecord) -> RemoraResult<()> {
        {
            let mut inner = self
                .inner
                .write()
                .map_err(|_| RemoraError::RegistryWrite("lock poisoned".into()))?;
            let existing_defaults: Vec<String> = inner
                .by_agent
                .get(&record.agent_id)
                .map(|ids| {
                    ids.iter()
                        .filter(|id| {
                            inner
                                .subscriptions
                                .get(id.as_str())
                                .map(|s| s.is_default)
                                .unwrap_or(false)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            for id in existing_defaults {
                inner.remove(&id);
            }
        }

        let to_self = SubscriptionPattern::new().with_to_agent(record.agent_id.clone());
        self.register(&record.agent_id, to_self, true)?;

        let content_pattern = SubscriptionPattern::new()
            .with_event_kinds([
                crate::event::EventKind::ContentChanged,
                crate::event::EventKind::FileSaved,
            ])
            .with_path_glob(record.file_path.clone());
        self.register(&record.agent_id, content_pattern, true)?;

        Ok(())
    }

    pub fn list_for(&self, agent_id: &str) -> Vec<Subscription> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .by_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.subscriptions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return the deduplicated set of agent ids whose patterns match
    /// `event`. Probes only the buckets relevant to the event before
    /// falling back to a full scan of the fallback bucket.
    pub fn matches(&self, event: &StructuralMatch<'_>) -> HashSet<String> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut candidate_ids = HashSet::new();

        if let Some(to) = event.to_agent {
            if let Some(bucket) = inner.buckets.get(&BucketKey::ToAgent(to.to_string())) {
                candidate_ids.extend(bucket.iter().cloned());
            }
        }
        if let Some(bucket) = inner.buckets.get(&BucketKey::Kind(event.kind)) {
            candidate_ids.extend(bucket.iter().cloned());
        }
        if let Some(path) = event.path {
            for (key, bucket) in &inner.buckets {
                if let BucketKey::PathPrefix(prefix) = key {
                    if path.starts_with(prefix.as_str()) {
                        candidate_ids.extend(bucket.iter().cloned());
                    }
                }
            }
        }
        if let Some(bucket) = inner.buckets.get(&BucketKey::Fallback) {
            candidate_ids.extend(bucket.iter().cloned());
        }

        candidate_ids
            .into_iter()
            .filter_map(|id| inner.subscriptions.get(&id))
            .filter(|sub| sub.pattern.matches(event))
            .map(|sub| sub.agent_id.clone())
            .collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest literal (non-wildcard) prefix of a glob, used to bucket
/// `path_glob` patterns for the index.
fn glob_literal_prefix(glob: &str) -> String {
    glob.chars()
        .take_while(|&c| c != '*' && c != '?')
        .collect()
}

/// Match `path` against `pattern` per §4.2's glob semantics:
/// - `*` matches any run of characters within a single path segment.
/// - `**` matches across segments (including zero segments).
/// - `?` matches exactly one non-separator character.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            if match_segments(&pattern[1..], path) {
                return true;
            }
            if !path.is_empty() && match_segments(pattern, &path[1..]) {
                return true;
            }
            false
        }
        Some(seg) => {
            if path.is_empty() {
                return false;
            }
            segment_match(seg, path[0]) && match_segments(&pattern[1..], &path[1..])
        }
    }
}

fn segment_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    segment_match_chars(&pattern, &text)
}

fn segment_match_chars(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            for split in 0..=text.len() {
                if segment_match_chars(&pattern[1..], &text[split..]) {
                    return true;
                }
            }
            false
        }
        Some('?') => !text.is_empty() && segment_match_chars(&pattern[1..], &text[1..]),
        Some(c) => !text.is_empty() && text[0] == *c && segment_match_chars(&pattern[1..], &text[1..]),
    }
}
