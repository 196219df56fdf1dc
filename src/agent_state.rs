//! Per-agent chat history, learned connections, and custom subscriptions
//! (C4, §4.4).
//!
//! Keyed by `agent_id`, last-writer-wins. Concurrent mutation of the
//! *same* agent from two threads is a usage error prevented upstream by
//! the [`AgentRunner`](crate::runner::AgentRunner)'s per-agent
//! serialization (§5) — this store itself only guarantees that a single
//! write completes atomically.

use crate::subscription::SubscriptionPattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// A role-tagged chat message, shaped like an ordinary LLM chat turn so a
/// `Kernel` implementation can hand this back without a translation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-agent persistent state (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub chat_history: Vec<ChatMessage>,
    pub connections: HashMap<String, String>,
    pub custom_subscriptions: Vec<SubscriptionPattern>,
    pub last_activated_at: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            chat_history: Vec::new(),
            connections: HashMap::new(),
            custom_subscriptions: Vec::new(),
            last_activated_at: None,
        }
    }
}

/// In-memory, per-agent state store (C4).
pub struct AgentStateStore {
    states: RwLock<HashMap<String, AgentState>>,
}

impl AgentStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a copy of an agent's state, creating a fresh empty one if
    /// this is the agent's first activation.
    pub fn get_or_create(&self, agent_id: &str) -> AgentState {
        let mut states = self.states.write().expect("lock poisoned");
        states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState::new(agent_id))
            .clone()
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentState> {
        self.states.read().expect("lock poisoned").get(agent_id).cloned()
    }

    /// Replace an agent's state wholesale. Last-writer-wins.
    pub fn put(&self, state: AgentState) {
        let mut states = self.states.write().expect("lock poisoned");
        states.insert(state.agent_id.clone(), state);
    }

    pub fn append_chat(&self, agent_id: &str, message: ChatMessage) {
        let mut states = self.states.write().expect("lock poisoned");
        let state = states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState::new(agent_id));
        state.chat_history.push(message);
    }
}

impl Default for AgentStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_stable() {
        let store = AgentStateStore::new();
        let first = store.get_or_create("a1");
        store.append_chat("a1", ChatMessage::new(Role::User, "hello"));
        let second = store.get("a1").unwrap();
        assert_eq!(first.agent_id, second.agent_id);
        assert_eq!(second.chat_history.len(), 1);
    }

    #[test]
    fn put_is_last_writer_wins() {
        let store = AgentStateStore::new();
        store.append_chat("a1", ChatMessage::new(Role::User, "first"));
        let mut state = store.get("a1").unwrap();
        state.chat_history.clear();
        store.put(state);
        assert!(store.get("a1").unwrap().chat_history.is_empty());
    }
}
