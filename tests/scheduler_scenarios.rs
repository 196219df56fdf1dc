//! End-to-end scheduler scenarios (spec §8, S1–S4, S8) driven through the
//! public `RemoraCore` facade rather than any single module's internals.

use remora_core::{
    EventKind, PartialEvent, RemoraCollaborators, RemoraConfig, RemoraCore, SubscriptionPattern,
    TurnOutcome,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod support {
    use remora_core::collaborators::{DiscoveredNode, Kernel, StaticTreeParser, TurnOutcome};
    use remora_core::{AgentRecord, AgentState, Event};
    use async_trait::async_trait;

    /// A `Kernel` whose emission rule is driven entirely by the
    /// activated agent's own id, letting tests express a fixed relay
    /// topology (A1 -> A2 -> ... ) without inspecting payloads.
    pub struct RelayKernel {
        pub next: std::collections::HashMap<String, String>,
        pub calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
    }

    #[async_trait]
    impl Kernel for RelayKernel {
        async fn turn(&self, record: &AgentRecord, state: &AgentState, _event: &Event) -> TurnOutcome {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let emitted = match self.next.get(&record.agent_id) {
                Some(target) => vec![remora_core::PartialEvent::new(
                    remora_core::EventKind::AgentMessage,
                    serde_json::json!({"relay": true}),
                )
                .with_to_agent(target.clone())],
                None => vec![],
            };
            TurnOutcome::Ok {
                updated_state: state.clone(),
                emitted,
            }
        }
    }

    pub fn null_parser() -> std::sync::Arc<StaticTreeParser> {
        std::sync::Arc::new(StaticTreeParser::new())
    }

    pub fn null_workspaces() -> std::sync::Arc<remora_core::collaborators::NullWorkspaceProvider> {
        std::sync::Arc::new(remora_core::collaborators::NullWorkspaceProvider)
    }

    // Silences an unused-import lint for DiscoveredNode in builds that
    // don't otherwise reference it in this module.
    #[allow(dead_code)]
    pub fn _touch(_n: DiscoveredNode) {}
}

async fn wait_until(core: &Arc<RemoraCore>, mut predicate: impl FnMut(&[remora_core::Event]) -> bool) {
    for _ in 0..300 {
        let events = core.replay(None);
        if predicate(&events) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true within the test deadline");
}

fn noop_kernel() -> Arc<dyn remora_core::Kernel> {
    Arc::new(remora_core::collaborators::ScriptedKernel::new(|_r, state, _e| TurnOutcome::Ok {
        updated_state: state.clone(),
        emitted: vec![],
    }))
}

#[tokio::test]
async fn s1_simple_fan_out_and_s8_glob_precision() {
    let core = Arc::new(
        RemoraCore::new(
            RemoraConfig::default(),
            RemoraCollaborators {
                kernel: noop_kernel(),
                tree_parser: support::null_parser(),
                workspaces: support::null_workspaces(),
            },
            None,
        )
        .unwrap(),
    );
    let handle = core.start();

    core.subscribe_to_stream("A1", SubscriptionPattern::new().with_path_glob("src/*.py"))
        .unwrap();
    core.subscribe_to_stream("A2", SubscriptionPattern::new().with_to_agent("A2"))
        .unwrap();

    core.ingest_event(
        PartialEvent::new(EventKind::ContentChanged, serde_json::json!({}))
            .with_path("src/a.py"),
    )
    .await
    .unwrap();
    // Glob precision: neither of these should trigger A1.
    core.ingest_event(
        PartialEvent::new(EventKind::ContentChanged, serde_json::json!({}))
            .with_path("src/sub/a.py"),
    )
    .await
    .unwrap();
    core.ingest_event(
        PartialEvent::new(EventKind::ContentChanged, serde_json::json!({}))
            .with_path("src/a.pyc"),
    )
    .await
    .unwrap();

    wait_until(&core, |events| {
        events.iter().filter(|e| e.kind == EventKind::TurnStarted).count() >= 1
    })
    .await;

    core.ingest_event(
        PartialEvent::new(EventKind::AgentMessage, serde_json::json!({"content": "hi"}))
            .with_to_agent("A2"),
    )
    .await
    .unwrap();

    wait_until(&core, |events| {
        events.iter().filter(|e| e.kind == EventKind::TurnStarted).count() >= 2
    })
    .await;

    core.shutdown();
    handle.await.unwrap();

    let started: Vec<_> = core
        .replay(None)
        .into_iter()
        .filter(|e| e.kind == EventKind::TurnStarted)
        .collect();
    assert_eq!(started.len(), 2);
    assert_eq!(started[0].from_agent.as_deref(), Some("A1"));
    assert_eq!(started[1].from_agent.as_deref(), Some("A2"));
}

#[tokio::test]
async fn s2_cycle_rejection() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut next = std::collections::HashMap::new();
    next.insert("A1".to_string(), "A2".to_string());
    next.insert("A2".to_string(), "A1".to_string());
    let kernel = Arc::new(support::RelayKernel { next, calls: Arc::clone(&calls) });

    let core = Arc::new(
        RemoraCore::new(
            RemoraConfig::default(),
            RemoraCollaborators {
                kernel,
                tree_parser: support::null_parser(),
                workspaces: support::null_workspaces(),
            },
            None,
        )
        .unwrap(),
    );
    let handle = core.start();

    core.subscribe_to_stream("A1", SubscriptionPattern::new().with_to_agent("A1")).unwrap();
    core.subscribe_to_stream("A2", SubscriptionPattern::new().with_to_agent("A2")).unwrap();

    core.ingest_event(
        PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({}))
            .with_to_agent("A1")
            .with_correlation_id("C"),
    )
    .await
    .unwrap();

    wait_until(&core, |events| {
        events.iter().any(|e| e.kind == EventKind::TurnError)
    })
    .await;

    core.shutdown();
    handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2, "exactly A1 then A2 should have run");
    let events = core.replay(None);
    assert_eq!(events.iter().filter(|e| e.kind == EventKind::TurnStarted).count(), 2);
    let errors: Vec<_> = events.iter().filter(|e| e.kind == EventKind::TurnError).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].payload["cause"].as_str(),
        Some("admission refused: cycle detected in correlation chain")
    );
}

#[tokio::test]
async fn s3_depth_limit() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut next = std::collections::HashMap::new();
    next.insert("A1".to_string(), "A2".to_string());
    next.insert("A2".to_string(), "A3".to_string());
    next.insert("A3".to_string(), "A4".to_string());
    next.insert("A4".to_string(), "A5".to_string());
    let kernel = Arc::new(support::RelayKernel { next, calls: Arc::clone(&calls) });

    let config = RemoraConfig { max_chain_depth: 3, ..RemoraConfig::default() };
    let core = Arc::new(
        RemoraCore::new(
            config,
            RemoraCollaborators {
                kernel,
                tree_parser: support::null_parser(),
                workspaces: support::null_workspaces(),
            },
            None,
        )
        .unwrap(),
    );
    let handle = core.start();

    for agent in ["A1", "A2", "A3", "A4", "A5"] {
        core.subscribe_to_stream(agent, SubscriptionPattern::new().with_to_agent(agent)).unwrap();
    }

    core.ingest_event(
        PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({}))
            .with_to_agent("A1")
            .with_correlation_id("C"),
    )
    .await
    .unwrap();

    wait_until(&core, |events| {
        events.iter().any(|e| e.kind == EventKind::TurnError)
    })
    .await;

    core.shutdown();
    handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3, "only three hops should run before the depth limit bites");
    let events = core.replay(None);
    assert_eq!(events.iter().filter(|e| e.kind == EventKind::TurnStarted).count(), 3);
    let errors: Vec<_> = events.iter().filter(|e| e.kind == EventKind::TurnError).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].payload["cause"].as_str(),
        Some("admission refused: correlation chain depth limit reached")
    );
}

#[tokio::test]
async fn s4_cooldown() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = Arc::clone(&calls);
    let kernel = Arc::new(remora_core::collaborators::ScriptedKernel::new(move |_r, state, _e| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        TurnOutcome::Ok { updated_state: state.clone(), emitted: vec![] }
    }));

    let config = RemoraConfig { cooldown_ms: 500, ..RemoraConfig::default() };
    let core = Arc::new(
        RemoraCore::new(
            config,
            RemoraCollaborators {
                kernel,
                tree_parser: support::null_parser(),
                workspaces: support::null_workspaces(),
            },
            None,
        )
        .unwrap(),
    );
    let handle = core.start();

    core.subscribe_to_stream("A1", SubscriptionPattern::new().with_to_agent("A1")).unwrap();

    core.ingest_event(
        PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({}))
            .with_to_agent("A1")
            .with_correlation_id("C1"),
    )
    .await
    .unwrap();
    core.ingest_event(
        PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({}))
            .with_to_agent("A1")
            .with_correlation_id("C2"),
    )
    .await
    .unwrap();

    wait_until(&core, |events| {
        events.iter().any(|e| e.kind == EventKind::TurnError)
    })
    .await;

    core.shutdown();
    handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let errors: Vec<_> = core
        .replay(None)
        .into_iter()
        .filter(|e| e.kind == EventKind::TurnError)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].payload["cause"].as_str(),
        Some("admission refused: agent is within its cooldown window")
    );
}
