/// In-memory reference rule engine
///
/// A deliberately small engine used by the demo binary and the test suite.
/// Rules are per-group closures applied to every fact in working memory when
/// the group fires. Firing a group deactivates it and emits its completion
/// event to subscribed listeners, mirroring how a rule-flow group signals
/// once its agenda empties.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::rules::adapter::{
    completion_event_name, FactHandle, RuleEngineAdapter, RuleEventListener, SubscriptionId,
};

type RuleAction = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// Mutable engine state behind one lock
///
/// Listener notification never happens while this lock is held - a listener
/// may re-enter the engine (delete facts, unsubscribe) from its callback.
#[derive(Default)]
struct EngineState {
    /// Working memory: handle id -> current fact value
    facts: HashMap<u64, Value>,
    /// Currently activated rule-flow groups
    active_groups: Vec<String>,
    /// Registered rules: (group, action applied to each fact)
    rules: Vec<(String, RuleAction)>,
    /// Live subscriptions: id -> (event name, listener)
    subscriptions: HashMap<u64, (String, Arc<dyn RuleEventListener>)>,
    /// Recorded adapter calls, for observing call ordering in tests
    call_log: Vec<String>,
}

/// Simple working-memory engine with per-group rule closures
pub struct SimpleRuleEngine {
    state: Mutex<EngineState>,
    next_handle: AtomicU64,
    next_subscription: AtomicU64,
    session_id: Option<u64>,
}

impl SimpleRuleEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            next_handle: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            session_id: None,
        }
    }

    /// Engine bound to a stateful session identifier
    pub fn with_session(session_id: u64) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::new()
        }
    }

    /// Register a rule: `action` runs against every fact when `group` fires
    pub fn add_rule(&self, group: impl Into<String>, action: impl Fn(&mut Value) + Send + Sync + 'static) {
        self.state.lock().rules.push((group.into(), Arc::new(action)));
    }

    /// Number of facts currently in working memory
    pub fn fact_count(&self) -> usize {
        self.state.lock().facts.len()
    }

    /// Snapshot of recorded adapter calls (oldest first)
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().call_log.clone()
    }
}

impl Default for SimpleRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleEngineAdapter for SimpleRuleEngine {
    async fn insert(&self, value: Value) -> FactHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.facts.insert(id, value);
        state.call_log.push(format!("insert:{id}"));
        tracing::debug!("inserted fact {} into working memory", id);
        FactHandle(id)
    }

    async fn delete(&self, handle: FactHandle) {
        let mut state = self.state.lock();
        state.facts.remove(&handle.0);
        state.call_log.push(format!("delete:{}", handle.0));
    }

    async fn get_value(&self, handle: FactHandle) -> Option<Value> {
        self.state.lock().facts.get(&handle.0).cloned()
    }

    async fn activate_group(&self, group: &str, process_instance_id: &str, activation_id: Uuid) {
        let mut state = self.state.lock();
        if !state.active_groups.iter().any(|g| g == group) {
            state.active_groups.push(group.to_string());
        }
        state.call_log.push(format!("activate_group:{group}"));
        tracing::debug!(
            "activated rule-flow group '{}' (process: {}, activation: {})",
            group,
            process_instance_id,
            activation_id
        );
    }

    async fn deactivate_group(&self, group: &str) {
        let mut state = self.state.lock();
        state.active_groups.retain(|g| g != group);
        state.call_log.push(format!("deactivate_group:{group}"));
        tracing::debug!("deactivated rule-flow group '{}'", group);
    }

    async fn fire_all(&self) {
        // Run every active group's rules over working memory, then emit each
        // group's completion event. Listeners are notified outside the lock.
        let notifications: Vec<(Arc<dyn RuleEventListener>, String)> = {
            let mut state = self.state.lock();
            state.call_log.push("fire_all".to_string());

            let fired_groups = std::mem::take(&mut state.active_groups);
            for group in &fired_groups {
                let actions: Vec<RuleAction> = state
                    .rules
                    .iter()
                    .filter(|(g, _)| g == group)
                    .map(|(_, action)| Arc::clone(action))
                    .collect();
                for action in actions {
                    for fact in state.facts.values_mut() {
                        action(fact);
                    }
                }
                tracing::debug!("fired rule-flow group '{}'", group);
            }

            fired_groups
                .iter()
                .flat_map(|group| {
                    let event = completion_event_name(group, self.session_id);
                    state
                        .subscriptions
                        .values()
                        .filter(move |(name, _)| *name == event)
                        .map(|(name, listener)| (Arc::clone(listener), name.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        for (listener, event) in notifications {
            listener.on_event(&event).await;
        }
    }

    async fn subscribe(
        &self,
        event_name: &str,
        listener: Arc<dyn RuleEventListener>,
    ) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state
            .subscriptions
            .insert(id, (event_name.to_string(), listener));
        state.call_log.push(format!("subscribe:{event_name}"));
        SubscriptionId(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) {
        let mut state = self.state.lock();
        state.subscriptions.remove(&subscription.0);
        state.call_log.push(format!("unsubscribe:{}", subscription.0));
    }

    fn session_id(&self) -> Option<u64> {
        self.session_id
    }
}
