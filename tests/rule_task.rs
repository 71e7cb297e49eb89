/// End-to-end behavior of the rule-task node state machine
///
/// Exercises the full trigger -> inject -> evaluate -> bind -> retract cycle
/// against the in-memory engine, in both immediate and wait-state modes.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use ruleway::rules::{completion_event_name, FactHandle, RuleEventListener, SubscriptionId};
use ruleway::runtime::node::NodeInstanceContainer;
use ruleway::workflow::types::{DataAssociation, RuleTaskDef, Transformation, VarType, VariableDef};
use ruleway::workflow::CONNECTION_DEFAULT_TYPE;
use ruleway::{
    Config, LuaExpressionEvaluator, NodeState, RuleEngineAdapter, RuleTaskEnvironment,
    RuleTaskNodeInstance, RuleTaskError, SimpleRuleEngine, StandaloneContainer,
    TransformerRegistry, VariableScope,
};

fn environment(
    engine: &Arc<SimpleRuleEngine>,
    scope: &Arc<VariableScope>,
    transformers: &Arc<TransformerRegistry>,
    config: Config,
) -> RuleTaskEnvironment {
    RuleTaskEnvironment {
        adapter: engine.clone(),
        scope: scope.clone(),
        transformers: transformers.clone(),
        evaluator: Arc::new(LuaExpressionEvaluator::new()),
        container: Arc::new(StandaloneContainer),
        config,
        process_instance_id: "proc-1".to_string(),
    }
}

fn doubling_task() -> RuleTaskDef {
    RuleTaskDef {
        id: "double".to_string(),
        name: "Double".to_string(),
        rule_flow_group: "calc".to_string(),
        params: Default::default(),
        in_associations: vec![DataAssociation::transform(
            "amount",
            "x",
            Transformation {
                language: "test/double".to_string(),
                expression: "amount * 2".to_string(),
            },
        )],
        out_associations: vec![DataAssociation::direct("x", "result")],
    }
}

fn doubling_transformers() -> Arc<TransformerRegistry> {
    let transformers = Arc::new(TransformerRegistry::new());
    transformers.register_fn("test/double", |_expr, bindings| {
        bindings
            .values()
            .next()
            .and_then(Value::as_i64)
            .map(|n| json!(n * 2))
    });
    transformers
}

#[tokio::test]
async fn immediate_mode_completes_inside_trigger() {
    let engine = Arc::new(SimpleRuleEngine::new());
    engine.add_rule("calc", |fact| {
        if let Some(n) = fact.as_i64() {
            *fact = json!(n + 1);
        }
    });
    let scope = VariableScope::root(vec![VariableDef::new("result", VarType::Integer)]);
    scope.set("amount", json!(10));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::default()),
    );

    let state = node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();
    assert_eq!(state, NodeState::Completed);

    // 10 doubled on input, +1 by the rule, bound back through the snapshot
    assert_eq!(scope.get("result"), Some(json!(21)));
    assert_eq!(node.live_fact_handles().await, 0);
    assert_eq!(engine.fact_count(), 0);
}

#[tokio::test]
async fn wait_state_parks_until_event_arrives() {
    let engine = Arc::new(SimpleRuleEngine::with_session(9));
    let scope = VariableScope::root(vec![VariableDef::new("result", VarType::Integer)]);
    scope.set("amount", json!(5));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::wait_state()),
    );

    let state = node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();
    assert_eq!(state, NodeState::Waiting);
    assert_eq!(scope.get("result"), None);
    assert_eq!(engine.fact_count(), 1);

    engine.fire_all().await;

    assert_eq!(node.state().await, NodeState::Completed);
    assert_eq!(scope.get("result"), Some(json!(10)));
    assert_eq!(engine.fact_count(), 0);
}

#[tokio::test]
async fn subscription_is_registered_before_group_activation() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![]);
    scope.set("amount", json!(1));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::wait_state()),
    );
    node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();

    let log = engine.call_log();
    let subscribe_pos = log
        .iter()
        .position(|c| c.starts_with("subscribe:"))
        .expect("subscribe was called");
    let activate_pos = log
        .iter()
        .position(|c| c.starts_with("activate_group:"))
        .expect("activate_group was called");
    assert!(
        subscribe_pos < activate_pos,
        "subscription must precede activation: {log:?}"
    );
}

#[tokio::test]
async fn cancellation_before_event_delivery_stays_cancelled() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![VariableDef::new("result", VarType::Integer)]);
    scope.set("amount", json!(3));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::wait_state()),
    );
    node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();
    node.cancel().await;
    assert_eq!(node.state().await, NodeState::Cancelled);

    // deliver the original event directly; it must not re-trigger completion
    node.on_event(&completion_event_name("calc", None)).await;
    assert_eq!(node.state().await, NodeState::Cancelled);
    assert_eq!(scope.get("result"), None);
    // cancellation intentionally leaves the injected facts in working memory
    assert_eq!(engine.fact_count(), 1);
}

#[tokio::test]
async fn cancellation_releases_the_event_subscription() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![]);
    scope.set("amount", json!(2));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::wait_state()),
    );
    node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();
    node.cancel().await;

    // the listener must not stay registered in a shared session
    assert!(engine
        .call_log()
        .iter()
        .any(|c| c.starts_with("unsubscribe:")));
}

#[tokio::test]
async fn completing_twice_is_a_no_op() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![VariableDef::new("result", VarType::Integer)]);
    scope.set("amount", json!(4));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::default()),
    );
    node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();

    let deletes_after_first = engine
        .call_log()
        .iter()
        .filter(|c| c.starts_with("delete:"))
        .count();
    node.complete().await.unwrap();
    let deletes_after_second = engine
        .call_log()
        .iter()
        .filter(|c| c.starts_with("delete:"))
        .count();
    assert_eq!(deletes_after_first, deletes_after_second);
    assert_eq!(node.state().await, NodeState::Completed);
}

#[tokio::test]
async fn non_default_connections_are_rejected() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![]);
    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::default()),
    );

    let err = node.trigger("SOME_OTHER_TYPE").await.unwrap_err();
    assert!(matches!(err, RuleTaskError::InvalidConnection { .. }));
    // nothing was injected, nothing to clean up
    assert_eq!(engine.fact_count(), 0);
}

#[tokio::test]
async fn rule_flow_group_resolves_through_templates() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![]);
    scope.set("region", json!("emea"));
    scope.set("amount", json!(1));

    let mut def = doubling_task();
    def.rule_flow_group = "calc-#{region}".to_string();

    let node = RuleTaskNodeInstance::new(
        def,
        environment(&engine, &scope, &doubling_transformers(), Config::default()),
    );
    node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();

    assert!(engine
        .call_log()
        .iter()
        .any(|c| c == "activate_group:calc-emea"));
}

/// Container whose generic trigger hook tears the node instance down
struct CancellingContainer {
    cancelled: AtomicBool,
}

#[async_trait::async_trait]
impl NodeInstanceContainer for CancellingContainer {
    async fn on_trigger(&self, _node_instance_id: Uuid) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn contains(&self, _node_instance_id: Uuid) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }

    async fn node_completed(&self, _node_instance_id: Uuid) {}
}

#[tokio::test]
async fn trigger_aborts_when_hook_cancels_the_instance() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![]);
    scope.set("amount", json!(1));

    let mut env = environment(&engine, &scope, &doubling_transformers(), Config::default());
    env.container = Arc::new(CancellingContainer {
        cancelled: AtomicBool::new(false),
    });
    let node = RuleTaskNodeInstance::new(doubling_task(), env);

    let state = node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();
    assert_eq!(state, NodeState::Created);
    assert_eq!(engine.fact_count(), 0);
}

#[tokio::test]
async fn mismatched_event_names_are_ignored() {
    let engine = Arc::new(SimpleRuleEngine::new());
    let scope = VariableScope::root(vec![]);
    scope.set("amount", json!(2));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::wait_state()),
    );
    node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();

    node.on_event("RuleGroup_some_other_group").await;
    assert_eq!(node.state().await, NodeState::Waiting);
}

/// Adapter whose group activation fires the agenda before returning, so the
/// completion event arrives on the triggering call chain itself
struct EagerFiringEngine {
    inner: SimpleRuleEngine,
}

#[async_trait::async_trait]
impl RuleEngineAdapter for EagerFiringEngine {
    async fn insert(&self, value: Value) -> FactHandle {
        self.inner.insert(value).await
    }

    async fn delete(&self, handle: FactHandle) {
        self.inner.delete(handle).await
    }

    async fn get_value(&self, handle: FactHandle) -> Option<Value> {
        self.inner.get_value(handle).await
    }

    async fn activate_group(&self, group: &str, process_instance_id: &str, activation_id: Uuid) {
        self.inner
            .activate_group(group, process_instance_id, activation_id)
            .await;
        self.inner.fire_all().await;
    }

    async fn deactivate_group(&self, group: &str) {
        self.inner.deactivate_group(group).await;
    }

    async fn fire_all(&self) {
        self.inner.fire_all().await;
    }

    async fn subscribe(
        &self,
        event_name: &str,
        listener: Arc<dyn RuleEventListener>,
    ) -> SubscriptionId {
        self.inner.subscribe(event_name, listener).await
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) {
        self.inner.unsubscribe(subscription).await;
    }

    fn session_id(&self) -> Option<u64> {
        self.inner.session_id()
    }
}

#[tokio::test]
async fn event_delivered_during_activation_completes_without_hanging() {
    let engine = Arc::new(EagerFiringEngine {
        inner: SimpleRuleEngine::new(),
    });
    let scope = VariableScope::root(vec![VariableDef::new("result", VarType::Integer)]);
    scope.set("amount", json!(5));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        RuleTaskEnvironment {
            adapter: engine.clone(),
            scope: scope.clone(),
            transformers: doubling_transformers(),
            evaluator: Arc::new(LuaExpressionEvaluator::new()),
            container: Arc::new(StandaloneContainer),
            config: Config::wait_state(),
            process_instance_id: "proc-1".to_string(),
        },
    );

    let state = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        node.trigger(CONNECTION_DEFAULT_TYPE),
    )
    .await
    .expect("trigger must return even when the event arrives during activation")
    .unwrap();

    assert_eq!(state, NodeState::Completed);
    assert_eq!(scope.get("result"), Some(json!(10)));
    assert_eq!(engine.inner.fact_count(), 0);
}

#[tokio::test]
async fn coercion_failure_surfaces_but_cleanup_still_runs() {
    let engine = Arc::new(SimpleRuleEngine::new());
    // the rule rewrites the fact to a string the Integer target cannot parse
    engine.add_rule("calc", |fact| {
        *fact = json!("definitely-not-a-number");
    });
    let scope = VariableScope::root(vec![VariableDef::new("result", VarType::Integer)]);
    scope.set("amount", json!(5));

    let node = RuleTaskNodeInstance::new(
        doubling_task(),
        environment(&engine, &scope, &doubling_transformers(), Config::default()),
    );

    let err = node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap_err();
    assert!(matches!(err, RuleTaskError::TypeCoercion { .. }));
    // facts were retracted before the binding error propagated
    assert_eq!(engine.fact_count(), 0);
    assert_eq!(node.state().await, NodeState::Completed);
}

proptest! {
    /// Insertions always balance retractions, whatever the association set
    #[test]
    fn fact_insertions_balance_retractions(
        names in proptest::collection::hash_set("[a-z]{1,8}", 0..8)
    ) {
        let names: HashSet<String> = names;
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = Arc::new(SimpleRuleEngine::new());
            let scope = VariableScope::root(vec![]);

            let mut def = doubling_task();
            def.in_associations = names
                .iter()
                .map(|name| {
                    scope.set(name.clone(), json!(1));
                    DataAssociation::direct(name.clone(), format!("fact_{name}"))
                })
                .collect();
            def.out_associations = vec![];

            let node = RuleTaskNodeInstance::new(
                def,
                environment(&engine, &scope, &doubling_transformers(), Config::default()),
            );
            node.trigger(CONNECTION_DEFAULT_TYPE).await.unwrap();

            let log = engine.call_log();
            let inserts = log.iter().filter(|c| c.starts_with("insert:")).count();
            let deletes = log.iter().filter(|c| c.starts_with("delete:")).count();
            prop_assert_eq!(inserts, deletes);
            prop_assert_eq!(inserts, names.len());
            prop_assert_eq!(engine.fact_count(), 0);
            prop_assert_eq!(node.live_fact_handles().await, 0);
            Ok(())
        })?;
    }
}
