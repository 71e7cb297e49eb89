/// Ruleway: embeddable rule-task runtime
///
/// Demo entry point. Wires an in-memory rule engine, a sandboxed Lua
/// expression evaluator, and a doubling transformer, then runs the same rule
/// task twice: once synchronously and once as a wait-state resumed by the
/// engine's completion event.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;

use ruleway::workflow::types::{DataAssociation, RuleTaskDef, Transformation, VarType, VariableDef};
use ruleway::workflow::CONNECTION_DEFAULT_TYPE;
use ruleway::{
    Config, LuaExpressionEvaluator, RuleEngineAdapter, RuleTaskEnvironment, RuleTaskNodeInstance,
    SimpleRuleEngine, StandaloneContainer, TransformerRegistry, VariableScope,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Starting ruleway demo...");

    // Rule engine with one rule in the "scoring" group: add a bonus of 2
    // to every numeric fact
    let engine = Arc::new(SimpleRuleEngine::with_session(1));
    engine.add_rule("scoring", |fact| {
        if let Some(n) = fact.as_i64() {
            *fact = json!(n + 2);
        }
    });

    // Transformer that doubles its single bound value
    let transformers = Arc::new(TransformerRegistry::new());
    transformers.register_fn("demo/double", |_expr, bindings| {
        bindings
            .values()
            .next()
            .and_then(Value::as_i64)
            .map(|n| json!(n * 2))
    });

    let scope = VariableScope::root(vec![
        VariableDef::new("amount", VarType::Integer),
        VariableDef::new("result", VarType::Integer),
    ]);
    scope.set("amount", json!(10));

    let def = RuleTaskDef {
        id: "score-order".to_string(),
        name: "Score order".to_string(),
        rule_flow_group: "scoring".to_string(),
        params: Default::default(),
        in_associations: vec![DataAssociation::transform(
            "amount",
            "score",
            Transformation {
                language: "demo/double".to_string(),
                expression: "amount * 2".to_string(),
            },
        )],
        out_associations: vec![DataAssociation::direct("score", "result")],
    };

    // Immediate mode: the whole cycle runs inside trigger
    let node = RuleTaskNodeInstance::new(
        def.clone(),
        RuleTaskEnvironment {
            adapter: engine.clone(),
            scope: scope.clone(),
            transformers: transformers.clone(),
            evaluator: Arc::new(LuaExpressionEvaluator::new()),
            container: Arc::new(StandaloneContainer),
            config: Config::default(),
            process_instance_id: "demo-1".to_string(),
        },
    );
    let state = node.trigger(CONNECTION_DEFAULT_TYPE).await?;
    tracing::info!(
        "immediate mode: state {:?}, result = {:?}",
        state,
        scope.get("result")
    );

    // Wait-state mode: trigger parks, a later fire_all resumes the node
    scope.set("amount", json!(10));
    let node = RuleTaskNodeInstance::new(
        def,
        RuleTaskEnvironment {
            adapter: engine.clone(),
            scope: scope.clone(),
            transformers,
            evaluator: Arc::new(LuaExpressionEvaluator::new()),
            container: Arc::new(StandaloneContainer),
            config: Config::wait_state(),
            process_instance_id: "demo-2".to_string(),
        },
    );
    let state = node.trigger(CONNECTION_DEFAULT_TYPE).await?;
    tracing::info!("wait-state mode: parked in {:?}", state);

    engine.fire_all().await;
    tracing::info!(
        "wait-state mode: state {:?}, result = {:?}",
        node.state().await,
        scope.get("result")
    );

    Ok(())
}
