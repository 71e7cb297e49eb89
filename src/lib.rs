/// Ruleway: embeddable rule-task runtime
///
/// This library provides the runtime core of a rule-integrated workflow task:
/// it injects process data into an external rule engine's working memory,
/// triggers evaluation synchronously or as a suspendable wait-state, retracts
/// the injected facts on completion, and binds evaluation results back into
/// process variables through declared data associations.

// Runtime configuration options
pub mod config;

// Error taxonomy shared across the binding pipeline
pub mod error;

// Definition-side model: tasks, associations, variable scopes
pub mod workflow;

// Rule engine boundary and in-memory reference engine
pub mod rules;

// Data transformer registry
pub mod transform;

// Node execution: state machine, fact lifecycle, binders, expressions
pub mod runtime;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use error::RuleTaskError;
pub use rules::{RuleEngineAdapter, SimpleRuleEngine};
pub use runtime::{
    LuaExpressionEvaluator, NodeState, RuleTaskEnvironment, RuleTaskNodeInstance,
    StandaloneContainer,
};
pub use transform::TransformerRegistry;
pub use workflow::{DataAssociation, RuleTaskDef, VariableScope};
