/// Runtime execution layer
///
/// This module provides the execution side of a rule-integrated task:
/// - The node execution state machine (trigger, wait-state, completion,
///   cancellation)
/// - Fact lifecycle management for one activation
/// - Input/output data binding with expression fallback
/// - The pluggable expression evaluator (sandboxed Lua implementation)

// Node execution state machine and environment
pub mod node;

// Fact lifecycle management
pub mod facts;

// Input and output data binders
pub mod bindings;

// Expression evaluation capability
pub mod expr;

// Re-export main types
pub use bindings::BindingContext;
pub use expr::{ExpressionEvaluator, LuaExpressionEvaluator};
pub use facts::FactMap;
pub use node::{
    NodeInstanceContainer, NodeState, RuleTaskEnvironment, RuleTaskNodeInstance,
    StandaloneContainer,
};
