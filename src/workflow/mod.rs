/// Workflow-facing definition layer
///
/// This module holds the definition-side model of a rule-integrated task and
/// the variable scope boundary shared with the enclosing process instance:
/// - Type definitions (RuleTaskDef, DataAssociation, VarType)
/// - Hierarchical variable scopes

// Core rule-task type definitions
pub mod types;

// Hierarchical process variable scopes
pub mod scope;

// Re-export commonly used types
pub use scope::VariableScope;
pub use types::{
    AssociationKind, DataAssociation, RuleTaskDef, Transformation, VarType, VariableDef,
    CONNECTION_DEFAULT_TYPE,
};
