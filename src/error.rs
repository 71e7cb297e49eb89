/// Error taxonomy for the rule-task runtime
///
/// Three failure classes cross the binding pipeline:
/// - InvalidConnection: fatal to the trigger call (wrong incoming connection type)
/// - TypeCoercion: surfaced per association during output binding, never
///   blocks sibling associations
/// - Evaluation: always caught by the binders and logged, binding omitted

use thiserror::Error;

use crate::workflow::types::VarType;

/// Failures that can escape the rule-task runtime to its caller
#[derive(Debug, Error)]
pub enum RuleTaskError {
    /// A rule task only accepts the default incoming connection type
    #[error("rule task only accepts default incoming connections, got '{connection_type}'")]
    InvalidConnection { connection_type: String },

    /// A snapshot string could not be parsed into the target variable's declared type
    #[error("cannot coerce '{value}' into {var_type:?} for variable '{target}'")]
    TypeCoercion {
        target: String,
        value: String,
        var_type: VarType,
    },

    /// Expression evaluation failed (malformed expression or unresolved identifier)
    ///
    /// Binders catch this internally and fall back or skip; it only escapes
    /// when an evaluator is invoked directly.
    #[error("expression evaluation failed: {0}")]
    Evaluation(String),
}

pub type Result<T> = std::result::Result<T, RuleTaskError>;
