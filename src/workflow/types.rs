/// Core rule-task type definitions
///
/// Defines the definition-side structures for rule-integrated tasks: the task
/// itself, its data associations, and the variable typing used for output
/// coercion. These types are serialized/deserialized from JSON so task
/// definitions can be stored or shipped by an enclosing workflow engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::RuleTaskError;

/// The default (and only accepted) incoming connection type for a rule task
pub const CONNECTION_DEFAULT_TYPE: &str = "DROOLS_DEFAULT";

/// A rule-integrated task definition
///
/// The task delegates part of its execution to an external rule engine: input
/// associations are injected as facts, a named rule-flow group is activated,
/// and output associations bind the post-evaluation fact values back into
/// process variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTaskDef {
    /// Unique task identifier within the workflow (e.g., "approve-loan")
    pub id: String,
    /// Human-readable task name
    pub name: String,
    /// Rule-flow group to activate; may contain #{name} placeholders that are
    /// resolved against the variable scope at trigger time
    pub rule_flow_group: String,
    /// Statically configured parameters as flexible JSON
    /// String values go through #{name} template resolution at trigger time
    #[serde(default)]
    pub params: HashMap<String, Value>,
    /// Input-side data associations (process variables -> facts)
    #[serde(default)]
    pub in_associations: Vec<DataAssociation>,
    /// Output-side data associations (facts -> process variables)
    #[serde(default)]
    pub out_associations: Vec<DataAssociation>,
}

/// One declared binding from source values to a target variable
///
/// How the binding resolves is a closed three-way choice carried by
/// [`AssociationKind`], never a pair of independently optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataAssociation {
    /// Ordered source identifiers: variable names or free-form expressions
    pub sources: Vec<String>,
    /// Single target identifier (fact name on input, variable name on output)
    pub target: String,
    /// Resolution strategy for this association
    #[serde(default)]
    pub kind: AssociationKind,
}

impl DataAssociation {
    /// Plain source-to-target binding (scope lookup, expression fallback)
    pub fn direct(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            sources: vec![source.into()],
            target: target.into(),
            kind: AssociationKind::Direct,
        }
    }

    /// Binding through a registered data transformer
    pub fn transform(
        source: impl Into<String>,
        target: impl Into<String>,
        transformation: Transformation,
    ) -> Self {
        Self {
            sources: vec![source.into()],
            target: target.into(),
            kind: AssociationKind::Transform(transformation),
        }
    }
}

/// Resolution strategy of a data association
///
/// Exactly one of the three applies; the binders match exhaustively so a new
/// kind cannot be silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssociationKind {
    /// Plain lookup: variable scope first, expression evaluation as fallback
    #[default]
    Direct,
    /// Structured transformation through a registered transformer
    Transform(Transformation),
    /// Structured field assignments; reserved for association kinds outside
    /// this core (no input/output behavior here)
    Assignments(Vec<Assignment>),
}

/// A compiled transformation expression in some transformation language
///
/// Resolvable only when a transformer for `language` is registered; otherwise
/// the owning association is skipped without error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    /// Transformation-language identifier (e.g., "http://www.mvel.org/2.0")
    pub language: String,
    /// Compiled expression source handed to the transformer verbatim
    pub expression: String,
}

/// One structured field assignment inside an association
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub from: String,
    pub to: String,
}

/// Declared type of a process variable
///
/// Drives string-to-value coercion during output binding. `Untyped` is the
/// marker that skips coercion entirely; values pass through as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    #[default]
    Untyped,
    Text,
    Integer,
    Float,
    Boolean,
    Json,
}

impl VarType {
    /// Parse a snapshot string into this type's value representation
    ///
    /// The one input-validation failure in the output pipeline that is
    /// surfaced rather than swallowed.
    pub fn from_string(&self, text: &str, target: &str) -> Result<Value, RuleTaskError> {
        let coercion_error = || RuleTaskError::TypeCoercion {
            target: target.to_string(),
            value: text.to_string(),
            var_type: *self,
        };

        match self {
            VarType::Untyped | VarType::Text => Ok(Value::String(text.to_string())),
            VarType::Integer => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| coercion_error()),
            VarType::Float => text
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| coercion_error()),
            VarType::Boolean => match text.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(coercion_error()),
            },
            VarType::Json => serde_json::from_str(text).map_err(|_| coercion_error()),
        }
    }
}

/// Declaration of a process variable within a scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDef {
    /// Variable name as referenced by associations
    pub name: String,
    /// Declared type; `Untyped` skips output coercion
    #[serde(default)]
    pub var_type: VarType,
}

impl VariableDef {
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            name: name.into(),
            var_type,
        }
    }
}
