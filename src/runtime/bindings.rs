/// Input and output data binding
///
/// The input binder resolves the value set to inject as facts before rule
/// evaluation; the output binder writes post-evaluation fact values back into
/// process variables, coercing strings into the target's declared type.
/// Resolution is a two-tier strategy: structured transformation when one is
/// declared, otherwise plain scope lookup with expression-language fallback.
/// Everything but type coercion fails soft: log, skip, keep going.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RuleTaskError;
use crate::runtime::expr::ExpressionEvaluator;
use crate::transform::TransformerRegistry;
use crate::workflow::scope::VariableScope;
use crate::workflow::types::{AssociationKind, DataAssociation, RuleTaskDef, VarType};

/// Capabilities the binders resolve against
///
/// Injected by the enclosing engine; the binders own nothing.
pub struct BindingContext<'a> {
    pub scope: &'a Arc<VariableScope>,
    pub transformers: &'a TransformerRegistry,
    pub evaluator: &'a dyn ExpressionEvaluator,
}

/// Resolve a source identifier against the scope chain
///
/// A name some scope resolves is read from that scope and never falls
/// through to expression evaluation, even when its value is still unset;
/// only names no scope knows are treated as expressions.
fn resolve_source(ctx: &BindingContext<'_>, source: &str) -> Option<Value> {
    match ctx.scope.resolve(source) {
        Some(instance) => instance.get(source),
        None => try_eval(ctx.evaluator, source, &ctx.scope.visible_values()),
    }
}

/// Expression evaluation with failures swallowed into None
fn try_eval(
    evaluator: &dyn ExpressionEvaluator,
    expression: &str,
    context: &HashMap<String, Value>,
) -> Option<Value> {
    match evaluator.eval(expression, context) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("expression '{}' did not resolve: {}", expression, e);
            None
        }
    }
}

/// Resolve the input value set for a rule task
///
/// Returns `{target_name: value}` for every association that resolved; the
/// caller inserts each entry as a fact. Associations resolve independently
/// and in no guaranteed order.
pub fn evaluate_parameters(def: &RuleTaskDef, ctx: &BindingContext<'_>) -> HashMap<String, Value> {
    let mut replacements = HashMap::new();

    for association in &def.in_associations {
        match &association.kind {
            AssociationKind::Transform(transformation) => {
                let Some(transformer) = ctx.transformers.find(&transformation.language) else {
                    tracing::debug!(
                        "no transformer registered for '{}', skipping association '{}'",
                        transformation.language,
                        association.target
                    );
                    continue;
                };
                let sources = source_parameters(association, ctx);
                if let Some(value) = transformer.transform(&transformation.expression, &sources) {
                    replacements.insert(association.target.clone(), value);
                }
            }
            AssociationKind::Direct => {
                let Some(source) = association.sources.first() else {
                    tracing::warn!("association '{}' has no sources", association.target);
                    continue;
                };
                if let Some(value) = resolve_source(ctx, source) {
                    replacements.insert(association.target.clone(), value);
                }
            }
            // Structured assignments have no input-side behavior
            AssociationKind::Assignments(_) => {}
        }
    }

    // Every string-valued static parameter goes through template resolution
    // and is injected under its own name
    for (name, value) in &def.params {
        if let Value::String(template) = value {
            let resolved = resolve_template(template, ctx);
            replacements.insert(name.clone(), resolved);
        }
    }

    replacements
}

/// Resolve the declared source bindings of one association
///
/// Each resolved source is keyed under the association target, giving the
/// transformer its declared single-source binding map.
pub fn source_parameters(
    association: &DataAssociation,
    ctx: &BindingContext<'_>,
) -> HashMap<String, Value> {
    let mut parameters = HashMap::new();
    for source in &association.sources {
        if let Some(value) = resolve_source(ctx, source) {
            parameters.insert(association.target.clone(), value);
        }
    }
    parameters
}

/// Resolve `#{name}` placeholders in a parameter template
///
/// Each placeholder resolves through scope lookup with expression fallback.
/// A template that is exactly one placeholder yields the resolved value as-is
/// (types preserved); otherwise the first resolved placeholder is substituted
/// into the string. When nothing resolves the literal template is kept.
pub fn resolve_template(template: &str, ctx: &BindingContext<'_>) -> Value {
    for (placeholder, name) in placeholders(template) {
        let Some(value) = resolve_source(ctx, &name) else {
            continue;
        };

        if template == placeholder {
            return value;
        }
        let rendered = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Value::String(template.replacen(&placeholder, &rendered, 1));
    }
    Value::String(template.to_string())
}

/// Scan a template for `#{name}` patterns, returning (placeholder, name) pairs
fn placeholders(template: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("#{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let name = &after[..end];
        if !name.is_empty() {
            found.push((format!("#{{{name}}}"), name.to_string()));
        }
        rest = &after[end + 1..];
    }
    found
}

/// Bind post-evaluation fact values back into process variables
///
/// `snapshot` is the `{logical_name: value}` map collected during fact
/// retraction. Type coercion is the one surfaced failure: a failing coercion
/// skips that write but never blocks sibling associations; the first failure
/// is returned after all associations have been processed.
pub fn apply_out_associations(
    def: &RuleTaskDef,
    snapshot: &HashMap<String, Value>,
    ctx: &BindingContext<'_>,
) -> Result<(), RuleTaskError> {
    let mut first_error: Option<RuleTaskError> = None;

    for association in &def.out_associations {
        match &association.kind {
            AssociationKind::Transform(transformation) => {
                let Some(transformer) = ctx.transformers.find(&transformation.language) else {
                    tracing::debug!(
                        "no transformer registered for '{}', skipping association '{}'",
                        transformation.language,
                        association.target
                    );
                    continue;
                };
                let Some(value) = transformer.transform(&transformation.expression, snapshot)
                else {
                    continue;
                };
                match ctx.scope.resolve(&association.target) {
                    Some(instance) => instance.set(association.target.clone(), value),
                    None => {
                        tracing::warn!(
                            "could not find variable scope for variable {}",
                            association.target
                        );
                        tracing::warn!("continuing without setting variable");
                    }
                }
            }
            AssociationKind::Direct => {
                let Some(instance) = ctx.scope.resolve(&association.target) else {
                    tracing::warn!(
                        "could not find variable scope for variable {}",
                        association.target
                    );
                    continue;
                };
                let Some(source) = association.sources.first() else {
                    tracing::warn!("association '{}' has no sources", association.target);
                    continue;
                };
                let value = match snapshot.get(source) {
                    Some(value) => Some(value.clone()),
                    None => try_eval(ctx.evaluator, source, snapshot),
                };

                let var_type = instance
                    .find_variable_def(&association.target)
                    .map(|d| d.var_type)
                    .unwrap_or(VarType::Untyped);

                let value = match value {
                    Some(Value::String(text)) if var_type != VarType::Untyped => {
                        match var_type.from_string(&text, &association.target) {
                            Ok(coerced) => coerced,
                            Err(e) => {
                                tracing::warn!("output coercion failed: {}", e);
                                if first_error.is_none() {
                                    first_error = Some(e);
                                }
                                continue;
                            }
                        }
                    }
                    Some(value) => value,
                    // Unresolvable source still writes: the variable is
                    // explicitly nulled rather than left stale
                    None => Value::Null,
                };
                instance.set(association.target.clone(), value);
            }
            // Reserved for association kinds outside this core
            AssociationKind::Assignments(_) => {}
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
