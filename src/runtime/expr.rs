/// Expression evaluation capability
///
/// Free-form association sources and #{name} placeholders that miss the
/// variable scope fall through to an expression evaluator. The evaluator is
/// an injected capability; the shipped implementation embeds sandboxed Lua.
/// Evaluation failures are never fatal to the binding pipeline - callers
/// catch them and skip the binding.

use mlua::LuaSerdeExt;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::RuleTaskError;

/// Evaluates a string expression against a binding context
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` with `context` bindings in scope
    ///
    /// Fails with [`RuleTaskError::Evaluation`] on malformed expressions or
    /// when the expression resolves to no value.
    fn eval(
        &self,
        expression: &str,
        context: &HashMap<String, Value>,
    ) -> Result<Value, RuleTaskError>;
}

/// Sandboxed Lua expression evaluator
///
/// Each evaluation runs in a fresh Lua instance with dangerous globals
/// removed and the binding context injected as globals. Fresh instances keep
/// evaluations isolated from each other and make the evaluator Send + Sync
/// for free.
#[derive(Debug, Default)]
pub struct LuaExpressionEvaluator;

/// Patterns that must never appear in an evaluated expression
const DENIED_PATTERNS: &[&str] = &[
    "os.", "io.", "debug.", "package.", "require", "load", "dofile", "loadfile", "loadstring",
    "rawget", "rawset", "getmetatable", "setmetatable", "_G", "_ENV", "coroutine",
    "collectgarbage",
];

impl LuaExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for LuaExpressionEvaluator {
    fn eval(
        &self,
        expression: &str,
        context: &HashMap<String, Value>,
    ) -> Result<Value, RuleTaskError> {
        for pattern in DENIED_PATTERNS {
            if expression.contains(pattern) {
                tracing::warn!("blocked unsafe expression: {}", expression);
                return Err(RuleTaskError::Evaluation(format!(
                    "expression contains blocked pattern '{pattern}'"
                )));
            }
        }

        let lua = mlua::Lua::new();
        let globals = lua.globals();

        // Strip the sandbox escape hatches before any user code runs
        let _ = globals.set("os", mlua::Nil);
        let _ = globals.set("io", mlua::Nil);
        let _ = globals.set("debug", mlua::Nil);
        let _ = globals.set("package", mlua::Nil);

        for (name, value) in context {
            let lua_value = lua
                .to_value(value)
                .map_err(|e| RuleTaskError::Evaluation(format!("binding '{name}': {e}")))?;
            globals
                .set(name.as_str(), lua_value)
                .map_err(|e| RuleTaskError::Evaluation(format!("binding '{name}': {e}")))?;
        }

        let result: mlua::Value = lua
            .load(expression)
            .eval()
            .map_err(|e| RuleTaskError::Evaluation(e.to_string()))?;

        if result.is_nil() {
            // Unresolved identifiers evaluate to nil in Lua; treat that the
            // same as a failed lookup so callers can fall back or skip.
            return Err(RuleTaskError::Evaluation(format!(
                "expression '{expression}' resolved to no value"
            )));
        }

        lua.from_value(result)
            .map_err(|e| RuleTaskError::Evaluation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn evaluates_arithmetic_over_bindings() {
        let evaluator = LuaExpressionEvaluator::new();
        let result = evaluator
            .eval("score * 2", &context(&[("score", json!(21))]))
            .unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn nested_fields_are_reachable() {
        let evaluator = LuaExpressionEvaluator::new();
        let result = evaluator
            .eval(
                "order.total",
                &context(&[("order", json!({ "total": 99.5 }))]),
            )
            .unwrap();
        assert_eq!(result, json!(99.5));
    }

    #[test]
    fn unresolved_identifiers_fail_softly() {
        let evaluator = LuaExpressionEvaluator::new();
        let err = evaluator.eval("missing_var", &HashMap::new()).unwrap_err();
        assert!(matches!(err, RuleTaskError::Evaluation(_)));
    }

    #[test]
    fn dangerous_expressions_are_blocked() {
        let evaluator = LuaExpressionEvaluator::new();
        let err = evaluator
            .eval("os.execute('rm -rf /')", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, RuleTaskError::Evaluation(_)));
    }
}
