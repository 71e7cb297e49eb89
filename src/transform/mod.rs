/// Data transformer registry
///
/// Transformers decouple binding resolution from any one expression language:
/// an association may declare a transformation in some language, and the
/// binder looks the language up here. The registry uses ArcSwap so new
/// languages can be registered at runtime without blocking concurrent
/// activations reading it.

use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A pluggable transformation-language backend
///
/// Invoked with a compiled expression and a binding map; returns None when
/// the expression produces no value (the binding is then skipped).
pub trait DataTransformer: Send + Sync {
    fn transform(&self, expression: &str, bindings: &HashMap<String, Value>) -> Option<Value>;
}

/// Closure-backed transformer for simple languages and tests
pub struct FnTransformer<F>(pub F);

impl<F> DataTransformer for FnTransformer<F>
where
    F: Fn(&str, &HashMap<String, Value>) -> Option<Value> + Send + Sync,
{
    fn transform(&self, expression: &str, bindings: &HashMap<String, Value>) -> Option<Value> {
        (self.0)(expression, bindings)
    }
}

/// Lock-free transformer lookup table
///
/// Keyed by transformation-language identifier. Lookups during binding are
/// lock-free reads; registration swaps the whole map pointer atomically.
#[derive(Default)]
pub struct TransformerRegistry {
    /// Thread-safe atomic pointer to the language map
    /// Key: language identifier, Value: transformer implementation
    transformers: ArcSwap<HashMap<String, Arc<dyn DataTransformer>>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the transformer for a language identifier
    pub fn register(&self, language: impl Into<String>, transformer: Arc<dyn DataTransformer>) {
        let language = language.into();
        let current = self.transformers.load();
        let mut updated = (**current).clone();
        updated.insert(language.clone(), transformer);
        self.transformers.store(Arc::new(updated));
        tracing::info!("registered data transformer for language '{}'", language);
    }

    /// Convenience registration from a closure
    pub fn register_fn<F>(&self, language: impl Into<String>, f: F)
    where
        F: Fn(&str, &HashMap<String, Value>) -> Option<Value> + Send + Sync + 'static,
    {
        self.register(language, Arc::new(FnTransformer(f)));
    }

    /// Look up a transformer by language identifier (lock-free read)
    pub fn find(&self, language: &str) -> Option<Arc<dyn DataTransformer>> {
        self.transformers.load().get(language).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_languages_are_found_and_unknown_ones_are_not() {
        let registry = TransformerRegistry::new();
        registry.register_fn("identity", |_expr, bindings| {
            bindings.values().next().cloned()
        });

        let transformer = registry.find("identity").expect("registered");
        let mut bindings = HashMap::new();
        bindings.insert("a".to_string(), json!(5));
        assert_eq!(transformer.transform("", &bindings), Some(json!(5)));

        assert!(registry.find("unknown-language").is_none());
    }
}
