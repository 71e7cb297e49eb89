/// Hierarchical process variable scopes
///
/// A variable scope is a name-to-value store provided by the enclosing
/// process instance. Lookup walks from the nearest scope outward; a name
/// resolves to the first scope that declares it. Missing names are not an
/// error here - the binders decide whether to fall back or skip.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::workflow::types::VariableDef;

/// One level in the scope hierarchy
///
/// Scopes are shared between the triggering call and the completion callback,
/// so the value map sits behind a lock. Declarations are fixed at
/// construction; only values mutate at runtime.
#[derive(Debug)]
pub struct VariableScope {
    /// Enclosing scope, if any (None for the process root)
    parent: Option<Arc<VariableScope>>,
    /// Declared variables keyed by name
    declarations: HashMap<String, VariableDef>,
    /// Current variable values
    values: RwLock<HashMap<String, Value>>,
}

impl VariableScope {
    /// Create a root scope with the given variable declarations
    pub fn root(declarations: Vec<VariableDef>) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            declarations: declarations
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            values: RwLock::new(HashMap::new()),
        })
    }

    /// Create a nested scope under `parent`
    pub fn child(parent: Arc<VariableScope>, declarations: Vec<VariableDef>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent),
            declarations: declarations
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            values: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve the nearest enclosing scope that declares `name`
    ///
    /// Returns None when no scope in the chain declares the variable; callers
    /// treat that as a skippable condition, never a crash.
    pub fn resolve(self: &Arc<Self>, name: &str) -> Option<Arc<VariableScope>> {
        if self.declarations.contains_key(name) || self.values.read().contains_key(name) {
            return Some(Arc::clone(self));
        }
        match &self.parent {
            Some(parent) => parent.resolve(name),
            None => None,
        }
    }

    /// Read a variable value from this scope only
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.read().get(name).cloned()
    }

    /// Write a variable value into this scope
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.values.write().insert(name.into(), value);
    }

    /// Look up the declaration for `name` in this scope only
    pub fn find_variable_def(&self, name: &str) -> Option<VariableDef> {
        self.declarations.get(name).cloned()
    }

    /// Flatten every variable visible from this scope, nearest scope winning
    ///
    /// Used as the resolver context for expression evaluation.
    pub fn visible_values(&self) -> HashMap<String, Value> {
        let mut values = match &self.parent {
            Some(parent) => parent.visible_values(),
            None => HashMap::new(),
        };
        for (name, value) in self.values.read().iter() {
            values.insert(name.clone(), value.clone());
        }
        values
    }
}
