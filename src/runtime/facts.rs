/// Fact lifecycle management for one node activation
///
/// Tracks the mapping from synthesized fact keys to the opaque handles the
/// rule engine returned for them. Every inserted handle must be retracted
/// exactly once before the activation is terminal on the completion path;
/// a leaked handle is a working-memory leak shared by every other activation
/// in the session.

use serde_json::Value;
use std::collections::HashMap;

use crate::rules::adapter::{FactHandle, RuleEngineAdapter};

/// Key-to-handle map owned by a single activation
///
/// Keys are synthesized as `{group}_{process_instance_id}_{name}` so the same
/// logical name injected by two process instances never collides in shared
/// working memory. Stripping the two prefixes recovers the logical name for
/// the output phase.
#[derive(Debug)]
pub struct FactMap {
    /// Resolved rule-flow group this activation runs under
    group: String,
    /// Owning process instance
    process_instance_id: String,
    /// Live fact handles keyed by synthesized fact key
    handles: HashMap<String, FactHandle>,
}

impl FactMap {
    pub fn new(group: impl Into<String>, process_instance_id: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            process_instance_id: process_instance_id.into(),
            handles: HashMap::new(),
        }
    }

    /// Synthesize the working-memory key for a logical name
    fn fact_key(&self, name: &str) -> String {
        format!("{}_{}_{}", self.group, self.process_instance_id, name)
    }

    /// Recover the logical name from a synthesized key
    fn logical_name(&self, key: &str) -> String {
        let group_prefix = format!("{}_", self.group);
        let instance_prefix = format!("{}_", self.process_instance_id);
        key.strip_prefix(group_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(instance_prefix.as_str()))
            .unwrap_or(key)
            .to_string()
    }

    /// Insert every resolved input value into working memory
    ///
    /// Insertion order is unspecified; no association may depend on the
    /// insertion order of a sibling.
    pub async fn insert_all(
        &mut self,
        adapter: &dyn RuleEngineAdapter,
        values: HashMap<String, Value>,
    ) {
        for (name, value) in values {
            let key = self.fact_key(&name);
            let handle = adapter.insert(value).await;
            tracing::debug!("inserted fact '{}' as {:?}", key, handle);
            self.handles.insert(key, handle);
        }
    }

    /// Retract every live fact, returning the post-evaluation value snapshot
    ///
    /// Rule evaluation may have mutated matched facts, so each handle's
    /// current value is read back before deletion. Safe to call with an empty
    /// map; the map is empty afterwards, which is what makes a second
    /// completion a no-op.
    pub async fn retract_all(&mut self, adapter: &dyn RuleEngineAdapter) -> HashMap<String, Value> {
        let mut snapshot = HashMap::new();
        let drained: Vec<(String, FactHandle)> = self.handles.drain().collect();
        for (key, handle) in drained {
            let current = adapter.get_value(handle).await;
            adapter.delete(handle).await;
            let name = self.logical_name(&key);
            match current {
                Some(value) => {
                    snapshot.insert(name, value);
                }
                None => {
                    tracing::warn!("fact '{}' vanished from working memory before retraction", key);
                }
            }
        }
        snapshot
    }

    /// Number of live (unretracted) fact handles
    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
