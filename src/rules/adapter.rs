/// Rule engine adapter boundary
///
/// The runtime never talks to a concrete rule engine directly; it goes
/// through this trait. The adapter owns a working-memory-like fact store and
/// supports insert-by-value, delete-by-handle, rule-flow group activation,
/// immediate "fire all", and event subscription keyed by a synthetic
/// completion event name.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque reference to one inserted fact
///
/// Required for later retrieval and deletion; the runtime never inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactHandle(pub u64);

/// Explicit per-activation subscription handle
///
/// Returned by [`RuleEngineAdapter::subscribe`], owned by the activation, and
/// released deterministically on completion or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback target for rule-group completion events
///
/// Delivery may happen on a different task than the one that triggered the
/// node, so implementations must be Send + Sync.
#[async_trait]
pub trait RuleEventListener: Send + Sync {
    async fn on_event(&self, event_name: &str);
}

/// Interface to the external rule engine
#[async_trait]
pub trait RuleEngineAdapter: Send + Sync {
    /// Insert a value into working memory, returning its handle
    async fn insert(&self, value: Value) -> FactHandle;

    /// Delete a fact by handle; unknown handles are a no-op
    async fn delete(&self, handle: FactHandle);

    /// Read the current value behind a handle
    ///
    /// Rule evaluation may have mutated the fact since insertion, so this is
    /// not necessarily what was inserted.
    async fn get_value(&self, handle: FactHandle) -> Option<Value>;

    /// Activate a rule-flow group on behalf of one node activation
    async fn activate_group(&self, group: &str, process_instance_id: &str, activation_id: Uuid);

    /// Deactivate a rule-flow group (best-effort)
    async fn deactivate_group(&self, group: &str);

    /// Force evaluation of all activated rules
    async fn fire_all(&self);

    /// Register a listener for a synthetic event name
    async fn subscribe(
        &self,
        event_name: &str,
        listener: Arc<dyn RuleEventListener>,
    ) -> SubscriptionId;

    /// Release a subscription; unknown ids are a no-op
    async fn unsubscribe(&self, subscription: SubscriptionId);

    /// Engine session identifier, when the engine exposes one
    ///
    /// Feeds into the completion event name so two sessions activating the
    /// same group never cross-signal.
    fn session_id(&self) -> Option<u64>;
}

/// Synthetic completion event name for a rule-flow group
pub fn completion_event_name(group: &str, session_id: Option<u64>) -> String {
    match session_id {
        Some(id) => format!("RuleGroup_{group}_{id}"),
        None => format!("RuleGroup_{group}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_includes_session_when_available() {
        assert_eq!(completion_event_name("approval", Some(7)), "RuleGroup_approval_7");
        assert_eq!(completion_event_name("approval", None), "RuleGroup_approval");
    }
}
