/// Rule engine integration layer
///
/// This module defines the boundary to the external rule engine:
/// - The adapter trait (working memory, groups, events)
/// - An in-memory reference engine for the demo binary and tests

// Adapter trait, fact handles, subscriptions, event naming
pub mod adapter;

// In-memory reference engine
pub mod memory;

// Re-export the boundary types
pub use adapter::{
    completion_event_name, FactHandle, RuleEngineAdapter, RuleEventListener, SubscriptionId,
};
pub use memory::SimpleRuleEngine;
