/// Rule-task node execution state machine
///
/// Runtime counterpart of one rule task. A trigger injects the resolved input
/// values as facts, activates the rule-flow group, and either fires the rules
/// synchronously (completing before `trigger` returns) or parks the node as a
/// wait-state until the engine delivers the group's completion event. Every
/// exit path on the completion side retracts the activation's facts; a leaked
/// handle is a working-memory leak for the whole session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::error::RuleTaskError;
use crate::rules::adapter::{
    completion_event_name, RuleEngineAdapter, RuleEventListener, SubscriptionId,
};
use crate::runtime::bindings::{
    apply_out_associations, evaluate_parameters, resolve_template, BindingContext,
};
use crate::runtime::expr::ExpressionEvaluator;
use crate::runtime::facts::FactMap;
use crate::transform::TransformerRegistry;
use crate::workflow::scope::VariableScope;
use crate::workflow::types::{RuleTaskDef, CONNECTION_DEFAULT_TYPE};

/// Lifecycle states of one rule-task node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Triggered,
    /// Immediate path: rules firing synchronously inside `trigger`
    Evaluating,
    /// Wait-state path: parked until the completion event arrives
    Waiting,
    Completing,
    Completed,
    Cancelled,
}

/// Boundary to the container that owns this node instance
///
/// The generic trigger hook runs for every node kind before node-specific
/// trigger logic and may cancel the instance as a side effect, which is why
/// `trigger` re-checks liveness afterwards.
#[async_trait]
pub trait NodeInstanceContainer: Send + Sync {
    /// Generic pre-trigger hook (timers, listeners, audit)
    async fn on_trigger(&self, node_instance_id: Uuid);

    /// Whether the node instance still exists in this container
    fn contains(&self, node_instance_id: Uuid) -> bool;

    /// Terminal completion signal from the node to the containing process
    async fn node_completed(&self, node_instance_id: Uuid);
}

/// Container for running a node outside a full workflow engine
///
/// Used by the demo binary and tests: the hook is a no-op and every instance
/// is considered live.
#[derive(Debug, Default)]
pub struct StandaloneContainer;

#[async_trait]
impl NodeInstanceContainer for StandaloneContainer {
    async fn on_trigger(&self, _node_instance_id: Uuid) {}

    fn contains(&self, _node_instance_id: Uuid) -> bool {
        true
    }

    async fn node_completed(&self, node_instance_id: Uuid) {
        tracing::info!("node instance {} completed", node_instance_id);
    }
}

/// Capabilities and identity provided by the enclosing engine instance
///
/// All registries are injected here rather than reached through globals; the
/// engine owns their lifetime.
pub struct RuleTaskEnvironment {
    pub adapter: Arc<dyn RuleEngineAdapter>,
    pub scope: Arc<VariableScope>,
    pub transformers: Arc<TransformerRegistry>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub container: Arc<dyn NodeInstanceContainer>,
    pub config: Config,
    pub process_instance_id: String,
}

/// Per-trigger state, created at trigger time and destroyed on completion
///
/// The only mutable state owned exclusively by one activation. Must be fully
/// cleared (handles retracted, subscription released) before the activation
/// is terminal on the completion path.
struct ActivationContext {
    /// Effective rule-flow group after template resolution
    group: String,
    /// Live fact handles for this activation
    facts: FactMap,
    /// Subscription to the group's completion event, wait-state path only
    subscription: Option<SubscriptionId>,
    started_at: DateTime<Utc>,
}

struct Inner {
    state: NodeState,
    activation: Option<ActivationContext>,
}

/// One rule-task node instance
///
/// Shared between the triggering call and the engine's event callback, so all
/// mutable state sits behind one async lock. The instance subscribes itself
/// as the event listener for its activation. No adapter call is ever made
/// while the lock is held: the adapter may deliver the completion event on
/// the same call chain (inside `activate_group`), and that delivery takes
/// the same lock.
pub struct RuleTaskNodeInstance {
    id: Uuid,
    def: RuleTaskDef,
    env: RuleTaskEnvironment,
    inner: Mutex<Inner>,
    /// Self-reference handed to the adapter as the event listener
    me: Weak<RuleTaskNodeInstance>,
}

impl RuleTaskNodeInstance {
    pub fn new(def: RuleTaskDef, env: RuleTaskEnvironment) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: Uuid::new_v4(),
            def,
            env,
            inner: Mutex::new(Inner {
                state: NodeState::Created,
                activation: None,
            }),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn state(&self) -> NodeState {
        self.inner.lock().await.state
    }

    /// Number of unretracted fact handles held by the current activation
    pub async fn live_fact_handles(&self) -> usize {
        self.inner
            .lock()
            .await
            .activation
            .as_ref()
            .map(|a| a.facts.live_handles())
            .unwrap_or(0)
    }

    fn binding_context(&self) -> BindingContext<'_> {
        BindingContext {
            scope: &self.env.scope,
            transformers: &self.env.transformers,
            evaluator: self.env.evaluator.as_ref(),
        }
    }

    /// Resolve the effective rule-flow group for this activation
    ///
    /// The statically configured group goes through parameter-template
    /// resolution so group names can be computed at runtime; a blank result
    /// falls back to the static name.
    fn resolve_rule_flow_group(&self) -> String {
        let resolved = resolve_template(&self.def.rule_flow_group, &self.binding_context());
        let group = match resolved {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        if group.trim().is_empty() {
            self.def.rule_flow_group.clone()
        } else {
            group
        }
    }

    /// Trigger this node instance over an incoming connection
    ///
    /// Wait-state off: the full evaluate-bind-retract cycle runs before this
    /// returns and the caller observes `Completed` - indistinguishable from a
    /// non-suspending node. Wait-state on: returns the current state after
    /// group activation - normally `Waiting`, but already `Completed` when
    /// the engine delivered the completion event during activation itself.
    pub async fn trigger(&self, incoming_type: &str) -> Result<NodeState, RuleTaskError> {
        self.env.container.on_trigger(self.id).await;
        // the hook may have cancelled this instance; do not operate on a
        // torn-down activation
        if !self.env.container.contains(self.id) {
            tracing::debug!("node instance {} gone after trigger hook, aborting", self.id);
            return Ok(self.state().await);
        }

        if incoming_type != CONNECTION_DEFAULT_TYPE {
            return Err(RuleTaskError::InvalidConnection {
                connection_type: incoming_type.to_string(),
            });
        }

        self.inner.lock().await.state = NodeState::Triggered;

        let group = self.resolve_rule_flow_group();
        tracing::info!(
            "triggering rule task '{}' on group '{}' (activation: {})",
            self.def.name,
            group,
            self.id
        );

        let inputs = evaluate_parameters(&self.def, &self.binding_context());
        let mut facts = FactMap::new(group.clone(), self.env.process_instance_id.clone());
        facts
            .insert_all(self.env.adapter.as_ref(), inputs)
            .await;

        let wait = self.env.config.rule_task.act_as_wait_state;
        {
            let mut inner = self.inner.lock().await;
            inner.activation = Some(ActivationContext {
                group: group.clone(),
                facts,
                subscription: None,
                started_at: Utc::now(),
            });
            inner.state = if wait {
                NodeState::Waiting
            } else {
                NodeState::Evaluating
            };
        }

        if wait {
            // subscribe before activating: the group may fire and deliver
            // its event before activate_group returns
            let event = completion_event_name(&group, self.env.adapter.session_id());
            if let Some(listener) = self.me.upgrade() {
                let subscription = self
                    .env
                    .adapter
                    .subscribe(&event, listener as Arc<dyn RuleEventListener>)
                    .await;
                let stored = {
                    let mut inner = self.inner.lock().await;
                    match inner.activation.as_mut() {
                        Some(activation) => {
                            activation.subscription = Some(subscription);
                            true
                        }
                        None => false,
                    }
                };
                if !stored {
                    // the activation completed or was cancelled while the
                    // subscription was being registered
                    self.env.adapter.unsubscribe(subscription).await;
                }
            }
            self.env
                .adapter
                .activate_group(&group, &self.env.process_instance_id, self.id)
                .await;
            tracing::debug!("rule task '{}' waiting on event '{}'", self.def.name, event);
            Ok(self.state().await)
        } else {
            self.env
                .adapter
                .activate_group(&group, &self.env.process_instance_id, self.id)
                .await;
            self.env.adapter.fire_all().await;
            self.complete().await?;
            Ok(self.state().await)
        }
    }

    /// Complete the current activation: unsubscribe, retract, bind outputs
    ///
    /// Idempotent; a second call finds the activation already claimed and
    /// returns without touching the adapter.
    pub async fn complete(&self) -> Result<(), RuleTaskError> {
        match self.begin_completion().await {
            Some(activation) => self.finish(activation).await,
            None => Ok(()),
        }
    }

    /// Claim the current activation for completion
    ///
    /// Exactly one caller wins the claim; everyone else (a second `complete`,
    /// a racing event delivery) gets None and backs off.
    async fn begin_completion(&self) -> Option<ActivationContext> {
        let mut inner = self.inner.lock().await;
        if matches!(
            inner.state,
            NodeState::Completing | NodeState::Completed | NodeState::Cancelled
        ) {
            tracing::debug!(
                "rule task '{}' already terminal, completion is a no-op",
                self.def.name
            );
            return None;
        }
        match inner.activation.take() {
            Some(activation) => {
                inner.state = NodeState::Completing;
                Some(activation)
            }
            None => {
                inner.state = NodeState::Completed;
                None
            }
        }
    }

    /// Run the completion side of a claimed activation
    ///
    /// The lock is not held across any of this: the adapter calls here never
    /// feed back into the state machine because the activation was already
    /// taken out of it.
    async fn finish(&self, mut activation: ActivationContext) -> Result<(), RuleTaskError> {
        if let Some(subscription) = activation.subscription.take() {
            self.env.adapter.unsubscribe(subscription).await;
        }

        let snapshot = activation
            .facts
            .retract_all(self.env.adapter.as_ref())
            .await;
        tracing::debug!(
            "rule task '{}' retracted {} facts after {}ms",
            self.def.name,
            snapshot.len(),
            (Utc::now() - activation.started_at).num_milliseconds()
        );

        // cleanup is done even when binding surfaces a coercion error; only
        // the error itself propagates
        let binding_result = apply_out_associations(&self.def, &snapshot, &self.binding_context());

        {
            let mut inner = self.inner.lock().await;
            // a cancellation that raced in stays terminal
            if inner.state == NodeState::Completing {
                inner.state = NodeState::Completed;
            }
        }
        self.env.container.node_completed(self.id).await;
        tracing::info!("rule task '{}' completed", self.def.name);

        binding_result
    }

    /// Cancel the current activation
    ///
    /// Releases the completion-event subscription, deactivates the rule-flow
    /// group best-effort, and transitions to `Cancelled`. Output binding does
    /// not run and facts are intentionally not retracted; cleaning up a
    /// cancelled instance's working memory is the session owner's concern
    /// (see the cancellation note in DESIGN.md).
    pub async fn cancel(&self) {
        let activation = {
            let mut inner = self.inner.lock().await;
            inner.state = NodeState::Cancelled;
            inner.activation.take()
        };
        if let Some(mut activation) = activation {
            if let Some(subscription) = activation.subscription.take() {
                self.env.adapter.unsubscribe(subscription).await;
            }
            self.env.adapter.deactivate_group(&activation.group).await;
        }
        tracing::info!("rule task '{}' cancelled", self.def.name);
    }
}

#[async_trait]
impl RuleEventListener for RuleTaskNodeInstance {
    /// Completion event delivery from the rule engine
    ///
    /// No-op unless this activation is still waiting and the event name
    /// matches its synthesized completion event - a cancellation that raced
    /// ahead of a pending event must not re-trigger completion. Delivery may
    /// happen on the triggering call chain itself, so the activation is
    /// claimed under the lock and completed outside it.
    async fn on_event(&self, event_name: &str) {
        let activation = {
            let mut inner = self.inner.lock().await;
            if inner.state != NodeState::Waiting {
                tracing::debug!(
                    "ignoring event '{}' for non-waiting rule task '{}'",
                    event_name,
                    self.def.name
                );
                return;
            }
            let matches_activation = inner
                .activation
                .as_ref()
                .map(|a| {
                    completion_event_name(&a.group, self.env.adapter.session_id()) == event_name
                })
                .unwrap_or(false);
            if !matches_activation {
                return;
            }
            inner.state = NodeState::Completing;
            inner.activation.take()
        };

        let Some(activation) = activation else { return };
        if let Err(e) = self.finish(activation).await {
            tracing::warn!(
                "output binding failed for rule task '{}': {}",
                self.def.name,
                e
            );
        }
    }
}
