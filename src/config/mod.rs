/// Configuration management for the rule-task runtime
///
/// Handles the runtime options the surrounding execution environment can set.

use serde::{Deserialize, Serialize};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Rule task execution options
    pub rule_task: RuleTaskConfig,
}

/// Rule task execution options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTaskConfig {
    /// When true, a triggered rule task parks as a wait-state and resumes on
    /// the rule group's completion event instead of firing synchronously
    pub act_as_wait_state: bool,
}

impl Config {
    /// Configuration with wait-state behavior enabled
    pub fn wait_state() -> Self {
        Self {
            rule_task: RuleTaskConfig {
                act_as_wait_state: true,
            },
        }
    }
}

impl Default for RuleTaskConfig {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            act_as_wait_state: std::env::var("RULEWAY_RULE_TASK_WAITSTATE")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}
