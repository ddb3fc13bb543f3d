//! Controller configuration
//!
//! Flags with environment fallbacks, flattened into whatever binary embeds
//! the controller.

use std::time::Duration;

use clap::Args;

/// Default controller name reported on events and field managers
pub const DEFAULT_CONTROLLER_NAME: &str = "awsmachinepool-controller";

/// Runtime configuration for the pool controller
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Only reconcile pools whose watch-filter label has this value
    #[arg(long, env = "WATCH_FILTER")]
    pub watch_filter_value: Option<String>,

    /// Name reported on events and used as the patch field manager
    #[arg(long, env = "CONTROLLER_NAME", default_value = DEFAULT_CONTROLLER_NAME)]
    pub controller_name: String,

    /// Requeue delay after creating an ASG, in seconds
    #[arg(long, env = "ASG_CREATE_REQUEUE_SECS", default_value_t = 15)]
    pub asg_create_requeue_secs: u64,

    /// Requeue delay after a successful pass, in seconds
    #[arg(long, env = "STEADY_STATE_REQUEUE_SECS", default_value_t = 180)]
    pub steady_state_requeue_secs: u64,

    /// Requeue delay while an ASG deletion is in progress, in seconds
    #[arg(long, env = "DELETION_REQUEUE_SECS", default_value_t = 15)]
    pub deletion_requeue_secs: u64,

    /// Backoff after a retryable error, in seconds
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 5)]
    pub error_requeue_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_filter_value: None,
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            asg_create_requeue_secs: 15,
            steady_state_requeue_secs: 180,
            deletion_requeue_secs: 15,
            error_requeue_secs: 5,
        }
    }
}

impl ControllerConfig {
    /// Delay before checking on a freshly created ASG
    pub fn asg_create_requeue(&self) -> Duration {
        Duration::from_secs(self.asg_create_requeue_secs)
    }

    /// Delay between steady-state passes
    pub fn steady_state_requeue(&self) -> Duration {
        Duration::from_secs(self.steady_state_requeue_secs)
    }

    /// Delay between polls of an in-progress ASG deletion
    pub fn deletion_requeue(&self) -> Duration {
        Duration::from_secs(self.deletion_requeue_secs)
    }

    /// Backoff after a retryable error
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}
