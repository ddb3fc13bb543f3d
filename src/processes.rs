//! Suspended-process reconciliation
//!
//! An ASG reports the processes it currently has suspended; the pool spec
//! declares the ones it wants suspended. The difference becomes at most one
//! suspend call and at most one resume call.

use std::collections::BTreeSet;

use tracing::info;

use crate::cloud::AsgService;
use crate::Error;

/// Processes to suspend and resume, each sorted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessDiff {
    /// Desired but not currently suspended
    pub to_suspend: Vec<String>,
    /// Currently suspended but no longer desired
    pub to_resume: Vec<String>,
}

impl ProcessDiff {
    /// Nothing to do
    pub fn is_empty(&self) -> bool {
        self.to_suspend.is_empty() && self.to_resume.is_empty()
    }
}

/// Compute `desired − current` and `current − desired`
///
/// Duplicates on either side are ignored.
pub fn diff_processes(current: &[String], desired: &[String]) -> ProcessDiff {
    let current: BTreeSet<&String> = current.iter().collect();
    let desired: BTreeSet<&String> = desired.iter().collect();

    ProcessDiff {
        to_suspend: desired.difference(&current).map(|p| p.to_string()).collect(),
        to_resume: current.difference(&desired).map(|p| p.to_string()).collect(),
    }
}

/// Bring the suspended processes of `asg_name` from `current` to `desired`
pub async fn reconcile_processes(
    asg: &dyn AsgService,
    asg_name: &str,
    current: &[String],
    desired: &[String],
) -> Result<(), Error> {
    let diff = diff_processes(current, desired);
    if diff.is_empty() {
        return Ok(());
    }

    if !diff.to_suspend.is_empty() {
        info!(asg = %asg_name, processes = ?diff.to_suspend, "suspending processes");
        asg.suspend_processes(asg_name, &diff.to_suspend).await?;
    }
    if !diff.to_resume.is_empty() {
        info!(asg = %asg_name, processes = ?diff.to_resume, "resuming processes");
        asg.resume_processes(asg_name, &diff.to_resume).await?;
    }
    Ok(())
}
