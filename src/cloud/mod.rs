//! Cloud service seams
//!
//! The controller never talks to AWS directly. Everything it needs from the
//! autoscaling, EC2 and tagging APIs goes through the traits below, and a
//! [`CloudServices`] factory hands out implementations bound to the
//! infrastructure cluster (region, credentials) of the pool being reconciled.
//!
//! "Not found" is part of the return type (`Option`) rather than an error.

mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::crd::{AwsResourceReference, RefreshPreferences};
use crate::scope::InfraClusterScope;
use crate::Error;

pub use types::{
    AsgSpec, AutoScalingGroup, Instance, InstanceState, LaunchTemplate, LaunchTemplateOutcome,
    LaunchTemplateRequest, TagTarget,
};

/// Autoscaling group operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AsgService: Send + Sync {
    /// Look up a group by name
    async fn get_asg_by_name(&self, name: &str) -> Result<Option<AutoScalingGroup>, Error>;

    /// Create a group
    async fn create_asg(&self, spec: &AsgSpec) -> Result<AutoScalingGroup, Error>;

    /// Update sizes, subnets, policy and launch template of a group
    async fn update_asg(&self, spec: &AsgSpec) -> Result<(), Error>;

    /// Delete a group and block until AWS reports it gone
    async fn delete_asg_and_wait(&self, name: &str) -> Result<(), Error>;

    /// Suspend the named processes
    async fn suspend_processes(&self, name: &str, processes: &[String]) -> Result<(), Error>;

    /// Resume the named processes
    async fn resume_processes(&self, name: &str, processes: &[String]) -> Result<(), Error>;

    /// False while an instance refresh is already in progress
    async fn can_start_instance_refresh(&self, name: &str) -> Result<bool, Error>;

    /// Start a rolling instance refresh
    async fn start_instance_refresh(
        &self,
        name: &str,
        preferences: &RefreshPreferences,
    ) -> Result<(), Error>;

    /// Resolve subnet references (or availability zones) to subnet IDs
    async fn subnet_ids(
        &self,
        subnets: &[AwsResourceReference],
        availability_zones: &[String],
    ) -> Result<Vec<String>, Error>;
}

/// EC2 instance and launch template operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ec2Service: Send + Sync {
    /// Describe an instance; `None` when it no longer exists
    async fn instance_if_exists(&self, instance_id: &str) -> Result<Option<Instance>, Error>;

    /// Look up a launch template by name
    async fn get_launch_template(&self, name: &str) -> Result<Option<LaunchTemplate>, Error>;

    /// Delete a launch template by ID
    async fn delete_launch_template(&self, id: &str) -> Result<(), Error>;
}

/// Decides whether a launch template may change and what happens afterwards
///
/// Passed into [`PoolReconcileService::reconcile_launch_template`]. The
/// service only calls `after_update` when the new version differs from the
/// old one in more than user data.
#[async_trait]
pub trait LaunchTemplateUpdatePolicy: Send + Sync {
    /// Whether a new template version may be created now
    async fn can_update(&self) -> Result<bool, Error>;

    /// Runs after a new template version was created
    async fn after_update(&self) -> Result<(), Error>;
}

/// Launch template content and tag reconciliation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PoolReconcileService: Send + Sync {
    /// Create or version the launch template to match the request
    async fn reconcile_launch_template(
        &self,
        request: &LaunchTemplateRequest,
        policy: &(dyn LaunchTemplateUpdatePolicy + 'static),
    ) -> Result<LaunchTemplateOutcome, Error>;

    /// Make the tags on each target match `tags`
    async fn reconcile_tags(
        &self,
        targets: &[TagTarget],
        tags: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// Services bound to one infrastructure cluster
#[derive(Clone)]
pub struct Services {
    /// Autoscaling
    pub asg: Arc<dyn AsgService>,
    /// EC2
    pub ec2: Arc<dyn Ec2Service>,
    /// Launch template and tag reconciliation
    pub reconcile: Arc<dyn PoolReconcileService>,
}

/// Hands out cloud services for an infrastructure cluster
pub trait CloudServices: Send + Sync {
    /// Services scoped to the cluster's region and identity
    fn services(&self, infra: &InfraClusterScope) -> Services;
}
