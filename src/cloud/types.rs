//! Observed and desired cloud resource shapes

use std::collections::BTreeMap;

use crate::crd::{
    AsgStatus, AwsLaunchTemplate, AwsResourceReference, InstanceMetadataOptions,
    MixedInstancesPolicy, SpotMarketOptions, Volume,
};
use crate::provider_id::ProviderId;

/// An autoscaling group as reported by AWS
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AutoScalingGroup {
    /// Group ARN
    pub id: String,
    /// Group name, equal to the pool name
    pub name: String,
    /// Desired capacity
    pub desired_capacity: Option<i32>,
    /// Minimum size
    pub min_size: i32,
    /// Maximum size
    pub max_size: i32,
    /// Subnet IDs the group launches into
    pub subnets: Vec<String>,
    /// Capacity rebalancing enabled
    pub capacity_rebalance: bool,
    /// Mixed instances policy
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    /// Processes currently suspended on the group
    pub currently_suspended_processes: Vec<String>,
    /// Lifecycle status, `None` while the group is in service
    pub status: Option<AsgStatus>,
    /// Members in the order AWS reports them
    pub instances: Vec<Instance>,
}

impl AutoScalingGroup {
    /// ProviderIDs of every member, in member order
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.instances.iter().map(Instance::provider_id).collect()
    }
}

/// EC2 instance state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstanceState {
    /// Launching
    Pending,
    /// Running
    Running,
    /// Terminating
    ShuttingDown,
    /// Terminated
    Terminated,
    /// Stopping
    Stopping,
    /// Stopped
    Stopped,
    /// Not reported
    #[default]
    Unknown,
}

impl InstanceState {
    /// The EC2 API spelling of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An EC2 instance. ASG member listings only fill `id`,
/// `availability_zone` and `state`; `Ec2Service::instance_if_exists` fills
/// the rest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instance {
    /// Instance ID
    pub id: String,
    /// Availability zone
    pub availability_zone: String,
    /// Instance type
    pub instance_type: String,
    /// AMI ID
    pub image_id: String,
    /// SSH key pair name
    pub ssh_key_name: Option<String>,
    /// Public IP, if any
    pub public_ip: Option<String>,
    /// Attached security group IDs
    pub security_group_ids: Vec<String>,
    /// Subnet ID
    pub subnet_id: String,
    /// IAM instance profile
    pub iam_profile: Option<String>,
    /// IMDS options
    pub instance_metadata_options: Option<InstanceMetadataOptions>,
    /// Root volume
    pub root_volume: Option<Volume>,
    /// Additional volumes
    pub non_root_volumes: Vec<Volume>,
    /// Network interface IDs
    pub network_interfaces: Vec<String>,
    /// Spot options
    pub spot_market_options: Option<SpotMarketOptions>,
    /// Placement tenancy
    pub tenancy: Option<String>,
    /// Lifecycle state
    pub state: InstanceState,
}

impl Instance {
    /// ProviderID of this instance
    pub fn provider_id(&self) -> ProviderId {
        ProviderId::new(&self.availability_zone, &self.id)
    }
}

/// A launch template as reported by EC2
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplate {
    /// Template ID
    pub id: String,
    /// Template name
    pub name: String,
    /// Latest version
    pub version: Option<String>,
}

/// Desired autoscaling group configuration, derived from the pool
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AsgSpec {
    /// Group name
    pub name: String,
    /// Desired capacity; `None` leaves the current capacity alone
    pub desired_capacity: Option<i32>,
    /// Minimum size
    pub min_size: i32,
    /// Maximum size
    pub max_size: i32,
    /// Subnets to launch into
    pub subnets: Vec<AwsResourceReference>,
    /// Availability zones to launch into when no subnets are given
    pub availability_zones: Vec<String>,
    /// Mixed instances policy
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    /// Capacity rebalancing
    pub capacity_rebalance: bool,
    /// Launch template ID from the pool status
    pub launch_template_id: Option<String>,
    /// Launch template version from the pool status
    pub launch_template_version: Option<String>,
    /// Cluster and pool tags merged
    pub tags: BTreeMap<String, String>,
    /// Processes to keep suspended
    pub suspended_processes: Vec<String>,
}

/// Input for launch template reconciliation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LaunchTemplateRequest {
    /// Template name
    pub name: String,
    /// Desired template content
    pub template: AwsLaunchTemplate,
    /// Cluster and pool tags merged
    pub tags: BTreeMap<String, String>,
    /// Secret holding the bootstrap user data
    pub bootstrap_data_secret: Option<String>,
    /// Template ID recorded in the pool status
    pub current_id: Option<String>,
    /// Template version recorded in the pool status
    pub current_version: Option<String>,
}

/// Result of launch template reconciliation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplateOutcome {
    /// Template ID
    pub id: String,
    /// Latest template version
    pub version: Option<String>,
}

/// A cloud resource whose tags are reconciled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagTarget {
    /// Launch template by ID
    LaunchTemplate(String),
    /// Autoscaling group by name
    AutoScalingGroup(String),
}
