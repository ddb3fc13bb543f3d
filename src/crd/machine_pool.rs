//! AWSMachinePool CRD
//!
//! An AWSMachinePool is the infrastructure half of a Cluster API
//! MachinePool: it describes the autoscaling group and launch template that
//! back the pool. Replica count lives on the owning MachinePool.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::Condition;
use super::types::{
    AmiReference, AwsResourceReference, InstanceMetadataOptions, SpotMarketOptions, Volume,
};

/// Finalizer that keeps the pool around until the ASG and launch template are gone
pub const MACHINE_POOL_FINALIZER: &str = "awsmachinepool.infrastructure.cluster.x-k8s.io";

/// Kind of the per-instance child resources this pool manages
pub const INFRASTRUCTURE_MACHINE_KIND: &str = "AWSMachine";

/// Condition: the autoscaling group exists and matches the spec
pub const ASG_READY_CONDITION: &str = "ASGReady";
/// Condition: the launch template exists and is current
pub const LAUNCH_TEMPLATE_READY_CONDITION: &str = "LaunchTemplateReady";

/// Condition reasons set by the controller
pub mod reasons {
    /// The owning cluster's infrastructure is not ready yet
    pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str = "WaitingForClusterInfrastructure";
    /// The MachinePool has no bootstrap data secret yet
    pub const WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";
    /// The ASG lookup failed
    pub const ASG_NOT_FOUND: &str = "ASGNotFound";
    /// Creating the ASG failed
    pub const ASG_PROVISION_FAILED: &str = "ASGProvisionFailed";
    /// Updating the ASG failed
    pub const ASG_UPDATE_FAILED: &str = "ASGUpdateFailed";
    /// The ASG is being deleted
    pub const ASG_DELETION_IN_PROGRESS: &str = "ASGDeletionInProgress";
    /// Reconciling the launch template failed
    pub const LAUNCH_TEMPLATE_RECONCILE_FAILED: &str = "LaunchTemplateReconcileFailed";
    /// Creating a child AWSMachine failed
    pub const AWS_MACHINE_CREATION_FAILED: &str = "AWSMachineCreationFailed";
    /// Deleting an orphaned AWSMachine failed
    pub const AWS_MACHINE_DELETION_FAILED: &str = "AWSMachineDeletionFailed";
    /// Reconciling resource tags failed
    pub const TAGS_RECONCILE_FAILED: &str = "TagsReconcileFailed";
}

/// AWSMachinePool describes an autoscaling group of EC2 instances.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1beta2
/// kind: AWSMachinePool
/// metadata:
///   name: workers
/// spec:
///   minSize: 1
///   maxSize: 10
///   awsLaunchTemplate:
///     instanceType: m5.large
///     ami:
///       id: ami-0123456789
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSMachinePool",
    root = "AwsMachinePool",
    plural = "awsmachinepools",
    namespaced,
    status = "AwsMachinePoolStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"MinSize","type":"integer","jsonPath":".spec.minSize"}"#,
    printcolumn = r#"{"name":"MaxSize","type":"integer","jsonPath":".spec.maxSize"}"#,
    printcolumn = r#"{"name":"LaunchTemplate ID","type":"string","jsonPath":".status.launchTemplateID"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AwsMachinePoolSpec {
    /// ARN of the autoscaling group
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// ProviderIDs of the current members, `aws:///<az>/<instance-id>`
    #[serde(rename = "providerIDList", default, skip_serializing_if = "Vec::is_empty")]
    pub provider_id_list: Vec<String>,

    /// Minimum group size
    #[serde(default = "default_min_size")]
    pub min_size: i32,

    /// Maximum group size
    pub max_size: i32,

    /// Availability zones to launch into
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,

    /// Subnets to launch into, overrides availability zones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<AwsResourceReference>,

    /// Extra tags for the ASG, launch template and instances
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,

    /// Launch template the group launches instances from
    #[serde(rename = "awsLaunchTemplate")]
    pub aws_launch_template: AwsLaunchTemplate,

    /// Mix of on-demand/spot and instance types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,

    /// Proactively replace spot instances at elevated interruption risk
    #[serde(default)]
    pub capacity_rebalance: bool,

    /// Instance refresh behaviour after launch template changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_preferences: Option<RefreshPreferences>,

    /// Autoscaling processes to keep suspended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_processes: Option<SuspendProcessesTypes>,
}

fn default_min_size() -> i32 {
    1
}

/// Launch template content for the pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsLaunchTemplate {
    /// Template name, defaults to the pool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// IAM instance profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<String>,

    /// Image to boot
    #[serde(default)]
    pub ami: AmiReference,

    /// EC2 instance type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// Root volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<Volume>,

    /// Additional volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_root_volumes: Vec<Volume>,

    /// SSH key pair name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// Pin to a template version, latest when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,

    /// Security groups in addition to the cluster defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_security_groups: Vec<AwsResourceReference>,

    /// Request spot instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_market_options: Option<SpotMarketOptions>,

    /// IMDS options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_metadata_options: Option<InstanceMetadataOptions>,
}

/// Mixed instances policy of an autoscaling group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MixedInstancesPolicy {
    /// On-demand/spot split. AWS fills in defaults when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_distribution: Option<InstancesDistribution>,

    /// Instance type overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
}

/// On-demand/spot distribution
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstancesDistribution {
    /// On-demand allocation strategy ("prioritized", "lowest-price")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_allocation_strategy: Option<String>,

    /// Spot allocation strategy ("lowest-price", "capacity-optimized", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_allocation_strategy: Option<String>,

    /// On-demand capacity before any spot is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_base_capacity: Option<i64>,

    /// Percentage of on-demand above the base capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_percentage_above_base_capacity: Option<i64>,
}

/// Instance type override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    /// EC2 instance type
    pub instance_type: String,
}

/// Instance refresh preferences
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPreferences {
    /// Never start an instance refresh after launch template changes
    #[serde(default)]
    pub disable: bool,

    /// Refresh strategy, "Rolling" is the only one AWS supports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Seconds until a new instance counts as in service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_warmup: Option<i64>,

    /// Percentage of capacity that must stay healthy during the refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_healthy_percentage: Option<i64>,
}

/// Autoscaling processes to suspend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SuspendProcessesTypes {
    /// Suspend every process not explicitly set to false
    #[serde(default)]
    pub all: bool,

    /// Per-process switches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<Processes>,
}

/// Per-process suspend switches. `None` means "not specified".
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Processes {
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_to_load_balancer: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_notification: Option<bool>,
    #[allow(missing_docs)]
    #[serde(rename = "azRebalance", default, skip_serializing_if = "Option::is_none")]
    pub az_rebalance: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_refresh: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_unhealthy: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_actions: Option<bool>,
}

impl Processes {
    /// (AWS process name, switch) pairs in AWS documentation order
    fn switches(&self) -> [(&'static str, Option<bool>); 9] {
        [
            ("Launch", self.launch),
            ("Terminate", self.terminate),
            ("AddToLoadBalancer", self.add_to_load_balancer),
            ("AlarmNotification", self.alarm_notification),
            ("AZRebalance", self.az_rebalance),
            ("HealthCheck", self.health_check),
            ("InstanceRefresh", self.instance_refresh),
            ("ReplaceUnhealthy", self.replace_unhealthy),
            ("ScheduledActions", self.scheduled_actions),
        ]
    }
}

impl SuspendProcessesTypes {
    /// AWS process names that should be suspended
    ///
    /// With `all`, every process is included unless explicitly set to false.
    /// Otherwise only processes explicitly set to true are included.
    pub fn process_names(&self) -> Vec<String> {
        let processes = self.processes.clone().unwrap_or_default();
        processes
            .switches()
            .into_iter()
            .filter(|(_, switch)| {
                if self.all {
                    *switch != Some(false)
                } else {
                    *switch == Some(true)
                }
            })
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// Lifecycle status of an autoscaling group as reported by AWS
///
/// Stored as the AWS status string, e.g. `"Delete in progress"`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
#[schemars(with = "String")]
pub enum AsgStatus {
    /// Group is being created
    CreateInProgress,
    /// Group is being updated
    Updating,
    /// Group is being deleted
    DeleteInProgress,
    /// Group has been deleted
    Deleted,
    /// Any status string this controller does not act on
    Other(String),
}

impl AsgStatus {
    /// Parse the status string returned by the autoscaling API
    pub fn from_aws(status: &str) -> Self {
        match status {
            "Create in progress" => Self::CreateInProgress,
            "Update in progress" | "Updating" => Self::Updating,
            "Delete in progress" => Self::DeleteInProgress,
            "Deleted" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for AsgStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateInProgress => write!(f, "Create in progress"),
            Self::Updating => write!(f, "Update in progress"),
            Self::DeleteInProgress => write!(f, "Delete in progress"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl From<String> for AsgStatus {
    fn from(status: String) -> Self {
        Self::from_aws(&status)
    }
}

impl From<AsgStatus> for String {
    fn from(status: AsgStatus) -> Self {
        status.to_string()
    }
}

/// Per-instance status entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsMachinePoolInstanceStatus {
    /// EC2 instance ID
    #[serde(rename = "instanceID")]
    pub instance_id: String,

    /// Last observed instance state (pending, running, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,
}

/// AWSMachinePool status, written only by this controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsMachinePoolStatus {
    /// The ASG exists and its members are reflected in the spec
    #[serde(default)]
    pub ready: bool,

    /// Number of instances in the group
    #[serde(default)]
    pub replicas: i32,

    /// Members of the group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<AwsMachinePoolInstanceStatus>,

    /// ID of the launch template backing the group
    #[serde(rename = "launchTemplateID", default, skip_serializing_if = "Option::is_none")]
    pub launch_template_id: Option<String>,

    /// Latest launch template version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_version: Option<String>,

    /// Terminal failure reason; reconciliation stops while set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Last observed ASG lifecycle status
    #[serde(rename = "asgStatus", default, skip_serializing_if = "Option::is_none")]
    pub asg_status: Option<AsgStatus>,

    /// Conditions (Ready, ASGReady, LaunchTemplateReady)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Kind of the per-instance resources ("AWSMachine")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_machine_kind: Option<String>,
}
