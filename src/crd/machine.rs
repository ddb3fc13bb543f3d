//! AWSMachine CRD
//!
//! One AWSMachine exists per ASG member. The pool controller creates them to
//! mirror group membership; the fields besides the IDs are informational.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    AmiReference, AwsResourceReference, CloudInit, InstanceMetadataOptions, SpotMarketOptions,
    Volume,
};

/// AWSMachine describes a single EC2 instance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSMachine",
    root = "AwsMachine",
    plural = "awsmachines",
    namespaced,
    printcolumn = r#"{"name":"InstanceID","type":"string","jsonPath":".spec.instanceID"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.instanceType"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AwsMachineSpec {
    /// `aws:///<availability-zone>/<instance-id>`
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// EC2 instance ID
    #[serde(rename = "instanceID", default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Image the instance booted from
    #[serde(default)]
    pub ami: AmiReference,

    /// EC2 instance type
    #[serde(default)]
    pub instance_type: String,

    /// Whether the instance has a public IP
    #[serde(rename = "publicIP", default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<bool>,

    /// SSH key pair name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// IMDS options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_metadata_options: Option<InstanceMetadataOptions>,

    /// IAM instance profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<String>,

    /// Security groups attached to the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_security_groups: Vec<AwsResourceReference>,

    /// Subnet the instance runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<AwsResourceReference>,

    /// Root volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<Volume>,

    /// Additional volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_root_volumes: Vec<Volume>,

    /// Network interface IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<String>,

    /// Cloud-init settings
    #[serde(default)]
    pub cloud_init: CloudInit,

    /// Spot options the instance was launched with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_market_options: Option<SpotMarketOptions>,

    /// Placement tenancy (default, dedicated, host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy: Option<String>,
}

impl AwsMachine {
    /// The ProviderID, treating an empty string as unset
    pub fn provider_id(&self) -> Option<&str> {
        self.spec.provider_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether the object has a deletion timestamp
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
