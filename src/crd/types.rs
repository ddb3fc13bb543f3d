//! Supporting AWS types shared by AWSMachinePool and AWSMachine

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an AWS resource by ID (filters are resolved by the cloud services)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsResourceReference {
    /// Resource ID (e.g. "subnet-0abc", "sg-0def")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl AwsResourceReference {
    /// Reference a resource by ID
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }
}

/// Reference to an AMI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AmiReference {
    /// AMI ID (e.g. "ami-0123456789")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// EKS-optimized AMI lookup type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eks_lookup_type: Option<String>,
}

/// EBS volume attached to an instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Device name (e.g. "/dev/sda1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Size in GiB
    pub size: i64,

    /// Volume type (gp2, gp3, io1, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// Provisioned IOPS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,

    /// Provisioned throughput in MiB/s (gp3 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<i64>,

    /// Whether the volume is encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,

    /// KMS key used for encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

/// Spot market request options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpotMarketOptions {
    /// Maximum hourly price, defaults to the on-demand price when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<String>,
}

/// Instance metadata service (IMDS) options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadataOptions {
    /// "enabled" or "disabled"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,

    /// Hop limit for PUT responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_put_response_hop_limit: Option<i64>,

    /// "optional" (IMDSv1 allowed) or "required" (IMDSv2 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_tokens: Option<String>,

    /// "enabled" or "disabled"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_metadata_tags: Option<String>,
}

/// Cloud-init settings for an AWSMachine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudInit {
    /// Pass bootstrap data unencrypted in user data
    #[serde(default)]
    pub insecure_skip_secrets_manager: bool,
}
