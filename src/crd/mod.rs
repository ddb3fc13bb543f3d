//! Custom Resource Definitions used by the machine pool controller
//!
//! AWSMachinePool and AWSMachine are owned by this crate. The CAPI and
//! infrastructure cluster types are read-mostly views of objects owned by
//! other controllers.

mod capi;
pub mod conditions;
mod infra_cluster;
mod machine;
mod machine_pool;
mod types;

pub use capi::{
    Bootstrap, Cluster, ClusterSpec, ClusterStatus, Machine, MachinePool, MachinePoolSpec,
    MachineSpec, MachineTemplateMachineSpec, MachineTemplateSpec, ObjectReference,
};
pub use conditions::{Condition, ConditionSeverity, ConditionStatus, READY_CONDITION};
pub use infra_cluster::{
    AwsCluster, AwsClusterSpec, AwsManagedControlPlane, AwsManagedControlPlaneSpec,
    MANAGED_CONTROL_PLANE_KIND,
};
pub use machine::{AwsMachine, AwsMachineSpec};
pub use machine_pool::{
    reasons, AsgStatus, AwsLaunchTemplate, AwsMachinePool, AwsMachinePoolInstanceStatus,
    AwsMachinePoolSpec, AwsMachinePoolStatus, InstancesDistribution, MixedInstancesPolicy,
    Override, Processes, RefreshPreferences, SuspendProcessesTypes, ASG_READY_CONDITION,
    INFRASTRUCTURE_MACHINE_KIND, LAUNCH_TEMPLATE_READY_CONDITION, MACHINE_POOL_FINALIZER,
};
pub use types::{
    AmiReference, AwsResourceReference, CloudInit, InstanceMetadataOptions, SpotMarketOptions,
    Volume,
};

use kube::CustomResourceExt;

/// Render the CRDs this controller owns as a multi-document YAML stream
pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
    let docs = [
        serde_yaml::to_string(&<AwsMachinePool as CustomResourceExt>::crd())?,
        serde_yaml::to_string(&<AwsMachine as CustomResourceExt>::crd())?,
    ];
    Ok(docs.join("---\n"))
}
