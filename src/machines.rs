//! Member instance synchronization
//!
//! Keeps one AWSMachine per ASG member, keyed by ProviderID. Missing ones are
//! created from the instance description; ones whose instance left the group
//! are removed through their owner Machine so CAPI can drain the node.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::cloud::{AutoScalingGroup, Ec2Service, Instance};
use crate::controller::KubeClient;
use crate::provider_id::ProviderId;
use crate::crd::{
    AmiReference, AwsMachine, AwsMachinePool, AwsMachineSpec, AwsResourceReference, CloudInit,
    Machine, MachinePool,
};
use crate::scope::resolver::parse_group_version;
use crate::{Error, CAPI_GROUP, CLUSTER_NAME_LABEL, MACHINE_POOL_NAME_LABEL};

/// Labels selecting the AWSMachines of a MachinePool
pub fn pool_machine_labels(machine_pool: &MachinePool) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            MACHINE_POOL_NAME_LABEL.to_string(),
            machine_pool.name_any(),
        ),
        (
            CLUSTER_NAME_LABEL.to_string(),
            machine_pool.spec.cluster_name.clone(),
        ),
    ])
}

/// AWSMachines belonging to `machine_pool`
pub async fn list_pool_machines(
    kube: &dyn KubeClient,
    machine_pool: &MachinePool,
) -> Result<Vec<AwsMachine>, Error> {
    let namespace = machine_pool.namespace().unwrap_or_default();
    kube.list_aws_machines(&namespace, &pool_machine_labels(machine_pool))
        .await
}

/// The AWSMachine mirroring `instance`
pub fn build_aws_machine(
    pool: &AwsMachinePool,
    machine_pool: &MachinePool,
    asg_name: &str,
    instance: &Instance,
) -> Result<AwsMachine, Error> {
    let uid = pool.uid().ok_or_else(|| {
        Error::internal_with_context("machine-sync", "AWSMachinePool has no uid")
    })?;
    let owner = OwnerReference {
        api_version: <AwsMachinePool as Resource>::api_version(&()).to_string(),
        kind: <AwsMachinePool as Resource>::kind(&()).to_string(),
        name: pool.name_any(),
        uid,
        block_owner_deletion: Some(true),
        controller: None,
    };

    let spec = AwsMachineSpec {
        provider_id: Some(instance.provider_id().to_string()),
        instance_id: Some(instance.id.clone()),
        ami: AmiReference {
            id: Some(instance.image_id.clone()),
            eks_lookup_type: None,
        },
        instance_type: instance.instance_type.clone(),
        public_ip: Some(instance.public_ip.is_some()),
        ssh_key_name: instance.ssh_key_name.clone(),
        instance_metadata_options: instance.instance_metadata_options.clone(),
        iam_instance_profile: instance.iam_profile.clone(),
        additional_security_groups: instance
            .security_group_ids
            .iter()
            .map(AwsResourceReference::with_id)
            .collect(),
        subnet: Some(AwsResourceReference::with_id(&instance.subnet_id)),
        root_volume: instance.root_volume.clone(),
        non_root_volumes: instance.non_root_volumes.clone(),
        network_interfaces: instance.network_interfaces.clone(),
        cloud_init: CloudInit::default(),
        spot_market_options: instance.spot_market_options.clone(),
        tenancy: instance.tenancy.clone(),
    };

    Ok(AwsMachine {
        metadata: ObjectMeta {
            namespace: machine_pool.namespace(),
            generate_name: Some(format!("{asg_name}-")),
            labels: Some(pool_machine_labels(machine_pool)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec,
    })
}

/// Parsed ProviderIDs of `machines`; malformed IDs represent nothing
fn represented(machines: &[AwsMachine]) -> BTreeSet<ProviderId> {
    machines
        .iter()
        .filter_map(AwsMachine::provider_id)
        .filter_map(|raw| ProviderId::parse(raw).ok())
        .collect()
}

/// Create an AWSMachine for every member not yet represented
///
/// Instances that vanished between listing and describing are skipped.
/// Returns the number created.
pub async fn create_missing_machines(
    kube: &dyn KubeClient,
    ec2: &dyn Ec2Service,
    pool: &AwsMachinePool,
    machine_pool: &MachinePool,
    asg: &AutoScalingGroup,
    existing: &[AwsMachine],
) -> Result<usize, Error> {
    let known = represented(existing);
    let mut created = 0;

    for member in &asg.instances {
        let provider_id = member.provider_id();
        if known.contains(&provider_id) {
            continue;
        }

        let Some(instance) = ec2.instance_if_exists(&member.id).await? else {
            debug!(instance = %member.id, "instance not found, it may have already been deleted");
            continue;
        };

        let machine = build_aws_machine(pool, machine_pool, &asg.name, &instance)?;
        info!(%provider_id, asg = %asg.name, "creating AWSMachine");
        kube.create_aws_machine(&machine).await?;
        created += 1;
    }
    Ok(created)
}

/// Delete AWSMachines whose instance is no longer in the group
///
/// The owner Machine is deleted when there is one; otherwise the AWSMachine
/// itself. Returns the number removed.
pub async fn delete_orphaned_machines(
    kube: &dyn KubeClient,
    asg: &AutoScalingGroup,
    existing: &[AwsMachine],
) -> Result<usize, Error> {
    let members: BTreeSet<ProviderId> = asg.provider_ids().into_iter().collect();
    let mut deleted = 0;

    for machine in existing {
        let Some(provider_id) = machine.provider_id() else {
            continue;
        };
        match ProviderId::parse(provider_id) {
            Ok(id) if members.contains(&id) => continue,
            Ok(_) => {}
            Err(e) => debug!(aws_machine = %machine.name_any(), error = %e, "AWSMachine has a malformed providerID"),
        }

        let namespace = machine.namespace().unwrap_or_default();
        match owner_machine(kube, machine).await? {
            Some(owner) => {
                info!(machine = %owner.name_any(), aws_machine = %machine.name_any(), %provider_id, "deleting orphaned Machine");
                kube.delete_machine(&namespace, &owner.name_any()).await?;
            }
            None => {
                info!(aws_machine = %machine.name_any(), %provider_id, "no owner Machine found for AWSMachine, deleting AWSMachine");
                kube.delete_aws_machine(&namespace, &machine.name_any())
                    .await?;
            }
        }
        deleted += 1;
    }
    Ok(deleted)
}

/// Delete the owner Machines of AWSMachines already marked for deletion
///
/// Best effort: failures are logged and skipped.
pub async fn delete_terminating_machines(kube: &dyn KubeClient, machine_pool: &MachinePool) -> Result<(), Error> {
    let machines = list_pool_machines(kube, machine_pool).await?;
    for machine in machines.iter().filter(|m| m.is_terminating()) {
        let owner = match owner_machine(kube, machine).await {
            Ok(Some(owner)) => owner,
            Ok(None) => continue,
            Err(e) => {
                debug!(aws_machine = %machine.name_any(), error = %e, "failed to get owner Machine");
                continue;
            }
        };
        let namespace = owner.namespace().unwrap_or_default();
        if let Err(e) = kube.delete_machine(&namespace, &owner.name_any()).await {
            warn!(machine = %owner.name_any(), error = %e, "failed to delete owner Machine");
        }
    }
    Ok(())
}

/// The CAPI Machine owning `aws_machine`, if any
pub async fn owner_machine(
    kube: &dyn KubeClient,
    aws_machine: &AwsMachine,
) -> Result<Option<Machine>, Error> {
    let namespace = aws_machine.namespace().unwrap_or_default();
    for owner in aws_machine.owner_references() {
        if owner.kind != "Machine" {
            continue;
        }
        let (group, _) = parse_group_version(&owner.api_version)?;
        if group == CAPI_GROUP {
            return kube.get_machine(&namespace, &owner.name).await;
        }
    }
    Ok(None)
}
