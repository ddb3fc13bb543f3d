//! Normal (non-deleting) reconcile path

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use super::Context;
use crate::asg::{self, InstanceRefreshPolicy};
use crate::cloud::{AutoScalingGroup, LaunchTemplateRequest, Services, TagTarget};
use crate::crd::{
    conditions, reasons, ConditionSeverity, ASG_READY_CONDITION, LAUNCH_TEMPLATE_READY_CONDITION,
};
use crate::events::{actions, reasons as event_reasons};
use crate::machines;
use crate::scope::PoolScope;
use crate::{Error, PROVIDER_ANNOTATION};

/// Converge the pool's launch template, ASG and member AWSMachines
pub(super) async fn reconcile_normal(
    scope: &mut PoolScope,
    ctx: &Context,
) -> Result<Action, Error> {
    info!("reconciling AWSMachinePool");

    if scope.has_failed() {
        info!("error state detected, skipping reconciliation");
        return Ok(Action::await_change());
    }

    // Persisted before any cloud resource exists
    if scope.add_finalizer() {
        scope.patch_object().await?;
    }

    if !scope.cluster.infrastructure_ready() {
        info!("cluster infrastructure is not ready yet");
        conditions::mark_false(
            scope.conditions_mut(),
            ASG_READY_CONDITION,
            reasons::WAITING_FOR_CLUSTER_INFRASTRUCTURE,
            ConditionSeverity::Info,
            "",
        );
        return Ok(Action::requeue(ctx.config.steady_state_requeue()));
    }

    if !scope.machine_pool.has_bootstrap_data() {
        info!("bootstrap data secret reference is not yet available");
        conditions::mark_false(
            scope.conditions_mut(),
            ASG_READY_CONDITION,
            reasons::WAITING_FOR_BOOTSTRAP_DATA,
            ConditionSeverity::Info,
            "",
        );
        return Ok(Action::await_change());
    }

    let services = ctx.cloud.services(&scope.infra);

    let existing = match asg::find_asg(services.asg.as_ref(), &scope.name()).await {
        Ok(existing) => existing,
        Err(e) => {
            conditions::mark_unknown(
                scope.conditions_mut(),
                ASG_READY_CONDITION,
                reasons::ASG_NOT_FOUND,
                e.to_string(),
            );
            return Err(e);
        }
    };
    if let Some(group) = &existing {
        scope.set_asg_status(group.status.clone());
    }

    reconcile_launch_template(scope, ctx, &services, existing.is_some()).await?;

    let Some(existing) = existing else {
        if let Err(e) = asg::create_asg(services.asg.as_ref(), scope).await {
            conditions::mark_false(
                scope.conditions_mut(),
                ASG_READY_CONDITION,
                reasons::ASG_PROVISION_FAILED,
                ConditionSeverity::Error,
                e.to_string(),
            );
            return Err(e);
        }
        return Ok(Action::requeue(ctx.config.asg_create_requeue()));
    };

    sync_members(scope, ctx, &services, &existing).await?;

    if scope.replicas_externally_managed() {
        if let Some(capacity) = existing.desired_capacity {
            if scope.desired_replicas() != Some(capacity) {
                info!(
                    machine_pool_replicas = ?scope.desired_replicas(),
                    asg_desired_capacity = capacity,
                    "adopting replica count from externally managed ASG"
                );
                scope.patch_machine_pool_replicas(capacity).await?;
            }
        }
    }

    if let Err(e) = asg::update_asg(services.asg.as_ref(), scope, &existing).await {
        conditions::mark_false(
            scope.conditions_mut(),
            ASG_READY_CONDITION,
            reasons::ASG_UPDATE_FAILED,
            ConditionSeverity::Warning,
            e.to_string(),
        );
        ctx.events
            .publish(
                &scope.object_ref(),
                EventType::Warning,
                event_reasons::FAILED_UPDATE,
                actions::RECONCILE,
                Some(format!("Failed to update ASG: {e}")),
            )
            .await;
        return Err(e);
    }

    let mut targets = Vec::with_capacity(2);
    if let Some(id) = scope.launch_template_id() {
        targets.push(TagTarget::LaunchTemplate(id));
    }
    targets.push(TagTarget::AutoScalingGroup(existing.name.clone()));
    if let Err(e) = services
        .reconcile
        .reconcile_tags(&targets, &scope.additional_tags())
        .await
    {
        conditions::mark_false(
            scope.conditions_mut(),
            ASG_READY_CONDITION,
            reasons::TAGS_RECONCILE_FAILED,
            ConditionSeverity::Warning,
            e.to_string(),
        );
        return Err(e);
    }

    let provider_ids: Vec<String> = existing
        .provider_ids()
        .iter()
        .map(ToString::to_string)
        .collect();
    let replicas = i32::try_from(provider_ids.len()).unwrap_or(i32::MAX);
    scope.pool.spec.provider_id = Some(existing.id.clone());
    scope.pool.spec.provider_id_list = provider_ids;
    scope.set_annotation(PROVIDER_ANNOTATION, "true");
    scope.update_instance_statuses(&existing.instances);
    let status = scope.status_mut();
    status.replicas = replicas;
    status.ready = true;
    conditions::mark_true(scope.conditions_mut(), ASG_READY_CONDITION);

    debug!(replicas, "pool converged");
    Ok(Action::requeue(ctx.config.steady_state_requeue()))
}

async fn reconcile_launch_template(
    scope: &mut PoolScope,
    ctx: &Context,
    services: &Services,
    asg_exists: bool,
) -> Result<(), Error> {
    let policy = InstanceRefreshPolicy::new(services.asg.clone(), scope, asg_exists);
    let request = LaunchTemplateRequest {
        name: scope.launch_template_name(),
        template: scope.pool.spec.aws_launch_template.clone(),
        tags: scope.additional_tags(),
        bootstrap_data_secret: scope.bootstrap_data_secret(),
        current_id: scope.launch_template_id(),
        current_version: scope.launch_template_version(),
    };

    match services
        .reconcile
        .reconcile_launch_template(&request, &policy)
        .await
    {
        Ok(outcome) => {
            let status = scope.status_mut();
            status.launch_template_id = Some(outcome.id);
            if outcome.version.is_some() {
                status.launch_template_version = outcome.version;
            }
            conditions::mark_true(scope.conditions_mut(), LAUNCH_TEMPLATE_READY_CONDITION);
            Ok(())
        }
        Err(e) => {
            ctx.events
                .publish(
                    &scope.object_ref(),
                    EventType::Warning,
                    event_reasons::FAILED_LAUNCH_TEMPLATE_RECONCILE,
                    actions::RECONCILE,
                    Some(format!("Failed to reconcile launch template: {e}")),
                )
                .await;
            conditions::mark_false(
                scope.conditions_mut(),
                LAUNCH_TEMPLATE_READY_CONDITION,
                reasons::LAUNCH_TEMPLATE_RECONCILE_FAILED,
                ConditionSeverity::Error,
                e.to_string(),
            );
            Err(e)
        }
    }
}

/// Create AWSMachines for new members and remove those of departed ones
async fn sync_members(
    scope: &mut PoolScope,
    ctx: &Context,
    services: &Services,
    existing: &AutoScalingGroup,
) -> Result<(), Error> {
    let kube = ctx.kube.as_ref();
    let machines = machines::list_pool_machines(kube, &scope.machine_pool).await?;

    let created = machines::create_missing_machines(
        kube,
        services.ec2.as_ref(),
        &scope.pool,
        &scope.machine_pool,
        existing,
        &machines,
    )
    .await;
    if let Err(e) = created {
        warn!(error = %e, "failed to create AWSMachines for pool members");
        scope.set_not_ready();
        conditions::mark_false(
            scope.conditions_mut(),
            ASG_READY_CONDITION,
            reasons::AWS_MACHINE_CREATION_FAILED,
            ConditionSeverity::Warning,
            e.to_string(),
        );
        return Err(e);
    }

    if let Err(e) = machines::delete_orphaned_machines(kube, existing, &machines).await {
        warn!(error = %e, "failed to delete AWSMachines of departed members");
        scope.set_not_ready();
        conditions::mark_false(
            scope.conditions_mut(),
            ASG_READY_CONDITION,
            reasons::AWS_MACHINE_DELETION_FAILED,
            ConditionSeverity::Warning,
            e.to_string(),
        );
        return Err(e);
    }
    Ok(())
}
