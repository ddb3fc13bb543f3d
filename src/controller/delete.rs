//! Deletion path
//!
//! Member machines, then the ASG, then the launch template. The finalizer
//! only comes off once both cloud resources are gone in the same pass.

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{info, warn};

use super::Context;
use crate::asg;
use crate::cloud::AsgService;
use crate::crd::{conditions, reasons, AsgStatus, ConditionSeverity, ASG_READY_CONDITION};
use crate::events::{actions, reasons as event_reasons};
use crate::machines;
use crate::scope::PoolScope;
use crate::Error;

/// Tear down the pool's cloud resources and release the finalizer
pub(super) async fn reconcile_delete(
    scope: &mut PoolScope,
    ctx: &Context,
) -> Result<Action, Error> {
    info!("handling deleted AWSMachinePool");

    if let Err(e) = machines::delete_terminating_machines(ctx.kube.as_ref(), &scope.machine_pool).await
    {
        warn!(error = %e, "failed to clean up Machines of terminating AWSMachines");
    }

    let services = ctx.cloud.services(&scope.infra);

    match delete_asg(scope, ctx, services.asg.as_ref()).await? {
        AsgDeletion::InProgress => return Ok(Action::requeue(ctx.config.deletion_requeue())),
        AsgDeletion::Gone => {}
    }

    let template_name = scope.launch_template_name();
    let Some(template) = services.ec2.get_launch_template(&template_name).await? else {
        info!(launch_template = %template_name, "unable to locate launch template");
        ctx.events
            .publish(
                &scope.object_ref(),
                EventType::Normal,
                event_reasons::ASG_NOT_FOUND,
                actions::DELETE,
                Some("Unable to find matching launch template".to_string()),
            )
            .await;
        scope.remove_finalizer();
        return Ok(Action::await_change());
    };

    info!(launch_template = %template.id, "deleting launch template");
    if let Err(e) = services.ec2.delete_launch_template(&template.id).await {
        ctx.events
            .publish(
                &scope.object_ref(),
                EventType::Warning,
                event_reasons::FAILED_DELETE,
                actions::DELETE,
                Some(format!("Failed to delete launch template {}: {e}", template.id)),
            )
            .await;
        return Err(e);
    }

    info!("successfully deleted AWSMachinePool resources");
    scope.remove_finalizer();
    Ok(Action::await_change())
}

enum AsgDeletion {
    /// AWS is already deleting the group
    InProgress,
    /// Absent, or deleted by this pass
    Gone,
}

async fn delete_asg(
    scope: &mut PoolScope,
    ctx: &Context,
    svc: &dyn AsgService,
) -> Result<AsgDeletion, Error> {
    let Some(existing) = asg::find_asg(svc, &scope.name()).await? else {
        warn!(asg = %scope.name(), "unable to locate ASG");
        ctx.events
            .publish(
                &scope.object_ref(),
                EventType::Normal,
                event_reasons::ASG_NOT_FOUND,
                actions::DELETE,
                Some("Unable to find matching ASG".to_string()),
            )
            .await;
        return Ok(AsgDeletion::Gone);
    };

    scope.set_asg_status(existing.status.clone());
    scope.set_not_ready();

    if existing.status == Some(AsgStatus::DeleteInProgress) {
        info!(asg = %existing.name, "ASG is already deleting");
        conditions::mark_false(
            scope.conditions_mut(),
            ASG_READY_CONDITION,
            reasons::ASG_DELETION_IN_PROGRESS,
            ConditionSeverity::Warning,
            "",
        );
        ctx.events
            .publish(
                &scope.object_ref(),
                EventType::Warning,
                event_reasons::DELETION_IN_PROGRESS,
                actions::DELETE,
                Some(format!("ASG deletion in progress: {}", existing.name)),
            )
            .await;
        return Ok(AsgDeletion::InProgress);
    }

    info!(asg = %existing.name, "deleting ASG");
    if let Err(e) = svc.delete_asg_and_wait(&existing.name).await {
        ctx.events
            .publish(
                &scope.object_ref(),
                EventType::Warning,
                event_reasons::FAILED_DELETE,
                actions::DELETE,
                Some(format!("Failed to delete ASG {}: {e}", existing.name)),
            )
            .await;
        return Err(e);
    }
    Ok(AsgDeletion::Gone)
}
