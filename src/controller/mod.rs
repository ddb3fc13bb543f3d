//! AWSMachinePool reconciliation
//!
//! [`reconcile`] resolves the pool's owners, opens a [`PoolScope`] and runs
//! either the delete or the normal path. The scope is closed on every exit
//! so conditions and status written before a failure are persisted.

mod delete;
mod kube_client;
mod normal;

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::cloud::CloudServices;
use crate::config::ControllerConfig;
use crate::crd::{AwsMachinePool, INFRASTRUCTURE_MACHINE_KIND};
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::scope::{resolve, PoolScope};
use crate::{Error, PAUSED_ANNOTATION, WATCH_FILTER_LABEL};

pub use kube_client::{KubeClient, KubeClientImpl};

#[cfg(test)]
pub use kube_client::MockKubeClient;

/// Shared state for all reconcile passes
///
/// ```ignore
/// let ctx = Context::builder(client, cloud)
///     .config(config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Factory for region-scoped AWS services
    pub cloud: Arc<dyn CloudServices>,
    /// Event sink for the pool
    pub events: Arc<dyn EventPublisher>,
    /// Requeue intervals and filters
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, cloud: Arc<dyn CloudServices>) -> ContextBuilder {
        ContextBuilder::new(client, cloud)
    }

    /// Context over mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        cloud: Arc<dyn CloudServices>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            cloud,
            events,
            config: ControllerConfig::default(),
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    cloud: Arc<dyn CloudServices>,
    kube: Option<Arc<dyn KubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client, cloud: Arc<dyn CloudServices>) -> Self {
        Self {
            client,
            cloud,
            kube: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let name = self.config.controller_name.clone();
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone(), &name))),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client.clone(), &name))),
            cloud: self.cloud,
            config: self.config,
        }
    }
}

/// Whether the pool is in this controller's care right now
fn should_reconcile(pool: &AwsMachinePool, config: &ControllerConfig) -> bool {
    if pool.annotations().contains_key(PAUSED_ANNOTATION) {
        debug!("pool is paused");
        return false;
    }
    match &config.watch_filter_value {
        Some(value) => {
            let matches = pool.labels().get(WATCH_FILTER_LABEL) == Some(value);
            if !matches {
                debug!(filter = %value, "pool does not match watch filter");
            }
            matches
        }
        None => true,
    }
}

/// Reconcile an AWSMachinePool
#[instrument(skip(pool, ctx), fields(pool = %pool.name_any(), namespace = ?pool.namespace()))]
pub async fn reconcile(pool: Arc<AwsMachinePool>, ctx: Arc<Context>) -> Result<Action, Error> {
    if !should_reconcile(&pool, &ctx.config) {
        return Ok(Action::await_change());
    }

    let Some(resolved) = resolve(ctx.kube.as_ref(), &pool).await? else {
        return Ok(Action::await_change());
    };
    let span = resolved.infra.span();

    let mut scope = PoolScope::new((*pool).clone(), resolved, ctx.kube.clone());
    scope.status_mut().infrastructure_machine_kind = Some(INFRASTRUCTURE_MACHINE_KIND.to_string());
    scope.patch_object().await?;

    let result = async {
        if scope.is_deleting() {
            delete::reconcile_delete(&mut scope, &ctx).await
        } else {
            normal::reconcile_normal(&mut scope, &ctx).await
        }
    }
    .instrument(span)
    .await;

    match (result, scope.close().await) {
        (Ok(action), Ok(())) => Ok(action),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "failed to patch pool after failed reconcile");
            Err(e)
        }
    }
}

/// Requeue policy after a failed reconcile
///
/// Retryable errors back off for the configured interval; anything else
/// waits for the pool to change.
pub fn error_policy(pool: Arc<AwsMachinePool>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        error!(?error, pool = %pool.name_any(), "reconciliation failed");
        Action::requeue(ctx.config.error_requeue())
    } else {
        info!(%error, pool = %pool.name_any(), "reconciliation failed permanently, waiting for changes");
        Action::await_change()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::cloud::{MockAsgService, MockEc2Service, MockPoolReconcileService};
    use crate::crd::MACHINE_POOL_FINALIZER;
    use std::sync::Mutex;
    use std::time::Duration;

    fn empty_services() -> crate::cloud::Services {
        services(
            MockAsgService::new(),
            MockEc2Service::new(),
            MockPoolReconcileService::new(),
        )
    }

    #[test]
    fn paused_pools_are_skipped() {
        let mut pool = pool();
        pool.annotations_mut()
            .insert(PAUSED_ANNOTATION.to_string(), String::new());
        assert!(!should_reconcile(&pool, &ControllerConfig::default()));
    }

    #[test]
    fn watch_filter_must_match() {
        let config = ControllerConfig {
            watch_filter_value: Some("team-a".to_string()),
            ..Default::default()
        };
        let mut pool = pool();
        assert!(!should_reconcile(&pool, &config));

        pool.labels_mut()
            .insert(WATCH_FILTER_LABEL.to_string(), "team-a".to_string());
        assert!(should_reconcile(&pool, &config));

        pool.labels_mut()
            .insert(WATCH_FILTER_LABEL.to_string(), "team-b".to_string());
        assert!(!should_reconcile(&pool, &config));
    }

    #[test]
    fn unfiltered_pools_are_reconciled() {
        assert!(should_reconcile(&pool(), &ControllerConfig::default()));
    }

    /// Story: the MachinePool controller has not adopted the pool yet, so the
    /// pass waits without writing anything.
    #[tokio::test]
    async fn story_unowned_pool_waits() {
        let kube = MockKubeClient::new();
        let mut pool = pool();
        pool.metadata.owner_references = None;
        let ctx = Arc::new(context(Arc::new(kube), empty_services(), None));

        let action = reconcile(Arc::new(pool), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: a new pool on a cluster whose infrastructure is still coming up
    /// gets its finalizer and machine kind, then waits with ASGReady False.
    #[tokio::test]
    async fn story_first_pass_on_unready_cluster() {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let captured = statuses.clone();
        let patches = Arc::new(Mutex::new(Vec::new()));
        let captured_patches = patches.clone();

        let mut kube = MockKubeClient::new();
        kube.expect_get_machine_pool()
            .returning(|_, _| Ok(Some(machine_pool(Some(1)))));
        kube.expect_get_cluster()
            .returning(|_, _| Ok(Some(cluster(false))));
        kube.expect_get_aws_cluster()
            .returning(|_, _| Ok(Some(aws_cluster())));
        kube.expect_patch_pool_status().returning(move |_, _, status| {
            captured.lock().unwrap().push(status.clone());
            Ok(())
        });
        kube.expect_patch_pool()
            .times(1)
            .returning(move |_, _, patch| {
                captured_patches.lock().unwrap().push(patch.clone());
                Ok(())
            });

        let ctx = Arc::new(context(Arc::new(kube), empty_services(), None));
        let action = reconcile(Arc::new(pool()), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(180)));

        let statuses = statuses.lock().unwrap();
        assert_eq!(
            statuses[0]["status"]["infrastructureMachineKind"],
            "AWSMachine"
        );
        let last = patched_conditions(statuses.last().unwrap());
        let asg_ready = crate::crd::conditions::get(&last, "ASGReady").unwrap();
        assert_eq!(asg_ready.reason, "WaitingForClusterInfrastructure");
        let ready = crate::crd::conditions::get(&last, "Ready").unwrap();
        assert_eq!(ready.reason, "WaitingForClusterInfrastructure");

        let patches = patches.lock().unwrap();
        assert_eq!(patches[0]["metadata"]["finalizers"][0], MACHINE_POOL_FINALIZER);
    }

    /// Story: the launch template cannot be reconciled. The failure is both
    /// returned and written to the pool before the pass ends.
    #[tokio::test]
    async fn story_failure_still_closes_scope() {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let captured = statuses.clone();

        let mut kube = MockKubeClient::new();
        kube.expect_get_machine_pool()
            .returning(|_, _| Ok(Some(machine_pool(Some(1)))));
        kube.expect_get_cluster()
            .returning(|_, _| Ok(Some(cluster(true))));
        kube.expect_get_aws_cluster()
            .returning(|_, _| Ok(Some(aws_cluster())));
        kube.expect_patch_pool_status().returning(move |_, _, status| {
            captured.lock().unwrap().push(status.clone());
            Ok(())
        });
        kube.expect_patch_pool().returning(|_, _, _| Ok(()));

        let mut asg = MockAsgService::new();
        asg.expect_get_asg_by_name().returning(|_| Ok(None));
        let mut reconcile_svc = MockPoolReconcileService::new();
        reconcile_svc
            .expect_reconcile_launch_template()
            .returning(|_, _| Err(Error::provider("ami not found")));

        let ctx = Arc::new(context(
            Arc::new(kube),
            services(asg, MockEc2Service::new(), reconcile_svc),
            None,
        ));
        let err = reconcile(Arc::new(pool()), ctx.clone()).await.unwrap_err();
        assert!(err.is_retryable());

        let statuses = statuses.lock().unwrap();
        let last = patched_conditions(statuses.last().unwrap());
        assert!(!crate::crd::conditions::is_true(&last, "LaunchTemplateReady"));
        assert!(!crate::crd::conditions::is_true(&last, "Ready"));
    }

    #[test]
    fn retryable_errors_back_off() {
        let ctx = Arc::new(context(
            Arc::new(MockKubeClient::new()),
            empty_services(),
            None,
        ));
        let action = error_policy(Arc::new(pool()), &Error::provider("throttled"), ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }

    #[test]
    fn permanent_errors_wait_for_changes() {
        let ctx = Arc::new(context(
            Arc::new(MockKubeClient::new()),
            empty_services(),
            None,
        ));
        let action = error_policy(
            Arc::new(pool()),
            &Error::validation_for("workers", "bad owner reference"),
            ctx,
        );
        assert_eq!(action, Action::await_change());
    }
}
