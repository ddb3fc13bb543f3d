//! AWSMachinePool controller - drives an EC2 autoscaling group toward a
//! declared Cluster API machine pool
//!
//! Each reconcile pass resolves the pool's owners, converges the launch
//! template and autoscaling group, keeps one AWSMachine per group member and
//! publishes status back onto the pool. Deletion tears the cloud resources
//! down in order before releasing the finalizer.
//!
//! # Modules
//!
//! - [`crd`] - AWSMachinePool and AWSMachine CRDs plus views of CAPI objects
//! - [`controller`] - reconcile driver with the normal and delete paths
//! - [`scope`] - owner resolution and the per-pass pool scope
//! - [`asg`] - autoscaling group diff and convergence
//! - [`processes`] - suspended-process reconciliation
//! - [`machines`] - AWSMachine per group member
//! - [`cloud`] - AWS service traits the controller is written against
//! - [`runner`] - kube-rs controller wiring
//! - [`config`], [`telemetry`], [`events`] - runtime plumbing
//! - [`error`] - error types for the controller

#![deny(missing_docs)]

pub mod asg;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod machines;
pub mod processes;
pub mod provider_id;
pub mod runner;
pub mod scope;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Cluster API labels and annotations
// =============================================================================

/// API group of the core Cluster API types
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Label naming the Cluster an object belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label naming the MachinePool an AWSMachine belongs to
pub const MACHINE_POOL_NAME_LABEL: &str = "cluster.x-k8s.io/pool-name";

/// MachinePool annotation set when an external autoscaler owns replicas
pub const REPLICAS_MANAGED_BY_ANNOTATION: &str = "cluster.x-k8s.io/replicas-managed-by";

/// Annotation that pauses reconciliation of an object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label matched against the configured watch filter
pub const WATCH_FILTER_LABEL: &str = "cluster.x-k8s.io/watch-filter";

/// Annotation marking a pool as managed by the AWS provider
pub const PROVIDER_ANNOTATION: &str = "cluster-api-provider-aws";
