//! Magento platform - declarative deployment plans for a Magento storefront
//!
//! The crate compiles a [`config::PlatformConfig`] into a [`plan::DeploymentPlan`]:
//! an ordered, cycle-free graph of resource declarations (network, isolation
//! boundaries, managed database, managed search domain, load-balanced container
//! service) grouped into deployable units. Provisioning itself is delegated to an
//! external control plane through the [`realize::Realizer`] seam.
//!
//! # Architecture
//!
//! Builders run in dependency order and hand typed outputs to each other:
//!
//! ```text
//! network ──► policy ──┬──► database ──┐
//!                      └──► search   ──┴──► workload
//! ```
//!
//! Every generated value (VPC id, endpoints, secret handles) crosses from one
//! declaration into another only as a [`resource::PropertyValue`] reference, so
//! the [`graph::DeploymentGraph`] can derive ordering, parallel waves and
//! cross-unit edges from the declarations alone.
//!
//! # Modules
//!
//! - [`config`] - Platform configuration (YAML, JSON schema, validation)
//! - [`resource`] - Resource declarations, property values and deployable units
//! - [`network`] - VPC, subnets and NAT topology across availability zones
//! - [`policy`] - Isolation boundaries and cycle-free ingress rules
//! - [`database`] - Managed relational database with generated credentials
//! - [`search`] - Managed search domain and its access policy
//! - [`workload`] - Load-balanced, auto-scaled Magento container service
//! - [`graph`] - Dependency graph, cycle detection and topological ordering
//! - [`compiler`] - Top-level orchestrator producing a deployment plan
//! - [`plan`] - Deployment plan output format and published outputs
//! - [`realize`] - Walking a plan against an external control plane
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod compiler;
pub mod config;
pub mod database;
pub mod error;
pub mod graph;
pub mod network;
pub mod plan;
pub mod policy;
pub mod realize;
pub mod resource;
pub mod search;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Fixed Ports and Defaults
// =============================================================================
// The ports are part of the contract with the container image and the managed
// services; they are not configurable.

/// Port the managed database listens on
pub const DATABASE_PORT: u16 = 3306;

/// Port the managed search domain listens on (HTTPS only)
pub const SEARCH_PORT: u16 = 443;

/// Plain HTTP listener port on the load balancer and in the container
pub const HTTP_LISTENER_PORT: u16 = 80;

/// HTTPS listener port on the load balancer
pub const HTTPS_LISTENER_PORT: u16 = 443;

/// Default Magento container image
pub const DEFAULT_MAGENTO_IMAGE: &str = "public.ecr.aws/bitnami/magento:2.4.4";

/// Default health-check grace period while the database and index bootstrap
///
/// First boot runs the schema install and a full reindex, which can take hours
/// on a cold database.
pub const DEFAULT_BOOTSTRAP_GRACE_MINUTES: u32 = 3000;

/// Lower bound accepted for the bootstrap grace period
pub const MIN_BOOTSTRAP_GRACE_MINUTES: u32 = 60;

/// Default health-check grace period once the platform is in steady state
pub const DEFAULT_STEADY_GRACE_MINUTES: u32 = 5;

/// Upper bound for either grace period, so the value in seconds fits an i32
pub const MAX_GRACE_PERIOD_MINUTES: u32 = i32::MAX as u32 / 60;
