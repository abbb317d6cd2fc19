//! Realizing a plan against an external control plane
//!
//! [`deploy`] walks a [`DeploymentPlan`] wave by wave, and within a wave unit
//! by unit in plan order. Before each resource is
//! handed to the [`Realizer`], every `GetAtt` and `Join` in its properties is
//! replaced with attributes realized earlier, so the control plane only ever
//! sees concrete values. The first failure stops the walk; nothing is retried
//! or rolled back, and the control plane's message is kept verbatim.

use std::collections::BTreeMap;

#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::plan::DeploymentPlan;
use crate::resource::{AttributeRef, RemovalPolicy, ResourceDeclaration, ResourceKind, REF};
use crate::{Error, Result};

/// Attributes a realized resource publishes, by name
pub type Attributes = BTreeMap<String, String>;

/// A resource with every reference replaced by its realized value
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedResource {
    /// Logical id
    pub logical_id: String,
    /// Resource kind
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Unit the resource belongs to
    pub unit: String,
    /// Concrete properties
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Teardown behaviour
    pub removal_policy: RemovalPolicy,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

/// Trait for handing resolved resources to a control plane
///
/// This trait abstracts the provider API for testability.
#[cfg_attr(test, automock)]
pub trait Realizer: Send + Sync {
    /// Create or update the resource and return its published attributes
    ///
    /// The error is the control plane's message, passed on unchanged.
    fn realize(&self, resource: &ResolvedResource) -> std::result::Result<Attributes, String>;
}

/// Result of a completed deployment
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Logical ids in the order they were realized
    pub realized: Vec<String>,
    /// Published attributes of every realized resource
    pub attributes: BTreeMap<String, Attributes>,
    /// Resolved published outputs
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl Deployment {
    fn lookup(&self, reference: &AttributeRef) -> Option<String> {
        self.attributes
            .get(&reference.resource)
            .and_then(|attrs| attrs.get(&reference.attribute))
            .cloned()
    }
}

/// Realize every resource of `plan` in order, then resolve its outputs
pub fn deploy<R: Realizer + ?Sized>(plan: &DeploymentPlan, realizer: &R) -> Result<Deployment> {
    info!(
        platform = %plan.name,
        resources = plan.resources.len(),
        "realizing plan"
    );
    let mut deployment = Deployment::default();

    for declaration in realization_order(plan) {
        let lookup = |r: &AttributeRef| deployment.lookup(r);
        let mut properties = BTreeMap::new();
        for (key, value) in &declaration.properties {
            let resolved = value.resolve(&lookup).map_err(|missing| {
                Error::realization(
                    &declaration.logical_id,
                    format!("{missing} was not published by the control plane"),
                )
            })?;
            properties.insert(key.clone(), resolved);
        }

        let resolved = ResolvedResource {
            logical_id: declaration.logical_id.clone(),
            kind: declaration.kind,
            unit: declaration.unit.clone(),
            properties,
            removal_policy: declaration.removal_policy,
            tags: declaration.tags.clone(),
        };

        let attributes = realizer.realize(&resolved).map_err(|message| {
            warn!(resource = %declaration.logical_id, %message, "realization failed");
            Error::realization(&declaration.logical_id, message)
        })?;
        debug!(
            resource = %declaration.logical_id,
            attributes = attributes.len(),
            "realized resource"
        );
        deployment.realized.push(declaration.logical_id.clone());
        deployment
            .attributes
            .insert(declaration.logical_id.clone(), attributes);
    }

    for (name, output) in &plan.outputs {
        let value = output
            .value
            .resolve(&|r: &AttributeRef| deployment.lookup(r))
            .map_err(|missing| {
                Error::realization(
                    name,
                    format!("{missing} was not published by the control plane"),
                )
            })?;
        deployment.outputs.insert(name.clone(), value);
    }

    info!(
        platform = %plan.name,
        realized = deployment.realized.len(),
        "plan realized"
    );
    Ok(deployment)
}

/// Resources grouped by wave, then by unit, each unit's resources in plan order
fn realization_order(plan: &DeploymentPlan) -> Vec<&ResourceDeclaration> {
    plan.waves
        .iter()
        .flatten()
        .filter_map(|unit| plan.unit(unit))
        .flat_map(|unit| unit.resources.iter())
        .filter_map(|id| plan.resource(id))
        .collect()
}

// =============================================================================
// Dry Run
// =============================================================================

/// Realizer that fabricates deterministic attributes without calling anything
///
/// Values are derived from logical ids and declared properties so the whole
/// propagation path can be exercised locally.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunRealizer;

impl DryRunRealizer {
    /// Create a dry-run realizer
    pub fn new() -> Self {
        Self
    }

    fn fabricate(resource: &ResolvedResource, attribute: &str) -> String {
        let id = resource.logical_id.to_lowercase();
        let property = |key: &str| match resource.properties.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        match (resource.kind, attribute) {
            (kind, REF) => format!("{}-{id}", ref_prefix(kind)),
            (_, "Arn") => format!("arn:aws:dry-run:::{id}"),
            (_, "CidrBlock") => property("CidrBlock").unwrap_or_else(|| "10.0.0.0/16".to_string()),
            (_, "AvailabilityZone") => property("AvailabilityZone").unwrap_or_default(),
            (_, "GroupId") => format!("sg-{id}"),
            (_, "Endpoint.Address") => format!("{id}.dry-run.rds.amazonaws.com"),
            (_, "Endpoint.Port") => property("Port").unwrap_or_default(),
            (_, "DomainEndpoint") => format!("search-{id}.dry-run.es.amazonaws.com"),
            (_, "DNSName") => format!(
                "{}.dry-run.elb.amazonaws.com",
                property("Name").unwrap_or(id)
            ),
            (_, "CanonicalHostedZoneID") => "ZDRYRUN".to_string(),
            (_, "Name") => resource.logical_id.clone(),
            (_, other) => format!("{id}-{other}"),
        }
    }
}

fn ref_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Vpc => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::NatGateway => "nat",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::SecurityGroupIngress => "sgr",
        ResourceKind::GeneratedSecret => "arn:aws:secretsmanager:dry-run:secret",
        ResourceKind::LoadBalancer
        | ResourceKind::Listener
        | ResourceKind::TargetGroup => "arn:aws:elasticloadbalancing:dry-run",
        _ => "dry-run",
    }
}

impl Realizer for DryRunRealizer {
    fn realize(&self, resource: &ResolvedResource) -> std::result::Result<Attributes, String> {
        Ok(resource
            .kind
            .attributes()
            .iter()
            .map(|attr| (attr.to_string(), Self::fabricate(resource, attr)))
            .collect())
    }
}
