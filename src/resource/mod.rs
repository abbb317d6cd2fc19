//! Resource declarations for the platform plan
//!
//! A [`ResourceDeclaration`] describes desired state for one managed resource.
//! Its properties are a tree of [`PropertyValue`]s; generated values produced by
//! other resources appear only as [`AttributeRef`]s (`Fn::GetAtt`) or joins over
//! them (`Fn::Join`). Declarations are grouped into [`DeployableUnit`]s and
//! collected in a [`ResourceSet`], which rejects references to anything not
//! declared earlier.

mod value;

pub use value::{AttributeRef, PropertyMap, PropertyValue};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Attribute every resource exposes: its provider-assigned identifier
pub const REF: &str = "Ref";

/// Kind of managed resource being declared
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Isolated address space
    #[serde(rename = "AWS::EC2::VPC")]
    Vpc,
    /// Zone-scoped subnet
    #[serde(rename = "AWS::EC2::Subnet")]
    Subnet,
    /// Internet gateway attached to the VPC
    #[serde(rename = "AWS::EC2::InternetGateway")]
    InternetGateway,
    /// NAT gateway in a public subnet
    #[serde(rename = "AWS::EC2::NatGateway")]
    NatGateway,
    /// Parameter store entry used for discovery
    #[serde(rename = "AWS::SSM::Parameter")]
    Parameter,
    /// Isolation boundary
    #[serde(rename = "AWS::EC2::SecurityGroup")]
    SecurityGroup,
    /// Ingress rule attached to an isolation boundary
    #[serde(rename = "AWS::EC2::SecurityGroupIngress")]
    SecurityGroupIngress,
    /// Secret with a generated value
    #[serde(rename = "AWS::SecretsManager::Secret")]
    GeneratedSecret,
    /// Managed relational database instance
    #[serde(rename = "AWS::RDS::DBInstance")]
    DatabaseInstance,
    /// Managed search domain
    #[serde(rename = "AWS::OpenSearchService::Domain")]
    SearchDomain,
    /// Resource policy on the search domain
    #[serde(rename = "AWS::OpenSearchService::DomainAccessPolicy")]
    SearchAccessPolicy,
    /// Container cluster
    #[serde(rename = "AWS::ECS::Cluster")]
    ContainerCluster,
    /// Container task definition
    #[serde(rename = "AWS::ECS::TaskDefinition")]
    TaskDefinition,
    /// Long-running container service
    #[serde(rename = "AWS::ECS::Service")]
    ContainerService,
    /// Application load balancer
    #[serde(rename = "AWS::ElasticLoadBalancingV2::LoadBalancer")]
    LoadBalancer,
    /// Load balancer listener
    #[serde(rename = "AWS::ElasticLoadBalancingV2::Listener")]
    Listener,
    /// Load balancer target group with health check
    #[serde(rename = "AWS::ElasticLoadBalancingV2::TargetGroup")]
    TargetGroup,
    /// Imported TLS certificate
    #[serde(rename = "AWS::CertificateManager::Certificate")]
    Certificate,
    /// DNS alias record
    #[serde(rename = "AWS::Route53::RecordSet")]
    DnsRecord,
    /// Auto-scaling target
    #[serde(rename = "AWS::ApplicationAutoScaling::ScalableTarget")]
    ScalableTarget,
    /// Target-tracking scaling policy
    #[serde(rename = "AWS::ApplicationAutoScaling::ScalingPolicy")]
    ScalingPolicy,
}

impl ResourceKind {
    /// Attributes the control plane publishes once the resource is realized
    pub fn attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Vpc => &[REF, "CidrBlock"],
            Self::Subnet => &[REF, "AvailabilityZone"],
            Self::SecurityGroup => &[REF, "GroupId"],
            Self::GeneratedSecret => &[REF, "Arn"],
            Self::DatabaseInstance => &[REF, "Endpoint.Address", "Endpoint.Port"],
            Self::SearchDomain => &[REF, "Arn", "DomainEndpoint"],
            Self::ContainerCluster => &[REF, "Arn"],
            Self::ContainerService => &[REF, "Name"],
            Self::LoadBalancer => &[REF, "DNSName", "CanonicalHostedZoneID"],
            _ => &[REF],
        }
    }

    /// Whether the kind publishes the named attribute
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes().contains(&attribute)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{self:?}"));
        f.write_str(&name)
    }
}

/// What happens to a resource when its unit is torn down
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalPolicy {
    /// Delete the resource with the unit
    #[default]
    Destroy,
    /// Keep the resource after the unit is gone
    Retain,
    /// Take a final snapshot, then delete
    Snapshot,
}

/// An independently-deployed, dependency-tracked group of declarations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployableUnit {
    /// Unit name
    pub id: String,
    /// Enclosing unit for nested units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Units this one is declared to depend on, independent of references
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

impl DeployableUnit {
    /// Create a top-level unit
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            depends_on: BTreeSet::new(),
        }
    }

    /// Create a unit nested under `parent`
    pub fn nested(id: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: Some(parent.into()),
            depends_on: BTreeSet::new(),
        }
    }

    /// Add an explicit dependency on another unit
    pub fn depends_on(mut self, unit: impl Into<String>) -> Self {
        self.depends_on.insert(unit.into());
        self
    }
}

/// Desired state for a single managed resource
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeclaration {
    /// Logical id, unique within the plan
    pub logical_id: String,
    /// Resource kind
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Deployable unit the resource belongs to
    pub unit: String,
    /// Declared properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Explicit dependencies beyond those implied by references
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
    /// Teardown behaviour
    pub removal_policy: RemovalPolicy,
    /// Tags stamped on the resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ResourceDeclaration {
    /// Create a declaration with no properties
    pub fn new(logical_id: impl Into<String>, kind: ResourceKind, unit: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind,
            unit: unit.into(),
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            removal_policy: RemovalPolicy::default(),
            tags: BTreeMap::new(),
        }
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency on another resource
    pub fn with_dependency(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    /// Set the removal policy
    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Reference one of this resource's published attributes
    pub fn attr(&self, attribute: &str) -> AttributeRef {
        AttributeRef::new(&self.logical_id, attribute)
    }

    /// Reference this resource's identifier
    pub fn reference(&self) -> AttributeRef {
        self.attr(REF)
    }

    /// All attribute references in the property tree
    pub fn references(&self) -> Vec<&AttributeRef> {
        let mut refs = Vec::new();
        for value in self.properties.values() {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Every resource this declaration depends on, implied or explicit
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps: BTreeSet<String> = self
            .references()
            .into_iter()
            .map(|r| r.resource.clone())
            .collect();
        deps.extend(self.depends_on.iter().cloned());
        deps.remove(&self.logical_id);
        deps
    }
}

/// Ordered collection of declarations and the units they live in
///
/// Declarations may only reference resources declared before them, so a set
/// built through [`ResourceSet::declare`] has no resource-level cycles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSet {
    units: Vec<DeployableUnit>,
    resources: Vec<ResourceDeclaration>,
    index: BTreeMap<String, usize>,
}

impl ResourceSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployable unit
    pub fn add_unit(&mut self, unit: DeployableUnit) -> Result<()> {
        if self.unit(&unit.id).is_some() {
            return Err(Error::validation(format!("unit '{}' declared twice", unit.id)));
        }
        if let Some(parent) = &unit.parent {
            if self.unit(parent).is_none() {
                return Err(Error::unknown_reference(format!(
                    "unit '{}' is nested under undeclared unit '{}'",
                    unit.id, parent
                )));
            }
        }
        for dep in &unit.depends_on {
            if self.unit(dep).is_none() {
                return Err(Error::unknown_reference(format!(
                    "unit '{}' depends on undeclared unit '{}'",
                    unit.id, dep
                )));
            }
        }
        self.units.push(unit);
        Ok(())
    }

    /// Add a declaration, returning a reference to its identifier
    ///
    /// Fails if the logical id is taken, the unit is unknown, or any reference
    /// points at a resource or attribute that has not been declared yet.
    pub fn declare(&mut self, declaration: ResourceDeclaration) -> Result<AttributeRef> {
        if self.index.contains_key(&declaration.logical_id) {
            return Err(Error::validation(format!(
                "resource '{}' declared twice",
                declaration.logical_id
            )));
        }
        if self.unit(&declaration.unit).is_none() {
            return Err(Error::unknown_reference(format!(
                "resource '{}' placed in undeclared unit '{}'",
                declaration.logical_id, declaration.unit
            )));
        }
        for reference in declaration.references() {
            let target = self.get(&reference.resource).ok_or_else(|| {
                Error::unknown_reference(format!(
                    "resource '{}' references undeclared resource '{}'",
                    declaration.logical_id, reference.resource
                ))
            })?;
            if !target.kind.has_attribute(&reference.attribute) {
                return Err(Error::unknown_reference(format!(
                    "resource '{}' references attribute '{}' which {} does not publish",
                    declaration.logical_id, reference, target.kind
                )));
            }
        }
        for dep in &declaration.depends_on {
            if !self.index.contains_key(dep) {
                return Err(Error::unknown_reference(format!(
                    "resource '{}' depends on undeclared resource '{}'",
                    declaration.logical_id, dep
                )));
            }
        }

        debug!(
            resource = %declaration.logical_id,
            kind = %declaration.kind,
            unit = %declaration.unit,
            "declared resource"
        );
        let reference = declaration.reference();
        self.index
            .insert(declaration.logical_id.clone(), self.resources.len());
        self.resources.push(declaration);
        Ok(reference)
    }

    /// Look up a declaration by logical id
    pub fn get(&self, logical_id: &str) -> Option<&ResourceDeclaration> {
        self.index.get(logical_id).map(|&i| &self.resources[i])
    }

    /// Look up a unit by id
    pub fn unit(&self, id: &str) -> Option<&DeployableUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Declarations in declaration order
    pub fn resources(&self) -> &[ResourceDeclaration] {
        &self.resources
    }

    /// Units in registration order
    pub fn units(&self) -> &[DeployableUnit] {
        &self.units
    }

    /// Number of declarations
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing has been declared
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Unit-level dependency edges: explicit ones plus those implied by the
    /// declarations made so far
    pub fn unit_edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut edges: BTreeMap<String, BTreeSet<String>> = self
            .units
            .iter()
            .map(|u| (u.id.clone(), u.depends_on.clone()))
            .collect();

        for resource in &self.resources {
            for dep in resource.dependencies() {
                if let Some(target) = self.get(&dep) {
                    if target.unit != resource.unit {
                        edges
                            .entry(resource.unit.clone())
                            .or_default()
                            .insert(target.unit.clone());
                    }
                }
            }
        }
        edges
    }

    /// Whether `from` depends on `to`, directly or transitively
    pub fn unit_reaches(&self, from: &str, to: &str) -> bool {
        reaches(&self.unit_edges(), from, to)
    }
}

/// Depth-first reachability over an adjacency map
pub(crate) fn reaches(edges: &BTreeMap<String, BTreeSet<String>>, from: &str, to: &str) -> bool {
    let mut stack = vec![from];
    let mut seen = BTreeSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = edges.get(node) {
            stack.extend(next.iter().map(String::as_str));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_unit_set() -> ResourceSet {
        let mut set = ResourceSet::new();
        set.add_unit(DeployableUnit::root("Platform")).unwrap();
        set.add_unit(DeployableUnit::nested("Db", "Platform").depends_on("Platform"))
            .unwrap();
        set
    }

    // =========================================================================
    // Story: References Must Point Backwards
    // =========================================================================

    #[test]
    fn story_reference_to_declared_resource_is_accepted() {
        let mut set = two_unit_set();
        let vpc = ResourceDeclaration::new("Vpc", ResourceKind::Vpc, "Platform")
            .with_property("CidrBlock", "10.0.0.0/16");
        let vpc_ref = set.declare(vpc).unwrap();
        assert_eq!(vpc_ref, AttributeRef::new("Vpc", REF));

        let sg = ResourceDeclaration::new("DbSg", ResourceKind::SecurityGroup, "Db")
            .with_property("VpcId", vpc_ref);
        set.declare(sg).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(
            set.get("DbSg").unwrap().dependencies(),
            BTreeSet::from(["Vpc".to_string()])
        );
    }

    #[test]
    fn story_reference_to_undeclared_resource_is_rejected() {
        let mut set = two_unit_set();
        let sg = ResourceDeclaration::new("DbSg", ResourceKind::SecurityGroup, "Db")
            .with_property("VpcId", AttributeRef::new("Vpc", REF));

        let err = set.declare(sg).unwrap_err();
        assert!(matches!(err, Error::UnknownReference(_)));
        assert!(err.to_string().contains("undeclared resource 'Vpc'"));
        assert!(set.is_empty());
    }

    #[test]
    fn story_unpublished_attribute_is_rejected() {
        let mut set = two_unit_set();
        set.declare(ResourceDeclaration::new("Vpc", ResourceKind::Vpc, "Platform"))
            .unwrap();
        let sg = ResourceDeclaration::new("DbSg", ResourceKind::SecurityGroup, "Db")
            .with_property("VpcId", AttributeRef::new("Vpc", "DNSName"));

        let err = set.declare(sg).unwrap_err();
        assert!(err.to_string().contains("Vpc.DNSName"));
    }

    #[test]
    fn story_duplicate_logical_ids_are_rejected() {
        let mut set = two_unit_set();
        set.declare(ResourceDeclaration::new("Vpc", ResourceKind::Vpc, "Platform"))
            .unwrap();
        let err = set
            .declare(ResourceDeclaration::new("Vpc", ResourceKind::Vpc, "Platform"))
            .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn story_unknown_unit_is_rejected() {
        let mut set = two_unit_set();
        let err = set
            .declare(ResourceDeclaration::new("Vpc", ResourceKind::Vpc, "Nowhere"))
            .unwrap_err();
        assert!(err.to_string().contains("undeclared unit 'Nowhere'"));

        let err = set
            .add_unit(DeployableUnit::nested("App", "Missing"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownReference(_)));
    }

    // =========================================================================
    // Story: Unit Edges Follow References
    // =========================================================================

    #[test]
    fn story_cross_unit_reference_creates_unit_edge() {
        let mut set = ResourceSet::new();
        set.add_unit(DeployableUnit::root("Platform")).unwrap();
        set.add_unit(DeployableUnit::nested("Db", "Platform")).unwrap();

        let vpc = set
            .declare(ResourceDeclaration::new("Vpc", ResourceKind::Vpc, "Platform"))
            .unwrap();
        assert!(!set.unit_reaches("Db", "Platform"));

        set.declare(
            ResourceDeclaration::new("DbSg", ResourceKind::SecurityGroup, "Db")
                .with_property("VpcId", vpc),
        )
        .unwrap();

        assert!(set.unit_reaches("Db", "Platform"));
        assert!(!set.unit_reaches("Platform", "Db"));
        assert_eq!(
            set.unit_edges()["Db"],
            BTreeSet::from(["Platform".to_string()])
        );
    }

    #[test]
    fn story_explicit_unit_dependencies_are_transitive() {
        let mut set = ResourceSet::new();
        set.add_unit(DeployableUnit::root("A")).unwrap();
        set.add_unit(DeployableUnit::root("B").depends_on("A")).unwrap();
        set.add_unit(DeployableUnit::root("C").depends_on("B")).unwrap();

        assert!(set.unit_reaches("C", "A"));
        assert!(!set.unit_reaches("A", "C"));
    }

    #[test]
    fn story_explicit_dependency_must_exist() {
        let mut set = two_unit_set();
        let err = set
            .declare(
                ResourceDeclaration::new("Svc", ResourceKind::ContainerService, "Platform")
                    .with_dependency("Database"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("depends on undeclared resource 'Database'"));
    }

    #[test]
    fn kind_serializes_as_provider_type_name() {
        assert_eq!(ResourceKind::Vpc.to_string(), "AWS::EC2::VPC");
        assert_eq!(
            ResourceKind::SearchDomain.to_string(),
            "AWS::OpenSearchService::Domain"
        );
        assert!(ResourceKind::DatabaseInstance.has_attribute("Endpoint.Address"));
        assert!(!ResourceKind::Subnet.has_attribute("Endpoint.Address"));
    }
}
