//! Isolation boundaries and ingress rules
//!
//! Three boundaries are declared, one per resource class (database, search,
//! application), and the application boundary is granted ingress into the
//! other two on their service ports.
//!
//! An ingress rule that names a peer boundary makes the rule's unit depend on
//! the peer's unit. When the peer's unit already depends on the rule's unit
//! (the application unit consumes database and search outputs) such a rule
//! would tie two independently-deployed units to each other. The builder
//! therefore picks a strategy per rule:
//!
//! - [`RuleStrategy::PeerBoundary`]: reference the peer boundary directly
//!   (least privilege), used whenever no unit cycle can result
//! - [`RuleStrategy::NetworkScoped`]: allow the whole VPC range on exactly the
//!   service port, used when a peer reference would close a unit cycle
//!
//! The public load balancer boundary is declared later by the workload and
//! gets a single [`RuleStrategy::Internet`] rule on its listener port.

use tracing::{debug, info};

use crate::network::NetworkTopology;
use crate::resource::{AttributeRef, ResourceDeclaration, ResourceKind, ResourceSet};
use crate::{Result, DATABASE_PORT, SEARCH_PORT};

/// Logical id of the database boundary
pub const DATABASE_BOUNDARY_ID: &str = "RDSSG";
/// Logical id of the search boundary
pub const SEARCH_BOUNDARY_ID: &str = "OpensearchSG";
/// Logical id of the application boundary
pub const APPLICATION_BOUNDARY_ID: &str = "MagentoSG";
/// Logical id of the load balancer boundary
pub const LOAD_BALANCER_BOUNDARY_ID: &str = "MagentoLBSG";

/// Resource class a boundary protects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryClass {
    /// Managed database
    Database,
    /// Managed search domain
    Search,
    /// Magento service tasks
    Application,
    /// Public load balancer in front of the service
    LoadBalancer,
}

impl BoundaryClass {
    fn logical_id(&self) -> &'static str {
        match self {
            Self::Database => DATABASE_BOUNDARY_ID,
            Self::Search => SEARCH_BOUNDARY_ID,
            Self::Application => APPLICATION_BOUNDARY_ID,
            Self::LoadBalancer => LOAD_BALANCER_BOUNDARY_ID,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Database => "Magento database access",
            Self::Search => "Magento search domain access",
            Self::Application => "Magento service tasks",
            Self::LoadBalancer => "Magento public load balancer",
        }
    }
}

/// Transport protocol of an ingress rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// TCP
    Tcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// How an ingress rule identifies its source
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleStrategy {
    /// The source is the peer boundary itself
    PeerBoundary,
    /// The source is any address inside the VPC
    NetworkScoped,
    /// The source is any IPv4 address; public listeners only
    Internet,
}

impl std::fmt::Display for RuleStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerBoundary => write!(f, "peer-boundary"),
            Self::NetworkScoped => write!(f, "network-scoped"),
            Self::Internet => write!(f, "internet"),
        }
    }
}

/// Source of traffic admitted by a rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngressSource {
    /// Members of another boundary (logical id)
    Boundary(String),
    /// Any address in the VPC range
    Network(AttributeRef),
    /// Any IPv4 address
    Internet,
}

/// Directional permission into a boundary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressRule {
    /// Logical id of the rule resource
    pub logical_id: String,
    /// Where traffic may come from
    pub source: IngressSource,
    /// Protocol
    pub protocol: Protocol,
    /// First port of the range
    pub from_port: u16,
    /// Last port of the range
    pub to_port: u16,
    /// Human-readable description
    pub description: String,
    /// Strategy chosen for the source
    pub strategy: RuleStrategy,
}

/// A declared isolation boundary and the rules attached to it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsolationBoundary {
    /// Logical id of the boundary resource
    pub logical_id: String,
    /// What the boundary protects
    pub class: BoundaryClass,
    /// Unit the boundary is declared in
    pub unit: String,
    /// Ingress rules, in declaration order
    pub rules: Vec<IngressRule>,
}

impl IsolationBoundary {
    /// Reference to the realized group id
    pub fn group_id(&self) -> AttributeRef {
        AttributeRef::new(&self.logical_id, "GroupId")
    }
}

/// Units the three boundaries are declared in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryPlacement {
    /// Unit of the database boundary
    pub database: String,
    /// Unit of the search boundary
    pub search: String,
    /// Unit of the application boundary
    pub application: String,
}

impl BoundaryPlacement {
    /// Every boundary in one unit
    pub fn shared(unit: impl Into<String>) -> Self {
        let unit = unit.into();
        Self {
            database: unit.clone(),
            search: unit.clone(),
            application: unit,
        }
    }

    fn unit_for(&self, class: BoundaryClass) -> &str {
        match class {
            BoundaryClass::Database => &self.database,
            BoundaryClass::Search => &self.search,
            BoundaryClass::Application | BoundaryClass::LoadBalancer => &self.application,
        }
    }
}

/// Output of the access policy builder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPolicies {
    /// Boundary around the database
    pub database: IsolationBoundary,
    /// Boundary around the search domain
    pub search: IsolationBoundary,
    /// Boundary around the service tasks
    pub application: IsolationBoundary,
}

impl AccessPolicies {
    /// All boundaries
    pub fn boundaries(&self) -> [&IsolationBoundary; 3] {
        [&self.database, &self.search, &self.application]
    }

    /// All rules across boundaries
    pub fn rules(&self) -> impl Iterator<Item = (&IsolationBoundary, &IngressRule)> {
        self.boundaries()
            .into_iter()
            .flat_map(|b| b.rules.iter().map(move |r| (b, r)))
    }
}

/// Declares the three boundaries and their ingress rules
pub struct AccessPolicyBuilder<'a> {
    network: &'a NetworkTopology,
    placement: &'a BoundaryPlacement,
}

impl<'a> AccessPolicyBuilder<'a> {
    /// Create a builder for the given topology and placement
    pub fn new(network: &'a NetworkTopology, placement: &'a BoundaryPlacement) -> Self {
        Self { network, placement }
    }

    /// Declare boundaries and rules into `set`
    ///
    /// The units in `set` must already carry their intended dependencies so
    /// the builder can see which peer references would close a cycle.
    pub fn build(&self, set: &mut ResourceSet) -> Result<AccessPolicies> {
        let application = self.declare_boundary(set, BoundaryClass::Application)?;
        let mut database = self.declare_boundary(set, BoundaryClass::Database)?;
        let mut search = self.declare_boundary(set, BoundaryClass::Search)?;

        let rule = self.allow(
            set,
            &database,
            &application,
            DATABASE_PORT,
            "Authorize Fargate to RDS",
        )?;
        database.rules.push(rule);
        let rule = self.allow(
            set,
            &search,
            &application,
            SEARCH_PORT,
            "Authorize Fargate to ES",
        )?;
        search.rules.push(rule);

        Ok(AccessPolicies {
            database,
            search,
            application,
        })
    }

    /// Declare the boundary for `class` in the unit the placement assigns
    pub fn declare_boundary(
        &self,
        set: &mut ResourceSet,
        class: BoundaryClass,
    ) -> Result<IsolationBoundary> {
        let unit = self.placement.unit_for(class);
        let logical_id = class.logical_id();
        set.declare(
            ResourceDeclaration::new(logical_id, ResourceKind::SecurityGroup, unit)
                .with_property("GroupDescription", class.description())
                .with_property("VpcId", self.network.vpc_id()),
        )?;
        Ok(IsolationBoundary {
            logical_id: logical_id.to_string(),
            class,
            unit: unit.to_string(),
            rules: Vec::new(),
        })
    }

    /// Pick the rule strategy for `owner` admitting traffic from `peer`
    pub fn choose_strategy(
        set: &ResourceSet,
        owner: &IsolationBoundary,
        peer: &IsolationBoundary,
    ) -> RuleStrategy {
        if owner.unit == peer.unit || !set.unit_reaches(&peer.unit, &owner.unit) {
            RuleStrategy::PeerBoundary
        } else {
            RuleStrategy::NetworkScoped
        }
    }

    /// Declare an ingress rule into `owner` from `peer` on `port`
    pub fn allow(
        &self,
        set: &mut ResourceSet,
        owner: &IsolationBoundary,
        peer: &IsolationBoundary,
        port: u16,
        peer_description: &str,
    ) -> Result<IngressRule> {
        let strategy = Self::choose_strategy(set, owner, peer);
        let (source, description) = match strategy {
            RuleStrategy::NetworkScoped => (
                IngressSource::Network(self.network.vpc_cidr()),
                format!("Allow TCP connections on port {port}"),
            ),
            _ => (
                IngressSource::Boundary(peer.logical_id.clone()),
                peer_description.to_string(),
            ),
        };
        let rule = Self::declare_rule(set, owner, source, port, description, strategy)?;

        if strategy == RuleStrategy::NetworkScoped {
            info!(
                rule = %rule.logical_id,
                owner_unit = %owner.unit,
                peer_unit = %peer.unit,
                port,
                "peer boundary reference would couple units both ways, scoping rule to the network"
            );
        } else {
            debug!(rule = %rule.logical_id, peer = %peer.logical_id, port, "peer boundary rule");
        }
        Ok(rule)
    }

    /// Declare an ingress rule into `owner` open to any IPv4 address on `port`
    pub fn allow_internet(
        &self,
        set: &mut ResourceSet,
        owner: &IsolationBoundary,
        port: u16,
    ) -> Result<IngressRule> {
        Self::declare_rule(
            set,
            owner,
            IngressSource::Internet,
            port,
            format!("Allow from anyone on port {port}"),
            RuleStrategy::Internet,
        )
    }

    fn declare_rule(
        set: &mut ResourceSet,
        owner: &IsolationBoundary,
        source: IngressSource,
        port: u16,
        description: String,
        strategy: RuleStrategy,
    ) -> Result<IngressRule> {
        let logical_id = format!("{}Ingress{}", owner.logical_id, port);
        let protocol = Protocol::Tcp;

        let decl =
            ResourceDeclaration::new(&logical_id, ResourceKind::SecurityGroupIngress, &owner.unit)
                .with_property("GroupId", owner.group_id())
                .with_property("IpProtocol", protocol.to_string())
                .with_property("FromPort", port)
                .with_property("ToPort", port)
                .with_property("Description", &description);
        let decl = match &source {
            IngressSource::Boundary(peer) => {
                decl.with_property("SourceSecurityGroupId", AttributeRef::new(peer, "GroupId"))
            }
            IngressSource::Network(cidr) => decl.with_property("CidrIp", cidr),
            IngressSource::Internet => decl.with_property("CidrIp", "0.0.0.0/0"),
        };
        set.declare(decl)?;

        Ok(IngressRule {
            logical_id,
            source,
            protocol,
            from_port: port,
            to_port: port,
            description,
            strategy,
        })
    }
}
