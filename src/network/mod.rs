//! Network topology builder
//!
//! Declares an isolated address space spanning N availability zones with one
//! public and one NAT-routed private subnet per zone. Subnet ranges are carved
//! deterministically from the VPC CIDR, public subnets first, so re-declaring
//! the same configuration always yields the same topology.

mod cidr;

pub use cidr::Ipv4Cidr;

use tracing::info;

use crate::config::{NetworkConfig, SubnetPlacement};
use crate::resource::{
    AttributeRef, PropertyMap, PropertyValue, ResourceDeclaration, ResourceKind, ResourceSet,
};
use crate::Result;

/// Logical id of the VPC
pub const VPC_ID: &str = "MagentoVpc";

/// Logical id of the parameter exporting the VPC id
pub const VPC_PARAMETER_ID: &str = "VPCID";

/// Tier of a subnet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubnetKind {
    /// Routes to the internet gateway
    Public,
    /// Routes outbound traffic through a NAT gateway
    PrivateWithNat,
}

impl std::fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "Public"),
            Self::PrivateWithNat => write!(f, "Private"),
        }
    }
}

/// A declared subnet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubnetRef {
    /// Logical id of the subnet resource
    pub logical_id: String,
    /// Zone the subnet lives in
    pub zone: String,
    /// Address range
    pub cidr: Ipv4Cidr,
    /// Tier
    pub kind: SubnetKind,
}

impl SubnetRef {
    /// Reference to the realized subnet id
    pub fn id(&self) -> AttributeRef {
        AttributeRef::new(&self.logical_id, crate::resource::REF)
    }
}

/// Output of the network builder, consumed by every other builder
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkTopology {
    /// Logical id of the VPC
    pub address_space_id: String,
    /// VPC address range
    pub cidr: Ipv4Cidr,
    /// Zone names, in subnet order
    pub zones: Vec<String>,
    /// One public subnet per zone
    pub public_subnets: Vec<SubnetRef>,
    /// One NAT-routed private subnet per zone
    pub private_subnets: Vec<SubnetRef>,
    /// Logical ids of the NAT gateways
    pub nat_gateways: Vec<String>,
}

impl NetworkTopology {
    /// Number of zones spanned
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Reference to the realized VPC id
    pub fn vpc_id(&self) -> AttributeRef {
        AttributeRef::new(&self.address_space_id, crate::resource::REF)
    }

    /// Reference to the realized VPC CIDR block
    pub fn vpc_cidr(&self) -> AttributeRef {
        AttributeRef::new(&self.address_space_id, "CidrBlock")
    }

    /// All subnet references, public first
    pub fn subnet_references(&self) -> impl Iterator<Item = &SubnetRef> {
        self.public_subnets.iter().chain(self.private_subnets.iter())
    }

    /// Subnets of the requested tier
    pub fn subnets(&self, placement: SubnetPlacement) -> &[SubnetRef] {
        match placement {
            SubnetPlacement::Public => &self.public_subnets,
            SubnetPlacement::Private => &self.private_subnets,
        }
    }

    /// List of subnet id references for the requested tier
    pub fn subnet_ids(&self, placement: SubnetPlacement) -> PropertyValue {
        PropertyValue::list(self.subnets(placement).iter().map(SubnetRef::id))
    }

    /// List of subnet id references for the first `count` zones of a tier
    pub fn subnet_ids_in_zones(&self, placement: SubnetPlacement, count: usize) -> PropertyValue {
        PropertyValue::list(self.subnets(placement).iter().take(count).map(SubnetRef::id))
    }
}

/// Declares the VPC, its subnets and gateways
pub struct NetworkBuilder<'a> {
    config: &'a NetworkConfig,
    platform: &'a str,
    unit: &'a str,
}

impl<'a> NetworkBuilder<'a> {
    /// Create a builder placing every network resource in `unit`
    pub fn new(config: &'a NetworkConfig, platform: &'a str, unit: &'a str) -> Self {
        Self {
            config,
            platform,
            unit,
        }
    }

    /// Zone names the topology spans
    pub fn zones(&self) -> Vec<String> {
        match &self.config.availability_zones {
            Some(zones) => zones.clone(),
            None => (0..self.config.max_azs)
                .map(|i| format!("{}{}", self.config.region, (b'a' + i) as char))
                .collect(),
        }
    }

    /// Declare the topology into `set`
    pub fn build(&self, set: &mut ResourceSet) -> Result<NetworkTopology> {
        let cidr = Ipv4Cidr::parse(&self.config.cidr)?;
        let zones = self.zones();
        let ranges = cidr.subdivide(zones.len() * 2)?;
        let (public_ranges, private_ranges) = ranges.split_at(zones.len());

        let vpc = set.declare(
            ResourceDeclaration::new(VPC_ID, ResourceKind::Vpc, self.unit)
                .with_property("CidrBlock", cidr.to_string())
                .with_property("EnableDnsHostnames", true)
                .with_property("EnableDnsSupport", true)
                .with_tag("Name", format!("{}/{}", self.platform, VPC_ID)),
        )?;

        let igw_id = format!("{VPC_ID}IGW");
        set.declare(
            ResourceDeclaration::new(&igw_id, ResourceKind::InternetGateway, self.unit)
                .with_property("VpcId", &vpc),
        )?;

        let mut public_subnets = Vec::with_capacity(zones.len());
        for (i, (zone, range)) in zones.iter().zip(public_ranges).enumerate() {
            let subnet = self.declare_subnet(set, &vpc, SubnetKind::Public, i, zone, *range, None)?;
            public_subnets.push(subnet);
        }

        let nat_count = self
            .config
            .nat_gateways
            .map(usize::from)
            .unwrap_or(zones.len());
        let mut nat_gateways = Vec::with_capacity(nat_count);
        for subnet in public_subnets.iter().take(nat_count) {
            let nat_id = format!("{}NATGateway", subnet.logical_id);
            set.declare(
                ResourceDeclaration::new(&nat_id, ResourceKind::NatGateway, self.unit)
                    .with_property("SubnetId", subnet.id())
                    .with_dependency(&igw_id),
            )?;
            nat_gateways.push(nat_id);
        }

        let mut private_subnets = Vec::with_capacity(zones.len());
        for (i, (zone, range)) in zones.iter().zip(private_ranges).enumerate() {
            let nat = AttributeRef::new(&nat_gateways[i % nat_gateways.len()], crate::resource::REF);
            let subnet = self.declare_subnet(
                set,
                &vpc,
                SubnetKind::PrivateWithNat,
                i,
                zone,
                *range,
                Some(nat),
            )?;
            private_subnets.push(subnet);
        }

        set.declare(
            ResourceDeclaration::new(VPC_PARAMETER_ID, ResourceKind::Parameter, self.unit)
                .with_property("Type", "String")
                .with_property("Name", format!("/{}/vpc-id", self.platform))
                .with_property("Value", &vpc),
        )?;

        info!(
            vpc = VPC_ID,
            cidr = %cidr,
            zones = zones.len(),
            nat_gateways = nat_gateways.len(),
            "declared network topology"
        );

        Ok(NetworkTopology {
            address_space_id: VPC_ID.to_string(),
            cidr,
            zones,
            public_subnets,
            private_subnets,
            nat_gateways,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn declare_subnet(
        &self,
        set: &mut ResourceSet,
        vpc: &AttributeRef,
        kind: SubnetKind,
        index: usize,
        zone: &str,
        range: Ipv4Cidr,
        nat: Option<AttributeRef>,
    ) -> Result<SubnetRef> {
        let logical_id = format!("{VPC_ID}{kind}Subnet{}", index + 1);
        let mut decl = ResourceDeclaration::new(&logical_id, ResourceKind::Subnet, self.unit)
            .with_property("VpcId", vpc)
            .with_property("CidrBlock", range.to_string())
            .with_property("AvailabilityZone", zone)
            .with_property("MapPublicIpOnLaunch", kind == SubnetKind::Public)
            .with_tag("subnet-type", kind.to_string());
        if let Some(nat) = nat {
            decl = decl.with_property(
                "DefaultRoute",
                PropertyMap::new()
                    .with("DestinationCidrBlock", "0.0.0.0/0")
                    .with("NatGatewayId", nat),
            );
        }
        set.declare(decl)?;

        Ok(SubnetRef {
            logical_id,
            zone: zone.to_string(),
            cidr: range,
            kind,
        })
    }
}
