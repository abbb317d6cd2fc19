//! Managed search domain provisioner
//!
//! The domain is always encrypted at rest, encrypts node-to-node traffic and
//! refuses plain HTTP. Its resource policy is declared as a separate resource
//! so it can be audited on its own; a policy that admits every principal is
//! reported as a [`Finding`] and logged at `warn`.

use tracing::{info, warn};

use crate::config::{SearchAccessPolicy, SearchConfig, SubnetPlacement};
use crate::network::NetworkTopology;
use crate::plan::{Finding, Severity};
use crate::policy::IsolationBoundary;
use crate::resource::{
    AttributeRef, PropertyMap, PropertyValue, ResourceDeclaration, ResourceKind, ResourceSet,
};
use crate::{Result, SEARCH_PORT};

/// Logical id of the search domain
pub const SEARCH_DOMAIN_ID: &str = "MagentoESDomain";

/// Logical id of the domain access policy
pub const SEARCH_POLICY_ID: &str = "MagentoESDomainAccessPolicy";

/// Values the search domain publishes to downstream builders
#[derive(Clone, Debug, PartialEq)]
pub struct SearchOutputs {
    /// Logical id of the domain
    pub domain_id: String,
    /// Realized endpoint hostname
    pub endpoint: AttributeRef,
    /// Listener port
    pub port: u16,
    /// Statement of the declared access policy
    pub access_policy: PropertyValue,
    /// Findings raised while declaring the domain
    pub findings: Vec<Finding>,
}

/// Declares the domain and its access policy
pub struct SearchBuilder<'a> {
    config: &'a SearchConfig,
    network: &'a NetworkTopology,
    boundary: &'a IsolationBoundary,
    unit: &'a str,
}

impl<'a> SearchBuilder<'a> {
    /// Create a builder placing the domain in `unit`
    pub fn new(
        config: &'a SearchConfig,
        network: &'a NetworkTopology,
        boundary: &'a IsolationBoundary,
        unit: &'a str,
    ) -> Self {
        Self {
            config,
            network,
            boundary,
            unit,
        }
    }

    /// Declare the domain into `set`
    pub fn build(&self, set: &mut ResourceSet) -> Result<SearchOutputs> {
        let zones = usize::from(self.config.zone_awareness);
        let mut cluster = PropertyMap::new()
            .with("InstanceType", &self.config.instance_type)
            .with("InstanceCount", self.config.data_nodes)
            .with("ZoneAwarenessEnabled", zones > 1);
        if zones > 1 {
            cluster = cluster.with(
                "ZoneAwarenessConfig",
                PropertyMap::new().with("AvailabilityZoneCount", self.config.zone_awareness),
            );
        }

        set.declare(
            ResourceDeclaration::new(SEARCH_DOMAIN_ID, ResourceKind::SearchDomain, self.unit)
                .with_property("EngineVersion", &self.config.engine_version)
                .with_property("ClusterConfig", cluster)
                .with_property(
                    "EBSOptions",
                    PropertyMap::new()
                        .with("EBSEnabled", true)
                        .with("VolumeSize", self.config.volume_size_gb)
                        .with("VolumeType", &self.config.volume_type),
                )
                .with_property(
                    "EncryptionAtRestOptions",
                    PropertyMap::new().with("Enabled", true),
                )
                .with_property(
                    "NodeToNodeEncryptionOptions",
                    PropertyMap::new().with("Enabled", true),
                )
                .with_property(
                    "DomainEndpointOptions",
                    PropertyMap::new().with("EnforceHTTPS", true),
                )
                .with_property(
                    "VPCOptions",
                    PropertyMap::new()
                        .with(
                            "SubnetIds",
                            self.network
                                .subnet_ids_in_zones(SubnetPlacement::Private, zones),
                        )
                        .with(
                            "SecurityGroupIds",
                            PropertyValue::list([self.boundary.group_id()]),
                        ),
                )
                .with_removal_policy(self.config.removal_policy),
        )?;

        let (access_policy, findings) = self.declare_access_policy(set)?;

        info!(
            domain = SEARCH_DOMAIN_ID,
            version = %self.config.engine_version,
            nodes = self.config.data_nodes,
            zones,
            "declared managed search domain"
        );

        Ok(SearchOutputs {
            domain_id: SEARCH_DOMAIN_ID.to_string(),
            endpoint: AttributeRef::new(SEARCH_DOMAIN_ID, "DomainEndpoint"),
            port: SEARCH_PORT,
            access_policy,
            findings,
        })
    }

    fn declare_access_policy(
        &self,
        set: &mut ResourceSet,
    ) -> Result<(PropertyValue, Vec<Finding>)> {
        let (principals, actions) = match &self.config.access_policy {
            SearchAccessPolicy::OpenWithinNetwork => {
                (vec!["*".to_string()], vec!["es:*".to_string()])
            }
            SearchAccessPolicy::Principals {
                principals,
                actions,
            } => (principals.clone(), actions.clone()),
        };

        let statement: PropertyValue = PropertyMap::new()
            .with("Effect", "Allow")
            .with(
                "Principal",
                PropertyMap::new().with("AWS", PropertyValue::list(principals)),
            )
            .with("Action", PropertyValue::list(actions))
            .with(
                "Resource",
                PropertyValue::join([
                    PropertyValue::from(AttributeRef::new(SEARCH_DOMAIN_ID, "Arn")),
                    PropertyValue::from("/*"),
                ]),
            )
            .into();
        set.declare(
            ResourceDeclaration::new(SEARCH_POLICY_ID, ResourceKind::SearchAccessPolicy, self.unit)
                .with_property(
                    "DomainName",
                    AttributeRef::new(SEARCH_DOMAIN_ID, crate::resource::REF),
                )
                .with_property(
                    "AccessPolicies",
                    PropertyMap::new()
                        .with("Version", "2012-10-17")
                        .with("Statement", PropertyValue::list([statement.clone()])),
                ),
        )?;

        let mut findings = Vec::new();
        if self.config.access_policy.is_wildcard() {
            warn!(
                domain = SEARCH_DOMAIN_ID,
                "search domain policy admits every principal; only the isolation boundary restricts access"
            );
            findings.push(Finding {
                resource: SEARCH_POLICY_ID.to_string(),
                severity: Severity::Warning,
                message: "access policy grants every principal access to the search domain"
                    .to_string(),
            });
        }
        Ok((statement, findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::network::NetworkBuilder;
    use crate::policy::{AccessPolicyBuilder, BoundaryPlacement};
    use crate::resource::DeployableUnit;

    const ROOT: &str = "MagentoPlatform";

    fn build(config: &SearchConfig) -> (ResourceSet, NetworkTopology, SearchOutputs) {
        let mut set = ResourceSet::new();
        set.add_unit(DeployableUnit::root(ROOT)).unwrap();
        let network = NetworkBuilder::new(&NetworkConfig::default(), ROOT, ROOT)
            .build(&mut set)
            .unwrap();
        let placement = BoundaryPlacement::shared(ROOT);
        let policies = AccessPolicyBuilder::new(&network, &placement)
            .build(&mut set)
            .unwrap();
        let outputs = SearchBuilder::new(config, &network, &policies.search, ROOT)
            .build(&mut set)
            .unwrap();
        (set, network, outputs)
    }

    fn statement(set: &ResourceSet) -> PropertyValue {
        set.get(SEARCH_POLICY_ID).unwrap().properties["AccessPolicies"]
            .get("Statement")
            .unwrap()
            .items()[0]
            .clone()
    }

    // =========================================================================
    // Story: Encryption And HTTPS Are Not Optional
    // =========================================================================

    #[test]
    fn story_domain_is_always_encrypted() {
        let (set, _, outputs) = build(&SearchConfig::default());
        let domain = set.get(SEARCH_DOMAIN_ID).unwrap();

        for (option, key) in [
            ("EncryptionAtRestOptions", "Enabled"),
            ("NodeToNodeEncryptionOptions", "Enabled"),
            ("DomainEndpointOptions", "EnforceHTTPS"),
        ] {
            assert_eq!(
                domain.properties[option].get(key),
                Some(&PropertyValue::Bool(true)),
                "{option}"
            );
        }
        assert_eq!(outputs.port, 443);
        assert_eq!(outputs.endpoint, AttributeRef::new(SEARCH_DOMAIN_ID, "DomainEndpoint"));
    }

    #[test]
    fn story_zone_awareness_spreads_nodes() {
        let (set, network, _) = build(&SearchConfig::default());
        let domain = set.get(SEARCH_DOMAIN_ID).unwrap();

        let cluster = &domain.properties["ClusterConfig"];
        assert_eq!(cluster.get("InstanceCount").and_then(PropertyValue::as_i64), Some(2));
        assert_eq!(
            cluster.get("InstanceType").and_then(PropertyValue::as_str),
            Some("r6g.large.search")
        );
        assert_eq!(
            cluster
                .get("ZoneAwarenessConfig")
                .and_then(|z| z.get("AvailabilityZoneCount"))
                .and_then(PropertyValue::as_i64),
            Some(2)
        );

        let subnets = domain.properties["VPCOptions"].get("SubnetIds").unwrap();
        assert_eq!(subnets.items().len(), 2);
        assert_eq!(subnets.items()[0].as_ref_attr(), Some(&network.private_subnets[0].id()));

        let ebs = &domain.properties["EBSOptions"];
        assert_eq!(ebs.get("VolumeSize").and_then(PropertyValue::as_i64), Some(100));
        assert_eq!(ebs.get("VolumeType").and_then(PropertyValue::as_str), Some("gp2"));
    }

    #[test]
    fn story_single_zone_disables_zone_awareness() {
        let config = SearchConfig {
            zone_awareness: 1,
            data_nodes: 1,
            ..Default::default()
        };
        let (set, _, _) = build(&config);
        let cluster = &set.get(SEARCH_DOMAIN_ID).unwrap().properties["ClusterConfig"];
        assert_eq!(
            cluster.get("ZoneAwarenessEnabled"),
            Some(&PropertyValue::Bool(false))
        );
        assert!(cluster.get("ZoneAwarenessConfig").is_none());
    }

    // =========================================================================
    // Story: Wildcard Access Is Flagged
    // =========================================================================

    #[test]
    fn story_open_policy_is_reported() {
        let (set, _, outputs) = build(&SearchConfig::default());

        let statement = statement(&set);
        assert_eq!(
            statement.get("Principal").and_then(|p| p.get("AWS")),
            Some(&PropertyValue::list(["*"]))
        );
        assert_eq!(statement.get("Action"), Some(&PropertyValue::list(["es:*"])));
        assert_eq!(
            statement.get("Resource"),
            Some(&PropertyValue::join([
                PropertyValue::from(AttributeRef::new(SEARCH_DOMAIN_ID, "Arn")),
                PropertyValue::from("/*"),
            ]))
        );

        assert_eq!(outputs.access_policy, statement);

        assert_eq!(outputs.findings.len(), 1);
        assert_eq!(outputs.findings[0].severity, Severity::Warning);
        assert_eq!(outputs.findings[0].resource, SEARCH_POLICY_ID);
    }

    #[test]
    fn story_explicit_principals_raise_no_finding() {
        let config = SearchConfig {
            access_policy: SearchAccessPolicy::Principals {
                principals: vec!["arn:aws:iam::123456789012:role/magento-task".to_string()],
                actions: vec!["es:ESHttpGet".to_string(), "es:ESHttpPost".to_string()],
            },
            ..Default::default()
        };
        let (set, _, outputs) = build(&config);

        let statement = statement(&set);
        assert_eq!(
            statement.get("Action"),
            Some(&PropertyValue::list(["es:ESHttpGet", "es:ESHttpPost"]))
        );
        assert_eq!(
            outputs.access_policy.get("Principal").and_then(|p| p.get("AWS")),
            Some(&PropertyValue::list(["arn:aws:iam::123456789012:role/magento-task"]))
        );
        assert_eq!(outputs.access_policy, statement);
        assert!(outputs.findings.is_empty());
    }

    #[test]
    fn story_wildcard_inside_principals_is_reported() {
        let config = SearchConfig {
            access_policy: SearchAccessPolicy::Principals {
                principals: vec!["*".to_string()],
                actions: vec!["es:ESHttp*".to_string()],
            },
            ..Default::default()
        };
        let (_, _, outputs) = build(&config);
        assert_eq!(outputs.findings.len(), 1);
    }
}
