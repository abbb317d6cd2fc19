//! Application service composer
//!
//! Declares the Magento storefront: a container cluster, a public load
//! balancer, the task definition carrying the container's environment contract,
//! a load-balanced service in the private subnets and two independent
//! target-tracking scaling policies.
//!
//! Database and search endpoints reach the container only as references, and
//! credentials only as secret handles. The [`DeploymentPhase`] decides whether
//! the container bootstraps the schema and index on start and how long the load
//! balancer waits before acting on failed health checks.

use std::collections::BTreeMap;

use tracing::info;

use crate::config::{ApplicationConfig, DeploymentPhase, ListenerConfig, SubnetPlacement};
use crate::database::{DatabaseOutputs, SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY};
use crate::network::NetworkTopology;
use crate::plan::{Finding, Severity};
use crate::policy::{AccessPolicyBuilder, BoundaryClass, IsolationBoundary};
use crate::resource::{
    AttributeRef, PropertyMap, PropertyValue, ResourceDeclaration, ResourceKind, ResourceSet,
};
use crate::search::SearchOutputs;
use crate::{Result, HTTP_LISTENER_PORT};

// =============================================================================
// Logical Ids
// =============================================================================

/// Container cluster
pub const CLUSTER_ID: &str = "MagentoCluster";
/// Generated storefront admin password
pub const APP_SECRET_ID: &str = "passwordMagentoUser";
/// Public load balancer
pub const LOAD_BALANCER_ID: &str = "MagentoLB";
/// Target group behind the listener
pub const TARGET_GROUP_ID: &str = "MagentoServiceTargetGroup";
/// Load balancer listener
pub const LISTENER_ID: &str = "MagentoServiceListener";
/// Imported TLS certificate
pub const CERTIFICATE_ID: &str = "MagentoCertificate";
/// DNS alias for the storefront domain
pub const DNS_RECORD_ID: &str = "MagentoDnsRecord";
/// Task definition
pub const TASK_DEFINITION_ID: &str = "MagentoTaskDefinition";
/// Load-balanced service
pub const SERVICE_ID: &str = "MagentoService";
/// Scaling target on the service's desired count
pub const SCALABLE_TARGET_ID: &str = "MagentoServiceScalableTarget";

/// Name of the Magento container inside the task
pub const CONTAINER_NAME: &str = "web";

/// Tag recording the deployment phase on the service
pub const PHASE_TAG: &str = "magento:phase";

// =============================================================================
// Declarations
// =============================================================================

/// Metric a scaling policy tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalingMetric {
    /// Average CPU utilization across tasks
    Cpu,
    /// Average memory utilization across tasks
    Memory,
}

impl ScalingMetric {
    /// Logical id of the policy resource
    pub fn logical_id(&self) -> &'static str {
        match self {
            Self::Cpu => "CpuScaling",
            Self::Memory => "MemoryScaling",
        }
    }

    fn predefined_metric(&self) -> &'static str {
        match self {
            Self::Cpu => "ECSServiceAverageCPUUtilization",
            Self::Memory => "ECSServiceAverageMemoryUtilization",
        }
    }
}

/// A declared target-tracking policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalingPolicy {
    /// Logical id of the policy resource
    pub logical_id: String,
    /// Tracked metric
    pub metric: ScalingMetric,
    /// Target utilization
    pub target_percent: u8,
}

/// The declared service and everything the container is handed
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceDeclaration {
    /// Logical id of the service resource
    pub logical_id: String,
    /// Task CPU units
    pub cpu: u32,
    /// Task memory in MiB
    pub memory_mib: u32,
    /// Container image
    pub image: String,
    /// Plain environment variables
    pub environment: BTreeMap<String, PropertyValue>,
    /// Environment variables sourced from the secret store
    pub secrets: BTreeMap<String, PropertyValue>,
    /// Tasks started initially
    pub desired_count: u32,
    /// Lower scaling bound
    pub min_capacity: u32,
    /// Upper scaling bound
    pub max_capacity: u32,
    /// Target group health check path
    pub health_check_path: String,
    /// Grace period before failed health checks count
    pub grace_period_minutes: u32,
    /// Listener port on the load balancer
    pub listener_port: u16,
    /// Phase the service was declared for
    pub phase: DeploymentPhase,
}

/// Output of the application composer
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationOutputs {
    /// The service
    pub service: ServiceDeclaration,
    /// Independent scaling policies, CPU first
    pub scaling_policies: Vec<ScalingPolicy>,
    /// Boundary around the load balancer, with its public rule
    pub load_balancer: IsolationBoundary,
    /// Rules admitting the load balancer into the application boundary
    pub application_rules: Vec<crate::policy::IngressRule>,
    /// Public storefront URL
    pub public_url: PropertyValue,
    /// Storefront admin URL
    pub admin_url: PropertyValue,
    /// Findings raised while composing the service
    pub findings: Vec<Finding>,
}

/// Everything upstream builders hand the composer
pub struct ApplicationInputs<'a> {
    /// Network topology
    pub network: &'a NetworkTopology,
    /// Builder used for the load balancer boundary and its rules
    pub access: &'a AccessPolicyBuilder<'a>,
    /// Boundary around the service tasks
    pub boundary: &'a IsolationBoundary,
    /// Database outputs
    pub database: &'a DatabaseOutputs,
    /// Search outputs
    pub search: &'a SearchOutputs,
}

// =============================================================================
// Environment Contract
// =============================================================================

/// Plain environment handed to the Magento container
///
/// `host` is what the storefront believes its own hostname is: the load
/// balancer DNS name for HTTP, the configured domain for HTTPS.
pub fn container_environment(
    config: &ApplicationConfig,
    phase: DeploymentPhase,
    host: PropertyValue,
    database: &DatabaseOutputs,
    search: &SearchOutputs,
) -> BTreeMap<String, PropertyValue> {
    let magento = &config.magento;
    let yes_no = |b: bool| if b { "yes" } else { "no" };

    let mut env: BTreeMap<String, PropertyValue> = BTreeMap::new();
    let mut set = |k: &str, v: PropertyValue| {
        env.insert(k.to_string(), v);
    };
    set("BITNAMI_DEBUG", magento.debug.to_string().into());
    set("MAGENTO_EXTRA_INSTALL_ARGS", (&magento.extra_install_args).into());
    set("MAGENTO_HOST", host);
    set("MAGENTO_DATABASE_HOST", (&database.endpoint).into());
    set("MAGENTO_DATABASE_PORT_NUMBER", database.port.to_string().into());
    set("MAGENTO_DATABASE_NAME", (&database.database_name).into());
    set("MAGENTO_ELASTICSEARCH_HOST", (&search.endpoint).into());
    set("MAGENTO_ELASTICSEARCH_PORT_NUMBER", search.port.to_string().into());
    set("MAGENTO_ELASTICSEARCH_USE_HTTPS", "yes".into());
    set("MAGENTO_SEARCH_ENGINE", (&magento.search_engine).into());
    set(
        "MAGENTO_DEPLOY_STATIC_CONTENT",
        yes_no(magento.deploy_static_content).into(),
    );
    set(
        "MAGENTO_EXTERNAL_HTTP_PORT_NUMBER",
        HTTP_LISTENER_PORT.to_string().into(),
    );
    set("APACHE_HTTP_PORT_NUMBER", HTTP_LISTENER_PORT.to_string().into());
    set("MAGENTO_USERNAME", (&magento.username).into());
    set("MAGENTO_EMAIL", (&magento.email).into());
    if phase.skips_bootstrap() {
        set("MAGENTO_SKIP_BOOTSTRAP", "yes".into());
        set("MAGENTO_SKIP_REINDEX", "yes".into());
    }
    env
}

/// Secret-store handles handed to the Magento container
///
/// Values use the `<secret-arn>:<json-key>::` form so the container runtime
/// extracts a single key from the JSON secret.
pub fn container_secrets(
    database: &DatabaseOutputs,
    app_secret: &AttributeRef,
) -> BTreeMap<String, PropertyValue> {
    let key = |k: &str| {
        PropertyValue::join([
            PropertyValue::from(&database.secret_arn),
            PropertyValue::from(format!(":{k}::")),
        ])
    };
    BTreeMap::from([
        ("MAGENTO_DATABASE_USER".to_string(), key(SECRET_USERNAME_KEY)),
        ("MAGENTO_DATABASE_PASSWORD".to_string(), key(SECRET_PASSWORD_KEY)),
        ("MAGENTO_PASSWORD".to_string(), PropertyValue::from(app_secret)),
    ])
}

// =============================================================================
// Composer
// =============================================================================

/// Declares the storefront service and its front door
pub struct ApplicationBuilder<'a> {
    config: &'a ApplicationConfig,
    phase: DeploymentPhase,
    inputs: ApplicationInputs<'a>,
    unit: &'a str,
}

impl<'a> ApplicationBuilder<'a> {
    /// Create a composer placing the service in `unit`
    pub fn new(
        config: &'a ApplicationConfig,
        phase: DeploymentPhase,
        inputs: ApplicationInputs<'a>,
        unit: &'a str,
    ) -> Self {
        Self {
            config,
            phase,
            inputs,
            unit,
        }
    }

    /// Declare the service into `set`
    pub fn build(&self, set: &mut ResourceSet) -> Result<ApplicationOutputs> {
        let network = self.inputs.network;
        let listener_port = self.config.listener.port();

        let cluster = set.declare(ResourceDeclaration::new(
            CLUSTER_ID,
            ResourceKind::ContainerCluster,
            self.unit,
        ))?;

        let app_secret = set.declare(
            ResourceDeclaration::new(APP_SECRET_ID, ResourceKind::GeneratedSecret, self.unit)
                .with_property("Description", "Generated Magento admin password")
                .with_property(
                    "GenerateSecretString",
                    PropertyMap::new()
                        .with("ExcludePunctuation", true)
                        .with("PasswordLength", 16u32),
                ),
        )?;

        let mut load_balancer = self
            .inputs
            .access
            .declare_boundary(set, BoundaryClass::LoadBalancer)?;
        let rule = self
            .inputs
            .access
            .allow_internet(set, &load_balancer, listener_port)?;
        load_balancer.rules.push(rule);
        let application_rules = vec![self.inputs.access.allow(
            set,
            self.inputs.boundary,
            &load_balancer,
            HTTP_LISTENER_PORT,
            "Load balancer to Magento tasks",
        )?];

        let lb = set.declare(
            ResourceDeclaration::new(LOAD_BALANCER_ID, ResourceKind::LoadBalancer, self.unit)
                .with_property("Name", &self.config.load_balancer_name)
                .with_property("Scheme", "internet-facing")
                .with_property("Type", "application")
                .with_property("Subnets", network.subnet_ids(SubnetPlacement::Public))
                .with_property(
                    "SecurityGroups",
                    PropertyValue::list([load_balancer.group_id()]),
                ),
        )?;

        let target_group = set.declare(
            ResourceDeclaration::new(TARGET_GROUP_ID, ResourceKind::TargetGroup, self.unit)
                .with_property("Port", HTTP_LISTENER_PORT)
                .with_property("Protocol", "HTTP")
                .with_property("TargetType", "ip")
                .with_property("VpcId", network.vpc_id())
                .with_property("HealthCheckPath", &self.config.health_check_path),
        )?;

        let (host, public_url, admin_url) = self.declare_listener(set, &lb, &target_group)?;

        let environment = container_environment(
            self.config,
            self.phase,
            host,
            self.inputs.database,
            self.inputs.search,
        );
        let secrets = container_secrets(self.inputs.database, &app_secret);

        let task = set.declare(
            ResourceDeclaration::new(TASK_DEFINITION_ID, ResourceKind::TaskDefinition, self.unit)
                .with_property("Cpu", self.config.cpu)
                .with_property("Memory", self.config.memory_mib)
                .with_property("NetworkMode", "awsvpc")
                .with_property("RequiresCompatibilities", PropertyValue::list(["FARGATE"]))
                .with_property(
                    "ContainerDefinitions",
                    PropertyValue::list([PropertyMap::new()
                        .with("Name", CONTAINER_NAME)
                        .with("Image", &self.config.image)
                        .with("Essential", true)
                        .with(
                            "PortMappings",
                            PropertyValue::list([
                                PropertyMap::new().with("ContainerPort", HTTP_LISTENER_PORT)
                            ]),
                        )
                        .with(
                            "Environment",
                            PropertyValue::list(environment.iter().map(|(name, value)| {
                                PropertyMap::new().with("Name", name).with("Value", value.clone())
                            })),
                        )
                        .with(
                            "Secrets",
                            PropertyValue::list(secrets.iter().map(|(name, value)| {
                                PropertyMap::new()
                                    .with("Name", name)
                                    .with("ValueFrom", value.clone())
                            })),
                        )]),
                ),
        )?;

        let grace_period_minutes = self.config.grace_period_minutes(self.phase);
        let service = set.declare(
            ResourceDeclaration::new(SERVICE_ID, ResourceKind::ContainerService, self.unit)
                .with_property("Cluster", &cluster)
                .with_property("TaskDefinition", &task)
                .with_property("LaunchType", "FARGATE")
                .with_property("DesiredCount", self.config.desired_count)
                .with_property(
                    "HealthCheckGracePeriodSeconds",
                    grace_period_minutes * 60,
                )
                .with_property(
                    "NetworkConfiguration",
                    PropertyMap::new().with(
                        "AwsvpcConfiguration",
                        PropertyMap::new()
                            .with("AssignPublicIp", "DISABLED")
                            .with("Subnets", network.subnet_ids(SubnetPlacement::Private))
                            .with(
                                "SecurityGroups",
                                PropertyValue::list([self.inputs.boundary.group_id()]),
                            ),
                    ),
                )
                .with_property(
                    "LoadBalancers",
                    PropertyValue::list([PropertyMap::new()
                        .with("ContainerName", CONTAINER_NAME)
                        .with("ContainerPort", HTTP_LISTENER_PORT)
                        .with("TargetGroupArn", &target_group)]),
                )
                .with_dependency(LISTENER_ID)
                .with_dependency(&self.inputs.database.instance_id)
                .with_dependency(&self.inputs.search.domain_id)
                .with_tag(PHASE_TAG, self.phase.to_string()),
        )?;

        let scaling_policies = self.declare_scaling(set, &cluster, &service)?;

        let mut findings = Vec::new();
        if let ListenerConfig::Http = self.config.listener {
            findings.push(Finding {
                resource: LISTENER_ID.to_string(),
                severity: Severity::Info,
                message: "storefront is served over plain HTTP".to_string(),
            });
        }

        info!(
            service = SERVICE_ID,
            phase = %self.phase,
            grace_period_minutes,
            listener_port,
            min = self.config.min_capacity,
            max = self.config.max_capacity,
            "declared Magento service"
        );

        Ok(ApplicationOutputs {
            service: ServiceDeclaration {
                logical_id: SERVICE_ID.to_string(),
                cpu: self.config.cpu,
                memory_mib: self.config.memory_mib,
                image: self.config.image.clone(),
                environment,
                secrets,
                desired_count: self.config.desired_count,
                min_capacity: self.config.min_capacity,
                max_capacity: self.config.max_capacity,
                health_check_path: self.config.health_check_path.clone(),
                grace_period_minutes,
                listener_port,
                phase: self.phase,
            },
            scaling_policies,
            load_balancer,
            application_rules,
            public_url,
            admin_url,
            findings,
        })
    }

    /// Declare the listener (and certificate plus alias for HTTPS)
    ///
    /// Returns the storefront host, public URL and admin URL.
    fn declare_listener(
        &self,
        set: &mut ResourceSet,
        lb: &AttributeRef,
        target_group: &AttributeRef,
    ) -> Result<(PropertyValue, PropertyValue, PropertyValue)> {
        let listener = ResourceDeclaration::new(LISTENER_ID, ResourceKind::Listener, self.unit)
            .with_property("LoadBalancerArn", lb)
            .with_property("Port", self.config.listener.port())
            .with_property(
                "DefaultActions",
                PropertyValue::list([PropertyMap::new()
                    .with("Type", "forward")
                    .with("TargetGroupArn", target_group)]),
            );

        match &self.config.listener {
            ListenerConfig::Http => {
                set.declare(listener.with_property("Protocol", "HTTP"))?;
                let dns = PropertyValue::from(AttributeRef::new(&lb.resource, "DNSName"));
                let url = PropertyValue::join([PropertyValue::from("http://"), dns.clone()]);
                let admin = PropertyValue::join([
                    PropertyValue::from("http://"),
                    dns.clone(),
                    PropertyValue::from("/admin"),
                ]);
                Ok((dns, url, admin))
            }
            ListenerConfig::Https {
                certificate_arn,
                domain_name,
                hosted_zone_id,
                ..
            } => {
                let certificate = set.declare(
                    ResourceDeclaration::new(CERTIFICATE_ID, ResourceKind::Certificate, self.unit)
                        .with_property("CertificateArn", certificate_arn)
                        .with_property("DomainName", domain_name),
                )?;
                set.declare(
                    listener
                        .with_property("Protocol", "HTTPS")
                        .with_property(
                            "Certificates",
                            PropertyValue::list([
                                PropertyMap::new().with("CertificateArn", &certificate)
                            ]),
                        ),
                )?;
                set.declare(
                    ResourceDeclaration::new(DNS_RECORD_ID, ResourceKind::DnsRecord, self.unit)
                        .with_property("HostedZoneId", hosted_zone_id)
                        .with_property("Name", domain_name)
                        .with_property("Type", "A")
                        .with_property(
                            "AliasTarget",
                            PropertyMap::new()
                                .with("DNSName", AttributeRef::new(&lb.resource, "DNSName"))
                                .with(
                                    "HostedZoneId",
                                    AttributeRef::new(&lb.resource, "CanonicalHostedZoneID"),
                                ),
                        ),
                )?;
                let url = format!("https://{domain_name}");
                let admin = format!("{url}/admin");
                Ok((domain_name.into(), url.into(), admin.into()))
            }
        }
    }

    fn declare_scaling(
        &self,
        set: &mut ResourceSet,
        cluster: &AttributeRef,
        service: &AttributeRef,
    ) -> Result<Vec<ScalingPolicy>> {
        let target = set.declare(
            ResourceDeclaration::new(SCALABLE_TARGET_ID, ResourceKind::ScalableTarget, self.unit)
                .with_property("MinCapacity", self.config.min_capacity)
                .with_property("MaxCapacity", self.config.max_capacity)
                .with_property("ServiceNamespace", "ecs")
                .with_property("ScalableDimension", "ecs:service:DesiredCount")
                .with_property(
                    "ResourceId",
                    PropertyValue::join([
                        PropertyValue::from("service/"),
                        PropertyValue::from(cluster),
                        PropertyValue::from("/"),
                        PropertyValue::from(AttributeRef::new(&service.resource, "Name")),
                    ]),
                ),
        )?;

        let wanted = [
            (ScalingMetric::Cpu, self.config.cpu_target_percent),
            (ScalingMetric::Memory, self.config.memory_target_percent),
        ];
        let mut policies = Vec::new();
        for (metric, target_percent) in wanted {
            let Some(target_percent) = target_percent else {
                continue;
            };
            set.declare(
                ResourceDeclaration::new(metric.logical_id(), ResourceKind::ScalingPolicy, self.unit)
                    .with_property("PolicyName", metric.logical_id())
                    .with_property("PolicyType", "TargetTrackingScaling")
                    .with_property("ScalingTargetId", &target)
                    .with_property(
                        "TargetTrackingScalingPolicyConfiguration",
                        PropertyMap::new()
                            .with("TargetValue", target_percent)
                            .with(
                                "PredefinedMetricSpecification",
                                PropertyMap::new()
                                    .with("PredefinedMetricType", metric.predefined_metric()),
                            ),
                    ),
            )?;
            policies.push(ScalingPolicy {
                logical_id: metric.logical_id().to_string(),
                metric,
                target_percent,
            });
        }
        Ok(policies)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, NetworkConfig, SearchConfig};
    use crate::database::DatabaseBuilder;
    use crate::network::NetworkBuilder;
    use crate::policy::{BoundaryPlacement, RuleStrategy};
    use crate::resource::{DeployableUnit, REF};
    use crate::search::SearchBuilder;
    use rstest::rstest;

    const ROOT: &str = "MagentoPlatform";

    fn compose(
        config: &ApplicationConfig,
        phase: DeploymentPhase,
    ) -> (ResourceSet, ApplicationOutputs) {
        let mut set = ResourceSet::new();
        set.add_unit(DeployableUnit::root(ROOT)).unwrap();
        let network = NetworkBuilder::new(&NetworkConfig::default(), ROOT, ROOT)
            .build(&mut set)
            .unwrap();
        let placement = BoundaryPlacement::shared(ROOT);
        let access = AccessPolicyBuilder::new(&network, &placement);
        let policies = access.build(&mut set).unwrap();
        let database =
            DatabaseBuilder::new(&DatabaseConfig::default(), &network, &policies.database, ROOT)
                .build(&mut set)
                .unwrap();
        let search = SearchBuilder::new(&SearchConfig::default(), &network, &policies.search, ROOT)
            .build(&mut set)
            .unwrap();
        let inputs = ApplicationInputs {
            network: &network,
            access: &access,
            boundary: &policies.application,
            database: &database,
            search: &search,
        };
        let outputs = ApplicationBuilder::new(config, phase, inputs, ROOT)
            .build(&mut set)
            .unwrap();
        (set, outputs)
    }

    fn https() -> ApplicationConfig {
        ApplicationConfig {
            listener: ListenerConfig::Https {
                certificate_arn: "arn:aws:acm:us-east-1:123456789012:certificate/abc".to_string(),
                domain_name: "shop.example.com".to_string(),
                hosted_zone_id: "Z123456".to_string(),
                hosted_zone_name: "example.com".to_string(),
            },
            ..Default::default()
        }
    }

    // =========================================================================
    // Story: The Container Environment Contract
    // =========================================================================

    #[test]
    fn story_first_boot_environment_is_exact() {
        let (_, outputs) = compose(&ApplicationConfig::default(), DeploymentPhase::FirstBoot);
        let env = &outputs.service.environment;

        let names: Vec<&str> = env.keys().map(String::as_str).collect();
        let mut expected = vec![
            "APACHE_HTTP_PORT_NUMBER",
            "BITNAMI_DEBUG",
            "MAGENTO_DATABASE_HOST",
            "MAGENTO_DATABASE_NAME",
            "MAGENTO_DATABASE_PORT_NUMBER",
            "MAGENTO_DEPLOY_STATIC_CONTENT",
            "MAGENTO_ELASTICSEARCH_HOST",
            "MAGENTO_ELASTICSEARCH_PORT_NUMBER",
            "MAGENTO_ELASTICSEARCH_USE_HTTPS",
            "MAGENTO_EMAIL",
            "MAGENTO_EXTERNAL_HTTP_PORT_NUMBER",
            "MAGENTO_EXTRA_INSTALL_ARGS",
            "MAGENTO_HOST",
            "MAGENTO_SEARCH_ENGINE",
            "MAGENTO_USERNAME",
        ];
        expected.sort_unstable();
        assert_eq!(names, expected);

        assert_eq!(env["MAGENTO_DATABASE_PORT_NUMBER"].as_str(), Some("3306"));
        assert_eq!(env["MAGENTO_ELASTICSEARCH_PORT_NUMBER"].as_str(), Some("443"));
        assert_eq!(env["APACHE_HTTP_PORT_NUMBER"].as_str(), Some("80"));
        assert_eq!(env["MAGENTO_DATABASE_NAME"].as_str(), Some("MagentoDB"));
        assert_eq!(env["BITNAMI_DEBUG"].as_str(), Some("true"));
    }

    #[test]
    fn story_endpoints_arrive_as_references() {
        let (_, outputs) = compose(&ApplicationConfig::default(), DeploymentPhase::FirstBoot);
        let env = &outputs.service.environment;

        assert_eq!(
            env["MAGENTO_DATABASE_HOST"].as_ref_attr(),
            Some(&AttributeRef::new("MariaDBInstance", "Endpoint.Address"))
        );
        assert_eq!(
            env["MAGENTO_ELASTICSEARCH_HOST"].as_ref_attr(),
            Some(&AttributeRef::new("MagentoESDomain", "DomainEndpoint"))
        );
        assert_eq!(
            env["MAGENTO_HOST"].as_ref_attr(),
            Some(&AttributeRef::new(LOAD_BALANCER_ID, "DNSName"))
        );
    }

    #[test]
    fn story_credentials_come_from_the_secret_store() {
        let (set, outputs) = compose(&ApplicationConfig::default(), DeploymentPhase::FirstBoot);
        let secrets = &outputs.service.secrets;

        assert_eq!(
            secrets["MAGENTO_DATABASE_PASSWORD"],
            PropertyValue::join([
                PropertyValue::from(AttributeRef::new("MariaDBInstanceSecret", REF)),
                PropertyValue::from(":password::"),
            ])
        );
        assert_eq!(
            secrets["MAGENTO_PASSWORD"].as_ref_attr(),
            Some(&AttributeRef::new(APP_SECRET_ID, REF))
        );
        assert!(!outputs.service.environment.contains_key("MAGENTO_PASSWORD"));

        let container = &set.get(TASK_DEFINITION_ID).unwrap().properties["ContainerDefinitions"]
            .items()[0];
        assert_eq!(container.get("Secrets").unwrap().items().len(), 3);
    }

    // =========================================================================
    // Story: Deployment Phase Drives Bootstrap And Grace Period
    // =========================================================================

    #[test]
    fn story_first_boot_and_steady_are_distinguishable() {
        let config = ApplicationConfig::default();
        let (first_set, first) = compose(&config, DeploymentPhase::FirstBoot);
        let (steady_set, steady) = compose(&config, DeploymentPhase::Steady);

        assert!(!first.service.environment.contains_key("MAGENTO_SKIP_BOOTSTRAP"));
        assert_eq!(
            steady.service.environment["MAGENTO_SKIP_BOOTSTRAP"].as_str(),
            Some("yes")
        );
        assert_eq!(
            steady.service.environment["MAGENTO_SKIP_REINDEX"].as_str(),
            Some("yes")
        );

        let grace = |set: &ResourceSet| {
            set.get(SERVICE_ID).unwrap().properties["HealthCheckGracePeriodSeconds"].as_i64()
        };
        assert_eq!(grace(&first_set), Some(3000 * 60));
        assert_eq!(grace(&steady_set), Some(5 * 60));
        assert_eq!(
            steady_set.get(SERVICE_ID).unwrap().tags[PHASE_TAG],
            "steady"
        );
    }

    #[test]
    fn story_bootstrapping_keeps_long_grace_period() {
        let (_, outputs) = compose(&ApplicationConfig::default(), DeploymentPhase::Bootstrapping);
        assert_eq!(outputs.service.grace_period_minutes, 3000);
        assert!(!outputs.service.environment.contains_key("MAGENTO_SKIP_REINDEX"));
    }

    // =========================================================================
    // Story: Scaling Policies Are Independent
    // =========================================================================

    #[test]
    fn story_cpu_and_memory_policies_are_independent() {
        let (set, outputs) = compose(&ApplicationConfig::default(), DeploymentPhase::FirstBoot);

        let target = set.get(SCALABLE_TARGET_ID).unwrap();
        assert_eq!(target.properties["MinCapacity"].as_i64(), Some(1));
        assert_eq!(target.properties["MaxCapacity"].as_i64(), Some(4));

        assert_eq!(outputs.scaling_policies.len(), 2);
        for policy in &outputs.scaling_policies {
            assert_eq!(policy.target_percent, 70);
            let decl = set.get(&policy.logical_id).unwrap();
            let deps: Vec<String> = decl.dependencies().into_iter().collect();
            assert_eq!(deps, vec![SCALABLE_TARGET_ID.to_string()]);
        }
        assert_eq!(outputs.scaling_policies[0].metric, ScalingMetric::Cpu);
        assert_eq!(outputs.scaling_policies[1].metric, ScalingMetric::Memory);
    }

    #[rstest]
    #[case::no_memory_target(Some(70), None, "CpuScaling", "MemoryScaling")]
    #[case::no_cpu_target(None, Some(70), "MemoryScaling", "CpuScaling")]
    fn story_absent_target_drops_only_that_policy(
        #[case] cpu_target_percent: Option<u8>,
        #[case] memory_target_percent: Option<u8>,
        #[case] kept: &str,
        #[case] dropped: &str,
    ) {
        let config = ApplicationConfig {
            cpu_target_percent,
            memory_target_percent,
            ..Default::default()
        };
        let (set, outputs) = compose(&config, DeploymentPhase::FirstBoot);
        assert_eq!(outputs.scaling_policies.len(), 1);
        assert!(set.get(kept).is_some());
        assert!(set.get(dropped).is_none());
    }

    // =========================================================================
    // Story: Service Placement And Ordering
    // =========================================================================

    #[test]
    fn story_service_waits_for_backends_and_listener() {
        let (set, _) = compose(&ApplicationConfig::default(), DeploymentPhase::FirstBoot);
        let service = set.get(SERVICE_ID).unwrap();

        for dep in [LISTENER_ID, "MariaDBInstance", "MagentoESDomain"] {
            assert!(service.depends_on.contains(dep), "{dep}");
        }
        let subnets = service.properties["NetworkConfiguration"]
            .get("AwsvpcConfiguration")
            .and_then(|c| c.get("Subnets"))
            .unwrap();
        assert!(subnets.items().iter().all(|s| s
            .as_ref_attr()
            .is_some_and(|r| r.resource.contains("PrivateSubnet"))));

        let lb = set.get(LOAD_BALANCER_ID).unwrap();
        assert!(lb.properties["Subnets"].items().iter().all(|s| s
            .as_ref_attr()
            .is_some_and(|r| r.resource.contains("PublicSubnet"))));
        assert_eq!(lb.properties["Name"].as_str(), Some("magento-lb"));
    }

    #[test]
    fn story_load_balancer_reaches_tasks_on_container_port() {
        let (set, outputs) = compose(&ApplicationConfig::default(), DeploymentPhase::FirstBoot);

        assert_eq!(outputs.load_balancer.rules.len(), 1);
        assert_eq!(outputs.load_balancer.rules[0].strategy, RuleStrategy::Internet);
        assert_eq!(outputs.load_balancer.rules[0].from_port, 80);

        let rule = &outputs.application_rules[0];
        assert_eq!(rule.strategy, RuleStrategy::PeerBoundary);
        assert_eq!(rule.from_port, 80);
        assert!(set.get(&rule.logical_id).is_some());
    }

    // =========================================================================
    // Story: HTTP And HTTPS Listeners
    // =========================================================================

    #[test]
    fn story_http_listener_publishes_load_balancer_url() {
        let (set, outputs) = compose(&ApplicationConfig::default(), DeploymentPhase::FirstBoot);

        let listener = set.get(LISTENER_ID).unwrap();
        assert_eq!(listener.properties["Port"].as_i64(), Some(80));
        assert_eq!(listener.properties["Protocol"].as_str(), Some("HTTP"));
        assert!(set.get(CERTIFICATE_ID).is_none());
        assert!(set.get(DNS_RECORD_ID).is_none());

        let dns = PropertyValue::from(AttributeRef::new(LOAD_BALANCER_ID, "DNSName"));
        assert_eq!(
            outputs.public_url,
            PropertyValue::join([PropertyValue::from("http://"), dns])
        );
        assert_eq!(outputs.findings.len(), 1);
        assert_eq!(outputs.findings[0].severity, Severity::Info);
    }

    #[test]
    fn story_https_listener_uses_domain() {
        let (set, outputs) = compose(&https(), DeploymentPhase::FirstBoot);

        let listener = set.get(LISTENER_ID).unwrap();
        assert_eq!(listener.properties["Port"].as_i64(), Some(443));
        assert_eq!(listener.properties["Protocol"].as_str(), Some("HTTPS"));
        assert!(set.get(CERTIFICATE_ID).is_some());

        let record = set.get(DNS_RECORD_ID).unwrap();
        assert_eq!(record.properties["Name"].as_str(), Some("shop.example.com"));

        assert_eq!(
            outputs.service.environment["MAGENTO_HOST"].as_str(),
            Some("shop.example.com")
        );
        assert_eq!(outputs.public_url.as_str(), Some("https://shop.example.com"));
        assert_eq!(outputs.admin_url.as_str(), Some("https://shop.example.com/admin"));
        assert_eq!(outputs.load_balancer.rules[0].from_port, 443);
        assert_eq!(outputs.service.listener_port, 443);
        assert!(outputs.findings.is_empty());
    }
}
