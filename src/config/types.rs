//! Supporting types for the platform configuration

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resource::RemovalPolicy;
use crate::{Error, Result};

// =============================================================================
// Layout and Phase
// =============================================================================

/// How declarations are split into deployable units
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StackLayout {
    /// Everything in one unit
    Single,
    /// Network root unit with nested database, search and application units
    #[default]
    Nested,
}

impl std::fmt::Display for StackLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Nested => write!(f, "nested"),
        }
    }
}

/// Lifecycle phase of the Magento application
///
/// FirstBoot and Bootstrapping run the database schema install and search
/// reindex inside the container, so health checks must tolerate a very slow
/// start. Steady skips both and expects fast health checks.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentPhase {
    /// Nothing has been initialized yet
    #[default]
    FirstBoot,
    /// The first boot is running schema install and reindex
    Bootstrapping,
    /// Bootstrap has completed; later boots skip it
    Steady,
}

impl DeploymentPhase {
    /// Whether the container should skip the schema bootstrap and reindex
    pub fn skips_bootstrap(&self) -> bool {
        matches!(self, Self::Steady)
    }

    /// Whether moving to `next` is an allowed transition
    ///
    /// Phases advance one step at a time. Re-applying the current phase is a
    /// no-op, and any phase may fall back to FirstBoot for a rebuild.
    pub fn can_transition_to(&self, next: DeploymentPhase) -> bool {
        use DeploymentPhase::*;
        *self == next
            || next == FirstBoot
            || matches!((self, next), (FirstBoot, Bootstrapping) | (Bootstrapping, Steady))
    }

    /// Validate a transition to `next`
    pub fn transition_to(&self, next: DeploymentPhase) -> Result<PhaseTransition> {
        if !self.can_transition_to(next) {
            return Err(Error::validation(format!(
                "cannot move deployment phase from {self} to {next}"
            )));
        }
        Ok(PhaseTransition {
            from: *self,
            to: next,
        })
    }
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstBoot => write!(f, "first-boot"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::Steady => write!(f, "steady"),
        }
    }
}

impl std::str::FromStr for DeploymentPhase {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-boot" | "firstboot" => Ok(Self::FirstBoot),
            "bootstrapping" => Ok(Self::Bootstrapping),
            "steady" => Ok(Self::Steady),
            _ => Err(Error::validation(format!(
                "invalid deployment phase: {s}, expected one of: first-boot, bootstrapping, steady"
            ))),
        }
    }
}

/// A validated phase change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTransition {
    /// Phase before the change
    pub from: DeploymentPhase,
    /// Phase after the change
    pub to: DeploymentPhase,
}

impl PhaseTransition {
    /// Whether the transition changes anything
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

// =============================================================================
// Network
// =============================================================================

/// Network topology configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// Number of availability zones to span
    pub max_azs: u8,
    /// Address space for the VPC
    pub cidr: String,
    /// Region the zones belong to
    pub region: String,
    /// Explicit zone names; derived from the region when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zones: Option<Vec<String>>,
    /// Number of NAT gateways (default: one per zone)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nat_gateways: Option<u8>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: 3,
            cidr: "10.0.0.0/16".to_string(),
            region: "us-east-1".to_string(),
            availability_zones: None,
            nat_gateways: None,
        }
    }
}

/// Which subnet tier a resource is placed in
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetPlacement {
    /// Internet-routable subnets
    Public,
    /// NAT-routed private subnets
    #[default]
    Private,
}

// =============================================================================
// Database
// =============================================================================

/// Relational database engine
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    /// MariaDB
    #[default]
    Mariadb,
    /// MySQL
    Mysql,
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mariadb => write!(f, "mariadb"),
            Self::Mysql => write!(f, "mysql"),
        }
    }
}

/// Managed database configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    /// Engine kind
    pub engine: DatabaseEngine,
    /// Engine version (e.g. "10.4")
    pub engine_version: String,
    /// Instance class (e.g. "db.t3.large")
    pub instance_class: String,
    /// Schema created on the instance
    pub database_name: String,
    /// Admin user; the password is always generated
    pub admin_username: String,
    /// Standby in a second zone
    pub multi_az: bool,
    /// Allocated storage in GB
    pub allocated_storage_gb: u32,
    /// Subnet tier for the instance
    pub subnets: SubnetPlacement,
    /// Teardown behaviour
    pub removal_policy: RemovalPolicy,
    /// Block deletion at the control plane
    pub deletion_protection: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::Mariadb,
            engine_version: "10.4".to_string(),
            instance_class: "db.t3.large".to_string(),
            database_name: "MagentoDB".to_string(),
            admin_username: "magento_db_admin".to_string(),
            multi_az: true,
            allocated_storage_gb: 20,
            subnets: SubnetPlacement::Private,
            removal_policy: RemovalPolicy::Destroy,
            deletion_protection: false,
        }
    }
}

// =============================================================================
// Search
// =============================================================================

/// Resource policy attached to the search domain
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SearchAccessPolicy {
    /// Any principal may perform any action; only the isolation boundary
    /// restricts who can reach the domain
    #[default]
    OpenWithinNetwork,
    /// Only the listed principals may perform the listed actions
    Principals {
        /// Principal ARNs
        principals: Vec<String>,
        /// Allowed actions
        #[serde(default = "default_search_actions")]
        actions: Vec<String>,
    },
}

fn default_search_actions() -> Vec<String> {
    vec!["es:ESHttp*".to_string()]
}

impl SearchAccessPolicy {
    /// Whether the policy grants every principal access
    pub fn is_wildcard(&self) -> bool {
        match self {
            Self::OpenWithinNetwork => true,
            Self::Principals { principals, .. } => principals.iter().any(|p| p == "*"),
        }
    }
}

/// Managed search domain configuration
///
/// Encryption at rest, node-to-node encryption and HTTPS are always enabled
/// and cannot be configured off.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    /// Engine version (e.g. "OpenSearch_1.2")
    pub engine_version: String,
    /// Number of data nodes
    pub data_nodes: u32,
    /// Data node instance type
    pub instance_type: String,
    /// EBS volume size per node in GB
    pub volume_size_gb: u32,
    /// EBS volume type
    pub volume_type: String,
    /// Number of zones the nodes are spread over
    pub zone_awareness: u8,
    /// Domain resource policy
    pub access_policy: SearchAccessPolicy,
    /// Teardown behaviour
    pub removal_policy: RemovalPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine_version: "OpenSearch_1.2".to_string(),
            data_nodes: 2,
            instance_type: "r6g.large.search".to_string(),
            volume_size_gb: 100,
            volume_type: "gp2".to_string(),
            zone_awareness: 2,
            access_policy: SearchAccessPolicy::OpenWithinNetwork,
            removal_policy: RemovalPolicy::Destroy,
        }
    }
}

// =============================================================================
// Application
// =============================================================================

/// Load balancer listener
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ListenerConfig {
    /// Plain HTTP on port 80
    #[default]
    Http,
    /// HTTPS on port 443 with an existing certificate and a DNS alias
    Https {
        /// ARN of an existing certificate
        #[serde(rename = "certificateArn")]
        certificate_arn: String,
        /// Fully-qualified domain the storefront is served on
        #[serde(rename = "domainName")]
        domain_name: String,
        /// Hosted zone that receives the alias record
        #[serde(rename = "hostedZoneId")]
        hosted_zone_id: String,
        /// Name of the hosted zone
        #[serde(rename = "hostedZoneName")]
        hosted_zone_name: String,
    },
}

impl ListenerConfig {
    /// Listener port on the load balancer
    pub fn port(&self) -> u16 {
        match self {
            Self::Http => crate::HTTP_LISTENER_PORT,
            Self::Https { .. } => crate::HTTPS_LISTENER_PORT,
        }
    }

    /// URL scheme of the public endpoint
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https { .. } => "https",
        }
    }
}

/// Settings handed to the Magento container
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MagentoSettings {
    /// Storefront admin user
    pub username: String,
    /// Storefront admin email
    pub email: String,
    /// Verbose container logging
    pub debug: bool,
    /// Extra arguments for the Magento installer
    pub extra_install_args: String,
    /// Search engine identifier understood by Magento
    pub search_engine: String,
    /// Deploy static content at boot
    pub deploy_static_content: bool,
}

impl Default for MagentoSettings {
    fn default() -> Self {
        Self {
            username: "magento_user".to_string(),
            email: "magento_user@example.com".to_string(),
            debug: true,
            extra_install_args: "--enable-debug-logging=true".to_string(),
            search_engine: "elasticsearch7".to_string(),
            deploy_static_content: true,
        }
    }
}

/// Application service configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationConfig {
    /// Container image
    pub image: String,
    /// Task CPU units
    pub cpu: u32,
    /// Task memory in MiB
    pub memory_mib: u32,
    /// Tasks started initially
    pub desired_count: u32,
    /// Lower scaling bound
    pub min_capacity: u32,
    /// Upper scaling bound
    pub max_capacity: u32,
    /// CPU target utilization; no CPU policy when null
    pub cpu_target_percent: Option<u8>,
    /// Memory target utilization; no memory policy when null
    pub memory_target_percent: Option<u8>,
    /// Target group health check path
    pub health_check_path: String,
    /// Grace period while bootstrapping
    pub bootstrap_grace_period_minutes: u32,
    /// Grace period in steady state
    pub steady_grace_period_minutes: u32,
    /// Load balancer name
    pub load_balancer_name: String,
    /// Listener protocol
    pub listener: ListenerConfig,
    /// Container settings
    pub magento: MagentoSettings,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            image: crate::DEFAULT_MAGENTO_IMAGE.to_string(),
            cpu: 2048,
            memory_mib: 4096,
            desired_count: 1,
            min_capacity: 1,
            max_capacity: 4,
            cpu_target_percent: Some(70),
            memory_target_percent: Some(70),
            health_check_path: "/pub/health_check.php".to_string(),
            bootstrap_grace_period_minutes: crate::DEFAULT_BOOTSTRAP_GRACE_MINUTES,
            steady_grace_period_minutes: crate::DEFAULT_STEADY_GRACE_MINUTES,
            load_balancer_name: "magento-lb".to_string(),
            listener: ListenerConfig::Http,
            magento: MagentoSettings::default(),
        }
    }
}

impl ApplicationConfig {
    /// Health-check grace period for the given phase
    pub fn grace_period_minutes(&self, phase: DeploymentPhase) -> u32 {
        if phase.skips_bootstrap() {
            self.steady_grace_period_minutes
        } else {
            self.bootstrap_grace_period_minutes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // =========================================================================
    // Story: Deployment Phase Transitions Are Explicit
    // =========================================================================

    #[rstest]
    #[case::first_boot_starts_bootstrap(DeploymentPhase::FirstBoot, DeploymentPhase::Bootstrapping)]
    #[case::bootstrap_completes(DeploymentPhase::Bootstrapping, DeploymentPhase::Steady)]
    #[case::steady_reapplied(DeploymentPhase::Steady, DeploymentPhase::Steady)]
    #[case::rebuild_from_steady(DeploymentPhase::Steady, DeploymentPhase::FirstBoot)]
    fn story_allowed_phase_transitions(
        #[case] from: DeploymentPhase,
        #[case] to: DeploymentPhase,
    ) {
        let transition = from.transition_to(to).unwrap();
        assert_eq!(transition.from, from);
        assert_eq!(transition.to, to);
    }

    #[rstest]
    #[case::skip_bootstrap(DeploymentPhase::FirstBoot, DeploymentPhase::Steady)]
    #[case::back_to_bootstrapping(DeploymentPhase::Steady, DeploymentPhase::Bootstrapping)]
    fn story_rejected_phase_transitions(
        #[case] from: DeploymentPhase,
        #[case] to: DeploymentPhase,
    ) {
        let err = from.transition_to(to).unwrap_err();
        assert!(err.to_string().contains("cannot move deployment phase"));
    }

    #[test]
    fn story_only_steady_skips_bootstrap() {
        assert!(!DeploymentPhase::FirstBoot.skips_bootstrap());
        assert!(!DeploymentPhase::Bootstrapping.skips_bootstrap());
        assert!(DeploymentPhase::Steady.skips_bootstrap());
    }

    #[test]
    fn story_grace_period_follows_phase() {
        let app = ApplicationConfig::default();
        assert_eq!(app.grace_period_minutes(DeploymentPhase::FirstBoot), 3000);
        assert_eq!(app.grace_period_minutes(DeploymentPhase::Bootstrapping), 3000);
        assert_eq!(app.grace_period_minutes(DeploymentPhase::Steady), 5);
    }

    #[test]
    fn phase_parses_from_cli_strings() {
        assert_eq!(
            "steady".parse::<DeploymentPhase>().unwrap(),
            DeploymentPhase::Steady
        );
        assert_eq!(
            "First-Boot".parse::<DeploymentPhase>().unwrap(),
            DeploymentPhase::FirstBoot
        );
        assert!("done".parse::<DeploymentPhase>().is_err());
    }

    // =========================================================================
    // Story: Tagged Variants Read Naturally in YAML
    // =========================================================================

    #[test]
    fn https_listener_from_yaml() {
        let yaml = r#"
protocol: https
certificateArn: arn:aws:acm:us-east-1:123456789012:certificate/abc
domainName: shop.example.com
hostedZoneId: Z123
hostedZoneName: example.com
"#;
        let listener: ListenerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(listener.port(), 443);
        assert_eq!(listener.scheme(), "https");
        match listener {
            ListenerConfig::Https { domain_name, .. } => assert_eq!(domain_name, "shop.example.com"),
            ListenerConfig::Http => panic!("Expected Https listener"),
        }
    }

    #[test]
    fn principals_policy_defaults_actions() {
        let yaml = r#"
type: principals
principals:
  - arn:aws:iam::123456789012:role/magento-task
"#;
        let policy: SearchAccessPolicy = serde_yaml::from_str(yaml).unwrap();
        assert!(!policy.is_wildcard());
        match policy {
            SearchAccessPolicy::Principals { actions, .. } => {
                assert_eq!(actions, vec!["es:ESHttp*".to_string()])
            }
            SearchAccessPolicy::OpenWithinNetwork => panic!("Expected Principals policy"),
        }
    }

    #[test]
    fn open_policy_is_wildcard() {
        assert!(SearchAccessPolicy::OpenWithinNetwork.is_wildcard());
        let star = SearchAccessPolicy::Principals {
            principals: vec!["*".to_string()],
            actions: default_search_actions(),
        };
        assert!(star.is_wildcard());
    }
}
