//! Platform configuration
//!
//! [`PlatformConfig`] is the single input to the compiler. Every field has a
//! default matching the reference Magento deployment, so an empty YAML document
//! is a valid configuration. [`PlatformConfig::validate`] catches malformed
//! property combinations before any resource is declared.

mod types;

pub use types::{
    ApplicationConfig, DatabaseConfig, DatabaseEngine, DeploymentPhase, ListenerConfig,
    MagentoSettings, NetworkConfig, PhaseTransition, SearchAccessPolicy, SearchConfig,
    StackLayout, SubnetPlacement,
};

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// Maximum number of availability zones a topology may span
pub const MAX_ZONES: u8 = 6;

/// Fargate CPU units and the memory sizes (MiB) each supports: (min, max, step)
const FARGATE_SHAPES: &[(u32, u32, u32, u32)] = &[
    (512, 1024, 4096, 1024),
    (1024, 2048, 8192, 1024),
    (2048, 4096, 16384, 1024),
    (4096, 8192, 30720, 1024),
    (8192, 16384, 61440, 4096),
    (16384, 32768, 122880, 8192),
];

/// Complete description of one Magento platform deployment
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformConfig {
    /// Platform name; used as the root unit id
    pub name: String,
    /// How declarations are split into deployable units
    pub layout: StackLayout,
    /// Application lifecycle phase
    pub phase: DeploymentPhase,
    /// Network topology
    pub network: NetworkConfig,
    /// Managed database
    pub database: DatabaseConfig,
    /// Managed search domain
    pub search: SearchConfig,
    /// Magento service
    pub application: ApplicationConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "MagentoPlatform".to_string(),
            layout: StackLayout::default(),
            phase: DeploymentPhase::default(),
            network: NetworkConfig::default(),
            database: DatabaseConfig::default(),
            search: SearchConfig::default(),
            application: ApplicationConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Parse a configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization(format!("invalid platform config: {e}")))
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Serialize the configuration back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// JSON schema of the configuration document
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PlatformConfig)
    }

    /// Move the application to another lifecycle phase
    ///
    /// The transition is validated and logged; the returned value records what
    /// changed so callers can surface it.
    pub fn promote(&mut self, next: DeploymentPhase) -> Result<PhaseTransition> {
        let transition = self.phase.transition_to(next)?;
        if !transition.is_noop() {
            info!(
                platform = %self.name,
                from = %transition.from,
                to = %transition.to,
                "deployment phase changed"
            );
        }
        self.phase = next;
        Ok(transition)
    }

    /// Number of zones the topology spans
    pub fn zone_count(&self) -> usize {
        match &self.network.availability_zones {
            Some(zones) => zones.len(),
            None => self.network.max_azs as usize,
        }
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        validate_identifier("name", &self.name)?;
        self.validate_network()?;
        self.validate_database()?;
        self.validate_search()?;
        self.validate_application()
    }

    fn validate_network(&self) -> Result<()> {
        let net = &self.network;
        let zones = self.zone_count();
        if zones == 0 {
            return Err(Error::validation("network must span at least 1 zone"));
        }
        if zones > MAX_ZONES as usize {
            return Err(Error::validation(format!(
                "network may span at most {MAX_ZONES} zones, got {zones}"
            )));
        }
        if let Some(explicit) = &net.availability_zones {
            let mut unique = explicit.clone();
            unique.sort();
            unique.dedup();
            if unique.len() != explicit.len() {
                return Err(Error::validation("availabilityZones contains duplicates"));
            }
        }
        if let Some(nat) = net.nat_gateways {
            if nat == 0 || nat as usize > zones {
                return Err(Error::validation(format!(
                    "natGateways must be between 1 and the zone count ({zones}), got {nat}"
                )));
            }
        }
        if net.region.trim().is_empty() {
            return Err(Error::validation("network region cannot be empty"));
        }
        crate::network::Ipv4Cidr::parse(&net.cidr)?;
        Ok(())
    }

    fn validate_database(&self) -> Result<()> {
        let db = &self.database;
        if db.engine_version.trim().is_empty() {
            return Err(Error::validation("database engineVersion cannot be empty"));
        }
        if !db.instance_class.starts_with("db.") {
            return Err(Error::validation(format!(
                "database instanceClass '{}' must start with 'db.'",
                db.instance_class
            )));
        }
        validate_identifier("database databaseName", &db.database_name)?;
        validate_identifier("database adminUsername", &db.admin_username)?;
        if db.multi_az && self.zone_count() < 2 {
            return Err(Error::validation(
                "database multiAz requires the network to span at least 2 zones",
            ));
        }
        if db.allocated_storage_gb < 20 {
            return Err(Error::validation(format!(
                "database allocatedStorageGb must be at least 20, got {}",
                db.allocated_storage_gb
            )));
        }
        Ok(())
    }

    fn validate_search(&self) -> Result<()> {
        let search = &self.search;
        if search.engine_version.trim().is_empty() {
            return Err(Error::validation("search engineVersion cannot be empty"));
        }
        if search.data_nodes == 0 {
            return Err(Error::validation("search dataNodes must be at least 1"));
        }
        if !(1..=3).contains(&search.zone_awareness) {
            return Err(Error::validation(format!(
                "search zoneAwareness must be 1, 2 or 3, got {}",
                search.zone_awareness
            )));
        }
        if search.zone_awareness as usize > self.zone_count() {
            return Err(Error::validation(format!(
                "search zoneAwareness ({}) exceeds the network zone count ({})",
                search.zone_awareness,
                self.zone_count()
            )));
        }
        if search.data_nodes % search.zone_awareness as u32 != 0 {
            return Err(Error::validation(format!(
                "search dataNodes ({}) must be a multiple of zoneAwareness ({})",
                search.data_nodes, search.zone_awareness
            )));
        }
        if search.volume_size_gb == 0 {
            return Err(Error::validation("search volumeSizeGb must be positive"));
        }
        if let SearchAccessPolicy::Principals {
            principals,
            actions,
        } = &search.access_policy
        {
            if principals.is_empty() {
                return Err(Error::validation(
                    "search accessPolicy principals cannot be empty",
                ));
            }
            if actions.is_empty() {
                return Err(Error::validation(
                    "search accessPolicy actions cannot be empty",
                ));
            }
        }
        Ok(())
    }

    fn validate_application(&self) -> Result<()> {
        let app = &self.application;
        if app.image.trim().is_empty() {
            return Err(Error::validation("application image cannot be empty"));
        }
        validate_fargate_shape(app.cpu, app.memory_mib)?;
        if app.min_capacity == 0 {
            return Err(Error::validation("application minCapacity must be at least 1"));
        }
        if app.max_capacity < app.min_capacity {
            return Err(Error::validation(format!(
                "application maxCapacity ({}) must be >= minCapacity ({})",
                app.max_capacity, app.min_capacity
            )));
        }
        if app.desired_count < app.min_capacity || app.desired_count > app.max_capacity {
            return Err(Error::validation(format!(
                "application desiredCount ({}) must be within [{}, {}]",
                app.desired_count, app.min_capacity, app.max_capacity
            )));
        }
        for (metric, target) in [
            ("cpuTargetPercent", app.cpu_target_percent),
            ("memoryTargetPercent", app.memory_target_percent),
        ] {
            if let Some(t) = target {
                if !(1..=100).contains(&t) {
                    return Err(Error::validation(format!(
                        "application {metric} must be within 1..=100, got {t}"
                    )));
                }
            }
        }
        if !app.health_check_path.starts_with('/') {
            return Err(Error::validation(format!(
                "application healthCheckPath '{}' must start with '/'",
                app.health_check_path
            )));
        }
        if app.bootstrap_grace_period_minutes < crate::MIN_BOOTSTRAP_GRACE_MINUTES {
            return Err(Error::validation(format!(
                "application bootstrapGracePeriodMinutes must be at least {} to survive first boot, got {}",
                crate::MIN_BOOTSTRAP_GRACE_MINUTES,
                app.bootstrap_grace_period_minutes
            )));
        }
        for (field, minutes) in [
            ("bootstrapGracePeriodMinutes", app.bootstrap_grace_period_minutes),
            ("steadyGracePeriodMinutes", app.steady_grace_period_minutes),
        ] {
            if minutes > crate::MAX_GRACE_PERIOD_MINUTES {
                return Err(Error::validation(format!(
                    "application {field} must be at most {}, got {minutes}",
                    crate::MAX_GRACE_PERIOD_MINUTES
                )));
            }
        }
        if app.steady_grace_period_minutes >= app.bootstrap_grace_period_minutes {
            return Err(Error::validation(format!(
                "application steadyGracePeriodMinutes ({}) must be below bootstrapGracePeriodMinutes ({})",
                app.steady_grace_period_minutes, app.bootstrap_grace_period_minutes
            )));
        }
        if app.load_balancer_name.is_empty()
            || app.load_balancer_name.len() > 32
            || !app
                .load_balancer_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::validation(format!(
                "application loadBalancerName '{}' must be 1-32 alphanumeric or '-' characters",
                app.load_balancer_name
            )));
        }
        if let ListenerConfig::Https {
            certificate_arn,
            domain_name,
            hosted_zone_id,
            hosted_zone_name,
        } = &app.listener
        {
            if !certificate_arn.starts_with("arn:") {
                return Err(Error::validation(format!(
                    "listener certificateArn '{certificate_arn}' is not an ARN"
                )));
            }
            if hosted_zone_id.is_empty() {
                return Err(Error::validation("listener hostedZoneId cannot be empty"));
            }
            let zone = hosted_zone_name.trim_end_matches('.');
            if zone.is_empty() || !(domain_name == zone || domain_name.ends_with(&format!(".{zone}")))
            {
                return Err(Error::validation(format!(
                    "listener domainName '{domain_name}' is not inside hosted zone '{hosted_zone_name}'"
                )));
            }
        }
        Ok(())
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_with_letter || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::validation(format!(
            "{field} '{value}' must start with a letter and contain only letters, digits or '_'"
        )));
    }
    Ok(())
}

/// Check a CPU/memory pair against the supported Fargate task shapes
pub fn validate_fargate_shape(cpu: u32, memory_mib: u32) -> Result<()> {
    if cpu == 256 {
        return match memory_mib {
            512 | 1024 | 2048 => Ok(()),
            _ => Err(Error::validation(format!(
                "application memoryMib {memory_mib} is not valid for cpu 256 (expected 512, 1024 or 2048)"
            ))),
        };
    }
    let Some(&(_, min, max, step)) = FARGATE_SHAPES.iter().find(|(c, ..)| *c == cpu) else {
        return Err(Error::validation(format!(
            "application cpu {cpu} is not a supported task size"
        )));
    };
    let in_range = (min..=max).contains(&memory_mib) && (memory_mib - min) % step == 0;
    if !in_range {
        return Err(Error::validation(format!(
            "application memoryMib {memory_mib} is not valid for cpu {cpu} (expected {min}..={max} in steps of {step})"
        )));
    }
    Ok(())
}
