//! Managed relational database provisioner
//!
//! Declares a generated admin credential and a database instance bound to the
//! network and the database isolation boundary. The admin password never
//! appears in the plan: the instance takes the secret handle and the control
//! plane fills in the generated value.

use tracing::info;

use crate::config::DatabaseConfig;
use crate::network::NetworkTopology;
use crate::policy::IsolationBoundary;
use crate::resource::{
    AttributeRef, PropertyMap, PropertyValue, ResourceDeclaration, ResourceKind, ResourceSet,
};
use crate::{Result, DATABASE_PORT};

/// Logical id of the database instance
pub const DATABASE_INSTANCE_ID: &str = "MariaDBInstance";

/// Logical id of the generated admin credential
pub const DATABASE_SECRET_ID: &str = "MariaDBInstanceSecret";

/// Key of the admin username inside the credential secret
pub const SECRET_USERNAME_KEY: &str = "username";

/// Key of the generated password inside the credential secret
pub const SECRET_PASSWORD_KEY: &str = "password";

/// Values the database publishes to downstream builders
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseOutputs {
    /// Logical id of the instance
    pub instance_id: String,
    /// Realized endpoint hostname
    pub endpoint: AttributeRef,
    /// Listener port
    pub port: u16,
    /// Handle of the generated credential
    pub secret_arn: AttributeRef,
    /// Admin username stored in the credential
    pub admin_username: String,
    /// Schema created on the instance
    pub database_name: String,
}

/// Declares the credential and the instance
pub struct DatabaseBuilder<'a> {
    config: &'a DatabaseConfig,
    network: &'a NetworkTopology,
    boundary: &'a IsolationBoundary,
    unit: &'a str,
}

impl<'a> DatabaseBuilder<'a> {
    /// Create a builder placing the database in `unit`
    pub fn new(
        config: &'a DatabaseConfig,
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

    /// Declare the database into `set`
    pub fn build(&self, set: &mut ResourceSet) -> Result<DatabaseOutputs> {
        let secret = set.declare(
            ResourceDeclaration::new(DATABASE_SECRET_ID, ResourceKind::GeneratedSecret, self.unit)
                .with_property("Description", "Generated admin credential for the Magento database")
                .with_property(
                    "GenerateSecretString",
                    PropertyMap::new()
                        .with(
                            "SecretStringTemplate",
                            format!(
                                "{{\"{SECRET_USERNAME_KEY}\":\"{}\"}}",
                                self.config.admin_username
                            ),
                        )
                        .with("GenerateStringKey", SECRET_PASSWORD_KEY)
                        .with("ExcludeCharacters", "\"@/\\ '")
                        .with("PasswordLength", 30u32),
                )
                .with_removal_policy(self.config.removal_policy),
        )?;

        let instance = ResourceDeclaration::new(
            DATABASE_INSTANCE_ID,
            ResourceKind::DatabaseInstance,
            self.unit,
        )
        .with_property("Engine", self.config.engine.to_string())
        .with_property("EngineVersion", &self.config.engine_version)
        .with_property("DBInstanceClass", &self.config.instance_class)
        .with_property("DBName", &self.config.database_name)
        .with_property("Port", DATABASE_PORT)
        .with_property("MultiAZ", self.config.multi_az)
        .with_property("AllocatedStorage", self.config.allocated_storage_gb)
        .with_property(
            "PubliclyAccessible",
            self.config.subnets == crate::config::SubnetPlacement::Public,
        )
        .with_property("DBSubnetIds", self.network.subnet_ids(self.config.subnets))
        .with_property(
            "VPCSecurityGroups",
            PropertyValue::list([self.boundary.group_id()]),
        )
        .with_property("MasterUsername", &self.config.admin_username)
        .with_property(
            "MasterUserSecret",
            PropertyMap::new().with("SecretArn", &secret),
        )
        .with_property("DeletionProtection", self.config.deletion_protection)
        .with_removal_policy(self.config.removal_policy);
        set.declare(instance)?;

        info!(
            instance = DATABASE_INSTANCE_ID,
            engine = %self.config.engine,
            version = %self.config.engine_version,
            class = %self.config.instance_class,
            multi_az = self.config.multi_az,
            "declared managed database"
        );

        Ok(DatabaseOutputs {
            instance_id: DATABASE_INSTANCE_ID.to_string(),
            endpoint: AttributeRef::new(DATABASE_INSTANCE_ID, "Endpoint.Address"),
            port: DATABASE_PORT,
            secret_arn: secret,
            admin_username: self.config.admin_username.clone(),
            database_name: self.config.database_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, SubnetPlacement};
    use crate::network::NetworkBuilder;
    use crate::policy::{AccessPolicyBuilder, BoundaryPlacement};
    use crate::resource::{DeployableUnit, RemovalPolicy};

    const ROOT: &str = "MagentoPlatform";

    fn build(config: &DatabaseConfig) -> (ResourceSet, NetworkTopology, DatabaseOutputs) {
        let mut set = ResourceSet::new();
        set.add_unit(DeployableUnit::root(ROOT)).unwrap();
        let network = NetworkBuilder::new(&NetworkConfig::default(), ROOT, ROOT)
            .build(&mut set)
            .unwrap();
        let placement = BoundaryPlacement::shared(ROOT);
        let policies = AccessPolicyBuilder::new(&network, &placement)
            .build(&mut set)
            .unwrap();
        let outputs = DatabaseBuilder::new(config, &network, &policies.database, ROOT)
            .build(&mut set)
            .unwrap();
        (set, network, outputs)
    }

    // =========================================================================
    // Story: The Admin Password Is Always Generated
    // =========================================================================

    #[test]
    fn story_credential_is_a_generated_secret() {
        let (set, _, outputs) = build(&DatabaseConfig::default());

        let secret = set.get(DATABASE_SECRET_ID).unwrap();
        assert_eq!(secret.kind, ResourceKind::GeneratedSecret);
        let generate = &secret.properties["GenerateSecretString"];
        assert_eq!(
            generate.get("SecretStringTemplate").and_then(PropertyValue::as_str),
            Some("{\"username\":\"magento_db_admin\"}")
        );
        assert_eq!(
            generate.get("GenerateStringKey").and_then(PropertyValue::as_str),
            Some("password")
        );

        let instance = set.get(DATABASE_INSTANCE_ID).unwrap();
        assert!(instance.properties.get("MasterUserPassword").is_none());
        assert_eq!(
            instance.properties["MasterUserSecret"]
                .get("SecretArn")
                .and_then(PropertyValue::as_ref_attr),
            Some(&AttributeRef::new(DATABASE_SECRET_ID, "Ref"))
        );
        assert_eq!(outputs.secret_arn, AttributeRef::new(DATABASE_SECRET_ID, "Ref"));
    }

    // =========================================================================
    // Story: Instance Shape Follows Configuration
    // =========================================================================

    #[test]
    fn story_defaults_match_reference_deployment() {
        let (set, network, outputs) = build(&DatabaseConfig::default());
        let instance = set.get(DATABASE_INSTANCE_ID).unwrap();

        assert_eq!(instance.properties["Engine"].as_str(), Some("mariadb"));
        assert_eq!(instance.properties["EngineVersion"].as_str(), Some("10.4"));
        assert_eq!(instance.properties["DBInstanceClass"].as_str(), Some("db.t3.large"));
        assert_eq!(instance.properties["DBName"].as_str(), Some("MagentoDB"));
        assert_eq!(instance.properties["Port"].as_i64(), Some(3306));
        assert_eq!(instance.properties["MultiAZ"], PropertyValue::Bool(true));
        assert_eq!(instance.removal_policy, RemovalPolicy::Destroy);
        assert_eq!(
            instance.properties["DBSubnetIds"],
            network.subnet_ids(SubnetPlacement::Private)
        );
        assert_eq!(
            instance.properties["VPCSecurityGroups"].items()[0].as_ref_attr(),
            Some(&AttributeRef::new("RDSSG", "GroupId"))
        );

        assert_eq!(outputs.port, 3306);
        assert_eq!(outputs.endpoint, AttributeRef::new(DATABASE_INSTANCE_ID, "Endpoint.Address"));
        assert_eq!(outputs.admin_username, "magento_db_admin");
    }

    #[test]
    fn story_public_placement_and_retention() {
        let config = DatabaseConfig {
            subnets: SubnetPlacement::Public,
            removal_policy: RemovalPolicy::Snapshot,
            deletion_protection: true,
            ..Default::default()
        };
        let (set, network, _) = build(&config);
        let instance = set.get(DATABASE_INSTANCE_ID).unwrap();

        assert_eq!(
            instance.properties["DBSubnetIds"],
            network.subnet_ids(SubnetPlacement::Public)
        );
        assert_eq!(instance.properties["PubliclyAccessible"], PropertyValue::Bool(true));
        assert_eq!(instance.properties["DeletionProtection"], PropertyValue::Bool(true));
        assert_eq!(instance.removal_policy, RemovalPolicy::Snapshot);
        assert_eq!(
            set.get(DATABASE_SECRET_ID).unwrap().removal_policy,
            RemovalPolicy::Snapshot
        );
    }
}
