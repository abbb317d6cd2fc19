//! Platform Compiler
//!
//! Compiles a [`PlatformConfig`] into a [`DeploymentPlan`].
//!
//! # Architecture
//!
//! The PlatformCompiler delegates to specialized builders, in dependency order:
//! - [`NetworkBuilder`]: VPC, subnets, gateways
//! - [`AccessPolicyBuilder`]: isolation boundaries and ingress rules
//! - [`DatabaseBuilder`] and [`SearchBuilder`]: the two independent backends
//! - [`ApplicationBuilder`]: load balancer, service and scaling
//!
//! Each builder declares into a shared [`ResourceSet`] and hands typed outputs
//! to the next. The finished set is checked as a [`DeploymentGraph`] before
//! it is turned into a plan.
//!
//! # Usage
//!
//! ```text
//! let config = PlatformConfig::from_file(path)?;
//! let plan = PlatformCompiler::new().compile(&config)?;
//! // plan.resources, plan.waves, plan.outputs
//! ```
//!
//! # Units
//!
//! With [`StackLayout::Single`] everything lands in one unit named after the
//! platform. With [`StackLayout::Nested`] the network stays in that root unit
//! and the database, search and application get a nested unit each; the
//! application unit depends on the other two explicitly.

use std::collections::BTreeMap;

use tracing::info;

use crate::config::{PlatformConfig, StackLayout};
use crate::database::DatabaseBuilder;
use crate::graph::DeploymentGraph;
use crate::network::NetworkBuilder;
use crate::plan::{
    DeploymentPlan, Finding, PlannedUnit, PublishedOutput, DATABASE_ADMIN_USERNAME_OUTPUT,
    DATABASE_HOSTNAME_OUTPUT, MAGENTO_ADMIN_URL_OUTPUT, MAGENTO_URL_OUTPUT,
    SEARCH_HOSTNAME_OUTPUT, VPC_ID_OUTPUT,
};
use crate::policy::{AccessPolicyBuilder, BoundaryPlacement};
use crate::resource::{DeployableUnit, PropertyValue, ResourceSet};
use crate::search::SearchBuilder;
use crate::workload::{ApplicationBuilder, ApplicationInputs};
use crate::Result;

/// Nested unit holding the database
pub const DATABASE_UNIT: &str = "MagentoDBStack";
/// Nested unit holding the search domain
pub const SEARCH_UNIT: &str = "MagentoElasticsearchStack";
/// Nested unit holding the application service
pub const APPLICATION_UNIT: &str = "MagentoAppStack";

/// Which unit each builder declares into
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitAssignment {
    /// Root unit; also holds the network
    pub root: String,
    /// Unit of the database and its boundary
    pub database: String,
    /// Unit of the search domain and its boundary
    pub search: String,
    /// Unit of the application service and its boundary
    pub application: String,
}

impl UnitAssignment {
    /// Assign units for a layout
    pub fn for_layout(platform: &str, layout: StackLayout) -> Self {
        match layout {
            StackLayout::Single => Self {
                root: platform.to_string(),
                database: platform.to_string(),
                search: platform.to_string(),
                application: platform.to_string(),
            },
            StackLayout::Nested => Self {
                root: platform.to_string(),
                database: DATABASE_UNIT.to_string(),
                search: SEARCH_UNIT.to_string(),
                application: APPLICATION_UNIT.to_string(),
            },
        }
    }

    /// Units to register, root first, each with its explicit dependencies
    pub fn units(&self) -> Vec<DeployableUnit> {
        let mut units = vec![DeployableUnit::root(&self.root)];
        if self.database == self.root {
            return units;
        }
        units.push(DeployableUnit::nested(&self.database, &self.root).depends_on(&self.root));
        units.push(DeployableUnit::nested(&self.search, &self.root).depends_on(&self.root));
        units.push(
            DeployableUnit::nested(&self.application, &self.root)
                .depends_on(&self.root)
                .depends_on(&self.database)
                .depends_on(&self.search),
        );
        units
    }

    /// Where the isolation boundaries go
    pub fn boundary_placement(&self) -> BoundaryPlacement {
        BoundaryPlacement {
            database: self.database.clone(),
            search: self.search.clone(),
            application: self.application.clone(),
        }
    }
}

/// Compiles platform configurations into deployment plans
///
/// Compilation is pure: the same configuration always yields an identical
/// plan.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformCompiler;

impl PlatformCompiler {
    /// Create a compiler
    pub fn new() -> Self {
        Self
    }

    /// Validate `config` and compile it into a plan
    pub fn compile(&self, config: &PlatformConfig) -> Result<DeploymentPlan> {
        config.validate()?;
        info!(
            platform = %config.name,
            layout = %config.layout,
            phase = %config.phase,
            "compiling platform"
        );

        let units = UnitAssignment::for_layout(&config.name, config.layout);
        let mut set = ResourceSet::new();
        for unit in units.units() {
            set.add_unit(unit)?;
        }

        let network =
            NetworkBuilder::new(&config.network, &config.name, &units.root).build(&mut set)?;

        let placement = units.boundary_placement();
        let access = AccessPolicyBuilder::new(&network, &placement);
        let policies = access.build(&mut set)?;

        let database =
            DatabaseBuilder::new(&config.database, &network, &policies.database, &units.database)
                .build(&mut set)?;
        let search = SearchBuilder::new(&config.search, &network, &policies.search, &units.search)
            .build(&mut set)?;

        let application = ApplicationBuilder::new(
            &config.application,
            config.phase,
            ApplicationInputs {
                network: &network,
                access: &access,
                boundary: &policies.application,
                database: &database,
                search: &search,
            },
            &units.application,
        )
        .build(&mut set)?;

        let graph = DeploymentGraph::from_set(&set)?;

        let resources: Vec<_> = graph.topological_order().into_iter().cloned().collect();
        let planned_units = graph
            .unit_order()
            .into_iter()
            .map(|id| PlannedUnit {
                parent: graph
                    .units()
                    .iter()
                    .find(|u| u.id == id)
                    .and_then(|u| u.parent.clone()),
                depends_on: graph.unit_dependencies(&id),
                resources: resources
                    .iter()
                    .filter(|r| r.unit == id)
                    .map(|r| r.logical_id.clone())
                    .collect(),
                id,
            })
            .collect();

        let outputs = BTreeMap::from([
            output(VPC_ID_OUTPUT, "VPC id", network.vpc_id().into()),
            output(
                DATABASE_HOSTNAME_OUTPUT,
                "Database endpoint hostname",
                database.endpoint.clone().into(),
            ),
            output(
                DATABASE_ADMIN_USERNAME_OUTPUT,
                "Database admin username",
                database.admin_username.clone().into(),
            ),
            output(
                SEARCH_HOSTNAME_OUTPUT,
                "Search domain endpoint hostname",
                search.endpoint.clone().into(),
            ),
            output(
                MAGENTO_URL_OUTPUT,
                "Storefront URL",
                application.public_url.clone(),
            ),
            output(
                MAGENTO_ADMIN_URL_OUTPUT,
                "Storefront admin URL",
                application.admin_url.clone(),
            ),
        ]);

        let mut findings: Vec<Finding> = search
            .findings
            .into_iter()
            .chain(application.findings)
            .collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity));

        let plan = DeploymentPlan {
            name: config.name.clone(),
            layout: config.layout,
            phase: config.phase,
            units: planned_units,
            resources,
            waves: graph.unit_waves(),
            cross_unit_references: graph.cross_unit_references(),
            outputs,
            findings,
        };

        info!(
            platform = %plan.name,
            resources = plan.resources.len(),
            units = plan.units.len(),
            waves = plan.waves.len(),
            cross_unit_references = plan.cross_unit_references.len(),
            findings = plan.findings.len(),
            "compiled platform"
        );
        Ok(plan)
    }
}

fn output(name: &str, description: &str, value: PropertyValue) -> (String, PublishedOutput) {
    (
        name.to_string(),
        PublishedOutput {
            description: description.to_string(),
            value,
        },
    )
}
