//! Deployment plan: the compiler's output
//!
//! A [`DeploymentPlan`] is the whole desired-state graph in a form an external
//! control plane can apply: resources in dependency order, units grouped into
//! parallel waves, every value crossing a unit boundary, the published outputs
//! and anything a reviewer should look at first.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{DeploymentPhase, StackLayout};
use crate::graph::CrossUnitReference;
use crate::resource::{PropertyValue, ResourceDeclaration};
use crate::{Error, Result};

/// Published output: VPC id
pub const VPC_ID_OUTPUT: &str = "VpcId";
/// Published output: database endpoint hostname
pub const DATABASE_HOSTNAME_OUTPUT: &str = "DatabaseHostname";
/// Published output: database admin username
pub const DATABASE_ADMIN_USERNAME_OUTPUT: &str = "DatabaseAdminUsername";
/// Published output: search endpoint hostname
pub const SEARCH_HOSTNAME_OUTPUT: &str = "SearchHostname";
/// Published output: storefront URL
pub const MAGENTO_URL_OUTPUT: &str = "MagentoUrl";
/// Published output: storefront admin URL
pub const MAGENTO_ADMIN_URL_OUTPUT: &str = "MagentoAdminUrl";

/// Severity of a plan finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Works, but weaker than it should be
    Warning,
}

/// Something a reviewer should look at before applying the plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Resource the finding is about
    pub resource: String,
    /// Severity
    pub severity: Severity,
    /// What was found
    pub message: String,
}

/// A unit as it appears in the plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedUnit {
    /// Unit id
    pub id: String,
    /// Enclosing unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Every unit this one waits for, explicit or implied by references
    pub depends_on: Vec<String>,
    /// Logical ids of the unit's resources, in plan order
    pub resources: Vec<String>,
}

/// A value the platform publishes once realized
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedOutput {
    /// What the value is
    pub description: String,
    /// The value, usually a reference
    pub value: PropertyValue,
}

/// Complete, ordered desired state of one platform
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    /// Platform name
    pub name: String,
    /// Unit layout the plan was compiled for
    pub layout: StackLayout,
    /// Application phase the plan was compiled for
    pub phase: DeploymentPhase,
    /// Units in dependency order
    pub units: Vec<PlannedUnit>,
    /// Resources in dependency order
    pub resources: Vec<ResourceDeclaration>,
    /// Units grouped into waves deployable in parallel
    pub waves: Vec<Vec<String>>,
    /// Values crossing unit boundaries
    pub cross_unit_references: Vec<CrossUnitReference>,
    /// Published outputs by name
    pub outputs: BTreeMap<String, PublishedOutput>,
    /// Findings, most severe first
    pub findings: Vec<Finding>,
}

impl DeploymentPlan {
    /// Look up a resource by logical id
    pub fn resource(&self, logical_id: &str) -> Option<&ResourceDeclaration> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }

    /// Look up a unit by id
    pub fn unit(&self, id: &str) -> Option<&PlannedUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Look up a published output
    pub fn output(&self, name: &str) -> Option<&PublishedOutput> {
        self.outputs.get(name)
    }

    /// Position of a resource in the plan order
    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.logical_id == logical_id)
    }

    /// Wave index a unit is deployed in
    pub fn wave_of(&self, unit: &str) -> Option<usize> {
        self.waves.iter().position(|w| w.iter().any(|u| u == unit))
    }

    /// Render as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }
}
