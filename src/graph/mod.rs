//! Deployment graph for the Magento platform
//!
//! Tracks resources and deployable units with a two-table adjacency list:
//! - Edges Out: what does this node depend on?
//! - Edges In: what depends on this node?
//!
//! Resource edges come from property references and explicit `depends_on`;
//! unit edges from explicit unit dependencies plus every resource edge that
//! crosses a unit boundary. Construction rejects dangling references and
//! cycles at both levels, so every graph that exists has a topological order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::resource::{DeployableUnit, ResourceDeclaration};
use crate::{Error, Result};

/// A generated value flowing from one deployable unit into another
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossUnitReference {
    /// Unit that declares the producing resource
    pub producer_unit: String,
    /// Unit that consumes the value
    pub consumer_unit: String,
    /// Logical id of the producing resource
    pub resource: String,
    /// Attribute consumed
    pub attribute: String,
    /// Name the producer exports the value under
    pub export_name: String,
}

impl CrossUnitReference {
    fn new(producer_unit: &str, consumer_unit: &str, resource: &str, attribute: &str) -> Self {
        Self {
            producer_unit: producer_unit.to_string(),
            consumer_unit: consumer_unit.to_string(),
            resource: resource.to_string(),
            attribute: attribute.to_string(),
            export_name: format!("{producer_unit}-{resource}-{}", attribute.replace('.', "")),
        }
    }
}

type Adjacency = BTreeMap<String, BTreeSet<String>>;

/// Validated, acyclic dependency graph over resources and units
#[derive(Clone, Debug)]
pub struct DeploymentGraph {
    units: Vec<DeployableUnit>,
    resources: Vec<ResourceDeclaration>,
    index: BTreeMap<String, usize>,
    edges_out: Adjacency,
    edges_in: Adjacency,
    unit_edges_out: Adjacency,
    unit_edges_in: Adjacency,
}

impl DeploymentGraph {
    /// Build the graph, rejecting dangling references and cycles
    pub fn new(units: Vec<DeployableUnit>, resources: Vec<ResourceDeclaration>) -> Result<Self> {
        let unit_ids: BTreeSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
        for unit in &units {
            for dep in unit.depends_on.iter().chain(unit.parent.iter()) {
                if !unit_ids.contains(dep.as_str()) {
                    return Err(Error::unknown_reference(format!(
                        "unit '{}' refers to undeclared unit '{}'",
                        unit.id, dep
                    )));
                }
            }
        }

        let mut index = BTreeMap::new();
        for (i, resource) in resources.iter().enumerate() {
            if !unit_ids.contains(resource.unit.as_str()) {
                return Err(Error::unknown_reference(format!(
                    "resource '{}' placed in undeclared unit '{}'",
                    resource.logical_id, resource.unit
                )));
            }
            if index.insert(resource.logical_id.clone(), i).is_some() {
                return Err(Error::validation(format!(
                    "resource '{}' declared twice",
                    resource.logical_id
                )));
            }
        }

        let mut edges_out: Adjacency = Adjacency::new();
        let mut edges_in: Adjacency = Adjacency::new();
        let mut unit_edges_out: Adjacency = units
            .iter()
            .map(|u| (u.id.clone(), u.depends_on.clone()))
            .collect();

        for resource in &resources {
            for reference in resource.references() {
                let target = index
                    .get(&reference.resource)
                    .map(|&i| &resources[i])
                    .ok_or_else(|| {
                        Error::unknown_reference(format!(
                            "resource '{}' references undeclared resource '{}'",
                            resource.logical_id, reference.resource
                        ))
                    })?;
                if !target.kind.has_attribute(&reference.attribute) {
                    return Err(Error::unknown_reference(format!(
                        "resource '{}' references attribute '{}' which {} does not publish",
                        resource.logical_id, reference, target.kind
                    )));
                }
            }

            let deps = resource.dependencies();
            for dep in &deps {
                let target = index.get(dep).map(|&i| &resources[i]).ok_or_else(|| {
                    Error::unknown_reference(format!(
                        "resource '{}' depends on undeclared resource '{}'",
                        resource.logical_id, dep
                    ))
                })?;
                edges_in
                    .entry(dep.clone())
                    .or_default()
                    .insert(resource.logical_id.clone());
                if target.unit != resource.unit {
                    unit_edges_out
                        .entry(resource.unit.clone())
                        .or_default()
                        .insert(target.unit.clone());
                }
            }
            edges_out.insert(resource.logical_id.clone(), deps);
        }

        let mut unit_edges_in = Adjacency::new();
        for (unit, deps) in &unit_edges_out {
            for dep in deps {
                unit_edges_in
                    .entry(dep.clone())
                    .or_default()
                    .insert(unit.clone());
            }
        }

        let resource_order: Vec<&str> = resources.iter().map(|r| r.logical_id.as_str()).collect();
        if let Some(path) = find_cycle(&resource_order, &edges_out) {
            return Err(Error::cycle("resources", path));
        }
        let unit_order: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        if let Some(path) = find_cycle(&unit_order, &unit_edges_out) {
            return Err(Error::cycle("units", path));
        }

        debug!(
            resources = resources.len(),
            units = units.len(),
            "built deployment graph"
        );

        Ok(Self {
            units,
            resources,
            index,
            edges_out,
            edges_in,
            unit_edges_out,
            unit_edges_in,
        })
    }

    /// Build the graph from everything declared in a set
    pub fn from_set(set: &crate::resource::ResourceSet) -> Result<Self> {
        Self::new(set.units().to_vec(), set.resources().to_vec())
    }

    /// Look up a resource
    pub fn get(&self, logical_id: &str) -> Option<&ResourceDeclaration> {
        self.index.get(logical_id).map(|&i| &self.resources[i])
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the graph has no resources
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Units in registration order
    pub fn units(&self) -> &[DeployableUnit] {
        &self.units
    }

    /// Resources the given resource depends on
    pub fn get_dependencies(&self, logical_id: &str) -> Vec<String> {
        neighbours(&self.edges_out, logical_id)
    }

    /// Resources depending on the given resource
    pub fn get_dependents(&self, logical_id: &str) -> Vec<String> {
        neighbours(&self.edges_in, logical_id)
    }

    /// Units the given unit depends on
    pub fn unit_dependencies(&self, unit: &str) -> Vec<String> {
        neighbours(&self.unit_edges_out, unit)
    }

    /// Units depending on the given unit
    pub fn unit_dependents(&self, unit: &str) -> Vec<String> {
        neighbours(&self.unit_edges_in, unit)
    }

    /// Whether resource `from` depends on `to`, directly or transitively
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        from != to && crate::resource::reaches(&self.edges_out, from, to)
    }

    /// Whether unit `from` depends on `to`, directly or transitively
    pub fn unit_has_path(&self, from: &str, to: &str) -> bool {
        from != to && crate::resource::reaches(&self.unit_edges_out, from, to)
    }

    /// Resources declared in a unit, in declaration order
    pub fn resources_in_unit<'a>(
        &'a self,
        unit: &'a str,
    ) -> impl Iterator<Item = &'a ResourceDeclaration> + 'a {
        self.resources.iter().filter(move |r| r.unit == unit)
    }

    /// Resources in dependency order; ties keep declaration order
    pub fn topological_order(&self) -> Vec<&ResourceDeclaration> {
        let ids: Vec<&str> = self.resources.iter().map(|r| r.logical_id.as_str()).collect();
        kahn(&ids, &self.edges_out, &self.edges_in)
            .into_iter()
            .map(|i| &self.resources[i])
            .collect()
    }

    /// Units in dependency order; ties keep registration order
    pub fn unit_order(&self) -> Vec<String> {
        let ids: Vec<&str> = self.units.iter().map(|u| u.id.as_str()).collect();
        kahn(&ids, &self.unit_edges_out, &self.unit_edges_in)
            .into_iter()
            .map(|i| self.units[i].id.clone())
            .collect()
    }

    /// Units grouped into waves that may be deployed in parallel
    ///
    /// Every unit lands in the wave after its deepest dependency.
    pub fn unit_waves(&self) -> Vec<Vec<String>> {
        let mut depth: BTreeMap<String, usize> = BTreeMap::new();
        for unit in self.unit_order() {
            let d = self
                .unit_dependencies(&unit)
                .iter()
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(unit, d);
        }

        let mut waves: Vec<Vec<String>> = Vec::new();
        for unit in &self.units {
            let d = depth.get(&unit.id).copied().unwrap_or(0);
            if waves.len() <= d {
                waves.resize_with(d + 1, Vec::new);
            }
            waves[d].push(unit.id.clone());
        }
        waves
    }

    /// Every attribute consumed across a unit boundary
    pub fn cross_unit_references(&self) -> Vec<CrossUnitReference> {
        let mut refs = BTreeSet::new();
        for resource in &self.resources {
            for reference in resource.references() {
                if let Some(target) = self.get(&reference.resource) {
                    if target.unit != resource.unit {
                        refs.insert(CrossUnitReference::new(
                            &target.unit,
                            &resource.unit,
                            &reference.resource,
                            &reference.attribute,
                        ));
                    }
                }
            }
        }
        refs.into_iter().collect()
    }
}

fn neighbours(edges: &Adjacency, node: &str) -> Vec<String> {
    edges
        .get(node)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}

/// Kahn's algorithm over `ids`, returning indices into `ids`
///
/// Among ready nodes the lowest index goes first.
fn kahn(ids: &[&str], edges_out: &Adjacency, edges_in: &Adjacency) -> Vec<usize> {
    let position: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut pending: Vec<usize> = ids
        .iter()
        .map(|id| edges_out.get(*id).map_or(0, BTreeSet::len))
        .collect();
    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for dependent in edges_in.get(ids[i]).into_iter().flatten() {
            if let Some(&j) = position.get(dependent.as_str()) {
                pending[j] -= 1;
                if pending[j] == 0 {
                    ready.insert(j);
                }
            }
        }
    }
    order
}

/// Depth-first search for a cycle; returns it with the first node repeated
fn find_cycle(ids: &[&str], edges_out: &Adjacency) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges_out: &'a Adjacency,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::OnStack);
        stack.push(node);
        for next in edges_out.get(node).into_iter().flatten() {
            match marks.get(next.as_str()).copied().unwrap_or(Mark::Unvisited) {
                Mark::OnStack => {
                    let start = stack.iter().position(|n| *n == next.as_str()).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|n| n.to_string()).collect();
                    path.push(next.clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(path) = visit(next, edges_out, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for id in ids {
        if marks.get(id).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            let mut stack = Vec::new();
            if let Some(path) = visit(*id, edges_out, &mut marks, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}
