//! Static production graph: tiers, dependents and evaluation order.

use crate::{validate_decl, ConfigError, ResourceDecl, ResourceId};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A declared resource with its derived tier.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub name: ResourceId,
    pub label: String,
    pub icon: String,
    pub components: Vec<ResourceId>,
    pub base_min: f64,
    /// 1 for dependency-free resources, else 1 + max tier of components.
    pub tier: u32,
}

/// Immutable resource graph built once from configuration.
///
/// Resources live in an arena in declaration order; adjacency is kept as
/// index lists in both directions so the cascade can walk from a component
/// to everything that consumes it.
#[derive(Clone, Debug)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    components: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    topo: Vec<usize>,
}

impl ResourceGraph {
    /// Build the graph, rejecting duplicates, dangling references and cycles.
    pub fn new(decls: Vec<ResourceDecl>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(decls.len());
        for (i, decl) in decls.iter().enumerate() {
            validate_decl(decl)?;
            if index.insert(decl.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateResource(decl.name.0.clone()));
            }
        }

        let mut components = Vec::with_capacity(decls.len());
        for decl in &decls {
            let mut idxs = Vec::with_capacity(decl.components.len());
            for c in &decl.components {
                let ci = index
                    .get(c)
                    .copied()
                    .ok_or_else(|| ConfigError::DanglingComponent {
                        resource: decl.name.0.clone(),
                        component: c.0.clone(),
                    })?;
                idxs.push(ci);
            }
            components.push(idxs);
        }

        let tiers = derive_tiers(&decls, &components)?;

        let mut dependents = vec![Vec::new(); decls.len()];
        for (i, comps) in components.iter().enumerate() {
            for &c in comps {
                if !dependents[c].contains(&i) {
                    dependents[c].push(i);
                }
            }
        }

        let resources: Vec<Resource> = decls
            .into_iter()
            .zip(tiers.iter())
            .map(|(d, &tier)| Resource {
                name: d.name,
                label: d.label,
                icon: d.icon,
                components: d.components,
                base_min: d.base_min,
                tier,
            })
            .collect();

        // Stable sort keeps declaration order within a tier.
        let mut topo: Vec<usize> = (0..resources.len()).collect();
        topo.sort_by_key(|&i| tiers[i]);

        let graph = Self {
            resources,
            index,
            components,
            dependents,
            topo,
        };
        debug!(
            resources = graph.len(),
            max_tier = graph.max_tier(),
            "resource graph built"
        );
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// All resources in declaration order.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, idx: usize) -> &Resource {
        &self.resources[idx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.index_of(name).map(|i| &self.resources[i])
    }

    /// Direct components of `idx`, as arena indices.
    pub fn components_of(&self, idx: usize) -> &[usize] {
        &self.components[idx]
    }

    /// Resources that list `idx` among their components.
    pub fn dependents_of(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Indices ordered so that every component precedes its dependents.
    pub fn topological_order(&self) -> &[usize] {
        &self.topo
    }

    /// Resource indices grouped by tier, ascending.
    pub fn by_tier(&self) -> BTreeMap<u32, Vec<usize>> {
        let mut out: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for &i in &self.topo {
            out.entry(self.resources[i].tier).or_default().push(i);
        }
        out
    }

    pub fn max_tier(&self) -> u32 {
        self.resources.iter().map(|r| r.tier).max().unwrap_or(0)
    }
}

fn derive_tiers(decls: &[ResourceDecl], components: &[Vec<usize>]) -> Result<Vec<u32>, ConfigError> {
    let mut memo: Vec<Option<u32>> = vec![None; decls.len()];
    let mut active = vec![false; decls.len()];
    let mut tiers = Vec::with_capacity(decls.len());
    for i in 0..decls.len() {
        tiers.push(resolve_tier(i, decls, components, &mut memo, &mut active)?);
    }
    Ok(tiers)
}

fn resolve_tier(
    i: usize,
    decls: &[ResourceDecl],
    components: &[Vec<usize>],
    memo: &mut [Option<u32>],
    active: &mut [bool],
) -> Result<u32, ConfigError> {
    if let Some(tier) = memo[i] {
        return Ok(tier);
    }
    if active[i] {
        return Err(ConfigError::Cycle(decls[i].name.0.clone()));
    }
    active[i] = true;
    let mut tier = 1;
    for &c in &components[i] {
        tier = tier.max(resolve_tier(c, decls, components, memo, active)? + 1);
    }
    active[i] = false;
    memo[i] = Some(tier);
    Ok(tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Vec<ResourceDecl> {
        vec![
            ResourceDecl::base("iron", "Iron", "I"),
            ResourceDecl::base("coal", "Coal", "C"),
            ResourceDecl::base("oil", "Oil", "O"),
            ResourceDecl::derived("steel", "Steel", "S", &["iron", "coal"]),
            ResourceDecl::derived("plastics", "Plastics", "P", &["oil"]),
            ResourceDecl::derived("consumer_goods", "Consumer Goods", "G", &["steel", "plastics"]),
        ]
    }

    #[test]
    fn tiers_follow_dependencies() {
        let g = ResourceGraph::new(sample()).unwrap();
        let tier = |n: &str| g.get(n).unwrap().tier;
        assert_eq!(tier("iron"), 1);
        assert_eq!(tier("coal"), 1);
        assert_eq!(tier("oil"), 1);
        assert_eq!(tier("steel"), 2);
        assert_eq!(tier("plastics"), 2);
        assert_eq!(tier("consumer_goods"), 3);
        assert_eq!(g.max_tier(), 3);
    }

    #[test]
    fn dependents_are_reverse_edges() {
        let g = ResourceGraph::new(sample()).unwrap();
        let iron = g.index_of("iron").unwrap();
        let steel = g.index_of("steel").unwrap();
        let goods = g.index_of("consumer_goods").unwrap();
        assert_eq!(g.dependents_of(iron), &[steel]);
        assert_eq!(g.dependents_of(steel), &[goods]);
        assert!(g.dependents_of(goods).is_empty());
        assert_eq!(g.components_of(steel).len(), 2);
    }

    #[test]
    fn topological_order_puts_components_first() {
        let g = ResourceGraph::new(sample()).unwrap();
        let pos: Vec<usize> = {
            let mut p = vec![0; g.len()];
            for (rank, &i) in g.topological_order().iter().enumerate() {
                p[i] = rank;
            }
            p
        };
        for i in 0..g.len() {
            for &c in g.components_of(i) {
                assert!(pos[c] < pos[i]);
            }
        }
        let tiers = g.by_tier();
        assert_eq!(tiers[&1].len(), 3);
        assert_eq!(tiers[&2].len(), 2);
        assert_eq!(tiers[&3].len(), 1);
    }

    #[test]
    fn mutual_dependency_is_a_cycle() {
        let decls = vec![
            ResourceDecl::derived("a", "A", "", &["b"]),
            ResourceDecl::derived("b", "B", "", &["a"]),
        ];
        let err = ResourceGraph::new(decls).unwrap_err();
        assert!(matches!(err, ConfigError::Cycle(_)));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let decls = vec![ResourceDecl::derived("a", "A", "", &["a"])];
        assert_eq!(
            ResourceGraph::new(decls).unwrap_err(),
            ConfigError::Cycle("a".into())
        );
    }

    #[test]
    fn dangling_and_duplicate_are_rejected() {
        let dangling = vec![ResourceDecl::derived("steel", "Steel", "", &["iron"])];
        assert_eq!(
            ResourceGraph::new(dangling).unwrap_err(),
            ConfigError::DanglingComponent {
                resource: "steel".into(),
                component: "iron".into()
            }
        );
        let dup = vec![
            ResourceDecl::base("iron", "Iron", ""),
            ResourceDecl::base("iron", "Iron again", ""),
        ];
        assert_eq!(
            ResourceGraph::new(dup).unwrap_err(),
            ConfigError::DuplicateResource("iron".into())
        );
    }

    proptest! {
        // Edges only point to lower indices, so every generated graph is a DAG.
        #[test]
        fn tier_is_one_plus_max_component_tier(
            masks in prop::collection::vec(prop::collection::vec(any::<bool>(), 10), 1..10)
        ) {
            let names: Vec<String> = (0..masks.len()).map(|i| format!("r{i}")).collect();
            let decls: Vec<ResourceDecl> = masks
                .iter()
                .enumerate()
                .map(|(i, mask)| {
                    let comps: Vec<&str> = (0..i).filter(|&j| mask[j]).map(|j| names[j].as_str()).collect();
                    ResourceDecl::derived(&names[i], &names[i], "", &comps)
                })
                .collect();
            let g = ResourceGraph::new(decls).unwrap();
            for i in 0..g.len() {
                let comps = g.components_of(i);
                let expected = comps.iter().map(|&c| g.resource(c).tier + 1).max().unwrap_or(1);
                prop_assert_eq!(g.resource(i).tier, expected);
            }
        }
    }
}
