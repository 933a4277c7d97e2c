use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::algo::astar;
use petgraph::graph::DiGraph;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use super::Supergraph;
use crate::error::PlanningError;
use crate::resolver::Resolver;

/// Cost of a hop ending at a goal; every other hop costs this much more, so
/// routes through the fewest intermediate locations win.
const GOAL_HOP_COST: usize = 1;
const TRANSIT_HOP_COST: usize = 1000;

#[derive(Default)]
struct LocationGraph {
    inner: DiGraph<String, usize>,
    indices: HashMap<String, NodeIndex>,
}

impl LocationGraph {
    fn node(&mut self, location: &str) -> NodeIndex {
        if let Some(index) = self.indices.get(location) {
            return *index;
        }
        let index = self.inner.add_node(location.to_string());
        self.indices.insert(location.to_string(), index);
        index
    }
}

impl Supergraph {
    /// Finds, for each goal location, the chain of resolvers that moves an
    /// object of `type_name` from `start` to that goal.
    ///
    /// A goal equal to `start` maps to an empty route.
    pub(crate) fn route_type_to_locations(
        &self,
        type_name: &str,
        start: &str,
        goals: &[String],
    ) -> Result<IndexMap<String, Vec<Arc<Resolver>>>, PlanningError> {
        let resolvers = self.resolvers_for_type(type_name);

        let mut graph = LocationGraph::default();
        let start_ix = graph.node(start);
        let mut locations: Vec<&str> = vec![start];
        if let Some(type_locations) = self.locations_for_type(type_name) {
            locations.extend(type_locations.iter().map(String::as_str));
        }
        locations.extend(resolvers.iter().map(|resolver| resolver.location()));
        locations.extend(goals.iter().map(String::as_str));

        let mut seen = HashSet::new();
        for from in locations {
            if !seen.insert(from) {
                continue;
            }
            let from_ix = graph.node(from);
            for (index, resolver) in resolvers.iter().enumerate() {
                if resolver.location() == from {
                    continue;
                }
                let exportable = resolver
                    .key()
                    .is_exportable_from(|field| self.has_field_at(type_name, from, field));
                if exportable {
                    let to_ix = graph.node(resolver.location());
                    // the first registered resolver wins between two locations
                    if graph.inner.find_edge(from_ix, to_ix).is_none() {
                        graph.inner.add_edge(from_ix, to_ix, index);
                    }
                }
            }
        }
        let graph = graph.inner;

        let mut routes = IndexMap::new();
        for goal in goals {
            if goal == start {
                routes.insert(goal.clone(), Vec::new());
                continue;
            }
            let Some(goal_ix) = graph.node_indices().find(|ix| graph[*ix] == *goal) else {
                continue;
            };
            let (_, path) = astar(
                &graph,
                start_ix,
                |finish| finish == goal_ix,
                |edge| {
                    if edge.target() == goal_ix {
                        GOAL_HOP_COST
                    } else {
                        TRANSIT_HOP_COST
                    }
                },
                |_| 0,
            )
            .ok_or_else(|| PlanningError::NoRoute {
                type_name: type_name.to_string(),
                from: start.to_string(),
                to: goal.clone(),
            })?;

            let route = path
                .windows(2)
                .filter_map(|hop| graph.find_edge(hop[0], hop[1]))
                .map(|edge| resolvers[graph[edge]].clone())
                .collect();
            routes.insert(goal.clone(), route);
        }
        Ok(routes)
    }
}
