//! Relation graph traversal.
//!
//! The graph is not a DAG: `related_to` can form cycles. Traversal is
//! breadth-first with a visited set and a deterministic tie-break by
//! `(concept_id, relation kind)`.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use janus_core::{defaults, ConceptRepository, Error, RelationType, Result};

/// A node in a traversal result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: Uuid,
    pub name: String,
    pub strength: f32,
    /// Distance from the traversal root.
    pub depth: usize,
}

/// An edge in a traversal result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub kind: RelationType,
    pub strength: f32,
}

/// Nodes and edges visited by one traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: Uuid,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Breadth-first traversal from `root`, up to `depth` hops (clamped to 3).
///
/// Edges are followed in both directions; cycles are suppressed by the
/// visited set. Node order is deterministic: BFS layer by layer, neighbors
/// sorted by `(concept_id, kind)` within a layer.
pub async fn neighbors(
    repo: &dyn ConceptRepository,
    root: Uuid,
    depth: usize,
) -> Result<Subgraph> {
    let depth = depth.min(defaults::MAX_GRAPH_DEPTH);

    let root_concept = repo
        .fetch(root)
        .await?
        .ok_or(Error::ConceptNotFound(root))?;

    let mut nodes = vec![GraphNode {
        id: root,
        name: root_concept.name,
        strength: root_concept.strength,
        depth: 0,
    }];
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut seen_edges: HashSet<(Uuid, Uuid, RelationType)> = HashSet::new();
    let mut visited: HashSet<Uuid> = HashSet::from([root]);
    let mut queue: VecDeque<(Uuid, usize)> = VecDeque::from([(root, 0)]);

    while let Some((current, current_depth)) = queue.pop_front() {
        if current_depth >= depth {
            continue;
        }

        let mut relations = repo.relations_of(current).await?;
        relations.sort_by_key(|r| {
            let other = if r.source_id == current {
                r.target_id
            } else {
                r.source_id
            };
            (other, r.kind)
        });

        for relation in relations {
            if seen_edges.insert((relation.source_id, relation.target_id, relation.kind)) {
                edges.push(GraphEdge {
                    source_id: relation.source_id,
                    target_id: relation.target_id,
                    kind: relation.kind,
                    strength: relation.strength,
                });
            }

            let other = if relation.source_id == current {
                relation.target_id
            } else {
                relation.source_id
            };
            if visited.insert(other) {
                if let Some(concept) = repo.fetch(other).await? {
                    nodes.push(GraphNode {
                        id: other,
                        name: concept.name,
                        strength: concept.strength,
                        depth: current_depth + 1,
                    });
                    queue.push_back((other, current_depth + 1));
                }
            }
        }
    }

    Ok(Subgraph { root, nodes, edges })
}
