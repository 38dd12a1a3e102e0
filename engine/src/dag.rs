use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::plan::Node;

/// Vista serializable del linaje de una colección (ver `Dataset::explain`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dag {
    pub nodes: Vec<DagNode>,
    pub edges: Vec<(String, String)>, // (from, to)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,

    /// Tipo estructural: "source", "map", "shuffle:combine", "cached"...
    pub op: String,

    /// Operación de usuario que creó el nodo, ej: "reduce_by_key".
    pub label: String,

    pub partitions: usize,
}

impl Dag {
    /// Recorre el linaje desde `root` hacia las fuentes. Los nodos quedan
    /// en orden topológico (fuentes primero) y un nodo compartido aparece
    /// una sola vez.
    pub(crate) fn from_plan(root: &Node) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();

        // (nodo, hijos ya expandidos)
        let mut stack: Vec<(&Node, bool)> = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                nodes.push(DagNode {
                    id: node_id(node),
                    op: node.kind_tag(),
                    label: node.label.clone(),
                    partitions: node.num_partitions,
                });
                continue;
            }
            if !seen.insert(node.id) {
                continue;
            }
            stack.push((node, true));
            for input in node.inputs().into_iter().rev() {
                edges.push((node_id(input), node_id(node)));
                stack.push((input.as_ref(), false));
            }
        }

        edges.reverse();
        Self { nodes, edges }
    }

    /// Una línea por nodo, ej: `n3 shuffle:combine "reduce_by_key" [4] <- n2`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for n in &self.nodes {
            let inputs: Vec<&str> = self
                .edges
                .iter()
                .filter(|(_, to)| *to == n.id)
                .map(|(from, _)| from.as_str())
                .collect();
            out.push_str(&format!("{} {} \"{}\" [{}]", n.id, n.op, n.label, n.partitions));
            if !inputs.is_empty() {
                out.push_str(&format!(" <- {}", inputs.join(", ")));
            }
            out.push('\n');
        }
        out
    }

    /// Cantidad de fronteras de shuffle en el linaje.
    pub fn shuffle_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.op.starts_with("shuffle")).count()
    }
}

fn node_id(node: &Node) -> String {
    format!("n{}", node.id)
}
