//! Workflow Graph Types and Validation
//!
//! Campaign graphs are persisted as JSON (§6) and loaded once per campaign.
//! Structurally this module plays the role `ob-workflow`'s `definition.rs`
//! plays for named-state machines: parse an external definition, expose
//! query helpers (`transitions_from`-equivalent adjacency), and validate
//! structural invariants before anything executes.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Node kinds the interpreter understands (§3, §4.5). `AddStep` is a
/// UI-only placeholder that must never reach the executable graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    ProfileVisit,
    LikePost,
    CommentPost,
    SendConnectionRequest,
    SendFollowup,
    SendInmail,
    WithdrawRequest,
    Webhook,
    AddStep,
}

impl NodeKind {
    pub fn is_ui_only(&self) -> bool {
        matches!(self, NodeKind::AddStep)
    }

    /// Node kinds that target a post and therefore require a profile visit
    /// first to resolve a provider id (§4.5.2).
    pub fn requires_profile_visit_first(&self) -> bool {
        matches!(
            self,
            NodeKind::LikePost
                | NodeKind::CommentPost
                | NodeKind::SendFollowup
                | NodeKind::WithdrawRequest
        )
    }
}

/// Unit of an edge delay (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    S,
    M,
    H,
    D,
    W,
}

impl DelayUnit {
    pub fn as_seconds(&self, magnitude: u64) -> u64 {
        match self {
            DelayUnit::S => magnitude,
            DelayUnit::M => magnitude * 60,
            DelayUnit::H => magnitude * 3_600,
            DelayUnit::D => magnitude * 86_400,
            DelayUnit::W => magnitude * 604_800,
        }
    }
}

/// An edge delay, rounded to the coarsest unit that divides it at the
/// point the interpreter honors it as a durable sleep (§4.8.e).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub magnitude: u64,
    pub unit: DelayUnit,
}

impl Delay {
    pub fn as_seconds(&self) -> u64 {
        self.unit.as_seconds(self.magnitude)
    }

    /// Express a raw second count as the coarsest (magnitude, unit) pair
    /// that divides it exactly, falling back to seconds.
    pub fn coarsen(total_seconds: u64) -> Delay {
        const UNITS: [(u64, DelayUnit); 5] = [
            (604_800, DelayUnit::W),
            (86_400, DelayUnit::D),
            (3_600, DelayUnit::H),
            (60, DelayUnit::M),
            (1, DelayUnit::S),
        ];
        for (secs, unit) in UNITS {
            if total_seconds != 0 && total_seconds % secs == 0 {
                return Delay {
                    magnitude: total_seconds / secs,
                    unit,
                };
            }
        }
        Delay {
            magnitude: total_seconds,
            unit: DelayUnit::S,
        }
    }
}

/// Which branch a conditional edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Positive,
    Negative,
}

/// Wire-format condition marker on an edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub branch: Branch,
}

/// A node as deserialized from the wire format (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// An edge as deserialized from the wire format (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub delay: Option<Delay>,
    #[serde(default)]
    pub condition: Option<ConditionSpec>,
}

impl EdgeSpec {
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// Raw wire format for a campaign graph (§6), before placeholder
/// stripping and structural validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWorkflowGraph {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
}

/// Errors raised while validating a graph against G1–G4.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph contains a cycle")]
    Cyclic,
    #[error("graph has no source node (every node has an incoming edge)")]
    NoSourceNode,
    #[error("conditional source node {0} must have exactly one positive and one negative outgoing edge")]
    BadConditionalBranching(String),
    #[error("node {0} mixes conditional and unconditional outgoing edges")]
    MixedEdgeKinds(String),
    #[error("edge references unknown node {0}")]
    DanglingEdge(String),
    #[error("duplicate node id {0}")]
    DuplicateNode(String),
}

/// A validated, placeholder-stripped, immutable campaign graph (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    nodes: HashMap<String, NodeSpec>,
    /// Preserves wire order so FIFO tie-breaks (§4.8) are deterministic.
    node_order: Vec<String>,
    adjacency: HashMap<String, Vec<EdgeSpec>>,
    incoming_count: HashMap<String, usize>,
}

impl WorkflowGraph {
    /// Strip UI-only nodes and dangling edges, then validate G1–G4.
    pub fn from_raw(raw: RawWorkflowGraph) -> Result<Self, GraphError> {
        let mut nodes = HashMap::new();
        let mut node_order = Vec::new();
        for n in raw.nodes {
            if n.kind.is_ui_only() {
                continue;
            }
            if nodes.contains_key(&n.id) {
                return Err(GraphError::DuplicateNode(n.id));
            }
            node_order.push(n.id.clone());
            nodes.insert(n.id.clone(), n);
        }

        let mut adjacency: HashMap<String, Vec<EdgeSpec>> = HashMap::new();
        let mut incoming_count: HashMap<String, usize> =
            node_order.iter().map(|id| (id.clone(), 0)).collect();

        for e in raw.edges {
            // Edges touching a stripped placeholder node are dropped (§3).
            if !nodes.contains_key(&e.source) || !nodes.contains_key(&e.target) {
                continue;
            }
            *incoming_count.get_mut(&e.target).unwrap() += 1;
            adjacency.entry(e.source.clone()).or_default().push(e);
        }

        let graph = Self {
            nodes,
            node_order,
            adjacency,
            incoming_count,
        };

        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), GraphError> {
        self.validate_has_source()?;
        self.validate_conditional_branching()?;
        self.validate_acyclic()?;
        Ok(())
    }

    // G2: at least one source node (no incoming edges).
    fn validate_has_source(&self) -> Result<(), GraphError> {
        if self
            .node_order
            .iter()
            .any(|id| self.incoming_count.get(id).copied().unwrap_or(0) == 0)
        {
            Ok(())
        } else {
            Err(GraphError::NoSourceNode)
        }
    }

    // G3 + G4: conditional source nodes have exactly one positive and one
    // negative outgoing conditional edge; non-conditional edges from a
    // node are all-present-or-none, never mixed with conditional ones.
    fn validate_conditional_branching(&self) -> Result<(), GraphError> {
        for (source, edges) in &self.adjacency {
            let conditional: Vec<&EdgeSpec> = edges.iter().filter(|e| e.is_conditional()).collect();
            let unconditional_count = edges.len() - conditional.len();

            if !conditional.is_empty() && unconditional_count > 0 {
                return Err(GraphError::MixedEdgeKinds(source.clone()));
            }

            if !conditional.is_empty() {
                let positive = conditional
                    .iter()
                    .filter(|e| matches!(e.condition.unwrap().branch, Branch::Positive))
                    .count();
                let negative = conditional
                    .iter()
                    .filter(|e| matches!(e.condition.unwrap().branch, Branch::Negative))
                    .count();
                if positive != 1 || negative != 1 {
                    return Err(GraphError::BadConditionalBranching(source.clone()));
                }
            }
        }
        Ok(())
    }

    // G1: acyclic, via Kahn's algorithm over the placeholder-stripped graph.
    fn validate_acyclic(&self) -> Result<(), GraphError> {
        let mut remaining: HashMap<&str, usize> = self
            .node_order
            .iter()
            .map(|id| (id.as_str(), self.incoming_count[id]))
            .collect();

        let mut queue: VecDeque<&str> = remaining
            .iter()
            .filter(|(_, c)| **c == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(edges) = self.adjacency.get(id) {
                for e in edges {
                    let count = remaining.get_mut(e.target.as_str()).unwrap();
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(&e.target);
                    }
                }
            }
        }

        if visited == self.node_order.len() {
            Ok(())
        } else {
            Err(GraphError::Cyclic)
        }
    }

    /// Source nodes (no incoming edges), in wire order — the interpreter's
    /// initial queue (§4.8.2).
    pub fn source_nodes(&self) -> Vec<&str> {
        self.node_order
            .iter()
            .filter(|id| self.incoming_count.get(id.as_str()).copied().unwrap_or(0) == 0)
            .map(|id| id.as_str())
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn edges_from(&self, id: &str) -> &[EdgeSpec] {
        self.adjacency.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn incoming_count(&self, id: &str) -> usize {
        self.incoming_count.get(id).copied().unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.node_order.iter().map(|s| s.as_str())
    }

    pub fn reachable_node_ids(&self) -> HashSet<String> {
        self.node_order.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: NodeKind) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            kind,
            config: serde_json::Value::Null,
        }
    }

    fn edge(source: &str, target: &str) -> EdgeSpec {
        EdgeSpec {
            source: source.to_string(),
            target: target.to_string(),
            delay: None,
            condition: None,
        }
    }

    fn cond_edge(source: &str, target: &str, branch: Branch) -> EdgeSpec {
        EdgeSpec {
            source: source.to_string(),
            target: target.to_string(),
            delay: None,
            condition: Some(ConditionSpec { branch }),
        }
    }

    #[test]
    fn strips_add_step_placeholders_and_their_edges() {
        let raw = RawWorkflowGraph {
            nodes: vec![
                node("a", NodeKind::ProfileVisit),
                node("placeholder", NodeKind::AddStep),
                node("b", NodeKind::LikePost),
            ],
            edges: vec![edge("a", "placeholder"), edge("placeholder", "b")],
        };
        let graph = WorkflowGraph::from_raw(raw).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert!(graph.edges_from("a").is_empty());
        assert_eq!(graph.source_nodes(), vec!["a", "b"]);
    }

    #[test]
    fn rejects_cycles() {
        let raw = RawWorkflowGraph {
            nodes: vec![node("a", NodeKind::ProfileVisit), node("b", NodeKind::LikePost)],
            edges: vec![edge("a", "b"), edge("b", "a")],
        };
        assert_eq!(WorkflowGraph::from_raw(raw).unwrap_err(), GraphError::Cyclic);
    }

    #[test]
    fn rejects_graph_with_no_source() {
        // Every node has an incoming edge once a -> b -> a is stripped down
        // to a single reflexive-looking edge set with no zero-incoming node.
        let raw = RawWorkflowGraph {
            nodes: vec![node("a", NodeKind::ProfileVisit)],
            edges: vec![edge("a", "a")],
        };
        let err = WorkflowGraph::from_raw(raw).unwrap_err();
        assert!(matches!(err, GraphError::NoSourceNode | GraphError::Cyclic));
    }

    #[test]
    fn requires_exactly_one_positive_and_one_negative_conditional_edge() {
        let raw = RawWorkflowGraph {
            nodes: vec![
                node("a", NodeKind::SendConnectionRequest),
                node("b", NodeKind::SendFollowup),
            ],
            edges: vec![cond_edge("a", "b", Branch::Positive)],
        };
        assert_eq!(
            WorkflowGraph::from_raw(raw).unwrap_err(),
            GraphError::BadConditionalBranching("a".to_string())
        );
    }

    #[test]
    fn rejects_mixed_conditional_and_unconditional_siblings() {
        let raw = RawWorkflowGraph {
            nodes: vec![
                node("a", NodeKind::SendConnectionRequest),
                node("b", NodeKind::SendFollowup),
                node("c", NodeKind::WithdrawRequest),
            ],
            edges: vec![
                cond_edge("a", "b", Branch::Positive),
                cond_edge("a", "c", Branch::Negative),
                edge("a", "c"),
            ],
        };
        assert_eq!(
            WorkflowGraph::from_raw(raw).unwrap_err(),
            GraphError::MixedEdgeKinds("a".to_string())
        );
    }

    #[test]
    fn accepts_well_formed_conditional_graph() {
        let raw = RawWorkflowGraph {
            nodes: vec![
                node("visit", NodeKind::ProfileVisit),
                node("invite", NodeKind::SendConnectionRequest),
                node("followup", NodeKind::SendFollowup),
                node("withdraw", NodeKind::WithdrawRequest),
            ],
            edges: vec![
                edge("visit", "invite"),
                cond_edge("invite", "followup", Branch::Positive),
                cond_edge("invite", "withdraw", Branch::Negative),
            ],
        };
        let graph = WorkflowGraph::from_raw(raw).unwrap();
        assert_eq!(graph.source_nodes(), vec!["visit"]);
        assert_eq!(graph.edges_from("invite").len(), 2);
    }

    #[test]
    fn delay_coarsens_to_largest_exact_unit() {
        assert_eq!(
            Delay::coarsen(172_800),
            Delay {
                magnitude: 2,
                unit: DelayUnit::D
            }
        );
        assert_eq!(
            Delay::coarsen(900),
            Delay {
                magnitude: 15,
                unit: DelayUnit::M
            }
        );
        assert_eq!(
            Delay::coarsen(90),
            Delay {
                magnitude: 90,
                unit: DelayUnit::S
            }
        );
    }
}
