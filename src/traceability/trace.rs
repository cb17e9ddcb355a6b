// Lazy closures over an immutable snapshot of the link set. The edge graph
// is acyclic in practice but every walk still keeps a visited set.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use super::types::{LotOrigin, TraceabilityLink, TracedPack};

#[derive(Debug, Clone, Default)]
pub(crate) struct GraphSnapshot {
    pub(crate) links: Vec<TraceabilityLink>,
    /// lot id -> originating cycle and expiry
    pub(crate) origins: BTreeMap<String, LotOrigin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Cycle(String),
    Lot(String),
    Procedure(String),
    Patient(String),
}

/// Breadth-first walk state. `via` is the index of the link that reached a node.
struct Walk {
    snapshot: Arc<GraphSnapshot>,
    frontier: VecDeque<(Node, Option<usize>)>,
    visited: HashSet<Node>,
}

impl Walk {
    fn new(snapshot: Arc<GraphSnapshot>, start: Node) -> Self {
        let mut walk = Self {
            snapshot,
            frontier: VecDeque::new(),
            visited: HashSet::new(),
        };
        walk.push(start, None);
        walk
    }

    fn push(&mut self, node: Node, via: Option<usize>) {
        if self.visited.insert(node.clone()) {
            self.frontier.push_back((node, via));
        }
    }

    fn pop(&mut self) -> Option<(Node, Option<usize>)> {
        self.frontier.pop_front()
    }
}

/// Patient procedures reachable from a cycle through its pack lots
pub struct ForwardTrace {
    walk: Walk,
}

impl ForwardTrace {
    pub(crate) fn new(snapshot: Arc<GraphSnapshot>, cycle_id: &str) -> Self {
        Self {
            walk: Walk::new(snapshot, Node::Cycle(cycle_id.to_string())),
        }
    }
}

impl Iterator for ForwardTrace {
    type Item = TraceabilityLink;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, via)) = self.walk.pop() {
            let snapshot = Arc::clone(&self.walk.snapshot);
            match node {
                Node::Cycle(cycle) => {
                    let lots: BTreeSet<&String> = snapshot
                        .origins
                        .iter()
                        .filter(|(_, origin)| origin.cycle_id == cycle)
                        .map(|(lot, _)| lot)
                        .chain(
                            snapshot
                                .links
                                .iter()
                                .filter(|link| link.cycle_id == cycle)
                                .map(|link| &link.lot_id),
                        )
                        .collect();
                    for lot in lots {
                        self.walk.push(Node::Lot(lot.clone()), None);
                    }
                }
                Node::Lot(lot) => {
                    for (idx, link) in snapshot.links.iter().enumerate() {
                        if link.lot_id == lot {
                            self.walk.push(Node::Procedure(link.procedure_id.clone()), Some(idx));
                        }
                    }
                }
                Node::Procedure(_) => {
                    if let Some(link) = via.and_then(|idx| snapshot.links.get(idx)) {
                        return Some(link.clone());
                    }
                }
                Node::Patient(_) => {}
            }
        }
        None
    }
}

/// Packs (and their cycles) used in a patient's procedures
pub struct BackwardTrace {
    walk: Walk,
}

impl BackwardTrace {
    pub(crate) fn new(snapshot: Arc<GraphSnapshot>, patient_id: &str) -> Self {
        Self {
            walk: Walk::new(snapshot, Node::Patient(patient_id.to_string())),
        }
    }
}

impl Iterator for BackwardTrace {
    type Item = TracedPack;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, via)) = self.walk.pop() {
            let snapshot = Arc::clone(&self.walk.snapshot);
            match node {
                Node::Patient(patient) => {
                    for (idx, link) in snapshot.links.iter().enumerate() {
                        if link.patient_id == patient {
                            self.walk.push(Node::Procedure(link.procedure_id.clone()), Some(idx));
                        }
                    }
                }
                Node::Procedure(procedure) => {
                    for (idx, link) in snapshot.links.iter().enumerate() {
                        if link.procedure_id == procedure {
                            self.walk.push(Node::Lot(link.lot_id.clone()), Some(idx));
                        }
                    }
                }
                Node::Lot(lot) => {
                    if let Some(link) = via.and_then(|idx| snapshot.links.get(idx)) {
                        let cycle_id = snapshot
                            .origins
                            .get(&lot)
                            .map(|origin| origin.cycle_id.clone())
                            .unwrap_or_else(|| link.cycle_id.clone());
                        return Some(TracedPack {
                            lot_id: lot,
                            cycle_id,
                            procedure_id: link.procedure_id.clone(),
                        });
                    }
                }
                Node::Cycle(_) => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};

    fn link(lot: &str, cycle: &str, procedure: &str, patient: &str) -> TraceabilityLink {
        TraceabilityLink {
            lot_id: lot.to_string(),
            cycle_id: cycle.to_string(),
            procedure_id: procedure.to_string(),
            patient_id: patient.to_string(),
            operating_room: "OR-1".to_string(),
            surgeon: "Dr. Martin".to_string(),
            procedure_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            linked_by: "TECH-001".to_string(),
            linked_at: Utc::now(),
        }
    }

    fn snapshot() -> Arc<GraphSnapshot> {
        let origin = |cycle: &str| LotOrigin {
            cycle_id: cycle.to_string(),
            released_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(180),
        };
        let mut origins = BTreeMap::new();
        origins.insert("SP-A-1".to_string(), origin("A"));
        origins.insert("SP-A-2".to_string(), origin("A"));
        origins.insert("SP-B-1".to_string(), origin("B"));
        Arc::new(GraphSnapshot {
            links: vec![
                link("SP-A-1", "A", "PROC-1", "PAT-1"),
                link("SP-A-2", "A", "PROC-2", "PAT-2"),
                link("SP-B-1", "B", "PROC-2", "PAT-2"),
                link("SP-A-1", "A", "PROC-3", "PAT-1"),
            ],
            origins,
        })
    }

    #[test]
    fn test_forward_trace_reaches_every_procedure_once() {
        let procedures: Vec<String> = ForwardTrace::new(snapshot(), "A")
            .map(|l| l.procedure_id)
            .collect();
        assert_eq!(procedures, vec!["PROC-1", "PROC-3", "PROC-2"]);

        let from_b: Vec<String> = ForwardTrace::new(snapshot(), "B").map(|l| l.procedure_id).collect();
        assert_eq!(from_b, vec!["PROC-2"]);
    }

    #[test]
    fn test_backward_trace_lists_packs_and_cycles() {
        let packs: Vec<TracedPack> = BackwardTrace::new(snapshot(), "PAT-2").collect();
        let cycles: BTreeSet<&str> = packs.iter().map(|p| p.cycle_id.as_str()).collect();
        assert_eq!(packs.len(), 2);
        assert_eq!(cycles, BTreeSet::from(["A", "B"]));
    }

    #[test]
    fn test_unknown_start_is_empty() {
        assert_eq!(ForwardTrace::new(snapshot(), "Z").count(), 0);
        assert_eq!(BackwardTrace::new(snapshot(), "PAT-404").count(), 0);
    }

    #[test]
    fn test_trace_is_lazy() {
        let mut trace = ForwardTrace::new(snapshot(), "A");
        assert!(trace.next().is_some());
        // remaining work is still queued
        assert!(!trace.walk.frontier.is_empty());
    }
}
