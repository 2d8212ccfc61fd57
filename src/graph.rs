// Licensed under the MIT and Apache-2.0 licenses.

//! The serialization graph used for commit-time SSI validation.
//!
//! Nodes are transactions that are active or that committed recently enough
//! to still overlap an active transaction. Edges are typed:
//!
//!   - `Wr`: the source committed a version the target read.
//!   - `Ww`: the source committed a write of a variable before the target
//!     committed its own write of the same variable.
//!   - `Rw`: the source read a version of a variable the target later
//!     overwrote (a read-write antidependency).
//!
//! Snapshot isolation alone admits exactly the anomalies whose serialization
//! cycles contain two *consecutive* `Rw` edges; forbidding those cycles at
//! commit time is what upgrades snapshots to serializability. At `end(T)`
//! every newly materialized edge is incident to `T`, so every newly closed
//! cycle passes through `T` and a bounded DFS from `T` suffices.
//!
//! The graph owns its edges as plain `(from, to, kind)` tuples; transactions
//! only ever hold their own id, so there are no cyclic references to manage.

use crate::TxId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Wr,
    Ww,
    Rw,
}

#[derive(Default)]
pub struct SerializationGraph {
    /// Outgoing adjacency, deduplicated per `(from, to, kind)`.
    edges: BTreeMap<TxId, BTreeSet<(TxId, EdgeKind)>>,
}

impl SerializationGraph {
    pub fn new() -> SerializationGraph {
        SerializationGraph::default()
    }

    pub fn record(&mut self, from: TxId, to: TxId, kind: EdgeKind) {
        if from == to {
            return;
        }
        if self.edges.entry(from).or_default().insert((to, kind)) {
            debug!(?from, ?to, ?kind, "serialization edge recorded");
        }
    }

    pub fn contains(&self, from: TxId, to: TxId, kind: EdgeKind) -> bool {
        self.edges
            .get(&from)
            .is_some_and(|out| out.contains(&(to, kind)))
    }

    /// Drop a node and every edge incident to it. Aborted transactions
    /// contribute no committed versions and no reads to anyone, so they
    /// leave no trace; settled committed transactions are dropped the same
    /// way once nothing active can conflict with them.
    pub fn remove_node(&mut self, tx: TxId) {
        self.edges.remove(&tx);
        for out in self.edges.values_mut() {
            out.retain(|(to, _)| *to != tx);
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Search for a cycle through `pivot` whose cyclic edge-kind sequence
    /// contains two consecutive `Rw` edges (the wrap-around pair counts).
    /// Intermediate nodes are restricted to `allowed`; the active set is
    /// small, so an exhaustive simple-cycle DFS is plenty.
    pub fn has_rw_rw_cycle_through(&self, pivot: TxId, allowed: &BTreeSet<TxId>) -> bool {
        let mut on_path = BTreeSet::new();
        let mut kinds = Vec::new();
        let found = self.dfs(pivot, pivot, allowed, &mut on_path, &mut kinds);
        if found {
            debug!(?pivot, "rw-rw cycle found");
        }
        found
    }

    fn dfs(
        &self,
        node: TxId,
        pivot: TxId,
        allowed: &BTreeSet<TxId>,
        on_path: &mut BTreeSet<TxId>,
        kinds: &mut Vec<EdgeKind>,
    ) -> bool {
        let Some(out) = self.edges.get(&node) else {
            return false;
        };
        for &(to, kind) in out {
            if to == pivot {
                kinds.push(kind);
                let closes = has_consecutive_rw(kinds);
                kinds.pop();
                if closes {
                    return true;
                }
            } else if allowed.contains(&to) && !on_path.contains(&to) {
                on_path.insert(to);
                kinds.push(kind);
                let found = self.dfs(to, pivot, allowed, on_path, kinds);
                kinds.pop();
                on_path.remove(&to);
                if found {
                    return true;
                }
            }
        }
        false
    }
}

/// Two consecutive `Rw` edges in the cyclic sequence `kinds`.
fn has_consecutive_rw(kinds: &[EdgeKind]) -> bool {
    let n = kinds.len();
    if n < 2 {
        return false;
    }
    (0..n).any(|i| kinds[i] == EdgeKind::Rw && kinds[(i + 1) % n] == EdgeKind::Rw)
}
