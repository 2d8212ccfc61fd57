// Licensed under the MIT and Apache-2.0 licenses.

//! A transaction is identified by its [TxId] and stamped with the tick of its
//! `begin`, which doubles as its snapshot: every read it is ever served comes
//! from a version committed at or before that tick.
//!
//! Writes are buffered privately in the record until `end`; no other
//! transaction (and no site chain) ever observes them before commit.

use crate::{SiteId, Tick, TxId, Value, VarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnKind {
    ReadWrite,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

/// Why a transaction was aborted. These are expected outcomes of the
/// protocol, not errors; the tag is printed alongside the abort event.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbortReason {
    /// A site in a buffered write's target set failed before commit.
    SiteFailedAfterWrite,
    /// Every copy of a written variable was down when the write was staged.
    NoWriteTarget,
    /// Another overlapping transaction committed a write of the same
    /// variable first.
    WwConflict,
    /// Committing would close a serialization cycle with two consecutive
    /// read-write antidependency edges.
    SsiRwRwCycle,
    /// No copy can ever serve one of the transaction's reads at its snapshot.
    SnapshotUnavailable,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AbortReason::SiteFailedAfterWrite => "site-failed-after-write",
            AbortReason::NoWriteTarget => "available-copies-no-target",
            AbortReason::WwConflict => "ww-conflict",
            AbortReason::SsiRwRwCycle => "ssi-rw-rw-cycle",
            AbortReason::SnapshotUnavailable => "snapshot-unavailable",
        })
    }
}

/// A buffered write plus the copies it targeted when staged. The target set
/// is what commit validation replays the fail history against: if any of
/// these sites went down between `staged_tick` and the commit attempt, the
/// available-copies rule aborts the writer.
#[derive(Clone, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingWrite {
    pub value: Value,
    pub staged_tick: Tick,
    pub targets: Vec<SiteId>,
}

/// One served read: which copy served it, what it returned, and which
/// version (commit tick and writer) backed it. The backing version is what
/// the serialization graph's WR and RW edges are derived from.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadRecord {
    pub var: VarId,
    pub site: SiteId,
    pub value: Value,
    pub version_tick: Tick,
    pub writer: TxId,
    pub read_tick: Tick,
}

pub struct Txn {
    pub id: TxId,
    pub kind: TxnKind,
    pub status: TxnStatus,
    pub start_tick: Tick,
    pub commit_tick: Option<Tick>,
    pub writes: BTreeMap<VarId, PendingWrite>,
    pub reads: Vec<ReadRecord>,
    /// Set while a read is pending on an unavailable copy; the driver
    /// re-drives it each tick.
    pub blocked_on: Option<VarId>,
    pub abort_reason: Option<AbortReason>,
}

impl Txn {
    pub fn new(id: TxId, kind: TxnKind, start_tick: Tick) -> Txn {
        Txn {
            id,
            kind,
            status: TxnStatus::Active,
            start_tick,
            commit_tick: None,
            writes: BTreeMap::new(),
            reads: Vec::new(),
            blocked_on: None,
            abort_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TxnStatus::Active
    }

    pub fn has_read(&self, var: VarId) -> bool {
        self.reads.iter().any(|r| r.var == var)
    }

    pub fn wrote(&self, var: VarId) -> bool {
        self.writes.contains_key(&var)
    }
}
