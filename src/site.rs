// Licensed under the MIT and Apache-2.0 licenses.

//! Per-site data manager: version chains, up/down status, and the recovery
//! gating that makes the available-copies protocol safe to read under.
//!
//! Each site owns an append-only chain of committed [Version]s for every
//! variable it holds. Reads are always served from the chain at or below the
//! reader's snapshot tick; pending writes never touch the chain, so nothing
//! uncommitted is ever visible here.
//!
//! Two pieces of per-site state gate reads of replicated variables:
//!
//!   - `readable`: cleared for every replicated variable when the site fails,
//!     and set again only when some transaction commits a fresh write of that
//!     variable here. Until then the local copy may be stale relative to
//!     commits the site missed while down.
//!
//!   - `fail_history`: the append-only list of half-open `[fail, recover)`
//!     intervals. A replicated read at snapshot `S` served from a version
//!     committed at `C` is valid only if the site was continuously up over
//!     `[C, S]` -- otherwise the site may have missed a newer committed
//!     version during an outage inside that window.
//!
//! Non-replicated variables have no other copy to be stale against, so the
//! site is authoritative for them again the moment it recovers.

use crate::{Error, SiteId, Tick, TxId, Value, VarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One committed value of a variable: immutable once appended to a chain.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub value: Value,
    pub commit_tick: Tick,
    pub writer: TxId,
}

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteStatus {
    Up,
    Down,
}

/// A half-open `[failed, recovered)` outage; `recovered` is `None` while the
/// site is still down.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct FailInterval {
    failed: Tick,
    recovered: Option<Tick>,
}

impl FailInterval {
    /// Whether the outage overlaps the closed tick range `[lo, hi]`.
    fn overlaps(&self, lo: Tick, hi: Tick) -> bool {
        self.failed <= hi && self.recovered.map_or(true, |r| r > lo)
    }
}

/// A single site's data manager.
pub struct Site {
    id: SiteId,
    status: SiteStatus,
    chains: BTreeMap<VarId, Vec<Version>>,
    readable: BTreeMap<VarId, bool>,
    fail_history: Vec<FailInterval>,
}

impl Site {
    /// A fresh site with the genesis version of every variable it holds.
    pub fn new(id: SiteId) -> Site {
        let mut chains = BTreeMap::new();
        let mut readable = BTreeMap::new();
        for var in VarId::all().filter(|v| id.holds(*v)) {
            chains.insert(
                var,
                vec![Version {
                    value: var.initial_value(),
                    commit_tick: Tick::GENESIS,
                    writer: TxId::GENESIS,
                }],
            );
            readable.insert(var, true);
        }
        Site {
            id,
            status: SiteStatus::Up,
            chains,
            readable,
            fail_history: Vec::new(),
        }
    }

    pub fn id(&self) -> SiteId {
        self.id
    }

    pub fn status(&self) -> SiteStatus {
        self.status
    }

    pub fn is_up(&self) -> bool {
        self.status == SiteStatus::Up
    }

    pub fn holds(&self, var: VarId) -> bool {
        self.chains.contains_key(&var)
    }

    /// Take the site down, opening a new fail interval. Replicated variables
    /// lose their readable flag here; it stays lost through recovery until a
    /// post-recovery commit installs a fresh copy.
    pub fn fail(&mut self, tick: Tick) -> Result<(), Error> {
        if !self.is_up() {
            return Err(Error::SiteAlreadyDown(self.id));
        }
        debug!(site = ?self.id, ?tick, "site fails");
        self.status = SiteStatus::Down;
        self.fail_history.push(FailInterval {
            failed: tick,
            recovered: None,
        });
        for (var, flag) in self.readable.iter_mut() {
            if var.is_replicated() {
                *flag = false;
            }
        }
        Ok(())
    }

    /// Bring the site back up, closing the open fail interval. The chains were
    /// preserved in memory; non-replicated variables are immediately readable
    /// again, replicated ones wait for a fresh commit.
    pub fn recover(&mut self, tick: Tick) -> Result<(), Error> {
        if self.is_up() {
            return Err(Error::SiteAlreadyUp(self.id));
        }
        debug!(site = ?self.id, ?tick, "site recovers");
        self.status = SiteStatus::Up;
        let open = self
            .fail_history
            .last_mut()
            .expect("recovering site has no fail interval");
        open.recovered = Some(tick);
        Ok(())
    }

    /// Whether any fail *event* happened in the closed range `[lo, hi]`.
    /// Used by commit validation: a write staged against this site is poisoned
    /// if the site went down between the write and the commit attempt.
    pub fn failed_in(&self, lo: Tick, hi: Tick) -> bool {
        self.fail_history
            .iter()
            .any(|iv| iv.failed >= lo && iv.failed <= hi)
    }

    fn continuously_up_over(&self, lo: Tick, hi: Tick) -> bool {
        !self.fail_history.iter().any(|iv| iv.overlaps(lo, hi))
    }

    fn latest_at_or_before(&self, var: VarId, tick: Tick) -> Option<&Version> {
        self.chains
            .get(&var)?
            .iter()
            .rev()
            .find(|v| v.commit_tick <= tick)
    }

    /// Serve a snapshot read: the latest version of `var` committed at or
    /// before `snapshot`, or `None` if this site cannot serve it -- down, not
    /// a holder, gated by recovery, or (for replicated variables) not
    /// continuously up from the version's commit through the snapshot.
    pub fn read_committed(&self, var: VarId, snapshot: Tick) -> Option<&Version> {
        if !self.is_up() || !*self.readable.get(&var)? {
            return None;
        }
        let version = self.latest_at_or_before(var, snapshot)?;
        if var.is_replicated() && !self.continuously_up_over(version.commit_tick, snapshot) {
            return None;
        }
        Some(version)
    }

    /// Whether a read of `var` at `snapshot` could ever be served here, now or
    /// after some future recovery and fresh commit. A replicated copy is
    /// permanently unusable for this snapshot once the site has failed between
    /// the last commit at-or-before the snapshot and the snapshot itself: no
    /// later commit can produce a version inside the snapshot window.
    pub fn serviceable(&self, var: VarId, snapshot: Tick) -> bool {
        let Some(version) = self.latest_at_or_before(var, snapshot) else {
            return false;
        };
        if !var.is_replicated() {
            return true;
        }
        !self
            .fail_history
            .iter()
            .any(|iv| iv.failed > version.commit_tick && iv.failed <= snapshot)
    }

    /// Install a committed write set. Only variables held here are touched;
    /// the caller guarantees the site is up. Replicated variables become
    /// readable again: the fresh copy is current by construction.
    pub fn apply_commit(&mut self, writer: TxId, tick: Tick, writes: &[(VarId, Value)]) {
        debug_assert!(self.is_up(), "apply_commit on a down site");
        for &(var, value) in writes {
            let Some(chain) = self.chains.get_mut(&var) else {
                continue;
            };
            debug_assert!(
                chain.last().map_or(true, |v| v.commit_tick < tick),
                "version chain must stay strictly increasing"
            );
            chain.push(Version {
                value,
                commit_tick: tick,
                writer,
            });
            self.readable.insert(var, true);
            debug!(site = ?self.id, ?var, value, ?tick, "committed version installed");
        }
    }

    /// The full committed history of one variable, oldest first.
    pub fn chain(&self, var: VarId) -> Option<&[Version]> {
        self.chains.get(&var).map(Vec::as_slice)
    }

    /// The chain heads for every variable held here, sorted by variable
    /// index. Down sites report their last committed state: writes are never
    /// applied while down, so the heads are exactly the pre-fail values.
    pub fn dump_row(&self) -> Vec<(VarId, Value)> {
        self.chains
            .iter()
            .map(|(var, chain)| {
                let head = chain.last().expect("chain never empty");
                (*var, head.value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: u64) -> Site {
        Site::new(SiteId(id))
    }

    #[test]
    fn test_genesis_population() {
        let s1 = site(1);
        let s2 = site(2);
        // Odd sites hold only the ten replicated variables.
        assert_eq!(s1.dump_row().len(), 10);
        assert_eq!(s2.dump_row().len(), 12);
        assert!(s2.holds(VarId(1)));
        assert!(!s1.holds(VarId(1)));
        let v = s1.read_committed(VarId(2), Tick(5)).unwrap();
        assert_eq!((v.value, v.commit_tick, v.writer), (20, Tick::GENESIS, TxId::GENESIS));
    }

    #[test]
    fn test_fail_recover_status() {
        let mut s = site(3);
        assert!(s.fail(Tick(2)).is_ok());
        assert!(matches!(s.fail(Tick(3)), Err(Error::SiteAlreadyDown(_))));
        assert!(s.read_committed(VarId(2), Tick(5)).is_none());
        assert!(s.recover(Tick(4)).is_ok());
        assert!(matches!(s.recover(Tick(5)), Err(Error::SiteAlreadyUp(_))));
    }

    #[test]
    fn test_recovery_gates_replicated_reads() {
        let mut s = site(2);
        s.fail(Tick(2)).unwrap();
        s.recover(Tick(3)).unwrap();
        // Replicated copy stays unreadable until a fresh commit lands.
        assert!(s.read_committed(VarId(2), Tick(5)).is_none());
        // The non-replicated variable is authoritative again immediately.
        assert_eq!(s.read_committed(VarId(1), Tick(5)).unwrap().value, 10);
        s.apply_commit(TxId(1), Tick(6), &[(VarId(2), 99)]);
        assert_eq!(s.read_committed(VarId(2), Tick(7)).unwrap().value, 99);
    }

    #[test]
    fn test_continuity_rule() {
        let mut s = site(1);
        s.apply_commit(TxId(1), Tick(1), &[(VarId(4), 44)]);
        s.fail(Tick(3)).unwrap();
        s.recover(Tick(4)).unwrap();
        s.apply_commit(TxId(2), Tick(5), &[(VarId(4), 55)]);
        // Snapshot at tick 2 saw the version from tick 1, but the outage at
        // tick 3 broke continuity between commit and any later snapshot read.
        assert!(s.read_committed(VarId(4), Tick(3)).is_none());
        assert!(!s.serviceable(VarId(4), Tick(3)));
        // A snapshot from after the fresh commit is fine.
        assert_eq!(s.read_committed(VarId(4), Tick(6)).unwrap().value, 55);
    }

    #[test]
    fn test_serviceable_waits_out_future_fail() {
        let mut s = site(1);
        // Fail after the snapshot: the genesis version's window [0, 2] is
        // intact, so the copy can serve this snapshot again after recovery
        // plus a fresh commit.
        s.fail(Tick(5)).unwrap();
        assert!(s.serviceable(VarId(2), Tick(2)));
        assert!(s.read_committed(VarId(2), Tick(2)).is_none());
        s.recover(Tick(6)).unwrap();
        s.apply_commit(TxId(1), Tick(7), &[(VarId(2), 21)]);
        assert_eq!(s.read_committed(VarId(2), Tick(2)).unwrap().value, 20);
    }

    #[test]
    fn test_recover_then_fail_without_commit_changes_nothing() {
        let mut once = site(1);
        once.fail(Tick(2)).unwrap();
        once.recover(Tick(3)).unwrap();

        let mut twice = site(1);
        twice.fail(Tick(2)).unwrap();
        twice.recover(Tick(3)).unwrap();
        twice.fail(Tick(4)).unwrap();
        twice.recover(Tick(5)).unwrap();

        // With no commit in between, the extra fail/recover pair leaves the
        // same observable gating: replicated copies stay unreadable.
        for var in [VarId(2), VarId(4), VarId(20)] {
            assert_eq!(
                once.read_committed(var, Tick(6)).is_none(),
                twice.read_committed(var, Tick(6)).is_none()
            );
            assert!(twice.read_committed(var, Tick(6)).is_none());
        }
    }

    #[test]
    fn test_failed_in_window() {
        let mut s = site(1);
        s.fail(Tick(4)).unwrap();
        s.recover(Tick(6)).unwrap();
        assert!(s.failed_in(Tick(2), Tick(5)));
        assert!(s.failed_in(Tick(4), Tick(4)));
        assert!(!s.failed_in(Tick(5), Tick(9)));
        assert!(!s.failed_in(Tick(1), Tick(3)));
    }

    #[test]
    fn test_dump_row_while_down() {
        let mut s = site(1);
        s.apply_commit(TxId(1), Tick(1), &[(VarId(2), 22)]);
        s.fail(Tick(2)).unwrap();
        let row = s.dump_row();
        assert!(row.contains(&(VarId(2), 22)));
        // Sorted by variable index.
        let vars: Vec<u64> = row.iter().map(|(v, _)| v.0).collect();
        let mut sorted = vars.clone();
        sorted.sort_unstable();
        assert_eq!(vars, sorted);
    }
}
