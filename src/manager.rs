// Licensed under the MIT and Apache-2.0 licenses.

//! The transaction manager: the single orchestrator that owns the transaction
//! registry, the serialization graph, and the ten sites.
//!
//! Reads are routed under the available-copies rule: any up copy that passes
//! the recovery and continuity checks may serve, tried in ascending site
//! order so runs are deterministic. Writes are buffered in the writer and
//! only reach the sites at commit. `end` runs the validation pipeline in a
//! fixed order -- available-copies checks, then first-committer-wins, then
//! the SSI cycle search -- and the first check that fails names the abort
//! reason.
//!
//! Sites never call back into the manager; they are mutated only here, during
//! `apply_commit` and fail/recover events.

use crate::{
    AbortReason, EdgeKind, Error, Event, PendingWrite, Placement, ReadRecord,
    SerializationGraph, Site, SiteId, Tick, TxId, Txn, TxnKind, TxnStatus, Value, VarId, Version,
    WaitReason,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Outcome of a single read attempt against the current site states.
enum ReadAttempt {
    Served(Event),
    Blocked(WaitReason),
    /// Every copy failed between its last in-snapshot commit and the
    /// reader's snapshot; no recovery can ever repair that.
    Unservable,
}

pub struct TransactionManager {
    sites: BTreeMap<SiteId, Site>,
    txns: BTreeMap<TxId, Txn>,
    graph: SerializationGraph,
    /// Committed transactions still retained in the graph: everything that
    /// might yet conflict with an active transaction.
    retained: BTreeSet<TxId>,
    /// Transactions with a pending read, in the order they blocked.
    waiting: Vec<TxId>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        TransactionManager::new()
    }
}

impl TransactionManager {
    pub fn new() -> TransactionManager {
        TransactionManager {
            sites: SiteId::all().map(|id| (id, Site::new(id))).collect(),
            txns: BTreeMap::new(),
            graph: SerializationGraph::new(),
            retained: BTreeSet::new(),
            waiting: Vec::new(),
        }
    }

    pub fn site(&self, id: SiteId) -> Option<&Site> {
        self.sites.get(&id)
    }

    pub fn transaction_status(&self, tx: TxId) -> Option<TxnStatus> {
        self.txns.get(&tx).map(|t| t.status)
    }

    pub fn abort_reason(&self, tx: TxId) -> Option<AbortReason> {
        self.txns.get(&tx).and_then(|t| t.abort_reason)
    }

    fn require_active(&self, tx: TxId) -> Result<(), Error> {
        let txn = self.txns.get(&tx).ok_or(Error::UnknownTransaction(tx))?;
        if txn.is_active() {
            Ok(())
        } else {
            Err(Error::TransactionNotActive(tx))
        }
    }

    fn unqueue(&mut self, tx: TxId) {
        self.waiting.retain(|t| *t != tx);
    }

    pub fn begin(&mut self, tx: TxId, now: Tick) -> Result<Vec<Event>, Error> {
        self.admit(tx, TxnKind::ReadWrite, now)
    }

    pub fn begin_ro(&mut self, tx: TxId, now: Tick) -> Result<Vec<Event>, Error> {
        self.admit(tx, TxnKind::ReadOnly, now)
    }

    fn admit(&mut self, tx: TxId, kind: TxnKind, now: Tick) -> Result<Vec<Event>, Error> {
        if tx == TxId::GENESIS || self.txns.contains_key(&tx) {
            return Err(Error::DuplicateTransaction(tx));
        }
        info!(?tx, ?kind, start = ?now, "transaction begins");
        self.txns.insert(tx, Txn::new(tx, kind, now));
        Ok(Vec::new())
    }

    /// `R(T, x)`: serve from the transaction's own buffer if it wrote `x`,
    /// otherwise from the first qualifying copy in site order. If no copy
    /// qualifies the transaction either waits (some copy may recover into
    /// usefulness) or aborts outright (provably none ever can).
    pub fn read(&mut self, tx: TxId, var: VarId, now: Tick) -> Result<Vec<Event>, Error> {
        self.require_active(tx)?;
        match self.attempt_read(tx, var, now) {
            ReadAttempt::Served(event) => {
                self.unqueue(tx);
                Ok(vec![event])
            }
            ReadAttempt::Blocked(reason) => {
                let txn = self.txns.get_mut(&tx).expect("active transaction");
                txn.blocked_on = Some(var);
                debug!(?tx, ?var, "read blocked");
                if !self.waiting.contains(&tx) {
                    self.waiting.push(tx);
                }
                Ok(vec![Event::Waiting { tx, var, reason }])
            }
            ReadAttempt::Unservable => {
                Ok(self.abort_txn(tx, AbortReason::SnapshotUnavailable))
            }
        }
    }

    fn attempt_read(&mut self, tx: TxId, var: VarId, now: Tick) -> ReadAttempt {
        let txn = self.txns.get(&tx).expect("read on unknown transaction");
        let start = txn.start_tick;

        // Own pending writes are visible to self, and only to self.
        if let Some(w) = txn.writes.get(&var) {
            let value = w.value;
            let txn = self.txns.get_mut(&tx).expect("active transaction");
            txn.blocked_on = None;
            return ReadAttempt::Served(Event::ReadValue {
                tx,
                var,
                value,
                site: None,
            });
        }

        let hit: Option<(SiteId, Version)> = match var.placement() {
            Placement::NonReplicated(home) => {
                let site = &self.sites[&home];
                if !site.is_up() {
                    return ReadAttempt::Blocked(WaitReason::SiteDown(home));
                }
                site.read_committed(var, start).map(|v| (home, *v))
            }
            Placement::Replicated => self
                .sites
                .values()
                .find_map(|s| s.read_committed(var, start).map(|v| (s.id(), *v))),
        };

        let Some((site_id, version)) = hit else {
            // A down or freshly recovered copy can become readable again
            // after a future commit, as long as its outage did not land
            // inside the snapshot window.
            if self.sites.values().any(|s| s.serviceable(var, start)) {
                return ReadAttempt::Blocked(WaitReason::NoReadableCopy);
            }
            return ReadAttempt::Unservable;
        };

        if version.writer != TxId::GENESIS {
            self.graph.record(version.writer, tx, EdgeKind::Wr);
        }
        let txn = self.txns.get_mut(&tx).expect("active transaction");
        txn.reads.push(ReadRecord {
            var,
            site: site_id,
            value: version.value,
            version_tick: version.commit_tick,
            writer: version.writer,
            read_tick: now,
        });
        txn.blocked_on = None;
        debug!(?tx, ?var, value = version.value, site = ?site_id, "read served");
        ReadAttempt::Served(Event::ReadValue {
            tx,
            var,
            value: version.value,
            site: Some(site_id),
        })
    }

    /// Re-drive every pending read, in the order the readers blocked. Called
    /// by the driver at the top of each tick.
    pub fn retry_waiting(&mut self, now: Tick) -> Vec<Event> {
        let mut events = Vec::new();
        for tx in self.waiting.clone() {
            let Some(txn) = self.txns.get(&tx) else {
                self.unqueue(tx);
                continue;
            };
            if !txn.is_active() {
                self.unqueue(tx);
                continue;
            }
            let Some(var) = txn.blocked_on else {
                self.unqueue(tx);
                continue;
            };
            match self.attempt_read(tx, var, now) {
                ReadAttempt::Served(event) => {
                    debug!(?tx, ?var, "pending read unblocked");
                    self.unqueue(tx);
                    events.push(event);
                }
                ReadAttempt::Blocked(_) => {}
                ReadAttempt::Unservable => {
                    events.extend(self.abort_txn(tx, AbortReason::SnapshotUnavailable));
                }
            }
        }
        events
    }

    /// `W(T, x, v)`: buffer the write and record which copies it targets.
    /// Nothing reaches any site chain until commit. An empty target set is
    /// tolerated here; it dooms the transaction at `end` instead, keeping
    /// one action per tick.
    pub fn write(
        &mut self,
        tx: TxId,
        var: VarId,
        value: Value,
        now: Tick,
    ) -> Result<Vec<Event>, Error> {
        self.require_active(tx)?;
        if self.txns[&tx].kind == TxnKind::ReadOnly {
            return Err(Error::ReadOnlyWrite(tx));
        }
        let targets: Vec<SiteId> = self
            .sites
            .values()
            .filter(|s| s.is_up() && s.holds(var))
            .map(Site::id)
            .collect();
        debug!(?tx, ?var, value, ?targets, "write buffered");
        let txn = self.txns.get_mut(&tx).expect("active transaction");
        txn.writes.insert(
            var,
            PendingWrite {
                value,
                staged_tick: now,
                targets: targets.clone(),
            },
        );
        Ok(vec![Event::WroteBuffered {
            tx,
            var,
            value,
            sites: targets,
        }])
    }

    /// `end(T)`: run validation and either install the write set on every up
    /// copy or abort with the first failing check's reason.
    pub fn end(&mut self, tx: TxId, now: Tick) -> Result<Vec<Event>, Error> {
        self.require_active(tx)?;
        // A still-pending read produced no output and no read record;
        // validation covers only what was actually served.
        self.txns.get_mut(&tx).expect("active transaction").blocked_on = None;
        self.unqueue(tx);

        if !self.txns[&tx].writes.is_empty() {
            if let Some(reason) = self.validate(tx, now) {
                return Ok(self.abort_txn(tx, reason));
            }
        }
        Ok(self.commit_txn(tx, now))
    }

    fn validate(&mut self, tx: TxId, now: Tick) -> Option<AbortReason> {
        let start = self.txns[&tx].start_tick;
        let staged: Vec<(VarId, Tick, Vec<SiteId>)> = self.txns[&tx]
            .writes
            .iter()
            .map(|(var, w)| (*var, w.staged_tick, w.targets.clone()))
            .collect();

        // 1. Available copies: every write must have had at least one target,
        // and none of the targeted copies may have failed since the write was
        // staged -- a failed copy may have lost the record of concurrent
        // commits it held.
        for (var, staged_tick, targets) in &staged {
            if targets.is_empty() {
                info!(?tx, ?var, "no copy was up for a buffered write");
                return Some(AbortReason::NoWriteTarget);
            }
            if targets
                .iter()
                .any(|s| self.sites[s].failed_in(*staged_tick, now))
            {
                info!(?tx, ?var, "targeted copy failed before commit");
                return Some(AbortReason::SiteFailedAfterWrite);
            }
        }

        // 2. First committer wins: an overlapping committed writer of any of
        // our variables beats us.
        for (var, _, _) in &staged {
            let lost = self.txns.values().any(|other| {
                other.id != tx
                    && other.status == TxnStatus::Committed
                    && other.commit_tick.is_some_and(|c| c > start)
                    && other.wrote(*var)
            });
            if lost {
                info!(?tx, ?var, "first-committer-wins conflict");
                return Some(AbortReason::WwConflict);
            }
        }

        // 3. SSI: materialize the edges this commit would create and refuse
        // it if they close a cycle with two consecutive rw antidependencies.
        self.materialize_commit_edges(tx);
        let committed = self.retained.clone();
        if self.graph.has_rw_rw_cycle_through(tx, &committed) {
            info!(?tx, "commit would close an rw-rw cycle");
            return Some(AbortReason::SsiRwRwCycle);
        }
        None
    }

    /// Every edge the committing transaction participates in against the
    /// retained committed set. WR edges were already recorded when the reads
    /// were served; everything else is derived from committed facts here.
    fn materialize_commit_edges(&mut self, tx: TxId) {
        let (start, write_vars, read_vars) = {
            let txn = &self.txns[&tx];
            (
                txn.start_tick,
                txn.writes.keys().copied().collect::<Vec<VarId>>(),
                txn.reads.iter().map(|r| r.var).collect::<BTreeSet<VarId>>(),
            )
        };
        for other in self.retained.clone() {
            let (o_commit, o_writes, o_reads) = {
                let ot = &self.txns[&other];
                (
                    ot.commit_tick.expect("retained transaction has committed"),
                    ot.writes.keys().copied().collect::<BTreeSet<VarId>>(),
                    ot.reads.iter().map(|r| r.var).collect::<BTreeSet<VarId>>(),
                )
            };
            for var in &write_vars {
                // An earlier committed write of the same variable orders the
                // committed writer before us; a committed read of it is a
                // version we are about to overwrite.
                if o_writes.contains(var) {
                    self.graph.record(other, tx, EdgeKind::Ww);
                }
                if o_reads.contains(var) {
                    self.graph.record(other, tx, EdgeKind::Rw);
                }
            }
            if o_commit > start {
                for var in &read_vars {
                    if o_writes.contains(var) {
                        self.graph.record(tx, other, EdgeKind::Rw);
                    }
                }
            }
        }
    }

    fn commit_txn(&mut self, tx: TxId, now: Tick) -> Vec<Event> {
        let writes: Vec<(VarId, Value)> = {
            let txn = self.txns.get_mut(&tx).expect("active transaction");
            txn.status = TxnStatus::Committed;
            txn.commit_tick = Some(now);
            txn.writes.iter().map(|(var, w)| (*var, w.value)).collect()
        };
        if !writes.is_empty() {
            for site in self.sites.values_mut() {
                if site.is_up() {
                    site.apply_commit(tx, now, &writes);
                }
            }
        }
        self.retained.insert(tx);
        info!(?tx, commit = ?now, "transaction commits");
        self.collect_settled();
        vec![Event::Committed { tx }]
    }

    fn abort_txn(&mut self, tx: TxId, reason: AbortReason) -> Vec<Event> {
        {
            let txn = self.txns.get_mut(&tx).expect("aborting unknown transaction");
            txn.status = TxnStatus::Aborted;
            txn.abort_reason = Some(reason);
            txn.blocked_on = None;
            txn.writes.clear();
        }
        // An aborted transaction contributes no committed versions and no
        // reads to anyone: its node disappears from the graph entirely.
        self.graph.remove_node(tx);
        self.unqueue(tx);
        info!(?tx, %reason, "transaction aborts");
        self.collect_settled();
        vec![Event::Aborted { tx, reason }]
    }

    /// Committed transactions stay in the graph only while some active
    /// transaction began before they committed; once nothing can conflict
    /// with them anymore they are settled and leave the graph.
    fn collect_settled(&mut self) {
        let min_active_start = self
            .txns
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.start_tick)
            .min();
        let settled: Vec<TxId> = self
            .retained
            .iter()
            .copied()
            .filter(|t| {
                let commit = self.txns[t].commit_tick.expect("retained has committed");
                min_active_start.map_or(true, |m| commit <= m)
            })
            .collect();
        for tx in settled {
            debug!(?tx, "settled transaction leaves the graph");
            self.graph.remove_node(tx);
            self.retained.remove(&tx);
        }
    }

    pub fn fail_site(&mut self, site: SiteId, now: Tick) -> Result<Vec<Event>, Error> {
        let s = self
            .sites
            .get_mut(&site)
            .ok_or(Error::UnknownSite(site.0))?;
        s.fail(now)?;
        Ok(vec![Event::SiteFailed { site }])
    }

    pub fn recover_site(&mut self, site: SiteId, now: Tick) -> Result<Vec<Event>, Error> {
        let s = self
            .sites
            .get_mut(&site)
            .ok_or(Error::UnknownSite(site.0))?;
        s.recover(now)?;
        Ok(vec![Event::SiteRecovered { site }])
    }

    /// One dump line per site, down sites included: their chains show the
    /// last committed state from before the failure, since nothing is ever
    /// applied while down.
    pub fn dump(&self) -> Vec<Event> {
        self.sites
            .values()
            .map(|s| Event::DumpLine {
                site: s.id(),
                values: s.dump_row(),
            })
            .collect()
    }
}
