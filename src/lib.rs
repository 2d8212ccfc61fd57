// Licensed under the MIT and Apache-2.0 licenses.

//! # Overview
//!
//! This is a small, deterministic simulation of a replicated in-memory
//! transactional key-value store. It strives to be as small and simple as
//! possible while exercising a combination of features that is genuinely
//! fiddly to get right:
//!
//!   - Serializable Snapshot Isolation (SSI)
//!
//!   - Available-copies replication
//!
//!   - Site failure and recovery, with reads gated on recovery state
//!
//! ## Summary
//!
//! The short version of the protocol is:
//!
//!   - Time is logical: one input line is one tick, and the tick counter is
//!     the only clock. Every observable output is a deterministic function
//!     of the input stream.
//!
//!   - Twenty integer variables live on ten sites; even-indexed variables
//!     are replicated everywhere, odd-indexed ones live on a single home
//!     site. Each site keeps an append-only multi-version chain per
//!     variable.
//!
//!   - A transaction reads from the snapshot defined by its begin tick:
//!     always a version committed at or before that tick, served by any up
//!     copy that has been continuously up from that version's commit through
//!     the snapshot. Writes are buffered privately and touch no site until
//!     commit.
//!
//!   - At `end`, validation runs in a fixed order: the available-copies
//!     checks (every buffered write had a target, and no targeted copy
//!     failed in the meantime), then first-committer-wins against
//!     overlapping committed writers, then a search of the serialization
//!     graph for a cycle with two consecutive read-write antidependency
//!     edges -- the one shape of cycle snapshot isolation admits. Survivors
//!     install their writes on every up copy in one step.
//!
//!   - A failed site refuses everything until it recovers; after recovery
//!     its replicated copies stay unreadable until a fresh commit proves
//!     them current again. Reads that find no usable copy wait, and are
//!     re-driven every tick; reads that provably never can be served abort
//!     their transaction instead.
//!
//! ## Caveats
//!
//! This crate is a model, not a database:
//!
//!  - Everything is in memory and single-threaded; "replication" moves no
//!    bytes and "failure" is a bit flip. The interesting part is the
//!    interaction of the validation rules under interleaved events, not the
//!    plumbing.
//!
//!  - There is no automatic restart of aborted transactions, no query
//!    surface beyond point reads and blind writes, and no durability.
//!
//! ## References
//!
//! Michael J. Cahill, Uwe Röhm, and Alan D. Fekete. Serializable Isolation
//! for Snapshot Databases. SIGMOD 2008.
//!
//! DOI: <https://doi.org/10.1145/1376616.1376690>
//!
//! Philip A. Bernstein, Vassos Hadzilacos, and Nathan Goodman. Concurrency
//! Control and Recovery in Database Systems. Addison-Wesley, 1987. Chapter 8
//! describes the available-copies algorithms this simulation follows.
//!
//! ## Name
//!
//! Wiktionary:
//!
//! > εἴδωλον (eídōlon): a phantom, an image in the mind, an unsubstantial
//! > double of a thing.
//!
//! The plural. An available-copies store keeps unsubstantial doubles of
//! every replicated variable, and the whole system is itself an eidolon of
//! a database.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod command;
mod driver;
mod graph;
mod manager;
mod site;
mod tick;
mod transaction;
mod vars;

pub use command::{Command, TxId};
pub use driver::{Driver, Event, WaitReason};
pub use graph::{EdgeKind, SerializationGraph};
pub use manager::TransactionManager;
pub use site::{Site, SiteStatus, Version};
pub use tick::Tick;
pub use transaction::{AbortReason, PendingWrite, ReadRecord, Txn, TxnKind, TxnStatus};
pub use vars::{Placement, SiteId, Value, VarId, SITE_COUNT, VARIABLE_COUNT};

/// Everything that can go wrong with an input line or a misdirected command.
/// Transaction aborts are *not* errors; they are ordinary protocol outcomes
/// reported through [Event]s with an [AbortReason].
#[derive(Error, Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Error {
    #[error("malformed command line: {0:?}")]
    MalformedLine(String),
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    #[error("no such variable: {0:?}")]
    UnknownVariable(String),
    #[error("no such site: {0}")]
    UnknownSite(u64),
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),
    #[error("transaction {0} already exists")]
    DuplicateTransaction(TxId),
    #[error("transaction {0} is not active")]
    TransactionNotActive(TxId),
    #[error("read-only transaction {0} cannot write")]
    ReadOnlyWrite(TxId),
    #[error("site {0} is already down")]
    SiteAlreadyDown(SiteId),
    #[error("site {0} is already up")]
    SiteAlreadyUp(SiteId),
}

impl Error {
    /// Input errors make the run unclean (nonzero exit); protocol violations
    /// are merely reported and ignored.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedLine(_)
                | Error::UnknownCommand(_)
                | Error::UnknownVariable(_)
                | Error::UnknownSite(_)
        )
    }
}
