// Licensed under the MIT and Apache-2.0 licenses.

//! The tick driver and the event log it emits.
//!
//! One input line is one logical tick, whether or not it carries an action.
//! Before executing a line the driver re-drives every read that is waiting on
//! an unavailable copy, so a recovery on line `n` can unblock a reader on
//! line `n+1`. All observable output is a sequence of [Event]s in strict
//! tick order; given the same input the log is bit-identical.
//!
//! Input errors (malformed lines, unknown commands, out-of-range ids) and
//! protocol violations (acting on an unknown or finished transaction,
//! failing a down site) are reported out-of-band: the offending line is
//! skipped and the tick still advances.

use crate::{
    AbortReason, Command, Error, SiteId, TransactionManager, Tick, TxId, Value, VarId,
};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use tracing::{debug, warn};

/// Why a read could not be served this tick.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitReason {
    /// The only copy lives on a down site.
    SiteDown(SiteId),
    /// No copy currently passes the continuity and recovery checks, but one
    /// could after a recovery and a fresh commit.
    NoReadableCopy,
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::SiteDown(site) => write!(f, "site {} is down", site),
            WaitReason::NoReadableCopy => f.write_str("no copy is currently readable"),
        }
    }
}

/// One line of observable output.
#[derive(Clone, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// A served read. `site` is `None` when the value came from the
    /// transaction's own write buffer.
    ReadValue {
        tx: TxId,
        var: VarId,
        value: Value,
        site: Option<SiteId>,
    },
    /// A read parked until some copy becomes readable.
    Waiting {
        tx: TxId,
        var: VarId,
        reason: WaitReason,
    },
    /// A write buffered, listing the copies it targeted.
    WroteBuffered {
        tx: TxId,
        var: VarId,
        value: Value,
        sites: Vec<SiteId>,
    },
    Committed {
        tx: TxId,
    },
    Aborted {
        tx: TxId,
        reason: AbortReason,
    },
    SiteFailed {
        site: SiteId,
    },
    SiteRecovered {
        site: SiteId,
    },
    /// One site's chain heads, sorted by variable index.
    DumpLine {
        site: SiteId,
        values: Vec<(VarId, Value)>,
    },
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::ReadValue { var, value, .. } => write!(f, "{}: {}", var, value),
            Event::Waiting { tx, var, reason } => {
                write!(f, "{} waits on {} ({})", tx, var, reason)
            }
            Event::WroteBuffered {
                tx,
                var,
                value,
                sites,
            } => {
                write!(f, "{} writes {}: {} to ", tx, var, value)?;
                if sites.is_empty() {
                    f.write_str("no sites")
                } else {
                    f.write_str("sites ")?;
                    for (i, site) in sites.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", site)?;
                    }
                    Ok(())
                }
            }
            Event::Committed { tx } => write!(f, "{} commits", tx),
            Event::Aborted { tx, reason } => write!(f, "{} aborts ({})", tx, reason),
            Event::SiteFailed { site } => write!(f, "site {} fails", site),
            Event::SiteRecovered { site } => write!(f, "site {} recovers", site),
            Event::DumpLine { site, values } => {
                write!(f, "site {} -", site)?;
                for (i, (var, value)) in values.iter().enumerate() {
                    write!(f, "{} {}: {}", if i > 0 { "," } else { "" }, var, value)?;
                }
                Ok(())
            }
        }
    }
}

/// The line-at-a-tick command loop around a [TransactionManager].
pub struct Driver {
    tm: TransactionManager,
    tick: Tick,
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl Driver {
    pub fn new() -> Driver {
        Driver {
            tm: TransactionManager::new(),
            tick: Tick::GENESIS,
        }
    }

    pub fn now(&self) -> Tick {
        self.tick
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.tm
    }

    /// Execute one input line: advance the tick, re-drive pending waits,
    /// then parse and run the line's command. Events are returned in the
    /// order they occurred; a parse or protocol error skips only the
    /// command itself.
    pub fn step(&mut self, line: &str) -> (Vec<Event>, Option<Error>) {
        self.tick = self.tick.next();
        let now = self.tick;
        debug!(tick = ?now, line, "tick");
        let mut events = self.tm.retry_waiting(now);
        match Command::parse(line) {
            Ok(None) => (events, None),
            Ok(Some(cmd)) => match self.dispatch(cmd, now) {
                Ok(more) => {
                    events.extend(more);
                    (events, None)
                }
                Err(e) => {
                    warn!(tick = ?now, error = %e, "protocol violation ignored");
                    (events, Some(e))
                }
            },
            Err(e) => {
                warn!(tick = ?now, error = %e, "input line skipped");
                (events, Some(e))
            }
        }
    }

    fn dispatch(&mut self, cmd: Command, now: Tick) -> Result<Vec<Event>, Error> {
        match cmd {
            Command::Begin { tx } => self.tm.begin(tx, now),
            Command::BeginRo { tx } => self.tm.begin_ro(tx, now),
            Command::Read { tx, var } => self.tm.read(tx, var, now),
            Command::Write { tx, var, value } => self.tm.write(tx, var, value, now),
            Command::End { tx } => self.tm.end(tx, now),
            Command::Fail { site } => self.tm.fail_site(site, now),
            Command::Recover { site } => self.tm.recover_site(site, now),
            Command::Dump => Ok(self.tm.dump()),
        }
    }

    /// Run a whole command stream, printing events to `out` and errors to
    /// `err`. Returns `true` on a clean run: protocol violations are
    /// reported but tolerated, malformed input is not.
    pub fn run<R: BufRead, O: Write, E: Write>(
        &mut self,
        input: R,
        mut out: O,
        mut err: E,
    ) -> io::Result<bool> {
        let mut clean = true;
        for line in input.lines() {
            let line = line?;
            let (events, error) = self.step(&line);
            for event in &events {
                writeln!(out, "{}", event)?;
            }
            if let Some(e) = error {
                writeln!(err, "line {}: {}", self.tick.0, e)?;
                if e.is_input_error() {
                    clean = false;
                }
            }
        }
        Ok(clean)
    }
}
