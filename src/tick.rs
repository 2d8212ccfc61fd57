// Licensed under the MIT and Apache-2.0 licenses.

use serde::{Deserialize, Serialize};

/// Ticks are the fundamental timekeeping type in the system.
///
/// A `Tick` is the 1-based index of a command line in the input stream: the
/// driver advances the tick by exactly one per line, whether or not the line
/// carried an action. Everything that is stamped with time -- transaction
/// starts, version commits, site failures and recoveries -- is stamped with a
/// `Tick`, so the whole history of a run is totally ordered and a run is
/// reproducible from its input alone.
///
/// Tick zero is reserved for the synthetic genesis commit that populates every
/// site's initial versions; no input line ever executes at tick zero.
#[derive(Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl std::fmt::Debug for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("t{}", self.0))
    }
}

impl Tick {
    /// The tick of the synthetic genesis commit.
    pub const GENESIS: Tick = Tick(0);

    pub fn next(self) -> Tick {
        Tick(self.0.checked_add(1).expect("tick overflow"))
    }
}

#[test]
fn test_tick_ordering() {
    assert!(Tick::GENESIS < Tick(1));
    assert_eq!(Tick(3).next(), Tick(4));
    assert_eq!(format!("{:?}", Tick(17)), "t17");
}
