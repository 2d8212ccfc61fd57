// Licensed under the MIT and Apache-2.0 licenses.

//! The fixed topology of the simulated cluster: which variables exist, what
//! they start as, and which sites hold a copy of each.
//!
//! There are twenty integer variables `x1..x20` spread over ten sites.
//! Even-indexed variables are replicated on every site; odd-indexed `xi`
//! lives on exactly one site, `1 + (i mod 10)`. The initial value of `xi`
//! is `10*i`, committed at tick zero by the genesis writer.

use crate::Error;
use serde::{Deserialize, Serialize};

pub const SITE_COUNT: u64 = 10;
pub const VARIABLE_COUNT: u64 = 20;

/// Values are plain integers; there is no schema and no other type.
pub type Value = i64;

/// Identifier of one of the ten sites, `1..=10`.
#[derive(Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteId(pub u64);

/// Identifier of one of the twenty variables, `1..=20`.
#[derive(Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId(pub u64);

/// Where the copies of a variable live. The read and write paths branch on
/// this tag rather than on any per-site dynamic dispatch.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placement {
    /// A copy on every site.
    Replicated,
    /// A single copy on the named home site.
    NonReplicated(SiteId),
}

impl std::fmt::Debug for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("s{}", self.0))
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl std::fmt::Debug for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("x{}", self.0))
    }
}

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("x{}", self.0))
    }
}

impl SiteId {
    pub fn new(ix: u64) -> Result<SiteId, Error> {
        if (1..=SITE_COUNT).contains(&ix) {
            Ok(SiteId(ix))
        } else {
            Err(Error::UnknownSite(ix))
        }
    }

    pub fn all() -> impl Iterator<Item = SiteId> {
        (1..=SITE_COUNT).map(SiteId)
    }

    /// Whether this site holds a copy of `var`.
    pub fn holds(self, var: VarId) -> bool {
        match var.placement() {
            Placement::Replicated => true,
            Placement::NonReplicated(home) => home == self,
        }
    }
}

impl VarId {
    pub fn new(ix: u64) -> Result<VarId, Error> {
        if (1..=VARIABLE_COUNT).contains(&ix) {
            Ok(VarId(ix))
        } else {
            Err(Error::UnknownVariable(format!("x{}", ix)))
        }
    }

    pub fn all() -> impl Iterator<Item = VarId> {
        (1..=VARIABLE_COUNT).map(VarId)
    }

    pub fn placement(self) -> Placement {
        if self.0 % 2 == 0 {
            Placement::Replicated
        } else {
            Placement::NonReplicated(SiteId(1 + self.0 % SITE_COUNT))
        }
    }

    pub fn is_replicated(self) -> bool {
        matches!(self.placement(), Placement::Replicated)
    }

    pub fn initial_value(self) -> Value {
        10 * self.0 as Value
    }
}
