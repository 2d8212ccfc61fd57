// Licensed under the MIT and Apache-2.0 licenses.

//! The line-oriented command language the driver speaks.
//!
//! One command per line, arguments parenthesized and comma-separated,
//! whitespace insensitive. Anything after `//` is a comment. A line that is
//! blank (or all comment) still advances the tick; it just carries no action.

use crate::{Error, SiteId, Value, VarId};
use serde::{Deserialize, Serialize};

/// Identifier of a transaction. Transactions are named `T1`, `T2`, ... in the
/// input; `T0` is reserved for the genesis writer of the initial versions and
/// can never be begun.
#[derive(Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl TxId {
    /// The synthetic writer of every variable's initial version.
    pub const GENESIS: TxId = TxId(0);

    fn parse(token: &str) -> Result<TxId, Error> {
        let digits = token
            .strip_prefix('T')
            .or_else(|| token.strip_prefix('t'))
            .ok_or_else(|| Error::MalformedLine(token.to_string()))?;
        let n = digits
            .parse::<u64>()
            .map_err(|_| Error::MalformedLine(token.to_string()))?;
        Ok(TxId(n))
    }
}

impl std::fmt::Debug for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("T{}", self.0))
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("T{}", self.0))
    }
}

fn parse_var(token: &str) -> Result<VarId, Error> {
    let digits = token
        .strip_prefix('x')
        .or_else(|| token.strip_prefix('X'))
        .ok_or_else(|| Error::UnknownVariable(token.to_string()))?;
    let n = digits
        .parse::<u64>()
        .map_err(|_| Error::UnknownVariable(token.to_string()))?;
    VarId::new(n)
}

fn parse_site(token: &str) -> Result<SiteId, Error> {
    let n = token
        .parse::<u64>()
        .map_err(|_| Error::MalformedLine(token.to_string()))?;
    SiteId::new(n)
}

fn parse_value(token: &str) -> Result<Value, Error> {
    token
        .parse::<Value>()
        .map_err(|_| Error::MalformedLine(token.to_string()))
}

/// One parsed input action.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Begin { tx: TxId },
    BeginRo { tx: TxId },
    Read { tx: TxId, var: VarId },
    Write { tx: TxId, var: VarId, value: Value },
    End { tx: TxId },
    Fail { site: SiteId },
    Recover { site: SiteId },
    Dump,
}

impl Command {
    /// Parse a single input line. `Ok(None)` is a blank or comment-only line:
    /// the tick still advances but there is nothing to execute.
    pub fn parse(line: &str) -> Result<Option<Command>, Error> {
        let line = line.split("//").next().unwrap_or("").trim();
        if line.is_empty() {
            return Ok(None);
        }
        let malformed = || Error::MalformedLine(line.to_string());
        let open = line.find('(').ok_or_else(malformed)?;
        let close = line.rfind(')').ok_or_else(malformed)?;
        if close < open || !line[close + 1..].trim().is_empty() {
            return Err(malformed());
        }
        let name = line[..open].trim().to_ascii_lowercase();
        let inner = line[open + 1..close].trim();
        let args: Vec<&str> = if inner.is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(str::trim).collect()
        };

        let cmd = match (name.as_str(), args.as_slice()) {
            ("begin", [tx]) => Command::Begin { tx: TxId::parse(tx)? },
            ("beginro", [tx]) => Command::BeginRo { tx: TxId::parse(tx)? },
            ("r", [tx, var]) => Command::Read {
                tx: TxId::parse(tx)?,
                var: parse_var(var)?,
            },
            ("w", [tx, var, value]) => Command::Write {
                tx: TxId::parse(tx)?,
                var: parse_var(var)?,
                value: parse_value(value)?,
            },
            ("end", [tx]) => Command::End { tx: TxId::parse(tx)? },
            ("fail", [site]) => Command::Fail { site: parse_site(site)? },
            ("recover", [site]) => Command::Recover { site: parse_site(site)? },
            ("dump", []) => Command::Dump,
            ("begin" | "beginro" | "r" | "w" | "end" | "fail" | "recover" | "dump", _) => {
                return Err(malformed())
            }
            _ => return Err(Error::UnknownCommand(name)),
        };
        Ok(Some(cmd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        assert_eq!(
            Command::parse("begin(T1)").unwrap(),
            Some(Command::Begin { tx: TxId(1) })
        );
        assert_eq!(
            Command::parse(" R( T2 , x4 ) ").unwrap(),
            Some(Command::Read {
                tx: TxId(2),
                var: VarId(4)
            })
        );
        assert_eq!(
            Command::parse("W(T1,x6,66)").unwrap(),
            Some(Command::Write {
                tx: TxId(1),
                var: VarId(6),
                value: 66
            })
        );
        assert_eq!(
            Command::parse("fail(2)").unwrap(),
            Some(Command::Fail { site: SiteId(2) })
        );
        assert_eq!(Command::parse("dump()").unwrap(), Some(Command::Dump));
    }

    #[test]
    fn test_parse_blank_and_comments() {
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(Command::parse("// a remark").unwrap(), None);
        assert_eq!(
            Command::parse("end(T3) // done").unwrap(),
            Some(Command::End { tx: TxId(3) })
        );
    }

    #[test]
    fn test_parse_case_insensitive_names() {
        assert_eq!(
            Command::parse("BeginRO(T9)").unwrap(),
            Some(Command::BeginRo { tx: TxId(9) })
        );
        assert_eq!(
            Command::parse("w(t1, X2, -5)").unwrap(),
            Some(Command::Write {
                tx: TxId(1),
                var: VarId(2),
                value: -5
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Command::parse("begin T1"),
            Err(Error::MalformedLine(_))
        ));
        assert!(matches!(
            Command::parse("frob(T1)"),
            Err(Error::UnknownCommand(_))
        ));
        assert!(matches!(
            Command::parse("R(T1)"),
            Err(Error::MalformedLine(_))
        ));
        assert!(matches!(
            Command::parse("R(T1, x21)"),
            Err(Error::UnknownVariable(_))
        ));
        assert!(matches!(
            Command::parse("fail(11)"),
            Err(Error::UnknownSite(11))
        ));
        assert!(matches!(
            Command::parse("W(T1, x2, lots)"),
            Err(Error::MalformedLine(_))
        ));
    }
}
