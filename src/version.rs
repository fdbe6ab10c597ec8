// src/version.rs

//! Version handling and constraint satisfaction for package dependencies
//!
//! This module provides parsing and comparison for Debian-style versions in
//! `[epoch:]upstream[-revision]` form, and evaluation of the `<<`, `<=`,
//! `=`, `>=`, `>>` relational operators used in dependency expressions.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version with epoch, upstream, and revision components
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PkgVersion {
    pub epoch: u32,
    pub upstream: String,
    pub revision: String,
}

impl PkgVersion {
    /// Parse a version string
    ///
    /// Format: [epoch:]upstream[-revision]
    /// Examples:
    /// - "1.2.3" → epoch=0, upstream="1.2.3", revision=""
    /// - "2:1.2.3" → epoch=2, upstream="1.2.3", revision=""
    /// - "1.2-3-4" → epoch=0, upstream="1.2-3", revision="4"
    ///
    /// The upstream version may contain hyphens; the revision is everything
    /// after the last one.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::parse("empty version string"));
        }

        let (epoch, rest) = match s.find(':') {
            Some(pos) => {
                let epoch_str = &s[..pos];
                let epoch = if epoch_str.is_empty() {
                    0
                } else {
                    epoch_str.parse::<u32>().map_err(|e| {
                        Error::parse(format!("invalid epoch in version '{}': {}", s, e))
                    })?
                };
                (epoch, &s[pos + 1..])
            }
            None => (0, s),
        };

        let (upstream, revision) = match rest.rfind('-') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };

        if upstream.is_empty() {
            return Err(Error::parse(format!("empty upstream component in '{}'", s)));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.to_string(),
        })
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if !self.revision.is_empty() {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match verrevcmp(&self.upstream, &other.upstream) {
            Ordering::Equal => {}
            ord => return ord,
        }
        verrevcmp(&self.revision, &other.revision)
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Character weight for the non-digit phase of [`verrevcmp`]
///
/// `~` sorts before end-of-string, letters sort before everything else.
fn order(c: Option<u8>) -> i32 {
    match c {
        Some(b'~') => -1,
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => 256 + c as i32,
    }
}

/// The canonical Debian version-fragment comparison
///
/// Alternates non-digit and digit runs. Non-digit runs compare character by
/// character through [`order`]; digit runs compare numerically with leading
/// zeros stripped.
pub fn verrevcmp(val: &str, ref_: &str) -> Ordering {
    let val = val.as_bytes();
    let ref_ = ref_.as_bytes();
    let mut i = 0;
    let mut j = 0;

    while i < val.len() || j < ref_.len() {
        // Non-digit run
        while (i < val.len() && !val[i].is_ascii_digit())
            || (j < ref_.len() && !ref_[j].is_ascii_digit())
        {
            let vc = order(val.get(i).copied());
            let rc = order(ref_.get(j).copied());
            if vc != rc {
                return vc.cmp(&rc);
            }
            i += 1;
            j += 1;
        }

        // Digit run: strip leading zeros, then longest wins, then first
        // differing digit wins.
        while i < val.len() && val[i] == b'0' {
            i += 1;
        }
        while j < ref_.len() && ref_[j] == b'0' {
            j += 1;
        }
        let mut first_diff = Ordering::Equal;
        while i < val.len()
            && j < ref_.len()
            && val[i].is_ascii_digit()
            && ref_[j].is_ascii_digit()
        {
            if first_diff == Ordering::Equal {
                first_diff = val[i].cmp(&ref_[j]);
            }
            i += 1;
            j += 1;
        }
        if i < val.len() && val[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < ref_.len() && ref_[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

/// Relational operators usable in a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOp {
    /// `<<`
    Earlier,
    /// `<=` (also the historical `<`)
    EarlierEqual,
    /// `=`
    Equal,
    /// `>=` (also the historical `>`)
    LaterEqual,
    /// `>>`
    Later,
}

impl VersionOp {
    /// Parse an operator from the head of `s`, returning the remainder
    ///
    /// Trailing whitespace after the operator is consumed so that
    /// `<= 1.2` and `<=1.2` both parse. `<` and `>` are accepted as
    /// aliases of `<=` and `>=` for historical compatibility.
    pub fn parse(s: &str) -> Result<(Self, &str)> {
        let (op, rest) = if let Some(rest) = s.strip_prefix("<<") {
            (Self::Earlier, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (Self::EarlierEqual, rest)
        } else if let Some(rest) = s.strip_prefix(">=") {
            (Self::LaterEqual, rest)
        } else if let Some(rest) = s.strip_prefix(">>") {
            (Self::Later, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (Self::EarlierEqual, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (Self::LaterEqual, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (Self::Equal, rest)
        } else {
            return Err(Error::parse(format!("unknown version operator in '{}'", s)));
        };
        Ok((op, rest.trim_start()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earlier => "<<",
            Self::EarlierEqual => "<=",
            Self::Equal => "=",
            Self::LaterEqual => ">=",
            Self::Later => ">>",
        }
    }
}

impl fmt::Display for VersionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An operator bound to a version, as written in `name (op version)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub op: VersionOp,
    pub version: PkgVersion,
}

impl VersionConstraint {
    /// Parse `<op> <version>` (e.g. ">= 1.2-1")
    pub fn parse(s: &str) -> Result<Self> {
        let (op, rest) = VersionOp::parse(s.trim_start())?;
        let version = PkgVersion::parse(rest)?;
        Ok(Self { op, version })
    }

    /// Check whether `have` satisfies this constraint
    pub fn satisfied_by(&self, have: &PkgVersion) -> bool {
        constraint_satisfied(self.op, have, &self.version)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.version)
    }
}

/// Evaluate `have <op> want`
pub fn constraint_satisfied(op: VersionOp, have: &PkgVersion, want: &PkgVersion) -> bool {
    let r = have.cmp(want);
    match op {
        VersionOp::Earlier => r == Ordering::Less,
        VersionOp::EarlierEqual => r != Ordering::Greater,
        VersionOp::Equal => r == Ordering::Equal,
        VersionOp::LaterEqual => r != Ordering::Less,
        VersionOp::Later => r == Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PkgVersion {
        PkgVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let ver = v("1.2.3");
        assert_eq!(ver.epoch, 0);
        assert_eq!(ver.upstream, "1.2.3");
        assert_eq!(ver.revision, "");
    }

    #[test]
    fn test_parse_with_epoch() {
        let ver = v("2:1.2.3");
        assert_eq!(ver.epoch, 2);
        assert_eq!(ver.upstream, "1.2.3");
    }

    #[test]
    fn test_parse_with_revision() {
        let ver = v("1.2.3-4");
        assert_eq!(ver.upstream, "1.2.3");
        assert_eq!(ver.revision, "4");
    }

    #[test]
    fn test_parse_full() {
        let ver = v("1:2.3.4-5");
        assert_eq!(ver.epoch, 1);
        assert_eq!(ver.upstream, "2.3.4");
        assert_eq!(ver.revision, "5");
    }

    #[test]
    fn test_parse_hyphenated_upstream() {
        // Revision is after the *last* hyphen
        let ver = v("1.2-rc1-3");
        assert_eq!(ver.upstream, "1.2-rc1");
        assert_eq!(ver.revision, "3");
    }

    #[test]
    fn test_parse_empty_epoch() {
        let ver = v(":1.0-1");
        assert_eq!(ver.epoch, 0);
        assert_eq!(ver.upstream, "1.0");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PkgVersion::parse("").is_err());
        assert!(PkgVersion::parse("x:1.0").is_err());
        assert!(PkgVersion::parse("-1").is_err());
    }

    #[test]
    fn test_epoch_dominates() {
        assert!(v("1:1.0") > v("2.0"));
        assert!(v("0:2.0") < v("1:1.0"));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(v("1.2") < v("1.10"));
        assert!(v("1.09") < v("1.10"));
        assert!(v("1.002") == v("1.2"));
    }

    #[test]
    fn test_revision_comparison() {
        assert!(v("1.2.3-1") < v("1.2.3-2"));
        assert!(v("1.2.3-9") < v("1.2.3-10"));
        assert!(v("1.2.3") < v("1.2.3-1"));
    }

    #[test]
    fn test_tilde_sorts_before_everything() {
        assert!(v("1.0~rc1") < v("1.0"));
        assert!(v("1.0~~") < v("1.0~"));
        assert!(v("1.0") < v("1.0a"));
        assert!(v("1.0~rc1") < v("1.0~rc2"));
    }

    #[test]
    fn test_letters_before_punctuation() {
        assert!(v("1.0a") < v("1.0+"));
        assert!(v("1.0alpha") < v("1.0.1"));
    }

    #[test]
    fn test_antisymmetry_and_transitivity() {
        let samples = [
            v("1.0~rc1"),
            v("1.0"),
            v("1.0-1"),
            v("1.0a"),
            v("1.10"),
            v("1:0.5"),
            v("2.0-2"),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
                for c in &samples {
                    if a <= b && b <= c {
                        assert!(a <= c, "{} <= {} <= {} but not {} <= {}", a, b, c, a, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["1.2.3", "2:1.2.3-4", "1.0~rc1-1", "3:2.0"] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn test_op_parse_whitespace() {
        let (op, rest) = VersionOp::parse("<= 1.2").unwrap();
        assert_eq!(op, VersionOp::EarlierEqual);
        assert_eq!(rest, "1.2");

        let (op, rest) = VersionOp::parse("<=1.2").unwrap();
        assert_eq!(op, VersionOp::EarlierEqual);
        assert_eq!(rest, "1.2");
    }

    #[test]
    fn test_op_historical_aliases() {
        assert_eq!(VersionOp::parse("< 1").unwrap().0, VersionOp::EarlierEqual);
        assert_eq!(VersionOp::parse("> 1").unwrap().0, VersionOp::LaterEqual);
        assert_eq!(VersionOp::parse("<< 1").unwrap().0, VersionOp::Earlier);
        assert_eq!(VersionOp::parse(">> 1").unwrap().0, VersionOp::Later);
    }

    #[test]
    fn test_constraint_satisfied() {
        assert!(constraint_satisfied(VersionOp::LaterEqual, &v("1.2-1"), &v("1.2")));
        assert!(constraint_satisfied(VersionOp::Earlier, &v("1.1"), &v("1.2")));
        assert!(!constraint_satisfied(VersionOp::Earlier, &v("1.2"), &v("1.2")));
        assert!(constraint_satisfied(VersionOp::Equal, &v("1.002"), &v("1.2")));
        assert!(!constraint_satisfied(VersionOp::Later, &v("1.2"), &v("1.2")));
    }

    #[test]
    fn test_constraint_parse_and_display() {
        let c = VersionConstraint::parse(">= 1.2-1").unwrap();
        assert!(c.satisfied_by(&v("1.2-1")));
        assert!(c.satisfied_by(&v("2.0")));
        assert!(!c.satisfied_by(&v("1.1")));
        assert_eq!(c.to_string(), ">= 1.2-1");
    }
}
