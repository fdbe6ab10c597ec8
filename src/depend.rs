// src/depend.rs

//! Dependency expression expansion
//!
//! Raw `Depends:`-style strings stay on the package record until something
//! asks about them; expansion binds every named possibility to an abstract
//! entry in the index (creating empty entries for forward references) and
//! registers the package on the dependants list.
//!
//! Grammar, per compound term:
//!
//! ```text
//! compound    := possibility ( '|' possibility )*
//! possibility := NAME ( '(' OP VERSION ')' )?
//! ```

use crate::error::{Error, Result};
use crate::index::{AbsId, PkgId, PkgIndex};
use crate::version::{constraint_satisfied, VersionConstraint, VersionOp};

/// Relation kind of a compound dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    PreDepend,
    Depend,
    Recommend,
    Suggest,
    /// Depend variant used by aggressive upgrade policies; scheduled like
    /// a plain depend
    GreedyDepend,
    Conflict,
    Replace,
}

/// One arm of a compound dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Possibility {
    pub target: AbsId,
    pub constraint: Option<VersionConstraint>,
}

/// A disjunction of possibilities, any one of which satisfies the relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundDep {
    pub kind: DepKind,
    pub possibilities: Vec<Possibility>,
}

/// Parse one possibility: `NAME` optionally followed by `(OP VERSION)`
fn parse_possibility(index: &mut PkgIndex, s: &str) -> Result<Possibility> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::parse("empty dependency possibility"));
    }

    let (name, constraint) = match s.find('(') {
        Some(open) => {
            let close = s
                .rfind(')')
                .ok_or_else(|| Error::parse(format!("unterminated constraint in '{}'", s)))?;
            if close < open {
                return Err(Error::parse(format!("malformed constraint in '{}'", s)));
            }
            let name = s[..open].trim_end();
            let inner = &s[open + 1..close];
            let (op, rest) = VersionOp::parse(inner.trim_start())?;
            let version = crate::version::PkgVersion::parse(rest)?;
            (name, Some(VersionConstraint { op, version }))
        }
        None => (s, None),
    };

    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(Error::parse(format!("bad package name in '{}'", s)));
    }

    Ok(Possibility {
        target: index.intern_abstract(name),
        constraint,
    })
}

/// Parse a comma-separated dependency field into compound terms
pub fn parse_compound_list(
    index: &mut PkgIndex,
    raw: &str,
    kind: DepKind,
) -> Result<Vec<CompoundDep>> {
    let mut out = Vec::new();
    for term in raw.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let possibilities = term
            .split('|')
            .map(|p| parse_possibility(index, p))
            .collect::<Result<Vec<_>>>()?;
        out.push(CompoundDep { kind, possibilities });
    }
    Ok(out)
}

/// Parse a `Provides:` field and register each name on the index
fn parse_provides(index: &mut PkgIndex, raw: &str, pkg: PkgId) -> Result<()> {
    for name in raw.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        // Provides may carry a version in full Debian; the constraint is
        // accepted and dropped, only the name matters for resolution here.
        let poss = parse_possibility(index, name)?;
        index.add_provider(poss.target, pkg);
    }
    Ok(())
}

/// Expand a package's raw dependency strings, once
///
/// Idempotent; forward references create empty abstract entries. The
/// package lands on the dependants list of every abstract entry its
/// depends name.
pub fn ensure_dependencies(index: &mut PkgIndex, id: PkgId) -> Result<()> {
    if index.pkg(id).deps_parsed {
        return Ok(());
    }

    let pre = index.pkg(id).pre_depends_str.clone();
    let dep = index.pkg(id).depends_str.clone();
    let rec = index.pkg(id).recommends_str.clone();
    let sug = index.pkg(id).suggests_str.clone();
    let con = index.pkg(id).conflicts_str.clone();
    let rep = index.pkg(id).replaces_str.clone();
    let pro = index.pkg(id).provides_str.clone();

    // One flat array: pre-depends first, then depends, recommends, suggests.
    let mut deps = Vec::new();
    for (raw, kind) in [
        (pre, DepKind::PreDepend),
        (dep, DepKind::Depend),
        (rec, DepKind::Recommend),
        (sug, DepKind::Suggest),
    ] {
        if let Some(raw) = raw {
            deps.extend(parse_compound_list(index, &raw, kind)?);
        }
    }

    let conflicts = match con {
        Some(raw) => parse_compound_list(index, &raw, DepKind::Conflict)?,
        None => Vec::new(),
    };
    let replaces = match rep {
        Some(raw) => parse_compound_list(index, &raw, DepKind::Replace)?,
        None => Vec::new(),
    };
    if let Some(raw) = pro {
        parse_provides(index, &raw, id)?;
    }

    for dep in &deps {
        for poss in &dep.possibilities {
            index.add_dependant(poss.target, id);
        }
    }

    let pkg = index.pkg_mut(id);
    pkg.deps = deps;
    pkg.conflicts = conflicts;
    pkg.replaces = replaces;
    pkg.deps_parsed = true;
    Ok(())
}

/// Expand every provider of an abstract entry, once
///
/// This is the laziness guard that keeps large feed lists from being fully
/// expanded up front.
pub fn ensure_abstract_dependencies(index: &mut PkgIndex, abs: AbsId) -> Result<()> {
    if index.abs(abs).dependencies_checked {
        return Ok(());
    }
    let providers = index.abs(abs).providers.clone();
    for id in providers {
        ensure_dependencies(index, id)?;
    }
    index.abs_mut(abs).dependencies_checked = true;
    Ok(())
}

/// Does `candidate` satisfy this possibility?
///
/// The candidate must provide the possibility's abstract name, and when a
/// constraint is present the candidate's own version must satisfy it.
/// Versioned constraints are only ever met by the real package, never by a
/// provider of the name.
pub fn possibility_satisfied(index: &PkgIndex, poss: &Possibility, candidate: PkgId) -> bool {
    let pkg = index.pkg(candidate);
    match &poss.constraint {
        None => pkg.provides.contains(&poss.target),
        Some(c) => {
            index.abs(poss.target).name == pkg.name
                && constraint_satisfied(c.op, &pkg.version, &c.version)
        }
    }
}

/// Render a compound term back to control-file syntax
pub fn compound_to_string(index: &PkgIndex, dep: &CompoundDep) -> String {
    dep.possibilities
        .iter()
        .map(|p| {
            let name = &index.abs(p.target).name;
            match &p.constraint {
                Some(c) => format!("{} ({} {})", name, c.op, c.version),
                None => name.clone(),
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::Package;
    use crate::version::PkgVersion;

    fn pkg(name: &str, ver: &str) -> Package {
        Package::new(name, PkgVersion::parse(ver).unwrap())
    }

    #[test]
    fn test_parse_plain_name() {
        let mut index = PkgIndex::new();
        let deps = parse_compound_list(&mut index, "libattr", DepKind::Depend).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].possibilities.len(), 1);
        assert!(deps[0].possibilities[0].constraint.is_none());
        assert_eq!(index.abs(deps[0].possibilities[0].target).name, "libattr");
    }

    #[test]
    fn test_parse_versioned() {
        let mut index = PkgIndex::new();
        let deps =
            parse_compound_list(&mut index, "libacl (>= 2.2-1)", DepKind::Depend).unwrap();
        let c = deps[0].possibilities[0].constraint.as_ref().unwrap();
        assert_eq!(c.op, VersionOp::LaterEqual);
        assert_eq!(c.version, PkgVersion::parse("2.2-1").unwrap());
    }

    #[test]
    fn test_parse_no_space_variants() {
        let mut index = PkgIndex::new();
        let deps = parse_compound_list(&mut index, "libacl(>=2.2)", DepKind::Depend).unwrap();
        let c = deps[0].possibilities[0].constraint.as_ref().unwrap();
        assert_eq!(c.op, VersionOp::LaterEqual);

        let deps = parse_compound_list(&mut index, "libacl (<2.2)", DepKind::Depend).unwrap();
        let c = deps[0].possibilities[0].constraint.as_ref().unwrap();
        assert_eq!(c.op, VersionOp::EarlierEqual);
    }

    #[test]
    fn test_parse_alternatives_and_commas() {
        let mut index = PkgIndex::new();
        let deps = parse_compound_list(
            &mut index,
            "dropbear | openssh-server, busybox (>= 1.30)",
            DepKind::Depend,
        )
        .unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].possibilities.len(), 2);
        assert_eq!(deps[1].possibilities.len(), 1);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let mut index = PkgIndex::new();
        assert!(parse_compound_list(&mut index, "libacl (>= 2.2", DepKind::Depend).is_err());
        assert!(parse_compound_list(&mut index, "libacl (?? 2.2)", DepKind::Depend).is_err());
        assert!(parse_compound_list(&mut index, "a b (= 1)", DepKind::Depend).is_err());
    }

    #[test]
    fn test_ensure_dependencies_flat_order() {
        let mut index = PkgIndex::new();
        let mut p = pkg("app", "1.0-1");
        p.pre_depends_str = Some("loader".to_string());
        p.depends_str = Some("libc".to_string());
        p.recommends_str = Some("docs".to_string());
        let id = index.insert(p);

        ensure_dependencies(&mut index, id).unwrap();
        let kinds: Vec<DepKind> = index.pkg(id).deps.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DepKind::PreDepend, DepKind::Depend, DepKind::Recommend]
        );
    }

    #[test]
    fn test_ensure_dependencies_registers_dependants() {
        let mut index = PkgIndex::new();
        let mut p = pkg("app", "1.0-1");
        p.depends_str = Some("libc".to_string());
        let id = index.insert(p);
        ensure_dependencies(&mut index, id).unwrap();

        let abs = index.abstract_by_name("libc").unwrap();
        assert_eq!(index.abs(abs).depended_upon_by, vec![id]);
        assert!(index.abs(abs).providers.is_empty());
    }

    #[test]
    fn test_provides_registration() {
        let mut index = PkgIndex::new();
        let mut p = pkg("dropbear", "2022.83-1");
        p.provides_str = Some("ssh-server, ssh-client".to_string());
        let id = index.insert(p);
        ensure_dependencies(&mut index, id).unwrap();

        let abs = index.abstract_by_name("ssh-server").unwrap();
        assert_eq!(index.abs(abs).providers, vec![id]);
        // Own name stays at position 0 of the provides list
        assert_eq!(index.pkg(id).provides[0], index.abstract_by_name("dropbear").unwrap());
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let mut index = PkgIndex::new();
        let mut p = pkg("app", "1.0-1");
        p.depends_str = Some("libc".to_string());
        let id = index.insert(p);
        ensure_dependencies(&mut index, id).unwrap();
        ensure_dependencies(&mut index, id).unwrap();

        let abs = index.abstract_by_name("libc").unwrap();
        assert_eq!(index.abs(abs).depended_upon_by.len(), 1);
    }

    #[test]
    fn test_abstract_guard() {
        let mut index = PkgIndex::new();
        let mut p = pkg("app", "1.0-1");
        p.depends_str = Some("libc".to_string());
        index.insert(p);
        let abs = index.abstract_by_name("app").unwrap();

        ensure_abstract_dependencies(&mut index, abs).unwrap();
        assert!(index.abs(abs).dependencies_checked);
    }

    #[test]
    fn test_possibility_satisfied_by_version() {
        let mut index = PkgIndex::new();
        let id = index.insert(pkg("zlib", "1.3-1"));
        let deps = parse_compound_list(&mut index, "zlib (>= 1.2)", DepKind::Depend).unwrap();
        assert!(possibility_satisfied(&index, &deps[0].possibilities[0], id));

        let deps = parse_compound_list(&mut index, "zlib (<< 1.3)", DepKind::Depend).unwrap();
        assert!(!possibility_satisfied(&index, &deps[0].possibilities[0], id));
    }

    #[test]
    fn test_versioned_possibility_ignores_providers() {
        let mut index = PkgIndex::new();
        let id = index.insert(pkg("libncurses", "6.4-1"));
        let abs = index.intern_abstract("libcurses");
        index.add_provider(abs, id);

        let unversioned =
            parse_compound_list(&mut index, "libcurses", DepKind::Depend).unwrap();
        assert!(possibility_satisfied(&index, &unversioned[0].possibilities[0], id));

        let versioned =
            parse_compound_list(&mut index, "libcurses (>= 6)", DepKind::Depend).unwrap();
        assert!(!possibility_satisfied(&index, &versioned[0].possibilities[0], id));
    }

    #[test]
    fn test_compound_to_string() {
        let mut index = PkgIndex::new();
        let deps = parse_compound_list(
            &mut index,
            "dropbear | openssh-server (>= 9.0)",
            DepKind::Depend,
        )
        .unwrap();
        assert_eq!(
            compound_to_string(&index, &deps[0]),
            "dropbear | openssh-server (>= 9.0)"
        );
    }
}
