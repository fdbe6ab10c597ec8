// src/control.rs

//! Control metadata parsing and emission
//!
//! Consumes streams of RFC-822-style blocks (feed lists, `.control` files,
//! the status database) and produces [`Package`] records. Dependency fields
//! are kept as raw strings; expansion belongs to the resolver. The emitters
//! write the same field order the status database has always used, so a
//! parse/emit round trip is stable.

use crate::depend::{compound_to_string, DepKind};
use crate::error::{Error, Result};
use crate::index::{PkgId, PkgIndex};
use crate::pkg::{Conffile, Package, StateFlags, StateStatus, StateWant};
use crate::version::PkgVersion;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::warn;

/// One parsed field: canonical handling keyed off the lowercased name,
/// original spelling kept for userfield preservation.
struct Field {
    name: String,
    value: String,
    line: usize,
}

/// Parse a stream of blank-line-separated control blocks
///
/// Malformed records are skipped with a warning naming the source and line;
/// the rest of the stream still loads. The parser never touches the
/// filesystem.
pub fn parse_control<R: BufRead>(reader: R, source: Option<&Path>) -> Result<Vec<Package>> {
    let mut packages = Vec::new();
    let mut block: Vec<Field> = Vec::new();
    let mut lineno = 0usize;

    let mut flush = |block: &mut Vec<Field>, packages: &mut Vec<Package>| {
        if block.is_empty() {
            return;
        }
        match package_from_fields(block, source) {
            Ok(pkg) => packages.push(pkg),
            Err(err) => warn!("skipping malformed record: {}", err),
        }
        block.clear();
    };

    for line in reader.lines() {
        let line = line?;
        lineno += 1;

        if line.trim().is_empty() {
            flush(&mut block, &mut packages);
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation of the previous field
            match block.last_mut() {
                Some(field) => append_continuation(field, &line),
                None => {
                    warn!(
                        "continuation line with no field at {}:{}",
                        source.map(|p| p.display().to_string()).unwrap_or_default(),
                        lineno
                    );
                }
            }
            continue;
        }

        match line.split_once(':') {
            Some((name, value)) => block.push(Field {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
                line: lineno,
            }),
            None => {
                let err = Error::parse(format!("line without a field name: '{}'", line));
                let err = match source {
                    Some(p) => err.at(p, lineno),
                    None => err,
                };
                warn!("skipping malformed record: {}", err);
                block.clear();
            }
        }
    }
    flush(&mut block, &mut packages);

    Ok(packages)
}

/// Strictly parse a single control block (a `.control` file)
pub fn parse_one(text: &str, source: Option<&Path>) -> Result<Package> {
    let mut block: Vec<Field> = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let lineno = i + 1;
        if line.trim().is_empty() {
            if block.is_empty() {
                continue;
            }
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match block.last_mut() {
                Some(field) => append_continuation(field, line),
                None => return Err(Error::parse("continuation line before any field")),
            }
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => block.push(Field {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
                line: lineno,
            }),
            None => {
                return Err(Error::parse(format!("line without a field name: '{}'", line)))
            }
        }
    }
    package_from_fields(&block, source)
}

/// Continuation rule: `Description` and `Conffiles` keep their line
/// structure and leading whitespace, everything else folds onto one line.
fn append_continuation(field: &mut Field, line: &str) {
    if field.name.eq_ignore_ascii_case("description") {
        field.value.push('\n');
        field.value.push_str(line);
    } else if field.name.eq_ignore_ascii_case("conffiles") {
        if !field.value.is_empty() {
            field.value.push('\n');
        }
        field.value.push_str(line.trim());
    } else {
        if !field.value.is_empty() {
            field.value.push(' ');
        }
        field.value.push_str(line.trim());
    }
}

fn package_from_fields(fields: &[Field], source: Option<&Path>) -> Result<Package> {
    let mut pkg = Package::default();
    let mut seen: Vec<String> = Vec::new();

    let locate = |err: Error, line: usize| match source {
        Some(p) => err.at(p, line),
        None => err,
    };

    for field in fields {
        let key = field.name.to_ascii_lowercase();
        if seen.contains(&key) {
            return Err(locate(
                Error::parse(format!("duplicate field '{}'", field.name)),
                field.line,
            ));
        }
        seen.push(key.clone());
        let value = field.value.as_str();

        match key.as_str() {
            "package" => pkg.name = value.to_string(),
            "version" => {
                pkg.version = PkgVersion::parse(value).map_err(|e| locate(e, field.line))?
            }
            "depends" => pkg.depends_str = Some(value.to_string()),
            "pre-depends" => pkg.pre_depends_str = Some(value.to_string()),
            "recommends" => pkg.recommends_str = Some(value.to_string()),
            "suggests" => pkg.suggests_str = Some(value.to_string()),
            "conflicts" => pkg.conflicts_str = Some(value.to_string()),
            "replaces" => pkg.replaces_str = Some(value.to_string()),
            "provides" => pkg.provides_str = Some(value.to_string()),
            "status" => {
                let parts: Vec<&str> = value.split_whitespace().collect();
                if parts.len() != 3 {
                    return Err(locate(
                        Error::parse(format!("malformed Status field '{}'", value)),
                        field.line,
                    ));
                }
                pkg.state_want =
                    StateWant::from_str(parts[0]).map_err(|e| locate(e, field.line))?;
                pkg.state_flags =
                    StateFlags::from_status_str(parts[1]).map_err(|e| locate(e, field.line))?;
                pkg.state_status =
                    StateStatus::from_str(parts[2]).map_err(|e| locate(e, field.line))?;
            }
            "section" => pkg.section = Some(value.to_string()),
            "essential" => pkg.essential = value.eq_ignore_ascii_case("yes"),
            "architecture" => pkg.architecture = Some(value.to_string()),
            "maintainer" => pkg.maintainer = Some(value.to_string()),
            "md5sum" => pkg.md5sum = Some(value.to_string()),
            "sha256sum" => pkg.sha256sum = Some(value.to_string()),
            "size" => {
                pkg.size = value
                    .parse()
                    .map_err(|_| locate(Error::parse(format!("bad Size '{}'", value)), field.line))?
            }
            "installed-size" => {
                pkg.installed_size = value.parse().map_err(|_| {
                    locate(Error::parse(format!("bad Installed-Size '{}'", value)), field.line)
                })?
            }
            "installed-time" => {
                pkg.installed_time = value.parse().map_err(|_| {
                    locate(Error::parse(format!("bad Installed-Time '{}'", value)), field.line)
                })?
            }
            "filename" => pkg.filename = Some(value.to_string()),
            "conffiles" => {
                for line in value.lines() {
                    let mut parts = line.split_whitespace();
                    match (parts.next(), parts.next()) {
                        (Some(path), Some(hash)) => pkg.conffiles.push(Conffile {
                            path: path.to_string(),
                            hash: hash.to_string(),
                        }),
                        (Some(_), None) | (None, _) => {
                            return Err(locate(
                                Error::parse(format!("malformed Conffiles entry '{}'", line)),
                                field.line,
                            ))
                        }
                    }
                }
            }
            "source" => pkg.source = Some(value.to_string()),
            "description" => pkg.description = Some(value.to_string()),
            "tags" => pkg.tags = Some(value.to_string()),
            "priority" => pkg.priority = Some(value.to_string()),
            "auto-installed" => pkg.auto_installed = value.eq_ignore_ascii_case("yes"),
            _ => pkg
                .userfields
                .push((field.name.clone(), field.value.clone())),
        }
    }

    if pkg.name.is_empty() {
        return Err(Error::parse("record without a Package field"));
    }
    if pkg.version.upstream.is_empty() {
        return Err(Error::parse(format!("package {} without a Version field", pkg.name)));
    }

    Ok(pkg)
}

fn dep_field_string(index: &PkgIndex, id: PkgId, kind: DepKind, raw: &Option<String>) -> Option<String> {
    if let Some(raw) = raw {
        return Some(raw.clone());
    }
    let pkg = index.pkg(id);
    let terms: Vec<String> = pkg
        .deps
        .iter()
        .chain(pkg.conflicts.iter())
        .chain(pkg.replaces.iter())
        .filter(|d| d.kind == kind)
        .map(|d| compound_to_string(index, d))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(", "))
    }
}

fn write_dep_field<W: Write>(
    w: &mut W,
    index: &PkgIndex,
    id: PkgId,
    label: &str,
    kind: DepKind,
    raw: &Option<String>,
) -> io::Result<()> {
    if let Some(value) = dep_field_string(index, id, kind, raw) {
        writeln!(w, "{}: {}", label, value)?;
    }
    Ok(())
}

fn write_provides<W: Write>(w: &mut W, index: &PkgIndex, id: PkgId) -> io::Result<()> {
    let pkg = index.pkg(id);
    // Position 0 is the package's own name; a trivial provides list is
    // not worth a field.
    if pkg.provides.len() > 1 {
        let names: Vec<&str> = pkg.provides[1..]
            .iter()
            .map(|&abs| index.abs(abs).name.as_str())
            .collect();
        writeln!(w, "Provides: {}", names.join(", "))?;
    } else if let Some(raw) = &pkg.provides_str {
        writeln!(w, "Provides: {}", raw)?;
    }
    Ok(())
}

fn write_conffiles<W: Write>(w: &mut W, pkg: &Package) -> io::Result<()> {
    if pkg.conffiles.is_empty() {
        return Ok(());
    }
    writeln!(w, "Conffiles:")?;
    for cf in &pkg.conffiles {
        writeln!(w, " {} {}", cf.path, cf.hash)?;
    }
    Ok(())
}

fn write_scalar<W: Write>(w: &mut W, label: &str, value: &Option<String>) -> io::Result<()> {
    if let Some(value) = value {
        writeln!(w, "{}: {}", label, value)?;
    }
    Ok(())
}

/// Write one status-database entry, terminated by a blank line
///
/// `verbose` adds the descriptive fields and userfields; the lean form is
/// what a resource-constrained root keeps by default. Installed-Size,
/// Installed-Time and Auto-Installed appear only while the package has
/// files on disk.
pub fn write_status_entry<W: Write>(
    w: &mut W,
    index: &PkgIndex,
    id: PkgId,
    verbose: bool,
) -> io::Result<()> {
    let pkg = index.pkg(id);

    writeln!(w, "Package: {}", pkg.name)?;
    writeln!(w, "Version: {}", pkg.version)?;
    write_dep_field(w, index, id, "Depends", DepKind::Depend, &pkg.depends_str)?;
    write_dep_field(w, index, id, "Pre-Depends", DepKind::PreDepend, &pkg.pre_depends_str)?;
    write_dep_field(w, index, id, "Recommends", DepKind::Recommend, &pkg.recommends_str)?;
    write_dep_field(w, index, id, "Suggests", DepKind::Suggest, &pkg.suggests_str)?;
    write_provides(w, index, id)?;
    write_dep_field(w, index, id, "Replaces", DepKind::Replace, &pkg.replaces_str)?;
    write_dep_field(w, index, id, "Conflicts", DepKind::Conflict, &pkg.conflicts_str)?;
    writeln!(
        w,
        "Status: {} {} {}",
        pkg.state_want,
        pkg.state_flags.status_str(),
        pkg.state_status
    )?;
    if verbose {
        write_scalar(w, "Section", &pkg.section)?;
    }
    if pkg.essential {
        writeln!(w, "Essential: yes")?;
    }
    write_scalar(w, "Architecture", &pkg.architecture)?;
    if verbose {
        write_scalar(w, "Maintainer", &pkg.maintainer)?;
        write_scalar(w, "MD5Sum", &pkg.md5sum)?;
        write_scalar(w, "SHA256sum", &pkg.sha256sum)?;
        if pkg.size > 0 {
            writeln!(w, "Size: {}", pkg.size)?;
        }
        write_scalar(w, "Filename", &pkg.filename)?;
    }
    write_conffiles(w, pkg)?;
    if verbose {
        write_scalar(w, "Source", &pkg.source)?;
        write_scalar(w, "Description", &pkg.description)?;
    }
    if pkg.state_status.has_files() {
        if pkg.installed_size > 0 {
            writeln!(w, "Installed-Size: {}", pkg.installed_size)?;
        }
        if pkg.installed_time > 0 {
            writeln!(w, "Installed-Time: {}", pkg.installed_time)?;
        }
        if pkg.auto_installed {
            writeln!(w, "Auto-Installed: yes")?;
        }
    }
    if verbose {
        for (name, value) in &pkg.userfields {
            writeln!(w, "{}: {}", name, value)?;
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Write the full informational entry for a package (all known fields)
pub fn write_info_entry<W: Write>(w: &mut W, index: &PkgIndex, id: PkgId) -> io::Result<()> {
    let pkg = index.pkg(id);

    writeln!(w, "Package: {}", pkg.name)?;
    writeln!(w, "Version: {}", pkg.version)?;
    write_dep_field(w, index, id, "Depends", DepKind::Depend, &pkg.depends_str)?;
    write_dep_field(w, index, id, "Pre-Depends", DepKind::PreDepend, &pkg.pre_depends_str)?;
    write_dep_field(w, index, id, "Recommends", DepKind::Recommend, &pkg.recommends_str)?;
    write_dep_field(w, index, id, "Suggests", DepKind::Suggest, &pkg.suggests_str)?;
    write_provides(w, index, id)?;
    write_dep_field(w, index, id, "Replaces", DepKind::Replace, &pkg.replaces_str)?;
    write_dep_field(w, index, id, "Conflicts", DepKind::Conflict, &pkg.conflicts_str)?;
    writeln!(
        w,
        "Status: {} {} {}",
        pkg.state_want,
        pkg.state_flags.status_str(),
        pkg.state_status
    )?;
    write_scalar(w, "Section", &pkg.section)?;
    if pkg.essential {
        writeln!(w, "Essential: yes")?;
    }
    write_scalar(w, "Architecture", &pkg.architecture)?;
    write_scalar(w, "Maintainer", &pkg.maintainer)?;
    write_scalar(w, "MD5Sum", &pkg.md5sum)?;
    write_scalar(w, "SHA256sum", &pkg.sha256sum)?;
    if pkg.size > 0 {
        writeln!(w, "Size: {}", pkg.size)?;
    }
    write_scalar(w, "Filename", &pkg.filename)?;
    write_conffiles(w, pkg)?;
    write_scalar(w, "Source", &pkg.source)?;
    write_scalar(w, "Description", &pkg.description)?;
    if pkg.installed_size > 0 {
        writeln!(w, "Installed-Size: {}", pkg.installed_size)?;
    }
    if pkg.installed_time > 0 {
        writeln!(w, "Installed-Time: {}", pkg.installed_time)?;
    }
    write_scalar(w, "Tags", &pkg.tags)?;
    for (name, value) in &pkg.userfields {
        writeln!(w, "{}: {}", name, value)?;
    }
    writeln!(w)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
Package: busybox
Version: 1.36.1-1
Depends: libc
Status: install ok installed
Architecture: armv7
Installed-Size: 512000
Description: core utilities
 Multi-call binary combining many
 common UNIX utilities.

Package: dropbear
Version: 2022.83-1
Provides: ssh-server
Status: unknown ok not-installed
X-Custom: something

";

    #[test]
    fn test_parse_two_blocks() {
        let pkgs = parse_control(Cursor::new(SAMPLE), None).unwrap();
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].name, "busybox");
        assert_eq!(pkgs[0].version.to_string(), "1.36.1-1");
        assert_eq!(pkgs[0].state_status, StateStatus::Installed);
        assert_eq!(pkgs[1].name, "dropbear");
        assert_eq!(pkgs[1].provides_str.as_deref(), Some("ssh-server"));
    }

    #[test]
    fn test_description_keeps_continuation_whitespace() {
        let pkgs = parse_control(Cursor::new(SAMPLE), None).unwrap();
        let desc = pkgs[0].description.as_deref().unwrap();
        assert!(desc.starts_with("core utilities\n Multi-call"));
        assert!(desc.contains("\n common UNIX utilities."));
    }

    #[test]
    fn test_unknown_field_preserved_as_userfield() {
        let pkgs = parse_control(Cursor::new(SAMPLE), None).unwrap();
        assert_eq!(
            pkgs[1].userfields,
            vec![("X-Custom".to_string(), "something".to_string())]
        );
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let text = "Package: a\nVersion: 1.0\nSection: base\nSection: utils\n";
        assert!(parse_one(text, None).is_err());
    }

    #[test]
    fn test_malformed_block_skipped_not_fatal() {
        let text = "Package: good\nVersion: 1.0\n\nPackage: bad\nVersion: not:a:version\n\n";
        let pkgs = parse_control(Cursor::new(text), None).unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].name, "good");
    }

    #[test]
    fn test_missing_package_field_rejected() {
        assert!(parse_one("Version: 1.0\n", None).is_err());
    }

    #[test]
    fn test_conffiles_parse() {
        let text = "Package: app\nVersion: 1.0\nConffiles:\n /etc/app.conf d41d8cd98f\n /etc/app2.conf aabbcc\n";
        let pkg = parse_one(text, None).unwrap();
        assert_eq!(pkg.conffiles.len(), 2);
        assert_eq!(pkg.conffiles[0].path, "/etc/app.conf");
        assert_eq!(pkg.conffiles[0].hash, "d41d8cd98f");
    }

    #[test]
    fn test_status_field_parse() {
        let text = "Package: app\nVersion: 1.0\nStatus: install hold unpacked\n";
        let pkg = parse_one(text, None).unwrap();
        assert_eq!(pkg.state_want, StateWant::Install);
        assert!(pkg.state_flags.contains(StateFlags::HOLD));
        assert_eq!(pkg.state_status, StateStatus::Unpacked);
    }

    #[test]
    fn test_emit_parse_round_trip() {
        let mut index = PkgIndex::new();
        let pkgs = parse_control(Cursor::new(SAMPLE), None).unwrap();
        let id = index.insert(pkgs[0].clone());
        index.note_status(id, StateStatus::Installed);

        let mut out = Vec::new();
        write_status_entry(&mut out, &index, id, true).unwrap();
        let text = String::from_utf8(out).unwrap();

        let reparsed = parse_control(Cursor::new(text.as_str()), None).unwrap();
        assert_eq!(reparsed.len(), 1);
        let p = &reparsed[0];
        assert_eq!(p.name, "busybox");
        assert_eq!(p.version.to_string(), "1.36.1-1");
        assert_eq!(p.depends_str.as_deref(), Some("libc"));
        assert_eq!(p.state_status, StateStatus::Installed);
        assert_eq!(p.installed_size, 512000);
        assert_eq!(p.description, index.pkg(id).description);
    }

    #[test]
    fn test_lean_status_entry_omits_description() {
        let mut index = PkgIndex::new();
        let pkgs = parse_control(Cursor::new(SAMPLE), None).unwrap();
        let id = index.insert(pkgs[0].clone());

        let mut out = Vec::new();
        write_status_entry(&mut out, &index, id, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("Description:"));
        assert!(text.contains("Status: install ok installed"));
    }

    #[test]
    fn test_ends_with_blank_line() {
        let mut index = PkgIndex::new();
        let pkgs = parse_control(Cursor::new(SAMPLE), None).unwrap();
        let id = index.insert(pkgs[0].clone());

        let mut out = Vec::new();
        write_status_entry(&mut out, &index, id, false).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("\n\n"));
    }
}
