// src/pkg.rs

//! The concrete package record and its state triple
//!
//! A [`Package`] is one `(name, version, architecture)` tuple known to the
//! index, whether it came from a feed list, a local archive, or the status
//! file. Its install state is the triple (want, flags, status) persisted in
//! the `Status:` field.

use crate::depend::CompoundDep;
use crate::dest::DestId;
use crate::error::{Error, Result};
use crate::index::AbsId;
use crate::version::PkgVersion;
use std::fmt;

/// What the user asked for this package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateWant {
    #[default]
    Unknown,
    Install,
    Deinstall,
    Purge,
}

impl StateWant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Install => "install",
            Self::Deinstall => "deinstall",
            Self::Purge => "purge",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "install" => Ok(Self::Install),
            "deinstall" => Ok(Self::Deinstall),
            "purge" => Ok(Self::Purge),
            _ => Err(Error::parse(format!("unknown want state '{}'", s))),
        }
    }
}

impl fmt::Display for StateWant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the package is in its install lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateStatus {
    #[default]
    NotInstalled,
    Unpacked,
    HalfConfigured,
    Installed,
    HalfInstalled,
    ConfigFiles,
    PostInstFailed,
    RemovalFailed,
}

impl StateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not-installed",
            Self::Unpacked => "unpacked",
            Self::HalfConfigured => "half-configured",
            Self::Installed => "installed",
            Self::HalfInstalled => "half-installed",
            Self::ConfigFiles => "config-files",
            Self::PostInstFailed => "post-inst-failed",
            Self::RemovalFailed => "removal-failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "not-installed" => Ok(Self::NotInstalled),
            "unpacked" => Ok(Self::Unpacked),
            "half-configured" => Ok(Self::HalfConfigured),
            "installed" => Ok(Self::Installed),
            "half-installed" => Ok(Self::HalfInstalled),
            "config-files" => Ok(Self::ConfigFiles),
            "post-inst-failed" => Ok(Self::PostInstFailed),
            "removal-failed" => Ok(Self::RemovalFailed),
            _ => Err(Error::parse(format!("unknown status state '{}'", s))),
        }
    }

    /// True for states where the package has files on disk
    pub fn has_files(&self) -> bool {
        matches!(
            self,
            Self::Installed | Self::Unpacked | Self::HalfInstalled | Self::HalfConfigured
        )
    }
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bitset of per-package flags
///
/// `prefer`, `obsolete`, `user`, and the filelist-dirty marker are working
/// state; they are masked out before the status file is written. An empty
/// persisted set prints as `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags(u16);

impl StateFlags {
    pub const OK: StateFlags = StateFlags(0);
    pub const REINSTREQ: StateFlags = StateFlags(1);
    pub const HOLD: StateFlags = StateFlags(1 << 1);
    pub const REPLACE: StateFlags = StateFlags(1 << 2);
    pub const NOPRUNE: StateFlags = StateFlags(1 << 3);
    pub const PREFER: StateFlags = StateFlags(1 << 4);
    pub const OBSOLETE: StateFlags = StateFlags(1 << 5);
    pub const USER: StateFlags = StateFlags(1 << 6);
    pub const FILELIST_CHANGED: StateFlags = StateFlags(1 << 7);

    const NONVOLATILE: u16 = Self::REINSTREQ.0 | Self::HOLD.0 | Self::REPLACE.0 | Self::NOPRUNE.0;

    const NAMES: [(StateFlags, &'static str); 8] = [
        (Self::REINSTREQ, "reinstreq"),
        (Self::HOLD, "hold"),
        (Self::REPLACE, "replace"),
        (Self::NOPRUNE, "noprune"),
        (Self::PREFER, "prefer"),
        (Self::OBSOLETE, "obsolete"),
        (Self::USER, "user"),
        (Self::FILELIST_CHANGED, "filelist-changed"),
    ];

    pub fn contains(&self, flag: StateFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn set(&mut self, flag: StateFlags) {
        self.0 |= flag.0;
    }

    pub fn clear(&mut self, flag: StateFlags) {
        self.0 &= !flag.0;
    }

    /// Render the persistent flags for the `Status:` field
    pub fn status_str(&self) -> String {
        let sf = self.0 & Self::NONVOLATILE;
        if sf == 0 {
            return "ok".to_string();
        }
        Self::NAMES
            .iter()
            .filter(|(flag, _)| sf & flag.0 != 0)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a comma-separated flag list; unknown names are an error
    pub fn from_status_str(s: &str) -> Result<Self> {
        if s == "ok" {
            return Ok(Self::OK);
        }
        let mut flags = StateFlags::OK;
        for name in s.split(',') {
            let flag = Self::NAMES
                .iter()
                .find(|(_, n)| *n == name)
                .map(|(f, _)| *f)
                .ok_or_else(|| Error::parse(format!("unknown state flag '{}'", name)))?;
            flags.set(flag);
        }
        Ok(flags)
    }
}

/// A configuration file preserved across upgrades, with the md5 of the
/// version the package shipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conffile {
    pub path: String,
    pub hash: String,
}

/// One concrete package version known to the index
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub name: String,
    pub version: PkgVersion,
    pub architecture: Option<String>,
    pub arch_priority: u32,

    pub maintainer: Option<String>,
    pub section: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub source: Option<String>,
    pub tags: Option<String>,
    pub essential: bool,
    pub auto_installed: bool,

    /// Feed name this record came from, None for the status file
    pub src: Option<String>,
    /// Destination this package is (or will be) installed into
    pub dest: Option<DestId>,

    pub filename: Option<String>,
    pub local_filename: Option<String>,
    pub md5sum: Option<String>,
    pub sha256sum: Option<String>,
    pub size: u64,
    pub installed_size: u64,
    pub installed_time: i64,

    pub state_want: StateWant,
    pub state_flags: StateFlags,
    pub state_status: StateStatus,

    // Raw dependency fields, kept verbatim until the resolver expands them
    pub depends_str: Option<String>,
    pub pre_depends_str: Option<String>,
    pub recommends_str: Option<String>,
    pub suggests_str: Option<String>,
    pub conflicts_str: Option<String>,
    pub replaces_str: Option<String>,
    pub provides_str: Option<String>,

    /// Expanded dependencies: pre-depends first, then depends, recommends,
    /// suggests, each tagged with its kind
    pub deps: Vec<CompoundDep>,
    pub conflicts: Vec<CompoundDep>,
    pub replaces: Vec<CompoundDep>,
    /// Provided abstract names; position 0 is always the package's own name
    pub provides: Vec<AbsId>,
    pub deps_parsed: bool,

    pub conffiles: Vec<Conffile>,
    pub userfields: Vec<(String, String)>,
}

impl Package {
    pub fn new(name: &str, version: PkgVersion) -> Self {
        Self {
            name: name.to_string(),
            version,
            ..Default::default()
        }
    }

    /// Full version string, epoch and revision elided when trivial
    pub fn version_str(&self) -> String {
        self.version.to_string()
    }

    pub fn is_installed(&self) -> bool {
        self.state_status == StateStatus::Installed
    }

    pub fn is_held(&self) -> bool {
        self.state_flags.contains(StateFlags::HOLD)
    }

    pub fn conffile(&self, path: &str) -> Option<&Conffile> {
        self.conffiles.iter().find(|c| c.path == path)
    }

    fn has_dependencies(&self) -> bool {
        !self.deps.is_empty()
            || self.depends_str.is_some()
            || self.pre_depends_str.is_some()
            || self.recommends_str.is_some()
            || self.suggests_str.is_some()
    }

    /// Merge any new information from `new` into `self`
    ///
    /// The winner rule is asymmetric on purpose: a pre-existing non-empty
    /// field always survives. Callers must only merge records describing
    /// the same `(name, version, revision)`.
    pub fn merge(&mut self, new: Package) {
        if !self.auto_installed {
            self.auto_installed = new.auto_installed;
        }
        if self.src.is_none() {
            self.src = new.src;
        }
        if self.dest.is_none() {
            self.dest = new.dest;
        }
        if self.architecture.is_none() {
            self.architecture = new.architecture;
        }
        if self.arch_priority == 0 {
            self.arch_priority = new.arch_priority;
        }
        if self.section.is_none() {
            self.section = new.section;
        }
        if self.maintainer.is_none() {
            self.maintainer = new.maintainer;
        }
        if self.description.is_none() {
            self.description = new.description;
        }
        if self.tags.is_none() {
            self.tags = new.tags;
        }

        if !self.has_dependencies() {
            self.deps = new.deps;
            self.deps_parsed = new.deps_parsed;
            self.depends_str = new.depends_str;
            self.pre_depends_str = new.pre_depends_str;
            self.recommends_str = new.recommends_str;
            self.suggests_str = new.suggests_str;
        }

        if self.provides.len() <= 1 && self.provides_str.is_none() {
            self.provides_str = new.provides_str;
            if !new.provides.is_empty() {
                self.provides = new.provides;
            }
        }

        if self.conflicts.is_empty() && self.conflicts_str.is_none() {
            self.conflicts = new.conflicts;
            self.conflicts_str = new.conflicts_str;
        }
        if self.replaces.is_empty() && self.replaces_str.is_none() {
            self.replaces = new.replaces;
            self.replaces_str = new.replaces_str;
        }

        if self.filename.is_none() {
            self.filename = new.filename;
        }
        if self.local_filename.is_none() {
            self.local_filename = new.local_filename;
        }
        if self.md5sum.is_none() {
            self.md5sum = new.md5sum;
        }
        if self.sha256sum.is_none() {
            self.sha256sum = new.sha256sum;
        }
        if self.size == 0 {
            self.size = new.size;
        }
        if self.installed_size == 0 {
            self.installed_size = new.installed_size;
        }
        if self.priority.is_none() {
            self.priority = new.priority;
        }
        if self.source.is_none() {
            self.source = new.source;
        }
        if self.userfields.is_empty() {
            self.userfields = new.userfields;
        }
        if self.conffiles.is_empty() {
            self.conffiles = new.conffiles;
        }
        if !self.essential {
            self.essential = new.essential;
        }
    }
}
