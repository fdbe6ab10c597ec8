// src/index.rs

//! The package index: every concrete version and abstract name we know
//!
//! Concrete and abstract packages live in two arenas and refer to each
//! other by stable indices ([`PkgId`], [`AbsId`]), so the provider/dependant
//! back-edges form no ownership cycles. Two hash tables sit on top: concrete
//! name → versions (append on insert, sorted on lookup) and abstract name →
//! providers/dependants.

use crate::pkg::{Package, StateStatus};
use std::collections::HashMap;
use tracing::debug;

/// Stable index of a concrete package in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PkgId(pub(crate) usize);

/// Stable index of an abstract package in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbsId(pub(crate) usize);

/// A name satisfiable by one or more concrete packages
///
/// Every concrete package provides its own name; entries created by a
/// forward reference in a dependency field start with no providers.
#[derive(Debug, Clone)]
pub struct AbstractPkg {
    pub name: String,
    /// Concrete packages whose `Provides:` (or own name) covers this entry.
    /// A package's own abstract entry lists it at position 0.
    pub providers: Vec<PkgId>,
    /// Concrete packages with a dependency possibility naming this entry
    pub depended_upon_by: Vec<PkgId>,
    /// Guard for lazy dependency expansion of the providers
    pub dependencies_checked: bool,
    /// Rolled-up install state across providers, consumed by the solver
    pub state_status: StateStatus,
}

impl AbstractPkg {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            providers: Vec::new(),
            depended_upon_by: Vec::new(),
            dependencies_checked: false,
            state_status: StateStatus::NotInstalled,
        }
    }
}

/// Process-wide index of concrete and abstract packages
#[derive(Debug, Default)]
pub struct PkgIndex {
    pkgs: Vec<Package>,
    abstracts: Vec<AbstractPkg>,
    by_name: HashMap<String, Vec<PkgId>>,
    abs_by_name: HashMap<String, AbsId>,
}

impl PkgIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pkg(&self, id: PkgId) -> &Package {
        &self.pkgs[id.0]
    }

    pub fn pkg_mut(&mut self, id: PkgId) -> &mut Package {
        &mut self.pkgs[id.0]
    }

    pub fn abs(&self, id: AbsId) -> &AbstractPkg {
        &self.abstracts[id.0]
    }

    pub fn abs_mut(&mut self, id: AbsId) -> &mut AbstractPkg {
        &mut self.abstracts[id.0]
    }

    pub fn len(&self) -> usize {
        self.pkgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pkgs.is_empty()
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = PkgId> {
        (0..self.pkgs.len()).map(PkgId)
    }

    /// Look up or create the abstract entry for `name`
    ///
    /// Creation on miss is what makes forward references in dependency
    /// fields work before the named package has been parsed.
    pub fn intern_abstract(&mut self, name: &str) -> AbsId {
        if let Some(&id) = self.abs_by_name.get(name) {
            return id;
        }
        let id = AbsId(self.abstracts.len());
        self.abstracts.push(AbstractPkg::new(name));
        self.abs_by_name.insert(name.to_string(), id);
        id
    }

    pub fn abstract_by_name(&self, name: &str) -> Option<AbsId> {
        self.abs_by_name.get(name).copied()
    }

    /// Insert a package record, merging with an existing identical version
    ///
    /// Identity is `(name, version, architecture, src)`. On collision the
    /// existing record absorbs the new one under the merge winner rule.
    /// Provided names are bound here, eagerly, so provider lookups see
    /// every package before any dependency expansion has run.
    pub fn insert(&mut self, pkg: Package) -> PkgId {
        let existing = self.by_name.get(&pkg.name).and_then(|ids| {
            ids.iter().copied().find(|&id| {
                let old = &self.pkgs[id.0];
                old.version == pkg.version
                    && old.architecture == pkg.architecture
                    && old.src == pkg.src
            })
        });

        let id = match existing {
            Some(id) => {
                debug!(
                    "merging duplicate record for {} {}",
                    pkg.name,
                    pkg.version_str()
                );
                self.pkgs[id.0].merge(pkg);
                id
            }
            None => {
                let id = PkgId(self.pkgs.len());
                let name = pkg.name.clone();
                let status = pkg.state_status;
                self.pkgs.push(pkg);
                self.by_name.entry(name.clone()).or_default().push(id);

                // The self-provider sits at position 0 of the abstract
                // entry.
                let abs = self.intern_abstract(&name);
                let entry = &mut self.abstracts[abs.0];
                entry.providers.insert(0, id);
                self.pkgs[id.0].provides.insert(0, abs);
                self.note_status(id, status);
                id
            }
        };

        self.register_provides(id);
        id
    }

    /// Bind each `Provides:` name to this package, names only
    ///
    /// Version qualifiers are validated later by the resolver; lookup just
    /// needs the name edges in place.
    fn register_provides(&mut self, id: PkgId) {
        let Some(raw) = self.pkgs[id.0].provides_str.clone() else {
            return;
        };
        for term in raw.split(',') {
            let name = term
                .trim()
                .split(['(', ' ', '\t'])
                .next()
                .unwrap_or("")
                .trim();
            if !name.is_empty() {
                let abs = self.intern_abstract(name);
                self.add_provider(abs, id);
            }
        }
    }

    /// All known versions of a concrete name, insertion order
    pub fn versions_of(&self, name: &str) -> &[PkgId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Versions of `name` sorted by descending `(version, arch_priority)`
    ///
    /// Insertion only appends; the sort happens here on lookup.
    pub fn sorted_versions_of(&self, name: &str) -> Vec<PkgId> {
        let mut ids: Vec<PkgId> = self.versions_of(name).to_vec();
        ids.sort_by(|&a, &b| {
            let pa = &self.pkgs[a.0];
            let pb = &self.pkgs[b.0];
            pb.version
                .cmp(&pa.version)
                .then(pb.arch_priority.cmp(&pa.arch_priority))
        });
        ids
    }

    /// The installed (or unpacked/half-state) package for a concrete name
    pub fn installed_version_of(&self, name: &str) -> Option<PkgId> {
        self.versions_of(name)
            .iter()
            .copied()
            .find(|&id| self.pkgs[id.0].state_status.has_files())
    }

    /// Every package in an on-disk state, for ownership rebuild and status
    pub fn all_with_files(&self) -> Vec<PkgId> {
        self.iter_ids()
            .filter(|&id| self.pkgs[id.0].state_status.has_files())
            .collect()
    }

    /// Every package worth a status-file entry
    pub fn all_with_state(&self) -> Vec<PkgId> {
        self.iter_ids()
            .filter(|&id| {
                let p = &self.pkgs[id.0];
                p.state_status != StateStatus::NotInstalled
                    || p.state_want != crate::pkg::StateWant::Unknown
            })
            .collect()
    }

    /// Record a status change and roll it up into the abstract entries
    pub fn note_status(&mut self, id: PkgId, status: StateStatus) {
        self.pkgs[id.0].state_status = status;
        for abs in self.pkgs[id.0].provides.clone() {
            self.refresh_abstract(abs);
        }
    }

    /// Recompute an abstract entry's rolled-up status from its providers
    fn refresh_abstract(&mut self, abs: AbsId) {
        let entry = &mut self.abstracts[abs.0];
        entry.state_status = entry
            .providers
            .iter()
            .map(|&p| self.pkgs[p.0].state_status)
            .find(|s| s.has_files())
            .unwrap_or(StateStatus::NotInstalled);
    }

    /// Register `pkg` as a provider of `abs` (Provides: expansion)
    pub fn add_provider(&mut self, abs: AbsId, pkg: PkgId) {
        let entry = &mut self.abstracts[abs.0];
        if !entry.providers.contains(&pkg) {
            entry.providers.push(pkg);
        }
        if !self.pkgs[pkg.0].provides.contains(&abs) {
            self.pkgs[pkg.0].provides.push(abs);
        }
        self.refresh_abstract(abs);
    }

    /// Register `pkg` as depending upon `abs`
    pub fn add_dependant(&mut self, abs: AbsId, pkg: PkgId) {
        let entry = &mut self.abstracts[abs.0];
        if !entry.depended_upon_by.contains(&pkg) {
            entry.depended_upon_by.push(pkg);
        }
    }
}
