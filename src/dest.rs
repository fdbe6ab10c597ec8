// src/dest.rs

//! Install destinations
//!
//! A destination is a named root a package can be installed into. Each one
//! carries its own info directory (control files, file lists, maintainer
//! scripts) and status database, so several independent roots can coexist
//! on one host. Mutating a destination requires its advisory lock.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stable index of a destination in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestId(pub(crate) usize);

/// A named install root
#[derive(Debug, Clone)]
pub struct Destination {
    pub name: String,
    pub root_dir: PathBuf,
    pub info_dir: PathBuf,
    pub status_file: Option<PathBuf>,
}

impl Destination {
    /// A destination with the standard layout under `root_dir`
    pub fn new(name: &str, root_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            root_dir: root_dir.to_path_buf(),
            info_dir: root_dir.join("usr/lib/satchel/info"),
            status_file: None,
        }
    }

    pub fn with_info_dir(mut self, info_dir: PathBuf) -> Self {
        self.info_dir = info_dir;
        self
    }

    pub fn with_status_file(mut self, status_file: PathBuf) -> Self {
        self.status_file = Some(status_file);
        self
    }

    /// Path of the persistent status database
    pub fn status_path(&self) -> PathBuf {
        self.status_file
            .clone()
            .unwrap_or_else(|| self.root_dir.join("usr/lib/satchel/status"))
    }

    /// Path of a per-package info file: `<info_dir>/<pkg>.<ext>`
    pub fn info_file(&self, pkg_name: &str, ext: &str) -> PathBuf {
        self.info_dir.join(format!("{}.{}", pkg_name, ext))
    }

    /// Acquire the destination's advisory lock
    ///
    /// Exactly one transaction may run per destination; a held lock is the
    /// dedicated-exit-code case, not a retry case.
    pub fn lock(&self) -> Result<DestLock> {
        fs::create_dir_all(&self.info_dir)?;
        let lock_path = self.info_dir.join("lock");
        let file = File::create(&lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired lock {}", lock_path.display());
                Ok(DestLock {
                    _file: file,
                    path: lock_path,
                })
            }
            Err(_) => Err(Error::LockHeld(lock_path)),
        }
    }
}

/// Held advisory lock on a destination; released on drop
pub struct DestLock {
    _file: File,
    path: PathBuf,
}

impl Drop for DestLock {
    fn drop(&mut self) {
        debug!("released lock {}", self.path.display());
    }
}

/// The set of configured destinations for this invocation
#[derive(Debug, Default)]
pub struct Destinations {
    dests: Vec<Destination>,
}

impl Destinations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, dest: Destination) -> DestId {
        let id = DestId(self.dests.len());
        self.dests.push(dest);
        id
    }

    pub fn get(&self, id: DestId) -> &Destination {
        &self.dests[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<DestId> {
        self.dests
            .iter()
            .position(|d| d.name == name)
            .map(DestId)
    }

    /// The first-registered destination is the default install target
    pub fn default_dest(&self) -> Option<DestId> {
        if self.dests.is_empty() {
            None
        } else {
            Some(DestId(0))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DestId, &Destination)> {
        self.dests.iter().enumerate().map(|(i, d)| (DestId(i), d))
    }
}
