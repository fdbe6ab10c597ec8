// src/files.rs

//! File ownership tracking and `.list` files
//!
//! A flat process-wide map from absolute path to owning package backs
//! conflict detection and orphan cleanup. It is rebuilt from the on-disk
//! `<pkg>.list` files at startup and persisted only through them. List
//! records are TSV: `path[\tmode_octal[\tlink_target]]`, with directory
//! trailing slashes stripped.

use crate::config::Config;
use crate::dest::Destination;
use crate::error::Result;
use crate::index::PkgId;
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Parsed `.list` cache capacity; lists are re-read past this
const LIST_CACHE_CAP: usize = 16;

/// One record from a `.list` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Raw st_mode bits, 0 when the list predates mode recording
    pub mode: u32,
    pub link_target: Option<String>,
}

/// Apply the offline-root prefix rule to a stored path
///
/// Stored paths are absolute; under an offline root they gain the prefix
/// unless they already carry it.
pub fn resolved_path(config: &Config, raw: &str) -> PathBuf {
    if let Some(offline) = &config.offline_root {
        let offline_str = offline.to_string_lossy();
        if !raw.starts_with(offline_str.as_ref()) {
            return PathBuf::from(format!("{}{}", offline_str, raw));
        }
    }
    PathBuf::from(raw)
}

fn parse_list_line(line: &str) -> FileInfo {
    let mut parts = line.split('\t');
    let path = parts.next().unwrap_or("").to_string();
    let mode = parts
        .next()
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .unwrap_or(0);
    let link_target = parts.next().map(str::to_string);
    FileInfo {
        path: PathBuf::from(path),
        mode,
        link_target,
    }
}

/// Read a package's `.list` file from its destination
pub fn read_filelist(dest: &Destination, pkg_name: &str, config: &Config) -> Result<Vec<FileInfo>> {
    let list_path = dest.info_file(pkg_name, "list");
    let file = fs::File::open(&list_path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut info = parse_list_line(&line);
        info.path = resolved_path(config, &info.path.to_string_lossy());
        out.push(info);
    }
    Ok(out)
}

/// Write a package's `.list` file from the ownership index
///
/// Called after unpack, restricted to paths the package owns. Modes and
/// link targets are taken from the filesystem when available.
pub fn write_filelist(
    dest: &Destination,
    pkg_name: &str,
    ownership: &FileOwnership,
    owner: PkgId,
    config: &Config,
) -> Result<()> {
    let list_path = dest.info_file(pkg_name, "list");
    info!("writing {}", list_path.display());

    fs::create_dir_all(&dest.info_dir)?;
    let mut file = fs::File::create(&list_path)?;

    let mut paths: Vec<&PathBuf> = ownership.paths_owned_by(owner).collect();
    paths.sort();

    for path in paths {
        let mut entry = path.to_string_lossy().into_owned();
        if entry.len() > 1 && entry.ends_with('/') {
            entry.pop();
        }
        let on_disk = resolved_path(config, &entry);
        match fs::symlink_metadata(&on_disk) {
            Ok(meta) => {
                use std::os::unix::fs::MetadataExt;
                let mode = meta.mode();
                if meta.file_type().is_symlink() {
                    let target = fs::read_link(&on_disk)?;
                    writeln!(file, "{}\t0{:o}\t{}", entry, mode, target.display())?;
                } else {
                    writeln!(file, "{}\t0{:o}", entry, mode)?;
                }
            }
            Err(_) => writeln!(file, "{}", entry)?,
        }
    }
    Ok(())
}

/// Remove a package's `.list` file
pub fn remove_filelist(dest: &Destination, pkg_name: &str) -> Result<()> {
    let list_path = dest.info_file(pkg_name, "list");
    match fs::remove_file(&list_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Process-wide map from absolute path to owning package
#[derive(Debug, Default)]
pub struct FileOwnership {
    map: HashMap<PathBuf, PkgId>,
}

impl FileOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, path: &Path) -> Option<PkgId> {
        self.map.get(path).copied()
    }

    /// Record ownership, returning the previous owner if any
    pub fn set_owner(&mut self, path: PathBuf, owner: PkgId) -> Option<PkgId> {
        self.map.insert(path, owner)
    }

    /// Drop every entry owned by `pkg`, returning the released paths
    pub fn release(&mut self, pkg: PkgId) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = self
            .map
            .iter()
            .filter(|(_, &o)| o == pkg)
            .map(|(p, _)| p.clone())
            .collect();
        for p in &paths {
            self.map.remove(p);
        }
        paths
    }

    pub fn paths_owned_by(&self, pkg: PkgId) -> impl Iterator<Item = &PathBuf> {
        self.map
            .iter()
            .filter(move |(_, &o)| o == pkg)
            .map(|(p, _)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, PkgId)> {
        self.map.iter().map(|(p, &o)| (p, o))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Bounded cache of parsed `.list` files
///
/// The ownership map is the in-memory truth; this cache only saves
/// re-parsing when the same list is consulted repeatedly in one run.
#[derive(Debug, Default)]
pub struct ListCache {
    entries: Vec<(String, Vec<FileInfo>)>,
}

impl ListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &mut self,
        dest: &Destination,
        pkg_name: &str,
        config: &Config,
    ) -> Result<&[FileInfo]> {
        let key = format!("{}/{}", dest.name, pkg_name);
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) {
            // Refresh recency
            let entry = self.entries.remove(pos);
            self.entries.push(entry);
        } else {
            let list = read_filelist(dest, pkg_name, config)?;
            if self.entries.len() >= LIST_CACHE_CAP {
                self.entries.remove(0);
            }
            self.entries.push((key, list));
        }
        self.entries
            .last()
            .map(|(_, list)| list.as_slice())
            .ok_or_else(|| {
                crate::error::Error::Internal("list cache empty after insert".to_string())
            })
    }

    pub fn invalidate(&mut self, dest: &Destination, pkg_name: &str) {
        let key = format!("{}/{}", dest.name, pkg_name);
        self.entries.retain(|(k, _)| *k != key);
    }
}

/// Rebuild the ownership index from every on-disk `.list`
///
/// Startup path: for each package in an on-disk state, claim the paths its
/// list records. Missing lists for half-installed packages are tolerated.
pub fn rebuild_ownership(
    index: &crate::index::PkgIndex,
    dests: &crate::dest::Destinations,
    config: &Config,
) -> FileOwnership {
    let mut ownership = FileOwnership::new();
    for id in index.all_with_files() {
        let pkg = index.pkg(id);
        let Some(dest_id) = pkg.dest else { continue };
        let dest = dests.get(dest_id);
        match read_filelist(dest, &pkg.name, config) {
            Ok(files) => {
                for f in files {
                    ownership.set_owner(f.path, id);
                }
            }
            Err(e) => {
                if pkg.state_status != crate::pkg::StateStatus::HalfInstalled {
                    debug!("no file list for {}: {}", pkg.name, e);
                }
            }
        }
    }
    ownership
}
