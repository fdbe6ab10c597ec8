// src/fetch.rs

//! Seams to the external collaborators
//!
//! Transfer, signature cryptography, and archive reading are not part of
//! the core; they plug in behind these traits. The bundled implementations
//! cover local files and in-memory archives, which is what offline image
//! builds and the test suite need.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Fetches a remote artifact to a local path
pub trait Downloader {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Copies `file://` URLs and plain paths; rejects anything needing a
/// network backend
pub struct LocalDownloader;

impl Downloader for LocalDownloader {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let src = url.strip_prefix("file://").unwrap_or(url);
        if src.contains("://") {
            return Err(Error::Download(format!(
                "no transport for '{}': only local files are supported",
                url
            )));
        }
        debug!("copying {} -> {}", src, dest.display());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        Ok(())
    }
}

/// Verifies a detached signature over a file
pub trait SignatureVerifier {
    fn verify(&self, file: &Path, signature: &Path) -> Result<()>;
}

/// Content of one path in a package's data archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Regular(Vec<u8>),
    Directory,
    Symlink(String),
}

/// One extractable entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Absolute install path
    pub path: String,
    pub mode: u32,
    pub kind: EntryKind,
}

/// Read access to a package archive's three payloads: control metadata,
/// data files, and maintainer scripts
pub trait PackageArchive {
    /// The control file text
    fn control(&self) -> Result<String>;
    /// Data entries in extraction order (directories before contents)
    fn data_entries(&self) -> Result<Vec<ArchiveEntry>>;
    /// Maintainer scripts by name (`preinst`, `postinst`, `prerm`, `postrm`)
    fn scripts(&self) -> Result<Vec<(String, String)>>;
    /// The conffiles listing, one path per line, if shipped
    fn conffiles(&self) -> Result<Option<String>>;
}

/// Opens the archive behind a downloaded package file
///
/// The real reader (ar + tar + compression) is an external collaborator;
/// the transaction engine only ever sees this seam.
pub trait ArchiveSource {
    fn open(&self, local_path: &Path) -> Result<Box<dyn PackageArchive>>;
}

/// Archive source backed by a path → archive map
///
/// Image builders register assembled payloads here; the test suite does
/// the same.
#[derive(Default)]
pub struct MemArchiveSource {
    archives: std::collections::HashMap<std::path::PathBuf, MemArchive>,
}

impl MemArchiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, local_path: &Path, archive: MemArchive) {
        self.archives.insert(local_path.to_path_buf(), archive);
    }
}

impl ArchiveSource for MemArchiveSource {
    fn open(&self, local_path: &Path) -> Result<Box<dyn PackageArchive>> {
        self.archives
            .get(local_path)
            .cloned()
            .map(|a| Box::new(a) as Box<dyn PackageArchive>)
            .ok_or_else(|| {
                Error::Download(format!("no archive registered for {}", local_path.display()))
            })
    }
}

/// An archive held in memory
///
/// The unit of exchange for image builders that assemble payloads
/// programmatically, and the double the transaction tests run against.
#[derive(Debug, Default, Clone)]
pub struct MemArchive {
    pub control: String,
    pub entries: Vec<ArchiveEntry>,
    pub scripts: Vec<(String, String)>,
    pub conffiles: Option<String>,
}

impl MemArchive {
    pub fn new(control: &str) -> Self {
        Self {
            control: control.to_string(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, path: &str, mode: u32, content: &[u8]) -> Self {
        self.entries.push(ArchiveEntry {
            path: path.to_string(),
            mode,
            kind: EntryKind::Regular(content.to_vec()),
        });
        self
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        self.entries.push(ArchiveEntry {
            path: path.to_string(),
            mode: 0o755,
            kind: EntryKind::Directory,
        });
        self
    }

    pub fn with_symlink(mut self, path: &str, target: &str) -> Self {
        self.entries.push(ArchiveEntry {
            path: path.to_string(),
            mode: 0o777,
            kind: EntryKind::Symlink(target.to_string()),
        });
        self
    }

    pub fn with_script(mut self, name: &str, body: &str) -> Self {
        self.scripts.push((name.to_string(), body.to_string()));
        self
    }

    pub fn with_conffiles(mut self, listing: &str) -> Self {
        self.conffiles = Some(listing.to_string());
        self
    }
}

impl PackageArchive for MemArchive {
    fn control(&self) -> Result<String> {
        Ok(self.control.clone())
    }

    fn data_entries(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(self.entries.clone())
    }

    fn scripts(&self) -> Result<Vec<(String, String)>> {
        Ok(self.scripts.clone())
    }

    fn conffiles(&self) -> Result<Option<String>> {
        Ok(self.conffiles.clone())
    }
}
