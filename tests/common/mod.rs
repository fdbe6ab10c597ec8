// tests/common/mod.rs

//! Shared test fixtures for integration tests.

use satchel::fetch::{MemArchive, MemArchiveSource};
use satchel::{Config, DestId, Destination, Destinations, Package, PkgIndex, PkgVersion};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A scratch destination with its info dir created.
///
/// Returns (TempDir, registry, id) - keep the TempDir alive to prevent
/// cleanup.
pub fn scratch_dest() -> (TempDir, Destinations, DestId) {
    let temp = TempDir::new().unwrap();
    let mut dests = Destinations::new();
    let id = dests.add(Destination::new("root", temp.path()));
    fs::create_dir_all(&dests.get(id).info_dir).unwrap();
    (temp, dests, id)
}

pub fn pkg(name: &str, version: &str) -> Package {
    let mut p = Package::new(name, PkgVersion::parse(version).unwrap());
    p.arch_priority = 1;
    p
}

pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Register an installable package: the archive lands in the source map,
/// the record (with checksum and size) in the index.
///
/// `files` is (path, content); a postinst script can be attached through
/// `script`.
pub fn add_installable(
    index: &mut PkgIndex,
    archives: &mut MemArchiveSource,
    temp: &TempDir,
    name: &str,
    version: &str,
    files: &[(&str, &[u8])],
    script: Option<(&str, &str)>,
) -> satchel::PkgId {
    let payload: Vec<u8> = format!("{}_{}", name, version).into_bytes();
    let local = temp.path().join(format!("{}_{}.pkg", name, version));
    fs::write(&local, &payload).unwrap();

    let control = format!("Package: {}\nVersion: {}\n", name, version);
    let mut archive = MemArchive::new(&control);
    for (path, content) in files {
        archive = archive.with_file(path, 0o644, content);
    }
    if let Some((script_name, body)) = script {
        archive = archive.with_script(script_name, body);
    }
    archives.register(&local, archive);

    let mut record = pkg(name, version);
    record.local_filename = Some(local.to_string_lossy().into_owned());
    record.size = payload.len() as u64;
    record.sha256sum = Some(sha256_hex(&payload));
    index.insert(record)
}

/// Paths a test expects on disk, rooted in the destination.
pub fn rooted(temp: &TempDir, rel: &str) -> PathBuf {
    temp.path().join(rel.trim_start_matches('/'))
}

pub fn default_config() -> Config {
    Config::default()
}
