// src/status.rs

//! Status database persistence
//!
//! The installed-package database is a Debian-compatible text file: one
//! control block per known package, blank-line separated. Writes follow
//! the crash-safety protocol: serialize into memory, write a uniquely
//! named temporary file beside the target, fsync it, then rename over the
//! canonical path. A reader can never observe a torn file.

use crate::config::Config;
use crate::control::{parse_control, write_status_entry};
use crate::dest::{DestId, Destinations};
use crate::error::Result;
use crate::index::{PkgId, PkgIndex};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Load a destination's status file into the index
///
/// A missing file is an empty database, not an error. Every loaded record
/// is bound to the destination. Returns the ids of the loaded packages.
pub fn load_status(
    index: &mut PkgIndex,
    dests: &Destinations,
    dest_id: DestId,
) -> Result<Vec<PkgId>> {
    let dest = dests.get(dest_id);
    let path = dest.status_path();

    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no status file at {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut loaded = Vec::new();
    for mut pkg in parse_control(BufReader::new(file), Some(&path))? {
        pkg.dest = Some(dest_id);
        let status = pkg.state_status;
        let id = index.insert(pkg);
        index.note_status(id, status);
        loaded.push(id);
    }
    info!("loaded {} records from {}", loaded.len(), path.display());
    Ok(loaded)
}

/// Serialize the status database for one destination
///
/// Section order is stable (insertion order of the index), so repeated
/// writes of an unchanged world are byte-identical.
pub fn render_status(index: &PkgIndex, dest_id: DestId, config: &Config) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for id in index.all_with_state() {
        if index.pkg(id).dest != Some(dest_id) {
            continue;
        }
        write_status_entry(&mut buf, index, id, config.verbose_status_file)?;
    }
    Ok(buf)
}

/// Atomically replace a destination's status file
///
/// Buffer → unique `.tmp` in the same directory → fsync → rename. The
/// temporary is unlinked on any failure; the file descriptor is held only
/// for the rename window.
pub fn write_status(
    index: &PkgIndex,
    dests: &Destinations,
    dest_id: DestId,
    config: &Config,
) -> Result<()> {
    if config.noaction {
        return Ok(());
    }

    let dest = dests.get(dest_id);
    let path = dest.status_path();
    let dir = path
        .parent()
        .ok_or_else(|| crate::error::Error::Internal(format!(
            "status path {} has no parent directory",
            path.display()
        )))?;
    fs::create_dir_all(dir)?;

    let buf = render_status(index, dest_id, config)?;

    let mut tmp = NamedTempFile::with_prefix_in("status.tmp.", dir)?;
    tmp.write_all(&buf)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;

    // Directory entry durability; not every filesystem supports this.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }

    debug!("wrote {} bytes to {}", buf.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dest::Destination;
    use crate::pkg::{Package, StateStatus, StateWant};
    use crate::version::PkgVersion;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Destinations, DestId) {
        let temp = TempDir::new().unwrap();
        let mut dests = Destinations::new();
        let id = dests.add(Destination::new("root", temp.path()));
        (temp, dests, id)
    }

    fn installed(name: &str, ver: &str, dest: DestId) -> Package {
        let mut p = Package::new(name, PkgVersion::parse(ver).unwrap());
        p.state_status = StateStatus::Installed;
        p.state_want = StateWant::Install;
        p.dest = Some(dest);
        p
    }

    #[test]
    fn test_missing_status_is_empty() {
        let (_temp, dests, dest_id) = setup();
        let mut index = PkgIndex::new();
        assert!(load_status(&mut index, &dests, dest_id).unwrap().is_empty());
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let (_temp, dests, dest_id) = setup();
        let config = Config::default();

        let mut index = PkgIndex::new();
        let mut pkg = installed("busybox", "1.36.1-1", dest_id);
        pkg.depends_str = Some("libc".to_string());
        pkg.installed_size = 4096;
        index.insert(pkg);
        index.insert(installed("zlib", "1.3-1", dest_id));

        write_status(&index, &dests, dest_id, &config).unwrap();

        let mut reloaded = PkgIndex::new();
        let ids = load_status(&mut reloaded, &dests, dest_id).unwrap();
        assert_eq!(ids.len(), 2);
        let busybox = reloaded.installed_version_of("busybox").unwrap();
        assert_eq!(reloaded.pkg(busybox).depends_str.as_deref(), Some("libc"));
        assert_eq!(reloaded.pkg(busybox).installed_size, 4096);
        assert_eq!(reloaded.pkg(busybox).state_status, StateStatus::Installed);
    }

    #[test]
    fn test_rewrite_is_stable() {
        let (_temp, dests, dest_id) = setup();
        let config = Config::default();

        let mut index = PkgIndex::new();
        index.insert(installed("busybox", "1.36.1-1", dest_id));
        write_status(&index, &dests, dest_id, &config).unwrap();
        let first = fs::read(dests.get(dest_id).status_path()).unwrap();

        let mut again = PkgIndex::new();
        load_status(&mut again, &dests, dest_id).unwrap();
        write_status(&again, &dests, dest_id, &config).unwrap();
        let second = fs::read(dests.get(dest_id).status_path()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_no_stray_temp_file_after_write() {
        let (_temp, dests, dest_id) = setup();
        let config = Config::default();

        let mut index = PkgIndex::new();
        index.insert(installed("busybox", "1.36.1-1", dest_id));
        write_status(&index, &dests, dest_id, &config).unwrap();

        let dir = dests.get(dest_id).status_path().parent().unwrap().to_path_buf();
        let leftovers: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("status.tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_noaction_writes_nothing() {
        let (_temp, dests, dest_id) = setup();
        let mut config = Config::default();
        config.noaction = true;

        let mut index = PkgIndex::new();
        index.insert(installed("busybox", "1.36.1-1", dest_id));
        write_status(&index, &dests, dest_id, &config).unwrap();
        assert!(!dests.get(dest_id).status_path().exists());
    }

    #[test]
    fn test_not_installed_without_want_omitted() {
        let (_temp, dests, dest_id) = setup();
        let config = Config::default();

        let mut index = PkgIndex::new();
        index.insert(installed("kept", "1.0-1", dest_id));
        let mut feed_only = Package::new("feedpkg", PkgVersion::parse("2.0-1").unwrap());
        feed_only.dest = Some(dest_id);
        index.insert(feed_only);

        write_status(&index, &dests, dest_id, &config).unwrap();
        let text = fs::read_to_string(dests.get(dest_id).status_path()).unwrap();
        assert!(text.contains("Package: kept"));
        assert!(!text.contains("Package: feedpkg"));
    }
}
