// src/transact.rs

//! The transaction engine
//!
//! Executes a solver plan against one destination, driving each package
//! through `not-installed → unpacked → half-configured → installed` (and
//! the removal arm `→ config-files → not-installed`). Every state
//! transition is persisted to the status database *before* the matching
//! filesystem mutation and again after it, so a crash at any point leaves
//! a parseable database whose last entry names the completed phase, and a
//! restart can resume half-states.
//!
//! Cancellation is polled between packages: the in-flight package is
//! driven to a stable state, status flushed, then the run stops.

use crate::config::Config;
use crate::dest::{DestId, Destinations};
use crate::error::{Error, Result};
use crate::fetch::{ArchiveSource, Downloader, EntryKind, PackageArchive, SignatureVerifier};
use crate::files::{self, FileOwnership};
use crate::index::{PkgId, PkgIndex};
use crate::pkg::{Conffile, StateFlags, StateStatus, StateWant};
use crate::script::run_script;
use crate::solver::{replaces_covers, Plan, PkgOp};
use crate::verify::{verify_package, VerifyOutcome};
use chrono::Utc;
use md5::{Digest, Md5};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External backends a transaction runs against
pub struct Backends<'a> {
    pub downloader: &'a dyn Downloader,
    pub archives: &'a dyn ArchiveSource,
    pub signer: Option<&'a dyn SignatureVerifier>,
}

/// A plan execution bound to one destination
pub struct Transaction<'a> {
    index: &'a mut PkgIndex,
    dests: &'a Destinations,
    config: &'a Config,
    ownership: &'a mut FileOwnership,
    backends: Backends<'a>,
    cancel: Option<Arc<AtomicBool>>,
}

/// What a restart did with the half-states it found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Unpack was redone from the local archive
    Reinstalled(String),
    /// Configure was re-run to completion
    Reconfigured(String),
    /// post-inst-failed is sticky until the user acts
    LeftFailed(String),
    /// Needed artifacts are gone; nothing safe to do
    Unrecoverable(String),
}

impl<'a> Transaction<'a> {
    pub fn new(
        index: &'a mut PkgIndex,
        dests: &'a Destinations,
        config: &'a Config,
        ownership: &'a mut FileOwnership,
        backends: Backends<'a>,
    ) -> Self {
        Self {
            index,
            dests,
            config,
            ownership,
            backends,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    fn flush_status(&self, dest_id: DestId) -> Result<()> {
        crate::status::write_status(self.index, self.dests, dest_id, self.config)
    }

    /// Execute a plan under the destination lock
    ///
    /// A script failure parks its package in the matching half-state and
    /// the run continues, unless a later package pre-depends on the failed
    /// one. I/O errors stop everything after a final status flush.
    pub fn execute(&mut self, plan: &Plan, dest_id: DestId) -> Result<()> {
        let dest = self.dests.get(dest_id);
        let _lock = dest.lock()?;

        let mut first_script_err: Option<Error> = None;
        let mut failed_configures: Vec<PkgId> = Vec::new();

        for action in &plan.actions {
            if self.cancelled() {
                self.flush_status(dest_id)?;
                return Err(Error::Cancelled(format!(
                    "before {:?} of {}",
                    action.op,
                    self.index.pkg(action.pkg).name
                )));
            }

            let result = match action.op {
                PkgOp::Install => self.install(action.pkg, dest_id),
                PkgOp::Configure => {
                    let blocker = failed_configures
                        .iter()
                        .copied()
                        .find(|&f| self.pre_depends_on(action.pkg, f));
                    if let Some(blocker) = blocker {
                        self.flush_status(dest_id)?;
                        return Err(Error::Script {
                            pkg: self.index.pkg(blocker).name.clone(),
                            script: "postinst".to_string(),
                            status: -1,
                        });
                    }
                    self.configure(action.pkg, dest_id)
                }
                PkgOp::Remove => self.remove(action.pkg, dest_id),
                PkgOp::Purge => self.purge(action.pkg, dest_id),
                PkgOp::Noop => Ok(()),
            };

            match result {
                Ok(()) => {}
                Err(err @ Error::Script { .. }) => {
                    warn!("{}", err);
                    if action.op == PkgOp::Configure {
                        failed_configures.push(action.pkg);
                    }
                    if first_script_err.is_none() {
                        first_script_err = Some(err);
                    }
                }
                Err(other) => {
                    self.flush_status(dest_id)?;
                    return Err(other);
                }
            }
        }

        // Packages whose files were adopted by a replacer need their
        // lists rewritten to match reality.
        self.write_changed_filelists(dest_id)?;
        self.flush_status(dest_id)?;

        match first_script_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn pre_depends_on(&self, pkg: PkgId, dep: PkgId) -> bool {
        let dep_provides = &self.index.pkg(dep).provides;
        self.index.pkg(pkg).deps.iter().any(|d| {
            d.kind == crate::depend::DepKind::PreDepend
                && d.possibilities
                    .iter()
                    .any(|p| dep_provides.contains(&p.target))
        })
    }

    fn cache_path(&self, dest_id: DestId, pkg: PkgId) -> PathBuf {
        let dest = self.dests.get(dest_id);
        let file = self
            .index
            .pkg(pkg)
            .filename
            .as_deref()
            .and_then(|f| Path::new(f).file_name().map(|n| n.to_os_string()))
            .unwrap_or_else(|| {
                format!(
                    "{}_{}.pkg",
                    self.index.pkg(pkg).name,
                    self.index.pkg(pkg).version_str()
                )
                .into()
            });
        dest.root_dir.join("var/cache/satchel").join(file)
    }

    /// Make sure the verified archive is on disk, downloading when needed
    fn fetch_and_verify(&mut self, id: PkgId, dest_id: DestId) -> Result<()> {
        if self.index.pkg(id).local_filename.is_none() {
            let target = self.cache_path(dest_id, id);
            self.index.pkg_mut(id).local_filename =
                Some(target.to_string_lossy().into_owned());
        }

        match verify_package(self.index.pkg(id), self.config, self.backends.signer)? {
            VerifyOutcome::Ok => return Ok(()),
            VerifyOutcome::MissingFile => {}
        }

        let url = self
            .index
            .pkg(id)
            .filename
            .clone()
            .ok_or_else(|| {
                Error::Download(format!(
                    "{} has no Filename to download from",
                    self.index.pkg(id).name
                ))
            })?;
        let local = self.local_path(id)?;
        self.backends.downloader.fetch(&url, &local)?;

        match verify_package(self.index.pkg(id), self.config, self.backends.signer)? {
            VerifyOutcome::Ok => Ok(()),
            VerifyOutcome::MissingFile => Err(Error::Download(format!(
                "{} vanished after download",
                local.display()
            ))),
        }
    }

    fn local_path(&self, id: PkgId) -> Result<PathBuf> {
        self.index
            .pkg(id)
            .local_filename
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| {
                Error::Internal(format!("{} has no local archive path", self.index.pkg(id).name))
            })
    }

    fn target_path(&self, dest_id: DestId, entry_path: &str) -> PathBuf {
        let dest = self.dests.get(dest_id);
        let rel = entry_path.trim_start_matches('/');
        dest.root_dir.join(rel)
    }

    /// Find a live sibling version being upgraded over
    fn old_version_of(&self, id: PkgId) -> Option<PkgId> {
        let name = &self.index.pkg(id).name;
        self.index
            .versions_of(name)
            .iter()
            .copied()
            .find(|&other| other != id && self.index.pkg(other).state_status.has_files())
    }

    /// Download, verify, and unpack one package
    pub fn install(&mut self, id: PkgId, dest_id: DestId) -> Result<()> {
        let name = self.index.pkg(id).name.clone();
        info!("installing {} {}", name, self.index.pkg(id).version_str());

        if self.index.pkg(id).dest.is_none() {
            self.index.pkg_mut(id).dest = Some(dest_id);
        }
        if self.config.noaction {
            return Ok(());
        }

        self.fetch_and_verify(id, dest_id)?;

        let local = self.local_path(id)?;
        let archive = self.backends.archives.open(&local)?;
        let entries = archive.data_entries()?;
        let old = self.old_version_of(id);

        // Clash pass before anything is written.
        for entry in &entries {
            if matches!(entry.kind, EntryKind::Directory) {
                continue;
            }
            let target = self.target_path(dest_id, &entry.path);
            if let Some(owner) = self.ownership.owner_of(&target) {
                let same_pkg = owner == id || Some(owner) == old;
                let is_conffile = self
                    .index
                    .pkg(owner)
                    .conffile(&target.to_string_lossy())
                    .is_some();
                if !same_pkg && !is_conffile && !replaces_covers(self.index, id, owner) {
                    return Err(Error::Resolution {
                        chain: vec![format!(
                            "{} wants to install {} which is owned by {}",
                            name,
                            target.display(),
                            self.index.pkg(owner).name
                        )],
                    });
                }
            }
        }

        // Persist intent, then mutate.
        self.index.pkg_mut(id).state_want = StateWant::Install;
        self.index.note_status(id, StateStatus::HalfInstalled);
        self.flush_status(dest_id)?;

        self.stage_info_files(id, dest_id, archive.as_ref())?;
        run_script(
            self.dests.get(dest_id),
            &name,
            "preinst",
            &["install"],
            self.config,
        )?;

        let mut md5sums: Vec<(String, String)> = Vec::new();
        for entry in &entries {
            let target = self.target_path(dest_id, &entry.path);
            match &entry.kind {
                EntryKind::Directory => {
                    fs::create_dir_all(&target)?;
                }
                EntryKind::Regular(content) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, content)?;
                    set_mode(&target, entry.mode)?;
                    md5sums.push((md5_hex(content), entry.path.clone()));
                    self.adopt(target, id);
                }
                EntryKind::Symlink(link) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let _ = fs::remove_file(&target);
                    std::os::unix::fs::symlink(link, &target)?;
                    self.adopt(target, id);
                }
            }
        }

        self.record_conffiles(id, dest_id, archive.as_ref())?;
        files::write_filelist(
            self.dests.get(dest_id),
            &name,
            self.ownership,
            id,
            self.config,
        )?;
        self.write_md5sums(dest_id, &name, &md5sums)?;

        if let Some(old) = old {
            self.retire_replaced_version(old, id, dest_id)?;
        }

        self.index.pkg_mut(id).installed_time = Utc::now().timestamp();
        self.index.note_status(id, StateStatus::Unpacked);
        self.flush_status(dest_id)?;
        Ok(())
    }

    /// Claim a path, flagging any previous owner for a filelist rewrite
    fn adopt(&mut self, target: PathBuf, id: PkgId) {
        if let Some(previous) = self.ownership.set_owner(target, id) {
            if previous != id {
                self.index
                    .pkg_mut(previous)
                    .state_flags
                    .set(StateFlags::FILELIST_CHANGED);
            }
        }
    }

    /// Copy control metadata and maintainer scripts into the info dir
    fn stage_info_files(
        &mut self,
        id: PkgId,
        dest_id: DestId,
        archive: &dyn PackageArchive,
    ) -> Result<()> {
        let dest = self.dests.get(dest_id);
        let name = self.index.pkg(id).name.clone();
        fs::create_dir_all(&dest.info_dir)?;

        fs::write(dest.info_file(&name, "control"), archive.control()?)?;
        for (script, body) in archive.scripts()? {
            let path = dest.info_file(&name, &script);
            fs::write(&path, body)?;
            set_mode(&path, 0o100755)?;
        }
        Ok(())
    }

    /// Record conffiles with the md5 of what was just laid down
    fn record_conffiles(
        &mut self,
        id: PkgId,
        dest_id: DestId,
        archive: &dyn PackageArchive,
    ) -> Result<()> {
        let Some(listing) = archive.conffiles()? else {
            return Ok(());
        };
        let dest = self.dests.get(dest_id);
        let name = self.index.pkg(id).name.clone();
        fs::write(dest.info_file(&name, "conffiles"), &listing)?;

        let mut conffiles = Vec::new();
        for line in listing.lines() {
            let path = line.trim();
            if path.is_empty() {
                continue;
            }
            let on_disk = self.target_path(dest_id, path);
            let hash = match fs::read(&on_disk) {
                Ok(content) => md5_hex(&content),
                Err(_) => continue,
            };
            conffiles.push(Conffile {
                path: on_disk.to_string_lossy().into_owned(),
                hash,
            });
        }
        self.index.pkg_mut(id).conffiles = conffiles;
        Ok(())
    }

    fn write_md5sums(
        &self,
        dest_id: DestId,
        name: &str,
        sums: &[(String, String)],
    ) -> Result<()> {
        let dest = self.dests.get(dest_id);
        let mut buf = String::new();
        for (sum, path) in sums {
            buf.push_str(&format!("{}  {}\n", sum, path.trim_start_matches('/')));
        }
        fs::write(dest.info_file(name, "md5sums"), buf)?;
        Ok(())
    }

    /// After an upgrade unpack, clear out what the old version still owns
    fn retire_replaced_version(
        &mut self,
        old: PkgId,
        _new: PkgId,
        dest_id: DestId,
    ) -> Result<()> {
        let old_name = self.index.pkg(old).name.clone();
        debug!("retiring replaced version of {}", old_name);

        let leftovers = self.ownership.release(old);
        for path in leftovers {
            let keep = self
                .index
                .pkg(old)
                .conffile(&path.to_string_lossy())
                .is_some();
            if !keep {
                remove_file_if_present(&path)?;
            }
        }

        files::remove_filelist(self.dests.get(dest_id), &old_name)?;
        self.index.pkg_mut(old).state_want = StateWant::Unknown;
        self.index
            .pkg_mut(old)
            .state_flags
            .clear(StateFlags::FILELIST_CHANGED);
        self.index.note_status(old, StateStatus::NotInstalled);
        Ok(())
    }

    /// Run a package's postinst and mark it installed
    pub fn configure(&mut self, id: PkgId, dest_id: DestId) -> Result<()> {
        let name = self.index.pkg(id).name.clone();
        let status = self.index.pkg(id).state_status;
        if !matches!(status, StateStatus::Unpacked | StateStatus::HalfConfigured) {
            if status == StateStatus::Installed {
                return Ok(());
            }
            return Err(Error::Internal(format!(
                "cannot configure {} from state {}",
                name, status
            )));
        }
        if self.config.noaction {
            return Ok(());
        }

        info!("configuring {}", name);
        self.index.note_status(id, StateStatus::HalfConfigured);
        self.flush_status(dest_id)?;

        match run_script(
            self.dests.get(dest_id),
            &name,
            "postinst",
            &["configure"],
            self.config,
        ) {
            Ok(()) => {
                self.index.note_status(id, StateStatus::Installed);
                self.flush_status(dest_id)?;
                Ok(())
            }
            Err(err) => {
                self.index.note_status(id, StateStatus::PostInstFailed);
                self.flush_status(dest_id)?;
                Err(err)
            }
        }
    }

    /// Remove a package's files, keeping conffiles, ending in config-files
    pub fn remove(&mut self, id: PkgId, dest_id: DestId) -> Result<()> {
        let name = self.index.pkg(id).name.clone();
        info!("removing {}", name);
        if self.config.noaction {
            return Ok(());
        }

        self.index.pkg_mut(id).state_want = StateWant::Deinstall;
        self.flush_status(dest_id)?;

        if let Err(err) = run_script(
            self.dests.get(dest_id),
            &name,
            "prerm",
            &["remove"],
            self.config,
        ) {
            self.index.note_status(id, StateStatus::RemovalFailed);
            self.flush_status(dest_id)?;
            return Err(err);
        }

        let owned = self.ownership.release(id);
        let mut kept_conffiles = Vec::new();
        for path in owned {
            if self.index.pkg(id).conffile(&path.to_string_lossy()).is_some() {
                kept_conffiles.push(path);
            } else {
                remove_file_if_present(&path)?;
            }
        }
        // Conffiles stay owned and listed until purge.
        for path in kept_conffiles {
            self.ownership.set_owner(path, id);
        }
        files::write_filelist(
            self.dests.get(dest_id),
            &name,
            self.ownership,
            id,
            self.config,
        )?;

        if let Err(err) = run_script(
            self.dests.get(dest_id),
            &name,
            "postrm",
            &["remove"],
            self.config,
        ) {
            self.index.note_status(id, StateStatus::RemovalFailed);
            self.flush_status(dest_id)?;
            return Err(err);
        }

        self.index.note_status(id, StateStatus::ConfigFiles);
        self.flush_status(dest_id)?;
        Ok(())
    }

    /// Drop conffiles and every info file; the record leaves the database
    pub fn purge(&mut self, id: PkgId, dest_id: DestId) -> Result<()> {
        let name = self.index.pkg(id).name.clone();
        info!("purging {}", name);
        if self.config.noaction {
            return Ok(());
        }

        self.index.pkg_mut(id).state_want = StateWant::Purge;
        self.flush_status(dest_id)?;

        for path in self.ownership.release(id) {
            remove_file_if_present(&path)?;
        }

        run_script(
            self.dests.get(dest_id),
            &name,
            "postrm",
            &["purge"],
            self.config,
        )?;

        let dest = self.dests.get(dest_id);
        for ext in ["list", "control", "conffiles", "md5sums", "preinst", "postinst", "prerm", "postrm"] {
            let path = dest.info_file(&name, ext);
            remove_file_if_present(&path)?;
        }

        self.index.pkg_mut(id).conffiles.clear();
        self.index.pkg_mut(id).state_want = StateWant::Unknown;
        self.index.note_status(id, StateStatus::NotInstalled);
        self.flush_status(dest_id)?;
        Ok(())
    }

    fn write_changed_filelists(&mut self, dest_id: DestId) -> Result<()> {
        for id in self.index.all_with_files() {
            if !self
                .index
                .pkg(id)
                .state_flags
                .contains(StateFlags::FILELIST_CHANGED)
            {
                continue;
            }
            let name = self.index.pkg(id).name.clone();
            files::write_filelist(
                self.dests.get(dest_id),
                &name,
                self.ownership,
                id,
                self.config,
            )?;
            self.index
                .pkg_mut(id)
                .state_flags
                .clear(StateFlags::FILELIST_CHANGED);
        }
        Ok(())
    }

    /// Resume whatever a previous run left in a half-state
    ///
    /// `half-installed` is redone from unpack when the archive is still
    /// around; `half-configured` re-runs configure; `post-inst-failed`
    /// stays sticky until the user retries or removes.
    pub fn recover(&mut self, dest_id: DestId) -> Result<Vec<RecoveryOutcome>> {
        let _lock = self.dests.get(dest_id).lock()?;
        let mut outcomes = Vec::new();
        for id in self.index.iter_ids().collect::<Vec<_>>() {
            if self.index.pkg(id).dest != Some(dest_id) {
                continue;
            }
            let name = self.index.pkg(id).name.clone();
            match self.index.pkg(id).state_status {
                StateStatus::HalfInstalled => {
                    let available = self
                        .index
                        .pkg(id)
                        .local_filename
                        .as_deref()
                        .map(|p| Path::new(p).exists())
                        .unwrap_or(false)
                        || self.index.pkg(id).filename.is_some();
                    if available {
                        info!("resuming interrupted unpack of {}", name);
                        self.install(id, dest_id)?;
                        outcomes.push(RecoveryOutcome::Reinstalled(name));
                    } else {
                        warn!("cannot resume {}: archive is gone", name);
                        outcomes.push(RecoveryOutcome::Unrecoverable(name));
                    }
                }
                StateStatus::HalfConfigured => {
                    info!("re-running interrupted configure of {}", name);
                    self.configure(id, dest_id)?;
                    outcomes.push(RecoveryOutcome::Reconfigured(name));
                }
                StateStatus::PostInstFailed => {
                    warn!("{} previously failed postinst; leaving as-is", name);
                    outcomes.push(RecoveryOutcome::LeftFailed(name));
                }
                _ => {}
            }
        }
        Ok(outcomes)
    }
}

fn md5_hex(content: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(content);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if mode & 0o7777 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    Ok(())
}

fn remove_file_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

static CANCEL: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    // Only an atomic store happens here.
    if let Some(flag) = CANCEL.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

/// Install a SIGINT/SIGTERM handler that raises the shared cancel flag
///
/// The engine polls the flag between packages, drives the current one to
/// a stable state, flushes status, then stops.
pub fn install_signal_handler() -> Arc<AtomicBool> {
    let flag = CANCEL
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone();
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
    flag
}
