// src/config.rs

//! Options context threaded through the core
//!
//! All behavior toggles live in one explicit [`Config`] value passed to the
//! solver and transaction engine. There is no process-global configuration.

use std::path::PathBuf;

/// Priority assigned to a package with no `Architecture` field
pub const DEFAULT_ARCH_PRIORITY: u32 = 1;

/// Behavior toggles for a satchel invocation
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix under which all destination paths are staged (image builds)
    pub offline_root: Option<PathBuf>,
    /// Accept packages whose checksum is missing or wrong
    pub force_checksum: bool,
    /// Require and verify detached signatures before unpack
    pub check_signature: bool,
    /// Enqueue Recommends alongside Depends when solving
    pub add_recommends: bool,
    /// Allow removal of Essential packages
    pub force_removal_of_essential: bool,
    /// Run each package's configure immediately after its unpack
    pub configure_on_unpack: bool,
    /// Emit the full field set (and userfields) into the status file
    pub verbose_status_file: bool,
    /// Plan and report but never touch the filesystem
    pub noaction: bool,
    /// Run maintainer scripts even under an offline root
    pub force_postinstall: bool,
    /// Supported architectures with their priorities, highest preferred
    pub arch_list: Vec<(String, u32)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offline_root: None,
            force_checksum: false,
            check_signature: false,
            add_recommends: false,
            force_removal_of_essential: false,
            configure_on_unpack: false,
            verbose_status_file: false,
            noaction: false,
            force_postinstall: false,
            arch_list: vec![("all".to_string(), DEFAULT_ARCH_PRIORITY)],
        }
    }
}

impl Config {
    /// Priority of an architecture, 0 when unsupported
    ///
    /// A package without an `Architecture` field runs anywhere and gets the
    /// default priority.
    pub fn arch_priority(&self, arch: Option<&str>) -> u32 {
        match arch {
            None => DEFAULT_ARCH_PRIORITY,
            Some(a) => self
                .arch_list
                .iter()
                .find(|(name, _)| name == a)
                .map(|(_, prio)| *prio)
                .unwrap_or(0),
        }
    }

    /// Register an architecture; later registrations override earlier ones
    pub fn add_arch(&mut self, arch: &str, priority: u32) {
        if let Some(entry) = self.arch_list.iter_mut().find(|(name, _)| name == arch) {
            entry.1 = priority;
        } else {
            self.arch_list.push((arch.to_string(), priority));
        }
    }
}
