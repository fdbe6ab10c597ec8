// src/script.rs

//! Maintainer script execution
//!
//! Scripts live in the destination's info directory as
//! `<pkg>.preinst`, `<pkg>.postinst`, `<pkg>.prerm`, `<pkg>.postrm` and run
//! through `/bin/sh -c` with `PKG_ROOT` pointing at the destination root.
//! A script absent from disk is a success. Offline roots skip execution
//! entirely unless forced, since the script would run against the build
//! host.

use crate::config::Config;
use crate::dest::Destination;
use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{info, warn};
use wait_timeout::ChildExt;

/// Ceiling on a single script's runtime
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Run one maintainer script; absent scripts succeed
pub fn run_script(
    dest: &Destination,
    pkg_name: &str,
    script: &str,
    args: &[&str],
    config: &Config,
) -> Result<()> {
    if config.noaction {
        return Ok(());
    }
    if config.offline_root.is_some() && !config.force_postinstall {
        info!("offline root mode: not running {}.{}", pkg_name, script);
        return Ok(());
    }

    let path = dest.info_file(pkg_name, script);
    if !path.exists() {
        return Ok(());
    }

    info!("running script {}", path.display());

    let cmd = if args.is_empty() {
        path.display().to_string()
    } else {
        format!("{} {}", path.display(), args.join(" "))
    };

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(&cmd)
        .env("PKG_ROOT", &dest.root_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let status = match child.wait_timeout(SCRIPT_TIMEOUT)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Script {
                pkg: pkg_name.to_string(),
                script: script.to_string(),
                status: -1,
            });
        }
    };

    let output = child.wait_with_output()?;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        info!("[{}.{}] {}", pkg_name, script, line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        warn!("[{}.{}] {}", pkg_name, script, line);
    }

    if status.success() {
        Ok(())
    } else {
        let code = status.code().unwrap_or(-1);
        Err(Error::Script {
            pkg: pkg_name.to_string(),
            script: script.to_string(),
            status: code,
        })
    }
}
