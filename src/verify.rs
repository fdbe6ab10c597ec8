// src/verify.rs

//! Pre-unpack verification gate
//!
//! Ordered checks before any extraction: exact size, then sha256 (md5 as
//! the legacy fallback), then the detached signature when enabled. A
//! failing artifact is deleted, signature included, so a later retry
//! re-downloads instead of trusting a corrupt cache.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::SignatureVerifier;
use crate::pkg::Package;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of a verification pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// All enabled checks passed
    Ok,
    /// The local file does not exist yet; caller should download it
    MissingFile,
}

fn hex_digest<D: Digest + io::Write>(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    Ok(out)
}

fn checksum_error(file: &Path, msg: String) -> Error {
    Error::Verification {
        file: file.to_path_buf(),
        msg,
    }
}

/// Verify a downloaded package file against its advertised metadata
///
/// An absent local file is a soft miss so the caller can download without
/// an error in the log. Any hard failure removes the file (and its
/// signature) unless `force_checksum`, which downgrades checksum problems
/// to a notice.
pub fn verify_package(
    pkg: &Package,
    config: &Config,
    signer: Option<&dyn SignatureVerifier>,
) -> Result<VerifyOutcome> {
    let Some(local) = pkg.local_filename.as_deref() else {
        return Err(Error::Internal(format!(
            "verify called for {} with no local file",
            pkg.name
        )));
    };
    let local = Path::new(local);

    let meta = match fs::metadata(local) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(VerifyOutcome::MissingFile),
        Err(e) => return Err(e.into()),
    };

    let result = run_checks(pkg, local, &meta, config, signer);
    match result {
        Ok(()) => Ok(VerifyOutcome::Ok),
        Err(err) => {
            if config.force_checksum && !matches!(err, Error::Io(_)) {
                info!("ignoring verification failure for {}: {}", pkg.name, err);
                return Ok(VerifyOutcome::Ok);
            }
            warn!("removing corrupt package file {}", local.display());
            let _ = fs::remove_file(local);
            let sig = sig_path(local);
            if sig.exists() {
                warn!("removing unmatched signature file {}", sig.display());
                let _ = fs::remove_file(&sig);
            }
            Err(err)
        }
    }
}

fn run_checks(
    pkg: &Package,
    local: &Path,
    meta: &fs::Metadata,
    config: &Config,
    signer: Option<&dyn SignatureVerifier>,
) -> Result<()> {
    // Size first: cheap, and it keeps hash collisions off the table.
    if meta.len() < 1 || meta.len() != pkg.size {
        return Err(checksum_error(
            local,
            format!("size is {} bytes, expecting {}", meta.len(), pkg.size),
        ));
    }

    if let Some(expected) = pkg.sha256sum.as_deref() {
        let got = hex_digest::<Sha256>(local)?;
        if !got.eq_ignore_ascii_case(expected) {
            return Err(checksum_error(
                local,
                format!("sha256 mismatch: got {}, expecting {}", got, expected),
            ));
        }
        debug!("sha256 ok for {}", pkg.name);
    } else if let Some(expected) = pkg.md5sum.as_deref() {
        let got = hex_digest::<Md5>(local)?;
        if !got.eq_ignore_ascii_case(expected) {
            return Err(checksum_error(
                local,
                format!("md5 mismatch: got {}, expecting {}", got, expected),
            ));
        }
        debug!("md5 ok for {}", pkg.name);
    } else if !config.force_checksum {
        return Err(checksum_error(
            local,
            "no checksum available; use force-checksum to bypass".to_string(),
        ));
    }

    if config.check_signature {
        let sig = sig_path(local);
        if !sig.exists() {
            return Err(checksum_error(
                local,
                format!("missing signature file {}", sig.display()),
            ));
        }
        let signer = signer.ok_or_else(|| {
            Error::Internal("signature checking enabled with no backend".to_string())
        })?;
        signer.verify(local, &sig)?;
        debug!("signature ok for {}", pkg.name);
    }

    Ok(())
}

/// The detached signature lives alongside the artifact
fn sig_path(local: &Path) -> std::path::PathBuf {
    let mut os = local.as_os_str().to_owned();
    os.push(".sig");
    std::path::PathBuf::from(os)
}
