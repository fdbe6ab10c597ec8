// src/error.rs

//! Core error types for satchel

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for satchel
///
/// Each variant corresponds to one failure class the core distinguishes:
/// parse errors are recoverable per record, resolution and verification
/// errors abort a transaction before (or without) mutation, I/O errors are
/// fatal, script errors drive the owning package into a half-state.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed control data, version string, or dependency expression
    #[error("parse error{}: {msg}", source_location(.file, .line))]
    Parse {
        msg: String,
        file: Option<PathBuf>,
        line: Option<usize>,
    },

    /// Dependencies cannot be satisfied; carries the blocking chain
    #[error("cannot resolve dependencies:\n{}", .chain.join("\n"))]
    Resolution { chain: Vec<String> },

    /// Size, checksum, or signature check failed
    #[error("verification of {file} failed: {msg}")]
    Verification { file: PathBuf, msg: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A maintainer script exited non-zero
    #[error("package {pkg} {script} script returned status {status}")]
    Script {
        pkg: String,
        script: String,
        status: i32,
    },

    /// Another process holds the destination lock
    #[error("lock file {0} is held by another instance")]
    LockHeld(PathBuf),

    /// Download failed (reported by the external downloader)
    #[error("download failed: {0}")]
    Download(String),

    /// Operation cancelled by signal
    #[error("cancelled during {0}")]
    Cancelled(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

fn source_location(file: &Option<PathBuf>, line: &Option<usize>) -> String {
    match (file, line) {
        (Some(f), Some(l)) => format!(" in {} line {}", f.display(), l),
        (Some(f), None) => format!(" in {}", f.display()),
        _ => String::new(),
    }
}

impl Error {
    /// Shorthand for a parse error with no file context
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse {
            msg: msg.into(),
            file: None,
            line: None,
        }
    }

    /// Attach file/line context to a parse error, leaving other kinds alone
    pub fn at(self, file: &std::path::Path, line: usize) -> Self {
        match self {
            Error::Parse { msg, .. } => Error::Parse {
                msg,
                file: Some(file.to_path_buf()),
                line: Some(line),
            },
            other => other,
        }
    }

    /// Map an error to the process exit code defined by the CLI contract
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::LockHeld(_) => 2,
            Error::Resolution { .. } => 3,
            Error::Verification { .. } => 4,
            _ => 1,
        }
    }
}

/// Result type alias using satchel's Error type
pub type Result<T> = std::result::Result<T, Error>;
