// src/lib.rs

//! satchel — a lightweight package manager core
//!
//! Resolves, verifies, and installs packages described by Debian-style
//! control metadata, keeping a crash-safe on-disk record of installed
//! state.
//!
//! # Architecture
//!
//! - Index-first: every known concrete version and abstract name lives in
//!   one arena-backed index; parsers feed it, the solver reads it, the
//!   transaction engine writes state back into it
//! - Plans before mutation: conflicts, holds and missing dependencies all
//!   surface while computing the plan, never mid-extraction
//! - Status file is the database: Debian-compatible text, replaced
//!   atomically around every state transition
//! - Multiple destinations: independent install roots, each with its own
//!   info directory, status database, and advisory lock

pub mod config;
pub mod control;
pub mod depend;
pub mod dest;
mod error;
pub mod fetch;
pub mod files;
pub mod index;
pub mod pkg;
pub mod script;
pub mod solver;
pub mod status;
pub mod transact;
pub mod verify;
pub mod version;

pub use config::Config;
pub use dest::{DestId, Destination, Destinations};
pub use error::{Error, Result};
pub use index::{AbsId, PkgId, PkgIndex};
pub use pkg::{Package, StateFlags, StateStatus, StateWant};
pub use solver::{Goal, Plan, PkgOp, Solver};
pub use transact::{Backends, RecoveryOutcome, Transaction};
pub use version::{PkgVersion, VersionConstraint, VersionOp};
