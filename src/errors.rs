// src/errors.rs

//! Crate-wide error aliases.
//!
//! Infrastructure failures (unreadable config, bad preconditions) use
//! `anyhow`; per-run failures are outcome data (`batch::FailureReason`),
//! never errors.

pub use anyhow::{Error, Result};
