// src/config/validate.rs

use anyhow::{anyhow, Context, Result};
use regex::Regex;

use crate::cli::Period;
use crate::config::model::ConfigFile;

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - `agent.bin` is non-blank
/// - `agent.command_pattern` compiles as a regex
/// - `defaults.period` is one of "early", "mid", "late"
/// - `defaults.parallel >= 1`
///
/// Out-of-range `timeout_secs` / `max_sources` are *not* errors; they are
/// clamped at resolution time.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    if cfg.agent.bin.trim().is_empty() {
        return Err(anyhow!("[agent].bin must not be blank"));
    }

    Regex::new(&cfg.agent.command_pattern)
        .context("invalid [agent].command_pattern regex")?;

    if Period::from_config_str(&cfg.defaults.period).is_none() {
        return Err(anyhow!(
            "invalid [defaults].period: {} (expected \"early\", \"mid\" or \"late\")",
            cfg.defaults.period
        ));
    }

    if cfg.defaults.parallel == 0 {
        return Err(anyhow!("[defaults].parallel must be >= 1 (got 0)"));
    }

    Ok(())
}
