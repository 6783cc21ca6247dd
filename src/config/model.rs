// src/config/model.rs

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [agent]
/// bin = "codex"
/// command_pattern = "(?i)command|exec|shell|terminal|bash"
///
/// [defaults]
/// timeout_secs = 600
/// parallel = 2
/// max_sources = 8
/// period = "early"
/// reject_command_events = true
/// ```
///
/// All sections are optional and have reasonable defaults; CLI flags override
/// whatever the file provides.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    /// External agent settings from `[agent]`.
    #[serde(default)]
    pub agent: AgentSection,

    /// Batch defaults from `[defaults]`.
    #[serde(default)]
    pub defaults: DefaultsSection,
}

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// The agent binary to invoke.
    #[serde(default = "default_agent_bin")]
    pub bin: String,

    /// Regex matched against completed item types to flag command-like
    /// telemetry. This is policy, not correctness: it may over- and
    /// under-match, and matched events are always surfaced in telemetry.
    #[serde(default = "default_command_pattern")]
    pub command_pattern: String,
}

fn default_agent_bin() -> String {
    "codex".to_string()
}

fn default_command_pattern() -> String {
    "(?i)command|exec|shell|terminal|bash".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            bin: default_agent_bin(),
            command_pattern: default_command_pattern(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsSection {
    /// Per-run timeout in seconds; clamped to [`TIMEOUT_FLOOR_SECS`,
    /// `TIMEOUT_CEILING_SECS`] at resolution time.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Requested worker count; clamped to the question count and the fixed
    /// ceiling when a batch starts.
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Maximum sources kept per answer (1-20).
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// `"early"`, `"mid"` or `"late"` within the reference year.
    #[serde(default = "default_period")]
    pub period: String,

    /// Reference year; `None` means the current year.
    #[serde(default)]
    pub year: Option<i32>,

    /// Default model override; `None` or blank means the agent's default.
    #[serde(default)]
    pub model: Option<String>,

    /// Fail runs whose telemetry contains command-like events.
    #[serde(default = "default_reject_command_events")]
    pub reject_command_events: bool,
}

/// Lower bound for the per-run timeout.
pub const TIMEOUT_FLOOR_SECS: u64 = 60;
/// Upper bound for the per-run timeout.
pub const TIMEOUT_CEILING_SECS: u64 = 3600;
/// Hard cap on sources kept per answer.
pub const SOURCES_HARD_CAP: usize = 20;

fn default_timeout_secs() -> u64 {
    600
}

fn default_parallel() -> usize {
    2
}

fn default_max_sources() -> usize {
    8
}

fn default_period() -> String {
    "early".to_string()
}

fn default_reject_command_events() -> bool {
    true
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            parallel: default_parallel(),
            max_sources: default_max_sources(),
            period: default_period(),
            year: None,
            model: None,
            reject_command_events: default_reject_command_events(),
        }
    }
}

impl DefaultsSection {
    /// Effective timeout, clamped into the allowed window.
    pub fn effective_timeout_secs(&self, override_secs: Option<u64>) -> u64 {
        override_secs
            .unwrap_or(self.timeout_secs)
            .clamp(TIMEOUT_FLOOR_SECS, TIMEOUT_CEILING_SECS)
    }

    /// Effective source cap, bounded to `1..=20`.
    pub fn effective_max_sources(&self, override_count: Option<usize>) -> usize {
        override_count
            .unwrap_or(self.max_sources)
            .clamp(1, SOURCES_HARD_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(cfg.agent.bin, "codex");
        assert_eq!(cfg.defaults.timeout_secs, 600);
        assert_eq!(cfg.defaults.parallel, 2);
        assert!(cfg.defaults.reject_command_events);
    }

    #[test]
    fn timeout_is_clamped_both_ways() {
        let d = DefaultsSection::default();
        assert_eq!(d.effective_timeout_secs(Some(1)), TIMEOUT_FLOOR_SECS);
        assert_eq!(d.effective_timeout_secs(Some(86_400)), TIMEOUT_CEILING_SECS);
        assert_eq!(d.effective_timeout_secs(Some(120)), 120);
        assert_eq!(d.effective_timeout_secs(None), 600);
    }

    #[test]
    fn max_sources_is_bounded() {
        let d = DefaultsSection::default();
        assert_eq!(d.effective_max_sources(Some(0)), 1);
        assert_eq!(d.effective_max_sources(Some(99)), SOURCES_HARD_CAP);
        assert_eq!(d.effective_max_sources(None), 8);
    }
}
