//! Semantic validation of a loaded configuration.
//!
//! Parsing already guarantees the shape; this catches values that parse but
//! cannot work (bindings to unknown agents, impossible backoff settings,
//! unknown timezones).

use std::collections::HashSet;

use crate::schema::{CourierConfig, parse_interval_ms};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "bindings[2].agent_id"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Check a configuration for values that parse but cannot work.
#[must_use]
pub fn validate(config: &CourierConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let mut seen = HashSet::new();
    for (i, agent) in config.agents.list.iter().enumerate() {
        if agent.id.trim().is_empty() {
            result.push(
                Severity::Error,
                format!("agents.list[{i}].id"),
                "agent id is empty",
            );
        } else if !seen.insert(agent.id.as_str()) {
            result.push(
                Severity::Error,
                format!("agents.list[{i}].id"),
                format!("duplicate agent id '{}'", agent.id),
            );
        }
    }

    let listed = !config.agents.list.is_empty();
    if listed
        && let Some(default) = config.agents.default.as_deref()
        && !seen.contains(default)
    {
        result.push(
            Severity::Error,
            "agents.default",
            format!("default agent '{default}' is not in agents.list"),
        );
    }

    for (i, binding) in config.bindings.iter().enumerate() {
        if listed && !seen.contains(binding.agent_id.as_str()) {
            result.push(
                Severity::Error,
                format!("bindings[{i}].agent_id"),
                format!("unknown agent '{}'", binding.agent_id),
            );
        }
        let m = &binding.matcher;
        if m.channel.is_none()
            && m.account_id.is_none()
            && m.peer.is_none()
            && m.guild_id.is_none()
            && m.team_id.is_none()
        {
            result.push(
                Severity::Warning,
                format!("bindings[{i}].match"),
                "empty match never applies; use agents.default instead",
            );
        }
        if m.account_id.is_some() && m.channel.is_none() {
            result.push(
                Severity::Warning,
                format!("bindings[{i}].match.account_id"),
                "account_id without channel matches that account id on every channel",
            );
        }
    }

    let reconnect = &config.connection.reconnect;
    if reconnect.factor < 1.0 {
        result.push(
            Severity::Error,
            "connection.reconnect.factor",
            "backoff factor must be >= 1",
        );
    }
    if !(0.0..=1.0).contains(&reconnect.jitter) {
        result.push(
            Severity::Error,
            "connection.reconnect.jitter",
            "jitter must be between 0 and 1",
        );
    }
    if reconnect.initial_ms > reconnect.max_ms {
        result.push(
            Severity::Warning,
            "connection.reconnect.initial_ms",
            "initial delay exceeds max delay; every retry waits max_ms",
        );
    }
    if config.connection.heartbeat_seconds == 0 {
        result.push(
            Severity::Error,
            "connection.heartbeat_seconds",
            "heartbeat interval must be positive",
        );
    }
    if config.connection.watchdog_check_seconds == 0 {
        result.push(
            Severity::Error,
            "connection.watchdog_check_seconds",
            "watchdog check interval must be positive",
        );
    }

    if config.outbound.text_chunk_limit == 0 {
        result.push(
            Severity::Error,
            "outbound.text_chunk_limit",
            "chunk limit must be positive",
        );
    }

    if config.heartbeat.enabled && parse_interval_ms(&config.heartbeat.every).is_none() {
        result.push(
            Severity::Error,
            "heartbeat.every",
            format!("cannot parse interval '{}'", config.heartbeat.every),
        );
    }

    let tz = config.inbound.timezone.trim();
    if !tz.is_empty()
        && !tz.eq_ignore_ascii_case("local")
        && !tz.eq_ignore_ascii_case("utc")
        && tz.parse::<chrono_tz::Tz>().is_err()
    {
        result.push(
            Severity::Error,
            "inbound.timezone",
            format!("unknown timezone '{tz}'"),
        );
    }

    result
}
