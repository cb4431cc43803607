//! Configuration loading, validation and env substitution.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then the user config dir (`~/.config/courier/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, data_dir, discover_and_load, find_config_file, load_config},
    schema::{
        AgentEntry, AgentsConfig, BindingMatch, ChannelsConfig, ConnectionConfig, CourierConfig,
        DEFAULT_AGENT_ID, DmScope, HeartbeatConfig, InboundConfig, MetricsConfig, OutboundConfig,
        ReconnectConfig, RouteBinding, SessionConfig, parse_interval_ms,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
