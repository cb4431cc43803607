use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    courier_common::types::PeerRef,
    serde::{Deserialize, Serialize},
};

/// Agent id used when nothing else is configured.
pub const DEFAULT_AGENT_ID: &str = "main";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub agents: AgentsConfig,
    pub bindings: Vec<RouteBinding>,
    pub session: SessionConfig,
    pub inbound: InboundConfig,
    pub connection: ConnectionConfig,
    pub heartbeat: HeartbeatConfig,
    pub outbound: OutboundConfig,
    pub channels: ChannelsConfig,
    pub metrics: MetricsConfig,
}

impl CourierConfig {
    /// The agent that handles messages no binding claims: `agents.default`,
    /// else the first listed agent, else [`DEFAULT_AGENT_ID`].
    #[must_use]
    pub fn default_agent_id(&self) -> &str {
        if let Some(id) = self.agents.default.as_deref().map(str::trim)
            && !id.is_empty()
        {
            return id;
        }
        self.agents
            .list
            .first()
            .map(|a| a.id.as_str())
            .unwrap_or(DEFAULT_AGENT_ID)
    }

    /// Every agent id that may own a session store.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.list.iter().map(|a| a.id.clone()).collect();
        for id in std::iter::once(self.default_agent_id().to_string())
            .chain(self.bindings.iter().map(|b| b.agent_id.clone()))
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Workspace directory for an agent: its configured `workspace`, else
    /// `<state_dir>/agents/<id>`.
    #[must_use]
    pub fn agent_workspace(&self, agent_id: &str) -> PathBuf {
        if let Some(ws) = self
            .agents
            .list
            .iter()
            .find(|a| a.id == agent_id)
            .and_then(|a| a.workspace.clone())
        {
            return ws;
        }
        self.session.state_dir().join("agents").join(agent_id)
    }
}

/// Agent definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Explicit default agent id. Falls back to the first entry in `list`.
    pub default: Option<String>,
    pub list: Vec<AgentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    /// Directory holding this agent's session store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

/// A routing rule: messages matching `match` go to `agent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteBinding {
    pub agent_id: String,
    #[serde(default, rename = "match")]
    pub matcher: BindingMatch,
}

/// Match predicate of a [`RouteBinding`]. Unset fields do not constrain.
///
/// `account_id = "*"` matches every account of the channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

/// How direct-message conversations map onto session keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DmScope {
    /// One shared session per agent and channel.
    #[default]
    Main,
    /// One session per peer, shared across channels.
    PerPeer,
    /// One session per channel and peer.
    PerChannelPeer,
    /// One session per account, channel and peer.
    PerAccountChannelPeer,
}

impl DmScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::PerPeer => "per-peer",
            Self::PerChannelPeer => "per-channel-peer",
            Self::PerAccountChannelPeer => "per-account-channel-peer",
        }
    }
}

/// Session identity and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dm_scope: DmScope,
    /// Minutes of inactivity after which a session starts fresh.
    pub idle_minutes: u64,
    /// Root for agent workspaces without an explicit path. Defaults to the
    /// platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dm_scope: DmScope::default(),
            idle_minutes: 60,
            state_dir: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .or_else(crate::loader::data_dir)
            .unwrap_or_else(|| PathBuf::from(".courier"))
    }
}

/// Inbound batching and envelope formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Delay before retrying a flush while the dispatch queue is busy.
    pub batch_retry_ms: u64,
    /// "local", "utc", or an IANA zone name such as "Europe/Paris".
    pub timezone: String,
    /// chrono format string for the per-line timestamp prefix.
    pub timestamp_format: String,
    /// Capacity of the echo guard.
    pub echo_capacity: usize,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            batch_retry_ms: 150,
            timezone: "local".into(),
            timestamp_format: "%Y-%m-%d %H:%M".into(),
            echo_capacity: 100,
        }
    }
}

/// Connection liveness and reconnect tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Interval of the connection heartbeat log. A connection that stays up
    /// this long resets the reconnect attempt counter.
    pub heartbeat_seconds: u64,
    /// How often the watchdog checks inbound activity.
    pub watchdog_check_seconds: u64,
    /// Force a reconnect after this long without an inbound message.
    pub watchdog_timeout_minutes: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: 60,
            watchdog_check_seconds: 60,
            watchdog_timeout_minutes: 30,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    /// Fraction of the delay applied as random jitter; 0 disables jitter.
    pub jitter: f64,
    /// 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 2_000,
            max_ms: 30_000,
            factor: 1.8,
            jitter: 0.25,
            max_attempts: 12,
        }
    }
}

/// Reply heartbeat: a periodic synthetic prompt run through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Interval such as "30m", "1h", "90s".
    pub every: String,
    /// Custom prompt. Falls back to the agent's `HEARTBEAT.md`, then the
    /// built-in prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Recipient used when no session has been active on the connector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every: "30m".into(),
            prompt: None,
            to: None,
        }
    }
}

impl HeartbeatConfig {
    /// Parsed `every`; `None` when disabled or unparseable.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        parse_interval_ms(&self.every)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Parse a human-friendly interval string like "30m", "1h", "90s" into milliseconds.
/// A bare number is milliseconds. Returns `None` for unparseable input.
pub fn parse_interval_ms(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000u64)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000u64)
    } else {
        (s, 1u64)
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

/// Outbound delivery limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Maximum characters per text message.
    pub text_chunk_limit: usize,
    /// Maximum size of one media item in megabytes.
    pub media_max_mb: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            text_chunk_limit: 4_000,
            media_max_mb: 5,
        }
    }
}

impl OutboundConfig {
    #[must_use]
    pub fn media_max_bytes(&self) -> u64 {
        self.media_max_mb.saturating_mul(1024 * 1024)
    }
}

/// Channel accounts: channel name → account id → opaque transport config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelsConfig(pub HashMap<String, HashMap<String, serde_json::Value>>);

impl ChannelsConfig {
    /// `(channel, account_id, config)` triples, sorted for stable start order.
    #[must_use]
    pub fn accounts(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        let mut out: Vec<_> = self
            .0
            .iter()
            .flat_map(|(channel, accounts)| {
                accounts
                    .iter()
                    .map(move |(account, cfg)| (channel.as_str(), account.as_str(), cfg))
            })
            .collect();
        out.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}
