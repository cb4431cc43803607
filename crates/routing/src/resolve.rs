use {
    courier_common::types::{InboundMessage, PeerRef},
    courier_config::{BindingMatch, CourierConfig, DmScope, RouteBinding},
    courier_sessions::{SessionKey, derive_key},
    tracing::debug,
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, labels, routing as routing_metrics};

use crate::{Error, Result};

/// Which cascade level produced a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Peer,
    ParentPeer,
    Guild,
    Team,
    Account,
    Channel,
    Default,
}

impl MatchedBy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::ParentPeer => "parent_peer",
            Self::Guild => "guild",
            Self::Team => "team",
            Self::Account => "account",
            Self::Channel => "channel",
            Self::Default => "default",
        }
    }
}

/// Resolved route: which agent handles this message and the session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub agent_id: String,
    pub session_key: SessionKey,
    pub matched_by: MatchedBy,
}

/// The message metadata routing looks at.
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub channel: &'a str,
    pub account_id: &'a str,
    pub peer: &'a PeerRef,
    pub parent_peer: Option<&'a PeerRef>,
    pub guild_id: Option<&'a str>,
    pub team_id: Option<&'a str>,
}

impl<'a> From<&'a InboundMessage> for RouteInput<'a> {
    fn from(msg: &'a InboundMessage) -> Self {
        Self {
            channel: &msg.channel,
            account_id: &msg.account_id,
            peer: &msg.peer,
            parent_peer: msg.parent_peer.as_ref(),
            guild_id: msg.guild_id.as_deref(),
            team_id: msg.team_id.as_deref(),
        }
    }
}

/// Binding cascade over an immutable snapshot of the configuration.
///
/// Construction checks every binding against the configured agents, so
/// [`RouteResolver::resolve`] never fails: the default agent catches
/// everything no binding claims.
#[derive(Debug, Clone)]
pub struct RouteResolver {
    bindings: Vec<RouteBinding>,
    default_agent: String,
    dm_scope: DmScope,
}

impl RouteResolver {
    pub fn new(config: &CourierConfig) -> Result<Self> {
        let listed: Vec<&str> = config.agents.list.iter().map(|a| a.id.as_str()).collect();
        for (index, binding) in config.bindings.iter().enumerate() {
            if binding.agent_id.trim().is_empty() {
                return Err(Error::EmptyAgentId { index });
            }
            if !listed.is_empty() && !listed.contains(&binding.agent_id.as_str()) {
                return Err(Error::UnknownAgent {
                    index,
                    agent_id: binding.agent_id.clone(),
                });
            }
        }
        Ok(Self {
            bindings: config.bindings.clone(),
            default_agent: config.default_agent_id().to_string(),
            dm_scope: config.session.dm_scope,
        })
    }

    #[must_use]
    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Walk the cascade and derive the session key for the winning agent.
    #[must_use]
    pub fn resolve(&self, input: RouteInput<'_>) -> ResolvedRoute {
        let (agent_id, matched_by) = self.resolve_agent(&input);
        let session_key = derive_key(
            self.dm_scope,
            agent_id,
            input.channel,
            input.account_id,
            input.peer,
        );
        debug!(
            channel = input.channel,
            account_id = input.account_id,
            peer = %input.peer.id,
            agent_id,
            matched_by = matched_by.as_str(),
            session_key = %session_key,
            "route resolved"
        );

        #[cfg(feature = "metrics")]
        counter!(
            routing_metrics::RESOLVED_TOTAL,
            labels::CHANNEL => input.channel.to_string(),
            labels::BINDING_LEVEL => matched_by.as_str()
        )
        .increment(1);

        ResolvedRoute {
            agent_id: agent_id.to_string(),
            session_key,
            matched_by,
        }
    }

    fn resolve_agent(&self, input: &RouteInput<'_>) -> (&str, MatchedBy) {
        let scoped: Vec<&RouteBinding> = self
            .bindings
            .iter()
            .filter(|b| scope_matches(&b.matcher, input))
            .collect();
        let candidates = || scoped.iter().copied();

        if let Some(b) = candidates().find(|b| peer_matches(b.matcher.peer.as_ref(), Some(input.peer))) {
            return (b.agent_id.as_str(), MatchedBy::Peer);
        }
        if input.parent_peer.is_some()
            && let Some(b) = candidates().find(|b| peer_matches(b.matcher.peer.as_ref(), input.parent_peer))
        {
            return (b.agent_id.as_str(), MatchedBy::ParentPeer);
        }
        if let Some(b) = candidates().find(|b| {
            b.matcher.peer.is_none() && id_matches(b.matcher.guild_id.as_deref(), input.guild_id)
        }) {
            return (b.agent_id.as_str(), MatchedBy::Guild);
        }
        if let Some(b) = candidates().find(|b| {
            b.matcher.peer.is_none()
                && b.matcher.guild_id.is_none()
                && id_matches(b.matcher.team_id.as_deref(), input.team_id)
        }) {
            return (b.agent_id.as_str(), MatchedBy::Team);
        }
        if let Some(b) = candidates().find(|b| {
            is_plain(&b.matcher) && b.matcher.channel.is_some() && specific_account(&b.matcher).is_some()
        }) {
            return (b.agent_id.as_str(), MatchedBy::Account);
        }
        if let Some(b) = candidates().find(|b| {
            is_plain(&b.matcher) && b.matcher.channel.is_some() && specific_account(&b.matcher).is_none()
        }) {
            return (b.agent_id.as_str(), MatchedBy::Channel);
        }
        (self.default_agent.as_str(), MatchedBy::Default)
    }
}

/// One-shot resolution for callers that do not keep a resolver around.
pub fn resolve_agent_route(msg: &InboundMessage, config: &CourierConfig) -> Result<ResolvedRoute> {
    Ok(RouteResolver::new(config)?.resolve(msg.into()))
}

fn eq_ci(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn specific_account(m: &BindingMatch) -> Option<&str> {
    m.account_id.as_deref().filter(|a| a.trim() != "*")
}

/// Channel and account restrictions apply at every level.
fn scope_matches(m: &BindingMatch, input: &RouteInput<'_>) -> bool {
    if let Some(channel) = m.channel.as_deref()
        && !eq_ci(channel, input.channel)
    {
        return false;
    }
    match specific_account(m) {
        Some(account) => eq_ci(account, input.account_id),
        None => true,
    }
}

fn peer_matches(binding: Option<&PeerRef>, peer: Option<&PeerRef>) -> bool {
    match (binding, peer) {
        (Some(b), Some(p)) => b.kind == p.kind && !b.id.trim().is_empty() && eq_ci(&b.id, &p.id),
        _ => false,
    }
}

fn id_matches(binding: Option<&str>, actual: Option<&str>) -> bool {
    match (binding, actual) {
        (Some(b), Some(a)) => !b.trim().is_empty() && eq_ci(b, a),
        _ => false,
    }
}

fn is_plain(m: &BindingMatch) -> bool {
    m.peer.is_none() && m.guild_id.is_none() && m.team_id.is_none()
}
