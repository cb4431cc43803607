use {
    courier_common::types::{PeerKind, PeerRef},
    courier_config::DmScope,
    serde::{Deserialize, Serialize},
};

/// Deterministic conversation identity.
///
/// Direct messages:
/// - `main`: `agent:<agent>:<channel>:main`
/// - `per-peer`: `agent:<agent>:dm:<peer>`
/// - `per-channel-peer`: `agent:<agent>:<channel>:dm:<peer>`
/// - `per-account-channel-peer`: `agent:<agent>:<channel>:<account>:dm:<peer>`
///
/// Groups and channels always get their own session regardless of scope:
/// `agent:<agent>:<channel>:<kind>:<peer>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Agent id embedded in the key.
    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        self.0.strip_prefix("agent:")?.split(':').next()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn normalize(value: &str, fallback: &str) -> String {
    let v = value.trim().to_lowercase();
    if v.is_empty() { fallback.to_string() } else { v }
}

/// Derive the session key for a resolved message. Pure and total: blank
/// components collapse to fixed placeholders and a blank DM peer collapses
/// to the `main` form.
#[must_use]
pub fn derive_key(
    scope: DmScope,
    agent_id: &str,
    channel: &str,
    account_id: &str,
    peer: &PeerRef,
) -> SessionKey {
    let agent = normalize(agent_id, courier_config::DEFAULT_AGENT_ID);
    let channel = normalize(channel, "unknown");
    let account = normalize(account_id, "default");
    let peer_id = peer.id.trim().to_lowercase();

    if peer.kind != PeerKind::Dm && !peer_id.is_empty() {
        return SessionKey(format!(
            "agent:{agent}:{channel}:{}:{peer_id}",
            peer.kind.as_str()
        ));
    }

    if peer_id.is_empty() {
        return SessionKey(format!("agent:{agent}:{channel}:main"));
    }

    SessionKey(match scope {
        DmScope::Main => format!("agent:{agent}:{channel}:main"),
        DmScope::PerPeer => format!("agent:{agent}:dm:{peer_id}"),
        DmScope::PerChannelPeer => format!("agent:{agent}:{channel}:dm:{peer_id}"),
        DmScope::PerAccountChannelPeer => {
            format!("agent:{agent}:{channel}:{account}:dm:{peer_id}")
        },
    })
}
