use {
    courier_common::types::now_ms,
    serde::{Deserialize, Serialize},
};

/// Persisted state for one session key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// Opaque conversation handle passed to the agent.
    pub session_id: String,
    pub updated_at: u64,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_account_id: Option<String>,
    /// Recipient of the last exchange, used as the reply-heartbeat target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
    /// Fields written by other tools are preserved across rewrites.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionEntry {
    /// A brand-new entry with a fresh session id.
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            updated_at: now,
            created_at: now,
            last_channel: None,
            last_account_id: None,
            last_to: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn is_fresh(&self, idle_minutes: u64, now: u64) -> bool {
        is_fresh(self.updated_at, idle_minutes, now)
    }

    /// Continue `previous` if it is still fresh, otherwise start a new
    /// session. Either way the result is stamped with `now`.
    #[must_use]
    pub fn continue_or_start(previous: Option<Self>, idle_minutes: u64, now: u64) -> Self {
        match previous {
            Some(mut entry) if entry.is_fresh(idle_minutes, now) => {
                entry.updated_at = now;
                entry
            },
            Some(stale) => {
                let mut entry = Self::new(now);
                entry.last_channel = stale.last_channel;
                entry.last_account_id = stale.last_account_id;
                entry.last_to = stale.last_to;
                entry.extra = stale.extra;
                entry
            },
            None => Self::new(now),
        }
    }

    /// Record where the last exchange happened.
    pub fn record_route(&mut self, channel: &str, account_id: &str, to: &str) {
        self.last_channel = Some(channel.to_string());
        self.last_account_id = Some(account_id.to_string());
        self.last_to = Some(to.to_string());
    }
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self::new(now_ms())
    }
}

/// Read-time idle check: `now - updated_at <= idle_minutes` minutes.
#[must_use]
pub fn is_fresh(updated_at: u64, idle_minutes: u64, now: u64) -> bool {
    now.saturating_sub(updated_at) <= idle_minutes.saturating_mul(60_000)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000_000;

    #[test]
    fn idle_boundaries() {
        let idle = 60;
        assert!(is_fresh(NOW, idle, NOW));
        assert!(is_fresh(NOW - idle * 60_000, idle, NOW));
        assert!(!is_fresh(NOW - (idle + 1) * 60_000, idle, NOW));
    }

    #[test]
    fn future_timestamps_are_fresh() {
        assert!(is_fresh(NOW + 5_000, 1, NOW));
    }

    #[test]
    fn continue_keeps_session_id_when_fresh() {
        let prev = SessionEntry::new(NOW - 1_000);
        let next = SessionEntry::continue_or_start(Some(prev.clone()), 60, NOW);
        assert_eq!(next.session_id, prev.session_id);
        assert_eq!(next.created_at, prev.created_at);
        assert_eq!(next.updated_at, NOW);
    }

    #[test]
    fn stale_entry_starts_new_session() {
        let mut prev = SessionEntry::new(NOW - 61 * 60_000);
        prev.record_route("telegram", "default", "+1555");
        let next = SessionEntry::continue_or_start(Some(prev.clone()), 60, NOW);
        assert_ne!(next.session_id, prev.session_id);
        assert_eq!(next.created_at, NOW);
        assert_eq!(next.last_to.as_deref(), Some("+1555"));
    }

    #[test]
    fn json_shape_and_unknown_fields() {
        let raw = r#"{"sessionId":"s1","updatedAt":5,"lastChannel":"tg","model":"x"}"#;
        let entry: SessionEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.session_id, "s1");
        assert_eq!(entry.created_at, 0);
        assert_eq!(entry.last_channel.as_deref(), Some("tg"));
        assert_eq!(entry.extra.get("model"), Some(&serde_json::json!("x")));

        let out = serde_json::to_value(&entry).unwrap();
        assert_eq!(out["updatedAt"], 5);
        assert_eq!(out["model"], "x");
        assert!(out.get("lastTo").is_none());
    }
}
