use {async_trait::async_trait, serde::Serialize, tracing::info};

/// Connector lifecycle events for status display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorEvent {
    Connected {
        channel: String,
        account_id: String,
        connection_id: String,
    },
    /// A transient close; a reconnect is scheduled after `delay_ms`.
    Disconnected {
        channel: String,
        account_id: String,
        reason: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// Credentials were invalidated server-side. The connector has stopped.
    LoggedOut { channel: String, account_id: String },
    /// Reconnect attempts exhausted. The connector has stopped.
    GaveUp {
        channel: String,
        account_id: String,
        attempts: u32,
    },
    /// Cancelled by the owner.
    Stopped { channel: String, account_id: String },
}

impl ConnectorEvent {
    /// Plain status line for users; carries no error internals.
    #[must_use]
    pub fn status_line(&self) -> String {
        match self {
            Self::Connected {
                channel,
                account_id,
                ..
            } => format!("{channel}/{account_id}: connected"),
            Self::Disconnected {
                channel,
                account_id,
                attempt,
                delay_ms,
                ..
            } => format!(
                "{channel}/{account_id}: connection lost, retry {attempt} in {:.1}s",
                *delay_ms as f64 / 1000.0
            ),
            Self::LoggedOut {
                channel,
                account_id,
            } => format!(
                "{channel}/{account_id}: logged out; re-authenticate this account and restart"
            ),
            Self::GaveUp {
                channel,
                account_id,
                attempts,
            } => format!("{channel}/{account_id}: giving up after {attempts} reconnect attempts"),
            Self::Stopped {
                channel,
                account_id,
            } => format!("{channel}/{account_id}: stopped"),
        }
    }
}

/// Sink for connector events. The embedding application provides the
/// concrete implementation.
#[async_trait]
pub trait ConnectorEventSink: Send + Sync {
    async fn emit(&self, event: ConnectorEvent);
}

/// Sink that writes status lines to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

#[async_trait]
impl ConnectorEventSink for LogEventSink {
    async fn emit(&self, event: ConnectorEvent) {
        info!(event = ?event, "{}", event.status_line());
    }
}
