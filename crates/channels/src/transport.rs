use std::sync::Arc;

use {
    async_trait::async_trait,
    courier_common::types::{InboundMessage, MediaKind},
    tokio::sync::{mpsc, watch},
};

use crate::Result;

// ── Connection events ───────────────────────────────────────────────────────

/// Why a connection closed, as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReason {
    /// Channel-native status code, if the transport has one.
    pub status: Option<u16>,
    /// The server invalidated our session; reconnecting cannot help.
    pub logged_out: bool,
    pub error: Option<String>,
}

impl CloseReason {
    pub fn transient(status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status,
            logged_out: false,
            error: Some(error.into()),
        }
    }

    pub fn logged_out(status: Option<u16>) -> Self {
        Self {
            status,
            logged_out: true,
            error: None,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, self.error.as_deref()) {
            (Some(status), Some(error)) => write!(f, "status {status}: {error}"),
            (Some(status), None) => write!(f, "status {status}"),
            (None, Some(error)) => f.write_str(error),
            (None, None) => f.write_str("closed"),
        }
    }
}

/// Everything a live connection reports back, in order, on one queue.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Message(InboundMessage),
    Closed(CloseReason),
}

pub type ConnectionEventSender = mpsc::Sender<ConnectionEvent>;
pub type ConnectionEventReceiver = mpsc::Receiver<ConnectionEvent>;

// ── Outbound ────────────────────────────────────────────────────────────────

/// Media loaded into memory, ready for a transport.
#[derive(Debug, Clone)]
pub struct OutboundMedia {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

/// Acknowledgement for one send call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}

// ── Transport traits ────────────────────────────────────────────────────────

/// One open connection to a channel account.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier used in logs; unique per connect call.
    fn id(&self) -> &str;

    /// Send text, or media with `text` as its caption (empty for none).
    async fn send(&self, to: &str, text: &str, media: Option<&OutboundMedia>) -> Result<SendReceipt>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _to: &str) -> Result<()> {
        Ok(())
    }

    /// Close the connection. The transport must not emit further events
    /// after this returns.
    async fn close(&self) -> Result<()>;
}

/// A messaging network. Implementations own the wire protocol; the
/// connector only sees [`Connection`] and [`ConnectionEvent`]s.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Channel name, e.g. "telegram".
    fn channel(&self) -> &str;

    /// Open a connection for `account_id`. Inbound messages and the final
    /// close are pushed to `events`. A credential failure must surface as
    /// [`crate::Error::LoggedOut`] so it is not retried.
    async fn connect(
        &self,
        account_id: &str,
        config: &serde_json::Value,
        events: ConnectionEventSender,
    ) -> Result<Arc<dyn Connection>>;
}

/// The connector's current connection, if any. The lifecycle manager sets
/// and clears it; reply workers wait on it before delivering.
#[derive(Clone)]
pub struct ConnectionSlot {
    tx: Arc<watch::Sender<Option<Arc<dyn Connection>>>>,
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSlot {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, connection: Arc<dyn Connection>) {
        self.tx.send_replace(Some(connection));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn Connection>> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resolve once a connection is available.
    pub async fn wait(&self) -> Option<Arc<dyn Connection>> {
        let mut rx = self.tx.subscribe();
        let result = rx.wait_for(Option::is_some).await.ok()?.clone();
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Dummy;

    #[async_trait]
    impl Connection for Dummy {
        fn id(&self) -> &str {
            "dummy"
        }

        async fn send(&self, _to: &str, _text: &str, _media: Option<&OutboundMedia>) -> Result<SendReceipt> {
            Ok(SendReceipt::default())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn slot_wait_resolves_on_set() {
        let slot = ConnectionSlot::new();
        assert!(!slot.is_connected());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait().await.map(|c| c.id().to_string()) })
        };
        tokio::task::yield_now().await;
        slot.set(Arc::new(Dummy));
        assert_eq!(waiter.await.unwrap().as_deref(), Some("dummy"));
        slot.clear();
        assert!(slot.current().is_none());
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(
            CloseReason::transient(Some(428), "connection lost").to_string(),
            "status 428: connection lost"
        );
        assert_eq!(CloseReason::logged_out(Some(401)).to_string(), "status 401");
        assert!(CloseReason::logged_out(None).logged_out);
        assert_eq!(CloseReason::default().to_string(), "closed");
    }
}
