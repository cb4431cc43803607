//! A channel on the local terminal: each stdin line is an inbound direct
//! message, sends are printed to stdout. End of input cancels the run.

use std::{
    io::Write,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    courier_channels::{
        ChannelTransport, Connection, ConnectionEvent, ConnectionEventSender, OutboundMedia,
        SendReceipt,
    },
    courier_common::types::InboundMessage,
    tokio::io::{AsyncBufReadExt, AsyncRead, BufReader},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

pub const CHANNEL: &str = "console";

/// Sender id used when the account config does not set `user`.
const DEFAULT_USER: &str = "you";

type Output = Arc<Mutex<Box<dyn Write + Send>>>;
type Input = Box<dyn AsyncRead + Send + Unpin>;

pub struct ConsoleTransport {
    input: Mutex<Option<Input>>,
    output: Output,
    events: Arc<Mutex<Option<(ConnectionEventSender, InboundTemplate)>>>,
    on_eof: CancellationToken,
    connections: AtomicU64,
}

#[derive(Clone)]
struct InboundTemplate {
    account_id: String,
    user: String,
}

impl ConsoleTransport {
    /// Read from stdin and print to stdout.
    pub fn stdio(on_eof: CancellationToken) -> Self {
        Self::new(
            Box::new(tokio::io::stdin()),
            Box::new(std::io::stdout()),
            on_eof,
        )
    }

    pub fn new(input: Input, output: Box<dyn Write + Send>, on_eof: CancellationToken) -> Self {
        Self {
            input: Mutex::new(Some(input)),
            output: Arc::new(Mutex::new(output)),
            events: Arc::new(Mutex::new(None)),
            on_eof,
            connections: AtomicU64::new(0),
        }
    }

    /// The reader outlives connections; a reconnect only swaps the sender.
    fn spawn_reader(&self, input: Input) {
        let events = Arc::clone(&self.events);
        let on_eof = self.on_eof.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(input).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "console input failed");
                        break;
                    },
                };
                let body = line.trim();
                if body.is_empty() {
                    continue;
                }
                let Some((tx, template)) = events.lock().ok().and_then(|g| g.clone()) else {
                    debug!("console line read while disconnected, dropped");
                    continue;
                };
                let msg = InboundMessage::direct(
                    CHANNEL,
                    template.account_id.as_str(),
                    template.user.as_str(),
                    template.account_id.as_str(),
                    body,
                );
                if tx.send(ConnectionEvent::Message(msg)).await.is_err() {
                    debug!("console connection gone, line dropped");
                }
            }
            debug!("console input closed");
            on_eof.cancel();
        });
    }
}

#[async_trait]
impl ChannelTransport for ConsoleTransport {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn connect(
        &self,
        account_id: &str,
        config: &serde_json::Value,
        events: ConnectionEventSender,
    ) -> courier_channels::Result<Arc<dyn Connection>> {
        let user = config
            .get("user")
            .and_then(|v| v.as_str())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_USER)
            .to_string();
        let template = InboundTemplate {
            account_id: account_id.to_string(),
            user,
        };
        *self
            .events
            .lock()
            .map_err(|_| courier_channels::Error::unavailable("console state poisoned"))? =
            Some((events, template));

        let input = self
            .input
            .lock()
            .map_err(|_| courier_channels::Error::unavailable("console state poisoned"))?
            .take();
        if let Some(input) = input {
            self.spawn_reader(input);
        }

        let n = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Arc::new(ConsoleConnection {
            id: format!("console-{n}"),
            output: Arc::clone(&self.output),
            sent: AtomicU64::new(0),
        }))
    }
}

struct ConsoleConnection {
    id: String,
    output: Output,
    sent: AtomicU64,
}

impl ConsoleConnection {
    fn print(&self, line: &str) -> courier_channels::Result<()> {
        let mut out = self
            .output
            .lock()
            .map_err(|_| courier_channels::Error::unavailable("console output poisoned"))?;
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|e| courier_channels::Error::external("console write failed", e))
    }
}

#[async_trait]
impl Connection for ConsoleConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(
        &self,
        to: &str,
        text: &str,
        media: Option<&OutboundMedia>,
    ) -> courier_channels::Result<SendReceipt> {
        if let Some(media) = media {
            let name = media
                .file_name
                .as_deref()
                .or(media.mime_type.as_deref())
                .unwrap_or("attachment");
            self.print(&format!(
                "{to} <- [{}: {name}, {} bytes]",
                media.kind.as_str(),
                media.bytes.len()
            ))?;
        }
        if !text.is_empty() {
            self.print(&format!("{to} <- {text}"))?;
        }
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SendReceipt {
            message_id: format!("{}-{n}", self.id),
        })
    }

    async fn close(&self) -> courier_channels::Result<()> {
        Ok(())
    }
}
