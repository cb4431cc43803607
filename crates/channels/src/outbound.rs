//! Reply delivery: chunking, media with captions, and text fallback.

use std::sync::Arc;

use {
    courier_common::types::ReplyPayload,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, labels, outbound as outbound_metrics};

use crate::{
    echo::{SharedEchoGuard, with_guard},
    media::MediaSource,
    transport::{Connection, OutboundMedia},
};

/// Split text into chunks of at most `limit` characters. Splits only on the
/// character boundary, so joining the chunks gives back the input exactly.
/// A zero limit means no splitting.
#[must_use]
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if limit == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// What happened during one payload delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub text_sent: usize,
    pub text_failed: usize,
    pub media_sent: usize,
    pub media_failed: usize,
    /// The caption went out as plain text because its media item failed.
    pub text_fallback: bool,
    pub message_ids: Vec<String>,
}

impl DeliveryReport {
    #[must_use]
    pub fn anything_sent(&self) -> bool {
        self.text_sent > 0 || self.media_sent > 0
    }
}

/// Sends reply payloads over one live connection.
pub struct OutboundDelivery {
    connection: Arc<dyn Connection>,
    media: Arc<dyn MediaSource>,
    echo: SharedEchoGuard,
    chunk_limit: usize,
    channel: String,
    account_id: String,
}

impl OutboundDelivery {
    pub fn new(
        connection: Arc<dyn Connection>,
        media: Arc<dyn MediaSource>,
        echo: SharedEchoGuard,
        chunk_limit: usize,
    ) -> Self {
        Self {
            connection,
            media,
            echo,
            chunk_limit,
            channel: String::new(),
            account_id: String::new(),
        }
    }

    /// Label logs and metrics with the owning connector.
    #[must_use]
    pub fn with_labels(mut self, channel: &str, account_id: &str) -> Self {
        self.channel = channel.to_string();
        self.account_id = account_id.to_string();
        self
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Deliver one payload to `to`. Failures are logged and counted, never
    /// returned: a failed media item or chunk does not stop the rest.
    ///
    /// Every successfully sent text is remembered in the echo guard, plus
    /// `echo_text` (the combined inbound batch) when anything went out.
    pub async fn deliver(&self, to: &str, payload: &ReplyPayload, echo_text: Option<&str>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let text = payload.text.as_deref().unwrap_or("");
        let chunks = chunk_text(text, self.chunk_limit);
        let media = payload.media();

        info!(
            channel = %self.channel,
            account_id = %self.account_id,
            to,
            chunks = chunks.len(),
            media = media.len(),
            "outbound delivery start"
        );

        let mut chunks = chunks.into_iter();
        if !media.is_empty() {
            let mut caption = chunks.next();
            for (index, source) in media.iter().enumerate() {
                let item_caption = if index == 0 {
                    caption.take()
                } else {
                    None
                };
                match self.send_media(to, source, item_caption.as_deref()).await {
                    Ok(message_id) => {
                        report.media_sent += 1;
                        report.message_ids.push(message_id);
                        if let Some(c) = item_caption.as_deref() {
                            self.remember(c);
                        }
                    },
                    Err(e) => {
                        report.media_failed += 1;
                        warn!(
                            channel = %self.channel,
                            account_id = %self.account_id,
                            to,
                            media = %source,
                            error = %e,
                            "media send failed"
                        );
                        #[cfg(feature = "metrics")]
                        counter!(outbound_metrics::FAILED_TOTAL, labels::CHANNEL => self.channel.clone(), labels::KIND => "media").increment(1);

                        if let Some(c) = item_caption {
                            report.text_fallback = true;
                            #[cfg(feature = "metrics")]
                            counter!(outbound_metrics::TEXT_FALLBACKS_TOTAL, labels::CHANNEL => self.channel.clone()).increment(1);
                            self.send_text(to, &c, &mut report).await;
                        }
                    },
                }
            }
        }
        for chunk in chunks {
            self.send_text(to, &chunk, &mut report).await;
        }

        if report.anything_sent()
            && let Some(extra) = echo_text
        {
            self.remember(extra);
        }

        debug!(
            channel = %self.channel,
            account_id = %self.account_id,
            to,
            text_sent = report.text_sent,
            text_failed = report.text_failed,
            media_sent = report.media_sent,
            media_failed = report.media_failed,
            text_fallback = report.text_fallback,
            "outbound delivery done"
        );
        report
    }

    async fn send_text(&self, to: &str, chunk: &str, report: &mut DeliveryReport) {
        match self.connection.send(to, chunk, None).await {
            Ok(receipt) => {
                report.text_sent += 1;
                report.message_ids.push(receipt.message_id);
                self.remember(chunk);
                #[cfg(feature = "metrics")]
                counter!(outbound_metrics::SENT_TOTAL, labels::CHANNEL => self.channel.clone(), labels::KIND => "text").increment(1);
            },
            Err(e) => {
                report.text_failed += 1;
                warn!(
                    channel = %self.channel,
                    account_id = %self.account_id,
                    to,
                    error = %e,
                    "text send failed"
                );
                #[cfg(feature = "metrics")]
                counter!(outbound_metrics::FAILED_TOTAL, labels::CHANNEL => self.channel.clone(), labels::KIND => "text").increment(1);
            },
        }
    }

    async fn send_media(&self, to: &str, source: &str, caption: Option<&str>) -> crate::Result<String> {
        let media: OutboundMedia = self.media.load(source).await?;
        let receipt = self
            .connection
            .send(to, caption.unwrap_or(""), Some(&media))
            .await?;
        #[cfg(feature = "metrics")]
        counter!(outbound_metrics::SENT_TOTAL, labels::CHANNEL => self.channel.clone(), labels::KIND => media.kind.as_str()).increment(1);
        Ok(receipt.message_id)
    }

    fn remember(&self, text: &str) {
        with_guard(&self.echo, |g| g.remember(text));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{
            Error, Result,
            echo::EchoGuard,
            transport::SendReceipt,
        },
        async_trait::async_trait,
        courier_common::types::MediaKind,
        rstest::rstest,
        std::sync::Mutex,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Text(String),
        Media { caption: String, kind: MediaKind },
    }

    #[derive(Default)]
    struct MockConnection {
        sent: Mutex<Vec<Sent>>,
        fail_media: Vec<String>,
        fail_text: bool,
    }

    #[async_trait]
    impl Connection for MockConnection {
        fn id(&self) -> &str {
            "mock"
        }

        async fn send(&self, _to: &str, text: &str, media: Option<&OutboundMedia>) -> Result<SendReceipt> {
            let mut sent = self.sent.lock().unwrap();
            match media {
                Some(m) => {
                    let name = m.file_name.clone().unwrap_or_default();
                    if self.fail_media.contains(&name) {
                        return Err(Error::unavailable(format!("cannot send {name}")));
                    }
                    sent.push(Sent::Media {
                        caption: text.to_string(),
                        kind: m.kind,
                    });
                },
                None => {
                    if self.fail_text {
                        return Err(Error::unavailable("text down"));
                    }
                    sent.push(Sent::Text(text.to_string()));
                },
            }
            Ok(SendReceipt {
                message_id: format!("m{}", sent.len()),
            })
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StubMedia;

    #[async_trait]
    impl MediaSource for StubMedia {
        async fn load(&self, source: &str) -> Result<OutboundMedia> {
            if source.starts_with("missing") {
                return Err(Error::invalid_input("not found"));
            }
            Ok(OutboundMedia {
                kind: MediaKind::from_path(source),
                bytes: vec![1, 2, 3],
                mime_type: None,
                file_name: Some(source.to_string()),
            })
        }
    }

    fn delivery(conn: Arc<MockConnection>, limit: usize) -> (OutboundDelivery, SharedEchoGuard) {
        let echo = EchoGuard::shared(100);
        let d = OutboundDelivery::new(conn, Arc::new(StubMedia), echo.clone(), limit);
        (d, echo)
    }

    #[rstest]
    #[case("", 5, 0)]
    #[case("abc", 5, 1)]
    #[case("abcdefghij", 5, 2)]
    #[case("abcdefghijk", 5, 3)]
    fn chunk_counts(#[case] text: &str, #[case] limit: usize, #[case] count: usize) {
        let chunks = chunk_text(text, limit);
        assert_eq!(chunks.len(), count);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= limit));
    }

    #[test]
    fn zero_limit_keeps_text_whole() {
        assert_eq!(chunk_text("hello world", 0), vec!["hello world"]);
        assert!(chunk_text("", 0).is_empty());
    }

    #[tokio::test]
    async fn zero_limit_still_delivers_text_and_caption() {
        let conn = Arc::new(MockConnection::default());
        let (d, _) = delivery(conn.clone(), 0);
        let report = d.deliver("+1", &ReplyPayload::text("hello world"), None).await;
        assert_eq!(report.text_sent, 1);

        let payload = ReplyPayload {
            text: Some("cap".into()),
            media_url: Some("a.png".into()),
            media_urls: vec![],
        };
        d.deliver("+1", &payload, None).await;
        assert_eq!(
            *conn.sent.lock().unwrap(),
            vec![
                Sent::Text("hello world".into()),
                Sent::Media {
                    caption: "cap".into(),
                    kind: MediaKind::Image
                },
            ]
        );
    }

    #[test]
    fn chunks_respect_multibyte_chars() {
        let chunks = chunk_text("héllo wörld", 4);
        assert_eq!(chunks, vec!["héll", "o wö", "rld"]);
    }

    #[tokio::test]
    async fn text_only_in_order() {
        let conn = Arc::new(MockConnection::default());
        let (d, echo) = delivery(conn.clone(), 4);
        let report = d.deliver("+1", &ReplyPayload::text("abcdefgh"), None).await;
        assert_eq!(report.text_sent, 2);
        assert_eq!(
            *conn.sent.lock().unwrap(),
            vec![Sent::Text("abcd".into()), Sent::Text("efgh".into())]
        );
        assert!(with_guard(&echo, |g| g.was_just_sent("abcd")));
        assert!(with_guard(&echo, |g| g.was_just_sent("efgh")));
    }

    #[tokio::test]
    async fn caption_on_first_media_rest_trailing() {
        let conn = Arc::new(MockConnection::default());
        let (d, _) = delivery(conn.clone(), 5);
        let payload = ReplyPayload {
            text: Some("hello world".into()),
            media_url: None,
            media_urls: vec!["a.png".into(), "b.mp3".into()],
        };
        let report = d.deliver("+1", &payload, None).await;
        assert_eq!(report.media_sent, 2);
        assert_eq!(
            *conn.sent.lock().unwrap(),
            vec![
                Sent::Media {
                    caption: "hello".into(),
                    kind: MediaKind::Image
                },
                Sent::Media {
                    caption: String::new(),
                    kind: MediaKind::Audio
                },
                Sent::Text(" worl".into()),
                Sent::Text("d".into()),
            ]
        );
    }

    #[tokio::test]
    async fn media_failure_falls_back_to_text() {
        let conn = Arc::new(MockConnection {
            fail_media: vec!["a.png".into()],
            ..Default::default()
        });
        let (d, echo) = delivery(conn.clone(), 4000);
        let payload = ReplyPayload {
            text: Some("hello world".into()),
            media_url: None,
            media_urls: vec!["a.png".into()],
        };
        let report = d.deliver("+1", &payload, Some("[tg +1] hi")).await;

        assert!(report.text_fallback);
        assert_eq!(report.media_failed, 1);
        assert_eq!(report.text_sent, 1);
        assert_eq!(*conn.sent.lock().unwrap(), vec![Sent::Text("hello world".into())]);
        assert!(with_guard(&echo, |g| g.was_just_sent("hello world")));
        assert!(with_guard(&echo, |g| g.was_just_sent("[tg +1] hi")));
    }

    #[tokio::test]
    async fn later_media_failure_continues() {
        let conn = Arc::new(MockConnection::default());
        let (d, _) = delivery(conn.clone(), 4000);
        let payload = ReplyPayload {
            text: Some("cap".into()),
            media_url: None,
            media_urls: vec!["a.png".into(), "missing.png".into(), "c.mp4".into()],
        };
        let report = d.deliver("+1", &payload, None).await;
        assert_eq!(report.media_sent, 2);
        assert_eq!(report.media_failed, 1);
        assert!(!report.text_fallback);
        assert_eq!(conn.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn nothing_sent_registers_no_echo() {
        let conn = Arc::new(MockConnection {
            fail_text: true,
            ..Default::default()
        });
        let (d, echo) = delivery(conn, 4000);
        let report = d.deliver("+1", &ReplyPayload::text("hi"), Some("batch")).await;
        assert_eq!(report.text_failed, 1);
        assert!(!report.anything_sent());
        assert!(with_guard(&echo, |g| g.is_empty()));
    }
}
