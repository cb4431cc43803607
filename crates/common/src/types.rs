//! Message types flowing between channel connectors, routing and reply delivery.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// What sort of conversation a peer id names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// One-to-one conversation.
    #[default]
    Dm,
    /// Multi-user group chat.
    Group,
    /// Broadcast channel, or a thread/channel inside a guild or team.
    Channel,
}

impl PeerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

/// A conversation on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRef {
    #[serde(default)]
    pub kind: PeerKind,
    pub id: String,
}

impl PeerRef {
    pub fn dm(id: impl Into<String>) -> Self {
        Self {
            kind: PeerKind::Dm,
            id: id.into(),
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: PeerKind::Group,
            id: id.into(),
        }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            kind: PeerKind::Channel,
            id: id.into(),
        }
    }
}

/// One unit received from a channel. Produced by a transport, never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Channel-native message id.
    pub id: String,
    /// Channel name (e.g. "telegram", "whatsapp").
    pub channel: String,
    pub account_id: String,
    /// Sender address; replies go back here.
    pub from: String,
    /// Our own address on the channel.
    pub to: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub peer: PeerRef,
    /// Parent conversation when `peer` is a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_peer: Option<PeerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

impl InboundMessage {
    /// A direct message from `from`, stamped with the current time.
    pub fn direct(
        channel: impl Into<String>,
        account_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let from = from.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            account_id: account_id.into(),
            peer: PeerRef::dm(from.clone()),
            from,
            to: to.into(),
            body: body.into(),
            sender_name: None,
            parent_peer: None,
            guild_id: None,
            team_id: None,
            media_url: None,
            media_type: None,
            media_path: None,
            timestamp: now_ms(),
        }
    }

    #[must_use]
    pub fn with_peer(mut self, peer: PeerRef) -> Self {
        self.peer = peer;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_media(mut self, url: impl Into<String>, media_type: Option<String>) -> Self {
        self.media_url = Some(url.into());
        self.media_type = media_type;
        self
    }

    /// Best guess at the kind of attached media, if any.
    #[must_use]
    pub fn media_kind(&self) -> Option<MediaKind> {
        if self.media_url.is_none() && self.media_path.is_none() {
            return None;
        }
        if let Some(mime) = self.media_type.as_deref() {
            return Some(MediaKind::from_mime(mime));
        }
        self.media_path
            .as_deref()
            .or(self.media_url.as_deref())
            .map(MediaKind::from_path)
    }
}

/// Delivery class for an outbound media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.split('/').next() {
            Some("image") => Self::Image,
            Some("audio") => Self::Audio,
            Some("video") => Self::Video,
            _ => Self::Document,
        }
    }

    /// Classify by file extension; query strings and fragments are ignored.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "heic" => Self::Image,
            "mp3" | "ogg" | "oga" | "opus" | "m4a" | "wav" | "aac" | "flac" => Self::Audio,
            "mp4" | "mov" | "webm" | "mkv" | "avi" | "3gp" => Self::Video,
            _ => Self::Document,
        }
    }
}

/// One reply produced by the agent. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Media urls to deliver, in order. `media_urls` wins over `media_url`.
    #[must_use]
    pub fn media(&self) -> Vec<&str> {
        if !self.media_urls.is_empty() {
            return self.media_urls.iter().map(String::as_str).collect();
        }
        self.media_url.as_deref().into_iter().collect()
    }

    #[must_use]
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.media().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("audio/ogg; codecs=opus"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
    }

    #[test]
    fn media_kind_from_path_ignores_query() {
        assert_eq!(
            MediaKind::from_path("https://cdn.example.com/a.JPG?size=large"),
            MediaKind::Image
        );
        assert_eq!(MediaKind::from_path("/tmp/voice.opus"), MediaKind::Audio);
        assert_eq!(MediaKind::from_path("report"), MediaKind::Document);
    }

    #[test]
    fn reply_media_prefers_list() {
        let payload = ReplyPayload {
            text: None,
            media_url: Some("single.png".into()),
            media_urls: vec!["a.png".into(), "b.png".into()],
        };
        assert_eq!(payload.media(), vec!["a.png", "b.png"]);

        let payload = ReplyPayload {
            media_url: Some("single.png".into()),
            ..Default::default()
        };
        assert_eq!(payload.media(), vec!["single.png"]);
    }

    #[test]
    fn whitespace_reply_is_empty() {
        assert!(ReplyPayload::text("  \n").is_empty());
        assert!(!ReplyPayload::text("hi").is_empty());
    }

    #[test]
    fn inbound_media_kind_prefers_declared_type() {
        let msg = InboundMessage::direct("tg", "default", "u1", "bot", "")
            .with_media("file.bin", Some("video/mp4".into()));
        assert_eq!(msg.media_kind(), Some(MediaKind::Video));
        let plain = InboundMessage::direct("tg", "default", "u1", "bot", "hi");
        assert_eq!(plain.media_kind(), None);
    }

    #[test]
    fn reply_payload_json_uses_camel_case() {
        let payload: ReplyPayload =
            serde_json::from_str(r#"{"text":"hi","mediaUrls":["a.png"]}"#).unwrap();
        assert_eq!(payload.text.as_deref(), Some("hi"));
        assert_eq!(payload.media_urls, vec!["a.png"]);
    }
}
