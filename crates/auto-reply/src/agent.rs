//! The agent collaborator: takes a resolved conversation plus prompt text
//! and returns zero or more reply payloads.

use {
    async_trait::async_trait,
    courier_common::types::ReplyPayload,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

/// Everything the agent needs to continue a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub agent_id: String,
    pub session_key: String,
    /// Opaque thread handle from the session store.
    pub session_id: String,
    /// The session was just created or restarted after going idle.
    pub is_new_session: bool,
    pub channel: String,
    pub account_id: String,
    /// Who the reply goes to.
    pub peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub prompt: String,
    pub is_heartbeat: bool,
}

/// What an agent returned. Agents may answer with nothing, one payload or
/// several; callers always go through [`AgentReply::into_payloads`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AgentReply {
    Many(Vec<ReplyPayload>),
    One(ReplyPayload),
    #[default]
    None,
}

impl AgentReply {
    #[must_use]
    pub fn into_payloads(self) -> Vec<ReplyPayload> {
        match self {
            Self::Many(payloads) => payloads,
            Self::One(payload) => vec![payload],
            Self::None => Vec::new(),
        }
    }

    /// Interpret raw agent output: a JSON payload (or array of payloads) is
    /// taken as-is, anything else becomes a single text reply. JSON that
    /// carries no text or media (`{}`, `[]`, `{"status":"ok"}`) is delivered
    /// verbatim as text.
    #[must_use]
    pub fn from_output(output: &str) -> Self {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Self::None;
        }
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && let Ok(reply) = serde_json::from_str::<Self>(trimmed)
        {
            if reply.has_reply_fields() {
                return reply;
            }
            debug!("agent output is JSON without reply fields, sending it as text");
        }
        Self::One(ReplyPayload::text(trimmed))
    }

    fn has_reply_fields(&self) -> bool {
        let set = |p: &ReplyPayload| {
            p.text.is_some() || p.media_url.is_some() || !p.media_urls.is_empty()
        };
        match self {
            Self::Many(payloads) => payloads.iter().any(set),
            Self::One(payload) => set(payload),
            Self::None => false,
        }
    }
}

impl From<ReplyPayload> for AgentReply {
    fn from(payload: ReplyPayload) -> Self {
        Self::One(payload)
    }
}

impl From<Vec<ReplyPayload>> for AgentReply {
    fn from(payloads: Vec<ReplyPayload>) -> Self {
        Self::Many(payloads)
    }
}

impl From<Option<ReplyPayload>> for AgentReply {
    fn from(payload: Option<ReplyPayload>) -> Self {
        payload.map_or(Self::None, Self::One)
    }
}

/// Agent invocation. The embedding application provides the concrete
/// implementation.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> anyhow::Result<AgentReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_is_text() {
        let reply = AgentReply::from_output("  hello\n");
        assert_eq!(reply.into_payloads(), vec![ReplyPayload::text("hello")]);
    }

    #[test]
    fn empty_output_is_none() {
        assert_eq!(AgentReply::from_output(" \n"), AgentReply::None);
        assert!(AgentReply::None.into_payloads().is_empty());
    }

    #[test]
    fn json_single_and_list() {
        let one = AgentReply::from_output(r#"{"text":"hi","mediaUrl":"a.png"}"#);
        assert_eq!(
            one,
            AgentReply::One(ReplyPayload {
                text: Some("hi".into()),
                media_url: Some("a.png".into()),
                media_urls: vec![],
            })
        );
        let many = AgentReply::from_output(r#"[{"text":"a"},{"mediaUrls":["x.jpg","y.jpg"]}]"#);
        let payloads = many.into_payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1].media(), vec!["x.jpg", "y.jpg"]);
    }

    #[test]
    fn malformed_json_falls_back_to_text() {
        let reply = AgentReply::from_output("{not json");
        assert_eq!(reply.into_payloads(), vec![ReplyPayload::text("{not json")]);
    }

    #[test]
    fn json_without_reply_fields_is_text() {
        for raw in [r#"{"status":"ok","count":3}"#, "{}", "[]", "[{}]"] {
            assert_eq!(
                AgentReply::from_output(raw).into_payloads(),
                vec![ReplyPayload::text(raw)],
                "{raw}"
            );
        }
        assert_eq!(
            crate::directives::normalize_reply(AgentReply::from_output(r#"{"status":"ok"}"#)),
            vec![ReplyPayload::text(r#"{"status":"ok"}"#)]
        );
        // An explicit empty text is a deliberate silent reply.
        assert_eq!(
            AgentReply::from_output(r#"{"text":""}"#),
            AgentReply::One(ReplyPayload::text(""))
        );
    }

    #[test]
    fn conversions() {
        assert_eq!(AgentReply::from(None), AgentReply::None);
        assert_eq!(
            AgentReply::from(Some(ReplyPayload::text("x"))).into_payloads().len(),
            1
        );
        assert_eq!(AgentReply::from(vec![ReplyPayload::default(); 3]).into_payloads().len(), 3);
    }
}
