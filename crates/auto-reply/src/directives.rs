//! Reply normalization: `MEDIA:` lines and empty payloads.

use courier_common::types::ReplyPayload;

use crate::agent::AgentReply;

/// Agent text lines of the form `MEDIA:<url>` attach media to the reply.
pub const MEDIA_PREFIX: &str = "MEDIA:";

/// Split `MEDIA:` lines out of `text`. Returns the remaining text and the
/// referenced media, in order.
#[must_use]
pub fn split_media_directives(text: &str) -> (String, Vec<String>) {
    let mut media = Vec::new();
    let mut kept = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(MEDIA_PREFIX) {
            let target = rest.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'');
            if !target.is_empty() && !target.contains(char::is_whitespace) {
                media.push(target.to_string());
                continue;
            }
        }
        kept.push(line);
    }
    (kept.join("\n").trim().to_string(), media)
}

/// Lift `MEDIA:` lines into the payload's media list. Existing media come
/// first.
#[must_use]
pub fn normalize_payload(payload: ReplyPayload) -> ReplyPayload {
    let Some(text) = payload.text.as_deref() else {
        return payload;
    };
    let (text, lifted) = split_media_directives(text);
    if lifted.is_empty() {
        return payload;
    }
    let mut media: Vec<String> = payload.media().into_iter().map(str::to_string).collect();
    media.extend(lifted);
    ReplyPayload {
        text: (!text.is_empty()).then_some(text),
        media_url: None,
        media_urls: media,
    }
}

/// Flatten an agent reply into the payloads worth delivering.
#[must_use]
pub fn normalize_reply(reply: AgentReply) -> Vec<ReplyPayload> {
    reply
        .into_payloads()
        .into_iter()
        .map(normalize_payload)
        .filter(|p| !p.is_empty())
        .collect()
}
