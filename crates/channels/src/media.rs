//! Load outbound media from URLs or local paths.

use std::path::Path;

use {
    async_trait::async_trait,
    courier_common::types::MediaKind,
    futures::StreamExt,
    tracing::debug,
};

use crate::{Error, Result, transport::OutboundMedia};

/// Resolves a media reference from a reply into bytes.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn load(&self, source: &str) -> Result<OutboundMedia>;
}

/// Loads `http(s)://` URLs with reqwest and anything else from disk,
/// rejecting items larger than the configured cap.
#[derive(Debug, Clone)]
pub struct MediaLoader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl MediaLoader {
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_bytes,
        }
    }

    fn too_large(&self, source: &str, size: u64) -> Error {
        Error::MediaTooLarge {
            source_ref: source.to_string(),
            size,
            limit: self.max_bytes,
        }
    }

    async fn load_http(&self, url: &str) -> Result<OutboundMedia> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        if let Some(len) = resp.content_length()
            && len > self.max_bytes
        {
            return Err(self.too_large(url, len));
        }
        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(self.too_large(url, bytes.len() as u64 + chunk.len() as u64));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(OutboundMedia {
            kind: detect_kind(mime_type.as_deref(), url),
            bytes,
            mime_type,
            file_name: file_name(url),
        })
    }

    async fn load_file(&self, raw: &str) -> Result<OutboundMedia> {
        let path = Path::new(raw.strip_prefix("file://").unwrap_or(raw));
        let meta = tokio::fs::metadata(path).await?;
        if meta.len() > self.max_bytes {
            return Err(self.too_large(raw, meta.len()));
        }
        let bytes = tokio::fs::read(path).await?;
        let mime_type = mime_from_extension(raw).map(str::to_string);
        Ok(OutboundMedia {
            kind: detect_kind(mime_type.as_deref(), raw),
            bytes,
            mime_type,
            file_name: file_name(raw),
        })
    }
}

#[async_trait]
impl MediaSource for MediaLoader {
    async fn load(&self, source: &str) -> Result<OutboundMedia> {
        let source = source.trim();
        if source.is_empty() {
            return Err(Error::invalid_input("empty media reference"));
        }
        let media = if source.starts_with("http://") || source.starts_with("https://") {
            self.load_http(source).await?
        } else {
            self.load_file(source).await?
        };
        debug!(
            source,
            kind = media.kind.as_str(),
            bytes = media.bytes.len(),
            "media loaded"
        );
        Ok(media)
    }
}

/// Content type wins; generic types fall back to the file extension.
fn detect_kind(mime: Option<&str>, source: &str) -> MediaKind {
    match mime {
        Some(m) if !m.starts_with("application/octet-stream") => MediaKind::from_mime(m),
        _ => MediaKind::from_path(source),
    }
}

fn file_name(source: &str) -> Option<String> {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && name.contains('.'))
        .map(str::to_string)
}

fn mime_from_extension(source: &str) -> Option<&'static str> {
    let ext = source.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => return None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    #[tokio::test]
    async fn loads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.png");
        std::fs::write(&path, b"\x89PNG").unwrap();

        let media = MediaLoader::new(1024)
            .load(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(media.kind, MediaKind::Image);
        assert_eq!(media.mime_type.as_deref(), Some("image/png"));
        assert_eq!(media.file_name.as_deref(), Some("chart.png"));
        assert_eq!(media.bytes, b"\x89PNG");
    }

    #[tokio::test]
    async fn rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = MediaLoader::new(10)
            .load(&format!("file://{}", path.display()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MediaTooLarge { size: 64, limit: 10, .. }));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = MediaLoader::new(10).load("/nonexistent/a.png").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[rstest]
    #[case(Some("image/jpeg"), "https://x/y", MediaKind::Image)]
    #[case(Some("application/octet-stream"), "https://x/clip.mp4", MediaKind::Video)]
    #[case(None, "/tmp/report.pdf", MediaKind::Document)]
    #[case(Some("audio/ogg"), "https://x/file.bin", MediaKind::Audio)]
    fn kind_detection(#[case] mime: Option<&str>, #[case] source: &str, #[case] kind: MediaKind) {
        assert_eq!(detect_kind(mime, source), kind);
    }

    #[test]
    fn file_name_from_url() {
        assert_eq!(file_name("https://cdn/x/a.jpg?sig=1").as_deref(), Some("a.jpg"));
        assert_eq!(file_name("https://cdn/x/"), None);
    }
}
