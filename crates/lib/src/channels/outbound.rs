//! Outbound content: text or a single media attachment, and the structured send result.

use serde::{Deserialize, Serialize};

/// Content envelope handed to the protocol socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    Text {
        text: String,
    },
    Image {
        url: String,
        caption: Option<String>,
        mime_type: Option<String>,
    },
    Video {
        url: String,
        caption: Option<String>,
        mime_type: Option<String>,
    },
    /// Audio never carries a caption.
    Audio {
        url: String,
        mime_type: Option<String>,
    },
    Document {
        url: String,
        caption: Option<String>,
        mime_type: Option<String>,
        file_name: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

/// A media item to attach to an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl MediaAttachment {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Kind from the explicit mime type when present, else from the URL's file extension.
    pub fn kind(&self) -> MediaKind {
        self.mime_type
            .as_deref()
            .and_then(media_kind_from_mime)
            .unwrap_or_else(|| media_kind_from_url(&self.url))
    }
}

fn url_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn extension(url: &str) -> Option<String> {
    let path = url_path(url);
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Classify by file extension; anything unrecognized is a document.
pub fn media_kind_from_url(url: &str) -> MediaKind {
    match extension(url).as_deref() {
        Some("jpg" | "jpeg" | "png" | "gif" | "webp") => MediaKind::Image,
        Some("mp4" | "mov" | "avi" | "mkv" | "webm" | "3gp") => MediaKind::Video,
        Some("mp3" | "ogg" | "oga" | "opus" | "wav" | "m4a" | "aac") => MediaKind::Audio,
        _ => MediaKind::Document,
    }
}

fn media_kind_from_mime(mime: &str) -> Option<MediaKind> {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.is_empty() {
        return None;
    }
    Some(if mime.starts_with("image/") {
        MediaKind::Image
    } else if mime.starts_with("video/") {
        MediaKind::Video
    } else if mime.starts_with("audio/") {
        MediaKind::Audio
    } else {
        MediaKind::Document
    })
}

fn file_name_from_url(url: &str) -> Option<String> {
    url_path(url)
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Build the content envelope for a send. Caption is attached for image, video and
/// document when text is non-empty.
pub fn build_content(text: &str, media: Option<&MediaAttachment>) -> OutgoingContent {
    let Some(media) = media else {
        return OutgoingContent::Text {
            text: text.to_string(),
        };
    };
    let caption = Some(text.to_string()).filter(|t| !t.trim().is_empty());
    let url = media.url.clone();
    let mime_type = media.mime_type.clone();
    match media.kind() {
        MediaKind::Image => OutgoingContent::Image {
            url,
            caption,
            mime_type,
        },
        MediaKind::Video => OutgoingContent::Video {
            url,
            caption,
            mime_type,
        },
        MediaKind::Audio => OutgoingContent::Audio { url, mime_type },
        MediaKind::Document => OutgoingContent::Document {
            file_name: media
                .filename
                .clone()
                .or_else(|| file_name_from_url(&media.url)),
            url,
            caption,
            mime_type,
        },
    }
}

/// Outcome of one send attempt. Serialized as the HTTP response body of the send endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_extension() {
        assert_eq!(media_kind_from_url("https://x/a.JPG"), MediaKind::Image);
        assert_eq!(media_kind_from_url("https://x/a.png?sig=1"), MediaKind::Image);
        assert_eq!(media_kind_from_url("https://x/clip.mp4"), MediaKind::Video);
        assert_eq!(media_kind_from_url("https://x/voice.ogg#t"), MediaKind::Audio);
        assert_eq!(media_kind_from_url("https://x/report.pdf"), MediaKind::Document);
        assert_eq!(media_kind_from_url("https://x/download"), MediaKind::Document);
    }

    #[test]
    fn mime_type_overrides_extension() {
        let media = MediaAttachment {
            url: "https://x/download".to_string(),
            mime_type: Some("image/png".to_string()),
            filename: None,
        };
        assert_eq!(media.kind(), MediaKind::Image);
    }

    #[test]
    fn text_only() {
        assert_eq!(
            build_content("hi", None),
            OutgoingContent::Text {
                text: "hi".to_string()
            }
        );
    }

    #[test]
    fn image_carries_caption() {
        let media = MediaAttachment::from_url("https://x/a.jpg");
        assert_eq!(
            build_content("look", Some(&media)),
            OutgoingContent::Image {
                url: "https://x/a.jpg".to_string(),
                caption: Some("look".to_string()),
                mime_type: None,
            }
        );
    }

    #[test]
    fn audio_never_carries_caption() {
        let media = MediaAttachment::from_url("https://x/a.mp3");
        assert_eq!(
            build_content("listen", Some(&media)),
            OutgoingContent::Audio {
                url: "https://x/a.mp3".to_string(),
                mime_type: None,
            }
        );
    }

    #[test]
    fn document_gets_file_name_and_no_empty_caption() {
        let media = MediaAttachment::from_url("https://x/files/report.pdf?x=1");
        assert_eq!(
            build_content("  ", Some(&media)),
            OutgoingContent::Document {
                url: "https://x/files/report.pdf?x=1".to_string(),
                caption: None,
                mime_type: None,
                file_name: Some("report.pdf".to_string()),
            }
        );
    }

    #[test]
    fn send_result_serialization_skips_absent_fields() {
        let v = serde_json::to_value(SendResult::ok(Some("m1".to_string()))).unwrap();
        assert_eq!(v, serde_json::json!({ "success": true, "messageId": "m1" }));
        let v = serde_json::to_value(SendResult::err("nope")).unwrap();
        assert_eq!(v, serde_json::json!({ "success": false, "error": "nope" }));
    }
}
