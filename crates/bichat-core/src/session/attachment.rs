//! File/image attachment model.

use serde::{Deserialize, Serialize};

/// A file attached to a user message.
///
/// An attachment carries at most one of an inline base64 payload or a remote
/// URL; a precomputed preview data-URL may accompany either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique attachment identifier
    pub id: String,
    /// Original filename
    pub filename: String,
    /// MIME type of the payload
    pub mime_type: String,
    /// Payload size in bytes
    pub size: u64,
    /// Inline payload, base64-encoded
    pub base64_data: Option<String>,
    /// Remote payload URL
    pub url: Option<String>,
    /// Precomputed preview as a data URL
    pub preview_data_url: Option<String>,
}

/// Where an attachment preview should be resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewSource {
    /// A ready-to-render data URL (precomputed preview or inline payload).
    DataUrl(String),
    /// A remote URL that must be fetched by the renderer.
    Remote(String),
}

impl Attachment {
    /// An attachment is image-typed only if its MIME type starts with `image/`.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Resolves the preview source, falling back from explicit preview to
    /// inline base64 payload to remote URL.
    ///
    /// Returns `None` when the attachment has no renderable source at all.
    pub fn preview_source(&self) -> Option<PreviewSource> {
        if let Some(preview) = &self.preview_data_url {
            return Some(PreviewSource::DataUrl(preview.clone()));
        }
        if let Some(data) = &self.base64_data {
            return Some(PreviewSource::DataUrl(format!(
                "data:{};base64,{}",
                self.mime_type, data
            )));
        }
        self.url.clone().map(PreviewSource::Remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(mime: &str) -> Attachment {
        Attachment {
            id: "a-1".to_string(),
            filename: "report.png".to_string(),
            mime_type: mime.to_string(),
            size: 1024,
            base64_data: None,
            url: None,
            preview_data_url: None,
        }
    }

    #[test]
    fn image_detection_by_mime_prefix() {
        assert!(attachment("image/png").is_image());
        assert!(attachment("image/svg+xml").is_image());
        assert!(!attachment("application/pdf").is_image());
    }

    #[test]
    fn preview_falls_back_from_explicit_to_base64_to_url() {
        let mut a = attachment("image/png");
        a.preview_data_url = Some("data:image/png;base64,PREVIEW".to_string());
        a.base64_data = Some("RAW".to_string());
        a.url = Some("https://cdn.example.com/a-1".to_string());

        assert_eq!(
            a.preview_source(),
            Some(PreviewSource::DataUrl(
                "data:image/png;base64,PREVIEW".to_string()
            ))
        );

        a.preview_data_url = None;
        assert_eq!(
            a.preview_source(),
            Some(PreviewSource::DataUrl("data:image/png;base64,RAW".to_string()))
        );

        a.base64_data = None;
        assert_eq!(
            a.preview_source(),
            Some(PreviewSource::Remote(
                "https://cdn.example.com/a-1".to_string()
            ))
        );

        a.url = None;
        assert_eq!(a.preview_source(), None);
    }
}
