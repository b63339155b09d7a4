//! Lead-magnet and welcome-image assets.
//!
//! The guide is an opaque file on disk. When it is missing, a short
//! generated text document stands in for it so the funnel never stalls.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::channels::Attachment;

/// File name of the generated stand-in guide.
pub const FALLBACK_GUIDE_NAME: &str = "guide.txt";

const FALLBACK_GUIDE_TEXT: &str = "Free guide: coping with anxiety\n\n\
1. Practice deep breathing\n\
2. Keep a thought journal\n\
3. Stay physically active\n\
4. Use mindfulness techniques\n\
5. Reach out for professional help\n";

/// The guide to send: the real document, or the generated stand-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadMagnet {
    Document(Attachment),
    Fallback(Attachment),
}

impl LeadMagnet {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn into_attachment(self) -> Attachment {
        match self {
            Self::Document(file) | Self::Fallback(file) => file,
        }
    }
}

/// Locations of the funnel's static assets.
#[derive(Debug, Clone)]
pub struct Assets {
    guide_path: PathBuf,
    welcome_image_path: PathBuf,
}

impl Assets {
    pub fn new(guide_path: impl Into<PathBuf>, welcome_image_path: impl Into<PathBuf>) -> Self {
        Self {
            guide_path: guide_path.into(),
            welcome_image_path: welcome_image_path.into(),
        }
    }

    /// Load the guide, falling back to the generated text.
    pub async fn guide(&self) -> LeadMagnet {
        match read_asset(&self.guide_path).await {
            Some(file) => LeadMagnet::Document(file),
            None => LeadMagnet::Fallback(Attachment::new(
                FALLBACK_GUIDE_NAME,
                FALLBACK_GUIDE_TEXT.as_bytes().to_vec(),
            )),
        }
    }

    /// Load the welcome picture, if one is configured and readable.
    pub async fn welcome_image(&self) -> Option<Attachment> {
        read_asset(&self.welcome_image_path).await
    }

    /// Log which assets are missing so operators notice at startup.
    pub fn report_missing(&self) {
        for path in [&self.guide_path, &self.welcome_image_path] {
            if !path.exists() {
                warn!(path = %path.display(), "Asset not found; a fallback will be used");
            }
        }
    }
}

async fn read_asset(path: &Path) -> Option<Attachment> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file")
                .to_string();
            Some(Attachment { file_name, bytes })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Asset missing");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Asset unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_guide_uses_fallback_text() {
        let assets = Assets::new("/nonexistent/guide.pdf", "/nonexistent/welcome.jpg");
        let guide = assets.guide().await;
        assert!(guide.is_fallback());

        let file = guide.into_attachment();
        assert_eq!(file.file_name, FALLBACK_GUIDE_NAME);
        let text = String::from_utf8(file.bytes).unwrap();
        assert!(text.contains("deep breathing"));

        assert!(assets.welcome_image().await.is_none());
    }

    #[tokio::test]
    async fn existing_guide_is_sent_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.pdf");
        std::fs::write(&path, b"%PDF-1.4 test").unwrap();

        let assets = Assets::new(&path, dir.path().join("welcome.jpg"));
        match assets.guide().await {
            LeadMagnet::Document(file) => {
                assert_eq!(file.file_name, "guide.pdf");
                assert_eq!(file.bytes, b"%PDF-1.4 test");
            }
            other => panic!("expected document, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn welcome_image_is_loaded_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("welcome.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF]).unwrap();

        let assets = Assets::new(dir.path().join("guide.pdf"), &path);
        let image = assets.welcome_image().await.unwrap();
        assert_eq!(image.file_name, "welcome.jpg");
        assert_eq!(image.bytes.len(), 3);
    }
}
