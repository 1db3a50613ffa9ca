//! Value objects and the deterministic naming of stored objects.

use std::fmt;

use super::error::VersionError;

/// The one upload ceiling: 5 GiB.
pub const MAX_UPLOAD_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Shared preview for everything that is not a thumbnailable image.
pub const DEFAULT_PREVIEW_KEY: &str = "previews/default.png";

const MAX_NAME_LEN: usize = 255;

const THUMBNAIL_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

/// A file name safe to embed as the last segment of a storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName(String);

impl FileName {
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(VersionError::Validation("name must not be empty".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(VersionError::Validation(format!(
                "name must be at most {MAX_NAME_LEN} bytes"
            )));
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(VersionError::Validation(
                "name must not contain path separators".to_string(),
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(VersionError::Validation(
                "name must not contain control characters".to_string(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An upload size within [`MAX_UPLOAD_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSize(u64);

impl FileSize {
    pub fn new(bytes: u64) -> Result<Self, VersionError> {
        if bytes > MAX_UPLOAD_SIZE {
            return Err(VersionError::SizeExceeded {
                size: bytes,
                limit: MAX_UPLOAD_SIZE,
            });
        }
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

/// Where the bytes of one version live.
pub fn storage_key(owner_id: &str, file_id: &str, version_num: u32, name: &FileName) -> String {
    format!("{owner_id}/{file_id}/v{version_num}/{name}")
}

/// Where the generated thumbnail of one version lives. Re-deriving it is
/// stable, so regenerating a preview overwrites rather than duplicates.
pub fn preview_key(version_id: &str) -> String {
    format!("previews/{version_id}.jpg")
}

/// Pick a MIME type: the declared one unless it is missing or generic,
/// otherwise a guess from the name.
pub fn resolve_mime(declared: Option<&str>, name: &FileName) -> String {
    declared
        .map(str::trim)
        .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
        .map(str::to_string)
        .or_else(|| {
            mime_guess::from_path(name.as_str())
                .first()
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Whether the object at `key` is an image format the preview worker can thumbnail.
pub fn is_thumbnailable(key: &str) -> bool {
    mime_guess::from_path(key)
        .iter()
        .any(|m| THUMBNAIL_MIME_TYPES.contains(&m.essence_str()))
}

/// Preview objects owned by a single version (never the shared placeholder).
pub fn owned_preview(preview_key: Option<&str>) -> Option<&str> {
    preview_key.filter(|key| *key != DEFAULT_PREVIEW_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_deterministic() {
        let name = FileName::parse("a.png").unwrap();
        assert_eq!(storage_key("o1", "f1", 3, &name), "o1/f1/v3/a.png");
        assert_eq!(storage_key("o1", "f1", 3, &name), storage_key("o1", "f1", 3, &name));
    }

    #[test]
    fn file_name_validation() {
        assert_eq!(FileName::parse("  report.pdf ").unwrap().as_str(), "report.pdf");
        assert!(FileName::parse("").is_err());
        assert!(FileName::parse("   ").is_err());
        assert!(FileName::parse("a/b.png").is_err());
        assert!(FileName::parse("..").is_err());
        assert!(FileName::parse("tab\there").is_err());
        assert!(FileName::parse(&"x".repeat(256)).is_err());
    }

    #[test]
    fn size_ceiling() {
        assert!(FileSize::new(0).is_ok());
        assert_eq!(FileSize::new(MAX_UPLOAD_SIZE).unwrap().bytes(), MAX_UPLOAD_SIZE);
        assert!(matches!(
            FileSize::new(MAX_UPLOAD_SIZE + 1),
            Err(VersionError::SizeExceeded { .. })
        ));
    }

    #[test]
    fn image_detection_by_extension() {
        assert!(is_thumbnailable("o/f/v1/a.png"));
        assert!(is_thumbnailable("o/f/v1/photo.JPG"));
        assert!(is_thumbnailable("o/f/v1/anim.gif"));
        assert!(!is_thumbnailable("o/f/v1/doc.pdf"));
        assert!(!is_thumbnailable("o/f/v1/vector.svg"));
        assert!(!is_thumbnailable("o/f/v1/noext"));
    }

    #[test]
    fn mime_resolution() {
        let name = FileName::parse("a.png").unwrap();
        assert_eq!(resolve_mime(Some("image/webp"), &name), "image/webp");
        assert_eq!(resolve_mime(None, &name), "image/png");
        assert_eq!(resolve_mime(Some("application/octet-stream"), &name), "image/png");

        let unknown = FileName::parse("blob").unwrap();
        assert_eq!(resolve_mime(None, &unknown), "application/octet-stream");
    }

    #[test]
    fn placeholder_is_never_owned() {
        assert_eq!(owned_preview(Some(DEFAULT_PREVIEW_KEY)), None);
        assert_eq!(owned_preview(Some("previews/v1.jpg")), Some("previews/v1.jpg"));
        assert_eq!(owned_preview(None), None);
    }
}
