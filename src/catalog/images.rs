use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::backend::BlobStorage;

/// An image file to attach to a training
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self { content_type: content_type_for(&file_name).to_string(), file_name, bytes })
    }

    /// Text after the last dot, or the whole name when there is none
    pub fn extension(&self) -> &str {
        self.file_name.rsplit('.').next().unwrap_or(&self.file_name)
    }
}

pub fn content_type_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// `{random}-{millis}.{ext}`
pub fn object_path(extension: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}.{}", &random[..11], Utc::now().timestamp_millis(), extension)
}

/// Object path from a public URL: everything after `/{bucket}/`
pub fn path_from_url<'a>(public_url: &'a str, bucket: &str) -> Option<&'a str> {
    let marker = format!("/{}/", bucket);
    public_url
        .split_once(&marker)
        .map(|(_, path)| path)
        .filter(|path| !path.is_empty())
}

/// Training images in one storage bucket. Failures are logged and reported
/// as `None` / `false`, never as errors.
#[derive(Clone)]
pub struct ImageStore {
    storage: Arc<dyn BlobStorage>,
    bucket: String,
}

impl ImageStore {
    pub fn new(storage: Arc<dyn BlobStorage>, bucket: impl Into<String>) -> Self {
        Self { storage, bucket: bucket.into() }
    }

    /// Upload under a fresh object path; returns the public URL
    pub async fn upload(&self, image: ImageUpload) -> Option<String> {
        let path = object_path(image.extension());
        match self.storage.upload(&self.bucket, &path, image.bytes, &image.content_type).await {
            Ok(()) => {
                tracing::debug!("Uploaded image {} to bucket {}", path, self.bucket);
                Some(self.storage.public_url(&self.bucket, &path))
            }
            Err(e) => {
                tracing::error!("Error uploading image: {}", e);
                None
            }
        }
    }

    pub async fn delete(&self, public_url: &str) -> bool {
        let Some(path) = path_from_url(public_url, &self.bucket) else {
            return false;
        };
        match self.storage.remove(&self.bucket, &[path.to_string()]).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error deleting image: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_keeps_extension() {
        let path = object_path("png");
        assert!(path.ends_with(".png"));
        let (random, rest) = path.split_once('-').unwrap();
        assert_eq!(random.len(), 11);
        assert!(rest.trim_end_matches(".png").parse::<i64>().is_ok());
    }

    #[test]
    fn extension_without_dot_is_whole_name() {
        let image = ImageUpload { file_name: "cover".into(), content_type: "image/png".into(), bytes: vec![] };
        assert_eq!(image.extension(), "cover");
        assert_eq!(content_type_for("Photo.JPG"), "image/jpeg");
    }

    #[test]
    fn path_from_public_url() {
        let url = "https://x.co/storage/v1/object/public/trainings/abc-1.png";
        assert_eq!(path_from_url(url, "trainings"), Some("abc-1.png"));
        assert_eq!(path_from_url("https://x.co/other/abc.png", "trainings"), None);
        assert_eq!(path_from_url("https://x.co/trainings/", "trainings"), None);
    }
}
