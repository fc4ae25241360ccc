//! Offer images: inline `data:` payloads in, files on disk, base64 out.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, error, warn};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image payload must look like data:<media type>;base64,<data>")]
    MalformedPayload,
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("image data is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("image storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ImageError> for ApiError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Io(io) => {
                error!("Image storage error: {}", io);
                ApiError::InternalError("Image storage failed".to_string())
            }
            invalid => ApiError::ValidationError(invalid.to_string()),
        }
    }
}

/// An image payload decoded and ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// Splits `data:image/png;base64,AAAA` into bytes and the `png` extension.
///
/// A structured-syntax suffix is dropped, so `image/svg+xml` is stored as `svg`.
pub fn decode_payload(payload: &str) -> Result<DecodedImage, ImageError> {
    let (header, data) = payload.split_once(',').ok_or(ImageError::MalformedPayload)?;
    let media_type = header
        .split(';')
        .next()
        .unwrap_or_default();
    let subtype = media_type.rsplit('/').next().unwrap_or_default();
    let extension = subtype
        .split('+')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ImageError::UnsupportedType(media_type.to_string()));
    }

    let bytes = STANDARD.decode(data.trim())?;
    Ok(DecodedImage { bytes, extension })
}

#[derive(Clone, Debug)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn ensure_dir(&self) -> Result<(), ImageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Writes the image under a fresh unique name and returns its stored path.
    pub async fn save(&self, image: &DecodedImage) -> Result<String, ImageError> {
        self.ensure_dir().await?;
        let filename = format!("image_{}.{}", Uuid::new_v4().simple(), image.extension);
        let path = self.dir.join(filename);
        tokio::fs::write(&path, &image.bytes).await?;
        debug!("Stored image at {}", path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    pub async fn load_base64(&self, stored_path: &str) -> Result<String, ImageError> {
        let bytes = tokio::fs::read(Path::new(stored_path)).await?;
        Ok(STANDARD.encode(bytes))
    }

    /// Encodes every present slot, keeping slot positions.
    pub async fn load_slots(&self, paths: [Option<&str>; 3]) -> Result<[Option<String>; 3], ImageError> {
        let mut encoded: [Option<String>; 3] = [None, None, None];
        for (slot, path) in paths.iter().enumerate() {
            if let Some(path) = path {
                encoded[slot] = Some(self.load_base64(path).await?);
            }
        }
        Ok(encoded)
    }

    /// Best-effort removal; a missing file only logs.
    pub async fn remove(&self, stored_path: &str) {
        if let Err(e) = tokio::fs::remove_file(stored_path).await {
            warn!("Failed to remove image {}: {}", stored_path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> ImageStore {
        ImageStore::new(std::env::temp_dir().join(format!("realty-images-{}", Uuid::new_v4().simple())))
    }

    #[test]
    fn decodes_data_url() {
        let image = decode_payload("data:image/png;base64,AAECAw==").unwrap();
        assert_eq!(image.extension, "png");
        assert_eq!(image.bytes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn svg_payload_is_stored_as_svg() {
        let image = decode_payload("data:image/svg+xml;base64,PHN2Zy8+").unwrap();
        assert_eq!(image.extension, "svg");
        assert_eq!(image.bytes, b"<svg/>");
    }

    #[test]
    fn rejects_payload_without_separator() {
        assert!(matches!(decode_payload("AAECAw=="), Err(ImageError::MalformedPayload)));
    }

    #[test]
    fn rejects_path_like_extensions() {
        assert!(matches!(
            decode_payload("data:image/..;base64,AAECAw=="),
            Err(ImageError::UnsupportedType(_))
        ));
        assert!(matches!(
            decode_payload("data:image/+xml;base64,AAECAw=="),
            Err(ImageError::UnsupportedType(_))
        ));
    }

    #[test]
    fn rejects_invalid_base64() {
        let err: ApiError = decode_payload("data:image/jpeg;base64,@@@").unwrap_err().into();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[tokio::test]
    async fn stored_image_reads_back_identical() {
        let store = temp_store();
        let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let payload = format!("data:image/jpeg;base64,{}", STANDARD.encode(&original));

        let path = store.save(&decode_payload(&payload).unwrap()).await.unwrap();
        assert!(path.ends_with(".jpeg"));

        let encoded = store.load_base64(&path).await.unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), original);

        store.remove(&path).await;
        assert!(store.load_base64(&path).await.is_err());
    }

    #[tokio::test]
    async fn slots_keep_their_positions() {
        let store = temp_store();
        let path = store
            .save(&decode_payload("data:image/png;base64,AAECAw==").unwrap())
            .await
            .unwrap();

        let slots = store.load_slots([Some(path.as_str()), None, Some(path.as_str())]).await.unwrap();
        assert_eq!(slots[0].as_deref(), Some("AAECAw=="));
        assert_eq!(slots[1], None);
        assert_eq!(slots[2].as_deref(), Some("AAECAw=="));
    }

    #[tokio::test]
    async fn distinct_uploads_get_distinct_names() {
        let store = temp_store();
        let image = decode_payload("data:image/png;base64,AAECAw==").unwrap();
        let first = store.save(&image).await.unwrap();
        let second = store.save(&image).await.unwrap();
        assert_ne!(first, second);
    }
}
