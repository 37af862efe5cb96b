//! Media store: turns an inline image payload into a durable URL.
//!
//! Inline payloads are `data:image/<type>;base64,<data>` URLs. They are
//! decoded once at upload and served back from `GET /media/{key}`.

use std::collections::HashMap;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use parking_lot::Mutex;
use uuid::Uuid;

/// Errors from the media store.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The payload is neither a URL nor an inline image.
    #[error("unsupported image payload")]
    UnsupportedPayload,

    /// The inline image is not valid base64.
    #[error("invalid image encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
}

/// A decoded image ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Synchronous image upload.
pub trait MediaStore: Send + Sync {
    /// Stores `payload` and returns the URL it can be fetched from.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError`] if the payload cannot be stored.
    fn store_image(&self, payload: &str) -> Result<String, MediaError>;

    /// Returns the image stored under `key`, if this store holds it.
    fn load_image(&self, key: &str) -> Option<StoredImage>;
}

/// Browsers do not always pad data URLs.
const DATA_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Keeps inline images in memory under generated URLs.
///
/// `http(s)` URLs are already durable and pass through unchanged.
pub struct InMemoryMedia {
    base_url: String,
    blobs: Mutex<HashMap<Uuid, StoredImage>>,
}

impl InMemoryMedia {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits `data:image/png;base64,AAAA` into its content type and bytes.
fn decode_data_url(payload: &str) -> Result<StoredImage, MediaError> {
    let rest = payload
        .strip_prefix("data:")
        .ok_or(MediaError::UnsupportedPayload)?;
    let (header, data) = rest.split_once(',').ok_or(MediaError::UnsupportedPayload)?;
    let content_type = header
        .strip_suffix(";base64")
        .filter(|mime| mime.starts_with("image/"))
        .ok_or(MediaError::UnsupportedPayload)?;
    Ok(StoredImage {
        content_type: content_type.to_string(),
        bytes: DATA_URL.decode(data.trim())?,
    })
}

impl MediaStore for InMemoryMedia {
    fn store_image(&self, payload: &str) -> Result<String, MediaError> {
        if payload.starts_with("https://") || payload.starts_with("http://") {
            return Ok(payload.to_string());
        }
        let image = decode_data_url(payload)?;
        let key = Uuid::now_v7();
        tracing::debug!(key = %key, content_type = %image.content_type, bytes = image.bytes.len(), "stored image");
        self.blobs.lock().insert(key, image);
        Ok(format!("{}/media/{key}", self.base_url))
    }

    fn load_image(&self, key: &str) -> Option<StoredImage> {
        let key = Uuid::parse_str(key).ok()?;
        self.blobs.lock().get(&key).cloned()
    }
}
