//! QR image provisioning.
//!
//! Every label needs a raster QR image before it can be drawn. Images come
//! from a [`QrImageSource`]: the built-in encoder or a remote QR image
//! service. [`gather`] fetches all images concurrently and joins the whole
//! set before rendering starts; what happens to items whose image could not be
//! loaded is decided by a [`FailurePolicy`].

mod local;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use ::image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::label::LabelItem;

pub use local::LocalQrSource;
pub use remote::{parse_service_url, RemoteQrSource};

/// Errors that can occur while providing a single QR image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// The target URL could not be encoded as a QR code.
    #[error("QR encoding failed: {0}")]
    Encode(String),

    /// The request to the QR image service failed.
    #[error("request failed: {0}")]
    Http(String),

    /// The QR image service answered with a non-success status.
    #[error("QR service returned HTTP {0}")]
    Status(u16),

    /// The returned bytes are not a readable image.
    #[error("image decoding failed: {0}")]
    Decode(String),

    /// The fetch did not complete in time.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The fetch task ended abnormally.
    #[error("fetch task failed: {0}")]
    Task(String),
}

impl AssetError {
    /// Whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::Encode(_) | Self::Decode(_) | Self::Task(_) => false,
        }
    }
}

/// An item whose QR image could not be provided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFailure {
    /// The tag id.
    pub id: String,
    /// Why the image is missing.
    pub reason: String,
}

impl AssetFailure {
    /// Create a new failure record.
    #[must_use]
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// A decoded QR image as 8-bit RGB pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGB bytes, three per pixel.
    pub rgb: Vec<u8>,
}

impl QrImage {
    /// Convert any decoded image into RGB pixels.
    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            width,
            height,
            rgb: rgb.into_raw(),
        }
    }

    /// Convert a grayscale raster, as produced by the QR encoder.
    #[must_use]
    pub fn from_luma(image: GrayImage) -> Self {
        Self::from_dynamic(&DynamicImage::ImageLuma8(image))
    }

    /// Decode an encoded image (PNG) into RGB pixels.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Decode`] if the bytes are not a supported image.
    pub fn decode(bytes: &[u8]) -> Result<Self, AssetError> {
        let image =
            ::image::load_from_memory(bytes).map_err(|e| AssetError::Decode(e.to_string()))?;
        Ok(Self::from_dynamic(&image))
    }
}

/// A provider of QR images for label items.
#[async_trait::async_trait]
pub trait QrImageSource: Send + Sync + std::fmt::Debug {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Produce the QR image for one item.
    ///
    /// # Errors
    ///
    /// Returns an [`AssetError`] describing why the image is unavailable.
    async fn fetch(&self, item: &LabelItem) -> Result<QrImage, AssetError>;
}

/// What to do with items whose QR image could not be provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole export.
    Abort,
    /// Keep the item's slot and draw a placeholder.
    #[default]
    Placeholder,
    /// Drop the item and lay out the remaining ones.
    Exclude,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Placeholder => write!(f, "placeholder"),
            Self::Exclude => write!(f, "exclude"),
        }
    }
}

/// Tuning for [`gather`].
#[derive(Debug, Clone)]
pub struct GatherOptions {
    /// Maximum fetches in flight.
    pub concurrency: usize,
    /// Extra attempts after a retryable failure.
    pub retries: u32,
    /// Base delay between attempts; grows linearly.
    pub retry_backoff: Duration,
    /// Limit for a single attempt.
    pub timeout: Duration,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retries: 2,
            retry_backoff: Duration::from_millis(250),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Result of gathering images for a batch.
#[derive(Debug, Clone, Default)]
pub struct Gathered {
    /// One entry per input item; `None` where the image is missing.
    pub images: Vec<Option<QrImage>>,
    /// Failed items in input order.
    pub failures: Vec<AssetFailure>,
}

impl Gathered {
    /// Whether every item has an image.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fetch the QR image of every item concurrently.
///
/// One task per item is spawned into a [`JoinSet`]; a semaphore bounds how
/// many run at once. The call returns only after every task has finished, so
/// the result always covers the full batch.
pub async fn gather(
    items: &[LabelItem],
    source: Arc<dyn QrImageSource>,
    options: &GatherOptions,
) -> Gathered {
    info!(
        "Gathering {} QR image(s) from {} source (concurrency {})",
        items.len(),
        source.name(),
        options.concurrency
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, item) in items.iter().cloned().enumerate() {
        let source = Arc::clone(&source);
        let semaphore = Arc::clone(&semaphore);
        let options = options.clone();
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => fetch_with_retry(source.as_ref(), &item, &options).await,
                Err(e) => Err(AssetError::Task(e.to_string())),
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<QrImage, AssetError>>> = vec![None; items.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => warn!("QR fetch task ended abnormally: {}", e),
        }
    }

    let mut gathered = Gathered {
        images: Vec::with_capacity(items.len()),
        failures: Vec::new(),
    };
    for (item, slot) in items.iter().zip(slots) {
        let result =
            slot.unwrap_or_else(|| Err(AssetError::Task("task ended without a result".into())));
        match result {
            Ok(image) => gathered.images.push(Some(image)),
            Err(e) => {
                warn!("No QR image for {}: {}", item.id, e);
                gathered.failures.push(AssetFailure::new(&item.id, e.to_string()));
                gathered.images.push(None);
            }
        }
    }

    info!(
        "Gathered {} of {} QR image(s)",
        items.len() - gathered.failures.len(),
        items.len()
    );
    gathered
}

async fn fetch_with_retry(
    source: &dyn QrImageSource,
    item: &LabelItem,
    options: &GatherOptions,
) -> Result<QrImage, AssetError> {
    let attempts = options.retries + 1;
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(options.timeout, source.fetch(item)).await {
            Ok(result) => result,
            Err(_) => Err(AssetError::Timeout(
                u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        match result {
            Ok(image) => return Ok(image),
            Err(e) if attempt < attempts && e.is_retryable() => {
                debug!(
                    "Attempt {}/{} for {} failed: {}; retrying",
                    attempt, attempts, item.id, e
                );
                tokio::time::sleep(options.retry_backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
