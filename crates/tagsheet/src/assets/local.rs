//! QR images encoded in-process.

use image::Luma;
use qrcode::{EcLevel, QrCode};

use super::{AssetError, QrImage, QrImageSource};
use crate::label::LabelItem;

/// Pixels per QR module.
const DEFAULT_MODULE_PX: u32 = 12;

/// Encodes each item's target URL with the `qrcode` crate.
///
/// Uses the highest error-correction level so printed tags stay scannable
/// when scuffed.
#[derive(Debug, Clone)]
pub struct LocalQrSource {
    module_px: u32,
}

impl Default for LocalQrSource {
    fn default() -> Self {
        Self {
            module_px: DEFAULT_MODULE_PX,
        }
    }
}

impl LocalQrSource {
    /// Create a source that renders `module_px` pixels per QR module.
    #[must_use]
    pub fn new(module_px: u32) -> Self {
        Self {
            module_px: module_px.max(1),
        }
    }

    /// Encode `data` into a QR raster.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Encode`] if the data does not fit in a QR code.
    pub fn encode(&self, data: &str) -> Result<QrImage, AssetError> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::H)
            .map_err(|e| AssetError::Encode(e.to_string()))?;
        let raster = code
            .render::<Luma<u8>>()
            .module_dimensions(self.module_px, self.module_px)
            .build();
        Ok(QrImage::from_luma(raster))
    }
}

#[async_trait::async_trait]
impl QrImageSource for LocalQrSource {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn fetch(&self, item: &LabelItem) -> Result<QrImage, AssetError> {
        self.encode(&item.target_url)
    }
}
