//! QR images fetched from a remote QR image service.

use std::time::Duration;

use tracing::debug;
use url::Url;

use super::{AssetError, QrImage, QrImageSource};
use crate::error::{Error, Result};
use crate::label::LabelItem;

/// Fetches PNG QR images over HTTP.
///
/// The service is called as `service_url?size=NxN&data=<target url>`, the
/// query format used by common QR image APIs.
#[derive(Debug, Clone)]
pub struct RemoteQrSource {
    client: reqwest::Client,
    service_url: Url,
    size_px: u32,
}

impl RemoteQrSource {
    /// Create a source for the given service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if `service_url` is not an absolute
    /// http(s) URL, or an internal error if the HTTP client cannot be built.
    pub fn new(service_url: &str, size_px: u32, connect_timeout: Duration) -> Result<Self> {
        let service_url = parse_service_url(service_url)?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("tagsheet/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            service_url,
            size_px,
        })
    }

    /// The request URL for one item.
    #[must_use]
    pub fn request_url(&self, item: &LabelItem) -> Url {
        let mut url = self.service_url.clone();
        url.query_pairs_mut()
            .append_pair("size", &format!("{0}x{0}", self.size_px))
            .append_pair("data", &item.target_url);
        url
    }
}

/// Parse and check a QR service URL.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] for anything but an http(s) URL.
pub fn parse_service_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::ConfigValidation {
        message: format!("invalid QR service URL '{raw}': {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::ConfigValidation {
            message: format!("QR service URL must use http or https: {raw}"),
        });
    }
    Ok(url)
}

#[async_trait::async_trait]
impl QrImageSource for RemoteQrSource {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn fetch(&self, item: &LabelItem) -> std::result::Result<QrImage, AssetError> {
        let url = self.request_url(item);
        debug!("Fetching QR image for {} from {}", item.id, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AssetError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AssetError::Http(e.to_string()))?;
        QrImage::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> RemoteQrSource {
        RemoteQrSource::new(
            "https://api.qrserver.com/v1/create-qr-code/",
            300,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_request_url_encodes_target() {
        let item = LabelItem::new("Ab3dE9xZ", "https://tags.example.org").unwrap();
        let url = source().request_url(&item);

        assert_eq!(url.host_str(), Some("api.qrserver.com"));
        assert_eq!(url.path(), "/v1/create-qr-code/");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("size".to_string(), "300x300".to_string()),
                (
                    "data".to_string(),
                    "https://tags.example.org/qr/Ab3dE9xZ".to_string()
                ),
            ]
        );
        assert!(url.as_str().contains("data=https%3A%2F%2Ftags.example.org%2Fqr%2FAb3dE9xZ"));
    }

    #[test]
    fn test_request_url_keeps_existing_query() {
        let source = RemoteQrSource::new(
            "https://qr.example.net/render?ecc=H",
            200,
            Duration::from_secs(5),
        )
        .unwrap();
        let item = LabelItem::new("qr123", "https://tags.example.org").unwrap();
        let url = source.request_url(&item);
        assert!(url.as_str().starts_with("https://qr.example.net/render?ecc=H&size=200x200"));
    }

    #[test]
    fn test_parse_service_url_rejects_bad_input() {
        assert!(matches!(
            parse_service_url("not a url"),
            Err(Error::ConfigValidation { .. })
        ));
        assert!(matches!(
            parse_service_url("ftp://qr.example.net/"),
            Err(Error::ConfigValidation { .. })
        ));
        assert!(parse_service_url("http://localhost:8080/qr").is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_http_error() {
        let source =
            RemoteQrSource::new("http://127.0.0.1:9/qr", 100, Duration::from_millis(200)).unwrap();
        let item = LabelItem::new("qr123", "https://tags.example.org").unwrap();
        let result = source.fetch(&item).await;
        assert!(matches!(result, Err(AssetError::Http(_))));
    }
}
