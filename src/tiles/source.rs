//! Where tile bytes come from: URL templates and transports

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use super::cell_key::CellKey;
use super::TileError;

const PLACEHOLDERS: [&str; 5] = ["{z}", "{x}", "{y}", "{-y}", "{q}"];

/// Tile URL pattern.
///
/// Supported placeholders: `{z}`, `{x}`, `{y}`, `{-y}` (TMS row, counted from
/// the bottom) and `{q}` (the quad key itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
    tms: bool,
}

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, TileError> {
        let template = template.into();
        if !PLACEHOLDERS.iter().any(|p| template.contains(p)) {
            return Err(TileError::InvalidTemplate(template));
        }
        Ok(Self { template, tms: false })
    }

    /// Flip `{y}` to count rows from the bottom of the grid.
    pub fn with_tms(mut self, tms: bool) -> Self {
        self.tms = tms;
        self
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute the placeholders for `key`. Every key maps to a distinct URL
    /// for any template that mentions its coordinates.
    pub fn url_for(&self, key: &CellKey) -> String {
        let zoom = key.zoom();
        let (x, y) = key.to_xy();
        let flipped = ((1u64 << zoom) - 1 - u64::from(y)).to_string();
        let y = y.to_string();
        let (y, flipped) = if self.tms { (&flipped, &y) } else { (&y, &flipped) };
        self.template
            .replace("{z}", &zoom.to_string())
            .replace("{x}", &x.to_string())
            .replace("{-y}", flipped)
            .replace("{y}", y)
            .replace("{q}", key.as_str())
    }
}

/// Fetches raw tile bytes. Implementations must be cancel-safe: the loader
/// may drop interest in a fetch at any time and will ignore its result.
#[async_trait]
pub trait TileTransport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, TileError>;
}

pub struct HttpTileTransport {
    client: reqwest::Client,
}

impl HttpTileTransport {
    pub fn new(timeout: Duration) -> Result<Self, TileError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("livemap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| TileError::FetchFailed {
                status: None,
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TileTransport for HttpTileTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes, TileError> {
        trace!(url, "http fetch");
        let response = self.client.get(url).send().await.map_err(|err| TileError::FetchFailed {
            status: err.status().map(|s| s.as_u16()),
            reason: err.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TileError::FetchFailed {
                status: Some(status.as_u16()),
                reason: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            });
        }
        response.bytes().await.map_err(|err| TileError::FetchFailed {
            status: Some(status.as_u16()),
            reason: err.to_string(),
        })
    }
}

/// Reads tiles from disk. Accepts `file://` URLs and plain paths.
#[derive(Debug, Default, Clone)]
pub struct FileTileTransport;

#[async_trait]
impl TileTransport for FileTileTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes, TileError> {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        trace!(path = %path.display(), "file fetch");
        tokio::fs::read(&path).await.map(Bytes::from).map_err(|err| TileError::FetchFailed {
            status: None,
            reason: format!("{}: {err}", path.display()),
        })
    }
}

/// Pick a transport from the template's scheme.
pub fn transport_for(
    template: &UrlTemplate,
    timeout: Duration,
) -> Result<Box<dyn TileTransport>, TileError> {
    let url = template.as_str();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Box::new(HttpTileTransport::new(timeout)?))
    } else {
        Ok(Box::new(FileTileTransport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CellKey {
        CellKey::new(s).unwrap()
    }

    #[test]
    fn placeholders_follow_quad_digits() {
        let template = UrlTemplate::new("/{z}/{x}/{y}.png").unwrap();
        assert_eq!(template.url_for(&key("0")), "/1/0/0.png");
        assert_eq!(template.url_for(&key("30")), "/2/2/2.png");
        assert_eq!(template.url_for(&key("1")), "/1/1/0.png");
        assert_eq!(template.url_for(&CellKey::root()), "/0/0/0.png");
    }

    #[test]
    fn flipped_row_and_quad_key() {
        let template = UrlTemplate::new("t/{z}/{x}/{-y}?q={q}").unwrap();
        assert_eq!(template.url_for(&key("2")), "t/1/0/0?q=2");
        assert_eq!(template.url_for(&key("0")), "t/1/0/1?q=0");

        let tms = UrlTemplate::new("/{z}/{x}/{y}").unwrap().with_tms(true);
        assert_eq!(tms.url_for(&key("0")), "/1/0/1");
    }

    #[test]
    fn distinct_keys_give_distinct_urls() {
        let template = UrlTemplate::new("{z}/{x}/{y}").unwrap();
        let keys = ["", "0", "1", "2", "3", "00", "01", "10", "33"];
        let urls: std::collections::HashSet<_> =
            keys.iter().map(|k| template.url_for(&key(k))).collect();
        assert_eq!(urls.len(), keys.len());
    }

    #[test]
    fn template_without_placeholders_is_rejected() {
        assert!(matches!(
            UrlTemplate::new("https://tiles.example/static.png"),
            Err(TileError::InvalidTemplate(_))
        ));
    }

    #[tokio::test]
    async fn file_transport_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        std::fs::write(&path, b"abc").unwrap();
        let bytes = FileTileTransport
            .fetch(&format!("file://{}", path.display()))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"abc");

        let missing = FileTileTransport.fetch("/definitely/not/here.png").await;
        assert!(matches!(missing, Err(TileError::FetchFailed { status: None, .. })));
    }
}
