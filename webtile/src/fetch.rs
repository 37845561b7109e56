//! Remote tile fetching and geocoding.
//!
//! [`TileFetcher`] builds GetMap-style queries, validates response bodies and
//! persists tiles with their georeference sidecars. The HTTP transport hides
//! behind the [`HttpClient`] trait so tests inject canned responses; the
//! default implementation uses `reqwest`.
//!
//! A server under load answers a GetMap request with an XML error document
//! instead of image data. That body is detected by its `<?xml` prefix and
//! reported as a transient failure without touching the cache, which is what
//! drives the demote-and-retry path in the request processor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{TileCache, TileKey};
use crate::channel::BoxFuture;
use crate::error::FetchError;
use crate::protocol::{CapabilitiesRequest, FindInfoRequest, ImageRequest};

/// Default request timeout for the bundled reqwest client.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// HTTP client abstraction
// =============================================================================

/// Trait for HTTP GET operations.
///
/// Dyn-compatible (`Pin<Box<dyn Future>>`) so the fetcher can hold it as
/// `Arc<dyn HttpClient>` and tests can substitute mocks.
pub trait HttpClient: Send + Sync + 'static {
    /// Performs an HTTP GET and returns the response body.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Http(format!("request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(FetchError::Http(format!(
                    "HTTP {} from {}",
                    response.status(),
                    url
                )));
            }

            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| FetchError::Http(format!("failed to read response: {}", e)))
        })
    }
}

// =============================================================================
// Tile fetcher
// =============================================================================

/// Outcome of one tile fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Tile and sidecar are on disk at the returned image path.
    Success(PathBuf),
    /// Transport failure or server error body; eligible for retry.
    Transient,
    /// Instance shutdown aborted the fetch; nothing was written.
    Cancelled,
}

/// Fetches tiles from the remote service into the disk cache.
pub struct TileFetcher {
    http: Arc<dyn HttpClient>,
    cache: TileCache,
}

impl TileFetcher {
    pub fn new(http: Arc<dyn HttpClient>, cache: TileCache) -> Self {
        Self { http, cache }
    }

    /// Fetches one tile and persists it together with its world file.
    ///
    /// The HTTP call races the cancellation token so shutdown is bounded in
    /// time rather than waiting for an in-progress network call.
    pub async fn fetch(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let key = TileKey::from_request(request);
        let url = build_get_map_url(request);
        debug!(url = %url, "fetching tile");

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return FetchOutcome::Cancelled,
            result = self.http.get(&url) => match result {
                Ok(body) => body,
                Err(error) => {
                    debug!(%error, "tile fetch failed");
                    return FetchOutcome::Transient;
                }
            },
        };

        // Most likely a busy server; slow down and let the caller retry.
        if is_server_error_body(&body) {
            debug!(url = %url, "server returned an error document");
            return FetchOutcome::Transient;
        }

        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        match self
            .cache
            .write_entry(&key, &body, &request.bounding_box(), request.image_size)
        {
            Ok(path) => FetchOutcome::Success(path),
            Err(error) => {
                warn!(%error, "failed to persist tile");
                FetchOutcome::Transient
            }
        }
    }

    /// Geocodes a free-text location.
    ///
    /// Scans the response line by line for the latitude and longitude markers
    /// with plain text search; anything short of both values is `None`.
    pub async fn find_info(
        &self,
        request: &FindInfoRequest,
        cancel: &CancellationToken,
    ) -> Option<(f64, f64)> {
        let url = build_locate_url(&request.host, &request.query);
        debug!(url = %url, "geocode lookup");

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.http.get(&url) => result.ok()?,
        };

        extract_location(&String::from_utf8_lossy(&body))
    }

    /// Retrieves the service capabilities document.
    ///
    /// Only transport success matters; the body is not inspected.
    pub async fn get_capabilities(
        &self,
        request: &CapabilitiesRequest,
        cancel: &CancellationToken,
    ) -> bool {
        let url = format!(
            "http://{}{}?VERSION=1.1.1&REQUEST=GetCapabilities&",
            request.host, request.host_path
        );
        debug!(url = %url, "capabilities lookup");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            result = self.http.get(&url) => result.is_ok(),
        }
    }
}

// =============================================================================
// Query construction and body inspection
// =============================================================================

/// Builds the GetMap query URL for an image request.
///
/// The style is omitted when it names a `blank` style; the bbox spans the
/// scaled coordinates converted to degrees.
pub(crate) fn build_get_map_url(request: &ImageRequest) -> String {
    let bbox = request.bounding_box();

    let mut url = format!(
        "http://{}{}?VERSION=1.1.1&REQUEST=GetMap&SRS=EPSG%3A4326&bbox={},{},{},{}&layers={}&width={}&height={}&styles=",
        request.host,
        request.host_path,
        bbox.west,
        bbox.south,
        bbox.east,
        bbox.north,
        request.layer,
        request.image_size,
        request.image_size,
    );
    if !request.style.contains("blank") {
        url.push_str(&request.style);
    }
    url.push_str("&format=");
    url.push_str(&request.format);
    url.push_str("&BGCOLOR=0x000000&");
    url
}

fn build_locate_url(host: &str, query: &str) -> String {
    format!(
        "http://{}/?locate={}&geoit=xml",
        host,
        query.replace(' ', "+")
    )
}

/// True when the body starts with an XML declaration (case-insensitive).
pub(crate) fn is_server_error_body(body: &[u8]) -> bool {
    body.len() >= 5 && body[..5].eq_ignore_ascii_case(b"<?xml")
}

/// Extracts (lat, lon) from a geocode response.
///
/// Latitude follows the first `att>` marker, longitude the first `ongt>`
/// marker; values are leading numeric prefixes of whatever follows.
pub(crate) fn extract_location(body: &str) -> Option<(f64, f64)> {
    let mut lat = None;
    let mut lon = None;

    for line in body.lines() {
        if lat.is_none() {
            if let Some(pos) = line.find("att>") {
                lat = leading_number(&line[pos + 4..]);
            }
        }
        if lon.is_none() {
            if let Some(pos) = line.find("ongt>") {
                lon = leading_number(&line[pos + 5..]);
            }
        }
        if lat.is_some() && lon.is_some() {
            break;
        }
    }

    lat.zip(lon)
}

// atof-style extraction: the longest numeric prefix, or None when the text
// does not start with a number.
fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    text[..end].parse().ok()
}
