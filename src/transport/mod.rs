pub mod http;
pub mod multipart;
pub mod range;

use crate::error::{Result, ZsyncError};
use std::io::Read;
use url::Url;

/// Status, headers and body stream of one HTTP response
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// First header with this name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// HTTP client abstraction used by the range fetcher
///
/// Implementations own connection handling, TLS, redirects and timeouts.
/// The core only issues GET requests, optionally with a `Range` header value
/// such as `bytes=0-2047,8192-10239`, and reads the response.
pub trait HttpTransport {
    fn send(&self, url: &Url, range: Option<&str>) -> Result<HttpResponse>;
}

/// GET a whole resource (used for remote control files)
pub fn fetch_all<T: HttpTransport + ?Sized>(transport: &T, url: &Url) -> Result<Vec<u8>> {
    let mut response = transport.send(url, None)?;
    if response.status != 200 {
        return Err(ZsyncError::Protocol(format!(
            "GET {} returned HTTP {}",
            url, response.status
        )));
    }

    let mut data = Vec::new();
    response.body.read_to_end(&mut data)?;
    tracing::debug!("Fetched {} bytes from {}", data.len(), url);
    Ok(data)
}
