use super::{HttpResponse, HttpTransport};
use crate::config::HttpConfig;
use crate::error::Result;
use reqwest::blocking::Client;
use reqwest::header::RANGE;
use std::time::Duration;
use url::Url;

/// Blocking HTTP client for control files and range requests
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        // The blocking client defaults to 30s, so 0 has to clear it explicitly
        let timeout = match config.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for HttpClient {
    fn send(&self, url: &Url, range: Option<&str>) -> Result<HttpResponse> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        tracing::debug!("GET {} -> {}", url, status);

        // Non-UTF-8 header values are kept as Latin-1 text
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = match value.to_str() {
                    Ok(text) => text.to_string(),
                    Err(_) => value.as_bytes().iter().map(|&b| b as char).collect(),
                };
                (name.as_str().to_string(), value)
            })
            .collect();

        Ok(HttpResponse {
            status,
            headers,
            body: Box::new(response),
        })
    }
}
