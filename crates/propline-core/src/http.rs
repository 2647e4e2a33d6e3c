//! HTTP source client.
//!
//! Uses async reqwest on a shared tokio runtime but presents the sync
//! [`SourceClient`] interface the orchestrator and rayon workers expect.

use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{FetchError, HarvestError};
use crate::source::{RawPayload, SourceClient, UnitRef};

/// Placeholder substituted with the URL-encoded unit key
pub const UNIT_PLACEHOLDER: &str = "{unit}";

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Classify a reqwest error. The URL is stripped so keys in query strings never reach logs.
pub fn classify_reqwest(e: reqwest::Error) -> FetchError {
    if let Some(status) = e.status() {
        return FetchError::from_status(status.as_u16(), e.without_url().to_string());
    }
    if e.is_builder() {
        return FetchError::malformed(e.without_url().to_string());
    }
    FetchError::Transient {
        status: None,
        message: e.without_url().to_string(),
    }
}

/// GETs `endpoint_template` with `{unit}` replaced by the unit key
#[derive(Debug, Clone)]
pub struct HttpSourceClient {
    client: reqwest::Client,
    template: String,
    api_key: Option<(String, String)>,
}

impl HttpSourceClient {
    pub fn new(endpoint_template: &str, request_timeout: Duration) -> Result<Self, HarvestError> {
        if !endpoint_template.contains(UNIT_PLACEHOLDER) {
            return Err(HarvestError::Config(format!(
                "source_endpoint_template must contain {UNIT_PLACEHOLDER}: {endpoint_template}"
            )));
        }
        url::Url::parse(&endpoint_template.replace(UNIT_PLACEHOLDER, "probe")).map_err(|e| {
            HarvestError::Config(format!("invalid source_endpoint_template: {e}"))
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .pool_max_idle_per_host(8)
            .user_agent(concat!("propline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HarvestError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            template: endpoint_template.to_string(),
            api_key: None,
        })
    }

    /// Send `key` in `header` on every request
    pub fn with_api_key(mut self, header: &str, key: String) -> Self {
        self.api_key = Some((header.to_string(), key));
        self
    }

    /// Concrete URL for a unit
    pub fn endpoint_for(&self, unit: &UnitRef) -> Result<url::Url, FetchError> {
        let encoded: String = url::form_urlencoded::byte_serialize(unit.key.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        let endpoint = self.template.replace(UNIT_PLACEHOLDER, &encoded);
        url::Url::parse(&endpoint).map_err(|e| FetchError::malformed(format!("bad endpoint: {e}")))
    }

    async fn fetch_async(&self, unit: &UnitRef, url: url::Url) -> Result<RawPayload, FetchError> {
        let mut request = self.client.get(url);
        if let Some((header, key)) = &self.api_key {
            request = request.header(header.as_str(), key.as_str());
        }
        let response = request.send().await.map_err(classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("unexpected status"),
            ));
        }
        let body = response.text().await.map_err(classify_reqwest)?;
        Ok(RawPayload::new(unit.clone(), body))
    }
}

impl SourceClient for HttpSourceClient {
    fn fetch(&self, unit: &UnitRef) -> Result<RawPayload, FetchError> {
        let url = self.endpoint_for(unit)?;
        SHARED_RUNTIME
            .handle()
            .block_on(self.fetch_async(unit, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(template: &str) -> HttpSourceClient {
        HttpSourceClient::new(template, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn template_requires_placeholder() {
        let err = HttpSourceClient::new("https://example.com/x", Duration::from_secs(1));
        assert!(matches!(err, Err(HarvestError::Config(_))));
    }

    #[test]
    fn template_must_be_a_url() {
        let err = HttpSourceClient::new("not a url/{unit}", Duration::from_secs(1));
        assert!(matches!(err, Err(HarvestError::Config(_))));
    }

    #[test]
    fn endpoint_substitutes_key_in_path() {
        let c = client("https://example.com/api/address/{unit}");
        let url = c.endpoint_for(&UnitRef::new(0, "GANSW7054")).unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/address/GANSW7054");
    }

    #[test]
    fn endpoint_encodes_spaces_and_slashes() {
        let c = client("https://example.com/lookup?q={unit}");
        let url = c.endpoint_for(&UnitRef::new(0, "12 Main St/2")).unwrap();
        assert_eq!(url.as_str(), "https://example.com/lookup?q=12%20Main%20St%2F2");
    }
}
