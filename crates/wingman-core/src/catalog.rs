//! Thin pass-through proxy for the HuggingFace model catalog query the
//! control plane's UI uses to populate its model browser.
//!
//! No caching, no reshaping: the response body is whatever HuggingFace
//! returns. Grounded on `network::client::HttpClient`'s GET-and-check-status
//! shape, trimmed to the one fixed query this control plane needs.

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use reqwest::Client;
use serde_json::Value;

pub struct Catalog {
    client: Client,
}

impl Catalog {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(NetworkConfig::CATALOG_REQUEST_TIMEOUT)
            .user_agent("wingman/1.0")
            .build()
            .map_err(|e| Error::NetworkFailure {
                message: format!("failed to build catalog client: {e}"),
                source: Some(e),
            })?;
        Ok(Self { client })
    }

    /// Fetch the fixed HuggingFace catalog query and return its body
    /// unparsed-but-for-JSON-validity, for the Control API to pass straight
    /// through to its caller.
    pub async fn fetch(&self) -> Result<Value> {
        let response = self
            .client
            .get(NetworkConfig::HF_CATALOG_URL)
            .send()
            .await
            .map_err(|e| Error::NetworkFailure {
                message: format!("catalog request failed: {e}"),
                source: Some(e),
            })?;

        if !response.status().is_success() {
            return Err(Error::NetworkFailure {
                message: format!("catalog request returned {}", response.status()),
                source: None,
            });
        }

        response.json::<Value>().await.map_err(|e| Error::NetworkFailure {
            message: format!("catalog response was not valid JSON: {e}"),
            source: Some(e),
        })
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new().expect("failed to build default Catalog")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_client_builds() {
        assert!(Catalog::new().is_ok());
    }
}
