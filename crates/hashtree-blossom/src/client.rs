use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hashtree_core::hash::sha256;
use hashtree_core::types::{to_hex, Hash};

use crate::signer::Signer;
use crate::{BlossomError, HEAD_PRECHECK_THRESHOLD, HEAD_TIMEOUT, TOKEN_EXPIRY_SECONDS};

/// Outcome of `upload_if_missing`: whether the blob was actually sent
/// over the wire, or an endpoint already had it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    AlreadyPresent,
}

/// Client for a set of Blossom-style HTTP blob endpoints.
pub struct BlossomClient {
    signer: Option<Arc<dyn Signer>>,
    read_servers: Vec<String>,
    write_servers: Vec<String>,
    http: reqwest::Client,
}

impl BlossomClient {
    /// A client with no signer: reads work, writes fail with
    /// `Unauthenticated`.
    pub fn unauthenticated() -> Self {
        Self {
            signer: None,
            read_servers: Vec::new(),
            write_servers: Vec::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer: Some(signer),
            read_servers: Vec::new(),
            write_servers: Vec::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_read_servers(mut self, servers: Vec<String>) -> Self {
        self.read_servers = servers;
        self
    }

    pub fn with_write_servers(mut self, servers: Vec<String>) -> Self {
        self.write_servers = servers;
        self
    }

    pub fn read_servers(&self) -> &[String] {
        &self.read_servers
    }

    pub fn write_servers(&self) -> &[String] {
        &self.write_servers
    }

    async fn auth_header(&self, verb: &str, hash_hex: &str) -> Result<String, BlossomError> {
        let signer = self.signer.as_ref().ok_or(BlossomError::Unauthenticated)?;
        let expiry = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + TOKEN_EXPIRY_SECONDS;
        signer.sign(verb, hash_hex, expiry).await
    }

    /// Issues a HEAD against a single endpoint, returning whether it
    /// reports the blob present.
    pub async fn has_at(&self, endpoint: &str, hash: &Hash) -> Result<bool, BlossomError> {
        let hex = to_hex(hash);
        let url = format!("{}/{}.bin", endpoint.trim_end_matches('/'), hex);
        let auth = self.auth_header("HEAD", &hex).await?;
        let resp = self
            .http
            .head(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| BlossomError::EndpointError(e.to_string()))?;
        Ok(resp.status().is_success())
    }

    /// Fetches a single endpoint, verifying the returned bytes hash to
    /// `hash`. A `404` is reported as `Ok(None)`, never an error.
    pub async fn get_at(&self, endpoint: &str, hash: &Hash) -> Result<Option<Vec<u8>>, BlossomError> {
        let hex = to_hex(hash);
        let url = format!("{}/{}.bin", endpoint.trim_end_matches('/'), hex);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BlossomError::EndpointError(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(BlossomError::EndpointError(format!(
                "{endpoint}: status {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BlossomError::EndpointError(e.to_string()))?
            .to_vec();
        let actual = sha256(&bytes);
        if actual != *hash {
            return Err(BlossomError::HashMismatch {
                expected: hex,
                got: to_hex(&actual),
            });
        }
        Ok(Some(bytes))
    }

    /// Iterates `read_servers` in registration order, returning the first
    /// hit. `Ok(None)` only once every endpoint has been tried and none
    /// had it; per-endpoint errors are swallowed here (the caller owning
    /// health tracking decides whether to keep trying a flaky endpoint).
    pub async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, BlossomError> {
        if self.read_servers.is_empty() {
            return Err(BlossomError::NoEndpoints);
        }
        for endpoint in &self.read_servers {
            match self.get_at(endpoint, hash).await {
                Ok(Some(bytes)) => return Ok(Some(bytes)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(endpoint, error = %e, "blossom get failed, trying next endpoint");
                    continue;
                }
            }
        }
        Ok(None)
    }

    pub async fn has(&self, hash: &Hash) -> Result<bool, BlossomError> {
        if self.read_servers.is_empty() {
            return Err(BlossomError::NoEndpoints);
        }
        for endpoint in &self.read_servers {
            match self.has_at(endpoint, hash).await {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(endpoint, error = %e, "blossom has failed, trying next endpoint");
                    continue;
                }
            }
        }
        Ok(false)
    }

    async fn put_at(&self, endpoint: &str, hash_hex: &str, data: &[u8]) -> Result<bool, BlossomError> {
        let url = format!("{}/upload", endpoint.trim_end_matches('/'));
        let auth = self.auth_header("PUT", hash_hex).await?;
        let resp = self
            .http
            .put(&url)
            .header("Authorization", auth)
            .header("Content-Type", "application/octet-stream")
            .header("X-SHA-256", hash_hex)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| BlossomError::EndpointError(e.to_string()))?;

        if resp.status().is_success() {
            return Ok(true);
        }
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Ok(false);
        }
        Err(BlossomError::EndpointError(format!(
            "{endpoint}: status {}",
            resp.status()
        )))
    }

    /// HEAD pre-check (blobs ≥ [`HEAD_PRECHECK_THRESHOLD`]) then parallel
    /// authenticated `PUT` to every write endpoint, per the write
    /// algorithm: success if any endpoint accepts (`2xx` or `409`).
    pub async fn upload_if_missing(&self, data: &[u8]) -> Result<(Hash, UploadOutcome), BlossomError> {
        if self.write_servers.is_empty() {
            return Err(BlossomError::NoEndpoints);
        }
        let hash = sha256(data);
        let hex = to_hex(&hash);

        if data.len() >= HEAD_PRECHECK_THRESHOLD {
            let checks = self.write_servers.iter().map(|endpoint| {
                let endpoint = endpoint.clone();
                let hash = hash;
                async move { tokio::time::timeout(HEAD_TIMEOUT, self.has_at(&endpoint, &hash)).await }
            });
            let results = futures::future::join_all(checks).await;
            if results
                .into_iter()
                .any(|r| matches!(r, Ok(Ok(true))))
            {
                return Ok((hash, UploadOutcome::AlreadyPresent));
            }
        }

        let uploads = self
            .write_servers
            .iter()
            .map(|endpoint| self.put_at(endpoint, &hex, data));
        let results = futures::future::join_all(uploads).await;

        let mut already_present = false;
        for result in results {
            match result {
                Ok(true) => return Ok((hash, UploadOutcome::Uploaded)),
                Ok(false) => already_present = true,
                Err(e) => tracing::warn!(error = %e, "blossom upload attempt failed"),
            }
        }
        if already_present {
            return Ok((hash, UploadOutcome::AlreadyPresent));
        }
        Err(BlossomError::EndpointError(
            "no write endpoint accepted the upload".into(),
        ))
    }

    /// Signed `DELETE` against every write endpoint; succeeds if any
    /// endpoint confirms.
    pub async fn delete(&self, hash: &Hash) -> Result<bool, BlossomError> {
        if self.write_servers.is_empty() {
            return Err(BlossomError::NoEndpoints);
        }
        let hex = to_hex(hash);
        let mut any = false;
        for endpoint in &self.write_servers {
            let url = format!("{}/{}.bin", endpoint.trim_end_matches('/'), hex);
            let auth = self.auth_header("DELETE", &hex).await?;
            match self
                .http
                .delete(&url)
                .header("Authorization", auth)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => any = true,
                Ok(resp) => tracing::warn!(endpoint, status = %resp.status(), "blossom delete failed"),
                Err(e) => tracing::warn!(endpoint, error = %e, "blossom delete request failed"),
            }
        }
        Ok(any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSigner;

    #[async_trait::async_trait]
    impl Signer for StaticSigner {
        async fn sign(&self, verb: &str, hash_hex: &str, expiry_unix: u64) -> Result<String, BlossomError> {
            Ok(format!("Test {verb}:{hash_hex}:{expiry_unix}"))
        }
    }

    #[tokio::test]
    async fn get_with_no_read_servers_errors() {
        let client = BlossomClient::new(Arc::new(StaticSigner));
        let err = client.get(&[0u8; 32]).await.unwrap_err();
        assert!(matches!(err, BlossomError::NoEndpoints));
    }

    #[tokio::test]
    async fn upload_with_no_signer_is_unauthenticated() {
        let client = BlossomClient::unauthenticated().with_write_servers(vec!["https://example.invalid".into()]);
        let err = client.upload_if_missing(b"data").await.unwrap_err();
        assert!(matches!(err, BlossomError::Unauthenticated));
    }

    #[tokio::test]
    async fn upload_with_no_write_servers_errors() {
        let client = BlossomClient::new(Arc::new(StaticSigner));
        let err = client.upload_if_missing(b"data").await.unwrap_err();
        assert!(matches!(err, BlossomError::NoEndpoints));
    }

    #[test]
    fn read_and_write_servers_are_independently_configurable() {
        let client = BlossomClient::new(Arc::new(StaticSigner))
            .with_read_servers(vec!["https://read.example".into()])
            .with_write_servers(vec!["https://write.example".into()]);
        assert_eq!(client.read_servers(), ["https://read.example"]);
        assert_eq!(client.write_servers(), ["https://write.example"]);
    }
}
