//! Placement-service lookup of the cloud hub URL
//!
//! Production nodes do not know their cloud hub endpoint up front; they ask
//! the placement service, authenticating with the node's client certificate.
//! The lookup retries transient trouble forever on a fixed period; only an
//! HTTP 400 short-circuits, since that means the identity itself was
//! rejected and retrying the same request cannot help.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::HubConfig;

/// Fixed delay between placement attempts
const RETRY_PERIOD: Duration = Duration::from_secs(60);

/// Placement lookup errors.
///
/// Transient failures never escape [`PlacementClient::cloud_hub_url`]; these
/// are the terminal cases the resolve loop has to distinguish.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// HTTPS client construction failed (bad credential files)
    #[error("failed to build placement client: {0}")]
    Client(String),

    /// Placement answered HTTP 400: the identity is misconfigured and the
    /// request will not be retried
    #[error("placement rejected the request: bad request")]
    Rejected,
}

/// Raw reply from the placement endpoint
#[derive(Clone, Debug)]
pub struct PlacementReply {
    /// HTTP status code
    pub status: u16,
    /// Response body (the cloud hub base URL on success)
    pub body: String,
}

/// One HTTP GET against the placement endpoint.
///
/// Seam for the HTTP layer so the retry policy is testable without sockets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlacementFetch: Send + Sync {
    /// Issue the request; `Err` is a transport-level failure
    async fn get(&self) -> Result<PlacementReply, String>;
}

/// reqwest-backed fetch using the node's client certificate
pub struct HttpsFetch {
    client: reqwest::Client,
    url: String,
}

impl HttpsFetch {
    /// Build a mutually-authenticated HTTPS fetch against `url`
    pub fn new(url: &str, config: &HubConfig) -> Result<Self, PlacementError> {
        let mut pem = std::fs::read(&config.cert_file).map_err(|e| {
            PlacementError::Client(format!("cert file {}: {e}", config.cert_file.display()))
        })?;
        pem.extend(std::fs::read(&config.key_file).map_err(|e| {
            PlacementError::Client(format!("key file {}: {e}", config.key_file.display()))
        })?);

        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| PlacementError::Client(format!("client identity: {e}")))?;

        let client = reqwest::Client::builder()
            .identity(identity)
            .build()
            .map_err(|e| PlacementError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl PlacementFetch for HttpsFetch {
    async fn get(&self) -> Result<PlacementReply, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(PlacementReply { status, body })
    }
}

/// Resolves the node's cloud hub session URL
pub struct PlacementClient {
    fetch: Arc<dyn PlacementFetch>,
    project_id: String,
    node_id: String,
    retry_period: Duration,
}

impl PlacementClient {
    /// Build a client from the agent configuration
    pub fn from_config(config: &HubConfig) -> Result<Self, PlacementError> {
        let fetch = HttpsFetch::new(&config.placement_url, config)?;
        Ok(Self::with_fetch(
            Arc::new(fetch),
            &config.project_id,
            &config.node_id,
        ))
    }

    /// Build a client over an explicit fetch seam
    pub fn with_fetch(fetch: Arc<dyn PlacementFetch>, project_id: &str, node_id: &str) -> Self {
        Self {
            fetch,
            project_id: project_id.to_string(),
            node_id: node_id.to_string(),
            retry_period: RETRY_PERIOD,
        }
    }

    /// Ask placement for the cloud hub base URL and derive this node's
    /// session URL from it.
    ///
    /// Retries transient failures forever on the retry period; returns only
    /// on success or on a terminal HTTP 400.
    pub async fn cloud_hub_url(&self) -> Result<String, PlacementError> {
        loop {
            match self.fetch.get().await {
                Ok(reply) if reply.status == 200 => {
                    let url = format!(
                        "{}/{}/{}/events",
                        reply.body.trim_end(),
                        self.project_id,
                        self.node_id
                    );
                    info!(url = %url, "resolved cloud hub url");
                    return Ok(url);
                }
                Ok(reply) if reply.status == 400 => {
                    error!("placement returned 400, not retrying");
                    return Err(PlacementError::Rejected);
                }
                Ok(reply) => {
                    warn!(status = reply.status, "unexpected placement status, will retry");
                }
                Err(e) => {
                    warn!(error = %e, "placement request failed, will retry");
                }
            }
            tokio::time::sleep(self.retry_period).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    fn client(fetch: MockPlacementFetch) -> PlacementClient {
        PlacementClient::with_fetch(Arc::new(fetch), "e632aba927ea4ac2b575ec1603d56f10", "edge-node-1")
    }

    /// Story: a healthy placement answer becomes this node's session URL
    #[tokio::test]
    async fn story_success_builds_session_url() {
        let mut fetch = MockPlacementFetch::new();
        fetch.expect_get().times(1).returning(|| {
            Ok(PlacementReply {
                status: 200,
                body: "wss://cloudhub.example.com:10000\n".into(),
            })
        });

        let url = client(fetch).cloud_hub_url().await.expect("url");
        assert_eq!(
            url,
            "wss://cloudhub.example.com:10000/e632aba927ea4ac2b575ec1603d56f10/edge-node-1/events"
        );
    }

    /// Story: HTTP 400 means the identity is wrong; retrying is pointless
    /// and the caller must hear about it (scenario S5)
    #[tokio::test]
    async fn story_bad_request_is_terminal() {
        let mut fetch = MockPlacementFetch::new();
        fetch.expect_get().times(1).returning(|| {
            Ok(PlacementReply {
                status: 400,
                body: String::new(),
            })
        });

        let err = client(fetch).cloud_hub_url().await.unwrap_err();
        assert!(matches!(err, PlacementError::Rejected));
    }

    /// Story: outages and 5xx answers are ridden out on the retry period
    #[tokio::test(start_paused = true)]
    async fn story_transient_failures_retry_until_success() {
        let mut fetch = MockPlacementFetch::new();
        let mut seq = Sequence::new();
        fetch
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err("connection refused".into()));
        fetch
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(PlacementReply {
                    status: 503,
                    body: String::new(),
                })
            });
        fetch
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(PlacementReply {
                    status: 200,
                    body: "wss://cloudhub.example.com:10000".into(),
                })
            });

        let start = tokio::time::Instant::now();
        let url = client(fetch).cloud_hub_url().await.expect("url");
        assert!(url.ends_with("/edge-node-1/events"));
        // Two failures mean two full retry periods elapsed.
        assert_eq!(start.elapsed(), RETRY_PERIOD * 2);
    }
}
