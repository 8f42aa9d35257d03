//! HTTP implementation of the engine's CAS client trait.

use bytes::Bytes;
use reqwest::StatusCode;
use seine_engine::{CasClient, ClientError};
use seine_types::{ChunkHash, XorbHash};
use tracing::debug;

use crate::error::NetError;
use crate::token::{TokenConfig, WriteTokenProvider};

/// CAS transport over HTTP, authenticated with hub write tokens.
pub struct HttpCasClient {
    http: reqwest::Client,
    tokens: WriteTokenProvider,
}

impl HttpCasClient {
    pub fn new(config: TokenConfig) -> Self {
        let http = reqwest::Client::new();
        let tokens = WriteTokenProvider::new(http.clone(), config);
        Self { http, tokens }
    }

    async fn query_dedup_inner(&self, hash: ChunkHash) -> Result<Option<Bytes>, NetError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/v1/chunk/default-merkledb/{hash}", token.cas_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(response.bytes().await?))
    }

    async fn put_xorb_inner(&self, hash: XorbHash, data: Bytes) -> Result<(), NetError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/xorb/default/{hash}", token.cas_url);
        debug!(%hash, size = data.len(), "uploading xorb");

        let response = self
            .http
            .put(&url)
            .bearer_auth(&token.access_token)
            .body(data)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn put_shard_inner(&self, data: Bytes) -> Result<(), NetError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/v1/shard/default-merkledb", token.cas_url);
        debug!(size = data.len(), "uploading shard");

        let response = self
            .http
            .put(&url)
            .bearer_auth(&token.access_token)
            .body(data)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CasClient for HttpCasClient {
    async fn query_dedup(&self, hash: ChunkHash) -> Result<Option<Bytes>, ClientError> {
        self.query_dedup_inner(hash).await.map_err(ClientError::new)
    }

    async fn put_xorb(&self, hash: XorbHash, data: Bytes) -> Result<(), ClientError> {
        self.put_xorb_inner(hash, data).await.map_err(ClientError::new)
    }

    async fn put_shard(&self, data: Bytes) -> Result<(), ClientError> {
        self.put_shard_inner(data).await.map_err(ClientError::new)
    }
}
