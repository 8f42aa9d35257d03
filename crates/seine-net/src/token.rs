//! Write-token acquisition and caching.
//!
//! Uploads authenticate against the CAS service with a short-lived JWT
//! handed out by the hub. The provider caches the token and refreshes it
//! when it comes within the safety window of expiry; the async lock means
//! concurrent callers share one in-flight refresh instead of stampeding
//! the hub.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::NetError;

/// A token is considered expired this long before its actual expiry, so
/// requests signed with it do not die in flight.
pub const JWT_SAFETY_PERIOD: Duration = Duration::from_secs(60);

/// Where and as whom to request write tokens.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Hub base URL, e.g. `https://huggingface.co`.
    pub hub_url: String,
    /// Hub access token; anonymous when `None`.
    pub access_token: Option<String>,
    /// Repository type: `model`, `dataset`, or `space`.
    pub repo_type: String,
    /// Repository name, e.g. `user/repo`.
    pub repo: String,
    /// Revision (branch or commit) the upload targets.
    pub rev: String,
}

/// A usable write token and the CAS endpoint it is valid for.
#[derive(Debug, Clone)]
pub struct WriteToken {
    pub access_token: String,
    pub cas_url: String,
    pub expires_at: SystemTime,
}

impl WriteToken {
    /// Whether the token is still outside the safety window at `now`.
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expires_at.duration_since(now) {
            Ok(remaining) => remaining > JWT_SAFETY_PERIOD,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteTokenResponse {
    access_token: String,
    cas_url: String,
    /// Expiry as a unix timestamp in seconds.
    exp: u64,
}

/// Fetches and caches write tokens for one repository revision.
pub struct WriteTokenProvider {
    http: reqwest::Client,
    config: TokenConfig,
    cached: Mutex<Option<WriteToken>>,
}

impl WriteTokenProvider {
    pub fn new(http: reqwest::Client, config: TokenConfig) -> Self {
        Self {
            http,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Return a fresh token, refreshing through the hub if needed.
    pub async fn token(&self) -> Result<WriteToken, NetError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(SystemTime::now()) {
                return Ok(token.clone());
            }
        }

        let url = format!(
            "{}/api/{}s/{}/xet-write-token/{}",
            self.config.hub_url, self.config.repo_type, self.config.repo, self.config.rev
        );
        debug!(url, "refreshing write token");

        let mut request = self.http.post(&url);
        if let Some(access_token) = &self.config.access_token {
            request = request.bearer_auth(access_token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: WriteTokenResponse = response.json().await?;
        let token = WriteToken {
            access_token: parsed.access_token,
            cas_url: parsed.cas_url.trim_end_matches('/').to_string(),
            expires_at: UNIX_EPOCH + Duration::from_secs(parsed.exp),
        };
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_deserialization() {
        let json = r#"{"accessToken":"jwt-abc","casUrl":"https://cas.example/","exp":1700000000}"#;
        let parsed: WriteTokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "jwt-abc");
        assert_eq!(parsed.cas_url, "https://cas.example/");
        assert_eq!(parsed.exp, 1_700_000_000);
    }

    #[test]
    fn test_freshness_window() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let token = |expires_in: u64| WriteToken {
            access_token: "t".into(),
            cas_url: "c".into(),
            expires_at: now + Duration::from_secs(expires_in),
        };

        assert!(token(3600).is_fresh(now));
        // Inside the 60 s safety window counts as expired.
        assert!(!token(59).is_fresh(now));
        assert!(!token(0).is_fresh(now));
        // Already past expiry.
        let stale = WriteToken {
            access_token: "t".into(),
            cas_url: "c".into(),
            expires_at: now - Duration::from_secs(10),
        };
        assert!(!stale.is_fresh(now));
    }
}
