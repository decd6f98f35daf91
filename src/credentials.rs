//! Client for the external profile service that holds the charting-site
//! login. Credentials are fetched fresh for every run and never stored.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ProfileServiceConfig;

const DECRYPT_PATH: &str = "/api/profile/tradingview-credentials/decrypt";

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"***")
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("profile service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("profile service returned {0}")]
    Status(StatusCode),
    #[error("profile service returned incomplete credentials")]
    Incomplete,
}

#[derive(Deserialize)]
struct DecryptedCredentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub struct CredentialFetcher {
    client: Client,
    base_url: String,
}

impl CredentialFetcher {
    pub fn new(config: &ProfileServiceConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Exchange the user's bearer token for their decrypted site login.
    pub async fn fetch(&self, jwt_token: &str) -> Result<Credentials, CredentialError> {
        let url = format!("{}{}", self.base_url, DECRYPT_PATH);
        let response = self.client.get(&url).bearer_auth(jwt_token).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(%status, "Failed to get site credentials");
            return Err(CredentialError::Status(status));
        }

        let body: DecryptedCredentials = response.json().await?;
        if body.email.is_empty() || body.password.is_empty() {
            return Err(CredentialError::Incomplete);
        }

        info!("Retrieved site credentials from profile service");
        Ok(Credentials {
            username: body.email,
            password: body.password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn decrypt_handler(headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        match auth {
            "Bearer good" => Ok(Json(json!({"email": "trader@example.com", "password": "pw"}))),
            "Bearer empty" => Ok(Json(json!({"email": "trader@example.com", "password": ""}))),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    async fn spawn_profile_service() -> String {
        let app = Router::new().route(DECRYPT_PATH, get(decrypt_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fetcher(base_url: String) -> CredentialFetcher {
        CredentialFetcher::new(&ProfileServiceConfig {
            base_url,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let base = spawn_profile_service().await;
        let creds = fetcher(format!("{}/", base)).fetch("good").await.unwrap();
        assert_eq!(creds.username, "trader@example.com");
        assert_eq!(creds.password, "pw");
    }

    #[tokio::test]
    async fn test_fetch_non_200_is_status_error() {
        let base = spawn_profile_service().await;
        let err = fetcher(base).fetch("bad").await.unwrap_err();
        assert!(matches!(err, CredentialError::Status(StatusCode::UNAUTHORIZED)));
    }

    #[tokio::test]
    async fn test_fetch_empty_password_is_incomplete() {
        let base = spawn_profile_service().await;
        let err = fetcher(base).fetch("empty").await.unwrap_err();
        assert!(matches!(err, CredentialError::Incomplete));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = fetcher(format!("http://{}", addr))
            .fetch("good")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Transport(_)));
    }

    #[test]
    fn test_debug_redacts_username_and_password() {
        let creds = Credentials {
            username: "trader@example.com".into(),
            password: "hunter2".into(),
        };
        let dbg = format!("{:?}", creds);
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("trader@example.com"));
        assert!(dbg.contains("***"));
    }
}
