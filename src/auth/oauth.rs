use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::Settings;
use crate::error::{AppError, AppResult};

use super::credential::TokenGrant;

/// Exchanges a refresh token for a new access token.
///
/// Implementations return `AppError::Auth` when the provider rejects the
/// exchange; any other error is treated as transient by the manager.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenGrant>;
}

#[derive(Debug, Clone)]
pub struct OAuthRefresher {
    http: reqwest::Client,
    token_endpoint: Url,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl OAuthRefresher {
    pub fn new(
        token_endpoint: &str,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            token_endpoint: Url::parse(token_endpoint)?,
            client_id: Some(client_id.into()),
            client_secret,
        })
    }

    /// A profile without a client id can still inspect and import
    /// credentials; only the exchange itself needs one.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            token_endpoint: Url::parse(&settings.token_endpoint())?,
            client_id: settings.client_id().ok().map(ToOwned::to_owned),
            client_secret: settings.client_secret().map(ToOwned::to_owned),
        })
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenGrant> {
        let client_id = self.client_id.clone().ok_or_else(|| {
            AppError::Config(
                "missing oauth client_id in profile settings. add it to your profile json"
                    .to_string(),
            )
        })?;

        let mut form = HashMap::from([
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", client_id),
        ]);

        if let Some(client_secret) = &self.client_secret {
            form.insert("client_secret", client_secret.clone());
        }

        let response = self
            .http
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await?;

        parse_token_response(response).await
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

async fn parse_token_response(response: reqwest::Response) -> AppResult<TokenGrant> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(map_token_error(status, &body))
}

/// Only 400 and 401 mean the provider refused this refresh token. Rate
/// limits, timeouts and server errors are worth retrying later.
fn map_token_error(status: reqwest::StatusCode, body: &str) -> AppError {
    let detail = match serde_json::from_str::<OAuthErrorResponse>(body) {
        Ok(payload) => format!(
            "{} ({})",
            payload
                .error
                .unwrap_or_else(|| "unknown_oauth_error".to_string()),
            payload
                .error_description
                .unwrap_or_else(|| "no description".to_string())
        ),
        Err(_) => body.trim().to_string(),
    };

    match status {
        reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::UNAUTHORIZED => {
            AppError::Auth(format!("token refresh rejected ({status}): {detail}"))
        }
        _ => AppError::Api(format!("token endpoint unavailable ({status}): {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn invalid_grant_is_an_auth_rejection() {
        let error = map_token_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );

        match error {
            AppError::Auth(message) => {
                assert!(message.contains("invalid_grant"));
                assert!(message.contains("expired or revoked"));
            }
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_server_error_is_transient() {
        let error = map_token_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(!matches!(error, AppError::Auth(_)));
    }

    #[test]
    fn rate_limits_and_timeouts_are_transient() {
        let throttled = map_token_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":"rate_limit_exceeded"}"#,
        );
        assert!(matches!(throttled, AppError::Api(ref message) if message.contains("rate_limit_exceeded")));

        let timed_out = map_token_error(StatusCode::REQUEST_TIMEOUT, "");
        assert!(matches!(timed_out, AppError::Api(_)));

        let unauthorized = map_token_error(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_client"}"#);
        assert!(matches!(unauthorized, AppError::Auth(_)));
    }

    #[test]
    fn grant_payload_accepts_millisecond_expiry() {
        let grant: TokenGrant = serde_json::from_str(
            r#"{"access_token":"a","expires_at":1700000000000,"scope":"email openid"}"#,
        )
        .expect("grant");
        let now = chrono::Utc::now();
        assert_eq!(grant.expiry_seconds(now).expect("expiry"), Some(1_700_000_000));
    }

    #[test]
    fn rejects_malformed_endpoint() {
        assert!(OAuthRefresher::new("not a url", "client", None).is_err());
    }

    #[tokio::test]
    async fn missing_client_id_fails_before_any_request() {
        let refresher = OAuthRefresher::from_settings(&Settings::default()).expect("refresher");
        let error = refresher.refresh("r").await.expect_err("no client id");
        assert!(matches!(error, AppError::Config(_)));
    }
}
