//! Token exchange against the Red Hat SSO token endpoint

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use super::credentials::AuthRequest;
use crate::error::AuthFailure;
use crate::Error;

/// Token endpoint path under the auth base URL
pub const TOKEN_PATH: &str = "/auth/realms/redhat-external/protocol/openid-connect/token";

/// Description the endpoint uses for a revoked or expired offline token
const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token";

/// Successful token endpoint response
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenResponse {
    /// Short-lived bearer token
    pub access_token: String,
    /// Lifetime of `access_token` in seconds
    pub expires_in: i64,
    /// Lifetime of `refresh_token` in seconds
    pub refresh_expires_in: i64,
    /// Rotated refresh token
    pub refresh_token: String,
    /// Usually `Bearer`
    pub token_type: String,
    /// OIDC id token
    pub id_token: String,
    /// Keycloak not-before policy
    #[serde(rename = "not-before-policy")]
    pub not_before_policy: i64,
    /// Keycloak session
    pub session_state: String,
    /// Granted scopes
    pub scope: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenErrorBody {
    error: String,
    error_description: String,
}

/// Exchanges a long-lived credential for a bearer token
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Run the grant described by `request` and return the access token
    async fn exchange(&self, request: &AuthRequest) -> Result<String, Error>;
}

/// [`TokenExchanger`] backed by reqwest
#[derive(Clone, Debug)]
pub struct HttpTokenExchanger {
    client: reqwest::Client,
}

impl HttpTokenExchanger {
    /// Create an exchanger whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    #[instrument(skip(self, request), fields(method = request.method.name()))]
    async fn exchange(&self, request: &AuthRequest) -> Result<String, Error> {
        let url = format!("{}{TOKEN_PATH}", request.base_url);

        let response = self
            .client
            .post(&url)
            .form(&request.method.grant_form())
            .send()
            .await
            .map_err(|e| {
                Error::auth(
                    AuthFailure::Transient,
                    0,
                    "request_failed",
                    format!("token request failed: {e}"),
                )
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            Error::auth(
                AuthFailure::Transient,
                status,
                "read_failed",
                format!("failed to read token response: {e}"),
            )
        })?;

        let token = parse_token_response(status, &body)?;
        debug!(status, "access token issued");
        Ok(token)
    }
}

/// Turn a token endpoint response into an access token or a classified error
pub fn parse_token_response(status: u16, body: &[u8]) -> Result<String, Error> {
    if !(200..300).contains(&status) {
        return Err(classify_token_error(status, body));
    }

    let token: TokenResponse = serde_json::from_slice(body)
        .map_err(|e| Error::malformed("token", e.to_string(), body))?;

    if token.access_token.is_empty() {
        return Err(Error::MissingAccessToken);
    }
    Ok(token.access_token)
}

fn classify_token_error(status: u16, body: &[u8]) -> Error {
    let parsed: TokenErrorBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Error::malformed(
                "token",
                format!("HTTP {status}: unparseable error body: {e}"),
                body,
            )
        }
    };

    if parsed.error.is_empty() || parsed.error_description.is_empty() {
        return Error::malformed(
            "token",
            format!("HTTP {status}: error body lacks error or error_description"),
            body,
        );
    }

    let class = match parsed.error.as_str() {
        _ if parsed.error_description == INVALID_REFRESH_TOKEN => AuthFailure::Unrecoverable,
        "invalid_grant" => AuthFailure::Unrecoverable,
        "invalid_client" | "unauthorized_client" => AuthFailure::InvalidClient,
        _ if status == 401 || status == 403 => AuthFailure::Unauthorized,
        _ => AuthFailure::Transient,
    };

    Error::auth(class, status, parsed.error, parsed.error_description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn class_of(err: &Error) -> Option<AuthFailure> {
        match err {
            Error::Auth { class, .. } => Some(*class),
            _ => None,
        }
    }

    #[rstest]
    #[case(400, "invalid_grant", "Invalid refresh token", AuthFailure::Unrecoverable)]
    #[case(400, "invalid_grant", "Token is not active", AuthFailure::Unrecoverable)]
    #[case(400, "invalid_request", "Invalid refresh token", AuthFailure::Unrecoverable)]
    #[case(401, "invalid_client", "Invalid client credentials", AuthFailure::InvalidClient)]
    #[case(400, "unauthorized_client", "Client not allowed", AuthFailure::InvalidClient)]
    #[case(401, "access_denied", "Not permitted", AuthFailure::Unauthorized)]
    #[case(403, "forbidden", "Account disabled", AuthFailure::Unauthorized)]
    #[case(503, "temporarily_unavailable", "Try again", AuthFailure::Transient)]
    #[case(429, "slow_down", "Too many requests", AuthFailure::Transient)]
    #[case(400, "invalid_request", "Missing form parameter", AuthFailure::Transient)]
    fn token_errors_are_classified(
        #[case] status: u16,
        #[case] tag: &str,
        #[case] description: &str,
        #[case] expected: AuthFailure,
    ) {
        let body = serde_json::json!({"error": tag, "error_description": description}).to_string();
        let err = parse_token_response(status, body.as_bytes()).unwrap_err();

        assert_eq!(class_of(&err), Some(expected), "{status} {tag}");
        if let Error::Auth { code, tag: t, .. } = &err {
            assert_eq!(*code, status);
            assert_eq!(t, tag);
        }
    }

    #[test]
    fn unparseable_error_body_keeps_raw_bytes() {
        let err = parse_token_response(502, b"<html>Bad Gateway</html>").unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.raw_body(), Some("<html>Bad Gateway</html>"));
    }

    #[test]
    fn error_body_without_description_is_malformed() {
        let err = parse_token_response(400, br#"{"error":"invalid_grant"}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
        assert!(!err.requires_cleanup());
    }

    /// Story: A 200 without a token is never treated as success
    #[test]
    fn story_success_without_access_token_is_an_error() {
        let err = parse_token_response(200, br#"{"token_type":"Bearer","expires_in":900}"#)
            .unwrap_err();
        assert!(matches!(err, Error::MissingAccessToken));
        assert!(err.is_transient());
    }

    #[test]
    fn success_returns_access_token() {
        let body = br#"{"access_token":"eyJhbGciOi","expires_in":900,"not-before-policy":0,"token_type":"Bearer"}"#;
        assert_eq!(parse_token_response(200, body).unwrap(), "eyJhbGciOi");
    }
}
