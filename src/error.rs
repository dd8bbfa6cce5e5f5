//! Error types for the discovery operator
//!
//! Every failure a discovery pass can hit maps to one variant here. The
//! reconciler never inspects error strings: it asks the error how to react
//! through [`Error::requires_cleanup`], [`Error::is_transient`] and
//! [`Error::is_retryable`].

use std::fmt;

use thiserror::Error;

/// How the token endpoint rejected a credential
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    /// The long-lived credential itself is dead (revoked or invalid refresh token)
    Unrecoverable,
    /// The client id/secret pair was rejected
    InvalidClient,
    /// The endpoint refused access for this credential
    Unauthorized,
    /// Network failure, rate limiting or a server-side error
    Transient,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrecoverable => write!(f, "unrecoverable"),
            Self::InvalidClient => write!(f, "invalid-client"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Main error type for discovery operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The referenced credential secret is missing or cannot be read
    #[error("credential {secret} unavailable: {message}")]
    CredentialUnavailable {
        /// Name of the credential secret
        secret: String,
        /// What went wrong
        message: String,
    },

    /// The credential secret does not carry the fields its auth method needs
    #[error("bad credential format: {0}")]
    BadCredentialFormat(String),

    /// The token endpoint rejected the exchange
    #[error("token exchange failed [{class}] (HTTP {code}) {tag}: {description}")]
    Auth {
        /// Classification driving the reconciler reaction
        class: AuthFailure,
        /// HTTP status code, 0 when no response was received
        code: u16,
        /// Machine-readable error tag (`error` field)
        tag: String,
        /// Human-readable description (`error_description` field)
        description: String,
    },

    /// The token endpoint answered 2xx without an access token
    #[error("missing `access_token` in response")]
    MissingAccessToken,

    /// Inventory request failed in a way worth retrying next pass
    #[error("inventory fetch failed{}: {message}", .code.map(|c| format!(" (HTTP {c})")).unwrap_or_default())]
    FetchTransient {
        /// HTTP status code if a response was received
        code: Option<u16>,
        /// What went wrong
        message: String,
    },

    /// A remote endpoint answered with a body of unexpected shape
    #[error("malformed response from {endpoint}: {message}")]
    MalformedResponse {
        /// Which endpoint produced the body (`token` or `inventory`)
        endpoint: String,
        /// Parse failure detail
        message: String,
        /// Raw response body kept for diagnostics
        raw: String,
    },

    /// The store detected a concurrent modification
    #[error("write conflict on {name}: object was modified concurrently")]
    WriteConflict {
        /// Name of the record that could not be written
        name: String,
    },

    /// One create/update/delete failed partway through applying a pass
    #[error("failed to {action} {name}: {source}")]
    ApplyPartialFailure {
        /// Mutation that failed (create, update, delete)
        action: &'static str,
        /// Name of the record being mutated
        name: String,
        /// The store error behind the failure
        #[source]
        source: Box<Error>,
    },

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal/operational error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a bad credential format error
    pub fn bad_credential(msg: impl Into<String>) -> Self {
        Self::BadCredentialFormat(msg.into())
    }

    /// Create a credential-unavailable error for the named secret
    pub fn credential_unavailable(secret: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CredentialUnavailable {
            secret: secret.into(),
            message: msg.into(),
        }
    }

    /// Create an auth error with full context
    pub fn auth(
        class: AuthFailure,
        code: u16,
        tag: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::Auth {
            class,
            code,
            tag: tag.into(),
            description: description.into(),
        }
    }

    /// Create a transient inventory fetch error
    pub fn fetch_transient(code: Option<u16>, msg: impl Into<String>) -> Self {
        Self::FetchTransient {
            code,
            message: msg.into(),
        }
    }

    /// Create a malformed-response error retaining the raw body
    pub fn malformed(endpoint: impl Into<String>, msg: impl Into<String>, raw: &[u8]) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.into(),
            message: msg.into(),
            raw: String::from_utf8_lossy(raw).into_owned(),
        }
    }

    /// Create a write-conflict error
    pub fn write_conflict(name: impl Into<String>) -> Self {
        Self::WriteConflict { name: name.into() }
    }

    /// Wrap a store error raised while applying one mutation
    pub fn apply_failed(action: &'static str, name: impl Into<String>, source: Error) -> Self {
        Self::ApplyPartialFailure {
            action,
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The credential can no longer be trusted and every record it discovered
    /// must be removed
    pub fn requires_cleanup(&self) -> bool {
        match self {
            Error::CredentialUnavailable { .. } | Error::BadCredentialFormat(_) => true,
            Error::Auth { class, .. } => *class != AuthFailure::Transient,
            _ => false,
        }
    }

    /// Remote-side hiccup: abort the pass without touching local records
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Auth { class, .. } => *class == AuthFailure::Transient,
            Error::MissingAccessToken
            | Error::FetchTransient { .. }
            | Error::MalformedResponse { .. } => true,
            _ => false,
        }
    }

    /// Check if retrying the same operation can succeed without a config change
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::WriteConflict { .. } => true,
            Error::ApplyPartialFailure { source, .. } => source.is_retryable(),
            Error::Validation(_) => false,
            other => other.is_transient(),
        }
    }

    /// Raw response body for malformed responses
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Error::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
