//! Credential resolution
//!
//! A credential secret carries either a long-lived OCM API token or a service
//! account id/secret pair. Older secrets have no `auth_method` key at all and
//! are treated as offline tokens, unless they carry a client id and secret, in
//! which case they are upgraded to the service-account method.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Secret;

use crate::Error;

/// Secret key selecting the auth method
pub const AUTH_METHOD_KEY: &str = "auth_method";
/// Secret key holding the offline token
pub const OCM_API_TOKEN_KEY: &str = "ocmAPIToken";
/// Secret key holding the service account client id
pub const CLIENT_ID_KEY: &str = "client_id";
/// Secret key holding the service account client secret
pub const CLIENT_SECRET_KEY: &str = "client_secret";

/// `auth_method` value for the offline-token flow
pub const OFFLINE_TOKEN: &str = "offline-token";
/// `auth_method` value for the service-account flow
pub const SERVICE_ACCOUNT: &str = "service-account";

/// Client id presented when refreshing an offline token
const CLOUD_SERVICES_CLIENT_ID: &str = "cloud-services";

/// How a credential is exchanged for an access token
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Refresh-token grant using a user's offline OCM API token
    OfflineToken {
        /// The long-lived token
        token: String,
    },
    /// Client-credentials grant using a service account
    ServiceAccount {
        /// Service account client id
        client_id: String,
        /// Service account client secret
        client_secret: String,
    },
}

impl AuthMethod {
    /// Value stored under `auth_method`
    pub fn name(&self) -> &'static str {
        match self {
            Self::OfflineToken { .. } => OFFLINE_TOKEN,
            Self::ServiceAccount { .. } => SERVICE_ACCOUNT,
        }
    }

    /// Form fields for the token endpoint
    pub fn grant_form(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::OfflineToken { token } => vec![
                ("grant_type", "refresh_token"),
                ("client_id", CLOUD_SERVICES_CLIENT_ID),
                ("refresh_token", token.as_str()),
            ],
            Self::ServiceAccount {
                client_id,
                client_secret,
            } => vec![
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ],
        }
    }
}

// Secrets stay out of logs
impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OfflineToken { .. } => f
                .debug_struct("OfflineToken")
                .field("token", &"<redacted>")
                .finish(),
            Self::ServiceAccount { client_id, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
        }
    }
}

/// A normalized request for the token exchanger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequest {
    /// Grant to use
    pub method: AuthMethod,
    /// Token endpoint base URL
    pub base_url: String,
}

/// Outcome of resolving a credential secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCredential {
    /// Method to exchange with
    pub method: AuthMethod,
    /// The secret had no `auth_method` but carries service-account fields;
    /// the caller should persist `service-account` back to it
    pub upgraded: bool,
}

/// Decode a Secret's data into string fields
///
/// `stringData` is honoured too, since fake clients and freshly applied
/// manifests may not have it folded into `data` yet.
pub fn credential_fields(secret: &Secret) -> Result<BTreeMap<String, String>, Error> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let mut fields = BTreeMap::new();

    for (key, value) in secret.data.iter().flatten() {
        let text = String::from_utf8(value.0.clone()).map_err(|_| {
            Error::credential_unavailable(&name, format!("key {key} is not valid UTF-8"))
        })?;
        fields.insert(key.clone(), text);
    }
    for (key, value) in secret.string_data.iter().flatten() {
        fields.insert(key.clone(), value.clone());
    }

    Ok(fields)
}

/// Pick the auth method described by a credential's fields
pub fn resolve(fields: &BTreeMap<String, String>) -> Result<ResolvedCredential, Error> {
    let field = |key: &str| {
        fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let (method_name, upgraded) = match field(AUTH_METHOD_KEY) {
        Some(explicit) => (explicit, false),
        None if field(CLIENT_ID_KEY).is_some() && field(CLIENT_SECRET_KEY).is_some() => {
            (SERVICE_ACCOUNT.to_string(), true)
        }
        None => (OFFLINE_TOKEN.to_string(), false),
    };

    let method = match method_name.as_str() {
        OFFLINE_TOKEN => AuthMethod::OfflineToken {
            token: field(OCM_API_TOKEN_KEY).ok_or_else(|| {
                Error::bad_credential(format!("{OFFLINE_TOKEN} requires {OCM_API_TOKEN_KEY}"))
            })?,
        },
        SERVICE_ACCOUNT => match (field(CLIENT_ID_KEY), field(CLIENT_SECRET_KEY)) {
            (Some(client_id), Some(client_secret)) => AuthMethod::ServiceAccount {
                client_id,
                client_secret,
            },
            _ => {
                return Err(Error::bad_credential(format!(
                    "{SERVICE_ACCOUNT} requires {CLIENT_ID_KEY} and {CLIENT_SECRET_KEY}"
                )))
            }
        },
        other => {
            return Err(Error::bad_credential(format!(
                "unknown {AUTH_METHOD_KEY} '{other}', expected {OFFLINE_TOKEN} or {SERVICE_ACCOUNT}"
            )))
        }
    };

    Ok(ResolvedCredential { method, upgraded })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Story: Legacy secrets keep working without an auth method
    #[test]
    fn story_missing_method_defaults_to_offline_token() {
        let resolved = resolve(&fields(&[("ocmAPIToken", "dummytoken\n")])).unwrap();

        assert!(!resolved.upgraded);
        assert_eq!(
            resolved.method,
            AuthMethod::OfflineToken {
                token: "dummytoken".to_string()
            }
        );
    }

    /// Story: A legacy secret with service account fields is upgraded
    ///
    /// The caller persists `service-account` so later passes take the
    /// explicit path.
    #[test]
    fn story_client_pair_without_method_is_upgraded() {
        let resolved = resolve(&fields(&[
            ("ocmAPIToken", "stale"),
            ("client_id", "svc-id"),
            ("client_secret", "svc-secret"),
        ]))
        .unwrap();

        assert!(resolved.upgraded);
        assert_eq!(resolved.method.name(), SERVICE_ACCOUNT);
    }

    #[test]
    fn explicit_method_is_never_upgraded() {
        let resolved = resolve(&fields(&[
            ("auth_method", "offline-token"),
            ("ocmAPIToken", "tok"),
            ("client_id", "svc-id"),
            ("client_secret", "svc-secret"),
        ]))
        .unwrap();

        assert!(!resolved.upgraded);
        assert_eq!(resolved.method.name(), OFFLINE_TOKEN);
    }

    #[test]
    fn missing_fields_are_bad_format() {
        let cases = [
            fields(&[]),
            fields(&[("auth_method", "service-account"), ("client_id", "only-id")]),
            fields(&[("auth_method", "offline-token"), ("ocmAPIToken", "  ")]),
            fields(&[("auth_method", "kerberos"), ("ocmAPIToken", "tok")]),
        ];

        for case in cases {
            let err = resolve(&case).unwrap_err();
            assert!(matches!(err, Error::BadCredentialFormat(_)), "{case:?}: {err}");
            assert!(err.requires_cleanup());
        }
    }

    #[test]
    fn grant_forms_match_token_endpoint_contract() {
        let offline = AuthMethod::OfflineToken {
            token: "tok".to_string(),
        };
        assert_eq!(
            offline.grant_form(),
            vec![
                ("grant_type", "refresh_token"),
                ("client_id", "cloud-services"),
                ("refresh_token", "tok"),
            ]
        );

        let sa = AuthMethod::ServiceAccount {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        };
        assert_eq!(sa.grant_form()[0], ("grant_type", "client_credentials"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let sa = AuthMethod::ServiceAccount {
            client_id: "svc-id".to_string(),
            client_secret: "hunter2".to_string(),
        };
        let rendered = format!("{sa:?}");
        assert!(rendered.contains("svc-id"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn secret_data_and_string_data_are_merged() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                "ocmAPIToken".to_string(),
                ByteString(b"from-data".to_vec()),
            )])),
            string_data: Some(BTreeMap::from([(
                "auth_method".to_string(),
                "offline-token".to_string(),
            )])),
            ..Default::default()
        };

        let decoded = credential_fields(&secret).unwrap();
        assert_eq!(decoded["ocmAPIToken"], "from-data");
        assert_eq!(decoded["auth_method"], "offline-token");
    }

    #[test]
    fn non_utf8_secret_data_is_unavailable() {
        let mut secret = Secret {
            data: Some(BTreeMap::from([(
                "ocmAPIToken".to_string(),
                ByteString(vec![0xff, 0xfe]),
            )])),
            ..Default::default()
        };
        secret.metadata.name = Some("ocm-api-token".to_string());

        let err = credential_fields(&secret).unwrap_err();
        assert!(matches!(err, Error::CredentialUnavailable { .. }));
    }
}
