// Instance metadata access for Compute Engine guests
//
// This crate wraps the local, credential-free metadata server so that the
// claiming binaries can learn which project, zone and instance they run in,
// and obtain an access token for the compute API.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Base URL of the metadata server as seen from inside an instance.
pub const DEFAULT_ENDPOINT: &str = "http://metadata.google.internal/computeMetadata/v1";

pub const PROJECT_ID_KEY: &str = "project/project-id";
pub const ZONE_KEY: &str = "instance/zone";
pub const HOSTNAME_KEY: &str = "instance/hostname";
pub const TOKEN_KEY: &str = "instance/service-accounts/default/token";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata request for {key} failed")]
    Transport {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("metadata server answered {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("metadata value for {key} is malformed: {value:?}")]
    Malformed { key: String, value: String },

    #[error("token response for {key} is not valid JSON")]
    Token {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that can answer "fetch a named metadata key as a string".
#[async_trait]
pub trait Metadata: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, MetadataError>;
}

/// HTTP client for the metadata server.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    endpoint: String,
}

impl MetadataClient {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl Metadata for MetadataClient {
    async fn get(&self, key: &str) -> Result<String, MetadataError> {
        let url = self.url_for(key);
        debug!("GET {}", url);

        let transport = |source| MetadataError::Transport {
            key: key.to_string(),
            source,
        };

        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(MetadataError::Status {
                key: key.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(transport)?;
        Ok(body.trim().to_string())
    }
}

/// Who the running instance is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub project: String,
    pub zone: String,
    pub instance: String,
}

impl InstanceIdentity {
    pub async fn resolve<M: Metadata + ?Sized>(metadata: &M) -> Result<Self, MetadataError> {
        let project = metadata.get(PROJECT_ID_KEY).await?;
        if project.is_empty() {
            return Err(MetadataError::Malformed {
                key: PROJECT_ID_KEY.to_string(),
                value: project,
            });
        }

        let raw_zone = metadata.get(ZONE_KEY).await?;
        let zone = zone_from_path(&raw_zone)
            .ok_or_else(|| MetadataError::Malformed {
                key: ZONE_KEY.to_string(),
                value: raw_zone.clone(),
            })?
            .to_string();

        let raw_hostname = metadata.get(HOSTNAME_KEY).await?;
        let instance = instance_from_hostname(&raw_hostname)
            .ok_or_else(|| MetadataError::Malformed {
                key: HOSTNAME_KEY.to_string(),
                value: raw_hostname.clone(),
            })?
            .to_string();

        Ok(Self {
            project,
            zone,
            instance,
        })
    }
}

/// `projects/123456/zones/europe-west1-b` -> `europe-west1-b`
pub fn zone_from_path(raw: &str) -> Option<&str> {
    raw.trim().rsplit('/').next().filter(|zone| !zone.is_empty())
}

/// `db-1.c.my-project.internal` -> `db-1`
pub fn instance_from_hostname(raw: &str) -> Option<&str> {
    raw.trim().split('.').next().filter(|name| !name.is_empty())
}

/// OAuth2 token handed out by the metadata server for the default service account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: u64,
}

pub async fn access_token<M: Metadata + ?Sized>(metadata: &M) -> Result<AccessToken, MetadataError> {
    let raw = metadata.get(TOKEN_KEY).await?;
    serde_json::from_str(&raw).map_err(|source| MetadataError::Token {
        key: TOKEN_KEY.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticMetadata(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl Metadata for StaticMetadata {
        async fn get(&self, key: &str) -> Result<String, MetadataError> {
            self.0
                .get(key)
                .map(|v| v.to_string())
                .ok_or_else(|| MetadataError::Status {
                    key: key.to_string(),
                    status: 404,
                })
        }
    }

    #[test]
    fn zone_is_last_path_segment() {
        assert_eq!(
            zone_from_path("projects/123456789/zones/us-central1-a"),
            Some("us-central1-a")
        );
        assert_eq!(zone_from_path("us-east1-b"), Some("us-east1-b"));
        assert_eq!(zone_from_path("projects/1/zones/"), None);
    }

    #[test]
    fn instance_is_first_hostname_label() {
        assert_eq!(
            instance_from_hostname("new-host.c.my-project.internal"),
            Some("new-host")
        );
        assert_eq!(instance_from_hostname("bare"), Some("bare"));
        assert_eq!(instance_from_hostname(".internal"), None);
    }

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let client = MetadataClient::with_endpoint("http://127.0.0.1:8080/computeMetadata/v1/");
        assert_eq!(
            client.url_for("instance/zone"),
            "http://127.0.0.1:8080/computeMetadata/v1/instance/zone"
        );
    }

    #[tokio::test]
    async fn resolves_identity_from_metadata() {
        let metadata = StaticMetadata(HashMap::from([
            (PROJECT_ID_KEY, "my-project"),
            (ZONE_KEY, "projects/42/zones/europe-west1-b"),
            (HOSTNAME_KEY, "new-host.c.my-project.internal"),
        ]));

        let identity = InstanceIdentity::resolve(&metadata).await.unwrap();
        assert_eq!(
            identity,
            InstanceIdentity {
                project: "my-project".into(),
                zone: "europe-west1-b".into(),
                instance: "new-host".into(),
            }
        );
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let metadata = StaticMetadata(HashMap::from([(PROJECT_ID_KEY, "my-project")]));

        let err = InstanceIdentity::resolve(&metadata).await.unwrap_err();
        assert!(matches!(err, MetadataError::Status { ref key, status: 404 } if key == ZONE_KEY));
    }

    #[tokio::test]
    async fn parses_token_response() {
        let metadata = StaticMetadata(HashMap::from([(
            TOKEN_KEY,
            r#"{"access_token":"ya29.abc","expires_in":3599,"token_type":"Bearer"}"#,
        )]));

        let token = access_token(&metadata).await.unwrap();
        assert_eq!(token.access_token, "ya29.abc");
        assert_eq!(token.expires_in, 3599);
    }

    #[tokio::test]
    async fn unreadable_token_keeps_the_parse_error() {
        let metadata = StaticMetadata(HashMap::from([(TOKEN_KEY, "<html>quota exceeded</html>")]));

        let err = access_token(&metadata).await.unwrap_err();
        assert!(matches!(err, MetadataError::Token { ref key, .. } if key == TOKEN_KEY));

        let cause = std::error::Error::source(&err).expect("parse error is kept as the source");
        assert!(cause.is::<serde_json::Error>());
    }
}
