use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gce_metadata::Metadata;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{AttachedDiskSpec, ComputeApi, Disk, Instance, Location, Operation};
use crate::error::ClaimError;

// Tokens are renewed this long before the metadata server says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceList {
    #[serde(default)]
    items: Vec<Instance>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Access tokens of the instance's default service account, fetched from
/// the metadata server and reused until close to expiry.
struct TokenCache {
    metadata: Arc<dyn Metadata>,
    current: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    fn new(metadata: Arc<dyn Metadata>) -> Self {
        Self {
            metadata,
            current: Mutex::new(None),
        }
    }

    async fn bearer(&self) -> Result<String, ClaimError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = gce_metadata::access_token(self.metadata.as_ref()).await?;
        debug!("Fetched access token valid for {}s", fresh.expires_in);

        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *current = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(fresh.access_token)
    }
}

/// `ComputeApi` over the compute v1 REST API.
pub struct RestCompute {
    http: reqwest::Client,
    endpoint: String,
    tokens: TokenCache,
}

impl RestCompute {
    pub fn new(endpoint: impl Into<String>, metadata: Arc<dyn Metadata>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens: TokenCache::new(metadata),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn zone_url(&self, location: &Location, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/zones/{}/{}",
            self.endpoint, location.project, location.zone, path
        )
    }

    async fn send_raw(&self, request: RequestBuilder) -> Result<Response, ClaimError> {
        let token = self.tokens.bearer().await?;
        Ok(request.bearer_auth(token).send().await?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClaimError> {
        let response = self.send_raw(request).await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, ClaimError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClaimError::Api {
        status: status.as_u16(),
        message: api_error_message(&body),
    })
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl ComputeApi for RestCompute {
    async fn get_disk(&self, location: &Location, disk: &str) -> Result<Disk, ClaimError> {
        let url = self.zone_url(location, &format!("disks/{}", disk));
        debug!("GET {}", url);

        let response = self.send_raw(self.http.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClaimError::DiskNotFound {
                disk: disk.to_string(),
                project: location.project.clone(),
                zone: location.zone.clone(),
            });
        }

        Ok(check_status(response).await?.json().await?)
    }

    async fn list_instances(&self, location: &Location) -> Result<Vec<Instance>, ClaimError> {
        let url = self.zone_url(location, "instances");
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            debug!("GET {} (page token: {:?})", url, page_token);

            let page: InstanceList = self.send(request).await?.json().await?;
            instances.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(instances)
    }

    async fn detach_disk(
        &self,
        location: &Location,
        instance: &str,
        device_name: &str,
    ) -> Result<Operation, ClaimError> {
        let url = self.zone_url(location, &format!("instances/{}/detachDisk", instance));
        debug!("POST {} deviceName={}", url, device_name);

        let request = self
            .http
            .post(&url)
            .query(&[("deviceName", device_name)])
            .header(CONTENT_LENGTH, 0);

        Ok(self.send(request).await?.json().await?)
    }

    async fn attach_disk(
        &self,
        location: &Location,
        instance: &str,
        disk: &AttachedDiskSpec,
    ) -> Result<Operation, ClaimError> {
        let url = self.zone_url(location, &format!("instances/{}/attachDisk", instance));
        debug!("POST {} source={}", url, disk.source);

        let request = self.http.post(&url).json(disk);

        Ok(self.send(request).await?.json().await?)
    }

    async fn get_operation(
        &self,
        location: &Location,
        operation: &str,
    ) -> Result<Operation, ClaimError> {
        let url = self.zone_url(location, &format!("operations/{}", operation));
        debug!("GET {}", url);

        Ok(self.send(self.http.get(&url)).await?.json().await?)
    }
}
