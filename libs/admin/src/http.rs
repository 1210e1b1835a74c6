//! HTTP client for the cluster admin API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::api::AdminApi;
use crate::error::{AdminError, Result};
use crate::idp::{IdpConfig, IdpConfigInfo, IdpKind};
use crate::types::{
    AccountStatus, BucketSpec, GroupInfo, GroupMembersUpdate, LifecycleConfig, TierConfig,
    TierCredentials, TierInfo, UserInfo,
};

/// Error code the cluster returns for a bucket without lifecycle rules.
const NO_LIFECYCLE_CODE: &str = "NoSuchLifecycleConfiguration";

/// Connection settings for [`HttpAdminClient`].
#[derive(Clone)]
pub struct AdminConfig {
    /// Cluster endpoint, e.g. `https://minio.internal:9000`.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct AddUserRequest<'a> {
    secret_key: &'a str,
}

#[derive(Serialize)]
struct StatusRequest {
    status: AccountStatus,
}

#[derive(Serialize)]
struct IdpConfigRequest {
    config: String,
}

#[derive(Deserialize)]
struct IdpConfigResponse {
    #[serde(default)]
    restart_required: bool,
}

/// Admin API client speaking JSON over HTTP.
pub struct HttpAdminClient {
    client: reqwest::Client,
    base_url: Url,
    access_key: String,
    secret_key: String,
}

impl HttpAdminClient {
    /// Create a new admin client.
    pub fn new(config: &AdminConfig) -> Result<Self> {
        let base_url = Url::parse(&config.endpoint)
            .map_err(|e| AdminError::Invalid(format!("invalid endpoint {}: {e}", config.endpoint)))?;
        if base_url.cannot_be_a_base() {
            return Err(AdminError::Invalid(format!(
                "endpoint {} cannot be used as a base URL",
                config.endpoint
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AdminError::Invalid("endpoint cannot be used as a base URL".into()))?
            .pop_if_empty()
            .extend(["admin", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let url = self.url(segments)?;
        debug!(method = %method, url = %url, "Admin API request");
        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.access_key, Some(&self.secret_key)))
    }

    /// Send a request and turn non-success statuses into errors.
    async fn send(&self, request: RequestBuilder, kind: &'static str, name: &str) -> Result<Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(into_error(response, kind, name).await)
    }
}

/// Decode a JSON response body.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

async fn into_error(response: Response, kind: &'static str, name: &str) -> AdminError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<ApiErrorBody>(&body).ok();

    if status == StatusCode::NOT_FOUND {
        if parsed.as_ref().is_some_and(|p| p.code == NO_LIFECYCLE_CODE) {
            return AdminError::not_found("lifecycle configuration", name);
        }
        return AdminError::not_found(kind, name);
    }

    let (code, message) = match parsed {
        Some(p) => (p.code, p.message),
        None => (status.canonical_reason().unwrap_or("Unknown").to_string(), body),
    };
    error!(status = %status, code = %code, message = %message, "Admin API request failed");
    AdminError::api(status.as_u16(), code, message)
}

#[async_trait]
impl AdminApi for HttpAdminClient {
    async fn get_user(&self, access_key: &str) -> Result<UserInfo> {
        let request = self.request(Method::GET, &["users", access_key])?;
        let response = self.send(request, "user", access_key).await?;
        decode(response).await
    }

    async fn add_user(&self, access_key: &str, secret_key: &str) -> Result<()> {
        let request = self
            .request(Method::PUT, &["users", access_key])?
            .json(&AddUserRequest { secret_key });
        self.send(request, "user", access_key).await?;
        Ok(())
    }

    async fn set_user_status(&self, access_key: &str, status: AccountStatus) -> Result<()> {
        let request = self
            .request(Method::PUT, &["users", access_key, "status"])?
            .json(&StatusRequest { status });
        self.send(request, "user", access_key).await?;
        Ok(())
    }

    async fn remove_user(&self, access_key: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &["users", access_key])?;
        self.send(request, "user", access_key).await?;
        Ok(())
    }

    async fn get_group(&self, name: &str) -> Result<GroupInfo> {
        let request = self.request(Method::GET, &["groups", name])?;
        let response = self.send(request, "group", name).await?;
        decode(response).await
    }

    async fn update_group_members(&self, update: &GroupMembersUpdate) -> Result<()> {
        let request = self
            .request(Method::POST, &["groups", &update.group, "members"])?
            .json(update);
        self.send(request, "group", &update.group).await?;
        Ok(())
    }

    async fn set_group_status(&self, name: &str, status: AccountStatus) -> Result<()> {
        let request = self
            .request(Method::PUT, &["groups", name, "status"])?
            .json(&StatusRequest { status });
        self.send(request, "group", name).await?;
        Ok(())
    }

    async fn remove_group(&self, name: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &["groups", name])?;
        self.send(request, "group", name).await?;
        Ok(())
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        let request = self.request(Method::HEAD, &["buckets", name])?;
        match self.send(request, "bucket", name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn make_bucket(&self, spec: &BucketSpec) -> Result<()> {
        let request = self
            .request(Method::PUT, &["buckets", &spec.name])?
            .json(spec);
        self.send(request, "bucket", &spec.name).await?;
        Ok(())
    }

    async fn remove_bucket(&self, name: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &["buckets", name])?;
        self.send(request, "bucket", name).await?;
        Ok(())
    }

    async fn get_bucket_lifecycle(&self, bucket: &str) -> Result<Option<LifecycleConfig>> {
        let request = self.request(Method::GET, &["buckets", bucket, "lifecycle"])?;
        match self.send(request, "bucket", bucket).await {
            Ok(response) => Ok(Some(decode(response).await?)),
            Err(AdminError::NotFound {
                kind: "lifecycle configuration",
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_bucket_lifecycle(&self, bucket: &str, config: &LifecycleConfig) -> Result<()> {
        let request = if config.rules.is_empty() {
            self.request(Method::DELETE, &["buckets", bucket, "lifecycle"])?
        } else {
            config.validate()?;
            self.request(Method::PUT, &["buckets", bucket, "lifecycle"])?
                .json(config)
        };
        self.send(request, "bucket", bucket).await?;
        Ok(())
    }

    async fn list_tiers(&self) -> Result<Vec<TierInfo>> {
        let request = self.request(Method::GET, &["tiers"])?;
        let response = self.send(request, "tiers", "").await?;
        decode(response).await
    }

    async fn add_tier(&self, tier: &TierConfig) -> Result<()> {
        tier.validate()?;
        let request = self.request(Method::POST, &["tiers"])?.json(tier);
        self.send(request, "tier", &tier.info.name).await?;
        Ok(())
    }

    async fn edit_tier_credentials(
        &self,
        name: &str,
        credentials: &TierCredentials,
    ) -> Result<()> {
        let request = self
            .request(Method::PUT, &["tiers", name, "credentials"])?
            .json(credentials);
        self.send(request, "tier", name).await?;
        Ok(())
    }

    async fn remove_tier(&self, name: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &["tiers", name])?;
        self.send(request, "tier", name).await?;
        Ok(())
    }

    async fn get_idp_config(&self, kind: IdpKind, name: &str) -> Result<IdpConfigInfo> {
        let request = self.request(Method::GET, &["idp", kind.as_str(), name])?;
        let response = self.send(request, "identity provider", name).await?;
        decode(response).await
    }

    async fn set_idp_config(&self, config: &IdpConfig) -> Result<bool> {
        let body = IdpConfigRequest {
            config: config.to_kv_string()?,
        };
        let request = self
            .request(Method::PUT, &["idp", config.kind().as_str(), config.name()])?
            .json(&body);
        let response = self.send(request, "identity provider", config.name()).await?;
        let parsed: IdpConfigResponse = decode(response).await?;
        Ok(parsed.restart_required)
    }

    async fn delete_idp_config(&self, kind: IdpKind, name: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &["idp", kind.as_str(), name])?;
        self.send(request, "identity provider", name).await?;
        Ok(())
    }
}
