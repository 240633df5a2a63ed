//! `reqwest` implementation of the management API facade.

use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use border0_core::{Border0Error, Border0Result, SocketRef, SocketType};

use super::types::{CreateSocket, Policy, PolicyUpdate};
use super::SocketApi;
use crate::backoff::BackoffConfig;

pub const DEFAULT_API_RETRIES: u32 = 3;
pub const DEFAULT_PAGE_SIZE: usize = 100;

const TOKEN_HEADER: &str = "x-access-token";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Border0 REST client. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: String,
    retries: u32,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Border0Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Border0Error::Config(format!("invalid api url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Border0Error::Config(format!("invalid api url: {base_url}")));
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Border0Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
            retries: DEFAULT_API_RETRIES,
            backoff: BackoffConfig::default(),
        })
    }

    /// Override how often transient failures (429, 5xx, network) are retried.
    pub fn with_retries(mut self, retries: u32, backoff: BackoffConfig) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    /// `GET /socket/{name}`
    pub async fn socket(&self, name: &str) -> Border0Result<SocketRef> {
        let url = self.url(&["socket", name])?;
        let resp = self.execute(Method::GET, url, &[], None).await?;
        decode(resp).await
    }

    /// `POST /socket`
    pub async fn create_socket(
        &self,
        name: &str,
        socket_type: SocketType,
    ) -> Border0Result<SocketRef> {
        let body = CreateSocket {
            name: name.to_string(),
            socket_type,
        };
        let url = self.url(&["socket"])?;
        let resp = self
            .execute(Method::POST, url, &[], Some(to_json(&body)?))
            .await?;
        decode(resp).await
    }

    /// `GET /policies/find?name=`
    pub async fn find_policy(&self, name: &str) -> Border0Result<Policy> {
        let url = self.url(&["policies", "find"])?;
        let resp = self
            .execute(Method::GET, url, &[("name", name.to_string())], None)
            .await
            .map_err(|e| match e {
                Border0Error::NotFound(_) => Border0Error::NotFound(format!("policy {name}")),
                other => other,
            })?;
        decode(resp).await
    }

    /// Every policy in the organization, following pages until a short one.
    pub async fn policies(&self, page_size: usize) -> Border0Result<Vec<Policy>> {
        let page_size = page_size.max(1);
        let url = self.url(&["policies"])?;
        let mut all = Vec::new();
        let mut page = 1usize;
        loop {
            let query = [
                ("page", page.to_string()),
                ("page_size", page_size.to_string()),
            ];
            let resp = self.execute(Method::GET, url.clone(), &query, None).await?;
            let batch: Vec<Policy> = decode(resp).await?;
            let short = batch.len() < page_size;
            all.extend(batch);
            if short {
                return Ok(all);
            }
            page += 1;
        }
    }

    /// `PUT /socket/{id}/policy`
    pub async fn update_socket_policies(
        &self,
        socket_id: Uuid,
        update: &PolicyUpdate,
    ) -> Border0Result<()> {
        let url = self.url(&["socket", &socket_id.to_string(), "policy"])?;
        self.execute(Method::PUT, url, &[], Some(to_json(update)?))
            .await?;
        Ok(())
    }

    fn url(&self, segments: &[&str]) -> Border0Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Border0Error::Config(format!("invalid api url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send one request, retrying transient failures with backoff.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Border0Result<Response> {
        let mut attempt = 0u32;
        loop {
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header(TOKEN_HEADER, &self.token);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = &body {
                req = req.json(body);
            }

            let err = match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    status_error(status, text)
                }
                Err(e) => Border0Error::Transient(format!("{method} {}: {e}", url.path())),
            };

            if !matches!(err, Border0Error::Transient(_)) || attempt >= self.retries {
                return Err(err);
            }
            let delay = self.backoff.delay(attempt);
            attempt += 1;
            warn!(
                method = %method,
                path = url.path(),
                attempt,
                error = %err,
                "retrying api request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl SocketApi for ApiClient {
    async fn ensure_socket(
        &self,
        name: &str,
        socket_type: SocketType,
    ) -> Border0Result<(SocketRef, bool)> {
        match self.socket(name).await {
            Ok(socket) => return Ok((socket, false)),
            Err(Border0Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.create_socket(name, socket_type).await {
            Ok(socket) => {
                info!(name, socket_id = %socket.socket_id, "socket created");
                Ok((socket, true))
            }
            Err(Border0Error::Conflict(_)) => {
                debug!(name, "socket created concurrently, fetching it");
                Ok((self.socket(name).await?, false))
            }
            Err(e) => Err(e),
        }
    }

    async fn attach_policies(&self, socket_id: Uuid, names: &[String]) -> Border0Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.find_policy(name).await?.id);
        }
        match self
            .update_socket_policies(socket_id, &PolicyUpdate::add(ids))
            .await
        {
            Ok(()) | Err(Border0Error::Conflict(_)) => {
                debug!(socket_id = %socket_id, count = names.len(), "policies attached");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Map a non-success HTTP status to the SDK error kinds.
pub(crate) fn status_error(status: StatusCode, body: String) -> Border0Error {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("").to_string()
    } else {
        body.trim().to_string()
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Border0Error::Auth(message),
        StatusCode::NOT_FOUND => Border0Error::NotFound(message),
        StatusCode::CONFLICT => Border0Error::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => Border0Error::Transient(format!("rate limited: {message}")),
        s if s.is_server_error() => Border0Error::Transient(format!("{}: {message}", s.as_u16())),
        s => Border0Error::Api {
            status: s.as_u16(),
            message,
        },
    }
}

fn to_json<T: Serialize>(value: &T) -> Border0Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Border0Result<T> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Border0Error::Transient(format!("reading response body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Border0Error::InvalidMessage(format!("unexpected response body: {e}")))
}
