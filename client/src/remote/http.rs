//! HTTP implementation of the remote task API.

use super::RemoteTaskApi;
use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tasksync_engine::{normalize_task, parse_task_listing, Task, TaskPatch, TaskPayload};

/// Error bodies longer than this are cut in error messages.
const MAX_ERROR_BODY: usize = 512;

/// JSON-over-HTTP client for `{base_url}/tasks`.
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTaskApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| Error::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(format!("{base_url} cannot hold a path")));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::NetworkUnavailable(format!("cannot build http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.api_url,
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    /// `{base_url}/tasks`, or `{base_url}/tasks/{id}` with the id escaped
    /// as a single path segment.
    fn endpoint(&self, id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(format!("{} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .push("tasks")
            .extend(id);
        Ok(url)
    }

    fn request(&self, method: Method, id: Option<&str>) -> Result<RequestBuilder> {
        let builder = self.client.request(method, self.endpoint(id)?);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn read_json(response: Response) -> Result<Option<Value>> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

/// Map a non-success status onto the remote failure taxonomy.
fn classify_status(status: StatusCode, body: &str) -> Error {
    if status == StatusCode::NOT_FOUND {
        Error::RemoteNotFound
    } else if status.is_server_error() {
        Error::NetworkUnavailable(format!("server error {}", status.as_u16()))
    } else {
        let mut message = body.trim().to_string();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        if message.is_empty() {
            message = status
                .canonical_reason()
                .unwrap_or("request rejected")
                .to_string();
        }
        Error::RemoteRejected {
            status: status.as_u16(),
            message,
        }
    }
}

impl RemoteTaskApi for HttpTaskApi {
    async fn list(&self) -> Result<Vec<Task>> {
        let response = self.send(self.request(Method::GET, None)?).await?;
        let body = Self::read_json(response)
            .await?
            .ok_or_else(|| Error::InvalidResponse("empty task listing".into()))?;

        parse_task_listing(&body, Utc::now()).map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    async fn create(&self, payload: &TaskPayload) -> Result<Task> {
        let response = self
            .send(self.request(Method::POST, None)?.json(payload))
            .await?;
        let body = Self::read_json(response)
            .await?
            .ok_or_else(|| Error::InvalidResponse("create returned no task".into()))?;

        normalize_task(&body, Utc::now()).map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let response = self
            .send(self.request(Method::PUT, Some(id))?.json(patch))
            .await?;

        match Self::read_json(response).await? {
            Some(body) => normalize_task(&body, Utc::now())
                .map(Some)
                .map_err(|e| Error::InvalidResponse(e.to_string())),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, Some(id))?).await?;
        Ok(())
    }
}
