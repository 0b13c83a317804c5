pub mod schemas;

use std::sync::Arc;
use std::time::Duration;

use archi_core::error::{Error, Result};
use archi_core::iteration::{Iteration, IterationId};
use archi_core::sketch::SketchImage;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::backend::schemas::{
    ErrorDetail, IterationRecord, JobCreateResponse, RegisterRequest, TokenResponse, UserRecord,
};
use crate::session::SessionContext;

/// Typed boundary to the generation service.
///
/// Implementations never retry. Retrying pending jobs is the poller's business.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Submit a prompt and sketch, returning the id of the new job.
    async fn create_job(&self, prompt: &str, sketch: &SketchImage) -> Result<IterationId>;

    /// Current state of one job.
    async fn fetch_job(&self, id: &IterationId) -> Result<Iteration>;

    /// Completed and failed jobs for the current user, most recent first.
    /// Jobs still pending are left out.
    async fn list_history(&self) -> Result<Vec<Iteration>>;
}

/// HTTP client for the service. The bearer token is read from the session on
/// every call, so a login or logout affects the very next request.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    session: Arc<SessionContext>,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: Arc<SessionContext>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let credential = self
            .session
            .current()
            .ok_or_else(|| Error::Auth("not logged in".into()))?;
        Ok(request.header(AUTHORIZATION, credential.bearer()))
    }

    /// Exchange email and password for a token and store it in the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let request = self
            .client
            .post(self.url("/token"))
            .form(&[("username", email), ("password", password)]);

        let token: TokenResponse = decode(send(request).await?).await?;
        self.session.set_credential(token.access_token)?;
        info!("Logged in as {}", email);
        Ok(())
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<UserRecord> {
        let request = self
            .client
            .post(self.url("/register"))
            .json(&RegisterRequest { email, password });

        let user: UserRecord = decode(send(request).await?).await?;
        info!("Registered user {} ({})", user.email, user.id);
        Ok(user)
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn create_job(&self, prompt: &str, sketch: &SketchImage) -> Result<IterationId> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".into()));
        }

        let part = Part::bytes(sketch.bytes.clone())
            .file_name(sketch.file_name)
            .mime_str(sketch.mime_type)
            .map_err(|e| Error::Validation(format!("bad sketch mime type: {e}")))?;
        let form = Form::new()
            .text("prompt", prompt.to_string())
            .part("sketch", part);

        let request = self.authorized(self.client.post(self.url("/iterations")))?;
        let created: JobCreateResponse = decode(send(request.multipart(form)).await?).await?;

        debug!("Created iteration {}", created.id);
        Ok(created.id)
    }

    async fn fetch_job(&self, id: &IterationId) -> Result<Iteration> {
        let request = self.authorized(self.client.get(self.url(&format!("/iterations/{id}"))))?;
        let response = request.send().await.map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(id.clone()));
        }

        let record: IterationRecord = decode(check(response).await?).await?;
        Iteration::try_from(record)
    }

    async fn list_history(&self) -> Result<Vec<Iteration>> {
        let request = self.authorized(self.client.get(self.url("/iterations")))?;
        let records: Vec<IterationRecord> = decode(send(request).await?).await?;

        let listed = records.len();
        let mut iterations = records
            .into_iter()
            .map(Iteration::try_from)
            .filter(|record| !matches!(record, Ok(it) if it.status.is_pending()))
            .collect::<Result<Vec<_>>>()?;
        newest_first(&mut iterations);

        debug!("Fetched {} finished iterations of {}", iterations.len(), listed);
        Ok(iterations)
    }
}

/// The service lists jobs in insertion order. With integer ids that order can
/// be reversed reliably; anything else is left as the service sent it.
fn newest_first(iterations: &mut [Iteration]) {
    if iterations.iter().all(|i| i.id.numeric().is_some()) {
        iterations.sort_by_key(|i| std::cmp::Reverse(i.id.numeric()));
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(transport_error)?;
    check(response).await
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body).map_err(|e| Error::Service(format!("malformed response: {e}")))
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transport(format!("request timed out: {e}"))
    } else {
        Error::Transport(e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let detail = serde_json::from_str::<ErrorDetail>(body)
        .map(|d| match d.detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|_| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::Validation(detail),
        _ => Error::Service(format!("HTTP {}: {}", status.as_u16(), detail)),
    }
}
