//! HTTP client for the stackforge REST API.
//!
//! Every call maps onto one route under `/api/v1`. Task creation only
//! queues work; [`wait_for_completion`] polls a task until it is terminal.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::ComponentState;
use crate::domain::{
    Apply, ApplyId, Changeset, ChangesetState, Component, ComponentId, Merge, Module, ModuleId,
    ModuleVersion, Plan, PlanId, Rebase, ReviewState, TaskState,
};
use crate::integration::RebaseReport;
use crate::repository::{ComponentChanges, NewComponent};

/// Poll interval used by [`WaitOptions::default`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Errors returned by [`ApiClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport or decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with an error status.
    #[error("HTTP {status}: {message}")]
    Api {
        /// Response status code.
        status: u16,
        /// The `message` field of the error body.
        message: String,
    },
    /// The base URL could not be joined with a route.
    #[error("invalid URL: {0}")]
    Url(String),
    /// The caller cancelled the wait.
    #[error("wait cancelled")]
    Cancelled,
    /// The task did not finish in time.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl ClientError {
    /// HTTP status of an API error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Typed wrapper around the REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client for a server at `base_url`, e.g. `http://127.0.0.1:9090/`.
    /// A base path must end with `/` to be kept.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Uses a preconfigured `reqwest` client.
    #[must_use]
    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = self
            .base_url
            .join(&format!("api/v1/{path}"))
            .map_err(|e| ClientError::Url(e.to_string()))?;
        debug!(%method, %url, "API request");
        Ok(self.client.request(method, url))
    }

    async fn checked(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = Self::checked(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(self.request(Method::GET, path)?).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    async fn text(&self, path: &str) -> Result<String, ClientError> {
        let response = Self::checked(self.request(Method::GET, path)?.send().await?).await?;
        Ok(response.text().await?)
    }

    /// `POST /changesets`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn create_changeset(&self, name: &str) -> Result<Changeset, ClientError> {
        self.post("changesets", &json!({ "name": name })).await
    }

    /// `GET /changesets`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_changesets(
        &self,
        state: Option<ChangesetState>,
    ) -> Result<Vec<Changeset>, ClientError> {
        match state {
            Some(state) => self.get(&format!("changesets?state={state}")).await,
            None => self.get("changesets").await,
        }
    }

    /// `GET /changesets/{name}`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn get_changeset(&self, name: &str) -> Result<Changeset, ClientError> {
        self.get(&format!("changesets/{name}")).await
    }

    /// `PUT /changesets/{name}/review`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn review_changeset(
        &self,
        name: &str,
        review_state: ReviewState,
    ) -> Result<Changeset, ClientError> {
        let builder = self
            .request(Method::PUT, &format!("changesets/{name}/review"))?
            .json(&json!({ "review_state": review_state }));
        self.send(builder).await
    }

    /// `POST /changesets/{name}/close`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn close_changeset(&self, name: &str) -> Result<Changeset, ClientError> {
        self.post(&format!("changesets/{name}/close"), &json!({})).await
    }

    /// `GET /changesets/{name}/diff`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn changeset_diff(&self, name: &str) -> Result<Value, ClientError> {
        self.get(&format!("changesets/{name}/diff")).await
    }

    /// `GET /changesets/{name}/history`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn changeset_history(&self, name: &str, limit: usize) -> Result<Value, ClientError> {
        self.get(&format!("changesets/{name}/history?limit={limit}")).await
    }

    /// `POST /changesets/{name}/components`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn create_component(
        &self,
        changeset: &str,
        component: &NewComponent,
    ) -> Result<Component, ClientError> {
        self.post(&format!("changesets/{changeset}/components"), component)
            .await
    }

    /// `PATCH /changesets/{name}/components/{id}`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn update_component(
        &self,
        changeset: &str,
        id: ComponentId,
        changes: &ComponentChanges,
    ) -> Result<Component, ClientError> {
        let builder = self
            .request(
                Method::PATCH,
                &format!("changesets/{changeset}/components/{}", id.get()),
            )?
            .json(changes);
        self.send(builder).await
    }

    /// Components of a changeset, or of trunk when `changeset` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_components(&self, changeset: Option<&str>) -> Result<Vec<Component>, ClientError> {
        match changeset {
            Some(name) => self.get(&format!("changesets/{name}/components")).await,
            None => self.get("components").await,
        }
    }

    /// Applied state of a component on a changeset or on trunk.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn component_state(
        &self,
        changeset: Option<&str>,
        id: ComponentId,
    ) -> Result<ComponentState, ClientError> {
        match changeset {
            Some(name) => {
                self.get(&format!("changesets/{name}/components/{}/state", id.get()))
                    .await
            }
            None => self.get(&format!("components/{}/state", id.get())).await,
        }
    }

    /// `POST /changesets/{name}/components/{id}/plans`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn create_plan(&self, changeset: &str, component: ComponentId) -> Result<Plan, ClientError> {
        self.post(
            &format!("changesets/{changeset}/components/{}/plans", component.get()),
            &json!({}),
        )
        .await
    }

    /// `GET /changesets/{name}/plans/{id}`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn get_plan(&self, changeset: &str, id: PlanId) -> Result<Plan, ClientError> {
        self.get(&format!("changesets/{changeset}/plans/{}", id.get()))
            .await
    }

    /// `GET /changesets/{name}/plans`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_plans(&self, changeset: &str) -> Result<Vec<Plan>, ClientError> {
        self.get(&format!("changesets/{changeset}/plans")).await
    }

    /// `GET /changesets/{name}/plans/{id}/logs`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn plan_log(&self, changeset: &str, id: PlanId) -> Result<String, ClientError> {
        self.text(&format!("changesets/{changeset}/plans/{}/logs", id.get()))
            .await
    }

    /// `POST /changesets/{name}/plans/{id}/applies`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn create_apply(&self, changeset: &str, plan: PlanId) -> Result<Apply, ClientError> {
        self.post(
            &format!("changesets/{changeset}/plans/{}/applies", plan.get()),
            &json!({}),
        )
        .await
    }

    /// `GET /changesets/{name}/applies/{id}`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn get_apply(&self, changeset: &str, id: ApplyId) -> Result<Apply, ClientError> {
        self.get(&format!("changesets/{changeset}/applies/{}", id.get()))
            .await
    }

    /// `GET /changesets/{name}/applies`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_applies(&self, changeset: &str) -> Result<Vec<Apply>, ClientError> {
        self.get(&format!("changesets/{changeset}/applies")).await
    }

    /// `GET /changesets/{name}/applies/{id}/logs`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn apply_log(&self, changeset: &str, id: ApplyId) -> Result<String, ClientError> {
        self.text(&format!("changesets/{changeset}/applies/{}/logs", id.get()))
            .await
    }

    /// `POST /changesets/{name}/merge`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn merge(&self, changeset: &str) -> Result<Merge, ClientError> {
        self.post(&format!("changesets/{changeset}/merge"), &json!({}))
            .await
    }

    /// `GET /changesets/{name}/merges`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_merges(&self, changeset: &str) -> Result<Vec<Merge>, ClientError> {
        self.get(&format!("changesets/{changeset}/merges")).await
    }

    /// `POST /changesets/{name}/rebases`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn rebase(&self, changeset: &str) -> Result<RebaseReport, ClientError> {
        self.post(&format!("changesets/{changeset}/rebases"), &json!({}))
            .await
    }

    /// `GET /changesets/{name}/rebases`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_rebases(&self, changeset: &str) -> Result<Vec<Rebase>, ClientError> {
        self.get(&format!("changesets/{changeset}/rebases")).await
    }

    /// `POST /modules`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn create_module(&self, name: &str, source: &str) -> Result<Module, ClientError> {
        self.post("modules", &json!({ "name": name, "source": source }))
            .await
    }

    /// `GET /modules`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_modules(&self) -> Result<Vec<Module>, ClientError> {
        self.get("modules").await
    }

    /// `POST /modules/{id}/versions`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn create_module_version(
        &self,
        module: ModuleId,
        version: &str,
    ) -> Result<ModuleVersion, ClientError> {
        self.post(
            &format!("modules/{}/versions", module.get()),
            &json!({ "version": version }),
        )
        .await
    }
}

/// A resource whose lifecycle follows [`TaskState`].
pub trait TaskLike {
    /// Current state.
    fn task_state(&self) -> TaskState;
}

impl TaskLike for Plan {
    fn task_state(&self) -> TaskState {
        self.state
    }
}

impl TaskLike for Apply {
    fn task_state(&self) -> TaskState {
        self.state
    }
}

impl TaskLike for Merge {
    fn task_state(&self) -> TaskState {
        self.state
    }
}

impl TaskLike for Rebase {
    fn task_state(&self) -> TaskState {
        self.state
    }
}

/// Polling behaviour of [`wait_for_completion`].
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Delay between fetches.
    pub poll_interval: Duration,
    /// Give up after this long.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// Re-fetches a task until it is `completed` or `failed`.
///
/// The server keeps running the task when the wait is cancelled or times
/// out.
///
/// # Errors
///
/// Returns the first fetch error, [`ClientError::Cancelled`] once `cancel`
/// fires, or [`ClientError::TimedOut`] when `options.timeout` elapses.
pub async fn wait_for_completion<T, F, Fut>(
    mut fetch: F,
    options: WaitOptions,
    cancel: &CancellationToken,
) -> Result<T, ClientError>
where
    T: TaskLike,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let poll = async {
        let mut ticker = tokio::time::interval(options.poll_interval);
        loop {
            ticker.tick().await;
            let task = fetch().await?;
            let state = task.task_state();
            if state.is_terminal() {
                return Ok(task);
            }
            debug!(%state, "Task not finished");
        }
    };

    let bounded = async {
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, poll)
                .await
                .map_err(|_| ClientError::TimedOut(limit))?,
            None => poll.await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ClientError::Cancelled),
        result = bounded => result,
    }
}
