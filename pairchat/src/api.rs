//! Request/response client for the server's HTTP API.

use std::future::Future;

use pairchat_proto::api::{
    AckResponse, FailureResponse, MessagesResponse, ProfileResponse, SendResponse, UsersResponse,
};
use pairchat_proto::message::{Message, OutgoingContent, UserId};
use pairchat_proto::user::{ProfileUpdate, User};
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

/// Errors from the HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a failure body.
    #[error("server rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// The server's explanation.
        message: String,
    },

    /// A request URL could not be built.
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

/// The server operations the client depends on.
pub trait ChatApi: Send + Sync + 'static {
    /// Persists a message to `receiver` and returns the authoritative record.
    fn send_message(
        &self,
        receiver: &UserId,
        content: &OutgoingContent,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Fetches the conversation with `peer`; the server marks it seen.
    fn conversation(
        &self,
        peer: &UserId,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Fetches the directory and per-peer unseen counts.
    fn users(&self) -> impl Future<Output = Result<UsersResponse, ApiError>> + Send;

    /// Marks everything `peer` sent to us as seen.
    fn mark_seen(&self, peer: &UserId) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Updates our own profile.
    fn update_profile(
        &self,
        update: &ProfileUpdate,
    ) -> impl Future<Output = Result<User, ApiError>> + Send;
}

/// [`ChatApi`] over HTTP with a bearer credential.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: Client,
    base_url: Url,
    token: String,
}

impl HttpApi {
    #[must_use]
    pub fn new(base_url: Url, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }
}

/// Decodes a success body, or turns a failure body into [`ApiError::Rejected`].
async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = match response.json::<FailureResponse>().await {
        Ok(body) => body.message,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };
    Err(ApiError::Rejected {
        status: status.as_u16(),
        message,
    })
}

impl ChatApi for HttpApi {
    async fn send_message(
        &self,
        receiver: &UserId,
        content: &OutgoingContent,
    ) -> Result<Message, ApiError> {
        let url = self.endpoint(&format!("api/messages/send/{receiver}"))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(content)
            .send()
            .await?;
        let body: SendResponse = parse(response).await?;
        Ok(body.new_message)
    }

    async fn conversation(&self, peer: &UserId) -> Result<Vec<Message>, ApiError> {
        let url = self.endpoint(&format!("api/messages/{peer}"))?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let body: MessagesResponse = parse(response).await?;
        Ok(body.messages)
    }

    async fn users(&self) -> Result<UsersResponse, ApiError> {
        let url = self.endpoint("api/messages/users")?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        parse(response).await
    }

    async fn mark_seen(&self, peer: &UserId) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("api/messages/seen/{peer}"))?;
        let response = self.http.patch(url).bearer_auth(&self.token).send().await?;
        let _: AckResponse = parse(response).await?;
        Ok(())
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let url = self.endpoint("api/auth/update-profile")?;
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(update)
            .send()
            .await?;
        let body: ProfileResponse = parse(response).await?;
        Ok(body.user)
    }
}
