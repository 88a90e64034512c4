//! Server API client for the story chat REST endpoints

use crate::error::{ClientError, GatewayError, Result};
use crate::models::{ChatContext, ChatId, ClientTag, Message};
use crate::services::gateway::{GatewayResult, MessageGateway};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Who is talking to the server, and with what credentials.
///
/// Handed to `ServerApi` at construction; nothing else holds auth state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    token: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Session {
            user_id: user_id.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// Wire representation of a stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub client_tag: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub media_ref: Option<String>,
}

impl From<MessagePayload> for Message {
    fn from(payload: MessagePayload) -> Self {
        let message = Message::from_server(
            payload.id,
            ClientTag::from_string(&payload.client_tag),
            ChatId::new(payload.chat_id),
            payload.sender_id,
            payload.content,
            payload.timestamp,
        );
        match payload.media_ref {
            Some(media_ref) => message.with_media(media_ref),
            None => message,
        }
    }
}

#[derive(Serialize)]
struct CreateChatRequest<'a> {
    chat_id: &'a str,
    user_id: &'a str,
    role_id: &'a str,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    sender_id: &'a str,
    content: &'a str,
    client_tag: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Server API client
pub struct ServerApi {
    client: Client,
    base_url: Url,
    session: Session,
    timeout: Duration,
}

impl ServerApi {
    /// Create a new server API client
    pub fn new(base_url: &str, session: Session) -> Result<Self> {
        Self::with_timeout(base_url, session, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, session: Session, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("Invalid server URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Config(format!("Server URL '{}' cannot be a base", base_url)));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GatewayError::from)?;

        Ok(Self {
            client,
            base_url,
            session,
            timeout,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Check if the server is healthy
    pub async fn health_check(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(self.url(&["health"])))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await.into())
        }
    }

    /// Register a chat between the session user and a role.
    ///
    /// Idempotent: registering an existing chat succeeds.
    pub async fn register_chat(&self, context: &ChatContext) -> Result<()> {
        let request = CreateChatRequest {
            chat_id: context.chat_id.as_str(),
            user_id: &context.user_id,
            role_id: &context.role_id,
        };

        let response = self
            .authorized(self.client.post(self.url(&["chats"])))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            log::info!("Chat {} registered with role {}", context.chat_id, context.role_id);
            Ok(())
        } else {
            Err(error_from(response).await.into())
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn messages_url(&self, chat_id: &ChatId) -> Url {
        self.url(&["chats", chat_id.as_str(), "messages"])
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::from(err)
        }
    }

    async fn fetch(&self, chat_id: &ChatId, cursor_param: &str, cursor: i64) -> GatewayResult<Vec<Message>> {
        let response = self
            .authorized(self.client.get(self.messages_url(chat_id)))
            .query(&[(cursor_param, cursor)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.read_messages(response).await
    }

    async fn read_messages(&self, response: Response) -> GatewayResult<Vec<Message>> {
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        let payloads: Vec<MessagePayload> = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(payloads.into_iter().map(Message::from).collect())
    }
}

/// Turn a non-success response into a classified error
async fn error_from(response: Response) -> GatewayError {
    let status = response.status().as_u16();
    let message = match response.text().await {
        Ok(body) => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => parsed.error,
            Err(_) if body.is_empty() => format!("HTTP {}", status),
            Err(_) => body,
        },
        Err(e) => e.to_string(),
    };
    GatewayError::from_status(status, message)
}

#[async_trait]
impl MessageGateway for ServerApi {
    async fn fetch_messages_since(&self, chat_id: &ChatId, cursor: i64) -> GatewayResult<Vec<Message>> {
        log::debug!("Fetching messages of {} since {}", chat_id, cursor);
        self.fetch(chat_id, "since", cursor).await
    }

    async fn fetch_messages_before(&self, chat_id: &ChatId, cursor: i64) -> GatewayResult<Vec<Message>> {
        log::debug!("Fetching messages of {} before {}", chat_id, cursor);
        self.fetch(chat_id, "before", cursor).await
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        sender_id: &str,
        content: &str,
        client_tag: &ClientTag,
    ) -> GatewayResult<Vec<Message>> {
        let request = SendMessageRequest {
            sender_id,
            content,
            client_tag: client_tag.as_str(),
        };

        let response = self
            .authorized(self.client.post(self.messages_url(chat_id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.read_messages(response).await
    }
}
