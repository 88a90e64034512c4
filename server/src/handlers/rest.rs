/// REST API handlers for HTTP endpoints.
/// Handles chat registration and the message fetch/send endpoints.

use crate::db::{models::*, Database, DbPool, NewMessage};
use crate::handlers::ServerConfig;
use actix_web::{http::header, web, HttpRequest, HttpResponse, Result as ActixResult};
use serde_json::json;

pub const MAX_CONTENT_CHARS: usize = 4000;

/// Reject the request unless it carries the configured bearer token
fn check_auth(http: &HttpRequest, config: &ServerConfig) -> Option<HttpResponse> {
    let expected = config.api_token.as_deref()?;
    let provided = http
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if provided == Some(expected) {
        None
    } else {
        Some(HttpResponse::Unauthorized().json(json!({
            "error": "Missing or invalid token"
        })))
    }
}

fn internal_error(context: &str, e: rusqlite::Error) -> HttpResponse {
    log::error!("{}: {}", context, e);
    HttpResponse::InternalServerError().json(json!({
        "error": context
    }))
}

/// Text of the role's automatic answer to `content`
pub fn compose_reply(role_id: &str, content: &str) -> String {
    let preview: String = content.chars().take(80).collect();
    format!("{} considers your words: \"{}\"", role_id, preview)
}

/// Register a chat between a user and a story role
/// POST /chats
pub async fn create_chat(
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
    http: HttpRequest,
    req: web::Json<CreateChatRequest>,
) -> ActixResult<HttpResponse> {
    if let Some(denied) = check_auth(&http, &config) {
        return Ok(denied);
    }
    if req.chat_id.is_empty() || req.user_id.is_empty() || req.role_id.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "chat_id, user_id and role_id are required"
        })));
    }

    match Database::create_chat(&pool, &req.chat_id, &req.user_id, &req.role_id).await {
        Ok((chat, true)) => {
            log::info!("Chat {} created ({} with {})", chat.chat_id, chat.user_id, chat.role_id);
            Ok(HttpResponse::Created().json(chat))
        }
        Ok((chat, false)) => {
            if chat.user_id != req.user_id || chat.role_id != req.role_id {
                Ok(HttpResponse::Conflict().json(json!({
                    "error": "Chat already exists with different participants"
                })))
            } else {
                Ok(HttpResponse::Ok().json(chat))
            }
        }
        Err(e) => Ok(internal_error("Failed to create chat", e)),
    }
}

/// Fetch messages of a chat by cursor
/// GET /chats/:chat_id/messages?since=ts | ?before=ts
pub async fn get_messages(
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
    http: HttpRequest,
    chat_id: web::Path<String>,
    query: web::Query<MessagesQuery>,
) -> ActixResult<HttpResponse> {
    if let Some(denied) = check_auth(&http, &config) {
        return Ok(denied);
    }

    match Database::get_chat(&pool, &chat_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({
                "error": "Chat not found"
            })))
        }
        Err(e) => return Ok(internal_error("Failed to look up chat", e)),
    }

    let result = match (query.since, query.before) {
        (Some(since), None) => Database::get_messages_since(&pool, &chat_id, since).await,
        (None, Some(before)) => {
            Database::get_messages_before(&pool, &chat_id, before, config.page_limit).await
        }
        _ => {
            return Ok(HttpResponse::BadRequest().json(json!({
                "error": "Exactly one of 'since' or 'before' is required"
            })))
        }
    };

    match result {
        Ok(messages) => Ok(HttpResponse::Ok().json(messages)),
        Err(e) => Ok(internal_error("Failed to fetch messages", e)),
    }
}

/// Send a message; the response holds the stored echo then any replies
/// POST /chats/:chat_id/messages
pub async fn send_message(
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
    http: HttpRequest,
    chat_id: web::Path<String>,
    req: web::Json<SendMessageRequest>,
) -> ActixResult<HttpResponse> {
    if let Some(denied) = check_auth(&http, &config) {
        return Ok(denied);
    }

    let content = req.content.trim();
    if content.is_empty() || req.client_tag.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "content and client_tag are required"
        })));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": format!("content exceeds {} characters", MAX_CONTENT_CHARS)
        })));
    }

    let chat = match Database::get_chat(&pool, &chat_id).await {
        Ok(Some(chat)) => chat,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({
                "error": "Chat not found"
            })))
        }
        Err(e) => return Ok(internal_error("Failed to look up chat", e)),
    };
    if chat.user_id != req.sender_id {
        return Ok(HttpResponse::Forbidden().json(json!({
            "error": "Sender is not a participant of this chat"
        })));
    }

    let new_message = NewMessage {
        chat_id: &chat.chat_id,
        client_tag: &req.client_tag,
        sender_id: &req.sender_id,
        content,
        media_ref: req.media_ref.as_deref(),
    };
    let (echo, inserted) = match Database::store_message(&pool, new_message).await {
        Ok(stored) => stored,
        Err(e) => return Ok(internal_error("Failed to store message", e)),
    };

    let mut response = vec![echo];
    if !inserted {
        log::debug!("Resend of {} in {}, returning stored copy", req.client_tag, chat.chat_id);
        return Ok(HttpResponse::Ok().json(response));
    }

    if config.auto_reply {
        let reply_tag = format!("{}-reply", req.client_tag);
        let reply_text = compose_reply(&chat.role_id, content);
        let reply = NewMessage {
            chat_id: &chat.chat_id,
            client_tag: &reply_tag,
            sender_id: &chat.role_id,
            content: &reply_text,
            media_ref: None,
        };
        match Database::store_message(&pool, reply).await {
            Ok((reply, _)) => response.push(reply),
            // The user's message is stored; a missing reply is not worth failing the send
            Err(e) => log::error!("Failed to store reply in {}: {}", chat.chat_id, e),
        }
    }

    Ok(HttpResponse::Created().json(response))
}

/// Health check endpoint
/// GET /health
pub async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_reply_truncates() {
        let long = "a".repeat(200);
        let reply = compose_reply("narrator", &long);
        assert!(reply.starts_with("narrator considers"));
        assert!(reply.len() < 200);
    }
}
