use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::{AppState, ServiceStats};
use crate::chat::{ChatExchange, Conversation, ConversationWithMessages, NewMessage};
use crate::models::HealthSnapshot;
use crate::server::error::ApiError;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Cached provider health; never triggers a probe.
pub async fn providers_health(State(state): State<Arc<AppState>>) -> Json<Vec<HealthSnapshot>> {
    Json(state.router().health_snapshot())
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<ServiceStats>> {
    Ok(Json(state.stats().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    Ok(Json(state.chat().list_conversations(limit, offset).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let Json(request) = payload?;
    let conversation = state.chat().create_conversation(request.title).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConversationWithMessages>> {
    Ok(Json(state.chat().get_conversation_with_messages(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

pub async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<RenameConversationRequest>, JsonRejection>,
) -> ApiResult<Json<Conversation>> {
    let Json(request) = payload?;
    Ok(Json(state.chat().rename_conversation(&id, &request.title).await?))
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.chat().delete_conversation(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> ApiResult<Json<ChatExchange>> {
    let Json(message) = payload?;
    Ok(Json(state.chat().send_message(&id, message).await?))
}
