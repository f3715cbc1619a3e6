//! Connection Handlers
//!
//! Thin JSON wrappers over the registry and connection commands.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::post,
    Json, Router,
};
use relay_common::{PhoneNumber, Presence};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;
use super::AppState;
use crate::connection::{ConnectionOptions, ConnectionState};
use crate::registry::LogoutAllReport;
use crate::session::PictureKind;

type Payload<T> = Result<Json<T>, JsonRejection>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{phone}", post(connect).delete(logout))
        .route("/{phone}/messages", post(send_message))
        .route("/{phone}/presence", post(send_presence))
        .route("/{phone}/read-messages", post(read_messages))
        .route("/{phone}/chat-modify", post(chat_modify))
        .route("/{phone}/fetch-message-history", post(fetch_message_history))
        .route("/{phone}/send-receipts", post(send_receipts))
        .route("/{phone}/profile-picture-url", post(profile_picture_url))
        .route("/{phone}/on-whatsapp", post(on_whatsapp))
}

/// Accept `+5511...` as well as bare digits.
fn parse_phone(raw: &str) -> Result<PhoneNumber, ApiError> {
    let raw = raw.trim();
    if raw.starts_with('+') {
        Ok(PhoneNumber::parse(raw)?)
    } else {
        Ok(PhoneNumber::parse(&format!("+{raw}"))?)
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub phone: PhoneNumber,
    pub state: ConnectionState,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

const OK: SuccessResponse = SuccessResponse { success: true };

pub async fn connect(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<ConnectionOptions>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    let phone = parse_phone(&phone)?;
    let Json(options) = payload?;

    let connection = state.registry.connect(phone, options).await?;
    Ok(Json(ConnectionResponse {
        phone: connection.phone().clone(),
        state: connection.state().await,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let phone = parse_phone(&phone)?;
    state.registry.logout(&phone).await?;
    Ok(Json(OK))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub jid: String,
    pub message_content: Value,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<SendMessageRequest>,
) -> Result<Json<DataResponse<Value>>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;

    let data = connection
        .send_message(&request.jid, request.message_content)
        .await?;
    Ok(Json(DataResponse { data }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    #[serde(rename = "type")]
    pub presence: String,
    #[serde(default)]
    pub to_jid: Option<String>,
}

pub async fn send_presence(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<PresenceRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;
    let presence = Presence::parse_str(&request.presence)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown presence: {}", request.presence)))?;

    connection.send_presence(presence, request.to_jid).await?;
    Ok(Json(OK))
}

#[derive(Debug, Deserialize)]
pub struct KeysRequest {
    pub keys: Vec<Value>,
}

pub async fn read_messages(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<KeysRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;

    connection.read_messages(&request.keys).await?;
    Ok(Json(OK))
}

#[derive(Debug, Deserialize)]
pub struct ChatModifyRequest {
    #[serde(rename = "mod")]
    pub modification: Value,
    pub jid: String,
}

pub async fn chat_modify(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<ChatModifyRequest>,
) -> Result<Json<DataResponse<Value>>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;

    let data = connection
        .chat_modify(request.modification, &request.jid)
        .await?;
    Ok(Json(DataResponse { data }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMessageHistoryRequest {
    pub count: u32,
    pub oldest_msg_key: Value,
    pub oldest_msg_timestamp: i64,
}

pub async fn fetch_message_history(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<FetchMessageHistoryRequest>,
) -> Result<Json<DataResponse<Value>>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;
    if request.count == 0 {
        return Err(ApiError::BadRequest("count must be positive".into()));
    }

    let data = connection
        .fetch_message_history(
            request.count,
            request.oldest_msg_key,
            request.oldest_msg_timestamp,
        )
        .await?;
    Ok(Json(DataResponse { data }))
}

#[derive(Debug, Deserialize)]
pub struct SendReceiptsRequest {
    pub keys: Vec<Value>,
    #[serde(rename = "type", default = "default_receipt_type")]
    pub receipt_type: String,
}

fn default_receipt_type() -> String {
    "read".into()
}

pub async fn send_receipts(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<SendReceiptsRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;

    connection
        .send_receipts(&request.keys, &request.receipt_type)
        .await?;
    Ok(Json(OK))
}

#[derive(Debug, Deserialize)]
pub struct ProfilePictureRequest {
    pub jid: String,
    #[serde(rename = "type", default)]
    pub kind: PictureKind,
}

pub async fn profile_picture_url(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<ProfilePictureRequest>,
) -> Result<Json<DataResponse<Option<String>>>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;

    let data = connection
        .profile_picture_url(&request.jid, request.kind)
        .await?;
    Ok(Json(DataResponse { data }))
}

#[derive(Debug, Deserialize)]
pub struct OnWhatsAppRequest {
    pub jids: Vec<String>,
}

pub async fn on_whatsapp(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    payload: Payload<OnWhatsAppRequest>,
) -> Result<Json<DataResponse<Value>>, ApiError> {
    let connection = state.registry.require(&parse_phone(&phone)?)?;
    let Json(request) = payload?;
    if request.jids.is_empty() {
        return Err(ApiError::BadRequest("jids must not be empty".into()));
    }

    let data = connection.on_whatsapp(&request.jids).await?;
    Ok(Json(DataResponse { data }))
}

/// Log out every connection.
pub async fn logout_all(State(state): State<AppState>) -> Json<LogoutAllReport> {
    Json(state.registry.logout_all().await)
}
