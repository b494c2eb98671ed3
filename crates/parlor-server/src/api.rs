use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parlor_shared::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use parlor_shared::{MessageId, ReceiptStatus, RoomId, UserId};
use parlor_store::{Database, MessageWithReceipts, Room, StoreError, UserProfile};

use crate::auth::{hash_password, verify_password, AuthUser, TokenAuthority};
use crate::backend::{BackendError, SqliteBackend};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::hub::{HubSettings, RelayHub};
use crate::rate_limit::{rate_limit_middleware, HttpRateLimiter};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
    pub backend: SqliteBackend,
    pub tokens: TokenAuthority,
    pub http_limiter: HttpRateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database, tokens: TokenAuthority) -> Self {
        let backend = SqliteBackend::new(db);
        let hub = RelayHub::with_backend(
            backend.clone(),
            HubSettings {
                store_timeout: config.store_timeout,
                typing_requires_membership: config.typing_requires_membership,
            },
        );

        Self {
            hub: Arc::new(hub),
            backend,
            tokens,
            http_limiter: HttpRateLimiter::new(config.http_rate_window, config.http_rate_limit),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let origins = cors_origins(&state.config.cors_origins);
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/join", post(join_room))
        .route("/api/rooms/mine", get(my_rooms))
        .route("/api/messages/:room_id/messages", get(room_messages))
        .route("/api/messages/read", post(mark_read))
        .route("/api/messages/delivered", post(mark_delivered))
        .layer(middleware::from_fn_with_state(
            state.http_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_origins(configured: &[String]) -> AllowOrigin {
    if configured.is_empty() {
        return AllowOrigin::from(Any);
    }
    let parsed: Vec<HeaderValue> = configured
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    AllowOrigin::list(parsed)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connected_users: usize,
    sessions: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    password: String,
    display_name: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: UserProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    name: String,
    #[serde(default)]
    is_private: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRoomRequest {
    invite_code: Option<String>,
    room_id: Option<RoomId>,
}

#[derive(Serialize)]
struct RoomResponse {
    room: Room,
}

#[derive(Serialize)]
struct RoomsResponse {
    rooms: Vec<Room>,
}

#[derive(Deserialize)]
struct PageQuery {
    cursor: Option<MessageId>,
    limit: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesResponse {
    messages: Vec<MessageWithReceipts>,
    next_cursor: Option<MessageId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptRequest {
    room_id: RoomId,
    message_id: MessageId,
}

// ---------------------------------------------------------------------------
// Service endpoints
// ---------------------------------------------------------------------------

async fn welcome() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Welcome to the Realtime Chat API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connected_users: state.hub.online_users().await,
        sessions: state.hub.session_count().await,
    })
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

fn validate_email(email: &str) -> Result<(), ServerError> {
    let valid = email
        .trim()
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        });
    if valid {
        Ok(())
    } else {
        Err(ServerError::BadRequest("Invalid email".into()))
    }
}

fn validate_password(password: &str) -> Result<(), ServerError> {
    if password.chars().count() < 8 {
        return Err(ServerError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ServerError> {
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    if req.display_name.trim().chars().count() < 2 {
        return Err(ServerError::BadRequest(
            "Display name must be at least 2 characters".into(),
        ));
    }
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    validate_registration(&req)?;

    let email = req.email.trim().to_lowercase();
    let display_name = req.display_name.trim().to_string();
    let password_hash = hash_password(&req.password)?;

    let user = state
        .backend
        .run(move |db| db.create_user(&email, &display_name, &password_hash))
        .await
        .map_err(|e| match e {
            BackendError::Store(StoreError::Conflict(_)) => {
                ServerError::Conflict("Email already in use".into())
            }
            other => other.into(),
        })?;

    info!(user = %user.id, "Account registered");
    Ok(Json(AuthResponse {
        token: state.tokens.issue(user.id),
        user: UserProfile::from(&user),
    }))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let email = req.email.trim().to_lowercase();
    let user = state
        .backend
        .run(move |db| db.find_user_by_email(&email))
        .await?
        .filter(|user| verify_password(&req.password, &user.password_hash))
        .ok_or_else(|| ServerError::Unauthorized("Invalid credentials".into()))?;

    Ok(Json(AuthResponse {
        token: state.tokens.issue(user.id),
        user: UserProfile::from(&user),
    }))
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

async fn create_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<CreateRoomRequest>,
) -> Result<Json<RoomResponse>, ServerError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::BadRequest("Room name is required".into()));
    }

    let invite_code = req.is_private.then(|| hex::encode(rand::random::<[u8; 6]>()));
    let room = state
        .backend
        .run(move |db| {
            let room = db.create_room(&name, req.is_private, invite_code.as_deref())?;
            db.add_member(user_id, room.id)?;
            Ok(room)
        })
        .await?;

    info!(room = %room.id, creator = %user_id, private = room.is_private, "Room created");
    Ok(Json(RoomResponse { room }))
}

async fn join_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<JoinRoomRequest>,
) -> Result<Json<RoomResponse>, ServerError> {
    let room = match (req.invite_code, req.room_id) {
        (Some(code), _) => {
            state
                .backend
                .run(move |db| db.find_room_by_invite(code.trim()))
                .await?
        }
        (None, Some(room_id)) => {
            let room = state.backend.run(move |db| db.get_room(room_id)).await?;
            if room.as_ref().is_some_and(|r| r.is_private) {
                return Err(ServerError::Forbidden("Private room requires invite".into()));
            }
            room
        }
        (None, None) => {
            return Err(ServerError::BadRequest(
                "inviteCode or roomId is required".into(),
            ))
        }
    };
    let room = room.ok_or_else(|| ServerError::NotFound("Room not found".into()))?;

    let room_id = room.id;
    state
        .backend
        .run(move |db| db.add_member(user_id, room_id))
        .await?;

    Ok(Json(RoomResponse { room }))
}

async fn my_rooms(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<RoomsResponse>, ServerError> {
    let rooms = state
        .backend
        .run(move |db| db.rooms_for_user(user_id))
        .await?;
    Ok(Json(RoomsResponse { rooms }))
}

// ---------------------------------------------------------------------------
// Message history and receipts
// ---------------------------------------------------------------------------

async fn require_member(state: &AppState, user_id: UserId, room_id: RoomId) -> Result<(), ServerError> {
    let is_member = state
        .backend
        .run(move |db| db.is_member(user_id, room_id))
        .await?;
    if is_member {
        Ok(())
    } else {
        Err(ServerError::Forbidden("Not a room member".into()))
    }
}

async fn room_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(room_id): ApiPath<RoomId>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> Result<Json<MessagesResponse>, ServerError> {
    require_member(&state, user_id, room_id).await?;

    let limit = page
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let cursor = page.cursor;
    let messages = state
        .backend
        .run(move |db| db.get_messages_for_room(room_id, cursor, limit))
        .await
        .map_err(|e| match e {
            BackendError::Store(StoreError::NotFound) => {
                ServerError::BadRequest("Unknown cursor".into())
            }
            other => other.into(),
        })?;

    let next_cursor = messages.last().map(|m| m.message.id);
    Ok(Json(MessagesResponse {
        messages,
        next_cursor,
    }))
}

async fn record_receipt(
    state: &AppState,
    user_id: UserId,
    req: ReceiptRequest,
    status: ReceiptStatus,
) -> Result<Json<serde_json::Value>, ServerError> {
    require_member(state, user_id, req.room_id).await?;

    let ReceiptRequest {
        room_id,
        message_id,
    } = req;
    let recorded = state
        .backend
        .run(move |db| {
            let in_room = db
                .get_message(message_id)?
                .is_some_and(|m| m.room_id == room_id);
            if in_room {
                db.upsert_receipt(message_id, user_id, status)?;
            }
            Ok(in_room)
        })
        .await?;

    if !recorded {
        return Err(ServerError::NotFound("Message not found".into()));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ReceiptRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    record_receipt(&state, user_id, req, ReceiptStatus::Read).await
}

async fn mark_delivered(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ReceiptRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    record_receipt(&state, user_id, req, ReceiptStatus::Delivered).await
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
