//! REST API over the archive.
//!
//! Every response body uses one envelope:
//!
//! ```json
//! { "code": 0, "message": "ok", "data": { ... } }
//! ```
//!
//! Errors carry a non-zero code and no data: `1` for bad requests (HTTP 400),
//! `404` for missing rows, `500` for everything else.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/api/v1/conversations` | Paginated list with source/date filters |
//! | `GET` | `/api/v1/conversations/{uuid}` | One conversation |
//! | `GET` | `/api/v1/conversations/{uuid}/messages` | Paginated messages |
//! | `GET` | `/api/v1/messages/{uuid}` | One message |
//! | `GET` | `/api/v1/messages/{uuid}/context` | Messages in the surrounding rounds |
//! | `GET` | `/api/v1/trees` | Tree list |
//! | `POST` | `/api/v1/tree/update` | Create or update a tree |
//! | `GET`/`DELETE` | `/api/v1/trees/{tree_id}` | Get or delete a tree |
//! | `GET`/`POST` | `/api/v1/favorites` | List or create favorites |
//! | `DELETE` | `/api/v1/favorites/{id}` | Delete a favorite |
//! | `GET`/`POST` | `/api/v1/tags` | List or create tags |
//! | `POST` | `/api/v1/conversation-tags` | Tag a conversation |
//! | `POST` | `/api/v1/conversation-tags/batch-add` | Add several tags |
//! | `POST` | `/api/v1/conversation-tags/batch-remove` | Remove several tags |
//! | `DELETE` | `/api/v1/conversation-tags/{id}` | Remove one link |
//! | `GET` | `/api/v1/tags/{id}/conversations` | Conversations with a tag |
//! | `GET` | `/api/v1/stats/overview` | Totals and per-source counts |
//! | `GET` | `/api/v1/stats/by-date` | Messages per day |
//! | `POST` | `/internal/v1/sync/batch` | Upsert already-parsed conversations |

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::conversations::{self, ConversationFilter, Pagination};
use crate::favorites::{self, NewFavorite};
use crate::models::{ParsedConversation, Vendor};
use crate::sink::{ConversationSink, SqliteSink};
use crate::trees::{self, TreeUpdate};
use crate::{db, stats, tags, validate};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    sink: Arc<dyn ConversationSink>,
}

/// Build the full router over an already-migrated pool.
pub fn router(pool: SqlitePool) -> Router {
    let state = AppState {
        sink: Arc::new(SqliteSink::new(pool.clone())),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/{uuid}", get(get_conversation))
        .route("/conversations/{uuid}/messages", get(list_conversation_messages))
        .route("/messages/{uuid}", get(get_message))
        .route("/messages/{uuid}/context", get(get_message_context))
        .route("/trees", get(list_trees))
        .route("/tree/update", post(update_tree))
        .route("/trees/{tree_id}", get(get_tree).delete(delete_tree))
        .route("/favorites", get(list_favorites).post(create_favorite))
        .route("/favorites/{id}", delete(delete_favorite))
        .route("/tags", get(list_tags).post(create_tag))
        .route("/conversation-tags", post(add_conversation_tag))
        .route("/conversation-tags/batch-add", post(batch_add_tags))
        .route("/conversation-tags/batch-remove", post(batch_remove_tags))
        .route("/conversation-tags/{id}", delete(delete_conversation_tag))
        .route("/tags/{id}/conversations", get(list_tag_conversations))
        .route("/stats/overview", get(stats_overview))
        .route("/stats/by-date", get(stats_by_date));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api/v1", api)
        .route("/internal/v1/sync/batch", post(sync_batch))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;
    let app = router(pool);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("chx API listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Envelope ============

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

type ApiResult = Result<Json<Envelope<serde_json::Value>>, AppError>;

fn ok<T: Serialize>(data: T) -> ApiResult {
    let data = serde_json::to_value(data)?;
    Ok(Json(Envelope {
        code: 0,
        message: "ok".to_string(),
        data: Some(data),
    }))
}

/// Error that renders as an envelope with a non-zero code.
struct AppError {
    status: StatusCode,
    code: i32,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body: Envelope<()> = Envelope {
            code: self.code,
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        let err = err.into();
        tracing::error!(error = %err, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: 500,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: 1,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: 404,
        message: message.into(),
    }
}

// ============ Request helpers ============

type Params = Query<HashMap<String, String>>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(v)| v)
        .map_err(|_| bad_request("invalid request body"))
}

/// Positive integer query value, or `default` when absent or unparsable.
fn positive(params: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    params
        .get(key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

fn pagination(params: &HashMap<String, String>) -> Pagination {
    Pagination::new(
        Some(positive(params, "page", 1)),
        Some(positive(params, "page_size", conversations::DEFAULT_PAGE_SIZE)),
    )
}

fn text_param(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn path_id(raw: &str, what: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| bad_request(format!("invalid {}", what)))
}

fn required(value: &str, message: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(bad_request(message));
    }
    Ok(value.to_string())
}

fn now_rfc3339() -> String {
    crate::timestamp::to_storage(&chrono::Utc::now())
}

/// Constraint failures on writes are the caller's fault, not ours.
fn classify_write_error(err: anyhow::Error) -> AppError {
    let db_err = err
        .downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error());
    match db_err {
        Some(e) if e.is_unique_violation() => bad_request("already exists"),
        Some(e) if e.is_foreign_key_violation() => not_found("referenced tag or conversation not found"),
        _ => AppError::from(err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Conversations & messages ============

async fn list_conversations(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let filter = ConversationFilter {
        source_type: text_param(&params, "source_type"),
        date_from: text_param(&params, "date_from"),
        date_to: text_param(&params, "date_to"),
    };
    let page = conversations::list_conversations(&state.pool, &filter, pagination(&params)).await?;
    ok(page)
}

async fn get_conversation(State(state): State<AppState>, Path(uuid): Path<String>) -> ApiResult {
    let uuid = required(&uuid, "conversation uuid required")?;
    match conversations::get_conversation(&state.pool, &uuid).await? {
        Some(conv) => ok(conv),
        None => Err(not_found("conversation not found")),
    }
}

async fn list_conversation_messages(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(params): Params,
) -> ApiResult {
    let uuid = required(&uuid, "conversation uuid required")?;
    let page = conversations::list_messages(&state.pool, &uuid, pagination(&params)).await?;
    ok(page)
}

async fn get_message(State(state): State<AppState>, Path(uuid): Path<String>) -> ApiResult {
    let uuid = required(&uuid, "message uuid required")?;
    match conversations::get_message(&state.pool, &uuid).await? {
        Some(msg) => ok(msg),
        None => Err(not_found("message not found")),
    }
}

async fn get_message_context(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(params): Params,
) -> ApiResult {
    let uuid = required(&uuid, "message uuid required")?;
    let before = positive(&params, "before", 2);
    let after = positive(&params, "after", 2);
    match conversations::message_context(&state.pool, &uuid, before, after).await? {
        Some(items) => ok(json!({ "items": items })),
        None => Err(not_found("message not found")),
    }
}

// ============ Trees ============

#[derive(Deserialize)]
struct TreeRequest {
    #[serde(default)]
    tree_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    conversation_uuids: Vec<String>,
}

async fn list_trees(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    ok(trees::list_trees(&state.pool, pagination(&params)).await?)
}

async fn update_tree(
    State(state): State<AppState>,
    payload: Result<Json<TreeRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    if req.conversation_uuids.is_empty() || req.conversation_uuids.iter().any(|u| u.trim().is_empty()) {
        return Err(bad_request("conversation_uuids required and must be non-empty"));
    }
    let update = TreeUpdate {
        tree_id: req.tree_id,
        title: req.title,
        description: req.description,
        conversation_uuids: req.conversation_uuids,
    };
    let (tree_id, updated_at) = trees::upsert_tree(&state.pool, &update).await?;
    ok(json!({ "tree_id": tree_id, "updated_at": updated_at }))
}

async fn get_tree(State(state): State<AppState>, Path(tree_id): Path<String>) -> ApiResult {
    let tree_id = required(&tree_id, "tree_id required")?;
    match trees::get_tree(&state.pool, &tree_id).await? {
        Some(tree) => ok(tree),
        None => Err(not_found("tree not found")),
    }
}

async fn delete_tree(State(state): State<AppState>, Path(tree_id): Path<String>) -> ApiResult {
    let tree_id = required(&tree_id, "tree_id required")?;
    if !trees::delete_tree(&state.pool, &tree_id).await? {
        return Err(not_found("tree not found"));
    }
    ok(json!({ "deleted": true, "tree_id": tree_id }))
}

// ============ Favorites ============

#[derive(Deserialize)]
struct FavoriteRequest {
    #[serde(default)]
    target_type: String,
    #[serde(default)]
    target_id: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

async fn create_favorite(
    State(state): State<AppState>,
    payload: Result<Json<FavoriteRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let target_type = req.target_type.trim();
    if target_type.is_empty() || req.target_id.trim().is_empty() {
        return Err(bad_request("target_type and target_id required"));
    }
    if !favorites::TARGET_TYPES.contains(&target_type) {
        return Err(bad_request("invalid target_type"));
    }
    let new = NewFavorite {
        target_type: target_type.to_string(),
        target_id: req.target_id,
        category: req.category,
        notes: req.notes,
    };
    ok(favorites::create_favorite(&state.pool, &new).await?)
}

async fn list_favorites(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let category = text_param(&params, "category");
    ok(favorites::list_favorites(&state.pool, category.as_deref(), pagination(&params)).await?)
}

async fn delete_favorite(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = path_id(&id, "id")?;
    if !favorites::delete_favorite(&state.pool, id).await? {
        return Err(not_found("favorite not found"));
    }
    ok(json!({ "deleted": true }))
}

// ============ Tags ============

#[derive(Deserialize)]
struct TagRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    color: String,
}

#[derive(Deserialize)]
struct TagLinkRequest {
    #[serde(default)]
    tag_id: i64,
    #[serde(default)]
    conversation_uuid: String,
}

#[derive(Deserialize)]
struct TagBatchRequest {
    #[serde(default)]
    conversation_uuid: String,
    #[serde(default)]
    tag_ids: Vec<i64>,
}

async fn list_tags(State(state): State<AppState>) -> ApiResult {
    ok(json!({ "items": tags::list_tags(&state.pool).await? }))
}

async fn create_tag(
    State(state): State<AppState>,
    payload: Result<Json<TagRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let name = required(&req.name, "name required")?;
    let tag = tags::create_tag(&state.pool, &name, &req.color)
        .await
        .map_err(classify_write_error)?;
    ok(tag)
}

async fn add_conversation_tag(
    State(state): State<AppState>,
    payload: Result<Json<TagLinkRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let conversation_uuid = req.conversation_uuid.trim().to_string();
    if req.tag_id <= 0 || conversation_uuid.is_empty() {
        return Err(bad_request("tag_id and conversation_uuid required"));
    }
    tags::add_conversation_tag(&state.pool, req.tag_id, &conversation_uuid)
        .await
        .map_err(classify_write_error)?;
    ok(json!({
        "tag_id": req.tag_id,
        "conversation_uuid": conversation_uuid,
        "created_at": now_rfc3339(),
    }))
}

fn batch_request(payload: Result<Json<TagBatchRequest>, JsonRejection>) -> Result<TagBatchRequest, AppError> {
    let mut req = body(payload)?;
    req.conversation_uuid = req.conversation_uuid.trim().to_string();
    if req.conversation_uuid.is_empty() || req.tag_ids.is_empty() {
        return Err(bad_request("conversation_uuid and tag_ids required"));
    }
    Ok(req)
}

async fn batch_add_tags(
    State(state): State<AppState>,
    payload: Result<Json<TagBatchRequest>, JsonRejection>,
) -> ApiResult {
    let req = batch_request(payload)?;
    tags::batch_add(&state.pool, &req.conversation_uuid, &req.tag_ids)
        .await
        .map_err(classify_write_error)?;
    ok(json!({
        "conversation_uuid": req.conversation_uuid,
        "tag_ids": req.tag_ids,
        "added_at": now_rfc3339(),
    }))
}

async fn batch_remove_tags(
    State(state): State<AppState>,
    payload: Result<Json<TagBatchRequest>, JsonRejection>,
) -> ApiResult {
    let req = batch_request(payload)?;
    tags::batch_remove(&state.pool, &req.conversation_uuid, &req.tag_ids).await?;
    ok(json!({
        "conversation_uuid": req.conversation_uuid,
        "removed_tag_ids": req.tag_ids,
    }))
}

async fn delete_conversation_tag(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = path_id(&id, "id")?;
    tags::delete_conversation_tag(&state.pool, id).await?;
    ok(json!({ "deleted": true }))
}

async fn list_tag_conversations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Params,
) -> ApiResult {
    let id = path_id(&id, "tag id")?;
    ok(tags::tag_conversations(&state.pool, id, pagination(&params)).await?)
}

// ============ Stats ============

async fn stats_overview(State(state): State<AppState>) -> ApiResult {
    ok(stats::overview(&state.pool).await?)
}

async fn stats_by_date(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let date_from = text_param(&params, "date_from");
    let date_to = text_param(&params, "date_to");
    ok(stats::by_date(&state.pool, date_from.as_deref(), date_to.as_deref()).await?)
}

// ============ POST /internal/v1/sync/batch ============

#[derive(Deserialize)]
struct SyncBatchRequest {
    #[serde(default)]
    source_type: String,
    #[serde(default)]
    conversations: Vec<ParsedConversation>,
}

/// Upsert conversations parsed elsewhere. Each one passes through the
/// validation gate first; refusals are reported, not fatal.
async fn sync_batch(
    State(state): State<AppState>,
    payload: Result<Json<SyncBatchRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let source_type = required(&req.source_type, "source_type required")?;
    let vendor: Vendor = source_type
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;
    if req.conversations.is_empty() {
        return Err(bad_request("conversations required"));
    }

    let mut accepted = Vec::with_capacity(req.conversations.len());
    let mut rejected = Vec::new();
    for conv in req.conversations {
        match validate::check(&conv) {
            Ok(()) => accepted.push(conv),
            Err(reason) => rejected.push(json!({ "key": conv.id, "reason": reason.to_string() })),
        }
    }

    let report = state.sink.upsert_batch(vendor, &accepted).await?;
    tracing::info!(
        vendor = %vendor,
        upserted = report.conversations(),
        rejected = rejected.len(),
        failed = report.failures.len(),
        "sync batch applied"
    );

    ok(json!({
        "success": true,
        "inserted_conversations": report.conversations_inserted,
        "updated_conversations": report.conversations_updated,
        "inserted_messages": report.messages_inserted,
        "updated_messages": report.messages_updated,
        "rejected": rejected,
        "failed": report
            .failures
            .iter()
            .map(|f| json!({ "key": f.id, "reason": f.error }))
            .collect::<Vec<_>>(),
    }))
}
