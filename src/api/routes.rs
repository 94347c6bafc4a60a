//! HTTP surface: router, handlers, and the JSON error envelope. Handlers
//! stay thin; all semantics live in the brokerage.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::{self, AuthUser};
use crate::api::ws;
use crate::brokerage::Brokerage;
use crate::error::TradeError;
use crate::types::account::Role;
use crate::types::trade::TradeSide;

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub brokerage: Arc<Brokerage>,
    pub jwt_secret: Vec<u8>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/username_available", get(username_available))
        .route("/prices", get(prices))
        .route("/trade", post(place_trade))
        .route("/portfolio", get(portfolio))
        .route("/history", get(history))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/portfolios", get(admin_portfolios))
        .route("/admin/history", get(admin_history))
        .route("/admin/traders", get(admin_traders))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Error envelope: JSON `{"error": ...}` with a mapped status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "invalid or missing token".to_string(),
        }
    }

    fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: "insufficient role".to_string(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        let status = match &err {
            TradeError::UnknownSymbol(_)
            | TradeError::InvalidQuantity
            | TradeError::MissingCredentials => StatusCode::BAD_REQUEST,
            TradeError::InsufficientShares { .. } | TradeError::DuplicateAccount => {
                StatusCode::CONFLICT
            }
            TradeError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            TradeError::Storage(_) => {
                tracing::error!(error = %err, "Storage failure");
                StatusCode::SERVICE_UNAVAILABLE
            }
            TradeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn require_role(auth: &AuthUser, role: Role) -> Result<(), ApiError> {
    if auth.role == role {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

async fn health() -> &'static str {
    "healthy"
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    role: Role,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .brokerage
        .signup(&req.username, &req.email, &req.password, req.role)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user_id": account.id,
            "username": account.username,
            "role": account.role,
        })),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
    role: Role,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account = state
        .brokerage
        .login(&req.email, &req.password, req.role)
        .await?;
    let token = auth::create_token(&state.jwt_secret, account.id, account.role)
        .map_err(|e| ApiError::internal(format!("token creation failed: {e}")))?;
    Ok(Json(json!({
        "token": token,
        "user_id": account.id,
        "username": account.username,
        "role": account.role,
    })))
}

#[derive(Deserialize)]
struct UsernameQuery {
    username: String,
}

async fn username_available(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let available = state.brokerage.username_available(&query.username).await?;
    Ok(Json(json!({
        "username": query.username,
        "available": available,
    })))
}

async fn prices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let prices = state.brokerage.prices().await;
    Json(json!(prices))
}

#[derive(Deserialize)]
struct TradeRequest {
    symbol: String,
    side: TradeSide,
    quantity: i64,
}

async fn place_trade(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<TradeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&auth, Role::Trader)?;
    let (position, trade) = state
        .brokerage
        .place_trade(auth.account_id, &req.symbol, req.side, req.quantity)
        .await?;
    Ok(Json(json!({
        "position": position,
        "trade": trade,
    })))
}

async fn portfolio(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&auth, Role::Trader)?;
    let entries = state.brokerage.portfolio(auth.account_id).await?;
    Ok(Json(json!(entries)))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&auth, Role::Trader)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let trades = state.brokerage.history(auth.account_id, limit).await?;
    Ok(Json(json!(trades)))
}

async fn admin_stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&auth, Role::Admin)?;
    let stats = state.brokerage.stats().await?;
    Ok(Json(json!(stats)))
}

async fn admin_portfolios(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&auth, Role::Admin)?;
    let rows = state.brokerage.all_portfolios().await?;
    Ok(Json(json!(rows)))
}

async fn admin_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&auth, Role::Admin)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let rows = state.brokerage.all_history(limit).await?;
    Ok(Json(json!(rows)))
}

async fn admin_traders(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&auth, Role::Admin)?;
    let rows = state.brokerage.trader_summaries().await?;
    Ok(Json(json!(rows)))
}
