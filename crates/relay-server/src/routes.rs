//! HTTP surface: the WebSocket endpoint plus a few plain JSON routes.
//!
//! - `GET    /ws`       upgrade to a relay connection
//! - `POST   /register` create an account
//! - `POST   /login`    start a session (sets the session and CSRF cookies)
//! - `POST   /logout`   end the session and clear its cookies
//! - `GET    /history`  stored chat messages, oldest first
//! - `DELETE /history`  clear the stored messages
//! - `GET    /health`   liveness and connected-client count

use std::collections::HashMap;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use relay_protocol::encode_history;

use crate::auth::{
    Authorizer, ConnectRequest, Identity, SessionAuthorizer, CSRF_COOKIE, CSRF_HEADER,
    SESSION_COOKIE,
};
use crate::connection::run_connection;
use crate::error::ApiError;
use crate::types::{AppState, ConnectionState};

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/history", get(get_history).delete(delete_history))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
}

/// CORS with credentials for the configured origins. Origins that are not
/// valid header values are skipped.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(CSRF_HEADER)])
}

async fn authorize(
    state: &AppState,
    headers: HeaderMap,
    query: HashMap<String, String>,
) -> Result<Identity, ApiError> {
    let req = ConnectRequest::new(headers, query);
    Ok(state.authorizer.authorize(&req).await?)
}

/// Capacity first, then authorization, then the upgrade itself. A refused
/// request never touches the registry.
///
/// Capacity is a slot taken from `AppState::slots` and held by the
/// connection until it ends, so concurrent upgrades cannot overshoot
/// `max_clients`.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    debug!(state = %ConnectionState::Connecting, "upgrade requested");

    let Ok(slot) = state.slots.clone().try_acquire_owned() else {
        warn!(
            state = %ConnectionState::Rejected,
            max_clients = state.max_clients,
            "Rejecting connection: max_clients reached"
        );
        return Err(ApiError::service_unavailable("Server at capacity"));
    };

    let identity = authorize(&state, headers, query).await.map_err(|e| {
        debug!(state = %ConnectionState::Rejected, "upgrade not authorized");
        e
    })?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(
                state = %ConnectionState::Rejected,
                error = %rejection,
                "WebSocket upgrade failed"
            );
            return Ok(rejection.into_response());
        }
    };

    info!(
        display_name = %identity.display_name,
        state = %ConnectionState::Upgrading,
        "Upgrading connection"
    );
    Ok(ws
        .on_failed_upgrade(|error| {
            warn!(error = %error, state = %ConnectionState::Rejected, "WebSocket handshake failed");
        })
        .on_upgrade(move |socket| run_connection(socket, state, identity, slot)))
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    username: String,
    csrf_token: String,
}

async fn register(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    state.accounts.register(&creds.username, &creds.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            username: creds.username.trim().to_string(),
        }),
    ))
}

/// The session cookie is HttpOnly; the CSRF cookie is readable by the page,
/// which echoes it back in `X-CSRF-Token` (or `csrf_token` on `/ws`).
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(creds): Json<Credentials>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let tokens = state.accounts.login(&creds.username, &creds.password).await?;

    let jar = jar
        .add(
            Cookie::build((SESSION_COOKIE, tokens.session_token))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax),
        )
        .add(
            Cookie::build((CSRF_COOKIE, tokens.csrf_token.clone()))
                .path("/")
                .same_site(SameSite::Lax),
        );

    Ok((
        jar,
        Json(LoginResponse {
            username: creds.username.trim().to_string(),
            csrf_token: tokens.csrf_token,
        }),
    ))
}

/// Needs the same session cookie and CSRF token as any other protected
/// route, whichever authorizer guards `/ws`.
async fn logout(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    let sessions = SessionAuthorizer::new(state.accounts.sessions().clone());
    let identity = sessions
        .authorize(&ConnectRequest::new(headers, query))
        .await?;

    if let Some(session) = jar.get(SESSION_COOKIE) {
        state.accounts.logout(session.value());
    }
    info!(username = %identity.display_name, "user logged out");

    let jar = jar
        .remove(Cookie::build(SESSION_COOKIE).path("/"))
        .remove(Cookie::build(CSRF_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, headers, query).await?;

    let messages = state.relay.store().chat_history().await?;
    let body = encode_history(&messages)?;
    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

async fn delete_history(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let identity = authorize(&state, headers, query).await?;

    state.relay.store().delete_all_messages().await?;
    info!(display_name = %identity.display_name, "chat history cleared");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    clients: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: state.relay.registry().len().await,
    })
}
