//! JSON bridge the host game server calls into.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::{
    host::{Account, Effect, InMemoryAccounts, SessionId},
    report::Position,
    service::{Login, ReportService, ServiceError},
};

#[derive(Clone)]
pub struct AppState {
    pub service: ReportService,
    pub accounts: Arc<InMemoryAccounts>,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

#[derive(Serialize)]
struct EffectsData {
    effects: Vec<Effect>,
}

#[derive(Deserialize)]
struct AccountsSync {
    accounts: Vec<Account>,
}

#[derive(Serialize)]
struct AccountsSynced {
    upserted: usize,
    known: usize,
}

#[derive(Deserialize)]
struct LoginRequest {
    session: SessionId,
    #[serde(flatten)]
    login: Login,
}

#[derive(Deserialize)]
struct ChatRequest {
    session: SessionId,
    text: String,
}

#[derive(Deserialize)]
struct CommandRequest {
    session: SessionId,
    line: String,
    /// Caller position at the time of the command, when the host tracks it.
    #[serde(default)]
    position: Option<Position>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/accounts", post(post_accounts).options(options_ok))
        .route("/sessions", post(post_session).options(options_ok))
        .route("/sessions/:id", delete(delete_session).options(options_ok))
        .route(
            "/sessions/:id/position",
            post(post_session_position).options(options_ok),
        )
        .route("/chat", post(post_chat).options(options_ok))
        .route("/command", post(post_command).options(options_ok))
        .with_state(state)
        .layer(cors)
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

fn err_response(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrResponse { ok: false, error })).into_response()
}

fn effects_response(effects: Vec<Effect>) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(EffectsData { effects }),
    })
    .into_response()
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
    sessions: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "reports_core",
            version: env!("CARGO_PKG_VERSION"),
            sessions: state.service.session_count().await,
        }),
    })
}

async fn post_accounts(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let Ok(req) = serde_json::from_value::<AccountsSync>(payload) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    let upserted = req.accounts.len();
    for account in req.accounts {
        state.accounts.upsert(account);
    }
    Json(OkResponse {
        ok: true,
        data: Some(AccountsSynced {
            upserted,
            known: state.accounts.len(),
        }),
    })
    .into_response()
}

async fn post_session(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let Ok(req) = serde_json::from_value::<LoginRequest>(payload) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    if req.login.name.trim().is_empty() {
        return err_response(StatusCode::BAD_REQUEST, "missing_name");
    }
    if let Some(account) = req.login.account.clone() {
        state.accounts.upsert(account);
    }
    effects_response(state.service.login(req.session, req.login).await)
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<SessionId>) -> Response {
    if !state.service.logout(id).await {
        return err_response(StatusCode::NOT_FOUND, "unknown_session");
    }
    Json(OkResponse::<Value> { ok: true, data: None }).into_response()
}

async fn post_session_position(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(payload): Json<Value>,
) -> Response {
    let Ok(position) = serde_json::from_value::<Position>(payload) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    if !state.service.update_position(id, position).await {
        return err_response(StatusCode::NOT_FOUND, "unknown_session");
    }
    Json(OkResponse::<Value> { ok: true, data: None }).into_response()
}

async fn post_chat(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let Ok(req) = serde_json::from_value::<ChatRequest>(payload) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    effects_response(state.service.chat(req.session, &req.text).await)
}

async fn post_command(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let Ok(req) = serde_json::from_value::<CommandRequest>(payload) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    if let Some(position) = req.position {
        state.service.update_position(req.session, position).await;
    }
    match state.service.execute(req.session, &req.line).await {
        Ok(effects) => effects_response(effects),
        Err(ServiceError::UnknownSession(_)) => {
            err_response(StatusCode::NOT_FOUND, "unknown_session")
        }
        Err(err) => {
            error!("command failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config, service::DataPaths, settings::ReportSettings, store::ReportStore,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Arc::new(InMemoryAccounts::new());
        let service = ReportService::new(
            ReportStore::open_in_memory().unwrap(),
            accounts.clone(),
            Config::default(),
            ReportSettings::default(),
            DataPaths::in_dir(dir.path()),
        );
        (router(AppState { service, accounts }), dir)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn report_round_trip_over_http() {
        let (app, _dir) = app();

        let (status, body) = call(
            &app,
            "POST",
            "/accounts",
            serde_json::json!({"accounts": [{"id": 11, "name": "Griefer"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["known"], 1);

        let (status, _) = call(
            &app,
            "POST",
            "/sessions",
            serde_json::json!({
                "session": 1,
                "account": {"id": 10, "name": "Alice"},
                "name": "Alice",
                "capabilities": ["reports.report"],
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        call(
            &app,
            "POST",
            "/sessions",
            serde_json::json!({"session": 2, "name": "Mod", "capabilities": ["reports.*"]}),
        )
        .await;

        let (status, body) = call(
            &app,
            "POST",
            "/command",
            serde_json::json!({"session": 1, "line": "/report Griefer grief", "position": {"x": 3.0, "y": 4.0}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let effects = body["data"]["effects"].as_array().unwrap();
        assert_eq!(effects[0]["text"], "Successfully reported Griefer.");
        assert_eq!(effects[2]["text"], "Position: (3,4)");
        assert_eq!(effects[3]["session"], 2);
        assert_eq!(effects[3]["tone"], "warning");

        let (_, body) = call(
            &app,
            "POST",
            "/command",
            serde_json::json!({"session": 2, "line": "creports 1"}),
        )
        .await;
        assert_eq!(body["data"]["effects"][1]["text"], "Report ID: #1");

        let (_, body) = call(
            &app,
            "POST",
            "/command",
            serde_json::json!({"session": 2, "line": "rtp"}),
        )
        .await;
        assert_eq!(
            body["data"]["effects"][0],
            serde_json::json!({"type": "teleport", "session": 2, "position": {"x": 3.0, "y": 4.0}})
        );
    }

    #[tokio::test]
    async fn unknown_session_and_bad_json() {
        let (app, _dir) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/command",
            serde_json::json!({"session": 5, "line": "creports"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_session");

        let (status, body) = call(&app, "POST", "/chat", serde_json::json!({"text": 1})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_json");

        let (status, _) = call(&app, "DELETE", "/sessions/5", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn out_of_range_position_is_rejected() {
        let (app, _dir) = app();
        call(
            &app,
            "POST",
            "/sessions",
            serde_json::json!({
                "session": 1,
                "account": {"id": 10, "name": "Alice"},
                "name": "Alice",
                "capabilities": ["reports.*"],
            }),
        )
        .await;

        let (status, body) = call(
            &app,
            "POST",
            "/command",
            serde_json::json!({"session": 1, "line": "report lava", "position": {"x": 1e39, "y": 0}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_json");

        let (status, _) = call(
            &app,
            "POST",
            "/sessions/1/position",
            serde_json::json!({"x": 0, "y": -1e39}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(
            &app,
            "POST",
            "/command",
            serde_json::json!({"session": 1, "line": "creports"}),
        )
        .await;
        assert_eq!(
            body["data"]["effects"][0]["text"],
            "There are no reports to view."
        );
    }

    #[tokio::test]
    async fn logout_removes_session() {
        let (app, _dir) = app();
        call(
            &app,
            "POST",
            "/sessions",
            serde_json::json!({"session": 4, "name": "Bob"}),
        )
        .await;
        let (_, body) = call(&app, "GET", "/health", Value::Null).await;
        assert_eq!(body["data"]["sessions"], 1);

        let (status, _) = call(&app, "DELETE", "/sessions/4", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/health", Value::Null).await;
        assert_eq!(body["data"]["sessions"], 0);
    }
}
