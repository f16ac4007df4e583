// Streamable HTTP endpoint: routes each exchange to a session or opens one

use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use std::convert::Infallible;
use std::sync::Arc;
use tether_mcp::protocol::{parse_request, JsonRpcResponse, Method, SESSION_HEADER};
use tether_mcp::{CloseReason, Session, SessionId};

pub fn routes() -> Router<AppState> {
    let endpoint = get(attach_stream)
        .post(handle_message)
        .delete(close_session)
        .options(preflight);

    Router::new()
        .route("/mcp", endpoint.clone())
        .route("/", endpoint)
}

fn session_header() -> HeaderName {
    HeaderName::from_static("mcp-session-id")
}

/// Session id named by the request, if any. A header that is not valid
/// text can never match a session and is treated as unknown.
fn requested_session(headers: &HeaderMap) -> Option<Result<SessionId, ApiError>> {
    let value = headers.get(SESSION_HEADER)?;
    Some(
        value
            .to_str()
            .map(SessionId::from)
            .map_err(|_| ApiError::bad_session()),
    )
}

async fn resolve(state: &AppState, headers: &HeaderMap) -> ApiResult<Arc<Session>> {
    match requested_session(headers) {
        Some(id) => Ok(state.mcp.session(&id?).await?),
        None => Err(ApiError::bad_session()),
    }
}

/// JSON-RPC replies are always HTTP 200.
fn reply(response: JsonRpcResponse, session: Option<&SessionId>) -> Response {
    let mut http = (StatusCode::OK, Json(response)).into_response();
    if let Some(id) = session {
        match HeaderValue::from_str(id.as_str()) {
            Ok(value) => {
                http.headers_mut().insert(session_header(), value);
            }
            Err(e) => tracing::error!(session_id = %id, error = %e, "Session id is not a valid header"),
        }
    }
    http
}

/// POST: one JSON-RPC message in, one reply out.
async fn handle_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    // Resume path. An existing session always wins, even for `initialize`.
    if let Some(id) = requested_session(&headers) {
        let session = state.mcp.session(&id?).await?;
        let response = match parse_request(&body) {
            Ok(request) => {
                tracing::debug!(
                    session_id = %session.id(),
                    method = %request.method,
                    "Routing message to session"
                );
                session.handle(request).await
            }
            Err(response) => response,
        };
        return Ok(reply(response, Some(session.id())));
    }

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => return Ok(reply(response, None)),
    };

    if request.method() != Method::Initialize {
        tracing::warn!(method = %request.method, "Message without a session");
        return Err(ApiError::BadSession {
            id: request.reply_id(),
        });
    }

    let (session, response) = state.mcp.initialize(request).await?;
    let http = reply(response, Some(session.id()));
    session.activate();
    Ok(http)
}

/// GET: attach the session's push stream as server-sent events.
async fn attach_stream(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let session = resolve(&state, &headers).await?;
    let mut push = session.attach_stream()?;

    let events = async_stream::stream! {
        while let Some(message) = push.next_message().await {
            yield Ok::<Event, Infallible>(Event::default().event("message").data(message));
        }
    };

    let keep_alive = KeepAlive::new().interval(state.config.session.keep_alive());
    let mut response = Sse::new(events).keep_alive(keep_alive).into_response();
    if let Ok(value) = HeaderValue::from_str(session.id().as_str()) {
        response.headers_mut().insert(session_header(), value);
    }
    Ok(response)
}

/// DELETE: end the session.
async fn close_session(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let session = resolve(&state, &headers).await?;
    session.close(CloseReason::ClientRequest);
    Ok(StatusCode::OK)
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::{header, Method as HttpMethod, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tether_mcp::SessionState;
    use tower::ServiceExt;

    fn app(config: ServerConfig) -> (Router, AppState) {
        let state = AppState::new(&config);
        (create_router(state.clone()), state)
    }

    fn post(uri: &str, session: Option<&str>, body: impl Into<Body>) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(body.into()).unwrap()
    }

    fn bare(method: HttpMethod, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/mcp");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn initialize(router: &Router) -> String {
        let response = router
            .clone()
            .oneshot(post(
                "/mcp",
                None,
                json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} })
                    .to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response
            .headers()
            .get(SESSION_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn call(router: &Router, session: &str, body: Value) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(post("/mcp", Some(session), body.to_string()))
            .await
            .unwrap();
        let status = response.status();
        (status, json_body(response).await)
    }

    #[tokio::test]
    async fn test_initialize_assigns_session() {
        let (router, state) = app(ServerConfig::default());

        let response = router
            .clone()
            .oneshot(post(
                "/mcp",
                None,
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let session = response.headers().get(SESSION_HEADER).cloned().unwrap();
        let body = json_body(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(state.mcp.sessions().len(), 1);
        let id = state.mcp.sessions().ids().remove(0);
        assert_eq!(id.as_str(), session.to_str().unwrap());
        let live = state.mcp.session(&id).await.unwrap();
        assert_eq!(live.state(), SessionState::Active);

        let second = initialize(&router).await;
        assert_ne!(second, session.to_str().unwrap());
        assert_eq!(state.mcp.sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let (router, _state) = app(ServerConfig::default());
        let session = initialize(&router).await;

        let (status, body) = call(
            &router,
            &session,
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], json!({}));

        let (status, body) = call(
            &router,
            &session,
            json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["calculate", "echo", "get_time"]);

        let (status, body) = call(
            &router,
            &session,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "echo", "arguments": { "message": "hi" } }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 3);
        assert!(body["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("hi"));

        let (status, body) = call(
            &router,
            &session,
            json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": { "name": "bogus" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], -32602);
        assert!(body["error"]["message"].as_str().unwrap().contains("bogus"));
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let (router, state) = app(ServerConfig::default());

        let (status, body) = call(
            &router,
            "never-issued",
            json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/list" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Bad Request: no valid session");
        assert!(state.mcp.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_with_unknown_session_does_not_open_one() {
        let (router, state) = app(ServerConfig::default());

        let (status, _) = call(
            &router,
            "stale-session",
            json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.mcp.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_reinitialize_on_existing_session() {
        let (router, state) = app(ServerConfig::default());
        let session = initialize(&router).await;

        let (status, body) = call(
            &router,
            &session,
            json!({ "jsonrpc": "2.0", "id": 9, "method": "initialize" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(state.mcp.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_sessionless_non_initialize_is_rejected() {
        let (router, state) = app(ServerConfig::default());

        let response = router
            .oneshot(post(
                "/",
                None,
                r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["id"], 7);
        assert!(state.mcp.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let (router, _state) = app(ServerConfig::default());

        let response = router
            .oneshot(post("/mcp", None, "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_capacity_exhausted_is_unavailable() {
        let mut config = ServerConfig::default();
        config.session.max_sessions = 1;
        let (router, _state) = app(config);
        initialize(&router).await;

        let response = router
            .oneshot(post(
                "/mcp",
                None,
                r#"{"jsonrpc":"2.0","id":2,"method":"initialize"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn test_delete_closes_session() {
        let (router, state) = app(ServerConfig::default());
        let session = initialize(&router).await;

        let response = router
            .clone()
            .oneshot(bare(HttpMethod::DELETE, Some(&session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.mcp.sessions().is_empty());

        let (status, _) = call(
            &router,
            &session,
            json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(bare(HttpMethod::DELETE, Some(&session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_push_stream_delivers_tool_failure_notice() {
        let (router, _state) = app(ServerConfig::default());
        let session = initialize(&router).await;

        let (_, body) = call(
            &router,
            &session,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "calculate", "arguments": { "expression": "1 / 0" } }
            }),
        )
        .await;
        assert_eq!(body["result"]["isError"], true);

        let response = router
            .clone()
            .oneshot(bare(HttpMethod::GET, Some(&session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let mut stream = response.into_body();
        let frame = stream.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("event: message"));
        assert!(text.contains("notifications/message"));

        // A second reader is refused while the first is attached.
        let response = router
            .clone()
            .oneshot(bare(HttpMethod::GET, Some(&session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Closing the session ends the stream.
        router
            .oneshot(bare(HttpMethod::DELETE, Some(&session)))
            .await
            .unwrap();
        assert!(stream.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_get_without_session_is_rejected() {
        let (router, _state) = app(ServerConfig::default());

        let response = router
            .clone()
            .oneshot(bare(HttpMethod::GET, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(bare(HttpMethod::GET, Some("unknown")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let (router, _state) = app(ServerConfig::default());

        let response = router.oneshot(bare(HttpMethod::PUT, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let (router, _state) = app(ServerConfig::default());

        let request = Request::builder()
            .method(HttpMethod::OPTIONS)
            .uri("/mcp")
            .header(header::ORIGIN, "https://client.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type,mcp-session-id")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_reply_exposes_session_header_to_browsers() {
        let (router, _state) = app(ServerConfig::default());

        let request = Request::post("/mcp")
            .header(header::ORIGIN, "https://client.example")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_EXPOSE_HEADERS));
    }
}
