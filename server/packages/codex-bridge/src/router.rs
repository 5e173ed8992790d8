use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use codex_bridge_backend::{Agent, TurnOptions};
use codex_bridge_error::{BridgeError, ErrorBody};
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::attachments::AttachmentResolver;
use crate::config::BridgeConfig;
use crate::messages::{collect_cleanups, normalize_messages};
use crate::models::{list_models, resolve_model, ModelListResponse};
use crate::output_schema::resolve_output_schema;
use crate::prompt::{build_prompt, flatten, PromptMode};
use crate::response::{completion, stream_completion, StreamRequest};
use crate::session_store::SessionStore;
use crate::thread_registry::{ThreadOrigin, ThreadRegistry};

const SESSION_BODY_FIELDS: [&str; 4] = ["session_id", "conversation_id", "thread_id", "user"];
const SESSION_HEADERS: [&str; 5] = [
    "x-session-id",
    "session-id",
    "x-conversation-id",
    "x-thread-id",
    "x-user-id",
];

#[derive(Debug)]
pub struct AppState {
    pub config: BridgeConfig,
    pub registry: Arc<ThreadRegistry>,
    pub resolver: AttachmentResolver,
}

impl AppState {
    pub fn new(config: BridgeConfig, agent: Agent, store: SessionStore) -> Self {
        let resolver = AttachmentResolver::new(
            reqwest::Client::new(),
            config.threads.working_directory.clone(),
        )
        .with_temp_root(config.attachment_dir.clone());
        Self {
            registry: Arc::new(ThreadRegistry::new(agent, Arc::new(store))),
            resolver,
            config,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Bridge(err) = self;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody::from(err))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn build_router(state: AppState) -> Router {
    build_router_with_state(Arc::new(state))
}

pub fn build_router_with_state(shared: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(get_health))
        .route("/v1/models", get(get_models))
        .route("/v1/chat/completions", post(post_chat_completions))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(shared.config.json_limit));

    if shared.config.api_key.is_some() {
        router = router.layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_api_key,
        ));
    }

    let mut router = router
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(shared);

    let http_logging = match std::env::var("CODEX_BRIDGE_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!("http.request", method = %req.method(), uri = %req.uri())
            })
            .on_request(|_req: &Request<_>, span: &Span| {
                tracing::info!(parent: span, "request");
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    router
}

async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_models(State(state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    Json(list_models(&state.config.models))
}

async fn not_found(uri: Uri) -> ApiError {
    BridgeError::NotFound {
        path: uri.path().to_string(),
    }
    .into()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "request handler panicked");
    ApiError::from(BridgeError::Internal {
        message: "Unexpected server error.".to_string(),
    })
    .into_response()
}

async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }
    let expected = match &state.config.api_key {
        Some(key) => key.as_str(),
        None => return Ok(next.run(req).await),
    };

    if extract_api_key(req.headers()).as_deref() == Some(expected) {
        Ok(next.run(req).await)
    } else {
        Err(BridgeError::Unauthorized.into())
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if let Some(token) = authorization
        .get(..7)
        .filter(|scheme| scheme.eq_ignore_ascii_case("bearer "))
        .and_then(|_| authorization.get(7..))
    {
        return Some(token.trim().to_string());
    }
    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// First non-blank session identifier from the body, then the headers.
pub fn resolve_session_id(body: &Map<String, Value>, headers: &HeaderMap) -> Option<String> {
    let from_body = SESSION_BODY_FIELDS.iter().find_map(|field| {
        let value = match body.get(*field)? {
            Value::String(value) => value.trim().to_string(),
            Value::Number(value) => value.to_string(),
            _ => return None,
        };
        (!value.is_empty()).then_some(value)
    });
    from_body.or_else(|| {
        SESSION_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
    })
}

async fn post_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body.map_err(|rejection| match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => BridgeError::PayloadTooLarge {
            limit: state.config.json_limit,
        },
        _ => BridgeError::invalid_request(rejection.body_text()),
    })?;
    let body: Value = serde_json::from_slice(&body)
        .map_err(|err| BridgeError::invalid_request(format!("Request body must be valid JSON: {err}")))?;
    let empty = Map::new();
    let body = body.as_object().unwrap_or(&empty);

    let messages = body.get("messages").and_then(Value::as_array);
    let model = body.get("model").and_then(Value::as_str);
    let reasoning = body
        .get("reasoning_effort")
        .and_then(Value::as_str)
        .or_else(|| body.get("model_reasoning_effort").and_then(Value::as_str));
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let session = resolve_session_id(body, &headers);

    if state.config.log_requests {
        tracing::info!(
            session_id = ?session,
            model = ?model,
            reasoning = ?reasoning,
            stream,
            messages = messages.map(Vec::len).unwrap_or(0),
            "incoming chat request"
        );
    }

    let messages = messages
        .filter(|messages| !messages.is_empty())
        .ok_or_else(|| {
            BridgeError::invalid_request("Request body must include a non-empty messages array.")
        })?;

    if session.is_none() && state.config.require_session_id {
        return Err(BridgeError::MissingSessionId.into());
    }
    let ephemeral = session.is_none();
    let session_id =
        session.unwrap_or_else(|| format!("ephemeral-{}", uuid::Uuid::new_v4()));

    let mut entries = normalize_messages(messages, &state.resolver).await?;
    let output_schema = resolve_output_schema(body)?;
    let mode = if ephemeral {
        PromptMode::Stateless
    } else {
        PromptMode::Session
    };
    let input = build_prompt(&entries, mode)?;
    let cleanups = collect_cleanups(&mut entries);

    let resolved = resolve_model(&state.config.models, model, reasoning);
    let options = state.config.threads.thread_options(&resolved);
    let resolved_thread = if ephemeral {
        state.registry.start_ephemeral(options)
    } else {
        state.registry.get_or_create(&session_id, options).await
    };
    let mut thread = resolved_thread.thread;
    // A binding the backend accepted at resume time can still be refused
    // when the turn runs. Such a session is restarted once on a new thread.
    let can_restart = !ephemeral && resolved_thread.origin == ThreadOrigin::Resumed;

    if state.config.log_requests {
        let response_format = if output_schema.is_some() {
            "json_schema"
        } else {
            "text"
        };
        tracing::info!(
            session_id = %session_id,
            origin = ?resolved_thread.origin,
            model = %resolved.model,
            reasoning = %resolved.reasoning,
            options = ?thread.options(),
            prompt = %flatten(&input),
            response_format,
            output_schema = ?output_schema,
            ephemeral,
            stream,
            "codex run payload"
        );
    }

    let turn = TurnOptions { output_schema };

    if stream {
        let persist = (!ephemeral).then(|| (state.registry.clone(), session_id));
        return Ok(stream_completion(StreamRequest {
            thread,
            input,
            turn,
            model: resolved.model,
            persist,
            can_restart,
            cleanups,
        }));
    }

    let mut result = thread.run(input.clone(), turn.clone()).await;
    if let Err(err) = &result {
        if can_restart && !err.is_turn_failure() {
            tracing::warn!(
                session_id = %session_id,
                error = %err,
                "resumed thread failed, retrying on a new thread"
            );
            thread = state.registry.restart(&session_id, &thread);
            result = thread.run(input, turn).await;
        }
    }
    let outcome = match result {
        Ok(turn) => {
            if !ephemeral {
                state.registry.persist(&session_id, &thread).await;
            }
            Ok(Json(completion(thread.id(), &resolved.model, &turn)).into_response())
        }
        Err(err) => {
            tracing::error!(session_id = %session_id, error = %err, "codex run failed");
            Err(BridgeError::CodexExecution {
                message: err.to_string(),
            }
            .into())
        }
    };
    cleanups.run_all();
    outcome
}
