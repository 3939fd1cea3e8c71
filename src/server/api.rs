use crate::agent::TwinAgent;
use crate::auth::{ require_bearer, SharedVerifier };
use crate::config::prompt::{ self, SharedPrompts };
use crate::llm::chat::ChatClient;
use crate::models::chat::{ ChatRequest, ChatResponse, ConversationResponse, SessionListResponse };
use crate::models::visit::Visit;
use crate::server::error::ApiError;
use crate::server::sse::into_sse;
use std::sync::Arc;
use axum::{
    extract::{ rejection::JsonRejection, Path, State },
    http::{ HeaderValue, Method, StatusCode },
    middleware,
    response::{ Html, IntoResponse },
    routing::{ get, post },
    Json,
    Router,
};
use serde::Serialize;
use serde_json::{ json, Value };
use tower_http::cors::{ AllowOrigin, Any, CorsLayer };
use log::{ error, info, warn };

#[derive(Serialize)]
struct ReloadResponse {
    success: bool,
    message: String,
    details: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<TwinAgent>,
    pub chat_client: Arc<dyn ChatClient>,
    pub prompts: SharedPrompts,
    pub prompts_path: String,
    pub verifier: Option<SharedVerifier>,
    pub idea_requires_auth: bool,
}

pub fn cors_layer(origins: &str) -> CorsLayer {
    let origins: Vec<&str> = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .collect();

    let allow_origin = if origins.iter().any(|o| *o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin '{}'", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    let mut consultation = Router::new().route("/api/consultation", post(consultation_handler));
    let mut idea = Router::new().route("/api/idea", get(idea_handler));

    if let Some(verifier) = state.verifier.clone() {
        consultation = consultation.route_layer(
            middleware::from_fn_with_state(verifier.clone(), require_bearer)
        );
        if state.idea_requires_auth {
            idea = idea.route_layer(middleware::from_fn_with_state(verifier, require_bearer));
        }
    }

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/conversation/{session_id}", get(conversation_handler))
        .route("/sessions", get(sessions_handler))
        .route("/instant", get(instant_handler))
        .route("/api/reload-prompts", get(reload_prompts_handler))
        .merge(consultation)
        .merge(idea)
        .layer(cors)
        .with_state(state)
}

async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    Json(
        json!({
        "message": "AI Digital Twin API",
        "memory_enabled": true,
        "storage": state.agent.storage_name(),
        "model": state.chat_client.get_model(),
    })
    )
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "storage": state.agent.storage_name(),
    }))
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    let resp = state.agent.chat(&req.message, req.session_id).await?;
    Ok(Json(resp))
}

async fn conversation_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>
) -> Result<Json<ConversationResponse>, ApiError> {
    let messages = state.agent.conversation(&session_id).await?;
    Ok(Json(ConversationResponse { session_id, messages }))
}

async fn sessions_handler(State(state): State<AppState>) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.agent.sessions().await?;
    Ok(Json(SessionListResponse { sessions }))
}

async fn consultation_handler(
    State(state): State<AppState>,
    payload: Result<Json<Visit>, JsonRejection>
) -> Result<impl IntoResponse, ApiError> {
    let Json(visit) = payload?;
    if let Some(field) = visit.first_missing_field() {
        return Err(ApiError::Validation(format!("{} must not be empty", field)));
    }
    let full_prompt = {
        let prompts = state.prompts.read().await;
        prompt::get_consultation_prompt(&prompts, &visit)
    };
    let fragments = state.chat_client.complete_stream(&full_prompt).await?;
    Ok(into_sse(fragments, "consultation"))
}

async fn idea_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let idea_prompt = state.prompts.read().await.idea_prompt.clone();
    let fragments = state.chat_client.complete_stream(&idea_prompt).await?;
    Ok(into_sse(fragments, "idea"))
}

async fn instant_handler(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let instant_prompt = state.prompts.read().await.instant_prompt.clone();
    let reply = state.chat_client.complete(&instant_prompt).await?.response;
    Ok(Html(render_instant_page(&reply)))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_instant_page(reply: &str) -> String {
    let body = escape_html(reply.trim()).replace("\r\n", "\n").replace('\n', "<br/>");
    format!(
        "<html>\n    <head>\n        <title>Live in an Instant!</title>\n    </head>\n    <body>\n        <p>{}</p>\n    </body>\n</html>\n",
        body
    )
}

async fn reload_prompts_handler(State(state): State<AppState>) -> impl IntoResponse {
    let current = Arc::clone(&*state.prompts.read().await);
    let path = state.prompts_path.clone();
    let reloaded = tokio::task::spawn_blocking(move ||
        prompt::reload_prompts_if_changed(&path, &current)
    ).await;

    match reloaded {
        Ok(Ok(Some(new_config))) => {
            *state.prompts.write().await = Arc::new(new_config);
            info!("Prompts reloaded from {}", state.prompts_path);
            Json(ReloadResponse {
                success: true,
                message: "Reload complete".into(),
                details: Some(vec!["Local reloaded".into()]),
            }).into_response()
        }
        Ok(Ok(None)) =>
            Json(ReloadResponse {
                success: true,
                message: "Reload complete".into(),
                details: Some(vec!["Local unchanged".into()]),
            }).into_response(),
        Ok(Err(e)) => {
            warn!("Prompt reload failed: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(ReloadResponse {
                    success: false,
                    message: "Reload errors".into(),
                    details: Some(vec![format!("Local error: {}", e)]),
                }),
            ).into_response()
        }
        Err(e) => {
            error!("Prompt reload task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReloadResponse {
                    success: false,
                    message: "Reload errors".into(),
                    details: None,
                }),
            ).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_page_escapes_and_breaks_lines() {
        let page = render_instant_page("We're <live>!\nWelcome & enjoy\n");
        assert!(page.contains("<p>We&#39;re &lt;live&gt;!<br/>Welcome &amp; enjoy</p>"));
        assert!(page.contains("<title>Live in an Instant!</title>"));
    }
}
