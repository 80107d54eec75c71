//! Local HTTP control API for the options page and popup.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::page::TabId;
use crate::rule::Rule;
use crate::state::SharedState;
use crate::templates::TEMPLATES;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/rules", get(list_rules).post(save_rule))
        .route("/rules/:id", get(get_rule).delete(delete_rule))
        .route("/rules/:id/enabled", post(set_enabled))
        .route("/tabs/:id/rule", get(tab_rule))
        .route("/reconcile", post(reconcile))
        .route("/templates", get(list_templates))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn store_error(e: StoreError) -> Response {
    let status = match e {
        StoreError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Rule storage failed: {}", e);
    }
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn list_rules(State(state): State<SharedState>) -> Json<Vec<Rule>> {
    Json(state.store.all().await)
}

async fn get_rule(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id).await {
        Some(rule) => Json(rule).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "Rule not found" }))).into_response(),
    }
}

async fn save_rule(State(state): State<SharedState>, Json(rule): Json<Rule>) -> Response {
    match state.store.save(rule).await {
        Ok(saved) => {
            state.sync_rules().await;
            Json(saved).into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn delete_rule(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    match state.store.delete(&id).await {
        Ok(success) => {
            if success {
                state.sync_rules().await;
            }
            Json(json!({ "success": success })).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct EnabledBody {
    enabled: bool,
}

async fn set_enabled(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> Response {
    match state.store.set_enabled(&id, body.enabled).await {
        Ok(rule) => {
            if rule.is_some() {
                state.sync_rules().await;
            }
            Json(rule).into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn tab_rule(State(state): State<SharedState>, Path(id): Path<TabId>) -> Json<Option<Rule>> {
    let rule = state.coordinator.active_rule(id);
    debug!("Active rule of tab {}: {:?}", id, rule.as_ref().map(|r| &r.id));
    Json(rule)
}

async fn reconcile(State(state): State<SharedState>) -> Response {
    let rules = match state.store.reload().await {
        Ok(rules) => rules,
        Err(e) => {
            error!("Failed to reload rules: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response();
        }
    };

    match state.coordinator.reconcile_all(rules).await {
        Ok(report) => Json(json!({
            "success": true,
            "processedTabs": report.processed_tabs,
            "cleared": report.cleared,
            "applied": report.applied,
            "failed": report.failed,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn list_templates() -> impl IntoResponse {
    Json(TEMPLATES)
}
