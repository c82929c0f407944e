//! HTTP routes for the RPC surface: one handler per method, wired onto
//! an axum [`Router`] over a shared [`AppState`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use notebook_core::{assets::AssetFetcher, Config, SessionManager};
use tower_http::cors::CorsLayer;

use crate::protocol::{
    EndSessionResponse, ExecuteCellRequest, ExecuteCellResponse, GetSessionStateResponse,
    StartSessionRequest, StartSessionResponse, UpdateWidgetValueRequest, UpdateWidgetValueResponse,
};

/// Shared application state: the session registry behind which every
/// handler operates.
pub struct AppState<F: AssetFetcher> {
    pub manager: SessionManager<F>,
    pub config: Arc<Config>,
}

/// Build the router. Generic over the asset-fetcher backend so tests can
/// substitute an in-memory store without touching route wiring.
pub fn create_router<F: AssetFetcher + 'static>(state: Arc<AppState<F>>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", post(start_session_handler::<F>))
        .route("/sessions/{session_id}", axum::routing::delete(end_session_handler::<F>))
        .route("/sessions/{session_id}/state", get(get_session_state_handler::<F>))
        .route("/sessions/{session_id}/cells/{cell_id}", post(execute_cell_handler::<F>))
        .route("/sessions/{session_id}/widgets/{widget_id}", post(update_widget_value_handler::<F>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn start_session_handler<F: AssetFetcher>(
    State(state): State<Arc<AppState<F>>>,
    Json(request): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let result = state
        .manager
        .start(request.session_id, &request.notebook_path, request.component_id)
        .await;

    let response = match result {
        Ok(()) => StartSessionResponse { success: true, error: None },
        Err(e) => StartSessionResponse {
            success: false,
            error: Some(e.to_string()),
        },
    };
    Json(response)
}

async fn execute_cell_handler<F: AssetFetcher>(
    State(state): State<Arc<AppState<F>>>,
    Path((session_id, cell_id)): Path<(String, String)>,
    Json(request): Json<ExecuteCellRequest>,
) -> Json<ExecuteCellResponse> {
    let outcome = state
        .manager
        .with_session(&session_id, |session| {
            session.execute_cell(&cell_id, &request.source, &state.config)
        })
        .await;

    let response = match outcome {
        Some(result) => ExecuteCellResponse {
            success: result.success,
            outputs: result.outputs,
            error: result.error,
            cell_state: result.namespace_state,
        },
        None => ExecuteCellResponse {
            success: false,
            outputs: vec![],
            error: Some("session not found".to_string()),
            cell_state: Default::default(),
        },
    };
    Json(response)
}

async fn end_session_handler<F: AssetFetcher>(
    State(state): State<Arc<AppState<F>>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let ended = state.manager.end(&session_id).await;
    let response = if ended {
        EndSessionResponse { success: true, error: None }
    } else {
        EndSessionResponse {
            success: false,
            error: Some("session not found".to_string()),
        }
    };
    Json(response)
}

async fn get_session_state_handler<F: AssetFetcher>(
    State(state): State<Arc<AppState<F>>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let found = state
        .manager
        .peek_session(&session_id, |session| session.get_state())
        .await;

    let response = match found {
        Some(state) => GetSessionStateResponse {
            exists: true,
            state: state.bindings,
            widgets: state.widgets,
        },
        None => GetSessionStateResponse {
            exists: false,
            state: Default::default(),
            widgets: Default::default(),
        },
    };
    Json(response)
}

async fn update_widget_value_handler<F: AssetFetcher>(
    State(state): State<Arc<AppState<F>>>,
    Path((session_id, widget_id)): Path<(String, String)>,
    Json(request): Json<UpdateWidgetValueRequest>,
) -> Json<UpdateWidgetValueResponse> {
    let outcome = state
        .manager
        .with_session(&session_id, |session| session.update_widget_value(&widget_id, &request.value))
        .await;

    let response = match outcome {
        Some(Ok(needs_update)) => UpdateWidgetValueResponse {
            success: true,
            error: None,
            needs_update,
        },
        Some(Err(e)) => UpdateWidgetValueResponse {
            success: false,
            error: Some(e.to_string()),
            needs_update: vec![],
        },
        None => UpdateWidgetValueResponse {
            success: false,
            error: Some("session not found".to_string()),
            needs_update: vec![],
        },
    };
    Json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notebook_core::assets::ObjectStoreAssetFetcher;
    use notebook_core::Config;
    use object_store::memory::InMemory;
    use object_store::path::Path as StorePath;
    use object_store::{ObjectStore, PutPayload};
    use std::sync::Arc as StdArc;

    async fn app_with_notebook(path: &str, source: &str) -> Arc<AppState<ObjectStoreAssetFetcher>> {
        let store = StdArc::new(InMemory::new());
        store
            .put(&StorePath::from(path), PutPayload::from(source.as_bytes().to_vec()))
            .await
            .unwrap();
        let fetcher = ObjectStoreAssetFetcher::with_store(store);
        let config = StdArc::new(Config::default());
        Arc::new(AppState {
            manager: SessionManager::new(fetcher, config.clone()),
            config,
        })
    }

    #[tokio::test]
    async fn test_start_then_execute_cell() {
        let state = app_with_notebook("nb.py", "let x = 1;").await;
        let start = start_session_handler(
            State(state.clone()),
            Json(StartSessionRequest {
                session_id: "s1".to_string(),
                notebook_path: "nb.py".to_string(),
                component_id: None,
            }),
        )
        .await;
        assert!(start.into_response().status().is_success());

        let result = execute_cell_handler(
            State(state.clone()),
            Path(("s1".to_string(), "c1".to_string())),
            Json(ExecuteCellRequest {
                source: "x = 2;".to_string(),
            }),
        )
        .await;
        assert!(result.0.success);
        assert_eq!(result.0.cell_state.get("x"), Some(&"2".to_string()));
    }

    #[tokio::test]
    async fn test_execute_cell_on_unknown_session() {
        let state = app_with_notebook("nb.py", "let x = 1;").await;
        let result = execute_cell_handler(
            State(state),
            Path(("missing".to_string(), "c1".to_string())),
            Json(ExecuteCellRequest {
                source: "1".to_string(),
            }),
        )
        .await;
        assert!(!result.0.success);
        assert_eq!(result.0.error.as_deref(), Some("session not found"));
    }

    #[tokio::test]
    async fn test_get_session_state_reports_existence() {
        let state = app_with_notebook("nb.py", "let x = 1;").await;
        start_session_handler(
            State(state.clone()),
            Json(StartSessionRequest {
                session_id: "s1".to_string(),
                notebook_path: "nb.py".to_string(),
                component_id: None,
            }),
        )
        .await;

        let found = get_session_state_handler(State(state.clone()), Path("s1".to_string())).await;
        let missing = get_session_state_handler(State(state), Path("missing".to_string())).await;
        assert!(found.into_response().status().is_success());
        assert!(missing.into_response().status().is_success());
    }

    #[tokio::test]
    async fn test_end_session_removes_it() {
        let state = app_with_notebook("nb.py", "let x = 1;").await;
        start_session_handler(
            State(state.clone()),
            Json(StartSessionRequest {
                session_id: "s1".to_string(),
                notebook_path: "nb.py".to_string(),
                component_id: None,
            }),
        )
        .await;

        end_session_handler(State(state.clone()), Path("s1".to_string())).await;
        assert!(!state.manager.exists("s1").await);
    }
}
