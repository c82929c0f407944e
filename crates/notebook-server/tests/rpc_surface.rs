//! End-to-end exercise of the RPC surface through the real HTTP/JSON
//! transport (router → serde → handler → serde → response), using an
//! in-process `tower::Service` call rather than a bound socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use notebook_core::assets::ObjectStoreAssetFetcher;
use notebook_core::{Config, SessionManager};
use notebook_server::routes::AppState;
use notebook_server::create_router;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};
use tower::ServiceExt;

async fn router_with_notebook(path: &str, source: &str) -> axum::Router {
    let store = Arc::new(InMemory::new());
    store
        .put(&StorePath::from(path), PutPayload::from(source.as_bytes().to_vec()))
        .await
        .unwrap();
    let fetcher = ObjectStoreAssetFetcher::with_store(store);
    let config = Arc::new(Config::default());
    let state = Arc::new(AppState {
        manager: SessionManager::new(fetcher, config.clone()),
        config,
    });
    create_router(state)
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn scenario_initialisation_override() {
    let app = router_with_notebook("nb.py", "x = 1;").await;

    let start = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions",
            serde_json::json!({ "session_id": "s1", "notebook_path": "nb.py" }),
        ))
        .await
        .unwrap();
    assert_eq!(start.status(), StatusCode::OK);
    assert_eq!(json_body(start).await["success"], true);

    let exec = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions/s1/cells/c1",
            serde_json::json!({ "source": "x = 2;" }),
        ))
        .await
        .unwrap();
    let exec_body = json_body(exec).await;
    assert_eq!(exec_body["success"], true);
    assert_eq!(exec_body["cell_state"]["x"], "2");

    let state = app
        .clone()
        .oneshot(Request::builder().uri("/sessions/s1/state").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let state_body = json_body(state).await;
    assert_eq!(state_body["exists"], true);
    assert_eq!(state_body["state"]["x"], "2");
}

#[tokio::test]
async fn scenario_security_rejection_reports_error_without_binding_changes() {
    let app = router_with_notebook("nb.py", "x = 1;").await;
    app.clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions",
            serde_json::json!({ "session_id": "s1", "notebook_path": "nb.py" }),
        ))
        .await
        .unwrap();

    let exec = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions/s1/cells/c3",
            serde_json::json!({ "source": "import \"os\" as os;" }),
        ))
        .await
        .unwrap();
    let body = json_body(exec).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().to_lowercase().contains("import"));
    assert!(body["cell_state"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_expression_marshalling() {
    let app = router_with_notebook("nb.py", "x = 1;").await;
    app.clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions",
            serde_json::json!({ "session_id": "s1", "notebook_path": "nb.py" }),
        ))
        .await
        .unwrap();

    let exec = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions/s1/cells/c4",
            serde_json::json!({ "source": "1+2" }),
        ))
        .await
        .unwrap();
    let body = json_body(exec).await;
    let output = body["outputs"].as_array().unwrap().last().unwrap();
    assert_eq!(output["kind"], "EXPRESSION_RESULT");
    assert_eq!(output["content"], "3");
}

#[tokio::test]
async fn scenario_end_session_then_execute_reports_not_found() {
    let app = router_with_notebook("nb.py", "x = 1;").await;
    app.clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions",
            serde_json::json!({ "session_id": "s1", "notebook_path": "nb.py" }),
        ))
        .await
        .unwrap();

    app.clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/sessions/s1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let exec = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/sessions/s1/cells/c1",
            serde_json::json!({ "source": "1" }),
        ))
        .await
        .unwrap();
    let body = json_body(exec).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "session not found");
}

#[tokio::test]
async fn scenario_health_check() {
    let app = router_with_notebook("nb.py", "x = 1;").await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}
