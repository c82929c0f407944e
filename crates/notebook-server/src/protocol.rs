//! Request/response DTOs for the RPC surface.
//!
//! Each method maps one-to-one onto a route; every response carries the
//! `(success, error)` envelope plus a method-specific payload.

use std::collections::HashMap;

use notebook_core::{Output, Widget};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionRequest {
    pub session_id: String,
    pub notebook_path: String,
    #[serde(default)]
    pub component_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionResponse {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCellRequest {
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCellResponse {
    pub success: bool,
    pub outputs: Vec<Output>,
    pub error: Option<String>,
    pub cell_state: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndSessionResponse {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetSessionStateResponse {
    pub exists: bool,
    pub state: HashMap<String, String>,
    pub widgets: HashMap<String, Widget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateWidgetValueRequest {
    pub widget_id: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateWidgetValueResponse {
    pub success: bool,
    pub error: Option<String>,
    /// Widget ids whose dependents should be treated as stale by the client.
    pub needs_update: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_session_request_round_trips() {
        let json = r#"{"session_id":"s1","notebook_path":"nb/component.py"}"#;
        let req: StartSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id, "s1");
        assert!(req.component_id.is_none());
    }

    #[test]
    fn test_execute_cell_response_serializes_cell_state() {
        let response = ExecuteCellResponse {
            success: true,
            outputs: vec![],
            error: None,
            cell_state: HashMap::from([("x".to_string(), "1".to_string())]),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["cell_state"]["x"], "1");
    }
}
