use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use courier_core::action::Situation;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunActionsBody {
    /// Raw payload string, or the payload object itself.
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub situation: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// POST /api/actions/run: start a batch for an actions payload.
///
/// Returns 202 with the request id when a batch started, or 200 with
/// `"ignored"` when the payload was empty or malformed.
pub async fn run_actions(
    State(app): State<AppState>,
    Json(body): Json<RunActionsBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let situation: Situation = match body.situation.as_deref() {
        Some(s) => s.parse()?,
        None => Situation::ManualInvocation,
    };
    let raw = match body.payload {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other @ Value::Object(_)) => Some(other.to_string()),
        Some(_) => {
            return Err(AppError::bad_request(
                "payload must be a JSON string or object",
            ))
        }
    };

    match app
        .courier
        .run_actions(raw.as_deref(), situation, body.metadata)
    {
        Some(request_id) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "status": "accepted",
                "request_id": request_id,
            })),
        )),
        None => Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ignored" })),
        )),
    }
}
