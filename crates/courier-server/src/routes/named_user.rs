use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use courier_core::named_user::SetIdOutcome;
use courier_core::Courier;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

/// Run a blocking store operation off the async executor.
async fn blocking<T, F>(courier: Courier, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&Courier) -> courier_core::Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || f(&courier))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(result)
}

fn record_json(courier: &Courier) -> courier_core::Result<Value> {
    let record = courier.named_user().record()?;
    Ok(serde_json::json!({
        "id": record.id,
        "change_token": record.change_token,
    }))
}

/// GET /api/named-user: current id and change token.
pub async fn get_named_user(State(app): State<AppState>) -> Result<Json<Value>, AppError> {
    let body = blocking(app.courier.clone(), record_json).await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct SetNamedUserBody {
    pub id: Option<String>,
}

/// PUT /api/named-user: associate (or with `id: null` disassociate).
pub async fn put_named_user(
    State(app): State<AppState>,
    Json(body): Json<SetNamedUserBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    set_id(app, body.id).await
}

/// DELETE /api/named-user: disassociate.
pub async fn delete_named_user(
    State(app): State<AppState>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    set_id(app, None).await
}

async fn set_id(app: AppState, id: Option<String>) -> Result<(StatusCode, Json<Value>), AppError> {
    let (outcome, record) = blocking(app.courier.clone(), move |courier| {
        let outcome = courier.named_user().set_id(id.as_deref())?;
        Ok((outcome, record_json(courier)?))
    })
    .await?;

    let status = match outcome {
        SetIdOutcome::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
        SetIdOutcome::Updated | SetIdOutcome::Unchanged => StatusCode::OK,
    };
    Ok((
        status,
        Json(serde_json::json!({ "outcome": outcome, "named_user": record })),
    ))
}

/// POST /api/named-user/force-update: re-send the current identity.
pub async fn force_update(State(app): State<AppState>) -> Result<Json<Value>, AppError> {
    let record = blocking(app.courier.clone(), |courier| {
        courier.named_user().force_update()?;
        record_json(courier)
    })
    .await?;
    Ok(Json(serde_json::json!({ "status": "scheduled", "named_user": record })))
}

#[derive(Debug, Default, Deserialize)]
pub struct TagGroupsBody {
    #[serde(default)]
    pub add: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub remove: BTreeMap<String, Vec<String>>,
}

/// POST /api/named-user/tags: queue tag-group edits for the named user.
pub async fn edit_tag_groups(
    State(app): State<AppState>,
    Json(body): Json<TagGroupsBody>,
) -> Result<Json<Value>, AppError> {
    if body.add.is_empty() && body.remove.is_empty() {
        return Err(AppError::bad_request("no tag edits given"));
    }
    blocking(app.courier.clone(), move |courier| {
        let mut editor = courier.named_user().edit_tag_groups();
        for (group, tags) in &body.add {
            editor = editor.add_tags(group, tags.iter().map(String::as_str));
        }
        for (group, tags) in &body.remove {
            editor = editor.remove_tags(group, tags.iter().map(String::as_str));
        }
        editor.apply()
    })
    .await?;
    Ok(Json(serde_json::json!({ "status": "queued" })))
}
