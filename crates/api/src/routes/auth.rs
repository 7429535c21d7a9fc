//! Login-state resolution endpoint

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStateRequest {
    pub owner_id: Uuid,
}

/// Resolve the caller's entitlement state. Success shapes carry no `code`
/// field; denied states carry their numeric code.
pub async fn login_state(
    State(state): State<AppState>,
    Json(request): Json<LoginStateRequest>,
) -> ApiResult<Json<Value>> {
    let decision = state
        .billing
        .entitlements
        .resolve_login(request.owner_id)
        .await?;

    tracing::debug!(
        owner_id = %request.owner_id,
        code = ?decision.wire_code(),
        "Resolved login state"
    );

    Ok(Json(decision.wire()))
}
