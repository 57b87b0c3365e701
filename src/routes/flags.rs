use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::engine::config::{ComponentFlags, FlagOverrides};
use crate::engine::types::ComponentActivation;
use crate::response::{AppError, SuccessResponse};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivationResponse {
    session_id: String,
    activation: ComponentActivation,
}

/// GET /api/flags
pub async fn get_flags(
    State(state): State<AppState>,
) -> Result<SuccessResponse<ComponentFlags>, AppError> {
    let config = state.engine().get_config().await;
    Ok(SuccessResponse::new(config.flags))
}

/// PUT /api/flags
pub async fn update_flags(
    State(state): State<AppState>,
    Json(flags): Json<ComponentFlags>,
) -> Result<SuccessResponse<ComponentFlags>, AppError> {
    state.engine().set_global_flags(flags).await?;
    Ok(SuccessResponse::new(flags))
}

/// GET /api/flags/:sessionId
pub async fn session_activation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<SuccessResponse<SessionActivationResponse>, AppError> {
    let activation = state.engine().resolve_activation(&session_id).await;
    Ok(SuccessResponse::new(SessionActivationResponse {
        session_id,
        activation,
    }))
}

/// PUT /api/flags/:sessionId
pub async fn update_session_overrides(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(overrides): Json<FlagOverrides>,
) -> Result<SuccessResponse<SessionActivationResponse>, AppError> {
    let engine = state.engine();
    engine.set_session_overrides(&session_id, overrides).await?;
    let activation = engine.resolve_activation(&session_id).await;
    Ok(SuccessResponse::new(SessionActivationResponse {
        session_id,
        activation,
    }))
}
