use std::sync::Arc;

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use crate::cache::keys;
use crate::db::operations::{decide_proposal, get_proposal, list_proposals, ConfigProposalRow};
use crate::db::DatabaseProxy;
use crate::engine::config::{ConfigDelta, EngineConfig};
use crate::response::{AppError, SuccessResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    proposal: ConfigProposalRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied_config: Option<EngineConfig>,
}

fn require_db(state: &AppState) -> Result<Arc<DatabaseProxy>, AppError> {
    state
        .db_proxy()
        .ok_or_else(|| AppError::unavailable("Optimizer proposals require a database"))
}

/// GET /api/optimizer/proposals?status=pending
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<SuccessResponse<Vec<ConfigProposalRow>>, AppError> {
    let proxy = require_db(&state)?;
    let status = query.status.as_deref();

    let cache_key = keys::proposal_list_key(status);
    if let Some(cache) = state.cache() {
        if let Some(rows) = cache.get::<Vec<ConfigProposalRow>>(&cache_key).await {
            return Ok(SuccessResponse::new(rows));
        }
    }

    let rows = list_proposals(&proxy, status)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    if let Some(cache) = state.cache() {
        cache.set(&cache_key, &rows, keys::PROPOSAL_LIST_TTL).await;
    }

    Ok(SuccessResponse::new(rows))
}

/// GET /api/optimizer/proposals/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<SuccessResponse<ConfigProposalRow>, AppError> {
    let proxy = require_db(&state)?;
    let proposal = get_proposal(&proxy, &id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("Proposal not found"))?;
    Ok(SuccessResponse::new(proposal))
}

/// POST /api/optimizer/proposals/:id/apply
///
/// Applies the proposal's delta to the live engine config. The proposal
/// must still be pending.
pub async fn apply(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<SuccessResponse<DecisionResponse>, AppError> {
    decide(state, id, "accepted").await
}

/// POST /api/optimizer/proposals/:id/reject
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<SuccessResponse<DecisionResponse>, AppError> {
    decide(state, id, "rejected").await
}

async fn decide(
    state: AppState,
    id: String,
    status: &'static str,
) -> Result<SuccessResponse<DecisionResponse>, AppError> {
    let proxy = require_db(&state)?;

    let proposal = get_proposal(&proxy, &id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("Proposal not found"))?;

    let delta: ConfigDelta = serde_json::from_value(proposal.delta.clone())
        .map_err(|e| AppError::internal(format!("stored proposal delta is malformed: {e}")))?;

    // Validate before flipping the status so an unapplicable proposal
    // stays pending.
    if status == "accepted" {
        let current = state.engine().get_config().await;
        if delta.apply_to(&current).is_none() {
            return Err(AppError::validation(
                "proposal no longer applies to the current config",
            ));
        }
    }

    let decided = decide_proposal(&proxy, &id, status)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    if !decided {
        return Err(AppError::conflict("Proposal was already decided"));
    }

    let applied_config = if status == "accepted" {
        Some(state.engine().apply_config_delta(&delta).await?)
    } else {
        None
    };

    if let Some(cache) = state.cache() {
        for key in [
            keys::proposal_list_key(None),
            keys::proposal_list_key(Some("pending")),
            keys::proposal_list_key(Some(status)),
        ] {
            cache.delete(&key).await;
        }
    }

    let proposal = get_proposal(&proxy, &id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("Proposal not found"))?;

    Ok(SuccessResponse::new(DecisionResponse {
        proposal,
        applied_config,
    }))
}
