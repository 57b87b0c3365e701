use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::engine::types::{
    AdaptiveAnswer, BloomAssessment, CognitiveLoad, FeedbackAck, FeedbackPayload, LearnerProfile,
    PersonalizationFactors, PersonalizeRequest, QueryRequest, ZpdAssessment,
};
use crate::response::{AppError, SuccessResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    interaction_id: String,
    feedback: FeedbackPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizeResponse {
    personalized_answer: String,
    personalization_factors: PersonalizationFactors,
    zpd_info: ZpdAssessment,
    bloom_info: BloomAssessment,
    cognitive_load: CognitiveLoad,
    personalization_failed: bool,
}

/// POST /api/adaptive-query
pub async fn adaptive_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<SuccessResponse<AdaptiveAnswer>, AppError> {
    if request.learner_id.trim().is_empty() || request.session_id.trim().is_empty() {
        return Err(AppError::validation("learnerId and sessionId are required"));
    }

    let answer = state.engine().process_query(request).await?;
    Ok(SuccessResponse::new(answer))
}

/// POST /api/personalization
pub async fn personalize_draft(
    State(state): State<AppState>,
    Json(request): Json<PersonalizeRequest>,
) -> Result<SuccessResponse<PersonalizeResponse>, AppError> {
    if request.learner_id.trim().is_empty() || request.session_id.trim().is_empty() {
        return Err(AppError::validation("learnerId and sessionId are required"));
    }

    let draft = state.engine().personalize(request).await?;
    Ok(SuccessResponse::new(PersonalizeResponse {
        personalized_answer: draft.personalized_answer,
        personalization_factors: draft.factors,
        zpd_info: draft.pedagogy.zpd,
        bloom_info: draft.pedagogy.bloom,
        cognitive_load: draft.pedagogy.cognitive_load,
        personalization_failed: draft.personalization_failed,
    }))
}

/// POST /api/feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<SuccessResponse<FeedbackAck>, AppError> {
    if request.interaction_id.trim().is_empty() {
        return Err(AppError::validation("interactionId is required"));
    }

    let ack = state
        .engine()
        .process_feedback(&request.interaction_id, &request.feedback)
        .await?;
    Ok(SuccessResponse::new(ack))
}

/// GET /api/profiles/:learnerId/:sessionId
pub async fn get_profile(
    State(state): State<AppState>,
    Path((learner_id, session_id)): Path<(String, String)>,
) -> Result<SuccessResponse<LearnerProfile>, AppError> {
    let profile = state
        .engine()
        .get_profile(&learner_id, &session_id)
        .await?
        .ok_or_else(|| AppError::not_found("Learner profile not found"))?;
    Ok(SuccessResponse::new(profile))
}
