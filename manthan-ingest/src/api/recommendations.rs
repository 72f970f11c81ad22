//! POST /api/recommendations/content

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use super::extract::ApiJson;
use crate::market::{static_suggestions, ContentSuggestions};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RecommendRequest {
    pub region: Option<String>,
    pub language: Option<String>,
    pub genre: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecommendResponse {
    pub suggestions: ContentSuggestions,
}

/// Static suggestions for the requested region
pub async fn recommend_content(
    State(_state): State<AppState>,
    ApiJson(request): ApiJson<RecommendRequest>,
) -> Json<RecommendResponse> {
    tracing::debug!(
        region = ?request.region,
        language = ?request.language,
        genre = ?request.genre,
        "Content recommendation request"
    );
    Json(RecommendResponse {
        suggestions: static_suggestions(request.region.as_deref()),
    })
}

pub fn recommendation_routes() -> Router<AppState> {
    Router::new().route("/api/recommendations/content", post(recommend_content))
}
