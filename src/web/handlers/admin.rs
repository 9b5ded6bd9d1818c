//! Admin API handlers.
//!
//! Read-only views over subscriptions, callback logs and podcasts, plus
//! manual actions that call straight into the engine.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use crate::engine::AddedFeedSummary;
use crate::feed::repository::{EpisodeRepository, PodcastRepository};
use crate::web::dto::{
    AddFeedRequest, ApiResponse, CallbackLogQuery, CallbackLogResponse, EpisodeResponse,
    PaginatedResponse, PaginationQuery, PodcastDetailResponse, PodcastResponse, SetDeadRequest,
    SubscribeResponse, SubscriptionListQuery, SubscriptionResponse, SweepResponse, SyncResponse,
    TopicRequest, UnsubscribeResponse, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::websub::repository::{CallbackLogRepository, SubscriptionRepository};
use crate::websub::types::SubscriptionStatus;

/// Episodes shown on the podcast detail view.
const RECENT_EPISODES: i64 = 20;

/// GET /api/subscriptions - List subscriptions.
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubscriptionListQuery>,
) -> Result<Json<PaginatedResponse<SubscriptionResponse>>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some("pending") => Some(SubscriptionStatus::Pending),
        Some("active") => Some(SubscriptionStatus::Active),
        Some("expired") => Some(SubscriptionStatus::Expired),
        Some(other) => return Err(ApiError::bad_request(format!("Unknown status: {}", other))),
    };
    let pagination = query.pagination();
    let (limit, offset) = pagination.limit_offset();

    let subscriptions = SubscriptionRepository::new(state.engine.db().pool())
        .list(status, limit, offset)
        .await?;

    Ok(Json(PaginatedResponse::new(
        subscriptions.into_iter().map(SubscriptionResponse::from).collect(),
        pagination.page(),
        pagination.per_page(),
    )))
}

/// GET /api/callback-logs - List callback log entries, newest first.
pub async fn list_callback_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackLogQuery>,
) -> Result<Json<PaginatedResponse<CallbackLogResponse>>, ApiError> {
    let pagination = query.pagination();
    let (limit, offset) = pagination.limit_offset();

    let logs = CallbackLogRepository::new(state.engine.db().pool())
        .list(query.topic.as_deref(), limit, offset)
        .await?;

    Ok(Json(PaginatedResponse::new(
        logs.into_iter().map(CallbackLogResponse::from).collect(),
        pagination.page(),
        pagination.per_page(),
    )))
}

/// GET /api/podcasts - List podcasts.
pub async fn list_podcasts(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<PaginatedResponse<PodcastResponse>>, ApiError> {
    let (limit, offset) = pagination.limit_offset();
    let podcasts = PodcastRepository::new(state.engine.db().pool())
        .list(limit, offset)
        .await?;

    Ok(Json(PaginatedResponse::new(
        podcasts.into_iter().map(PodcastResponse::from).collect(),
        pagination.page(),
        pagination.per_page(),
    )))
}

/// GET /api/podcasts/:id - Podcast with recent episodes.
pub async fn get_podcast(
    State(state): State<Arc<AppState>>,
    Path(podcast_id): Path<i64>,
) -> Result<Json<ApiResponse<PodcastDetailResponse>>, ApiError> {
    let pool = state.engine.db().pool();
    let podcast = PodcastRepository::new(pool)
        .get_by_id(podcast_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Podcast not found"))?;

    let episodes = EpisodeRepository::new(pool);
    let episode_count = episodes.count_by_podcast(podcast.id).await?;
    let recent_episodes = episodes
        .list_by_podcast(podcast.id, RECENT_EPISODES)
        .await?
        .into_iter()
        .map(EpisodeResponse::from)
        .collect();

    Ok(Json(ApiResponse::new(PodcastDetailResponse {
        podcast: PodcastResponse::from(podcast),
        episode_count,
        recent_episodes,
    })))
}

/// PUT /api/podcasts/:id/dead - Mark a podcast dead or alive.
pub async fn set_podcast_dead(
    State(state): State<Arc<AppState>>,
    Path(podcast_id): Path<i64>,
    Json(req): Json<SetDeadRequest>,
) -> Result<Json<ApiResponse<PodcastResponse>>, ApiError> {
    let podcasts = PodcastRepository::new(state.engine.db().pool());
    if !podcasts
        .set_dead(podcast_id, req.dead, state.engine.clock().now())
        .await?
    {
        return Err(ApiError::not_found("Podcast not found"));
    }

    tracing::info!(podcast_id, dead = req.dead, "Podcast dead flag changed");
    let podcast = podcasts
        .get_by_id(podcast_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Podcast not found"))?;
    Ok(Json(ApiResponse::new(PodcastResponse::from(podcast))))
}

/// POST /api/feeds - Register a feed, sync it and subscribe.
pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<AddFeedRequest>,
) -> Result<Json<ApiResponse<AddedFeedSummary>>, ApiError> {
    let added = state.engine.add_feed(req.url.trim()).await?;
    Ok(Json(ApiResponse::new(AddedFeedSummary::from(&added))))
}

/// POST /api/feeds/resync - Pull-sync a topic now.
pub async fn resync_feed(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<TopicRequest>,
) -> Result<Json<ApiResponse<SyncResponse>>, ApiError> {
    let known = PodcastRepository::new(state.engine.db().pool())
        .get_by_feed_url(&req.topic)
        .await?;
    if known.is_none() {
        return Err(ApiError::not_found("Podcast not found"));
    }

    let outcome = state.engine.synchronizer().sync_topic(&req.topic).await?;
    Ok(Json(ApiResponse::new(SyncResponse::new(req.topic, &outcome))))
}

/// POST /api/subscriptions/renew - Re-send the subscribe request.
pub async fn renew_subscription(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<TopicRequest>,
) -> Result<Json<ApiResponse<SubscribeResponse>>, ApiError> {
    let outcome = state.engine.manager().renew(&req.topic).await?;
    Ok(Json(ApiResponse::new(SubscribeResponse::new(req.topic, &outcome))))
}

/// POST /api/subscriptions/unsubscribe - Ask the hub to drop a subscription.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<TopicRequest>,
) -> Result<Json<ApiResponse<UnsubscribeResponse>>, ApiError> {
    let outcome = state.engine.manager().unsubscribe(&req.topic).await?;
    Ok(Json(ApiResponse::new(UnsubscribeResponse::new(req.topic, &outcome))))
}

/// POST /api/sweep - Run a reconciliation sweep now.
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<SweepResponse>>, ApiError> {
    let report = state.engine.scheduler().run_once().await?;
    Ok(Json(ApiResponse::new(SweepResponse {
        ran: report.is_some(),
        report,
    })))
}
