use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::LedgerError,
    merge::MergeReport,
    query::{LikedPage, MAX_PAGE_SIZE, Ranking, Statistics, TimeRange},
    state::AppState,
    subject::{SubjectId, parse_subject_list},
    toggle::ToggleOutcome,
    utils::Caller,
};

const DEFAULT_TOP_LIMIT: u32 = 10;
const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Deserialize)]
pub struct TogglePayload {
    subject_id: String,
    #[serde(default)]
    device_fingerprint: Option<String>,
}

#[derive(Deserialize)]
pub struct SubjectParams {
    subject_id: Option<String>,
    subject_ids: Option<String>,
    device_fingerprint: Option<String>,
    include_count: Option<String>,
}

#[derive(Deserialize)]
pub struct TopParams {
    limit: Option<String>,
    range: Option<String>,
}

#[derive(Deserialize)]
pub struct PageParams {
    page: Option<String>,
    per_page: Option<String>,
    device_fingerprint: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum StatusResponse {
    Single {
        subject_id: SubjectId,
        is_liked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        likes_count: Option<i64>,
    },
    Batch {
        statuses: BTreeMap<SubjectId, bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        counts: Option<BTreeMap<SubjectId, i64>>,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum CountResponse {
    Single {
        subject_id: SubjectId,
        likes_count: i64,
    },
    Batch {
        counts: BTreeMap<SubjectId, i64>,
    },
}

#[derive(Serialize)]
pub struct TopResponse {
    range: TimeRange,
    rankings: Vec<Ranking>,
}

/// Numeric query values are clamped into `min..=max`. Anything unparsable
/// falls back to `default`, never a rejection.
fn clamped(raw: Option<&str>, default: u32, min: u32, max: u32) -> u32 {
    raw.and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(|n| n.clamp(i64::from(min), i64::from(max)))
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(default)
}

fn flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|raw| raw.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

/// Unknown ranges rank over all time.
fn time_range(raw: Option<&str>) -> TimeRange {
    match raw.map(str::parse::<TimeRange>) {
        Some(Ok(range)) => range,
        Some(Err(e)) => {
            debug!("Falling back to all-time ranking: {e}");
            TimeRange::All
        }
        None => TimeRange::All,
    }
}

enum Target {
    One(SubjectId),
    Many(Vec<SubjectId>),
}

fn target(
    subject_id: Option<&str>,
    subject_ids: Option<&str>,
    max_batch: usize,
) -> Result<Target, LedgerError> {
    match (subject_ids, subject_id) {
        (Some(list), _) => Ok(Target::Many(parse_subject_list(list, max_batch)?)),
        (None, Some(id)) => Ok(Target::One(SubjectId::parse(id)?)),
        (None, None) => Err(LedgerError::InvalidSubject(String::new())),
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            warn!("Health check failed: {e:?}");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

pub async fn toggle_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<TogglePayload>,
) -> Result<Json<ToggleOutcome>, LedgerError> {
    let subject = SubjectId::parse(&payload.subject_id)?;
    let identity = caller.identity(payload.device_fingerprint.as_deref());

    let outcome = state.toggle.toggle(&subject, &identity).await?;

    Ok(Json(outcome))
}

/// Storage failures degrade to "not liked" and zero counts.
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<SubjectParams>,
) -> Result<Json<StatusResponse>, LedgerError> {
    let identity = caller.identity(params.device_fingerprint.as_deref());
    let include_count = flag(params.include_count.as_deref());

    let response = match target(
        params.subject_id.as_deref(),
        params.subject_ids.as_deref(),
        state.config.max_batch,
    )? {
        Target::One(subject) => {
            let is_liked = state.query.is_liked(&subject, &identity).await.unwrap_or_else(|e| {
                warn!("Like status for {subject} unavailable: {e:?}");
                false
            });

            let likes_count = if include_count {
                Some(count_or_zero(&state, &subject).await)
            } else {
                None
            };

            StatusResponse::Single {
                subject_id: subject,
                is_liked,
                likes_count,
            }
        }
        Target::Many(subjects) => {
            let statuses = match state.query.batch_is_liked(&subjects, &identity).await {
                Ok(statuses) => statuses.into_iter().collect(),
                Err(e) => {
                    warn!("Batch like status unavailable: {e:?}");
                    subjects.iter().map(|subject| (subject.clone(), false)).collect()
                }
            };

            let counts = if include_count {
                Some(counts_or_zero(&state, &subjects).await)
            } else {
                None
            };

            StatusResponse::Batch { statuses, counts }
        }
    };

    Ok(Json(response))
}

pub async fn count_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubjectParams>,
) -> Result<Json<CountResponse>, LedgerError> {
    let response = match target(
        params.subject_id.as_deref(),
        params.subject_ids.as_deref(),
        state.config.max_batch,
    )? {
        Target::One(subject) => CountResponse::Single {
            likes_count: count_or_zero(&state, &subject).await,
            subject_id: subject,
        },
        Target::Many(subjects) => CountResponse::Batch {
            counts: counts_or_zero(&state, &subjects).await,
        },
    };

    Ok(Json(response))
}

pub async fn top_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopParams>,
) -> Json<TopResponse> {
    let limit = clamped(params.limit.as_deref(), DEFAULT_TOP_LIMIT, 1, MAX_PAGE_SIZE);
    let range = time_range(params.range.as_deref());

    let rankings = state
        .query
        .top_liked(limit, range)
        .await
        .unwrap_or_else(|e| {
            warn!("Rankings unavailable: {e:?}");
            Vec::new()
        });

    Json(TopResponse { range, rankings })
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<Statistics> {
    let stats = state.query.statistics().await.unwrap_or_else(|e| {
        warn!("Statistics unavailable: {e:?}");
        Statistics::default()
    });

    Json(stats)
}

pub async fn mine_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<LikedPage> {
    let identity = caller.identity(params.device_fingerprint.as_deref());
    let page = clamped(params.page.as_deref(), 1, 1, u32::MAX);
    let per_page = clamped(params.per_page.as_deref(), DEFAULT_PAGE_SIZE, 1, MAX_PAGE_SIZE);

    let liked = state
        .query
        .liked_subjects(&identity, page, per_page)
        .await
        .unwrap_or_else(|e| {
            warn!("Liked page unavailable: {e:?}");
            LikedPage {
                total: 0,
                page,
                per_page,
                items: Vec::new(),
            }
        });

    Json(liked)
}

pub async fn merge_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<MergeReport>, LedgerError> {
    let user_id = caller.user_id.ok_or(LedgerError::Unauthenticated)?;

    let report = state.merger.merge(user_id, &caller.anonymous()).await?;

    Ok(Json(report))
}

async fn count_or_zero(state: &AppState, subject: &SubjectId) -> i64 {
    state.query.get_count(subject).await.unwrap_or_else(|e| {
        warn!("Like count for {subject} unavailable: {e:?}");
        0
    })
}

async fn counts_or_zero(state: &AppState, subjects: &[SubjectId]) -> BTreeMap<SubjectId, i64> {
    match state.query.batch_get_counts(subjects).await {
        Ok(counts) => counts.into_iter().collect(),
        Err(e) => {
            warn!("Batch like counts unavailable: {e:?}");
            subjects.iter().map(|subject| (subject.clone(), 0)).collect()
        }
    }
}
