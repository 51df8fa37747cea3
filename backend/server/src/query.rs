//! # Query Service
//!
//! Read side of the ledger: like status, counts, rankings, statistics and the
//! per-actor "my likes" page.
//!
//! Counts always go through the counter cache. Time bounded rankings are the
//! exception: the cache holds no timestamps, so `week` and `month` are
//! counted straight from edge creation times on every call.
use std::{collections::HashMap, str::FromStr};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    counter,
    error::LedgerError,
    identity::ActorIdentity,
    store::{self, LikedSubject},
    subject::SubjectId,
    utils::{now_millis, start_of_day_millis},
};

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[default]
    All,
    Week,
    Month,
}

impl TimeRange {
    pub fn window(self) -> Option<Duration> {
        match self {
            TimeRange::All => None,
            TimeRange::Week => Some(Duration::days(7)),
            TimeRange::Month => Some(Duration::days(30)),
        }
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TimeRange::All),
            "week" => Ok(TimeRange::Week),
            "month" => Ok(TimeRange::Month),
            other => Err(format!("unknown range {other:?}, expected all, week or month")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ranking {
    pub rank: u32,
    pub subject_id: String,
    pub likes_count: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_likes: i64,
    pub subjects_with_likes: i64,
    pub today_likes: i64,
    pub week_likes: i64,
    pub active_identities_week: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LikedPage {
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub items: Vec<LikedSubject>,
}

fn clamp_page_size(size: u32) -> u32 {
    size.clamp(1, MAX_PAGE_SIZE)
}

#[derive(Clone)]
pub struct QueryService {
    pool: SqlitePool,
}

impl QueryService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn is_liked(
        &self,
        subject: &SubjectId,
        identity: &ActorIdentity,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;

        Ok(store::has_like(&mut conn, subject, identity).await?)
    }

    pub async fn batch_is_liked(
        &self,
        subjects: &[SubjectId],
        identity: &ActorIdentity,
    ) -> Result<HashMap<SubjectId, bool>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let liked = store::batch_has_like(&mut conn, subjects, identity).await?;

        Ok(subjects
            .iter()
            .map(|subject| (subject.clone(), liked.contains(subject.as_str())))
            .collect())
    }

    pub async fn get_count(&self, subject: &SubjectId) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;

        Ok(counter::get_count(&mut conn, subject, now_millis()).await?)
    }

    pub async fn batch_get_counts(
        &self,
        subjects: &[SubjectId],
    ) -> Result<HashMap<SubjectId, i64>, LedgerError> {
        let mut conn = self.pool.acquire().await?;

        Ok(counter::batch_get_counts(&mut conn, subjects, now_millis()).await?)
    }

    /// `limit` is clamped into `1..=100`.
    pub async fn top_liked(&self, limit: u32, range: TimeRange) -> Result<Vec<Ranking>, LedgerError> {
        let limit = i64::from(clamp_page_size(limit));
        let mut conn = self.pool.acquire().await?;

        let rows: Vec<(String, i64)> = match range.window() {
            None => {
                sqlx::query_as(
                    "SELECT wallpaper_id, likes_count FROM wallpaper_like_counts
                     WHERE likes_count > 0
                     ORDER BY likes_count DESC, wallpaper_id
                     LIMIT ?1",
                )
                .bind(limit)
                .fetch_all(&mut *conn)
                .await?
            }
            Some(window) => {
                let since = (Utc::now() - window).timestamp_millis();

                sqlx::query_as(
                    "SELECT wallpaper_id, COUNT(*) AS likes_count FROM wallpaper_likes
                     WHERE created_at >= ?1
                     GROUP BY wallpaper_id
                     ORDER BY likes_count DESC, wallpaper_id
                     LIMIT ?2",
                )
                .bind(since)
                .bind(limit)
                .fetch_all(&mut *conn)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .zip(1..)
            .map(|((subject_id, likes_count), rank)| Ranking {
                rank,
                subject_id,
                likes_count,
            })
            .collect())
    }

    pub async fn statistics(&self) -> Result<Statistics, LedgerError> {
        let now = Utc::now();
        let today = start_of_day_millis(now);
        let week = (now - Duration::days(7)).timestamp_millis();
        let mut conn = self.pool.acquire().await?;

        let (total_likes, subjects_with_likes): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(likes_count), 0), COUNT(*) FROM wallpaper_like_counts
             WHERE likes_count > 0",
        )
        .fetch_one(&mut *conn)
        .await?;

        let (today_likes, week_likes, active_identities_week): (i64, i64, i64) = sqlx::query_as(
            "SELECT
                COALESCE(SUM(created_at >= ?1), 0),
                COUNT(*),
                COUNT(DISTINCT COALESCE(
                    'user:' || user_id,
                    'device:' || device_fingerprint,
                    'ip:' || ip_address
                ))
             FROM wallpaper_likes
             WHERE created_at >= ?2",
        )
        .bind(today)
        .bind(week)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Statistics {
            total_likes,
            subjects_with_likes,
            today_likes,
            week_likes,
            active_identities_week,
        })
    }

    /// Pages are 1-based, `per_page` is clamped into `1..=100`.
    pub async fn liked_subjects(
        &self,
        identity: &ActorIdentity,
        page: u32,
        per_page: u32,
    ) -> Result<LikedPage, LedgerError> {
        let page = page.max(1);
        let per_page = clamp_page_size(per_page);
        let offset = i64::from(page - 1) * i64::from(per_page);
        let mut conn = self.pool.acquire().await?;

        let total = store::count_liked(&mut conn, identity).await?;
        let items = store::liked_subjects(&mut conn, identity, i64::from(per_page), offset).await?;

        Ok(LikedPage {
            total,
            page,
            per_page,
            items,
        })
    }

    pub async fn likes_given(&self, user_id: i64) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;

        Ok(counter::user_total(&mut conn, user_id).await?)
    }
}
