//! # Counter Cache
//!
//! Per-subject like counts in `wallpaper_like_counts`, read before anything
//! else. The cache is derived data: a missing row is rebuilt from the
//! `wallpapers.likes` mirror column, which every toggle updates in the same
//! transaction as the edge itself.
//!
//! ## Discipline
//!
//! - Reads: cache hit, else mirror value (cached on the way out), else 0
//! - Writes: `adjust` upserts, starting absent rows at `max(0, delta)`
//! - Every count is floored at zero, both in the cache and the mirror
//!
//! The per-account lifetime counter in `user_like_summary` follows the same
//! floor and lives here too.
use std::collections::HashMap;

use sqlx::{QueryBuilder, SqliteConnection};

use crate::subject::SubjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recount {
    pub cached: Option<i64>,
    pub actual: i64,
}

impl Recount {
    pub fn drifted(&self) -> bool {
        self.cached != Some(self.actual)
    }
}

async fn cached(conn: &mut SqliteConnection, subject: &SubjectId) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT likes_count FROM wallpaper_like_counts WHERE wallpaper_id = ?1")
        .bind(subject.as_str())
        .fetch_optional(&mut *conn)
        .await
}

async fn mirror(conn: &mut SqliteConnection, subject: &SubjectId) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT likes FROM wallpapers WHERE id = ?1")
        .bind(subject.as_str())
        .fetch_optional(&mut *conn)
        .await
}

pub async fn get_count(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    now: i64,
) -> Result<i64, sqlx::Error> {
    if let Some(count) = cached(conn, subject).await? {
        return Ok(count);
    }

    let Some(likes) = mirror(conn, subject).await? else {
        return Ok(0);
    };
    let likes = likes.max(0);

    // A toggle may have created the row since the miss; its value wins.
    sqlx::query(
        "INSERT INTO wallpaper_like_counts (wallpaper_id, likes_count, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(wallpaper_id) DO NOTHING",
    )
    .bind(subject.as_str())
    .bind(likes)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(likes)
}

/// Every requested subject appears in the result, unknown ones as 0.
pub async fn batch_get_counts(
    conn: &mut SqliteConnection,
    subjects: &[SubjectId],
    now: i64,
) -> Result<HashMap<SubjectId, i64>, sqlx::Error> {
    if subjects.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query = QueryBuilder::new(
        "SELECT wallpaper_id, likes_count FROM wallpaper_like_counts WHERE wallpaper_id IN (",
    );
    let mut ids = query.separated(", ");
    for subject in subjects {
        ids.push_bind(subject.as_str());
    }
    query.push(")");

    let rows: Vec<(String, i64)> = query.build_query_as().fetch_all(&mut *conn).await?;
    let mut found: HashMap<String, i64> = rows.into_iter().collect();

    let missing: Vec<&SubjectId> = subjects
        .iter()
        .filter(|subject| !found.contains_key(subject.as_str()))
        .collect();

    if !missing.is_empty() {
        let mut query = QueryBuilder::new("SELECT id, MAX(0, likes) FROM wallpapers WHERE id IN (");
        let mut ids = query.separated(", ");
        for subject in &missing {
            ids.push_bind(subject.as_str());
        }
        query.push(")");

        let mirrored: Vec<(String, i64)> = query.build_query_as().fetch_all(&mut *conn).await?;

        if !mirrored.is_empty() {
            let mut insert = QueryBuilder::new(
                "INSERT INTO wallpaper_like_counts (wallpaper_id, likes_count, updated_at) ",
            );
            insert.push_values(&mirrored, |mut row, (id, likes)| {
                row.push_bind(id.as_str()).push_bind(*likes).push_bind(now);
            });
            insert.push(" ON CONFLICT(wallpaper_id) DO NOTHING");
            insert.build().execute(&mut *conn).await?;
        }

        found.extend(mirrored);
    }

    Ok(subjects
        .iter()
        .map(|subject| {
            let count = found.get(subject.as_str()).copied().unwrap_or(0);
            (subject.clone(), count)
        })
        .collect())
}

/// Seeds the cache row from the mirror if it is absent, so a following
/// `adjust` starts from the subject's historical count.
pub async fn prime(conn: &mut SqliteConnection, subject: &SubjectId, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO wallpaper_like_counts (wallpaper_id, likes_count, updated_at)
         SELECT id, MAX(0, likes), ?2 FROM wallpapers WHERE id = ?1
         ON CONFLICT(wallpaper_id) DO NOTHING",
    )
    .bind(subject.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn adjust(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    delta: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO wallpaper_like_counts (wallpaper_id, likes_count, updated_at)
         VALUES (?1, MAX(0, ?2), ?3)
         ON CONFLICT(wallpaper_id) DO UPDATE
         SET likes_count = MAX(0, wallpaper_like_counts.likes_count + ?2), updated_at = ?3",
    )
    .bind(subject.as_str())
    .bind(delta)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// No-op when the catalog has no record for the subject.
pub async fn adjust_mirror(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    delta: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE wallpapers SET likes = MAX(0, likes + ?2) WHERE id = ?1")
        .bind(subject.as_str())
        .bind(delta)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn adjust_user_total(
    conn: &mut SqliteConnection,
    user_id: i64,
    delta: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    if delta > 0 {
        sqlx::query(
            "INSERT INTO user_like_summary (user_id, total_likes, last_like_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(user_id) DO UPDATE
             SET total_likes = user_like_summary.total_likes + ?2, last_like_at = ?3, updated_at = ?3",
        )
        .bind(user_id)
        .bind(delta)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            "UPDATE user_like_summary SET total_likes = MAX(0, total_likes + ?2), updated_at = ?3
             WHERE user_id = ?1",
        )
        .bind(user_id)
        .bind(delta)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn user_total(conn: &mut SqliteConnection, user_id: i64) -> Result<i64, sqlx::Error> {
    let total: Option<i64> =
        sqlx::query_scalar("SELECT total_likes FROM user_like_summary WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(total.unwrap_or(0))
}

/// Every subject known to the edge table, the cache or the catalog.
pub async fn known_subjects(conn: &mut SqliteConnection) -> Result<Vec<SubjectId>, sqlx::Error> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT wallpaper_id FROM wallpaper_likes
         UNION SELECT wallpaper_id FROM wallpaper_like_counts
         UNION SELECT id FROM wallpapers
         ORDER BY 1",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids.into_iter().map(SubjectId::from_stored).collect())
}

/// Resets the cache row and mirror column of one subject to its edge count.
pub async fn recount(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    now: i64,
) -> Result<Recount, sqlx::Error> {
    let previous = cached(conn, subject).await?;

    let actual: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wallpaper_likes WHERE wallpaper_id = ?1")
        .bind(subject.as_str())
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query(
        "INSERT INTO wallpaper_like_counts (wallpaper_id, likes_count, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(wallpaper_id) DO UPDATE SET likes_count = ?2, updated_at = ?3",
    )
    .bind(subject.as_str())
    .bind(actual)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE wallpapers SET likes = ?2 WHERE id = ?1")
        .bind(subject.as_str())
        .bind(actual)
        .execute(&mut *conn)
        .await?;

    Ok(Recount {
        cached: previous,
        actual,
    })
}
