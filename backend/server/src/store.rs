//! # Like Store
//!
//! Authoritative edge table. Each function takes a bare connection so it can
//! run on a pooled connection or inside a caller's transaction.
//!
//! Identity predicates:
//! - `User(id)`: `user_id = id`, other columns ignored
//! - `Device(fp)`: `device_fingerprint = fp`, `user_id` and `ip_address` unset
//! - `Ip(addr)`: `ip_address = addr`, `user_id` and `device_fingerprint` unset
use std::collections::HashSet;

use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use crate::{identity::ActorIdentity, subject::SubjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// A concurrent request already wrote the same edge.
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LikedSubject {
    pub subject_id: String,
    pub liked_at: i64,
}

fn push_identity<'a>(query: &mut QueryBuilder<'a, Sqlite>, identity: &'a ActorIdentity) {
    match identity {
        ActorIdentity::User(id) => {
            query.push("user_id = ").push_bind(*id);
        }
        ActorIdentity::Device(fp) => {
            query
                .push("user_id IS NULL AND ip_address IS NULL AND device_fingerprint = ")
                .push_bind(fp.as_str());
        }
        ActorIdentity::Ip(addr) => {
            query
                .push("user_id IS NULL AND device_fingerprint IS NULL AND ip_address = ")
                .push_bind(addr.as_str());
        }
    }
}

pub async fn has_like(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    identity: &ActorIdentity,
) -> Result<bool, sqlx::Error> {
    let mut query = QueryBuilder::new("SELECT COUNT(*) FROM wallpaper_likes WHERE wallpaper_id = ");
    query.push_bind(subject.as_str()).push(" AND ");
    push_identity(&mut query, identity);

    let count: i64 = query.build_query_scalar().fetch_one(&mut *conn).await?;

    Ok(count > 0)
}

pub async fn batch_has_like(
    conn: &mut SqliteConnection,
    subjects: &[SubjectId],
    identity: &ActorIdentity,
) -> Result<HashSet<String>, sqlx::Error> {
    if subjects.is_empty() {
        return Ok(HashSet::new());
    }

    let mut query =
        QueryBuilder::new("SELECT DISTINCT wallpaper_id FROM wallpaper_likes WHERE wallpaper_id IN (");
    let mut ids = query.separated(", ");
    for subject in subjects {
        ids.push_bind(subject.as_str());
    }
    query.push(") AND ");
    push_identity(&mut query, identity);

    let liked: Vec<String> = query.build_query_scalar().fetch_all(&mut *conn).await?;

    Ok(liked.into_iter().collect())
}

/// Upsert-or-ignore on the tier's unique index, so two racing inserts leave
/// one edge and no error.
pub async fn add_like(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    identity: &ActorIdentity,
    now: i64,
) -> Result<AddOutcome, sqlx::Error> {
    let (user_id, device_fingerprint, ip_address) = identity.columns();

    let result = sqlx::query(
        "INSERT INTO wallpaper_likes (wallpaper_id, user_id, device_fingerprint, ip_address, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT DO NOTHING",
    )
    .bind(subject.as_str())
    .bind(user_id)
    .bind(device_fingerprint)
    .bind(ip_address)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(match result.rows_affected() {
        0 => AddOutcome::AlreadyPresent,
        _ => AddOutcome::Inserted,
    })
}

/// Returns whether an edge was actually deleted.
pub async fn remove_like(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    identity: &ActorIdentity,
) -> Result<bool, sqlx::Error> {
    let mut query = QueryBuilder::new("DELETE FROM wallpaper_likes WHERE wallpaper_id = ");
    query.push_bind(subject.as_str()).push(" AND ");
    push_identity(&mut query, identity);

    let result = query.build().execute(&mut *conn).await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_liked(
    conn: &mut SqliteConnection,
    identity: &ActorIdentity,
) -> Result<i64, sqlx::Error> {
    let mut query = QueryBuilder::new("SELECT COUNT(*) FROM wallpaper_likes WHERE ");
    push_identity(&mut query, identity);

    query.build_query_scalar().fetch_one(&mut *conn).await
}

/// Newest first.
pub async fn liked_subjects(
    conn: &mut SqliteConnection,
    identity: &ActorIdentity,
    limit: i64,
    offset: i64,
) -> Result<Vec<LikedSubject>, sqlx::Error> {
    let mut query = QueryBuilder::new(
        "SELECT wallpaper_id AS subject_id, created_at AS liked_at FROM wallpaper_likes WHERE ",
    );
    push_identity(&mut query, identity);
    query
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    query.build_query_as().fetch_all(&mut *conn).await
}

/// Subjects liked anonymously from `ip`, oldest first.
pub async fn anonymous_ip_subjects(
    conn: &mut SqliteConnection,
    ip: &str,
) -> Result<Vec<SubjectId>, sqlx::Error> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT wallpaper_id FROM wallpaper_likes
         WHERE ip_address = ?1 AND user_id IS NULL AND device_fingerprint IS NULL
         ORDER BY created_at, id",
    )
    .bind(ip)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids.into_iter().map(SubjectId::from_stored).collect())
}

/// Moves an anonymous IP edge onto an account, keeping its timestamp.
pub async fn rekey_ip_edge(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    ip: &str,
    user_id: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE wallpaper_likes SET user_id = ?3, ip_address = NULL
         WHERE wallpaper_id = ?1 AND ip_address = ?2 AND user_id IS NULL AND device_fingerprint IS NULL",
    )
    .bind(subject.as_str())
    .bind(ip)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
