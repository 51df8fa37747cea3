//! Append-only trail of edge mutations. Never consulted for counts.
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection};

use crate::{identity::ActorIdentity, subject::SubjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Liked,
    Unliked,
    /// Anonymous edge re-keyed to an account at login.
    Merged,
    /// Anonymous edge dropped at login because the account already had one.
    Discarded,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Liked => "liked",
            AuditAction::Unliked => "unliked",
            AuditAction::Merged => "merged",
            AuditAction::Discarded => "discarded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct AuditEntry {
    pub subject_id: String,
    pub action: String,
    pub identity_kind: String,
    pub identity_value: String,
    pub created_at: i64,
}

pub async fn append(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    action: AuditAction,
    identity: &ActorIdentity,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO wallpaper_like_log (wallpaper_id, action, identity_kind, identity_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(subject.as_str())
    .bind(action.as_str())
    .bind(identity.kind().as_str())
    .bind(identity.value())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Most recent entries first.
pub async fn history(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    limit: i64,
) -> Result<Vec<AuditEntry>, sqlx::Error> {
    sqlx::query_as(
        "SELECT wallpaper_id AS subject_id, action, identity_kind, identity_value, created_at
         FROM wallpaper_like_log WHERE wallpaper_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )
    .bind(subject.as_str())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
}
