//! # Toggle Coordinator
//!
//! Like/unlike in a single `BEGIN IMMEDIATE` transaction:
//!
//! 1. Prime the counter cache from the mirror column if the row is missing
//! 2. `has_like` picks the branch
//! 3. Liked: remove the edge, then count `-1`. Not liked: insert the edge, then count `+1`
//! 4. The cache, the mirror column, the account's lifetime total and the
//!    audit trail change only when the edge mutation changed a row
//! 5. Read the count back and commit
//!
//! The existence check is only a branch selector. Two requests that both see
//! "not liked" both insert, the unique index keeps one edge, and only the
//! request that wrote it moves the counters. Any error drops the transaction
//! unfinished, which rolls everything back, so a retry is always safe.
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::{
    audit::{self, AuditAction},
    counter,
    error::LedgerError,
    identity::{ActorIdentity, IdentityKind},
    store::{self, AddOutcome},
    subject::SubjectId,
    utils::now_millis,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Liked,
    Unliked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub action: ToggleAction,
    pub likes_count: i64,
    pub identity: IdentityKind,
}

#[derive(Clone)]
pub struct ToggleCoordinator {
    pool: SqlitePool,
}

impl ToggleCoordinator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn toggle(
        &self,
        subject: &SubjectId,
        identity: &ActorIdentity,
    ) -> Result<ToggleOutcome, LedgerError> {
        let now = now_millis();
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        counter::prime(&mut tx, subject, now).await?;

        let action = if store::has_like(&mut tx, subject, identity).await? {
            if store::remove_like(&mut tx, subject, identity).await? {
                record(&mut tx, subject, identity, -1, AuditAction::Unliked, now).await?;
            } else {
                debug!("Like on {subject} already removed by a concurrent request");
            }

            ToggleAction::Unliked
        } else {
            match store::add_like(&mut tx, subject, identity, now).await? {
                AddOutcome::Inserted => {
                    record(&mut tx, subject, identity, 1, AuditAction::Liked, now).await?;
                }
                AddOutcome::AlreadyPresent => {
                    debug!("Like on {subject} already written by a concurrent request");
                }
            }

            ToggleAction::Liked
        };

        let likes_count = counter::get_count(&mut tx, subject, now).await?;

        tx.commit().await?;

        info!(
            "Toggle {subject}: {action:?} by {}, count now {likes_count}",
            identity.kind().as_str()
        );

        Ok(ToggleOutcome {
            action,
            likes_count,
            identity: identity.kind(),
        })
    }
}

async fn record(
    conn: &mut SqliteConnection,
    subject: &SubjectId,
    identity: &ActorIdentity,
    delta: i64,
    action: AuditAction,
    now: i64,
) -> Result<(), sqlx::Error> {
    counter::adjust(conn, subject, delta, now).await?;
    counter::adjust_mirror(conn, subject, delta).await?;

    if let ActorIdentity::User(user_id) = identity {
        counter::adjust_user_total(conn, *user_id, delta, now).await?;
    }

    audit::append(conn, subject, action, identity, now).await
}

#[cfg(test)]
mod tests {
    use super::{ToggleAction, ToggleCoordinator};
    use crate::{
        audit::history,
        counter::user_total,
        database::{ScratchDb, edge_count, init_memory_pool, mirror_likes, seed_subject},
        identity::{ActorIdentity, IdentityKind},
        query::QueryService,
        subject::SubjectId,
    };

    fn subject(id: &str) -> SubjectId {
        SubjectId::parse(id).unwrap()
    }

    fn device() -> ActorIdentity {
        ActorIdentity::Device("abcffeecc0019283".to_string())
    }

    fn ip() -> ActorIdentity {
        ActorIdentity::Ip("203.0.113.5".to_string())
    }

    #[tokio::test]
    async fn test_flip() {
        let pool = init_memory_pool().await.unwrap();
        let toggle = ToggleCoordinator::new(pool);
        let a = subject("a");

        let actions = [
            toggle.toggle(&a, &ip()).await.unwrap().action,
            toggle.toggle(&a, &ip()).await.unwrap().action,
            toggle.toggle(&a, &ip()).await.unwrap().action,
        ];

        assert_eq!(actions, [ToggleAction::Liked, ToggleAction::Unliked, ToggleAction::Liked]);
    }

    #[tokio::test]
    async fn test_device_and_ip_scenario() {
        let pool = init_memory_pool().await.unwrap();
        seed_subject(&pool, "042", 0).await;
        let toggle = ToggleCoordinator::new(pool.clone());
        let s = subject("042");

        let first = toggle.toggle(&s, &device()).await.unwrap();
        assert_eq!((first.action, first.likes_count), (ToggleAction::Liked, 1));
        assert_eq!(first.identity, IdentityKind::DeviceFingerprint);

        let second = toggle.toggle(&s, &device()).await.unwrap();
        assert_eq!((second.action, second.likes_count), (ToggleAction::Unliked, 0));

        let from_ip = toggle.toggle(&s, &ip()).await.unwrap();
        assert_eq!((from_ip.action, from_ip.likes_count), (ToggleAction::Liked, 1));
        assert_eq!(from_ip.identity, IdentityKind::IpAddress);

        assert_eq!(mirror_likes(&pool, "042").await, 1);
    }

    #[tokio::test]
    async fn test_tiers_are_independent_edges() {
        let pool = init_memory_pool().await.unwrap();
        let toggle = ToggleCoordinator::new(pool.clone());
        let s = subject("042");

        toggle.toggle(&s, &device()).await.unwrap();
        let outcome = toggle.toggle(&s, &ip()).await.unwrap();

        assert_eq!(outcome.action, ToggleAction::Liked);
        assert_eq!(outcome.likes_count, 2);
        assert_eq!(edge_count(&pool, "042").await, 2);
    }

    #[tokio::test]
    async fn test_count_conservation() {
        let pool = init_memory_pool().await.unwrap();
        seed_subject(&pool, "a", 0).await;
        let toggle = ToggleCoordinator::new(pool.clone());
        let a = subject("a");

        // N = 6 likes from distinct identities, then M = 4 of them unlike.
        let identities: Vec<ActorIdentity> = (1..=6).map(ActorIdentity::User).collect();
        for identity in &identities {
            toggle.toggle(&a, identity).await.unwrap();
        }
        let mut last = 0;
        for identity in &identities[..4] {
            last = toggle.toggle(&a, identity).await.unwrap().likes_count;
        }

        assert_eq!(last, 2);
        assert_eq!(edge_count(&pool, "a").await, 2);
        assert_eq!(mirror_likes(&pool, "a").await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_identities() {
        let pool = init_memory_pool().await.unwrap();
        let toggle = ToggleCoordinator::new(pool.clone());
        let a = subject("a");

        let (user, device, ip) = (ActorIdentity::User(1), device(), ip());

        let (one, two, three) = tokio::join!(
            toggle.toggle(&a, &user),
            toggle.toggle(&a, &device),
            toggle.toggle(&a, &ip),
        );
        for outcome in [one, two, three] {
            assert_eq!(outcome.unwrap().action, ToggleAction::Liked);
        }

        let final_count = toggle.toggle(&a, &ActorIdentity::User(2)).await.unwrap().likes_count;
        assert_eq!(final_count, 4);
        assert_eq!(edge_count(&pool, "a").await, 4);
    }

    #[tokio::test]
    async fn test_count_never_negative() {
        let pool = init_memory_pool().await.unwrap();
        seed_subject(&pool, "a", 0).await;
        let toggle = ToggleCoordinator::new(pool.clone());
        let a = subject("a");

        // Stale cache row claiming fewer likes than edges exist.
        toggle.toggle(&a, &ip()).await.unwrap();
        toggle.toggle(&a, &device()).await.unwrap();
        sqlx::query("UPDATE wallpaper_like_counts SET likes_count = 0")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE wallpapers SET likes = 0").execute(&pool).await.unwrap();

        assert_eq!(toggle.toggle(&a, &ip()).await.unwrap().likes_count, 0);
        assert_eq!(toggle.toggle(&a, &device()).await.unwrap().likes_count, 0);
        assert_eq!(mirror_likes(&pool, "a").await, 0);
    }

    #[tokio::test]
    async fn test_first_toggle_starts_from_mirror() {
        let pool = init_memory_pool().await.unwrap();
        seed_subject(&pool, "legacy", 7).await;
        let toggle = ToggleCoordinator::new(pool.clone());

        let outcome = toggle.toggle(&subject("legacy"), &ip()).await.unwrap();

        assert_eq!(outcome.likes_count, 8);
        assert_eq!(mirror_likes(&pool, "legacy").await, 8);
    }

    #[tokio::test]
    async fn test_user_lifetime_total_and_audit() {
        let pool = init_memory_pool().await.unwrap();
        let toggle = ToggleCoordinator::new(pool.clone());
        let user = ActorIdentity::User(11);

        toggle.toggle(&subject("a"), &user).await.unwrap();
        toggle.toggle(&subject("b"), &user).await.unwrap();
        toggle.toggle(&subject("a"), &user).await.unwrap();
        toggle.toggle(&subject("c"), &ip()).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(user_total(&mut conn, 11).await.unwrap(), 1);

        let entries = history(&mut conn, &subject("a"), 10).await.unwrap();
        let actions: Vec<&str> = entries.iter().map(|entry| entry.action.as_str()).collect();
        assert_eq!(actions, ["unliked", "liked"]);
        assert_eq!(entries[0].identity_value, "11");
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let pool = init_memory_pool().await.unwrap();
        let toggle = ToggleCoordinator::new(pool.clone());

        sqlx::query("DROP TABLE wallpaper_like_log").execute(&pool).await.unwrap();

        let result = toggle.toggle(&subject("a"), &ip()).await;
        assert!(result.is_err());
        assert_eq!(edge_count(&pool, "a").await, 0);

        let cached: Option<i64> =
            sqlx::query_scalar("SELECT likes_count FROM wallpaper_like_counts WHERE wallpaper_id = 'a'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert_eq!(cached, None);
    }

    async fn assert_counters_agree(db: &ScratchDb, id: &str) -> i64 {
        let edges = edge_count(&db.pool, id).await;
        let cached = QueryService::new(db.pool.clone()).get_count(&subject(id)).await.unwrap();

        assert_eq!(cached, edges, "cache of {id}");
        assert_eq!(mirror_likes(&db.pool, id).await, edges, "mirror of {id}");

        edges
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_toggles_same_identity() {
        let db = ScratchDb::open("toggle-same", 8).await;
        seed_subject(&db.pool, "a", 0).await;
        let toggle = ToggleCoordinator::new(db.pool.clone());

        let tasks: Vec<_> = (0..24)
            .map(|_| {
                let toggle = toggle.clone();
                tokio::spawn(async move { toggle.toggle(&subject("a"), &ip()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Every toggle commits in turn, so an even number of flips ends unliked.
        assert_eq!(assert_counters_agree(&db, "a").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_toggles_mixed_identities() {
        let db = ScratchDb::open("toggle-mixed", 8).await;
        seed_subject(&db.pool, "a", 3).await;
        let toggle = ToggleCoordinator::new(db.pool.clone());

        // Twelve users like once each, while one device and one address
        // flip three times each.
        let mut identities: Vec<ActorIdentity> = (1..=12).map(ActorIdentity::User).collect();
        for _ in 0..3 {
            identities.push(device());
            identities.push(ip());
        }

        let tasks: Vec<_> = identities
            .into_iter()
            .map(|identity| {
                let toggle = toggle.clone();
                tokio::spawn(async move { toggle.toggle(&subject("a"), &identity).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(edge_count(&db.pool, "a").await, 14);

        // The mirror started at 3 with no edges behind it.
        let cached = QueryService::new(db.pool.clone()).get_count(&subject("a")).await.unwrap();
        assert_eq!(cached, 17);
        assert_eq!(mirror_likes(&db.pool, "a").await, 17);
    }
}
