//! # Migration Merger
//!
//! Runs once after login and folds the likes a visitor gave anonymously from
//! their network address into their account.
//!
//! For every anonymous `Ip` edge:
//! - account already likes the subject: drop the anonymous edge, count `-1`
//! - otherwise: re-key the edge to the account, subject total unchanged
//!
//! Each subject commits on its own, inside a `BEGIN IMMEDIATE` transaction
//! so the write lock is taken before the first read. A subject that still
//! fails is counted in `failed_count`. A partially applied merge is fine to
//! retry since merged edges no longer match the anonymous predicate.
//!
//! Device fingerprint edges are never merged, only address edges.
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::{
    audit::{self, AuditAction},
    counter,
    error::LedgerError,
    identity::ActorIdentity,
    store,
    subject::SubjectId,
    utils::now_millis,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub synced_count: u32,
    pub skipped_count: u32,
    pub failed_count: u32,
    pub total_guest_likes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStep {
    Rekeyed,
    Discarded,
    /// Already handled by an earlier or concurrent merge.
    Gone,
}

#[derive(Clone)]
pub struct MigrationMerger {
    pool: SqlitePool,
}

impl MigrationMerger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn merge(
        &self,
        user_id: i64,
        anonymous: &ActorIdentity,
    ) -> Result<MergeReport, LedgerError> {
        let ip = match anonymous {
            ActorIdentity::Ip(ip) => ip.as_str(),
            other => {
                debug!("Skipping merge for {} identity", other.kind().as_str());
                return Ok(MergeReport::default());
            }
        };

        let subjects = {
            let mut conn = self.pool.acquire().await?;
            store::anonymous_ip_subjects(&mut conn, ip).await?
        };

        let mut report = MergeReport {
            total_guest_likes: u32::try_from(subjects.len()).unwrap_or(u32::MAX),
            ..MergeReport::default()
        };

        for subject in &subjects {
            match self.merge_subject(user_id, ip, subject).await {
                Ok(MergeStep::Rekeyed) => report.synced_count += 1,
                Ok(MergeStep::Discarded) => report.skipped_count += 1,
                Ok(MergeStep::Gone) => {}
                Err(e) => {
                    warn!("Merge of {subject} into user {user_id} failed: {e:?}");
                    report.failed_count += 1;
                }
            }
        }

        info!(
            "Merged likes from {ip} into user {user_id}: synced {}, skipped {}, failed {}, total {}",
            report.synced_count, report.skipped_count, report.failed_count, report.total_guest_likes
        );

        Ok(report)
    }

    async fn merge_subject(
        &self,
        user_id: i64,
        ip: &str,
        subject: &SubjectId,
    ) -> Result<MergeStep, sqlx::Error> {
        let now = now_millis();
        let anonymous = ActorIdentity::Ip(ip.to_string());
        let user = ActorIdentity::User(user_id);

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        if !store::has_like(&mut tx, subject, &anonymous).await? {
            return Ok(MergeStep::Gone);
        }

        let step = if store::has_like(&mut tx, subject, &user).await? {
            counter::prime(&mut tx, subject, now).await?;
            if !store::remove_like(&mut tx, subject, &anonymous).await? {
                return Ok(MergeStep::Gone);
            }
            counter::adjust(&mut tx, subject, -1, now).await?;
            counter::adjust_mirror(&mut tx, subject, -1).await?;
            audit::append(&mut tx, subject, AuditAction::Discarded, &anonymous, now).await?;

            MergeStep::Discarded
        } else {
            if !store::rekey_ip_edge(&mut tx, subject, ip, user_id).await? {
                return Ok(MergeStep::Gone);
            }
            counter::adjust_user_total(&mut tx, user_id, 1, now).await?;
            audit::append(&mut tx, subject, AuditAction::Merged, &user, now).await?;

            MergeStep::Rekeyed
        };

        tx.commit().await?;

        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::{MergeReport, MigrationMerger};
    use crate::{
        counter::user_total,
        database::{ScratchDb, edge_count, init_memory_pool, mirror_likes, seed_subject},
        identity::ActorIdentity,
        query::QueryService,
        subject::SubjectId,
        toggle::ToggleCoordinator,
    };

    const IP: &str = "203.0.113.5";

    fn subject(id: &str) -> SubjectId {
        SubjectId::parse(id).unwrap()
    }

    fn ip() -> ActorIdentity {
        ActorIdentity::Ip(IP.to_string())
    }

    #[tokio::test]
    async fn test_merge_rekeys_and_discards() {
        let pool = init_memory_pool().await.unwrap();
        for id in ["a", "b", "c", "d"] {
            seed_subject(&pool, id, 0).await;
        }
        let toggle = ToggleCoordinator::new(pool.clone());
        let merger = MigrationMerger::new(pool.clone());
        let query = QueryService::new(pool.clone());
        let user = ActorIdentity::User(21);

        // K = 4 anonymous likes, the account already holds J = 2 of them.
        for id in ["a", "b", "c", "d"] {
            toggle.toggle(&subject(id), &ip()).await.unwrap();
        }
        for id in ["a", "b"] {
            toggle.toggle(&subject(id), &user).await.unwrap();
        }

        let report = merger.merge(21, &ip()).await.unwrap();
        assert_eq!(
            report,
            MergeReport {
                synced_count: 2,
                skipped_count: 2,
                failed_count: 0,
                total_guest_likes: 4,
            }
        );

        for id in ["a", "b", "c", "d"] {
            assert_eq!(edge_count(&pool, id).await, 1, "subject {id}");
            assert_eq!(mirror_likes(&pool, id).await, 1, "subject {id}");
            assert_eq!(query.get_count(&subject(id)).await.unwrap(), 1);
            assert!(query.is_liked(&subject(id), &user).await.unwrap());
            assert!(!query.is_liked(&subject(id), &ip()).await.unwrap());
        }

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(user_total(&mut conn, 21).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_retry_is_a_no_op() {
        let pool = init_memory_pool().await.unwrap();
        let toggle = ToggleCoordinator::new(pool.clone());
        let merger = MigrationMerger::new(pool.clone());

        toggle.toggle(&subject("a"), &ip()).await.unwrap();

        assert_eq!(merger.merge(5, &ip()).await.unwrap().synced_count, 1);
        assert_eq!(merger.merge(5, &ip()).await.unwrap(), MergeReport::default());
    }

    #[tokio::test]
    async fn test_fingerprint_likes_stay_put() {
        let pool = init_memory_pool().await.unwrap();
        let toggle = ToggleCoordinator::new(pool.clone());
        let merger = MigrationMerger::new(pool.clone());
        let query = QueryService::new(pool.clone());
        let device = ActorIdentity::Device("abcffeecc0019283".to_string());

        toggle.toggle(&subject("a"), &device).await.unwrap();

        assert_eq!(merger.merge(5, &device).await.unwrap(), MergeReport::default());
        assert_eq!(merger.merge(5, &ip()).await.unwrap().total_guest_likes, 0);
        assert!(query.is_liked(&subject("a"), &device).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_merge_survives_concurrent_writers() {
        let db = ScratchDb::open("merge-race", 8).await;
        let toggle = ToggleCoordinator::new(db.pool.clone());
        let merger = MigrationMerger::new(db.pool.clone());
        let guest = ActorIdentity::Ip("9.9.9.9".to_string());

        let ids = ["m1", "m2", "m3", "m4", "m5", "m6"];
        for id in ids {
            seed_subject(&db.pool, id, 0).await;
            toggle.toggle(&subject(id), &guest).await.unwrap();
        }

        let writer = {
            let toggle = toggle.clone();
            tokio::spawn(async move {
                let zz = subject("zz");
                for user in 0..200 {
                    toggle.toggle(&zz, &ActorIdentity::User(1000 + user % 3)).await.unwrap();
                }
            })
        };

        let report = merger.merge(77, &guest).await.unwrap();
        writer.await.unwrap();

        assert_eq!(
            report,
            MergeReport {
                synced_count: 6,
                skipped_count: 0,
                failed_count: 0,
                total_guest_likes: 6,
            }
        );

        let query = QueryService::new(db.pool.clone());
        for id in ids {
            assert!(!query.is_liked(&subject(id), &guest).await.unwrap());
            assert!(query.is_liked(&subject(id), &ActorIdentity::User(77)).await.unwrap());
            assert_eq!(query.get_count(&subject(id)).await.unwrap(), 1);
            assert_eq!(mirror_likes(&db.pool, id).await, 1);
        }
        assert_eq!(query.likes_given(77).await.unwrap(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_count_each_edge_once() {
        let db = ScratchDb::open("merge-twice", 8).await;
        let toggle = ToggleCoordinator::new(db.pool.clone());
        let merger = MigrationMerger::new(db.pool.clone());
        let guest = ActorIdentity::Ip("9.9.9.9".to_string());
        let user = ActorIdentity::User(77);

        let ids = ["m1", "m2", "m3", "m4", "m5", "m6"];
        for id in ids {
            seed_subject(&db.pool, id, 0).await;
            toggle.toggle(&subject(id), &guest).await.unwrap();
        }
        for id in ["m1", "m2"] {
            toggle.toggle(&subject(id), &user).await.unwrap();
        }

        let (first, second) = tokio::join!(merger.merge(77, &guest), merger.merge(77, &guest));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.synced_count + second.synced_count, 4);
        assert_eq!(first.skipped_count + second.skipped_count, 2);
        assert_eq!(first.failed_count + second.failed_count, 0);

        let query = QueryService::new(db.pool.clone());
        for id in ids {
            assert_eq!(edge_count(&db.pool, id).await, 1, "subject {id}");
            assert_eq!(query.get_count(&subject(id)).await.unwrap(), 1, "subject {id}");
            assert_eq!(mirror_likes(&db.pool, id).await, 1, "subject {id}");
        }
        assert_eq!(query.likes_given(77).await.unwrap(), 6);
    }
}
