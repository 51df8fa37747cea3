//! # Maintenance
//!
//! Offline jobs against the ledger database.
//!
//! ## Rebuild
//! The counter cache and the `wallpapers.likes` mirror are derived data. Edits made
//! outside the server (imports, manual deletes) leave them stale. `rebuild` walks every
//! known wallpaper and resets both from the edge table, one transaction per wallpaper,
//! so a running server keeps serving while it works.
//!
//! ## Reports
//! - `top`: ranking table for a time range
//! - `stats`: site-wide totals
//! - `history`: audit trail of one wallpaper
use anyhow::Result;
use indicatif::ProgressBar;
use sqlx::SqlitePool;
use tracing::{info, warn};

pub mod utils;

use server::{
    audit, counter,
    query::{QueryService, TimeRange},
    subject::SubjectId,
    utils::now_millis,
};
use utils::{format_millis, progress_style, truncate};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub checked: usize,
    pub corrected: usize,
    pub failed: usize,
}

pub async fn rebuild(pool: &SqlitePool) -> Result<RebuildReport> {
    let subjects = {
        let mut conn = pool.acquire().await?;
        counter::known_subjects(&mut conn).await?
    };

    let pb = ProgressBar::new(subjects.len() as u64);
    pb.set_style(progress_style());

    let mut report = RebuildReport::default();

    for subject in &subjects {
        pb.set_message(format!("Recounting {subject}"));

        match recount_one(pool, subject).await {
            Ok(recount) if recount.drifted() => {
                warn!(
                    "Counter for {subject} drifted: cached {:?}, actual {}",
                    recount.cached, recount.actual
                );
                report.corrected += 1;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Recount of {subject} failed: {e:?}");
                report.failed += 1;
            }
        }

        report.checked += 1;
        pb.inc(1);
    }

    pb.finish_with_message("Done");

    info!(
        "Rebuild checked {}, corrected {}, failed {}",
        report.checked, report.corrected, report.failed
    );

    Ok(report)
}

async fn recount_one(pool: &SqlitePool, subject: &SubjectId) -> Result<counter::Recount> {
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
    let recount = counter::recount(&mut tx, subject, now_millis()).await?;
    tx.commit().await?;

    Ok(recount)
}

pub async fn print_top(pool: &SqlitePool, limit: u32, range: TimeRange) -> Result<()> {
    let rankings = QueryService::new(pool.clone()).top_liked(limit, range).await?;

    if rankings.is_empty() {
        println!("No likes recorded for range {range:?}.");
        return Ok(());
    }

    println!("{:>4}  {:<32}  {:>8}", "rank", "wallpaper", "likes");
    for ranking in rankings {
        println!(
            "{:>4}  {:<32}  {:>8}",
            ranking.rank,
            truncate(&ranking.subject_id, 32),
            ranking.likes_count
        );
    }

    Ok(())
}

pub async fn print_stats(pool: &SqlitePool) -> Result<()> {
    let stats = QueryService::new(pool.clone()).statistics().await?;

    println!("Total Likes: {}", stats.total_likes);
    println!("Wallpapers With Likes: {}", stats.subjects_with_likes);
    println!("Likes Today: {}", stats.today_likes);
    println!("Likes This Week: {}", stats.week_likes);
    println!("Active Identities This Week: {}", stats.active_identities_week);

    Ok(())
}

pub async fn print_history(pool: &SqlitePool, subject: &SubjectId, limit: i64) -> Result<()> {
    let entries = {
        let mut conn = pool.acquire().await?;
        audit::history(&mut conn, subject, limit).await?
    };

    if entries.is_empty() {
        println!("No history for {subject}.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {:<9}  {}={}",
            format_millis(entry.created_at),
            entry.action,
            entry.identity_kind,
            entry.identity_value
        );
    }

    Ok(())
}
