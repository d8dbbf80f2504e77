//! SQLite-backed storage for codes and claim records.
//!
//! The store is the sole writer of both tables. `claim_one` is the only
//! operation with a hard atomicity requirement: the select-update-insert
//! sequence runs inside one transaction so concurrent claimers never
//! receive the same code and a code is never marked claimed without its
//! claim record.

use crate::codes::{eligible_sql, is_claimable, is_importable};
use crate::error::StoreError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one atomic claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAttempt {
    /// A code was allocated to the user and a claim record written.
    Claimed(String),
    /// The in-transaction quota re-check rejected the user.
    QuotaExceeded,
    /// No eligible unclaimed code remains. Not an error.
    Exhausted,
}

/// Counts of eligible codes by claimed state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStats {
    pub available: i64,
    pub claimed: i64,
}

pub struct CodeStore {
    pool: SqlitePool,
}

impl CodeStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent claims.
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes writes, which SQLite would do anyway;
        // it also keeps concurrent claim transactions from ever observing a
        // half-applied allocation.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // The in-memory database lives and dies with its connection, so pin
        // exactly one connection open for the pool's lifetime.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS codes (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                code       TEXT UNIQUE NOT NULL,
                claimed    INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT DEFAULT NULL,
                claimed_at TEXT DEFAULT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS claims (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL,
                code       TEXT NOT NULL,
                claimed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_claims_user_id ON claims (user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert new codes, skipping blank or command-like entries.
    ///
    /// No-op when the store already holds at least one code, so restarting
    /// the service never re-imports. Returns the number of rows inserted;
    /// duplicates (within the batch or against existing rows) count zero.
    pub async fn bulk_load(&self, values: &[String]) -> Result<u64, StoreError> {
        let existing = self.count_codes().await?;
        if existing > 0 {
            info!(existing, "Store already has codes, skipping import");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for value in values {
            let value = value.trim();
            if !is_importable(value) {
                debug!(value, "Skipping invalid import entry");
                continue;
            }
            let result = sqlx::query("INSERT OR IGNORE INTO codes (code) VALUES (?)")
                .bind(value)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    /// Read a newline-separated codes file and [`bulk_load`](Self::bulk_load) it.
    ///
    /// A missing file is logged and skipped; it is not a startup failure.
    pub async fn import_from_file(&self, path: impl AsRef<Path>) -> Result<u64, StoreError> {
        let path = path.as_ref();
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Codes file not found, skipping import");
                return Ok(0);
            }
            Err(error) => return Err(error.into()),
        };

        let lines = text.lines().map(str::to_owned).collect::<Vec<_>>();
        let inserted = self.bulk_load(&lines).await?;
        if inserted > 0 {
            info!(inserted, path = %path.display(), "Imported codes");
        }
        Ok(inserted)
    }

    /// Atomically allocate one unclaimed eligible code to `user_id`.
    ///
    /// Runs as a single transaction: optional quota re-check, select the
    /// lowest-id eligible code, mark it claimed, insert the claim record.
    /// Any failure rolls the whole thing back. `quota` of `None` disables
    /// the per-user limit.
    pub async fn claim_one(
        &self,
        user_id: &str,
        quota: Option<u32>,
    ) -> Result<ClaimAttempt, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Re-check the quota inside the transaction; the coordinator's
        // fast-path check races against the user's own concurrent requests.
        if let Some(max) = quota {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM claims WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if count >= i64::from(max) {
                return Ok(ClaimAttempt::QuotaExceeded);
            }
        }

        let select = format!(
            "SELECT id, code FROM codes WHERE claimed = 0 AND {} ORDER BY id LIMIT 1",
            eligible_sql()
        );
        let row: Option<(i64, String)> = sqlx::query_as(&select).fetch_optional(&mut *tx).await?;

        let Some((id, code)) = row else {
            return Ok(ClaimAttempt::Exhausted);
        };

        // Final validation with the Rust-side predicate, mirroring the SQL
        // filter that selected the row.
        if !is_claimable(&code) {
            warn!(code, "Selected code failed eligibility check");
            return Ok(ClaimAttempt::Exhausted);
        }

        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE codes SET claimed = 1, claimed_by = ?, claimed_at = ? WHERE id = ? AND claimed = 0",
        )
        .bind(user_id)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            return Err(StoreError::CorruptClaim {
                code,
                rows: updated.rows_affected(),
            });
        }

        sqlx::query("INSERT INTO claims (user_id, code, claimed_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(&code)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ClaimAttempt::Claimed(code))
    }

    /// Number of claim records for one user.
    pub async fn count_user_claims(&self, user_id: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM claims WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Total codes in the store, eligible or not. Drives the import guard.
    pub async fn count_codes(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM codes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Counts of eligible codes by claimed state.
    pub async fn stats(&self) -> Result<CodeStats, StoreError> {
        let sql = format!(
            "SELECT claimed, COUNT(*) FROM codes WHERE {} GROUP BY claimed",
            eligible_sql()
        );
        let rows: Vec<(i64, i64)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        let mut stats = CodeStats::default();
        for (claimed, count) in rows {
            if claimed == 0 {
                stats.available = count;
            } else {
                stats.claimed = count;
            }
        }
        Ok(stats)
    }

    /// How many distinct users have ever claimed a code.
    pub async fn count_distinct_claimants(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT user_id) FROM claims")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn store_with_codes(codes: &[&str]) -> CodeStore {
        let store = CodeStore::open_in_memory().await.unwrap();
        let values = codes.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        let inserted = store.bulk_load(&values).await.unwrap();
        // Guard the fixtures themselves: a seed silently dropped by the
        // import filter would leave the test exercising an empty store.
        assert_eq!(inserted as usize, codes.len(), "fixture codes were filtered on import");
        store
    }

    #[tokio::test]
    async fn test_bulk_load_filters_invalid_entries() {
        let store = CodeStore::open_in_memory().await.unwrap();
        let lines = ["ABC123", "", "  ", "!help", "has-addcode-inside", "XY"]
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();

        let inserted = store.bulk_load(&lines).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count_codes().await.unwrap(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, CodeStats { available: 1, claimed: 0 });
    }

    #[tokio::test]
    async fn test_bulk_load_is_idempotent() {
        let store = CodeStore::open_in_memory().await.unwrap();
        let lines = vec!["AAA".to_string(), "BBB".to_string()];

        assert_eq!(store.bulk_load(&lines).await.unwrap(), 2);
        // Second import against a populated store is a no-op.
        assert_eq!(store.bulk_load(&lines).await.unwrap(), 0);
        assert_eq!(store.count_codes().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bulk_load_dedupes_within_batch() {
        let store = CodeStore::open_in_memory().await.unwrap();
        let lines = vec!["AAA".to_string(), "AAA".to_string(), " AAA ".to_string()];

        assert_eq!(store.bulk_load(&lines).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_marks_code_and_records_claim() {
        let store = store_with_codes(&["AAA", "BBB"]).await;

        let attempt = store.claim_one("user1", None).await.unwrap();
        // Lowest id wins: insertion order is deterministic.
        assert_eq!(attempt, ClaimAttempt::Claimed("AAA".to_string()));

        let (claimed, claimed_by): (i64, Option<String>) =
            sqlx::query_as("SELECT claimed, claimed_by FROM codes WHERE code = 'AAA'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(claimed, 1);
        assert_eq!(claimed_by.as_deref(), Some("user1"));

        assert_eq!(store.count_user_claims("user1").await.unwrap(), 1);
        assert_eq!(store.count_user_claims("user2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_exhausted_when_empty() {
        let store = CodeStore::open_in_memory().await.unwrap();
        let attempt = store.claim_one("user1", None).await.unwrap();
        assert_eq!(attempt, ClaimAttempt::Exhausted);
        assert_eq!(store.count_user_claims("user1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_skips_ineligible_codes() {
        let store = CodeStore::open_in_memory().await.unwrap();
        // Bypass the import filter to plant ineligible rows directly.
        for code in ["!cmd", "xx", "run-addcode-now"] {
            sqlx::query("INSERT INTO codes (code) VALUES (?)")
                .bind(code)
                .execute(store.pool())
                .await
                .unwrap();
        }

        let attempt = store.claim_one("user1", None).await.unwrap();
        assert_eq!(attempt, ClaimAttempt::Exhausted);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, CodeStats { available: 0, claimed: 0 });
    }

    #[tokio::test]
    async fn test_claim_quota_enforced_in_transaction() {
        let store = store_with_codes(&["AAA", "BBB", "CCC"]).await;

        let first = store.claim_one("user1", Some(1)).await.unwrap();
        assert!(matches!(first, ClaimAttempt::Claimed(_)));

        let second = store.claim_one("user1", Some(1)).await.unwrap();
        assert_eq!(second, ClaimAttempt::QuotaExceeded);

        // Quota is per user.
        let other = store.claim_one("user2", Some(1)).await.unwrap();
        assert_eq!(other, ClaimAttempt::Claimed("BBB".to_string()));

        // No quota means the same user can drain the store.
        let third = store.claim_one("user1", None).await.unwrap();
        assert_eq!(third, ClaimAttempt::Claimed("CCC".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_claims_allocate_exactly_once() {
        let store = Arc::new(store_with_codes(&["K1A", "K2B", "K3C", "K4D", "K5E"]).await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_one(&format!("user{i}"), Some(1)).await.unwrap()
            }));
        }

        let results = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>();

        let granted = results
            .iter()
            .filter_map(|attempt| match attempt {
                ClaimAttempt::Claimed(code) => Some(code.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        let exhausted = results
            .iter()
            .filter(|attempt| **attempt == ClaimAttempt::Exhausted)
            .count();

        // Five codes, eight claimers: five distinct codes, three misses.
        assert_eq!(granted.len(), 5);
        assert_eq!(granted.iter().collect::<HashSet<_>>().len(), 5);
        assert_eq!(exhausted, 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, CodeStats { available: 0, claimed: 5 });
    }

    #[tokio::test]
    async fn test_claimed_codes_match_claim_records() {
        let store = store_with_codes(&["AAA", "BBB", "CCC", "DDD"]).await;
        store.claim_one("user1", None).await.unwrap();
        store.claim_one("user2", None).await.unwrap();
        store.claim_one("user1", None).await.unwrap();

        // Every claimed code has exactly one claim record with the same
        // user, and every claim record points at a code claimed by that user.
        let orphans: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM codes WHERE claimed = 1 AND NOT EXISTS (
                SELECT 1 FROM claims WHERE claims.code = codes.code
                    AND claims.user_id = codes.claimed_by
            )",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(orphans.0, 0);

        let dangling: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM claims WHERE NOT EXISTS (
                SELECT 1 FROM codes WHERE codes.code = claims.code
                    AND codes.claimed = 1 AND codes.claimed_by = claims.user_id
            )",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(dangling.0, 0);

        let records: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM claims")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(records.0, 3);
    }

    #[tokio::test]
    async fn test_stats_and_distinct_claimants() {
        let store = store_with_codes(&["AAA", "BBB", "CCC", "DDD", "EEE"]).await;
        store.claim_one("user1", None).await.unwrap();
        store.claim_one("user1", None).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, CodeStats { available: 3, claimed: 2 });

        // Two claims by one user count as one claimant.
        assert_eq!(store.count_distinct_claimants().await.unwrap(), 1);

        store.claim_one("user2", None).await.unwrap();
        assert_eq!(store.count_distinct_claimants().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_import_from_file_missing_is_not_fatal() {
        let store = CodeStore::open_in_memory().await.unwrap();
        let inserted = store
            .import_from_file("/nonexistent/codes.txt")
            .await
            .unwrap();
        assert_eq!(inserted, 0);
    }
}
