use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Counter;
use crate::bayes::{Class, Stats};
use crate::config::StoreConfig;
use crate::error::{JunkError, Result};
use crate::sketch::CardinalityEstimator;

/// Persistent per-mailbox statistics
pub struct StatsStore {
    pool: SqlitePool,
    /// Held for the whole lifetime of a write transaction
    writer: Mutex<()>,
    path: PathBuf,
}

impl StatsStore {
    /// Open (or create) the store file and make sure both class totals exist
    pub async fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(2))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            writer: Mutex::new(()),
            path: path.to_path_buf(),
        };
        store.init_db().await?;

        info!("Opened statistics store {}", path.display());
        Ok(store)
    }

    async fn init_db(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS word_counters (
                class TEXT NOT NULL,
                word TEXT NOT NULL,
                sketch BLOB NOT NULL,
                PRIMARY KEY (class, word)
            ) WITHOUT ROWID
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS class_totals (
                class TEXT PRIMARY KEY,
                sketch BLOB NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verdicts (
                mail_id TEXT PRIMARY KEY,
                class TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let empty = Counter::new().to_bytes();
        for class in Class::ALL {
            sqlx::query("INSERT OR IGNORE INTO class_totals (class, sketch) VALUES (?, ?)")
                .bind(class.as_str())
                .bind(&empty)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a read-only snapshot
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let tx = self.pool.begin().await?;
        Ok(Snapshot { tx, totals: None })
    }

    /// P(class): share of learned mails that belong to `class`
    pub async fn prior(&self, class: Class) -> Result<f64> {
        let mut snapshot = self.snapshot().await?;
        let prior = snapshot.prior(class).await;
        snapshot.finish().await?;
        prior
    }

    /// P(word | class): share of `class` mails that contained `word`
    pub async fn likelihood(&self, class: Class, word: &str) -> Result<f64> {
        let mut snapshot = self.snapshot().await?;
        let likelihood = snapshot.likelihood(class, word).await;
        snapshot.finish().await?;
        likelihood
    }

    /// Read-only statistics
    pub async fn stats(&self) -> Result<Stats> {
        let mut snapshot = self.snapshot().await?;
        let stats = snapshot.stats().await;
        snapshot.finish().await?;
        stats
    }

    /// Last class recorded for a mail, if any
    pub async fn verdict(&self, mail_id: &str) -> Result<Option<Class>> {
        let mut snapshot = self.snapshot().await?;
        let verdict = snapshot.verdict(mail_id).await;
        snapshot.finish().await?;
        verdict
    }

    /// Add `mail_id` to the counters of every word and to the class total.
    ///
    /// All updates commit together or not at all.
    pub async fn learn(&self, class: Class, mail_id: &str, words: &[String]) -> Result<()> {
        self.write_learn(class, mail_id, words, false).await
    }

    /// Like [`StatsStore::learn`], also recording `class` as the mail's
    /// verdict in the same transaction.
    pub async fn learn_and_record(
        &self,
        class: Class,
        mail_id: &str,
        words: &[String],
    ) -> Result<()> {
        self.write_learn(class, mail_id, words, true).await
    }

    /// Record a verdict without touching the counters
    pub async fn record_verdict(&self, mail_id: &str, class: Class) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        upsert_verdict(&mut tx, mail_id, class).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn write_learn(
        &self,
        class: Class,
        mail_id: &str,
        words: &[String],
        record: bool,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut updated = 0usize;
        for word in words {
            let mut counter = load_word(&mut tx, class, word).await?.unwrap_or_default();
            let before = counter.clone();
            counter.add(mail_id.as_bytes());
            if counter == before {
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO word_counters (class, word, sketch) VALUES (?, ?, ?)
                ON CONFLICT (class, word) DO UPDATE SET sketch = excluded.sketch
                "#,
            )
            .bind(class.as_str())
            .bind(word)
            .bind(counter.to_bytes())
            .execute(&mut *tx)
            .await?;
            updated += 1;
        }

        let mut total = load_total(&mut tx, class).await?;
        total.add(mail_id.as_bytes());
        sqlx::query("UPDATE class_totals SET sketch = ? WHERE class = ?")
            .bind(total.to_bytes())
            .bind(class.as_str())
            .execute(&mut *tx)
            .await?;

        if record {
            upsert_verdict(&mut tx, mail_id, class).await?;
        }

        tx.commit().await?;

        debug!(
            "Learned {} as {} ({} of {} word counters changed)",
            mail_id,
            class,
            updated,
            words.len()
        );
        Ok(())
    }

    /// Write a consistent copy of the whole store to `target`.
    ///
    /// The copy is built next to `target` and renamed over it, so a reader
    /// of `target` never sees a half-written file. Returns the backup size.
    pub async fn backup(&self, target: &Path) -> Result<u64> {
        let mut partial = target.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        if tokio::fs::try_exists(&partial).await? {
            tokio::fs::remove_file(&partial).await?;
        }

        sqlx::query("VACUUM INTO ?")
            .bind(partial.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await?;

        tokio::fs::rename(&partial, target).await?;
        let size = tokio::fs::metadata(target).await?.len();

        info!("Backed up {} to {} ({} bytes)", self.path.display(), target.display(), size);
        Ok(size)
    }

    /// Wait for the in-flight write, then close every connection
    pub async fn close(&self) {
        let _guard = self.writer.lock().await;
        self.pool.close().await;
        debug!("Closed statistics store {}", self.path.display());
    }
}

/// A consistent read view of the store.
///
/// Backed by a read transaction; in WAL mode it sees the state as of its
/// first read and neither blocks nor waits for the writer.
pub struct Snapshot {
    tx: Transaction<'static, Sqlite>,
    totals: Option<(u64, u64)>,
}

impl Snapshot {
    /// Distinct mails learned as (good, junk)
    pub async fn totals(&mut self) -> Result<(u64, u64)> {
        if let Some(totals) = self.totals {
            return Ok(totals);
        }
        let good = load_total(&mut self.tx, Class::Good).await?.count();
        let junk = load_total(&mut self.tx, Class::Junk).await?.count();
        self.totals = Some((good, junk));
        Ok((good, junk))
    }

    pub async fn total(&mut self, class: Class) -> Result<u64> {
        let (good, junk) = self.totals().await?;
        Ok(match class {
            Class::Good => good,
            Class::Junk => junk,
        })
    }

    /// Distinct mails of `class` that contained `word`
    pub async fn word_count(&mut self, class: Class, word: &str) -> Result<u64> {
        Ok(load_word(&mut self.tx, class, word)
            .await?
            .map(|counter| counter.count())
            .unwrap_or(0))
    }

    pub async fn prior(&mut self, class: Class) -> Result<f64> {
        let (good, junk) = self.totals().await?;
        if good + junk == 0 {
            return Err(JunkError::NoTrainingData);
        }
        let own = self.total(class).await?;
        Ok(own as f64 / (good + junk) as f64)
    }

    pub async fn likelihood(&mut self, class: Class, word: &str) -> Result<f64> {
        let total = self.total(class).await?;
        if total == 0 {
            return Err(JunkError::NoTrainingDataForClass(class));
        }
        let count = self.word_count(class, word).await?;
        Ok(count as f64 / total as f64)
    }

    pub async fn stats(&mut self) -> Result<Stats> {
        let (good_total, junk_total) = self.totals().await?;
        let good_words = count_words(&mut self.tx, Class::Good).await?;
        let junk_words = count_words(&mut self.tx, Class::Junk).await?;

        Ok(Stats {
            good_total,
            junk_total,
            good_words,
            junk_words,
        })
    }

    pub async fn verdict(&mut self, mail_id: &str) -> Result<Option<Class>> {
        let class: Option<String> =
            sqlx::query_scalar("SELECT class FROM verdicts WHERE mail_id = ?")
                .bind(mail_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        class.map(|c| c.parse()).transpose()
    }

    /// End the snapshot
    pub async fn finish(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn load_word(
    conn: &mut SqliteConnection,
    class: Class,
    word: &str,
) -> Result<Option<Counter>> {
    let raw: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT sketch FROM word_counters WHERE class = ? AND word = ?")
            .bind(class.as_str())
            .bind(word)
            .fetch_optional(&mut *conn)
            .await?;

    raw.map(|bytes| {
        Counter::from_bytes(&bytes).map_err(|e| {
            JunkError::CounterCorruption(format!("{} counter for '{}': {}", class, word, e))
        })
    })
    .transpose()
}

async fn load_total(conn: &mut SqliteConnection, class: Class) -> Result<Counter> {
    let raw: Option<Vec<u8>> = sqlx::query_scalar("SELECT sketch FROM class_totals WHERE class = ?")
        .bind(class.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    match raw {
        Some(bytes) => Counter::from_bytes(&bytes).map_err(|e| {
            JunkError::CounterCorruption(format!("{} total: {}", class, e))
        }),
        None => Ok(Counter::new()),
    }
}

async fn count_words(conn: &mut SqliteConnection, class: Class) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM word_counters WHERE class = ?")
        .bind(class.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count as u64)
}

async fn upsert_verdict(conn: &mut SqliteConnection, mail_id: &str, class: Class) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO verdicts (mail_id, class, updated_at) VALUES (?, ?, ?)
        ON CONFLICT (mail_id) DO UPDATE SET class = excluded.class, updated_at = excluded.updated_at
        "#,
    )
    .bind(mail_id)
    .bind(class.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> StatsStore {
        StatsStore::open(&dir.path().join("junk.db"), &StoreConfig::default())
            .await
            .unwrap()
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_creates_empty_totals() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, Stats::default());
        assert!(dir.path().join("junk.db").exists());
    }

    #[tokio::test]
    async fn test_prior_without_training_data() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let result = store.prior(Class::Good).await;
        assert!(matches!(result, Err(JunkError::NoTrainingData)));
    }

    #[tokio::test]
    async fn test_prior_single_class() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.learn(Class::Junk, "m1", &words(&["london"])).await.unwrap();

        assert_eq!(store.prior(Class::Junk).await.unwrap(), 1.0);
        assert_eq!(store.prior(Class::Good).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_priors_sum_to_one() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.learn(Class::Good, "g0", &words(&["hello"])).await.unwrap();
        for i in 0..3 {
            store.learn(Class::Junk, &format!("j{}", i), &words(&["offer"])).await.unwrap();
        }

        let good = store.prior(Class::Good).await.unwrap();
        let junk = store.prior(Class::Junk).await.unwrap();
        assert_eq!(good + junk, 1.0);
        assert_eq!(good, 0.25);
    }

    #[tokio::test]
    async fn test_likelihood() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.learn(Class::Junk, "j1", &words(&["viagra", "offer"])).await.unwrap();
        store.learn(Class::Junk, "j2", &words(&["offer"])).await.unwrap();

        assert_eq!(store.likelihood(Class::Junk, "offer").await.unwrap(), 1.0);
        assert_eq!(store.likelihood(Class::Junk, "viagra").await.unwrap(), 0.5);
        assert_eq!(store.likelihood(Class::Junk, "unseen").await.unwrap(), 0.0);
        assert!(matches!(
            store.likelihood(Class::Good, "offer").await,
            Err(JunkError::NoTrainingDataForClass(Class::Good))
        ));
    }

    #[tokio::test]
    async fn test_learn_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let tokens = words(&["meeting", "tomorrow", "agenda"]);

        store.learn(Class::Good, "m1", &tokens).await.unwrap();
        let once = store.stats().await.unwrap();
        let once_count = store.snapshot().await.unwrap().word_count(Class::Good, "agenda").await.unwrap();

        store.learn(Class::Good, "m1", &tokens).await.unwrap();
        let twice = store.stats().await.unwrap();
        let twice_count = store.snapshot().await.unwrap().word_count(Class::Good, "agenda").await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(once_count, 1);
        assert_eq!(twice_count, 1);
    }

    #[tokio::test]
    async fn test_word_count_bounded_by_total() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let vocabulary = ["alpha", "bravo", "charlie", "delta"];
        for i in 0..40 {
            let tokens: Vec<String> = vocabulary
                .iter()
                .enumerate()
                .filter(|(n, _)| i % (n + 1) == 0)
                .map(|(_, w)| w.to_string())
                .collect();
            store.learn(Class::Good, &format!("m{}", i), &tokens).await.unwrap();
        }

        let mut snapshot = store.snapshot().await.unwrap();
        let total = snapshot.total(Class::Good).await.unwrap();
        assert_eq!(total, 40);
        for word in vocabulary {
            assert!(snapshot.word_count(Class::Good, word).await.unwrap() <= total);
        }
        assert_eq!(snapshot.word_count(Class::Good, "alpha").await.unwrap(), 40);
        assert_eq!(snapshot.word_count(Class::Good, "bravo").await.unwrap(), 20);
        snapshot.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_counts_distinct_words() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.learn(Class::Good, "g1", &words(&["hello", "world"])).await.unwrap();
        store.learn(Class::Good, "g2", &words(&["hello"])).await.unwrap();
        store.learn(Class::Junk, "j1", &words(&["cheap", "pills", "hello"])).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            Stats {
                good_total: 2,
                junk_total: 1,
                good_words: 2,
                junk_words: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_verdicts() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert_eq!(store.verdict("m1").await.unwrap(), None);

        store.learn_and_record(Class::Junk, "m1", &words(&["offer"])).await.unwrap();
        assert_eq!(store.verdict("m1").await.unwrap(), Some(Class::Junk));

        store.record_verdict("m1", Class::Good).await.unwrap();
        assert_eq!(store.verdict("m1").await.unwrap(), Some(Class::Good));
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.learn(Class::Good, "g1", &words(&["hello"])).await.unwrap();

        sqlx::query("UPDATE word_counters SET sketch = ? WHERE word = 'hello'")
            .bind(vec![0u8, 1, 2])
            .execute(&store.pool)
            .await
            .unwrap();

        let result = store.likelihood(Class::Good, "hello").await;
        assert!(matches!(result, Err(JunkError::CounterCorruption(_))));

        // Other words are unaffected
        assert_eq!(store.likelihood(Class::Good, "world").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_during_writes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.learn(Class::Good, "g1", &words(&["hello"])).await.unwrap();

        let mut snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.word_count(Class::Good, "hello").await.unwrap(), 1);

        store.learn(Class::Good, "g2", &words(&["hello"])).await.unwrap();

        assert_eq!(snapshot.word_count(Class::Good, "hello").await.unwrap(), 1);
        snapshot.finish().await.unwrap();

        assert_eq!(
            store.snapshot().await.unwrap().word_count(Class::Good, "hello").await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_reopen_keeps_counters() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store.learn(Class::Junk, "j1", &words(&["lottery"])).await.unwrap();
            store.close().await;
        }

        let store = open_store(&dir).await;
        assert_eq!(store.likelihood(Class::Junk, "lottery").await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_backup_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.learn(Class::Good, "g1", &words(&["hello", "world"])).await.unwrap();
        store.learn_and_record(Class::Junk, "j1", &words(&["offer"])).await.unwrap();

        let target = dir.path().join("junk.db.backup");
        let size = store.backup(&target).await.unwrap();
        assert!(size > 0);

        // A second backup replaces the first
        store.backup(&target).await.unwrap();
        assert!(!dir.path().join("junk.db.backup.partial").exists());

        let copy = StatsStore::open(&target, &StoreConfig::default()).await.unwrap();
        assert_eq!(copy.stats().await.unwrap(), store.stats().await.unwrap());
        assert_eq!(copy.verdict("j1").await.unwrap(), Some(Class::Junk));
    }
}
