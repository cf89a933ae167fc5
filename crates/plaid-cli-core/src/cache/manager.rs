use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::TransactionsResponse;
use crate::store::atomic_write;

/// Entries older than this are reported as stale.
const DEFAULT_MAX_AGE_MINUTES: i64 = 60;

/// One cached `/transactions/get` result and the query that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTransactions {
    pub item_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub fetched_at: DateTime<Utc>,
    pub response: TransactionsResponse,
}

impl CachedTransactions {
    pub fn age(&self) -> Duration {
        // Clock skew can put fetched_at in the future.
        (Utc::now() - self.fetched_at).max(Duration::zero())
    }

    /// Human-readable age, e.g. "3 hours ago".
    pub fn age_display(&self) -> String {
        let age = self.age();
        let (n, unit) = if age.num_days() > 0 {
            (age.num_days(), "day")
        } else if age.num_hours() > 0 {
            (age.num_hours(), "hour")
        } else if age.num_minutes() > 0 {
            (age.num_minutes(), "minute")
        } else {
            return "just now".to_string();
        };
        format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
    }
}

/// Transaction responses on disk, one JSON file per item and date range.
pub struct CacheManager {
    dir: PathBuf,
    max_age: Duration,
}

impl CacheManager {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache dir: {}", dir.display()))?;
        Ok(Self {
            dir,
            max_age: Duration::minutes(DEFAULT_MAX_AGE_MINUTES),
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_stale(&self, entry: &CachedTransactions) -> bool {
        entry.age() > self.max_age
    }

    fn entry_path(&self, item_id: &str, start: NaiveDate, end: NaiveDate) -> PathBuf {
        let item: String = item_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!(
            "transactions_{}_{}_{}.json",
            item,
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        ))
    }

    /// The cached response for exactly this item and range, if any.
    ///
    /// An unreadable entry is logged and treated as a miss.
    pub fn load_transactions(
        &self,
        item_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<CachedTransactions>> {
        let path = self.entry_path(item_id, start, end);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read cache entry: {}", path.display()))
            }
        };

        match serde_json::from_slice::<CachedTransactions>(&contents) {
            // Sanitized file names can collide; only trust an exact match.
            Ok(entry) if entry.item_id == item_id => Ok(Some(entry)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    pub fn save_transactions(
        &self,
        item_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        response: &TransactionsResponse,
    ) -> Result<()> {
        let entry = CachedTransactions {
            item_id: item_id.to_string(),
            start,
            end,
            fetched_at: Utc::now(),
            response: response.clone(),
        };
        let path = self.entry_path(item_id, start, end);
        atomic_write(&path, &serde_json::to_vec_pretty(&entry)?)
            .with_context(|| format!("Failed to write cache entry: {}", path.display()))?;
        debug!(item_id = item_id, %start, %end, "Cached transactions");
        Ok(())
    }
}
