use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{AnalyticsReport, DataSource};

type CacheKey = (String, u32);

/// Reports keyed by `(user_id, window_days)`, each valid for `ttl` after it
/// was stored.
#[derive(Debug)]
pub struct ReportCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, (Instant, AnalyticsReport)>>,
}

impl ReportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A fresh entry, marked as cached. Expired entries are evicted.
    pub fn get(&self, user_id: &str, window_days: u32) -> Option<AnalyticsReport> {
        let mut entries = self.entries.lock().ok()?;
        let key = (user_id.to_string(), window_days);

        let fresh = entries
            .get(&key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, report)| report.clone());

        match fresh {
            Some(mut report) => {
                debug!(user = user_id, window_days, "report cache hit");
                report.data_source = DataSource::Cached;
                Some(report)
            }
            None => {
                entries.remove(&key);
                None
            }
        }
    }

    /// Only live reports are stored.
    pub fn insert(&self, user_id: &str, report: &AnalyticsReport) {
        if report.data_source != DataSource::Live {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                (user_id.to_string(), report.window_days),
                (Instant::now(), report.clone()),
            );
        }
    }

    pub fn invalidate(&self, user_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(user, _), _| user != user_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
