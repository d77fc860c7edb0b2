use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

/// How long a transcript fragment stays eligible for context merging.
pub const DEFAULT_CONTEXT_WINDOW: Duration = Duration::from_secs(20);

/// How often expired fragments are swept out of the cache.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One recorded transcript fragment. Never mutated after insertion.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub key: String,
    pub text: String,
    pub inserted_at: DateTime<Utc>,
}

/// Rolling short-term memory of recent transcript fragments.
///
/// This is one shared window across all sessions, matching the
/// single-active-speaker assumption of the capture side. Keys embed epoch
/// millis so fragments only accumulate; they are removed by time expiry
/// alone, either at read time (filtered out) or by the periodic sweep.
pub struct ContextCache {
    window_ms: i64,
    entries: Mutex<Vec<ContextEntry>>,
}

impl ContextCache {
    pub fn new(window: Duration) -> Self {
        ContextCache {
            window_ms: window.as_millis() as i64,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Appends a fragment under a key unique to this call.
    pub fn record(&self, session_id: &str, text: &str) {
        let now = Utc::now();
        self.insert(ContextEntry {
            key: format!("{}{}", session_id, now.timestamp_millis()),
            text: text.to_string(),
            inserted_at: now,
        });
    }

    fn insert(&self, entry: ContextEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// Concatenates every fragment still inside the validity window, in
    /// insertion order, separated by single spaces.
    pub fn recent_text(&self) -> String {
        let now = Utc::now();
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| (now - entry.inserted_at).num_milliseconds() < self.window_ms)
            .map(|entry| entry.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Deletes every entry older than the validity window. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|entry| (now - entry.inserted_at).num_milliseconds() <= self.window_ms);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns the background sweep loop.
pub fn start_sweep_task(cache: Arc<ContextCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                debug!("context sweep removed {} expired fragment(s)", removed);
            }
        }
    })
}
