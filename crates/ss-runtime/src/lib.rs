#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Non-fatal conditions a dashboard pass can run into. None of them abort
/// the pass; each one hides or blanks a single element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    MissingColumn,
    EmptyResult,
    InvalidSelection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub ts_unix_ms: u64,
    pub kind: NoticeKind,
    pub subject: String,
    pub detail: String,
}

impl Notice {
    #[must_use]
    pub fn render_plain(&self) -> String {
        let label = match self.kind {
            NoticeKind::MissingColumn => "skipped",
            NoticeKind::EmptyResult => "no data",
            NoticeKind::InvalidSelection => "invalid selection",
        };
        format!("[{label}] {}: {}", self.subject, self.detail)
    }
}

/// Append-only record of every degradation observed during one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeLog {
    records: Vec<Notice>,
}

impl NoticeLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, kind: NoticeKind, subject: impl Into<String>, detail: impl Into<String>) {
        self.records.push(Notice {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            kind,
            subject: subject.into(),
            detail: detail.into(),
        });
    }

    pub fn missing_columns(&mut self, subject: impl Into<String>, missing: &[String]) {
        self.push(
            NoticeKind::MissingColumn,
            subject,
            format!("missing column(s): {}", missing.join(", ")),
        );
    }

    #[must_use]
    pub fn records(&self) -> &[Notice] {
        &self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn of_kind(&self, kind: NoticeKind) -> impl Iterator<Item = &Notice> {
        self.records.iter().filter(move |notice| notice.kind == kind)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}

/// SHA-256 fingerprint of whatever makes two loads interchangeable
/// (paths, file sizes, modification times, sampling parameters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputIdentity(String);

impl InputIdentity {
    #[must_use]
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Write-once memo keyed by input identity. Values are handed out as `Arc`
/// so every consumer shares one immutable copy.
#[derive(Debug)]
pub struct MemoCache<V> {
    entries: HashMap<InputIdentity, Arc<V>>,
    stats: CacheStats,
}

impl<V> Default for MemoCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<V> MemoCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, computing it with `load` on first
    /// use. A failed load caches nothing.
    pub fn get_or_try_insert_with<E, F>(&mut self, key: InputIdentity, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.entries.get(&key) {
            self.stats.hits += 1;
            return Ok(Arc::clone(value));
        }

        self.stats.misses += 1;
        let value = Arc::new(load()?);
        self.entries.insert(key, Arc::clone(&value));
        Ok(value)
    }

    #[must_use]
    pub fn get(&self, key: &InputIdentity) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
