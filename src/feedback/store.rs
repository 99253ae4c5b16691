//! Feedback persistence

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use super::{FeedbackFilter, FeedbackKey, FeedbackRecord};
use crate::{AnalysisError, Result};

/// Storage backend for feedback records
pub trait FeedbackStore: Send + Sync {
    /// Persist a record, returning its id.
    ///
    /// A merged record replaces any earlier merged record with the same
    /// [`FeedbackKey`]; timeframe-specific records are never overwritten.
    fn save(&self, record: FeedbackRecord) -> Result<Uuid>;

    /// Records matching `filter`, newest first.
    fn query(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackRecord>>;
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order
    records: Vec<FeedbackRecord>,
    by_id: HashMap<Uuid, usize>,
    merged_by_key: HashMap<FeedbackKey, usize>,
    /// Timeframe-specific records per key, ascending slot order
    by_key: HashMap<FeedbackKey, Vec<usize>>,
}

impl Inner {
    fn upsert(&mut self, record: FeedbackRecord) -> Uuid {
        let id = record.id;
        let slot = if record.is_merged {
            self.merged_by_key.get(&record.key()).copied()
        } else {
            None
        }
        .or_else(|| self.by_id.get(&id).copied());

        let idx = match slot {
            Some(idx) => {
                let previous = std::mem::replace(&mut self.records[idx], record);
                self.unindex(idx, &previous);
                idx
            }
            None => {
                self.records.push(record);
                self.records.len() - 1
            }
        };
        self.index(idx);
        id
    }

    fn index(&mut self, idx: usize) {
        let record = &self.records[idx];
        self.by_id.insert(record.id, idx);
        if record.is_merged {
            self.merged_by_key.insert(record.key(), idx);
        } else {
            let slots = self.by_key.entry(record.key()).or_default();
            if let Err(pos) = slots.binary_search(&idx) {
                slots.insert(pos, idx);
            }
        }
    }

    fn unindex(&mut self, idx: usize, previous: &FeedbackRecord) {
        if self.by_id.get(&previous.id) == Some(&idx) {
            self.by_id.remove(&previous.id);
        }
        let key = previous.key();
        if previous.is_merged {
            if self.merged_by_key.get(&key) == Some(&idx) {
                self.merged_by_key.remove(&key);
            }
        } else if let Some(slots) = self.by_key.get_mut(&key) {
            slots.retain(|&i| i != idx);
            if slots.is_empty() {
                self.by_key.remove(&key);
            }
        }
    }

    /// Slots that can match `filter`, newest insertion first.
    ///
    /// A filter pinning instrument, pattern type and a single day goes
    /// through the key indexes; anything else walks every record.
    fn candidates(&self, filter: &FeedbackFilter) -> Vec<usize> {
        match exact_key(filter) {
            Some(key) if filter.merged_only => {
                self.merged_by_key.get(&key).copied().into_iter().collect()
            }
            Some(key) => self
                .by_key
                .get(&key)
                .map(|slots| slots.iter().rev().copied().collect())
                .unwrap_or_default(),
            None => (0..self.records.len()).rev().collect(),
        }
    }
}

/// Key fixed by `filter`, if it names exactly one pattern occurrence
fn exact_key(filter: &FeedbackFilter) -> Option<FeedbackKey> {
    let (start, end) = filter.date_range?;
    if start != end {
        return None;
    }
    Some(FeedbackKey {
        instrument: filter.instrument.clone()?,
        date: start,
        pattern_type: filter.pattern_type?,
    })
}

/// Thread-safe in-memory store with id and key indexes
#[derive(Debug, Default)]
pub struct MemoryFeedbackStore {
    inner: RwLock<Inner>,
}

impl MemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| AnalysisError::Storage("feedback store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| AnalysisError::Storage("feedback store lock poisoned".into()))
    }

    pub fn get(&self, id: Uuid) -> Result<Option<FeedbackRecord>> {
        let inner = self.read()?;
        Ok(inner.by_id.get(&id).map(|&idx| inner.records[idx].clone()))
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every record as a JSON array, in insertion order.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let inner = self.read()?;
        let json = serde_json::to_string_pretty(&inner.records)?;
        fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), records = inner.records.len(), "saved feedback snapshot");
        Ok(())
    }

    /// Rebuild a store from a snapshot written by [`save_json`](Self::save_json).
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let records: Vec<FeedbackRecord> = serde_json::from_str(&data)?;
        let store = Self::new();
        {
            let mut inner = store.write()?;
            for record in records {
                inner.upsert(record);
            }
        }
        tracing::debug!(path = %path.as_ref().display(), records = store.len(), "loaded feedback snapshot");
        Ok(store)
    }
}

impl FeedbackStore for MemoryFeedbackStore {
    fn save(&self, record: FeedbackRecord) -> Result<Uuid> {
        Ok(self.write()?.upsert(record))
    }

    fn query(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackRecord>> {
        let inner = self.read()?;
        let mut found: Vec<FeedbackRecord> = inner
            .candidates(filter)
            .into_iter()
            .map(|idx| &inner.records[idx])
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        // Stable: equal timestamps stay latest-inserted first
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(found)
    }
}
