use backlog_core::{Item, ItemStore, MarkOutcome, StoreError, UpsertOutcome};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_712_700_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

pub fn ids(items: &[Item]) -> Vec<String> {
    let mut out: Vec<_> = items.iter().map(|item| item.external_id.clone()).collect();
    out.sort();
    out
}

/// In-memory store with injectable failures.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, Item>>,
    failing: Mutex<BTreeSet<String>>,
    fail_listing: Mutex<bool>,
}

impl MemoryStore {
    pub fn fail_on(&self, external_id: &str) {
        self.failing
            .lock()
            .expect("lock")
            .insert(external_id.to_string());
    }

    pub fn fail_listing(&self) {
        *self.fail_listing.lock().expect("lock") = true;
    }

    pub fn all(&self) -> Vec<Item> {
        self.items.lock().expect("lock").values().cloned().collect()
    }

    fn check(&self, external_id: &str) -> Result<String, StoreError> {
        let id = external_id.trim();
        if id.is_empty() {
            return Err(StoreError::InvalidId(external_id.to_string()));
        }
        if self.failing.lock().expect("lock").contains(id) {
            return Err(StoreError::Backend(format!("injected failure for {id}")));
        }
        Ok(id.to_string())
    }
}

impl ItemStore for MemoryStore {
    fn upsert_active(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let id = self.check(external_id)?;
        let mut items = self.items.lock().expect("lock");
        let outcome = match items.get(&id) {
            None => UpsertOutcome::Created,
            Some(item) if item.is_active() => UpsertOutcome::Refreshed,
            Some(_) => UpsertOutcome::Reactivated,
        };
        items.insert(
            id.clone(),
            Item {
                external_id: id,
                added_at,
                removed_at: None,
            },
        );
        Ok(outcome)
    }

    fn ensure_active(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let id = self.check(external_id)?;
        let active = self
            .items
            .lock()
            .expect("lock")
            .get(&id)
            .is_some_and(Item::is_active);
        if active {
            return Ok(UpsertOutcome::Refreshed);
        }
        self.upsert_active(&id, added_at)
    }

    fn mark_removed(
        &self,
        external_id: &str,
        removed_at: DateTime<Utc>,
    ) -> Result<MarkOutcome, StoreError> {
        let id = self.check(external_id)?;
        let mut items = self.items.lock().expect("lock");
        let Some(item) = items.get_mut(&id) else {
            return Ok(MarkOutcome::NotFound);
        };
        if item.removed_at.is_some() {
            return Ok(MarkOutcome::AlreadyClosed);
        }
        item.removed_at = Some(removed_at.max(item.added_at));
        Ok(MarkOutcome::Closed)
    }

    fn get(&self, external_id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self
            .items
            .lock()
            .expect("lock")
            .get(external_id.trim())
            .cloned())
    }

    fn list_active(&self) -> Result<Vec<Item>, StoreError> {
        if *self.fail_listing.lock().expect("lock") {
            return Err(StoreError::Backend("injected listing failure".to_string()));
        }
        let mut active: Vec<_> = self
            .items
            .lock()
            .expect("lock")
            .values()
            .filter(|item| item.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(active)
    }

    fn count_active(&self) -> Result<usize, StoreError> {
        Ok(self
            .items
            .lock()
            .expect("lock")
            .values()
            .filter(|item| item.is_active())
            .count())
    }

    fn list_recently_closed(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        let mut closed: Vec<_> = self
            .items
            .lock()
            .expect("lock")
            .values()
            .filter(|item| !item.is_active())
            .cloned()
            .collect();
        closed.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        closed.truncate(limit);
        Ok(closed)
    }
}
