use backlog_core::{CompletionAverage, Item, ItemStore, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Count shown on the display. Adjusted incrementally by live events and
/// overwritten with the store's count after every reconciliation pass.
#[derive(Debug, Default)]
pub struct LiveCount {
    value: AtomicU64,
}

impl LiveCount {
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set_authoritative(&self, count: usize) {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        let previous = self.value.swap(count, Ordering::SeqCst);
        if previous != count {
            debug!(event = "live_count_corrected", previous, count);
        }
    }

    /// Remote-reported count, shown until local reconciliation finishes.
    pub fn set_hint(&self, count: u64) {
        self.value.store(count, Ordering::SeqCst);
    }

    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn decrement(&self) -> u64 {
        let previous = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                Some(value.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

pub fn open_count(store: &dyn ItemStore) -> Result<usize, StoreError> {
    store.count_active()
}

pub fn average_completion(
    store: &dyn ItemStore,
    sample_size: usize,
) -> Result<CompletionAverage, StoreError> {
    let closed = store.list_recently_closed(sample_size)?;
    Ok(mean_completion(&closed))
}

pub fn mean_completion(items: &[Item]) -> CompletionAverage {
    let durations: Vec<u128> = items
        .iter()
        .filter_map(Item::completion_duration)
        .map(|elapsed| elapsed.as_millis())
        .collect();
    if durations.is_empty() {
        return CompletionAverage::NoData;
    }

    let total: u128 = durations.iter().sum();
    let mean_ms = total / durations.len() as u128;
    CompletionAverage::Mean {
        mean: Duration::from_millis(u64::try_from(mean_ms).unwrap_or(u64::MAX)),
        samples: durations.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, MemoryStore};
    use chrono::Duration as ChronoDuration;

    fn close_after(store: &MemoryStore, id: &str, added_secs: i64, millis: i64) {
        store.upsert_active(id, at(added_secs)).expect("add");
        store
            .mark_removed(id, at(added_secs) + ChronoDuration::milliseconds(millis))
            .expect("close");
    }

    #[test]
    fn average_of_ten_twenty_thirty_is_twenty() {
        let store = MemoryStore::default();
        close_after(&store, "a", 0, 10);
        close_after(&store, "b", 1, 20);
        close_after(&store, "c", 2, 30);

        let average = average_completion(&store, 3).expect("average");
        assert_eq!(
            average,
            CompletionAverage::Mean {
                mean: Duration::from_millis(20),
                samples: 3
            }
        );
    }

    #[test]
    fn no_closed_items_is_no_data() {
        let store = MemoryStore::default();
        store.upsert_active("open", at(0)).expect("add");

        assert_eq!(
            average_completion(&store, 50).expect("average"),
            CompletionAverage::NoData
        );
        assert_eq!(
            average_completion(&store, 0).expect("average"),
            CompletionAverage::NoData
        );
    }

    #[test]
    fn sample_uses_most_recently_added_items() {
        let store = MemoryStore::default();
        close_after(&store, "old", 0, 1_000_000);
        close_after(&store, "newer", 10, 100);
        close_after(&store, "newest", 20, 300);

        let average = average_completion(&store, 2).expect("average");
        assert_eq!(average.mean(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn open_count_matches_active_listing() {
        let store = MemoryStore::default();
        store.upsert_active("a", at(0)).expect("add");
        store.upsert_active("b", at(0)).expect("add");
        close_after(&store, "c", 0, 5);

        assert_eq!(
            open_count(&store).expect("count"),
            store.list_active().expect("active").len()
        );
    }

    #[test]
    fn live_count_never_goes_below_zero() {
        let count = LiveCount::default();
        assert_eq!(count.decrement(), 0);
        assert_eq!(count.increment(), 1);
        count.set_hint(7);
        assert_eq!(count.get(), 7);
        count.set_authoritative(3);
        assert_eq!(count.get(), 3);
    }
}
